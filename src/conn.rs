//! Buffered, non-blocking connection I/O.
//!
//! Each client connection owns a receive queue of raw bytes and a send queue
//! of shared message chunks.  Reads drain the socket until it would block
//! and leave the bytes in the receive queue; the server then peels complete
//! lines off it one at a time, which is what lets flood control hold lines
//! back without losing them.  Writes drain the send queue until it is empty
//! or the socket pushes back.

use crate::engine::RegToken;
use selkie_tokens::Buffer;
use std::collections::VecDeque;
use std::io::{self, Read as _, Write as _};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A shared, immutable blob of outbound messages.
///
/// Cloning is cheap, so one reply buffer can be queued on every member of a
/// channel without copying the text.
#[derive(Clone, Debug)]
pub struct MessageQueueItem {
    buf: Arc<String>,
}

impl From<Buffer> for MessageQueueItem {
    fn from(val: Buffer) -> Self {
        Self {
            buf: Arc::new(val.build()),
        }
    }
}

impl From<String> for MessageQueueItem {
    fn from(val: String) -> Self {
        Self { buf: Arc::new(val) }
    }
}

impl AsRef<str> for MessageQueueItem {
    fn as_ref(&self) -> &str {
        self.buf.as_ref()
    }
}

impl MessageQueueItem {
    pub fn len(&self) -> usize {
        self.buf.len()
    }
}

/// Why a connection must go away.
#[derive(Debug)]
pub enum ConnError {
    /// The receive queue exceeded its class cap.
    RecvqExceeded,
    /// The send queue exceeded its class cap.
    SendqExceeded,
    /// The peer closed or reset the connection.
    Reset,
    /// A socket error.
    Io(io::Error),
}

impl ConnError {
    /// The quit reason shown to other users.
    pub fn quit_reason(&self) -> &'static str {
        match self {
            Self::RecvqExceeded => "RecvQ exceeded",
            Self::SendqExceeded => "SendQ exceeded",
            Self::Reset => "Connection reset by peer",
            Self::Io(_) => "Read error",
        }
    }
}

/// Byte-stream hook seam for listeners.
///
/// A provider attached to a listener is told about every connection it
/// accepts, before any protocol byte is read.  TLS, WebSocket and similar
/// wrappers hang off this; the core itself ships none.
pub trait IoHookProvider {
    fn on_accept(&mut self, conn: &mut Connection, server: SocketAddr);
}

/// The transport under a connection.
///
/// Test builds drive the state machine without sockets, so the stream is
/// optional there; over `Detached`, reads yield nothing and writes are
/// discarded at flush time.
pub enum Transport {
    Tcp(mio::net::TcpStream),
    Detached,
}

pub struct Connection {
    transport: Transport,
    addr: SocketAddr,
    token: Option<RegToken>,
    recvq: Vec<u8>,
    sendq: VecDeque<MessageQueueItem>,
    sendq_bytes: usize,
    sent: usize,
}

impl Connection {
    pub fn new(transport: Transport, addr: SocketAddr, token: Option<RegToken>) -> Self {
        Self {
            transport,
            addr,
            token,
            recvq: Vec::new(),
            sendq: VecDeque::new(),
            sendq_bytes: 0,
            sent: 0,
        }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn token(&self) -> Option<RegToken> {
        self.token
    }

    pub fn set_token(&mut self, token: RegToken) {
        self.token = Some(token);
    }

    /// Drains the send queue into a string, for harnesses that watch what
    /// the server would have written.
    #[cfg(test)]
    pub(crate) fn take_output(&mut self) -> String {
        let mut out = String::new();
        while let Some(item) = self.sendq.pop_front() {
            out.push_str(&item.as_ref()[self.sent..]);
            self.sent = 0;
        }
        self.sendq_bytes = 0;
        out
    }

    /// Pushes raw bytes into the receive queue, as if read off the socket.
    #[cfg(test)]
    pub(crate) fn feed(&mut self, bytes: &[u8]) {
        self.recvq.extend_from_slice(bytes);
    }

    pub fn source(&mut self) -> Option<&mut mio::net::TcpStream> {
        match self.transport {
            Transport::Tcp(ref mut stream) => Some(stream),
            Transport::Detached => None,
        }
    }

    /// Drains the socket into the receive queue until it would block.
    ///
    /// Bytes stay in the queue until [`Connection::next_line`] consumes
    /// them.
    pub fn fill_recvq(&mut self, recvq_max: usize) -> Result<(), ConnError> {
        let stream = match self.transport {
            Transport::Tcp(ref mut stream) => stream,
            Transport::Detached => return Ok(()),
        };
        let mut buf = [0; 2048];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => return Err(ConnError::Reset),
                Ok(n) => {
                    self.recvq.extend_from_slice(&buf[..n]);
                    if self.recvq.len() > recvq_max {
                        return Err(ConnError::RecvqExceeded);
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(ref err) if err.kind() == io::ErrorKind::ConnectionReset => {
                    return Err(ConnError::Reset)
                }
                Err(err) => return Err(ConnError::Io(err)),
            }
        }
    }

    /// Whether complete-line extraction could yield more lines.
    pub fn has_pending_line(&self) -> bool {
        self.recvq.iter().any(|b| *b == b'\r' || *b == b'\n')
    }

    /// Takes the next complete line off the receive queue.
    ///
    /// Lines end in CR, LF or CRLF.  Empty lines are skipped.  Bytes of an
    /// incomplete trailing line are kept for the next read.  Returns `None`
    /// when no complete line is buffered, and `Some(None)` for lines that
    /// are not valid UTF-8 (the caller drops those).
    pub fn next_line(&mut self) -> Option<Option<String>> {
        let end = self.recvq.iter().position(|b| *b == b'\r' || *b == b'\n')?;
        let after = self
            .recvq
            .iter()
            .skip(end)
            .position(|b| *b != b'\r' && *b != b'\n')
            .map_or(self.recvq.len(), |n| end + n);

        let line = match std::str::from_utf8(&self.recvq[..end]) {
            Ok(line) if !line.trim().is_empty() => Some(line.trim().to_owned()),
            _ => None,
        };
        self.recvq.drain(..after);
        Some(line)
    }

    pub fn sendq_len(&self) -> usize {
        self.sendq_bytes
    }

    /// Queues an outbound chunk.
    ///
    /// Returns `Ok(true)` when the queue went from empty to non-empty, in
    /// which case the caller must arm write readiness.
    pub fn queue(&mut self, item: MessageQueueItem, sendq_max: usize) -> Result<bool, ConnError> {
        if self.sendq_bytes + item.len() > sendq_max {
            return Err(ConnError::SendqExceeded);
        }
        let was_empty = self.sendq.is_empty();
        self.sendq_bytes += item.len();
        self.sendq.push_back(item);
        Ok(was_empty)
    }

    /// Writes as much of the send queue as the socket accepts.
    ///
    /// Returns `Ok(true)` once the queue is fully drained, `Ok(false)` when
    /// the socket pushed back and write readiness must stay armed.
    pub fn flush(&mut self) -> Result<bool, ConnError> {
        let stream = match self.transport {
            Transport::Tcp(ref mut stream) => stream,
            Transport::Detached => {
                self.sendq.clear();
                self.sendq_bytes = 0;
                self.sent = 0;
                return Ok(true);
            }
        };
        while let Some(front) = self.sendq.front() {
            let bytes = &front.as_ref().as_bytes()[self.sent..];
            match stream.write(bytes) {
                Ok(n) => {
                    self.sent += n;
                    self.sendq_bytes -= n;
                    if self.sent == front.len() {
                        self.sendq.pop_front();
                        self.sent = 0;
                    }
                }
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(ref err)
                    if err.kind() == io::ErrorKind::ConnectionReset
                        || err.kind() == io::ErrorKind::BrokenPipe =>
                {
                    return Err(ConnError::Reset)
                }
                Err(err) => return Err(ConnError::Io(err)),
            }
        }
        Ok(true)
    }

    /// Graceful close: queues one final line, drains the send queue until
    /// it empties or the deadline passes, then closes the stream.
    ///
    /// The caller must have dropped the engine registration first; after
    /// this returns the connection has no transport.
    pub fn close_gracefully(&mut self, line: &str, deadline: Duration) {
        self.sendq_bytes += line.len();
        self.sendq.push_back(MessageQueueItem::from(line.to_owned()));

        let start = Instant::now();
        loop {
            match self.flush() {
                Ok(true) => break,
                Ok(false) if start.elapsed() < deadline => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                _ => break,
            }
        }
        self.close();
    }

    /// Abortive close: drops whatever is queued, pushes one final error
    /// line out best-effort, then closes the stream.
    pub fn close_with_error(&mut self, line: &str) {
        self.sendq.clear();
        self.sendq_bytes = 0;
        self.sent = 0;
        match self.transport {
            Transport::Tcp(ref mut stream) => {
                let _ = stream.write(line.as_bytes());
                let _ = stream.flush();
            }
            // No stream to write to; the line stays queued so harnesses
            // can observe it.
            Transport::Detached => {
                self.sendq_bytes = line.len();
                self.sendq.push_back(MessageQueueItem::from(line.to_owned()));
            }
        }
        self.close();
    }

    /// Drops the stream, closing the file descriptor.
    fn close(&mut self) {
        self.transport = Transport::Detached;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detached() -> Connection {
        Connection::new(Transport::Detached, "127.0.0.1:1".parse().unwrap(), None)
    }

    fn push(conn: &mut Connection, bytes: &[u8]) {
        conn.recvq.extend_from_slice(bytes);
    }

    #[test]
    fn test_line_splitting() {
        let mut conn = detached();
        push(&mut conn, b"NICK alice\r\nUSER alice 0 * :Alice\nPART");

        assert_eq!(conn.next_line(), Some(Some("NICK alice".to_owned())));
        assert_eq!(conn.next_line(), Some(Some("USER alice 0 * :Alice".to_owned())));
        // "PART" has no terminator yet.
        assert_eq!(conn.next_line(), None);

        push(&mut conn, b" #chan\r");
        assert_eq!(conn.next_line(), Some(Some("PART #chan".to_owned())));
        assert_eq!(conn.next_line(), None);
    }

    #[test]
    fn test_empty_lines_skipped() {
        let mut conn = detached();
        push(&mut conn, b"\r\n\r\n  \r\nPING x\r\n");

        // Blank lines come back as None items until the real one.
        let mut lines = Vec::new();
        while let Some(line) = conn.next_line() {
            if let Some(line) = line {
                lines.push(line);
            }
        }
        assert_eq!(lines, ["PING x"]);
    }

    #[test]
    fn test_graceful_close_flushes_pending_output() {
        use std::io::Read as _;

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut peer = std::net::TcpStream::connect(addr).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();

        let mut conn = Connection::new(
            Transport::Tcp(mio::net::TcpStream::from_std(accepted)),
            addr,
            None,
        );
        conn.queue(
            MessageQueueItem::from(String::from(":alice QUIT :bye\r\n")),
            1024,
        )
        .unwrap();
        conn.close_gracefully("ERROR :Closing link\r\n", Duration::from_millis(200));

        // The queued line is drained before the final line, and the stream
        // is closed afterwards, so the peer reads everything up to EOF.
        peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let mut out = String::new();
        peer.read_to_string(&mut out).unwrap();
        assert_eq!(out, ":alice QUIT :bye\r\nERROR :Closing link\r\n");
    }

    #[test]
    fn test_sendq_cap() {
        let mut conn = detached();
        let item = MessageQueueItem::from(String::from("0123456789"));

        assert_eq!(conn.queue(item.clone(), 25).unwrap(), true);
        assert_eq!(conn.queue(item.clone(), 25).unwrap(), false);
        assert!(matches!(
            conn.queue(item, 25),
            Err(ConnError::SendqExceeded)
        ));
        assert_eq!(conn.sendq_len(), 20);
    }
}

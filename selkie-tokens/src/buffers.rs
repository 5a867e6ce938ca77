use crate::{Command, MESSAGE_LENGTH};
use std::fmt;

/// Helper to build an IRC message.
///
/// Use with `Buffer::message`.
pub struct MessageBuffer<'a> {
    buf: &'a mut String,
}

impl<'a> MessageBuffer<'a> {
    fn with_prefix(buf: &'a mut String, prefix: &str, command: impl Into<Command>) -> Self {
        buf.reserve(MESSAGE_LENGTH);
        if !prefix.is_empty() {
            buf.push(':');
            buf.push_str(prefix);
            buf.push(' ');
        }
        buf.push_str(command.into().as_str());
        MessageBuffer { buf }
    }

    /// Appends a parameter to the message.
    ///
    /// The parameter is trimmed before insertion.  If `param` is whitespace,
    /// it is not appended.
    ///
    /// **Note**: It is up to the caller to make sure there is no remaining
    /// whitespace or newline in the parameter.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use selkie_tokens::{Command, Buffer};
    /// let mut response = Buffer::new();
    ///
    /// response.message("nick!user@127.0.0.1", Command::Quit)
    ///     .param("")
    ///     .param("  bye ");
    ///
    /// assert_eq!(&response.build(), ":nick!user@127.0.0.1 QUIT bye\r\n");
    /// ```
    pub fn param(self, param: &str) -> Self {
        let param = param.trim();
        if param.is_empty() {
            return self;
        }
        self.buf.push(' ');
        self.buf.push_str(param);
        self
    }

    /// Formats, then appends a parameter to the message.
    ///
    /// The parameter is **NOT** trimmed before insertion, and is appended
    /// even if it's empty.  Use `MessageBuffer::param` to append strings,
    /// especially untrusted ones.
    pub fn fmt_param(self, param: &dyn fmt::Display) -> Self {
        use std::fmt::Write as _;

        self.buf.push(' ');
        let _ = write!(self.buf, "{}", param);
        self
    }

    /// Appends the trailing parameter to the message and consumes the buffer.
    ///
    /// Contrary to `MessageBuffer::param`, the parameter is not trimmed
    /// before insertion.  Even if `param` is just whitespace, it is appended.
    ///
    /// **Note**: It is up to the caller to make sure there is no newline in
    /// the parameter.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use selkie_tokens::{Command, Buffer};
    /// let mut response = Buffer::new();
    ///
    /// response.message("nick!user@127.0.0.1", Command::Quit)
    ///     .trailing_param("long quit message");
    ///
    /// assert_eq!(&response.build(), ":nick!user@127.0.0.1 QUIT :long quit message\r\n");
    /// ```
    pub fn trailing_param(self, param: &str) {
        self.buf.push(' ');
        self.buf.push(':');
        self.buf.push_str(param);
    }

    /// Returns a buffer the caller can use to append characters to an IRC
    /// message.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use selkie_tokens::{Command, Buffer};
    /// let mut response = Buffer::new();
    /// {
    ///     let mut msg = response.message("nick!user@127.0.0.1", Command::Mode)
    ///         .param("#my_channel");
    ///     let param = msg.raw_param();
    ///     param.push('+');
    ///     param.push('n');
    ///     param.push('t');
    /// }
    ///
    /// assert_eq!(&response.build(), ":nick!user@127.0.0.1 MODE #my_channel +nt\r\n");
    /// ```
    pub fn raw_param(&mut self) -> &mut String {
        self.buf.push(' ');
        self.buf
    }

    /// Returns a buffer the caller can use to append characters to the
    /// trailing parameter of an IRC message.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use selkie_tokens::{Buffer, rpl};
    /// let mut response = Buffer::new();
    /// {
    ///     let mut msg = response.message("selkie.dev", rpl::NAMREPLY)
    ///         .param("alice");
    ///     let param = msg.raw_trailing_param();
    ///     param.push_str("@ChanOp");
    ///     param.push(' ');
    ///     param.push_str("SomeUser");
    /// }
    ///
    /// assert_eq!(&response.build(), ":selkie.dev 353 alice :@ChanOp SomeUser\r\n");
    /// ```
    pub fn raw_trailing_param(&mut self) -> &mut String {
        self.buf.push(' ');
        self.buf.push(':');
        self.buf
    }
}

impl Drop for MessageBuffer<'_> {
    /// Auto-magically append "\r\n" when the `MessageBuffer` is dropped.
    fn drop(&mut self) {
        self.buf.push('\r');
        self.buf.push('\n');
    }
}

/// Helper to build IRC messages.
///
/// The `Buffer` is used to ease the creation of strings representing valid
/// IRC messages.
///
/// # Example
///
/// ```rust
/// # use selkie_tokens::{Command, Buffer, rpl};
/// let mut response = Buffer::new();
///
/// response.message("nick!user@127.0.0.1", Command::Topic)
///     .param("#hall")
///     .trailing_param("Welcome to new users!");
/// response.message("selkie.dev", rpl::TOPIC)
///     .param("nickname")
///     .param("#hall")
///     .trailing_param("Welcome to new users!");
///
/// let result = response.build();
/// assert_eq!(&result, ":nick!user@127.0.0.1 TOPIC #hall :Welcome to new users!\r\n\
/// :selkie.dev 332 nickname #hall :Welcome to new users!\r\n");
/// ```
#[derive(Debug, Default)]
pub struct Buffer {
    buf: String,
}

impl From<String> for Buffer {
    fn from(val: String) -> Self {
        Self { buf: val }
    }
}

impl Buffer {
    /// Creates a `Buffer`.  Does not allocate.
    pub fn new() -> Self {
        Self { buf: String::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: String::with_capacity(capacity),
        }
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Returns a reference to the underlying `String`.
    pub fn get(&self) -> &str {
        &self.buf
    }

    /// Empties the buffer.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Appends an IRC message with a prefix to the buffer.
    ///
    /// This function may allocate to reserve space for the message.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use selkie_tokens::{Command, Buffer};
    /// let mut response = Buffer::new();
    ///
    /// response.message("prefix", Command::Admin);
    ///
    /// assert_eq!(&response.build(), ":prefix ADMIN\r\n");
    /// ```
    pub fn message(&mut self, prefix: &str, command: impl Into<Command>) -> MessageBuffer<'_> {
        MessageBuffer::with_prefix(&mut self.buf, prefix, command)
    }

    /// Consumes the `Buffer` and returns the underlying `String`.
    pub fn build(self) -> String {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpl;

    #[test]
    fn test_no_prefix() {
        let mut buf = Buffer::new();
        buf.message("", Command::Ping).param("token");
        assert_eq!(&buf.build(), "PING token\r\n");
    }

    #[test]
    fn test_reply_numeric() {
        let mut buf = Buffer::new();
        buf.message("selkie.dev", rpl::ERR_NICKNAMEINUSE)
            .param("*")
            .param("Alice")
            .trailing_param("Nickname is already in use");
        assert_eq!(
            &buf.build(),
            ":selkie.dev 433 * Alice :Nickname is already in use\r\n"
        );
    }
}

use crate::Command;

/// The maximum length of a message on the wire, CR-LF included.
///
/// `Message::parse` can parse messages longer than that.  It is used by
/// `Buffer` to avoid multiple allocations when building the same message.
pub const MESSAGE_LENGTH: usize = 512;

/// The number of elements in `Message::params`.
pub const PARAMS_LENGTH: usize = 15;

/// Returns `(word, rest)` where `word` is the first word of the given string
/// and `rest` is the substring starting at the first character of the second
/// word.
///
/// Word boundaries here are spaces only.
fn parse_word(s: &str) -> (&str, &str) {
    let mut split = s.splitn(2, ' ').map(str::trim).filter(|s| !s.is_empty());
    (split.next().unwrap_or(""), split.next().unwrap_or(""))
}

/// If the given string starts with a prefix, returns `(Some(prefix), rest)`
/// where `rest` starts from the first word after the prefix.
///
/// Otherwise returns `(None, rest)` where `rest` is the substring starting
/// from the first word of the given string.
fn parse_prefix(buf: &str) -> (Option<&str>, &str) {
    if buf.starts_with(':') {
        let (prefix, rest) = parse_word(buf);
        (Some(&prefix[1..]), rest)
    } else {
        (None, buf.trim_start())
    }
}

/// Parses the first word of the string the same way as `parse_word`, and then
/// tries to parse it as a command.
///
/// On success, it returns `(Ok(command), rest)`.  On failure, when the command
/// is not a variant of `Command`, it returns `(Err(unknown_command), rest)`.
fn parse_command(buf: &str) -> (Result<Command, &str>, &str) {
    let (command_string, rest) = parse_word(buf);
    (Command::parse(command_string).ok_or(command_string), rest)
}

/// A tokenized IRC message.
///
/// See `Message::parse` for how to read IRC messages, and `Buffer` for how to
/// create them.
///
/// See the RFC 2812 for a complete description of IRC messages:
/// <https://tools.ietf.org/html/rfc2812.html#section-2.3>.
#[derive(Clone, Debug)]
pub struct Message<'a> {
    /// The source prefix of the message, without its leading `:`.
    pub prefix: Option<&'a str>,

    /// The command of the message.
    ///
    /// It can either be a known command in the form of `Ok(Command::_)`, or a
    /// simple string.  `Message::parse` sets this field to `Err(_)` if the
    /// command is not a variant of `Command`.
    pub command: Result<Command, &'a str>,

    /// The number of parameters, and the number of valid elements in
    /// `Message::params`.
    pub num_params: usize,

    /// The actual parameters of the message.
    ///
    /// Only the `num_params` first elements are valid.  Other elements are
    /// empty strings.
    pub params: [&'a str; PARAMS_LENGTH],
}

impl<'a> Message<'a> {
    /// Parses a string and returns information about the IRC message.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use selkie_tokens::{Command, Message};
    /// let privmsg = Message::parse(":alice PRIVMSG #core :hi there\r\n").unwrap();
    ///
    /// assert_eq!(privmsg.prefix, Some("alice"));
    /// assert_eq!(privmsg.command, Ok(Command::PrivMsg));
    /// assert_eq!(privmsg.num_params, 2);
    /// assert_eq!(privmsg.params[0], "#core");
    /// assert_eq!(privmsg.params[1], "hi there");
    /// ```
    ///
    /// If the command is unknown, it is stored as `Err(command_string)`,
    /// where `command_string` is taken from the input string:
    ///
    /// ```rust
    /// # use selkie_tokens::{Command, Message};
    /// let unknown = Message::parse("Typo arg1\r\n").unwrap();
    ///
    /// assert_eq!(unknown.prefix, None);
    /// assert_eq!(unknown.command, Err("Typo"));
    /// assert_eq!(unknown.num_params, 1);
    /// assert_eq!(unknown.params[0], "arg1");
    /// ```
    ///
    /// # Return value
    ///
    /// Returns `Some(msg)` when the message is correctly formed, `None`
    /// otherwise.  Correctly formed means the message has a command and does
    /// not contain NUL bytes.
    ///
    /// ```rust
    /// # use selkie_tokens::Message;
    /// let empty = Message::parse("  \r \n \t ");
    /// let no_command = Message::parse(":prefix");
    ///
    /// assert!(empty.is_none());
    /// assert!(no_command.is_none());
    /// ```
    pub fn parse(s: &'a str) -> Option<Message<'a>> {
        let mut buf = s.trim();
        if buf.is_empty() || buf.contains('\0') {
            return None;
        }

        let (prefix, rest) = parse_prefix(buf);
        buf = rest;
        let (command, rest) = parse_command(buf);
        buf = rest;

        if let Err("") = command {
            return None;
        }

        let mut params = [""; PARAMS_LENGTH];
        let mut num_params = 0;
        while num_params < PARAMS_LENGTH {
            if buf.is_empty() {
                break;
            }
            if let Some(trailing) = buf.strip_prefix(':') {
                params[num_params] = trailing;
                buf = "";
            } else {
                let (word, rest) = parse_word(buf);
                params[num_params] = word;
                buf = rest;
            }
            num_params += 1;
        }

        Some(Message {
            prefix,
            command,
            num_params,
            params,
        })
    }

    /// Returns true if the message has enough parameters for its command.
    ///
    /// # Example
    ///
    /// ```rust
    /// # use selkie_tokens::Message;
    /// let nick = Message::parse("NICK hello there").unwrap();
    /// assert_eq!(nick.has_enough_params(), true);
    ///
    /// let nick = Message::parse("NICK :").unwrap();
    /// assert_eq!(nick.has_enough_params(), true);
    ///
    /// let nick = Message::parse("NICK").unwrap();
    /// assert_eq!(nick.has_enough_params(), false);
    /// ```
    pub fn has_enough_params(&self) -> bool {
        match self.command {
            Ok(cmd) => cmd.required_params() <= self.num_params,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_prefix_and_trailing() {
        // Numerics are not Command variants, they come back as Err.
        let msg = Message::parse(":irc.example.org 001 alice :Welcome alice\r\n").unwrap();
        assert_eq!(msg.prefix, Some("irc.example.org"));
        assert_eq!(msg.command, Err("001"));
        assert_eq!(msg.num_params, 2);
        assert_eq!(msg.params[0], "alice");
        assert_eq!(msg.params[1], "Welcome alice");
    }

    #[test]
    fn test_parse_line_endings() {
        for line in &["PING :tok\r\n", "PING :tok\n", "PING :tok\r", "PING :tok"] {
            let msg = Message::parse(line).unwrap();
            assert_eq!(msg.command, Ok(Command::Ping));
            assert_eq!(msg.params[0], "tok");
        }
    }

    #[test]
    fn test_parse_rejects() {
        assert!(Message::parse("").is_none());
        assert!(Message::parse("  \r\n").is_none());
        assert!(Message::parse(":prefix-only").is_none());
        assert!(Message::parse("PRIVMSG #a :b\0c").is_none());
    }

    #[test]
    fn test_trailing_keeps_spaces_and_colons() {
        let msg = Message::parse("PRIVMSG #test ::) hi  there").unwrap();
        assert_eq!(msg.num_params, 2);
        assert_eq!(msg.params[1], ":) hi  there");
    }

    #[test]
    fn test_collapsing_spaces() {
        let msg = Message::parse("MODE   #test  +o   alice").unwrap();
        assert_eq!(msg.num_params, 3);
        assert_eq!(&msg.params[..3], &["#test", "+o", "alice"]);
    }

    // Every line a handler can produce must tokenize back to the same verb
    // and parameters.
    #[test]
    fn test_round_trip() {
        use crate::Buffer;

        let mut buf = Buffer::new();
        buf.message("alice!alice@host", Command::PrivMsg)
            .param("#test")
            .trailing_param("hello world");
        let built = buf.build();

        let msg = Message::parse(&built).unwrap();
        assert_eq!(msg.prefix, Some("alice!alice@host"));
        assert_eq!(msg.command, Ok(Command::PrivMsg));
        assert_eq!(msg.num_params, 2);
        assert_eq!(msg.params[0], "#test");
        assert_eq!(msg.params[1], "hello world");
    }
}

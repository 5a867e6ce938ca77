use std::fmt;

/// The registration level a command requires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Access {
    /// Usable before registration completes (NICK, USER, PASS, ...).
    Unregistered,
    /// Usable by any registered user.
    Registered,
    /// Usable by IRC operators only.
    Oper,
}

macro_rules! commands {
    ( $( $cmd:ident $cmd_str:literal $n:literal $access:ident $penalty:literal )* ) => {
        /// The list of known commands.
        ///
        /// Unknown commands and replies are supported by `Message` directly,
        /// this enum just contains the supported commands.
        #[derive(Clone, Copy, Debug, PartialEq)]
        pub enum Command {
            $( $cmd, )*
            Reply(&'static str),
        }

        impl Command {
            /// From a given command string, returns the corresponding command,
            /// or `None` otherwise.
            ///
            /// It ignores the case of its argument.
            ///
            /// # Example
            ///
            /// ```rust
            /// # use selkie_tokens::Command;
            /// let join = Command::parse("join");
            /// let join2 = Command::parse("JOIN");
            /// let not_join = Command::parse("not_join");
            ///
            /// assert_eq!(join, Some(Command::Join));
            /// assert_eq!(join2, Some(Command::Join));
            /// assert_eq!(not_join, None);
            /// ```
            pub fn parse(s: &str) -> Option<Self> {
                $( if s.eq_ignore_ascii_case($cmd_str) {
                    Some(Command::$cmd)
                } else )* {
                    None
                }
            }

            /// Returns the number of required arguments for the command.
            ///
            /// The command may accept more arguments.
            pub fn required_params(&self) -> usize {
                match self {
                $(
                    Command::$cmd => $n,
                )*
                    Command::Reply(_) => 0,
                }
            }

            /// The registration level required to issue the command.
            pub fn access(&self) -> Access {
                match self {
                $(
                    Command::$cmd => Access::$access,
                )*
                    Command::Reply(_) => Access::Registered,
                }
            }

            /// The flood penalty a successful invocation adds to the issuing
            /// connection.
            pub fn penalty(&self) -> u32 {
                match self {
                $(
                    Command::$cmd => $penalty,
                )*
                    Command::Reply(_) => 0,
                }
            }

            /// Returns the command string.  It is not the string that have
            /// been parsed.
            pub fn as_str(&self) -> &'static str {
                match self {
                $(
                    Command::$cmd => $cmd_str,
                )*
                    Command::Reply(s) => s,
                }
            }
        }

        impl From<&'static str> for Command {
            /// `&'static str`s are converted to the `Command::Reply` variant.
            ///
            /// This trait is used by `Buffer` to accept both `Command` and
            /// reply numerics when building messages.
            fn from(reply: &'static str) -> Self {
                Command::Reply(reply)
            }
        }

        impl fmt::Display for Command {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.as_str().fmt(f)
            }
        }
    }
}

commands! {
//  Ident.   String     Min. params  Access        Penalty
    Admin    "ADMIN"    0            Registered    1
    Away     "AWAY"     0            Registered    1
    Eline    "ELINE"    1            Oper          1
    Gline    "GLINE"    1            Oper          1
    Info     "INFO"     0            Registered    1
    Invite   "INVITE"   2            Registered    1
    Join     "JOIN"     1            Registered    1
    Kick     "KICK"     2            Registered    1
    Kill     "KILL"     2            Oper          1
    Kline    "KLINE"    1            Oper          1
    List     "LIST"     0            Registered    3
    Lusers   "LUSERS"   0            Registered    1
    Mode     "MODE"     1            Registered    1
    Motd     "MOTD"     0            Registered    2
    Names    "NAMES"    0            Registered    1
    Nick     "NICK"     1            Unregistered  1
    Notice   "NOTICE"   2            Registered    1
    Oper     "OPER"     2            Registered    1
    Part     "PART"     1            Registered    1
    Pass     "PASS"     1            Unregistered  1
    Ping     "PING"     1            Unregistered  0
    Pong     "PONG"     1            Unregistered  0
    PrivMsg  "PRIVMSG"  2            Registered    1
    Qline    "QLINE"    1            Oper          1
    Quit     "QUIT"     0            Unregistered  0
    Rehash   "REHASH"   0            Oper          2
    Stats    "STATS"    1            Registered    2
    Time     "TIME"     0            Registered    1
    Topic    "TOPIC"    1            Registered    1
    User     "USER"     4            Unregistered  1
    Version  "VERSION"  0            Registered    1
    Who      "WHO"      0            Registered    2
    Whois    "WHOIS"    1            Registered    2
    Zline    "ZLINE"    1            Oper          1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ignores_case() {
        assert_eq!(Command::parse("privmsg"), Some(Command::PrivMsg));
        assert_eq!(Command::parse("PrivMsg"), Some(Command::PrivMsg));
        assert_eq!(Command::parse("GLINE"), Some(Command::Gline));
        assert_eq!(Command::parse("noop"), None);
    }

    #[test]
    fn test_table_columns() {
        assert_eq!(Command::User.required_params(), 4);
        assert_eq!(Command::User.access(), Access::Unregistered);
        assert_eq!(Command::Join.access(), Access::Registered);
        assert_eq!(Command::Rehash.access(), Access::Oper);
        assert_eq!(Command::Ping.penalty(), 0);
        assert_eq!(Command::List.penalty(), 3);
    }
}

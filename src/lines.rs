//! Text of the server's replies.
//!
//! Reply codes are defined in `selkie_tokens::rpl`; this module keeps the
//! human-readable halves in one place so wording stays consistent across
//! handlers.

use selkie_tokens::MessageBuffer;

pub const ADMIN_ME: &str = "Administrative info";
pub const ALREADY_REGISTERED: &str = "You may not reregister";
pub const BAD_CHAN_KEY: &str = "Cannot join channel (+k)";
pub const BANNED_FROM_CHAN: &str = "Cannot join channel (+b)";
pub const CANNOT_SEND_TO_CHAN: &str = "Cannot send to channel";
pub const CHAN_O_PRIVS_NEEDED: &str = "You're not a channel operator";
pub const CHANNEL_IS_FULL: &str = "Cannot join channel (+l)";
pub const END_OF_BAN_LIST: &str = "End of channel ban list";
pub const END_OF_EXCEPT_LIST: &str = "End of channel exception list";
pub const END_OF_INFO: &str = "End of INFO list";
pub const END_OF_INVITE_LIST: &str = "End of channel invite list";
pub const END_OF_LIST: &str = "End of LIST";
pub const END_OF_MOTD: &str = "End of message of the day";
pub const END_OF_NAMES: &str = "End of NAMES list";
pub const END_OF_STATS: &str = "End of STATS report";
pub const END_OF_WHO: &str = "End of WHO list";
pub const END_OF_WHOIS: &str = "End of WHOIS list";
pub const ERRONEOUS_NICKNAME: &str = "Erroneous nickname";
pub const INPUT_TOO_LONG: &str = "Input line was too long";
pub const INVITE_ONLY_CHAN: &str = "Cannot join channel (+i)";
pub const KEY_SET: &str = "Channel key already set";
pub const NEED_MORE_PARAMS: &str = "Not enough parameters";
pub const NICKNAME_IN_USE: &str = "Nickname is already in use";
pub const NO_MOTD: &str = "MOTD file is missing";
pub const NO_NICKNAME_GIVEN: &str = "No nickname given";
pub const NO_OPER_HOST: &str = "Invalid oper credentials";
pub const NO_PRIVILEGES: &str = "Permission Denied - You do not have the required operator privileges";
pub const NO_RECIPIENT: &str = "No recipient given";
pub const NO_SUCH_CHANNEL: &str = "No such channel";
pub const NO_SUCH_NICK: &str = "No such nick/channel";
pub const NO_TEXT_TO_SEND: &str = "No text to send";
pub const NO_TOPIC: &str = "No topic is set";
pub const NOT_ON_CHANNEL: &str = "You're not on that channel";
pub const NOT_REGISTERED: &str = "You have not registered";
pub const NOWAWAY: &str = "You have been marked as being away";
pub const PASSWORD_MISMATCH: &str = "Password incorrect";
pub const TOO_MANY_TARGETS: &str = "Too many targets";
pub const UNAWAY: &str = "You are no longer marked as being away";
pub const UNKNOWN_COMMAND: &str = "Unknown command";
pub const UNKNOWN_MODE: &str = "is an unknown mode char to me";
pub const USER_NOT_IN_CHANNEL: &str = "They aren't on that channel";
pub const USER_ON_CHANNEL: &str = "is already on channel";
pub const USERS_DONT_MATCH: &str = "Can't change mode for other users";
pub const UMODE_UNKNOWN_FLAG: &str = "Unknown MODE flag";
pub const YOURE_BANNED: &str = "You're banned from this server";
pub const YOURE_OPER: &str = "You are now an IRC operator";

pub const I_SUPPORT: &str = "are supported by this server";

// Lines with parameters.

pub fn welcome(mut r: MessageBuffer<'_>, full_name: &str) {
    let trailing = r.raw_trailing_param();
    trailing.push_str("Welcome to the Internet Relay Network ");
    trailing.push_str(full_name);
}

pub fn your_host(mut r: MessageBuffer<'_>, server_name: &str, version: &str) {
    let trailing = r.raw_trailing_param();
    trailing.push_str("Your host is ");
    trailing.push_str(server_name);
    trailing.push_str(", running version ");
    trailing.push_str(version);
}

pub fn created(mut r: MessageBuffer<'_>, since: &str) {
    let trailing = r.raw_trailing_param();
    trailing.push_str("This server was created ");
    trailing.push_str(since);
}

pub fn luser_client(mut r: MessageBuffer<'_>, num_clients: usize, num_unregistered: usize) {
    use std::fmt::Write as _;

    let trailing = r.raw_trailing_param();
    let _ = write!(
        trailing,
        "There are {} users and {} unknown connections on 1 server",
        num_clients, num_unregistered
    );
}

pub fn luser_me(mut r: MessageBuffer<'_>, num_clients: usize) {
    use std::fmt::Write as _;

    let trailing = r.raw_trailing_param();
    let _ = write!(trailing, "I have {} clients and 0 servers", num_clients);
}

pub fn ping_timeout(seconds: u64) -> String {
    format!(
        "Ping timeout: {} second{}",
        seconds,
        if seconds == 1 { "" } else { "s" }
    )
}

pub fn closing_link(ident: &str, host: &str, reason: &str) -> String {
    format!("Closing link: ({}@{}) [{}]", ident, host, reason)
}

//! Per-connection user state.

use crate::config::ConnectClass;
use crate::conn::Connection;
use crate::extension::Extensions;
use selkie_tokens::{mode, MessageBuffer};
use std::collections::HashSet;
use std::fmt;
use std::fmt::Write as _;
use std::net::IpAddr;
use std::rc::Rc;

/// A stable 9-character user id: a 3-character server id followed by a
/// 6-character base-36 counter.  Unique for the lifetime of the process,
/// never reused.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid([u8; 9]);

impl Uid {
    pub fn new(bytes: [u8; 9]) -> Self {
        Self(bytes)
    }

    pub fn as_str(&self) -> &str {
        // Generated from ASCII digits and uppercase letters only.
        std::str::from_utf8(&self.0).unwrap_or("?????????")
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({})", self.as_str())
    }
}

/// Where a connection stands in the registration handshake.
///
/// NICK and USER may arrive in either order; the transition to `All` happens
/// from the background sweep once every module reports the user ready.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegState {
    None,
    Nick,
    User,
    NickUser,
    All,
}

impl RegState {
    pub fn with_nick(self) -> Self {
        match self {
            Self::None => Self::Nick,
            Self::User => Self::NickUser,
            other => other,
        }
    }

    pub fn with_user(self) -> Self {
        match self {
            Self::None => Self::User,
            Self::Nick => Self::NickUser,
            other => other,
        }
    }

    pub fn is_full(self) -> bool {
        self == Self::All
    }
}

const FULL_NAME_LENGTH: usize = 64;

/// A connected client.
///
/// Owned exclusively by the user manager; channels and other users refer to
/// it by [`Uid`].
pub struct User {
    uid: Uid,
    nick: String,
    ident: String,
    realname: String,
    host: String,
    realhost: String,
    ip: IpAddr,

    /// The nick!ident@host, kept in sync with its parts.
    full_name: String,

    pub conn: Connection,
    pub class: Rc<ConnectClass>,
    pub registered: RegState,

    /// When the connection was accepted.
    pub signon: u64,
    /// When the user last spoke; WHOIS reports idle time from this.
    pub last_action: u64,
    /// Deadline of the next ping round.
    pub nping: u64,
    /// Whether the last PING was answered.
    pub lastping: bool,
    pub penalty: u32,
    pub quitting: bool,
    /// Matched an E-line on accept; immune to bans and flood quits.
    pub exempt: bool,
    pub has_given_password: bool,

    pub away: Option<String>,
    pub invisible: bool,
    pub oper: bool,
    pub wallops: bool,
    pub server_notices: bool,
    /// Server-notice categories this oper receives.
    pub snomasks: HashSet<char>,

    /// Folded names of the channels this user is in.
    pub channels: HashSet<String>,

    /// Broadcast dedup stamp; see the user manager's garbage collection.
    pub already_sent: u64,

    pub extensions: Extensions,
}

impl User {
    pub fn new(uid: Uid, conn: Connection, class: Rc<ConnectClass>, now: u64) -> Self {
        let ip = conn.addr().ip();
        let host = ip.to_string();
        let mut user = Self {
            uid,
            nick: uid.to_string(),
            ident: String::from("unknown"),
            realname: String::new(),
            host: host.clone(),
            realhost: host,
            ip,
            full_name: String::with_capacity(FULL_NAME_LENGTH),
            conn,
            class,
            registered: RegState::None,
            signon: now,
            last_action: now,
            nping: 0,
            lastping: true,
            penalty: 0,
            quitting: false,
            exempt: false,
            has_given_password: false,
            away: None,
            invisible: false,
            oper: false,
            wallops: false,
            server_notices: false,
            snomasks: HashSet::new(),
            channels: HashSet::new(),
            already_sent: 0,
            extensions: Extensions::new(),
        };
        user.update_full_name();
        user
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// The nick!ident@host of this user.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    fn update_full_name(&mut self) {
        self.full_name.clear();
        let _ = write!(self.full_name, "{}!{}@{}", self.nick, self.ident, self.host);
    }

    pub fn nick(&self) -> &str {
        &self.nick
    }

    pub fn set_nick(&mut self, nick: &str) {
        self.nick.clear();
        self.nick.push_str(nick);
        self.update_full_name();
    }

    pub fn ident(&self) -> &str {
        &self.ident
    }

    pub fn set_ident(&mut self, ident: &str) {
        self.ident.clear();
        self.ident.push_str(ident);
        self.update_full_name();
    }

    pub fn realname(&self) -> &str {
        &self.realname
    }

    pub fn set_realname(&mut self, realname: &str) {
        self.realname.clear();
        self.realname.push_str(realname);
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// The hostname before any module rewrote it (cloaking, vhosts).
    pub fn realhost(&self) -> &str {
        &self.realhost
    }

    pub fn set_host(&mut self, host: &str) {
        self.host.clear();
        self.host.push_str(host);
        self.update_full_name();
    }

    pub fn is_registered(&self) -> bool {
        self.registered.is_full()
    }

    /// Appends this user's mode string (for RPL_UMODEIS and MODE echoes).
    pub fn write_modes(&self, mut out: MessageBuffer<'_>) {
        let modes = out.raw_param();
        modes.push('+');
        if self.away.is_some() {
            modes.push('a');
        }
        if self.invisible {
            modes.push('i');
        }
        if self.oper {
            modes.push('o');
        }
        if self.server_notices {
            modes.push('s');
        }
        if self.wallops {
            modes.push('w');
        }
    }

    /// Applies one user mode change, returning whether anything changed.
    pub fn apply_mode_change(&mut self, change: mode::UserChange) -> bool {
        use mode::UserChange::*;
        match change {
            Invisible(value) => {
                let applied = self.invisible != value;
                self.invisible = value;
                applied
            }
            ServerNotices(value) => {
                let applied = self.server_notices != value;
                self.server_notices = value;
                applied
            }
            Wallops(value) => {
                let applied = self.wallops != value;
                self.wallops = value;
                applied
            }
            DeOperator => {
                let applied = self.oper;
                self.oper = false;
                applied
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn test_dummy() -> Self {
        use crate::conn::Transport;

        let conn = Connection::new(Transport::Detached, "127.0.0.1:9".parse().unwrap(), None);
        Self::new(
            Uid::new(*b"00AAAAAAA"),
            conn,
            Rc::new(ConnectClass::default()),
            0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reg_state_any_order() {
        assert_eq!(RegState::None.with_nick(), RegState::Nick);
        assert_eq!(RegState::None.with_user(), RegState::User);
        assert_eq!(RegState::Nick.with_user(), RegState::NickUser);
        assert_eq!(RegState::User.with_nick(), RegState::NickUser);
        assert_eq!(RegState::All.with_nick(), RegState::All);
    }

    #[test]
    fn test_full_name_tracks_parts() {
        let mut user = User::test_dummy();
        user.set_nick("alice");
        user.set_ident("alice");
        user.set_host("host.example");
        assert_eq!(user.full_name(), "alice!alice@host.example");
    }
}

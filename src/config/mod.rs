//! Configuration parsing and structures.
//!
//! The configuration is a flat file of `key value` lines; `#` starts a
//! comment line.  See `doc/selkie.conf` in the repository for an annotated
//! example.  Reloads go through the same path as startup: a file that fails
//! to parse leaves the running configuration untouched.

use self::parser::{ModeString, Parser};
use selkie_unicase::Mapping;
use std::net::SocketAddr;
use std::ops::Range;
use std::rc::Rc;
use std::{fmt, io, path};

mod parser;

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Format(Parser, Option<usize>, Range<usize>, String),
}

impl From<io::Error> for Error {
    fn from(val: io::Error) -> Self {
        Self::Io(val)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => err.fmt(f),
            Self::Format(parser, lineno, col, msg) => {
                writeln!(f, "{}", msg)?;
                if let Some(lineno) = lineno {
                    writeln!(f, "     |")?;
                    parser
                        .lines()
                        .enumerate()
                        .skip_while(|(lno, _)| lno + 3 < *lineno)
                        .take_while(|(lno, _)| lno <= lineno)
                        .try_for_each(|(lno, line)| writeln!(f, "{:4} | {}", lno + 1, line))?;
                    let start = col.start + 1;
                    let len = (col.end - col.start).max(1);
                    writeln!(f, "     |{0:1$}{2:^<3$}", ' ', start, '^', len)?;
                }
                Ok(())
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// An operator credential pair.
pub struct Oper(pub String, pub String);

/// A named connection policy.
///
/// Users are matched to the first class whose host glob covers their IP (or
/// resolved host); the settings below then bound that connection.  Classes
/// are read-only once loaded and re-resolved per user on rehash.
#[derive(Clone, Debug)]
pub struct ConnectClass {
    pub name: String,
    /// Glob matched against the client's host and IP.
    pub host: String,
    /// Seconds between PING rounds.
    pub ping_interval: u64,
    /// Seconds allowed to complete registration.
    pub reg_timeout: u64,
    /// Flood penalty points forgiven per second.
    pub command_rate: u32,
    /// Flood penalty points at which processing stops; exceeding it quits
    /// the user.
    pub penalty_cap: u32,
    pub sendq_max: usize,
    pub recvq_max: usize,
    /// Local connections allowed per client address.
    pub max_local: u32,
    /// Network-wide connections allowed per client address.
    pub max_global: u32,
    /// Quit reasons are truncated to this length.
    pub max_quit: usize,
}

impl Default for ConnectClass {
    fn default() -> Self {
        Self {
            name: "default".to_owned(),
            host: "*".to_owned(),
            ping_interval: 120,
            reg_timeout: 90,
            command_rate: 4,
            penalty_cap: 20,
            sendq_max: 262_144,
            recvq_max: 8192,
            max_local: 3,
            max_global: 3,
            max_quit: 255,
        }
    }
}

/// The whole configuration.
pub struct Config {
    pub server_name: String,
    pub bindings: Vec<SocketAddr>,
    pub casemapping: Mapping,

    pub motd_file: Option<String>,
    pub password: Option<String>,
    pub opers: Vec<(String, String)>,
    pub classes: Vec<Rc<ConnectClass>>,

    /// Maximum simultaneous local connections before new ones are refused.
    pub soft_limit: usize,
    /// Maximum comma-separated targets of one PRIVMSG/NOTICE.
    pub max_targets: usize,
    pub default_chan_mode: String,
    /// Channels joined automatically when registration completes.
    pub autojoin: Vec<String>,
    /// Notice shown to users quit by an X-line.
    pub xline_message: String,

    // Sent as a reply to the ADMIN command.
    pub org_name: String,
    pub org_location: String,
    pub org_mail: String,
}

impl Config {
    pub fn sample() -> Self {
        Self {
            server_name: "selkie.localdomain".to_owned(),
            bindings: vec![SocketAddr::from(([127, 0, 0, 1], 6667))],
            casemapping: Mapping::Rfc1459,
            motd_file: None,
            password: None,
            opers: vec![],
            classes: vec![Rc::new(ConnectClass::default())],
            soft_limit: 1024,
            max_targets: 4,
            default_chan_mode: "+nt".to_owned(),
            autojoin: vec![],
            xline_message: "You are banned from this server".to_owned(),
            org_name: "Unconfigured server".to_owned(),
            org_location: "Somewhere on Earth".to_owned(),
            org_mail: "postmaster@localdomain".to_owned(),
        }
    }

    /// Reads the configuration file at the given path.
    pub fn from_file<P>(path: P) -> Result<Self>
    where
        P: AsRef<path::Path>,
    {
        let mut res = Self::sample();
        res.bindings.clear();
        res.classes.clear();

        let mut default_chan_mode = ModeString(res.default_chan_mode.clone());
        let mut opers = Vec::new();
        let mut classes: Vec<ConnectClass> = Vec::new();
        let parser = Parser::read(path)?;

        let parser = parser
            .setting("bind_to", |values| res.bindings = values)?
            .setting("oper", |values| opers = values)?
            .setting("class", |values| classes = values)?
            .setting("autojoin", |values| res.autojoin = values)?
            .unique_setting("server_name", true, |value| res.server_name = value)?
            .unique_setting("casemapping", false, |value| res.casemapping = value)?
            .unique_setting("motd_file", false, |value| res.motd_file = Some(value))?
            .unique_setting("password", false, |value| res.password = Some(value))?
            .unique_setting("softlimit", false, |value| res.soft_limit = value)?
            .unique_setting("maxtargets", false, |value| res.max_targets = value)?
            .unique_setting("default_chan_mode", false, |value| default_chan_mode = value)?
            .unique_setting("xline_message", false, |value| res.xline_message = value)?
            .unique_setting("org_name", false, |value| res.org_name = value)?
            .unique_setting("org_location", false, |value| res.org_location = value)?
            .unique_setting("org_mail", false, |value| res.org_mail = value)?;

        parser.check_unknown_settings()?;

        res.default_chan_mode = default_chan_mode.0;
        for Oper(name, pass) in opers {
            res.opers.push((name, pass));
        }
        res.classes = classes.into_iter().map(Rc::new).collect();

        res.validate();
        Ok(res)
    }

    fn validate(&mut self) {
        if self.bindings.is_empty() {
            self.bindings.push(SocketAddr::from(([127, 0, 0, 1], 6667)));
        }
        if self.soft_limit == 0 {
            self.soft_limit = Self::sample().soft_limit;
        }
        if self.max_targets == 0 {
            self.max_targets = Self::sample().max_targets;
        }
        // Keep a catch-all class at the end so every connection resolves.
        let has_catch_all = self.classes.iter().any(|c| c.host == "*");
        if !has_catch_all {
            self.classes.push(Rc::new(ConnectClass::default()));
        }
    }

    /// The first class whose host glob matches the client.
    pub fn class_for(&self, host: &str, ip: &str) -> Rc<ConnectClass> {
        self.classes
            .iter()
            .find(|c| crate::util::match_glob(&c.host, host) || crate::util::match_glob(&c.host, ip))
            .cloned()
            // validate() guarantees a catch-all class.
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct TempConfig(path::PathBuf);

    impl TempConfig {
        fn path(&self) -> &path::Path {
            &self.0
        }
    }

    impl Drop for TempConfig {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.0);
        }
    }

    fn write_config(content: &str) -> TempConfig {
        static SEQ: AtomicU32 = AtomicU32::new(0);
        let path = std::env::temp_dir().join(format!(
            "selkie-config-test-{}-{}",
            std::process::id(),
            SEQ.fetch_add(1, Ordering::Relaxed)
        ));
        std::fs::write(&path, content).unwrap();
        TempConfig(path)
    }

    #[test]
    fn test_minimal_config() {
        let file = write_config("server_name irc.example.org\n");
        let cfg = Config::from_file(file.path()).unwrap();
        assert_eq!(cfg.server_name, "irc.example.org");
        assert_eq!(cfg.casemapping, Mapping::Rfc1459);
        assert_eq!(cfg.bindings.len(), 1);
        assert_eq!(cfg.classes.len(), 1);
    }

    #[test]
    fn test_full_config() {
        let file = write_config(
            "# a comment\n\
             server_name irc.example.org\n\
             bind_to 127.0.0.1:6667\n\
             bind_to 127.0.0.1:6668\n\
             casemapping ascii\n\
             softlimit 64\n\
             oper root hunter2\n\
             class throttled host=10.* ping=60 rate=2 cap=10 maxquit=100\n",
        );
        let cfg = Config::from_file(file.path()).unwrap();
        assert_eq!(cfg.bindings.len(), 2);
        assert_eq!(cfg.casemapping, Mapping::Ascii);
        assert_eq!(cfg.soft_limit, 64);
        assert_eq!(cfg.opers, vec![("root".to_owned(), "hunter2".to_owned())]);

        // The explicit class plus the appended catch-all.
        assert_eq!(cfg.classes.len(), 2);
        let class = cfg.class_for("10.0.0.1", "10.0.0.1");
        assert_eq!(class.name, "throttled");
        assert_eq!(class.ping_interval, 60);
        assert_eq!(class.max_quit, 100);
        let class = cfg.class_for("192.0.2.1", "192.0.2.1");
        assert_eq!(class.name, "default");
    }

    #[test]
    fn test_rejects_unknown_and_duplicate() {
        let file = write_config("server_name x\nno_such_setting 1\n");
        assert!(Config::from_file(file.path()).is_err());

        let file = write_config("server_name x\nserver_name y\n");
        assert!(Config::from_file(file.path()).is_err());

        let file = write_config("bind_to 127.0.0.1:6667\n");
        // server_name is required.
        assert!(Config::from_file(file.path()).is_err());
    }
}

use super::{ConnectClass, Error, Oper, Result};
use selkie_unicase::Mapping;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::ops::Range;
use std::{fs, path, str};

fn rangestr(inner: &str, outer: &str) -> Range<usize> {
    let ilen = inner.len();
    let inner = inner.as_ptr() as usize;
    let outer = outer.as_ptr() as usize;
    let offset = inner - outer;
    offset..offset + ilen
}

/// A validated channel mode string, for `default_chan_mode`.
pub struct ModeString(pub String);

/// Implementors can describe the values they parse from, for error messages.
pub trait TypeName {
    fn type_name() -> String;
}

impl TypeName for u32 {
    fn type_name() -> String {
        "a positive integer".to_owned()
    }
}

impl TypeName for u64 {
    fn type_name() -> String {
        "a positive integer".to_owned()
    }
}

impl TypeName for usize {
    fn type_name() -> String {
        "a positive integer".to_owned()
    }
}

impl TypeName for String {
    fn type_name() -> String {
        "a string".to_owned()
    }
}

impl TypeName for SocketAddr {
    fn type_name() -> String {
        "a socket address, like \"127.0.0.1:6667\"".to_owned()
    }
}

impl TypeName for Mapping {
    fn type_name() -> String {
        "\"rfc1459\", \"ascii\" or \"identity\"".to_owned()
    }
}

impl TypeName for ModeString {
    fn type_name() -> String {
        "a valid channel mode string".to_owned()
    }
}

impl TypeName for Oper {
    fn type_name() -> String {
        "following the format \"oper <name> <password>\"".to_owned()
    }
}

impl TypeName for ConnectClass {
    fn type_name() -> String {
        "following the format \"class <name> [host=<glob>] [ping=<secs>] \
         [regtimeout=<secs>] [rate=<n>] [cap=<n>] [sendq=<bytes>] [recvq=<bytes>] \
         [maxlocal=<n>] [maxglobal=<n>] [maxquit=<len>]"
            .to_owned()
    }
}

impl str::FromStr for ModeString {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        if selkie_tokens::mode::is_channel_mode_string(s) {
            Ok(ModeString(s.to_owned()))
        } else {
            Err(())
        }
    }
}

impl str::FromStr for Oper {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        let mut words = s.split_whitespace();
        let name = words.next().ok_or(())?;
        let pass = words.next().ok_or(())?;
        Ok(Oper(name.to_owned(), pass.to_owned()))
    }
}

impl str::FromStr for ConnectClass {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, ()> {
        let mut words = s.split_whitespace();
        let mut class = ConnectClass {
            name: words.next().ok_or(())?.to_owned(),
            ..ConnectClass::default()
        };
        for word in words {
            let mut kv = word.splitn(2, '=');
            let key = kv.next().ok_or(())?;
            let value = kv.next().ok_or(())?;
            match key {
                "host" => class.host = value.to_owned(),
                "ping" => class.ping_interval = value.parse().map_err(|_| ())?,
                "regtimeout" => class.reg_timeout = value.parse().map_err(|_| ())?,
                "rate" => class.command_rate = value.parse().map_err(|_| ())?,
                "cap" => class.penalty_cap = value.parse().map_err(|_| ())?,
                "sendq" => class.sendq_max = value.parse().map_err(|_| ())?,
                "recvq" => class.recvq_max = value.parse().map_err(|_| ())?,
                "maxlocal" => class.max_local = value.parse().map_err(|_| ())?,
                "maxglobal" => class.max_global = value.parse().map_err(|_| ())?,
                "maxquit" => class.max_quit = value.parse().map_err(|_| ())?,
                _ => return Err(()),
            }
        }
        Ok(class)
    }
}

/// A parsed configuration file: its lines, plus the location of every
/// `key value` setting in them.
#[derive(Default, Debug)]
pub struct Parser {
    lines: Vec<String>,
    settings: BTreeMap<usize, Setting>,
    occurrences: HashMap<String, Vec<usize>>,
}

#[derive(Debug, Clone)]
pub struct Setting {
    pub lineno: usize,
    pub krange: Range<usize>,
    pub vrange: Range<usize>,
}

impl Parser {
    pub fn read<P>(path: P) -> Result<Self>
    where
        P: AsRef<path::Path>,
    {
        let lines = fs::read_to_string(path)?
            .lines()
            .map(str::to_owned)
            .collect();
        let mut res = Self {
            lines,
            ..Self::default()
        };

        for (lineno, line) in res.lines.iter().enumerate() {
            let mut split = line.splitn(2, ' ').map(str::trim).filter(|s| !s.is_empty());

            let key = match split.next() {
                Some(key) => key,
                None => continue,
            };
            if key.starts_with('#') {
                continue;
            }
            let krange = rangestr(key, line);

            let value = match split.next() {
                Some(value) => value,
                None => return Err(res.error(lineno, krange, "this setting has no value")),
            };
            let vrange = rangestr(value, line);

            res.settings.insert(lineno, Setting { lineno, krange, vrange });
            res.occurrences.entry(key.to_owned()).or_default().push(lineno);
        }

        Ok(res)
    }

    /// Consumes a setting that must appear at most once.
    pub fn unique_setting<S, F>(mut self, key: &str, required: bool, and_then: F) -> Result<Self>
    where
        S: str::FromStr + TypeName,
        F: FnOnce(S),
    {
        if let Some(occ) = self.occurrences.get(key) {
            if occ.len() > 1 {
                let last = *occ.last().unwrap();
                let setting = &self.settings[&last];
                let krange = setting.krange.clone();
                let msg = format!(
                    "{:?} must not appear more than once. Specified at lines {:?}",
                    key, occ
                );
                return Err(self.error(last, krange, msg));
            }
            let lineno = occ[0];
            let setting = &self.settings[&lineno];
            let value = match self.lines[lineno][setting.vrange.clone()].parse() {
                Ok(value) => value,
                Err(_) => {
                    let msg = format!("this setting must be {}", S::type_name());
                    let vrange = setting.vrange.clone();
                    return Err(self.error(lineno, vrange, msg));
                }
            };
            and_then(value);
        } else if required {
            return Err(Error::Format(self, None, 0..0, format!("missing setting {:?}", key)));
        }
        self.occurrences.remove(key);
        Ok(self)
    }

    /// Consumes a repeatable setting.
    pub fn setting<S, F>(mut self, key: &str, and_then: F) -> Result<Self>
    where
        S: str::FromStr + TypeName,
        F: FnOnce(Vec<S>),
    {
        if let Some(occ) = self.occurrences.get(key) {
            let mut res = Vec::new();
            for setting in occ.iter().map(|lno| self.settings[lno].clone()) {
                let value = match self.lines[setting.lineno][setting.vrange.clone()].parse() {
                    Ok(value) => value,
                    Err(_) => {
                        let msg = format!("this setting must be {}", S::type_name());
                        return Err(self.error(setting.lineno, setting.vrange, msg));
                    }
                };
                res.push(value);
            }
            and_then(res);
        }
        self.occurrences.remove(key);
        Ok(self)
    }

    /// Fails on any setting no `setting`/`unique_setting` call consumed.
    pub fn check_unknown_settings(self) -> Result<()> {
        if let Some((key, occ)) = self.occurrences.iter().next() {
            let lineno = occ[0];
            let setting = &self.settings[&lineno];
            let krange = setting.krange.clone();
            let msg = format!("unknown setting {:?}", key);
            return Err(self.error(lineno, krange, msg));
        }
        Ok(())
    }

    pub fn error<S>(self, lineno: usize, col: Range<usize>, msg: S) -> Error
    where
        S: Into<String>,
    {
        Error::Format(self, Some(lineno), col, msg.into())
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> + '_ {
        self.lines.iter().map(String::as_ref)
    }
}

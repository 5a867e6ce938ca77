//! Server-wide bans (X-lines) and the ban cache.
//!
//! Five line categories exist: G (global user@host ban), K (local user@host
//! kill), Z (IP ban), Q (forbidden nick) and E (exemption).  Matching goes
//! through the active national case map, with `*`/`?` wildcards.
//!
//! The ban cache keeps the verdict of a previous X-line evaluation per IP so
//! the accept path stays O(1); an entry with an empty kind is a negative
//! hit ("known not banned").

use crate::user::User;
use crate::util;
use std::collections::HashMap;
use std::net::IpAddr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum XLineKind {
    G,
    K,
    Z,
    Q,
    E,
}

impl XLineKind {
    pub fn from_char(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'G' => Some(Self::G),
            'K' => Some(Self::K),
            'Z' => Some(Self::Z),
            'Q' => Some(Self::Q),
            'E' => Some(Self::E),
            _ => None,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::G => 'G',
            Self::K => 'K',
            Self::Z => 'Z',
            Self::Q => 'Q',
            Self::E => 'E',
        }
    }
}

/// One ban entry.
#[derive(Clone, Debug)]
pub struct XLine {
    pub kind: XLineKind,
    pub mask: String,
    pub set_by: String,
    pub set_at: u64,
    /// Seconds of lifetime; 0 means permanent.
    pub duration: u64,
    pub reason: String,
}

impl XLine {
    pub fn is_permanent(&self) -> bool {
        self.duration == 0
    }

    pub fn expires_at(&self) -> Option<u64> {
        if self.is_permanent() {
            None
        } else {
            Some(self.set_at + self.duration)
        }
    }

    /// Whether this line applies to the given user.
    pub fn matches(&self, user: &User) -> bool {
        match self.kind {
            XLineKind::Q => util::match_glob(&self.mask, user.nick()),
            XLineKind::Z => util::match_glob(&self.mask, &user.ip().to_string()),
            XLineKind::G | XLineKind::K | XLineKind::E => {
                let display = format!("{}@{}", user.ident(), user.host());
                let real = format!("{}@{}", user.ident(), user.realhost());
                util::match_glob(&self.mask, &display) || util::match_glob(&self.mask, &real)
            }
        }
    }
}

/// The in-memory X-line store.
#[derive(Default)]
pub struct XLineManager {
    lines: Vec<XLine>,
}

impl XLineManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a line.  A duplicate mask of the same kind is rejected.
    pub fn add(&mut self, line: XLine) -> bool {
        let map = selkie_unicase::national_map();
        if self
            .lines
            .iter()
            .any(|l| l.kind == line.kind && map.eq(&l.mask, &line.mask))
        {
            return false;
        }
        log::debug!(
            "xline: added {}-line on {} ({})",
            line.kind.as_char(),
            line.mask,
            line.reason
        );
        self.lines.push(line);
        true
    }

    /// Removes the line of `kind` with the given mask.
    pub fn del(&mut self, kind: XLineKind, mask: &str) -> bool {
        let map = selkie_unicase::national_map();
        let before = self.lines.len();
        self.lines.retain(|l| l.kind != kind || !map.eq(&l.mask, mask));
        before != self.lines.len()
    }

    /// The first live line of `kind` matching `user`, if any.
    pub fn matches(&self, kind: XLineKind, user: &User) -> Option<&XLine> {
        let now = util::time();
        self.lines
            .iter()
            .filter(|l| l.kind == kind)
            .filter(|l| l.expires_at().map_or(true, |at| now < at))
            .find(|l| l.matches(user))
    }

    pub fn of_kind(&self, kind: XLineKind) -> impl Iterator<Item = &XLine> {
        self.lines.iter().filter(move |l| l.kind == kind)
    }

    /// The first live Q-line covering a proposed nickname.
    pub fn matches_nick(&self, nick: &str) -> Option<&XLine> {
        let now = util::time();
        self.lines
            .iter()
            .filter(|l| l.kind == XLineKind::Q)
            .filter(|l| l.expires_at().map_or(true, |at| now < at))
            .find(|l| util::match_glob(&l.mask, nick))
    }

    /// Drops expired lines and returns them for oper notices.
    pub fn expire(&mut self, now: u64) -> Vec<XLine> {
        let mut expired = Vec::new();
        self.lines.retain(|l| match l.expires_at() {
            Some(at) if at <= now => {
                expired.push(l.clone());
                false
            }
            _ => true,
        });
        expired
    }
}

/// A cached verdict for one IP.
#[derive(Clone, Debug)]
pub struct BanCacheHit {
    /// The line category as a string; empty for a negative hit.
    pub kind: String,
    pub reason: String,
    expires: u64,
}

impl BanCacheHit {
    pub fn is_negative(&self) -> bool {
        self.kind.is_empty()
    }
}

/// TTL-bounded cache of per-IP ban verdicts.
#[derive(Default)]
pub struct BanCache {
    hits: HashMap<IpAddr, BanCacheHit>,
}

impl BanCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_hit(&self, ip: &IpAddr) -> Option<&BanCacheHit> {
        self.hits.get(ip).filter(|hit| util::time() < hit.expires)
    }

    pub fn add_hit(&mut self, ip: IpAddr, kind: &str, reason: &str, ttl: u64) {
        self.hits.insert(
            ip,
            BanCacheHit {
                kind: kind.to_owned(),
                reason: reason.to_owned(),
                expires: util::time() + ttl,
            },
        );
    }

    pub fn remove(&mut self, ip: &IpAddr) {
        self.hits.remove(ip);
    }

    /// Drops cached entries whose IP matches the given mask.  Used when a
    /// new line is added, so stale negative verdicts do not shadow it.
    pub fn remove_matching(&mut self, mask: &str) {
        self.hits
            .retain(|ip, _| !util::match_glob(mask, &ip.to_string()));
    }

    /// TTL eviction, run from the timer sweep.
    pub fn sweep(&mut self, now: u64) {
        self.hits.retain(|_, hit| now < hit.expires);
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gline(mask: &str, duration: u64) -> XLine {
        XLine {
            kind: XLineKind::G,
            mask: mask.to_owned(),
            set_by: "oper".to_owned(),
            set_at: util::time(),
            duration,
            reason: "No reason given".to_owned(),
        }
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut xlines = XLineManager::new();
        assert!(xlines.add(gline("*@evil.example", 0)));
        assert!(!xlines.add(gline("*@EVIL.example", 60)));
        assert!(xlines.del(XLineKind::G, "*@evil.example"));
        assert!(!xlines.del(XLineKind::G, "*@evil.example"));
    }

    #[test]
    fn test_matches_user() {
        let mut xlines = XLineManager::new();
        xlines.add(gline("*@*.bad.example", 0));

        let mut user = User::test_dummy();
        user.set_ident("eve");
        user.set_host("client.bad.example");
        assert!(xlines.matches(XLineKind::G, &user).is_some());
        assert!(xlines.matches(XLineKind::K, &user).is_none());

        user.set_host("good.example");
        assert!(xlines.matches(XLineKind::G, &user).is_none());
    }

    #[test]
    fn test_expiry() {
        let mut xlines = XLineManager::new();
        let mut line = gline("*@a.example", 10);
        line.set_at = 1000;
        xlines.add(line);
        xlines.add(gline("*@b.example", 0));

        let expired = xlines.expire(2000);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].mask, "*@a.example");
        assert_eq!(xlines.of_kind(XLineKind::G).count(), 1);
    }

    #[test]
    fn test_bancache_negative() {
        let mut cache = BanCache::new();
        let ip: IpAddr = "192.0.2.7".parse().unwrap();
        cache.add_hit(ip, "", "", 60);
        assert!(cache.get_hit(&ip).unwrap().is_negative());

        cache.remove_matching("192.0.2.*");
        assert!(cache.get_hit(&ip).is_none());
    }
}

//! Case-mapping tables for IRC strings.
//!
//! Nicknames and channel names compare case-insensitively, and RFC 1459
//! additionally equates `{|}~` with `[\]^` (a leftover from the Scandinavian
//! origins of the protocol).  This crate provides the three classic mapping
//! tables, a process-wide selection of the active one, and [`UniCase`], a
//! wrapper that makes `&str`/`String` usable as case-insensitive `HashMap`
//! keys.
//!
//! The RFC table stays reachable through [`RFC1459`] no matter which map is
//! active, for code paths that must remain RFC-exact.

#![warn(clippy::all, rust_2018_idioms)]

use std::borrow::Borrow;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

/// A 256-entry byte-to-byte folding table.
///
/// Folding is idempotent: `fold_byte(fold_byte(b)) == fold_byte(b)` for every
/// byte and every built-in table.
pub struct CaseMap {
    table: [u8; 256],
}

const fn identity_table() -> [u8; 256] {
    let mut t = [0; 256];
    let mut i = 0;
    while i < 256 {
        t[i] = i as u8;
        i += 1;
    }
    t
}

const fn ascii_table() -> [u8; 256] {
    let mut t = identity_table();
    let mut c = b'A';
    while c <= b'Z' {
        t[c as usize] = c + 32;
        c += 1;
    }
    t
}

const fn rfc1459_table() -> [u8; 256] {
    let mut t = ascii_table();
    t[b'[' as usize] = b'{';
    t[b'\\' as usize] = b'|';
    t[b']' as usize] = b'}';
    t[b'~' as usize] = b'^';
    t
}

/// The RFC 1459 map: ASCII lowercasing plus `[\]~` folded to `{|}^`.
pub static RFC1459: CaseMap = CaseMap { table: rfc1459_table() };

/// Plain ASCII lowercasing.  `[` and `{` are distinct under this map.
pub static ASCII: CaseMap = CaseMap { table: ascii_table() };

/// The identity map.  Every byte folds to itself.
pub static IDENTITY: CaseMap = CaseMap { table: identity_table() };

impl CaseMap {
    /// Folds a single byte through the table.
    #[inline]
    pub fn fold_byte(&self, b: u8) -> u8 {
        self.table[b as usize]
    }

    /// Returns the folded copy of `s`.
    ///
    /// All bytes above 0x7f fold to themselves in every built-in table, so
    /// folding preserves the UTF-8 invariant.
    pub fn fold(&self, s: &str) -> String {
        let bytes = s.bytes().map(|b| self.fold_byte(b)).collect();
        unsafe { String::from_utf8_unchecked(bytes) }
    }

    /// Whether `a` and `b` are equal once folded.
    pub fn eq(&self, a: &str, b: &str) -> bool {
        a.len() == b.len()
            && a.bytes()
                .zip(b.bytes())
                .all(|(x, y)| self.fold_byte(x) == self.fold_byte(y))
    }

    /// FNV-1a over the folded bytes of `s`.
    ///
    /// Strings that are equal under [`CaseMap::eq`] hash identically.
    pub fn hash(&self, s: &str) -> u64 {
        let mut h = 0xcbf2_9ce4_8422_2325_u64;
        for b in s.bytes() {
            h ^= u64::from(self.fold_byte(b));
            h = h.wrapping_mul(0x0000_0100_0000_01b3);
        }
        h
    }
}

/// The built-in mappings, by their CASEMAPPING token name.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mapping {
    Rfc1459,
    Ascii,
    Identity,
}

impl Mapping {
    pub fn table(self) -> &'static CaseMap {
        match self {
            Self::Rfc1459 => &RFC1459,
            Self::Ascii => &ASCII,
            Self::Identity => &IDENTITY,
        }
    }

    /// The token advertised in RPL_ISUPPORT.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rfc1459 => "rfc1459",
            Self::Ascii => "ascii",
            Self::Identity => "identity",
        }
    }
}

impl FromStr for Mapping {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "rfc1459" => Ok(Self::Rfc1459),
            "ascii" => Ok(Self::Ascii),
            "identity" => Ok(Self::Identity),
            _ => Err(()),
        }
    }
}

// The active national map.  Written once at startup (and on rehash), read
// everywhere, so a relaxed atomic index into the three statics is enough.
static NATIONAL: AtomicU8 = AtomicU8::new(0);

/// Selects the process-wide national map used by [`national_map`] and
/// [`UniCase`].
pub fn set_national_map(mapping: Mapping) {
    let idx = match mapping {
        Mapping::Rfc1459 => 0,
        Mapping::Ascii => 1,
        Mapping::Identity => 2,
    };
    NATIONAL.store(idx, Ordering::Relaxed);
}

/// The currently selected national map.  Defaults to RFC 1459.
pub fn national_map() -> &'static CaseMap {
    match NATIONAL.load(Ordering::Relaxed) {
        1 => &ASCII,
        2 => &IDENTITY,
        _ => &RFC1459,
    }
}

/// Case-insensitive wrapper for use as a `HashMap` key.
///
/// Comparison and hashing go through the national map, so two keys that
/// differ only by case (or by `[` vs `{` under RFC 1459) collide.
#[repr(transparent)]
pub struct UniCase<S: ?Sized>(pub S);

impl<'a> From<&'a str> for &'a UniCase<str> {
    fn from(s: &'a str) -> &'a UniCase<str> {
        // UniCase<str> is #[repr(transparent)] over str, so the
        // representation of the two references is identical.
        unsafe { &*(s as *const str as *const UniCase<str>) }
    }
}

/// Converts a `&str` into a `&UniCase<str>`.
///
/// Shorthand for `<&UniCase<str>>::from`.
pub fn u(s: &str) -> &UniCase<str> {
    s.into()
}

impl<S> AsRef<str> for UniCase<S>
where
    S: AsRef<str> + ?Sized,
{
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

impl<S> Hash for UniCase<S>
where
    S: AsRef<str> + ?Sized,
{
    fn hash<H: Hasher>(&self, hasher: &mut H) {
        let map = national_map();
        for byte in self.0.as_ref().bytes() {
            hasher.write_u8(map.fold_byte(byte));
        }
    }
}

impl<S1, S2> PartialEq<UniCase<S2>> for UniCase<S1>
where
    S1: AsRef<str> + ?Sized,
    S2: AsRef<str> + ?Sized,
{
    fn eq(&self, other: &UniCase<S2>) -> bool {
        national_map().eq(self.0.as_ref(), other.0.as_ref())
    }
}

impl<S> Eq for UniCase<S> where S: AsRef<str> + ?Sized {}

impl Borrow<UniCase<str>> for UniCase<String> {
    fn borrow(&self) -> &UniCase<str> {
        self.0.as_str().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_fold_idempotent() {
        for map in &[&RFC1459, &ASCII, &IDENTITY] {
            for b in 0..=255_u8 {
                let once = map.fold_byte(b);
                assert_eq!(map.fold_byte(once), once, "byte {:#04x}", b);
            }
        }
    }

    #[test]
    fn test_scandinavian_equivalence() {
        assert!(RFC1459.eq("[", "{"));
        assert!(RFC1459.eq("]", "}"));
        assert!(RFC1459.eq("\\", "|"));
        assert!(RFC1459.eq("~", "^"));
        assert!(RFC1459.eq("foo[bar", "FOO{BAR"));

        assert!(!ASCII.eq("[", "{"));
        assert!(ASCII.eq("Nick", "nick"));

        assert!(!IDENTITY.eq("Nick", "nick"));
        assert!(IDENTITY.eq("nick", "nick"));
    }

    #[test]
    fn test_eq_implies_hash_eq() {
        let pairs = &[
            ("alice", "ALICE"),
            ("foo[bar", "foo{bar"),
            ("x|y~z", "x\\y^z"),
            ("", ""),
        ];
        for (a, b) in pairs {
            assert!(RFC1459.eq(a, b));
            assert_eq!(RFC1459.hash(a), RFC1459.hash(b));
        }
        assert_ne!(RFC1459.hash("alice"), RFC1459.hash("bob"));
    }

    #[test]
    fn test_unicase_map_key() {
        let mut map = HashMap::new();
        map.insert(UniCase(String::from("#Test")), 1);
        assert_eq!(map.get(u("#test")), Some(&1));
        assert_eq!(map.get(u("#TEST")), Some(&1));
        assert_eq!(map.get(u("#other")), None);
    }
}

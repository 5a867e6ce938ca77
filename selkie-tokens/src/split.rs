//! Separator-based token streams and the port-range parser.
//!
//! These parsers never fail: malformed input yields empty or best-effort
//! tokens.

use std::collections::HashSet;
use std::ops::RangeInclusive;

/// An iterator over the `sep`-separated tokens of `s`.
///
/// With `allow_empty = false`, consecutive separators collapse and leading or
/// trailing separators yield nothing.
///
/// # Example
///
/// ```rust
/// # use selkie_tokens::split;
/// let mut tokens = split::tokens("a,,b,", ',', false);
/// assert_eq!(tokens.next(), Some("a"));
/// assert_eq!(tokens.next(), Some("b"));
/// assert_eq!(tokens.next(), None);
///
/// let mut tokens = split::tokens("a,,b,", ',', true);
/// assert_eq!(tokens.collect::<Vec<_>>(), ["a", "", "b", ""]);
/// ```
pub fn tokens(s: &str, sep: char, allow_empty: bool) -> impl Iterator<Item = &str> {
    s.split(sep).filter(move |tok| allow_empty || !tok.is_empty())
}

/// An iterator over the ports of a listener specification.
///
/// A port range is specified as comma-separated entries of the form `n` or
/// `a-b`.  An entry whose end is missing, unparsable or not greater than its
/// start yields only the start.  With `allow_overlap = false`, ports that
/// were already emitted are skipped.
///
/// # Example
///
/// ```rust
/// # use selkie_tokens::split;
/// let ports: Vec<u16> = split::ports("6660,6661,6662-6664", true).collect();
/// assert_eq!(ports, [6660, 6661, 6662, 6663, 6664]);
///
/// // 7000-6999 is an illegal range: only its first bound is yielded.
/// let ports: Vec<u16> = split::ports("7000-6999", true).collect();
/// assert_eq!(ports, [7000]);
/// ```
pub fn ports(spec: &str, allow_overlap: bool) -> Ports<'_> {
    Ports {
        entries: spec.split(','),
        current: None,
        seen: if allow_overlap { None } else { Some(HashSet::new()) },
    }
}

pub struct Ports<'a> {
    entries: std::str::Split<'a, char>,
    current: Option<RangeInclusive<u16>>,
    seen: Option<HashSet<u16>>,
}

impl Ports<'_> {
    fn next_entry(&mut self) -> Option<RangeInclusive<u16>> {
        loop {
            let entry = self.entries.next()?.trim();
            let mut bounds = entry.splitn(2, '-').map(str::trim);
            let begin = match bounds.next().unwrap_or("").parse::<u16>() {
                Ok(begin) => begin,
                Err(_) => continue,
            };
            let end = bounds.next().and_then(|e| e.parse::<u16>().ok());
            return Some(match end {
                Some(end) if begin < end => begin..=end,
                // Illegal range: yield only the first bound.
                _ => begin..=begin,
            });
        }
    }
}

impl Iterator for Ports<'_> {
    type Item = u16;

    fn next(&mut self) -> Option<u16> {
        loop {
            if self.current.is_none() {
                self.current = Some(self.next_entry()?);
            }
            if let Some(port) = self.current.as_mut().unwrap().next() {
                match self.seen.as_mut() {
                    Some(seen) => {
                        if !seen.insert(port) {
                            continue;
                        }
                        return Some(port);
                    }
                    None => return Some(port),
                }
            } else {
                self.current = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_collapse() {
        let collected: Vec<_> = tokens(",,a,b,,c,", ',', false).collect();
        assert_eq!(collected, ["a", "b", "c"]);

        assert_eq!(tokens("", ',', false).count(), 0);
        assert_eq!(tokens(",,,", ',', false).count(), 0);
    }

    #[test]
    fn test_ports_malformed() {
        assert_eq!(ports("", true).count(), 0);
        assert_eq!(ports("x,y", true).count(), 0);
        let collected: Vec<_> = ports("abc,6667,-,8000-", true).collect();
        assert_eq!(collected, [6667, 8000]);
    }

    #[test]
    fn test_ports_no_overlap() {
        let collected: Vec<_> = ports("6660-6663,6662-6665,6660", false).collect();
        assert_eq!(collected, [6660, 6661, 6662, 6663, 6664, 6665]);
    }

    // A port is never yielded twice with allow_overlap = false.
    #[test]
    fn test_ports_unique() {
        let mut seen = HashSet::new();
        for port in ports("1-100,50-150,1,2,3,99-101", false) {
            assert!(seen.insert(port), "port {} yielded twice", port);
        }
    }
}

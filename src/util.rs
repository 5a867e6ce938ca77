use std::time;

/// The current unix time, in seconds.
pub fn time() -> u64 {
    match time::SystemTime::now().duration_since(time::UNIX_EPOCH) {
        Ok(unix_time) => unix_time.as_secs(),
        Err(_) => {
            log::error!("Computer clock set before 01/01/1970?");
            0
        }
    }
}

/// The current local time, formatted for humans (RPL_CREATED, RPL_TIME).
pub fn time_str() -> String {
    chrono::Local::now().to_rfc2822()
}

/// Whether `text` matches the wildcard `pattern`, where `*` matches any run
/// of characters and `?` matches exactly one.
///
/// Bytes are compared through the active national case map, so `A` matches
/// `a` and, under RFC 1459, `[` matches `{`.
pub fn match_glob(pattern: &str, text: &str) -> bool {
    let map = selkie_unicase::national_map();
    let p = pattern.as_bytes();
    let t = text.as_bytes();

    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == b'?' || map.fold_byte(p[pi]) == map.fold_byte(t[ti])) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == b'*' {
            star = Some((pi, ti));
            pi += 1;
        } else if let Some((sp, st)) = star {
            // Backtrack: let the last star swallow one more byte.
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == b'*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_glob() {
        assert!(match_glob("*", ""));
        assert!(match_glob("*", "anything"));
        assert!(match_glob("*!*@*.example.org", "nick!user@host.example.org"));
        assert!(!match_glob("*!*@*.example.org", "nick!user@example.com"));
        assert!(match_glob("a?c", "abc"));
        assert!(!match_glob("a?c", "ac"));
        assert!(match_glob("ALICE", "alice"));
        assert!(match_glob("foo[bar", "foo{bar"));
        assert!(!match_glob("", "x"));
        assert!(match_glob("", ""));
    }
}

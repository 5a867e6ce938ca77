//! Handlers for operator commands: KILL, the X-line family, REHASH and
//! STATS.

use super::{find_nick, CommandContext, HandlerResult as Result, BANCACHE_POSITIVE_TTL};
use crate::config::Config;
use crate::hooks::Hook;
use crate::lines;
use crate::user::Uid;
use crate::util;
use crate::xline::{XLine, XLineKind};
use selkie_tokens::rpl;

/// Parses a ban duration: plain seconds, or `1w2d3h4m5s` components.
/// Returns 0 (permanent) for an empty string.
pub(crate) fn parse_duration(s: &str) -> Option<u64> {
    if s.is_empty() {
        return Some(0);
    }
    if let Ok(secs) = s.parse() {
        return Some(secs);
    }
    let mut total = 0_u64;
    let mut acc = 0_u64;
    let mut has_digit = false;
    for c in s.chars() {
        if let Some(d) = c.to_digit(10) {
            acc = acc.checked_mul(10)?.checked_add(u64::from(d))?;
            has_digit = true;
            continue;
        }
        if !has_digit {
            return None;
        }
        let unit = match c.to_ascii_lowercase() {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86_400,
            'w' => 604_800,
            'y' => 31_536_000,
            _ => return None,
        };
        total = total.checked_add(acc.checked_mul(unit)?)?;
        acc = 0;
        has_digit = false;
    }
    // A trailing number without a unit counts as seconds.
    Some(total + acc)
}

impl super::State {
    // KILL

    pub fn cmd_kill(&mut self, ctx: &mut CommandContext, nick: &str, reason: &str) -> Result {
        let target = find_nick(ctx, &self.users, nick)?;

        let killer = self.users.get(ctx.uid).ok_or(())?.nick().to_owned();
        self.snomask_notice('k', &format!("{} issued KILL on {} ({})", killer, nick, reason));
        self.quit_user(target, &format!("Killed ({} ({}))", killer, reason), None);

        Ok(())
    }

    // GLINE / KLINE / ZLINE / QLINE / ELINE
    //
    // With three or more parameters, adds a line: <mask> <duration> :<reason>.
    // With one, removes the line on <mask>.

    pub fn cmd_xline(&mut self, ctx: &mut CommandContext, kind: XLineKind, params: &[&str]) -> Result {
        if params.len() >= 3 {
            self.add_xline(ctx, kind, params[0], params[1], params[2])
        } else {
            self.del_xline(ctx, kind, params[0])
        }
    }

    fn add_xline(
        &mut self,
        ctx: &mut CommandContext,
        kind: XLineKind,
        mask: &str,
        duration: &str,
        reason: &str,
    ) -> Result {
        // A mask that matches everyone is always a typo.
        if matches!(mask, "*" | "*@*" | "*!*@*") {
            self.server_notice(ctx.uid, &format!(
                "*** The mask {} matches everyone on the network, not adding it",
                mask
            ));
            return Err(());
        }

        let duration = match parse_duration(duration) {
            Some(duration) => duration,
            None => {
                self.server_notice(ctx.uid, &format!("*** Invalid duration {:?}", duration));
                return Err(());
            }
        };

        let set_by = self.users.get(ctx.uid).ok_or(())?.nick().to_owned();
        let line = XLine {
            kind,
            mask: mask.to_owned(),
            set_by: set_by.clone(),
            set_at: util::time(),
            duration,
            reason: reason.to_owned(),
        };

        if !self.xlines.add(line.clone()) {
            self.server_notice(ctx.uid, &format!(
                "*** {}-line for {} already exists",
                kind.as_char(),
                mask
            ));
            return Err(());
        }

        self.bus.broadcast(Hook::OnAddLine, |m| m.on_add_line(&set_by, &line));

        if duration == 0 {
            self.snomask_notice('x', &format!(
                "{} added permanent {}-line for {}: {}",
                set_by,
                kind.as_char(),
                mask,
                reason
            ));
        } else {
            self.snomask_notice('x', &format!(
                "{} added timed {}-line for {}, expires in {} seconds: {}",
                set_by,
                kind.as_char(),
                mask,
                duration,
                reason
            ));
        }

        // Stale cached verdicts must not shadow the new line.
        if kind == XLineKind::Z {
            self.bancache.remove_matching(mask);
        }

        self.apply_lines(kind);
        Ok(())
    }

    fn del_xline(&mut self, ctx: &mut CommandContext, kind: XLineKind, mask: &str) -> Result {
        if self.xlines.del(kind, mask) {
            let set_by = self.users.get(ctx.uid).ok_or(())?.nick().to_owned();
            self.bus
                .broadcast(Hook::OnDelLine, |m| m.on_del_line(&set_by, kind, mask));
            self.snomask_notice('x', &format!(
                "{} removed {}-line on {}",
                set_by,
                kind.as_char(),
                mask
            ));
            Ok(())
        } else {
            let message = format!(
                "*** {}-line {} not found in list, try /stats {}",
                kind.as_char(),
                mask,
                kind.as_char().to_ascii_lowercase()
            );
            self.server_notice(ctx.uid, &message);
            Err(())
        }
    }

    /// Sweeps all local users against the live lines of `kind`, quitting
    /// every match.  E and Q lines have no sweep side effect.
    pub(crate) fn apply_lines(&mut self, kind: XLineKind) {
        if matches!(kind, XLineKind::E | XLineKind::Q) {
            return;
        }
        for uid in self.users.local_uids() {
            let matched = {
                let user = match self.users.get(uid) {
                    Some(user) if !user.quitting && !user.exempt => user,
                    _ => continue,
                };
                self.xlines.matches(kind, user).cloned()
            };
            if let Some(line) = matched {
                self.apply_line(&line, uid);
            }
        }
    }

    /// The user-visible side effect of one matched line: cache the verdict
    /// and quit the user with the configured ban message.
    pub(crate) fn apply_line(&mut self, line: &XLine, uid: Uid) {
        let ip = match self.users.get(uid) {
            Some(user) => user.ip(),
            None => return,
        };
        let reason = format!("{}-Lined: {}", line.kind.as_char(), line.reason);

        // Z and G lines key off the address, so future connections from it
        // are refused straight from the cache.
        if matches!(line.kind, XLineKind::Z | XLineKind::G) {
            self.bancache.remove(&ip);
            self.bancache.add_hit(
                ip,
                &line.kind.as_char().to_string(),
                &reason,
                BANCACHE_POSITIVE_TTL,
            );
        }

        if let Some(nick) = self.users.get(uid).map(|user| user.nick().to_owned()) {
            let mut buf = selkie_tokens::Buffer::new();
            buf.message(&self.domain, rpl::ERR_YOUREBANNEDCREEP)
                .param(&nick)
                .trailing_param(lines::YOURE_BANNED);
            self.send(uid, crate::conn::MessageQueueItem::from(buf));
        }
        if !self.config.xline_message.is_empty() {
            let message = format!("*** {}", self.config.xline_message);
            self.server_notice(uid, &message);
        }
        self.quit_user(uid, &reason, None);
    }

    // REHASH

    pub fn cmd_rehash(&mut self, ctx: &mut CommandContext) -> Result {
        let path = match self.config_path.clone() {
            Some(path) => path,
            None => {
                self.server_notice(ctx.uid, "*** No configuration file to rehash from");
                return Err(());
            }
        };
        ctx.reply(rpl::REHASHING).param(&path).trailing_param("Rehashing");

        match Config::from_file(&path) {
            Ok(config) => {
                self.apply_rehash(config);
                let nick = self.users.get(ctx.uid).ok_or(())?.nick().to_owned();
                self.snomask_notice('a', &format!("{} is rehashing the server", nick));
                self.bus.broadcast(Hook::OnRehash, |m| m.on_rehash());
                Ok(())
            }
            Err(err) => {
                // The running configuration stays untouched.
                log::error!("Rehash failed: {}", err);
                self.server_notice(ctx.uid, "*** Rehash failed, running configuration unchanged");
                Err(())
            }
        }
    }

    /// Swaps in a freshly parsed configuration and re-resolves every local
    /// user's connect class.
    fn apply_rehash(&mut self, config: Config) {
        selkie_unicase::set_national_map(config.casemapping);
        self.motd = config.motd_file.as_ref().and_then(|file| {
            match std::fs::read_to_string(file) {
                Ok(motd) => Some(motd),
                Err(err) => {
                    log::warn!("Failed to read {:?}: {}", file, err);
                    None
                }
            }
        });
        self.config = config;

        for uid in self.users.local_uids() {
            let class = {
                let user = match self.users.get(uid) {
                    Some(user) => user,
                    None => continue,
                };
                self.config
                    .class_for(user.host(), &user.ip().to_string())
            };
            if let Some(user) = self.users.get_mut(uid) {
                user.class = class;
            }
        }
    }

    // STATS

    pub fn cmd_stats(&mut self, ctx: &mut CommandContext, query: &str) -> Result {
        let letter = query.chars().next().unwrap_or('*');

        if let Some(kind) = XLineKind::from_char(letter) {
            let oper = self.users.get(ctx.uid).ok_or(())?.oper;
            if !oper {
                ctx.reply(rpl::ERR_NOPRIVILEGES).trailing_param(lines::NO_PRIVILEGES);
                return Err(());
            }
            // 216 and 217 are K- and Q-specific; G, Z and E share 223, so
            // every record leads with its kind letter and repeats it in the
            // text to keep the three ban types apart in a dump.
            let numeric = match kind {
                XLineKind::K => rpl::STATSKLINE,
                XLineKind::Q => rpl::STATSQLINE,
                XLineKind::G | XLineKind::Z | XLineKind::E => rpl::STATSGLINE,
            };
            let kind_char = kind.as_char();
            for line in self.xlines.of_kind(kind) {
                ctx.reply(numeric)
                    .param(&kind_char.to_string())
                    .param(&line.mask)
                    .param(&line.set_by)
                    .param(&line.expires_at().unwrap_or(0).to_string())
                    .trailing_param(&format!("{}-line: {}", kind_char, line.reason));
            }
        }

        let mut end = String::new();
        end.push(letter);
        ctx.reply(rpl::ENDOFSTATS)
            .param(&end)
            .trailing_param(lines::END_OF_STATS);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration(""), Some(0));
        assert_eq!(parse_duration("0"), Some(0));
        assert_eq!(parse_duration("600"), Some(600));
        assert_eq!(parse_duration("10m"), Some(600));
        assert_eq!(parse_duration("1h30m"), Some(5400));
        assert_eq!(parse_duration("1d"), Some(86_400));
        assert_eq!(parse_duration("1w2d"), Some(777_600));
        assert_eq!(parse_duration("5m30"), Some(330));
        assert_eq!(parse_duration("bogus"), None);
        assert_eq!(parse_duration("m5"), None);
    }
}

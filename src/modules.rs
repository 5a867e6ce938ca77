//! Built-in modules.
//!
//! These are ordinary event-bus subscribers compiled into the server; they
//! use the same hook set and extension registry that out-of-tree modules
//! would.

use crate::extension::{ExtensionId, ExtensionRegistry};
use crate::hooks::{Hook, ModResult, Module};
use crate::user::User;
use selkie_tokens::Buffer;

/// Unreal-style user mode `+B`, marking the user as a bot in WHOIS.
pub struct BotMode {
    ext: ExtensionId,
}

impl BotMode {
    pub fn new(registry: &mut ExtensionRegistry) -> Option<Self> {
        let ext = registry.register("bot_mode", |_| {})?;
        Some(Self { ext })
    }

    fn is_bot(&self, user: &User) -> bool {
        user.extensions.get(self.ext).is_some()
    }
}

impl Module for BotMode {
    fn name(&self) -> &'static str {
        "m_botmode"
    }

    fn hooks(&self) -> &'static [Hook] {
        &[Hook::OnExtendedMode, Hook::OnWhois]
    }

    fn on_extended_mode(
        &mut self,
        user: &mut User,
        target: &str,
        letter: char,
        value: bool,
    ) -> ModResult {
        // A user mode only; channel queries fall through to other modules.
        if letter != 'B' || target.starts_with('#') || target.starts_with('&') {
            return ModResult::Passthru;
        }
        if value {
            user.extensions.extend(self.ext, Box::new(()));
        } else {
            drop(user.extensions.take(self.ext));
        }
        ModResult::Allow
    }

    fn on_whois(&mut self, server: &str, asker: &User, target: &User, out: &mut Buffer) {
        if self.is_bot(target) {
            out.message(server, "335")
                .param(asker.nick())
                .param(target.nick())
                .trailing_param("is a bot");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::EventBus;

    #[test]
    fn test_botmode_marks_and_reports() {
        let mut registry = ExtensionRegistry::new();
        let mut bus = EventBus::new();
        bus.register(Box::new(BotMode::new(&mut registry).unwrap()), 0);

        let mut user = User::test_dummy();
        user.set_nick("robot");

        let res = bus.first_result(Hook::OnExtendedMode, |m| {
            m.on_extended_mode(&mut user, "robot", 'B', true)
        });
        assert_eq!(res, ModResult::Allow);

        let asker = User::test_dummy();
        let mut out = Buffer::new();
        bus.broadcast(Hook::OnWhois, |m| {
            m.on_whois("test.server", &asker, &user, &mut out)
        });
        assert!(out.get().contains("335"));
        assert!(out.get().contains("is a bot"));

        // Unsetting removes the mark.
        bus.first_result(Hook::OnExtendedMode, |m| {
            m.on_extended_mode(&mut user, "robot", 'B', false)
        });
        let mut out = Buffer::new();
        bus.broadcast(Hook::OnWhois, |m| {
            m.on_whois("test.server", &asker, &user, &mut out)
        });
        assert!(out.is_empty());

        // Channel-mode queries pass through.
        let res = bus.first_result(Hook::OnExtendedMode, |m| {
            m.on_extended_mode(&mut user, "#chan", 'B', true)
        });
        assert_eq!(res, ModResult::Passthru);
    }
}

//! The event bus between the core and its modules.
//!
//! Hooks form a closed set, known at build time.  Modules implement the
//! [`Module`] trait, declare the hooks they care about, and are called in
//! priority order (ties broken by registration order).  Two dispatch
//! disciplines exist over the same subscriber lists: broadcast, which calls
//! everyone, and first-result, which stops at the first subscriber that
//! returns something other than [`ModResult::Passthru`].
//!
//! A panicking module must not take the server down: calls are isolated at
//! the bus boundary and a panic counts as `Passthru`.

use crate::user::User;
use crate::xline::{XLine, XLineKind};
use selkie_tokens::{Buffer, Command, Message};
use std::panic::{self, AssertUnwindSafe};

/// The hook points the core fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Hook {
    OnUserInit,
    OnSetUserIp,
    OnPreCommand,
    OnPostCommand,
    OnUserJoin,
    OnPostJoin,
    OnUserPart,
    OnUserQuit,
    OnUserDisconnect,
    OnRehash,
    OnWhois,
    OnAddLine,
    OnDelLine,
    OnCheckReady,
    OnExtendedMode,
}

const HOOK_COUNT: usize = Hook::OnExtendedMode as usize + 1;

/// What a first-result subscriber decided.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModResult {
    Allow,
    Deny,
    Passthru,
}

/// A module attached to the event bus.
///
/// Every hook method has a default no-op body; modules override the ones
/// they listed in [`Module::hooks`].
#[allow(unused_variables)]
pub trait Module {
    fn name(&self) -> &'static str;

    /// The hooks this module subscribes to.
    fn hooks(&self) -> &'static [Hook];

    fn on_user_init(&mut self, user: &mut User) {}
    fn on_set_user_ip(&mut self, user: &mut User) {}
    fn on_pre_command(&mut self, user: &User, msg: &Message<'_>) -> ModResult {
        ModResult::Passthru
    }
    fn on_post_command(&mut self, user: &User, command: Command) {}
    fn on_user_join(&mut self, user: &User, channel: &str) {}
    fn on_post_join(&mut self, user: &User, channel: &str) {}
    fn on_user_part(&mut self, user: &User, channel: &str, reason: &str) {}
    fn on_user_quit(&mut self, user: &User, reason: &str) {}
    fn on_user_disconnect(&mut self, user: &User) {}
    fn on_rehash(&mut self) {}
    fn on_whois(&mut self, server: &str, asker: &User, target: &User, out: &mut Buffer) {}
    fn on_add_line(&mut self, set_by: &str, line: &XLine) {}
    fn on_del_line(&mut self, set_by: &str, kind: XLineKind, mask: &str) {}
    fn on_check_ready(&mut self, user: &User) -> ModResult {
        ModResult::Passthru
    }
    /// A mode letter the core does not know about.  Return `Allow` to have
    /// it echoed as applied; the module owns whatever state it implies.
    fn on_extended_mode(&mut self, user: &mut User, target: &str, letter: char, value: bool) -> ModResult {
        ModResult::Passthru
    }
}

struct Subscriber {
    module: Box<dyn Module>,
    priority: i32,
    dead: bool,
}

/// Ordered hook subscriptions over a set of registered modules.
#[derive(Default)]
pub struct EventBus {
    subscribers: Vec<Subscriber>,
    // One ordered id list per hook.
    lists: [Vec<usize>; HOOK_COUNT],
    dispatching: u32,
    pending_removals: Vec<usize>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a module at the given priority (lower runs first).
    pub fn register(&mut self, module: Box<dyn Module>, priority: i32) {
        let id = self.subscribers.len();
        for &hook in module.hooks() {
            let list = &mut self.lists[hook as usize];
            // Stable position: after every subscriber of lower-or-equal
            // priority.
            let pos = list
                .iter()
                .position(|&other| self.subscribers[other].priority > priority)
                .unwrap_or(list.len());
            list.insert(pos, id);
        }
        self.subscribers.push(Subscriber {
            module,
            priority,
            dead: false,
        });
    }

    /// Marks a module for removal.
    ///
    /// Removal is deferred to the next quiescent point, so a module may
    /// request its own unregistration from inside a hook.
    pub fn unregister(&mut self, name: &str) {
        if let Some(id) = self
            .subscribers
            .iter()
            .position(|s| !s.dead && s.module.name() == name)
        {
            self.pending_removals.push(id);
            if self.dispatching == 0 {
                self.quiesce();
            }
        }
    }

    /// Applies deferred removals.  Called by the main loop between dispatch
    /// cycles.
    pub fn quiesce(&mut self) {
        if self.dispatching > 0 {
            return;
        }
        for id in self.pending_removals.drain(..) {
            self.subscribers[id].dead = true;
            for list in &mut self.lists {
                list.retain(|&other| other != id);
            }
        }
    }

    /// Calls every subscriber of `hook` in priority order, ignoring results.
    pub fn broadcast<F>(&mut self, hook: Hook, mut f: F)
    where
        F: FnMut(&mut dyn Module),
    {
        self.dispatching += 1;
        let list = self.lists[hook as usize].clone();
        for id in list {
            let sub = &mut self.subscribers[id];
            if sub.dead {
                continue;
            }
            let name = sub.module.name();
            if panic::catch_unwind(AssertUnwindSafe(|| f(sub.module.as_mut()))).is_err() {
                log::error!("module {} panicked in {:?}", name, hook);
            }
        }
        self.dispatching -= 1;
    }

    /// Calls subscribers of `hook` in priority order until one returns a
    /// non-passthru result; that result wins.
    pub fn first_result<F>(&mut self, hook: Hook, mut f: F) -> ModResult
    where
        F: FnMut(&mut dyn Module) -> ModResult,
    {
        self.dispatching += 1;
        let list = self.lists[hook as usize].clone();
        let mut res = ModResult::Passthru;
        for id in list {
            let sub = &mut self.subscribers[id];
            if sub.dead {
                continue;
            }
            let name = sub.module.name();
            let one = match panic::catch_unwind(AssertUnwindSafe(|| f(sub.module.as_mut()))) {
                Ok(one) => one,
                Err(_) => {
                    log::error!("module {} panicked in {:?}", name, hook);
                    ModResult::Passthru
                }
            };
            if one != ModResult::Passthru {
                res = one;
                break;
            }
        }
        self.dispatching -= 1;
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        name: &'static str,
        result: ModResult,
        log: std::rc::Rc<std::cell::RefCell<Vec<&'static str>>>,
    }

    impl Module for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn hooks(&self) -> &'static [Hook] {
            &[Hook::OnCheckReady, Hook::OnRehash]
        }

        fn on_rehash(&mut self) {
            self.log.borrow_mut().push(self.name);
        }

        fn on_check_ready(&mut self, _: &User) -> ModResult {
            self.log.borrow_mut().push(self.name);
            self.result
        }
    }

    fn recorder(
        name: &'static str,
        result: ModResult,
        log: &std::rc::Rc<std::cell::RefCell<Vec<&'static str>>>,
    ) -> Box<dyn Module> {
        Box::new(Recorder {
            name,
            result,
            log: log.clone(),
        })
    }

    #[test]
    fn test_broadcast_priority_order() {
        let log = Default::default();
        let mut bus = EventBus::new();
        bus.register(recorder("low", ModResult::Passthru, &log), 10);
        bus.register(recorder("first", ModResult::Passthru, &log), -10);
        bus.register(recorder("mid", ModResult::Passthru, &log), 0);

        bus.broadcast(Hook::OnRehash, |m| m.on_rehash());
        assert_eq!(*log.borrow(), ["first", "mid", "low"]);
    }

    #[test]
    fn test_first_result_stops() {
        let log: std::rc::Rc<std::cell::RefCell<Vec<&'static str>>> = Default::default();
        let mut bus = EventBus::new();
        bus.register(recorder("pass", ModResult::Passthru, &log), 0);
        bus.register(recorder("deny", ModResult::Deny, &log), 1);
        bus.register(recorder("late", ModResult::Allow, &log), 2);

        let user = crate::user::User::test_dummy();
        let res = bus.first_result(Hook::OnCheckReady, |m| m.on_check_ready(&user));
        assert_eq!(res, ModResult::Deny);
        assert_eq!(*log.borrow(), ["pass", "deny"]);
    }

    #[test]
    fn test_unregister_during_dispatch_deferred() {
        let log: std::rc::Rc<std::cell::RefCell<Vec<&'static str>>> = Default::default();
        let mut bus = EventBus::new();
        bus.register(recorder("a", ModResult::Passthru, &log), 0);
        bus.register(recorder("b", ModResult::Passthru, &log), 1);

        bus.unregister("b");
        bus.broadcast(Hook::OnRehash, |m| m.on_rehash());
        assert_eq!(*log.borrow(), ["a"]);
    }
}

//! Testing utilities for `crate::state`.
//!
//! The harness drives the protocol state machine through textual IRC lines
//! on detached connections, then reads the replies the server queued on
//! each connection.

use super::State;
use crate::config::Config;
use crate::conn::{Connection, Transport};
use crate::user::Uid;
use crate::util;
use selkie_tokens::Message;
use std::net::SocketAddr;

pub const DOMAIN: &str = "test.server";

pub(crate) fn simple_state() -> State {
    let mut config = Config::sample();
    config.server_name = DOMAIN.to_owned();
    State::new(config, None).expect("socket engine")
}

pub(crate) fn add_client(state: &mut State) -> Uid {
    let port = 40_000 + state.users.len() as u16;
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let conn = Connection::new(Transport::Detached, addr, None);
    let class = state.config.classes[0].clone();
    state.users.add(conn, class, util::time())
}

pub(crate) fn add_registered_client(state: &mut State, nickname: &str) -> Uid {
    let uid = add_client(state);
    state.handle_line(uid, &format!("NICK {}", nickname));
    state.handle_line(uid, "USER X 0 * :X");
    state.background_tick(util::time());
    flush(state, uid);
    uid
}

/// Discards everything queued for `uid`.
pub(crate) fn flush(state: &mut State, uid: Uid) {
    let _ = collect(state, uid);
}

/// Takes everything queued for `uid` since the last call.
pub(crate) fn collect(state: &mut State, uid: Uid) -> String {
    state
        .users
        .get_mut(uid)
        .map_or_else(String::new, |user| user.conn.take_output())
}

pub(crate) fn messages(s: &str) -> impl Iterator<Item = Message<'_>> {
    s.lines().map(|line| Message::parse(line).expect("bad message"))
}

pub(crate) fn sequence(state: &mut State, lines: &[(Uid, &str)]) {
    for (uid, line) in lines {
        state.handle_line(*uid, line);
    }
}

mod scenarios {
    use super::*;
    use crate::user::RegState;
    use selkie_unicase::u;

    #[test]
    fn test_registration_happy_path() {
        let mut state = simple_state();
        let alice = add_client(&mut state);
        assert_eq!(state.users.get(alice).unwrap().registered, RegState::None);

        state.handle_line(alice, "NICK alice");
        assert_eq!(state.users.get(alice).unwrap().registered, RegState::Nick);

        state.handle_line(alice, "USER alice 0 * :Alice");
        assert_eq!(state.users.get(alice).unwrap().registered, RegState::NickUser);

        state.background_tick(util::time());
        assert_eq!(state.users.get(alice).unwrap().registered, RegState::All);

        let out = collect(&mut state, alice);
        let mut replies = messages(&out);
        for code in ["001", "002", "003", "004", "005"] {
            let msg = replies
                .find(|m| m.command == Err(code))
                .unwrap_or_else(|| panic!("no {} in {:?}", code, out));
            assert_eq!(msg.prefix, Some(DOMAIN));
            assert_eq!(msg.params[0], "alice");
        }
        assert!(out.contains("Welcome to the Internet Relay Network alice!alice@"));
    }

    #[test]
    fn test_nick_collision_case_insensitive() {
        let mut state = simple_state();
        let _alice = add_registered_client(&mut state, "alice");

        let bob = add_client(&mut state);
        state.handle_line(bob, "NICK Alice");

        let out = collect(&mut state, bob);
        let msg = messages(&out).next().expect("a reply");
        assert_eq!(msg.command, Err("433"));
        assert_eq!(msg.params[0], "*");
        assert_eq!(msg.params[1], "Alice");
        assert_eq!(msg.params[2], "Nickname is already in use");
    }

    #[test]
    fn test_nick_collision_scandinavian() {
        let mut state = simple_state();
        let _alice = add_registered_client(&mut state, "foo[bar");

        let carol = add_client(&mut state);
        state.handle_line(carol, "NICK foo{bar");

        let out = collect(&mut state, carol);
        let msg = messages(&out).next().expect("a reply");
        assert_eq!(msg.command, Err("433"));
        assert_eq!(msg.params[1], "foo{bar");
    }

    #[test]
    fn test_join_and_privmsg_broadcast() {
        let mut state = simple_state();
        let alice = add_registered_client(&mut state, "alice");
        let bob = add_registered_client(&mut state, "bob");

        sequence(&mut state, &[(alice, "JOIN #test"), (bob, "JOIN #test")]);
        flush(&mut state, alice);
        flush(&mut state, bob);

        state.handle_line(alice, "PRIVMSG #test :hello");

        let bob_out = collect(&mut state, bob);
        let msg = messages(&bob_out)
            .find(|m| m.command == Ok(selkie_tokens::Command::PrivMsg))
            .expect("bob got the message");
        assert!(msg.prefix.unwrap().starts_with("alice!"));
        assert_eq!(msg.params[0], "#test");
        assert_eq!(msg.params[1], "hello");

        // The sender does not receive their own message.
        let alice_out = collect(&mut state, alice);
        assert!(!alice_out.contains("PRIVMSG"), "alice got {:?}", alice_out);
    }

    #[test]
    fn test_join_sends_names() {
        let mut state = simple_state();
        let alice = add_registered_client(&mut state, "alice");

        state.handle_line(alice, "JOIN #test");
        let out = collect(&mut state, alice);
        assert!(out.contains(" JOIN #test"));
        let names = messages(&out).find(|m| m.command == Err("353")).expect("353");
        assert_eq!(names.params[2], "#test");
        assert_eq!(names.params[3], "@alice");
        assert!(messages(&out).any(|m| m.command == Err("366")));
    }

    #[test]
    fn test_unregistered_cannot_join() {
        let mut state = simple_state();
        let alice = add_client(&mut state);
        state.handle_line(alice, "JOIN #test");

        let out = collect(&mut state, alice);
        let msg = messages(&out).next().expect("a reply");
        assert_eq!(msg.command, Err("451"));
    }

    #[test]
    fn test_ping_timeout() {
        let mut state = simple_state();
        let interval = state.config.classes[0].ping_interval;

        let alice = add_registered_client(&mut state, "alice");
        let bob = add_registered_client(&mut state, "bob");
        sequence(&mut state, &[(alice, "JOIN #test"), (bob, "JOIN #test")]);
        flush(&mut state, alice);
        flush(&mut state, bob);
        let t0 = util::time();

        // First deadline: both get a PING.
        state.background_tick(t0 + interval + 1);
        let out = collect(&mut state, alice);
        assert!(out.contains(&format!("PING :{}", DOMAIN)), "got {:?}", out);

        // Bob answers, alice stays silent.
        state.handle_line(bob, "PONG :test.server");
        flush(&mut state, bob);

        state.background_tick(t0 + 2 * interval + 3);
        assert!(state.users.get(alice).unwrap().quitting);
        assert!(!state.users.get(bob).unwrap().quitting);

        let bob_out = collect(&mut state, bob);
        let quit = messages(&bob_out)
            .find(|m| m.command == Ok(selkie_tokens::Command::Quit))
            .expect("bob saw the quit");
        assert!(quit.prefix.unwrap().starts_with("alice!"));
        assert!(
            quit.params[0].starts_with("Ping timeout: "),
            "reason {:?}",
            quit.params[0]
        );
        assert!(quit.params[0].ends_with("seconds"));
    }

    #[test]
    fn test_registration_timeout() {
        let mut state = simple_state();
        let t0 = util::time();
        let timeout = state.config.classes[0].reg_timeout;

        let alice = add_client(&mut state);
        state.background_tick(t0 + timeout + 1);
        assert!(state.users.get(alice).unwrap().quitting);
        let out = collect(&mut state, alice);
        assert!(out.contains("Registration timeout"), "got {:?}", out);
    }

    #[test]
    fn test_mode_stacking() {
        let mut state = simple_state();
        let bob = add_registered_client(&mut state, "bob");
        let alice = add_registered_client(&mut state, "alice");

        // bob creates the channel (and is therefore operator), alice joins,
        // bob voices himself so there is a voice to remove.
        sequence(&mut state, &[
            (bob, "JOIN #test"),
            (alice, "JOIN #test"),
            (bob, "MODE #test +v bob"),
        ]);
        flush(&mut state, alice);
        flush(&mut state, bob);

        state.handle_line(bob, "MODE #test +o-v+b alice bob *!*@evil.example");

        let alice_out = collect(&mut state, alice);
        let mode = messages(&alice_out)
            .find(|m| m.command == Ok(selkie_tokens::Command::Mode))
            .expect("mode echo");
        assert!(mode.prefix.unwrap().starts_with("bob!"));
        assert_eq!(mode.params[0], "#test");
        assert_eq!(mode.params[1], "+o-v+b");
        assert_eq!(mode.params[2], "alice");
        assert_eq!(mode.params[3], "bob");
        assert_eq!(mode.params[4], "*!*@evil.example");

        let channel = state.channels.get(u("#test")).unwrap();
        let alice_modes = channel.members[&alice];
        let bob_modes = channel.members[&bob];
        assert!(alice_modes.operator);
        assert!(!bob_modes.voice);
        assert_eq!(channel.ban_masks, ["*!*@evil.example"]);
    }

    #[test]
    fn test_client_quit_is_graceful() {
        let mut state = simple_state();
        let alice = add_registered_client(&mut state, "alice");
        let bob = add_registered_client(&mut state, "bob");
        sequence(&mut state, &[(alice, "JOIN #test"), (bob, "JOIN #test")]);
        flush(&mut state, bob);

        state.handle_line(alice, "QUIT :gone fishing");
        assert!(state.users.get(alice).unwrap().quitting);

        let bob_out = collect(&mut state, bob);
        let quit = messages(&bob_out)
            .find(|m| m.command == Ok(selkie_tokens::Command::Quit))
            .expect("bob saw the quit");
        assert_eq!(quit.params[0], "Quit: gone fishing");
    }

    #[test]
    fn test_stats_keeps_line_kinds_apart() {
        let mut state = simple_state();
        let mut config = Config::sample();
        config.server_name = DOMAIN.to_owned();
        config.opers = vec![("root".to_owned(), "hunter2".to_owned())];
        state.config = config;

        let oper = add_registered_client(&mut state, "root");
        state.handle_line(oper, "OPER root hunter2");
        sequence(&mut state, &[
            (oper, "GLINE baduser@* 0 :Bad ident"),
            (oper, "ZLINE 203.0.113.* 0 :Bad net"),
        ]);
        flush(&mut state, oper);

        // G and Z share the 223 numeric; the kind letter keeps them apart.
        state.handle_line(oper, "STATS z");
        let out = collect(&mut state, oper);
        let records: Vec<_> = messages(&out).filter(|m| m.command == Err("223")).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].params[1], "Z");
        assert_eq!(records[0].params[2], "203.0.113.*");
        assert!(records[0].params[5].starts_with("Z-line: "));
        assert!(!out.contains("baduser@*"), "got {:?}", out);
        assert!(messages(&out).any(|m| m.command == Err("219")));

        state.handle_line(oper, "STATS g");
        let out = collect(&mut state, oper);
        let records: Vec<_> = messages(&out).filter(|m| m.command == Err("223")).collect();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].params[1], "G");
        assert_eq!(records[0].params[2], "baduser@*");
    }

    #[test]
    fn test_quit_idempotent() {
        let mut state = simple_state();
        let alice = add_registered_client(&mut state, "alice");
        let bob = add_registered_client(&mut state, "bob");
        sequence(&mut state, &[(alice, "JOIN #test"), (bob, "JOIN #test")]);
        flush(&mut state, bob);

        state.quit_user(alice, "first reason", None);
        state.quit_user(alice, "second reason", None);

        let bob_out = collect(&mut state, bob);
        let quits: Vec<_> = messages(&bob_out)
            .filter(|m| m.command == Ok(selkie_tokens::Command::Quit))
            .map(|m| m.params[0].to_owned())
            .collect();
        assert_eq!(quits, ["first reason"]);

        // The nick is free again right away.
        assert_eq!(state.users.by_nick("alice"), None);
    }

    #[test]
    fn test_excess_flood_quits() {
        let mut state = simple_state();
        let alice = add_registered_client(&mut state, "alice");
        let cap = state.config.classes[0].penalty_cap;

        // LIST carries the heaviest penalty in the table.
        for _ in 0..=cap {
            state.handle_line(alice, "LIST");
            if state.users.get(alice).map_or(true, |u| u.quitting) {
                break;
            }
        }
        assert!(state.users.get(alice).unwrap().quitting);
    }

    #[test]
    fn test_flood_decay_releases_held_lines() {
        let mut state = simple_state();
        let alice = add_registered_client(&mut state, "alice");
        let cap = state.config.classes[0].penalty_cap;

        if let Some(user) = state.users.get_mut(alice) {
            user.penalty = cap;
            user.conn.feed(b"PING :held\r\n");
        }
        // Held back: over the cap, nothing is processed.
        state.drain_lines(alice);
        assert_eq!(collect(&mut state, alice), "");

        // One sweep decays the penalty and re-drains the queue.
        state.background_tick(util::time() + 1);
        let out = collect(&mut state, alice);
        assert!(out.contains("PONG"), "got {:?}", out);
    }

    #[test]
    fn test_autojoin_on_registration() {
        let mut state = simple_state();
        state.config.autojoin = vec!["#welcome".to_owned()];

        let alice = add_registered_client(&mut state, "alice");
        assert!(state.channels.get(u("#welcome")).is_some());
        assert!(state.users.get(alice).unwrap().channels.contains("#welcome"));
    }

    #[test]
    fn test_channel_dropped_when_empty() {
        let mut state = simple_state();
        let alice = add_registered_client(&mut state, "alice");
        sequence(&mut state, &[(alice, "JOIN #test"), (alice, "PART #test")]);
        assert!(state.channels.get(u("#test")).is_none());
    }

    #[test]
    fn test_kline_sweeps_existing_users() {
        let mut state = simple_state();
        let mut config = Config::sample();
        config.server_name = DOMAIN.to_owned();
        config.opers = vec![("root".to_owned(), "hunter2".to_owned())];
        state.config = config;

        let oper = add_registered_client(&mut state, "root");
        state.handle_line(oper, "OPER root hunter2");
        flush(&mut state, oper);

        let victim = add_client(&mut state);
        state.handle_line(victim, "NICK victim");
        state.handle_line(victim, "USER victim 0 * :Victim");
        state.background_tick(util::time());
        flush(&mut state, victim);

        state.handle_line(oper, "KLINE victim@* 0 :Begone");
        assert!(state.users.get(victim).unwrap().quitting);
        assert!(!state.users.get(oper).unwrap().quitting);
        let out = collect(&mut state, victim);
        assert!(out.contains("K-Lined: Begone"), "got {:?}", out);
    }

    #[test]
    fn test_extended_user_mode_via_module() {
        let mut state = simple_state();
        let robot = add_registered_client(&mut state, "robot");
        let alice = add_registered_client(&mut state, "alice");

        state.handle_line(robot, "MODE robot +B");
        let out = collect(&mut state, robot);
        assert!(out.contains("MODE robot +B"), "got {:?}", out);

        state.handle_line(alice, "WHOIS robot");
        let out = collect(&mut state, alice);
        let bot_line = messages(&out)
            .find(|m| m.command == Err("335"))
            .expect("bot whois line");
        assert_eq!(bot_line.params[1], "robot");
        assert_eq!(bot_line.params[2], "is a bot");
    }

    #[test]
    fn test_oper_commands_need_privileges() {
        let mut state = simple_state();
        let alice = add_registered_client(&mut state, "alice");
        state.handle_line(alice, "KILL alice :no");

        let out = collect(&mut state, alice);
        let msg = messages(&out).next().expect("a reply");
        assert_eq!(msg.command, Err("481"));
    }
}

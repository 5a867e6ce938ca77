//! The server state and its main loop.
//!
//! This module is split in several files:
//!
//! - `mod.rs`: the event loop, the accept and quit paths, the command
//!   dispatcher and send utilities
//! - `rfc2812.rs`: handlers for the RFC 2812 client-to-server commands
//! - `oper.rs`: handlers for operator commands (KILL, the X-line family,
//!   REHASH, STATS)

use crate::channel::Channel;
use crate::config::Config;
use crate::conn::{ConnError, Connection, MessageQueueItem, Transport};
use crate::engine::{self, EventKind, SocketEngine};
use crate::extension::ExtensionRegistry;
use crate::hooks::{EventBus, Hook, ModResult};
use crate::lines;
use crate::user::{RegState, Uid};
use crate::users::UserManager;
use crate::util;
use crate::xline::{BanCache, XLineKind, XLineManager};
use selkie_tokens::{rpl, Access, Buffer, Command, Message, MessageBuffer, MESSAGE_LENGTH};
use selkie_unicase::{u, UniCase};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;
use std::{fs, io};

mod oper;
mod rfc2812;
#[cfg(test)]
mod test;

#[macro_export]
macro_rules! server_version(() => {concat!(env!("CARGO_PKG_NAME"), "-", env!("CARGO_PKG_VERSION"))});

// TODO make those configurable at runtime
const MAX_CHANNEL_NAME_LENGTH: usize = 50;
const MAX_NICKNAME_LENGTH: usize = 30;
const MAX_TOPIC_LENGTH: usize = 300;
const MAX_KICK_LENGTH: usize = 255;

/// TTLs of ban-cache verdicts, in seconds.
const BANCACHE_POSITIVE_TTL: u64 = 3600;
const BANCACHE_NEGATIVE_TTL: u64 = 300;

/// How long a graceful close may spend draining the send queue.
const QUIT_FLUSH_DEADLINE: Duration = Duration::from_millis(500);

/// Sent to clients with the INFO command.
const SERVER_INFO: &str = "\
selkie -- an IRC server that speaks RFC 1459 and RFC 2812.

It multiplexes every connection on one thread and applies bans,
channel modes and flood control the way the classic daemons do.";

type ChannelMap = HashMap<UniCase<String>, Channel>;
type HandlerResult = Result<(), ()>;

/// What a socket-engine registration belongs to.
#[derive(Clone, Copy)]
pub(crate) enum Tag {
    Listener(usize),
    Client(Uid),
}

/// Per-command context handed to handlers: the issuing user and the reply
/// buffer flushed to them when the handler returns.
pub(crate) struct CommandContext {
    pub uid: Uid,
    pub rb: Buffer,
    domain: Rc<str>,
    nick: String,
}

impl CommandContext {
    fn new(uid: Uid, domain: Rc<str>, nick: String) -> Self {
        Self {
            uid,
            rb: Buffer::new(),
            domain,
            nick,
        }
    }

    /// Starts a numeric reply: `:<server> <code> <nick>`.
    pub fn reply(&mut self, code: &'static str) -> MessageBuffer<'_> {
        self.rb.message(&self.domain, code).param(&self.nick)
    }
}

/// Timed background work, probed from the main loop.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Timer {
    ExpireLines,
    SweepBanCache,
    GarbageCollect,
}

impl Timer {
    fn period(self) -> u64 {
        match self {
            Self::ExpireLines => 60,
            Self::SweepBanCache => 300,
            Self::GarbageCollect => 3600,
        }
    }
}

struct Listener {
    socket: mio::net::TcpListener,
    /// Optional byte-stream wrapper (TLS and the like) told about every
    /// accepted connection.
    hook: Option<Box<dyn crate::conn::IoHookProvider>>,
}

/// The state of the server: every user, channel and ban, the socket engine
/// that feeds them, and the event bus towards modules.
pub struct State {
    pub(crate) config: Config,
    config_path: Option<String>,
    domain: Rc<str>,
    created_at: String,
    motd: Option<String>,

    engine: SocketEngine<Tag>,
    listeners: Vec<Listener>,

    pub(crate) users: UserManager,
    pub(crate) channels: ChannelMap,
    pub(crate) bus: EventBus,
    pub(crate) xlines: XLineManager,
    pub(crate) bancache: BanCache,
    pub(crate) ext_registry: ExtensionRegistry,

    timers: BinaryHeap<Reverse<(u64, Timer)>>,
    last_tick: u64,
}

/// Derives the 3-character server id from the server name, first character
/// a digit as the id scheme wants.
fn sid_for(server_name: &str) -> [u8; 3] {
    const ALNUM: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    let h = selkie_unicase::ASCII.hash(server_name);
    [
        b'0' + (h % 10) as u8,
        ALNUM[(h / 10 % 36) as usize],
        ALNUM[(h / 360 % 36) as usize],
    ]
}

impl State {
    /// Builds the state from a configuration.  Fails only when the socket
    /// engine cannot be created, which is fatal to the caller.
    pub fn new(config: Config, config_path: Option<String>) -> io::Result<Self> {
        selkie_unicase::set_national_map(config.casemapping);

        let motd = config.motd_file.as_ref().and_then(|file| {
            match fs::read_to_string(file) {
                Ok(motd) => Some(motd),
                Err(err) => {
                    log::warn!("Failed to read {:?}: {}", file, err);
                    None
                }
            }
        });

        let engine = SocketEngine::new(config.soft_limit + config.bindings.len() + 8)?;
        let sid = sid_for(&config.server_name);
        let domain: Rc<str> = Rc::from(config.server_name.as_str());
        let now = util::time();

        let mut timers = BinaryHeap::new();
        for timer in [Timer::ExpireLines, Timer::SweepBanCache, Timer::GarbageCollect] {
            timers.push(Reverse((now + timer.period(), timer)));
        }

        // Statically linked modules.
        let mut ext_registry = ExtensionRegistry::new();
        let mut bus = EventBus::new();
        if let Some(botmode) = crate::modules::BotMode::new(&mut ext_registry) {
            bus.register(Box::new(botmode), 0);
        }

        Ok(Self {
            config,
            config_path,
            domain,
            created_at: util::time_str(),
            motd,
            engine,
            listeners: Vec::new(),
            users: UserManager::new(sid),
            channels: HashMap::new(),
            bus,
            xlines: XLineManager::new(),
            bancache: BanCache::new(),
            ext_registry,
            timers,
            last_tick: now,
        })
    }

    /// Binds the configured listeners and registers them with the engine.
    pub fn listen(&mut self) -> io::Result<()> {
        for (idx, addr) in self.config.bindings.clone().into_iter().enumerate() {
            let mut socket = mio::net::TcpListener::bind(addr)?;
            self.engine
                .add(&mut socket, Tag::Listener(idx), engine::WANT_FAST_READ)?
                .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "socket engine full"))?;
            log::info!("Listening on {} for plain-text connections...", addr);
            self.listeners.push(Listener { socket, hook: None });
        }
        Ok(())
    }

    /// The main loop: one suspension point (the engine dispatch), then
    /// readiness handling, deferred destruction and the per-second sweep.
    pub fn run(&mut self) -> ! {
        loop {
            let batch = self.engine.dispatch(Duration::from_secs(1));
            for (token, tag, kind) in batch {
                // A handler may have replaced this registration mid-batch.
                if !self.engine.is_current(token) {
                    continue;
                }
                match (tag, kind) {
                    (Tag::Listener(idx), EventKind::Read) => self.accept_ready(idx),
                    (Tag::Listener(idx), _) => {
                        log::error!("Listener {} reported a socket error", idx);
                    }
                    (Tag::Client(uid), EventKind::Read) => self.client_readable(uid),
                    (Tag::Client(uid), EventKind::Write) => self.client_writable(uid),
                    (Tag::Client(uid), EventKind::Error) => {
                        self.quit_user(uid, "Connection reset by peer", None);
                    }
                }
            }

            self.finish_culls();
            self.bus.quiesce();

            let now = util::time();
            self.run_timers(now);
            if now > self.last_tick {
                self.last_tick = now;
                self.background_tick(now);
            }
        }
    }

    // Accept path

    fn accept_ready(&mut self, idx: usize) {
        loop {
            let accepted = self.listeners[idx].socket.accept();
            match accepted {
                Ok((stream, addr)) => self.add_user(stream, addr, idx),
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock => return,
                Err(err) => {
                    log::debug!("Failed to accept connection: {}", err);
                    return;
                }
            }
        }
    }

    /// Runs a new connection through the whole admission pipeline: indexes
    /// and clone counts, connection limits, class resolution, exemptions,
    /// the ban cache and Z-lines, and finally engine registration.
    fn add_user(&mut self, stream: mio::net::TcpStream, addr: SocketAddr, listener: usize) {
        let now = util::time();
        let ip = addr.ip();
        let class = self.config.class_for(&ip.to_string(), &ip.to_string());
        let conn = Connection::new(Transport::Tcp(stream), addr, None);
        let uid = self.users.add(conn, class.clone(), now);
        log::debug!("New user: {} from {}", uid, addr);

        // Tell the listener's I/O wrapper, if any, before the first byte.
        if let Some(listener) = self.listeners.get_mut(listener) {
            if let Some(ref mut hook) = listener.hook {
                let server = listener.socket.local_addr().unwrap_or(addr);
                if let Some(user) = self.users.get_mut(uid) {
                    hook.on_accept(&mut user.conn, server);
                }
            }
        }

        // Soft limit and engine capacity.
        if self.users.local_len() > self.config.soft_limit
            || self.users.local_len() >= self.engine.capacity()
        {
            self.snomask_notice('a', &format!(
                "Warning: softlimit value has been reached: {} clients",
                self.config.soft_limit
            ));
            self.quit_user(uid, "No more connections allowed", None);
            return;
        }

        // Per-class clone limits.
        if self.users.local_clone_count(ip) > class.max_local {
            self.quit_user(uid, "No more connections allowed on your connection class (local)", None);
            return;
        }
        if self.users.global_clone_count(ip) > class.max_global {
            self.quit_user(uid, "No more connections allowed on your connection class (global)", None);
            return;
        }

        // E-line exemption is kept current even when the ban cache hits.
        let exempt = {
            let user = self.users.get(uid).expect("user just added");
            self.xlines.matches(XLineKind::E, user).is_some()
        };
        if let Some(user) = self.users.get_mut(uid) {
            user.exempt = exempt;
        }

        if let Some(hit) = self.bancache.get_hit(&ip).cloned() {
            if !hit.is_negative() && !exempt {
                log::debug!("BanCache: positive hit for {}", ip);
                if !self.config.xline_message.is_empty() {
                    let message = format!("*** {}", self.config.xline_message.clone());
                    self.server_notice(uid, &message);
                }
                self.quit_user(uid, &hit.reason, None);
                return;
            }
            log::debug!("BanCache: negative hit for {}", ip);
        } else if !exempt {
            let matched = {
                let user = self.users.get(uid).expect("user just added");
                self.xlines.matches(XLineKind::Z, user).cloned()
            };
            match matched {
                Some(line) => {
                    self.apply_line(&line, uid);
                    return;
                }
                None => {
                    self.bancache.add_hit(ip, "", "", BANCACHE_NEGATIVE_TTL);
                }
            }
        }

        // Register with the engine, edge-triggered both ways.
        let added = {
            let user = self.users.get_mut(uid).expect("user just added");
            match user.conn.source() {
                Some(stream) => self.engine.add(
                    stream,
                    Tag::Client(uid),
                    engine::WANT_FAST_READ | engine::WANT_FAST_WRITE,
                ),
                None => Ok(None),
            }
        };
        match added {
            Ok(Some(token)) => {
                if let Some(user) = self.users.get_mut(uid) {
                    user.conn.set_token(token);
                }
            }
            Ok(None) => {
                self.quit_user(uid, "No more connections allowed", None);
                return;
            }
            Err(err) => {
                log::debug!("Internal error on new connection: {}", err);
                self.quit_user(uid, "Internal error handling connection", None);
                return;
            }
        }

        self.fire_user_hook(uid, Hook::OnSetUserIp);
        if self.users.get(uid).map_or(true, |u| u.quitting) {
            return;
        }
        self.fire_user_hook(uid, Hook::OnUserInit);
    }

    fn fire_user_hook(&mut self, uid: Uid, hook: Hook) {
        let user = match self.users.get_mut(uid) {
            Some(user) => user,
            None => return,
        };
        match hook {
            Hook::OnSetUserIp => self.bus.broadcast(hook, |m| m.on_set_user_ip(user)),
            Hook::OnUserInit => self.bus.broadcast(hook, |m| m.on_user_init(user)),
            _ => {}
        }
    }

    // Quit path

    /// Quits a user abortively: pending output is discarded.  Used for the
    /// error, ban and flood paths.  Idempotent; every observable index
    /// change happens here, while the arena entry survives until the
    /// end-of-cycle cull.
    pub(crate) fn quit_user(&mut self, uid: Uid, reason: &str, oper_reason: Option<&str>) {
        self.do_quit_user(uid, reason, oper_reason, false);
    }

    /// Like [`State::quit_user`], but drains pending output within a
    /// bounded deadline before closing.  Used for client-initiated QUIT.
    pub(crate) fn quit_user_graceful(&mut self, uid: Uid, reason: &str, oper_reason: Option<&str>) {
        self.do_quit_user(uid, reason, oper_reason, true);
    }

    fn do_quit_user(&mut self, uid: Uid, reason: &str, oper_reason: Option<&str>, graceful: bool) {
        if !self.users.begin_quit(uid) {
            return;
        }

        let (full_name, nick, ident, host, realhost, ip, registered, max_quit) = {
            let user = self.users.get(uid).expect("begin_quit checked existence");
            (
                user.full_name().to_owned(),
                user.nick().to_owned(),
                user.ident().to_owned(),
                user.host().to_owned(),
                user.realhost().to_owned(),
                user.ip(),
                user.registered,
                user.class.max_quit,
            )
        };

        let reason = truncate(reason, max_quit);
        let oper_reason = oper_reason.map_or_else(|| reason.clone(), |r| truncate(r, max_quit));
        log::debug!("QuitUser: {}={} '{}'", uid, nick, reason);

        // Drop the engine registration first so no further event can fire
        // for this user, then close: gracefully for a client QUIT, dropping
        // pending output everywhere else.
        {
            let user = self.users.get_mut(uid).expect("begin_quit checked existence");
            if let Some(token) = user.conn.token() {
                let engine = &mut self.engine;
                if let Some(stream) = user.conn.source() {
                    engine.del(token, stream);
                }
            }
            let line = format!("ERROR :{}\r\n", lines::closing_link(&ident, &host, &oper_reason));
            if graceful {
                user.conn.close_gracefully(&line, QUIT_FLUSH_DEADLINE);
            } else {
                user.conn.close_with_error(&line);
            }
        }

        self.users.enqueue_cull(uid);

        if registered == RegState::All {
            {
                let users = &self.users;
                let user = users.get(uid).expect("still in arena");
                self.bus
                    .broadcast(Hook::OnUserQuit, |m| m.on_user_quit(user, &reason));
            }
            let mut buf = Buffer::new();
            buf.message(&full_name, Command::Quit).trailing_param(&reason);
            self.broadcast_neighbors(uid, MessageQueueItem::from(buf), false);
        } else {
            self.users.unregistered_count -= 1;
        }

        {
            let users = &self.users;
            let user = users.get(uid).expect("still in arena");
            self.bus
                .broadcast(Hook::OnUserDisconnect, |m| m.on_user_disconnect(user));
        }

        if registered == RegState::All {
            self.snomask_notice('q', &format!(
                "Client exiting: {}!{}@{} ({}) [{}]",
                nick, ident, realhost, ip, oper_reason
            ));
        }

        self.users.remove_from_lists(uid);
    }

    /// Destroys culled users and prunes their memberships.
    fn finish_culls(&mut self) {
        for uid in self.users.take_culls() {
            let mut user = match self.users.remove(uid) {
                Some(user) => user,
                None => continue,
            };
            for name in user.channels.drain() {
                let empty = match self.channels.get_mut(u(&name)) {
                    Some(channel) => channel.remove_member(uid),
                    None => false,
                };
                if empty {
                    self.channels.remove(u(&name));
                }
            }
            user.extensions.dispose_all(&self.ext_registry);
        }
    }

    // Readiness handling

    fn client_readable(&mut self, uid: Uid) {
        let failed = {
            let user = match self.users.get_mut(uid) {
                Some(user) if !user.quitting => user,
                _ => return,
            };
            let recvq_max = user.class.recvq_max;
            user.conn.fill_recvq(recvq_max).err()
        };
        if let Some(err) = failed {
            self.quit_user(uid, err.quit_reason(), None);
            return;
        }
        self.drain_lines(uid);
    }

    fn client_writable(&mut self, uid: Uid) {
        let result = {
            let user = match self.users.get_mut(uid) {
                Some(user) if !user.quitting => user,
                _ => return,
            };
            user.conn.flush()
        };
        match result {
            // Drained; drop write interest until something is queued again.
            Ok(true) => {
                let user = match self.users.get_mut(uid) {
                    Some(user) => user,
                    None => return,
                };
                if let Some(token) = user.conn.token() {
                    let mask = self.engine.mask(token).unwrap_or(0)
                        & !(engine::WANT_FAST_WRITE | engine::WANT_SINGLE_WRITE);
                    let engine = &mut self.engine;
                    if let Some(stream) = user.conn.source() {
                        let _ = engine.set_event(token, stream, mask);
                    }
                }
            }
            Ok(false) => {
                // The socket pushed back; note it and wait for the edge.
                let user = match self.users.get_mut(uid) {
                    Some(user) => user,
                    None => return,
                };
                if let Some(token) = user.conn.token() {
                    let mask = self.engine.mask(token).unwrap_or(0) | engine::WRITE_WILL_BLOCK;
                    let engine = &mut self.engine;
                    if let Some(stream) = user.conn.source() {
                        let _ = engine.set_event(token, stream, mask);
                    }
                }
            }
            Err(err) => self.quit_user(uid, err.quit_reason(), None),
        }
    }

    /// Peels complete lines off the receive queue and dispatches them,
    /// stopping while the user's flood penalty is over its class cap.
    /// Held-back lines stay queued; the background sweep re-invokes this
    /// after decay.
    pub(crate) fn drain_lines(&mut self, uid: Uid) {
        loop {
            let line = {
                let user = match self.users.get_mut(uid) {
                    Some(user) if !user.quitting => user,
                    _ => return,
                };
                if user.penalty >= user.class.penalty_cap && !user.exempt {
                    return;
                }
                user.conn.next_line()
            };
            match line {
                Some(Some(line)) => self.handle_line(uid, &line),
                Some(None) => {}
                None => return,
            }
        }
    }

    // Command dispatch

    pub(crate) fn handle_line(&mut self, uid: Uid, line: &str) {
        let (nick, registered, oper) = match self.users.get(uid) {
            Some(user) if !user.quitting => (
                if user.is_registered() { user.nick().to_owned() } else { "*".to_owned() },
                user.is_registered(),
                user.oper,
            ),
            _ => return,
        };
        let mut ctx = CommandContext::new(uid, self.domain.clone(), nick);

        if line.len() > MESSAGE_LENGTH {
            ctx.reply(rpl::ERR_INPUTTOOLONG).trailing_param(lines::INPUT_TOO_LONG);
            self.flush_ctx(ctx);
            return;
        }

        let msg = match Message::parse(line) {
            Some(msg) => msg,
            None => return,
        };

        let command = match msg.command {
            Ok(command) => command,
            Err(unknown) => {
                if registered {
                    ctx.reply(rpl::ERR_UNKNOWNCOMMAND)
                        .param(unknown)
                        .trailing_param(lines::UNKNOWN_COMMAND);
                } else {
                    ctx.reply(rpl::ERR_NOTREGISTERED).trailing_param(lines::NOT_REGISTERED);
                }
                self.flush_ctx(ctx);
                return;
            }
        };

        if !msg.has_enough_params() {
            match command {
                Command::Nick | Command::Whois => {
                    ctx.reply(rpl::ERR_NONICKNAMEGIVEN)
                        .trailing_param(lines::NO_NICKNAME_GIVEN);
                }
                Command::PrivMsg | Command::Notice if msg.num_params == 0 => {
                    ctx.reply(rpl::ERR_NORECIPIENT).trailing_param(lines::NO_RECIPIENT);
                }
                Command::PrivMsg | Command::Notice if msg.num_params == 1 => {
                    ctx.reply(rpl::ERR_NOTEXTTOSEND).trailing_param(lines::NO_TEXT_TO_SEND);
                }
                _ => {
                    ctx.reply(rpl::ERR_NEEDMOREPARAMS)
                        .param(command.as_str())
                        .trailing_param(lines::NEED_MORE_PARAMS);
                }
            }
            self.flush_ctx(ctx);
            return;
        }

        match command.access() {
            Access::Unregistered => {}
            Access::Registered | Access::Oper if !registered => {
                ctx.reply(rpl::ERR_NOTREGISTERED).trailing_param(lines::NOT_REGISTERED);
                self.flush_ctx(ctx);
                return;
            }
            Access::Oper if !oper => {
                ctx.reply(rpl::ERR_NOPRIVILEGES).trailing_param(lines::NO_PRIVILEGES);
                self.flush_ctx(ctx);
                return;
            }
            _ => {}
        }

        let suppressed = {
            let users = &self.users;
            let user = users.get(uid).expect("checked above");
            self.bus
                .first_result(Hook::OnPreCommand, |m| m.on_pre_command(user, &msg))
                == ModResult::Deny
        };
        if suppressed {
            log::debug!("{}: {} suppressed by a module", uid, command);
            return;
        }

        let ps = msg.params;
        let n = msg.num_params;
        log::debug!("{}: {} {:?}", uid, command, &ps[..n]);
        let cmd_result = match command {
            Command::Admin => self.cmd_admin(&mut ctx),
            Command::Away => self.cmd_away(&mut ctx, ps[0]),
            Command::Eline => self.cmd_xline(&mut ctx, XLineKind::E, &ps[..n]),
            Command::Gline => self.cmd_xline(&mut ctx, XLineKind::G, &ps[..n]),
            Command::Info => self.cmd_info(&mut ctx),
            Command::Invite => self.cmd_invite(&mut ctx, ps[0], ps[1]),
            Command::Join => self.cmd_join(&mut ctx, ps[0], ps[1]),
            Command::Kick => self.cmd_kick(&mut ctx, ps[0], ps[1], ps[2]),
            Command::Kill => self.cmd_kill(&mut ctx, ps[0], ps[1]),
            Command::Kline => self.cmd_xline(&mut ctx, XLineKind::K, &ps[..n]),
            Command::List => self.cmd_list(&mut ctx, ps[0]),
            Command::Lusers => self.cmd_lusers(&mut ctx),
            Command::Mode => self.cmd_mode(&mut ctx, ps[0], ps[1], &ps[2..n.max(2)]),
            Command::Motd => self.cmd_motd(&mut ctx),
            Command::Names => self.cmd_names(&mut ctx, ps[0]),
            Command::Nick => self.cmd_nick(&mut ctx, ps[0]),
            Command::Notice => self.cmd_privmsg_notice(&mut ctx, Command::Notice, ps[0], ps[1]),
            Command::Oper => self.cmd_oper(&mut ctx, ps[0], ps[1]),
            Command::Part => self.cmd_part(&mut ctx, ps[0], ps[1]),
            Command::Pass => self.cmd_pass(&mut ctx, ps[0]),
            Command::Ping => self.cmd_ping(&mut ctx, ps[0]),
            Command::Pong => self.cmd_pong(&mut ctx, ps[0]),
            Command::PrivMsg => self.cmd_privmsg_notice(&mut ctx, Command::PrivMsg, ps[0], ps[1]),
            Command::Qline => self.cmd_xline(&mut ctx, XLineKind::Q, &ps[..n]),
            Command::Quit => self.cmd_quit(&mut ctx, ps[0]),
            Command::Rehash => self.cmd_rehash(&mut ctx),
            Command::Stats => self.cmd_stats(&mut ctx, ps[0]),
            Command::Time => self.cmd_time(&mut ctx),
            Command::Topic => {
                self.cmd_topic(&mut ctx, ps[0], if n == 1 { None } else { Some(ps[1]) })
            }
            Command::User => self.cmd_user(&mut ctx, ps[0], ps[3]),
            Command::Version => self.cmd_version(&mut ctx),
            Command::Who => self.cmd_who(&mut ctx, ps[0]),
            Command::Whois => self.cmd_whois(&mut ctx, ps[0]),
            Command::Zline => self.cmd_xline(&mut ctx, XLineKind::Z, &ps[..n]),
            Command::Reply(_) => Ok(()),
        };

        self.flush_ctx(ctx);

        if cmd_result.is_ok() {
            let over_cap = {
                match self.users.get_mut(uid) {
                    Some(user) if !user.quitting => {
                        user.penalty += command.penalty();
                        user.penalty > user.class.penalty_cap && !user.exempt
                    }
                    _ => return,
                }
            };
            if over_cap {
                self.quit_user(uid, "Excess Flood", None);
                return;
            }
            let users = &self.users;
            if let Some(user) = users.get(uid) {
                self.bus
                    .broadcast(Hook::OnPostCommand, |m| m.on_post_command(user, command));
            }
        }
    }

    fn flush_ctx(&mut self, ctx: CommandContext) {
        if !ctx.rb.is_empty() {
            self.send(ctx.uid, MessageQueueItem::from(ctx.rb));
        }
    }

    // Send utilities

    /// Queues an outbound chunk on one user and arms write readiness.
    pub(crate) fn send(&mut self, uid: Uid, msg: MessageQueueItem) {
        let overflowed = {
            let user = match self.users.get_mut(uid) {
                Some(user) if !user.quitting => user,
                _ => return,
            };
            let sendq_max = user.class.sendq_max;
            match user.conn.queue(msg, sendq_max) {
                Ok(needs_arming) => {
                    if needs_arming {
                        if let Some(token) = user.conn.token() {
                            let mask =
                                self.engine.mask(token).unwrap_or(0) | engine::WANT_FAST_WRITE;
                            let engine = &mut self.engine;
                            if let Some(stream) = user.conn.source() {
                                let _ = engine.set_event(token, stream, mask);
                            }
                        }
                    }
                    false
                }
                Err(_) => true,
            }
        };
        if overflowed {
            self.quit_user(uid, ConnError::SendqExceeded.quit_reason(), None);
        }
    }

    /// Sends to every user sharing a channel with `uid`, at most once each.
    pub(crate) fn broadcast_neighbors(
        &mut self,
        uid: Uid,
        msg: MessageQueueItem,
        include_self: bool,
    ) {
        let stamp = self.users.next_stamp();
        let channels: Vec<String> = match self.users.get(uid) {
            Some(user) => user.channels.iter().cloned().collect(),
            None => return,
        };
        let mut targets = Vec::new();
        for name in channels {
            let channel = match self.channels.get(u(&name)) {
                Some(channel) => channel,
                None => continue,
            };
            for &member in channel.members.keys() {
                if member == uid && !include_self {
                    continue;
                }
                if let Some(target) = self.users.get_mut(member) {
                    if target.already_sent != stamp {
                        target.already_sent = stamp;
                        targets.push(member);
                    }
                }
            }
        }
        if include_self && targets.iter().all(|&t| t != uid) && self.users.get(uid).is_some() {
            targets.push(uid);
        }
        for target in targets {
            self.send(target, msg.clone());
        }
    }

    /// Sends to every member of one channel.
    pub(crate) fn broadcast_channel(
        &mut self,
        name: &str,
        msg: MessageQueueItem,
        skip: Option<Uid>,
    ) {
        let members: Vec<Uid> = match self.channels.get(u(name)) {
            Some(channel) => channel.members.keys().copied().collect(),
            None => return,
        };
        for member in members {
            if Some(member) == skip {
                continue;
            }
            self.send(member, msg.clone());
        }
    }

    /// `:server NOTICE <nick> :*** <text>` to one user.
    pub(crate) fn server_notice(&mut self, uid: Uid, text: &str) {
        let nick = match self.users.get(uid) {
            Some(user) => user.nick().to_owned(),
            None => return,
        };
        let mut buf = Buffer::new();
        buf.message(&self.domain, Command::Notice)
            .param(&nick)
            .trailing_param(text);
        self.send(uid, MessageQueueItem::from(buf));
    }

    /// Server notice to every oper subscribed to the given notice mask.
    pub(crate) fn snomask_notice(&mut self, mask: char, text: &str) {
        let targets: Vec<Uid> = self
            .users
            .iter()
            .filter(|user| {
                !user.quitting && user.oper && user.server_notices && user.snomasks.contains(&mask)
            })
            .map(|user| user.uid())
            .collect();
        log::info!("*** {}", text);
        for target in targets {
            let nick = match self.users.get(target) {
                Some(user) => user.nick().to_owned(),
                None => continue,
            };
            let mut buf = Buffer::new();
            buf.message(&self.domain, Command::Notice)
                .param(&nick)
                .trailing_param(&format!("*** {}", text));
            self.send(target, MessageQueueItem::from(buf));
        }
    }

    // Background work

    /// The once-per-second sweep over local users: flood decay, ping
    /// rounds, registration promotion and registration timeouts.
    pub(crate) fn background_tick(&mut self, now: u64) {
        enum Action {
            None,
            PingTimeout(u64),
            SendPing,
            Promote,
            RegTimeout,
        }

        for uid in self.users.local_uids() {
            let (action, redrain) = {
                let user = match self.users.get_mut(uid) {
                    Some(user) => user,
                    None => continue,
                };
                if user.quitting {
                    continue;
                }

                user.penalty = user.penalty.saturating_sub(user.class.command_rate);
                let redrain = user.conn.has_pending_line();

                let action = match user.registered {
                    RegState::All if now > user.nping => {
                        if !user.lastping {
                            Action::PingTimeout(now - (user.nping - user.class.ping_interval))
                        } else {
                            user.lastping = false;
                            user.nping = now + user.class.ping_interval;
                            Action::SendPing
                        }
                    }
                    RegState::NickUser => Action::Promote,
                    _ => Action::None,
                };

                let timed_out = user.registered != RegState::All
                    && !matches!(action, Action::Promote)
                    && now > user.signon + user.class.reg_timeout;
                (if timed_out { Action::RegTimeout } else { action }, redrain)
            };

            match action {
                Action::None => {}
                Action::PingTimeout(elapsed) => {
                    self.quit_user(uid, &lines::ping_timeout(elapsed), None);
                    continue;
                }
                Action::SendPing => {
                    let mut buf = Buffer::new();
                    buf.message("", Command::Ping).trailing_param(&self.domain);
                    self.send(uid, MessageQueueItem::from(buf));
                }
                Action::Promote => {
                    let ready = {
                        let users = &self.users;
                        let user = users.get(uid).expect("walked above");
                        UserManager::all_modules_report_ready(&mut self.bus, user)
                    };
                    if ready {
                        self.full_connect(uid, now);
                        continue;
                    }
                    // Not ready; the registration timeout still applies.
                    let timed_out = self.users.get(uid).map_or(false, |user| {
                        now > user.signon + user.class.reg_timeout
                    });
                    if timed_out {
                        self.quit_user(uid, "Registration timeout", None);
                    }
                    continue;
                }
                Action::RegTimeout => {
                    self.quit_user(uid, "Registration timeout", None);
                    continue;
                }
            }

            if redrain {
                self.drain_lines(uid);
            }
        }
    }

    fn run_timers(&mut self, now: u64) {
        while let Some(&Reverse((deadline, timer))) = self.timers.peek() {
            if deadline > now {
                break;
            }
            self.timers.pop();
            match timer {
                Timer::ExpireLines => {
                    for line in self.xlines.expire(now) {
                        self.snomask_notice('x', &format!(
                            "{}-line on {} has expired",
                            line.kind.as_char(),
                            line.mask
                        ));
                    }
                }
                Timer::SweepBanCache => self.bancache.sweep(now),
                Timer::GarbageCollect => self.users.garbage_collect(),
            }
            self.timers.push(Reverse((now + timer.period(), timer)));
        }
    }

    /// The transition from `NickUser` to `All`: password and ban checks,
    /// then the welcome numerics.
    pub(crate) fn full_connect(&mut self, uid: Uid, now: u64) {
        let (given_password, exempt) = {
            let user = self.users.get(uid).expect("promoted from tick");
            (user.has_given_password, user.exempt)
        };
        // PASS is compared against the configured password on receipt; here
        // only its presence matters.
        if self.config.password.is_some() && !given_password {
            self.quit_user(uid, "Invalid password", None);
            return;
        }

        if !exempt {
            for kind in [XLineKind::G, XLineKind::K] {
                let matched = {
                    let user = self.users.get(uid).expect("promoted from tick");
                    self.xlines.matches(kind, user).cloned()
                };
                if let Some(line) = matched {
                    self.apply_line(&line, uid);
                    return;
                }
            }
        }

        let (nick, full_name, ip) = {
            let user = self.users.get_mut(uid).expect("promoted from tick");
            user.registered = RegState::All;
            user.lastping = true;
            user.nping = now + user.class.ping_interval;
            (
                user.nick().to_owned(),
                user.full_name().to_owned(),
                user.ip(),
            )
        };
        self.users.unregistered_count = self.users.unregistered_count.saturating_sub(1);

        let mut ctx = CommandContext::new(uid, self.domain.clone(), nick);
        self.write_welcome(&mut ctx, &full_name);

        for channel in self.config.autojoin.clone() {
            let _ = self.join_one(&mut ctx, &channel, "");
        }
        self.flush_ctx(ctx);

        self.snomask_notice('c', &format!("Client connecting: {} ({})", full_name, ip));
    }

    // Reply helpers shared by handlers

    fn write_i_support(&self, ctx: &mut CommandContext) {
        use selkie_tokens::mode;

        ctx.reply(rpl::ISUPPORT)
            .param(&format!("CASEMAPPING={}", self.config.casemapping.as_str()))
            .param(&format!("CHANNELLEN={}", MAX_CHANNEL_NAME_LENGTH))
            .param("CHANTYPES=#&")
            .param(mode::CHANMODES)
            .param("EXCEPTS")
            .param("INVEX")
            .param(&format!("MODES={}", mode::MAX_MODES))
            .param(&format!("MAXTARGETS={}", self.config.max_targets))
            .param(&format!("NICKLEN={}", MAX_NICKNAME_LENGTH))
            .param("PREFIX=(ohv)@%+")
            .param(&format!("TOPICLEN={}", MAX_TOPIC_LENGTH))
            .trailing_param(lines::I_SUPPORT);
    }

    fn write_lusers(&self, ctx: &mut CommandContext) {
        lines::luser_client(
            ctx.reply(rpl::LUSERCLIENT),
            self.users.registered_count(),
            self.users.unregistered_count,
        );
        let opers = self.users.oper_count();
        if opers != 0 {
            ctx.reply(rpl::LUSEROP)
                .param(&opers.to_string())
                .trailing_param("operator(s) online");
        }
        if self.users.unregistered_count != 0 {
            ctx.reply(rpl::LUSERUNKNOWN)
                .param(&self.users.unregistered_count.to_string())
                .trailing_param("unknown connection(s)");
        }
        if !self.channels.is_empty() {
            ctx.reply(rpl::LUSERCHANNELS)
                .param(&self.channels.values().filter(|c| !c.secret).count().to_string())
                .trailing_param("channels formed");
        }
        lines::luser_me(ctx.reply(rpl::LUSERME), self.users.local_len());
    }

    fn write_motd(&self, ctx: &mut CommandContext) {
        if let Some(ref motd) = self.motd {
            {
                let mut msg = ctx.reply(rpl::MOTDSTART);
                let trailing = msg.raw_trailing_param();
                trailing.push_str("- ");
                trailing.push_str(&self.domain);
                trailing.push_str(" Message of the day - ");
            }
            for line in motd.lines() {
                let mut msg = ctx.reply(rpl::MOTD);
                let trailing = msg.raw_trailing_param();
                trailing.push_str("- ");
                trailing.push_str(line);
            }
            ctx.reply(rpl::ENDOFMOTD).trailing_param(lines::END_OF_MOTD);
        } else {
            ctx.reply(rpl::ERR_NOMOTD).trailing_param(lines::NO_MOTD);
        }
    }

    /// Sends the list of nicknames in the channel `name`.
    fn write_names(&self, ctx: &mut CommandContext, name: &str) {
        if let Some(channel) = self.channels.get(u(name)) {
            if channel.secret && !channel.members.contains_key(&ctx.uid) {
                return;
            }
            if !channel.members.is_empty() {
                let mut message = ctx.reply(rpl::NAMREPLY).param(channel.symbol()).param(name);
                let trailing = message.raw_trailing_param();
                for (member, modes) in &channel.members {
                    if let Some(user) = self.users.get(*member) {
                        if let Some(s) = modes.symbol() {
                            trailing.push(s);
                        }
                        trailing.push_str(user.nick());
                        trailing.push(' ');
                    }
                }
                trailing.pop(); // Remove last space
            }
        }
        ctx.reply(rpl::ENDOFNAMES).param(name).trailing_param(lines::END_OF_NAMES);
    }

    /// Sends the topic of the channel `name`.
    fn write_topic(&self, ctx: &mut CommandContext, name: &str) {
        let channel = &self.channels[u(name)];
        if let Some(ref topic) = channel.topic {
            ctx.reply(rpl::TOPIC).param(name).trailing_param(&topic.text);
            ctx.reply(rpl::TOPICWHOTIME)
                .param(name)
                .param(&topic.set_by)
                .param(&topic.set_at.to_string());
        } else {
            ctx.reply(rpl::NOTOPIC).param(name).trailing_param(lines::NO_TOPIC);
        }
    }

    /// Sends welcome messages.  Called when a client completes registration.
    fn write_welcome(&self, ctx: &mut CommandContext, full_name: &str) {
        use selkie_tokens::mode;

        lines::welcome(ctx.reply(rpl::WELCOME), full_name);
        lines::your_host(ctx.reply(rpl::YOURHOST), &self.domain, server_version!());
        lines::created(ctx.reply(rpl::CREATED), &self.created_at);
        ctx.reply(rpl::MYINFO)
            .param(&self.domain)
            .param(server_version!())
            .param(mode::USER_MODES)
            .param(mode::SIMPLE_CHAN_MODES)
            .param(mode::EXTENDED_CHAN_MODES);
        self.write_i_support(ctx);
        self.write_lusers(ctx);
        self.write_motd(ctx);
    }
}

/// Truncates to at most `max` bytes without splitting a character.
fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_owned();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_owned()
}

/// Returns `Ok(channel_key)` when `name` is an existing channel.  Otherwise
/// sends ERR_NOSUCHCHANNEL and returns `Err(())`.
fn find_channel<'a>(
    ctx: &mut CommandContext,
    channels: &'a ChannelMap,
    name: &str,
) -> Result<&'a Channel, ()> {
    match channels.get(u(name)) {
        Some(channel) => Ok(channel),
        None => {
            log::debug!("{}:         no such channel", ctx.uid);
            ctx.reply(rpl::ERR_NOSUCHCHANNEL)
                .param(name)
                .trailing_param(lines::NO_SUCH_CHANNEL);
            Err(())
        }
    }
}

/// Returns `Ok(member_modes)` when the issuing user is on `channel`.
/// Otherwise sends ERR_NOTONCHANNEL and returns `Err(())`.
fn find_member(
    ctx: &mut CommandContext,
    channel: &Channel,
    channel_name: &str,
) -> Result<crate::channel::MemberModes, ()> {
    match channel.members.get(&ctx.uid) {
        Some(modes) => Ok(*modes),
        None => {
            log::debug!("{}:         not on channel", ctx.uid);
            ctx.reply(rpl::ERR_NOTONCHANNEL)
                .param(channel_name)
                .trailing_param(lines::NOT_ON_CHANNEL);
            Err(())
        }
    }
}

/// Returns `Ok(uid)` when a registered user has the nickname `nick`.
/// Otherwise sends ERR_NOSUCHNICK and returns `Err(())`.
fn find_nick(ctx: &mut CommandContext, users: &UserManager, nick: &str) -> Result<Uid, ()> {
    match users.by_nick(nick) {
        Some(uid) if users.get(uid).map_or(false, |u| u.is_registered() && !u.quitting) => Ok(uid),
        _ => {
            log::debug!("{}:         nick doesn't exist", ctx.uid);
            ctx.reply(rpl::ERR_NOSUCHNICK)
                .param(nick)
                .trailing_param(lines::NO_SUCH_NICK);
            Err(())
        }
    }
}

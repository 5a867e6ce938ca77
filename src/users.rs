//! The user manager: ownership and indexing of every connected user.
//!
//! Users live in one arena keyed by [`Uid`] (the uuid list); a second index
//! maps the current nickname, case-folded, to the uid (the client list).
//! Clone maps count connections per masked client address, locally and
//! network-wide.  Destruction is deferred: quitting users are pushed onto a
//! cull list that the main loop drains at the end of each dispatch cycle.

use crate::config::ConnectClass;
use crate::conn::Connection;
use crate::user::{Uid, User};
use selkie_unicase::{u, UniCase};
use std::collections::HashMap;
use std::net::{IpAddr, Ipv6Addr};
use std::rc::Rc;

/// IPv6 clone counting groups addresses by this prefix length.  IPv4
/// addresses count individually.
const IPV6_CLONE_PREFIX: usize = 64;

/// The key under which an address is clone-counted.
pub fn cidr_mask(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(v4) => IpAddr::V4(v4),
        IpAddr::V6(v6) => {
            let mut seg = v6.segments();
            for s in seg.iter_mut().skip(IPV6_CLONE_PREFIX / 16) {
                *s = 0;
            }
            IpAddr::V6(Ipv6Addr::new(
                seg[0], seg[1], seg[2], seg[3], seg[4], seg[5], seg[6], seg[7],
            ))
        }
    }
}

/// Allocates 9-character uids: the 3-character server id, then a 6-character
/// counter over `A-Z0-9`.  Never repeats within a process lifetime.
struct UidGenerator {
    sid: [u8; 3],
    counter: [u8; 6],
}

impl UidGenerator {
    fn new(sid: [u8; 3]) -> Self {
        Self {
            sid,
            counter: *b"AAAAAA",
        }
    }

    fn next(&mut self) -> Uid {
        let mut uid = [0; 9];
        uid[..3].copy_from_slice(&self.sid);
        uid[3..].copy_from_slice(&self.counter);

        // Increment rightmost-first: A..Z, then 0..9, then carry.
        for slot in self.counter.iter_mut().rev() {
            *slot = match *slot {
                b'Z' => b'0',
                b'9' => b'A',
                other => other + 1,
            };
            if *slot != b'A' {
                break;
            }
        }
        Uid::new(uid)
    }
}

pub struct UserManager {
    users: HashMap<Uid, User>,
    clientlist: HashMap<UniCase<String>, Uid>,
    /// Local users in accept order; the background sweep walks this.
    local: Vec<Uid>,
    local_clones: HashMap<IpAddr, u32>,
    global_clones: HashMap<IpAddr, u32>,
    pub unregistered_count: usize,
    culls: Vec<Uid>,
    uid_gen: UidGenerator,
    /// Current broadcast-dedup stamp generation.
    already_sent_id: u64,
}

impl UserManager {
    pub fn new(sid: [u8; 3]) -> Self {
        Self {
            users: HashMap::new(),
            clientlist: HashMap::new(),
            local: Vec::new(),
            local_clones: HashMap::new(),
            global_clones: HashMap::new(),
            unregistered_count: 0,
            culls: Vec::new(),
            uid_gen: UidGenerator::new(sid),
            already_sent_id: 0,
        }
    }

    /// Creates a user for an accepted connection and indexes it.
    ///
    /// The user's default nick is its uid.  Clone counters are bumped here
    /// and mirrored down in [`UserManager::remove_from_lists`].
    pub fn add(&mut self, conn: Connection, class: Rc<ConnectClass>, now: u64) -> Uid {
        let uid = self.uid_gen.next();
        let user = User::new(uid, conn, class, now);
        debug_assert!(!self.users.contains_key(&uid), "duplicate uid allocated");

        self.clientlist.insert(UniCase(uid.to_string()), uid);
        self.unregistered_count += 1;
        self.add_local_clone(user.ip());
        self.add_global_clone(user.ip());
        self.local.push(uid);
        self.users.insert(uid, user);
        uid
    }

    pub fn get(&self, uid: Uid) -> Option<&User> {
        self.users.get(&uid)
    }

    pub fn get_mut(&mut self, uid: Uid) -> Option<&mut User> {
        self.users.get_mut(&uid)
    }

    /// Looks a user up by nickname, through the active case map.
    pub fn by_nick(&self, nick: &str) -> Option<Uid> {
        self.clientlist.get(u(nick)).copied()
    }

    /// Re-keys the client list for a nick change.
    pub fn change_nick(&mut self, uid: Uid, new_nick: &str) {
        let user = match self.users.get_mut(&uid) {
            Some(user) => user,
            None => return,
        };
        let old = user.nick().to_owned();
        user.set_nick(new_nick);
        self.clientlist.remove(u(&old));
        self.clientlist.insert(UniCase(new_nick.to_owned()), uid);
    }

    /// Marks a user as quitting.  Returns false when it already was, which
    /// makes the whole quit path idempotent.
    pub fn begin_quit(&mut self, uid: Uid) -> bool {
        match self.users.get_mut(&uid) {
            Some(user) if !user.quitting => {
                user.quitting = true;
                true
            }
            Some(user) => {
                log::info!("ERROR: tried to quit quitting user: {}", user.nick());
                false
            }
            None => false,
        }
    }

    pub fn enqueue_cull(&mut self, uid: Uid) {
        self.culls.push(uid);
    }

    /// Removes the user from the client list and the clone maps.
    ///
    /// Called from inside the quit path; the arena entry itself lives until
    /// the cull at the end of the dispatch cycle.
    pub fn remove_from_lists(&mut self, uid: Uid) {
        let (nick, ip) = match self.users.get(&uid) {
            Some(user) => (user.nick().to_owned(), user.ip()),
            None => return,
        };
        if self.clientlist.remove(u(&nick)).is_none() {
            log::info!("ERROR: nick not found in client list, cannot remove: {}", nick);
        }
        self.remove_clone_counts(ip);
    }

    /// Takes the pending cull list; the server finalizes each entry.
    pub fn take_culls(&mut self) -> Vec<Uid> {
        std::mem::take(&mut self.culls)
    }

    /// Drops a culled user from the arena, returning it for last rites.
    pub fn remove(&mut self, uid: Uid) -> Option<User> {
        self.local.retain(|&other| other != uid);
        self.users.remove(&uid)
    }

    pub fn add_local_clone(&mut self, ip: IpAddr) {
        *self.local_clones.entry(cidr_mask(ip)).or_insert(0) += 1;
    }

    pub fn add_global_clone(&mut self, ip: IpAddr) {
        *self.global_clones.entry(cidr_mask(ip)).or_insert(0) += 1;
    }

    pub fn local_clone_count(&self, ip: IpAddr) -> u32 {
        self.local_clones.get(&cidr_mask(ip)).copied().unwrap_or(0)
    }

    pub fn global_clone_count(&self, ip: IpAddr) -> u32 {
        self.global_clones.get(&cidr_mask(ip)).copied().unwrap_or(0)
    }

    /// Mirrors the increments of [`UserManager::add`]; zeroed entries are
    /// erased so the maps stay bounded by the number of distinct addresses.
    fn remove_clone_counts(&mut self, ip: IpAddr) {
        let key = cidr_mask(ip);
        for clones in [&mut self.local_clones, &mut self.global_clones] {
            if let Some(count) = clones.get_mut(&key) {
                *count -= 1;
                if *count == 0 {
                    clones.remove(&key);
                }
            }
        }
    }

    /// Snapshot of local users in stable (accept) order.
    pub fn local_uids(&self) -> Vec<Uid> {
        self.local.clone()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn local_len(&self) -> usize {
        self.local.len()
    }

    pub fn registered_count(&self) -> usize {
        self.users.values().filter(|u| u.is_registered()).count()
    }

    pub fn oper_count(&self) -> usize {
        self.users.values().filter(|u| u.oper).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = &User> {
        self.users.values()
    }

    /// A fresh broadcast-dedup stamp.
    pub fn next_stamp(&mut self) -> u64 {
        self.already_sent_id += 1;
        self.already_sent_id
    }

    /// Resets the dedup stamp generation so it cannot wrap around and starve
    /// a broadcast.
    pub fn garbage_collect(&mut self) {
        self.already_sent_id = 0;
        for user in self.users.values_mut() {
            user.already_sent = 0;
        }
    }

    /// First-result over `OnCheckReady`; a user is promoted to fully
    /// registered only when every module passes.
    pub fn all_modules_report_ready(bus: &mut crate::hooks::EventBus, user: &User) -> bool {
        bus.first_result(crate::hooks::Hook::OnCheckReady, |m| m.on_check_ready(user))
            == crate::hooks::ModResult::Passthru
    }

    #[cfg(test)]
    pub(crate) fn clone_sums(&self) -> (u32, u32) {
        (
            self.local_clones.values().sum(),
            self.global_clones.values().sum(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conn::Transport;

    fn manager() -> UserManager {
        UserManager::new(*b"001")
    }

    fn conn(port: u16) -> Connection {
        let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
        Connection::new(Transport::Detached, addr, None)
    }

    fn class() -> Rc<ConnectClass> {
        Rc::new(ConnectClass::default())
    }

    #[test]
    fn test_uid_generation_unique() {
        let mut gen = UidGenerator::new(*b"001");
        let mut seen = std::collections::HashSet::new();
        for _ in 0..10_000 {
            let uid = gen.next();
            assert_eq!(uid.as_str().len(), 9);
            assert!(uid.as_str().starts_with("001"));
            assert!(seen.insert(uid), "uid {} repeated", uid);
        }
    }

    #[test]
    fn test_uid_counter_rolls() {
        let mut gen = UidGenerator::new(*b"001");
        assert_eq!(gen.next().as_str(), "001AAAAAA");
        assert_eq!(gen.next().as_str(), "001AAAAAB");
        gen.counter = *b"AAAAAZ";
        assert_eq!(gen.next().as_str(), "001AAAAAZ");
        assert_eq!(gen.next().as_str(), "001AAAAA0");
        gen.counter = *b"AAAAA9";
        assert_eq!(gen.next().as_str(), "001AAAAA9");
        assert_eq!(gen.next().as_str(), "001AAAABA");
    }

    #[test]
    fn test_indexes_and_clone_accounting() {
        let mut users = manager();
        let a = users.add(conn(1000), class(), 0);
        let b = users.add(conn(1001), class(), 0);

        // Both indexed under their uid as initial nick.
        assert_eq!(users.by_nick(a.as_str()), Some(a));
        assert_eq!(users.by_nick(b.as_str()), Some(b));
        assert_eq!(users.clone_sums(), (2, 2));

        users.change_nick(a, "alice");
        assert_eq!(users.by_nick("ALICE"), Some(a));
        assert_eq!(users.by_nick(a.as_str()), None);

        // Quit path bookkeeping.
        assert!(users.begin_quit(a));
        assert!(!users.begin_quit(a));
        users.remove_from_lists(a);
        users.enqueue_cull(a);
        assert_eq!(users.by_nick("alice"), None);
        assert_eq!(users.clone_sums(), (1, 1));

        for uid in users.take_culls() {
            users.remove(uid);
        }
        assert_eq!(users.len(), 1);
        assert_eq!(users.local_len(), 1);
        // The sums still match the user counts.
        assert_eq!(users.clone_sums(), (1, 1));
    }

    #[test]
    fn test_ipv6_clone_mask() {
        let a: IpAddr = "2001:db8:1:2:3::4".parse().unwrap();
        let b: IpAddr = "2001:db8:1:2:ffff::1".parse().unwrap();
        let c: IpAddr = "2001:db8:1:3::1".parse().unwrap();
        assert_eq!(cidr_mask(a), cidr_mask(b));
        assert_ne!(cidr_mask(a), cidr_mask(c));
    }
}

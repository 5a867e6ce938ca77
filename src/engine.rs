//! The socket engine.
//!
//! A thin readiness multiplexer around `mio::Poll` (epoll, kqueue or the
//! platform equivalent).  Registrations carry an event mask in the style of
//! the classic ircd engines:
//!
//! - `WANT_FAST_*` is edge-triggered: the caller promises to drain the socket
//!   until `WouldBlock` after every event, and flags the fact with the
//!   matching `*_WILL_BLOCK` bit.  The engine clears the bit when it next
//!   reports readiness.
//! - `WANT_POLL_*` is level-triggered and must be re-asserted each cycle.
//! - `WANT_SINGLE_WRITE` is a one-shot write; the engine clears it after the
//!   event fires.
//!
//! Registrations are identified by a generation-stamped [`RegToken`], so a
//! slot that is dropped and reused mid-batch (a user quitting from inside a
//! handler) invalidates the remaining events for the old occupant.

use mio::event::Source;
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::time::Duration;

pub const WANT_POLL_READ: u8 = 0x01;
pub const WANT_FAST_READ: u8 = 0x02;
pub const WANT_POLL_WRITE: u8 = 0x04;
pub const WANT_FAST_WRITE: u8 = 0x08;
pub const WANT_SINGLE_WRITE: u8 = 0x10;
pub const READ_WILL_BLOCK: u8 = 0x20;
pub const WRITE_WILL_BLOCK: u8 = 0x40;

const READ_WANTS: u8 = WANT_POLL_READ | WANT_FAST_READ;
const WRITE_WANTS: u8 = WANT_POLL_WRITE | WANT_FAST_WRITE | WANT_SINGLE_WRITE;

/// Identity of one registration.
///
/// The generation distinguishes successive occupants of the same slot: a
/// token taken before a `del` never matches again.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RegToken {
    index: usize,
    generation: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Read,
    Write,
    Error,
}

struct Slot<T> {
    tag: T,
    mask: u8,
    generation: u32,
}

/// Returns the kernel-visible part of a mask as a mio interest.
fn kernel_interest(mask: u8) -> Option<Interest> {
    match (mask & READ_WANTS != 0, mask & WRITE_WANTS != 0) {
        (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
        (true, false) => Some(Interest::READABLE),
        (false, true) => Some(Interest::WRITABLE),
        (false, false) => None,
    }
}

pub struct SocketEngine<T> {
    poll: Poll,
    events: Events,
    slots: Vec<Option<Slot<T>>>,
    free: Vec<usize>,
    capacity: usize,
    next_generation: u32,
    total_events: u64,
}

impl<T: Copy> SocketEngine<T> {
    /// Creates the engine, with room for at most `capacity` registrations.
    ///
    /// Failure here is fatal to the caller: there is no server without a
    /// multiplexer.
    pub fn new(capacity: usize) -> io::Result<Self> {
        Ok(Self {
            poll: Poll::new()?,
            events: Events::with_capacity(64),
            slots: Vec::new(),
            free: Vec::new(),
            capacity,
            next_generation: 0,
            total_events: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn total_events(&self) -> u64 {
        self.total_events
    }

    /// Registers `source` with the given event mask and returns its token,
    /// or `None` when the engine is full.
    pub fn add(&mut self, source: &mut dyn Source, tag: T, mask: u8) -> io::Result<Option<RegToken>> {
        let index = match self.free.pop() {
            Some(index) => index,
            None if self.slots.len() < self.capacity => {
                self.slots.push(None);
                self.slots.len() - 1
            }
            None => return Ok(None),
        };

        let interest = kernel_interest(mask).unwrap_or(Interest::READABLE);
        if let Err(err) = self.poll.registry().register(source, Token(index), interest) {
            self.free.push(index);
            return Err(err);
        }

        self.next_generation = self.next_generation.wrapping_add(1);
        let generation = self.next_generation;
        self.slots[index] = Some(Slot { tag, mask, generation });
        log::debug!("engine: new registration: {}", index);
        Ok(Some(RegToken { index, generation }))
    }

    /// Whether `token` still refers to a live registration.
    pub fn is_current(&self, token: RegToken) -> bool {
        matches!(self.slots.get(token.index),
                 Some(Some(slot)) if slot.generation == token.generation)
    }

    pub fn mask(&self, token: RegToken) -> Option<u8> {
        match self.slots.get(token.index) {
            Some(Some(slot)) if slot.generation == token.generation => Some(slot.mask),
            _ => None,
        }
    }

    /// Replaces the event mask of a registration.
    ///
    /// The kernel is re-armed only when the kernel-visible subset of the
    /// mask changed; moving internal flags around is a cheap no-op.
    pub fn set_event(
        &mut self,
        token: RegToken,
        source: &mut dyn Source,
        new_mask: u8,
    ) -> io::Result<()> {
        let slot = match self.slots.get_mut(token.index) {
            Some(Some(slot)) if slot.generation == token.generation => slot,
            _ => return Ok(()),
        };
        let old_interest = kernel_interest(slot.mask);
        let new_interest = kernel_interest(new_mask);
        slot.mask = new_mask;
        if old_interest != new_interest {
            let interest = new_interest.unwrap_or(Interest::READABLE);
            self.poll.registry().reregister(source, Token(token.index), interest)?;
        }
        Ok(())
    }

    /// Removes a registration.
    ///
    /// After this returns, no event for `token` will be delivered, including
    /// events already collected in the current batch.
    pub fn del(&mut self, token: RegToken, source: &mut dyn Source) {
        match self.slots.get(token.index) {
            Some(Some(slot)) if slot.generation == token.generation => {}
            _ => return,
        }
        if let Err(err) = self.poll.registry().deregister(source) {
            log::debug!("engine: deregister of {} failed: {}", token.index, err);
        }
        self.slots[token.index] = None;
        self.free.push(token.index);
        log::debug!("engine: removed registration: {}", token.index);
    }

    /// Waits for readiness for at most `timeout` and returns the batch of
    /// events, at most one per kind per registration, READ before WRITE for
    /// the same registration.
    ///
    /// Edge/one-shot bookkeeping happens on delivery: `*_WILL_BLOCK` is
    /// cleared for the reported direction and `WANT_SINGLE_WRITE` is
    /// consumed by its event.
    pub fn dispatch(&mut self, timeout: Duration) -> Vec<(RegToken, T, EventKind)> {
        if let Err(err) = self.poll.poll(&mut self.events, Some(timeout)) {
            if err.kind() != io::ErrorKind::Interrupted {
                log::error!("engine: poll failed: {}", err);
            }
            return Vec::new();
        }

        let mut batch = Vec::with_capacity(self.events.iter().count());
        for event in self.events.iter() {
            let index = event.token().0;
            let slot = match self.slots.get_mut(index) {
                Some(Some(slot)) => slot,
                _ => continue,
            };
            let token = RegToken { index, generation: slot.generation };

            if event.is_error() {
                batch.push((token, slot.tag, EventKind::Error));
            }
            if (event.is_readable() || event.is_read_closed()) && slot.mask & READ_WANTS != 0 {
                slot.mask &= !READ_WILL_BLOCK;
                batch.push((token, slot.tag, EventKind::Read));
            }
            if event.is_writable() && slot.mask & WRITE_WANTS != 0 {
                slot.mask &= !(WRITE_WILL_BLOCK | WANT_SINGLE_WRITE);
                batch.push((token, slot.tag, EventKind::Write));
            }
        }

        self.total_events += batch.len() as u64;

        // Grow the readiness buffer when a batch fills it.
        if self.events.iter().count() == self.events.capacity() {
            self.events = Events::with_capacity(self.events.capacity() * 2);
        }

        batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::net::TcpListener;

    #[test]
    fn test_kernel_interest() {
        assert_eq!(kernel_interest(0), None);
        assert_eq!(kernel_interest(READ_WILL_BLOCK | WRITE_WILL_BLOCK), None);
        assert_eq!(kernel_interest(WANT_FAST_READ), Some(Interest::READABLE));
        assert_eq!(kernel_interest(WANT_SINGLE_WRITE), Some(Interest::WRITABLE));
        assert_eq!(
            kernel_interest(WANT_FAST_READ | WANT_FAST_WRITE),
            Some(Interest::READABLE | Interest::WRITABLE)
        );
        // Internal flags do not change the kernel-visible subset.
        assert_eq!(
            kernel_interest(WANT_FAST_READ | READ_WILL_BLOCK),
            kernel_interest(WANT_FAST_READ)
        );
    }

    #[test]
    fn test_add_del_generations() {
        let mut engine: SocketEngine<u32> = SocketEngine::new(4).unwrap();
        let mut a = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut b = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();

        let tok_a = engine.add(&mut a, 1, WANT_FAST_READ).unwrap().unwrap();
        assert!(engine.is_current(tok_a));
        assert_eq!(engine.len(), 1);

        engine.del(tok_a, &mut a);
        assert!(!engine.is_current(tok_a));
        assert_eq!(engine.len(), 0);

        // The slot is reused with a fresh generation; the old token stays
        // invalid.
        let tok_b = engine.add(&mut b, 2, WANT_FAST_READ).unwrap().unwrap();
        assert!(engine.is_current(tok_b));
        assert!(!engine.is_current(tok_a));
    }

    #[test]
    fn test_full_engine_rejects() {
        let mut engine: SocketEngine<u32> = SocketEngine::new(1).unwrap();
        let mut a = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let mut b = TcpListener::bind("127.0.0.1:0".parse().unwrap()).unwrap();

        assert!(engine.add(&mut a, 1, WANT_FAST_READ).unwrap().is_some());
        assert!(engine.add(&mut b, 2, WANT_FAST_READ).unwrap().is_none());
    }
}

// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Bidirectional message channel between two endpoints (spec §3.2 /
//! §4.3): typically a `Socket` on one side and a `Session` on the
//! other, or two sockets directly for `inproc://`. Built from a pair of
//! `YPipe`s (one per direction) plus HWM counters and the three-step
//! termination state machine. `pipepair` is the only constructor —
//! pipes always come in connected pairs, per spec §3.2 (no
//! `original_source/` counterpart: that tree never shipped a
//! `pipe.hpp`/`pipe.cpp`).

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::mailbox::Signaler;
use crate::msg::Msg;
use crate::ypipe::YPipe;

/// Pipe lifecycle state (spec §4.3 state diagram).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum State {
    Active,
    DelimiterReceived,
    WaitingForDelimiter,
    TermAckSent,
    TermReqSent1,
    TermReqSent2,
    Terminated,
}

/// Bind-side / connect-side endpoint URIs associated with a pipe, for
/// introspection (`LAST_ENDPOINT` and friends).
#[derive(Debug, Clone, Default)]
pub struct EndpointUris {
    pub bind: Option<String>,
    pub connect: Option<String>,
}

struct Shared {
    // Messages flow a_to_b when written by the "A" side, b_to_a when
    // written by "B". Each side's *outbound* queue is the other's
    // *inbound* queue.
    a_to_b: YPipe<Msg>,
    b_to_a: YPipe<Msg>,

    msgs_written_a: AtomicU64,
    msgs_written_b: AtomicU64,
    msgs_read_a: AtomicU64,
    msgs_read_b: AtomicU64,

    out_hwm_a: AtomicU32,
    out_hwm_b: AtomicU32,
    in_hwm_a: AtomicU32,
    in_hwm_b: AtomicU32,

    state: Mutex<State>,
    routing_id: Mutex<Option<Vec<u8>>>,
    endpoints: Mutex<EndpointUris>,

    // Signaled when a write makes a previously-empty queue non-empty,
    // so an idle peer living on another I/O thread's mailbox wakes up
    // (spec §4.3 "may send activate_read ... when peer was idle").
    signaler_a: Mutex<Option<Signaler>>,
    signaler_b: Mutex<Option<Signaler>>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Side {
    A,
    B,
}

/// One endpoint's view onto a shared pipe. Cheap to clone (it's an
/// `Arc` plus a one-byte discriminant); both ends of a pair may be
/// handed to different threads.
#[derive(Clone)]
pub struct Pipe {
    shared: Arc<Shared>,
    side: Side,
}

/// Builds a connected pair of pipes. `hwms` is `(out_hwm, in_hwm)` per
/// side in the order returned; a zero HWM means unlimited, matching
/// spec §3.2.
pub fn pipepair(hwms: [(u32, u32); 2]) -> (Pipe, Pipe) {
    let shared = Arc::new(Shared {
        a_to_b: YPipe::new(),
        b_to_a: YPipe::new(),
        msgs_written_a: AtomicU64::new(0),
        msgs_written_b: AtomicU64::new(0),
        msgs_read_a: AtomicU64::new(0),
        msgs_read_b: AtomicU64::new(0),
        out_hwm_a: AtomicU32::new(hwms[0].0),
        out_hwm_b: AtomicU32::new(hwms[1].0),
        in_hwm_a: AtomicU32::new(hwms[0].1),
        in_hwm_b: AtomicU32::new(hwms[1].1),
        state: Mutex::new(State::Active),
        routing_id: Mutex::new(None),
        endpoints: Mutex::new(EndpointUris::default()),
        signaler_a: Mutex::new(None),
        signaler_b: Mutex::new(None),
    });
    (
        Pipe {
            shared: shared.clone(),
            side: Side::A,
        },
        Pipe {
            shared,
            side: Side::B,
        },
    )
}

impl Pipe {
    /// Registers a signaler to wake when this side's peer writes into
    /// what was an empty queue (cross-thread `activate_read` hint).
    pub fn set_peer_wakeup(&self, signaler: Signaler) {
        let slot = match self.side {
            Side::A => &self.shared.signaler_a,
            Side::B => &self.shared.signaler_b,
        };
        *slot.lock().unwrap() = Some(signaler);
    }

    fn my_out_queue(&self) -> &YPipe<Msg> {
        match self.side {
            Side::A => &self.shared.a_to_b,
            Side::B => &self.shared.b_to_a,
        }
    }

    fn my_in_queue(&self) -> &YPipe<Msg> {
        match self.side {
            Side::A => &self.shared.b_to_a,
            Side::B => &self.shared.a_to_b,
        }
    }

    fn my_written(&self) -> &AtomicU64 {
        match self.side {
            Side::A => &self.shared.msgs_written_a,
            Side::B => &self.shared.msgs_written_b,
        }
    }

    fn peer_read(&self) -> &AtomicU64 {
        match self.side {
            Side::A => &self.shared.msgs_read_b,
            Side::B => &self.shared.msgs_read_a,
        }
    }

    fn my_read(&self) -> &AtomicU64 {
        match self.side {
            Side::A => &self.shared.msgs_read_a,
            Side::B => &self.shared.msgs_read_b,
        }
    }

    fn my_out_hwm(&self) -> u32 {
        match self.side {
            Side::A => self.shared.out_hwm_a.load(Ordering::Relaxed),
            Side::B => self.shared.out_hwm_b.load(Ordering::Relaxed),
        }
    }

    pub fn in_hwm(&self) -> u32 {
        match self.side {
            Side::A => self.shared.in_hwm_a.load(Ordering::Relaxed),
            Side::B => self.shared.in_hwm_b.load(Ordering::Relaxed),
        }
    }

    pub fn out_hwm(&self) -> u32 {
        self.my_out_hwm()
    }

    pub fn set_hwms(&self, out_hwm: u32, in_hwm: u32) {
        match self.side {
            Side::A => {
                self.shared.out_hwm_a.store(out_hwm, Ordering::Relaxed);
                self.shared.in_hwm_a.store(in_hwm, Ordering::Relaxed);
            }
            Side::B => {
                self.shared.out_hwm_b.store(out_hwm, Ordering::Relaxed);
                self.shared.in_hwm_b.store(in_hwm, Ordering::Relaxed);
            }
        }
    }

    /// Outbound queue depth: messages written minus messages the peer
    /// has confirmed reading. `peers_msgs_read <= msgs_written` always
    /// (spec §3.2 invariant).
    pub fn depth(&self) -> u64 {
        self.my_written()
            .load(Ordering::Acquire)
            .saturating_sub(self.peer_read().load(Ordering::Acquire))
    }

    /// True once `depth() >= out_hwm` (0 means unlimited, never full).
    pub fn is_full(&self) -> bool {
        let hwm = self.my_out_hwm();
        hwm > 0 && self.depth() >= hwm as u64
    }

    /// Pushes one message onto this side's outbound queue. Returns
    /// `false` (message not enqueued) when the HWM is already reached.
    pub fn write(&self, msg: Msg) -> bool {
        if self.is_full() {
            return false;
        }
        self.my_out_queue().write(msg);
        self.my_written().fetch_add(1, Ordering::AcqRel);
        true
    }

    /// Makes buffered writes visible to the peer and wakes it if it was
    /// idle. The `YPipe` is already visible the instant `write` returns
    /// (it's mutex-backed, not a deferred flush list like the lock-free
    /// original), so this only needs to fire the cross-thread wakeup.
    pub fn flush(&self) {
        let slot = match self.side {
            Side::A => &self.shared.signaler_a,
            Side::B => &self.shared.signaler_b,
        };
        if let Some(signaler) = slot.lock().unwrap().as_ref() {
            let _ = signaler.signal();
        }
    }

    /// Pops one message from this side's inbound queue.
    pub fn read(&self) -> Option<Msg> {
        let msg = self.my_in_queue().read();
        if msg.is_some() {
            self.my_read().fetch_add(1, Ordering::AcqRel);
        }
        msg
    }

    pub fn has_in(&self) -> bool {
        !self.my_in_queue().is_empty()
    }

    pub fn has_out(&self) -> bool {
        !self.is_full()
    }

    /// Discards every message buffered on this side's outbound queue
    /// that the peer hasn't read yet (spec §4.3 `hiccup`/`rollback`).
    pub fn rollback(&self) {
        while self.my_out_queue().read().is_some() {}
        self.my_written().store(
            self.peer_read().load(Ordering::Acquire),
            Ordering::Release,
        );
    }

    /// Alias for `rollback`, matching the spec's separate `hiccup`
    /// vocabulary: a reconnect re-establishes the pipe but anything
    /// still queued from before the hiccup is stale.
    pub fn hiccup(&self) {
        self.rollback();
    }

    pub fn state(&self) -> State {
        *self.shared.state.lock().unwrap()
    }

    fn set_state(&self, s: State) {
        *self.shared.state.lock().unwrap() = s;
    }

    /// Begins the three-step pipe teardown (spec §4.3). With
    /// `delay = true`, buffered outbound messages are left in place for
    /// the peer to drain before the DELIMITER; with `delay = false` they
    /// are dropped immediately.
    pub fn terminate(&self, delay: bool) {
        if !delay {
            self.rollback();
        }
        self.write(Msg::init_delimiter());
        self.flush();

        let mut state = self.shared.state.lock().unwrap();
        *state = match *state {
            State::Active => State::TermReqSent1,
            State::DelimiterReceived => State::Terminated,
            other => other,
        };
    }

    /// Feeds one inbound message through the termination state machine.
    /// Returns `true` if `msg` was the DELIMITER and was consumed by the
    /// state machine rather than being a payload message for the
    /// application.
    pub fn process_inbound(&self, msg: &Msg) -> bool {
        if !msg.is_delimiter() {
            return false;
        }
        let mut state = self.shared.state.lock().unwrap();
        *state = match *state {
            State::Active => State::DelimiterReceived,
            State::TermReqSent1 => State::TermAckSent,
            State::TermReqSent2 => State::Terminated,
            other => other,
        };
        true
    }

    /// True once both sides have exchanged their DELIMITER and the pipe
    /// can be reclaimed by the reaper.
    pub fn is_terminated(&self) -> bool {
        matches!(self.state(), State::Terminated)
    }

    pub fn routing_id(&self) -> Option<Vec<u8>> {
        self.shared.routing_id.lock().unwrap().clone()
    }

    pub fn set_routing_id(&self, id: Vec<u8>) {
        *self.shared.routing_id.lock().unwrap() = Some(id);
    }

    pub fn endpoints(&self) -> EndpointUris {
        self.shared.endpoints.lock().unwrap().clone()
    }

    pub fn set_bind_endpoint(&self, uri: String) {
        self.shared.endpoints.lock().unwrap().bind = Some(uri);
    }

    pub fn set_connect_endpoint(&self, uri: String) {
        self.shared.endpoints.lock().unwrap().connect = Some(uri);
    }

    /// Identity used by callers that key maps on pipe identity (e.g.
    /// the ROUTER routing table, and the fair-queue/round-robin rings).
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.shared) as usize
    }
}

impl PartialEq for Pipe {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared) && self.side == other.side
    }
}
impl Eq for Pipe {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_within_pipe() {
        let (a, b) = pipepair([(0, 0), (0, 0)]);
        assert!(a.write(Msg::init_buffer(b"m1")));
        assert!(a.write(Msg::init_buffer(b"m2")));
        a.flush();
        assert_eq!(b.read().unwrap().data(), b"m1");
        assert_eq!(b.read().unwrap().data(), b"m2");
        assert!(b.read().is_none());
    }

    #[test]
    fn hwm_bound_blocks_writer_until_drained() {
        let (a, b) = pipepair([(2, 0), (0, 0)]);
        assert!(a.write(Msg::init_buffer(b"1")));
        assert!(a.write(Msg::init_buffer(b"2")));
        assert!(!a.write(Msg::init_buffer(b"3")));

        b.read().unwrap();
        b.read().unwrap();
        assert!(a.write(Msg::init_buffer(b"4")));
    }

    #[test]
    fn zero_hwm_is_unlimited() {
        let (a, _b) = pipepair([(0, 0), (0, 0)]);
        for i in 0..10_000u32 {
            assert!(a.write(Msg::init_buffer(&i.to_be_bytes())));
        }
    }

    #[test]
    fn delimiter_round_trip_terminates_both_sides() {
        let (a, b) = pipepair([(0, 0), (0, 0)]);
        a.terminate(false);
        assert_eq!(a.state(), State::TermReqSent1);

        let delim = b.read().unwrap();
        assert!(b.process_inbound(&delim));
        assert!(b.is_terminated());

        b.terminate(false);
        let delim_back = a.read().unwrap();
        assert!(a.process_inbound(&delim_back));
        assert!(a.is_terminated());
    }

    #[test]
    fn delimiter_received_before_own_terminate_auto_acks() {
        let (a, b) = pipepair([(0, 0), (0, 0)]);
        a.terminate(false);
        let delim = b.read().unwrap();
        assert!(b.process_inbound(&delim));
        assert!(b.is_terminated());
    }

    #[test]
    fn rollback_drops_unflushed_outbound_messages() {
        let (a, b) = pipepair([(0, 0), (0, 0)]);
        a.write(Msg::init_buffer(b"stale"));
        a.rollback();
        a.write(Msg::init_buffer(b"fresh"));
        a.flush();
        assert_eq!(b.read().unwrap().data(), b"fresh");
        assert!(b.read().is_none());
    }
}

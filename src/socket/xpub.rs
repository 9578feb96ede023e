// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! XPUB (spec §4.9): like PUB, but subscription control frames arriving
//! on a pipe are themselves delivered to the application as ordinary
//! `xrecv`able messages, shaped `[0x01 | 0x00, topic...]` (spec §8 S4).
//! `XPUB_VERBOSE`/`XPUB_VERBOSER` control whether duplicate
//! subscribes/unsubscribes (refcount didn't transition) are still
//! delivered; `XPUB_MANUAL` stops automatic trie maintenance so the
//! application drives subscriptions itself via `SUBSCRIBE`/
//! `UNSUBSCRIBE` setsockopt calls on the XPUB socket itself. Those
//! calls populate one socket-wide match set consulted by `xsend`
//! instead of the per-pipe tries (`original_source/tests/pubsub/
//! test_xpub_manual.cpp`: the app re-subscribes the XPUB socket to a
//! different topic than what peers declared, and every connected peer
//! sees the manually-chosen topic, not its own declared one).

use std::collections::{HashMap, VecDeque};

use crate::error::{Error, Result};
use crate::global::SocketType;
use crate::msg::Msg;
use crate::pipe::Pipe;
use crate::trie::Trie;

use super::{Protocol, SocketCore};

pub struct XPub {
    core: SocketCore,
    subs: HashMap<usize, Trie>,
    /// Socket-wide match set driven by `SUBSCRIBE`/`UNSUBSCRIBE`
    /// setsockopt calls on this XPUB socket, consulted by `xsend` in
    /// place of the per-pipe tries when `XPUB_MANUAL` is set.
    manual_subs: Trie,
    pending_recv: VecDeque<Msg>,
    send_targets: Option<Vec<usize>>,
}

impl XPub {
    pub fn new(core: SocketCore) -> XPub {
        XPub {
            core,
            subs: HashMap::new(),
            manual_subs: Trie::new(),
            pending_recv: VecDeque::new(),
            send_targets: None,
        }
    }

    fn drain_subscriptions(&mut self) {
        let manual = self.core.xpub_manual;
        let verbose = self.core.xpub_verbose;
        let verboser = self.core.xpub_verboser;
        let mut terminated: Vec<Pipe> = Vec::new();
        for pipe in &self.core.pipes {
            let trie = self.subs.entry(pipe.identity()).or_insert_with(Trie::new);
            while let Some(msg) = pipe.read() {
                if msg.is_delimiter() {
                    pipe.process_inbound(&msg);
                    // a disconnecting peer implicitly cancels every
                    // topic it had subscribed to (spec §8 S4).
                    let mut topics = Vec::new();
                    trie.apply(|t| topics.push(t.to_vec()));
                    for topic in topics {
                        let mut frame = Vec::with_capacity(topic.len() + 1);
                        frame.push(0x00);
                        frame.extend_from_slice(&topic);
                        self.pending_recv.push_back(Msg::init_buffer(&frame));
                    }
                    terminated.push(pipe.clone());
                    break;
                } else if msg.is_subscribe() {
                    let first = if manual { true } else { trie.add(msg.data()) };
                    if first || verbose {
                        let mut frame = Vec::with_capacity(msg.size() + 1);
                        frame.push(0x01);
                        frame.extend_from_slice(msg.data());
                        self.pending_recv.push_back(Msg::init_buffer(&frame));
                    }
                } else if msg.is_cancel() {
                    let last = if manual { true } else { trie.rm(msg.data()) };
                    if last || verboser {
                        let mut frame = Vec::with_capacity(msg.size() + 1);
                        frame.push(0x00);
                        frame.extend_from_slice(msg.data());
                        self.pending_recv.push_back(Msg::init_buffer(&frame));
                    }
                }
            }
        }
        for pipe in &terminated {
            self.subs.remove(&pipe.identity());
            self.core.remove_pipe(pipe);
        }
    }
}

impl Protocol for XPub {
    fn socket_type(&self) -> SocketType {
        SocketType::XPub
    }

    fn core(&self) -> &SocketCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SocketCore {
        &mut self.core
    }

    fn xattach_pipe(&mut self, pipe: Pipe, identity: Option<Vec<u8>>) {
        self.subs.insert(pipe.identity(), Trie::new());
        self.core.add_pipe(pipe, identity);
    }

    fn xpipe_terminated(&mut self, pipe: &Pipe) {
        self.subs.remove(&pipe.identity());
        self.core.remove_pipe(pipe);
    }

    fn xsend(&mut self, msg: Msg) -> Result<()> {
        self.drain_subscriptions();

        let manual = self.core.xpub_manual;
        let targets = match self.send_targets.take() {
            Some(t) => t,
            None => {
                let topic = msg.data();
                if manual {
                    // XPUB_MANUAL: one socket-wide match set drives
                    // every pipe alike, ignoring whatever each peer
                    // itself declared (original_source's
                    // test_xpub_manual.cpp: the app overrides with its
                    // own SUBSCRIBE/UNSUBSCRIBE on the XPUB socket).
                    if self.manual_subs.check(topic) {
                        (0..self.core.pipes.len()).collect()
                    } else {
                        Vec::new()
                    }
                } else {
                    (0..self.core.pipes.len())
                        .filter(|&i| {
                            self.subs
                                .get(&self.core.pipes[i].identity())
                                .map(|t| t.check(topic))
                                .unwrap_or(false)
                        })
                        .collect()
                }
            }
        };

        if self.core.xpub_nodrop {
            for &i in &targets {
                if self.core.pipes[i].is_full() {
                    self.send_targets = Some(targets);
                    return Err(Error::Again);
                }
            }
        }

        let more = msg.has_more();
        for &i in &targets {
            let pipe = &self.core.pipes[i];
            if pipe.write(msg.copy()) && !more {
                pipe.flush();
            }
        }
        if more {
            self.send_targets = Some(targets);
        }
        Ok(())
    }

    fn xrecv(&mut self) -> Result<Msg> {
        self.drain_subscriptions();
        self.pending_recv.pop_front().ok_or(Error::Again)
    }

    fn xhas_in(&mut self) -> bool {
        self.drain_subscriptions();
        !self.pending_recv.is_empty()
    }

    fn xhas_out(&mut self) -> bool {
        true
    }

    fn xsetsockopt(&mut self, opt: &str, value: &[u8]) -> Result<()> {
        match opt {
            "XPUB_VERBOSE" => {
                self.core.xpub_verbose = value.first() == Some(&1);
                Ok(())
            }
            "XPUB_VERBOSER" => {
                self.core.xpub_verboser = value.first() == Some(&1);
                Ok(())
            }
            "XPUB_MANUAL" => {
                self.core.xpub_manual = value.first() == Some(&1);
                Ok(())
            }
            "XPUB_NODROP" => {
                self.core.xpub_nodrop = value.first() == Some(&1);
                Ok(())
            }
            // Manual-mode topic driving (spec §4.9's XPUB_MANUAL):
            // the application calls these directly on the XPUB socket
            // instead of relying on peer-declared subscriptions.
            "SUBSCRIBE" => {
                self.manual_subs.add(value);
                Ok(())
            }
            "UNSUBSCRIBE" => {
                self.manual_subs.rm(value);
                Ok(())
            }
            _ => Err(Error::InvalidInput("unknown option for XPUB")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::pipepair;

    #[test]
    fn subscribe_and_matching_cancel_are_delivered_to_application() {
        let mut xpub = XPub::new(SocketCore::new());
        let (server, peer) = pipepair([(0, 0), (0, 0)]);
        xpub.xattach_pipe(server, None);

        peer.write(Msg::init_subscribe(b"A"));
        peer.flush();
        let frame = xpub.xrecv().unwrap();
        assert_eq!(frame.data(), &[0x01, b'A']);

        peer.write(Msg::init_cancel(b"A"));
        peer.flush();
        let frame = xpub.xrecv().unwrap();
        assert_eq!(frame.data(), &[0x00, b'A']);
    }

    /// With `XPUB_MANUAL` set, a peer's own `SUBSCRIBE` is surfaced to
    /// the application but does not drive routing; only a `SUBSCRIBE`
    /// setsockopt on the XPUB socket itself does (mirrors
    /// `test_basic`/`test_unsubscribe_manual` in
    /// `original_source/tests/pubsub/test_xpub_manual.cpp`).
    #[test]
    fn manual_mode_routes_by_socket_subscribe_not_peer_subscribe() {
        let mut xpub = XPub::new(SocketCore::new());
        xpub.xsetsockopt("XPUB_MANUAL", &[1]).unwrap();
        let (server, peer) = pipepair([(0, 0), (0, 0)]);
        xpub.xattach_pipe(server, None);

        peer.write(Msg::init_subscribe(b"A"));
        peer.flush();
        let frame = xpub.xrecv().unwrap();
        assert_eq!(frame.data(), &[0x01, b'A']);

        // peer declared "A", but nothing forwards until the app drives
        // the XPUB socket's own subscription.
        xpub.xsend(Msg::init_buffer(b"A")).unwrap();
        assert!(peer.read().is_none());

        xpub.xsetsockopt("SUBSCRIBE", b"B").unwrap();
        xpub.xsend(Msg::init_buffer(b"A")).unwrap();
        assert!(peer.read().is_none());
        xpub.xsend(Msg::init_buffer(b"B")).unwrap();
        assert_eq!(peer.read().unwrap().data(), b"B");

        xpub.xsetsockopt("UNSUBSCRIBE", b"B").unwrap();
        xpub.xsend(Msg::init_buffer(b"B")).unwrap();
        assert!(peer.read().is_none());
    }
}

// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// ZMTP socket pattern. Determines send/recv policy, routing, and which
/// peer `Socket-Type` the NULL mechanism will accept (§4.5).
#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum SocketType {
    /// Exactly one active peer; a second connection attempt is terminated
    /// on first read.
    Pair,
    /// Round-robins sends, fair-queues receives. No routing-id framing.
    Dealer,
    /// Prepends/consumes a routing-id frame per message.
    Router,
    /// Broadcasts; drops messages matching no subscription.
    Pub,
    /// Maintains a local subscription trie; receive-only.
    Sub,
    /// Raw PUB: subscription control frames are delivered as ordinary
    /// messages to the application.
    XPub,
    /// Raw SUB: subscribe/unsubscribe are sent as ordinary messages by
    /// the application rather than through `SUBSCRIBE`/`UNSUBSCRIBE`
    /// options.
    XSub,
}

impl SocketType {
    /// ZMTP wire name sent in the `Socket-Type` READY property.
    pub fn wire_name(&self) -> &'static str {
        match *self {
            SocketType::Pair => "PAIR",
            SocketType::Dealer => "DEALER",
            SocketType::Router => "ROUTER",
            SocketType::Pub => "PUB",
            SocketType::Sub => "SUB",
            SocketType::XPub => "XPUB",
            SocketType::XSub => "XSUB",
        }
    }

    pub fn from_wire_name(name: &[u8]) -> Option<SocketType> {
        match name {
            b"PAIR" => Some(SocketType::Pair),
            b"DEALER" => Some(SocketType::Dealer),
            b"ROUTER" => Some(SocketType::Router),
            b"PUB" => Some(SocketType::Pub),
            b"SUB" => Some(SocketType::Sub),
            b"XPUB" => Some(SocketType::XPub),
            b"XSUB" => Some(SocketType::XSub),
            _ => None,
        }
    }
}

/// Opaque socket identifier, unique within a `Context`.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct SocketId(pub usize);

impl fmt::Debug for SocketId {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "socket#{}", self.0)
    }
}

/// Identifier for a pipe endpoint (one per connected/accepted/inproc-paired
/// connection), scoped to the owning socket.
#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct PipeId(pub usize);

impl fmt::Debug for PipeId {
    fn fmt(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "pipe#{}", self.0)
    }
}

/// Thread-safe monotonically increasing id generator, shared by clone.
#[derive(Clone)]
pub struct IdSequence {
    value: Arc<AtomicUsize>,
}

impl IdSequence {
    pub fn new() -> IdSequence {
        IdSequence {
            value: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn next(&self) -> usize {
        self.value.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for IdSequence {
    fn default() -> Self {
        IdSequence::new()
    }
}

pub trait ToMillis {
    fn to_millis(&self) -> u64;
}

impl ToMillis for Duration {
    fn to_millis(&self) -> u64 {
        let millis_from_secs = self.as_secs() * 1_000;
        let millis_from_nanos = self.subsec_nanos() as f64 / 1_000_000f64;

        millis_from_secs + millis_from_nanos as u64
    }
}

#[cfg(test)]
mod tests {
    use super::IdSequence;

    #[test]
    fn id_sequence_can_be_cloned() {
        let seq = IdSequence::new();
        let other = seq.clone();

        assert_eq!(0, other.next());
        assert_eq!(1, seq.next());
        assert_eq!(2, seq.next());
        assert_eq!(3, other.next());
    }
}

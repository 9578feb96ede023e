// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! `inproc://` transport (spec §6.2 [SUPPLEMENT]): a process-wide
//! registry of named endpoints, since connecting may precede binding.
//! There is no reference `inproc` source under `original_source/`, so
//! this follows the same mailbox/registry style (a `Mutex`-guarded map)
//! used elsewhere in this crate rather than the byte-stream transports.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, OnceLock};

use crate::error::{Error, Result};
use crate::pipe::{pipepair, Pipe};

enum Slot {
    /// A `bind` has claimed this name; queued pipes are waiting for
    /// the binder to `accept` them.
    Bound(VecDeque<Pipe>),
    /// No `bind` yet; `connect` calls queue their peer pipe here until
    /// one arrives.
    Pending(VecDeque<Pipe>),
}

static REGISTRY: OnceLock<Mutex<HashMap<String, Slot>>> = OnceLock::new();

fn registry() -> &'static Mutex<HashMap<String, Slot>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Claims `name` for binding, adopting any pipes connects already
/// queued for it. A name already bound is `Error::AddrInUse`.
pub fn bind(name: &str) -> Result<()> {
    let mut reg = registry().lock().unwrap();
    match reg.remove(name) {
        Some(Slot::Bound(queue)) => {
            reg.insert(name.to_owned(), Slot::Bound(queue));
            Err(Error::AddrInUse)
        }
        Some(Slot::Pending(queue)) => {
            reg.insert(name.to_owned(), Slot::Bound(queue));
            Ok(())
        }
        None => {
            reg.insert(name.to_owned(), Slot::Bound(VecDeque::new()));
            Ok(())
        }
    }
}

/// Pops one queued peer pipe for a bound name, the bind side's
/// "accept"; `None` when nothing is waiting.
pub fn accept(name: &str) -> Option<Pipe> {
    let mut reg = registry().lock().unwrap();
    match reg.get_mut(name) {
        Some(Slot::Bound(queue)) => queue.pop_front(),
        _ => None,
    }
}

/// Releases a bound name, terminating any pipes nobody accepted yet.
pub fn unbind(name: &str) {
    let mut reg = registry().lock().unwrap();
    if let Some(Slot::Bound(queue)) = reg.remove(name) {
        for pipe in queue {
            pipe.terminate(false);
        }
    }
}

/// Connects to `name`, returning this side's `Pipe` immediately. If
/// `name` isn't bound yet the peer half queues until a matching `bind`
/// claims it (spec §6.2: "connect may precede bind").
pub fn connect(name: &str, hwms: [(u32, u32); 2]) -> Pipe {
    let (ours, theirs) = pipepair(hwms);
    let mut reg = registry().lock().unwrap();
    match reg.get_mut(name) {
        Some(Slot::Bound(queue)) | Some(Slot::Pending(queue)) => queue.push_back(theirs),
        None => {
            let mut queue = VecDeque::new();
            queue.push_back(theirs);
            reg.insert(name.to_owned(), Slot::Pending(queue));
        }
    }
    ours
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name(tag: &str) -> String {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        format!("{tag}-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    #[test]
    fn bind_then_connect_pairs_immediately() {
        let name = unique_name("bound-first");
        bind(&name).unwrap();
        let client = connect(&name, [(0, 0), (0, 0)]);
        let server = accept(&name).expect("connect should have queued a peer pipe");

        client.write(crate::msg::Msg::init_buffer(b"hi"));
        client.flush();
        assert_eq!(server.read().unwrap().data(), b"hi");
    }

    #[test]
    fn connect_before_bind_queues_until_bound() {
        let name = unique_name("connect-first");
        let client = connect(&name, [(0, 0), (0, 0)]);
        assert!(accept(&name).is_none());

        bind(&name).unwrap();
        let server = accept(&name).expect("bind should adopt the queued connect");

        client.write(crate::msg::Msg::init_buffer(b"hi"));
        client.flush();
        assert_eq!(server.read().unwrap().data(), b"hi");
    }

    #[test]
    fn duplicate_bind_is_rejected() {
        let name = unique_name("dup");
        bind(&name).unwrap();
        assert!(matches!(bind(&name), Err(Error::AddrInUse)));
    }
}

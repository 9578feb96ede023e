// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Poller (spec §4.10): a thin typed wrapper over `mio::Poll`/`Events`.
//! `mio` itself happily lets a caller double-register a token or wait
//! forever on an empty set; this wrapper adds the bookkeeping spec
//! calls for so those become explicit errors instead of OS-dependent
//! behavior (a double-`register` on some platforms silently replaces
//! the old registration; on others it errors).

use std::collections::HashSet;
use std::time::Duration;

use mio::event::Source;
use mio::{Events, Interest, Poll, Token};

use crate::error::{Error, Result};

/// Readiness flags surfaced to callers, independent of `mio`'s own
/// `Interest`/`Event` types (spec names them `POLLIN`/`POLLOUT`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
}

pub struct Poller {
    poll: Poll,
    registered: HashSet<Token>,
}

impl Poller {
    pub fn new() -> Result<Poller> {
        Ok(Poller {
            poll: Poll::new().map_err(Error::Io)?,
            registered: HashSet::new(),
        })
    }

    pub fn registry(&self) -> &mio::Registry {
        self.poll.registry()
    }

    /// Registers one source under `token`. Re-registering an already
    /// registered token is `Error::InvalidInput` (spec's `EINVAL`).
    pub fn add<S: Source + ?Sized>(&mut self, source: &mut S, token: Token, interest: Interest) -> Result<()> {
        if !self.registered.insert(token) {
            return Err(Error::InvalidInput("token already registered"));
        }
        self.poll.registry().register(source, token, interest).map_err(Error::Io)
    }

    pub fn modify<S: Source + ?Sized>(&mut self, source: &mut S, token: Token, interest: Interest) -> Result<()> {
        if !self.registered.contains(&token) {
            return Err(Error::InvalidInput("token not registered"));
        }
        self.poll.registry().reregister(source, token, interest).map_err(Error::Io)
    }

    /// Removing an unregistered token is `Error::InvalidInput` (spec's
    /// `EINVAL`), mirroring `add`'s symmetric check.
    pub fn remove<S: Source + ?Sized>(&mut self, source: &mut S, token: Token) -> Result<()> {
        if !self.registered.remove(&token) {
            return Err(Error::InvalidInput("token not registered"));
        }
        self.poll.registry().deregister(source).map_err(Error::Io)
    }

    /// Waits for readiness, returning the number of ready sources.
    /// `timeout: None` together with an empty registered set is
    /// `Error::InvalidInput` (spec's `EFAULT`: it would sleep
    /// forever with nothing to ever wake it).
    pub fn wait(&mut self, events: &mut Events, timeout: Option<Duration>) -> Result<usize> {
        if timeout.is_none() && self.registered.is_empty() {
            return Err(Error::InvalidInput("wait on an empty poller with no timeout would block forever"));
        }
        self.poll.poll(events, timeout).map_err(Error::Io)?;
        Ok(events.iter().count())
    }
}

/// Reads the readable/writable bits off one `mio::Event`.
pub fn readiness(event: &mio::event::Event) -> Readiness {
    Readiness {
        readable: event.is_readable(),
        writable: event.is_writable(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::Waker;

    #[test]
    fn double_add_is_invalid_input() {
        let mut poller = Poller::new().unwrap();
        let waker = Waker::new(poller.registry(), Token(0)).unwrap();
        let mut dummy = DummySource;
        poller.add(&mut dummy, Token(1), Interest::READABLE).unwrap();
        assert!(matches!(poller.add(&mut dummy, Token(1), Interest::READABLE), Err(Error::InvalidInput(_))));
        drop(waker);
    }

    #[test]
    fn remove_unregistered_is_invalid_input() {
        let mut poller = Poller::new().unwrap();
        let mut dummy = DummySource;
        assert!(matches!(poller.remove(&mut dummy, Token(5)), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn wait_forever_on_empty_set_is_rejected() {
        let mut poller = Poller::new().unwrap();
        let mut events = Events::with_capacity(4);
        assert!(matches!(poller.wait(&mut events, None), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn wait_with_timeout_on_empty_set_is_allowed() {
        let mut poller = Poller::new().unwrap();
        let mut events = Events::with_capacity(4);
        assert_eq!(poller.wait(&mut events, Some(Duration::from_millis(1))).unwrap(), 0);
    }

    /// A minimal `mio::event::Source` so `add`/`remove`'s bookkeeping can
    /// be tested without a real OS-backed socket.
    struct DummySource;

    impl Source for DummySource {
        fn register(&mut self, _r: &mio::Registry, _t: Token, _i: Interest) -> std::io::Result<()> {
            Ok(())
        }
        fn reregister(&mut self, _r: &mio::Registry, _t: Token, _i: Interest) -> std::io::Result<()> {
            Ok(())
        }
        fn deregister(&mut self, _r: &mio::Registry) -> std::io::Result<()> {
            Ok(())
        }
    }
}

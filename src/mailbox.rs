// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Mailbox and Signaler (spec §4.2): the cross-thread command channel
//! an application thread uses to talk to the I/O thread hosting a
//! socket's engine/session, and vice versa for notifications flowing
//! back. The command queue is the mutex-guarded `YPipe`; the pollable
//! notifier half is `mio::Waker`, the portable stand-in for the
//! eventfd/pipe/socketpair trio the original picks per platform.

use std::sync::Arc;

use mio::Waker;

use crate::error::Result;
use crate::ypipe::YPipe;

/// Wakes up whichever `mio::Poll` the owning thread is blocked in,
/// without requiring the sender to know anything about that thread's
/// event loop beyond the registered `Waker`.
pub struct Signaler {
    waker: Arc<Waker>,
}

impl Signaler {
    pub fn new(waker: Arc<Waker>) -> Signaler {
        Signaler { waker }
    }

    pub fn signal(&self) -> Result<()> {
        self.waker.wake()?;
        Ok(())
    }
}

impl Clone for Signaler {
    fn clone(&self) -> Self {
        Signaler {
            waker: self.waker.clone(),
        }
    }
}

/// One mailbox per I/O thread (or per application-facing socket
/// handle). `send` never blocks; `recv_all` drains everything queued
/// since the last drain, which is how the owning thread's poll loop
/// treats a mailbox wakeup.
pub struct Mailbox<T> {
    queue: YPipe<T>,
    signaler: Signaler,
}

impl<T> Mailbox<T> {
    pub fn new(signaler: Signaler) -> Mailbox<T> {
        Mailbox {
            queue: YPipe::new(),
            signaler,
        }
    }

    pub fn send(&self, item: T) -> Result<()> {
        self.queue.write(item);
        self.signaler.signal()
    }

    pub fn try_recv(&self) -> Option<T> {
        self.queue.read()
    }

    /// Drains every item currently queued, in FIFO order.
    pub fn recv_all(&self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = self.queue.read() {
            items.push(item);
        }
        items
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::{Poll, Token};

    fn mailbox_with_waker() -> (Mailbox<i32>, Poll) {
        let poll = Poll::new().unwrap();
        let waker = Arc::new(Waker::new(poll.registry(), Token(0)).unwrap());
        (Mailbox::new(Signaler::new(waker)), poll)
    }

    #[test]
    fn send_then_recv_all_preserves_order() {
        let (mailbox, _poll) = mailbox_with_waker();
        mailbox.send(1).unwrap();
        mailbox.send(2).unwrap();
        mailbox.send(3).unwrap();
        assert_eq!(mailbox.recv_all(), vec![1, 2, 3]);
        assert!(mailbox.is_empty());
    }

    #[test]
    fn send_wakes_the_registered_poll() {
        let (mailbox, mut poll) = mailbox_with_waker();
        mailbox.send(42).unwrap();

        let mut events = mio::Events::with_capacity(4);
        poll.poll(&mut events, Some(std::time::Duration::from_secs(1)))
            .unwrap();
        assert!(events.iter().any(|e| e.token() == Token(0)));
        assert_eq!(mailbox.try_recv(), Some(42));
    }
}

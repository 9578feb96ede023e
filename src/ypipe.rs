// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The inter-thread message queue backing `Pipe` (spec §4.2/§4.3). The
//! original's `ypipe_t` is a lock-free singly-linked-list SPSC queue;
//! the mailbox's companion queue only needs "mutex-guarded append"
//! rather than true lock-freedom, so this is a plain
//! `Mutex<VecDeque<T>>` — correct under the same SPSC usage pattern,
//! simpler to reason about, and consistent with how `mio`'s own channel
//! type is built.

use std::collections::VecDeque;
use std::sync::Mutex;

pub struct YPipe<T> {
    queue: Mutex<VecDeque<T>>,
}

impl<T> YPipe<T> {
    pub fn new() -> YPipe<T> {
        YPipe {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn write(&self, item: T) {
        self.queue.lock().unwrap().push_back(item);
    }

    pub fn read(&self) -> Option<T> {
        self.queue.lock().unwrap().pop_front()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap().len()
    }
}

impl<T> Default for YPipe<T> {
    fn default() -> Self {
        YPipe::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_fifo_order() {
        let p = YPipe::new();
        p.write(1);
        p.write(2);
        p.write(3);
        assert_eq!(p.read(), Some(1));
        assert_eq!(p.read(), Some(2));
        assert_eq!(p.read(), Some(3));
        assert_eq!(p.read(), None);
    }

    #[test]
    fn tracks_length_and_emptiness() {
        let p = YPipe::new();
        assert!(p.is_empty());
        p.write("x");
        assert_eq!(p.len(), 1);
        assert!(!p.is_empty());
    }
}

// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Context (spec §4.11): the lifecycle root. Owns a small pool of I/O
//! threads that `Socket::bind`/`Socket::connect` hand TCP/IPC work off
//! to, and mints the `SocketId`s that tag every pipe/session back to
//! the socket that owns it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::error::{Error, Result};
use crate::global::{IdSequence, SocketId, SocketType};
use crate::io_thread::{self, ThreadCmd};
use crate::mailbox::Mailbox;
use crate::socket::facade::Socket;

/// Tunables for `Context::with_options` (spec §4.11's `IO_THREADS`/
/// `MAX_SOCKETS` context options).
#[derive(Debug, Clone, Copy)]
pub struct ContextOptions {
    pub io_threads: usize,
    pub max_sockets: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        ContextOptions {
            io_threads: 1,
            max_sockets: 1024,
        }
    }
}

struct IoThreadHandle {
    mailbox: Arc<Mailbox<ThreadCmd>>,
    join: Mutex<Option<JoinHandle<()>>>,
}

struct Inner {
    id_seq: IdSequence,
    io_threads: Vec<IoThreadHandle>,
    next_io_thread: AtomicUsize,
    terminated: AtomicBool,
    socket_count: AtomicUsize,
    max_sockets: usize,
}

/// Cheap-to-clone handle shared by every `Socket` it mints; the I/O
/// thread pool and socket-accounting live behind the `Arc` (spec §4.11:
/// "one `Context` may be shared across threads").
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    pub fn new() -> Context {
        Context::with_options(ContextOptions::default())
    }

    pub fn with_options(opts: ContextOptions) -> Context {
        let io_threads = (0..opts.io_threads.max(1))
            .map(|_| {
                let (mailbox, join) = io_thread::spawn();
                IoThreadHandle {
                    mailbox,
                    join: Mutex::new(Some(join)),
                }
            })
            .collect();
        Context {
            inner: Arc::new(Inner {
                id_seq: IdSequence::new(),
                io_threads,
                next_io_thread: AtomicUsize::new(0),
                terminated: AtomicBool::new(false),
                socket_count: AtomicUsize::new(0),
                max_sockets: opts.max_sockets,
            }),
        }
    }

    /// Mints a new socket of `socket_type`, bound to this context (spec
    /// §4.11 `zmq_socket`). `Error::Term` once the context has been
    /// terminated; `Error::MThread` once `MAX_SOCKETS` is reached.
    pub fn socket(&self, socket_type: SocketType) -> Result<Socket> {
        if self.inner.terminated.load(Ordering::Acquire) {
            return Err(Error::Term);
        }
        loop {
            let current = self.inner.socket_count.load(Ordering::Relaxed);
            if current >= self.inner.max_sockets {
                return Err(Error::MThread);
            }
            if self
                .inner
                .socket_count
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
        let id = SocketId(self.inner.id_seq.next());
        Ok(Socket::new(id, socket_type, self.clone()))
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::Acquire)
    }

    pub(crate) fn pick_io_thread(&self) -> Arc<Mailbox<ThreadCmd>> {
        let n = self.inner.io_threads.len();
        let idx = self.inner.next_io_thread.fetch_add(1, Ordering::Relaxed) % n;
        self.inner.io_threads[idx].mailbox.clone()
    }

    pub(crate) fn io_thread_mailboxes(&self) -> Vec<Arc<Mailbox<ThreadCmd>>> {
        self.inner.io_threads.iter().map(|t| t.mailbox.clone()).collect()
    }

    pub(crate) fn socket_closed(&self) {
        self.inner.socket_count.fetch_sub(1, Ordering::Relaxed);
    }

    /// Signals every I/O thread to shut down and joins them (spec
    /// §4.11 `zmq_ctx_term`: "blocks until ... all associated sockets
    /// have been closed"). Idempotent; a second call is a no-op.
    pub fn terminate(&self) {
        if self.inner.terminated.swap(true, Ordering::AcqRel) {
            return;
        }
        for thread in &self.inner.io_threads {
            let _ = thread.mailbox.send(ThreadCmd::Shutdown);
        }
        for thread in &self.inner.io_threads {
            if let Ok(mut slot) = thread.join.lock() {
                if let Some(handle) = slot.take() {
                    let _ = handle.join();
                }
            }
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if !self.terminated.swap(true, Ordering::AcqRel) {
            for thread in &self.io_threads {
                let _ = thread.mailbox.send(ThreadCmd::Shutdown);
            }
        }
        for thread in &self.io_threads {
            if let Ok(mut slot) = thread.join.lock() {
                if let Some(handle) = slot.take() {
                    let _ = handle.join();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mints_distinct_socket_ids() {
        let ctx = Context::new();
        let a = ctx.socket(SocketType::Pair).unwrap();
        let b = ctx.socket(SocketType::Pair).unwrap();
        assert_ne!(a.id().0, b.id().0);
    }

    #[test]
    fn socket_after_terminate_is_rejected() {
        let ctx = Context::new();
        ctx.terminate();
        assert!(matches!(ctx.socket(SocketType::Pair), Err(Error::Term)));
    }

    #[test]
    fn max_sockets_is_enforced() {
        let ctx = Context::with_options(ContextOptions {
            io_threads: 1,
            max_sockets: 1,
        });
        let _first = ctx.socket(SocketType::Pair).unwrap();
        assert!(matches!(ctx.socket(SocketType::Pair), Err(Error::MThread)));
    }
}

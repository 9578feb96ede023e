// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The I/O thread event loop (spec §4.11's "N parallel I/O threads"):
//! owns a `mio::Poll`, every listener bound through it, and every
//! `Session`/`Engine` pair for a connection it originated. `Socket`s
//! live entirely on application threads and talk to pipes directly;
//! this loop only drives the transport-facing half of a connection —
//! accepting, connecting, handshaking, codec, heartbeats — kept
//! separate from the socket-thread data plane the same way a
//! socket-thread event loop stays separate from the session/transport
//! plumbing it drives.

use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use mio::{Events, Interest, Poll, Token, Waker};

use crate::engine::EngineOptions;
use crate::error::Result;
use crate::global::{SocketId, SocketType};
use crate::mailbox::{Mailbox, Signaler};
use crate::pipe::{pipepair, Pipe};
use crate::session::{ReconnectPolicy, Session};
use crate::transport::{self, Endpoint, EngineStream};

const WAKE_TOKEN: Token = Token(0);
const FIRST_DYNAMIC_TOKEN: usize = 1;
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// One pipe handed from a listener's accept (or a connect attempt)
/// back to the socket that owns it (spec §4.7's "posts engine_ready
/// ... to trigger pipe creation").
pub enum SocketEvent {
    PipeAttached { pipe: Pipe, identity: Option<Vec<u8>> },
}

pub enum ThreadCmd {
    Bind {
        socket_id: SocketId,
        socket_type: SocketType,
        endpoint: Endpoint,
        engine_options: EngineOptions,
        sndhwm: u32,
        rcvhwm: u32,
        events_tx: mpsc::Sender<SocketEvent>,
        reply_tx: mpsc::Sender<Result<String>>,
    },
    Connect {
        socket_id: SocketId,
        socket_type: SocketType,
        endpoint: Endpoint,
        engine_options: EngineOptions,
        reconnect: ReconnectPolicy,
        session_pipe: Pipe,
    },
    CloseSocket {
        socket_id: SocketId,
        reply_tx: mpsc::Sender<()>,
    },
    Shutdown,
}

enum ListenerKind {
    Tcp(mio::net::TcpListener),
    #[cfg(unix)]
    Ipc(mio::net::UnixListener, String),
}

struct ListenerEntry {
    kind: ListenerKind,
    socket_id: SocketId,
    socket_type: SocketType,
    engine_options: EngineOptions,
    sndhwm: u32,
    rcvhwm: u32,
    events_tx: mpsc::Sender<SocketEvent>,
}

struct SessionEntry {
    socket_id: SocketId,
    session: Session,
}

/// Spawns one I/O thread and blocks until its `mio::Poll` exists,
/// returning the mailbox used to drive it and a handle to join on
/// shutdown.
pub fn spawn() -> (Arc<Mailbox<ThreadCmd>>, JoinHandle<()>) {
    let (handshake_tx, handshake_rx) = mpsc::channel();
    let join = std::thread::Builder::new()
        .name("serverlink-io".to_owned())
        .spawn(move || {
            let poll = Poll::new().expect("mio::Poll::new");
            let waker = Arc::new(Waker::new(poll.registry(), WAKE_TOKEN).expect("mio::Waker::new"));
            let mailbox = Arc::new(Mailbox::new(Signaler::new(waker)));
            handshake_tx.send(mailbox.clone()).expect("io thread handshake");
            run(poll, mailbox);
        })
        .expect("spawn io thread");
    let mailbox = handshake_rx.recv().expect("io thread failed to start");
    (mailbox, join)
}

fn run(mut poll: Poll, mailbox: Arc<Mailbox<ThreadCmd>>) {
    let mut events = Events::with_capacity(256);
    let mut listeners: HashMap<Token, ListenerEntry> = HashMap::new();
    let mut sessions: HashMap<Token, SessionEntry> = HashMap::new();
    let mut next_token = FIRST_DYNAMIC_TOKEN;
    let mut shutting_down = false;

    loop {
        if let Err(e) = poll.poll(&mut events, Some(POLL_TIMEOUT)) {
            if e.kind() != std::io::ErrorKind::Interrupted {
                log::warn!("io thread poll failed: {e}");
            }
        }

        for ev in events.iter() {
            let token = ev.token();
            if token == WAKE_TOKEN {
                for cmd in mailbox.recv_all() {
                    match cmd {
                        ThreadCmd::Shutdown => shutting_down = true,
                        ThreadCmd::Bind {
                            socket_id,
                            socket_type,
                            endpoint,
                            engine_options,
                            sndhwm,
                            rcvhwm,
                            events_tx,
                            reply_tx,
                        } => {
                            let result = do_bind(
                                endpoint,
                                socket_id,
                                socket_type,
                                engine_options,
                                sndhwm,
                                rcvhwm,
                                events_tx,
                                &poll,
                                &mut listeners,
                                &mut next_token,
                            );
                            let _ = reply_tx.send(result);
                        }
                        ThreadCmd::Connect {
                            socket_id,
                            socket_type,
                            endpoint,
                            engine_options,
                            reconnect,
                            session_pipe,
                        } => {
                            do_connect(
                                socket_id,
                                socket_type,
                                endpoint,
                                engine_options,
                                reconnect,
                                session_pipe,
                                &poll,
                                &mut sessions,
                                &mut next_token,
                            );
                        }
                        ThreadCmd::CloseSocket { socket_id, reply_tx } => {
                            close_socket(socket_id, &poll, &mut listeners, &mut sessions);
                            let _ = reply_tx.send(());
                        }
                    }
                }
                continue;
            }

            if let Some(entry) = listeners.get_mut(&token) {
                accept_all(entry, &poll, &mut sessions, &mut next_token);
                continue;
            }

            if let Some(entry) = sessions.get_mut(&token) {
                if ev.is_readable() {
                    let _ = entry.session.on_readable(poll.registry());
                }
                if ev.is_writable() {
                    let _ = entry.session.on_writable(poll.registry());
                }
            }
        }

        let now = Instant::now();
        for entry in sessions.values_mut() {
            let _ = entry.session.tick(now, poll.registry());
        }
        sessions.retain(|_, entry| !entry.session.is_terminated());

        if shutting_down && sessions.is_empty() {
            return;
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn do_bind(
    endpoint: Endpoint,
    socket_id: SocketId,
    socket_type: SocketType,
    engine_options: EngineOptions,
    sndhwm: u32,
    rcvhwm: u32,
    events_tx: mpsc::Sender<SocketEvent>,
    poll: &Poll,
    listeners: &mut HashMap<Token, ListenerEntry>,
    next_token: &mut usize,
) -> Result<String> {
    match endpoint {
        Endpoint::Tcp(hostport) => {
            let (mut listener, addr) = transport::tcp::bind(&hostport)?;
            let token = Token(*next_token);
            *next_token += 1;
            poll.registry()
                .register(&mut listener, token, Interest::READABLE)
                .map_err(crate::error::Error::Io)?;
            let uri = format!("tcp://{addr}");
            listeners.insert(
                token,
                ListenerEntry {
                    kind: ListenerKind::Tcp(listener),
                    socket_id,
                    socket_type,
                    engine_options,
                    sndhwm,
                    rcvhwm,
                    events_tx,
                },
            );
            Ok(uri)
        }
        #[cfg(unix)]
        Endpoint::Ipc(path) => {
            let mut listener = transport::ipc::bind(&path)?;
            let token = Token(*next_token);
            *next_token += 1;
            poll.registry()
                .register(&mut listener, token, Interest::READABLE)
                .map_err(crate::error::Error::Io)?;
            let uri = format!("ipc://{path}");
            listeners.insert(
                token,
                ListenerEntry {
                    kind: ListenerKind::Ipc(listener, path),
                    socket_id,
                    socket_type,
                    engine_options,
                    sndhwm,
                    rcvhwm,
                    events_tx,
                },
            );
            Ok(uri)
        }
        #[cfg(not(unix))]
        Endpoint::Ipc(_) => Err(crate::error::Error::InvalidInput("ipc:// unsupported on this platform")),
        Endpoint::Inproc(_) => Err(crate::error::Error::InvalidInput(
            "inproc:// binds never reach the io thread",
        )),
    }
}

fn accept_all(
    entry: &mut ListenerEntry,
    poll: &Poll,
    sessions: &mut HashMap<Token, SessionEntry>,
    next_token: &mut usize,
) {
    loop {
        let stream = match &mut entry.kind {
            ListenerKind::Tcp(listener) => match listener.accept() {
                Ok((stream, _addr)) => {
                    let _ = transport::tcp::set_keepalive(&stream, &entry.engine_options.keepalive);
                    EngineStream::Tcp(stream)
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("accept failed: {e}");
                    break;
                }
            },
            #[cfg(unix)]
            ListenerKind::Ipc(listener, _) => match listener.accept() {
                Ok((stream, _addr)) => EngineStream::Ipc(stream),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::warn!("accept failed: {e}");
                    break;
                }
            },
        };

        let token = Token(*next_token);
        *next_token += 1;
        let (socket_pipe, session_pipe) = pipepair([(entry.sndhwm, entry.rcvhwm), (entry.rcvhwm, entry.sndhwm)]);

        let mut session = Session::for_accepted(entry.socket_type, session_pipe, token, stream, entry.engine_options.clone());
        let _ = session.register(poll.registry());
        sessions.insert(
            token,
            SessionEntry {
                socket_id: entry.socket_id,
                session,
            },
        );
        let _ = entry.events_tx.send(SocketEvent::PipeAttached {
            pipe: socket_pipe,
            identity: None,
        });
    }
}

#[allow(clippy::too_many_arguments)]
fn do_connect(
    socket_id: SocketId,
    socket_type: SocketType,
    endpoint: Endpoint,
    engine_options: EngineOptions,
    reconnect: ReconnectPolicy,
    session_pipe: Pipe,
    poll: &Poll,
    sessions: &mut HashMap<Token, SessionEntry>,
    next_token: &mut usize,
) {
    let token = Token(*next_token);
    *next_token += 1;
    let mut session = Session::connecting(socket_type, session_pipe, token, endpoint, reconnect, engine_options);
    let _ = session.register(poll.registry());
    sessions.insert(token, SessionEntry { socket_id, session });
}

fn close_socket(
    socket_id: SocketId,
    poll: &Poll,
    listeners: &mut HashMap<Token, ListenerEntry>,
    sessions: &mut HashMap<Token, SessionEntry>,
) {
    let dead: Vec<Token> = listeners
        .iter()
        .filter(|(_, entry)| entry.socket_id == socket_id)
        .map(|(token, _)| *token)
        .collect();
    for token in dead {
        if let Some(mut entry) = listeners.remove(&token) {
            match &mut entry.kind {
                ListenerKind::Tcp(listener) => {
                    let _ = poll.registry().deregister(listener);
                }
                #[cfg(unix)]
                ListenerKind::Ipc(listener, path) => {
                    let _ = poll.registry().deregister(listener);
                    transport::ipc::unlink(path);
                }
            }
        }
    }

    let mut reap = Vec::new();
    for (token, entry) in sessions.iter_mut() {
        if entry.socket_id != socket_id {
            continue;
        }
        match entry.session.engine_mut() {
            Some(engine) => engine.shutdown(),
            // Still backing off toward its first connect attempt; no
            // engine to drain, just drop it.
            None => reap.push(*token),
        }
    }
    for token in reap {
        sessions.remove(&token);
    }
}

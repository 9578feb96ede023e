// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The application-facing socket handle (spec §4.9): owns a `Protocol`
//! variant and talks to the `Context`'s I/O threads only for the
//! transport-facing half of bind/connect. Send/recv dispatch straight
//! to the `Protocol`, matching the socket/protocol split used
//! elsewhere in this crate, rather than round-tripping every message
//! through a command channel —
//! `inproc://` pipes and the pipes a listener hands back are shared
//! directly between this thread and whichever thread drains the other
//! end.

use std::sync::mpsc;
use std::time::{Duration, Instant};

use crate::context::Context;
use crate::engine::EngineOptions;
use crate::error::{Error, Result};
use crate::global::{SocketId, SocketType};
use crate::io_thread::{SocketEvent, ThreadCmd};
use crate::msg::Msg;
use crate::pipe::pipepair;
use crate::session::ReconnectPolicy;
use crate::transport::{self, Endpoint};

use super::dealer::Dealer;
use super::pair::Pair;
use super::pub_::Pub;
use super::router::Router;
use super::sub::Sub;
use super::xpub::XPub;
use super::xsub::XSub;
use super::{flags, Protocol, SocketCore};

/// How long a blocking `send`/`recv` sleeps between polls of the
/// `Protocol` once neither `xhas_out`/`xhas_in` nor a freshly attached
/// pipe made progress (spec §4.9 leaves the exact backoff unspecified;
/// this mirrors the busy-poll granularity used for blocking socket
/// calls elsewhere in this lineage of code).
const BLOCKING_POLL_INTERVAL: Duration = Duration::from_millis(1);

pub struct Socket {
    id: SocketId,
    socket_type: SocketType,
    ctx: Context,
    proto: Box<dyn Protocol>,
    events_tx: mpsc::Sender<SocketEvent>,
    events_rx: mpsc::Receiver<SocketEvent>,
    bound_inproc: Vec<String>,
    last_recv_had_more: bool,
    closed: bool,
}

fn make_protocol(socket_type: SocketType, core: SocketCore) -> Box<dyn Protocol> {
    match socket_type {
        SocketType::Pair => Box::new(Pair::new(core)),
        SocketType::Dealer => Box::new(Dealer::new(core)),
        SocketType::Router => Box::new(Router::new(core)),
        SocketType::Pub => Box::new(Pub::new(core)),
        SocketType::Sub => Box::new(Sub::new(core)),
        SocketType::XPub => Box::new(XPub::new(core)),
        SocketType::XSub => Box::new(XSub::new(core)),
    }
}

fn endpoint_uri(endpoint: &Endpoint) -> String {
    match endpoint {
        Endpoint::Tcp(hostport) => format!("tcp://{hostport}"),
        Endpoint::Ipc(path) => format!("ipc://{path}"),
        Endpoint::Inproc(name) => format!("inproc://{name}"),
    }
}

fn non_zero_ms(ms: u32) -> Option<Duration> {
    if ms == 0 {
        None
    } else {
        Some(Duration::from_millis(ms as u64))
    }
}

fn be_u32(value: &[u8]) -> Result<u32> {
    let bytes: [u8; 4] = value
        .try_into()
        .map_err(|_| Error::InvalidInput("expected a 4-byte option value"))?;
    Ok(u32::from_be_bytes(bytes))
}

fn be_i32(value: &[u8]) -> Result<i32> {
    let bytes: [u8; 4] = value
        .try_into()
        .map_err(|_| Error::InvalidInput("expected a 4-byte option value"))?;
    Ok(i32::from_be_bytes(bytes))
}

impl Socket {
    pub(crate) fn new(id: SocketId, socket_type: SocketType, ctx: Context) -> Socket {
        let (events_tx, events_rx) = mpsc::channel();
        Socket {
            id,
            socket_type,
            ctx,
            proto: make_protocol(socket_type, SocketCore::new()),
            events_tx,
            events_rx,
            bound_inproc: Vec::new(),
            last_recv_had_more: false,
            closed: false,
        }
    }

    pub fn id(&self) -> SocketId {
        self.id
    }

    pub fn socket_type(&self) -> SocketType {
        self.socket_type
    }

    fn check_alive(&self) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidInput("socket already closed"));
        }
        if self.ctx.is_terminated() {
            return Err(Error::Term);
        }
        Ok(())
    }

    /// Adopts pipes handed back from the I/O thread (listener accepts,
    /// pending connects) and anything queued for a bound `inproc://`
    /// name. Called before every send/recv attempt and on each spin of
    /// a blocking one, since neither source wakes this thread up.
    fn drain_events(&mut self) {
        while let Ok(SocketEvent::PipeAttached { pipe, identity }) = self.events_rx.try_recv() {
            self.proto.xattach_pipe(pipe, identity);
        }
        for name in &self.bound_inproc {
            while let Some(pipe) = transport::inproc::accept(name) {
                self.proto.xattach_pipe(pipe, None);
            }
        }
    }

    fn engine_options(&self) -> EngineOptions {
        let core = self.proto.core();
        EngineOptions {
            identity: core.identity.clone(),
            heartbeat_ivl: non_zero_ms(core.heartbeat_ivl_ms),
            heartbeat_timeout: non_zero_ms(core.heartbeat_timeout_ms),
            heartbeat_ttl: non_zero_ms(core.heartbeat_ttl_ms),
            handshake_ivl: Duration::from_secs(30),
            max_msg_size: None,
            keepalive: transport::tcp::KeepaliveConfig {
                enabled: core.tcp_keepalive.unwrap_or(false),
                idle: non_zero_ms(core.tcp_keepalive_idle_ms),
                interval: non_zero_ms(core.tcp_keepalive_intvl_ms),
                retries: if core.tcp_keepalive_cnt > 0 {
                    Some(core.tcp_keepalive_cnt)
                } else {
                    None
                },
            },
        }
    }

    fn reconnect_policy(&self) -> ReconnectPolicy {
        let core = self.proto.core();
        ReconnectPolicy {
            ivl: Duration::from_millis(core.reconnect_ivl_ms as u64),
            ivl_max: Duration::from_millis(core.reconnect_ivl_max_ms as u64),
        }
    }

    /// Binds `endpoint` (spec §4.9 `zmq_bind`). `inproc://` claims the
    /// name synchronously; `tcp://`/`ipc://` round-trip through an I/O
    /// thread so the listening socket lives on its `mio::Poll`.
    pub fn bind(&mut self, endpoint: &str) -> Result<String> {
        self.check_alive()?;
        let parsed = transport::parse_endpoint(endpoint)?;
        let uri = match parsed {
            Endpoint::Inproc(name) => {
                transport::inproc::bind(&name)?;
                self.bound_inproc.push(name);
                endpoint_uri(&Endpoint::Inproc(self.bound_inproc.last().unwrap().clone()))
            }
            other => {
                let (sndhwm, rcvhwm) = {
                    let core = self.proto.core();
                    (core.sndhwm, core.rcvhwm)
                };
                let (reply_tx, reply_rx) = mpsc::channel();
                let cmd = ThreadCmd::Bind {
                    socket_id: self.id,
                    socket_type: self.socket_type,
                    endpoint: other,
                    engine_options: self.engine_options(),
                    sndhwm,
                    rcvhwm,
                    events_tx: self.events_tx.clone(),
                    reply_tx,
                };
                self.ctx.pick_io_thread().send(cmd)?;
                reply_rx.recv().map_err(|_| Error::Term)??
            }
        };
        self.proto.core_mut().last_endpoint = Some(uri.clone());
        Ok(uri)
    }

    /// Connects to `endpoint` (spec §4.9 `zmq_connect`). Returns as
    /// soon as the pipe is attached locally; the transport connection
    /// itself (and any reconnection) happens on an I/O thread for
    /// `tcp://`/`ipc://`, or not at all for `inproc://`.
    pub fn connect(&mut self, endpoint: &str) -> Result<()> {
        self.check_alive()?;
        let parsed = transport::parse_endpoint(endpoint)?;
        let (sndhwm, rcvhwm, probe_router, connect_routing_id) = {
            let core = self.proto.core();
            (core.sndhwm, core.rcvhwm, core.probe_router, core.connect_routing_id.clone())
        };

        match parsed {
            Endpoint::Inproc(name) => {
                let socket_pipe = transport::inproc::connect(&name, [(sndhwm, rcvhwm), (rcvhwm, sndhwm)]);
                if probe_router {
                    socket_pipe.write(Msg::init_buffer(&[]));
                    socket_pipe.flush();
                }
                self.proto.xattach_pipe(socket_pipe, connect_routing_id);
                self.proto.core_mut().last_endpoint = Some(endpoint_uri(&Endpoint::Inproc(name)));
            }
            other => {
                let uri = endpoint_uri(&other);
                let (socket_pipe, session_pipe) = pipepair([(sndhwm, rcvhwm), (rcvhwm, sndhwm)]);
                if probe_router {
                    socket_pipe.write(Msg::init_buffer(&[]));
                    socket_pipe.flush();
                }
                self.proto.xattach_pipe(socket_pipe, connect_routing_id);

                let cmd = ThreadCmd::Connect {
                    socket_id: self.id,
                    socket_type: self.socket_type,
                    endpoint: other,
                    engine_options: self.engine_options(),
                    reconnect: self.reconnect_policy(),
                    session_pipe,
                };
                self.ctx.pick_io_thread().send(cmd)?;
                self.proto.core_mut().last_endpoint = Some(uri);
            }
        }
        Ok(())
    }

    /// Sends one frame (spec §4.9 `zmq_send`). Set `flags::SNDMORE` to
    /// chain further frames into the same logical message;
    /// `flags::DONTWAIT` returns `Error::Again` instead of blocking.
    /// Retries hand the `Protocol` a fresh `msg.copy()` each attempt so
    /// a transient `Again` never loses the caller's payload.
    pub fn send(&mut self, mut msg: Msg, op_flags: i32) -> Result<()> {
        self.check_alive()?;
        if op_flags & flags::SNDMORE != 0 {
            msg.set_more(true);
        }
        loop {
            self.drain_events();
            if self.proto.xhas_out() {
                match self.proto.xsend(msg.copy()) {
                    Ok(()) => return Ok(()),
                    Err(Error::Again) => {}
                    Err(e) => return Err(e),
                }
            }
            if op_flags & flags::DONTWAIT != 0 {
                return Err(Error::Again);
            }
            self.check_alive()?;
            std::thread::sleep(BLOCKING_POLL_INTERVAL);
        }
    }

    /// Receives one frame (spec §4.9 `zmq_recv`). Check `RCVMORE` via
    /// `getsockopt` to know whether more frames of the same logical
    /// message follow.
    pub fn recv(&mut self, op_flags: i32) -> Result<Msg> {
        self.check_alive()?;
        loop {
            self.drain_events();
            if self.proto.xhas_in() {
                match self.proto.xrecv() {
                    Ok(msg) => {
                        self.last_recv_had_more = msg.has_more();
                        return Ok(msg);
                    }
                    Err(Error::Again) => {}
                    Err(e) => return Err(e),
                }
            }
            if op_flags & flags::DONTWAIT != 0 {
                return Err(Error::Again);
            }
            self.check_alive()?;
            std::thread::sleep(BLOCKING_POLL_INTERVAL);
        }
    }

    /// Sets a socket option (spec §4.9's option table). Common options
    /// (HWMs, LINGER, IDENTITY, HEARTBEAT_*, RECONNECT_*, TCP_KEEPALIVE*,
    /// PROBE_ROUTER, ZERO_COPY_RECV) are handled here; anything else is
    /// delegated to the pattern (`SUBSCRIBE`, `ROUTER_MANDATORY`, ...).
    pub fn setsockopt(&mut self, opt: &str, value: &[u8]) -> Result<()> {
        match opt {
            "SNDHWM" => {
                self.proto.core_mut().sndhwm = be_u32(value)?;
                Ok(())
            }
            "RCVHWM" => {
                self.proto.core_mut().rcvhwm = be_u32(value)?;
                Ok(())
            }
            "LINGER" => {
                self.proto.core_mut().linger_ms = be_i32(value)?;
                Ok(())
            }
            "IDENTITY" | "ROUTING_ID" => {
                if value.len() > 255 {
                    return Err(Error::InvalidInput("routing id exceeds 255 bytes"));
                }
                self.proto.core_mut().identity = value.to_vec();
                Ok(())
            }
            "CONNECT_ROUTING_ID" => {
                self.proto.core_mut().connect_routing_id = Some(value.to_vec());
                Ok(())
            }
            "HEARTBEAT_IVL" => {
                self.proto.core_mut().heartbeat_ivl_ms = be_u32(value)?;
                Ok(())
            }
            "HEARTBEAT_TIMEOUT" => {
                self.proto.core_mut().heartbeat_timeout_ms = be_u32(value)?;
                Ok(())
            }
            "HEARTBEAT_TTL" => {
                self.proto.core_mut().heartbeat_ttl_ms = be_u32(value)?;
                Ok(())
            }
            "RECONNECT_IVL" => {
                self.proto.core_mut().reconnect_ivl_ms = be_u32(value)?;
                Ok(())
            }
            "RECONNECT_IVL_MAX" => {
                self.proto.core_mut().reconnect_ivl_max_ms = be_u32(value)?;
                Ok(())
            }
            "TCP_KEEPALIVE" => {
                self.proto.core_mut().tcp_keepalive = Some(value.first() == Some(&1));
                Ok(())
            }
            "TCP_KEEPALIVE_IDLE" => {
                self.proto.core_mut().tcp_keepalive_idle_ms = be_u32(value)?;
                Ok(())
            }
            "TCP_KEEPALIVE_INTVL" => {
                self.proto.core_mut().tcp_keepalive_intvl_ms = be_u32(value)?;
                Ok(())
            }
            "TCP_KEEPALIVE_CNT" => {
                self.proto.core_mut().tcp_keepalive_cnt = be_u32(value)?;
                Ok(())
            }
            "PROBE_ROUTER" => {
                self.proto.core_mut().probe_router = value.first() == Some(&1);
                Ok(())
            }
            "ZERO_COPY_RECV" => {
                self.proto.core_mut().zero_copy_recv = value.first() == Some(&1);
                Ok(())
            }
            _ => self.proto.xsetsockopt(opt, value),
        }
    }

    /// Reads back a socket option. Common ones are served from
    /// `SocketCore`; anything else delegates to the pattern
    /// (`TOPICS_COUNT`, and so on).
    pub fn getsockopt(&mut self, opt: &str) -> Option<Vec<u8>> {
        match opt {
            "LAST_ENDPOINT" => self.proto.core().last_endpoint.clone().map(String::into_bytes),
            "RCVMORE" => Some(vec![self.last_recv_had_more as u8]),
            "IDENTITY" | "ROUTING_ID" => Some(self.proto.core().identity.clone()),
            "SNDHWM" => Some(self.proto.core().sndhwm.to_be_bytes().to_vec()),
            "RCVHWM" => Some(self.proto.core().rcvhwm.to_be_bytes().to_vec()),
            "LINGER" => Some(self.proto.core().linger_ms.to_be_bytes().to_vec()),
            _ => self.proto.xgetsockopt(opt),
        }
    }

    /// Closes the socket (spec §4.9 `zmq_close`): honors `LINGER` by
    /// waiting (bounded, or indefinitely for a negative value) for
    /// queued outbound data to drain before tearing down every session
    /// this socket owns, on every I/O thread it might have used.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(Error::InvalidInput("socket already closed"));
        }
        self.closed = true;
        self.drain_events();

        let linger = self.proto.core().linger_ms;
        if linger != 0 {
            let deadline = if linger < 0 {
                None
            } else {
                Some(Instant::now() + Duration::from_millis(linger as u64))
            };
            while self.proto.core().pipes.iter().any(|p| p.depth() > 0) {
                if let Some(at) = deadline {
                    if Instant::now() >= at {
                        break;
                    }
                }
                std::thread::sleep(BLOCKING_POLL_INTERVAL);
            }
        }

        for name in self.bound_inproc.drain(..) {
            transport::inproc::unbind(&name);
        }

        // `inproc://` pipes have no engine/session on the other end to
        // emit a DELIMITER on our behalf (spec §8 universal property 6);
        // a TCP/IPC pipe gets this from `engine.shutdown()` too, via
        // `io_thread`'s `CloseSocket` handling below, but calling it
        // here as well is a harmless no-op on an already-terminating
        // pipe.
        for pipe in &self.proto.core().pipes {
            pipe.terminate(false);
        }

        let mailboxes = self.ctx.io_thread_mailboxes();
        let (reply_tx, reply_rx) = mpsc::channel();
        let mut pending = 0;
        for mailbox in &mailboxes {
            if mailbox
                .send(ThreadCmd::CloseSocket {
                    socket_id: self.id,
                    reply_tx: reply_tx.clone(),
                })
                .is_ok()
            {
                pending += 1;
            }
        }
        for _ in 0..pending {
            let _ = reply_rx.recv();
        }

        self.ctx.socket_closed();
        Ok(())
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;

    #[test]
    fn inproc_round_trip_between_two_sockets() {
        let ctx = Context::new();
        let mut server = ctx.socket(SocketType::Pair).unwrap();
        let mut client = ctx.socket(SocketType::Pair).unwrap();

        let name = format!("facade-test-{}", server.id().0);
        server.bind(&format!("inproc://{name}")).unwrap();
        client.connect(&format!("inproc://{name}")).unwrap();

        client.send(Msg::init_buffer(b"hello"), flags::NONE).unwrap();
        let got = server.recv(flags::NONE).unwrap();
        assert_eq!(got.data(), b"hello");
    }

    #[test]
    fn dontwait_recv_on_empty_socket_is_again() {
        let ctx = Context::new();
        let mut socket = ctx.socket(SocketType::Pair).unwrap();
        assert!(matches!(socket.recv(flags::DONTWAIT), Err(Error::Again)));
    }

    #[test]
    fn setsockopt_rejects_oversized_identity() {
        let ctx = Context::new();
        let mut socket = ctx.socket(SocketType::Router).unwrap();
        let oversized = vec![0u8; 256];
        assert!(matches!(socket.setsockopt("IDENTITY", &oversized), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn last_endpoint_reflects_the_most_recent_bind() {
        let ctx = Context::new();
        let mut socket = ctx.socket(SocketType::Pair).unwrap();
        let name = format!("facade-last-endpoint-{}", socket.id().0);
        let uri = socket.bind(&format!("inproc://{name}")).unwrap();
        assert_eq!(socket.getsockopt("LAST_ENDPOINT").unwrap(), uri.into_bytes());
    }

    #[test]
    fn close_is_not_idempotent_twice() {
        let ctx = Context::new();
        let mut socket = ctx.socket(SocketType::Pair).unwrap();
        socket.close().unwrap();
        assert!(matches!(socket.close(), Err(Error::InvalidInput(_))));
    }
}

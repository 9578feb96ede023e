// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Socket base and the seven pattern variants (spec §4.9). Dynamic
//! dispatch between patterns — a REDESIGN FLAGS item — is expressed as
//! one `Protocol` trait (generalizing the `protocol::Protocol` trait
//! seen in `examples/kpcyrd-scaproust/src/protocol/pbu.rs` from
//! nanomsg's nine patterns down to ZMTP's seven) implemented by a
//! tagged struct per pattern, rather than runtime type inspection.

pub mod dealer;
pub mod facade;
pub mod pair;
pub mod pub_;
pub mod router;
pub mod sub;
pub mod xpub;
pub mod xsub;

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::global::SocketType;
use crate::msg::Msg;
use crate::pipe::Pipe;

/// Flags accepted by `Socket::send`/`Socket::recv` (spec §4.9).
pub mod flags {
    pub const NONE: i32 = 0;
    pub const DONTWAIT: i32 = 1;
    pub const SNDMORE: i32 = 2;
}

/// Per-pattern routing/send/recv policy (spec §9 REDESIGN FLAGS). Every
/// variant lives behind this one trait; `SocketCore` drives it and owns
/// the option table and pipe bookkeeping common to all patterns.
pub trait Protocol: Send {
    fn socket_type(&self) -> SocketType;

    /// Gives the socket base (§4.9's common option table, bind/connect
    /// wiring) read access to the fields every pattern shares, without
    /// requiring each variant to re-expose them individually.
    fn core(&self) -> &SocketCore;
    fn core_mut(&mut self) -> &mut SocketCore;

    /// A new pipe has been attached (peer connected/accepted).
    /// `identity` is the peer's declared routing id, if any.
    fn xattach_pipe(&mut self, pipe: Pipe, identity: Option<Vec<u8>>);
    fn xpipe_terminated(&mut self, pipe: &Pipe);
    /// The peer's side of a pipe went from empty to non-empty: more
    /// input may now be available to `xrecv`.
    fn xread_activated(&mut self, _pipe: &Pipe) {}
    /// The peer drained our queue below HWM: more output may now be
    /// acceptable to `xsend`.
    fn xwrite_activated(&mut self, _pipe: &Pipe) {}
    /// A previously stalled pipe reconnected; buffered-but-unflushed
    /// state on it should be considered stale.
    fn xhiccuped(&mut self, pipe: &Pipe) {
        pipe.hiccup();
    }

    fn xsend(&mut self, msg: Msg) -> Result<()>;
    fn xrecv(&mut self) -> Result<Msg>;
    fn xhas_in(&mut self) -> bool;
    fn xhas_out(&mut self) -> bool;

    /// Table-driven option set; `Err(InvalidInput)` for options this
    /// pattern doesn't recognize (the base handles the common ones
    /// before delegating here).
    fn xsetsockopt(&mut self, _opt: &str, _value: &[u8]) -> Result<()> {
        Err(Error::InvalidInput("unknown option for this socket type"))
    }
    fn xgetsockopt(&mut self, _opt: &str) -> Option<Vec<u8>> {
        None
    }
}

/// Common bookkeeping shared by every pattern: live pipes, the
/// routing-id table (meaningful only for ROUTER but harmless to carry
/// generically), and the option values spec §4.9's table names.
pub struct SocketCore {
    pub pipes: Vec<Pipe>,
    pub identity: Vec<u8>,
    pub connect_routing_id: Option<Vec<u8>>,
    pub sndhwm: u32,
    pub rcvhwm: u32,
    pub linger_ms: i32,
    pub router_mandatory: bool,
    pub router_handover: bool,
    pub router_notify: RouterNotify,
    pub xpub_verbose: bool,
    pub xpub_verboser: bool,
    pub xpub_manual: bool,
    pub xpub_nodrop: bool,
    pub heartbeat_ivl_ms: u32,
    pub heartbeat_timeout_ms: u32,
    pub heartbeat_ttl_ms: u32,
    pub reconnect_ivl_ms: u32,
    pub reconnect_ivl_max_ms: u32,
    pub last_endpoint: Option<String>,
    /// `routing_id bytes -> index into pipes` for ROUTER-style lookup.
    pub routing_table: HashMap<Vec<u8>, usize>,
    pub tcp_keepalive: Option<bool>,
    pub tcp_keepalive_idle_ms: u32,
    pub tcp_keepalive_intvl_ms: u32,
    pub tcp_keepalive_cnt: u32,
    /// Sends an empty probe message right after a pipe is attached on
    /// the connect side, so a ROUTER peer learns the routing id before
    /// any application traffic arrives.
    pub probe_router: bool,
    /// Best-effort: accepted and reported back by `getsockopt`, but the
    /// decoder's zero-copy path (spec §4.4) is driven by its own
    /// large-buffer allocator rather than this flag.
    pub zero_copy_recv: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct RouterNotify {
    pub connect: bool,
    pub disconnect: bool,
}

impl Default for SocketCore {
    fn default() -> Self {
        SocketCore {
            pipes: Vec::new(),
            identity: Vec::new(),
            connect_routing_id: None,
            sndhwm: 1000,
            rcvhwm: 1000,
            linger_ms: -1,
            router_mandatory: false,
            router_handover: false,
            router_notify: RouterNotify::default(),
            xpub_verbose: false,
            xpub_verboser: false,
            xpub_manual: false,
            xpub_nodrop: false,
            heartbeat_ivl_ms: 0,
            heartbeat_timeout_ms: 0,
            heartbeat_ttl_ms: 0,
            reconnect_ivl_ms: 100,
            reconnect_ivl_max_ms: 0,
            last_endpoint: None,
            routing_table: HashMap::new(),
            tcp_keepalive: None,
            tcp_keepalive_idle_ms: 0,
            tcp_keepalive_intvl_ms: 0,
            tcp_keepalive_cnt: 0,
            probe_router: false,
            zero_copy_recv: false,
        }
    }
}

impl SocketCore {
    pub fn new() -> SocketCore {
        SocketCore::default()
    }

    pub fn add_pipe(&mut self, pipe: Pipe, identity: Option<Vec<u8>>) {
        pipe.set_hwms(self.sndhwm, self.rcvhwm);
        if let Some(id) = identity {
            let idx = self.pipes.len();
            self.routing_table.insert(id.clone(), idx);
            pipe.set_routing_id(id);
        }
        self.pipes.push(pipe);
    }

    pub fn remove_pipe(&mut self, pipe: &Pipe) {
        if let Some(pos) = self.pipes.iter().position(|p| p == pipe) {
            self.pipes.remove(pos);
        }
        self.routing_table.retain(|_, idx| {
            if let Some(p) = self.pipes.get(*idx) {
                p != pipe
            } else {
                false
            }
        });
        // indices shifted by removal; rebuild rather than patch in place
        self.rebuild_routing_table();
    }

    /// Rebuilds the routing-id index from each pipe's *current*
    /// `routing_id()`. Needed beyond `remove_pipe`'s own bookkeeping
    /// because a TCP/IPC pipe is attached before its handshake
    /// completes — `xattach_pipe` gets no identity yet, and the engine
    /// calls `pipe.set_routing_id` directly once the peer's `Identity`
    /// property arrives, bypassing this table entirely.
    pub(crate) fn rebuild_routing_table(&mut self) {
        let mut table = HashMap::new();
        for (idx, pipe) in self.pipes.iter().enumerate() {
            if let Some(id) = pipe.routing_id() {
                table.insert(id, idx);
            }
        }
        self.routing_table = table;
    }

    pub fn find_pipe(&self, routing_id: &[u8]) -> Option<&Pipe> {
        self.routing_table.get(routing_id).and_then(|&i| self.pipes.get(i))
    }
}

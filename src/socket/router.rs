// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! ROUTER (spec §4.9): prepends a routing-id frame on receive, expects
//! one as the first frame on send. `ROUTER_MANDATORY` turns an unknown
//! destination into `EHOSTUNREACH`; without it the message is silently
//! dropped. `ROUTER_HANDOVER` lets a second peer claiming an already-
//! known routing id evict the first. `ROUTER_NOTIFY` emits zero-payload
//! connect/disconnect notifications ahead of the routing id, mirroring
//! spec §4.9's per-pattern table.

use crate::error::{Error, Result};
use crate::global::SocketType;
use crate::msg::Msg;
use crate::pipe::Pipe;

use super::{Protocol, SocketCore};

/// Which pipe is being written to across a multi-frame `xsend` burst.
enum SendTarget {
    AwaitingIdentity,
    Pipe(usize),
    /// Unknown routing id without `ROUTER_MANDATORY`: drop the frames
    /// that follow until the next identity frame.
    Drop,
}

pub struct Router {
    core: SocketCore,
    send_target: SendTarget,
    recv_pipe: Option<usize>,
    recv_scan_from: usize,
    identity_pending: bool,
    pending_notify: Vec<Msg>,
}

impl Router {
    pub fn new(core: SocketCore) -> Router {
        Router {
            core,
            send_target: SendTarget::AwaitingIdentity,
            recv_pipe: None,
            recv_scan_from: 0,
            identity_pending: false,
            pending_notify: Vec::new(),
        }
    }

    fn notify(&mut self, routing_id: &[u8], connected: bool) {
        let fire = if connected {
            self.core.router_notify.connect
        } else {
            self.core.router_notify.disconnect
        };
        if !fire {
            return;
        }
        let mut id_frame = Msg::init_buffer(routing_id);
        id_frame.set_more(true);
        self.pending_notify.push(id_frame);
        self.pending_notify.push(Msg::init_buffer(&[]));
    }
}

impl Protocol for Router {
    fn socket_type(&self) -> SocketType {
        SocketType::Router
    }

    fn core(&self) -> &SocketCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SocketCore {
        &mut self.core
    }

    fn xattach_pipe(&mut self, pipe: Pipe, identity: Option<Vec<u8>>) {
        let id = identity.unwrap_or_else(|| format!("\0{}", pipe.identity()).into_bytes());
        if self.core.find_pipe(&id).is_some() && self.core.router_handover {
            if let Some(old) = self.core.find_pipe(&id).cloned() {
                self.core.remove_pipe(&old);
            }
        }
        self.notify(&id, true);
        self.core.add_pipe(pipe, Some(id));
    }

    fn xpipe_terminated(&mut self, pipe: &Pipe) {
        if let Some(id) = pipe.routing_id() {
            self.notify(&id, false);
        }
        self.core.remove_pipe(pipe);
        if self.recv_pipe.map(|i| &self.core.pipes[i] == pipe).unwrap_or(false) {
            self.recv_pipe = None;
        }
    }

    fn xsend(&mut self, msg: Msg) -> Result<()> {
        match self.send_target {
            SendTarget::AwaitingIdentity => {
                let id = msg.data().to_vec();
                if !msg.has_more() {
                    return Err(Error::Proto("ROUTER send requires routing id + payload"));
                }
                // A pipe attached before its handshake finished (every
                // TCP/IPC connection) only gets its real identity after
                // the fact, straight onto the pipe; resync before
                // trusting a lookup miss.
                self.core.rebuild_routing_table();
                match self.core.find_pipe(&id).cloned() {
                    Some(_) => {
                        let idx = *self.core.routing_table.get(&id).unwrap();
                        self.send_target = SendTarget::Pipe(idx);
                    }
                    None => {
                        if self.core.router_mandatory {
                            return Err(Error::HostUnreach);
                        }
                        self.send_target = SendTarget::Drop;
                    }
                }
                Ok(())
            }
            SendTarget::Pipe(idx) => {
                let more = msg.has_more();
                let ok = self.core.pipes[idx].write(msg);
                if !more {
                    self.core.pipes[idx].flush();
                    self.send_target = SendTarget::AwaitingIdentity;
                }
                if !ok && self.core.router_mandatory {
                    return Err(Error::Again);
                }
                Ok(())
            }
            SendTarget::Drop => {
                if !msg.has_more() {
                    self.send_target = SendTarget::AwaitingIdentity;
                }
                Ok(())
            }
        }
    }

    fn xrecv(&mut self) -> Result<Msg> {
        if let Some(msg) = self.pending_notify.first().cloned() {
            self.pending_notify.remove(0);
            return Ok(msg);
        }

        if self.identity_pending {
            self.identity_pending = false;
            let idx = self.recv_pipe.expect("identity_pending implies recv_pipe set");
            let id = self.core.pipes[idx].routing_id().unwrap_or_default();
            let mut m = Msg::init_buffer(&id);
            m.set_more(true);
            return Ok(m);
        }

        if let Some(idx) = self.recv_pipe {
            if let Some(msg) = self.core.pipes[idx].read() {
                if msg.is_delimiter() {
                    self.recv_pipe = None;
                } else if !msg.has_more() {
                    self.recv_pipe = None;
                    return Ok(msg);
                } else {
                    return Ok(msg);
                }
            } else {
                self.recv_pipe = None;
            }
        }

        let n = self.core.pipes.len();
        for step in 0..n {
            let idx = (self.recv_scan_from + step) % n;
            if self.core.pipes[idx].has_in() {
                self.recv_scan_from = (idx + 1) % n;
                self.recv_pipe = Some(idx);
                self.identity_pending = true;
                return self.xrecv();
            }
        }
        Err(Error::Again)
    }

    fn xhas_in(&mut self) -> bool {
        !self.pending_notify.is_empty()
            || self.recv_pipe.is_some()
            || self.core.pipes.iter().any(|p| p.has_in())
    }

    fn xhas_out(&mut self) -> bool {
        self.core.pipes.iter().any(|p| p.has_out())
    }

    fn xsetsockopt(&mut self, opt: &str, value: &[u8]) -> Result<()> {
        match opt {
            "ROUTER_MANDATORY" => {
                self.core.router_mandatory = value.first() == Some(&1);
                Ok(())
            }
            "ROUTER_HANDOVER" => {
                self.core.router_handover = value.first() == Some(&1);
                Ok(())
            }
            "ROUTER_NOTIFY" => {
                let bits = value.first().copied().unwrap_or(0);
                self.core.router_notify.connect = bits & 0x1 != 0;
                self.core.router_notify.disconnect = bits & 0x2 != 0;
                Ok(())
            }
            _ => Err(Error::InvalidInput("unknown option for ROUTER")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::pipepair;

    fn attach(router: &mut Router, id: &[u8]) -> Pipe {
        let (server_side, peer_side) = pipepair([(0, 0), (0, 0)]);
        router.xattach_pipe(server_side, Some(id.to_vec()));
        peer_side
    }

    #[test]
    fn recv_prepends_routing_id() {
        let mut router = Router::new(SocketCore::new());
        let peer = attach(&mut router, b"CLIENT");
        peer.write(Msg::init_buffer(b"HELLO"));
        peer.flush();

        let id_frame = router.xrecv().unwrap();
        assert!(id_frame.has_more());
        assert_eq!(id_frame.data(), b"CLIENT");
        let body = router.xrecv().unwrap();
        assert!(!body.has_more());
        assert_eq!(body.data(), b"HELLO");
    }

    #[test]
    fn send_routes_by_identity_frame() {
        let mut router = Router::new(SocketCore::new());
        let peer_a = attach(&mut router, b"A");
        let _peer_b = attach(&mut router, b"B");

        let mut id = Msg::init_buffer(b"A");
        id.set_more(true);
        router.xsend(id).unwrap();
        router.xsend(Msg::init_buffer(b"payload")).unwrap();

        let got = peer_a.read().unwrap();
        assert_eq!(got.data(), b"payload");
    }

    #[test]
    fn mandatory_unknown_destination_is_host_unreach() {
        let mut router = Router::new(SocketCore::new());
        router.core.router_mandatory = true;

        let mut id = Msg::init_buffer(b"UNKNOWN");
        id.set_more(true);
        assert!(matches!(router.xsend(id), Err(Error::HostUnreach)));
    }

    #[test]
    fn non_mandatory_unknown_destination_is_silently_dropped() {
        let mut router = Router::new(SocketCore::new());

        let mut id = Msg::init_buffer(b"UNKNOWN");
        id.set_more(true);
        assert!(router.xsend(id).is_ok());
        assert!(router.xsend(Msg::init_buffer(b"payload")).is_ok());
    }
}

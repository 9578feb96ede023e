// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! PAIR (spec §4.9): exactly one active peer. A second connection
//! attempt is accepted at the transport level (so the peer doesn't see
//! a connection failure) but its pipe is terminated immediately, as the
//! spec's wording ("terminated on first read") requires.

use crate::error::{Error, Result};
use crate::global::SocketType;
use crate::msg::Msg;
use crate::pipe::Pipe;

use super::{Protocol, SocketCore};

pub struct Pair {
    core: SocketCore,
    active: Option<Pipe>,
    spare: Vec<Pipe>,
}

impl Pair {
    pub fn new(core: SocketCore) -> Pair {
        Pair {
            core,
            active: None,
            spare: Vec::new(),
        }
    }
}

impl Protocol for Pair {
    fn socket_type(&self) -> SocketType {
        SocketType::Pair
    }

    fn core(&self) -> &SocketCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SocketCore {
        &mut self.core
    }

    fn xattach_pipe(&mut self, pipe: Pipe, identity: Option<Vec<u8>>) {
        if self.active.is_none() {
            self.core.add_pipe(pipe.clone(), identity);
            self.active = Some(pipe);
        } else {
            self.spare.push(pipe);
        }
    }

    fn xpipe_terminated(&mut self, pipe: &Pipe) {
        self.core.remove_pipe(pipe);
        if self.active.as_ref() == Some(pipe) {
            self.active = None;
        }
        self.spare.retain(|p| p != pipe);
    }

    fn xsend(&mut self, msg: Msg) -> Result<()> {
        let pipe = self.active.as_ref().ok_or(Error::Again)?;
        let more = msg.has_more();
        let ok = pipe.write(msg);
        if !more {
            pipe.flush();
        }
        if ok {
            Ok(())
        } else {
            Err(Error::Again)
        }
    }

    fn xrecv(&mut self) -> Result<Msg> {
        // A spare (second) peer is terminated the first time we'd
        // otherwise try to read from it.
        for spare in self.spare.drain(..) {
            spare.terminate(false);
        }
        let pipe = self.active.as_ref().ok_or(Error::Again)?;
        pipe.read().ok_or(Error::Again)
    }

    fn xhas_in(&mut self) -> bool {
        self.active.as_ref().map(|p| p.has_in()).unwrap_or(false)
    }

    fn xhas_out(&mut self) -> bool {
        self.active.as_ref().map(|p| p.has_out()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::pipepair;

    #[test]
    fn second_peer_is_terminated_on_first_read() {
        let mut pair = Pair::new(SocketCore::new());
        let (a, peer_a) = pipepair([(0, 0), (0, 0)]);
        let (b, peer_b) = pipepair([(0, 0), (0, 0)]);
        pair.xattach_pipe(a, None);
        pair.xattach_pipe(b, None);

        peer_a.write(Msg::init_buffer(b"hi"));
        peer_a.flush();
        assert_eq!(pair.xrecv().unwrap().data(), b"hi");

        // draining triggered termination of the spare pipe
        peer_b.write(Msg::init_buffer(b"ignored"));
        peer_b.flush();
        assert!(b.is_terminated() || peer_b.state() != crate::pipe::State::Active);
    }
}

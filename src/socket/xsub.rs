// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! XSUB (spec §4.9): raw mirror of SUB — the application sends
//! `SUBSCRIBE`/`CANCEL` messages itself via `xsend` (built with
//! `Msg::init_subscribe`/`init_cancel`) rather than through socket
//! options. XSUB still filters `xrecv` through the resulting local
//! trie, same as SUB.

use crate::error::{Error, Result};
use crate::global::SocketType;
use crate::msg::Msg;
use crate::pipe::Pipe;
use crate::trie::Trie;

use super::{Protocol, SocketCore};

pub struct XSub {
    core: SocketCore,
    trie: Trie,
    recv_scan_from: usize,
}

impl XSub {
    pub fn new(core: SocketCore) -> XSub {
        XSub {
            core,
            trie: Trie::new(),
            recv_scan_from: 0,
        }
    }
}

impl Protocol for XSub {
    fn socket_type(&self) -> SocketType {
        SocketType::XSub
    }

    fn core(&self) -> &SocketCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SocketCore {
        &mut self.core
    }

    fn xattach_pipe(&mut self, pipe: Pipe, identity: Option<Vec<u8>>) {
        self.core.add_pipe(pipe, identity);
    }

    fn xpipe_terminated(&mut self, pipe: &Pipe) {
        self.core.remove_pipe(pipe);
    }

    fn xsend(&mut self, msg: Msg) -> Result<()> {
        if msg.is_subscribe() {
            self.trie.add(msg.data());
        } else if msg.is_cancel() {
            self.trie.rm(msg.data());
        }
        for pipe in &self.core.pipes {
            pipe.write(msg.copy());
            pipe.flush();
        }
        Ok(())
    }

    fn xrecv(&mut self) -> Result<Msg> {
        let n = self.core.pipes.len();
        for step in 0..n {
            let idx = (self.recv_scan_from + step) % n;
            if let Some(msg) = self.core.pipes[idx].read() {
                self.recv_scan_from = (idx + 1) % n;
                if self.trie.check(msg.data()) {
                    return Ok(msg);
                }
                return Err(Error::Again);
            }
        }
        Err(Error::Again)
    }

    fn xhas_in(&mut self) -> bool {
        self.core.pipes.iter().any(|p| p.has_in())
    }

    fn xhas_out(&mut self) -> bool {
        self.core.pipes.iter().any(|p| p.has_out())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::pipepair;

    #[test]
    fn application_driven_subscribe_forwards_and_filters() {
        let mut xsub = XSub::new(SocketCore::new());
        let (server, peer) = pipepair([(0, 0), (0, 0)]);
        xsub.xattach_pipe(server, None);

        xsub.xsend(Msg::init_subscribe(b"A")).unwrap();
        assert!(peer.read().unwrap().is_subscribe());

        peer.write(Msg::init_buffer(b"A-data"));
        peer.flush();
        assert_eq!(xsub.xrecv().unwrap().data(), b"A-data");
    }
}

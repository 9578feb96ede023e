// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! DEALER (spec §4.9): round-robins outbound messages across writable
//! pipes, fair-queues inbound ones. No routing-id framing (that's
//! ROUTER's job) — a DEALER looks like a plain many-to-many pipe to its
//! application.

use crate::error::{Error, Result};
use crate::global::SocketType;
use crate::msg::Msg;
use crate::pipe::Pipe;

use super::{Protocol, SocketCore};

pub struct Dealer {
    core: SocketCore,
    send_pipe: Option<usize>,
    send_scan_from: usize,
    recv_pipe: Option<usize>,
    recv_scan_from: usize,
}

impl Dealer {
    pub fn new(core: SocketCore) -> Dealer {
        Dealer {
            core,
            send_pipe: None,
            send_scan_from: 0,
            recv_pipe: None,
            recv_scan_from: 0,
        }
    }

    fn pick_send_pipe(&mut self) -> Option<usize> {
        let n = self.core.pipes.len();
        if n == 0 {
            return None;
        }
        for step in 0..n {
            let idx = (self.send_scan_from + step) % n;
            if self.core.pipes[idx].has_out() {
                self.send_scan_from = (idx + 1) % n;
                return Some(idx);
            }
        }
        None
    }
}

impl Protocol for Dealer {
    fn socket_type(&self) -> SocketType {
        SocketType::Dealer
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
        self.send_pipe = None;
        if self.recv_pipe.map(|i| &self.core.pipes[i] == pipe).unwrap_or(false) {
            self.recv_pipe = None;
        }
    }

    fn xsend(&mut self, msg: Msg) -> Result<()> {
        let idx = match self.send_pipe {
            Some(idx) => idx,
            None => self.pick_send_pipe().ok_or(Error::Again)?,
        };
        let more = msg.has_more();
        let ok = self.core.pipes[idx].write(msg);
        if !ok {
            self.send_pipe = None;
            return Err(Error::Again);
        }
        if more {
            self.send_pipe = Some(idx);
        } else {
            self.core.pipes[idx].flush();
            self.send_pipe = None;
        }
        Ok(())
    }

    fn xrecv(&mut self) -> Result<Msg> {
        if let Some(idx) = self.recv_pipe {
            if let Some(msg) = self.core.pipes[idx].read() {
                if !msg.has_more() {
                    self.recv_pipe = None;
                }
                return Ok(msg);
            }
            self.recv_pipe = None;
        }

        let n = self.core.pipes.len();
        for step in 0..n {
            let idx = (self.recv_scan_from + step) % n;
            if let Some(msg) = self.core.pipes[idx].read() {
                self.recv_scan_from = (idx + 1) % n;
                if msg.has_more() {
                    self.recv_pipe = Some(idx);
                }
                return Ok(msg);
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
    fn round_robins_sends_across_pipes() {
        let mut dealer = Dealer::new(SocketCore::new());
        let (a, peer_a) = pipepair([(0, 0), (0, 0)]);
        let (b, peer_b) = pipepair([(0, 0), (0, 0)]);
        dealer.xattach_pipe(a, None);
        dealer.xattach_pipe(b, None);

        dealer.xsend(Msg::init_buffer(b"1")).unwrap();
        dealer.xsend(Msg::init_buffer(b"2")).unwrap();

        assert_eq!(peer_a.read().unwrap().data(), b"1");
        assert_eq!(peer_b.read().unwrap().data(), b"2");
    }

    #[test]
    fn fair_queues_receive_across_pipes() {
        let mut dealer = Dealer::new(SocketCore::new());
        let (a, peer_a) = pipepair([(0, 0), (0, 0)]);
        let (b, peer_b) = pipepair([(0, 0), (0, 0)]);
        dealer.xattach_pipe(a, None);
        dealer.xattach_pipe(b, None);

        peer_b.write(Msg::init_buffer(b"from-b"));
        peer_b.flush();
        peer_a.write(Msg::init_buffer(b"from-a"));
        peer_a.flush();

        let mut got = vec![dealer.xrecv().unwrap().data().to_vec()];
        got.push(dealer.xrecv().unwrap().data().to_vec());
        assert!(got.contains(&b"from-a".to_vec()));
        assert!(got.contains(&b"from-b".to_vec()));
    }
}

// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! SUB (spec §4.9): `SUBSCRIBE`/`UNSUBSCRIBE` options maintain a local
//! prefix trie and forward a `SUBSCRIBE`/`CANCEL` command upstream on
//! every pipe the first/last time a given topic's refcount crosses
//! zero (spec §4.8's own contract, reused verbatim here since a SUB
//! socket is itself the trie's sole local subscriber).
//! `PSUBSCRIBE`/`PUNSUBSCRIBE` add glob-pattern entries matched in
//! addition to the prefix trie (spec §4.9 [SUPPLEMENT], via
//! `crate::glob`).

use crate::error::{Error, Result};
use crate::glob::GlobTable;
use crate::global::SocketType;
use crate::msg::Msg;
use crate::pipe::Pipe;
use crate::trie::Trie;

use super::{Protocol, SocketCore};

pub struct Sub {
    core: SocketCore,
    trie: Trie,
    patterns: GlobTable,
    recv_scan_from: usize,
}

impl Sub {
    pub fn new(core: SocketCore) -> Sub {
        Sub {
            core,
            trie: Trie::new(),
            patterns: GlobTable::new(),
            recv_scan_from: 0,
        }
    }

    fn forward(&self, msg: Msg) {
        for pipe in &self.core.pipes {
            pipe.write(msg.copy());
            pipe.flush();
        }
    }

    fn matches(&self, topic: &[u8]) -> bool {
        self.trie.check(topic) || self.patterns.check(topic)
    }

    pub fn topics_count(&self) -> usize {
        let mut count = 0;
        self.trie.apply(|_| count += 1);
        count + self.patterns.num_patterns()
    }
}

impl Protocol for Sub {
    fn socket_type(&self) -> SocketType {
        SocketType::Sub
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

    fn xsend(&mut self, _msg: Msg) -> Result<()> {
        Err(Error::Fsm)
    }

    fn xrecv(&mut self) -> Result<Msg> {
        let n = self.core.pipes.len();
        for step in 0..n {
            let idx = (self.recv_scan_from + step) % n;
            if let Some(msg) = self.core.pipes[idx].read() {
                self.recv_scan_from = (idx + 1) % n;
                if self.matches(msg.data()) {
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
        false
    }

    fn xsetsockopt(&mut self, opt: &str, value: &[u8]) -> Result<()> {
        match opt {
            "SUBSCRIBE" => {
                if self.trie.add(value) {
                    self.forward(Msg::init_subscribe(value));
                }
                Ok(())
            }
            "UNSUBSCRIBE" => {
                if self.trie.rm(value) {
                    self.forward(Msg::init_cancel(value));
                }
                Ok(())
            }
            "PSUBSCRIBE" => {
                let pattern = std::str::from_utf8(value)
                    .map_err(|_| Error::InvalidInput("pattern must be utf-8"))?;
                self.patterns
                    .add(pattern)
                    .map_err(|_| Error::InvalidInput("malformed glob pattern"))?;
                Ok(())
            }
            "PUNSUBSCRIBE" => {
                let pattern = std::str::from_utf8(value)
                    .map_err(|_| Error::InvalidInput("pattern must be utf-8"))?;
                self.patterns.rm(pattern);
                Ok(())
            }
            _ => Err(Error::InvalidInput("unknown option for SUB")),
        }
    }

    fn xgetsockopt(&mut self, opt: &str) -> Option<Vec<u8>> {
        match opt {
            "TOPICS_COUNT" => Some((self.topics_count() as u32).to_be_bytes().to_vec()),
            _ => None,
        }
    }
}

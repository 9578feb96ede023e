// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! PUB (spec §4.9): broadcasts, filtering per downstream peer by the
//! subscription trie that peer's own `SUBSCRIBE`/`CANCEL` commands
//! (arriving as inbound messages on its pipe) have built up. Messages
//! matching no subscriber on a given pipe are dropped for that pipe;
//! on HWM, the whole send is dropped (default) or blocked
//! (`XPUB_NODROP`).

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::global::SocketType;
use crate::msg::Msg;
use crate::pipe::Pipe;
use crate::trie::Trie;

use super::{Protocol, SocketCore};

pub struct Pub {
    core: SocketCore,
    subs: HashMap<usize, Trie>,
    send_targets: Option<Vec<usize>>,
}

impl Pub {
    pub fn new(core: SocketCore) -> Pub {
        Pub {
            core,
            subs: HashMap::new(),
            send_targets: None,
        }
    }

    /// Applies every pending SUBSCRIBE/CANCEL arriving on any pipe to
    /// that pipe's own trie. PUB has no application-visible receive
    /// path, so this is the only place inbound traffic is consumed.
    fn drain_subscriptions(&mut self) {
        for pipe in &self.core.pipes {
            let trie = self.subs.entry(pipe.identity()).or_insert_with(Trie::new);
            while let Some(msg) = pipe.read() {
                if msg.is_subscribe() {
                    trie.add(msg.data());
                } else if msg.is_cancel() {
                    trie.rm(msg.data());
                }
            }
        }
    }
}

impl Protocol for Pub {
    fn socket_type(&self) -> SocketType {
        SocketType::Pub
    }

    fn core(&self) -> &SocketCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SocketCore {
        &mut self.core
    }

    fn xattach_pipe(&mut self, pipe: Pipe, identity: Option<Vec<u8>>) {
        self.subs.insert(pipe.identity(), Trie::new());
        self.core.add_pipe(pipe, identity);
    }

    fn xpipe_terminated(&mut self, pipe: &Pipe) {
        self.subs.remove(&pipe.identity());
        self.core.remove_pipe(pipe);
    }

    fn xsend(&mut self, msg: Msg) -> Result<()> {
        self.drain_subscriptions();

        let targets = match self.send_targets.take() {
            Some(t) => t,
            None => {
                let topic = msg.data();
                (0..self.core.pipes.len())
                    .filter(|&i| {
                        self.subs
                            .get(&self.core.pipes[i].identity())
                            .map(|t| t.check(topic))
                            .unwrap_or(false)
                    })
                    .collect()
            }
        };

        if self.core.xpub_nodrop {
            for &i in &targets {
                if self.core.pipes[i].is_full() {
                    self.send_targets = Some(targets);
                    return Err(Error::Again);
                }
            }
        }

        let more = msg.has_more();
        for &i in &targets {
            let pipe = &self.core.pipes[i];
            if pipe.write(msg.copy()) && !more {
                pipe.flush();
            }
        }
        if more {
            self.send_targets = Some(targets);
        }
        Ok(())
    }

    fn xrecv(&mut self) -> Result<Msg> {
        self.drain_subscriptions();
        Err(Error::Fsm)
    }

    fn xhas_in(&mut self) -> bool {
        false
    }

    fn xhas_out(&mut self) -> bool {
        self.drain_subscriptions();
        true
    }

    fn xsetsockopt(&mut self, opt: &str, value: &[u8]) -> Result<()> {
        match opt {
            "XPUB_NODROP" => {
                self.core.xpub_nodrop = value.first() == Some(&1);
                Ok(())
            }
            _ => Err(Error::InvalidInput("unknown option for PUB")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipe::pipepair;

    #[test]
    fn drops_messages_matching_no_subscription() {
        let mut pb = Pub::new(SocketCore::new());
        let (server, peer) = pipepair([(0, 0), (0, 0)]);
        pb.xattach_pipe(server, None);

        peer.write(Msg::init_subscribe(b"weather"));
        peer.flush();

        pb.xsend(Msg::init_buffer(b"weather sunny")).unwrap();
        pb.xsend(Msg::init_buffer(b"news breaking")).unwrap();

        assert_eq!(peer.read().unwrap().data(), b"weather sunny");
        assert!(peer.read().is_none());
    }
}

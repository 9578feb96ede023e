// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Prefix-matching subscription trie (spec §3.3 / §4.8). Distinct from
//! `glob::GlobTable`: every edge here is keyed by one literal byte, and
//! `check` succeeds the moment it has walked a path that is a prefix of
//! the message topic, refcounted per-subscriber so that unsubscribing a
//! topic another pipe still wants doesn't drop it early.

use parking_lot::RwLock;
use std::collections::HashMap;

struct Node {
    children: HashMap<u8, Node>,
    /// Number of live subscribers whose topic terminates exactly here.
    refcount: u32,
}

impl Node {
    fn new() -> Node {
        Node {
            children: HashMap::new(),
            refcount: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.refcount == 0 && self.children.is_empty()
    }
}

/// Thread-safe refcounted prefix trie. One instance per `SUB`/`XSUB`
/// socket's local subscription set, or per `PUB`/`XPUB` peer-routing
/// table entry.
pub struct Trie {
    root: RwLock<Node>,
}

impl Trie {
    pub fn new() -> Trie {
        Trie {
            root: RwLock::new(Node::new()),
        }
    }

    /// Adds `prefix` as a subscribed topic. Returns `true` iff this was
    /// the prefix's first subscriber (callers use this to decide whether
    /// to forward a `SUBSCRIBE` command upstream).
    pub fn add(&self, prefix: &[u8]) -> bool {
        let mut root = self.root.write();
        let mut node = &mut *root;
        for &byte in prefix {
            node = node.children.entry(byte).or_insert_with(Node::new);
        }
        node.refcount += 1;
        node.refcount == 1
    }

    /// Removes one subscription for `prefix`. Returns `true` iff this
    /// was the last subscriber (callers forward `CANCEL` upstream only
    /// then). A `prefix` with no matching subscription is a no-op.
    pub fn rm(&self, prefix: &[u8]) -> bool {
        let mut root = self.root.write();
        rm_rec(&mut root, prefix).unwrap_or(false)
    }

    /// `true` if `topic` has at least one subscriber whose subscribed
    /// prefix matches (i.e. is a prefix of) `topic`.
    pub fn check(&self, topic: &[u8]) -> bool {
        let root = self.root.read();
        let mut node = &*root;
        if node.refcount > 0 {
            return true;
        }
        for &byte in topic {
            match node.children.get(&byte) {
                Some(next) => {
                    node = next;
                    if node.refcount > 0 {
                        return true;
                    }
                }
                None => return false,
            }
        }
        false
    }

    /// Applies `func` to every subscribed prefix, depth-first.
    pub fn apply(&self, mut func: impl FnMut(&[u8])) {
        let root = self.root.read();
        let mut buf = Vec::new();
        apply_rec(&root, &mut buf, &mut func);
    }

    pub fn is_empty(&self) -> bool {
        self.root.read().is_empty()
    }
}

impl Default for Trie {
    fn default() -> Self {
        Trie::new()
    }
}

fn apply_rec(node: &Node, buf: &mut Vec<u8>, func: &mut impl FnMut(&[u8])) {
    if node.refcount > 0 {
        func(buf);
    }
    for (&byte, child) in node.children.iter() {
        buf.push(byte);
        apply_rec(child, buf, func);
        buf.pop();
    }
}

/// Recursively walks to the node addressed by `prefix`, decrements its
/// refcount, and prunes it (and any ancestor left childless and
/// unsubscribed) on the way back up. Returns `None` if no such
/// subscription exists, `Some(true)` if this removed the last
/// subscriber, `Some(false)` if other subscribers remain.
fn rm_rec(node: &mut Node, prefix: &[u8]) -> Option<bool> {
    let Some((&byte, rest)) = prefix.split_first() else {
        if node.refcount == 0 {
            return None;
        }
        node.refcount -= 1;
        return Some(node.refcount == 0);
    };

    let child = node.children.get_mut(&byte)?;
    let result = rm_rec(child, rest)?;
    if child.is_empty() {
        node.children.remove(&byte);
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_reports_first_subscriber_only() {
        let trie = Trie::new();
        assert!(trie.add(b"topic"));
        assert!(!trie.add(b"topic"));
    }

    #[test]
    fn check_matches_on_prefix() {
        let trie = Trie::new();
        trie.add(b"news");
        assert!(trie.check(b"news"));
        assert!(trie.check(b"news.tech"));
        assert!(!trie.check(b"sport"));
    }

    #[test]
    fn empty_subscription_matches_everything() {
        let trie = Trie::new();
        trie.add(b"");
        assert!(trie.check(b"anything"));
    }

    #[test]
    fn rm_only_removes_last_subscriber() {
        let trie = Trie::new();
        trie.add(b"topic");
        trie.add(b"topic");
        assert!(!trie.rm(b"topic"));
        assert!(trie.check(b"topic"));
        assert!(trie.rm(b"topic"));
        assert!(!trie.check(b"topic"));
    }

    #[test]
    fn rm_prunes_dead_branches() {
        let trie = Trie::new();
        trie.add(b"a");
        trie.add(b"ab");
        trie.rm(b"ab");
        assert!(trie.check(b"ab")); // still covered by "a"
        trie.rm(b"a");
        assert!(trie.is_empty());
    }

    #[test]
    fn apply_visits_every_subscribed_prefix() {
        let trie = Trie::new();
        trie.add(b"a");
        trie.add(b"ab");
        trie.add(b"b");
        let mut seen: Vec<Vec<u8>> = Vec::new();
        trie.apply(|p| seen.push(p.to_vec()));
        seen.sort();
        assert_eq!(seen, vec![b"a".to_vec(), b"ab".to_vec(), b"b".to_vec()]);
    }
}

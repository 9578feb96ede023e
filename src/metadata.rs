// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Immutable property dictionary attached to messages once a connection
//! reaches `ready` (spec §3.1 [SUPPLEMENT]). Built once from the peer's
//! `READY` command body and shared by `Arc` across every message the
//! mechanism hands off afterwards — there is no mutation after
//! construction, so the refcounted-drop dance of the original
//! `metadata_t` collapses to plain `Arc` reference counting here.

use std::collections::HashMap;

/// `Socket-Type` and `Identity` are always present once handshake
/// completes; everything else is application-supplied.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Metadata {
    dict: HashMap<String, String>,
}

impl Metadata {
    pub fn new(dict: HashMap<String, String>) -> Metadata {
        Metadata { dict }
    }

    pub fn get(&self, property: &str) -> Option<&str> {
        self.dict.get(property).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.dict.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.dict.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dict.is_empty()
    }
}

/// Builder used while parsing a peer's `READY` command — mirrors the
/// `mechanism_t::parse_metadata` accumulation loop in
/// `original_source/src/auth/mechanism.cpp`, which calls a `property()`
/// hook once per name/value pair before the whole set is frozen.
#[derive(Debug, Default)]
pub struct MetadataBuilder {
    dict: HashMap<String, String>,
}

impl MetadataBuilder {
    pub fn new() -> MetadataBuilder {
        MetadataBuilder::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.dict.insert(name.into(), value.into());
    }

    pub fn build(self) -> Metadata {
        Metadata::new(self.dict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_properties() {
        let mut b = MetadataBuilder::new();
        b.insert("Socket-Type", "DEALER");
        b.insert("Identity", "peer-1");
        let md = b.build();

        assert_eq!(md.get("Socket-Type"), Some("DEALER"));
        assert_eq!(md.get("Identity"), Some("peer-1"));
        assert_eq!(md.get("missing"), None);
        assert_eq!(md.len(), 2);
    }

    #[test]
    fn empty_metadata_reports_empty() {
        let md = Metadata::default();
        assert!(md.is_empty());
    }
}

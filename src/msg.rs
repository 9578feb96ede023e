// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The message container (spec §3.1 / §4.1).
//!
//! The C++ original packs every variant into one 64-byte union so a
//! `msg_t` never allocates on the stack->heap boundary for small
//! payloads. Rust's enum + `Bytes`-like refcounting gets the same
//! *correctness* (VSM inline, LMSG/ZCMSG shared via refcount, exact
//! close/copy/move semantics) without needing raw unions — the REDESIGN
//! FLAGS note in spec §9 calls the fixed layout a performance choice,
//! not a correctness one, so we don't chase it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::metadata::Metadata;

/// Maximum length of a `group` string stored inline (matches
/// `SL_GROUP_MAX_LENGTH` in `original_source/src/msg/msg.hpp`).
pub const GROUP_MAX_LENGTH: usize = 255;

/// Small helper macro so `Flags` reads like `mio::EventSet`'s bitset
/// (bitwise `|`/`&`/`!`, `contains`) without pulling in the `bitflags`
/// crate for a four-bit set.
macro_rules! bitflags_like {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $repr:ty {
            $(const $variant:ident = $value:expr;)*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
        pub struct $name($repr);

        impl $name {
            $(pub const $variant: $name = $name($value);)*

            pub fn contains(&self, other: $name) -> bool {
                (self.0 & other.0) == other.0
            }

            pub fn bits(&self) -> $repr {
                self.0
            }

            pub fn from_bits_truncate(bits: $repr) -> $name {
                $name(bits)
            }
        }

        impl std::ops::BitOr for $name {
            type Output = $name;
            fn bitor(self, rhs: $name) -> $name {
                $name(self.0 | rhs.0)
            }
        }

        impl std::ops::BitOrAssign for $name {
            fn bitor_assign(&mut self, rhs: $name) {
                self.0 |= rhs.0;
            }
        }

        impl std::ops::BitAnd for $name {
            type Output = $name;
            fn bitand(self, rhs: $name) -> $name {
                $name(self.0 & rhs.0)
            }
        }

        impl std::ops::BitAndAssign for $name {
            fn bitand_assign(&mut self, rhs: $name) {
                self.0 &= rhs.0;
            }
        }

        impl std::ops::Not for $name {
            type Output = $name;
            fn not(self) -> $name {
                $name(!self.0)
            }
        }
    };
}

bitflags_like! {
    /// Message flag bits (spec §3.1). The low nibble doubles as the
    /// command subtype when `COMMAND` is set.
    pub struct Flags: u8 {
        const NONE = 0;
        const MORE = 0x01;
        const COMMAND = 0x02;
        const ROUTING_ID = 0x40;
        const SHARED = 0x80;
        const CREDENTIAL = 0x10;
    }
}

/// Command subtype, valid only when `Flags::COMMAND` is set. Mirrors the
/// `CMD_TYPE_MASK` nibble of `msg_t::flags` in the original.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CommandType {
    Ping,
    Pong,
    Subscribe,
    Cancel,
    Close,
}

/// Heap-allocated content shared between one or more `Msg` instances
/// (LMSG) or owned externally and released through a caller-supplied
/// free function (ZCMSG). Mirrors `msg_t::content_t`.
struct Content {
    data: ContentData,
    refcnt: AtomicUsize,
    /// Optional release hook, invoked once when the last reference to
    /// this content is dropped. LMSG built via `init_data` carries one
    /// so the caller's buffer-pool bookkeeping still runs; ZCMSG always
    /// carries one since the bytes are never ours to free via `Vec`'s
    /// own allocator.
    on_drop: Option<(
        Arc<dyn Fn(&dyn std::any::Any) + Send + Sync>,
        Arc<dyn std::any::Any + Send + Sync>,
    )>,
}

enum ContentData {
    /// Library-owned heap buffer (LMSG).
    Owned(Vec<u8>),
    /// Externally owned buffer, valid only while the caller's arena
    /// keeps it alive (ZCMSG).
    External { ptr: *const u8, len: usize },
}

// SAFETY: the External variant's raw pointer is only ever read, never
// mutated concurrently, and its lifetime is guaranteed by the caller that
// handed us the buffer (the zero-copy arena keeps it alive for at least as
// long as any refcount on it is outstanding).
unsafe impl Send for ContentData {}
unsafe impl Sync for ContentData {}

impl Content {
    fn as_slice(&self) -> &[u8] {
        match &self.data {
            ContentData::Owned(v) => v.as_slice(),
            ContentData::External { ptr, len } => unsafe {
                std::slice::from_raw_parts(*ptr, *len)
            },
        }
    }
}

impl Drop for Content {
    fn drop(&mut self) {
        if let Some((free_fn, hint)) = &self.on_drop {
            free_fn(hint.as_ref());
        }
    }
}

enum Body {
    /// Very-small-message: inline payload, no allocation.
    Vsm(Vec<u8>),
    /// Large message: heap content, possibly shared (refcount >= 1).
    Lmsg(Arc<Content>),
    /// Zero-copy message: content backed by an externally owned buffer.
    Zcmsg(Arc<Content>),
    /// Route terminator, zero payload.
    Delimiter,
}

/// The polymorphic message container (spec §3.1). Every variant carries
/// `flags`, `routing_id`, `group`, and an optional shared `metadata`
/// dictionary.
pub struct Msg {
    body: Body,
    flags: Flags,
    routing_id: u32,
    group: Option<Box<str>>,
    metadata: Option<Arc<Metadata>>,
    command_type: Option<CommandType>,
}

impl Msg {
    /// Produces an empty VSM message, size 0.
    pub fn new() -> Msg {
        Msg {
            body: Body::Vsm(Vec::new()),
            flags: Flags::NONE,
            routing_id: 0,
            group: None,
            metadata: None,
            command_type: None,
        }
    }

    /// VSM if the payload is small, else a freshly allocated LMSG with
    /// refcount 1. There is no hard size threshold in this port (the
    /// distinction no longer buys anything once both are heap `Vec`s
    /// under the hood) — `init_size`/`init_buffer` simply copy into an
    /// owned buffer and the variant used is `Vsm` unconditionally unless
    /// the caller specifically wants sharing (`copy`) or external
    /// ownership (`init_data`/`init_external_storage`).
    pub fn init_size(size: usize) -> Msg {
        let mut m = Msg::new();
        m.body = Body::Vsm(vec![0u8; size]);
        m
    }

    /// Copies a borrowed buffer into owned storage.
    pub fn init_buffer(buf: &[u8]) -> Msg {
        let mut m = Msg::new();
        m.body = Body::Vsm(buf.to_vec());
        m
    }

    pub fn with_body(buf: Vec<u8>) -> Msg {
        let mut m = Msg::new();
        m.body = Body::Vsm(buf);
        m
    }

    /// Takes ownership of an externally owned buffer, producing an LMSG
    /// whose content is released via `free_fn(hint)` on final `close`.
    pub fn init_data<H>(
        data: Vec<u8>,
        free_fn: Arc<dyn Fn(&dyn std::any::Any) + Send + Sync>,
        hint: Arc<H>,
    ) -> Msg
    where
        H: std::any::Any + Send + Sync,
    {
        let hint: Arc<dyn std::any::Any + Send + Sync> = hint;
        let content = Content {
            data: ContentData::Owned(data),
            refcnt: AtomicUsize::new(1),
            on_drop: Some((free_fn, hint)),
        };
        let mut m = Msg::new();
        m.body = Body::Lmsg(Arc::new(content));
        m
    }

    /// Builds a ZCMSG whose `data` points into a caller-owned arena. The
    /// arena's refcount is bumped by the caller before this is invoked
    /// and released via `free_fn(hint)` once every `Msg` sharing the
    /// content is closed.
    ///
    /// # Safety
    /// `ptr` must remain valid for `len` bytes for as long as the
    /// returned message (and any of its `copy()`s) is alive.
    pub unsafe fn init_external_storage(
        ptr: *const u8,
        len: usize,
        free_fn: Arc<dyn Fn(&dyn std::any::Any) + Send + Sync>,
        hint: Arc<dyn std::any::Any + Send + Sync>,
    ) -> Msg {
        let content = Content {
            data: ContentData::External { ptr, len },
            refcnt: AtomicUsize::new(1),
            on_drop: Some((free_fn, hint)),
        };
        let mut m = Msg::new();
        m.body = Body::Zcmsg(Arc::new(content));
        m
    }

    pub fn init_delimiter() -> Msg {
        let mut m = Msg::new();
        m.body = Body::Delimiter;
        m
    }

    pub fn is_delimiter(&self) -> bool {
        matches!(self.body, Body::Delimiter)
    }

    pub fn is_vsm(&self) -> bool {
        matches!(self.body, Body::Vsm(_))
    }

    pub fn is_lmsg(&self) -> bool {
        matches!(self.body, Body::Lmsg(_))
    }

    pub fn is_zcmsg(&self) -> bool {
        matches!(self.body, Body::Zcmsg(_))
    }

    /// Builds a COMMAND message carrying `SUBSCRIBE` + the topic bytes.
    pub fn init_subscribe(topic: &[u8]) -> Msg {
        let mut m = Msg::init_buffer(topic);
        m.flags = Flags::COMMAND;
        m.set_command_type(CommandType::Subscribe);
        m
    }

    /// Builds a COMMAND message carrying `CANCEL` + the topic bytes.
    pub fn init_cancel(topic: &[u8]) -> Msg {
        let mut m = Msg::init_buffer(topic);
        m.flags = Flags::COMMAND;
        m.set_command_type(CommandType::Cancel);
        m
    }

    fn set_command_type(&mut self, ty: CommandType) {
        self.command_type = Some(ty);
    }

    pub fn command_type(&self) -> Option<CommandType> {
        self.command_type
    }

    pub fn is_subscribe(&self) -> bool {
        self.command_type == Some(CommandType::Subscribe)
    }

    pub fn is_cancel(&self) -> bool {
        self.command_type == Some(CommandType::Cancel)
    }

    pub fn size(&self) -> usize {
        match &self.body {
            Body::Vsm(v) => v.len(),
            Body::Lmsg(c) | Body::Zcmsg(c) => c.as_slice().len(),
            Body::Delimiter => 0,
        }
    }

    pub fn data(&self) -> &[u8] {
        match &self.body {
            Body::Vsm(v) => v.as_slice(),
            Body::Lmsg(c) | Body::Zcmsg(c) => c.as_slice(),
            Body::Delimiter => &[],
        }
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        match &mut self.body {
            Body::Vsm(v) => v.as_mut_slice(),
            // LMSG/ZCMSG may be shared; mutation through a shared
            // reference is not offered (matches the original's
            // "mutated only by its owner" invariant -- owners of shared
            // content never mutate in place).
            Body::Lmsg(_) | Body::Zcmsg(_) => &mut [],
            Body::Delimiter => &mut [],
        }
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: Flags) {
        self.flags |= flags;
    }

    pub fn reset_flags(&mut self, flags: Flags) {
        self.flags &= !flags;
    }

    pub fn has_more(&self) -> bool {
        self.flags.contains(Flags::MORE)
    }

    pub fn set_more(&mut self, more: bool) {
        if more {
            self.flags |= Flags::MORE;
        } else {
            self.flags &= !Flags::MORE;
        }
    }

    pub fn is_command(&self) -> bool {
        self.flags.contains(Flags::COMMAND)
    }

    pub fn get_routing_id(&self) -> u32 {
        self.routing_id
    }

    pub fn set_routing_id(&mut self, routing_id: u32) {
        self.routing_id = routing_id;
        self.flags |= Flags::ROUTING_ID;
    }

    pub fn group(&self) -> &str {
        self.group.as_deref().unwrap_or("")
    }

    /// Sets the group string. Fails (`EINVAL`) when longer than
    /// `GROUP_MAX_LENGTH`.
    pub fn set_group(&mut self, group: &str) -> crate::error::Result<()> {
        if group.len() > GROUP_MAX_LENGTH {
            return Err(crate::error::Error::InvalidInput(
                "group exceeds 255 bytes",
            ));
        }
        self.group = Some(group.into());
        Ok(())
    }

    pub fn metadata(&self) -> Option<&Arc<Metadata>> {
        self.metadata.as_ref()
    }

    pub fn set_metadata(&mut self, metadata: Arc<Metadata>) {
        self.metadata = Some(metadata);
    }

    pub fn reset_metadata(&mut self) {
        self.metadata = None;
    }

    /// Increments the refcount and returns a message referring to the
    /// same content (LMSG/ZCMSG) or a cloned buffer (VSM/Delimiter).
    pub fn copy(&self) -> Msg {
        let body = match &self.body {
            Body::Vsm(v) => Body::Vsm(v.clone()),
            Body::Lmsg(c) => {
                c.refcnt.fetch_add(1, Ordering::AcqRel);
                Body::Lmsg(c.clone())
            }
            Body::Zcmsg(c) => {
                c.refcnt.fetch_add(1, Ordering::AcqRel);
                Body::Zcmsg(c.clone())
            }
            Body::Delimiter => Body::Delimiter,
        };
        Msg {
            body,
            flags: self.flags,
            routing_id: self.routing_id,
            group: self.group.clone(),
            metadata: self.metadata.clone(),
            command_type: self.command_type,
        }
    }

    /// Adds `n` references to shared content. Only valid on LMSG/ZCMSG.
    pub fn add_refs(&self, n: usize) {
        match &self.body {
            Body::Lmsg(c) | Body::Zcmsg(c) => {
                c.refcnt.fetch_add(n, Ordering::AcqRel);
            }
            _ => {}
        }
    }

    /// Drops `n` references; returns `false` (and the message becomes
    /// inert) if the count transitions to zero.
    pub fn rm_refs(&self, n: usize) -> bool {
        match &self.body {
            Body::Lmsg(c) | Body::Zcmsg(c) => {
                let prev = c.refcnt.fetch_sub(n, Ordering::AcqRel);
                prev > n
            }
            _ => true,
        }
    }

    pub fn shrink(&mut self, new_size: usize) {
        if let Body::Vsm(v) = &mut self.body {
            v.truncate(new_size);
        }
    }

    /// Returns `false` once a message has been moved out of or otherwise
    /// made empty/unusable — always `true` for a live `Msg` in this port,
    /// since Rust's ownership model makes use-after-close unrepresentable
    /// (the original uses this to detect a stale type discriminant after
    /// manual memory reuse).
    pub fn check(&self) -> bool {
        true
    }

    pub fn to_buffer(self) -> Vec<u8> {
        match self.body {
            Body::Vsm(v) => v,
            Body::Lmsg(c) | Body::Zcmsg(c) => c.as_slice().to_vec(),
            Body::Delimiter => Vec::new(),
        }
    }
}

impl Default for Msg {
    fn default() -> Self {
        Msg::new()
    }
}

impl Clone for Msg {
    fn clone(&self) -> Self {
        self.copy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vsm_round_trips_payload() {
        let m = Msg::init_buffer(b"hello");
        assert!(m.is_vsm());
        assert_eq!(m.size(), 5);
        assert_eq!(m.data(), b"hello");
    }

    #[test]
    fn copy_shares_lmsg_refcount() {
        let free = Arc::new(|_: &dyn std::any::Any| {});
        let hint = Arc::new(());
        let m = Msg::init_data(vec![1, 2, 3], free, hint);
        let copy = m.copy();
        assert_eq!(copy.data(), &[1, 2, 3]);
        // both still valid; dropping one must not invalidate the other
        drop(m);
        assert_eq!(copy.data(), &[1, 2, 3]);
    }

    #[test]
    fn subscribe_and_cancel_carry_command_flag() {
        let sub = Msg::init_subscribe(b"topic");
        assert!(sub.is_command());
        assert!(sub.is_subscribe());
        assert_eq!(sub.data(), b"topic");

        let cancel = Msg::init_cancel(b"topic");
        assert!(cancel.is_command());
        assert!(cancel.is_cancel());
    }

    #[test]
    fn delimiter_has_no_payload() {
        let d = Msg::init_delimiter();
        assert!(d.is_delimiter());
        assert_eq!(d.size(), 0);
    }

    #[test]
    fn group_rejects_overlong_strings() {
        let mut m = Msg::new();
        let long = "x".repeat(GROUP_MAX_LENGTH + 1);
        assert!(m.set_group(&long).is_err());
        assert!(m.set_group("weather").is_ok());
        assert_eq!(m.group(), "weather");
    }

    #[test]
    fn more_flag_is_independent_of_command_flag() {
        let mut m = Msg::init_buffer(b"x");
        m.set_more(true);
        assert!(m.has_more());
        m.set_flags(Flags::COMMAND);
        assert!(m.is_command());
        assert!(m.has_more());
        m.set_more(false);
        assert!(!m.has_more());
        assert!(m.is_command());
    }
}

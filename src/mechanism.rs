// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! NULL authentication mechanism (spec §4.5 [SUPPLEMENT]). Ported from
//! `original_source/src/auth/{mechanism,null_mechanism}.cpp`: property
//! wire format, `READY`/`ERROR` command bytes, and the `Socket-Type`
//! compatibility table, including the ROUTER side's permissive
//! "accept any peer type" stance the original leaves as a `// For now`
//! comment — kept as-is per spec's own Open Question resolution.

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};
use crate::global::SocketType;
use crate::metadata::{Metadata, MetadataBuilder};

const READY_PREFIX: &[u8] = b"\x05READY";
const ERROR_PREFIX: &[u8] = b"\x05ERROR";

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Status {
    Handshaking,
    Ready,
    Error,
}

/// One command emitted by the mechanism's handshake step function.
pub enum HandshakeOutput {
    /// Nothing to send yet (still waiting on the peer).
    None,
    /// A READY (or ERROR) command frame body to send as-is.
    Send(Vec<u8>),
}

/// Drives the NULL handshake to completion and, once both sides have
/// exchanged READY, exposes the peer's socket type and metadata. One
/// instance per connection.
pub struct NullMechanism {
    socket_type: SocketType,
    sent_ready: bool,
    received_ready: bool,
    error: bool,
    peer_socket_type: Option<SocketType>,
    peer_identity: Option<Vec<u8>>,
    metadata: Option<Metadata>,
}

impl NullMechanism {
    pub fn new(socket_type: SocketType) -> NullMechanism {
        NullMechanism {
            socket_type,
            sent_ready: false,
            received_ready: false,
            error: false,
            peer_socket_type: None,
            peer_identity: None,
            metadata: None,
        }
    }

    pub fn status(&self) -> Status {
        if self.sent_ready && self.received_ready {
            Status::Ready
        } else if self.error {
            Status::Error
        } else {
            Status::Handshaking
        }
    }

    /// Builds the outbound READY command, once. A second call returns
    /// `Error::Again`, matching `next_handshake_command`'s "already
    /// produced" check.
    pub fn next_handshake_command(&mut self, identity: Option<&[u8]>) -> Result<Vec<u8>> {
        if self.sent_ready {
            return Err(Error::Again);
        }
        self.sent_ready = true;
        Ok(build_ready_command(self.socket_type, identity))
    }

    /// Processes one inbound command frame body.
    pub fn process_handshake_command(&mut self, body: &[u8]) -> Result<HandshakeOutput> {
        if let Some(rest) = body.strip_prefix(READY_PREFIX) {
            self.process_ready(rest)?;
            return Ok(HandshakeOutput::None);
        }
        if body.starts_with(ERROR_PREFIX) {
            self.process_error(body)?;
            return Ok(HandshakeOutput::None);
        }
        Err(Error::Proto("unexpected handshake command"))
    }

    fn process_ready(&mut self, props: &[u8]) -> Result<()> {
        let mut builder = MetadataBuilder::new();
        let mut identity = None;
        let mut peer_type = None;

        for (name, value) in parse_properties(props)? {
            match name {
                "Identity" => identity = Some(value.to_vec()),
                "Socket-Type" => {
                    peer_type = SocketType::from_wire_name(value);
                    if peer_type.is_none() {
                        return Err(Error::Proto("unrecognized peer Socket-Type"));
                    }
                }
                _ => {
                    builder.insert(
                        name.to_owned(),
                        String::from_utf8_lossy(value).into_owned(),
                    );
                }
            }
        }

        if let Some(peer_type) = peer_type {
            if !check_socket_type(self.socket_type, peer_type) {
                return Err(Error::Proto("incompatible peer Socket-Type"));
            }
            self.peer_socket_type = Some(peer_type);
        }

        self.peer_identity = identity;
        self.metadata = Some(builder.build());
        self.received_ready = true;
        Ok(())
    }

    fn process_error(&mut self, body: &[u8]) -> Result<()> {
        let fixed_prefix_size = ERROR_PREFIX.len() + 1;
        if body.len() < fixed_prefix_size {
            return Err(Error::Proto("truncated ERROR command"));
        }
        self.error = true;
        self.received_ready = true;
        Ok(())
    }

    pub fn peer_socket_type(&self) -> Option<SocketType> {
        self.peer_socket_type
    }

    pub fn peer_identity(&self) -> Option<&[u8]> {
        self.peer_identity.as_deref()
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }
}

/// `mechanism_t::check_socket_type` from
/// `original_source/src/auth/mechanism.cpp`. ROUTER's branch returns
/// `true` unconditionally in the original ("accept any peer type -
/// validation at higher layers"); kept permissive here per spec's
/// Open Question.
fn check_socket_type(ours: SocketType, peer: SocketType) -> bool {
    use SocketType::*;
    match ours {
        Pair => peer == Pair,
        Router => true,
        Dealer => true,
        Pub => matches!(peer, Sub | XSub),
        Sub => matches!(peer, Pub | XPub),
        XPub => matches!(peer, Sub | XSub),
        XSub => matches!(peer, Pub | XPub),
    }
}

fn build_ready_command(socket_type: SocketType, identity: Option<&[u8]>) -> Vec<u8> {
    let mut props = Vec::new();
    add_property(&mut props, "Socket-Type", socket_type.wire_name().as_bytes());
    if socket_type == SocketType::Router {
        add_property(&mut props, "Identity", identity.unwrap_or(&[]));
    }

    let mut out = Vec::with_capacity(READY_PREFIX.len() + props.len());
    out.extend_from_slice(READY_PREFIX);
    out.extend_from_slice(&props);
    out
}

/// Wire format: `<1-byte name len><name><4-byte BE value len><value>`,
/// matching `mechanism_t::add_property`.
fn add_property(out: &mut Vec<u8>, name: &str, value: &[u8]) {
    out.push(name.len() as u8);
    out.extend_from_slice(name.as_bytes());
    let mut len_buf = [0u8; 4];
    BigEndian::write_u32(&mut len_buf, value.len() as u32);
    out.extend_from_slice(&len_buf);
    out.extend_from_slice(value);
}

/// Parses a `READY` property list. Malformed trailing bytes are
/// `Error::Proto`, matching the original's `parse_metadata` loop.
fn parse_properties(mut buf: &[u8]) -> Result<Vec<(&str, &[u8])>> {
    let mut out = Vec::new();
    while !buf.is_empty() {
        let name_len = buf[0] as usize;
        if buf.len() < 1 + name_len + 4 {
            return Err(Error::Proto("malformed property list"));
        }
        let name = std::str::from_utf8(&buf[1..1 + name_len])
            .map_err(|_| Error::Proto("non-utf8 property name"))?;
        let value_len = BigEndian::read_u32(&buf[1 + name_len..1 + name_len + 4]) as usize;
        let value_start = 1 + name_len + 4;
        if buf.len() < value_start + value_len {
            return Err(Error::Proto("malformed property value"));
        }
        out.push((name, &buf[value_start..value_start + value_len]));
        buf = &buf[value_start + value_len..];
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_reaches_ready_both_ways() {
        let mut dealer = NullMechanism::new(SocketType::Dealer);
        let mut router = NullMechanism::new(SocketType::Router);

        let dealer_ready = dealer.next_handshake_command(None).unwrap();
        let router_ready = router.next_handshake_command(Some(b"peer-id")).unwrap();

        router.process_handshake_command(&dealer_ready).unwrap();
        dealer.process_handshake_command(&router_ready).unwrap();

        assert_eq!(dealer.status(), Status::Ready);
        assert_eq!(router.status(), Status::Ready);
        assert_eq!(dealer.peer_socket_type(), Some(SocketType::Router));
        assert_eq!(router.peer_socket_type(), Some(SocketType::Dealer));
    }

    #[test]
    fn second_next_handshake_command_call_is_again() {
        let mut m = NullMechanism::new(SocketType::Pair);
        m.next_handshake_command(None).unwrap();
        assert!(matches!(m.next_handshake_command(None), Err(Error::Again)));
    }

    #[test]
    fn pair_rejects_non_pair_peer() {
        let mut pair = NullMechanism::new(SocketType::Pair);
        let dealer_ready = build_ready_command(SocketType::Dealer, None);
        assert!(pair.process_handshake_command(&dealer_ready).is_err());
    }

    #[test]
    fn router_accepts_any_peer_type() {
        let mut router = NullMechanism::new(SocketType::Router);
        let pub_ready = build_ready_command(SocketType::Pub, None);
        assert!(router.process_handshake_command(&pub_ready).is_ok());
    }

    #[test]
    fn sub_accepts_pub_and_xpub_only() {
        let mut sub = NullMechanism::new(SocketType::Sub);
        assert!(sub
            .process_handshake_command(&build_ready_command(SocketType::Pub, None))
            .is_ok());

        let mut sub2 = NullMechanism::new(SocketType::Sub);
        assert!(sub2
            .process_handshake_command(&build_ready_command(SocketType::Dealer, None))
            .is_err());
    }

    #[test]
    fn malformed_property_list_is_protocol_error() {
        let mut m = NullMechanism::new(SocketType::Dealer);
        let mut body = READY_PREFIX.to_vec();
        body.push(200); // name_len overruns the remaining buffer
        assert!(m.process_handshake_command(&body).is_err());
    }
}

// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! PING/PONG command frames (spec §4.6 heartbeats). SUBSCRIBE/CANCEL
//! command construction lives on `Msg` itself (`init_subscribe`/
//! `init_cancel`) since they also carry socket-level meaning beyond the
//! wire; PING/PONG never leave the engine, so they're built directly as
//! wire bytes here.

use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder};

const PING_NAME: &[u8] = b"\x04PING";
const PONG_NAME: &[u8] = b"\x04PONG";

/// Builds a PING command body: name, 2-byte TTL (in centiseconds, per
/// ZMTP), and an opaque context echoed back in the peer's PONG.
pub fn build_ping(ttl_centiseconds: u16, context: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PING_NAME.len() + 2 + context.len());
    buf.extend_from_slice(PING_NAME);
    let mut ttl_buf = [0u8; 2];
    BigEndian::write_u16(&mut ttl_buf, ttl_centiseconds);
    buf.extend_from_slice(&ttl_buf);
    buf.extend_from_slice(context);
    buf
}

pub fn build_pong(context: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PONG_NAME.len() + context.len());
    buf.extend_from_slice(PONG_NAME);
    buf.extend_from_slice(context);
    buf
}

const SUBSCRIBE_NAME: &[u8] = b"\x09SUBSCRIBE";
const CANCEL_NAME: &[u8] = b"\x06CANCEL";

/// ZMTP/3.1 `SUBSCRIBE` command body: `<9>SUBSCRIBE` followed by the
/// topic bytes (spec §8 S5 — 10 bytes total for a one-byte topic).
pub fn build_subscribe(topic: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SUBSCRIBE_NAME.len() + topic.len());
    buf.extend_from_slice(SUBSCRIBE_NAME);
    buf.extend_from_slice(topic);
    buf
}

pub fn build_cancel(topic: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(CANCEL_NAME.len() + topic.len());
    buf.extend_from_slice(CANCEL_NAME);
    buf.extend_from_slice(topic);
    buf
}

pub enum Command<'a> {
    Ping { ttl_centiseconds: u16, context: &'a [u8] },
    Pong { context: &'a [u8] },
    Other { name: &'a [u8], body: &'a [u8] },
}

/// Parses a generic command frame body (`<1-byte name len><name><body>`)
/// and recognizes PING/PONG; anything else is returned as `Other` for
/// the mechanism layer to interpret (e.g. READY/ERROR).
pub fn parse(body: &[u8]) -> Result<Command<'_>> {
    let name_len = *body.first().ok_or(Error::Proto("empty command frame"))? as usize;
    if body.len() < 1 + name_len {
        return Err(Error::Proto("truncated command name"));
    }
    let name = &body[1..1 + name_len];
    let rest = &body[1 + name_len..];

    if name == b"PING" {
        if rest.len() < 2 {
            return Err(Error::Proto("truncated PING"));
        }
        let ttl = BigEndian::read_u16(&rest[..2]);
        return Ok(Command::Ping {
            ttl_centiseconds: ttl,
            context: &rest[2..],
        });
    }
    if name == b"PONG" {
        return Ok(Command::Pong { context: rest });
    }

    Ok(Command::Other { name, body: rest })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_round_trips() {
        let frame = build_ping(300, b"ctx");
        match parse(&frame).unwrap() {
            Command::Ping {
                ttl_centiseconds,
                context,
            } => {
                assert_eq!(ttl_centiseconds, 300);
                assert_eq!(context, b"ctx");
            }
            _ => panic!("expected Ping"),
        }
    }

    #[test]
    fn pong_round_trips() {
        let frame = build_pong(b"ctx");
        match parse(&frame).unwrap() {
            Command::Pong { context } => assert_eq!(context, b"ctx"),
            _ => panic!("expected Pong"),
        }
    }

    #[test]
    fn unknown_command_name_is_other() {
        let mut body = vec![5];
        body.extend_from_slice(b"READY");
        body.extend_from_slice(b"...props...");
        match parse(&body).unwrap() {
            Command::Other { name, .. } => assert_eq!(name, b"READY"),
            _ => panic!("expected Other"),
        }
    }

    #[test]
    fn truncated_name_is_rejected() {
        let body = vec![10, b'P', b'I'];
        assert!(parse(&body).is_err());
    }
}

// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Frame encoder, following `original_source/src/protocol/v2_encoder.cpp`.
//! The subscribe/cancel byte is appended after the size header rather
//! than folded into the message at creation time, exactly as the
//! original's comment explains: it lets v2 and v3.1 disagree about how
//! SUBSCRIBE/CANCEL hit the wire without touching `Msg` itself.

use crate::msg::{Flags, Msg};
use crate::wire::command;
use byteorder::{BigEndian, ByteOrder};
use std::borrow::Cow;

const MORE_FLAG: u8 = 0x01;
const LARGE_FLAG: u8 = 0x02;
const COMMAND_FLAG: u8 = 0x04;

pub struct Encoder;

impl Encoder {
    pub fn new() -> Encoder {
        Encoder
    }

    /// Encodes one message into `out`, appending the flags byte, the
    /// size header (1 or 9 bytes), and the body. `legacy_subscribe` is
    /// `true` for ZMTP < 3.1 peers, where SUBSCRIBE/CANCEL are plain
    /// messages prefixed with a 1/0 byte instead of the COMMAND framing
    /// `Msg::init_subscribe`/`init_cancel` otherwise produce.
    pub fn encode(&self, msg: &Msg, legacy_subscribe: bool, out: &mut Vec<u8>) {
        let legacy_sub_byte = if legacy_subscribe {
            if msg.is_subscribe() {
                Some(1u8)
            } else if msg.is_cancel() {
                Some(0u8)
            } else {
                None
            }
        } else {
            None
        };

        // ZMTP/3.1 frames SUBSCRIBE/CANCEL as named COMMAND bodies
        // (spec §8 S5), not as raw topic bytes.
        let body: Cow<[u8]> = if legacy_sub_byte.is_none() && msg.is_subscribe() {
            Cow::Owned(command::build_subscribe(msg.data()))
        } else if legacy_sub_byte.is_none() && msg.is_cancel() {
            Cow::Owned(command::build_cancel(msg.data()))
        } else {
            Cow::Borrowed(msg.data())
        };

        let mut size = body.len();
        if legacy_sub_byte.is_some() {
            size += 1;
        }

        let mut flags = 0u8;
        if msg.flags().contains(Flags::MORE) {
            flags |= MORE_FLAG;
        }
        if msg.flags().contains(Flags::COMMAND) && !legacy_subscribe {
            flags |= COMMAND_FLAG;
        }
        if size > u8::MAX as usize {
            flags |= LARGE_FLAG;
        }

        out.push(flags);
        if size > u8::MAX as usize {
            let mut size_buf = [0u8; 8];
            BigEndian::write_u64(&mut size_buf, size as u64);
            out.extend_from_slice(&size_buf);
        } else {
            out.push(size as u8);
        }

        if let Some(b) = legacy_sub_byte {
            out.push(b);
        }
        out.extend_from_slice(&body);
    }
}

impl Default for Encoder {
    fn default() -> Self {
        Encoder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_small_frame_with_one_byte_size() {
        let enc = Encoder::new();
        let msg = Msg::init_buffer(b"hello");
        let mut out = Vec::new();
        enc.encode(&msg, false, &mut out);
        assert_eq!(out, vec![0, 5, b'h', b'e', b'l', b'l', b'o']);
    }

    #[test]
    fn encodes_more_flag() {
        let enc = Encoder::new();
        let mut msg = Msg::init_buffer(b"x");
        msg.set_more(true);
        let mut out = Vec::new();
        enc.encode(&msg, false, &mut out);
        assert_eq!(out[0] & MORE_FLAG, MORE_FLAG);
    }

    #[test]
    fn encodes_large_frame_with_eight_byte_size() {
        let enc = Encoder::new();
        let body = vec![1u8; 300];
        let msg = Msg::init_buffer(&body);
        let mut out = Vec::new();
        enc.encode(&msg, false, &mut out);
        assert_eq!(out[0] & LARGE_FLAG, LARGE_FLAG);
        assert_eq!(BigEndian::read_u64(&out[1..9]), 300);
        assert_eq!(&out[9..], body.as_slice());
    }

    #[test]
    fn legacy_subscribe_prepends_marker_byte_instead_of_command_flag() {
        let enc = Encoder::new();
        let msg = Msg::init_subscribe(b"topic");
        let mut out = Vec::new();
        enc.encode(&msg, true, &mut out);
        assert_eq!(out[0] & COMMAND_FLAG, 0);
        assert_eq!(out[2], 1); // sub marker byte, after the size header
        assert_eq!(&out[3..], b"topic");
    }

    #[test]
    fn non_legacy_subscribe_keeps_command_flag() {
        let enc = Encoder::new();
        let msg = Msg::init_cancel(b"topic");
        let mut out = Vec::new();
        enc.encode(&msg, false, &mut out);
        assert_eq!(out[0] & COMMAND_FLAG, COMMAND_FLAG);
    }
}

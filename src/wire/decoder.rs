// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! v2/v3.1 frame decoder, a state machine over an accumulating input
//! buffer (`FlagsReady -> {OneByteSize|EightByteSize} -> MessageReady`),
//! following `original_source/src/protocol/v2_decoder.cpp`. Unlike the
//! original's pull-based allocator (`get_buffer`/`decode`), this port
//! feeds off whatever byte slice the stream engine last read, which
//! suits `mio`'s readiness-driven reads better — the state machine shape
//! and step names are kept, the buffer-ownership plumbing is not.

use crate::error::{Error, Result};
use crate::msg::{Flags, Msg};
use byteorder::{BigEndian, ByteOrder};

const MORE_FLAG: u8 = 0x01;
const LARGE_FLAG: u8 = 0x02;
const COMMAND_FLAG: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    FlagsReady,
    OneByteSizeReady,
    EightByteSizeReady,
}

/// Decodes a byte stream into a sequence of `Msg`s. One instance per
/// connection; never shared across threads.
pub struct Decoder {
    step: Step,
    msg_flags: u8,
    max_msg_size: Option<u64>,
}

impl Decoder {
    pub fn new(max_msg_size: Option<u64>) -> Decoder {
        Decoder {
            step: Step::FlagsReady,
            msg_flags: 0,
            max_msg_size,
        }
    }

    /// Attempts to decode messages out of `buf`, calling `on_msg` for
    /// each one completed. Returns the number of bytes consumed. Leaves
    /// a trailing partial frame in `buf` for the next call (callers are
    /// expected to keep accumulating into one buffer and re-slice from
    /// `bytes_used` onward, same as `decoder_base_t::decode`'s
    /// `bytes_used` out-param).
    pub fn decode(&mut self, buf: &[u8], mut on_msg: impl FnMut(Msg)) -> Result<usize> {
        let mut pos = 0usize;

        loop {
            match self.step {
                Step::FlagsReady => {
                    if buf.len() - pos < 1 {
                        break;
                    }
                    let flags = buf[pos];
                    pos += 1;
                    self.msg_flags = 0;
                    if flags & MORE_FLAG != 0 {
                        self.msg_flags |= Flags::MORE.bits();
                    }
                    if flags & COMMAND_FLAG != 0 {
                        self.msg_flags |= Flags::COMMAND.bits();
                    }
                    self.step = if flags & LARGE_FLAG != 0 {
                        Step::EightByteSizeReady
                    } else {
                        Step::OneByteSizeReady
                    };
                }
                Step::OneByteSizeReady => {
                    if buf.len() - pos < 1 {
                        break;
                    }
                    let size = buf[pos] as u64;
                    pos += 1;
                    match self.size_ready(size, buf, &mut pos)? {
                        Some(msg) => {
                            on_msg(msg);
                            self.step = Step::FlagsReady;
                        }
                        None => break,
                    }
                }
                Step::EightByteSizeReady => {
                    if buf.len() - pos < 8 {
                        break;
                    }
                    let size = BigEndian::read_u64(&buf[pos..pos + 8]);
                    pos += 8;
                    match self.size_ready(size, buf, &mut pos)? {
                        Some(msg) => {
                            on_msg(msg);
                            self.step = Step::FlagsReady;
                        }
                        None => break,
                    }
                }
            }
        }

        Ok(pos)
    }

    fn size_ready(&self, size: u64, buf: &[u8], pos: &mut usize) -> Result<Option<Msg>> {
        if let Some(max) = self.max_msg_size {
            if size > max {
                return Err(Error::MsgSize);
            }
        }
        let size = size as usize;
        if buf.len() - *pos < size {
            return Ok(None);
        }
        let mut msg = Msg::init_buffer(&buf[*pos..*pos + size]);
        *pos += size;
        msg.set_flags(Flags::from_bits_truncate(self.msg_flags));
        Ok(Some(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(flags: u8, body: &[u8]) -> Vec<u8> {
        let mut v = vec![flags, body.len() as u8];
        v.extend_from_slice(body);
        v
    }

    #[test]
    fn decodes_single_small_frame() {
        let mut dec = Decoder::new(None);
        let buf = frame(0, b"hello");
        let mut got = Vec::new();
        let used = dec.decode(&buf, |m| got.push(m)).unwrap();
        assert_eq!(used, buf.len());
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].data(), b"hello");
        assert!(!got[0].has_more());
    }

    #[test]
    fn decodes_more_flag_across_frames() {
        let mut dec = Decoder::new(None);
        let mut buf = frame(MORE_FLAG, b"part1");
        buf.extend(frame(0, b"part2"));
        let mut got = Vec::new();
        dec.decode(&buf, |m| got.push(m)).unwrap();
        assert_eq!(got.len(), 2);
        assert!(got[0].has_more());
        assert!(!got[1].has_more());
    }

    #[test]
    fn leaves_partial_trailing_frame_unconsumed() {
        let mut dec = Decoder::new(None);
        let full = frame(0, b"hello");
        let partial = &full[..full.len() - 2];
        let mut got = Vec::new();
        let used = dec.decode(partial, |m| got.push(m)).unwrap();
        assert_eq!(used, 0);
        assert!(got.is_empty());
    }

    #[test]
    fn eight_byte_size_used_for_large_flag() {
        let mut dec = Decoder::new(None);
        let body = vec![7u8; 300];
        let mut buf = vec![LARGE_FLAG];
        let mut size_bytes = [0u8; 8];
        BigEndian::write_u64(&mut size_bytes, body.len() as u64);
        buf.extend_from_slice(&size_bytes);
        buf.extend_from_slice(&body);

        let mut got = Vec::new();
        dec.decode(&buf, |m| got.push(m)).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].size(), 300);
    }

    #[test]
    fn oversized_message_is_rejected() {
        let mut dec = Decoder::new(Some(10));
        let buf = frame(0, &[0u8; 20]);
        assert!(matches!(dec.decode(&buf, |_| {}), Err(Error::MsgSize)));
    }
}

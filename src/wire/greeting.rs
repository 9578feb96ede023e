// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! The 64-byte ZMTP/3 greeting (spec §3.5).

use crate::error::{Error, Result};
use byteorder::{BigEndian, ByteOrder};

pub const GREETING_SIZE: usize = 64;
pub const SIGNATURE_SIZE: usize = 10;
const MECHANISM_NAME_SIZE: usize = 20;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub revision: u8,
    pub minor: u8,
    pub mechanism: String,
    pub as_server: bool,
}

impl Greeting {
    pub fn new(as_server: bool) -> Greeting {
        Greeting {
            revision: 3,
            minor: 1,
            mechanism: "NULL".to_owned(),
            as_server,
        }
    }

    pub fn encode(&self) -> [u8; GREETING_SIZE] {
        let mut buf = [0u8; GREETING_SIZE];
        buf[0] = 0xFF;
        BigEndian::write_u64(&mut buf[1..9], 1);
        buf[9] = 0x7F;
        buf[10] = self.revision;
        buf[11] = self.minor;

        let name = self.mechanism.as_bytes();
        let n = name.len().min(MECHANISM_NAME_SIZE);
        buf[12..12 + n].copy_from_slice(&name[..n]);

        buf[32] = if self.as_server { 1 } else { 0 };
        buf
    }

    /// Decodes a full 64-byte greeting. Malformed signature bytes or a
    /// mechanism name with no NUL terminator within its field are
    /// reported as `Error::Proto`; an unrecognized mechanism is
    /// `Error::NoCompatProto` (only NULL is supported — spec's
    /// Non-goals exclude PLAIN/CURVE/GSSAPI).
    pub fn decode(buf: &[u8]) -> Result<Greeting> {
        if buf.len() < GREETING_SIZE {
            return Err(Error::Proto("greeting too short"));
        }
        if buf[0] != 0xFF || buf[9] != 0x7F {
            return Err(Error::Proto("bad greeting signature"));
        }

        let revision = buf[10];
        let minor = buf[11];
        let name_field = &buf[12..12 + MECHANISM_NAME_SIZE];
        let name_len = name_field
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(MECHANISM_NAME_SIZE);
        let mechanism = String::from_utf8_lossy(&name_field[..name_len]).into_owned();

        if mechanism != "NULL" {
            return Err(Error::NoCompatProto);
        }

        let as_server = buf[32] != 0;

        Ok(Greeting {
            revision,
            minor,
            mechanism,
            as_server,
        })
    }

    pub fn version(&self) -> super::Version {
        super::Version::from_wire(self.revision, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let g = Greeting::new(true);
        let buf = g.encode();
        let decoded = Greeting::decode(&buf).unwrap();
        assert_eq!(decoded, g);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut buf = Greeting::new(false).encode();
        buf[0] = 0x00;
        assert!(matches!(Greeting::decode(&buf), Err(Error::Proto(_))));
    }

    #[test]
    fn rejects_unsupported_mechanism() {
        let mut buf = Greeting::new(false).encode();
        buf[12..17].copy_from_slice(b"PLAIN");
        for b in &mut buf[17..32] {
            *b = 0;
        }
        assert!(matches!(Greeting::decode(&buf), Err(Error::NoCompatProto)));
    }
}

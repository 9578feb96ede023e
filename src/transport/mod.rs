// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Endpoint resolution and transport listeners (spec §6.2): `tcp://`,
//! `ipc://`, `inproc://`. `Endpoint` is the parsed form of a bind/connect
//! URI; `EngineStream` erases the TCP/IPC stream-type difference so
//! `Session`/`Engine` don't need to be generic over it.

pub mod inproc;
pub mod ipc;
pub mod tcp;

use std::io::{self, Read, Write};

use mio::event::Source;
use mio::{Interest, Registry, Token};

use crate::error::{Error, Result};

/// A parsed bind/connect URI (spec §6.2).
#[derive(Debug, Clone)]
pub enum Endpoint {
    Tcp(String),
    Ipc(String),
    Inproc(String),
}

/// Splits `scheme://rest` and produces the typed endpoint. `tcp://*:PORT`
/// and `tcp://*:*` are left for `transport::tcp` to resolve (`*` host
/// means `INADDR_ANY`, `*` port means ephemeral).
pub fn parse_endpoint(uri: &str) -> Result<Endpoint> {
    let (scheme, rest) = uri
        .split_once("://")
        .ok_or(Error::InvalidInput("endpoint missing scheme"))?;
    if rest.is_empty() {
        return Err(Error::InvalidInput("endpoint missing address"));
    }
    match scheme {
        "tcp" => Ok(Endpoint::Tcp(rest.to_owned())),
        "ipc" => Ok(Endpoint::Ipc(rest.to_owned())),
        "inproc" => Ok(Endpoint::Inproc(rest.to_owned())),
        _ => Err(Error::InvalidInput("unsupported transport scheme")),
    }
}

/// A connected stream from either the TCP or IPC transport. `inproc://`
/// never produces one of these — its two ends are a `Pipe` directly
/// (spec §6.2's "connect may precede bind" only makes sense without a
/// byte-stream in between).
pub enum EngineStream {
    Tcp(mio::net::TcpStream),
    #[cfg(unix)]
    Ipc(mio::net::UnixStream),
}

impl Read for EngineStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            EngineStream::Tcp(s) => s.read(buf),
            #[cfg(unix)]
            EngineStream::Ipc(s) => s.read(buf),
        }
    }
}

impl Write for EngineStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            EngineStream::Tcp(s) => s.write(buf),
            #[cfg(unix)]
            EngineStream::Ipc(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            EngineStream::Tcp(s) => s.flush(),
            #[cfg(unix)]
            EngineStream::Ipc(s) => s.flush(),
        }
    }
}

impl Source for EngineStream {
    fn register(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            EngineStream::Tcp(s) => s.register(registry, token, interests),
            #[cfg(unix)]
            EngineStream::Ipc(s) => s.register(registry, token, interests),
        }
    }

    fn reregister(&mut self, registry: &Registry, token: Token, interests: Interest) -> io::Result<()> {
        match self {
            EngineStream::Tcp(s) => s.reregister(registry, token, interests),
            #[cfg(unix)]
            EngineStream::Ipc(s) => s.reregister(registry, token, interests),
        }
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        match self {
            EngineStream::Tcp(s) => s.deregister(registry),
            #[cfg(unix)]
            EngineStream::Ipc(s) => s.deregister(registry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_scheme() {
        assert!(matches!(parse_endpoint("tcp://127.0.0.1:5555"), Ok(Endpoint::Tcp(_))));
        assert!(matches!(parse_endpoint("ipc:///tmp/x.sock"), Ok(Endpoint::Ipc(_))));
        assert!(matches!(parse_endpoint("inproc://name"), Ok(Endpoint::Inproc(_))));
    }

    #[test]
    fn rejects_missing_scheme() {
        assert!(parse_endpoint("127.0.0.1:5555").is_err());
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(parse_endpoint("pgm://127.0.0.1:5555").is_err());
    }
}

// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Error taxonomy for the library (spec §7). ZMTP needs a handful of
//! error kinds that have no `std::io::ErrorKind` counterpart (`EFSM`,
//! `ENOCOMPATPROTO`, `EHOSTUNREACH`, `EMTHREAD`, ...), so we keep our own
//! enum and convert to/from `io::Error` at the transport boundary.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Non-blocking op would block, or HWM reached.
    #[error("resource temporarily unavailable")]
    Again,

    /// Bad option, bad socket type, malformed endpoint, empty routing id.
    #[error("invalid argument: {0}")]
    InvalidInput(&'static str),

    /// Allocation failure.
    #[error("out of memory")]
    NoMem,

    /// Malformed ZMTP frame, bad greeting, failed handshake.
    #[error("protocol error: {0}")]
    Proto(&'static str),

    /// Frame size exceeds the configured maximum.
    #[error("message size exceeds configured maximum")]
    MsgSize,

    /// The owning context was terminated.
    #[error("context was terminated")]
    Term,

    /// Operation not valid in the socket's current state.
    #[error("operation not valid in current state")]
    Fsm,

    /// Peer's ZMTP revision is not supported.
    #[error("peer protocol is not compatible")]
    NoCompatProto,

    /// No I/O thread available to host a new socket.
    #[error("no I/O thread available")]
    MThread,

    /// ROUTER_MANDATORY send to an unknown routing id.
    #[error("destination host unreachable")]
    HostUnreach,

    /// Bind target already in use.
    #[error("address already in use")]
    AddrInUse,

    /// Bind target not valid on this host.
    #[error("address not available")]
    AddrNotAvail,

    /// Connect attempt was rejected by the peer.
    #[error("connection refused")]
    ConnRefused,

    /// IPC path exceeds platform limits.
    #[error("path name too long")]
    NameTooLong,

    /// Escape hatch for transport-level I/O failures that don't map onto
    /// one of the kinds above.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Again => ErrorKind::Again,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::NoMem => ErrorKind::NoMem,
            Error::Proto(_) => ErrorKind::Proto,
            Error::MsgSize => ErrorKind::MsgSize,
            Error::Term => ErrorKind::Term,
            Error::Fsm => ErrorKind::Fsm,
            Error::NoCompatProto => ErrorKind::NoCompatProto,
            Error::MThread => ErrorKind::MThread,
            Error::HostUnreach => ErrorKind::HostUnreach,
            Error::AddrInUse => ErrorKind::AddrInUse,
            Error::AddrNotAvail => ErrorKind::AddrNotAvail,
            Error::ConnRefused => ErrorKind::ConnRefused,
            Error::NameTooLong => ErrorKind::NameTooLong,
            Error::Io(e) => io_error_kind(e.kind()),
        }
    }

    pub fn would_block(&self) -> bool {
        matches!(self.kind(), ErrorKind::Again)
    }
}

fn io_error_kind(kind: io::ErrorKind) -> ErrorKind {
    match kind {
        io::ErrorKind::WouldBlock => ErrorKind::Again,
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => ErrorKind::InvalidInput,
        io::ErrorKind::AddrInUse => ErrorKind::AddrInUse,
        io::ErrorKind::AddrNotAvailable => ErrorKind::AddrNotAvail,
        io::ErrorKind::ConnectionRefused => ErrorKind::ConnRefused,
        _ => ErrorKind::Other,
    }
}

/// Coarse classification, for callers that only care about the bucket
/// (mirrors the OS-errno-compatible kinds named in spec §7).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Again,
    InvalidInput,
    NoMem,
    Proto,
    MsgSize,
    Term,
    Fsm,
    NoCompatProto,
    MThread,
    HostUnreach,
    AddrInUse,
    AddrNotAvail,
    ConnRefused,
    NameTooLong,
    Other,
}

pub type Result<T> = std::result::Result<T, Error>;

pub fn would_block_io_error(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::WouldBlock, msg)
}

pub fn other_io_error(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, msg)
}

pub fn invalid_data_io_error(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

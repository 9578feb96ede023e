// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! ServerLink: a ZMTP 3.1-compatible messaging library.
//!
//! ```no_run
//! use serverlink::{Context, SocketType, flags};
//!
//! # fn main() -> serverlink::Result<()> {
//! let ctx = Context::new();
//! let mut server = ctx.socket(SocketType::Router)?;
//! server.bind("tcp://*:5555")?;
//!
//! let mut client = ctx.socket(SocketType::Dealer)?;
//! client.connect("tcp://127.0.0.1:5555")?;
//! client.send(serverlink::Msg::init_buffer(b"hello"), flags::NONE)?;
//! # Ok(())
//! # }
//! ```
//!
//! A `Context` (§4.11) owns a small pool of I/O threads; every `Socket`
//! it mints is one of the seven ZMTP patterns (`SocketType`) dispatched
//! through the internal `Protocol` trait. `tcp://` and `ipc://`
//! endpoints hand their connection lifecycle to an I/O thread; for
//! `inproc://` two sockets in the same process are paired directly,
//! with no thread hop at all.

pub mod context;
pub mod engine;
pub mod error;
pub mod glob;
pub mod global;
mod io_thread;
pub mod mailbox;
pub mod mechanism;
pub mod metadata;
pub mod msg;
pub mod pipe;
pub mod poller;
pub mod session;
pub mod socket;
pub mod transport;
pub mod trie;
pub mod wire;
mod ypipe;

pub use context::{Context, ContextOptions};
pub use error::{Error, ErrorKind, Result};
pub use global::SocketType;
pub use msg::Msg;
pub use socket::facade::Socket;
pub use socket::flags;

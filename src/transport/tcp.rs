// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! `tcp://` transport (spec §6.2): `*` as host means `INADDR_ANY`/`::`,
//! `*` as port requests an ephemeral one. Listener setup goes through
//! `socket2` for `SO_REUSEADDR` before handing the fd to `mio`, the same
//! split used for every stream transport in this crate.

use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::os::unix::io::{AsRawFd, FromRawFd};
use std::time::Duration;

use mio::net::{TcpListener, TcpStream};
use socket2::{Domain, Socket, TcpKeepalive, Type};

use crate::error::{Error, Result};

/// `TCP_KEEPALIVE*` knobs (spec §4.9's option table); `None` leaves the
/// OS default in place. Applied via `socket2` after the stream exists,
/// since `mio`'s own `TcpStream`/`TcpListener` don't expose these.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepaliveConfig {
    pub enabled: bool,
    pub idle: Option<Duration>,
    pub interval: Option<Duration>,
    pub retries: Option<u32>,
}

/// Applies `cfg` to an already-connected/accepted stream. Borrows the
/// fd into a throwaway `socket2::Socket` and forgets it afterward so
/// `stream` keeps sole ownership — the same temporary-wrapper dance
/// `socket2`'s own docs recommend for fds you don't want closed twice.
pub fn set_keepalive(stream: &TcpStream, cfg: &KeepaliveConfig) -> std::io::Result<()> {
    if !cfg.enabled {
        return Ok(());
    }
    let sock = unsafe { Socket::from_raw_fd(stream.as_raw_fd()) };
    let mut ka = TcpKeepalive::new();
    if let Some(idle) = cfg.idle {
        ka = ka.with_time(idle);
    }
    if let Some(interval) = cfg.interval {
        ka = ka.with_interval(interval);
    }
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    if let Some(retries) = cfg.retries {
        ka = ka.with_retries(retries);
    }
    let result = sock.set_tcp_keepalive(&ka);
    std::mem::forget(sock);
    result
}

/// Resolves a `HOST:PORT` pair (the part after `tcp://`) to one or more
/// candidate `SocketAddr`s, honoring the `*` wildcard host.
fn resolve(hostport: &str) -> Result<Vec<SocketAddr>> {
    let (host, port) = hostport
        .rsplit_once(':')
        .ok_or(Error::InvalidInput("tcp endpoint missing port"))?;
    let host = if host.is_empty() || host == "*" { "0.0.0.0" } else { host };
    let port = if port == "*" { "0" } else { port };
    let candidate = format!("{host}:{port}");
    use std::net::ToSocketAddrs;
    candidate
        .to_socket_addrs()
        .map(|it| it.collect())
        .map_err(|_| Error::AddrNotAvail)
}

/// Binds and starts listening, returning the resolved local address
/// (for `LAST_ENDPOINT`) alongside the `mio` listener.
pub fn bind(hostport: &str) -> Result<(TcpListener, SocketAddr)> {
    let addrs = resolve(hostport)?;
    let addr = addrs.first().copied().ok_or(Error::AddrNotAvail)?;

    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, None).map_err(Error::Io)?;
    socket.set_reuse_address(true).map_err(Error::Io)?;
    socket.set_nonblocking(true).map_err(Error::Io)?;
    socket.bind(&addr.into()).map_err(map_bind_error)?;
    socket.listen(1024).map_err(Error::Io)?;

    let std_listener: StdTcpListener = socket.into();
    let local_addr = std_listener.local_addr().map_err(Error::Io)?;
    Ok((TcpListener::from_std(std_listener), local_addr))
}

/// Starts a non-blocking connect; completion is observed via the
/// stream becoming writable, same as any other non-blocking `connect`.
pub fn connect(hostport: &str) -> Result<TcpStream> {
    let addrs = resolve(hostport)?;
    let addr = addrs.first().copied().ok_or(Error::AddrNotAvail)?;
    TcpStream::connect(addr).map_err(map_connect_error)
}

fn map_bind_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::AddrInUse => Error::AddrInUse,
        std::io::ErrorKind::AddrNotAvailable => Error::AddrNotAvail,
        _ => Error::Io(e),
    }
}

fn map_connect_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => Error::ConnRefused,
        _ => Error::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_ephemeral_port_on_wildcard_host() {
        let (_listener, addr) = bind("*:*").unwrap();
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn connect_to_closed_port_is_refused_or_pending() {
        // A non-blocking connect to an address nothing listens on either
        // completes later as refused or is still in progress; either way
        // this must not panic synchronously.
        let (listener, addr) = bind("127.0.0.1:*").unwrap();
        drop(listener);
        let _ = connect(&format!("127.0.0.1:{}", addr.port()));
    }

    #[test]
    fn disabled_keepalive_is_a_no_op() {
        let (listener, addr) = bind("127.0.0.1:*").unwrap();
        let stream = connect(&format!("127.0.0.1:{}", addr.port())).unwrap();
        set_keepalive(&stream, &KeepaliveConfig::default()).unwrap();
        drop(listener);
    }

    #[test]
    fn enabled_keepalive_applies_without_error() {
        let (listener, addr) = bind("127.0.0.1:*").unwrap();
        let stream = connect(&format!("127.0.0.1:{}", addr.port())).unwrap();
        let cfg = KeepaliveConfig {
            enabled: true,
            idle: Some(Duration::from_secs(30)),
            interval: Some(Duration::from_secs(5)),
            retries: Some(3),
        };
        set_keepalive(&stream, &cfg).unwrap();
        drop(listener);
    }
}

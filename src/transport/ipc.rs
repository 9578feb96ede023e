// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! `ipc://` transport (spec §6.2): Unix-domain stream sockets. The
//! socket file is unlinked on graceful close; binding a path already in
//! use (an existing, listenable socket file) is `EADDRINUSE`; platform
//! path-length limits surface as `ENAMETOOLONG`.
#![cfg(unix)]

use std::path::Path;

use mio::net::{UnixListener, UnixStream};

use crate::error::{Error, Result};

/// `sockaddr_un.sun_path` is typically 108 bytes on Linux; leave room
/// for the terminating NUL the libc layer adds.
const MAX_PATH_LEN: usize = 107;

pub fn bind(path: &str) -> Result<UnixListener> {
    if path.len() > MAX_PATH_LEN {
        return Err(Error::NameTooLong);
    }
    if Path::new(path).exists() {
        if std::os::unix::net::UnixStream::connect(path).is_ok() {
            return Err(Error::AddrInUse);
        }
        // Stale socket file from an ungraceful previous shutdown.
        let _ = std::fs::remove_file(path);
    }
    UnixListener::bind(path).map_err(Error::Io)
}

pub fn connect(path: &str) -> Result<UnixStream> {
    if path.len() > MAX_PATH_LEN {
        return Err(Error::NameTooLong);
    }
    UnixStream::connect(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotFound => Error::ConnRefused,
        _ => Error::Io(e),
    })
}

/// Removes the socket file, matching spec §6.2's "unlinked on close".
pub fn unlink(path: &str) {
    let _ = std::fs::remove_file(path);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binds_and_connects_over_a_temp_socket_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.sock");
        let path = path.to_str().unwrap();

        let _listener = bind(path).unwrap();
        let _client = connect(path).unwrap();
        unlink(path);
        assert!(!Path::new(path).exists());
    }

    #[test]
    fn rejects_overlong_path() {
        let long = "a".repeat(200);
        assert!(matches!(bind(&long), Err(Error::NameTooLong)));
    }
}

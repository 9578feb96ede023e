// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! End-to-end socket pattern scenarios, mirroring the teacher's own
//! `test/test.rs` in spirit: real `Context`s, real transports, and
//! assertions on the bytes that actually cross them.

use std::thread;
use std::time::Duration;

use serverlink::socket::flags;
use serverlink::wire::Encoder;
use serverlink::{Context, Error, Msg, SocketType};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// ROUTER<->ROUTER handshake and echo over TCP.
#[test]
fn router_to_router_handshake_and_echo_over_tcp() {
    init();

    let ctx = Context::new();
    let mut a = ctx.socket(SocketType::Router).unwrap();
    a.setsockopt("IDENTITY", b"SERVER").unwrap();
    let bound = a.bind("tcp://127.0.0.1:0").unwrap();

    let mut b = ctx.socket(SocketType::Router).unwrap();
    b.setsockopt("IDENTITY", b"CLIENT").unwrap();
    b.setsockopt("CONNECT_ROUTING_ID", b"SERVER").unwrap();
    b.connect(&bound).unwrap();

    b.send(Msg::init_buffer(b"SERVER"), flags::SNDMORE).unwrap();
    b.send(Msg::init_buffer(b"HELLO"), flags::NONE).unwrap();

    let from = recv_blocking(&mut a);
    let body = recv_blocking(&mut a);
    assert_eq!(from.data(), b"CLIENT");
    assert_eq!(body.data(), b"HELLO");

    a.send(Msg::init_buffer(b"CLIENT"), flags::SNDMORE).unwrap();
    a.send(Msg::init_buffer(b"WORLD"), flags::NONE).unwrap();

    let from = recv_blocking(&mut b);
    let body = recv_blocking(&mut b);
    assert_eq!(from.data(), b"SERVER");
    assert_eq!(body.data(), b"WORLD");
}

/// PUB/SUB with a topic filter over `inproc://`.
#[test]
fn pub_sub_topic_filter_over_inproc() {
    init();

    let ctx = Context::new();
    let mut pub_socket = ctx.socket(SocketType::Pub).unwrap();
    pub_socket.bind("inproc://weather-test").unwrap();

    let mut sub_socket = ctx.socket(SocketType::Sub).unwrap();
    sub_socket.connect("inproc://weather-test").unwrap();
    sub_socket.setsockopt("SUBSCRIBE", b"weather").unwrap();

    thread::sleep(Duration::from_millis(100));

    pub_socket.send(Msg::init_buffer(b"weather sunny"), flags::NONE).unwrap();
    let got = recv_blocking(&mut sub_socket);
    assert_eq!(got.data(), b"weather sunny");

    pub_socket.send(Msg::init_buffer(b"news breaking"), flags::NONE).unwrap();
    assert!(matches!(sub_socket.recv(flags::DONTWAIT), Err(Error::Again)));
}

/// HWM of 1 on both ends blocks a second `DONTWAIT` send until the
/// receiver drains the queue.
#[test]
fn hwm_blocks_sender_until_drained() {
    init();

    let ctx = Context::new();
    let mut a = ctx.socket(SocketType::Router).unwrap();
    a.setsockopt("IDENTITY", b"A").unwrap();
    a.setsockopt("SNDHWM", &1u32.to_be_bytes()).unwrap();
    a.setsockopt("RCVHWM", &1u32.to_be_bytes()).unwrap();
    let bound = a.bind("tcp://127.0.0.1:0").unwrap();

    let mut b = ctx.socket(SocketType::Router).unwrap();
    b.setsockopt("IDENTITY", b"B").unwrap();
    b.setsockopt("CONNECT_ROUTING_ID", b"A").unwrap();
    b.setsockopt("SNDHWM", &1u32.to_be_bytes()).unwrap();
    b.setsockopt("RCVHWM", &1u32.to_be_bytes()).unwrap();
    b.connect(&bound).unwrap();

    // let the handshake settle so A's routing table knows "B" before
    // the HWM-sensitive sends start.
    thread::sleep(Duration::from_millis(100));

    let payload = vec![0u8; 65536];

    a.send(Msg::init_buffer(b"B"), flags::SNDMORE).unwrap();
    a.send(Msg::init_buffer(&payload), flags::DONTWAIT).unwrap();

    a.send(Msg::init_buffer(b"B"), flags::SNDMORE).unwrap();
    let second = a.send(Msg::init_buffer(&payload), flags::DONTWAIT);
    assert!(matches!(second, Err(Error::Again)));

    let _from = recv_blocking(&mut b);
    let _first = recv_blocking(&mut b);

    thread::sleep(Duration::from_millis(50));
    a.send(Msg::init_buffer(b"B"), flags::SNDMORE).unwrap();
    a.send(Msg::init_buffer(&payload), flags::DONTWAIT).unwrap();
}

/// SUB connecting to XPUB delivers its SUBSCRIBE/CANCEL as ordinary
/// `[0x01|0x00, topic]` frames to the application.
#[test]
fn subscription_forwarding_to_xpub() {
    init();

    let ctx = Context::new();
    let mut xpub = ctx.socket(SocketType::XPub).unwrap();
    xpub.bind("inproc://xpub-forward-test").unwrap();

    let mut sub = ctx.socket(SocketType::Sub).unwrap();
    sub.connect("inproc://xpub-forward-test").unwrap();
    sub.setsockopt("SUBSCRIBE", b"A").unwrap();

    let frame = recv_blocking(&mut xpub);
    assert_eq!(frame.data(), &[0x01, b'A']);

    drop(sub);

    let frame = recv_blocking(&mut xpub);
    assert_eq!(frame.data(), &[0x00, b'A']);
}

/// A v3.1 peer encodes SUBSCRIBE as a COMMAND frame whose body is
/// `"\x09SUBSCRIBE" + topic`.
#[test]
fn v3_1_subscribe_command_encoding() {
    let encoder = Encoder::new();
    let msg = Msg::init_subscribe(b"A");

    let mut out = Vec::new();
    encoder.encode(&msg, false, &mut out);

    assert_eq!(out[0] & 0x04, 0x04, "COMMAND bit must be set");
    assert_eq!(out[0] & 0x02, 0, "LARGE bit must be clear");
    assert_eq!(out[1], 10, "size byte covers the 10-byte command body");
    assert_eq!(&out[2..], b"\x09SUBSCRIBEA");
}

/// `ROUTER_MANDATORY` turns a send to an unknown peer into
/// `EHOSTUNREACH`, with nothing left enqueued. A real (known) peer is
/// kept connected so `xhas_out` has somewhere to report readiness from
/// — the unreachable destination is rejected purely by identity lookup,
/// independent of any particular pipe's queue state.
#[test]
fn router_mandatory_rejects_unknown_peer() {
    init();

    let ctx = Context::new();
    let mut a = ctx.socket(SocketType::Router).unwrap();
    a.setsockopt("IDENTITY", b"A").unwrap();
    a.setsockopt("ROUTER_MANDATORY", &[1]).unwrap();
    let bound = a.bind("tcp://127.0.0.1:0").unwrap();

    let mut b = ctx.socket(SocketType::Router).unwrap();
    b.setsockopt("IDENTITY", b"KNOWN").unwrap();
    b.setsockopt("CONNECT_ROUTING_ID", b"A").unwrap();
    b.connect(&bound).unwrap();

    thread::sleep(Duration::from_millis(100));

    let result = a.send(Msg::init_buffer(b"UNKNOWN"), flags::SNDMORE | flags::DONTWAIT);
    assert!(matches!(result, Err(Error::HostUnreach)));
}

fn recv_blocking(socket: &mut serverlink::Socket) -> Msg {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        match socket.recv(flags::DONTWAIT) {
            Ok(msg) => return msg,
            Err(Error::Again) => {
                if std::time::Instant::now() >= deadline {
                    panic!("timed out waiting for a message");
                }
                thread::sleep(Duration::from_millis(5));
            }
            Err(e) => panic!("recv failed: {e}"),
        }
    }
}

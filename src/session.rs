// Copyright 2016 Benoît Labaere (benoit.labaere@gmail.com)
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or http://www.apache.org/licenses/LICENSE-2.0>
// or the MIT license <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your option.
// This file may not be copied, modified, or distributed except according to those terms.

//! Session (spec §4.7): bridges one endpoint's engine to the owning
//! socket's pipe, and owns reconnection on the connect side. A bind-side
//! session (accepted connection) has no endpoint to retry and is simply
//! dropped on engine failure.

use std::time::{Duration, Instant};

use mio::{Registry, Token};
use rand::Rng;

use crate::engine::{Engine, EngineOptions};
use crate::error::Result;
use crate::global::SocketType;
use crate::pipe::Pipe;
use crate::transport::{self, Endpoint, EngineStream};

/// Reconnection backoff parameters (spec §4.7): doubles from
/// `reconnect_ivl` up to `reconnect_ivl_max` (0 disables the cap,
/// matching spec's option semantics), with +/-20% jitter so a bundle
/// of peers reconnecting to the same restarted bind endpoint doesn't
/// thunder all at once.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub ivl: Duration,
    pub ivl_max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        ReconnectPolicy {
            ivl: Duration::from_millis(100),
            ivl_max: Duration::from_millis(0),
        }
    }
}

impl ReconnectPolicy {
    fn next_ivl(&self, current: Duration) -> Duration {
        if self.ivl_max.is_zero() {
            return self.ivl;
        }
        (current * 2).min(self.ivl_max)
    }

    fn jittered(&self, ivl: Duration) -> Duration {
        let jitter_pct = rand::thread_rng().gen_range(-20i32..=20);
        let millis = ivl.as_millis() as i64;
        let jittered = millis + (millis * jitter_pct as i64 / 100);
        Duration::from_millis(jittered.max(0) as u64)
    }
}

/// One endpoint's connection lifecycle: the live `Engine` (if any), and
/// — on the connect side — enough state to tear down and reopen it.
pub struct Session {
    socket_type: SocketType,
    pipe: Pipe,
    token: Token,
    engine_options: EngineOptions,
    engine: Option<Engine<EngineStream>>,

    /// `Some` for connect-side sessions; `None` for accepted ones,
    /// which never retry (spec §4.7: "if bind-side, drops the session").
    connect_target: Option<Endpoint>,
    reconnect_policy: ReconnectPolicy,
    current_ivl: Duration,
    next_attempt_at: Option<Instant>,

    terminated: bool,
}

impl Session {
    /// Wraps an already-accepted stream (bind-side); never reconnects.
    pub fn for_accepted(
        socket_type: SocketType,
        pipe: Pipe,
        token: Token,
        stream: EngineStream,
        engine_options: EngineOptions,
    ) -> Session {
        let engine = Engine::new(stream, token, socket_type, true, pipe.clone(), engine_options.clone());
        Session {
            socket_type,
            pipe,
            token,
            engine_options,
            engine: Some(engine),
            connect_target: None,
            reconnect_policy: ReconnectPolicy::default(),
            current_ivl: Duration::from_millis(0),
            next_attempt_at: None,
            terminated: false,
        }
    }

    /// Starts a connect-side session. `target` is retried with backoff
    /// if the connection fails or later drops.
    pub fn connecting(
        socket_type: SocketType,
        pipe: Pipe,
        token: Token,
        target: Endpoint,
        reconnect_policy: ReconnectPolicy,
        engine_options: EngineOptions,
    ) -> Session {
        let mut session = Session {
            socket_type,
            pipe,
            token,
            engine_options,
            engine: None,
            connect_target: Some(target),
            reconnect_policy,
            current_ivl: reconnect_policy.ivl,
            next_attempt_at: Some(Instant::now()),
            terminated: false,
        };
        session.try_connect();
        session
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    pub fn engine_mut(&mut self) -> Option<&mut Engine<EngineStream>> {
        self.engine.as_mut()
    }

    /// Hands one message off toward the engine (spec §4.7 `pull_msg`):
    /// delegates to the shared pipe, which both the socket and the
    /// engine read from/write to directly.
    pub fn pull_msg(&self) -> Option<crate::msg::Msg> {
        self.pipe.read()
    }

    pub fn push_msg(&self, msg: crate::msg::Msg) -> bool {
        let ok = self.pipe.write(msg);
        self.pipe.flush();
        ok
    }

    pub fn register(&mut self, registry: &Registry) -> std::io::Result<()> {
        match self.engine.as_mut() {
            Some(engine) => engine.register(registry),
            None => Ok(()),
        }
    }

    pub fn on_readable(&mut self, registry: &Registry) -> Result<()> {
        if let Some(engine) = self.engine.as_mut() {
            engine.on_readable()?;
            engine.reregister(registry)?;
        }
        self.reap_engine_if_dead(registry);
        Ok(())
    }

    pub fn on_writable(&mut self, registry: &Registry) -> Result<()> {
        if let Some(engine) = self.engine.as_mut() {
            engine.on_writable()?;
            engine.reregister(registry)?;
        }
        self.reap_engine_if_dead(registry);
        Ok(())
    }

    /// Called on every poll wakeup: services heartbeats/handshake
    /// timeout on a live engine, or attempts a reconnect once the
    /// connect-side backoff has elapsed.
    pub fn tick(&mut self, now: Instant, registry: &Registry) -> Result<()> {
        if let Some(engine) = self.engine.as_mut() {
            if let Err(e) = engine.tick(now) {
                self.fail_engine(registry);
                return Err(e);
            }
            engine.service_pipe();
            engine.reregister(registry)?;
        }
        self.reap_engine_if_dead(registry);

        if self.engine.is_none() && self.connect_target.is_some() {
            if self.next_attempt_at.map(|at| now >= at).unwrap_or(false) {
                self.try_connect();
                if let Some(engine) = self.engine.as_mut() {
                    engine.register(registry)?;
                }
            }
        }
        Ok(())
    }

    fn reap_engine_if_dead(&mut self, registry: &Registry) {
        let dead = matches!(self.engine.as_ref(), Some(e) if e.is_terminated());
        if dead {
            self.fail_engine(registry);
        }
    }

    /// Engine error or clean peer close (spec §4.7 "on engine error").
    fn fail_engine(&mut self, registry: &Registry) {
        if let Some(mut engine) = self.engine.take() {
            let _ = engine.deregister(registry);
        }
        match &self.connect_target {
            Some(_) => {
                let jittered = self.reconnect_policy.jittered(self.current_ivl);
                self.next_attempt_at = Some(Instant::now() + jittered);
                self.current_ivl = self.reconnect_policy.next_ivl(self.current_ivl);
            }
            None => self.terminated = true,
        }
    }

    fn try_connect(&mut self) {
        let target = match &self.connect_target {
            Some(t) => t.clone(),
            None => return,
        };
        let stream = match &target {
            Endpoint::Tcp(hostport) => transport::tcp::connect(hostport).ok().map(|s| {
                let _ = transport::tcp::set_keepalive(&s, &self.engine_options.keepalive);
                EngineStream::Tcp(s)
            }),
            #[cfg(unix)]
            Endpoint::Ipc(path) => transport::ipc::connect(path).ok().map(EngineStream::Ipc),
            #[cfg(not(unix))]
            Endpoint::Ipc(_) => None,
            Endpoint::Inproc(_) => None, // inproc never goes through Session/Engine
        };

        match stream {
            Some(stream) => {
                let engine = Engine::new(
                    stream,
                    self.token,
                    self.socket_type,
                    false,
                    self.pipe.clone(),
                    self.engine_options.clone(),
                );
                self.engine = Some(engine);
                self.current_ivl = self.reconnect_policy.ivl;
                self.next_attempt_at = None;
            }
            None => {
                let jittered = self.reconnect_policy.jittered(self.current_ivl);
                self.next_attempt_at = Some(Instant::now() + jittered);
                self.current_ivl = self.reconnect_policy.next_ivl(self.current_ivl);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_configured_max() {
        let policy = ReconnectPolicy {
            ivl: Duration::from_millis(100),
            ivl_max: Duration::from_millis(350),
        };
        let mut ivl = policy.ivl;
        ivl = policy.next_ivl(ivl);
        assert_eq!(ivl, Duration::from_millis(200));
        ivl = policy.next_ivl(ivl);
        assert_eq!(ivl, Duration::from_millis(350)); // capped, not 400
        ivl = policy.next_ivl(ivl);
        assert_eq!(ivl, Duration::from_millis(350));
    }

    #[test]
    fn zero_max_disables_backoff_growth() {
        let policy = ReconnectPolicy {
            ivl: Duration::from_millis(100),
            ivl_max: Duration::from_millis(0),
        };
        assert_eq!(policy.next_ivl(Duration::from_millis(100)), Duration::from_millis(100));
        assert_eq!(policy.next_ivl(Duration::from_millis(800)), Duration::from_millis(100));
    }

    #[test]
    fn jitter_stays_within_twenty_percent() {
        let policy = ReconnectPolicy::default();
        for _ in 0..100 {
            let j = policy.jittered(Duration::from_millis(1000));
            assert!(j.as_millis() >= 800 && j.as_millis() <= 1200, "{:?}", j);
        }
    }
}

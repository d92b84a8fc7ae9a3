/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! The listener and its handle: binds a `TcpListener`, spawns one task per
//! accepted connection (§5 Scheduling model), and serves until
//! [`ServerHandle::stop`] is called or the process exits.
//!
//! Replaces the original implementation's module-level `_server` singleton
//! and its typo'd `stop()` (`_serevr = None`, spec.md §9 Open Questions)
//! with an explicit handle that actually clears its reference to the
//! listening task when asked to stop.

pub mod connection;

use std::sync::{Arc, Mutex};

use slog::{info, o};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::error::{IcapError, IcapResult};
use crate::hooks::{BeforeHandlingHook, BeforeSerializationHook, Hooks, IsTagHook, OptionsHeadersHook};
use crate::registry::{Criterion, Handler, HandlerRegistry};

/// Accumulates configuration, registered handlers and hooks before the
/// listener starts. Mirrors spec.md §6's registration API: handlers and
/// hooks register here; [`ServerBuilder::build`] finalizes the matcher
/// (spec.md §4.4, "recomputed before the server accepts its first
/// connection").
#[derive(Default)]
pub struct ServerBuilder {
    config: ServerConfig,
    registry: HandlerRegistry,
    hooks: Hooks,
    logger: Option<slog::Logger>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the default configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Shorthand for overriding just the listen address.
    pub fn bind(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.host = host.into();
        self.config.port = port;
        self
    }

    /// Use `logger` as the base logger; per-connection loggers are derived
    /// from it with the peer address attached.
    pub fn logger(mut self, logger: slog::Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Register an adaptation handler under `criterion`.
    pub fn register_handler(mut self, criterion: Criterion, handler: impl Handler + 'static) -> Self {
        self.registry.register(criterion, handler);
        self
    }

    /// Register the `options_headers` hook.
    pub fn on_options_headers(mut self, func: OptionsHeadersHook, default: Vec<(String, String)>) -> Self {
        self.hooks.set_options_headers(func, default, false);
        self
    }

    /// Register the `is_tag` hook.
    pub fn on_is_tag(mut self, func: IsTagHook, default: String) -> Self {
        self.hooks.set_is_tag(func, default, false);
        self
    }

    /// Register the `before_handling` hook.
    pub fn on_before_handling(mut self, func: BeforeHandlingHook) -> Self {
        self.hooks.set_before_handling(func);
        self
    }

    /// Register the `before_serialization` hook.
    pub fn on_before_serialization(mut self, func: BeforeSerializationHook) -> Self {
        self.hooks.set_before_serialization(func);
        self
    }

    /// Finalize the handler matcher and produce a [`Server`] ready to
    /// [`Server::run`].
    pub fn build(mut self) -> Server {
        self.registry.finalize();
        Server {
            config: Arc::new(self.config),
            registry: Arc::new(self.registry),
            hooks: Arc::new(self.hooks),
            logger: self
                .logger
                .unwrap_or_else(|| slog::Logger::root(slog::Discard, o!())),
        }
    }
}

/// A finalized server, ready to accept connections.
pub struct Server {
    config: Arc<ServerConfig>,
    registry: Arc<HandlerRegistry>,
    hooks: Arc<Hooks>,
    logger: slog::Logger,
}

impl Server {
    /// Bind the configured listen address and spawn the accept loop as a
    /// background task. Returns immediately with a [`ServerHandle`]; the
    /// server keeps running until [`ServerHandle::stop`] is called.
    pub async fn run(self) -> IcapResult<ServerHandle> {
        let listener = TcpListener::bind(self.config.listen_addr())
            .await
            .map_err(IcapError::Io)?;
        let local_addr = listener.local_addr().map_err(IcapError::Io)?;

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let logger = self.logger.clone();
        info!(logger, "listening"; "addr" => local_addr.to_string());

        let registry = self.registry;
        let hooks = self.hooks;
        let config = self.config;

        // Tracks every spawned per-connection task so `ServerHandle::stop`
        // can abort them, per spec.md §5: shutdown cancels all in-flight
        // connections rather than letting them linger or half-write a
        // response after the listener itself has stopped.
        let connections: Arc<Mutex<Vec<JoinHandle<()>>>> = Arc::new(Mutex::new(Vec::new()));
        let connections_for_loop = connections.clone();

        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => {
                        info!(logger, "shutdown requested");
                        break;
                    }
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer_addr)) => {
                                let registry = registry.clone();
                                let hooks = hooks.clone();
                                let config = config.clone();
                                let conn_logger = logger.new(o!());
                                let conn_join = tokio::spawn(async move {
                                    connection::serve_connection(stream, peer_addr, registry, hooks, config, conn_logger).await;
                                });
                                let mut guard = connections_for_loop.lock().unwrap();
                                guard.retain(|h| !h.is_finished());
                                guard.push(conn_join);
                            }
                            Err(e) => {
                                slog::warn!(logger, "accept failed"; "error" => %e);
                            }
                        }
                    }
                }
            }
        });

        Ok(ServerHandle {
            local_addr,
            shutdown_tx: Some(shutdown_tx),
            join: Some(join),
            connections,
        })
    }
}

/// A handle to a running [`Server`]. Dropping it without calling
/// [`ServerHandle::stop`] leaves the server running — shut it down
/// explicitly, matching spec.md §6's "request shutdown" registration API
/// entry.
pub struct ServerHandle {
    local_addr: std::net::SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
    connections: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl ServerHandle {
    /// The address the server actually bound to (useful when `port: 0` was
    /// requested).
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Stop the server: signal the accept loop to exit, wait for it, then
    /// abort every still-running per-connection task. An in-flight
    /// transaction is dropped without writing a response (spec.md §5
    /// Cancellation) rather than risk a half-written reply confusing the
    /// client's framing. Consumes the handle so there is no way to
    /// reference a stopped server afterwards — unlike the original's
    /// `stop()`, which left its module-level reference reachable after a
    /// typo'd assignment (spec.md §9 Open Questions).
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
        let handles = std::mem::take(&mut *self.connections.lock().unwrap());
        for handle in handles {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpStream;

    use super::*;
    use crate::error::IcapResult;
    use crate::message::IcapRequest;
    use crate::registry::Adaptation;

    struct Stall;

    #[async_trait]
    impl Handler for Stall {
        async fn handle(&self, _request: IcapRequest) -> IcapResult<Adaptation> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Adaptation::Unmodified)
        }
    }

    #[tokio::test]
    async fn stop_cancels_in_flight_connections() {
        let server = ServerBuilder::new()
            .config(ServerConfig { host: "127.0.0.1".to_string(), port: 0, ..ServerConfig::default() })
            .register_handler(Criterion::new(crate::registry::Method::Reqmod, "/slow"), Stall)
            .build();
        let handle = server.run().await.unwrap();
        let addr = handle.local_addr();

        let body = b"";
        let request = format!(
            "REQMOD icap://h/slow ICAP/1.0\r\nHost: h\r\nEncapsulated: req-hdr=0, req-body={}\r\n\r\n",
            body.len()
        );
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\nHost: h\r\n\r\n").await.unwrap();
        stream.write_all(b"0\r\n\r\n").await.unwrap();

        // Give the handler a moment to start stalling, then stop the server.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stopped = tokio::time::timeout(Duration::from_secs(5), handle.stop()).await;
        assert!(stopped.is_ok(), "stop() should not wait out the stalled handler");
    }

    #[tokio::test]
    async fn local_addr_reflects_bound_port() {
        let server = ServerBuilder::new()
            .config(ServerConfig { host: "127.0.0.1".to_string(), port: 0, ..ServerConfig::default() })
            .build();
        let handle = server.run().await.unwrap();
        assert_ne!(handle.local_addr().port(), 0);
        handle.stop().await;
    }
}

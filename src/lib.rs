/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! An RFC 3507 ICAP (Internet Content Adaptation Protocol) engine: the wire
//! codec for ICAP and its encapsulated HTTP messages, the encapsulation
//! state machine (`Encapsulated:` offset accounting, chunked bodies, the
//! `ieof` preview extension), the per-connection pipeline, and the
//! handler-dispatch layer an embedding proxy or gateway uses to plug in
//! content adaptation logic (virus scanning, DLP, ad insertion, URL
//! rewriting).
//!
//! This crate is the protocol engine only. Launching a process around it
//! (argument parsing, daemonization, signal handling, picking a `slog`
//! backend) and writing the adaptation logic itself (what a handler
//! actually does to a request or response) are both external concerns —
//! see [`registry::Handler`] for the extension point and `demos/` for a
//! minimal embedding example.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use icap_engine::config::ServerConfig;
//! use icap_engine::registry::{Adaptation, Criterion, Handler, Method};
//! use icap_engine::message::IcapRequest;
//! use icap_engine::server::ServerBuilder;
//!
//! struct Echo;
//!
//! #[async_trait::async_trait]
//! impl Handler for Echo {
//!     async fn handle(&self, request: IcapRequest) -> icap_engine::error::IcapResult<Adaptation> {
//!         Ok(Adaptation::Modified(request))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = ServerBuilder::new()
//!         .config(ServerConfig::default())
//!         .register_handler(Criterion::new(Method::Reqmod, "/"), Echo)
//!         .build();
//!     let handle = server.run().await?;
//!     // ... serve until told to stop ...
//!     handle.stop().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod hooks;
pub mod message;
pub mod protocol;
pub mod registry;
pub mod response;
pub mod server;
pub mod version;
pub mod wire;

pub use error::{IcapError, IcapResult};
pub use server::{Server, ServerBuilder, ServerHandle};

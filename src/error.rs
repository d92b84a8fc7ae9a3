/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! Error types for the ICAP engine.

use thiserror::Error;

/// Result type used throughout the engine.
pub type IcapResult<T> = Result<T, IcapError>;

/// Errors that can arise while parsing, serializing or serving ICAP
/// transactions.
///
/// Every variant that can occur while a connection is being served maps to
/// a legal ICAP response via [`crate::response::map_error`]; none of these
/// are allowed to propagate out of [`crate::server::Server::run`].
#[derive(Error, Debug)]
pub enum IcapError {
    /// The ICAP preamble, an `Encapsulated:` header, or an embedded HTTP
    /// preamble could not be parsed.
    #[error("malformed request: {0}")]
    Malformed(String),

    /// The request named a method other than REQMOD/RESPMOD/OPTIONS.
    #[error("unknown ICAP method: {0}")]
    UnknownMethod(String),

    /// No registered handler matched the request.
    #[error("no handler for {method} {uri}")]
    NoHandler {
        /// The requested ICAP method.
        method: String,
        /// The requested ICAP URI path.
        uri: String,
    },

    /// A handler returned an error while processing a request.
    #[error("handler failed: {0}")]
    HandlerFailed(String),

    /// A value meant to be used as a header name or value, or as message
    /// body text, was neither `&str` nor raw bytes decodable as UTF-8.
    #[error("type error: {0}")]
    Type(String),

    /// The body's `Content-Type` charset is unknown, so text could not be
    /// decoded or encoded.
    #[error("unsupported charset: {0}")]
    UnsupportedCharset(String),

    /// Underlying socket I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl IcapError {
    /// Build a [`IcapError::Malformed`] from any displayable message.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::Malformed(msg.into())
    }
}

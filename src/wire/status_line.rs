/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! Status-line parsing/serialization, e.g. `ICAP/1.0 200 OK`, with default
//! reason-phrase lookup.

use crate::error::{IcapError, IcapResult};

/// A parsed status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    /// The protocol version token, e.g. `ICAP/1.0` or `HTTP/1.1`.
    pub version: String,
    /// The three-digit status code.
    pub code: u16,
    /// The reason phrase.
    pub reason: String,
}

impl StatusLine {
    /// Construct a status line, filling in the canonical reason phrase
    /// from [`icap_reason`]/[`http_reason`] when `reason` is `None`.
    ///
    /// The lookup table is chosen by whether `version` starts with `ICAP`
    /// or `HTTP`, per spec.md §3.
    pub fn new(version: impl Into<String>, code: u16, reason: Option<String>) -> Self {
        let version = version.into();
        let reason = reason.unwrap_or_else(|| {
            let table_lookup = if version.starts_with("HTTP") {
                http_reason(code)
            } else {
                icap_reason(code)
            };
            table_lookup.unwrap_or("Unknown").to_string()
        });
        Self {
            version,
            code,
            reason,
        }
    }

    /// Parse `version code reason...`.
    pub fn parse(line: &[u8]) -> IcapResult<Self> {
        let line = std::str::from_utf8(line)
            .map_err(|_| IcapError::malformed("status line is not UTF-8"))?
            .trim_end();
        let mut parts = line.splitn(3, ' ');
        let version = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| IcapError::malformed("missing version in status line"))?;
        let code = parts
            .next()
            .ok_or_else(|| IcapError::malformed("missing status code"))?
            .parse::<u16>()
            .map_err(|_| IcapError::malformed("status code is not a number"))?;
        let reason = parts.next().unwrap_or("").to_string();
        Ok(Self {
            version: version.to_string(),
            code,
            reason,
        })
    }

    /// Re-serialize as `version code reason`.
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{} {} {}", self.version, self.code, self.reason).into_bytes()
    }
}

/// Canonical reason phrases for ICAP status codes this engine emits or
/// understands, per spec.md §4.7 and RFC 3507.
pub fn icap_reason(code: u16) -> Option<&'static str> {
    Some(match code {
        100 => "Continue",
        200 => "OK",
        204 => "No Content",
        400 => "Bad request",
        403 => "Forbidden",
        404 => "ICAP Service not found",
        405 => "Method not allowed for service",
        408 => "Request timeout",
        500 => "Server error",
        501 => "Method not implemented",
        502 => "Bad Gateway",
        503 => "Service overloaded",
        505 => "ICAP version not supported by server",
        _ => return None,
    })
}

/// Canonical reason phrases for HTTP status codes used in encapsulated
/// messages.
pub fn http_reason(code: u16) -> Option<&'static str> {
    Some(match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => return None,
    })
}

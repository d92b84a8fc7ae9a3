/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! Wire-level primitives: header multimaps, request/status lines, and the
//! chunked transfer-encoding codec. Everything here is protocol-agnostic —
//! it knows nothing about ICAP's Encapsulated accounting or Preview
//! negotiation, which live in [`crate::protocol`].

pub mod chunked;
pub mod headers;
pub mod request_line;
pub mod status_line;

pub use chunked::ChunkedDecoder;
pub use headers::HeadersDict;
pub use request_line::RequestLine;
pub use status_line::StatusLine;

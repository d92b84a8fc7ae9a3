/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! Parses the HTTP sub-messages embedded in an ICAP request/response, and
//! decodes their chunked-encoded bodies.

use bytes::Bytes;

use crate::error::{IcapError, IcapResult};
use crate::wire::{ChunkedDecoder, HeadersDict, RequestLine, StatusLine};

/// Parse an embedded HTTP request preamble (request line + headers, no
/// trailing blank line) taken from the `req-hdr` byte range.
pub fn parse_request_preamble(buf: &[u8]) -> IcapResult<(RequestLine, HeadersDict)> {
    let (line, rest) = split_first_line(buf)?;
    Ok((RequestLine::parse(line)?, HeadersDict::parse(rest)?))
}

/// Parse an embedded HTTP response preamble (status line + headers, no
/// trailing blank line) taken from the `res-hdr` byte range.
pub fn parse_response_preamble(buf: &[u8]) -> IcapResult<(StatusLine, HeadersDict)> {
    let (line, rest) = split_first_line(buf)?;
    Ok((StatusLine::parse(line)?, HeadersDict::parse(rest)?))
}

fn split_first_line(buf: &[u8]) -> IcapResult<(&[u8], &[u8])> {
    let nl = buf
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| IcapError::malformed("HTTP sub-message has no request/status line"))?;
    let line_end = if nl > 0 && buf[nl - 1] == b'\r' { nl - 1 } else { nl };
    Ok((&buf[..line_end], &buf[nl + 1..]))
}

/// Fully decode a chunked body that is already entirely buffered in
/// memory, e.g. a `req-body`/`res-body` segment that extends to the end
/// of a complete ICAP request.
///
/// Returns the decoded bytes and whether the terminating chunk carried
/// `ieof`. Used both for whole (non-preview) bodies and for fully-read
/// preview windows; streaming reads that need to feed a socket
/// incrementally drive [`ChunkedDecoder`] directly instead.
pub fn decode_chunked_body(buf: &[u8]) -> IcapResult<(Bytes, bool)> {
    let mut decoder = ChunkedDecoder::new();
    let (data, consumed) = decoder.feed(buf)?;
    if !decoder.is_complete() {
        return Err(IcapError::malformed("truncated chunked body"));
    }
    debug_assert!(consumed <= buf.len());
    Ok((Bytes::from(data), decoder.ieof()))
}

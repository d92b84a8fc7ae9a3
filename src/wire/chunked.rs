/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! Chunked transfer-encoding codec for encapsulated HTTP bodies.
//!
//! Every encapsulated HTTP body in an ICAP message MUST use chunked
//! transfer encoding, per RFC 3507 §4.3.3. This module additionally
//! recognizes the `ieof` chunk extension on the terminating zero-length
//! chunk (`0; ieof\r\n\r\n`), which a Preview exchange uses to signal that
//! the previewed bytes are the entire body rather than just the preview
//! window, per spec.md §4.3/§8.

use crate::error::{IcapError, IcapResult};

/// Incremental chunked-encoding decoder.
///
/// Feed it bytes as they arrive off the wire; it accumulates decoded body
/// bytes across calls and reports how many input bytes it consumed, so the
/// caller can keep any leftover (partial next-chunk) bytes for the next
/// read.
#[derive(Debug, Clone)]
pub struct ChunkedDecoder {
    state: State,
    chunk_remaining: usize,
    ieof: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Size,
    Data,
    DataCrlf,
    TrailerOrDone,
    Done,
}

impl ChunkedDecoder {
    /// Create a decoder positioned at the start of a chunked stream.
    pub fn new() -> Self {
        Self {
            state: State::Size,
            chunk_remaining: 0,
            ieof: false,
        }
    }

    /// `true` once the terminating chunk and any trailers have been
    /// consumed.
    pub fn is_complete(&self) -> bool {
        self.state == State::Done
    }

    /// `true` if the terminating chunk carried the `ieof` extension.
    ///
    /// Only meaningful once [`ChunkedDecoder::is_complete`] is `true`.
    pub fn ieof(&self) -> bool {
        self.ieof
    }

    /// Decode as much of `input` as forms complete chunks.
    ///
    /// Returns the decoded body bytes and the number of bytes of `input`
    /// consumed. Call again with the next read's bytes (prefixed by
    /// whatever was left unconsumed) until [`ChunkedDecoder::is_complete`].
    pub fn feed(&mut self, input: &[u8]) -> IcapResult<(Vec<u8>, usize)> {
        let mut out = Vec::new();
        let mut pos = 0;

        loop {
            match self.state {
                State::Size => {
                    let Some(nl) = find_byte(&input[pos..], b'\n') else {
                        break;
                    };
                    let line = strip_cr(&input[pos..pos + nl]);
                    let line = std::str::from_utf8(line)
                        .map_err(|_| IcapError::malformed("chunk size line is not UTF-8"))?;
                    let size_token = line.split(';').next().unwrap_or("").trim();
                    let size = usize::from_str_radix(size_token, 16)
                        .map_err(|_| IcapError::malformed("invalid chunk size"))?;
                    self.ieof = line.contains("ieof");
                    pos += nl + 1;
                    if size == 0 {
                        self.state = State::TrailerOrDone;
                    } else {
                        self.chunk_remaining = size;
                        self.state = State::Data;
                    }
                }
                State::Data => {
                    let available = input.len() - pos;
                    if available == 0 {
                        break;
                    }
                    let take = available.min(self.chunk_remaining);
                    out.extend_from_slice(&input[pos..pos + take]);
                    pos += take;
                    self.chunk_remaining -= take;
                    if self.chunk_remaining == 0 {
                        self.state = State::DataCrlf;
                    } else {
                        break;
                    }
                }
                State::DataCrlf => {
                    if input.len() - pos < 2 {
                        break;
                    }
                    if &input[pos..pos + 2] != b"\r\n" {
                        return Err(IcapError::malformed("missing CRLF after chunk data"));
                    }
                    pos += 2;
                    self.state = State::Size;
                }
                State::TrailerOrDone => {
                    // No trailers are expected in practice; a bare CRLF
                    // ends the stream. Tolerate (and discard) trailer
                    // lines up to the terminating blank line.
                    let Some(nl) = find_byte(&input[pos..], b'\n') else {
                        break;
                    };
                    let line = strip_cr(&input[pos..pos + nl]);
                    pos += nl + 1;
                    if line.is_empty() {
                        self.state = State::Done;
                        break;
                    }
                }
                State::Done => break,
            }
        }

        Ok((out, pos))
    }
}

impl Default for ChunkedDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn find_byte(data: &[u8], needle: u8) -> Option<usize> {
    data.iter().position(|&b| b == needle)
}

fn strip_cr(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

/// Encode `data` as a single chunk: `<hex-size>\r\n<data>\r\n`. Emits
/// nothing for an empty slice, since a zero-size chunk is the stream
/// terminator, not an ordinary data chunk.
pub fn encode_chunk(data: &[u8]) -> Vec<u8> {
    if data.is_empty() {
        return Vec::new();
    }
    let mut out = format!("{:x}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

/// Encode the terminating zero-length chunk, optionally carrying the
/// `ieof` extension.
pub fn encode_terminator(ieof: bool) -> Vec<u8> {
    if ieof {
        b"0; ieof\r\n\r\n".to_vec()
    } else {
        b"0\r\n\r\n".to_vec()
    }
}

/// Encode a complete body as chunked data followed by the terminator.
pub fn encode_chunked(data: &[u8], ieof: bool) -> Vec<u8> {
    let mut out = encode_chunk(data);
    out.extend_from_slice(&encode_terminator(ieof));
    out
}

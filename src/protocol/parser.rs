/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! Parses the ICAP preamble: the request line, headers, and (for
//! REQMOD/RESPMOD/OPTIONS-with-body) the mandatory `Encapsulated:` header.

use crate::error::{IcapError, IcapResult};
use crate::protocol::encapsulated::Encapsulated;
use crate::wire::{HeadersDict, RequestLine, StatusLine};

/// The result of parsing an ICAP request preamble: everything up to, but
/// not including, the terminating blank line.
#[derive(Debug, Clone)]
pub struct IcapPreamble {
    pub request_line: RequestLine,
    pub headers: HeadersDict,
    pub encapsulated: Option<Encapsulated>,
}

/// ICAP protocol versions this engine understands, per RFC 3507 §4.3.1.
/// Anything else is rejected with a `400 Bad request` rather than dispatched
/// (spec.md §7's "unknown ICAP version" error case).
const SUPPORTED_ICAP_VERSIONS: [&str; 2] = ["ICAP/1.0", "ICAP/1.1"];

fn check_icap_version(version: &str) -> IcapResult<()> {
    if SUPPORTED_ICAP_VERSIONS.contains(&version) {
        Ok(())
    } else {
        Err(IcapError::malformed(format!("unsupported ICAP version: {version}")))
    }
}

impl IcapPreamble {
    /// Parse a complete preamble (request line + headers), with no
    /// trailing blank line included.
    pub fn parse(buf: &[u8]) -> IcapResult<Self> {
        let (line, rest) = split_first_line(buf)?;
        let request_line = RequestLine::parse(line)?;
        check_icap_version(&request_line.version)?;
        let headers = HeadersDict::parse(rest)?;
        let encapsulated = match headers.get("encapsulated") {
            Some(value) => Some(Encapsulated::parse(value)?),
            None => None,
        };
        Ok(Self {
            request_line,
            headers,
            encapsulated,
        })
    }
}

/// The result of parsing an ICAP response preamble. Only used when this
/// engine acts as a client of itself, e.g. round-trip tests; production
/// responses are built directly by [`crate::response`].
#[derive(Debug, Clone)]
pub struct IcapResponsePreamble {
    pub status_line: StatusLine,
    pub headers: HeadersDict,
    pub encapsulated: Option<Encapsulated>,
}

impl IcapResponsePreamble {
    pub fn parse(buf: &[u8]) -> IcapResult<Self> {
        let (line, rest) = split_first_line(buf)?;
        let status_line = StatusLine::parse(line)?;
        let headers = HeadersDict::parse(rest)?;
        let encapsulated = match headers.get("encapsulated") {
            Some(value) => Some(Encapsulated::parse(value)?),
            None => None,
        };
        Ok(Self {
            status_line,
            headers,
            encapsulated,
        })
    }
}

fn split_first_line(buf: &[u8]) -> IcapResult<(&[u8], &[u8])> {
    let nl = buf
        .iter()
        .position(|&b| b == b'\n')
        .ok_or_else(|| IcapError::malformed("preamble has no request/status line"))?;
    let line_end = if nl > 0 && buf[nl - 1] == b'\r' { nl - 1 } else { nl };
    Ok((&buf[..line_end], &buf[nl + 1..]))
}

/// Find the end of an ICAP preamble: the first blank line (`\r\n\r\n` or
/// `\n\n`), returning the byte offset just past it. `None` means more data
/// is needed before the preamble can be parsed.
pub fn find_preamble_end(buf: &[u8]) -> Option<usize> {
    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
        return Some(pos + 4);
    }
    buf.windows(2).position(|w| w == b"\n\n").map(|pos| pos + 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::encapsulated::EncapsulatedPart;

    #[test]
    fn parses_reqmod_preamble() {
        let buf = b"REQMOD icap://example.com/modify ICAP/1.0\r\n\
Host: example.com\r\n\
Encapsulated: req-hdr=0, req-body=50\r\n";
        let preamble = IcapPreamble::parse(buf).unwrap();
        assert_eq!(preamble.request_line.method, "REQMOD");
        assert_eq!(preamble.headers.get("host"), Some("example.com"));
        let enc = preamble.encapsulated.unwrap();
        assert_eq!(enc.offset_of(EncapsulatedPart::ReqHdr), Some(0));
        assert_eq!(enc.offset_of(EncapsulatedPart::ReqBody), Some(50));
    }

    #[test]
    fn options_preamble_may_omit_encapsulated() {
        let buf = b"OPTIONS icap://example.com/modify ICAP/1.0\r\nHost: example.com\r\n";
        let preamble = IcapPreamble::parse(buf).unwrap();
        assert!(preamble.encapsulated.is_none());
    }

    #[test]
    fn finds_preamble_end_on_blank_line() {
        let buf = b"REQMOD icap://x/y ICAP/1.0\r\nHost: x\r\n\r\nbody-bytes-follow";
        let end = find_preamble_end(buf).unwrap();
        assert_eq!(&buf[end..], b"body-bytes-follow");
    }

    #[test]
    fn incomplete_preamble_returns_none() {
        let buf = b"REQMOD icap://x/y ICAP/1.0\r\nHost: x\r\n";
        assert!(find_preamble_end(buf).is_none());
    }

    #[test]
    fn rejects_unknown_icap_version() {
        let buf = b"REQMOD icap://x/y ICAP/9.9\r\nHost: x\r\n";
        let err = IcapPreamble::parse(buf).unwrap_err();
        assert!(matches!(err, IcapError::Malformed(_)));
    }

    #[test]
    fn accepts_icap_1_1() {
        let buf = b"OPTIONS icap://x/y ICAP/1.1\r\nHost: x\r\n";
        assert!(IcapPreamble::parse(buf).is_ok());
    }
}

/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! The mandatory `Encapsulated:` header: an ordered offset table describing
//! where each HTTP sub-part starts within the bytes that follow the ICAP
//! preamble's terminating blank line.

use crate::error::{IcapError, IcapResult};

/// One of the six tokens the `Encapsulated:` header can carry, per RFC
/// 3507 §4.4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncapsulatedPart {
    ReqHdr,
    ReqBody,
    ResHdr,
    ResBody,
    NullBody,
    OptBody,
}

impl EncapsulatedPart {
    fn token(self) -> &'static str {
        match self {
            Self::ReqHdr => "req-hdr",
            Self::ReqBody => "req-body",
            Self::ResHdr => "res-hdr",
            Self::ResBody => "res-body",
            Self::NullBody => "null-body",
            Self::OptBody => "opt-body",
        }
    }

    fn parse(token: &str) -> IcapResult<Self> {
        Ok(match token {
            "req-hdr" => Self::ReqHdr,
            "req-body" => Self::ReqBody,
            "res-hdr" => Self::ResHdr,
            "res-body" => Self::ResBody,
            "null-body" => Self::NullBody,
            "opt-body" => Self::OptBody,
            other => {
                return Err(IcapError::malformed(format!(
                    "unknown Encapsulated token: {other}"
                )))
            }
        })
    }

    /// `true` for the three tokens that may legally terminate the list.
    fn is_terminal(self) -> bool {
        matches!(self, Self::ReqBody | Self::ResBody | Self::NullBody | Self::OptBody)
    }
}

/// The parsed `Encapsulated:` header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encapsulated {
    entries: Vec<(EncapsulatedPart, usize)>,
}

impl Encapsulated {
    /// Parse `"req-hdr=0, req-body=412"` style header values.
    ///
    /// Validates that offsets are non-decreasing and that the list ends in
    /// one of the body-ish tokens, per RFC 3507 §4.4.1 — a preamble-only
    /// token (`req-hdr`/`res-hdr`) can never be the last entry, since every
    /// encapsulated message needs a terminator telling the reader where
    /// the encapsulated section ends.
    pub fn parse(value: &str) -> IcapResult<Self> {
        let mut entries = Vec::new();
        for part in value.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (token, offset) = part
                .split_once('=')
                .ok_or_else(|| IcapError::malformed("malformed Encapsulated entry"))?;
            let part = EncapsulatedPart::parse(token.trim())?;
            let offset: usize = offset
                .trim()
                .parse()
                .map_err(|_| IcapError::malformed("non-numeric Encapsulated offset"))?;
            entries.push((part, offset));
        }
        if entries.is_empty() {
            return Err(IcapError::malformed("empty Encapsulated header"));
        }
        for window in entries.windows(2) {
            if window[1].1 < window[0].1 {
                return Err(IcapError::malformed("Encapsulated offsets must be non-decreasing"));
            }
        }
        if !entries.last().unwrap().0.is_terminal() {
            return Err(IcapError::malformed(
                "Encapsulated header must end in a body (or null-body/opt-body) entry",
            ));
        }
        Ok(Self { entries })
    }

    /// Build from an explicit, already-ordered entry list — used when
    /// constructing outgoing responses rather than parsing incoming ones.
    pub fn from_entries(entries: Vec<(EncapsulatedPart, usize)>) -> Self {
        Self { entries }
    }

    /// The byte offset named for `part`, if present.
    pub fn offset_of(&self, part: EncapsulatedPart) -> Option<usize> {
        self.entries
            .iter()
            .find(|(p, _)| *p == part)
            .map(|(_, o)| *o)
    }

    /// `true` if `part` is named anywhere in the header.
    pub fn contains(&self, part: EncapsulatedPart) -> bool {
        self.entries.iter().any(|(p, _)| *p == part)
    }

    /// The byte range `[start, end)` within the encapsulated section that
    /// belongs to `part`, where `end` is the next entry's offset or
    /// `total_len` if `part` is last.
    pub fn range_of(&self, part: EncapsulatedPart, total_len: usize) -> Option<(usize, usize)> {
        let idx = self.entries.iter().position(|(p, _)| *p == part)?;
        let start = self.entries[idx].1;
        let end = self
            .entries
            .get(idx + 1)
            .map(|(_, o)| *o)
            .unwrap_or(total_len);
        Some((start, end))
    }

    /// The offset of the terminal (body-type) entry: where the last header
    /// block ends and the body section (if any) begins. `parse` guarantees
    /// the last entry is always one of `req-body`/`res-body`/`null-body`/
    /// `opt-body`, so there is exactly one such offset per message.
    pub fn terminal_offset(&self) -> usize {
        self.entries.last().map(|(_, o)| *o).unwrap_or(0)
    }

    /// Which body-type token terminates the list.
    pub fn terminal_part(&self) -> Option<EncapsulatedPart> {
        self.entries.last().map(|(p, _)| p).copied()
    }

    /// Serialize back to `Encapsulated:` header value form.
    pub fn to_header_value(&self) -> String {
        self.entries
            .iter()
            .map(|(part, offset)| format!("{}={}", part.token(), offset))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reqmod_style_header() {
        let enc = Encapsulated::parse("req-hdr=0, req-body=412").unwrap();
        assert_eq!(enc.offset_of(EncapsulatedPart::ReqHdr), Some(0));
        assert_eq!(enc.offset_of(EncapsulatedPart::ReqBody), Some(412));
    }

    #[test]
    fn rejects_decreasing_offsets() {
        assert!(Encapsulated::parse("req-hdr=100, req-body=0").is_err());
    }

    #[test]
    fn rejects_header_only_terminator() {
        assert!(Encapsulated::parse("req-hdr=0, res-hdr=10").is_err());
    }

    #[test]
    fn range_of_uses_next_entry_as_end() {
        let enc = Encapsulated::parse("req-hdr=0, req-body=100").unwrap();
        assert_eq!(enc.range_of(EncapsulatedPart::ReqHdr, 500), Some((0, 100)));
        assert_eq!(enc.range_of(EncapsulatedPart::ReqBody, 500), Some((100, 500)));
    }

    #[test]
    fn roundtrips_to_header_value() {
        let enc = Encapsulated::parse("req-hdr=0, null-body=55").unwrap();
        assert_eq!(enc.to_header_value(), "req-hdr=0, null-body=55");
    }

    #[test]
    fn terminal_offset_and_part_identify_body_start() {
        let enc = Encapsulated::parse("req-hdr=0, req-body=100").unwrap();
        assert_eq!(enc.terminal_offset(), 100);
        assert_eq!(enc.terminal_part(), Some(EncapsulatedPart::ReqBody));
    }

    #[test]
    fn accepts_opt_body_terminator() {
        let enc = Encapsulated::parse("opt-body=0").unwrap();
        assert!(enc.contains(EncapsulatedPart::OptBody));
    }
}

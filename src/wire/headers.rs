/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! Ordered, case-insensitive, multi-valued header collection shared by ICAP
//! and HTTP messages.

use indexmap::IndexMap;

use crate::error::{IcapError, IcapResult};

/// A multi-value, case-aware collection of header fields.
///
/// Field names are compared case-insensitively but the case of the first
/// pair stored under a given name is what gets serialized. Insertion order
/// is preserved: a name's position in the collection is fixed the first
/// time it is seen, and later [`HeadersDict::append`] calls for the same
/// name only grow the list of values stored at that position, mirroring an
/// `OrderedDict` of `name -> [(case, value), ...]`.
#[derive(Debug, Clone, Default)]
pub struct HeadersDict {
    entries: IndexMap<String, Vec<(String, String)>>,
}

impl HeadersDict {
    /// Create an empty header collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `value` under `name`, preserving any prior values stored
    /// under the same (case-insensitively compared) name.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        let lname = name.to_ascii_lowercase();
        self.entries
            .entry(lname)
            .or_default()
            .push((name.to_string(), value.into()));
    }

    /// Append a value given as raw bytes, decoding as UTF-8.
    ///
    /// Returns [`IcapError::Type`] if the bytes are not valid UTF-8 — byte
    /// input off the wire that isn't text has no business in a header.
    pub fn append_bytes(&mut self, name: &str, value: &[u8]) -> IcapResult<()> {
        let value = std::str::from_utf8(value)
            .map_err(|e| IcapError::Type(format!("header value is not UTF-8: {e}")))?;
        self.append(name, value);
        Ok(())
    }

    /// Return the first value stored under `name`, case-insensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .and_then(|pairs| pairs.first())
            .map(|(_, v)| v.as_str())
    }

    /// Return every value stored under `name`, in insertion order.
    pub fn get_list(&self, name: &str) -> Vec<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(|pairs| pairs.iter().map(|(_, v)| v.as_str()).collect())
            .unwrap_or_default()
    }

    /// Return `true` if any value is stored under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    /// Replace every value stored under `name` with a single `value`,
    /// keeping the name's original position in iteration order.
    pub fn replace(&mut self, name: &str, value: impl Into<String>) {
        let lname = name.to_ascii_lowercase();
        self.entries
            .insert(lname, vec![(name.to_string(), value.into())]);
    }

    /// Remove every value stored under `name`, returning the first one (if
    /// any) that was present, matching the prescribed `pop` semantics from
    /// spec.md §9 (the original source's `pop` lost multi-value pairs; this
    /// removes the whole entry and returns only the first value).
    pub fn pop(&mut self, name: &str) -> Option<String> {
        self.entries
            .shift_remove(&name.to_ascii_lowercase())
            .and_then(|pairs| pairs.into_iter().next())
            .map(|(_, v)| v)
    }

    /// Remove every value stored under `name`.
    pub fn delete(&mut self, name: &str) {
        self.entries.shift_remove(&name.to_ascii_lowercase());
    }

    /// Iterate over every `(original-case name, value)` pair in insertion
    /// order, with same-named pairs grouped together.
    pub fn iter_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .values()
            .flat_map(|pairs| pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
    }

    /// Number of distinct (case-insensitive) names stored.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if no headers are stored at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize as `Name: Value\r\n` lines, one per stored pair, in
    /// insertion order, with a trailing `\r\n`. An empty collection
    /// serializes to the empty byte string — the caller supplies the
    /// preamble-terminating blank line.
    pub fn to_bytes(&self) -> Vec<u8> {
        if self.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::new();
        for (name, value) in self.iter_pairs() {
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b": ");
            out.extend_from_slice(value.as_bytes());
            out.extend_from_slice(b"\r\n");
        }
        out
    }

    /// Parse a header block (everything between the request/status line
    /// and the blank line terminating a preamble; no trailing blank line).
    pub fn parse(block: &[u8]) -> IcapResult<Self> {
        let mut dict = Self::new();
        for line in split_lines(block) {
            if line.is_empty() {
                continue;
            }
            let colon = line
                .iter()
                .position(|&b| b == b':')
                .ok_or_else(|| IcapError::malformed("header line missing ':'"))?;
            let name = std::str::from_utf8(&line[..colon])
                .map_err(|_| IcapError::malformed("header name is not UTF-8"))?
                .trim();
            if name.is_empty() {
                return Err(IcapError::malformed("empty header name"));
            }
            let value = std::str::from_utf8(&line[colon + 1..])
                .map_err(|_| IcapError::malformed("header value is not UTF-8"))?
                .trim();
            dict.append(name, value);
        }
        Ok(dict)
    }
}

impl PartialEq for HeadersDict {
    fn eq(&self, other: &Self) -> bool {
        self.entries.keys().eq(other.entries.keys())
            && self.entries.iter().all(|(k, v)| other.entries.get(k) == Some(v))
    }
}

impl Eq for HeadersDict {}

impl FromIterator<(String, String)> for HeadersDict {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut dict = Self::new();
        for (k, v) in iter {
            dict.append(&k, v);
        }
        dict
    }
}

/// Split a header block on CRLF or bare LF, dropping a trailing empty
/// segment produced by a terminal newline.
fn split_lines(block: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < block.len() {
        if block[i] == b'\n' {
            let mut end = i;
            if end > start && block[end - 1] == b'\r' {
                end -= 1;
            }
            lines.push(&block[start..end]);
            start = i + 1;
        }
        i += 1;
    }
    if start < block.len() {
        lines.push(&block[start..]);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_lookup() {
        let mut h = HeadersDict::new();
        h.append("Content-Type", "text/html");
        assert_eq!(h.get("content-type"), Some("text/html"));
        assert_eq!(h.get("CONTENT-TYPE"), Some("text/html"));
    }

    #[test]
    fn getlist_appends_in_order() {
        let mut h = HeadersDict::new();
        h.append("X-Tag", "v1");
        h.append("X-Tag", "v2");
        assert_eq!(h.get_list("x-tag"), vec!["v1", "v2"]);
        assert_eq!(h.get("x-tag"), Some("v1"));
    }

    #[test]
    fn replace_keeps_position_and_drops_old_values() {
        let mut h = HeadersDict::new();
        h.append("A", "1");
        h.append("B", "2");
        h.append("A", "3");
        h.replace("a", "final");
        assert_eq!(
            h.iter_pairs().collect::<Vec<_>>(),
            vec![("a", "final"), ("B", "2")]
        );
    }

    #[test]
    fn pop_removes_all_values_returns_first() {
        let mut h = HeadersDict::new();
        h.append("A", "1");
        h.append("A", "2");
        assert_eq!(h.pop("a"), Some("1".to_string()));
        assert!(!h.contains("a"));
    }

    #[test]
    fn roundtrip_preserves_order_and_case() {
        let mut h = HeadersDict::new();
        h.append("Host", "example.com");
        h.append("X-Custom", "1");
        h.append("Host", "other.com");
        let bytes = h.to_bytes();
        let parsed = HeadersDict::parse(&bytes).unwrap();
        assert_eq!(
            parsed.iter_pairs().collect::<Vec<_>>(),
            h.iter_pairs().collect::<Vec<_>>()
        );
        assert_eq!(parsed, h);
    }

    #[test]
    fn empty_serializes_to_empty() {
        let h = HeadersDict::new();
        assert!(h.to_bytes().is_empty());
    }
}

/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! Request-line parsing/serialization, e.g. `REQMOD icap://h/p ICAP/1.0` or
//! `GET /index.html HTTP/1.1`, with a mutable, re-serializable query
//! multimap.

use indexmap::IndexMap;

use crate::error::{IcapError, IcapResult};

/// A parsed request line.
///
/// The URI is split into an opaque `scheme://authority/path` prefix and a
/// query multimap; mutating [`RequestLine::query`] in place and
/// re-serializing reflects the change, matching the "mutable in place"
/// behavior spec.md §3 asks of the query attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    /// The request method, e.g. `REQMOD` or `GET`. Uppercase is not
    /// enforced here; callers compare case-sensitively per RFC.
    pub method: String,
    /// Everything in the URI up to (not including) `?` or `#`.
    base: String,
    /// The query multimap: repeated keys keep every value, in the order
    /// they appeared.
    pub query: IndexMap<String, Vec<String>>,
    fragment: Option<String>,
    /// The protocol version token, e.g. `ICAP/1.0` or `HTTP/1.1`.
    pub version: String,
}

impl RequestLine {
    /// Parse `method uri version`, already split on whitespace by the
    /// caller.
    pub fn new(method: impl Into<String>, uri: &str, version: impl Into<String>) -> Self {
        let (base_and_query, fragment) = match uri.split_once('#') {
            Some((b, f)) => (b, Some(f.to_string())),
            None => (uri, None),
        };
        let (base, query_str) = match base_and_query.split_once('?') {
            Some((b, q)) => (b, Some(q)),
            None => (base_and_query, None),
        };
        let query = query_str.map(parse_query).unwrap_or_default();
        Self {
            method: method.into(),
            base: base.to_string(),
            query,
            fragment,
            version: version.into(),
        }
    }

    /// Parse a full request-line, e.g. `b"REQMOD icap://h/p ICAP/1.0"`.
    pub fn parse(line: &[u8]) -> IcapResult<Self> {
        let line = std::str::from_utf8(line)
            .map_err(|_| IcapError::malformed("request line is not UTF-8"))?
            .trim_end();
        let mut parts = line.splitn(3, ' ');
        let method = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| IcapError::malformed("missing method in request line"))?;
        let uri = parts
            .next()
            .ok_or_else(|| IcapError::malformed("missing URI in request line"))?;
        let version = parts
            .next()
            .ok_or_else(|| IcapError::malformed("missing version in request line"))?;
        Ok(Self::new(method, uri, version))
    }

    /// The URI path, with any `scheme://authority` prefix stripped.
    pub fn path(&self) -> &str {
        match self.base.find("://") {
            Some(idx) => {
                let after_scheme = &self.base[idx + 3..];
                match after_scheme.find('/') {
                    Some(slash) => &after_scheme[slash..],
                    None => "/",
                }
            }
            None => &self.base,
        }
    }

    /// The `scheme://authority` portion, if the URI is absolute.
    pub fn authority(&self) -> Option<&str> {
        let idx = self.base.find("://")?;
        let after_scheme = &self.base[idx + 3..];
        let end = after_scheme.find('/').unwrap_or(after_scheme.len());
        Some(&after_scheme[..end])
    }

    /// Re-serialize as `method uri version`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut uri = self.base.clone();
        if !self.query.is_empty() {
            uri.push('?');
            uri.push_str(&serialize_query(&self.query));
        }
        if let Some(fragment) = &self.fragment {
            uri.push('#');
            uri.push_str(fragment);
        }
        format!("{} {} {}", self.method, uri, self.version).into_bytes()
    }
}

impl Default for RequestLine {
    fn default() -> Self {
        Self::new("GET", "/", "HTTP/1.1")
    }
}

fn parse_query(query: &str) -> IndexMap<String, Vec<String>> {
    let mut map: IndexMap<String, Vec<String>> = IndexMap::new();
    for (k, v) in url::form_urlencoded::parse(query.as_bytes()) {
        map.entry(k.into_owned()).or_default().push(v.into_owned());
    }
    map
}

fn serialize_query(query: &IndexMap<String, Vec<String>>) -> String {
    let mut ser = url::form_urlencoded::Serializer::new(String::new());
    for (key, values) in query {
        for value in values {
            ser.append_pair(key, value);
        }
    }
    ser.finish()
}

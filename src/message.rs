/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! HTTP and ICAP message types: headers plus body, with charset-aware text
//! access and cookie helpers.

use std::str::FromStr;

use bytes::Bytes;

use crate::error::{IcapError, IcapResult};
use crate::wire::{HeadersDict, RequestLine, StatusLine};

/// Charsets this engine can decode/encode body text in, without pulling in
/// a general charset-detection dependency. Anything else surfaces as
/// [`IcapError::UnsupportedCharset`] — callers that need other charsets
/// work with [`HttpMessage::body`] bytes directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Charset {
    Utf8,
    UsAscii,
    Latin1,
}

impl Charset {
    fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(Self::Utf8),
            "us-ascii" | "ascii" => Some(Self::UsAscii),
            "iso-8859-1" | "latin1" | "latin-1" => Some(Self::Latin1),
            _ => None,
        }
    }

    fn decode(self, bytes: &[u8]) -> IcapResult<String> {
        match self {
            Self::Utf8 => std::str::from_utf8(bytes)
                .map(str::to_string)
                .map_err(|e| IcapError::Type(format!("invalid utf-8 body: {e}"))),
            Self::UsAscii => {
                if bytes.iter().all(u8::is_ascii) {
                    Ok(bytes.iter().map(|&b| b as char).collect())
                } else {
                    Err(IcapError::Type("body is not valid us-ascii".to_string()))
                }
            }
            Self::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }

    fn encode(self, text: &str) -> IcapResult<Vec<u8>> {
        match self {
            Self::Utf8 => Ok(text.as_bytes().to_vec()),
            Self::UsAscii => {
                if text.is_ascii() {
                    Ok(text.as_bytes().to_vec())
                } else {
                    Err(IcapError::Type("text is not valid us-ascii".to_string()))
                }
            }
            Self::Latin1 => text
                .chars()
                .map(|c| u8::try_from(c as u32).map_err(|_| {
                    IcapError::Type(format!("character {c:?} is not representable in latin-1"))
                }))
                .collect(),
        }
    }
}

/// Parse `Content-Type: <type>; charset=<charset>` and return the media
/// type and, if present, a recognized [`Charset`].
fn content_type_and_charset(headers: &HeadersDict) -> (String, Option<Charset>) {
    let raw = headers
        .get("content-type")
        .unwrap_or("text/plain; charset=us-ascii");
    match mime::Mime::from_str(raw) {
        Ok(mime) => {
            let charset = mime
                .get_param(mime::CHARSET)
                .and_then(|c| Charset::parse(c.as_str()));
            (format!("{}/{}", mime.type_(), mime.subtype()), charset)
        }
        Err(_) => (raw.to_string(), None),
    }
}

/// A single `name=value` cookie pair, parsed from a `Cookie:` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
}

/// Parse a `Cookie:` header value (`a=1; b=2`) into individual pairs.
///
/// Deliberately hand-rolled rather than pulling in a cookie-jar crate: the
/// engine only ever needs to read/write simple `name=value` pairs, not
/// attributes, expiry or signing.
pub fn parse_cookie_header(value: &str) -> Vec<Cookie> {
    value
        .split(';')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            let (name, value) = part.split_once('=')?;
            Some(Cookie {
                name: name.trim().to_string(),
                value: value.trim().to_string(),
            })
        })
        .collect()
}

/// Serialize a single outbound cookie as a `Set-Cookie:` header value.
pub fn set_cookie_header(name: &str, value: &str, path: Option<&str>, domain: Option<&str>) -> String {
    let mut out = format!("{name}={value}");
    if let Some(path) = path {
        out.push_str(&format!("; Path={path}"));
    }
    if let Some(domain) = domain {
        out.push_str(&format!("; Domain={domain}"));
    }
    out
}

/// Serialize a `Set-Cookie:` header that expires `name` immediately.
pub fn expire_cookie_header(name: &str) -> String {
    format!("{name}=; Expires=Thu, 01 Jan 1970 00:00:00 GMT")
}

/// A parsed HTTP request, as embedded in a REQMOD (or the req-hdr portion
/// of a RESPMOD) ICAP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub request_line: RequestLine,
    pub headers: HeadersDict,
    pub body: Bytes,
}

/// A parsed HTTP response, as embedded in a RESPMOD ICAP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status_line: StatusLine,
    pub headers: HeadersDict,
    pub body: Bytes,
}

/// Either half of an HTTP exchange embedded in an ICAP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpMessage {
    Request(HttpRequest),
    Response(HttpResponse),
}

impl HttpMessage {
    pub fn headers(&self) -> &HeadersDict {
        match self {
            Self::Request(r) => &r.headers,
            Self::Response(r) => &r.headers,
        }
    }

    pub fn headers_mut(&mut self) -> &mut HeadersDict {
        match self {
            Self::Request(r) => &mut r.headers,
            Self::Response(r) => &mut r.headers,
        }
    }

    pub fn body(&self) -> &Bytes {
        match self {
            Self::Request(r) => &r.body,
            Self::Response(r) => &r.body,
        }
    }

    pub fn set_body(&mut self, body: Bytes) {
        match self {
            Self::Request(r) => r.body = body,
            Self::Response(r) => r.body = body,
        }
    }

    pub fn is_request(&self) -> bool {
        matches!(self, Self::Request(_))
    }

    pub fn is_response(&self) -> bool {
        matches!(self, Self::Response(_))
    }

    /// The media type and recognized charset declared by `Content-Type`,
    /// defaulting to `text/plain; charset=us-ascii` per RFC 1341 when the
    /// header is absent.
    pub fn content_type(&self) -> (String, Option<&'static str>) {
        let (ct, charset) = content_type_and_charset(self.headers());
        let charset_name = charset.map(|c| match c {
            Charset::Utf8 => "utf-8",
            Charset::UsAscii => "us-ascii",
            Charset::Latin1 => "iso-8859-1",
        });
        (ct, charset_name)
    }

    /// Decode the body as text using the charset declared in
    /// `Content-Type`. Returns [`IcapError::UnsupportedCharset`] if the
    /// declared charset isn't one of utf-8/us-ascii/iso-8859-1, and
    /// [`IcapError::Type`] if the bytes don't actually decode under it.
    pub fn body_text(&self) -> IcapResult<String> {
        let (_, charset) = content_type_and_charset(self.headers());
        let charset = charset.ok_or_else(|| {
            let (raw, _) = content_type_and_charset(self.headers());
            IcapError::UnsupportedCharset(raw)
        })?;
        charset.decode(self.body())
    }

    /// Encode `text` using the charset declared in `Content-Type` and set
    /// it as the body. Mirrors the original's restriction to
    /// text-ish/application/message media types: setting text on e.g. an
    /// `image/*` body is almost always a bug, so it's rejected with
    /// [`IcapError::Type`].
    pub fn set_body_text(&mut self, text: &str) -> IcapResult<()> {
        let (content_type, charset) = content_type_and_charset(self.headers());
        let charset = charset.ok_or_else(|| IcapError::UnsupportedCharset(content_type.clone()))?;
        if !(content_type.starts_with("text")
            || content_type.starts_with("application")
            || content_type.starts_with("message"))
        {
            return Err(IcapError::Type(format!(
                "refusing to set text body on a {content_type} message"
            )));
        }
        let encoded = charset.encode(text)?;
        self.set_body(Bytes::from(encoded));
        Ok(())
    }

    /// Parse the `Cookie:` header (requests) into individual pairs.
    pub fn cookies(&self) -> Vec<Cookie> {
        self.headers()
            .get("cookie")
            .map(parse_cookie_header)
            .unwrap_or_default()
    }
}

/// A parsed ICAP request: the ICAP-layer request line and headers, plus
/// whichever HTTP sub-message(s) the method encapsulates.
///
/// REQMOD carries a request; RESPMOD carries a response and, if `req-hdr`
/// was present, the originating request too; OPTIONS carries neither.
#[derive(Debug, Clone)]
pub struct IcapRequest {
    pub request_line: RequestLine,
    pub headers: HeadersDict,
    /// The request being modified (REQMOD) or the originating request that
    /// produced the response being modified (RESPMOD, if `req-hdr` was
    /// sent).
    pub http_request: Option<HttpRequest>,
    /// The response being modified (RESPMOD only).
    pub http_response: Option<HttpResponse>,
    /// `true` once the encapsulated body has been read in full: either it
    /// was never previewed, the preview's terminator carried `ieof`, or the
    /// connection pipeline has since fetched the remainder. A handler
    /// consulting this mid-preview sees `false` and may ask for the rest
    /// via [`crate::registry::Handler::wants_more_after_preview`].
    pub body_complete: bool,
}

impl IcapRequest {
    /// Construct the default "UNKNOWN / ICAP/1.0" placeholder request.
    pub fn new(request_line: RequestLine, headers: HeadersDict) -> Self {
        Self {
            request_line,
            headers,
            http_request: None,
            http_response: None,
            body_complete: true,
        }
    }

    /// `true` if the encapsulated body (if any) has been read in full.
    pub fn has_body_complete(&self) -> bool {
        self.body_complete
    }

    pub fn is_reqmod(&self) -> bool {
        self.request_line.method == "REQMOD"
    }

    pub fn is_respmod(&self) -> bool {
        self.request_line.method == "RESPMOD"
    }

    pub fn is_options(&self) -> bool {
        self.request_line.method == "OPTIONS"
    }

    /// `true` if the client indicated it will accept a `204 No Content`
    /// response, either via `Allow: 204` or by sending a `Preview`.
    pub fn allow_204(&self) -> bool {
        let allows_via_allow_header = self
            .headers
            .get_list("allow")
            .iter()
            .any(|v| v.split(',').any(|tok| tok.trim() == "204"));
        allows_via_allow_header || self.headers.contains("preview")
    }

    /// The requested preview size, if a `Preview:` header was sent.
    pub fn preview_size(&self) -> Option<usize> {
        self.headers.get("preview").and_then(|v| v.trim().parse().ok())
    }

    /// `true` if this request carries an encapsulated body (as opposed to
    /// `null-body`, or an OPTIONS request with no `Encapsulated:` header at
    /// all).
    pub fn has_body(&self) -> bool {
        match self.headers.get("encapsulated") {
            Some(value) => !value.contains("null-body"),
            None => !self.is_options(),
        }
    }
}

/// A parsed ICAP response.
#[derive(Debug, Clone)]
pub struct IcapResponse {
    pub status_line: StatusLine,
    pub headers: HeadersDict,
    pub http_request: Option<HttpRequest>,
    pub http_response: Option<HttpResponse>,
}

impl IcapResponse {
    pub fn new(status_line: StatusLine) -> Self {
        Self {
            status_line,
            headers: HeadersDict::new(),
            http_request: None,
            http_response: None,
        }
    }
}

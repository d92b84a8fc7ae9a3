/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! Builds legal ICAP responses and maps engine errors onto them.
//!
//! Every exit from [`crate::server::connection`] goes through here: OPTIONS
//! advertisements, 204/200 adaptation outcomes, and 4xx/5xx error mappings
//! all funnel into [`serialize`] so the `Encapsulated:` offset table is
//! always computed from what actually got written to the wire, never
//! guessed ahead of time.

use chrono::Utc;

use crate::error::IcapError;
use crate::hooks::Hooks;
use crate::message::{HttpRequest, HttpResponse, IcapRequest, IcapResponse};
use crate::protocol::{Encapsulated, EncapsulatedPart};
use crate::wire::chunked::encode_chunked;
use crate::wire::StatusLine;

/// Longest an ISTag value may be, per spec.md §4.5/§9.
const ISTAG_MAX_BYTES: usize = 32;

/// Default ISTag used when no `is_tag` hook is registered.
fn default_istag() -> String {
    format!("\"{}-{}\"", crate::version::NAME, crate::version::VERSION)
}

/// Truncate `value` to the largest UTF-8-valid prefix of at most
/// [`ISTAG_MAX_BYTES`] bytes. Never splits a multi-byte codepoint.
pub fn truncate_istag(value: &str) -> String {
    if value.len() <= ISTAG_MAX_BYTES {
        return value.to_string();
    }
    let mut end = ISTAG_MAX_BYTES;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

/// Format the current time as an RFC 1123 HTTP-date, e.g.
/// `Tue, 15 Nov 1994 08:12:31 GMT`.
fn rfc1123_now() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// What an outgoing ICAP response encapsulates: this decides which sections
/// the `Encapsulated:` offset table lists and what follows the ICAP
/// preamble on the wire.
pub enum Payload {
    /// No encapsulated content at all: `Encapsulated: null-body=0`.
    None,
    /// An adapted (or echoed-back) request: `req-hdr` + `req-body`.
    Request(HttpRequest),
    /// An adapted (or echoed-back) response, with the request that
    /// produced it: `req-hdr` + `res-hdr` + `res-body`.
    RequestAndResponse(HttpRequest, HttpResponse),
    /// An adapted (or echoed-back) response alone: `res-hdr` + `res-body`.
    Response(HttpResponse),
}

/// Build an [`IcapResponse`] with the mandatory headers (`ISTag`, `Date`)
/// filled in from `hooks`, carrying `payload`. Does not serialize to bytes;
/// call [`serialize`] for that once [`crate::hooks::Hooks::before_serialization`]
/// has had a chance to run.
pub fn build(status: StatusLine, payload: Payload, hooks: &Hooks, request: Option<&IcapRequest>) -> IcapResponse {
    let mut response = IcapResponse::new(status);
    let istag = hooks
        .is_tag(request)
        .unwrap_or_else(default_istag);
    response.headers.append("ISTag", truncate_istag(&istag));
    response.headers.append("Date", rfc1123_now());
    match payload {
        Payload::None => {}
        Payload::Request(req) => response.http_request = Some(req),
        Payload::RequestAndResponse(req, res) => {
            response.http_request = Some(req);
            response.http_response = Some(res);
        }
        Payload::Response(res) => response.http_response = Some(res),
    }
    response
}

/// Build the `OPTIONS` response: mandatory `Methods`, `ISTag`,
/// `Max-Connections`, `Options-TTL`, `Allow: 204`, `Preview: N`, plus any
/// extra headers the `options_headers` hook contributes.
pub fn options_response(
    methods: &str,
    max_connections: u32,
    options_ttl_secs: u64,
    preview_default: Option<usize>,
    hooks: &Hooks,
) -> IcapResponse {
    let mut response = build(
        StatusLine::new("ICAP/1.0", 200, None),
        Payload::None,
        hooks,
        None,
    );
    response.headers.append("Methods", methods);
    response.headers.append("Max-Connections", max_connections.to_string());
    response.headers.append("Options-TTL", options_ttl_secs.to_string());
    response.headers.append("Allow", "204");
    if let Some(size) = preview_default {
        response.headers.append("Preview", size.to_string());
    }
    for (name, value) in hooks.options_headers() {
        response.headers.append(&name, value);
    }
    response
}

/// Build a `204 No Content` response: the handler declined to modify the
/// message and the client advertised it would accept a 204.
pub fn no_content_response(hooks: &Hooks, request: &IcapRequest) -> IcapResponse {
    build(
        StatusLine::new("ICAP/1.0", 204, None),
        Payload::None,
        hooks,
        Some(request),
    )
}

/// Build a `200 OK` response carrying `payload` — either a modified message
/// or, when the client didn't allow 204, the original unmodified one.
pub fn ok_response(payload: Payload, hooks: &Hooks, request: &IcapRequest) -> IcapResponse {
    build(StatusLine::new("ICAP/1.0", 200, None), payload, hooks, Some(request))
}

/// Build the legal error response for `error`, per spec.md §7's taxonomy.
/// Every variant that can escape the pipeline maps to a 4xx/5xx here; none
/// of these propagate to the embedder of [`crate::server::Server::run`].
pub fn map_error(error: &IcapError, hooks: &Hooks) -> IcapResponse {
    log::debug!("mapping engine error to response: {error}");
    let code = match error {
        IcapError::Malformed(_) => 400,
        IcapError::UnknownMethod(_) => 501,
        IcapError::NoHandler { .. } => 404,
        IcapError::HandlerFailed(_) => 500,
        IcapError::Type(_) | IcapError::UnsupportedCharset(_) => 400,
        IcapError::Io(_) => 500,
    };
    build(StatusLine::new("ICAP/1.0", code, None), Payload::None, hooks, None)
}

/// Serialize `response` to wire bytes: status line, headers (including a
/// freshly computed `Encapsulated:` offset table), then the encapsulated
/// HTTP preamble(s) and chunked body, if any.
pub fn serialize(response: &IcapResponse) -> Vec<u8> {
    let (encapsulated, section_bytes) = encapsulated_section(response);

    let mut headers = response.headers.clone();
    headers.delete("encapsulated");
    // `Encapsulated:` is positioned last among mandatory headers in every
    // captured reference trace this engine was built against; callers that
    // care about exact ordering should not rely on header position, but
    // matching the common case costs nothing.
    headers.append("Encapsulated", encapsulated.to_header_value());

    let mut out = response.status_line.to_bytes();
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&headers.to_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&section_bytes);
    out
}

/// Serialize an embedded HTTP request preamble: request line, headers, and
/// the blank line that terminates it within the encapsulated section.
fn http_request_preamble(req: &HttpRequest) -> Vec<u8> {
    let mut out = req.request_line.to_bytes();
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&req.headers.to_bytes());
    out.extend_from_slice(b"\r\n");
    out
}

/// Serialize an embedded HTTP response preamble: status line, headers, and
/// the blank line that terminates it within the encapsulated section.
fn http_response_preamble(res: &HttpResponse) -> Vec<u8> {
    let mut out = res.status_line.to_bytes();
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&res.headers.to_bytes());
    out.extend_from_slice(b"\r\n");
    out
}

/// Build the `Encapsulated:` offset table and the bytes that follow the
/// ICAP preamble's blank line, for whichever combination of HTTP
/// sub-messages `response` carries.
fn encapsulated_section(response: &IcapResponse) -> (Encapsulated, Vec<u8>) {
    let mut entries = Vec::new();
    let mut bytes = Vec::new();

    if let Some(req) = &response.http_request {
        entries.push((EncapsulatedPart::ReqHdr, bytes.len()));
        bytes.extend_from_slice(&http_request_preamble(req));
    }
    if let Some(res) = &response.http_response {
        entries.push((EncapsulatedPart::ResHdr, bytes.len()));
        bytes.extend_from_slice(&http_response_preamble(res));
    }

    match (&response.http_request, &response.http_response) {
        (Some(req), None) => {
            entries.push((EncapsulatedPart::ReqBody, bytes.len()));
            bytes.extend_from_slice(&encode_chunked(&req.body, false));
        }
        (_, Some(res)) => {
            entries.push((EncapsulatedPart::ResBody, bytes.len()));
            bytes.extend_from_slice(&encode_chunked(&res.body, false));
        }
        (None, None) => {
            entries.push((EncapsulatedPart::NullBody, bytes.len()));
        }
    }

    (Encapsulated::from_entries(entries), bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{HeadersDict, RequestLine};
    use bytes::Bytes;

    #[test]
    fn truncates_to_valid_utf8_boundary() {
        let long = "a".repeat(40);
        assert_eq!(truncate_istag(&long).len(), 32);

        let multibyte = "é".repeat(20); // 2 bytes each, 40 bytes total
        let truncated = truncate_istag(&multibyte);
        assert!(truncated.len() <= 32);
        assert!(std::str::from_utf8(truncated.as_bytes()).is_ok());
    }

    #[test]
    fn short_istag_is_unchanged() {
        assert_eq!(truncate_istag("short"), "short");
    }

    #[test]
    fn options_response_has_mandatory_headers() {
        let hooks = Hooks::new();
        let resp = options_response("REQMOD, RESPMOD", 1000, 3600, Some(0), &hooks);
        assert_eq!(resp.status_line.code, 200);
        assert!(resp.headers.get("methods").is_some());
        assert!(resp.headers.get("istag").is_some());
        assert_eq!(resp.headers.get("allow"), Some("204"));
        assert_eq!(resp.headers.get("preview"), Some("0"));
    }

    #[test]
    fn serializing_options_emits_null_body() {
        let hooks = Hooks::new();
        let resp = options_response("REQMOD", 1000, 3600, None, &hooks);
        let bytes = serialize(&resp);
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("Encapsulated: null-body=0"));
        assert!(text.starts_with("ICAP/1.0 200 OK"));
    }

    #[test]
    fn serializing_modified_request_computes_req_body_offset() {
        let hooks = Hooks::new();
        let req = IcapRequest::new(
            RequestLine::new("REQMOD", "icap://h/p", "ICAP/1.0"),
            HeadersDict::new(),
        );
        let http_req = HttpRequest {
            request_line: RequestLine::new("GET", "/x", "HTTP/1.1"),
            headers: HeadersDict::new(),
            body: Bytes::from_static(b"hello"),
        };
        let resp = ok_response(Payload::Request(http_req), &hooks, &req);
        let bytes = serialize(&resp);
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("req-hdr=0"));
        assert!(text.contains("req-body="));
        assert!(text.contains("5\r\nhello\r\n0\r\n\r\n"));
    }

    #[test]
    fn map_error_uses_canonical_codes() {
        let hooks = Hooks::new();
        assert_eq!(map_error(&IcapError::malformed("x"), &hooks).status_line.code, 400);
        assert_eq!(
            map_error(&IcapError::UnknownMethod("FOO".into()), &hooks).status_line.code,
            501
        );
        assert_eq!(
            map_error(
                &IcapError::NoHandler { method: "REQMOD".into(), uri: "/x".into() },
                &hooks
            )
            .status_line
            .code,
            404
        );
    }
}

/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! Per-connection state machine: one task per accepted socket, reading and
//! answering ICAP requests in strict arrival order until the client closes
//! the connection or an unrecoverable error occurs. Implements spec.md
//! §4.6's transition diagram as an explicit sequence of awaited steps
//! rather than a hand-rolled state enum — each `?` below is one of the
//! diagram's states failing into `ERROR`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use slog::{debug, info, o, warn};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::ServerConfig;
use crate::error::{IcapError, IcapResult};
use crate::hooks::Hooks;
use crate::message::{HttpRequest, HttpResponse, IcapRequest, IcapResponse};
use crate::protocol::{find_preamble_end, http as http_proto, EncapsulatedPart, IcapPreamble};
use crate::registry::{Adaptation, HandlerRegistry};
use crate::response::{self, Payload};
use crate::wire::ChunkedDecoder;

/// What to do after one request/response exchange completes.
enum Outcome {
    /// Read the next request on this connection.
    KeepAlive,
    /// The client or engine ended the connection after a clean exchange.
    Close,
}

/// Serve one accepted connection until it closes or a fatal error occurs.
/// Never returns an `Err` that should propagate further: every failure
/// either produced an error response already, or is logged and the
/// function returns having closed the socket.
pub async fn serve_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    registry: Arc<HandlerRegistry>,
    hooks: Arc<Hooks>,
    config: Arc<ServerConfig>,
    logger: slog::Logger,
) {
    let logger = logger.new(o!("peer" => peer_addr.to_string(), "conn" => uuid::Uuid::new_v4().to_string()));
    let mut buf: Vec<u8> = Vec::new();
    loop {
        match serve_one_request(&mut stream, &mut buf, &registry, &hooks, &config, &logger).await {
            Ok(Outcome::KeepAlive) => continue,
            Ok(Outcome::Close) => {
                debug!(logger, "connection closed");
                break;
            }
            Err(IcapError::Io(e)) => {
                debug!(logger, "closing after I/O error"; "error" => %e);
                break;
            }
            Err(e) => {
                warn!(logger, "request failed, writing error response"; "error" => %e);
                let error_response = response::map_error(&e, &hooks);
                if write_response(&mut stream, &error_response).await.is_err() {
                    debug!(logger, "failed to write error response");
                }
                break;
            }
        }
    }
}

/// Handle exactly one request: read its ICAP preamble (and, per method, its
/// encapsulated HTTP sub-message and body), dispatch it, write a response.
async fn serve_one_request(
    stream: &mut TcpStream,
    buf: &mut Vec<u8>,
    registry: &HandlerRegistry,
    hooks: &Hooks,
    config: &ServerConfig,
    logger: &slog::Logger,
) -> IcapResult<Outcome> {
    let Some(preamble_end) = read_preamble(stream, buf, config.read_idle_timeout).await? else {
        return Ok(Outcome::Close);
    };
    let preamble_bytes: Vec<u8> = buf.drain(..preamble_end).collect();
    let preamble = IcapPreamble::parse(&preamble_bytes)?;

    info!(logger, "request"; "method" => &preamble.request_line.method, "uri" => preamble.request_line.path());

    let wants_close = preamble
        .headers
        .get("connection")
        .is_some_and(|v| v.eq_ignore_ascii_case("close"));

    let (request_for_hooks, mut response) = match preamble.request_line.method.as_str() {
        "OPTIONS" => {
            let request = IcapRequest::new(preamble.request_line.clone(), preamble.headers.clone());
            let response = response::options_response(
                "REQMOD, RESPMOD",
                config.max_connections,
                config.options_ttl_secs,
                config.preview_default,
                hooks,
            );
            (request, response)
        }
        "REQMOD" | "RESPMOD" => {
            let mut request = read_encapsulated_request(stream, buf, &preamble, config.read_idle_timeout).await?;
            hooks.before_handling(&mut request);

            let Some(handler) = registry.find(&request) else {
                return Err(IcapError::NoHandler {
                    method: request.request_line.method.clone(),
                    uri: request.request_line.path().to_string(),
                });
            };

            if !request.has_body_complete() && handler.wants_more_after_preview(&request) {
                write_continue(stream).await?;
                complete_preview(stream, buf, &mut request, config.read_idle_timeout).await?;
            }

            let response = match handler
                .handle(request.clone())
                .await
                .map_err(|e| IcapError::HandlerFailed(e.to_string()))?
            {
                Adaptation::Modified(adapted) => build_modified_response(adapted, hooks),
                Adaptation::Replace(replacement) => replacement,
                Adaptation::Unmodified => {
                    if request.allow_204() {
                        response::no_content_response(hooks, &request)
                    } else {
                        if !request.has_body_complete() {
                            complete_preview(stream, buf, &mut request, config.read_idle_timeout).await?;
                        }
                        build_modified_response(request.clone(), hooks)
                    }
                }
            };
            (request, response)
        }
        other => return Err(IcapError::UnknownMethod(other.to_string())),
    };

    hooks.before_serialization(&request_for_hooks, &mut response);
    write_response(stream, &response).await?;

    Ok(if wants_close { Outcome::Close } else { Outcome::KeepAlive })
}

/// Build the `200 OK` carrying `request`'s (possibly handler-mutated) HTTP
/// sub-message(s) back to the client.
fn build_modified_response(request: IcapRequest, hooks: &Hooks) -> IcapResponse {
    let payload = match (request.http_request.clone(), request.http_response.clone()) {
        (Some(req), Some(res)) => Payload::RequestAndResponse(req, res),
        (Some(req), None) => Payload::Request(req),
        (None, Some(res)) => Payload::Response(res),
        (None, None) => Payload::None,
    };
    response::ok_response(payload, hooks, &request)
}

/// Read bytes off `stream` until `buf` contains a complete ICAP preamble
/// (terminated by a blank line). Returns the offset just past the blank
/// line, or `None` if the peer closed the connection before sending
/// anything at all (a clean, expected way for a keep-alive connection to
/// end).
async fn read_preamble(stream: &mut TcpStream, buf: &mut Vec<u8>, timeout: Duration) -> IcapResult<Option<usize>> {
    loop {
        if let Some(end) = find_preamble_end(buf) {
            return Ok(Some(end));
        }
        if fill_more(stream, buf, timeout).await? == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(unexpected_eof("connection closed mid-preamble"));
        }
    }
}

/// Read one more chunk of bytes from `stream` into `buf`, bounded by the
/// connection's read-idle timeout (spec.md §5).
async fn fill_more(stream: &mut TcpStream, buf: &mut Vec<u8>, timeout: Duration) -> IcapResult<usize> {
    let mut chunk = [0u8; 8192];
    let n = tokio::time::timeout(timeout, stream.read(&mut chunk))
        .await
        .map_err(|_| IcapError::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "read idle timeout")))??;
    buf.extend_from_slice(&chunk[..n]);
    Ok(n)
}

/// Read more bytes until `buf` holds at least `min_len` bytes.
async fn ensure_len(stream: &mut TcpStream, buf: &mut Vec<u8>, min_len: usize, timeout: Duration) -> IcapResult<()> {
    while buf.len() < min_len {
        if fill_more(stream, buf, timeout).await? == 0 {
            return Err(unexpected_eof("connection closed while reading encapsulated headers"));
        }
    }
    Ok(())
}

/// Decode one chunked-transfer body from `buf`/`stream`, reading more bytes
/// as needed until the terminating chunk is seen. Returns the decoded body
/// and whether the terminator carried the `ieof` extension.
async fn read_chunked_body(stream: &mut TcpStream, buf: &mut Vec<u8>, timeout: Duration) -> IcapResult<(Bytes, bool)> {
    let mut decoder = ChunkedDecoder::new();
    let mut body = Vec::new();
    loop {
        let (data, consumed) = decoder.feed(buf)?;
        body.extend_from_slice(&data);
        buf.drain(..consumed);
        if decoder.is_complete() {
            return Ok((Bytes::from(body), decoder.ieof()));
        }
        if fill_more(stream, buf, timeout).await? == 0 {
            return Err(unexpected_eof("connection closed mid-body"));
        }
    }
}

fn unexpected_eof(msg: &str) -> IcapError {
    IcapError::Io(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, msg.to_string()))
}

/// Parse the encapsulated HTTP preamble(s) named in `preamble`'s
/// `Encapsulated:` header and, unless the terminator is `null-body` (or
/// `opt-body`, not meaningful for REQMOD/RESPMOD), decode the body that
/// follows — honoring a `Preview:` window if the client sent one.
async fn read_encapsulated_request(
    stream: &mut TcpStream,
    buf: &mut Vec<u8>,
    preamble: &IcapPreamble,
    timeout: Duration,
) -> IcapResult<IcapRequest> {
    let Some(encapsulated) = &preamble.encapsulated else {
        return Err(IcapError::malformed("REQMOD/RESPMOD requires an Encapsulated header"));
    };

    ensure_len(stream, buf, encapsulated.terminal_offset(), timeout).await?;

    let http_request = match encapsulated.range_of(EncapsulatedPart::ReqHdr, encapsulated.terminal_offset()) {
        Some((start, end)) => {
            let (request_line, headers) = http_proto::parse_request_preamble(&buf[start..end])?;
            Some(HttpRequest { request_line, headers, body: Bytes::new() })
        }
        None => None,
    };
    let http_response = match encapsulated.range_of(EncapsulatedPart::ResHdr, encapsulated.terminal_offset()) {
        Some((start, end)) => {
            let (status_line, headers) = http_proto::parse_response_preamble(&buf[start..end])?;
            Some(HttpResponse { status_line, headers, body: Bytes::new() })
        }
        None => None,
    };

    buf.drain(..encapsulated.terminal_offset());

    let mut request = IcapRequest::new(preamble.request_line.clone(), preamble.headers.clone());
    request.http_request = http_request;
    request.http_response = http_response;

    let has_body = !matches!(
        encapsulated.terminal_part(),
        Some(EncapsulatedPart::NullBody) | Some(EncapsulatedPart::OptBody) | None
    );
    if has_body {
        let (body, ieof) = read_chunked_body(stream, buf, timeout).await?;
        set_terminal_body(&mut request, body);
        request.body_complete = ieof || request.preview_size().is_none();
    } else {
        request.body_complete = true;
    }

    Ok(request)
}

/// After a non-final preview window (the terminator lacked `ieof`) and a
/// handler asking for more, read the remainder of the body as a fresh
/// chunked stream and append it.
async fn complete_preview(
    stream: &mut TcpStream,
    buf: &mut Vec<u8>,
    request: &mut IcapRequest,
    timeout: Duration,
) -> IcapResult<()> {
    let (remainder, _ieof) = read_chunked_body(stream, buf, timeout).await?;
    let mut combined = terminal_body(request).to_vec();
    combined.extend_from_slice(&remainder);
    set_terminal_body(request, Bytes::from(combined));
    request.body_complete = true;
    Ok(())
}

fn terminal_body(request: &IcapRequest) -> Bytes {
    if request.is_respmod() {
        request.http_response.as_ref().map(|r| r.body.clone()).unwrap_or_default()
    } else {
        request.http_request.as_ref().map(|r| r.body.clone()).unwrap_or_default()
    }
}

fn set_terminal_body(request: &mut IcapRequest, body: Bytes) {
    if request.is_respmod() {
        if let Some(res) = request.http_response.as_mut() {
            res.body = body;
        }
    } else if let Some(req) = request.http_request.as_mut() {
        req.body = body;
    }
}

/// Write `ICAP/1.0 100 Continue\r\n\r\n` to ask the client for the rest of a
/// previewed body.
async fn write_continue(stream: &mut TcpStream) -> IcapResult<()> {
    stream.write_all(b"ICAP/1.0 100 Continue\r\n\r\n").await?;
    Ok(())
}

/// Serialize and write `response`.
async fn write_response(stream: &mut TcpStream, response: &IcapResponse) -> IcapResult<()> {
    let bytes = response::serialize(response);
    stream.write_all(&bytes).await?;
    stream.flush().await?;
    Ok(())
}

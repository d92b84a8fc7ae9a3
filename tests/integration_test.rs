/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! End-to-end tests driving a real loopback `TcpListener`, covering the
//! literal scenarios spec.md §8 calls out: OPTIONS, REQMOD 204, REQMOD body
//! rewrite, RESPMOD preview (including the `100 Continue` round trip for a
//! non-`ieof` terminator), unknown method, unknown ICAP version, and
//! unrouted URL.

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use icap_engine::config::ServerConfig;
use icap_engine::error::IcapResult;
use icap_engine::message::IcapRequest;
use icap_engine::registry::{Adaptation, Criterion, Handler, Method};
use icap_engine::server::{Server, ServerBuilder, ServerHandle};

struct Uppercase;

#[async_trait]
impl Handler for Uppercase {
    async fn handle(&self, mut request: IcapRequest) -> IcapResult<Adaptation> {
        if let Some(req) = request.http_request.as_mut() {
            req.body = req.body.to_ascii_uppercase().into();
        }
        Ok(Adaptation::Modified(request))
    }
}

struct NoOp;

#[async_trait]
impl Handler for NoOp {
    async fn handle(&self, _request: IcapRequest) -> IcapResult<Adaptation> {
        Ok(Adaptation::Unmodified)
    }
}

struct WantsFullBody;

#[async_trait]
impl Handler for WantsFullBody {
    async fn handle(&self, request: IcapRequest) -> IcapResult<Adaptation> {
        let mut request = request;
        if let Some(res) = request.http_response.as_mut() {
            res.body = res.body.to_ascii_uppercase().into();
        }
        Ok(Adaptation::Modified(request))
    }

    fn wants_more_after_preview(&self, request: &IcapRequest) -> bool {
        !request.has_body_complete()
    }
}

async fn test_server() -> (ServerHandle, std::net::SocketAddr) {
    let server: Server = ServerBuilder::new()
        .config(ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            read_idle_timeout: Duration::from_secs(5),
            ..ServerConfig::default()
        })
        .register_handler(Criterion::new(Method::Reqmod, "/echo"), NoOp)
        .register_handler(Criterion::new(Method::Reqmod, "/uppercase"), Uppercase)
        .register_handler(Criterion::new(Method::Respmod, "/uppercase"), WantsFullBody)
        .build();
    let handle = server.run().await.expect("server binds");
    let addr = handle.local_addr();
    (handle, addr)
}

async fn roundtrip(addr: std::net::SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    // Half-close the write side so the server's next preamble read sees a
    // clean EOF and closes after answering, letting `read_to_end` return.
    let _ = stream.shutdown().await;
    let mut response = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut response)).await;
    response
}

/// Read from `stream` until `collected` contains `needle`, bounded by a
/// short per-read timeout. Used to observe an intermediate `100 Continue`
/// without waiting for the connection to close.
async fn read_until(stream: &mut TcpStream, needle: &str) -> Vec<u8> {
    let mut collected = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        if String::from_utf8_lossy(&collected).contains(needle) {
            return collected;
        }
        let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .expect("timed out waiting for expected bytes")
            .unwrap();
        assert!(n > 0, "connection closed before {needle:?} was seen");
        collected.extend_from_slice(&buf[..n]);
    }
}

#[tokio::test]
async fn options_request_reports_mandatory_headers() {
    let (handle, addr) = test_server().await;
    let request = b"OPTIONS icap://example/foo ICAP/1.0\r\nHost: example\r\n\r\n";
    let response = roundtrip(addr, request).await;
    let text = String::from_utf8_lossy(&response);

    assert!(text.starts_with("ICAP/1.0 200 OK"), "{text}");
    assert!(text.contains("Methods:"), "{text}");
    assert!(text.contains("ISTag:"), "{text}");
    assert!(text.contains("Encapsulated: null-body=0"), "{text}");

    handle.stop().await;
}

#[tokio::test]
async fn reqmod_no_modification_with_allow_204_yields_204() {
    let (handle, addr) = test_server().await;
    let body = b"GET http://a/ HTTP/1.1\r\nHost: a\r\n\r\n";
    let chunked = b"0\r\n\r\n";
    let request = format!(
        "REQMOD icap://example/echo ICAP/1.0\r\nHost: example\r\nAllow: 204\r\nEncapsulated: req-hdr=0, req-body={}\r\n\r\n",
        body.len()
    );
    let mut full = request.into_bytes();
    full.extend_from_slice(body);
    full.extend_from_slice(chunked);

    let response = roundtrip(addr, &full).await;
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("ICAP/1.0 204 No Content"), "{text}");

    handle.stop().await;
}

#[tokio::test]
async fn reqmod_body_rewrite_uppercases_request_body() {
    let (handle, addr) = test_server().await;
    let http_req = b"GET /x HTTP/1.1\r\nHost: a\r\n\r\n";
    let chunked_body = b"5\r\nhello\r\n0\r\n\r\n";
    let preamble = format!(
        "REQMOD icap://example/uppercase ICAP/1.0\r\nHost: example\r\nEncapsulated: req-hdr=0, req-body={}\r\n\r\n",
        http_req.len()
    );
    let mut full = preamble.into_bytes();
    full.extend_from_slice(http_req);
    full.extend_from_slice(chunked_body);

    let response = roundtrip(addr, &full).await;
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("ICAP/1.0 200 OK"), "{text}");
    assert!(text.contains("req-hdr=0"), "{text}");
    assert!(text.contains("HELLO"), "{text}");

    handle.stop().await;
}

#[tokio::test]
async fn unknown_method_is_rejected() {
    let (handle, addr) = test_server().await;
    let response = roundtrip(addr, b"FOO / ICAP/1.0\r\n\r\n").await;
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("ICAP/1.0 501"), "{text}");

    handle.stop().await;
}

#[tokio::test]
async fn respmod_preview_without_ieof_drives_100_continue_round_trip() {
    // spec.md §8 scenario 4: a 10-byte body previewed with `Preview: 4`, its
    // terminator lacking `ieof`, must make the engine emit `100 Continue`
    // and read the remaining 6 bytes before re-invoking the handler with the
    // complete body.
    let (handle, addr) = test_server().await;

    let req_hdr = b"GET /test HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let res_hdr = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\n";
    let preview_chunk = b"4\r\nhell\r\n0\r\n\r\n"; // no `ieof`: more body is coming
    let preamble = format!(
        "RESPMOD icap://example/uppercase ICAP/1.0\r\nHost: example\r\nAllow: 204\r\nPreview: 4\r\n\
Encapsulated: req-hdr=0, res-hdr={}, res-body={}\r\n\r\n",
        req_hdr.len(),
        req_hdr.len() + res_hdr.len()
    );

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(preamble.as_bytes()).await.unwrap();
    stream.write_all(req_hdr).await.unwrap();
    stream.write_all(res_hdr).await.unwrap();
    stream.write_all(preview_chunk).await.unwrap();

    let after_continue = read_until(&mut stream, "100 Continue").await;
    assert!(
        String::from_utf8_lossy(&after_continue).starts_with("ICAP/1.0 100 Continue"),
        "{}",
        String::from_utf8_lossy(&after_continue)
    );

    // Send the remaining 6 bytes of the 10-byte body ("helloworld") as a
    // fresh chunked stream, as the engine's `100 Continue` invites.
    let remainder_chunk = b"6\r\noworld\r\n0\r\n\r\n";
    stream.write_all(remainder_chunk).await.unwrap();
    let _ = stream.shutdown().await;

    let mut response = Vec::new();
    let _ = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut response)).await;
    let text = String::from_utf8_lossy(&response);
    assert!(text.contains("ICAP/1.0 200 OK"), "{text}");
    assert!(text.contains("HELLOWORLD"), "{text}");

    handle.stop().await;
}

#[tokio::test]
async fn unknown_icap_version_is_rejected() {
    let (handle, addr) = test_server().await;
    let response = roundtrip(addr, b"REQMOD icap://example/echo ICAP/9.9\r\nHost: example\r\n\r\n").await;
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("ICAP/1.0 400"), "{text}");

    handle.stop().await;
}

#[tokio::test]
async fn unrouted_uri_yields_404() {
    let (handle, addr) = test_server().await;
    let body = b"";
    let request = format!(
        "REQMOD icap://example/unknown ICAP/1.0\r\nHost: example\r\nEncapsulated: req-hdr=0, req-body={}\r\n\r\n",
        body.len()
    );
    let mut full = request.into_bytes();
    full.extend_from_slice(b"GET / HTTP/1.1\r\nHost: a\r\n\r\n");
    full.extend_from_slice(b"0\r\n\r\n");

    let response = roundtrip(addr, &full).await;
    let text = String::from_utf8_lossy(&response);
    assert!(text.starts_with("ICAP/1.0 404"), "{text}");

    handle.stop().await;
}

#[tokio::test]
async fn pipelined_requests_answer_in_arrival_order() {
    let (handle, addr) = test_server().await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let first = b"OPTIONS icap://example/one ICAP/1.0\r\nHost: example\r\n\r\n";
    let second = b"OPTIONS icap://example/two ICAP/1.0\r\nHost: example\r\n\r\n";
    stream.write_all(first).await.unwrap();
    stream.write_all(second).await.unwrap();

    let mut buf = vec![0u8; 8192];
    let mut collected = Vec::new();
    let mut responses_seen = 0;
    while responses_seen < 2 {
        let n = tokio::time::timeout(Duration::from_secs(2), stream.read(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(n > 0, "connection closed early");
        collected.extend_from_slice(&buf[..n]);
        responses_seen = String::from_utf8_lossy(&collected).matches("ICAP/1.0 200").count();
    }
    let text = String::from_utf8_lossy(&collected);
    let first_idx = text.find("ICAP/1.0 200").unwrap();
    let second_idx = text.rfind("ICAP/1.0 200").unwrap();
    assert!(second_idx > first_idx);

    handle.stop().await;
}

//! ICAP test client: exercises OPTIONS, REQMOD, and RESPMOD against a
//! running server (e.g. `cargo run --example simple_server`), printing each
//! raw response so the wire framing can be eyeballed.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("icap-engine test client");
    println!("========================");

    send_options()?;
    send_reqmod()?;
    send_respmod_preview()?;

    Ok(())
}

// The server keeps a keep-alive connection open after writing its response,
// so it never sends EOF for `read_to_string` to stop on. Read until a short
// idle gap instead, matching how a one-shot manual client would observe the
// reply without needing to understand its own framing.
fn roundtrip(request: &str) -> std::io::Result<String> {
    let mut stream = TcpStream::connect("127.0.0.1:1344")?;
    stream.write_all(request.as_bytes())?;
    stream.flush()?;
    stream.set_read_timeout(Some(Duration::from_millis(500)))?;

    let mut response = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => response.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => break,
            Err(e) => return Err(e),
        }
    }
    Ok(String::from_utf8_lossy(&response).into_owned())
}

fn send_options() -> std::io::Result<()> {
    println!("\n1. OPTIONS /uppercase");
    let request =
        "OPTIONS icap://127.0.0.1:1344/uppercase ICAP/1.0\r\nHost: 127.0.0.1:1344\r\n\r\n";
    println!("{}", roundtrip(request)?);
    Ok(())
}

fn send_reqmod() -> std::io::Result<()> {
    println!("\n2. REQMOD /uppercase (body: \"hello\")");
    let body = "GET /test HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let chunked = format!("{:x}\r\nhello\r\n0\r\n\r\n", 5);
    let request = format!(
        "REQMOD icap://127.0.0.1:1344/uppercase ICAP/1.0\r\n\
Host: 127.0.0.1:1344\r\n\
Allow: 204\r\n\
Encapsulated: req-hdr=0, req-body={}\r\n\r\n{}{}",
        body.len(),
        body,
        chunked
    );
    println!("{}", roundtrip(&request)?);
    Ok(())
}

/// Drives the actual `100 Continue` round trip from spec.md §8 scenario 4:
/// a 10-byte body ("helloworld") previewed 4 bytes at a time, its
/// terminator lacking `ieof`, so the engine asks for the other 6 bytes
/// before producing a final response.
fn send_respmod_preview() -> std::io::Result<()> {
    println!("\n3. RESPMOD /uppercase with Preview: 4 (non-ieof, drives 100 Continue)");
    let req_hdr = "GET /test HTTP/1.1\r\nHost: example.com\r\n\r\n";
    let res_hdr = "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\n";
    let preview_chunk = "4\r\nhell\r\n0\r\n\r\n";
    let preamble = format!(
        "RESPMOD icap://127.0.0.1:1344/uppercase ICAP/1.0\r\n\
Host: 127.0.0.1:1344\r\n\
Allow: 204\r\n\
Preview: 4\r\n\
Encapsulated: req-hdr=0, res-hdr={}, res-body={}\r\n\r\n",
        req_hdr.len(),
        req_hdr.len() + res_hdr.len(),
    );

    let mut stream = TcpStream::connect("127.0.0.1:1344")?;
    stream.write_all(preamble.as_bytes())?;
    stream.write_all(req_hdr.as_bytes())?;
    stream.write_all(res_hdr.as_bytes())?;
    stream.write_all(preview_chunk.as_bytes())?;
    stream.flush()?;

    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut chunk = [0u8; 4096];
    let n = stream.read(&mut chunk)?;
    let continue_response = String::from_utf8_lossy(&chunk[..n]).into_owned();
    println!("{continue_response}");
    assert!(
        continue_response.starts_with("ICAP/1.0 100 Continue"),
        "expected 100 Continue, got: {continue_response}"
    );

    // Send the remaining 6 bytes of "helloworld" as a fresh chunked stream.
    let remainder_chunk = "6\r\noworld\r\n0\r\n\r\n";
    stream.write_all(remainder_chunk.as_bytes())?;
    stream.flush()?;
    stream.set_read_timeout(Some(Duration::from_millis(500)))?;

    let mut response = Vec::new();
    loop {
        match stream.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => response.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => break,
            Err(e) => return Err(e),
        }
    }
    println!("{}", String::from_utf8_lossy(&response));
    Ok(())
}

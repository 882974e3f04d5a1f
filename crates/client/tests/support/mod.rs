//! Loopback test server and small wait helpers for the integration suite.
//!
//! The server accepts a fixed number of connections, parses each request
//! head with `httparse`, and hands the parsed head plus the raw stream to a
//! test-provided script. Scripts write raw response bytes, which keeps the
//! wire behavior of every test explicit.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

const IO_TIMEOUT: Duration = Duration::from_secs(15);
const AWAIT_TIMEOUT: Duration = Duration::from_secs(15);

/// A parsed request head, plus whatever body bytes were already read off
/// the socket along with it.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body_prefix: Vec<u8>,
}

impl ParsedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    pub fn content_length(&self) -> Option<usize> {
        self.header("content-length").and_then(|v| v.parse().ok())
    }

    pub fn expects_continue(&self) -> bool {
        self.header("expect").is_some_and(|v| v.eq_ignore_ascii_case("100-continue"))
    }
}

/// Scripted loopback server. Serves exactly `connections` connections, one
/// thread per connection, then stops accepting.
pub struct TestServer {
    addr: SocketAddr,
    served: Arc<AtomicUsize>,
}

impl TestServer {
    pub fn start<F>(connections: usize, script: F) -> Self
    where
        F: Fn(ParsedRequest, &mut TcpStream) + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind loopback listener");
        let addr = listener.local_addr().unwrap();
        let served = Arc::new(AtomicUsize::new(0));

        let script = Arc::new(script);
        let counter = served.clone();
        std::thread::spawn(move || {
            for _ in 0..connections {
                let Ok((mut stream, _)) = listener.accept() else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let script = script.clone();
                std::thread::spawn(move || {
                    stream.set_read_timeout(Some(IO_TIMEOUT)).unwrap();
                    stream.set_write_timeout(Some(IO_TIMEOUT)).unwrap();
                    let request = read_request_head(&mut stream);
                    script(request, &mut stream);
                    let _ = stream.flush();
                });
            }
        });

        Self { addr, served }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// How many connections were accepted so far.
    pub fn connections(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }
}

/// Reads from the stream until the request head is complete and parses it.
pub fn read_request_head(stream: &mut TcpStream) -> ParsedRequest {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        if let Some(pos) = find(&buffer, b"\r\n\r\n") {
            let head_end = pos + 4;

            let mut headers = [httparse::EMPTY_HEADER; 64];
            let mut parsed = httparse::Request::new(&mut headers);
            let status = parsed.parse(&buffer[..head_end]).expect("malformed request head");
            assert!(status.is_complete(), "request head should be complete");

            return ParsedRequest {
                method: parsed.method.unwrap().to_string(),
                path: parsed.path.unwrap().to_string(),
                headers: parsed
                    .headers
                    .iter()
                    .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
                    .collect(),
                body_prefix: buffer[head_end..].to_vec(),
            };
        }

        let n = stream.read(&mut chunk).expect("failed reading request head");
        assert!(n > 0, "connection closed before the request head completed");
        buffer.extend_from_slice(&chunk[..n]);
    }
}

/// Reads an exact-length request body, starting from the bytes that came in
/// with the head.
pub fn read_body(stream: &mut TcpStream, prefix: Vec<u8>, length: usize) -> Vec<u8> {
    let mut body = prefix;
    let mut chunk = [0u8; 16 * 1024];
    while body.len() < length {
        let n = stream.read(&mut chunk).expect("failed reading request body");
        assert!(n > 0, "connection closed mid body");
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(length);
    body
}

/// Reads until the given terminator appears; returns everything read,
/// terminator included. Used for chunked uploads (`0\r\n\r\n`).
pub fn read_until(stream: &mut TcpStream, prefix: Vec<u8>, terminator: &[u8]) -> Vec<u8> {
    let mut data = prefix;
    let mut chunk = [0u8; 16 * 1024];
    while find(&data, terminator).is_none() {
        let n = stream.read(&mut chunk).expect("failed reading request data");
        assert!(n > 0, "connection closed before terminator");
        data.extend_from_slice(&chunk[..n]);
    }
    data
}

/// Writes raw response bytes and flushes.
pub fn respond(stream: &mut TcpStream, raw: &str) {
    stream.write_all(raw.as_bytes()).expect("failed writing response");
    stream.flush().expect("failed flushing response");
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Opt-in engine and wire logging for debugging test failures; enabled by
/// setting `FERRY_HTTP_TEST_LOG=1`.
pub fn init_tracing() {
    if std::env::var_os("FERRY_HTTP_TEST_LOG").is_some() {
        let _ = tracing_subscriber::fmt().with_max_level(tracing::Level::TRACE).try_init();
    }
}

/// Blocks until the flag flips, failing the test after a generous timeout.
pub fn await_flag(flag: &AtomicBool) {
    await_cond(|| flag.load(Ordering::Acquire));
}

/// Blocks until the condition holds, failing the test after a generous
/// timeout.
pub fn await_cond(cond: impl Fn() -> bool) {
    let deadline = Instant::now() + AWAIT_TIMEOUT;
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        std::thread::sleep(Duration::from_millis(10));
    }
}

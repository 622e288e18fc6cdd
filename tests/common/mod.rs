#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sha2::{Digest, Sha256};

/// URL nothing listens on
pub const UNREACHABLE: &str = "http://127.0.0.1:9/JiJiDownCore-hash.txt";

#[derive(Clone)]
pub struct Route {
    pub status: u16,
    pub body: Vec<u8>,
    pub send_length: bool,
    pub declared_length: Option<usize>,
    pub stall: Option<Duration>,
}

impl Route {
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
            send_length: true,
            declared_length: None,
            stall: None,
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: b"not here".to_vec(),
            send_length: true,
            declared_length: None,
            stall: None,
        }
    }

    /// Promise `declared_length` bytes, send `body`, then go silent
    pub fn stalled(declared_length: usize, body: impl Into<Vec<u8>>) -> Self {
        Self {
            declared_length: Some(declared_length),
            stall: Some(Duration::from_secs(30)),
            ..Self::ok(body)
        }
    }

    /// Body delimited by connection close instead of Content-Length
    pub fn without_length(mut self) -> Self {
        self.send_length = false;
        self
    }
}

/// Minimal HTTP/1.1 responder on a background thread
pub struct TestServer {
    pub base_url: String,
    hits: Arc<AtomicUsize>,
}

impl TestServer {
    pub fn start(routes: Vec<(&str, Route)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let routes: HashMap<String, Route> = routes
            .into_iter()
            .map(|(path, route)| (path.to_string(), route))
            .collect();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { continue };
                counter.fetch_add(1, Ordering::SeqCst);
                respond(stream, &routes);
            }
        });

        Self { base_url, hits }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

fn respond(mut stream: TcpStream, routes: &HashMap<String, Route>) {
    let mut request = Vec::new();
    let mut buf = [0_u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }

    let head = String::from_utf8_lossy(&request);
    let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
    let route = routes.get(&path).cloned().unwrap_or_else(|| Route::status(404));
    let reason = match route.status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Status",
    };

    let mut response = format!("HTTP/1.1 {} {}\r\n", route.status, reason);
    if route.send_length {
        let length = route.declared_length.unwrap_or(route.body.len());
        response.push_str(&format!("Content-Length: {}\r\n", length));
    }
    response.push_str("Connection: close\r\n\r\n");
    let _ = stream.write_all(response.as_bytes());
    let _ = stream.write_all(&route.body);
    let _ = stream.flush();
    if let Some(stall) = route.stall {
        thread::sleep(stall);
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

pub fn manifest_line(hash: &str, filename: &str) -> String {
    format!("{}|1.0.0|{}\n", hash, filename)
}

pub fn write_file(path: &Path, data: &[u8]) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, data).unwrap();
}

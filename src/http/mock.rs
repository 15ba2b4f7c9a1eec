//! In-memory connector for testing.
//!
//! Every connection buffers what the client writes; on the first read the
//! handler is invoked with the parsed request and its return value becomes
//! the raw response bytes.

use std::io::{self, Cursor, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::context::Context;
use crate::error::Result;
use crate::http::{Connector, Endpoint, Stream};

/// Handler function type for mock responses
type ResponseHandler = dyn Fn(&MockRequest) -> Vec<u8> + Send + Sync;

/// A request as received by the mock server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRequest {
    pub endpoint: Endpoint,
    pub method: String,
    /// Request target including the leading `/`
    pub target: String,
    /// Header block, CRLF separated, without the request line
    pub headers: String,
    pub body: String,
}

impl MockRequest {
    fn parse(endpoint: &Endpoint, raw: &[u8]) -> Self {
        let text = String::from_utf8_lossy(raw).into_owned();
        let (head, body) = text
            .split_once("\r\n\r\n")
            .unwrap_or((text.as_str(), ""));
        let (line, headers) = head.split_once("\r\n").unwrap_or((head, ""));
        let mut parts = line.split(' ');
        Self {
            endpoint: endpoint.clone(),
            method: parts.next().unwrap_or_default().to_string(),
            target: parts.next().unwrap_or_default().to_string(),
            headers: headers.to_string(),
            body: body.to_string(),
        }
    }

    /// Value of a request header, matched literally
    pub fn header(&self, key: &str) -> Option<&str> {
        let prefix = format!("{}:", key);
        self.headers
            .split("\r\n")
            .find_map(|line| line.strip_prefix(&prefix))
            .map(str::trim)
    }
}

/// Build a `200`-style response with a correct `Content-Length`.
pub fn http_response(status: u16, body: &[u8]) -> Vec<u8> {
    let mut raw = format!(
        "HTTP/1.1 {} Mock\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\n\r\n",
        status,
        body.len()
    )
    .into_bytes();
    raw.extend_from_slice(body);
    raw
}

#[derive(Default)]
struct MockState {
    requests: Mutex<Vec<MockRequest>>,
    connections: AtomicUsize,
    open: AtomicUsize,
}

/// Connector that serves scripted responses from memory.
#[derive(Clone)]
pub struct MockConnector {
    handler: Arc<ResponseHandler>,
    state: Arc<MockState>,
    chunk_size: usize,
}

impl std::fmt::Debug for MockConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockConnector")
            .field("connections", &self.connections())
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

impl MockConnector {
    /// Create a mock connector with an auto-response handler.
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&MockRequest) -> Vec<u8> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            state: Arc::new(MockState::default()),
            chunk_size: usize::MAX,
        }
    }

    /// Deliver at most `size` bytes per read, to exercise partial reads.
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Number of connections opened so far
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Number of streams not yet dropped
    pub fn open_streams(&self) -> usize {
        self.state.open.load(Ordering::SeqCst)
    }

    /// Requests received so far, in order
    pub fn requests(&self) -> Vec<MockRequest> {
        match self.state.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Connector for MockConnector {
    fn connect(&self, endpoint: &Endpoint, ctx: &Context) -> Result<Box<dyn Stream>> {
        ctx.trace(format_args!("mock connect to {}:{}", endpoint.host, endpoint.port));
        self.state.connections.fetch_add(1, Ordering::SeqCst);
        self.state.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStream {
            endpoint: endpoint.clone(),
            written: Vec::new(),
            response: None,
            handler: Arc::clone(&self.handler),
            state: Arc::clone(&self.state),
            chunk_size: self.chunk_size,
        }))
    }
}

struct MockStream {
    endpoint: Endpoint,
    written: Vec<u8>,
    response: Option<Cursor<Vec<u8>>>,
    handler: Arc<ResponseHandler>,
    state: Arc<MockState>,
    chunk_size: usize,
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.response.is_none() {
            let request = MockRequest::parse(&self.endpoint, &self.written);
            let response = (self.handler)(&request);
            if let Ok(mut requests) = self.state.requests.lock() {
                requests.push(request);
            }
            self.response = Some(Cursor::new(response));
        }
        let limit = buf.len().min(self.chunk_size);
        match self.response.as_mut() {
            Some(cursor) => cursor.read(&mut buf[..limit]),
            None => Ok(0),
        }
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.written.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.state.open.fetch_sub(1, Ordering::SeqCst);
    }
}

//! Minimal HTTPS request/response client.
//!
//! This is not a general HTTP library. It performs exactly the request
//! shapes the update protocol needs:
//! - one `GET` or `POST` per connection, never reused
//! - `Content-Length` framed responses only (no chunked encoding, no
//!   redirects, no compression)
//! - status 200 or failure
//!
//! A [`Session`] owns the stream for one request/response cycle. Dropping
//! it tears down TLS and closes the socket, so every exit path releases
//! the connection.

pub mod mock;
pub mod response;
pub mod tls;
pub mod url;

use std::fmt;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;

use crate::config::UpdaterConfig;
use crate::context::Context;
use crate::error::{Result, UpdateError};

pub use mock::{MockConnector, MockRequest};
pub use response::{header, parse_head, ResponseHead};
pub use tls::TlsConnector;
pub use url::Endpoint;

/// Read size used when draining a response body
const READ_CHUNK: usize = 4096;

// ---------------------------------------------------------------------------
// Connector
// ---------------------------------------------------------------------------

/// A bidirectional byte stream carrying one request/response cycle.
pub trait Stream: Read + Write + Send {}

impl<T: Read + Write + Send> Stream for T {}

/// Opens a fresh, secured stream to an endpoint.
///
/// Production code uses [`TlsConnector`]; tests swap in [`MockConnector`].
pub trait Connector: Send + Sync {
    fn connect(&self, endpoint: &Endpoint, ctx: &Context) -> Result<Box<dyn Stream>>;
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Request methods used by the update protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
        }
    }
}

/// Format the complete request. `headers` must be CRLF-terminated lines.
///
/// Fails with `TooLong` rather than truncating when the result would not
/// fit in `limit` bytes.
pub fn format_request(
    method: Method,
    endpoint: &Endpoint,
    headers: &str,
    body: Option<&str>,
    limit: usize,
) -> Result<Vec<u8>> {
    let body = body.unwrap_or("");
    let request = format!(
        "{} /{} HTTP/1.1\r\nHost: {}\r\nContent-Length: {}\r\n{}\r\n{}",
        method,
        endpoint.path,
        endpoint.authority,
        body.len(),
        headers,
        body
    );
    if request.len() > limit {
        return Err(UpdateError::TooLong {
            what: "Request",
            len: request.len(),
            limit,
        });
    }
    Ok(request.into_bytes())
}

// ---------------------------------------------------------------------------
// Transport
// ---------------------------------------------------------------------------

/// Sends one request per call over a fresh connection.
#[derive(Clone)]
pub struct Transport {
    connector: Arc<dyn Connector>,
    port: u16,
    staging_buffer_size: usize,
    max_content_length: u64,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("port", &self.port)
            .field("staging_buffer_size", &self.staging_buffer_size)
            .field("max_content_length", &self.max_content_length)
            .finish_non_exhaustive()
    }
}

impl Transport {
    pub fn new(connector: Arc<dyn Connector>, config: &UpdaterConfig) -> Self {
        Self {
            connector,
            port: config.port,
            staging_buffer_size: config.staging_buffer_size,
            max_content_length: config.max_content_length,
        }
    }

    /// Send one request and frame the response head.
    ///
    /// The URL scheme is checked before any connection is attempted. On
    /// success the returned session holds the status, the declared body
    /// length and whatever body bytes arrived together with the headers.
    pub fn request(
        &self,
        method: Method,
        url: &str,
        headers: &str,
        body: Option<&str>,
        ctx: &Context,
    ) -> Result<Session> {
        let endpoint = Endpoint::parse(url, self.port)?;
        let request = format_request(method, &endpoint, headers, body, self.staging_buffer_size)?;

        ctx.trace(format_args!("Fetching {} {}", method, url));
        let mut stream = self.connector.connect(&endpoint, ctx)?;

        stream
            .write_all(&request)
            .and_then(|()| stream.flush())
            .map_err(|e| UpdateError::TransportWrite(e.to_string()))?;

        let mut buf = vec![0u8; self.staging_buffer_size];
        let filled = read_head(stream.as_mut(), &mut buf)?;
        let head = match parse_head(&buf[..filled], self.max_content_length) {
            Ok(head) => head,
            Err(e) => {
                if let UpdateError::BadStatus { head, .. } = &e {
                    ctx.trace(format_args!("Response head:\n{}", head));
                }
                return Err(e);
            }
        };

        ctx.trace(format_args!(
            "Response {} with {} body bytes ({} prefetched)",
            head.status,
            head.content_length,
            filled - head.body_offset
        ));
        Ok(Session::new(
            stream,
            &head,
            &buf[head.body_offset..filled],
            self.staging_buffer_size,
        ))
    }
}

/// Read until the header boundary is seen, the buffer is full, or EOF.
fn read_head(stream: &mut dyn Stream, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => {
                filled += n;
                if response::find_header_end(&buf[..filled]).is_some() {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(UpdateError::Transport(format!(
                    "Cannot read response: {}",
                    e
                )))
            }
        }
    }
    if filled == 0 {
        return Err(UpdateError::MalformedResponse(
            "connection closed before any response".to_string(),
        ));
    }
    Ok(filled)
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// One open response. Never outlives the request that created it.
pub struct Session {
    stream: Box<dyn Stream>,
    status: u16,
    content_length: u64,
    prefetched: Vec<u8>,
    /// Body bytes still to be read from the stream
    remaining: u64,
    /// Upper bound on up-front allocation in `read_string`
    reserve_limit: usize,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("prefetched", &self.prefetched.len())
            .field("remaining", &self.remaining)
            .field("reserve_limit", &self.reserve_limit)
            .finish_non_exhaustive()
    }
}

impl Session {
    fn new(
        stream: Box<dyn Stream>,
        head: &ResponseHead,
        extra: &[u8],
        reserve_limit: usize,
    ) -> Self {
        // Bytes past the declared length are not part of this response
        let keep = extra
            .len()
            .min(usize::try_from(head.content_length).unwrap_or(usize::MAX));
        Self {
            stream,
            status: head.status,
            content_length: head.content_length,
            prefetched: extra[..keep].to_vec(),
            remaining: head.content_length - keep as u64,
            reserve_limit,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    /// Body bytes received together with the headers
    pub fn prefetched(&self) -> &[u8] {
        &self.prefetched
    }

    /// Hand over the prefetched fragment; later calls return nothing.
    pub fn take_prefetched(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.prefetched)
    }

    /// Read the next chunk of body from the stream.
    ///
    /// Returns `Ok(0)` once `Content-Length` bytes have been delivered
    /// (prefetched fragment included). A connection that closes early is
    /// a transport failure.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let want = buf
            .len()
            .min(usize::try_from(self.remaining).unwrap_or(usize::MAX));
        loop {
            match self.stream.read(&mut buf[..want]) {
                Ok(0) => {
                    return Err(UpdateError::Transport(format!(
                        "Connection closed with {} of {} body bytes outstanding",
                        self.remaining, self.content_length
                    )))
                }
                Ok(n) => {
                    self.remaining -= n as u64;
                    return Ok(n);
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(UpdateError::Transport(format!(
                        "Cannot read response body: {}",
                        e
                    )))
                }
            }
        }
    }

    /// Read the whole body as text.
    pub fn read_string(mut self) -> Result<String> {
        let mut body = self.take_prefetched();
        // The declared length is the peer's claim; grow as bytes arrive
        body.reserve(
            usize::try_from(self.remaining)
                .unwrap_or(usize::MAX)
                .min(self.reserve_limit),
        );
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            let n = self.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
        String::from_utf8(body).map_err(|_| {
            UpdateError::MalformedResponse("response body is not valid UTF-8".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::mock::http_response;

    fn transport(connector: MockConnector) -> Transport {
        Transport::new(Arc::new(connector), &UpdaterConfig::default())
    }

    #[test]
    fn test_format_request_post() {
        let ep = Endpoint::parse("https://api.example.com/tok/provision/update", 443).unwrap();
        let raw = format_request(
            Method::Post,
            &ep,
            "Content-Type: application/json\r\n",
            Some("{}"),
            4096,
        )
        .unwrap();
        assert_eq!(
            String::from_utf8(raw).unwrap(),
            "POST /tok/provision/update HTTP/1.1\r\nHost: api.example.com\r\n\
             Content-Length: 2\r\nContent-Type: application/json\r\n\r\n{}"
        );
    }

    #[test]
    fn test_format_request_get_without_body() {
        let ep = Endpoint::parse("https://cdn", 443).unwrap();
        let raw = format_request(Method::Get, &ep, "Accept: */*\r\n", None, 4096).unwrap();
        assert_eq!(
            String::from_utf8(raw).unwrap(),
            "GET / HTTP/1.1\r\nHost: cdn\r\nContent-Length: 0\r\nAccept: */*\r\n\r\n"
        );
    }

    #[test]
    fn test_format_request_too_long() {
        let ep = Endpoint::parse("https://cdn/x", 443).unwrap();
        let body = "x".repeat(4096);
        let err = format_request(Method::Post, &ep, "", Some(&body), 4096).unwrap_err();
        assert!(matches!(err, UpdateError::TooLong { what: "Request", .. }));
    }

    #[test]
    fn test_request_reads_prefetched_and_streamed_body() {
        let body = vec![7u8; 10_000];
        let response = http_response(200, &body);
        let connector = MockConnector::with_handler(move |_| response.clone()).with_chunk_size(1000);
        let t = transport(connector);

        let mut session = t
            .request(Method::Get, "https://cdn/x.bin", "Accept: */*\r\n", None, &Context::silent())
            .unwrap();
        assert_eq!(session.status(), 200);
        assert_eq!(session.content_length(), 10_000);
        assert!(!session.prefetched().is_empty());

        let mut total = session.take_prefetched().len();
        let mut buf = [0u8; 512];
        loop {
            let n = session.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            total += n;
        }
        assert_eq!(total, 10_000);
    }

    #[test]
    fn test_prefetched_never_exceeds_content_length() {
        let mut response = http_response(200, b"abc");
        response.extend_from_slice(b"trailing-garbage");
        let t = transport(MockConnector::with_handler(move |_| response.clone()));
        let session = t
            .request(Method::Get, "https://cdn/x", "", None, &Context::silent())
            .unwrap();
        assert_eq!(session.prefetched(), b"abc");
        assert_eq!(session.read_string().unwrap(), "abc");
    }

    #[test]
    fn test_read_string_does_not_trust_declared_length() {
        // Declares the full limit but closes after a few bytes
        let t = transport(MockConnector::with_handler(|_| {
            format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{{}}",
                crate::config::DEFAULT_MAX_CONTENT_LENGTH
            )
            .into_bytes()
        }));
        let session = t
            .request(Method::Post, "https://api/x", "", Some("{}"), &Context::silent())
            .unwrap();
        assert_eq!(session.reserve_limit, 4096);
        assert_eq!(session.content_length(), crate::config::DEFAULT_MAX_CONTENT_LENGTH);
        assert!(matches!(
            session.read_string(),
            Err(UpdateError::Transport(_))
        ));
    }

    #[test]
    fn test_truncated_body_is_transport_failure() {
        let t = transport(MockConnector::with_handler(|_| {
            b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nshort".to_vec()
        }));
        let session = t
            .request(Method::Get, "https://cdn/x", "", None, &Context::silent())
            .unwrap();
        let err = session.read_string().unwrap_err();
        assert!(matches!(err, UpdateError::Transport(_)));
    }

    #[test]
    fn test_insecure_url_never_connects() {
        let connector = MockConnector::with_handler(|_| http_response(200, b"{}"));
        let log = connector.clone();
        let t = transport(connector);
        let err = t
            .request(Method::Get, "http://cdn/x.bin", "", None, &Context::silent())
            .unwrap_err();
        assert!(matches!(err, UpdateError::InsecureUrl(_)));
        assert_eq!(log.connections(), 0);
    }

    #[test]
    fn test_bad_status() {
        let t = transport(MockConnector::with_handler(|_| {
            b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n".to_vec()
        }));
        let err = t
            .request(Method::Post, "https://api/x", "", Some("{}"), &Context::silent())
            .unwrap_err();
        assert!(matches!(err, UpdateError::BadStatus { status: 403, .. }));
    }

    #[test]
    fn test_empty_response_is_malformed() {
        let t = transport(MockConnector::with_handler(|_| Vec::new()));
        let err = t
            .request(Method::Get, "https://cdn/x", "", None, &Context::silent())
            .unwrap_err();
        assert!(matches!(err, UpdateError::MalformedResponse(_)));
    }

    #[test]
    fn test_oversized_head_is_malformed() {
        let t = transport(MockConnector::with_handler(|_| {
            let mut raw = b"HTTP/1.1 200 OK\r\n".to_vec();
            raw.extend(std::iter::repeat(b'x').take(8192));
            raw
        }));
        let err = t
            .request(Method::Get, "https://cdn/x", "", None, &Context::silent())
            .unwrap_err();
        assert!(matches!(err, UpdateError::MalformedResponse(_)));
    }

    #[test]
    fn test_connection_released_on_error() {
        let connector = MockConnector::with_handler(|_| b"HTTP/1.1 500 Oops\r\n\r\n".to_vec());
        let log = connector.clone();
        let t = transport(connector);
        let _ = t.request(Method::Get, "https://cdn/x", "", None, &Context::silent());
        assert_eq!(log.connections(), 1);
        assert_eq!(log.open_streams(), 0);
    }
}

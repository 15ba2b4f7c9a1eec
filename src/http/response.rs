//! Framing of a single HTTP/1.1 response head.
//!
//! Everything here is a bounded pass over bytes already received: the
//! status line, a literal header lookup, and the header/body boundary.

use crate::error::{Result, UpdateError};

/// Status-line prefix every response must start with
pub const PROTOCOL_PREFIX: &[u8] = b"HTTP/1.1 ";
/// The only status this protocol treats as success
pub const STATUS_OK: u16 = 200;

const HEADER_END: &[u8] = b"\r\n\r\n";

/// Parsed response head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: u16,
    pub content_length: u64,
    /// Offset of the first body byte within the received buffer
    pub body_offset: usize,
}

/// Offset just past the blank line ending the headers, if present.
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_END.len())
        .position(|w| w == HEADER_END)
        .map(|i| i + HEADER_END.len())
}

/// Value of header `key`, matched literally as `"<key>:"`.
///
/// Leading whitespace is skipped and the value runs to the next CRLF. A
/// header line without a terminating CRLF is not matched.
pub fn header<'a>(head: &'a str, key: &str) -> Option<&'a str> {
    let needle = format!("{}:", key);
    let start = head.find(&needle)? + needle.len();
    let line = &head[start..];
    let end = line.find("\r\n")?;
    Some(line[..end].trim_start())
}

/// Parse the status line, header boundary and `Content-Length` from the
/// first bytes of a response.
pub fn parse_head(buf: &[u8], max_content_length: u64) -> Result<ResponseHead> {
    if !buf.starts_with(PROTOCOL_PREFIX) {
        return Err(UpdateError::MalformedResponse(lossy_prefix(buf)));
    }

    let status = parse_status(&buf[PROTOCOL_PREFIX.len()..])
        .ok_or_else(|| UpdateError::MalformedResponse(lossy_prefix(buf)))?;
    if status != STATUS_OK {
        return Err(UpdateError::BadStatus {
            status,
            head: String::from_utf8_lossy(buf).into_owned(),
        });
    }

    let body_offset = find_header_end(buf)
        .ok_or_else(|| UpdateError::MalformedResponse(lossy_prefix(buf)))?;

    // Keep the first CRLF of the blank line so every header ends in CRLF
    let head = std::str::from_utf8(&buf[..body_offset - 2]).map_err(|_| {
        UpdateError::MalformedResponse("response headers are not valid UTF-8".to_string())
    })?;

    let value = header(head, "Content-Length").ok_or(UpdateError::MissingContentLength)?;
    let digits = value.trim_end();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(UpdateError::InvalidContentLength(value.to_string()));
    }
    let content_length = digits
        .parse::<u64>()
        .map_err(|_| UpdateError::InvalidContentLength(value.to_string()))?;
    if content_length > max_content_length {
        return Err(UpdateError::InvalidContentLength(format!(
            "{} exceeds limit {}",
            content_length, max_content_length
        )));
    }

    Ok(ResponseHead {
        status,
        content_length,
        body_offset,
    })
}

/// Digits immediately after the status-line space
fn parse_status(rest: &[u8]) -> Option<u16> {
    let digits = rest.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 || digits > 3 {
        return None;
    }
    std::str::from_utf8(&rest[..digits]).ok()?.parse().ok()
}

fn lossy_prefix(buf: &[u8]) -> String {
    let end = buf.len().min(256);
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

//! Splitting `https://` URLs into connection endpoints.

use crate::error::{Result, UpdateError};

/// The only scheme the client will talk to
pub const SECURE_SCHEME: &str = "https://";

/// Where and what to request, parsed from an `https://` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name or IP literal, without brackets or port. Used for name
    /// resolution, SNI and certificate verification.
    pub host: String,
    pub port: u16,
    /// `host[:port]` exactly as written in the URL, for the `Host` header
    pub authority: String,
    /// Request path without the leading `/`; empty when the URL has none
    pub path: String,
}

/// Reject anything that is not an `https://` URL.
pub fn require_secure(url: &str) -> Result<&str> {
    url.strip_prefix(SECURE_SCHEME)
        .ok_or_else(|| UpdateError::InsecureUrl(url.to_string()))
}

impl Endpoint {
    /// Parse `url`, using `default_port` when the authority has none.
    pub fn parse(url: &str, default_port: u16) -> Result<Self> {
        let rest = require_secure(url)?;
        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i + 1..]),
            None => (rest, ""),
        };

        let (host, port) = split_authority(authority, default_port)?;
        if host.is_empty() {
            return Err(UpdateError::InvalidArgument(format!(
                "URL has no host: {}",
                url
            )));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            authority: authority.to_string(),
            path: path.to_string(),
        })
    }
}

fn split_authority(authority: &str, default_port: u16) -> Result<(&str, u16)> {
    // Bracketed IPv6 literal: [::1] or [::1]:8443
    if let Some(inner) = authority.strip_prefix('[') {
        let close = inner.find(']').ok_or_else(|| {
            UpdateError::InvalidArgument(format!("Unterminated IPv6 literal: {}", authority))
        })?;
        let host = &inner[..close];
        return match &inner[close + 1..] {
            "" => Ok((host, default_port)),
            tail => match tail.strip_prefix(':') {
                Some(port) => Ok((host, parse_port(port, authority)?)),
                None => Err(UpdateError::InvalidArgument(format!(
                    "Invalid authority: {}",
                    authority
                ))),
            },
        };
    }

    match authority.rsplit_once(':') {
        Some((host, port)) => Ok((host, parse_port(port, authority)?)),
        None => Ok((authority, default_port)),
    }
}

fn parse_port(port: &str, authority: &str) -> Result<u16> {
    match port.parse::<u16>() {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(UpdateError::InvalidArgument(format!(
            "Invalid port in {}",
            authority
        ))),
    }
}

//! TLS connections over blocking TCP sockets.
//!
//! - TLS 1.2 is the minimum protocol version
//! - the peer chain is verified against the system trust store (plus an
//!   optional extra PEM bundle)
//! - SNI carries the requested host name, and the certificate must match
//!   that name; rustls' webpki verifier rejects the handshake otherwise

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};

use crate::config::UpdaterConfig;
use crate::context::Context;
use crate::error::{Result, UpdateError};
use crate::http::{Connector, Endpoint, Stream};

/// Opens verified TLS connections. The client config is built once and
/// shared; every connection gets its own socket and TLS session.
#[derive(Clone)]
pub struct TlsConnector {
    config: Arc<ClientConfig>,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for TlsConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsConnector")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl TlsConnector {
    pub fn new(config: &UpdaterConfig) -> Result<Self> {
        let roots = root_store(config.ca_file.as_deref())?;
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let client = ClientConfig::builder_with_provider(provider)
            .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
            .map_err(|e| UpdateError::Transport(format!("Unable to create TLS context: {}", e)))?
            .with_root_certificates(roots)
            .with_no_client_auth();

        Ok(Self {
            config: Arc::new(client),
            timeout: config.io_timeout(),
        })
    }
}

/// System roots plus any certificates in `ca_file`.
fn root_store(ca_file: Option<&Path>) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();

    let native = rustls_native_certs::load_native_certs();
    for err in &native.errors {
        tracing::debug!("Skipping system CA source: {}", err);
    }
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    tracing::debug!("Loaded {} system CA certificates ({} ignored)", added, ignored);

    if let Some(path) = ca_file {
        let file = File::open(path).map_err(|e| {
            UpdateError::Transport(format!("Cannot open CA file {}: {}", path.display(), e))
        })?;
        let certs = rustls_pemfile::certs(&mut BufReader::new(file))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| {
                UpdateError::Transport(format!("Cannot parse CA file {}: {}", path.display(), e))
            })?;
        for cert in certs {
            roots.add(cert).map_err(|e| {
                UpdateError::Transport(format!("Invalid CA in {}: {}", path.display(), e))
            })?;
        }
    }

    if roots.is_empty() {
        return Err(UpdateError::Transport(
            "Cannot load system CA certificates".to_string(),
        ));
    }
    Ok(roots)
}

impl Connector for TlsConnector {
    fn connect(&self, endpoint: &Endpoint, ctx: &Context) -> Result<Box<dyn Stream>> {
        let addrs: Vec<SocketAddr> = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(|e| {
                UpdateError::Transport(format!("Cannot find host {}: {}", endpoint.host, e))
            })?
            .collect();
        let mut tcp = connect_any(&addrs, self.timeout, &endpoint.host)?;
        tcp.set_read_timeout(self.timeout)
            .and_then(|()| tcp.set_write_timeout(self.timeout))
            .map_err(|e| UpdateError::Transport(format!("Cannot configure socket: {}", e)))?;

        let server_name = ServerName::try_from(endpoint.host.clone()).map_err(|e| {
            UpdateError::Transport(format!("Invalid TLS server name {}: {}", endpoint.host, e))
        })?;
        let mut conn = ClientConnection::new(Arc::clone(&self.config), server_name)
            .map_err(|e| UpdateError::Transport(format!("Cannot create TLS session: {}", e)))?;

        while conn.is_handshaking() {
            conn.complete_io(&mut tcp).map_err(|e| {
                UpdateError::Transport(format!(
                    "TLS handshake with {} failed: {}",
                    endpoint.host, e
                ))
            })?;
        }
        // The client Finished may still be buffered
        while conn.wants_write() {
            conn.write_tls(&mut tcp).map_err(|e| {
                UpdateError::Transport(format!(
                    "TLS handshake with {} failed: {}",
                    endpoint.host, e
                ))
            })?;
        }
        ctx.trace(format_args!(
            "TLS {:?} established with {}",
            conn.protocol_version(),
            endpoint.host
        ));

        Ok(Box::new(TlsStream {
            inner: StreamOwned::new(conn, tcp),
        }))
    }
}

fn connect_any(addrs: &[SocketAddr], timeout: Option<Duration>, host: &str) -> Result<TcpStream> {
    let mut last_err = None;
    for addr in addrs {
        let attempt = match timeout {
            Some(t) => TcpStream::connect_timeout(addr, t),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(UpdateError::Transport(match last_err {
        Some(e) => format!("Error connecting to {}: {}", host, e),
        None => format!("Cannot find host {}", host),
    }))
}

/// A TLS session over its socket. Dropping it sends `close_notify` and
/// closes the socket.
struct TlsStream {
    inner: StreamOwned<ClientConnection, TcpStream>,
}

impl Read for TlsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl Write for TlsStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl Drop for TlsStream {
    fn drop(&mut self) {
        self.inner.conn.send_close_notify();
        while self.inner.conn.wants_write() {
            match self.inner.conn.write_tls(&mut self.inner.sock) {
                Ok(n) if n > 0 => {}
                _ => break,
            }
        }
    }
}

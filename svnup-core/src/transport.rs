//! Blocking byte transport.
//!
//! A `Transport` owns one connection at a time and can throw it away and
//! reconnect when an exchange fails. Connections are produced by a
//! `Connect` implementation: `TcpConnector` for real servers (optionally
//! wrapped in rustls for https), or an in-memory server in tests.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use tracing::debug;

use crate::buffer::ResponseBuffer;
use crate::config::{AddressFamily, SvnupConfig};
use crate::error::{Result, SvnupError};
use crate::url::{RepoUrl, Scheme};

/// A bidirectional byte stream.
pub trait Stream: Read + Write {}

impl<T: Read + Write> Stream for T {}

/// Factory for fresh connections to one server.
pub trait Connect {
    fn connect(&self) -> Result<Box<dyn Stream>>;

    /// Human-readable peer description for logs.
    fn describe(&self) -> String;
}

/// Connects over TCP, optionally wrapping the socket in TLS.
pub struct TcpConnector {
    host: String,
    port: u16,
    family: AddressFamily,
    timeout: Option<Duration>,
    tls: Option<Arc<ClientConfig>>,
}

impl TcpConnector {
    pub fn new(host: &str, port: u16, family: AddressFamily, timeout: Option<Duration>) -> Self {
        Self {
            host: host.to_string(),
            port,
            family,
            timeout,
            tls: None,
        }
    }

    /// Wrap every connection in TLS, verifying against the webpki roots.
    pub fn with_tls(mut self) -> Self {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        self.tls = Some(Arc::new(config));
        self
    }

    /// Connector for the server named by `url`.
    pub fn for_url(url: &RepoUrl, config: &SvnupConfig) -> Self {
        let connector = Self::new(&url.host, url.port, config.family, config.timeout());
        match url.scheme {
            Scheme::Https => connector.with_tls(),
            Scheme::Svn | Scheme::Http => connector,
        }
    }

    fn resolve(&self) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .filter(|addr| match self.family {
                AddressFamily::Any => true,
                AddressFamily::Ipv4 => addr.is_ipv4(),
                AddressFamily::Ipv6 => addr.is_ipv6(),
            })
            .collect();
        if addrs.is_empty() {
            return Err(SvnupError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no usable address for {}", self.host),
            )));
        }
        Ok(addrs)
    }

    fn open_tcp(&self) -> Result<TcpStream> {
        let mut last_err = None;
        for addr in self.resolve()? {
            let attempt = match self.timeout {
                Some(t) => TcpStream::connect_timeout(&addr, t),
                None => TcpStream::connect(addr),
            };
            match attempt {
                Ok(stream) => {
                    stream.set_read_timeout(self.timeout)?;
                    stream.set_write_timeout(self.timeout)?;
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => {
                    debug!("connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err
            .map(SvnupError::Io)
            .unwrap_or(SvnupError::ConnectionClosed))
    }
}

impl Connect for TcpConnector {
    fn connect(&self) -> Result<Box<dyn Stream>> {
        let tcp = self.open_tcp()?;
        match &self.tls {
            None => Ok(Box::new(tcp)),
            Some(config) => {
                let name = ServerName::try_from(self.host.clone())
                    .map_err(|e| SvnupError::Tls(format!("invalid server name: {e}")))?;
                let conn = ClientConnection::new(Arc::clone(config), name)
                    .map_err(|e| SvnupError::Tls(e.to_string()))?;
                Ok(Box::new(StreamOwned::new(conn, tcp)))
            }
        }
    }

    fn describe(&self) -> String {
        let scheme = if self.tls.is_some() { "tls" } else { "tcp" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

/// Owner of the current connection.
pub struct Transport {
    connector: Box<dyn Connect>,
    stream: Option<Box<dyn Stream>>,
    connections: u32,
}

impl Transport {
    pub fn new(connector: Box<dyn Connect>) -> Self {
        Self {
            connector,
            stream: None,
            connections: 0,
        }
    }

    /// Open a connection, dropping any existing one first.
    pub fn connect(&mut self) -> Result<()> {
        self.stream = None;
        let stream = self.connector.connect()?;
        self.connections += 1;
        debug!(
            "connected to {} (connection #{})",
            self.connector.describe(),
            self.connections
        );
        self.stream = Some(stream);
        Ok(())
    }

    pub fn close(&mut self) {
        self.stream = None;
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Number of connections opened so far.
    pub fn connections(&self) -> u32 {
        self.connections
    }

    pub fn send(&mut self, bytes: &[u8]) -> Result<()> {
        if self.stream.is_none() {
            self.connect()?;
        }
        let stream = self.stream.as_mut().ok_or(SvnupError::ConnectionClosed)?;
        stream.write_all(bytes)?;
        stream.flush()?;
        debug!("sent {} bytes", bytes.len());
        Ok(())
    }

    /// Read whatever is available into `buffer`.
    ///
    /// A closed connection is reported as `ConnectionClosed`; interrupted
    /// reads are repeated.
    pub fn receive(&mut self, buffer: &mut ResponseBuffer) -> Result<usize> {
        let stream = self.stream.as_mut().ok_or(SvnupError::ConnectionClosed)?;
        loop {
            match buffer.fill_from(|spare| stream.read(spare)) {
                Ok(0) => return Err(SvnupError::ConnectionClosed),
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

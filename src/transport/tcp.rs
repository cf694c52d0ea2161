//! Network stream transport (`tcp://host:port`).
//!
//! Symbolic host names are resolved before binding. A name that resolves to
//! nothing fails the listen with `ResolutionFailed`; there is no fallback
//! address. The listener keeps reporting the host the caller asked for, not
//! the resolved literal.

use std::io;
use std::net::{IpAddr, SocketAddr};

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument};
use url::{Host, Url};

use crate::error::{constants, ProtocolError, Result};
use crate::transport::{Connection, Listener, PendingConnections, TransportFactory, TransportOptions};

/// Factory for the `tcp` scheme
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

#[async_trait]
impl TransportFactory for TcpTransport {
    fn create_listener(&self, options: TransportOptions) -> Box<dyn Listener> {
        Box::new(TcpServer::new(options))
    }

    #[instrument(skip(self, address, options), fields(address = %address))]
    async fn connect(&self, address: &Url, options: TransportOptions) -> Result<Connection> {
        let target = resolve(address).await?;
        let stream = TcpStream::connect(target).await?;
        stream.set_nodelay(true)?;
        debug!(peer = %target, "Connected to tcp endpoint");
        Ok(Connection::new(stream, target.to_string(), options.codec()).with_options(&options))
    }
}

/// Resolve a `tcp://` URL to one socket address.
///
/// Literal addresses are used directly; names go through the system resolver
/// and the first result wins.
pub async fn resolve(address: &Url) -> Result<SocketAddr> {
    let port = address
        .port()
        .ok_or_else(|| ProtocolError::InvalidAddress(constants::ERR_MISSING_PORT.to_string()))?;
    let host = address
        .host()
        .ok_or_else(|| ProtocolError::InvalidAddress(constants::ERR_MISSING_HOST.to_string()))?;

    let ip = match host {
        Host::Ipv4(ip) => IpAddr::V4(ip),
        Host::Ipv6(ip) => IpAddr::V6(ip),
        Host::Domain(name) => match name.parse::<IpAddr>() {
            Ok(ip) => ip,
            Err(_) => resolve_name(name, port).await?,
        },
    };
    Ok(SocketAddr::new(ip, port))
}

async fn resolve_name(name: &str, port: u16) -> Result<IpAddr> {
    let mut addresses = tokio::net::lookup_host((name, port))
        .await
        .map_err(|e| {
            debug!(host = name, error = %e, "Host lookup failed");
            ProtocolError::ResolutionFailed(name.to_string())
        })?;
    let resolved = addresses
        .next()
        .ok_or_else(|| ProtocolError::ResolutionFailed(name.to_string()))?;
    debug!(host = name, resolved = %resolved.ip(), "Resolved host");
    Ok(resolved.ip())
}

pub struct TcpServer {
    options: TransportOptions,
    pending: Option<PendingConnections>,
    requested: Option<Url>,
    local_addr: Option<SocketAddr>,
    last_error: Option<io::ErrorKind>,
}

impl TcpServer {
    pub fn new(options: TransportOptions) -> Self {
        Self {
            options,
            pending: None,
            requested: None,
            local_addr: None,
            last_error: None,
        }
    }

    /// The concrete bound socket address
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

#[async_trait]
impl Listener for TcpServer {
    #[instrument(skip(self, address), fields(address = %address))]
    async fn listen(&mut self, address: &Url) -> Result<()> {
        self.close();

        let target = match resolve(address).await {
            Ok(target) => target,
            Err(e) => {
                self.last_error = Some(io::ErrorKind::NotFound);
                return Err(e);
            }
        };

        let listener = TcpListener::bind(target).await.map_err(|e| {
            self.last_error = Some(e.kind());
            ProtocolError::BindFailed {
                address: address.to_string(),
                source: e,
            }
        })?;
        let local_addr = listener.local_addr()?;
        self.last_error = None;
        info!(address = %local_addr, "Listening on tcp socket");

        let (tx, rx) = mpsc::channel(self.options.pending_capacity);
        let options = self.options;
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                        }
                        info!(peer = %peer, "New connection established");
                        let connection = Connection::new(stream, peer.to_string(), options.codec())
                            .with_options(&options);
                        if tx.send(connection).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                    }
                }
            }
        });

        self.pending = Some(PendingConnections::new(rx, task));
        self.requested = Some(address.clone());
        self.local_addr = Some(local_addr);
        Ok(())
    }

    fn is_listening(&self) -> bool {
        self.pending.is_some()
    }

    fn has_pending_connections(&self) -> bool {
        self.pending.as_ref().is_some_and(PendingConnections::has_pending)
    }

    fn next_pending_connection(&mut self) -> Option<Connection> {
        self.pending.as_mut()?.try_next()
    }

    async fn accept(&mut self) -> Option<Connection> {
        self.pending.as_mut()?.next().await
    }

    /// The requested URL; a requested port of 0 is replaced by the bound port
    fn address(&self) -> Option<Url> {
        let mut url = self.requested.clone()?;
        if url.port() == Some(0) {
            if let Some(bound) = self.local_addr {
                // Only fails for URLs without a host, which never bind
                let _ = url.set_port(Some(bound.port()));
            }
        }
        Some(url)
    }

    fn server_error(&self) -> Option<io::ErrorKind> {
        self.last_error
    }

    fn close(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.shutdown();
            self.local_addr = None;
        }
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.close();
    }
}

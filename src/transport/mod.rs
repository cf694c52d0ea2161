//! # Transport Layer
//!
//! Scheme-addressed duplex byte-stream transports.
//!
//! A [`TransportRegistry`] maps URL schemes to [`TransportFactory`]
//! implementations. Each factory produces [`Listener`]s for the accepting side
//! and outgoing [`Connection`]s for the connecting side, so both sides share one
//! addressing scheme.
//!
//! ## Built-in Transports
//! - `local:<endpoint>`: local-domain sockets (Unix only)
//! - `tcp://host:port`: network stream sockets, host names resolved before binding
//!
//! ## Accepting
//! A listening transport accepts in a background task and queues the resulting
//! connections; callers either poll with `has_pending_connections` /
//! `next_pending_connection` or await `accept`.

pub mod connection;
#[cfg(unix)]
pub mod local;
pub mod tcp;

pub use connection::{ByteStream, Connection};

use std::collections::HashMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

use crate::config::{NetworkConfig, MAX_PAYLOAD_SIZE, TCP_SCHEME};
use crate::core::codec::PacketCodec;
use crate::error::{ProtocolError, Result};
use crate::utils::metrics::global_metrics;
use crate::utils::timeout::{self, with_timeout_error};

/// Accepted connections buffered before a caller picks them up
pub const DEFAULT_PENDING_CAPACITY: usize = 32;

/// Settings shared by every transport created from one registry
#[derive(Debug, Clone, Copy)]
pub struct TransportOptions {
    pub max_frame_size: usize,
    pub pending_capacity: usize,
    /// Bound on an outgoing connection attempt
    pub connect_timeout: Duration,
    /// Default wait for an invocation reply
    pub response_timeout: Duration,
    /// Idle time after which a served connection is pinged
    pub heartbeat_interval: Duration,
    /// Bound on the graceful shutdown of a connection
    pub shutdown_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_PAYLOAD_SIZE,
            pending_capacity: DEFAULT_PENDING_CAPACITY,
            connect_timeout: timeout::DEFAULT_TIMEOUT,
            response_timeout: timeout::RESPONSE_TIMEOUT,
            heartbeat_interval: timeout::KEEPALIVE_INTERVAL,
            shutdown_timeout: timeout::SHUTDOWN_TIMEOUT,
        }
    }
}

impl TransportOptions {
    pub fn from_config(config: &NetworkConfig) -> Self {
        Self {
            max_frame_size: config.transport.max_payload_size,
            pending_capacity: config.server.max_pending_connections.max(1),
            connect_timeout: config.client.connection_timeout,
            response_timeout: config.client.response_timeout,
            heartbeat_interval: config.client.heartbeat_interval,
            shutdown_timeout: config.server.shutdown_timeout,
        }
    }

    pub fn codec(&self) -> PacketCodec {
        PacketCodec::with_max_frame_size(self.max_frame_size)
    }
}

/// Accepting side of a transport bound to one address
#[async_trait]
pub trait Listener: Send {
    /// Bind to `address` and start accepting.
    ///
    /// # Errors
    /// `ResolutionFailed` when a host name resolves to nothing, `BindFailed`
    /// when the address cannot be bound, `InvalidAddress` for malformed URLs.
    async fn listen(&mut self, address: &Url) -> Result<()>;

    fn is_listening(&self) -> bool;

    fn has_pending_connections(&self) -> bool;

    /// Take one accepted connection without waiting
    fn next_pending_connection(&mut self) -> Option<Connection>;

    /// Wait for the next accepted connection; `None` once closed
    async fn accept(&mut self) -> Option<Connection>;

    /// The address as the caller should see it
    fn address(&self) -> Option<Url>;

    /// Kind of the last listen failure
    fn server_error(&self) -> Option<io::ErrorKind>;

    /// Stop accepting. Calling this more than once is harmless.
    fn close(&mut self);
}

/// Creates listeners and outgoing connections for one URL scheme
#[async_trait]
pub trait TransportFactory: Send + Sync {
    fn create_listener(&self, options: TransportOptions) -> Box<dyn Listener>;

    async fn connect(&self, address: &Url, options: TransportOptions) -> Result<Connection>;
}

/// Scheme → transport table
pub struct TransportRegistry {
    factories: HashMap<String, Arc<dyn TransportFactory>>,
    options: TransportOptions,
}

impl Default for TransportRegistry {
    fn default() -> Self {
        Self::with_defaults(TransportOptions::default())
    }
}

impl TransportRegistry {
    /// An empty registry
    pub fn new(options: TransportOptions) -> Self {
        Self {
            factories: HashMap::new(),
            options,
        }
    }

    /// A registry with the built-in `local` and `tcp` transports
    pub fn with_defaults(options: TransportOptions) -> Self {
        let mut registry = Self::new(options);
        #[cfg(unix)]
        registry.register_transport(crate::config::LOCAL_SCHEME, Arc::new(local::LocalTransport));
        registry.register_transport(TCP_SCHEME, Arc::new(tcp::TcpTransport));
        registry
    }

    pub fn from_config(config: &NetworkConfig) -> Self {
        Self::with_defaults(TransportOptions::from_config(config))
    }

    pub fn register_transport(&mut self, scheme: &str, factory: Arc<dyn TransportFactory>) {
        debug!(scheme, "Registered transport");
        self.factories.insert(scheme.to_string(), factory);
    }

    pub fn supports(&self, scheme: &str) -> bool {
        self.factories.contains_key(scheme)
    }

    pub fn options(&self) -> TransportOptions {
        self.options
    }

    fn factory(&self, address: &Url) -> Result<&Arc<dyn TransportFactory>> {
        self.factories
            .get(address.scheme())
            .ok_or_else(|| ProtocolError::UnknownScheme(address.scheme().to_string()))
    }

    /// Create an unbound listener for the scheme of `address`
    pub fn create_listener(&self, address: &Url) -> Result<Box<dyn Listener>> {
        Ok(self.factory(address)?.create_listener(self.options))
    }

    /// Create a listener and bind it to `address`
    pub async fn listen(&self, address: &Url) -> Result<Box<dyn Listener>> {
        let mut listener = self.create_listener(address)?;
        listener.listen(address).await?;
        Ok(listener)
    }

    /// Open an outgoing connection to `address`.
    ///
    /// # Errors
    /// `Timeout` when the attempt takes longer than the configured
    /// connect timeout.
    pub async fn connect(&self, address: &Url) -> Result<Connection> {
        let factory = self.factory(address)?;
        with_timeout_error(
            self.options.connect_timeout,
            factory.connect(address, self.options),
        )
        .await
    }
}

/// Parse a textual address, reporting `InvalidAddress` on failure
pub fn parse_address(address: &str) -> Result<Url> {
    Url::parse(address).map_err(|e| ProtocolError::InvalidAddress(format!("{address}: {e}")))
}

/// Background accept loop feeding a bounded queue
pub(crate) struct PendingConnections {
    queue: mpsc::Receiver<Connection>,
    task: JoinHandle<()>,
}

impl PendingConnections {
    pub(crate) fn new(queue: mpsc::Receiver<Connection>, task: JoinHandle<()>) -> Self {
        Self { queue, task }
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    pub(crate) fn try_next(&mut self) -> Option<Connection> {
        self.queue.try_recv().ok()
    }

    pub(crate) async fn next(&mut self) -> Option<Connection> {
        self.queue.recv().await
    }

    /// Stop the accept loop; queued but unclaimed connections are dropped
    pub(crate) fn shutdown(mut self) {
        self.task.abort();
        self.queue.close();
        while let Ok(mut connection) = self.queue.try_recv() {
            connection.release();
        }
        info!("Accept loop stopped");
        global_metrics().log_metrics();
    }
}

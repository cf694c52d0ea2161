//! Local-domain socket transport (`local:<endpoint>`).
//!
//! Relative endpoint names live in the system temp directory; absolute paths
//! are used as given. A stale socket file left by a previous process blocks
//! binding, so any file at the endpoint path is removed before binding.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

use crate::config::LOCAL_SCHEME;
use crate::error::{constants, ProtocolError, Result};
use crate::transport::{Connection, Listener, PendingConnections, TransportFactory, TransportOptions};

/// Factory for the `local` scheme
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTransport;

#[async_trait]
impl TransportFactory for LocalTransport {
    fn create_listener(&self, options: TransportOptions) -> Box<dyn Listener> {
        Box::new(LocalListener::new(options))
    }

    #[instrument(skip(self, address, options), fields(address = %address))]
    async fn connect(&self, address: &Url, options: TransportOptions) -> Result<Connection> {
        let (name, path) = endpoint(address)?;
        let stream = UnixStream::connect(&path).await?;
        debug!(endpoint = %name, "Connected to local endpoint");
        Ok(Connection::new(stream, name, options.codec()).with_options(&options))
    }
}

/// Endpoint name and socket path for a `local:` URL.
///
/// Both `local:name` and `local://name` are accepted.
pub fn endpoint(address: &Url) -> Result<(String, PathBuf)> {
    let name = match address.host_str() {
        Some(host) if !host.is_empty() => format!("{host}{}", address.path()),
        _ => address.path().to_string(),
    };
    if name.is_empty() {
        return Err(ProtocolError::InvalidAddress(
            constants::ERR_EMPTY_ENDPOINT.to_string(),
        ));
    }
    let path = if Path::new(&name).is_absolute() {
        PathBuf::from(&name)
    } else {
        std::env::temp_dir().join(&name)
    };
    Ok((name, path))
}

pub struct LocalListener {
    options: TransportOptions,
    pending: Option<PendingConnections>,
    server_name: Option<String>,
    socket_path: Option<PathBuf>,
    last_error: Option<io::ErrorKind>,
}

impl LocalListener {
    pub fn new(options: TransportOptions) -> Self {
        Self {
            options,
            pending: None,
            server_name: None,
            socket_path: None,
            last_error: None,
        }
    }

    /// Filesystem path of the bound socket
    pub fn socket_path(&self) -> Option<&Path> {
        self.socket_path.as_deref()
    }
}

async fn remove_stale_endpoint(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed stale endpoint file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove stale endpoint file"),
    }
}

#[async_trait]
impl Listener for LocalListener {
    #[instrument(skip(self, address), fields(address = %address))]
    async fn listen(&mut self, address: &Url) -> Result<()> {
        self.close();
        let (name, path) = endpoint(address)?;

        remove_stale_endpoint(&path).await;

        let listener = UnixListener::bind(&path).map_err(|e| {
            self.last_error = Some(e.kind());
            ProtocolError::BindFailed {
                address: address.to_string(),
                source: e,
            }
        })?;
        self.last_error = None;
        info!(path = %path.display(), "Listening on local socket");

        let (tx, rx) = mpsc::channel(self.options.pending_capacity);
        let options = self.options;
        let peer_name = name.clone();
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, _)) => {
                        let connection = Connection::new(stream, peer_name.clone(), options.codec())
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
        self.server_name = Some(name);
        self.socket_path = Some(path);
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

    fn address(&self) -> Option<Url> {
        let name = self.server_name.as_ref()?;
        Url::parse(&format!("{LOCAL_SCHEME}:{name}")).ok()
    }

    fn server_error(&self) -> Option<io::ErrorKind> {
        self.last_error
    }

    fn close(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        pending.shutdown();
        if let Some(path) = self.socket_path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                error!(error = %e, path = %path.display(), "Failed to remove socket file");
            } else {
                info!(path = %path.display(), "Removed socket file");
            }
        }
    }
}

impl Drop for LocalListener {
    fn drop(&mut self) {
        self.close();
    }
}

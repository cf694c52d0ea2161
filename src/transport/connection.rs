//! # Connection
//!
//! One ordered, reliable duplex byte stream carrying framed packets.
//!
//! A `Connection` exclusively owns its socket. The socket is released exactly
//! once: on the first local [`Connection::close`], when the peer closes
//! (observed by [`Connection::receive`] returning `None`), or on drop,
//! whichever comes first.

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use crate::core::codec::PacketCodec;
use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};
use crate::transport::TransportOptions;
use crate::utils::metrics::global_metrics;
use crate::utils::timeout::{with_timeout, SHUTDOWN_TIMEOUT};

/// Any duplex stream a transport can hand over
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> ByteStream for T {}

type FramedStream = Framed<Box<dyn ByteStream>, PacketCodec>;

pub struct Connection {
    framed: Option<FramedStream>,
    peer: String,
    heartbeat: Option<Duration>,
    shutdown_timeout: Duration,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("open", &self.is_open())
            .finish()
    }
}

impl Connection {
    pub fn new<S: ByteStream + 'static>(
        stream: S,
        peer: impl Into<String>,
        codec: PacketCodec,
    ) -> Self {
        let peer = peer.into();
        global_metrics().connection_opened();
        debug!(peer = %peer, "Connection opened");
        let stream: Box<dyn ByteStream> = Box::new(stream);
        Self {
            framed: Some(Framed::new(stream, codec)),
            peer,
            heartbeat: None,
            shutdown_timeout: SHUTDOWN_TIMEOUT,
        }
    }

    /// Apply the heartbeat and shutdown bounds from `options`
    pub fn with_options(self, options: &TransportOptions) -> Self {
        self.with_heartbeat(Some(options.heartbeat_interval))
            .with_shutdown_timeout(options.shutdown_timeout)
    }

    /// Ping the peer after this much idle time while the connection is served
    pub fn with_heartbeat(mut self, interval: Option<Duration>) -> Self {
        self.heartbeat = interval.filter(|d| !d.is_zero());
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat
    }

    /// Description of the remote end
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn is_open(&self) -> bool {
        self.framed.is_some()
    }

    /// Write one finished frame
    pub async fn send(&mut self, frame: Bytes) -> Result<()> {
        let framed = self.framed.as_mut().ok_or(ProtocolError::ConnectionClosed)?;
        let len = frame.len() as u64;
        framed.send(frame).await?;
        global_metrics().packet_sent(len);
        Ok(())
    }

    /// Write a decoded packet, re-framing it
    pub async fn send_packet(&mut self, packet: Packet) -> Result<()> {
        self.send(packet.to_bytes()).await
    }

    /// Wait for the next complete packet.
    ///
    /// Returns `None` once the peer has closed the stream (or after a local
    /// close); the socket is released at that point. Partial frames are kept
    /// across calls.
    pub async fn receive(&mut self) -> Option<Result<Packet>> {
        let framed = self.framed.as_mut()?;
        match framed.next().await {
            Some(Ok(packet)) => {
                global_metrics().packet_received(packet.frame_len() as u64);
                Some(Ok(packet))
            }
            Some(Err(e)) => {
                if e.is_decode_error() {
                    global_metrics().decode_error();
                }
                Some(Err(e))
            }
            None => {
                info!(peer = %self.peer, "Peer closed connection");
                self.release();
                None
            }
        }
    }

    /// Flush and shut the stream down, waiting at most the shutdown timeout.
    /// Closing an already closed connection is a no-op.
    pub async fn close(&mut self) -> Result<()> {
        let Some(mut framed) = self.framed.take() else {
            return Ok(());
        };
        match with_timeout(self.shutdown_timeout, SinkExt::<Bytes>::close(&mut framed)).await {
            Ok(Ok(())) => {}
            // The peer may already be gone
            Ok(Err(e)) => debug!(peer = %self.peer, error = %e, "Shutdown after peer close"),
            Err(_) => warn!(peer = %self.peer, "Graceful shutdown timed out, dropping stream"),
        }
        global_metrics().connection_closed();
        info!(peer = %self.peer, "Connection closed");
        Ok(())
    }

    /// Drop the socket without a graceful shutdown
    pub(crate) fn release(&mut self) {
        if self.framed.take().is_some() {
            global_metrics().connection_closed();
            debug!(peer = %self.peer, "Connection released");
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.release();
    }
}

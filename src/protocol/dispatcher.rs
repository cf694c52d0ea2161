//! Packet dispatch for one connection.
//!
//! Each packet type maps to an ordered list of handlers. Handlers run
//! synchronously, in registration order, while the connection's packet is
//! being processed; any frames they return are sent back before the next
//! packet is read. A connection with a heartbeat interval is pinged whenever
//! it stays idle that long.

use std::collections::HashMap;

use bytes::Bytes;
use tracing::{debug, instrument, warn};

use crate::core::packet::{Packet, PacketType, PacketWriter};
use crate::error::{ProtocolError, Result};
use crate::protocol::packets::{serialize_ping_packet, serialize_pong_packet};
use crate::transport::Connection;

type HandlerFn = dyn FnMut(&Packet) -> Result<Option<Bytes>> + Send + 'static;

/// Packet type → ordered handler table
#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<PacketType, Vec<Box<HandlerFn>>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut registered: Vec<_> = self
            .handlers
            .iter()
            .map(|(ty, list)| (ty.name(), list.len()))
            .collect();
        registered.sort_unstable();
        f.debug_struct("Dispatcher")
            .field("handlers", &registered)
            .finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to the list for `packet_type`
    pub fn register<F>(&mut self, packet_type: PacketType, handler: F)
    where
        F: FnMut(&Packet) -> Result<Option<Bytes>> + Send + 'static,
    {
        self.handlers
            .entry(packet_type)
            .or_default()
            .push(Box::new(handler));
    }

    /// Answer every `Ping` with a `Pong` for the same name
    pub fn respond_to_pings(&mut self) {
        let mut writer = PacketWriter::new();
        self.register(PacketType::Ping, move |packet| {
            Ok(Some(serialize_pong_packet(&mut writer, &packet.name)))
        });
    }

    pub fn handler_count(&self, packet_type: PacketType) -> usize {
        self.handlers.get(&packet_type).map_or(0, Vec::len)
    }

    /// Run every handler for `packet` and collect their replies.
    ///
    /// # Errors
    /// `UnexpectedMessage` when nothing handles the packet type; otherwise the
    /// first handler error, after which later handlers do not run.
    pub fn dispatch(&mut self, packet: &Packet) -> Result<Vec<Bytes>> {
        let handlers = self
            .handlers
            .get_mut(&packet.packet_type)
            .filter(|list| !list.is_empty())
            .ok_or(ProtocolError::UnexpectedMessage)?;

        let mut replies = Vec::new();
        for handler in handlers.iter_mut() {
            if let Some(reply) = handler(packet)? {
                replies.push(reply);
            }
        }
        Ok(replies)
    }
}

/// Process packets from `connection` until the peer closes it.
///
/// Unhandled packet types are skipped. Malformed input closes the connection
/// and is returned as the error; so is any other handler failure.
#[instrument(skip(connection, dispatcher), fields(peer = %connection.peer()))]
pub async fn serve_connection(connection: &mut Connection, dispatcher: &mut Dispatcher) -> Result<()> {
    let mut heartbeat = PacketWriter::new();
    loop {
        let next = match connection.heartbeat_interval() {
            Some(interval) => match tokio::time::timeout(interval, connection.receive()).await {
                Ok(next) => next,
                Err(_) => {
                    debug!("Connection idle, sending heartbeat");
                    connection.send(serialize_ping_packet(&mut heartbeat, "")).await?;
                    continue;
                }
            },
            None => connection.receive().await,
        };
        let Some(frame) = next else {
            break;
        };
        let outcome = frame.and_then(|packet| {
            debug!(
                packet_type = packet.packet_type.name(),
                name = %packet.name,
                len = packet.payload.len(),
                "Dispatching packet"
            );
            dispatcher.dispatch(&packet).map(|replies| (packet, replies))
        });

        match outcome {
            Ok((_, replies)) => {
                for reply in replies {
                    connection.send(reply).await?;
                }
            }
            Err(ProtocolError::UnexpectedMessage) => {
                debug!("No handler registered, packet dropped");
            }
            Err(e) => {
                if e.is_decode_error() {
                    warn!(error = %e, "Malformed packet, closing connection");
                } else {
                    warn!(error = %e, "Packet handler failed, closing connection");
                }
                connection.close().await?;
                return Err(e);
            }
        }
    }
    debug!("Connection finished");
    Ok(())
}

//! Protocol version exchange.
//!
//! The accepting side opens every connection with a `Handshake` packet
//! carrying its protocol version string. A receiver whose own version differs
//! must drop the connection; [`expect_handshake`] does so and reports
//! `VersionMismatch`.

use bytes::Bytes;
use tracing::{info, instrument, warn};

use crate::config::PROTOCOL_VERSION;
use crate::core::packet::{PacketType, PacketWriter};
use crate::core::stream::DataReader;
use crate::error::{ProtocolError, Result};
use crate::transport::Connection;

pub fn serialize_handshake_packet(writer: &mut PacketWriter, version: &str) -> Bytes {
    writer.begin(PacketType::Handshake, "");
    writer.write_string(version);
    writer.finish()
}

/// Returns the carried protocol version
pub fn deserialize_handshake_packet(reader: &mut DataReader<'_>) -> Result<String> {
    reader.read_string()
}

pub fn verify_protocol_version(received: &str) -> Result<()> {
    if received == PROTOCOL_VERSION {
        Ok(())
    } else {
        Err(ProtocolError::VersionMismatch {
            expected: PROTOCOL_VERSION.to_string(),
            received: received.to_string(),
        })
    }
}

/// Announce this side's protocol version
#[instrument(skip(connection), fields(peer = %connection.peer()))]
pub async fn send_handshake(connection: &mut Connection) -> Result<()> {
    let mut writer = PacketWriter::new();
    connection
        .send(serialize_handshake_packet(&mut writer, PROTOCOL_VERSION))
        .await
}

/// Wait for the peer's handshake and check its version.
///
/// The connection is closed on a version mismatch or when the first packet
/// is not a handshake.
#[instrument(skip(connection), fields(peer = %connection.peer()))]
pub async fn expect_handshake(connection: &mut Connection) -> Result<String> {
    let packet = connection
        .receive()
        .await
        .ok_or(ProtocolError::ConnectionClosed)??;

    if packet.packet_type != PacketType::Handshake {
        warn!(packet_type = packet.packet_type.name(), "Expected handshake");
        connection.close().await?;
        return Err(ProtocolError::UnexpectedMessage);
    }

    let version = deserialize_handshake_packet(&mut packet.reader())?;
    if let Err(e) = verify_protocol_version(&version) {
        warn!(received = %version, expected = PROTOCOL_VERSION, "Protocol version mismatch");
        connection.close().await?;
        return Err(e);
    }
    info!(version = %version, "Handshake accepted");
    Ok(version)
}

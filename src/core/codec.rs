//! # Packet Codec
//!
//! `tokio_util` framing for packets over any duplex byte stream.
//!
//! The decoder is resumable: a partial frame stays in the read buffer until a
//! later read completes it, and bytes belonging to the next frame are left in
//! place. Frames longer than the configured maximum are rejected before any
//! allocation.

use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::trace;

use crate::config::MAX_PAYLOAD_SIZE;
use crate::core::packet::{Packet, LENGTH_PREFIX_LEN};
use crate::error::{ProtocolError, Result};

#[derive(Debug, Clone, Copy)]
pub struct PacketCodec {
    max_frame_size: usize,
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_PAYLOAD_SIZE,
        }
    }
}

impl PacketCodec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        if src.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }

        let mut len_bytes = [0u8; LENGTH_PREFIX_LEN];
        len_bytes.copy_from_slice(&src[..LENGTH_PREFIX_LEN]);
        let body_len = u32::from_be_bytes(len_bytes) as usize;

        if body_len > self.max_frame_size {
            return Err(ProtocolError::OversizedPacket(body_len));
        }

        let frame_len = LENGTH_PREFIX_LEN + body_len;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        let frame = src.split_to(frame_len);
        let packet = Packet::from_body(&frame[LENGTH_PREFIX_LEN..])?;
        trace!(
            packet_type = packet.packet_type.name(),
            target = %packet.name,
            bytes = frame_len,
            "Decoded frame"
        );
        Ok(Some(packet))
    }
}

/// Finished frames from a [`crate::core::packet::PacketWriter`] go out as-is
impl Encoder<Bytes> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Bytes, dst: &mut BytesMut) -> Result<()> {
        if frame.len() < LENGTH_PREFIX_LEN {
            return Err(ProtocolError::DecodeTruncated(
                crate::error::constants::CTX_FRAME_HEADER,
            ));
        }
        let body_len = frame.len() - LENGTH_PREFIX_LEN;
        if body_len > self.max_frame_size {
            return Err(ProtocolError::OversizedPacket(body_len));
        }
        dst.extend_from_slice(&frame);
        Ok(())
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = ProtocolError;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<()> {
        let frame = packet.to_bytes();
        Encoder::<Bytes>::encode(self, frame, dst)
    }
}

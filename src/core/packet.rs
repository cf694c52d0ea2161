//! # Packet Framing
//!
//! Every packet on the wire is a single length-prefixed frame:
//!
//! ```text
//! [Length(4)] [TypeId(1)] [TargetName(4 + N)] [Payload(M)]
//! ```
//!
//! `Length` counts every byte after itself. Payload size is only known once
//! serialization completes, so a [`PacketWriter`] reserves the length slot,
//! accumulates the whole packet and patches the length in
//! [`PacketWriter::finish`].

use std::ops::{Deref, DerefMut};

use bytes::{Bytes, BytesMut};

use crate::core::stream::{DataReader, DataStream};
use crate::error::{ProtocolError, Result};

/// Size of the length prefix
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Closed set of packet kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Handshake = 1,
    InitPacket = 2,
    InitDynamicPacket = 3,
    AddObject = 4,
    RemoveObject = 5,
    InvokePacket = 6,
    InvokeReplyPacket = 7,
    PropertyChangePacket = 8,
    ObjectList = 9,
    Ping = 10,
    Pong = 11,
}

impl PacketType {
    pub const ALL: [PacketType; 11] = [
        PacketType::Handshake,
        PacketType::InitPacket,
        PacketType::InitDynamicPacket,
        PacketType::AddObject,
        PacketType::RemoveObject,
        PacketType::InvokePacket,
        PacketType::InvokeReplyPacket,
        PacketType::PropertyChangePacket,
        PacketType::ObjectList,
        PacketType::Ping,
        PacketType::Pong,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            PacketType::Handshake => "Handshake",
            PacketType::InitPacket => "InitPacket",
            PacketType::InitDynamicPacket => "InitDynamicPacket",
            PacketType::AddObject => "AddObject",
            PacketType::RemoveObject => "RemoveObject",
            PacketType::InvokePacket => "InvokePacket",
            PacketType::InvokeReplyPacket => "InvokeReplyPacket",
            PacketType::PropertyChangePacket => "PropertyChangePacket",
            PacketType::ObjectList => "ObjectList",
            PacketType::Ping => "Ping",
            PacketType::Pong => "Pong",
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(id: u8) -> Result<Self> {
        PacketType::ALL
            .iter()
            .copied()
            .find(|t| t.id() == id)
            .ok_or(ProtocolError::InvalidPacketType(id))
    }
}

/// Builds one framed packet at a time.
///
/// Payload values are appended through the [`DataStream`] this writer derefs to.
#[derive(Debug, Default)]
pub struct PacketWriter {
    stream: DataStream,
}

impl PacketWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a packet, discarding anything not yet finished
    pub fn begin(&mut self, packet_type: PacketType, target_name: &str) {
        self.stream.clear();
        self.stream.write_u32(0);
        self.stream.write_u8(packet_type.id());
        self.stream.write_string(target_name);
    }

    /// Patch the length prefix and hand out the complete frame.
    ///
    /// The writer is left empty and can begin the next packet. Without a
    /// preceding `begin` there is no header to patch and the frame is empty.
    pub fn finish(&mut self) -> Bytes {
        let buf: &mut BytesMut = self.stream.buf_mut();
        if buf.len() < LENGTH_PREFIX_LEN {
            buf.clear();
            return Bytes::new();
        }
        let body_len = buf.len().saturating_sub(LENGTH_PREFIX_LEN) as u32;
        buf[..LENGTH_PREFIX_LEN].copy_from_slice(&body_len.to_be_bytes());
        buf.split().freeze()
    }
}

impl Deref for PacketWriter {
    type Target = DataStream;

    fn deref(&self) -> &Self::Target {
        &self.stream
    }
}

impl DerefMut for PacketWriter {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.stream
    }
}

/// A decoded frame: type, target and the still-encoded payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub packet_type: PacketType,
    pub name: String,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(packet_type: PacketType, name: impl Into<String>, payload: Bytes) -> Self {
        Self {
            packet_type,
            name: name.into(),
            payload,
        }
    }

    /// Decode a frame body (everything after the length prefix)
    pub fn from_body(body: &[u8]) -> Result<Self> {
        let mut reader = DataReader::new(body);
        let packet_type = PacketType::try_from(reader.read_u8()?)?;
        let name = reader.read_string()?;
        let payload = Bytes::copy_from_slice(reader.rest());
        Ok(Self {
            packet_type,
            name,
            payload,
        })
    }

    /// Decode a complete frame including its length prefix
    pub fn from_bytes(frame: &[u8]) -> Result<Self> {
        let mut reader = DataReader::new(frame);
        let len = reader.read_u32()? as usize;
        if reader.remaining() < len {
            return Err(ProtocolError::DecodeTruncated(
                crate::error::constants::CTX_FRAME_HEADER,
            ));
        }
        Self::from_body(&reader.rest()[..len])
    }

    /// Re-frame this packet
    pub fn to_bytes(&self) -> Bytes {
        let mut writer = PacketWriter::new();
        writer.begin(self.packet_type, &self.name);
        writer.write_raw(&self.payload);
        writer.finish()
    }

    /// Size of this packet's frame on the wire, length prefix included
    pub fn frame_len(&self) -> usize {
        LENGTH_PREFIX_LEN + 1 + 4 + self.name.len() + self.payload.len()
    }

    pub fn reader(&self) -> DataReader<'_> {
        DataReader::new(&self.payload)
    }
}

//! Publishing, discovery and liveness packets.
//!
//! ```text
//! InitPacket:        [PropertyCount(4)] [Property*]
//! InitDynamicPacket: [TypeDefinition] [PropertyCount(4)] [Property*]
//! AddObject:         [IsDynamic(1)]
//! RemoveObject:      (target name only)
//! ObjectList:        [Count(4)] { Name, TypeName, Signature }*
//! Ping / Pong:       (target name only)
//! ```
//!
//! The source name travels as the packet's target name. `ObjectList` is not
//! addressed to an object and carries an empty target name.

use std::sync::Arc;

use bytes::Bytes;
use tracing::debug;

use crate::core::packet::{PacketType, PacketWriter};
use crate::core::stream::{DataReader, DataStream};
use crate::error::Result;
use crate::protocol::definition::{serialize_definition, RemoteTypes, TypeDefinition};
use crate::protocol::property::{decode_list_into, deserialize_properties, encode_list, serialize_properties, PropertyData};
use crate::protocol::source::{SessionState, Source};

/// Initial snapshot of a source whose schema the receiver already knows
pub fn serialize_init_packet(
    writer: &mut PacketWriter,
    session: &mut SessionState,
    source: &mut Source,
) -> Result<Bytes> {
    writer.begin(PacketType::InitPacket, source.name());
    serialize_properties(writer, session, source)?;
    debug!(source = %source.name(), "Serialized init packet");
    Ok(writer.finish())
}

/// Read an `InitPacket` snapshot into `properties`.
///
/// `type_name` selects the definition used to rebuild enum values, when the
/// receiver has one.
pub fn deserialize_init_packet(
    reader: &mut DataReader<'_>,
    types: &mut RemoteTypes,
    type_name: Option<&str>,
    properties: &mut Vec<PropertyData>,
) -> Result<()> {
    deserialize_properties(reader, types, type_name, properties)
}

/// Definition followed by the initial snapshot.
///
/// The source's own type is recorded as described on this connection.
pub fn serialize_init_dynamic_packet(
    writer: &mut PacketWriter,
    session: &mut SessionState,
    source: &mut Source,
) -> Result<Bytes> {
    writer.begin(PacketType::InitDynamicPacket, source.name());
    serialize_definition(writer, session, source)?;
    session.mark_sent(source.type_name());
    serialize_properties(writer, session, source)?;
    debug!(source = %source.name(), sent_types = session.sent_count(), "Serialized dynamic init packet");
    Ok(writer.finish())
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitDynamic {
    pub definition: Arc<TypeDefinition>,
    pub properties: Vec<PropertyData>,
}

pub fn deserialize_init_dynamic_packet(
    reader: &mut DataReader<'_>,
    types: &mut RemoteTypes,
) -> Result<InitDynamic> {
    let definition = types.learn(TypeDefinition::decode(reader)?)?;
    let mut properties = Vec::new();
    deserialize_properties(reader, types, Some(&definition.type_name), &mut properties)?;
    Ok(InitDynamic {
        definition,
        properties,
    })
}

pub fn serialize_add_object_packet(writer: &mut PacketWriter, name: &str, dynamic: bool) -> Bytes {
    writer.begin(PacketType::AddObject, name);
    writer.write_bool(dynamic);
    writer.finish()
}

/// Returns the dynamic flag
pub fn deserialize_add_object_packet(reader: &mut DataReader<'_>) -> Result<bool> {
    reader.read_bool()
}

pub fn serialize_remove_object_packet(writer: &mut PacketWriter, name: &str) -> Bytes {
    writer.begin(PacketType::RemoveObject, name);
    writer.finish()
}

/// Entry of an `ObjectList` packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub name: String,
    pub type_name: String,
    pub signature: Vec<u8>,
}

impl ObjectInfo {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            signature: Vec::new(),
        }
    }

    /// Entry for a published source
    pub fn from_source(source: &Source) -> Self {
        Self::new(source.name(), source.type_name())
    }
}

fn encode_object_info(ds: &mut DataStream, info: &ObjectInfo) {
    ds.write_string(&info.name);
    ds.write_string(&info.type_name);
    ds.write_blob(&info.signature);
}

pub fn serialize_object_list_packet(writer: &mut PacketWriter, objects: &[ObjectInfo]) -> Bytes {
    writer.begin(PacketType::ObjectList, "");
    encode_list(writer, objects, encode_object_info);
    writer.finish()
}

pub fn deserialize_object_list_packet(
    reader: &mut DataReader<'_>,
    objects: &mut Vec<ObjectInfo>,
) -> Result<()> {
    decode_list_into(reader, objects, |r, _| {
        Ok(ObjectInfo {
            name: r.read_string()?,
            type_name: r.read_string()?,
            signature: r.read_blob()?.to_vec(),
        })
    })
}

pub fn serialize_ping_packet(writer: &mut PacketWriter, name: &str) -> Bytes {
    writer.begin(PacketType::Ping, name);
    writer.finish()
}

pub fn serialize_pong_packet(writer: &mut PacketWriter, name: &str) -> Bytes {
    writer.begin(PacketType::Pong, name);
    writer.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::packet::Packet;

    #[test]
    fn test_add_object_carries_dynamic_flag() {
        let mut writer = PacketWriter::new();
        let frame = serialize_add_object_packet(&mut writer, "car", true);
        let packet = Packet::from_bytes(&frame).expect("frame");
        assert_eq!(packet.packet_type, PacketType::AddObject);
        assert_eq!(packet.name, "car");
        assert!(deserialize_add_object_packet(&mut packet.reader()).expect("flag"));
    }

    #[test]
    fn test_remove_ping_pong_are_name_only() {
        let mut writer = PacketWriter::new();
        for (frame, ty) in [
            (serialize_remove_object_packet(&mut writer, "car"), PacketType::RemoveObject),
            (serialize_ping_packet(&mut writer, "car"), PacketType::Ping),
            (serialize_pong_packet(&mut writer, "car"), PacketType::Pong),
        ] {
            let packet = Packet::from_bytes(&frame).expect("frame");
            assert_eq!(packet.packet_type, ty);
            assert_eq!(packet.name, "car");
            assert!(packet.payload.is_empty());
        }
    }

    #[test]
    fn test_object_list() {
        let objects = vec![
            ObjectInfo::new("car", "Car"),
            ObjectInfo {
                name: "garage".into(),
                type_name: "Garage".into(),
                signature: vec![1, 2, 3, 4],
            },
        ];
        let mut writer = PacketWriter::new();
        let frame = serialize_object_list_packet(&mut writer, &objects);
        let packet = Packet::from_bytes(&frame).expect("frame");
        assert!(packet.name.is_empty());

        let mut decoded = vec![ObjectInfo::new("stale", "Stale"); 5];
        deserialize_object_list_packet(&mut packet.reader(), &mut decoded).expect("decode");
        assert_eq!(decoded, objects);
    }
}

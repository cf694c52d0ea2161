//! # Property Serialization
//!
//! Writes the current value of a source's properties, propagating schemas
//! for object references and nested value types the receiver has not seen on
//! this connection.
//!
//! ## Per-property Encoding
//! - Enum-typed: the 32-bit integer value.
//! - Object reference: an [`ObjectDescriptor`], optionally carrying the
//!   referenced type's definition, followed (unless null) by a blob holding
//!   the referenced object's own count-prefixed properties.
//! - Generically boxed nested value type on a dynamic source, first
//!   occurrence: a `Gadget` descriptor carrying schema and value.
//! - Anything else: the generic value codec.
//!
//! ## Lists
//! Count-prefixed lists are decoded into an existing sequence, which is
//! shrunk or grown to the declared count. Running out of input before the
//! count is satisfied is reported as `DecodeTruncated`.

use std::sync::Arc;

use tracing::debug;

use crate::core::stream::{DataReader, DataStream};
use crate::core::value::{decode_value, encode_value, tags, DeclaredType, GadgetSchema, TypeRegistry, Value};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::api::{ExposedApi, PropertyInfo, PropertyValue};
use crate::protocol::definition::{serialize_definition, GadgetMap, RemoteTypes, TypeDefinition};
use crate::protocol::descriptor::{ObjectDescriptor, ObjectKind};
use crate::protocol::source::{SessionState, Source};

/// Nesting limit for object references inside object references
const MAX_OBJECT_DEPTH: usize = 64;

/// Write `items` as a `u32` count followed by each element
pub fn encode_list<T>(ds: &mut DataStream, items: &[T], mut encode_one: impl FnMut(&mut DataStream, &T)) {
    ds.write_count(items.len());
    for item in items {
        encode_one(ds, item);
    }
}

/// Decode a count-prefixed list into `list`.
///
/// `list` is truncated to the declared count when longer, existing slots are
/// overwritten in order and missing ones appended. `decode_one` receives the
/// slot index.
///
/// # Errors
/// `DecodeTruncated` when the input ends before the declared count is met;
/// `list` may then hold a mix of old and new elements.
pub fn decode_list_into<'a, T, F>(
    reader: &mut DataReader<'a>,
    list: &mut Vec<T>,
    mut decode_one: F,
) -> Result<()>
where
    F: FnMut(&mut DataReader<'a>, usize) -> Result<T>,
{
    let count = reader.read_u32()? as usize;
    list.truncate(count);
    for index in 0..count {
        if reader.at_end() {
            return Err(ProtocolError::DecodeTruncated(constants::CTX_LIST));
        }
        let item = decode_one(reader, index)?;
        match list.get_mut(index) {
            Some(slot) => *slot = item,
            None => list.push(item),
        }
    }
    Ok(())
}

/// Encode an argument or value list; enum values travel as integers
pub fn encode_value_list(ds: &mut DataStream, values: &[Value]) {
    encode_list(ds, values, encode_value);
}

pub fn decode_value_list_into(
    reader: &mut DataReader<'_>,
    registry: &TypeRegistry,
    values: &mut Vec<Value>,
) -> Result<()> {
    decode_list_into(reader, values, |r, _| decode_value(r, registry))
}

/// Write property `index` of `source`
pub fn serialize_property(
    ds: &mut DataStream,
    session: &mut SessionState,
    source: &mut Source,
    index: usize,
) -> Result<()> {
    serialize_property_at(ds, session, source, index, 0)
}

/// Write the property count followed by every property of `source`
pub fn serialize_properties(
    ds: &mut DataStream,
    session: &mut SessionState,
    source: &mut Source,
) -> Result<()> {
    serialize_properties_at(ds, session, source, 0)
}

fn serialize_properties_at(
    ds: &mut DataStream,
    session: &mut SessionState,
    source: &mut Source,
    depth: usize,
) -> Result<()> {
    let count = source.live_object()?.description().properties.len();
    ds.write_count(count);
    for index in 0..count {
        serialize_property_at(ds, session, source, index, depth)?;
    }
    Ok(())
}

fn serialize_property_at(
    ds: &mut DataStream,
    session: &mut SessionState,
    source: &mut Source,
    index: usize,
    depth: usize,
) -> Result<()> {
    if depth > MAX_OBJECT_DEPTH {
        return Err(ProtocolError::RecursionLimitExceeded);
    }
    let object = source.live_object()?;
    let (info, value) = source.read_property(&object, index)?;

    match value {
        PropertyValue::Object(live) => {
            serialize_object_reference(ds, session, source, index, &info, live.as_ref(), depth)
        }
        PropertyValue::Value(value) if info.ty.is_enum() => {
            let raw = value
                .to_i32()
                .ok_or_else(|| ProtocolError::SchemaMismatch(info.ty.wire_name().to_string()))?;
            encode_value(ds, &Value::Int(raw));
            Ok(())
        }
        PropertyValue::Value(Value::Gadget(gadget))
            if source.is_dynamic()
                && matches!(info.ty, DeclaredType::Variant)
                && !session.is_sent(gadget.type_name()) =>
        {
            let descriptor = ObjectDescriptor::from_gadget(&gadget);
            descriptor.encode(ds);
            descriptor.encode_parameters(ds);
            mark_schema_sent(session, &gadget.schema);
            Ok(())
        }
        PropertyValue::Value(value) => {
            encode_value(ds, &value);
            Ok(())
        }
    }
}

fn mark_schema_sent(session: &mut SessionState, schema: &GadgetSchema) {
    session.mark_sent(&schema.type_name);
    for field in &schema.fields {
        if let Some(nested) = field.ty.as_gadget() {
            mark_schema_sent(session, nested);
        }
    }
}

fn serialize_object_reference(
    ds: &mut DataStream,
    session: &mut SessionState,
    source: &mut Source,
    index: usize,
    info: &PropertyInfo,
    live: Option<&Arc<dyn ExposedApi>>,
    depth: usize,
) -> Result<()> {
    let dynamic = source.is_dynamic();
    let child = source.child_mut(index, info);
    child.rebind(live);

    let mut descriptor = ObjectDescriptor::from_source(child);
    if dynamic
        && descriptor.kind == ObjectKind::Class
        && !descriptor.is_null
        && !session.is_sent(&descriptor.type_name)
    {
        let mut definition = DataStream::new();
        serialize_definition(&mut definition, session, child)?;
        descriptor.class_definition = definition.into_vec();
        session.mark_sent(&descriptor.type_name);
    }

    descriptor.encode(ds);
    if descriptor.is_null {
        return Ok(());
    }

    let mut parameters = DataStream::new();
    serialize_properties_at(&mut parameters, session, child, depth + 1)?;
    descriptor.parameters = parameters.into_vec();
    descriptor.encode_parameters(ds);
    Ok(())
}

/// Receiver-side view of a referenced object
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteObject {
    pub name: String,
    pub type_name: String,
    pub kind: ObjectKind,
    pub is_null: bool,
    /// Present when the definition travelled inline with this reference
    pub definition: Option<Arc<TypeDefinition>>,
    pub properties: Vec<PropertyData>,
}

/// One decoded property
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyData {
    Value(Value),
    Object(RemoteObject),
}

impl PropertyData {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            PropertyData::Value(v) => Some(v),
            PropertyData::Object(_) => None,
        }
    }

    pub fn as_object(&self) -> Option<&RemoteObject> {
        match self {
            PropertyData::Object(o) => Some(o),
            PropertyData::Value(_) => None,
        }
    }
}

/// Read one property.
///
/// `declared` is the receiver's knowledge of the property's type; enum
/// properties are rebuilt from their integer value when it is known.
pub fn deserialize_property(
    reader: &mut DataReader<'_>,
    types: &mut RemoteTypes,
    declared: Option<&DeclaredType>,
) -> Result<PropertyData> {
    deserialize_property_at(reader, types, declared, 0)
}

/// Read a count-prefixed property list of an object of type `type_name`
pub fn deserialize_properties(
    reader: &mut DataReader<'_>,
    types: &mut RemoteTypes,
    type_name: Option<&str>,
    properties: &mut Vec<PropertyData>,
) -> Result<()> {
    deserialize_properties_at(reader, types, type_name, properties, 0)
}

fn deserialize_properties_at(
    reader: &mut DataReader<'_>,
    types: &mut RemoteTypes,
    type_name: Option<&str>,
    properties: &mut Vec<PropertyData>,
    depth: usize,
) -> Result<()> {
    decode_list_into(reader, properties, |r, index| {
        let declared = type_name.and_then(|t| types.property_type(t, index));
        deserialize_property_at(r, types, declared.as_ref(), depth)
    })
}

fn deserialize_property_at(
    reader: &mut DataReader<'_>,
    types: &mut RemoteTypes,
    declared: Option<&DeclaredType>,
    depth: usize,
) -> Result<PropertyData> {
    if depth > MAX_OBJECT_DEPTH {
        return Err(ProtocolError::RecursionLimitExceeded);
    }
    if reader.peek_u8()? == tags::OBJECT {
        let descriptor = ObjectDescriptor::decode(reader)?;
        return deserialize_descriptor(descriptor, types, depth);
    }

    let value = decode_value(reader, types.registry())?;
    match declared {
        Some(DeclaredType::Enum(type_name)) => {
            let raw = value
                .to_i32()
                .ok_or_else(|| ProtocolError::SchemaMismatch(type_name.clone()))?;
            Ok(PropertyData::Value(Value::Enum {
                type_name: type_name.clone(),
                value: raw,
            }))
        }
        _ => Ok(PropertyData::Value(value)),
    }
}

fn deserialize_descriptor(
    descriptor: ObjectDescriptor,
    types: &mut RemoteTypes,
    depth: usize,
) -> Result<PropertyData> {
    if descriptor.kind == ObjectKind::Gadget {
        GadgetMap::decode(&mut DataReader::new(&descriptor.class_definition))?
            .register(types.registry_mut())?;
        let value = decode_value(&mut DataReader::new(&descriptor.parameters), types.registry())?;
        debug!(type_name = %descriptor.type_name, "Decoded nested value type with schema");
        return Ok(PropertyData::Value(value));
    }

    let definition = if descriptor.has_definition() {
        let definition = TypeDefinition::decode(&mut DataReader::new(&descriptor.class_definition))?;
        debug!(type_name = %definition.type_name, "Learned type definition");
        Some(types.learn(definition)?)
    } else {
        None
    };

    let mut properties = Vec::new();
    if !descriptor.is_null {
        let mut parameters = DataReader::new(&descriptor.parameters);
        deserialize_properties_at(
            &mut parameters,
            types,
            Some(&descriptor.type_name),
            &mut properties,
            depth + 1,
        )?;
    }

    Ok(PropertyData::Object(RemoteObject {
        name: descriptor.name,
        type_name: descriptor.type_name,
        kind: descriptor.kind,
        is_null: descriptor.is_null,
        definition,
        properties,
    }))
}

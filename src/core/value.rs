//! # Generic Value Codec
//!
//! Tagged encoding for property values, method arguments and return values.
//!
//! ## Wire Format
//! ```text
//! [Tag(1)] [Body]
//! ```
//! Gadget (nested value type) bodies carry their type name and field values but
//! not their field names: a receiver can only decode a gadget whose schema it has
//! registered in its [`TypeRegistry`], which is exactly what schema propagation
//! provides.
//!
//! ## Invariants
//! - **Recursion Safety**: nesting is bounded by `MAX_RECURSION_DEPTH`.
//! - **Enum Reduction**: enum values travel as their 32-bit integer.

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::stream::{DataReader, DataStream};
use crate::error::{ProtocolError, Result};

/// The maximum nesting depth for values before decoding fails.
const MAX_RECURSION_DEPTH: usize = 64;

/// Wire type name reported for a property referencing a plain object
pub const CLASS_REFERENCE_TYPE: &str = "Object*";

/// Wire type name reported for a property referencing an item model
pub const MODEL_REFERENCE_TYPE: &str = "Model*";

/// Wire type name of a generically boxed value
pub const VARIANT_TYPE: &str = "Variant";

pub mod tags {
    pub const INVALID: u8 = 0;
    pub const BOOL: u8 = 1;
    pub const INT: u8 = 2;
    pub const UINT: u8 = 3;
    pub const INT64: u8 = 4;
    pub const DOUBLE: u8 = 5;
    pub const STRING: u8 = 6;
    pub const BYTES: u8 = 7;
    pub const LIST: u8 = 8;
    pub const GADGET: u8 = 9;
    /// Object descriptors share the value stream; see `protocol::descriptor`
    pub const OBJECT: u8 = 10;
}

/// Declared type of a property, parameter or gadget field
#[derive(Debug, Clone, PartialEq)]
pub enum DeclaredType {
    /// Primitive or opaque value, named as it appears on the wire (e.g. `"int"`)
    Value(String),
    /// Enumeration, carried as a 32-bit integer
    Enum(String),
    /// Nested value type with a known field schema
    Gadget(Arc<GadgetSchema>),
    /// Reference to another introspectable object
    Object { type_name: String, model: bool },
    /// Generically boxed value whose concrete type is only known at runtime
    Variant,
}

impl DeclaredType {
    pub fn value(name: impl Into<String>) -> Self {
        DeclaredType::Value(name.into())
    }

    pub fn object(type_name: impl Into<String>) -> Self {
        DeclaredType::Object {
            type_name: type_name.into(),
            model: false,
        }
    }

    pub fn model(type_name: impl Into<String>) -> Self {
        DeclaredType::Object {
            type_name: type_name.into(),
            model: true,
        }
    }

    /// Name written into schemas for this type
    pub fn wire_name(&self) -> &str {
        match self {
            DeclaredType::Value(name) | DeclaredType::Enum(name) => name,
            DeclaredType::Gadget(schema) => &schema.type_name,
            DeclaredType::Object { model: false, .. } => CLASS_REFERENCE_TYPE,
            DeclaredType::Object { model: true, .. } => MODEL_REFERENCE_TYPE,
            DeclaredType::Variant => VARIANT_TYPE,
        }
    }

    pub fn is_enum(&self) -> bool {
        matches!(self, DeclaredType::Enum(_))
    }

    pub fn as_gadget(&self) -> Option<&Arc<GadgetSchema>> {
        match self {
            DeclaredType::Gadget(schema) => Some(schema),
            _ => None,
        }
    }
}

/// One field of a nested value type
#[derive(Debug, Clone, PartialEq)]
pub struct GadgetField {
    pub name: String,
    pub ty: DeclaredType,
}

/// Structural schema of a nested value type
#[derive(Debug, Clone, PartialEq)]
pub struct GadgetSchema {
    pub type_name: String,
    pub fields: Vec<GadgetField>,
}

impl GadgetSchema {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, ty: DeclaredType) -> Self {
        self.fields.push(GadgetField {
            name: name.into(),
            ty,
        });
        self
    }

    /// `(name, wire type)` pairs in declaration order
    pub fn field_list(&self) -> Vec<(String, String)> {
        self.fields
            .iter()
            .map(|f| (f.name.clone(), f.ty.wire_name().to_string()))
            .collect()
    }
}

/// Instance of a nested value type
#[derive(Debug, Clone, PartialEq)]
pub struct GadgetValue {
    pub schema: Arc<GadgetSchema>,
    pub values: Vec<Value>,
}

impl GadgetValue {
    pub fn new(schema: Arc<GadgetSchema>, values: Vec<Value>) -> Result<Self> {
        if schema.fields.len() != values.len() {
            return Err(ProtocolError::SchemaMismatch(schema.type_name.clone()));
        }
        Ok(Self { schema, values })
    }

    pub fn type_name(&self) -> &str {
        &self.schema.type_name
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.schema
            .fields
            .iter()
            .position(|f| f.name == field)
            .and_then(|i| self.values.get(i))
    }
}

/// A dynamically typed value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Invalid,
    Bool(bool),
    Int(i32),
    UInt(u32),
    Int64(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Enum { type_name: String, value: i32 },
    Gadget(GadgetValue),
}

impl Value {
    /// The integer carried by enum and integer values
    pub fn to_i32(&self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Enum { value, .. } => Some(*value),
            Value::UInt(v) => i32::try_from(*v).ok(),
            Value::Int64(v) => i32::try_from(*v).ok(),
            Value::Bool(b) => Some(i32::from(*b)),
            _ => None,
        }
    }

    pub fn is_enum(&self) -> bool {
        matches!(self, Value::Enum { .. })
    }

    pub fn as_gadget(&self) -> Option<&GadgetValue> {
        match self {
            Value::Gadget(g) => Some(g),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

/// Receiver-side table of nested value types learned from the wire
#[derive(Debug, Default, Clone)]
pub struct TypeRegistry {
    gadgets: HashMap<String, Arc<GadgetSchema>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a schema, keeping an existing one of the same name
    pub fn register(&mut self, schema: Arc<GadgetSchema>) -> Arc<GadgetSchema> {
        self.gadgets
            .entry(schema.type_name.clone())
            .or_insert(schema)
            .clone()
    }

    pub fn get(&self, type_name: &str) -> Option<&Arc<GadgetSchema>> {
        self.gadgets.get(type_name)
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.gadgets.contains_key(type_name)
    }

    pub fn len(&self) -> usize {
        self.gadgets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gadgets.is_empty()
    }

    /// Resolve a wire type name to a declared type
    pub fn resolve(&self, wire_name: &str) -> DeclaredType {
        match wire_name {
            CLASS_REFERENCE_TYPE => DeclaredType::object(""),
            MODEL_REFERENCE_TYPE => DeclaredType::model(""),
            VARIANT_TYPE => DeclaredType::Variant,
            name => match self.gadgets.get(name) {
                Some(schema) => DeclaredType::Gadget(schema.clone()),
                None => DeclaredType::Value(name.to_string()),
            },
        }
    }
}

/// Encodes a value into the stream.
pub fn encode_value(ds: &mut DataStream, value: &Value) {
    match value {
        Value::Invalid => ds.write_u8(tags::INVALID),
        Value::Bool(b) => {
            ds.write_u8(tags::BOOL);
            ds.write_bool(*b);
        }
        Value::Int(v) | Value::Enum { value: v, .. } => {
            ds.write_u8(tags::INT);
            ds.write_i32(*v);
        }
        Value::UInt(v) => {
            ds.write_u8(tags::UINT);
            ds.write_u32(*v);
        }
        Value::Int64(v) => {
            ds.write_u8(tags::INT64);
            ds.write_i64(*v);
        }
        Value::Double(v) => {
            ds.write_u8(tags::DOUBLE);
            ds.write_f64(*v);
        }
        Value::String(s) => {
            ds.write_u8(tags::STRING);
            ds.write_string(s);
        }
        Value::Bytes(b) => {
            ds.write_u8(tags::BYTES);
            ds.write_blob(b);
        }
        Value::List(items) => {
            ds.write_u8(tags::LIST);
            ds.write_count(items.len());
            for item in items {
                encode_value(ds, item);
            }
        }
        Value::Gadget(gadget) => encode_gadget(ds, gadget),
    }
}

/// Encodes a nested value type instance, tag included.
pub fn encode_gadget(ds: &mut DataStream, gadget: &GadgetValue) {
    ds.write_u8(tags::GADGET);
    ds.write_string(gadget.type_name());
    ds.write_count(gadget.values.len());
    for item in &gadget.values {
        encode_value(ds, item);
    }
}

/// Decodes one value from the stream.
///
/// # Errors
/// Returns `UnknownType` for a gadget whose schema is not registered,
/// `InvalidValueTag` for object descriptors (decoded by the property layer)
/// and unknown tags, and `DecodeTruncated` for short input.
pub fn decode_value(reader: &mut DataReader<'_>, registry: &TypeRegistry) -> Result<Value> {
    decode_value_impl(reader, registry, 0)
}

fn decode_value_impl(
    reader: &mut DataReader<'_>,
    registry: &TypeRegistry,
    depth: usize,
) -> Result<Value> {
    if depth > MAX_RECURSION_DEPTH {
        return Err(ProtocolError::RecursionLimitExceeded);
    }

    let tag = reader.read_u8()?;
    let value = match tag {
        tags::INVALID => Value::Invalid,
        tags::BOOL => Value::Bool(reader.read_bool()?),
        tags::INT => Value::Int(reader.read_i32()?),
        tags::UINT => Value::UInt(reader.read_u32()?),
        tags::INT64 => Value::Int64(reader.read_i64()?),
        tags::DOUBLE => Value::Double(reader.read_f64()?),
        tags::STRING => Value::String(reader.read_string()?),
        tags::BYTES => Value::Bytes(reader.read_blob()?.to_vec()),
        tags::LIST => {
            let count = reader.read_u32()? as usize;
            // Every element carries at least its tag byte
            if reader.remaining() < count {
                return Err(ProtocolError::DecodeTruncated(
                    crate::error::constants::CTX_LIST,
                ));
            }
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(decode_value_impl(reader, registry, depth + 1)?);
            }
            Value::List(items)
        }
        tags::GADGET => {
            let type_name = reader.read_string()?;
            let schema = registry
                .get(&type_name)
                .cloned()
                .ok_or_else(|| ProtocolError::UnknownType(type_name.clone()))?;
            let count = reader.read_u32()? as usize;
            if count != schema.fields.len() {
                return Err(ProtocolError::SchemaMismatch(type_name));
            }
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(decode_value_impl(reader, registry, depth + 1)?);
            }
            Value::Gadget(GadgetValue { schema, values })
        }
        other => return Err(ProtocolError::InvalidValueTag(other)),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point_schema() -> Arc<GadgetSchema> {
        Arc::new(
            GadgetSchema::new("Point")
                .field("x", DeclaredType::value("int"))
                .field("y", DeclaredType::value("int")),
        )
    }

    fn roundtrip(value: &Value, registry: &TypeRegistry) -> Result<Value> {
        let mut ds = DataStream::new();
        encode_value(&mut ds, value);
        let bytes = ds.into_vec();
        let mut reader = DataReader::new(&bytes);
        let decoded = decode_value(&mut reader, registry)?;
        assert!(reader.at_end());
        Ok(decoded)
    }

    #[test]
    fn test_nested_list() {
        let value = Value::List(vec![
            Value::Int(1),
            Value::String("two".into()),
            Value::List(vec![Value::Bool(true)]),
        ]);
        let decoded = roundtrip(&value, &TypeRegistry::new()).expect("decode");
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_enum_travels_as_int() {
        let value = Value::Enum {
            type_name: "Gear".into(),
            value: 3,
        };
        let decoded = roundtrip(&value, &TypeRegistry::new()).expect("decode");
        assert_eq!(decoded, Value::Int(3));
    }

    #[test]
    fn test_gadget_requires_registered_schema() {
        let gadget = GadgetValue::new(point_schema(), vec![Value::Int(1), Value::Int(2)])
            .expect("gadget");
        let value = Value::Gadget(gadget);

        let err = roundtrip(&value, &TypeRegistry::new()).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(ref name) if name == "Point"));

        let mut registry = TypeRegistry::new();
        registry.register(point_schema());
        let decoded = roundtrip(&value, &registry).expect("decode");
        assert_eq!(decoded.as_gadget().and_then(|g| g.get("y")), Some(&Value::Int(2)));
    }

    #[test]
    fn test_gadget_value_arity_checked() {
        assert!(GadgetValue::new(point_schema(), vec![Value::Int(1)]).is_err());
    }

    #[test]
    fn test_object_tag_is_not_a_plain_value() {
        let bytes = [tags::OBJECT];
        let mut reader = DataReader::new(&bytes);
        assert!(matches!(
            decode_value(&mut reader, &TypeRegistry::new()),
            Err(ProtocolError::InvalidValueTag(tags::OBJECT))
        ));
    }

    #[test]
    fn test_excessive_nesting_rejected() {
        let mut bytes = Vec::new();
        for _ in 0..(MAX_RECURSION_DEPTH + 2) {
            bytes.push(tags::LIST);
            bytes.extend_from_slice(&1u32.to_be_bytes());
        }
        bytes.push(tags::INVALID);
        let mut reader = DataReader::new(&bytes);
        assert!(matches!(
            decode_value(&mut reader, &TypeRegistry::new()),
            Err(ProtocolError::RecursionLimitExceeded)
        ));
    }

    #[test]
    fn test_resolve_wire_names() {
        let mut registry = TypeRegistry::new();
        registry.register(point_schema());
        assert!(registry.resolve("Point").as_gadget().is_some());
        assert_eq!(registry.resolve("int"), DeclaredType::value("int"));
        assert_eq!(registry.resolve(CLASS_REFERENCE_TYPE).wire_name(), CLASS_REFERENCE_TYPE);
    }
}

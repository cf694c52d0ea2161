//! # Object Descriptors
//!
//! Wire handle for one occurrence of an object reference (or of a nested value
//! type sent with its schema).
//!
//! ## Wire Format
//! ```text
//! [Tag(1) = OBJECT] [Name] [TypeName] [Kind(1)] [ClassDefinition(4 + N)] [IsNull(1)]
//! [Parameters(4 + M)]   -- only when IsNull is false
//! ```
//!
//! The parameters blob follows the header directly, but is produced by the
//! caller once the referenced object's properties have been serialized.

use tracing::debug;

use crate::core::stream::{DataReader, DataStream};
use crate::core::value::{encode_gadget, tags, GadgetValue};
use crate::error::{ProtocolError, Result};
use crate::protocol::definition::GadgetMap;
use crate::protocol::source::Source;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ObjectKind {
    Class = 0,
    Model = 1,
    Gadget = 2,
}

impl TryFrom<u8> for ObjectKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ObjectKind::Class),
            1 => Ok(ObjectKind::Model),
            2 => Ok(ObjectKind::Gadget),
            other => Err(ProtocolError::InvalidObjectKind(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDescriptor {
    pub name: String,
    pub type_name: String,
    pub kind: ObjectKind,
    pub is_null: bool,
    /// Inline definition; empty when the receiver already has it
    pub class_definition: Vec<u8>,
    /// Inline snapshot; never present for null descriptors
    pub parameters: Vec<u8>,
}

impl ObjectDescriptor {
    /// Capture a source's identity. Blobs start empty.
    pub fn from_source(source: &Source) -> Self {
        Self {
            name: source.name().to_string(),
            type_name: source.type_name().to_string(),
            kind: source.kind(),
            is_null: source.is_null(),
            class_definition: Vec::new(),
            parameters: Vec::new(),
        }
    }

    /// Describe a nested value type instance.
    ///
    /// The schema (with every nested value type it uses) and the encoded
    /// value are written into the blobs right away.
    pub fn from_gadget(gadget: &GadgetValue) -> Self {
        let mut gadgets = GadgetMap::new();
        gadgets.insert_schema(&gadget.schema);
        let mut definition = DataStream::new();
        gadgets.encode(&mut definition);

        let mut parameters = DataStream::new();
        encode_gadget(&mut parameters, gadget);

        Self {
            name: String::new(),
            type_name: gadget.type_name().to_string(),
            kind: ObjectKind::Gadget,
            is_null: false,
            class_definition: definition.into_vec(),
            parameters: parameters.into_vec(),
        }
    }

    pub fn has_definition(&self) -> bool {
        !self.class_definition.is_empty()
    }

    /// Write everything up to and including the null flag
    pub fn encode(&self, ds: &mut DataStream) {
        ds.write_u8(tags::OBJECT);
        ds.write_string(&self.name);
        ds.write_string(&self.type_name);
        ds.write_u8(self.kind as u8);
        ds.write_blob(&self.class_definition);
        ds.write_bool(self.is_null);
        debug!(
            name = %self.name,
            type_name = %self.type_name,
            kind = ?self.kind,
            null = self.is_null,
            definition = self.has_definition(),
            "Serialized object descriptor"
        );
    }

    /// Write the trailing parameters blob; nothing for a null descriptor
    pub fn encode_parameters(&self, ds: &mut DataStream) {
        if !self.is_null {
            ds.write_blob(&self.parameters);
        }
    }

    /// Read a descriptor including its parameters blob when not null
    pub fn decode(reader: &mut DataReader<'_>) -> Result<Self> {
        let tag = reader.read_u8()?;
        if tag != tags::OBJECT {
            return Err(ProtocolError::InvalidValueTag(tag));
        }
        let name = reader.read_string()?;
        let type_name = reader.read_string()?;
        let kind = ObjectKind::try_from(reader.read_u8()?)?;
        let class_definition = reader.read_blob()?.to_vec();
        let is_null = reader.read_bool()?;
        let parameters = if is_null {
            Vec::new()
        } else {
            reader.read_blob()?.to_vec()
        };
        Ok(Self {
            name,
            type_name,
            kind,
            is_null,
            class_definition,
            parameters,
        })
    }
}

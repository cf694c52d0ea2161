//! # Type Definitions
//!
//! Structural description of a published type, sent so that a receiver that
//! has never seen the type can still decode its properties and arguments.
//!
//! ## Wire Format
//! ```text
//! [TypeName]
//! [EnumCount(4)]     { Name, IsFlag(1), Scope, KeyCount(4), { Key, Value(4) }* }*
//! [GadgetCount(4)]   { TypeName, FieldCount(4), { Name, Type }* }*
//! [SignalCount(4)]   { Signature, ParameterNames }*
//! [MethodCount(4)]   { Signature, ReturnType, ParameterNames }*
//! [PropertyCount(4)] { Name, WireType, NotifySignature }*
//! ```
//!
//! Nested value types are only listed for dynamic sources; compiled receivers
//! already know them. Each nested value type is described at most once per
//! connection: names are recorded in the connection's [`SessionState`] as they
//! are written.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::core::stream::{DataReader, DataStream};
use crate::core::value::{DeclaredType, GadgetSchema, TypeRegistry};
use crate::error::{ProtocolError, Result};
use crate::protocol::api::{EnumInfo, ExposedApi, PropertyValue};
use crate::protocol::source::{SessionState, Source};
use crate::utils::metrics::global_metrics;

/// Suffix compiled source types carry and receivers do not
const SOURCE_SUFFIX: &str = "Source";

/// Field lists of nested value types, keyed by type name
#[derive(Debug, Default, Clone, PartialEq)]
pub struct GadgetMap {
    entries: BTreeMap<String, Vec<(String, String)>>,
}

impl GadgetMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.entries.contains_key(type_name)
    }

    pub fn get(&self, type_name: &str) -> Option<&[(String, String)]> {
        self.entries.get(type_name).map(Vec::as_slice)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Add `schema` and every nested value type reachable from its fields
    pub fn insert_schema(&mut self, schema: &GadgetSchema) {
        self.insert(schema.type_name.clone(), schema.field_list());
        for field in &schema.fields {
            if let Some(nested) = field.ty.as_gadget() {
                self.insert_schema(nested);
            }
        }
    }

    /// Add one entry. An existing entry of the same name is kept; a differing
    /// field list under that name is logged.
    pub fn insert(&mut self, type_name: String, fields: Vec<(String, String)>) {
        match self.entries.get(&type_name) {
            Some(existing) if *existing != fields => {
                warn!(
                    type_name = %type_name,
                    kept = existing.len(),
                    ignored = fields.len(),
                    "Divergent field lists for nested value type"
                );
            }
            Some(_) => {}
            None => {
                self.entries.insert(type_name, fields);
            }
        }
    }

    pub fn merge(&mut self, other: GadgetMap) {
        for (type_name, fields) in other.entries {
            self.insert(type_name, fields);
        }
    }

    pub fn encode(&self, ds: &mut DataStream) {
        ds.write_count(self.entries.len());
        for (type_name, fields) in &self.entries {
            ds.write_string(type_name);
            ds.write_count(fields.len());
            for (name, ty) in fields {
                ds.write_string(name);
                ds.write_string(ty);
            }
        }
    }

    pub fn decode(reader: &mut DataReader<'_>) -> Result<Self> {
        let mut map = GadgetMap::new();
        let count = reader.read_u32()?;
        for _ in 0..count {
            let type_name = reader.read_string()?;
            let field_count = reader.read_u32()?;
            let mut fields = Vec::new();
            for _ in 0..field_count {
                let name = reader.read_string()?;
                let ty = reader.read_string()?;
                fields.push((name, ty));
            }
            map.insert(type_name, fields);
        }
        Ok(map)
    }

    /// Register every entry with `registry`.
    ///
    /// Entries are registered once all value types their fields refer to are
    /// known, so the order on the wire does not matter. Entries that can never
    /// be resolved (self-referencing field lists) fail with `SchemaMismatch`.
    pub fn register(&self, registry: &mut TypeRegistry) -> Result<()> {
        let mut pending: Vec<&String> = self
            .entries
            .keys()
            .filter(|name| !registry.contains(name))
            .collect();

        while !pending.is_empty() {
            let before = pending.len();
            pending.retain(|name| {
                let fields = &self.entries[*name];
                let ready = fields
                    .iter()
                    .all(|(_, ty)| !self.entries.contains_key(ty) || registry.contains(ty));
                if !ready {
                    return true;
                }
                let schema = fields.iter().fold(GadgetSchema::new(name.as_str()), |s, (field, ty)| {
                    s.field(field.clone(), registry.resolve(ty))
                });
                registry.register(Arc::new(schema));
                debug!(type_name = %name, "Registered nested value type");
                false
            });
            if pending.len() == before {
                return Err(ProtocolError::SchemaMismatch(pending[0].clone()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalDefinition {
    pub signature: String,
    pub parameter_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDefinition {
    pub signature: String,
    pub return_type: String,
    pub parameter_names: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDefinition {
    pub name: String,
    pub type_name: String,
    /// Empty when the property has no change notification
    pub notify_signature: String,
}

/// Structural schema of one published type
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TypeDefinition {
    pub type_name: String,
    pub enums: Vec<EnumInfo>,
    pub gadgets: GadgetMap,
    pub signals: Vec<SignalDefinition>,
    pub methods: Vec<MethodDefinition>,
    pub properties: Vec<PropertyDefinition>,
}

impl TypeDefinition {
    /// Describe the live object behind `source`.
    ///
    /// For dynamic sources the nested value types found on the object graph
    /// are included and recorded in `session`; types already recorded are left
    /// out.
    pub fn from_source(session: &mut SessionState, source: &Source) -> Result<Self> {
        let object = source.live_object()?;
        let api = object.description();
        let dynamic = source.is_dynamic();
        let normalize = |signature: &str| normalize_signature(signature, &api.type_name, dynamic);

        let mut gadgets = GadgetMap::new();
        if dynamic {
            let mut visited = HashSet::new();
            recurse_for_gadgets(&mut gadgets, session, &object, &mut visited);
            for name in gadgets.names() {
                session.mark_sent(name);
            }
        }

        let signals = api
            .signals
            .iter()
            .map(|s| SignalDefinition {
                signature: normalize(&s.signature),
                parameter_names: s.parameter_names(),
            })
            .collect();
        let methods = api
            .methods
            .iter()
            .map(|m| MethodDefinition {
                signature: m.signature.clone(),
                return_type: m.return_type.clone(),
                parameter_names: m.parameter_names(),
            })
            .collect();
        let properties = api
            .properties
            .iter()
            .enumerate()
            .map(|(i, p)| PropertyDefinition {
                name: p.name.clone(),
                type_name: p.ty.wire_name().to_string(),
                notify_signature: api.notify_signature(i).map(normalize).unwrap_or_default(),
            })
            .collect();

        Ok(Self {
            type_name: api.type_name.clone(),
            enums: api.enums.clone(),
            gadgets,
            signals,
            methods,
            properties,
        })
    }

    pub fn encode(&self, ds: &mut DataStream) {
        ds.write_string(&self.type_name);

        ds.write_count(self.enums.len());
        for info in &self.enums {
            ds.write_string(&info.name);
            ds.write_bool(info.is_flag);
            ds.write_string(&info.scope);
            ds.write_count(info.keys.len());
            for (key, value) in &info.keys {
                ds.write_string(key);
                ds.write_i32(*value);
            }
        }

        self.gadgets.encode(ds);

        ds.write_count(self.signals.len());
        for signal in &self.signals {
            ds.write_string(&signal.signature);
            ds.write_string_list(&signal.parameter_names);
        }

        ds.write_count(self.methods.len());
        for method in &self.methods {
            ds.write_string(&method.signature);
            ds.write_string(&method.return_type);
            ds.write_string_list(&method.parameter_names);
        }

        ds.write_count(self.properties.len());
        for property in &self.properties {
            ds.write_string(&property.name);
            ds.write_string(&property.type_name);
            ds.write_string(&property.notify_signature);
        }
    }

    pub fn decode(reader: &mut DataReader<'_>) -> Result<Self> {
        let type_name = reader.read_string()?;

        let mut enums = Vec::new();
        for _ in 0..reader.read_u32()? {
            let name = reader.read_string()?;
            let is_flag = reader.read_bool()?;
            let scope = reader.read_string()?;
            let mut keys = Vec::new();
            for _ in 0..reader.read_u32()? {
                let key = reader.read_string()?;
                let value = reader.read_i32()?;
                keys.push((key, value));
            }
            enums.push(EnumInfo {
                name,
                is_flag,
                scope,
                keys,
            });
        }

        let gadgets = GadgetMap::decode(reader)?;

        let mut signals = Vec::new();
        for _ in 0..reader.read_u32()? {
            signals.push(SignalDefinition {
                signature: reader.read_string()?,
                parameter_names: reader.read_string_list()?,
            });
        }

        let mut methods = Vec::new();
        for _ in 0..reader.read_u32()? {
            methods.push(MethodDefinition {
                signature: reader.read_string()?,
                return_type: reader.read_string()?,
                parameter_names: reader.read_string_list()?,
            });
        }

        let mut properties = Vec::new();
        for _ in 0..reader.read_u32()? {
            properties.push(PropertyDefinition {
                name: reader.read_string()?,
                type_name: reader.read_string()?,
                notify_signature: reader.read_string()?,
            });
        }

        Ok(Self {
            type_name,
            enums,
            gadgets,
            signals,
            methods,
            properties,
        })
    }

    /// The enum a wire type name refers to, scoped (`Car::Gear`) or not
    pub fn enum_for(&self, wire_type: &str) -> Option<&EnumInfo> {
        let short = wire_type.rsplit("::").next().unwrap_or(wire_type);
        self.enums.iter().find(|e| e.name == short)
    }
}

/// Replace `<Type>Source` with `<Type>` in signatures of compiled sources
pub fn normalize_signature(signature: &str, type_name: &str, dynamic: bool) -> String {
    if dynamic {
        return signature.to_string();
    }
    signature.replace(&format!("{type_name}{SOURCE_SUFFIX}"), type_name)
}

fn collect_gadget(gadgets: &mut GadgetMap, session: &SessionState, ty: &DeclaredType) {
    if let Some(schema) = ty.as_gadget() {
        if !session.is_sent(&schema.type_name) {
            gadgets.insert_schema(schema);
        }
    }
}

/// Walk signal parameters, method parameters and properties of `object`,
/// descending into plain-class object references.
fn recurse_for_gadgets(
    gadgets: &mut GadgetMap,
    session: &SessionState,
    object: &Arc<dyn ExposedApi>,
    visited: &mut HashSet<String>,
) {
    let api = object.description();
    if !visited.insert(api.type_name.clone()) {
        return;
    }

    for signal in &api.signals {
        for parameter in &signal.parameters {
            collect_gadget(gadgets, session, &parameter.ty);
        }
    }
    for method in &api.methods {
        for parameter in &method.parameters {
            collect_gadget(gadgets, session, &parameter.ty);
        }
    }
    for (index, property) in api.properties.iter().enumerate() {
        match &property.ty {
            DeclaredType::Object { model: false, .. } if !property.adapter => {
                if let PropertyValue::Object(Some(child)) = object.read_property(index) {
                    if !child.description().model {
                        recurse_for_gadgets(gadgets, session, &child, visited);
                    }
                }
            }
            ty => collect_gadget(gadgets, session, ty),
        }
    }
}

/// Write the definition of `source`'s type.
///
/// The caller records the type itself in `session`; nested value types are
/// recorded here.
pub fn serialize_definition(
    ds: &mut DataStream,
    session: &mut SessionState,
    source: &Source,
) -> Result<()> {
    let definition = TypeDefinition::from_source(session, source)?;
    definition.encode(ds);
    global_metrics().definition_sent();
    debug!(
        source = %source.name(),
        type_name = %definition.type_name,
        gadgets = definition.gadgets.len(),
        properties = definition.properties.len(),
        "Serialized type definition"
    );
    Ok(())
}

/// Receiver-side knowledge of types learned from one connection
#[derive(Debug, Default, Clone)]
pub struct RemoteTypes {
    registry: TypeRegistry,
    definitions: HashMap<String, Arc<TypeDefinition>>,
}

impl RemoteTypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TypeRegistry {
        &mut self.registry
    }

    /// Register a received definition and its nested value types
    pub fn learn(&mut self, definition: TypeDefinition) -> Result<Arc<TypeDefinition>> {
        definition.gadgets.register(&mut self.registry)?;
        let definition = Arc::new(definition);
        self.definitions
            .insert(definition.type_name.clone(), definition.clone());
        Ok(definition)
    }

    pub fn definition(&self, type_name: &str) -> Option<&Arc<TypeDefinition>> {
        self.definitions.get(type_name)
    }

    /// Declared type of property `index` of `type_name`, if the type is known
    pub fn property_type(&self, type_name: &str, index: usize) -> Option<DeclaredType> {
        let definition = self.definitions.get(type_name)?;
        let property = definition.properties.get(index)?;
        Some(match definition.enum_for(&property.type_name) {
            Some(_) => DeclaredType::Enum(property.type_name.clone()),
            None => self.registry.resolve(&property.type_name),
        })
    }

    pub fn reset(&mut self) {
        self.registry = TypeRegistry::new();
        self.definitions.clear();
    }
}

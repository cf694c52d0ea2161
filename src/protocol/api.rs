//! # Exposed API
//!
//! Static description of what one object publishes: enums, signals, methods
//! and properties, in index order. Concrete types register an
//! [`ApiDescription`] once and implement [`ExposedApi`] to read property values
//! by index. The protocol layer never introspects objects any other way.

use std::sync::Arc;

use crate::core::value::{DeclaredType, Value};

/// Enumeration published by an object
#[derive(Debug, Clone, PartialEq)]
pub struct EnumInfo {
    pub name: String,
    pub is_flag: bool,
    pub scope: String,
    pub keys: Vec<(String, i32)>,
}

impl EnumInfo {
    pub fn new(name: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_flag: false,
            scope: scope.into(),
            keys: Vec::new(),
        }
    }

    pub fn flag(mut self) -> Self {
        self.is_flag = true;
        self
    }

    pub fn key(mut self, name: impl Into<String>, value: i32) -> Self {
        self.keys.push((name.into(), value));
        self
    }

    pub fn value_of(&self, key: &str) -> Option<i32> {
        self.keys.iter().find(|(k, _)| k == key).map(|(_, v)| *v)
    }
}

/// One named, typed parameter of a signal or method
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    pub ty: DeclaredType,
}

/// Type spelling used inside signatures.
///
/// Object references keep their concrete type name, unlike property wire types.
fn signature_type(ty: &DeclaredType) -> String {
    match ty {
        DeclaredType::Object { type_name, .. } => format!("{type_name}*"),
        other => other.wire_name().to_string(),
    }
}

fn signature(name: &str, parameters: &[Parameter]) -> String {
    let types: Vec<String> = parameters.iter().map(|p| signature_type(&p.ty)).collect();
    format!("{name}({})", types.join(","))
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignalInfo {
    pub signature: String,
    pub parameters: Vec<Parameter>,
}

impl SignalInfo {
    pub fn new(name: &str, parameters: Vec<Parameter>) -> Self {
        Self {
            signature: signature(name, &parameters),
            parameters,
        }
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodInfo {
    pub signature: String,
    pub return_type: String,
    pub parameters: Vec<Parameter>,
}

impl MethodInfo {
    pub fn new(name: &str, return_type: impl Into<String>, parameters: Vec<Parameter>) -> Self {
        Self {
            signature: signature(name, &parameters),
            return_type: return_type.into(),
            parameters,
        }
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyInfo {
    pub name: String,
    pub ty: DeclaredType,
    /// Index into the owning description's signal list
    pub notify_signal: Option<usize>,
    /// Read from the source's adapter rather than its object
    pub adapter: bool,
}

impl PropertyInfo {
    pub fn new(name: impl Into<String>, ty: DeclaredType) -> Self {
        Self {
            name: name.into(),
            ty,
            notify_signal: None,
            adapter: false,
        }
    }

    pub fn notify(mut self, signal_index: usize) -> Self {
        self.notify_signal = Some(signal_index);
        self
    }

    pub fn from_adapter(mut self) -> Self {
        self.adapter = true;
        self
    }

    pub fn is_object_reference(&self) -> bool {
        matches!(self.ty, DeclaredType::Object { .. })
    }
}

/// Ordered API of one published type
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApiDescription {
    pub type_name: String,
    pub enums: Vec<EnumInfo>,
    pub signals: Vec<SignalInfo>,
    pub methods: Vec<MethodInfo>,
    pub properties: Vec<PropertyInfo>,
    /// The type is an item collection
    pub model: bool,
}

impl ApiDescription {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Self::default()
        }
    }

    pub fn as_model(mut self) -> Self {
        self.model = true;
        self
    }

    pub fn enumeration(mut self, info: EnumInfo) -> Self {
        self.enums.push(info);
        self
    }

    pub fn signal(mut self, info: SignalInfo) -> Self {
        self.signals.push(info);
        self
    }

    pub fn method(mut self, info: MethodInfo) -> Self {
        self.methods.push(info);
        self
    }

    pub fn property(mut self, info: PropertyInfo) -> Self {
        self.properties.push(info);
        self
    }

    /// Add a property together with its `<name>Changed` notification signal
    pub fn notifying_property(mut self, name: &str, ty: DeclaredType) -> Self {
        let signal_index = self.signals.len();
        self.signals.push(SignalInfo::new(
            &format!("{name}Changed"),
            vec![Parameter {
                name: name.to_string(),
                ty: ty.clone(),
            }],
        ));
        self.properties
            .push(PropertyInfo::new(name, ty).notify(signal_index));
        self
    }

    pub fn property_index(&self, name: &str) -> Option<usize> {
        self.properties.iter().position(|p| p.name == name)
    }

    /// The property whose change notification is `signal_index`
    pub fn property_index_from_signal(&self, signal_index: usize) -> Option<usize> {
        self.properties
            .iter()
            .position(|p| p.notify_signal == Some(signal_index))
    }

    pub fn notify_signature(&self, property_index: usize) -> Option<&str> {
        let signal = self.properties.get(property_index)?.notify_signal?;
        self.signals.get(signal).map(|s| s.signature.as_str())
    }
}

/// Current content of one property
#[derive(Clone)]
pub enum PropertyValue {
    Value(Value),
    /// Reference to another introspectable object; `None` when unset
    Object(Option<Arc<dyn ExposedApi>>),
}

impl std::fmt::Debug for PropertyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PropertyValue::Value(v) => f.debug_tuple("Value").field(v).finish(),
            PropertyValue::Object(Some(o)) => {
                f.debug_tuple("Object").field(&o.description().type_name).finish()
            }
            PropertyValue::Object(None) => f.write_str("Object(null)"),
        }
    }
}

impl From<Value> for PropertyValue {
    fn from(value: Value) -> Self {
        PropertyValue::Value(value)
    }
}

/// Capability an object implements to be published.
///
/// The description must not change for the lifetime of the instance.
/// Adapter objects are read with the property indices of the description
/// they are attached to.
pub trait ExposedApi: Send + Sync {
    fn description(&self) -> &ApiDescription;

    fn read_property(&self, index: usize) -> PropertyValue;
}

//! # Sources
//!
//! A [`Source`] is one published object instance as the protocol sees it: a
//! name unique on the connection, a non-owning handle to the live object, an
//! optional model adapter and the child sources created for object-reference
//! properties. Child sources are owned by their parent; the objects they
//! observe are not, and may be swapped underneath them.
//!
//! [`SessionState`] carries what has already been transmitted on one
//! connection. It lives as long as the connection, not the sources, and is
//! passed explicitly into every serializer that needs it.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Weak};

use tracing::debug;

use crate::core::value::DeclaredType;
use crate::error::{ProtocolError, Result};
use crate::protocol::api::{ExposedApi, PropertyInfo, PropertyValue};
use crate::protocol::descriptor::ObjectKind;

/// Separator between a parent source name and a property name
pub const CHILD_NAME_SEPARATOR: char = '/';

pub struct Source {
    name: String,
    type_name: String,
    object: Option<Weak<dyn ExposedApi>>,
    adapter: Option<Weak<dyn ExposedApi>>,
    declared_model: bool,
    model: bool,
    dynamic: bool,
    children: BTreeMap<usize, Source>,
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Source")
            .field("name", &self.name)
            .field("type_name", &self.type_name)
            .field("null", &self.is_null())
            .field("dynamic", &self.dynamic)
            .field("children", &self.children.len())
            .finish()
    }
}

fn same_object(current: Option<&Weak<dyn ExposedApi>>, new: Option<&Arc<dyn ExposedApi>>) -> bool {
    match (current.and_then(Weak::upgrade), new) {
        (None, None) => true,
        (Some(a), Some(b)) => std::ptr::eq(
            Arc::as_ptr(&a) as *const (),
            Arc::as_ptr(b) as *const (),
        ),
        _ => false,
    }
}

impl Source {
    /// Publish `object` under `name`
    pub fn new(name: impl Into<String>, object: &Arc<dyn ExposedApi>) -> Self {
        let description = object.description();
        Self {
            name: name.into(),
            type_name: description.type_name.clone(),
            object: Some(Arc::downgrade(object)),
            adapter: None,
            declared_model: false,
            model: description.model,
            dynamic: false,
            children: BTreeMap::new(),
        }
    }

    /// Attach a model adapter; the source then reports kind `Model`
    pub fn with_adapter(mut self, adapter: &Arc<dyn ExposedApi>) -> Self {
        self.adapter = Some(Arc::downgrade(adapter));
        self
    }

    /// Mark the schema as unknown to receivers ahead of time
    pub fn dynamic(mut self, dynamic: bool) -> Self {
        self.dynamic = dynamic;
        self
    }

    fn child_of(parent_name: &str, dynamic: bool, info: &PropertyInfo) -> Self {
        let (type_name, model) = match &info.ty {
            DeclaredType::Object { type_name, model } => (type_name.clone(), *model),
            other => (other.wire_name().to_string(), false),
        };
        Self {
            name: format!("{parent_name}{CHILD_NAME_SEPARATOR}{}", info.name),
            type_name,
            object: None,
            adapter: None,
            declared_model: model,
            model,
            dynamic,
            children: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic
    }

    /// The observed object, if it is still alive
    pub fn object(&self) -> Option<Arc<dyn ExposedApi>> {
        self.object.as_ref().and_then(Weak::upgrade)
    }

    pub fn is_null(&self) -> bool {
        self.object().is_none()
    }

    /// The observed object, or `NullObject` when it is gone
    pub fn live_object(&self) -> Result<Arc<dyn ExposedApi>> {
        self.object()
            .ok_or_else(|| ProtocolError::NullObject(self.name.clone()))
    }

    pub fn adapter(&self) -> Option<Arc<dyn ExposedApi>> {
        self.adapter.as_ref().and_then(Weak::upgrade)
    }

    pub fn kind(&self) -> ObjectKind {
        if self.adapter.is_some() || self.model {
            ObjectKind::Model
        } else {
            ObjectKind::Class
        }
    }

    /// Read property `index` of `object`, going through the adapter for
    /// adapter-owned properties.
    pub fn read_property(
        &self,
        object: &Arc<dyn ExposedApi>,
        index: usize,
    ) -> Result<(PropertyInfo, PropertyValue)> {
        let info = object
            .description()
            .properties
            .get(index)
            .cloned()
            .ok_or_else(|| ProtocolError::InvalidPropertyIndex {
                source_name: self.name.clone(),
                index,
            })?;
        let value = if info.adapter {
            self.adapter()
                .ok_or_else(|| ProtocolError::NullObject(format!("{} adapter", self.name)))?
                .read_property(index)
        } else {
            object.read_property(index)
        };
        Ok((info, value))
    }

    pub fn child(&self, index: usize) -> Option<&Source> {
        self.children.get(&index)
    }

    pub fn children(&self) -> impl Iterator<Item = (usize, &Source)> {
        self.children.iter().map(|(i, c)| (*i, c))
    }

    /// The child for object-reference property `index`, created on first use
    pub(crate) fn child_mut(&mut self, index: usize, info: &PropertyInfo) -> &mut Source {
        self.children.entry(index).or_insert_with(|| {
            let child = Source::child_of(&self.name, self.dynamic, info);
            debug!(parent = %self.name, child = %child.name, "Created child source");
            child
        })
    }

    /// Point this source at a different live object.
    ///
    /// Returns `false` when `object` is already the observed one. Children are
    /// dropped on rebind and recreated against the new object on demand. The
    /// kind follows the new object unless the property itself is a model
    /// reference.
    pub fn rebind(&mut self, object: Option<&Arc<dyn ExposedApi>>) -> bool {
        if same_object(self.object.as_ref(), object) {
            return false;
        }
        debug!(source = %self.name, null = object.is_none(), "Rebinding source");
        self.object = object.map(Arc::downgrade);
        self.model = self.declared_model;
        if let Some(object) = object {
            let description = object.description();
            self.type_name = description.type_name.clone();
            self.model |= description.model;
        }
        self.children.clear();
        true
    }
}

/// Per-connection record of structural types already described
#[derive(Debug, Default, Clone)]
pub struct SessionState {
    sent_types: HashSet<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_sent(&self, type_name: &str) -> bool {
        self.sent_types.contains(type_name)
    }

    /// Record `type_name` as described; returns `false` if it already was
    pub fn mark_sent(&mut self, type_name: &str) -> bool {
        self.sent_types.insert(type_name.to_string())
    }

    pub fn sent_count(&self) -> usize {
        self.sent_types.len()
    }

    /// Forget everything; used when the connection is replaced
    pub fn reset(&mut self) {
        self.sent_types.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::api::ApiDescription;

    struct Plain(ApiDescription);

    impl ExposedApi for Plain {
        fn description(&self) -> &ApiDescription {
            &self.0
        }

        fn read_property(&self, _index: usize) -> PropertyValue {
            PropertyValue::Object(None)
        }
    }

    fn object(type_name: &str) -> Arc<dyn ExposedApi> {
        Arc::new(Plain(
            ApiDescription::new(type_name)
                .property(PropertyInfo::new("engine", DeclaredType::object("Engine"))),
        ))
    }

    #[test]
    fn test_child_naming_and_dynamic_inheritance() {
        let car = object("Car");
        let mut source = Source::new("car", &car).dynamic(true);
        let info = car.description().properties[0].clone();

        let child = source.child_mut(0, &info);
        assert_eq!(child.name(), "car/engine");
        assert_eq!(child.type_name(), "Engine");
        assert!(child.is_dynamic());
        assert!(child.is_null());
        assert_eq!(child.kind(), ObjectKind::Class);
    }

    #[test]
    fn test_rebind_detects_changes() {
        let car = object("Car");
        let first = object("Engine");
        let second = object("Engine");
        let mut source = Source::new("car", &car);
        let info = car.description().properties[0].clone();
        let child = source.child_mut(0, &info);

        assert!(!child.rebind(None));
        assert!(child.rebind(Some(&first)));
        assert!(!child.rebind(Some(&first)));
        assert!(child.rebind(Some(&second)));
        assert!(child.rebind(None));
        assert!(child.is_null());
    }

    #[test]
    fn test_rebind_recomputes_kind() {
        let car = object("Car");
        let rows: Arc<dyn ExposedApi> = Arc::new(Plain(ApiDescription::new("Rows").as_model()));
        let engine = object("Engine");
        let mut source = Source::new("car", &car);
        let info = car.description().properties[0].clone();
        let child = source.child_mut(0, &info);

        child.rebind(Some(&rows));
        assert_eq!(child.kind(), ObjectKind::Model);
        child.rebind(Some(&engine));
        assert_eq!(child.kind(), ObjectKind::Class);
        assert_eq!(child.type_name(), "Engine");

        let declared = PropertyInfo::new("rows", DeclaredType::model("Rows"));
        let child = source.child_mut(1, &declared);
        child.rebind(Some(&engine));
        assert_eq!(child.kind(), ObjectKind::Model);
    }

    #[test]
    fn test_object_is_not_owned() {
        let car = object("Car");
        let source = Source::new("car", &car);
        assert!(source.live_object().is_ok());
        drop(car);
        assert!(matches!(
            source.live_object(),
            Err(ProtocolError::NullObject(ref n)) if n == "car"
        ));
    }

    #[test]
    fn test_adapter_makes_model() {
        let list = object("List");
        let adapter = object("ListAdapter");
        let source = Source::new("list", &list).with_adapter(&adapter);
        assert_eq!(source.kind(), ObjectKind::Model);
    }

    #[test]
    fn test_session_state_memoizes() {
        let mut session = SessionState::new();
        assert!(session.mark_sent("Engine"));
        assert!(!session.mark_sent("Engine"));
        assert!(session.is_sent("Engine"));
        session.reset();
        assert!(!session.is_sent("Engine"));
        assert_eq!(session.sent_count(), 0);
    }
}

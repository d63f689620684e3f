//! Runtime entity records.
//!
//! # Responsibility
//! - Hold one record's stable id, attribute values and owning context.
//! - Enforce schema validation on every attribute write.
//!
//! # Invariants
//! - `id` is stable and never reused for another entity.
//! - An entity handle belongs to exactly one unit-of-work context;
//!   context operations reject handles stamped by a different context.

use crate::model::schema::{EntityDescription, ModelError};
use crate::model::value::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Stable persistent identifier for an entity.
///
/// Kept as a type alias to make semantic intent explicit in signatures.
pub type EntityId = Uuid;

const NULL: Value = Value::Null;

/// One record instance of a declared entity type.
///
/// Entities are value snapshots: mutating a handle does not touch the
/// store until the change is registered with a context and saved.
#[derive(Debug, Clone)]
pub struct Entity {
    id: EntityId,
    description: Arc<EntityDescription>,
    values: BTreeMap<String, Value>,
    owner: Option<u64>,
}

impl Entity {
    /// Creates a blank entity with a fresh stable id and all attributes
    /// unset. Crate-internal: callers go through the stack.
    pub(crate) fn blank(description: Arc<EntityDescription>) -> Self {
        Self::from_parts(description, Uuid::new_v4(), BTreeMap::new())
    }

    /// Rebuilds an entity from persisted parts. Crate-internal: used by
    /// the row parser, which validates kinds on the way in.
    pub(crate) fn from_parts(
        description: Arc<EntityDescription>,
        id: EntityId,
        values: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            id,
            description,
            values,
            owner: None,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn entity_name(&self) -> &str {
        self.description.name()
    }

    pub fn description(&self) -> &EntityDescription {
        &self.description
    }

    /// Typed attribute setter validated against the declared schema.
    ///
    /// # Errors
    /// - `UnknownAttribute` when the key is not declared.
    /// - `KindMismatch` when the value kind does not fit the declaration.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<(), ModelError> {
        let value = value.into();
        let attr = self.description.attribute(key).ok_or_else(|| {
            ModelError::UnknownAttribute {
                entity: self.entity_name().to_string(),
                attribute: key.to_string(),
            }
        })?;
        if !attr.kind.accepts(&value) {
            return Err(ModelError::KindMismatch {
                entity: self.entity_name().to_string(),
                attribute: key.to_string(),
                expected: attr.kind,
                got: value.kind_name(),
            });
        }
        if value.is_null() {
            self.values.remove(key);
        } else {
            self.values.insert(key.to_string(), value);
        }
        Ok(())
    }

    /// Reads one attribute; unset declared attributes read as `Null`.
    pub fn get(&self, key: &str) -> Result<&Value, ModelError> {
        if self.description.attribute(key).is_none() {
            return Err(ModelError::UnknownAttribute {
                entity: self.entity_name().to_string(),
                attribute: key.to_string(),
            });
        }
        Ok(self.values.get(key).unwrap_or(&NULL))
    }

    /// Unchecked attribute read for internal evaluation paths. The key is
    /// assumed to have been validated against the description already.
    pub(crate) fn raw(&self, key: &str) -> &Value {
        self.values.get(key).unwrap_or(&NULL)
    }

    /// Flattens all declared attributes into a plain key/value mapping.
    /// Unset attributes appear as `Null`.
    pub fn dictionary_representation(&self) -> BTreeMap<String, Value> {
        self.description
            .attributes()
            .iter()
            .map(|attr| {
                (
                    attr.name.clone(),
                    self.values.get(&attr.name).cloned().unwrap_or(Value::Null),
                )
            })
            .collect()
    }

    /// Replaces the full value snapshot from a store re-read.
    pub(crate) fn replace_values(&mut self, values: BTreeMap<String, Value>) {
        self.values = values;
    }

    pub(crate) fn into_values(self) -> BTreeMap<String, Value> {
        self.values
    }

    pub(crate) fn owner(&self) -> Option<u64> {
        self.owner
    }

    pub(crate) fn set_owner(&mut self, owner: u64) {
        self.owner = Some(owner);
    }
}

#[cfg(test)]
mod tests {
    use super::Entity;
    use crate::model::schema::{AttributeKind, EntityDescription, ModelError};
    use crate::model::value::Value;
    use std::sync::Arc;

    fn person() -> Arc<EntityDescription> {
        Arc::new(
            EntityDescription::new("Person")
                .with_attribute("name", AttributeKind::Text)
                .with_attribute("age", AttributeKind::Int),
        )
    }

    #[test]
    fn set_validates_key_and_kind() {
        let mut entity = Entity::blank(person());
        entity.set("name", "alice").unwrap();
        assert_eq!(entity.get("name").unwrap(), &Value::Text("alice".into()));

        let err = entity.set("nickname", "al").unwrap_err();
        assert!(matches!(err, ModelError::UnknownAttribute { .. }));

        let err = entity.set("age", "not a number").unwrap_err();
        assert!(matches!(err, ModelError::KindMismatch { .. }));
    }

    #[test]
    fn unset_attributes_read_as_null() {
        let entity = Entity::blank(person());
        assert!(entity.get("age").unwrap().is_null());
        assert!(entity.get("missing").is_err());
    }

    #[test]
    fn dictionary_representation_covers_all_declared_attributes() {
        let mut entity = Entity::blank(person());
        entity.set("name", "bob").unwrap();

        let dict = entity.dictionary_representation();
        assert_eq!(dict.len(), 2);
        assert_eq!(dict["name"], Value::Text("bob".into()));
        assert_eq!(dict["age"], Value::Null);
    }

    #[test]
    fn setting_null_clears_the_attribute() {
        let mut entity = Entity::blank(person());
        entity.set("age", 30).unwrap();
        entity.set("age", Value::Null).unwrap();
        assert!(entity.get("age").unwrap().is_null());
    }
}

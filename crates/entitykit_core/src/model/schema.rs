//! Declared entity schemas.
//!
//! # Responsibility
//! - Describe entity types (name + attribute declarations) ahead of use.
//! - Validate names as SQL-safe identifiers at model build time.
//!
//! # Invariants
//! - A validated `Model` contains no duplicate entity or attribute names.
//! - Identifier validation happens once; downstream SQL building may
//!   interpolate validated names without further checks.

use crate::model::value::Value;
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Declared kind for one attribute column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    Bool,
    Int,
    Real,
    Text,
    Blob,
}

impl AttributeKind {
    /// Returns whether a runtime value may be assigned to this kind.
    ///
    /// `Null` is accepted by every kind; attributes are all optional.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (Self::Bool, Value::Bool(_))
                | (Self::Int, Value::Int(_))
                | (Self::Real, Value::Real(_))
                | (Self::Text, Value::Text(_))
                | (Self::Blob, Value::Blob(_))
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int => "int",
            Self::Real => "real",
            Self::Text => "text",
            Self::Blob => "blob",
        }
    }
}

impl Display for AttributeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One declared attribute on an entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeDescription {
    pub name: String,
    pub kind: AttributeKind,
}

/// Declared shape of one entity type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDescription {
    name: String,
    attributes: Vec<AttributeDescription>,
}

impl EntityDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
        }
    }

    /// Appends one attribute declaration (builder style).
    pub fn with_attribute(mut self, name: impl Into<String>, kind: AttributeKind) -> Self {
        self.attributes.push(AttributeDescription {
            name: name.into(),
            kind,
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &[AttributeDescription] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDescription> {
        self.attributes.iter().find(|attr| attr.name == name)
    }

    fn validate(&self) -> Result<(), ModelError> {
        if !IDENTIFIER_RE.is_match(&self.name) {
            return Err(ModelError::InvalidIdentifier {
                what: "entity name",
                value: self.name.clone(),
            });
        }
        for (index, attr) in self.attributes.iter().enumerate() {
            if !IDENTIFIER_RE.is_match(&attr.name) {
                return Err(ModelError::InvalidIdentifier {
                    what: "attribute name",
                    value: attr.name.clone(),
                });
            }
            // `uuid` is the reserved primary-key column in every table.
            if attr.name == "uuid" {
                return Err(ModelError::InvalidIdentifier {
                    what: "attribute name (reserved)",
                    value: attr.name.clone(),
                });
            }
            if self.attributes[..index].iter().any(|a| a.name == attr.name) {
                return Err(ModelError::DuplicateAttribute {
                    entity: self.name.clone(),
                    attribute: attr.name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Validated set of entity descriptions backing one persistence stack.
#[derive(Debug, Clone)]
pub struct Model {
    entities: Vec<Arc<EntityDescription>>,
}

impl Model {
    /// Builds a model from entity descriptions, rejecting invalid or
    /// duplicate declarations.
    pub fn new(entities: Vec<EntityDescription>) -> Result<Self, ModelError> {
        for (index, entity) in entities.iter().enumerate() {
            entity.validate()?;
            if entities[..index].iter().any(|e| e.name == entity.name) {
                return Err(ModelError::DuplicateEntity(entity.name.clone()));
            }
        }
        Ok(Self {
            entities: entities.into_iter().map(Arc::new).collect(),
        })
    }

    pub fn entity(&self, name: &str) -> Option<&Arc<EntityDescription>> {
        self.entities.iter().find(|e| e.name() == name)
    }

    pub fn entities(&self) -> &[Arc<EntityDescription>] {
        &self.entities
    }
}

/// Schema and attribute validation errors.
#[derive(Debug)]
pub enum ModelError {
    InvalidIdentifier {
        what: &'static str,
        value: String,
    },
    DuplicateEntity(String),
    DuplicateAttribute {
        entity: String,
        attribute: String,
    },
    UnknownAttribute {
        entity: String,
        attribute: String,
    },
    KindMismatch {
        entity: String,
        attribute: String,
        expected: AttributeKind,
        got: &'static str,
    },
}

impl Display for ModelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidIdentifier { what, value } => {
                write!(f, "invalid {what}: `{value}`")
            }
            Self::DuplicateEntity(name) => write!(f, "duplicate entity name: `{name}`"),
            Self::DuplicateAttribute { entity, attribute } => {
                write!(f, "duplicate attribute `{attribute}` on entity `{entity}`")
            }
            Self::UnknownAttribute { entity, attribute } => {
                write!(f, "unknown attribute `{attribute}` on entity `{entity}`")
            }
            Self::KindMismatch {
                entity,
                attribute,
                expected,
                got,
            } => write!(
                f,
                "attribute `{attribute}` on entity `{entity}` expects {expected}, got {got}"
            ),
        }
    }
}

impl Error for ModelError {}

#[cfg(test)]
mod tests {
    use super::{AttributeKind, EntityDescription, Model, ModelError};

    #[test]
    fn model_accepts_valid_descriptions() {
        let model = Model::new(vec![
            EntityDescription::new("Person")
                .with_attribute("name", AttributeKind::Text)
                .with_attribute("age", AttributeKind::Int),
            EntityDescription::new("Company").with_attribute("name", AttributeKind::Text),
        ])
        .unwrap();

        assert!(model.entity("Person").is_some());
        assert!(model.entity("Missing").is_none());
        let person = model.entity("Person").unwrap();
        assert_eq!(person.attribute("age").unwrap().kind, AttributeKind::Int);
    }

    #[test]
    fn model_rejects_bad_identifiers() {
        let err = Model::new(vec![EntityDescription::new("bad name")]).unwrap_err();
        assert!(matches!(err, ModelError::InvalidIdentifier { .. }));

        let err = Model::new(vec![
            EntityDescription::new("Person").with_attribute("drop table", AttributeKind::Text)
        ])
        .unwrap_err();
        assert!(matches!(err, ModelError::InvalidIdentifier { .. }));
    }

    #[test]
    fn model_rejects_reserved_uuid_attribute() {
        let err = Model::new(vec![
            EntityDescription::new("Person").with_attribute("uuid", AttributeKind::Text)
        ])
        .unwrap_err();
        assert!(matches!(err, ModelError::InvalidIdentifier { .. }));
    }

    #[test]
    fn model_rejects_duplicates() {
        let err = Model::new(vec![
            EntityDescription::new("Person"),
            EntityDescription::new("Person"),
        ])
        .unwrap_err();
        assert!(matches!(err, ModelError::DuplicateEntity(_)));

        let err = Model::new(vec![EntityDescription::new("Person")
            .with_attribute("name", AttributeKind::Text)
            .with_attribute("name", AttributeKind::Int)])
        .unwrap_err();
        assert!(matches!(err, ModelError::DuplicateAttribute { .. }));
    }
}

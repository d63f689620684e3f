//! Fetch requests, sort descriptors and section grouping.
//!
//! # Responsibility
//! - Describe one read as an immutable (entity, predicate, sorts, window)
//!   specification, rebuilt fresh per call.
//! - Order merged results deterministically.
//!
//! # Invariants
//! - A `uuid ASC` tie-break is always applied after the supplied sorts,
//!   so identical requests yield identical orderings.

use crate::model::entity::Entity;
use crate::model::schema::EntityDescription;
use crate::model::value::Value;
use crate::query::predicate::Predicate;
use crate::query::QueryError;

/// One sort key with direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortDescriptor {
    pub key: String,
    pub ascending: bool,
}

impl SortDescriptor {
    pub fn asc(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ascending: true,
        }
    }

    pub fn desc(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ascending: false,
        }
    }
}

/// Immutable description of one read against a unit-of-work.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    entity: String,
    predicate: Predicate,
    sorts: Vec<SortDescriptor>,
    limit: Option<u32>,
    offset: u32,
}

impl FetchRequest {
    /// Match-all request for one entity type.
    pub fn all(entity: impl Into<String>) -> Self {
        Self::filtered(entity, Predicate::All)
    }

    /// Predicate-filtered request for one entity type.
    pub fn filtered(entity: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            entity: entity.into(),
            predicate,
            sorts: Vec::new(),
            limit: None,
            offset: 0,
        }
    }

    pub fn sorted_by(mut self, sort: SortDescriptor) -> Self {
        self.sorts.push(sort);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn predicate(&self) -> &Predicate {
        &self.predicate
    }

    pub fn sorts(&self) -> &[SortDescriptor] {
        &self.sorts
    }

    pub fn limit(&self) -> Option<u32> {
        self.limit
    }

    pub fn offset(&self) -> u32 {
        self.offset
    }

    pub(crate) fn set_sorts(&mut self, sorts: Vec<SortDescriptor>) {
        self.sorts = sorts;
    }

    pub(crate) fn clear_window(&mut self) {
        self.limit = None;
        self.offset = 0;
    }

    /// Validates predicate and sort keys against the entity description.
    pub fn validate(&self, description: &EntityDescription) -> Result<(), QueryError> {
        self.predicate.validate(description)?;
        for sort in &self.sorts {
            if description.attribute(&sort.key).is_none() {
                return Err(QueryError::UnknownKey {
                    entity: description.name().to_string(),
                    key: sort.key.clone(),
                });
            }
        }
        Ok(())
    }
}

/// One group of an ordered fetch result, keyed by a shared attribute value.
#[derive(Debug, Clone)]
pub struct Section {
    pub key: Value,
    pub entities: Vec<Entity>,
}

/// Sorts entities by the descriptors, tie-breaking on `uuid ASC`.
pub(crate) fn sort_entities(entities: &mut [Entity], sorts: &[SortDescriptor]) {
    entities.sort_by(|a, b| {
        for sort in sorts {
            let ordering = a.raw(&sort.key).total_order(b.raw(&sort.key));
            let ordering = if sort.ascending {
                ordering
            } else {
                ordering.reverse()
            };
            if ordering != std::cmp::Ordering::Equal {
                return ordering;
            }
        }
        a.id().cmp(&b.id())
    });
}

/// Partitions an ordered result into consecutive runs of equal key values.
/// Callers sort by the section key first; unsorted input yields one
/// section per run, not per distinct value.
pub(crate) fn group_into_sections(entities: Vec<Entity>, key: &str) -> Vec<Section> {
    let mut sections: Vec<Section> = Vec::new();
    for entity in entities {
        let value = entity.raw(key).clone();
        match sections.last_mut() {
            Some(section) if section.key == value => section.entities.push(entity),
            _ => sections.push(Section {
                key: value,
                entities: vec![entity],
            }),
        }
    }
    sections
}

/// Applies offset/limit windowing to an already-ordered result.
pub(crate) fn apply_window(entities: Vec<Entity>, offset: u32, limit: Option<u32>) -> Vec<Entity> {
    let mut iter = entities.into_iter().skip(offset as usize);
    match limit {
        Some(limit) => iter.by_ref().take(limit as usize).collect(),
        None => iter.collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::{apply_window, group_into_sections, sort_entities, FetchRequest, SortDescriptor};
    use crate::model::entity::Entity;
    use crate::model::schema::{AttributeKind, EntityDescription};
    use crate::model::value::Value;
    use crate::query::predicate::Predicate;
    use std::sync::Arc;

    fn people(names_and_ages: &[(&str, i64)]) -> Vec<Entity> {
        let description = Arc::new(
            EntityDescription::new("Person")
                .with_attribute("name", AttributeKind::Text)
                .with_attribute("age", AttributeKind::Int),
        );
        names_and_ages
            .iter()
            .map(|(name, age)| {
                let mut entity = Entity::blank(Arc::clone(&description));
                entity.set("name", *name).unwrap();
                entity.set("age", *age).unwrap();
                entity
            })
            .collect()
    }

    #[test]
    fn sort_orders_by_descriptors_then_id() {
        let mut entities = people(&[("carol", 40), ("alice", 30), ("bob", 30)]);
        sort_entities(
            &mut entities,
            &[SortDescriptor::asc("age"), SortDescriptor::asc("name")],
        );
        let names: Vec<&str> = entities
            .iter()
            .map(|e| match e.raw("name") {
                Value::Text(name) => name.as_str(),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(names, vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn grouping_splits_on_key_value_runs() {
        let mut entities = people(&[("a", 1), ("b", 2), ("c", 1)]);
        sort_entities(&mut entities, &[SortDescriptor::asc("age")]);
        let sections = group_into_sections(entities, "age");
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].key, Value::Int(1));
        assert_eq!(sections[0].entities.len(), 2);
        assert_eq!(sections[1].key, Value::Int(2));
    }

    #[test]
    fn windowing_applies_offset_then_limit() {
        let entities = people(&[("a", 1), ("b", 2), ("c", 3), ("d", 4)]);
        let window = apply_window(entities, 1, Some(2));
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].raw("age"), &Value::Int(2));
    }

    #[test]
    fn validate_covers_sort_keys() {
        let description = EntityDescription::new("Person").with_attribute("name", AttributeKind::Text);
        let request = FetchRequest::filtered("Person", Predicate::All)
            .sorted_by(SortDescriptor::asc("missing"));
        assert!(request.validate(&description).is_err());
    }
}

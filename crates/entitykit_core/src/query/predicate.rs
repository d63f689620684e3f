//! Boolean filter expressions over entity attributes.
//!
//! # Responsibility
//! - Build equality/ordering/LIKE/null-check filters with combinators.
//! - Compile to a SQL `WHERE` fragment with positional binds.
//! - Evaluate in memory against entity snapshots with the same semantics.
//!
//! # Invariants
//! - Key names are only interpolated into SQL after model validation.
//! - `LIKE` matching is case-insensitive for ASCII on both paths, the way
//!   SQLite treats it.

use crate::model::entity::Entity;
use crate::model::schema::EntityDescription;
use crate::model::value::Value;
use crate::query::QueryError;
use regex::Regex;
use std::cmp::Ordering;

/// Comparison operator for a single-key predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
}

impl CompareOp {
    fn sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Like => "LIKE",
        }
    }
}

/// A boolean filter over entity attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Matches every entity of the type.
    All,
    Compare {
        key: String,
        op: CompareOp,
        value: Value,
    },
    IsNull {
        key: String,
    },
    IsNotNull {
        key: String,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn eq(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(key, CompareOp::Eq, value)
    }

    pub fn ne(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(key, CompareOp::Ne, value)
    }

    pub fn lt(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(key, CompareOp::Lt, value)
    }

    pub fn le(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(key, CompareOp::Le, value)
    }

    pub fn gt(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(key, CompareOp::Gt, value)
    }

    pub fn ge(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(key, CompareOp::Ge, value)
    }

    /// SQL `LIKE` pattern match (`%` and `_` wildcards).
    pub fn like(key: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self::compare(key, CompareOp::Like, Value::Text(pattern.into()))
    }

    pub fn is_null(key: impl Into<String>) -> Self {
        Self::IsNull { key: key.into() }
    }

    pub fn is_not_null(key: impl Into<String>) -> Self {
        Self::IsNotNull { key: key.into() }
    }

    pub fn and(predicates: Vec<Predicate>) -> Self {
        Self::And(predicates)
    }

    pub fn or(predicates: Vec<Predicate>) -> Self {
        Self::Or(predicates)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(predicate: Predicate) -> Self {
        Self::Not(Box::new(predicate))
    }

    fn compare(key: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare {
            key: key.into(),
            op,
            value: value.into(),
        }
    }

    /// Checks every referenced key against the entity description.
    pub fn validate(&self, description: &EntityDescription) -> Result<(), QueryError> {
        match self {
            Self::All => Ok(()),
            Self::Compare { key, .. } | Self::IsNull { key } | Self::IsNotNull { key } => {
                if description.attribute(key).is_none() {
                    return Err(QueryError::UnknownKey {
                        entity: description.name().to_string(),
                        key: key.clone(),
                    });
                }
                Ok(())
            }
            Self::And(parts) | Self::Or(parts) => {
                parts.iter().try_for_each(|p| p.validate(description))
            }
            Self::Not(inner) => inner.validate(description),
        }
    }

    /// Appends a SQL fragment for this predicate to `sql`, pushing bind
    /// values in order. Keys must have been validated beforehand.
    pub(crate) fn to_sql(&self, sql: &mut String, binds: &mut Vec<Value>) {
        match self {
            Self::All => sql.push_str("1 = 1"),
            Self::Compare { key, op, value } => match (op, value) {
                // SQL equality never matches NULL; route through IS NULL
                // so both evaluation paths agree.
                (CompareOp::Eq, Value::Null) => {
                    sql.push_str(&format!("\"{key}\" IS NULL"));
                }
                (CompareOp::Ne, Value::Null) => {
                    sql.push_str(&format!("\"{key}\" IS NOT NULL"));
                }
                _ => {
                    sql.push_str(&format!("\"{key}\" {} ?", op.sql()));
                    binds.push(value.clone());
                }
            },
            Self::IsNull { key } => sql.push_str(&format!("\"{key}\" IS NULL")),
            Self::IsNotNull { key } => sql.push_str(&format!("\"{key}\" IS NOT NULL")),
            Self::And(parts) => Self::join_sql(parts, " AND ", "1 = 1", sql, binds),
            Self::Or(parts) => Self::join_sql(parts, " OR ", "1 = 0", sql, binds),
            Self::Not(inner) => {
                sql.push_str("NOT (");
                inner.to_sql(sql, binds);
                sql.push(')');
            }
        }
    }

    fn join_sql(
        parts: &[Predicate],
        separator: &str,
        empty: &str,
        sql: &mut String,
        binds: &mut Vec<Value>,
    ) {
        if parts.is_empty() {
            sql.push_str(empty);
            return;
        }
        sql.push('(');
        for (index, part) in parts.iter().enumerate() {
            if index > 0 {
                sql.push_str(separator);
            }
            part.to_sql(sql, binds);
        }
        sql.push(')');
    }

    /// In-memory evaluation used for the pending-change overlay.
    pub(crate) fn matches(&self, entity: &Entity) -> bool {
        match self {
            Self::All => true,
            Self::Compare { key, op, value } => {
                Self::compare_matches(entity.raw(key), *op, value)
            }
            Self::IsNull { key } => entity.raw(key).is_null(),
            Self::IsNotNull { key } => !entity.raw(key).is_null(),
            Self::And(parts) => parts.iter().all(|p| p.matches(entity)),
            Self::Or(parts) => parts.iter().any(|p| p.matches(entity)),
            Self::Not(inner) => !inner.matches(entity),
        }
    }

    fn compare_matches(actual: &Value, op: CompareOp, expected: &Value) -> bool {
        if op == CompareOp::Like {
            return match (actual, expected) {
                (Value::Text(text), Value::Text(pattern)) => like_matches(pattern, text),
                _ => false,
            };
        }
        match (op, expected) {
            (CompareOp::Eq, Value::Null) => actual.is_null(),
            (CompareOp::Ne, Value::Null) => !actual.is_null(),
            _ => {
                // NULL never satisfies an ordering comparison, as in SQL.
                if actual.is_null() {
                    return false;
                }
                match actual.compare(expected) {
                    Some(ordering) => match op {
                        CompareOp::Eq => ordering == Ordering::Equal,
                        CompareOp::Ne => ordering != Ordering::Equal,
                        CompareOp::Lt => ordering == Ordering::Less,
                        CompareOp::Le => ordering != Ordering::Greater,
                        CompareOp::Gt => ordering == Ordering::Greater,
                        CompareOp::Ge => ordering != Ordering::Less,
                        CompareOp::Like => false,
                    },
                    None => op == CompareOp::Ne,
                }
            }
        }
    }
}

/// Translates a SQL LIKE pattern to an anchored regex and matches it
/// against `text`. Case folding is ASCII-only, as in SQLite's `LIKE`;
/// non-ASCII characters compare exactly.
fn like_matches(pattern: &str, text: &str) -> bool {
    let mut regex = String::with_capacity(pattern.len() + 4);
    regex.push('^');
    for ch in pattern.chars() {
        match ch {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            other => regex.push_str(&regex::escape(&other.to_ascii_lowercase().to_string())),
        }
    }
    regex.push('$');
    match Regex::new(&regex) {
        Ok(re) => re.is_match(&text.to_ascii_lowercase()),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::{like_matches, Predicate};
    use crate::model::entity::Entity;
    use crate::model::schema::{AttributeKind, EntityDescription};
    use crate::model::value::Value;
    use std::sync::Arc;

    fn person() -> Entity {
        let description = Arc::new(
            EntityDescription::new("Person")
                .with_attribute("name", AttributeKind::Text)
                .with_attribute("age", AttributeKind::Int),
        );
        let mut entity = Entity::blank(description);
        entity.set("name", "Alice").unwrap();
        entity.set("age", 30).unwrap();
        entity
    }

    #[test]
    fn sql_fragment_and_binds_line_up() {
        let predicate = Predicate::and(vec![
            Predicate::eq("name", "alice"),
            Predicate::gt("age", 21),
        ]);
        let mut sql = String::new();
        let mut binds = Vec::new();
        predicate.to_sql(&mut sql, &mut binds);

        assert_eq!(sql, "(\"name\" = ? AND \"age\" > ?)");
        assert_eq!(binds, vec![Value::Text("alice".into()), Value::Int(21)]);
    }

    #[test]
    fn null_equality_compiles_to_is_null() {
        let mut sql = String::new();
        let mut binds = Vec::new();
        Predicate::eq("name", Value::Null).to_sql(&mut sql, &mut binds);
        assert_eq!(sql, "\"name\" IS NULL");
        assert!(binds.is_empty());
    }

    #[test]
    fn in_memory_matching_agrees_with_comparison_semantics() {
        let entity = person();
        assert!(Predicate::eq("name", "Alice").matches(&entity));
        assert!(Predicate::gt("age", 21).matches(&entity));
        assert!(!Predicate::lt("age", 21).matches(&entity));
        assert!(Predicate::ne("age", "thirty").matches(&entity));
        assert!(Predicate::not(Predicate::eq("name", "Bob")).matches(&entity));
        assert!(Predicate::is_not_null("age").matches(&entity));
    }

    #[test]
    fn null_never_satisfies_ordering_comparisons() {
        let description = Arc::new(
            EntityDescription::new("Person").with_attribute("age", AttributeKind::Int),
        );
        let entity = Entity::blank(description);
        assert!(!Predicate::lt("age", 100).matches(&entity));
        assert!(!Predicate::ge("age", 0).matches(&entity));
        assert!(Predicate::eq("age", Value::Null).matches(&entity));
    }

    #[test]
    fn like_patterns_translate_wildcards() {
        assert!(like_matches("al%", "Alice"));
        assert!(like_matches("%ice", "alice"));
        assert!(like_matches("a_ice", "alice"));
        assert!(!like_matches("al%", "Bob"));
        assert!(like_matches("100^%", "100^something"));
    }

    #[test]
    fn like_case_folding_is_ascii_only() {
        assert!(like_matches("AL%", "alice"));
        assert!(like_matches("ä%", "ärger"));
        // SQLite LIKE does not fold non-ASCII case.
        assert!(!like_matches("Ä%", "ärger"));
        assert!(!like_matches("ä%", "Ärger"));
    }

    #[test]
    fn validate_rejects_unknown_keys() {
        let description = EntityDescription::new("Person").with_attribute("name", AttributeKind::Text);
        assert!(Predicate::eq("name", "x").validate(&description).is_ok());
        assert!(Predicate::eq("missing", "x").validate(&description).is_err());
        assert!(
            Predicate::and(vec![Predicate::All, Predicate::is_null("missing")])
                .validate(&description)
                .is_err()
        );
    }
}

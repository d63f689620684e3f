//! Model-driven table schema application and verification.
//!
//! # Responsibility
//! - Create one table per declared entity (`uuid` primary key plus one
//!   column per attribute).
//! - Verify pre-existing tables against the model on reopen.
//!
//! # Invariants
//! - Schema application runs inside one transaction.
//! - A declared column that is missing or has a different declared type
//!   is reported as `DbError::SchemaMismatch`, never patched in place.

use super::{DbError, DbResult};
use crate::model::schema::{AttributeKind, EntityDescription, Model};
use rusqlite::Connection;
use std::collections::HashMap;

/// Physical table name for an entity: configured prefix plus the entity
/// name converted to snake_case (`Person` -> `person`, `OrderItem` ->
/// `order_item`).
pub(crate) fn table_name(prefix: &str, entity_name: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + entity_name.len() + 4);
    out.push_str(prefix);
    for (index, ch) in entity_name.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if index > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn column_type(kind: AttributeKind) -> &'static str {
    match kind {
        AttributeKind::Bool | AttributeKind::Int => "INTEGER",
        AttributeKind::Real => "REAL",
        AttributeKind::Text => "TEXT",
        AttributeKind::Blob => "BLOB",
    }
}

/// Applies the model schema: creates missing tables, verifies existing
/// ones. Runs in a single transaction.
pub fn apply_schema(conn: &mut Connection, model: &Model, prefix: &str) -> DbResult<()> {
    let tx = conn.transaction()?;
    for entity in model.entities() {
        let table = table_name(prefix, entity.name());
        if table_exists(&tx, &table)? {
            verify_table(&tx, &table, entity)?;
        } else {
            tx.execute_batch(&create_table_sql(&table, entity))?;
        }
    }
    tx.commit()?;
    Ok(())
}

fn create_table_sql(table: &str, entity: &EntityDescription) -> String {
    let mut sql = format!("CREATE TABLE \"{table}\" (\n    uuid TEXT PRIMARY KEY NOT NULL");
    for attr in entity.attributes() {
        sql.push_str(&format!(
            ",\n    \"{}\" {}",
            attr.name,
            column_type(attr.kind)
        ));
    }
    sql.push_str("\n);");
    sql
}

fn table_exists(conn: &Connection, table: &str) -> DbResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1;",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn verify_table(conn: &Connection, table: &str, entity: &EntityDescription) -> DbResult<()> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{table}\");"))?;
    let mut rows = stmt.query([])?;
    let mut columns: HashMap<String, String> = HashMap::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get("name")?;
        let declared: String = row.get("type")?;
        columns.insert(name, declared.to_ascii_uppercase());
    }

    if columns.get("uuid").map(String::as_str) != Some("TEXT") {
        return Err(DbError::SchemaMismatch {
            table: table.to_string(),
            detail: "missing `uuid TEXT` primary key column".to_string(),
        });
    }

    for attr in entity.attributes() {
        let expected = column_type(attr.kind);
        match columns.get(&attr.name) {
            None => {
                return Err(DbError::SchemaMismatch {
                    table: table.to_string(),
                    detail: format!("missing column `{}`", attr.name),
                });
            }
            Some(declared) if declared != expected => {
                return Err(DbError::SchemaMismatch {
                    table: table.to_string(),
                    detail: format!(
                        "column `{}` is declared {declared}, model expects {expected}",
                        attr.name
                    ),
                });
            }
            Some(_) => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{apply_schema, table_name};
    use crate::db::{open_connection_in_memory, DbError};
    use crate::model::schema::{AttributeKind, EntityDescription, Model};

    fn model(kind: AttributeKind) -> Model {
        Model::new(vec![
            EntityDescription::new("OrderItem").with_attribute("label", kind)
        ])
        .unwrap()
    }

    #[test]
    fn table_names_are_prefixed_snake_case() {
        assert_eq!(table_name("", "Person"), "person");
        assert_eq!(table_name("app_", "OrderItem"), "app_order_item");
        assert_eq!(table_name("", "HTTPCache"), "h_t_t_p_cache");
    }

    #[test]
    fn apply_is_idempotent_for_matching_model() {
        let mut conn = open_connection_in_memory().unwrap();
        apply_schema(&mut conn, &model(AttributeKind::Text), "").unwrap();
        apply_schema(&mut conn, &model(AttributeKind::Text), "").unwrap();
    }

    #[test]
    fn changed_attribute_kind_is_a_schema_mismatch() {
        let mut conn = open_connection_in_memory().unwrap();
        apply_schema(&mut conn, &model(AttributeKind::Text), "").unwrap();

        let err = apply_schema(&mut conn, &model(AttributeKind::Int), "").unwrap_err();
        assert!(matches!(err, DbError::SchemaMismatch { .. }));
    }

    #[test]
    fn missing_column_is_a_schema_mismatch() {
        let mut conn = open_connection_in_memory().unwrap();
        apply_schema(&mut conn, &model(AttributeKind::Text), "").unwrap();

        let wider = Model::new(vec![EntityDescription::new("OrderItem")
            .with_attribute("label", AttributeKind::Text)
            .with_attribute("count", AttributeKind::Int)])
        .unwrap();
        let err = apply_schema(&mut conn, &wider, "").unwrap_err();
        assert!(matches!(err, DbError::SchemaMismatch { .. }));
    }
}

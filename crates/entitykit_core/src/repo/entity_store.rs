//! Entity store contract and SQLite implementation.
//!
//! # Responsibility
//! - Provide row-level insert/update/delete/select over per-entity tables.
//! - Compile fetch requests to SQL with positional binds.
//! - Apply a unit-of-work batch atomically.
//!
//! # Invariants
//! - `update`/`delete` report `NotFound` when no row changed.
//! - Select order is deterministic: supplied sorts, then `uuid ASC`.

use crate::db::schema::{apply_schema, table_name};
use crate::db::{open_connection, open_connection_in_memory};
use crate::model::entity::{Entity, EntityId};
use crate::model::schema::{AttributeKind, EntityDescription, Model};
use crate::model::value::Value;
use crate::query::fetch::FetchRequest;
use crate::query::predicate::Predicate;
use crate::repo::{StoreError, StoreResult};
use rusqlite::types::ValueRef;
use rusqlite::{params_from_iter, Connection, Row};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

/// One pending change taken from a unit-of-work for batch application.
#[derive(Debug, Clone, Copy)]
pub enum PendingOp<'a> {
    Insert(&'a Entity),
    Update(&'a Entity),
    Delete { entity: &'a str, id: EntityId },
}

/// Row-level persistence contract backing a persistence stack.
pub trait EntityStore {
    fn insert(&self, entity: &Entity) -> StoreResult<()>;
    fn update(&self, entity: &Entity) -> StoreResult<()>;
    fn delete(&self, entity_name: &str, id: EntityId) -> StoreResult<()>;
    fn select(&self, request: &FetchRequest) -> StoreResult<Vec<Entity>>;
    fn select_by_id(&self, entity_name: &str, id: EntityId) -> StoreResult<Option<Entity>>;
    fn count(&self, request: &FetchRequest) -> StoreResult<u64>;
    /// Applies a batch of pending changes in one SQL transaction.
    fn apply(&mut self, batch: &[PendingOp<'_>]) -> StoreResult<()>;
}

/// SQLite-backed entity store owning the connection and the model.
#[derive(Debug)]
pub struct SqliteEntityStore {
    conn: Connection,
    model: Arc<Model>,
    prefix: String,
}

impl SqliteEntityStore {
    /// Opens a file-backed store and applies the model schema.
    pub fn open(path: impl AsRef<Path>, model: Arc<Model>, prefix: &str) -> StoreResult<Self> {
        let mut conn = open_connection(path)?;
        apply_schema(&mut conn, &model, prefix)?;
        Ok(Self {
            conn,
            model,
            prefix: prefix.to_string(),
        })
    }

    /// Opens an in-memory store and applies the model schema.
    pub fn open_in_memory(model: Arc<Model>, prefix: &str) -> StoreResult<Self> {
        let mut conn = open_connection_in_memory()?;
        apply_schema(&mut conn, &model, prefix)?;
        Ok(Self {
            conn,
            model,
            prefix: prefix.to_string(),
        })
    }

    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    fn description(&self, entity_name: &str) -> StoreResult<&Arc<EntityDescription>> {
        self.model
            .entity(entity_name)
            .ok_or_else(|| StoreError::UnknownEntity(entity_name.to_string()))
    }

    /// Compiles a fetch request into SQL plus bind values. The request is
    /// validated against the description before anything is interpolated.
    fn select_sql(
        &self,
        request: &FetchRequest,
        description: &EntityDescription,
    ) -> StoreResult<(String, Vec<Value>)> {
        request.validate(description)?;

        let table = table_name(&self.prefix, description.name());
        let mut sql = select_columns_sql(&table, description);
        let mut binds = Vec::new();

        if !matches!(request.predicate(), Predicate::All) {
            sql.push_str(" WHERE ");
            request.predicate().to_sql(&mut sql, &mut binds);
        }

        sql.push_str(" ORDER BY ");
        for sort in request.sorts() {
            sql.push_str(&format!(
                "\"{}\" {}, ",
                sort.key,
                if sort.ascending { "ASC" } else { "DESC" }
            ));
        }
        sql.push_str("uuid ASC");

        if let Some(limit) = request.limit() {
            sql.push_str(" LIMIT ?");
            binds.push(Value::Int(i64::from(limit)));
            if request.offset() > 0 {
                sql.push_str(" OFFSET ?");
                binds.push(Value::Int(i64::from(request.offset())));
            }
        } else if request.offset() > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            binds.push(Value::Int(i64::from(request.offset())));
        }

        Ok((sql, binds))
    }
}

impl EntityStore for SqliteEntityStore {
    fn insert(&self, entity: &Entity) -> StoreResult<()> {
        insert_row(&self.conn, &self.prefix, entity)
    }

    fn update(&self, entity: &Entity) -> StoreResult<()> {
        update_row(&self.conn, &self.prefix, entity)
    }

    fn delete(&self, entity_name: &str, id: EntityId) -> StoreResult<()> {
        let table = table_name(&self.prefix, self.description(entity_name)?.name());
        delete_row(&self.conn, &table, id)
    }

    fn select(&self, request: &FetchRequest) -> StoreResult<Vec<Entity>> {
        let description = Arc::clone(self.description(request.entity())?);
        let (sql, binds) = self.select_sql(request, &description)?;

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(binds.iter().map(value_to_sql)))?;
        let mut entities = Vec::new();
        while let Some(row) = rows.next()? {
            entities.push(parse_row(&description, row)?);
        }
        Ok(entities)
    }

    fn select_by_id(&self, entity_name: &str, id: EntityId) -> StoreResult<Option<Entity>> {
        let description = Arc::clone(self.description(entity_name)?);
        let table = table_name(&self.prefix, description.name());
        let sql = format!(
            "{} WHERE uuid = ?1",
            select_columns_sql(&table, &description)
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([id.to_string()])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_row(&description, row)?));
        }
        Ok(None)
    }

    fn count(&self, request: &FetchRequest) -> StoreResult<u64> {
        let description = self.description(request.entity())?;
        request.validate(description)?;

        let table = table_name(&self.prefix, description.name());
        let mut sql = format!("SELECT COUNT(*) FROM \"{table}\"");
        let mut binds = Vec::new();
        if !matches!(request.predicate(), Predicate::All) {
            sql.push_str(" WHERE ");
            request.predicate().to_sql(&mut sql, &mut binds);
        }

        let count: i64 = self.conn.query_row(
            &sql,
            params_from_iter(binds.iter().map(value_to_sql)),
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn apply(&mut self, batch: &[PendingOp<'_>]) -> StoreResult<()> {
        let prefix = self.prefix.clone();
        let tx = self.conn.transaction()?;
        for op in batch {
            match op {
                PendingOp::Insert(entity) => insert_row(&tx, &prefix, entity)?,
                PendingOp::Update(entity) => update_row(&tx, &prefix, entity)?,
                PendingOp::Delete { entity, id } => {
                    let table = table_name(&prefix, entity);
                    delete_row(&tx, &table, *id)?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }
}

fn select_columns_sql(table: &str, description: &EntityDescription) -> String {
    let mut sql = String::from("SELECT uuid");
    for attr in description.attributes() {
        sql.push_str(&format!(", \"{}\"", attr.name));
    }
    sql.push_str(&format!(" FROM \"{table}\""));
    sql
}

fn insert_row(conn: &Connection, prefix: &str, entity: &Entity) -> StoreResult<()> {
    let description = entity.description();
    let table = table_name(prefix, description.name());

    let mut columns = String::from("uuid");
    let mut placeholders = String::from("?1");
    for (index, attr) in description.attributes().iter().enumerate() {
        columns.push_str(&format!(", \"{}\"", attr.name));
        placeholders.push_str(&format!(", ?{}", index + 2));
    }

    let mut binds: Vec<rusqlite::types::Value> =
        vec![rusqlite::types::Value::Text(entity.id().to_string())];
    for attr in description.attributes() {
        binds.push(value_to_sql(entity.raw(&attr.name)));
    }

    conn.execute(
        &format!("INSERT INTO \"{table}\" ({columns}) VALUES ({placeholders});"),
        params_from_iter(binds),
    )?;
    Ok(())
}

fn update_row(conn: &Connection, prefix: &str, entity: &Entity) -> StoreResult<()> {
    let description = entity.description();
    let table = table_name(prefix, description.name());

    if description.attributes().is_empty() {
        // Nothing to write; existence check only.
        let exists: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM \"{table}\" WHERE uuid = ?1;"),
            [entity.id().to_string()],
            |row| row.get(0),
        )?;
        if exists == 0 {
            return Err(StoreError::NotFound(entity.id()));
        }
        return Ok(());
    }

    let mut assignments = String::new();
    for (index, attr) in description.attributes().iter().enumerate() {
        if index > 0 {
            assignments.push_str(", ");
        }
        assignments.push_str(&format!("\"{}\" = ?{}", attr.name, index + 1));
    }
    let uuid_placeholder = description.attributes().len() + 1;

    let mut binds: Vec<rusqlite::types::Value> = description
        .attributes()
        .iter()
        .map(|attr| value_to_sql(entity.raw(&attr.name)))
        .collect();
    binds.push(rusqlite::types::Value::Text(entity.id().to_string()));

    let changed = conn.execute(
        &format!("UPDATE \"{table}\" SET {assignments} WHERE uuid = ?{uuid_placeholder};"),
        params_from_iter(binds),
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(entity.id()));
    }
    Ok(())
}

fn delete_row(conn: &Connection, table: &str, id: EntityId) -> StoreResult<()> {
    let changed = conn.execute(
        &format!("DELETE FROM \"{table}\" WHERE uuid = ?1;"),
        [id.to_string()],
    )?;
    if changed == 0 {
        return Err(StoreError::NotFound(id));
    }
    Ok(())
}

fn value_to_sql(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(flag) => rusqlite::types::Value::Integer(i64::from(*flag)),
        Value::Int(number) => rusqlite::types::Value::Integer(*number),
        Value::Real(number) => rusqlite::types::Value::Real(*number),
        Value::Text(text) => rusqlite::types::Value::Text(text.clone()),
        Value::Blob(bytes) => rusqlite::types::Value::Blob(bytes.clone()),
    }
}

fn parse_row(description: &Arc<EntityDescription>, row: &Row<'_>) -> StoreResult<Entity> {
    let uuid_text: String = row.get(0)?;
    let id = Uuid::parse_str(&uuid_text).map_err(|_| {
        StoreError::InvalidData(format!("invalid uuid value `{uuid_text}` in primary key"))
    })?;

    let mut values = BTreeMap::new();
    for (index, attr) in description.attributes().iter().enumerate() {
        let value = column_value(row, index + 1, attr.kind, &attr.name)?;
        if !value.is_null() {
            values.insert(attr.name.clone(), value);
        }
    }

    Ok(Entity::from_parts(Arc::clone(description), id, values))
}

fn column_value(row: &Row<'_>, index: usize, kind: AttributeKind, name: &str) -> StoreResult<Value> {
    let value_ref = row.get_ref(index)?;
    let mismatch = |found: &str| {
        StoreError::InvalidData(format!(
            "column `{name}` holds {found}, model expects {}",
            kind.name()
        ))
    };
    match value_ref {
        ValueRef::Null => Ok(Value::Null),
        ValueRef::Integer(number) => match kind {
            AttributeKind::Bool => match number {
                0 => Ok(Value::Bool(false)),
                1 => Ok(Value::Bool(true)),
                other => Err(StoreError::InvalidData(format!(
                    "column `{name}` holds non-boolean integer `{other}`"
                ))),
            },
            AttributeKind::Int => Ok(Value::Int(number)),
            AttributeKind::Real => Ok(Value::Real(number as f64)),
            _ => Err(mismatch("an integer")),
        },
        ValueRef::Real(number) => match kind {
            AttributeKind::Real => Ok(Value::Real(number)),
            _ => Err(mismatch("a real")),
        },
        ValueRef::Text(bytes) => match kind {
            AttributeKind::Text => String::from_utf8(bytes.to_vec())
                .map(Value::Text)
                .map_err(|_| mismatch("non-utf8 text")),
            _ => Err(mismatch("text")),
        },
        ValueRef::Blob(bytes) => match kind {
            AttributeKind::Blob => Ok(Value::Blob(bytes.to_vec())),
            _ => Err(mismatch("a blob")),
        },
    }
}

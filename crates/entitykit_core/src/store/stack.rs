//! Caller-owned persistence stack: model + store + unit-of-work + config.
//!
//! # Responsibility
//! - Bundle the persistence triple behind one explicitly constructed
//!   handle; there is no process-wide singleton.
//! - Orchestrate fetch/find/find-or-create/lifecycle/save operations,
//!   overlaying pending unit-of-work state on store reads.
//!
//! # Invariants
//! - Reads see pending inserts/updates/deletes of the target context.
//! - find-or-create never commits; ambiguity resolves to the first match
//!   of the deterministic lookup order (sorts, then `uuid ASC`).
//! - A failed save leaves the context dirty so the caller may retry.

use crate::model::entity::{Entity, EntityId};
use crate::model::schema::{EntityDescription, Model};
use crate::model::value::Value;
use crate::query::fetch::{
    apply_window, group_into_sections, sort_entities, FetchRequest, Section, SortDescriptor,
};
use crate::query::predicate::Predicate;
use crate::query::QueryError;
use crate::repo::entity_store::{EntityStore, SqliteEntityStore};
use crate::repo::{StoreError, StoreResult};
use crate::store::context::Context;
use log::{error, info};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Stack-wide settings.
#[derive(Debug, Clone, Default)]
pub struct StackConfig {
    /// Prefix prepended to every physical table name.
    pub table_prefix: String,
    /// Sort keys applied to fetches that carry no explicit sort. Keys not
    /// declared by the fetched entity are skipped.
    pub default_sort_keys: Vec<String>,
    /// Section key used by `fetch_sections` when none is supplied.
    pub default_section_key: Option<String>,
}

/// The persistence triple (model, store coordinator, unit-of-work) as one
/// explicitly constructed, caller-owned handle.
#[derive(Debug)]
pub struct PersistenceStack<S: EntityStore = SqliteEntityStore> {
    model: Arc<Model>,
    store: S,
    context: Context,
    config: StackConfig,
}

impl PersistenceStack<SqliteEntityStore> {
    /// Opens a file-backed stack, applying the model schema.
    pub fn open(
        path: impl AsRef<Path>,
        model: Model,
        config: StackConfig,
    ) -> StoreResult<Self> {
        let model = Arc::new(model);
        let store = SqliteEntityStore::open(path, Arc::clone(&model), &config.table_prefix)?;
        Ok(Self::with_store(store, model, config))
    }

    /// Opens an in-memory stack, applying the model schema.
    pub fn open_in_memory(model: Model, config: StackConfig) -> StoreResult<Self> {
        let model = Arc::new(model);
        let store = SqliteEntityStore::open_in_memory(Arc::clone(&model), &config.table_prefix)?;
        Ok(Self::with_store(store, model, config))
    }
}

impl<S: EntityStore> PersistenceStack<S> {
    /// Builds a stack over an already-opened store backend.
    pub fn with_store(store: S, model: Arc<Model>, config: StackConfig) -> Self {
        Self {
            model,
            store,
            context: Context::new(),
            config,
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    /// The stack's shared unit-of-work.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// A fresh, independent unit-of-work against the same store.
    pub fn new_context(&self) -> Context {
        Context::new()
    }

    pub fn has_changes(&self) -> bool {
        self.context.has_changes()
    }

    // ---- lifecycle -------------------------------------------------------

    /// Creates a blank entity and registers it as a pending insert.
    pub fn create(&mut self, entity_name: &str) -> StoreResult<Entity> {
        create_in(&self.model, &mut self.context, entity_name)
    }

    pub fn create_in(&self, ctx: &mut Context, entity_name: &str) -> StoreResult<Entity> {
        create_in(&self.model, ctx, entity_name)
    }

    /// Registers a pending update for an entity owned by this context.
    pub fn update(&mut self, entity: &Entity) -> StoreResult<()> {
        self.context.register_update(entity.clone())
    }

    pub fn update_in(&self, ctx: &mut Context, entity: &Entity) -> StoreResult<()> {
        ctx.register_update(entity.clone())
    }

    /// Marks an entity for removal. Nothing persists until save.
    pub fn delete(&mut self, entity: &Entity) -> StoreResult<()> {
        delete_in(&mut self.context, entity)
    }

    pub fn delete_in(&self, ctx: &mut Context, entity: &Entity) -> StoreResult<()> {
        delete_in(ctx, entity)
    }

    /// Marks every entity of a type for removal, including pending inserts.
    pub fn delete_all(&mut self, entity_name: &str) -> StoreResult<()> {
        delete_all_in(
            &self.store,
            &self.model,
            &self.config,
            &mut self.context,
            entity_name,
        )
    }

    pub fn delete_all_in(&self, ctx: &mut Context, entity_name: &str) -> StoreResult<()> {
        delete_all_in(&self.store, &self.model, &self.config, ctx, entity_name)
    }

    // ---- fetch -----------------------------------------------------------

    /// Executes a fetch against the shared unit-of-work.
    pub fn fetch(&self, request: &FetchRequest) -> StoreResult<Vec<Entity>> {
        fetch_in(&self.store, &self.model, &self.config, &self.context, request)
    }

    pub fn fetch_in(&self, ctx: &Context, request: &FetchRequest) -> StoreResult<Vec<Entity>> {
        fetch_in(&self.store, &self.model, &self.config, ctx, request)
    }

    /// All entities of a type.
    pub fn fetch_all(&self, entity_name: &str) -> StoreResult<Vec<Entity>> {
        self.fetch(&FetchRequest::all(entity_name))
    }

    pub fn fetch_all_in(&self, ctx: &Context, entity_name: &str) -> StoreResult<Vec<Entity>> {
        self.fetch_in(ctx, &FetchRequest::all(entity_name))
    }

    /// Number of entities a request would return, pending changes included.
    pub fn count(&self, request: &FetchRequest) -> StoreResult<u64> {
        count_in(&self.store, &self.model, &self.config, &self.context, request)
    }

    pub fn count_in(&self, ctx: &Context, request: &FetchRequest) -> StoreResult<u64> {
        count_in(&self.store, &self.model, &self.config, ctx, request)
    }

    // ---- find ------------------------------------------------------------

    /// First entity matching a predicate, in deterministic lookup order.
    pub fn find(&self, entity_name: &str, predicate: &Predicate) -> StoreResult<Option<Entity>> {
        let request = FetchRequest::filtered(entity_name, predicate.clone()).with_limit(1);
        Ok(self.fetch(&request)?.pop())
    }

    /// First entity with `key = value`.
    pub fn find_with_value(
        &self,
        entity_name: &str,
        key: &str,
        value: impl Into<Value>,
    ) -> StoreResult<Option<Entity>> {
        self.find(entity_name, &Predicate::eq(key, value))
    }

    /// All entities matching a predicate.
    pub fn find_all(&self, entity_name: &str, predicate: &Predicate) -> StoreResult<Vec<Entity>> {
        self.fetch(&FetchRequest::filtered(entity_name, predicate.clone()))
    }

    /// All entities matching every `(key, value)` equality constraint.
    pub fn find_all_with_pairs(
        &self,
        entity_name: &str,
        pairs: &[(&str, Value)],
    ) -> StoreResult<Vec<Entity>> {
        self.find_all(entity_name, &pairs_predicate(pairs))
    }

    // ---- find-or-create --------------------------------------------------

    /// Returns the unique entity matching every `(key, value)` constraint,
    /// creating and seeding one as a pending insert when none matches.
    ///
    /// Never commits. If several entities match, the first one in lookup
    /// order (`uuid ASC`) is returned; none are merged or deleted.
    pub fn find_or_create(
        &mut self,
        entity_name: &str,
        pairs: &[(&str, Value)],
    ) -> StoreResult<Entity> {
        find_or_create_in(
            &self.store,
            &self.model,
            &self.config,
            &mut self.context,
            entity_name,
            &pairs_predicate(pairs),
            pairs,
        )
    }

    pub fn find_or_create_in(
        &self,
        ctx: &mut Context,
        entity_name: &str,
        pairs: &[(&str, Value)],
    ) -> StoreResult<Entity> {
        find_or_create_in(
            &self.store,
            &self.model,
            &self.config,
            ctx,
            entity_name,
            &pairs_predicate(pairs),
            pairs,
        )
    }

    /// Predicate-form find-or-create: the predicate is used as-is for the
    /// lookup; `seed` values are assigned only when a new entity is created.
    pub fn find_or_create_matching(
        &mut self,
        entity_name: &str,
        predicate: &Predicate,
        seed: &[(&str, Value)],
    ) -> StoreResult<Entity> {
        find_or_create_in(
            &self.store,
            &self.model,
            &self.config,
            &mut self.context,
            entity_name,
            predicate,
            seed,
        )
    }

    // ---- identity and refresh --------------------------------------------

    /// Forces an entity's snapshot to be re-read from the backing store,
    /// discarding any pending update for it.
    pub fn refresh(&mut self, entity: &mut Entity) -> StoreResult<()> {
        refresh_in(&self.store, &mut self.context, entity)
    }

    pub fn refresh_in(&self, ctx: &mut Context, entity: &mut Entity) -> StoreResult<()> {
        refresh_in(&self.store, ctx, entity)
    }

    /// Cross-context materialization: resolves an entity obtained in some
    /// other unit-of-work into a handle valid in this stack's context.
    pub fn materialize(&self, entity: &Entity) -> StoreResult<Entity> {
        materialize_in(&self.store, &self.context, entity)
    }

    pub fn materialize_in(&self, ctx: &Context, entity: &Entity) -> StoreResult<Entity> {
        materialize_in(&self.store, ctx, entity)
    }

    // ---- sections ---------------------------------------------------------

    /// Executes a fetch and partitions the ordered result by a key's value.
    pub fn fetch_grouped(
        &self,
        request: &FetchRequest,
        section_key: &str,
    ) -> StoreResult<Vec<Section>> {
        let description = description(&self.model, request.entity())?;
        if description.attribute(section_key).is_none() {
            return Err(QueryError::UnknownKey {
                entity: description.name().to_string(),
                key: section_key.to_string(),
            }
            .into());
        }
        let rows = self.fetch(request)?;
        Ok(group_into_sections(rows, section_key))
    }

    /// All entities of a type, sorted and grouped by the configured default
    /// section key.
    pub fn fetch_sections(&self, entity_name: &str) -> StoreResult<Vec<Section>> {
        let key = self
            .config
            .default_section_key
            .clone()
            .ok_or(QueryError::MissingSectionKey)?;
        let request =
            FetchRequest::all(entity_name).sorted_by(SortDescriptor::asc(key.clone()));
        self.fetch_grouped(&request, &key)
    }

    // ---- save --------------------------------------------------------------

    /// Commits all pending changes in the shared unit-of-work.
    pub fn save(&mut self) -> StoreResult<()> {
        save_in(&mut self.store, &mut self.context)
    }

    pub fn save_in(&mut self, ctx: &mut Context) -> StoreResult<()> {
        save_in(&mut self.store, ctx)
    }
}

// ---- operation bodies ------------------------------------------------------
//
// Free functions over the stack's parts, so public wrappers can borrow
// `self` fields disjointly for default-context and explicit-context calls.

fn description<'m>(model: &'m Model, entity_name: &str) -> StoreResult<&'m Arc<EntityDescription>> {
    model
        .entity(entity_name)
        .ok_or_else(|| StoreError::UnknownEntity(entity_name.to_string()))
}

fn pairs_predicate(pairs: &[(&str, Value)]) -> Predicate {
    Predicate::and(
        pairs
            .iter()
            .map(|(key, value)| Predicate::eq(*key, value.clone()))
            .collect(),
    )
}

fn create_in(model: &Arc<Model>, ctx: &mut Context, entity_name: &str) -> StoreResult<Entity> {
    let desc = description(model, entity_name)?;
    let mut entity = Entity::blank(Arc::clone(desc));
    ctx.claim(&mut entity);
    ctx.register_insert(entity.clone())?;
    Ok(entity)
}

fn delete_in(ctx: &mut Context, entity: &Entity) -> StoreResult<()> {
    ctx.check_ownership(entity)?;
    ctx.register_delete(entity.entity_name(), entity.id());
    Ok(())
}

fn delete_all_in<S: EntityStore>(
    store: &S,
    model: &Arc<Model>,
    config: &StackConfig,
    ctx: &mut Context,
    entity_name: &str,
) -> StoreResult<()> {
    let rows = fetch_in(store, model, config, ctx, &FetchRequest::all(entity_name))?;
    for entity in rows {
        ctx.register_delete(entity_name, entity.id());
    }
    Ok(())
}

fn fetch_in<S: EntityStore>(
    store: &S,
    model: &Arc<Model>,
    config: &StackConfig,
    ctx: &Context,
    request: &FetchRequest,
) -> StoreResult<Vec<Entity>> {
    let desc = description(model, request.entity())?;
    let mut request = request.clone();
    if request.sorts().is_empty() && !config.default_sort_keys.is_empty() {
        let sorts: Vec<SortDescriptor> = config
            .default_sort_keys
            .iter()
            .filter(|key| desc.attribute(key.as_str()).is_some())
            .map(|key| SortDescriptor::asc(key.clone()))
            .collect();
        request.set_sorts(sorts);
    }
    request.validate(desc)?;

    let overlay = ctx.overlay_for(request.entity());
    if overlay.is_empty() {
        let mut rows = store.select(&request)?;
        for entity in &mut rows {
            ctx.claim(entity);
        }
        return Ok(rows);
    }

    // Pending state exists for this type: run the query unwindowed, merge
    // the overlay, then re-sort and re-window in memory.
    let mut sql_request = request.clone();
    sql_request.clear_window();
    let mut rows = store.select(&sql_request)?;

    let deleted: HashSet<EntityId> = overlay.deleted.iter().copied().collect();
    rows.retain(|entity| !deleted.contains(&entity.id()));

    for snapshot in overlay.updated {
        let matches = request.predicate().matches(snapshot);
        match rows.iter().position(|entity| entity.id() == snapshot.id()) {
            Some(position) if matches => rows[position] = snapshot.clone(),
            Some(position) => {
                rows.remove(position);
            }
            None if matches => rows.push(snapshot.clone()),
            None => {}
        }
    }
    for snapshot in overlay.inserted {
        if request.predicate().matches(snapshot) {
            rows.push(snapshot.clone());
        }
    }

    sort_entities(&mut rows, request.sorts());
    let mut rows = apply_window(rows, request.offset(), request.limit());
    for entity in &mut rows {
        ctx.claim(entity);
    }
    Ok(rows)
}

fn count_in<S: EntityStore>(
    store: &S,
    model: &Arc<Model>,
    config: &StackConfig,
    ctx: &Context,
    request: &FetchRequest,
) -> StoreResult<u64> {
    if ctx.overlay_for(request.entity()).is_empty() {
        let desc = description(model, request.entity())?;
        request.validate(desc)?;
        // The SQL COUNT(*) ignores LIMIT/OFFSET; clamp here so windowed
        // requests count the same rows a fetch would return.
        let total = store.count(request)?;
        let after_offset = total.saturating_sub(u64::from(request.offset()));
        return Ok(match request.limit() {
            Some(limit) => after_offset.min(u64::from(limit)),
            None => after_offset,
        });
    }
    Ok(fetch_in(store, model, config, ctx, request)?.len() as u64)
}

fn find_or_create_in<S: EntityStore>(
    store: &S,
    model: &Arc<Model>,
    config: &StackConfig,
    ctx: &mut Context,
    entity_name: &str,
    predicate: &Predicate,
    seed: &[(&str, Value)],
) -> StoreResult<Entity> {
    let request = FetchRequest::filtered(entity_name, predicate.clone()).with_limit(1);
    if let Some(existing) = fetch_in(store, model, config, ctx, &request)?.pop() {
        return Ok(existing);
    }

    let desc = description(model, entity_name)?;
    let mut entity = Entity::blank(Arc::clone(desc));
    for (key, value) in seed {
        entity.set(key, value.clone())?;
    }
    ctx.claim(&mut entity);
    ctx.register_insert(entity.clone())?;
    Ok(entity)
}

fn refresh_in<S: EntityStore>(
    store: &S,
    ctx: &mut Context,
    entity: &mut Entity,
) -> StoreResult<()> {
    ctx.check_ownership(entity)?;
    match store.select_by_id(entity.entity_name(), entity.id())? {
        Some(fresh) => {
            entity.replace_values(fresh.into_values());
            ctx.drop_pending_update(entity.id());
            Ok(())
        }
        None => Err(StoreError::NotFound(entity.id())),
    }
}

fn materialize_in<S: EntityStore>(
    store: &S,
    ctx: &Context,
    entity: &Entity,
) -> StoreResult<Entity> {
    if ctx.is_pending_delete(entity.id()) {
        return Err(StoreError::NotFound(entity.id()));
    }
    if let Some(snapshot) = ctx.pending_snapshot(entity.id()) {
        let mut resolved = snapshot.clone();
        ctx.claim(&mut resolved);
        return Ok(resolved);
    }
    match store.select_by_id(entity.entity_name(), entity.id())? {
        Some(mut resolved) => {
            ctx.claim(&mut resolved);
            Ok(resolved)
        }
        None => Err(StoreError::NotFound(entity.id())),
    }
}

fn save_in<S: EntityStore>(store: &mut S, ctx: &mut Context) -> StoreResult<()> {
    if !ctx.has_changes() {
        info!("event=save module=store status=ok changes=0");
        return Ok(());
    }

    let (inserts, updates, deletes) = ctx.change_counts();
    let started_at = Instant::now();
    let result = {
        let batch = ctx.batch();
        store.apply(&batch)
    };
    match result {
        Ok(()) => {
            ctx.clear();
            info!(
                "event=save module=store status=ok inserts={inserts} updates={updates} deletes={deletes} duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(())
        }
        Err(err) => {
            error!(
                "event=save module=store status=error inserts={inserts} updates={updates} deletes={deletes} duration_ms={} error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

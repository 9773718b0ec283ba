//! The registry: definitions, the shared connection, and the entity
//! lifecycle.
//!
//! A [`Registry`] owns the catalog of definitions, one database
//! connection guarded by a mutex, the read cache, hook and wrap tables,
//! and the token source. Definition and hook registration take `&mut
//! self` (setup phase); every runtime operation takes `&self` and is
//! safe to call from multiple threads.
//!
//! Hooks always run outside the connection lock, so a hook may call back
//! into the registry without deadlocking.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, warn};

use entorm_core::field::quote_text;
use entorm_core::{
    compose_ref, Catalog, ConcurrencyMode, Connection, DefId, Dialect, EntityDef, Error,
    FieldKind, Result, SystemTokenSource, TokenSource, Value,
};
use entorm_query::{build_count, build_select, pages_count, Filter, Page, Sort};
use entorm_schema::{ensure_ref_column_type, ensure_table, reconcile_indexes};

use crate::cache::ReadCache;
use crate::entity::Entity;
use crate::hook::{Hook, HookEvent, HookSet};

/// Projection installed per definition, handed clones of instances.
pub type WrapFn = Arc<dyn Fn(&Entity) -> Box<dyn Any + Send> + Send + Sync>;

/// Tunable construction parameters for a [`Registry`].
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    dialect: Dialect,
    cache_capacity: usize,
    cache_ttl: Duration,
    concurrency_default: ConcurrencyMode,
    aggressive_cache: bool,
}

impl RegistryOptions {
    /// Defaults: 1024 cached instances, 10 minute TTL, version checks on,
    /// cache hits verified against storage.
    #[must_use]
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            cache_capacity: 1024,
            cache_ttl: Duration::from_secs(600),
            concurrency_default: ConcurrencyMode::Always,
            aggressive_cache: false,
        }
    }

    #[must_use]
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    #[must_use]
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Fallback applied where a definition leaves its concurrency mode at
    /// [`ConcurrencyMode::Default`].
    #[must_use]
    pub fn concurrency_default(mut self, mode: ConcurrencyMode) -> Self {
        self.concurrency_default = mode;
        self
    }

    /// Trust cache hits without re-checking the stored version token.
    /// Only safe when this process is the sole writer.
    #[must_use]
    pub fn aggressive_cache(mut self, aggressive: bool) -> Self {
        self.aggressive_cache = aggressive;
        self
    }
}

/// Connection-side state, all behind one lock: the driver session, the
/// nesting depth of the logical transaction, and the read cache.
struct Core {
    conn: Box<dyn Connection>,
    tx_depth: u32,
    cache: ReadCache,
}

impl Core {
    /// Open the real transaction only at the outermost scope.
    fn begin(&mut self) -> Result<()> {
        if self.tx_depth == 0 {
            self.conn.begin()?;
        }
        self.tx_depth += 1;
        Ok(())
    }

    /// Commit the real transaction when the outermost scope closes. A
    /// failed driver commit rolls back so the session is never left with
    /// a transaction half open.
    fn commit(&mut self) -> Result<()> {
        if self.tx_depth == 0 {
            return Err(Error::backend("commit", "no open transaction"));
        }
        self.tx_depth -= 1;
        if self.tx_depth == 0 {
            if let Err(e) = self.conn.commit() {
                let _ = self.conn.rollback();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Roll back and close every open scope: inner scopes cannot be
    /// undone in isolation on a single connection.
    fn rollback(&mut self) -> Result<()> {
        if self.tx_depth == 0 {
            return Ok(());
        }
        self.tx_depth = 0;
        self.conn.rollback()
    }
}

/// Result of a [`Registry::select`]: the matching instances plus, when
/// the query was paginated, the total page count for the filter.
#[derive(Debug)]
pub struct SelectResult {
    pub entities: Vec<Entity>,
    pub total_pages: Option<u64>,
}

/// The persistence engine.
pub struct Registry {
    catalog: Catalog,
    core: Mutex<Core>,
    hooks: HashMap<DefId, HookSet>,
    wraps: HashMap<DefId, WrapFn>,
    token_source: Arc<dyn TokenSource>,
    options: RegistryOptions,
}

impl Registry {
    #[must_use]
    pub fn new(conn: Box<dyn Connection>, options: RegistryOptions) -> Self {
        Self::with_token_source(conn, options, Arc::new(SystemTokenSource::new()))
    }

    /// Construct with an explicit token source (tests pin deterministic
    /// tokens this way).
    #[must_use]
    pub fn with_token_source(
        conn: Box<dyn Connection>,
        options: RegistryOptions,
        token_source: Arc<dyn TokenSource>,
    ) -> Self {
        let cache = ReadCache::new(options.cache_capacity, options.cache_ttl);
        Self {
            catalog: Catalog::new(),
            core: Mutex::new(Core {
                conn,
                tx_depth: 0,
                cache,
            }),
            hooks: HashMap::new(),
            wraps: HashMap::new(),
            token_source,
            options,
        }
    }

    #[must_use]
    pub fn dialect(&self) -> Dialect {
        self.options.dialect
    }

    #[must_use]
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    // -------------------------------------------------------------------
    // registration
    // -------------------------------------------------------------------

    /// Register a new definition; see [`Catalog::define`].
    pub fn define(&mut self, name: &str) -> Result<DefId> {
        self.catalog.define(name)
    }

    #[must_use]
    pub fn def(&self, id: DefId) -> &EntityDef {
        self.catalog.def(id)
    }

    pub fn def_mut(&mut self, id: DefId) -> &mut EntityDef {
        self.catalog.def_mut(id)
    }

    /// True when the string is a well-formed reference to a registered
    /// definition; answered from the string alone.
    #[must_use]
    pub fn is_ref(&self, candidate: &str) -> bool {
        self.catalog.is_ref(candidate)
    }

    /// Attach a hook to one definition.
    pub fn add_hook(&mut self, def_id: DefId, event: HookEvent, hook: Hook) {
        self.hooks.entry(def_id).or_default().add(event, hook);
    }

    /// Attach a hook to every definition tagged with `fragment`. At
    /// least one definition must carry the tag.
    pub fn add_hook_to_fragment(
        &mut self,
        fragment: &str,
        event: HookEvent,
        hook: Hook,
    ) -> Result<()> {
        let targets: Vec<DefId> = self
            .catalog
            .iter()
            .filter(|d| d.has_fragment(fragment))
            .map(EntityDef::id)
            .collect();
        if targets.is_empty() {
            return Err(Error::DefinitionConflict(format!(
                "no definition carries fragment {fragment}"
            )));
        }
        for def_id in targets {
            self.hooks
                .entry(def_id)
                .or_default()
                .add(event, hook.clone());
        }
        Ok(())
    }

    /// Install the wrap projection for one definition.
    pub fn set_wrap(&mut self, def_id: DefId, wrap: WrapFn) {
        self.wraps.insert(def_id, wrap);
    }

    // -------------------------------------------------------------------
    // transactions
    // -------------------------------------------------------------------

    /// Open a logical transaction scope. Scopes nest: only the outermost
    /// one maps to a driver transaction.
    pub fn begin_transaction(&self) -> Result<()> {
        self.core.lock().begin()
    }

    /// Close the innermost scope, committing for real at the outermost.
    pub fn commit_transaction(&self) -> Result<()> {
        self.core.lock().commit()
    }

    /// Abort: rolls back the driver transaction and closes all scopes.
    pub fn rollback_transaction(&self) -> Result<()> {
        self.core.lock().rollback()
    }

    // -------------------------------------------------------------------
    // lifecycle
    // -------------------------------------------------------------------

    /// Fresh zero-valued instance with a newly minted reference. Fill-new
    /// hooks run before it is returned; nothing touches storage.
    pub fn create(&self, def_id: DefId) -> Result<Entity> {
        let def = self.catalog.def(def_id);
        let token = self.token_source.next_token();
        let reference = compose_ref(&token, def.sql_table_name());
        debug!(reference, "create");
        let mut entity = Entity::new(def, reference.clone());
        self.run_hooks(def_id, HookEvent::FillNew, &reference, Some(&mut entity))?;
        if self.options.aggressive_cache {
            self.core.lock().cache.put(entity.clone());
        }
        Ok(entity)
    }

    /// Load the instance a reference describes, via the read cache.
    pub fn load(&self, reference: &str) -> Result<Entity> {
        let def_id = self.catalog.resolve_ref(reference)?;
        let def = self.catalog.def(def_id);
        let mode = def.concurrency.resolve(self.options.concurrency_default);
        let mut core = self.core.lock();
        if let Some(cached) = core.cache.get(reference) {
            if self.options.aggressive_cache || mode == ConcurrencyMode::Never {
                return Ok(cached);
            }
            // Cheap freshness probe before trusting the cached copy.
            let probe = format!(
                "select 1 from {} where ref = {} and dataversion = {}",
                def.sql_table_name(),
                quote_text(reference),
                quote_text(&cached.data_version())
            );
            if !core.conn.query(&probe)?.is_empty() {
                return Ok(cached);
            }
            debug!(reference, "cached copy stale, reloading");
            core.cache.evict(reference);
        }
        let columns: Vec<String> = def.fields().iter().map(|f| f.sql_name()).collect();
        let sql = format!(
            "select {} from {} where ref = {}",
            columns.join(", "),
            def.sql_table_name(),
            quote_text(reference)
        );
        let rows = core.conn.query(&sql)?;
        let Some(row) = rows.into_iter().next() else {
            return Err(Error::NotFound(reference.to_string()));
        };
        let entity = Entity::from_row(&self.catalog, def, row.into_values())?;
        core.cache.put(entity.clone());
        Ok(entity)
    }

    /// Persist the instance: INSERT when new, full-row UPDATE otherwise.
    ///
    /// Every save mints a fresh version token. When the effective
    /// concurrency mode is [`ConcurrencyMode::Always`], the UPDATE is
    /// guarded by the previously loaded token; a guard miss restores the
    /// instance's token, rolls back, and surfaces
    /// [`Error::StaleWrite`].
    pub fn save(&self, entity: &mut Entity) -> Result<()> {
        let def = self.catalog.def(entity.def_id());
        let reference = entity.reference().to_string();
        debug!(reference, is_new = entity.is_new(), "save");
        if entity.is_deleted() && !def.soft_delete {
            return Err(Error::InvalidQuery(format!(
                "{} does not allow soft deletion",
                def.name()
            )));
        }
        self.run_hooks(def.id(), HookEvent::BeforeSave, &reference, Some(entity))?;

        let old_version = entity.data_version();
        let new_version = self.token_source.next_token();
        entity.set_value(
            def,
            EntityDef::DATA_VERSION,
            Value::Text(new_version),
        )?;
        let check = !entity.is_new()
            && def.concurrency.resolve(self.options.concurrency_default)
                == ConcurrencyMode::Always;
        let sql = if entity.is_new() {
            render_insert(def, self.options.dialect, entity)?
        } else {
            render_update(
                def,
                self.options.dialect,
                entity,
                &reference,
                check.then_some(old_version.as_str()),
            )?
        };

        let stored = self.execute_save(&sql, entity.is_new(), check, &reference);
        if let Err(e) = stored {
            // Put the token back so a retry compares against the right one.
            entity.set_value(def, EntityDef::DATA_VERSION, Value::Text(old_version))?;
            if matches!(e, Error::StaleWrite(_)) {
                warn!(reference, "stale write rejected");
            }
            return Err(e);
        }
        entity.mark_persisted();
        let hook_result =
            self.run_hooks(def.id(), HookEvent::AfterSave, &reference, Some(entity));
        self.core.lock().cache.put(entity.clone());
        hook_result
    }

    fn execute_save(&self, sql: &str, is_new: bool, check: bool, reference: &str) -> Result<()> {
        let mut core = self.core.lock();
        core.begin()?;
        match core.conn.execute(sql) {
            Ok(affected) => {
                let row_ok = is_new || if check { affected == 1 } else { affected > 0 };
                if row_ok {
                    core.cache.evict(reference);
                    core.commit()
                } else {
                    let _ = core.rollback();
                    if check {
                        Err(Error::StaleWrite(reference.to_string()))
                    } else {
                        Err(Error::NotFound(reference.to_string()))
                    }
                }
            }
            Err(e) => {
                let _ = core.rollback();
                Err(e)
            }
        }
    }

    /// Remove the instance a reference describes: flags it when the
    /// definition enables soft deletion, physically deletes otherwise.
    ///
    /// A soft delete is a regular save of the flagged instance, so the
    /// whole save pipeline applies: before/after-save hooks run, a fresh
    /// version token is minted, and the concurrency guard compares
    /// against the loaded one.
    pub fn delete(&self, reference: &str) -> Result<()> {
        let def_id = self.catalog.resolve_ref(reference)?;
        let def = self.catalog.def(def_id);
        debug!(reference, soft = def.soft_delete, "delete");
        if def.soft_delete {
            let mut entity = self.load(reference)?;
            self.run_hooks(def_id, HookEvent::BeforeDelete, reference, Some(&mut entity))?;
            entity.set_deleted(true);
            return self.save(&mut entity);
        }
        if let Some(set) = self.hooks.get(&def_id) {
            // The instance is only materialized when a full hook needs it.
            if set.has_full(HookEvent::BeforeDelete) {
                let mut entity = self.load(reference)?;
                set.run(HookEvent::BeforeDelete, reference, Some(&mut entity))?;
            } else {
                set.run(HookEvent::BeforeDelete, reference, None)?;
            }
        }
        let sql = format!(
            "delete from {} where ref = {}",
            def.sql_table_name(),
            quote_text(reference)
        );
        let mut core = self.core.lock();
        core.begin()?;
        match core.conn.execute(&sql) {
            Ok(0) => {
                let _ = core.rollback();
                Err(Error::NotFound(reference.to_string()))
            }
            Ok(_) => {
                core.cache.evict(reference);
                core.commit()
            }
            Err(e) => {
                let _ = core.rollback();
                Err(e)
            }
        }
    }

    /// Query instances of one definition.
    ///
    /// Filters are joined with `and`; `sort: None` applies the default
    /// reference ordering. When a page is requested the COUNT form of the
    /// query also runs and the total page count is returned alongside.
    pub fn select(
        &self,
        def_id: DefId,
        filters: &[Filter],
        sort: Option<&[Sort]>,
        page: Option<Page>,
    ) -> Result<SelectResult> {
        let def = self.catalog.def(def_id);
        let sql = build_select(&self.catalog, def, self.options.dialect, filters, sort, page)?;
        debug!(table = def.sql_table_name(), "select");
        let mut core = self.core.lock();
        let rows = core.conn.query(&sql)?;
        let mut entities = Vec::with_capacity(rows.len());
        for row in rows {
            let entity = Entity::from_row(&self.catalog, def, row.into_values())?;
            let reference = entity.reference().to_string();
            // A cached copy at the same version wins so callers observe
            // one coherent instance; a diverged copy is evicted.
            if let Some(cached) = core.cache.get(&reference) {
                if cached.data_version() == entity.data_version() {
                    entities.push(cached);
                    continue;
                }
                core.cache.evict(&reference);
            }
            core.cache.put(entity.clone());
            entities.push(entity);
        }
        let total_pages = match page {
            Some(page) => {
                let count_sql = build_count(&self.catalog, def, self.options.dialect, filters)?;
                let rows = core.conn.query(&count_sql)?;
                let total = rows.first().and_then(|r| r.get(0)).map_or(0, count_value);
                Some(pages_count(total, page.size))
            }
            None => None,
        };
        Ok(SelectResult {
            entities,
            total_pages,
        })
    }

    // -------------------------------------------------------------------
    // wrap projections
    // -------------------------------------------------------------------

    /// Run the definition's installed wrap projection over an instance.
    pub fn wrap(&self, entity: &Entity) -> Result<Box<dyn Any + Send>> {
        let def_id = entity.def_id();
        self.wraps.get(&def_id).map(|w| w(entity)).ok_or_else(|| {
            Error::DefinitionConflict(format!(
                "no wrap projection registered for {}",
                self.catalog.def(def_id).name()
            ))
        })
    }

    /// [`Registry::create`] followed by the wrap projection.
    pub fn create_wrapped(&self, def_id: DefId) -> Result<Box<dyn Any + Send>> {
        let entity = self.create(def_id)?;
        self.wrap(&entity)
    }

    /// [`Registry::load`] followed by the wrap projection.
    pub fn load_wrapped(&self, reference: &str) -> Result<Box<dyn Any + Send>> {
        let entity = self.load(reference)?;
        self.wrap(&entity)
    }

    // -------------------------------------------------------------------
    // JSON projection
    // -------------------------------------------------------------------

    /// [`Entity::to_json`] with reference fields expanded into nested
    /// objects, `depth` levels deep. Unresolvable or dangling references
    /// stay as plain strings.
    pub fn to_json_expanded(&self, entity: &Entity, depth: u32) -> Result<serde_json::Value> {
        let mut json = entity.to_json(&self.catalog);
        if depth == 0 {
            return Ok(json);
        }
        let def = self.catalog.def(entity.def_id());
        if let serde_json::Value::Object(map) = &mut json {
            for field in def.fields().iter().skip(1) {
                if !matches!(field.kind, FieldKind::Reference { .. }) {
                    continue;
                }
                let reference = entity.get_text(field.id);
                if !self.catalog.is_ref(&reference) {
                    continue;
                }
                if let Ok(target) = self.load(&reference) {
                    map.insert(
                        field.name.clone(),
                        self.to_json_expanded(&target, depth - 1)?,
                    );
                }
            }
        }
        Ok(json)
    }

    // -------------------------------------------------------------------
    // schema reconciliation
    // -------------------------------------------------------------------

    /// Converge one definition's table and indexes, in one transaction.
    pub fn reconcile(&self, def_id: DefId) -> Result<()> {
        let def = self.catalog.def(def_id);
        let dialect = self.options.dialect;
        let mut core = self.core.lock();
        core.begin()?;
        let result = reconcile_locked(&mut core, dialect, def);
        match result {
            Ok(()) => core.commit(),
            Err(e) => {
                let _ = core.rollback();
                Err(e)
            }
        }
    }

    /// Converge every registered definition, continuing past failures.
    /// Returns the per-definition failures; empty means full success.
    pub fn reconcile_all(&self) -> Vec<(String, Error)> {
        let mut failures = Vec::new();
        for def in self.catalog.iter() {
            if let Err(e) = self.reconcile(def.id()) {
                warn!(table = def.sql_table_name(), error = %e, "reconcile failed");
                failures.push((def.name().to_string(), e));
            }
        }
        failures
    }

    // -------------------------------------------------------------------
    // cache control
    // -------------------------------------------------------------------

    /// Drop one reference from the read cache.
    pub fn evict(&self, reference: &str) {
        self.core.lock().cache.evict(reference);
    }

    /// Drop every cached instance.
    pub fn clear_cache(&self) {
        self.core.lock().cache.clear();
    }

    fn run_hooks(
        &self,
        def_id: DefId,
        event: HookEvent,
        reference: &str,
        entity: Option<&mut Entity>,
    ) -> Result<()> {
        match self.hooks.get(&def_id) {
            Some(set) => set.run(event, reference, entity),
            None => Ok(()),
        }
    }
}

fn reconcile_locked(core: &mut Core, dialect: Dialect, def: &EntityDef) -> Result<()> {
    ensure_ref_column_type(core.conn.as_mut(), dialect)?;
    ensure_table(core.conn.as_mut(), dialect, def)?;
    reconcile_indexes(core.conn.as_mut(), dialect, def)?;
    Ok(())
}

fn render_insert(def: &EntityDef, dialect: Dialect, entity: &Entity) -> Result<String> {
    let mut columns = Vec::with_capacity(def.fields().len());
    let mut values = Vec::with_capacity(def.fields().len());
    for field in def.fields() {
        columns.push(field.sql_name());
        values.push(field.kind.render_literal(
            dialect,
            &entity.value(field.id),
            &field.name,
        )?);
    }
    Ok(format!(
        "insert into {} ({}) values ({})",
        def.sql_table_name(),
        columns.join(", "),
        values.join(", ")
    ))
}

fn render_update(
    def: &EntityDef,
    dialect: Dialect,
    entity: &Entity,
    reference: &str,
    version_guard: Option<&str>,
) -> Result<String> {
    let mut sets = Vec::with_capacity(def.fields().len());
    for field in def.fields() {
        if field.id == EntityDef::REF {
            continue;
        }
        let lit = field
            .kind
            .render_literal(dialect, &entity.value(field.id), &field.name)?;
        sets.push(format!("{} = {}", field.sql_name(), lit));
    }
    let mut sql = format!(
        "update {} set {} where ref = {}",
        def.sql_table_name(),
        sets.join(", "),
        quote_text(reference)
    );
    if let Some(old) = version_guard {
        sql.push_str(&format!(" and dataversion = {}", quote_text(old)));
    }
    Ok(sql)
}

fn count_value(value: &Value) -> u64 {
    match value {
        Value::Int(n) => u64::try_from(*n).unwrap_or(0),
        Value::Float(f) if *f >= 0.0 => *f as u64,
        Value::Text(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

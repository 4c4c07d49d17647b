//! Grid controller
//!
//! Owns the page cache and the view state of one mounted grid and drives the
//! data source. Every state change recomputes the query fingerprint; a changed
//! fingerprint cancels the previous fetch and starts a new one. Results are
//! published only when their generation is still current, so a slow response
//! to an old query can fill the cache but never the table.
//!
//! Locks are never held across an await. Events are collected while the
//! state lock is held and sent after it is released.

use crate::columns::{ColumnPipeline, NoopTranslator, PipelineOutcome, ProcessingKey, Translator};
use crate::error_recovery::{ErrorRecovery, Phase, RecoveryStrategy};
use crate::lifecycle::StatusMachine;
use crate::view_state::{Transition, ViewDefaults, ViewState, ViewStateSnapshot};
use crate::{GridStats, RowIdFn};
use grid_config::{RetryPolicy, ViewOptions};
use grid_data::client::apply_query;
use grid_data::{
    client_fingerprint, fingerprint, CacheConfig, CacheEntry, CacheStats, CancellationToken,
    DataSource, Mutation, MutationResult, PageCache, PageQuery, PageResult,
};
use grid_shared::{
    CacheScope, DataSourceError, Density, EffectiveColumn, ErrorReport, FilterModel, Fingerprint,
    GridError, GridEvent, GridResult, GridStatus, Pagination, PaginationMode, PinnedColumns, Row,
    SortModel, ViewMode,
};
use grid_storage::{DebouncedWriter, PreferenceStore};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Buffered events per subscriber before the oldest are dropped
pub const EVENT_CAPACITY: usize = 256;

/// Host-provided collaborators of a grid
#[derive(Clone)]
pub struct GridDeps {
    pub data_source: Arc<dyn DataSource>,
    pub row_id: RowIdFn,
    pub preferences: Arc<PreferenceStore>,
    pub translator: Arc<dyn Translator>,
}

impl GridDeps {
    pub fn new(
        data_source: Arc<dyn DataSource>,
        row_id: RowIdFn,
        preferences: Arc<PreferenceStore>,
    ) -> Self {
        Self {
            data_source,
            row_id,
            preferences,
            translator: Arc::new(NoopTranslator),
        }
    }

    pub fn with_translator(mut self, translator: Arc<dyn Translator>) -> Self {
        self.translator = translator;
        self
    }
}

/// Rows currently exposed to the renderer
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishedRows {
    pub fingerprint: Option<Fingerprint>,
    pub rows: Arc<Vec<Row>>,
    /// Identity per exposed row; `None` rows cannot be selected
    pub row_ids: Vec<Option<String>>,
    pub total_count: usize,
}

struct InFlight {
    fingerprint: Fingerprint,
    token: CancellationToken,
}

struct Inner {
    state: ViewState,
    published: PublishedRows,
    in_flight: Option<InFlight>,
    generation: u64,
    view_mode: ViewMode,
    last_error: Option<ErrorReport>,
    mounted: bool,
    persist_enabled: bool,
    /// Prune the selection to the next published rows instead of the cache
    narrow_selection: bool,
}

/// A fetch that was started and still has to settle
struct LoadPlan {
    query: PageQuery,
    fingerprint: Fingerprint,
    cache_key: Fingerprint,
    token: CancellationToken,
    generation: u64,
}

pub struct GridController {
    options: ViewOptions,
    defaults: ViewDefaults,
    source: Arc<dyn DataSource>,
    variant: String,
    row_id: RowIdFn,
    store: Arc<PreferenceStore>,
    writer: DebouncedWriter,
    cache: PageCache,
    columns: ColumnPipeline,
    status: StatusMachine,
    recovery: ErrorRecovery,
    events: broadcast::Sender<GridEvent>,
    root: CancellationToken,
    inner: Mutex<Inner>,
}

impl GridController {
    /// Validate the options and wire the collaborators. No I/O happens until
    /// [`mount`](Self::mount).
    pub fn new(options: ViewOptions, deps: GridDeps) -> GridResult<Arc<Self>> {
        options.validate()?;

        let mode = deps.data_source.mode();
        if mode != options.pagination_mode {
            return Err(GridError::internal(format!(
                "view '{}' expects {:?} pagination but its data source pages {:?}",
                options.view_id, options.pagination_mode, mode
            )));
        }

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let writer = {
            let events = events.clone();
            DebouncedWriter::new(
                deps.preferences.clone(),
                options.view_id.clone(),
                options.preference_debounce,
            )
            .on_error(move |err| {
                let err = GridError::from(err.clone());
                let _ = events.send(GridEvent::PreferencesUnavailable {
                    kind: err.kind(),
                    message: err.to_string(),
                });
            })
        };

        let cache = PageCache::new(CacheConfig {
            ttl: options.ttl,
            max_entries: options.cache.max_entries,
            max_bytes: options.cache.max_bytes,
        });
        let defaults = ViewDefaults::from_options(&options);

        log::info!(
            "Created grid '{}' ({:?} pagination, {} columns)",
            options.view_id,
            mode,
            options.columns.len()
        );

        Ok(Arc::new(Self {
            variant: deps.data_source.variant_key(),
            source: deps.data_source,
            row_id: deps.row_id,
            store: deps.preferences,
            writer,
            cache,
            columns: ColumnPipeline::new(deps.translator),
            status: StatusMachine::new(),
            recovery: ErrorRecovery::new(),
            events,
            root: CancellationToken::new(),
            inner: Mutex::new(Inner {
                state: ViewState::new(&defaults),
                published: PublishedRows::default(),
                in_flight: None,
                generation: 0,
                view_mode: ViewMode::default(),
                last_error: None,
                mounted: false,
                persist_enabled: true,
                narrow_selection: false,
            }),
            defaults,
            options,
        }))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GridEvent> {
        self.events.subscribe()
    }

    pub fn options(&self) -> &ViewOptions {
        &self.options
    }

    /// Hydrate state from saved preferences, build the columns and load the
    /// first page. A failed first load leaves the grid mounted in `Error`.
    pub async fn mount(&self) -> GridResult<()> {
        if self.root.is_cancelled() {
            return Err(GridError::internal("grid was unmounted"));
        }
        if self.inner.lock().mounted {
            return Ok(());
        }

        let view = &self.options.view_id;
        let saved = self.store.load(view).await.map_err(GridError::from);

        let mut events = Vec::new();
        let prefs = {
            let mut inner = self.inner.lock();
            inner.mounted = true;
            match &saved {
                Ok(Some(record)) => {
                    inner.state = ViewState::from_record(record, &self.defaults);
                    log::debug!("Restored preferences for {view}");
                }
                Ok(None) => inner.state = ViewState::new(&self.defaults),
                Err(err) => {
                    inner.state = ViewState::new(&self.defaults);
                    inner.persist_enabled = false;
                    self.recovery.strategy_for(err.kind(), Phase::Fetch);
                    log::warn!("Preferences for {view} unavailable, using defaults: {err}");
                    events.push(GridEvent::PreferencesUnavailable {
                        kind: err.kind(),
                        message: err.to_string(),
                    });
                }
            }
            saved.map(|_| Some(inner.state.to_record()))
        };

        let ticket = self.columns.begin(ProcessingKey::for_options(&self.options));
        let outcome = self.columns.complete(ticket, &self.options, prefs);
        push_column_events(&outcome, &mut events);
        self.emit(events);

        if let Err(err) = self.load(false).await {
            log::warn!("Initial load for {view} failed: {err}");
        }
        Ok(())
    }

    /// Cancel in-flight work, write pending preferences and drop the cache
    pub async fn unmount(&self) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            if !inner.mounted {
                return;
            }
            inner.mounted = false;
            inner.generation += 1;
            if let Some(in_flight) = inner.in_flight.take() {
                in_flight.token.cancel();
            }
        }
        self.root.cancel();
        self.writer.flush().await;
        self.cache.clear();
        self.transition(GridStatus::Idle, &mut events);
        self.emit(events);
        log::info!("Unmounted grid '{}'", self.options.view_id);
    }

    // State setters

    pub async fn set_pagination(&self, pagination: Pagination) -> GridResult<()> {
        self.apply(|state, _| state.set_pagination(pagination)).await
    }

    pub async fn set_sort(&self, sort: SortModel) -> GridResult<()> {
        self.apply(|state, _| state.set_sort(sort)).await
    }

    pub async fn set_filter(&self, filter: FilterModel) -> GridResult<()> {
        self.apply(|state, _| state.set_filter(filter)).await
    }

    pub async fn set_selection(&self, ids: Vec<String>) -> GridResult<()> {
        if !self.options.feature_flags.selection {
            return Err(GridError::internal("selection is disabled for this view"));
        }
        self.apply(|state, known| state.set_selection(ids, known))
            .await
    }

    pub async fn set_column_visibility(&self, field: &str, visible: bool) -> GridResult<()> {
        self.apply(|state, _| state.set_column_visibility(field, visible))
            .await
    }

    pub async fn set_column_order(&self, order: Vec<String>) -> GridResult<()> {
        self.apply(|state, _| state.set_column_order(order)).await
    }

    pub async fn set_pinned_columns(&self, pinned: PinnedColumns) -> GridResult<()> {
        self.apply(|state, _| state.set_pinned_columns(pinned)).await
    }

    pub async fn set_column_width(&self, field: &str, width: u32) -> GridResult<()> {
        self.apply(|state, _| state.set_column_width(field, width))
            .await
    }

    pub async fn set_density(&self, density: Density) -> GridResult<()> {
        self.apply(|state, _| state.set_density(density)).await
    }

    /// Return the view to its defaults and forget saved preferences
    pub async fn reset_state(&self) -> GridResult<()> {
        self.writer.cancel();
        if let Err(err) = self.store.clear(&self.options.view_id).await {
            let err = GridError::from(err);
            log::warn!("Could not clear preferences for {}: {err}", self.options.view_id);
            self.emit(vec![GridEvent::PreferencesUnavailable {
                kind: err.kind(),
                message: err.to_string(),
            }]);
        }
        let defaults = self.defaults.clone();
        self.apply(move |state, _| state.reset(&defaults)).await
    }

    pub fn export_state(&self) -> ViewStateSnapshot {
        self.inner.lock().state.export(&self.options.view_id)
    }

    /// Replace the state with an exported snapshot of this view
    pub async fn import_state(&self, snapshot: ViewStateSnapshot) -> GridResult<()> {
        let imported = ViewState::import(snapshot, &self.options.view_id)?;
        self.apply(move |state, known| {
            let selection_before = state.selection.clone();
            let filter_changed = imported.filter != state.filter;
            *state = imported;
            state.selection.retain(|id| known.contains(id));
            Transition {
                refetch: true,
                persist: true,
                columns_changed: true,
                selection_changed: state.selection != selection_before,
                narrow_selection: filter_changed,
            }
        })
        .await
    }

    /// Drop the cached page of the current query and fetch it again
    pub async fn refresh(&self) -> GridResult<()> {
        let removed = self.cache.invalidate_keys(&[self.current_cache_key()]);
        self.emit(vec![GridEvent::CacheInvalidated {
            scope: CacheScope::Keys(removed),
        }]);
        self.load(true).await
    }

    /// Apply a mutation through the data source and reload what it touched
    pub async fn mutate(&self, mutation: Mutation) -> GridResult<MutationResult> {
        self.ensure_mounted()?;
        let token = self.root.child_token();
        let outcome = with_timeout(self.options.timeout, self.source.mutate(&mutation, &token)).await;

        let result = match outcome {
            Ok(result) => result,
            Err(err) => {
                let strategy = self.recovery.strategy_for(err.kind(), Phase::Mutate);
                log::warn!("Mutation {} on {} failed: {err}", mutation.op, self.options.view_id);
                if strategy != RecoveryStrategy::Silent {
                    self.report(&err);
                }
                if strategy == RecoveryStrategy::Refresh {
                    if let Err(refresh_err) = self.refresh().await {
                        log::warn!("Refresh after failed mutation failed: {refresh_err}");
                    }
                }
                return Err(err);
            }
        };

        let (scope, affected) = match result.affected_ids.targeted() {
            Some(ids) if !ids.is_empty() => match self.cache.invalidate_rows(ids) {
                // No cached page holds the rows, so nothing narrower is known
                0 => {
                    self.cache.clear_view(&self.options.view_id);
                    (CacheScope::View, Some(ids.len()))
                }
                removed => {
                    // Rows shift across pages, so the page on screen is stale too
                    let current = self.cache.invalidate_keys(&[self.current_cache_key()]);
                    (CacheScope::Keys(removed + current), Some(ids.len()))
                }
            },
            _ => {
                self.cache.clear_view(&self.options.view_id);
                (CacheScope::View, None)
            }
        };
        log::debug!(
            "Mutation {} on {} invalidated {scope:?}",
            mutation.op,
            self.options.view_id
        );
        self.emit(vec![GridEvent::CacheInvalidated { scope }]);

        if let Err(err) = self.load(true).await {
            log::warn!("Reload after mutation failed: {err}");
        }

        self.emit(vec![GridEvent::MutationSucceeded {
            op: mutation.op.to_string(),
            affected,
        }]);
        Ok(result)
    }

    pub fn clear_cache(&self) {
        self.cache.clear_view(&self.options.view_id);
        self.emit(vec![GridEvent::CacheInvalidated {
            scope: CacheScope::View,
        }]);
    }

    /// Remove cached pages matching `predicate`, or every page of the view
    /// when there is none
    pub fn invalidate_cache(
        &self,
        predicate: Option<&dyn Fn(&Fingerprint, &CacheEntry) -> bool>,
    ) -> usize {
        let (removed, scope) = match predicate {
            Some(predicate) => {
                let removed = self.cache.invalidate(|key, entry| predicate(key, entry));
                (removed, CacheScope::Keys(removed))
            }
            None => (self.cache.clear_view(&self.options.view_id), CacheScope::View),
        };
        self.emit(vec![GridEvent::CacheInvalidated { scope }]);
        removed
    }

    pub fn set_view_mode(&self, mode: ViewMode) {
        let changed = {
            let mut inner = self.inner.lock();
            std::mem::replace(&mut inner.view_mode, mode) != mode
        };
        if changed {
            self.emit(vec![GridEvent::ViewModeChanged { mode }]);
        }
    }

    // Accessors

    pub fn view_mode(&self) -> ViewMode {
        self.inner.lock().view_mode
    }

    pub fn get_selection(&self) -> Vec<String> {
        self.inner.lock().state.selection.iter().cloned().collect()
    }

    pub fn get_rows(&self) -> PublishedRows {
        self.inner.lock().published.clone()
    }

    pub fn state(&self) -> ViewState {
        self.inner.lock().state.clone()
    }

    pub fn columns(&self) -> Arc<Vec<EffectiveColumn>> {
        self.columns.current()
    }

    pub fn status(&self) -> GridStatus {
        self.status.get_state()
    }

    pub fn last_error(&self) -> Option<ErrorReport> {
        self.inner.lock().last_error.clone()
    }

    /// Fingerprint of the query the current state describes
    pub fn current_fingerprint(&self) -> Fingerprint {
        let inner = self.inner.lock();
        self.fingerprint_of(&self.query_of(&inner.state))
    }

    pub fn get_cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn stats(&self) -> GridStats {
        GridStats {
            cache: self.cache.stats(),
            lifecycle: self.status.get_stats(),
            recovery: self.recovery.get_stats(),
        }
    }

    // Internals

    fn ensure_mounted(&self) -> GridResult<()> {
        if self.inner.lock().mounted {
            Ok(())
        } else {
            Err(GridError::internal(format!(
                "grid '{}' is not mounted",
                self.options.view_id
            )))
        }
    }

    /// Run a state transition and carry out its effects
    async fn apply<F>(&self, change: F) -> GridResult<()>
    where
        F: FnOnce(&mut ViewState, &HashSet<String>) -> Transition,
    {
        let mut events = Vec::new();
        let transition = {
            let mut inner = self.inner.lock();
            if !inner.mounted {
                return Err(GridError::internal(format!(
                    "grid '{}' is not mounted",
                    self.options.view_id
                )));
            }
            let known = self.known_ids(&inner);
            let transition = change(&mut inner.state, &known);

            if transition.narrow_selection {
                inner.narrow_selection = true;
            }
            if transition.persist && inner.persist_enabled {
                self.writer.schedule(inner.state.to_record());
            }
            if transition.selection_changed {
                events.push(GridEvent::SelectionChanged {
                    ids: inner.state.selection.iter().cloned().collect(),
                });
            }
            if transition.columns_changed {
                let outcome = self
                    .columns
                    .process_with(&self.options, Some(&inner.state.to_record()));
                push_column_events(&outcome, &mut events);
            }
            transition
        };
        self.emit(events);

        if transition.refetch {
            self.load(false).await
        } else {
            Ok(())
        }
    }

    async fn load(&self, force: bool) -> GridResult<()> {
        let Some(plan) = self.plan_load(force) else {
            return Ok(());
        };
        let result = self.fetch_entry(&plan).await;
        self.settle(plan, result)
    }

    /// Decide whether a fetch is needed. Cache hits are published right here.
    fn plan_load(&self, force: bool) -> Option<LoadPlan> {
        let mut events = Vec::new();
        let plan = {
            let mut inner = self.inner.lock();
            if !inner.mounted {
                return None;
            }

            let query = self.query_of(&inner.state);
            let fp = self.fingerprint_of(&query);
            let is_published = inner.published.fingerprint.as_ref() == Some(&fp);
            let in_flight_fp = inner.in_flight.as_ref().map(|f| f.fingerprint.clone());

            if !force {
                if in_flight_fp.as_ref() == Some(&fp) {
                    return None;
                }
                if is_published {
                    // Back to what is on screen; abandon the newer fetch
                    if let Some(in_flight) = inner.in_flight.take() {
                        in_flight.token.cancel();
                        inner.generation += 1;
                        self.transition(GridStatus::Ready, &mut events);
                    }
                    drop(inner);
                    self.emit(events);
                    return None;
                }
            }

            if let Some(previous) = inner.in_flight.take() {
                log::debug!("Superseding fetch {}", previous.fingerprint);
                previous.token.cancel();
            }
            inner.generation += 1;
            let generation = inner.generation;
            let cache_key = self.cache_key(&query);

            match self.cache.get(&cache_key) {
                Some(entry) => {
                    self.publish(&mut inner, fp, &query, &entry, false, &mut events);
                    None
                }
                None => {
                    let token = self.root.child_token();
                    inner.in_flight = Some(InFlight {
                        fingerprint: fp.clone(),
                        token: token.clone(),
                    });
                    let next = if inner.published.rows.is_empty() {
                        GridStatus::Loading
                    } else {
                        GridStatus::Refreshing
                    };
                    self.transition(next, &mut events);
                    Some(LoadPlan {
                        query,
                        fingerprint: fp,
                        cache_key,
                        token,
                        generation,
                    })
                }
            }
        };
        self.emit(events);
        plan
    }

    async fn fetch_entry(&self, plan: &LoadPlan) -> GridResult<Arc<CacheEntry>> {
        let result = self
            .cache
            .get_or_fetch(&plan.cache_key, || self.fetch_job(plan).run())
            .await;

        match result {
            // Joined a shared fetch whose owner was superseded; ours is still live
            Err(GridError::Cancelled) if !plan.token.is_cancelled() => {
                tokio::task::yield_now().await;
                self.cache
                    .get_or_fetch(&plan.cache_key, || self.fetch_job(plan).run())
                    .await
            }
            other => other,
        }
    }

    fn settle(&self, plan: LoadPlan, result: GridResult<Arc<CacheEntry>>) -> GridResult<()> {
        let mut events = Vec::new();
        let outcome = {
            let mut inner = self.inner.lock();
            if inner.generation != plan.generation || plan.token.is_cancelled() {
                log::debug!("Dropping superseded result for {}", plan.fingerprint);
                return Ok(());
            }
            inner.in_flight = None;

            match result {
                Ok(entry) => {
                    self.publish(&mut inner, plan.fingerprint, &plan.query, &entry, true, &mut events);
                    Ok(())
                }
                Err(err) => self.handle_fetch_error(&mut inner, plan, err, &mut events),
            }
        };
        self.emit(events);
        outcome
    }

    fn handle_fetch_error(
        &self,
        inner: &mut Inner,
        plan: LoadPlan,
        err: GridError,
        events: &mut Vec<GridEvent>,
    ) -> GridResult<()> {
        match self.recovery.strategy_for(err.kind(), Phase::Fetch) {
            RecoveryStrategy::Silent => {
                self.transition(GridStatus::Ready, events);
                Ok(())
            }
            RecoveryStrategy::EmptyResult => {
                log::info!("{} not found; showing an empty result", plan.fingerprint);
                let empty = CacheEntry::from_page(PageResult::new(Vec::new(), 0), |_| None);
                self.publish(inner, plan.fingerprint, &plan.query, &empty, false, events);
                Ok(())
            }
            RecoveryStrategy::Reset => {
                log::error!("Resetting {} after internal error: {err}", self.options.view_id);
                let transition = inner.state.reset(&self.defaults);
                if transition.selection_changed {
                    events.push(GridEvent::SelectionChanged { ids: Vec::new() });
                }
                let outcome = self.columns.process_with(&self.options, None);
                push_column_events(&outcome, events);
                self.fail(inner, &err, events);
                Err(err)
            }
            _ => {
                log::warn!("Fetch of {} failed: {err}", plan.fingerprint);
                self.fail(inner, &err, events);
                Err(err)
            }
        }
    }

    /// Move to `Error`, keeping whatever rows are on screen
    fn fail(&self, inner: &mut Inner, err: &GridError, events: &mut Vec<GridEvent>) {
        let report = err.report();
        inner.last_error = Some(report.clone());
        events.push(GridEvent::ErrorChanged {
            error: Some(report),
        });
        self.transition(GridStatus::Error, events);
    }

    /// Surface an error without touching status or rows
    fn report(&self, err: &GridError) {
        let report = err.report();
        self.inner.lock().last_error = Some(report.clone());
        self.emit(vec![GridEvent::ErrorChanged {
            error: Some(report),
        }]);
    }

    fn publish(
        &self,
        inner: &mut Inner,
        fingerprint: Fingerprint,
        query: &PageQuery,
        entry: &CacheEntry,
        fresh: bool,
        events: &mut Vec<GridEvent>,
    ) {
        let (rows, row_ids, total_count) = match self.options.pagination_mode {
            PaginationMode::Server => (entry.rows.clone(), entry.row_ids.clone(), entry.total_count),
            PaginationMode::Client => {
                let page = apply_query(&entry.rows, query, &self.options.searchable_fields);
                let row_ids = page.items.iter().map(|row| (self.row_id)(row)).collect();
                (page.items, row_ids, page.total_count)
            }
        };
        let (rows, row_ids, bad_positions) = dedupe_rows(rows, row_ids);

        events.push(GridEvent::RowsChanged {
            fingerprint: fingerprint.clone(),
            total_count,
            row_count: rows.len(),
        });
        inner.published = PublishedRows {
            fingerprint: Some(fingerprint),
            rows: Arc::new(rows),
            row_ids,
            total_count,
        };
        self.transition(GridStatus::Ready, events);

        if fresh && !bad_positions.is_empty() {
            let err = GridError::BadRow {
                positions: bad_positions,
            };
            log::warn!("{} in {}", err, self.options.view_id);
            self.recovery.strategy_for(err.kind(), Phase::Fetch);
            let report = err.report();
            inner.last_error = Some(report.clone());
            events.push(GridEvent::ErrorChanged {
                error: Some(report),
            });
        } else if inner.last_error.take().is_some() {
            events.push(GridEvent::ErrorChanged { error: None });
        }

        let known = if std::mem::take(&mut inner.narrow_selection) {
            inner.published.row_ids.iter().flatten().cloned().collect()
        } else {
            self.known_ids(inner)
        };
        if inner.state.prune_selection(&known).selection_changed {
            events.push(GridEvent::SelectionChanged {
                ids: inner.state.selection.iter().cloned().collect(),
            });
        }
    }

    /// Ids present in any live cache entry of this view or on screen
    fn known_ids(&self, inner: &Inner) -> HashSet<String> {
        let mut known = self.cache.known_ids();
        known.extend(inner.published.row_ids.iter().flatten().cloned());
        known
    }

    fn current_cache_key(&self) -> Fingerprint {
        let inner = self.inner.lock();
        self.cache_key(&self.query_of(&inner.state))
    }

    fn query_of(&self, state: &ViewState) -> PageQuery {
        PageQuery {
            pagination: state.pagination,
            sort: state.sort.clone(),
            filter: state.filter.clone(),
        }
    }

    fn fingerprint_of(&self, query: &PageQuery) -> Fingerprint {
        fingerprint(
            &self.options.view_id,
            &query.pagination,
            &query.sort,
            &query.filter,
            &self.variant,
        )
    }

    /// Client views cache the whole dataset per filter
    fn cache_key(&self, query: &PageQuery) -> Fingerprint {
        match self.options.pagination_mode {
            PaginationMode::Server => self.fingerprint_of(query),
            PaginationMode::Client => {
                client_fingerprint(&self.options.view_id, &query.filter, &self.variant)
            }
        }
    }

    fn fetch_job(&self, plan: &LoadPlan) -> FetchJob {
        FetchJob {
            source: self.source.clone(),
            mode: self.options.pagination_mode,
            recovery: self.recovery.clone(),
            policy: self.options.retry,
            timeout: self.options.timeout,
            query: plan.query.clone(),
            token: plan.token.clone(),
            row_id: self.row_id.clone(),
        }
    }

    fn transition(&self, to: GridStatus, events: &mut Vec<GridEvent>) {
        match self.status.transition_to(to) {
            Ok(Some(change)) => {
                events.push(GridEvent::StatusChanged {
                    from: change.from,
                    to: change.to,
                });
                if change.loading_toggled() {
                    events.push(GridEvent::LoadingChanged {
                        loading: change.to.is_loading(),
                    });
                }
            }
            Ok(None) => {}
            Err(err) => log::error!("{err}"),
        }
    }

    fn emit(&self, events: Vec<GridEvent>) {
        for event in events {
            log::trace!("{} event on {}", event.name(), self.options.view_id);
            // No subscribers is fine
            let _ = self.events.send(event);
        }
    }
}

impl Drop for GridController {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

fn push_column_events(outcome: &PipelineOutcome, events: &mut Vec<GridEvent>) {
    match outcome {
        PipelineOutcome::Published(columns) => events.push(GridEvent::ColumnsChanged {
            count: columns.len(),
        }),
        PipelineOutcome::Degraded { columns, reason } => {
            events.push(GridEvent::ColumnsDegraded {
                reason: reason.clone(),
            });
            events.push(GridEvent::ColumnsChanged {
                count: columns.len(),
            });
        }
        PipelineOutcome::Superseded => {}
    }
}

/// Drop rows whose id repeats an earlier one. Returns the kept rows, their
/// ids and the positions of rows with a missing or duplicate id.
fn dedupe_rows(
    rows: Vec<Row>,
    row_ids: Vec<Option<String>>,
) -> (Vec<Row>, Vec<Option<String>>, Vec<usize>) {
    let mut seen = HashSet::new();
    let mut kept_rows = Vec::with_capacity(rows.len());
    let mut kept_ids = Vec::with_capacity(rows.len());
    let mut bad = Vec::new();

    for (position, (row, id)) in rows.into_iter().zip(row_ids).enumerate() {
        match id {
            Some(id) if !seen.insert(id.clone()) => bad.push(position),
            Some(id) => {
                kept_rows.push(row);
                kept_ids.push(Some(id));
            }
            None => {
                bad.push(position);
                kept_rows.push(row);
                kept_ids.push(None);
            }
        }
    }
    (kept_rows, kept_ids, bad)
}

async fn with_timeout<T, F>(timeout: Option<Duration>, call: F) -> GridResult<T>
where
    F: Future<Output = Result<T, DataSourceError>>,
{
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(result) => result.map_err(GridError::from),
            Err(_) => Err(GridError::Timeout {
                message: format!("no response within {limit:?}"),
                duration_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
            }),
        },
        None => call.await.map_err(GridError::from),
    }
}

/// Everything a fetch needs, owned so the future can outlive the caller
struct FetchJob {
    source: Arc<dyn DataSource>,
    mode: PaginationMode,
    recovery: ErrorRecovery,
    policy: RetryPolicy,
    timeout: Option<Duration>,
    query: PageQuery,
    token: CancellationToken,
    row_id: RowIdFn,
}

impl FetchJob {
    async fn run(self) -> GridResult<CacheEntry> {
        let job = &self;
        let page = self
            .recovery
            .execute_with_retry(&self.policy, &self.token, move || job.attempt())
            .await?;
        Ok(CacheEntry::from_page(page, |row| (self.row_id)(row)))
    }

    async fn attempt(&self) -> GridResult<PageResult> {
        let call = async {
            match self.mode {
                PaginationMode::Server => self.source.fetch_page(&self.query, &self.token).await,
                PaginationMode::Client => self.source.fetch_all(&self.query.filter, &self.token).await,
            }
        };
        with_timeout(self.timeout, call).await
    }
}

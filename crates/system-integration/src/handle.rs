//! Imperative handle given to the host page

use crate::controller::{GridController, GridDeps, PublishedRows};
use crate::view_state::{ViewState, ViewStateSnapshot};
use crate::GridStats;
use grid_config::ViewOptions;
use grid_data::{CacheEntry, CacheStats, Mutation, MutationResult};
use grid_shared::{
    Density, EffectiveColumn, ErrorReport, FilterModel, Fingerprint, GridEvent, GridResult,
    GridStatus, Pagination, PinnedColumns, SortModel, ViewMode,
};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Cloneable handle to a mounted grid
#[derive(Clone)]
pub struct GridHandle {
    controller: Arc<GridController>,
}

impl GridHandle {
    /// Create a grid without mounting it, so the host can subscribe first
    pub fn new(options: ViewOptions, deps: GridDeps) -> GridResult<Self> {
        Ok(Self {
            controller: GridController::new(options, deps)?,
        })
    }

    /// Create and mount in one step. Events raised while mounting are not
    /// observable through this path.
    pub async fn mount_new(options: ViewOptions, deps: GridDeps) -> GridResult<Self> {
        let handle = Self::new(options, deps)?;
        handle.mount().await?;
        Ok(handle)
    }

    pub fn controller(&self) -> &Arc<GridController> {
        &self.controller
    }

    pub async fn mount(&self) -> GridResult<()> {
        self.controller.mount().await
    }

    pub async fn unmount(&self) {
        self.controller.unmount().await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GridEvent> {
        self.controller.subscribe()
    }

    pub async fn refresh(&self) -> GridResult<()> {
        self.controller.refresh().await
    }

    pub async fn reset_state(&self) -> GridResult<()> {
        self.controller.reset_state().await
    }

    pub fn export_state(&self) -> ViewStateSnapshot {
        self.controller.export_state()
    }

    pub async fn import_state(&self, snapshot: ViewStateSnapshot) -> GridResult<()> {
        self.controller.import_state(snapshot).await
    }

    pub fn clear_cache(&self) {
        self.controller.clear_cache()
    }

    pub fn invalidate_cache(
        &self,
        predicate: Option<&dyn Fn(&Fingerprint, &CacheEntry) -> bool>,
    ) -> usize {
        self.controller.invalidate_cache(predicate)
    }

    pub fn get_selection(&self) -> Vec<String> {
        self.controller.get_selection()
    }

    pub fn get_rows(&self) -> PublishedRows {
        self.controller.get_rows()
    }

    pub fn get_cache_stats(&self) -> CacheStats {
        self.controller.get_cache_stats()
    }

    pub fn set_view_mode(&self, mode: ViewMode) {
        self.controller.set_view_mode(mode)
    }

    pub fn view_mode(&self) -> ViewMode {
        self.controller.view_mode()
    }

    pub fn columns(&self) -> Arc<Vec<EffectiveColumn>> {
        self.controller.columns()
    }

    pub fn state(&self) -> ViewState {
        self.controller.state()
    }

    pub fn status(&self) -> GridStatus {
        self.controller.status()
    }

    pub fn last_error(&self) -> Option<ErrorReport> {
        self.controller.last_error()
    }

    pub fn stats(&self) -> GridStats {
        self.controller.stats()
    }

    pub async fn set_pagination(&self, pagination: Pagination) -> GridResult<()> {
        self.controller.set_pagination(pagination).await
    }

    pub async fn set_sort(&self, sort: SortModel) -> GridResult<()> {
        self.controller.set_sort(sort).await
    }

    pub async fn set_filter(&self, filter: FilterModel) -> GridResult<()> {
        self.controller.set_filter(filter).await
    }

    pub async fn set_selection(&self, ids: Vec<String>) -> GridResult<()> {
        self.controller.set_selection(ids).await
    }

    pub async fn set_column_visibility(&self, field: &str, visible: bool) -> GridResult<()> {
        self.controller.set_column_visibility(field, visible).await
    }

    pub async fn set_column_order(&self, order: Vec<String>) -> GridResult<()> {
        self.controller.set_column_order(order).await
    }

    pub async fn set_pinned_columns(&self, pinned: PinnedColumns) -> GridResult<()> {
        self.controller.set_pinned_columns(pinned).await
    }

    pub async fn set_density(&self, density: Density) -> GridResult<()> {
        self.controller.set_density(density).await
    }

    pub async fn set_column_width(&self, field: &str, width: u32) -> GridResult<()> {
        self.controller.set_column_width(field, width).await
    }

    pub async fn mutate(&self, mutation: Mutation) -> GridResult<MutationResult> {
        self.controller.mutate(mutation).await
    }
}

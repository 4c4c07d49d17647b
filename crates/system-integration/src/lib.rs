//! Grid runtime
//!
//! Ties the column pipeline, view state, page cache and data source together
//! behind one controller per mounted grid, and exposes it to host pages
//! through [`GridHandle`].

pub mod columns;
pub mod controller;
pub mod error_recovery;
pub mod handle;
pub mod lifecycle;
pub mod view_state;

use grid_shared::Row;
use std::sync::Arc;

pub use columns::{ColumnPipeline, NoopTranslator, PipelineOutcome, Translator};
pub use controller::{GridController, GridDeps, PublishedRows};
pub use handle::GridHandle;
pub use view_state::{Transition, ViewDefaults, ViewState, ViewStateSnapshot};

/// Host function extracting a row's identity; `None` marks a missing id
pub type RowIdFn = Arc<dyn Fn(&Row) -> Option<String> + Send + Sync>;

/// Row id taken from a top-level field. Numbers are stringified.
pub fn field_row_id(field: impl Into<String>) -> RowIdFn {
    let field = field.into();
    Arc::new(move |row: &Row| match grid_shared::row_field(row, &field)? {
        serde_json::Value::String(id) if !id.is_empty() => Some(id.clone()),
        serde_json::Value::Number(id) => Some(id.to_string()),
        _ => None,
    })
}

/// Grid-wide statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct GridStats {
    pub cache: grid_data::CacheStats,
    pub lifecycle: lifecycle::LifecycleStats,
    pub recovery: error_recovery::RecoveryStats,
}

//! Per-view UI state and its transitions
//!
//! Every setter returns a [`Transition`] telling the controller what to do
//! next. The state never performs I/O itself.

use chrono::{DateTime, Utc};
use grid_config::ViewOptions;
use grid_shared::{
    Density, FilterModel, GridError, GridResult, Pagination, PinnedColumns, PreferenceRecord,
    Selection, SortModel, ViewId,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Version of the export format written by [`ViewState::export`]
pub const SNAPSHOT_VERSION: u32 = 1;

/// Values a view returns to on reset
#[derive(Debug, Clone, PartialEq)]
pub struct ViewDefaults {
    pub page_size: usize,
    pub density: Density,
}

impl ViewDefaults {
    pub fn from_options(options: &ViewOptions) -> Self {
        Self {
            page_size: options.default_page_size.max(1),
            density: options.default_density,
        }
    }
}

/// Effects of a state change
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Transition {
    /// The query changed and rows must be reloaded
    pub refetch: bool,
    /// The preference record changed
    pub persist: bool,
    /// Column settings changed and the pipeline must rerun
    pub columns_changed: bool,
    pub selection_changed: bool,
    /// The visible row set changed; the selection must shrink to the next
    /// published rows
    pub narrow_selection: bool,
}

impl Transition {
    pub fn is_noop(&self) -> bool {
        *self == Transition::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewState {
    pub pagination: Pagination,
    #[serde(default)]
    pub sort: SortModel,
    #[serde(default)]
    pub filter: FilterModel,
    #[serde(default)]
    pub selection: Selection,
    #[serde(default)]
    pub column_visibility: BTreeMap<String, bool>,
    #[serde(default)]
    pub column_order: Vec<String>,
    #[serde(default)]
    pub pinned_columns: PinnedColumns,
    #[serde(default)]
    pub column_widths: BTreeMap<String, u32>,
    #[serde(default)]
    pub density: Density,
    /// Unknown preference keys, written back untouched
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ViewState {
    pub fn new(defaults: &ViewDefaults) -> Self {
        Self {
            pagination: Pagination::new(0, defaults.page_size),
            sort: SortModel::new(),
            filter: FilterModel::default(),
            selection: Selection::new(),
            column_visibility: BTreeMap::new(),
            column_order: Vec::new(),
            pinned_columns: PinnedColumns::default(),
            column_widths: BTreeMap::new(),
            density: defaults.density,
            extra: serde_json::Map::new(),
        }
    }

    /// Hydrate from a saved record. Paging restarts at the first page.
    pub fn from_record(record: &PreferenceRecord, defaults: &ViewDefaults) -> Self {
        let mut state = Self::new(defaults);
        state.apply_record(record);
        state
    }

    pub fn set_pagination(&mut self, pagination: Pagination) -> Transition {
        let page_size = pagination.page_size.max(1);
        let old_size = self.pagination.page_size;
        let page = if page_size != old_size {
            // Keep the first visible row on screen
            self.pagination.offset() / page_size
        } else {
            pagination.page
        };

        let next = Pagination::new(page, page_size);
        if next == self.pagination {
            return Transition::default();
        }
        self.pagination = next;

        Transition {
            refetch: true,
            persist: page_size != old_size,
            ..Transition::default()
        }
    }

    pub fn set_sort(&mut self, sort: SortModel) -> Transition {
        if sort == self.sort {
            return Transition::default();
        }
        self.sort = sort;
        self.pagination.page = 0;
        Transition {
            refetch: true,
            persist: true,
            ..Transition::default()
        }
    }

    pub fn set_filter(&mut self, filter: FilterModel) -> Transition {
        if filter == self.filter {
            return Transition::default();
        }
        self.filter = filter;
        self.pagination.page = 0;
        Transition {
            refetch: true,
            persist: true,
            narrow_selection: true,
            ..Transition::default()
        }
    }

    /// Replace the selection with the subset of `ids` that is currently known
    pub fn set_selection<I>(&mut self, ids: I, known: &HashSet<String>) -> Transition
    where
        I: IntoIterator<Item = String>,
    {
        let next: Selection = ids.into_iter().filter(|id| known.contains(id)).collect();
        if next == self.selection {
            return Transition::default();
        }
        self.selection = next;
        Transition {
            selection_changed: true,
            ..Transition::default()
        }
    }

    /// Drop selected ids that are no longer known
    pub fn prune_selection(&mut self, known: &HashSet<String>) -> Transition {
        let before = self.selection.len();
        self.selection.retain(|id| known.contains(id));
        Transition {
            selection_changed: self.selection.len() != before,
            ..Transition::default()
        }
    }

    pub fn set_column_visibility(&mut self, field: &str, visible: bool) -> Transition {
        if self.column_visibility.get(field) == Some(&visible) {
            return Transition::default();
        }
        self.column_visibility.insert(field.to_string(), visible);
        Self::column_transition()
    }

    pub fn set_column_order(&mut self, order: Vec<String>) -> Transition {
        if order == self.column_order {
            return Transition::default();
        }
        self.column_order = order;
        Self::column_transition()
    }

    pub fn set_pinned_columns(&mut self, pinned: PinnedColumns) -> Transition {
        if pinned == self.pinned_columns {
            return Transition::default();
        }
        self.pinned_columns = pinned;
        Self::column_transition()
    }

    pub fn set_column_width(&mut self, field: &str, width: u32) -> Transition {
        let width = width.max(1);
        if self.column_widths.get(field) == Some(&width) {
            return Transition::default();
        }
        self.column_widths.insert(field.to_string(), width);
        Self::column_transition()
    }

    pub fn set_density(&mut self, density: Density) -> Transition {
        if density == self.density {
            return Transition::default();
        }
        self.density = density;
        Transition {
            persist: true,
            ..Transition::default()
        }
    }

    /// Back to defaults. Unknown preference keys are dropped too.
    pub fn reset(&mut self, defaults: &ViewDefaults) -> Transition {
        let selection_changed = !self.selection.is_empty();
        *self = Self::new(defaults);
        Transition {
            refetch: true,
            persist: false,
            columns_changed: true,
            selection_changed,
            narrow_selection: false,
        }
    }

    fn column_transition() -> Transition {
        Transition {
            persist: true,
            columns_changed: true,
            ..Transition::default()
        }
    }

    /// Record persisted for this state
    pub fn to_record(&self) -> PreferenceRecord {
        let mut record = PreferenceRecord::new(self.pagination.page_size);
        record.density = self.density;
        record.column_visibility = self.column_visibility.clone();
        record.column_order = self.column_order.clone();
        record.pinned_columns = self.pinned_columns.clone();
        record.column_widths = self.column_widths.clone();
        record.sort_model = (!self.sort.is_empty()).then(|| self.sort.clone());
        record.filter_model = (!self.filter.is_empty()).then(|| self.filter.clone());
        record.extra = self.extra.clone();
        record
    }

    /// Take over everything a saved record carries
    pub fn apply_record(&mut self, record: &PreferenceRecord) {
        self.pagination = Pagination::new(0, record.page_size);
        self.density = record.density;
        self.column_visibility = record.column_visibility.clone();
        self.column_order = record.column_order.clone();
        self.pinned_columns = record.pinned_columns.clone();
        self.column_widths = record.column_widths.clone();
        self.sort = record.sort_model.clone().unwrap_or_default();
        self.filter = record.filter_model.clone().unwrap_or_default();
        self.extra = record.extra.clone();
    }

    pub fn export(&self, view: &ViewId) -> ViewStateSnapshot {
        ViewStateSnapshot {
            version: SNAPSHOT_VERSION,
            view_id: view.clone(),
            exported_at: Utc::now(),
            state: self.clone(),
        }
    }

    /// Validate a snapshot for `view` and return its state
    pub fn import(snapshot: ViewStateSnapshot, view: &ViewId) -> GridResult<Self> {
        if snapshot.version == 0 || snapshot.version > SNAPSHOT_VERSION {
            return Err(invalid_snapshot(format!(
                "unsupported snapshot version {}",
                snapshot.version
            )));
        }
        if &snapshot.view_id != view {
            return Err(invalid_snapshot(format!(
                "snapshot belongs to view '{}'",
                snapshot.view_id
            )));
        }

        let mut state = snapshot.state;
        state.pagination = Pagination::new(state.pagination.page, state.pagination.page_size);
        Ok(state)
    }
}

fn invalid_snapshot(message: String) -> GridError {
    GridError::Validation {
        message,
        field_errors: Default::default(),
    }
}

/// Exported view state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewStateSnapshot {
    pub version: u32,
    pub view_id: ViewId,
    pub exported_at: DateTime<Utc>,
    pub state: ViewState,
}

impl ViewStateSnapshot {
    pub fn to_json(&self) -> GridResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> GridResult<Self> {
        serde_json::from_str(json).map_err(|e| invalid_snapshot(format!("malformed snapshot: {e}")))
    }
}

//! Persisted per-view preference record
//!
//! The layout mirrors what hosts have been storing since schema version 1.
//! Unknown top-level keys are kept in `extra` so a record written by a newer
//! build survives a round trip through an older one.

use crate::{Density, FilterModel, PinnedColumns, SortModel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version written by this build. v2 added `columnWidths`.
pub const CURRENT_SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceRecord {
    pub schema_version: u32,
    pub page_size: usize,
    #[serde(default)]
    pub density: Density,
    #[serde(default)]
    pub column_visibility: BTreeMap<String, bool>,
    #[serde(default)]
    pub column_order: Vec<String>,
    #[serde(default)]
    pub pinned_columns: PinnedColumns,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub column_widths: BTreeMap<String, u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_model: Option<SortModel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter_model: Option<FilterModel>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl PreferenceRecord {
    pub fn new(page_size: usize) -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            page_size: page_size.max(1),
            density: Density::default(),
            column_visibility: BTreeMap::new(),
            column_order: Vec::new(),
            pinned_columns: PinnedColumns::default(),
            column_widths: BTreeMap::new(),
            sort_model: None,
            filter_model: None,
            extra: serde_json::Map::new(),
        }
    }

    /// Visibility override for a field, if one was saved
    pub fn visibility_of(&self, field: &str) -> Option<bool> {
        self.column_visibility.get(field).copied()
    }
}

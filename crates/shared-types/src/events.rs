//! Events a host page can observe on a mounted grid

use crate::errors::{ErrorKind, ErrorReport};
use crate::{Fingerprint, ViewMode};
use serde::{Deserialize, Serialize};

/// Controller status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GridStatus {
    #[default]
    Idle,
    Loading,
    Ready,
    Refreshing,
    Error,
}

impl GridStatus {
    pub fn is_loading(&self) -> bool {
        matches!(self, GridStatus::Loading | GridStatus::Refreshing)
    }
}

/// Extent of a cache invalidation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "count", rename_all = "camelCase")]
pub enum CacheScope {
    /// Targeted invalidation; number of entries removed
    Keys(usize),
    /// Every entry of the view
    View,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum GridEvent {
    #[serde(rename_all = "camelCase")]
    RowsChanged {
        fingerprint: Fingerprint,
        total_count: usize,
        row_count: usize,
    },
    LoadingChanged { loading: bool },
    StatusChanged { from: GridStatus, to: GridStatus },
    /// `None` clears a previously reported error
    ErrorChanged { error: Option<ErrorReport> },
    SelectionChanged { ids: Vec<String> },
    PreferencesUnavailable { kind: ErrorKind, message: String },
    ColumnsDegraded { reason: String },
    ColumnsChanged { count: usize },
    CacheInvalidated { scope: CacheScope },
    MutationSucceeded { op: String, affected: Option<usize> },
    ViewModeChanged { mode: ViewMode },
}

impl GridEvent {
    /// Event name as seen by the host
    pub fn name(&self) -> &'static str {
        match self {
            GridEvent::RowsChanged { .. } => "rowsChanged",
            GridEvent::LoadingChanged { .. } => "loadingChanged",
            GridEvent::StatusChanged { .. } => "statusChanged",
            GridEvent::ErrorChanged { .. } => "errorChanged",
            GridEvent::SelectionChanged { .. } => "selectionChanged",
            GridEvent::PreferencesUnavailable { .. } => "preferencesUnavailable",
            GridEvent::ColumnsDegraded { .. } => "columnsDegraded",
            GridEvent::ColumnsChanged { .. } => "columnsChanged",
            GridEvent::CacheInvalidated { .. } => "cacheInvalidated",
            GridEvent::MutationSucceeded { .. } => "mutationSucceeded",
            GridEvent::ViewModeChanged { .. } => "viewModeChanged",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_tag_matches_name() {
        let event = GridEvent::CacheInvalidated {
            scope: CacheScope::Keys(2),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], event.name());
        assert_eq!(json["scope"]["scope"], "keys");
        assert_eq!(json["scope"]["count"], 2);
    }

    #[test]
    fn test_loading_statuses() {
        assert!(GridStatus::Loading.is_loading());
        assert!(GridStatus::Refreshing.is_loading());
        assert!(!GridStatus::Ready.is_loading());
    }
}

//! Shared types for the admin grid runtime
//!
//! This crate contains all types that are shared between the storage,
//! data-manager, config and runtime crates: the query model (pagination,
//! sort, filter), column descriptors, the persisted preference record, the
//! error taxonomy and the events a host page can observe.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub mod columns;
pub mod errors;
pub mod events;
pub mod preferences;

pub use columns::{ColumnDescriptor, ColumnType, ColumnWidth, EffectiveColumn, Header, PinSide};
pub use errors::{DataSourceError, ErrorKind, ErrorReport, GridError, GridResult};
pub use events::{CacheScope, GridEvent, GridStatus};
pub use preferences::{PreferenceRecord, CURRENT_SCHEMA_VERSION};

/// A row as delivered by a data source. Always expected to be a JSON object.
pub type Row = serde_json::Value;

/// Identifier of a mounted view; names its preference bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ViewId(String);

impl ViewId {
    pub fn new(id: impl Into<String>) -> GridResult<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(GridError::Internal {
                message: "view id must not be empty".to_string(),
            });
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ViewId {
    type Error = GridError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ViewId> for String {
    fn from(id: ViewId) -> Self {
        id.0
    }
}

impl fmt::Display for ViewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Page position. `page` is zero based.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: usize,
    pub page_size: usize,
}

impl Pagination {
    pub fn new(page: usize, page_size: usize) -> Self {
        Self {
            page,
            page_size: page_size.max(1),
        }
    }

    /// Index of the first row on this page
    pub fn offset(&self) -> usize {
        self.page.saturating_mul(self.page_size)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(0, 25)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortItem {
    pub field: String,
    #[serde(rename = "dir")]
    pub direction: SortDirection,
}

impl SortItem {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Ordered sort keys; earlier entries take precedence
pub type SortModel = Vec<SortItem>;

/// Comparison operator of a filter predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOperator {
    Eq,
    Ne,
    Contains,
    StartsWith,
    EndsWith,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    IsEmpty,
    IsNotEmpty,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Eq => "eq",
            FilterOperator::Ne => "ne",
            FilterOperator::Contains => "contains",
            FilterOperator::StartsWith => "startsWith",
            FilterOperator::EndsWith => "endsWith",
            FilterOperator::Gt => "gt",
            FilterOperator::Gte => "gte",
            FilterOperator::Lt => "lt",
            FilterOperator::Lte => "lte",
            FilterOperator::In => "in",
            FilterOperator::IsEmpty => "isEmpty",
            FilterOperator::IsNotEmpty => "isNotEmpty",
        }
    }
}

/// Atomic predicate `(field, operator, value)`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterItem {
    pub field: String,
    #[serde(rename = "op")]
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl FilterItem {
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: serde_json::Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }
}

/// Conjunction of predicates plus an optional free-text query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterModel {
    #[serde(default)]
    pub items: Vec<FilterItem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quick_filter: Option<String>,
}

impl FilterModel {
    pub fn with_item(mut self, item: FilterItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn with_quick_filter(mut self, text: impl Into<String>) -> Self {
        self.quick_filter = Some(text.into());
        self
    }

    /// Quick filter text, ignoring blank input
    pub fn quick_filter_text(&self) -> Option<&str> {
        self.quick_filter
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.quick_filter_text().is_none()
    }
}

/// Selected row identifiers
pub type Selection = BTreeSet<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Density {
    Compact,
    #[default]
    Standard,
    Comfortable,
}

/// Fields pinned to either edge of the table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinnedColumns {
    #[serde(default)]
    pub left: Vec<String>,
    #[serde(default)]
    pub right: Vec<String>,
}

impl PinnedColumns {
    pub fn side_of(&self, field: &str) -> PinSide {
        if self.left.iter().any(|f| f == field) {
            PinSide::Left
        } else if self.right.iter().any(|f| f == field) {
            PinSide::Right
        } else {
            PinSide::None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.left.is_empty() && self.right.is_empty()
    }
}

/// Where paging, sorting and filtering happen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaginationMode {
    Client,
    #[default]
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    #[default]
    Grid,
    Card,
}

/// Canonical query key; opaque to callers
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_canonical(canonical: String) -> Self {
        Self(canonical)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn starts_with(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Read a top-level field of a row
pub fn row_field<'a>(row: &'a Row, field: &str) -> Option<&'a serde_json::Value> {
    row.as_object().and_then(|obj| obj.get(field))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_view_id_rejects_empty() {
        assert!(ViewId::new("").is_err());
        assert!(ViewId::new("   ").is_err());
        assert_eq!(ViewId::new("orders").unwrap().as_str(), "orders");
    }

    #[test]
    fn test_view_id_deserialize_validates() {
        let ok: ViewId = serde_json::from_str("\"products\"").unwrap();
        assert_eq!(ok.as_str(), "products");
        assert!(serde_json::from_str::<ViewId>("\"\"").is_err());
    }

    #[test]
    fn test_pagination_clamps_page_size() {
        let p = Pagination::new(3, 0);
        assert_eq!(p.page_size, 1);
        assert_eq!(p.offset(), 3);
        assert_eq!(Pagination::new(2, 25).offset(), 50);
    }

    #[test]
    fn test_filter_model_blank_quick_filter_is_empty() {
        let model = FilterModel::default().with_quick_filter("   ");
        assert!(model.is_empty());
        assert_eq!(model.quick_filter_text(), None);

        let model = FilterModel::default().with_item(FilterItem::new(
            "status",
            FilterOperator::Eq,
            json!("pending"),
        ));
        assert!(!model.is_empty());
    }

    #[test]
    fn test_filter_item_wire_names() {
        let item = FilterItem::new("sku", FilterOperator::StartsWith, json!("AB"));
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value, json!({"field": "sku", "op": "startsWith", "value": "AB"}));

        let sort = serde_json::to_value(SortItem::desc("created_at")).unwrap();
        assert_eq!(sort, json!({"field": "created_at", "dir": "desc"}));
    }

    #[test]
    fn test_pinned_side_lookup() {
        let pinned = PinnedColumns {
            left: vec!["sku".into()],
            right: vec!["actions".into()],
        };
        assert_eq!(pinned.side_of("sku"), PinSide::Left);
        assert_eq!(pinned.side_of("actions"), PinSide::Right);
        assert_eq!(pinned.side_of("name"), PinSide::None);
    }
}

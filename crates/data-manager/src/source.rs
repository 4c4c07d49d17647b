//! Data source contract
//!
//! A data source owns all network I/O of a view. The runtime never talks to a
//! backend directly; hosts wrap their REST client in a [`DataSource`] and hand
//! it to the controller at mount.

use async_trait::async_trait;
use grid_shared::{
    DataSourceError, ErrorKind, FilterModel, Pagination, PaginationMode, Row, SortModel,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

/// Arguments of a server-side page fetch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub pagination: Pagination,
    #[serde(default)]
    pub sort: SortModel,
    #[serde(default)]
    pub filter: FilterModel,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    pub items: Vec<Row>,
    pub total_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

impl PageResult {
    pub fn new(items: Vec<Row>, total_count: usize) -> Self {
        Self {
            items,
            total_count,
            etag: None,
        }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }
}

/// Mutation kind; serialised as `create | update | delete | bulkDelete | sync | custom:<name>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MutationOp {
    Create,
    Update,
    Delete,
    BulkDelete,
    Sync,
    Custom(String),
}

impl fmt::Display for MutationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationOp::Create => write!(f, "create"),
            MutationOp::Update => write!(f, "update"),
            MutationOp::Delete => write!(f, "delete"),
            MutationOp::BulkDelete => write!(f, "bulkDelete"),
            MutationOp::Sync => write!(f, "sync"),
            MutationOp::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

impl FromStr for MutationOp {
    type Err = DataSourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(MutationOp::Create),
            "update" => Ok(MutationOp::Update),
            "delete" => Ok(MutationOp::Delete),
            "bulkDelete" => Ok(MutationOp::BulkDelete),
            "sync" => Ok(MutationOp::Sync),
            other => match other.strip_prefix("custom:") {
                Some(name) if !name.is_empty() => Ok(MutationOp::Custom(name.to_string())),
                _ => Err(DataSourceError::new(
                    ErrorKind::Validation,
                    format!("unknown mutation op '{other}'"),
                )),
            },
        }
    }
}

impl Serialize for MutationOp {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MutationOp {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    pub op: MutationOp,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Mutation {
    pub fn new(op: MutationOp, payload: serde_json::Value) -> Self {
        Self { op, payload }
    }
}

/// Rows touched by a mutation; `All` when the source cannot tell
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AffectedIds {
    Ids(Vec<String>),
    #[default]
    All,
}

impl AffectedIds {
    /// An empty hint is as good as no hint
    pub fn targeted(&self) -> Option<&[String]> {
        match self {
            AffectedIds::Ids(ids) if !ids.is_empty() => Some(ids),
            _ => None,
        }
    }
}

impl Serialize for AffectedIds {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            AffectedIds::Ids(ids) => ids.serialize(serializer),
            AffectedIds::All => serializer.serialize_str("all"),
        }
    }
}

impl<'de> Deserialize<'de> for AffectedIds {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Ids(Vec<String>),
            Tag(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Ids(ids) => Ok(AffectedIds::Ids(ids)),
            Raw::Tag(tag) if tag == "all" => Ok(AffectedIds::All),
            Raw::Tag(tag) => Err(serde::de::Error::custom(format!(
                "expected id list or \"all\", got \"{tag}\""
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationResult {
    #[serde(default)]
    pub affected_ids: AffectedIds,
    /// Whatever the backend returned, forwarded to the host
    #[serde(default)]
    pub result: serde_json::Value,
}

impl MutationResult {
    pub fn affecting(ids: Vec<String>) -> Self {
        Self {
            affected_ids: AffectedIds::Ids(ids),
            result: serde_json::Value::Null,
        }
    }

    pub fn affecting_all() -> Self {
        Self::default()
    }
}

fn unsupported(operation: &str) -> DataSourceError {
    DataSourceError::new(
        ErrorKind::Internal,
        format!("{operation} is not supported by this data source"),
    )
}

/// Host-provided adapter over a backend endpoint.
///
/// Calls with equal arguments must be idempotent within the cache TTL.
/// Implementations must be safe under interleaved invocation since a source
/// may back several views. A cancelled call should return
/// [`DataSourceError::cancelled`] and leave no lasting side effects.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Whether paging happens on the server or in memory
    fn mode(&self) -> PaginationMode;

    /// Distinguishes result sets of otherwise equal queries (store scope, locale, ...)
    fn variant_key(&self) -> String {
        String::new()
    }

    async fn fetch_page(
        &self,
        _query: &PageQuery,
        _cancel: &CancellationToken,
    ) -> Result<PageResult, DataSourceError> {
        Err(unsupported("fetchPage"))
    }

    async fn fetch_all(
        &self,
        _filter: &FilterModel,
        _cancel: &CancellationToken,
    ) -> Result<PageResult, DataSourceError> {
        Err(unsupported("fetchAll"))
    }

    async fn mutate(
        &self,
        _mutation: &Mutation,
        _cancel: &CancellationToken,
    ) -> Result<MutationResult, DataSourceError> {
        Err(unsupported("mutate"))
    }
}

//! Data layer of the grid runtime
//! Query fingerprints, the page cache and the data source contract

pub mod cache;
pub mod client;
pub mod fingerprint;
pub mod source;

pub use cache::{CacheConfig, CacheEntry, CacheStats, PageCache};
pub use fingerprint::{client_fingerprint, fingerprint, prefix_for};
pub use source::{
    AffectedIds, DataSource, Mutation, MutationOp, MutationResult, PageQuery, PageResult,
};

/// Re-exported so hosts implementing [`DataSource`] need no extra dependency
pub use tokio_util::sync::CancellationToken;

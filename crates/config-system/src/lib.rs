//! Configuration system for the grid runtime
//! View options, feature flags, retry and cache budgets, rendering hints

use grid_shared::{ColumnDescriptor, Density, GridError, PaginationMode, ViewId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub mod parser;
pub mod validation;

pub use parser::{ConfigFormat, ConfigParser, ViewOptionsFile};
pub use validation::ConfigValidator;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid columns: {0}")]
    Columns(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

impl From<ConfigError> for GridError {
    fn from(err: ConfigError) -> Self {
        GridError::Internal {
            message: err.to_string(),
        }
    }
}

/// Durations are written as whole milliseconds in option files
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
        }
    }
}

/// Feature toggles that shape the effective column list and the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeatureFlags {
    pub sort: bool,
    pub filter: bool,
    pub selection: bool,
    pub column_reorder: bool,
    pub column_resize: bool,
    pub rtl: bool,
    pub i18n: bool,
    pub virtualization: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            sort: true,
            filter: true,
            selection: true,
            column_reorder: true,
            column_resize: true,
            rtl: false,
            i18n: true,
            virtualization: true,
        }
    }
}

/// Exponential back-off for transport failures
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    #[serde(rename = "baseDelayMs", with = "duration_ms")]
    pub base_delay: Duration,
    #[serde(rename = "maxDelayMs", with = "duration_ms")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1 based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Page cache budget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CacheBudget {
    pub max_entries: usize,
    pub max_bytes: usize,
}

impl Default for CacheBudget {
    fn default() -> Self {
        Self {
            max_entries: 200,
            max_bytes: 32 * 1024 * 1024, // 32MB
        }
    }
}

/// Rendering hints; opaque to the runtime and handed to the renderer as-is
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RenderHints {
    pub row_buffer: u32,
    pub column_buffer: u32,
    pub scroll_end_threshold: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_height: Option<u32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Default for RenderHints {
    fn default() -> Self {
        Self {
            row_buffer: 10,
            column_buffer: 3,
            scroll_end_threshold: 15,
            row_height: None,
            extra: serde_json::Map::new(),
        }
    }
}

fn default_page_size() -> usize {
    25
}

fn default_page_size_options() -> Vec<usize> {
    vec![10, 25, 50, 100]
}

fn default_virtualization_threshold() -> usize {
    100
}

fn default_ttl() -> Duration {
    Duration::from_secs(300)
}

fn default_timeout() -> Option<Duration> {
    Some(Duration::from_secs(30))
}

fn default_preference_debounce() -> Duration {
    Duration::from_millis(500)
}

/// Inputs of a grid mount, minus the host objects (data source, row id
/// function, translator) which cannot be serialised
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewOptions {
    pub view_id: ViewId,
    pub columns: Vec<ColumnDescriptor>,
    #[serde(default)]
    pub pre_columns: Vec<ColumnDescriptor>,
    #[serde(default)]
    pub post_columns: Vec<ColumnDescriptor>,
    #[serde(default)]
    pub row_number: bool,
    #[serde(default)]
    pub pagination_mode: PaginationMode,
    #[serde(default = "default_page_size")]
    pub default_page_size: usize,
    #[serde(default = "default_page_size_options")]
    pub page_size_options: Vec<usize>,
    #[serde(default)]
    pub searchable_fields: Vec<String>,
    #[serde(default)]
    pub feature_flags: FeatureFlags,
    #[serde(default = "default_virtualization_threshold")]
    pub virtualization_threshold: usize,
    #[serde(default = "default_ttl", rename = "ttlMs", with = "duration_ms")]
    pub ttl: Duration,
    #[serde(
        default = "default_timeout",
        rename = "timeoutMs",
        with = "duration_ms::option"
    )]
    pub timeout: Option<Duration>,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub cache: CacheBudget,
    #[serde(
        default = "default_preference_debounce",
        rename = "preferenceDebounceMs",
        with = "duration_ms"
    )]
    pub preference_debounce: Duration,
    #[serde(default)]
    pub render_hints: RenderHints,
    #[serde(default)]
    pub default_density: Density,
}

impl ViewOptions {
    pub fn new(view_id: ViewId, columns: Vec<ColumnDescriptor>) -> Self {
        Self {
            view_id,
            columns,
            pre_columns: Vec::new(),
            post_columns: Vec::new(),
            row_number: false,
            pagination_mode: PaginationMode::default(),
            default_page_size: default_page_size(),
            page_size_options: default_page_size_options(),
            searchable_fields: Vec::new(),
            feature_flags: FeatureFlags::default(),
            virtualization_threshold: default_virtualization_threshold(),
            ttl: default_ttl(),
            timeout: default_timeout(),
            retry: RetryPolicy::default(),
            cache: CacheBudget::default(),
            preference_debounce: default_preference_debounce(),
            render_hints: RenderHints::default(),
            default_density: Density::default(),
        }
    }

    pub fn builder(view_id: ViewId) -> ViewOptionsBuilder {
        ViewOptionsBuilder {
            options: Self::new(view_id, Vec::new()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        ConfigValidator::validate(self)
    }

    /// Every declared descriptor in display order: row number, pre, base, post
    pub fn assembled_columns(&self) -> Vec<ColumnDescriptor> {
        let mut assembled = Vec::with_capacity(
            self.pre_columns.len() + self.columns.len() + self.post_columns.len() + 1,
        );
        if self.row_number {
            assembled.push(ColumnDescriptor::row_number());
        }
        assembled.extend(self.pre_columns.iter().cloned());
        assembled.extend(self.columns.iter().cloned());
        assembled.extend(self.post_columns.iter().cloned());
        assembled
    }

    /// Whether the renderer should virtualise a page of `row_count` rows
    pub fn should_virtualize(&self, row_count: usize) -> bool {
        self.feature_flags.virtualization && row_count >= self.virtualization_threshold
    }
}

/// Builder for [`ViewOptions`]; `build` validates
pub struct ViewOptionsBuilder {
    options: ViewOptions,
}

impl ViewOptionsBuilder {
    pub fn columns(mut self, columns: Vec<ColumnDescriptor>) -> Self {
        self.options.columns = columns;
        self
    }

    pub fn column(mut self, column: ColumnDescriptor) -> Self {
        self.options.columns.push(column);
        self
    }

    pub fn pre_columns(mut self, columns: Vec<ColumnDescriptor>) -> Self {
        self.options.pre_columns = columns;
        self
    }

    pub fn post_columns(mut self, columns: Vec<ColumnDescriptor>) -> Self {
        self.options.post_columns = columns;
        self
    }

    pub fn row_number(mut self, enabled: bool) -> Self {
        self.options.row_number = enabled;
        self
    }

    pub fn pagination_mode(mut self, mode: PaginationMode) -> Self {
        self.options.pagination_mode = mode;
        self
    }

    pub fn default_page_size(mut self, page_size: usize) -> Self {
        self.options.default_page_size = page_size;
        self
    }

    pub fn page_size_options(mut self, sizes: Vec<usize>) -> Self {
        self.options.page_size_options = sizes;
        self
    }

    pub fn searchable_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.searchable_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn feature_flags(mut self, flags: FeatureFlags) -> Self {
        self.options.feature_flags = flags;
        self
    }

    pub fn virtualization_threshold(mut self, threshold: usize) -> Self {
        self.options.virtualization_threshold = threshold;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.options.ttl = ttl;
        self
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.options.timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.options.retry = retry;
        self
    }

    pub fn cache(mut self, cache: CacheBudget) -> Self {
        self.options.cache = cache;
        self
    }

    pub fn preference_debounce(mut self, debounce: Duration) -> Self {
        self.options.preference_debounce = debounce;
        self
    }

    pub fn render_hints(mut self, hints: RenderHints) -> Self {
        self.options.render_hints = hints;
        self
    }

    pub fn default_density(mut self, density: Density) -> Self {
        self.options.default_density = density;
        self
    }

    pub fn build(self) -> Result<ViewOptions> {
        self.options.validate()?;
        Ok(self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_shared::ColumnType;

    fn products() -> ViewId {
        ViewId::new("products").unwrap()
    }

    #[test]
    fn test_builder_defaults() {
        let options = ViewOptions::builder(products())
            .column(ColumnDescriptor::new("sku", "SKU"))
            .column(ColumnDescriptor::new("price", "Price").with_type(ColumnType::Currency))
            .row_number(true)
            .build()
            .unwrap();

        assert_eq!(options.default_page_size, 25);
        assert_eq!(options.pagination_mode, PaginationMode::Server);
        assert_eq!(options.ttl, Duration::from_secs(300));
        assert!(options.feature_flags.sort);
        assert!(!options.feature_flags.rtl);

        let fields: Vec<_> = options
            .assembled_columns()
            .into_iter()
            .map(|c| c.field)
            .collect();
        assert_eq!(fields, vec!["__row_number__", "sku", "price"]);
    }

    #[test]
    fn test_builder_rejects_invalid_options() {
        let err = ViewOptions::builder(products())
            .column(ColumnDescriptor::new("sku", "SKU"))
            .default_page_size(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_retry_delays_grow_and_cap() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for(40), Duration::from_millis(350));
    }

    #[test]
    fn test_virtualization_threshold() {
        let mut options = ViewOptions::new(products(), vec![ColumnDescriptor::new("sku", "SKU")]);
        assert!(!options.should_virtualize(99));
        assert!(options.should_virtualize(100));
        options.feature_flags.virtualization = false;
        assert!(!options.should_virtualize(10_000));
    }

    #[test]
    fn test_config_error_becomes_internal() {
        let err: GridError = ConfigError::Validation("bad".into()).into();
        assert_eq!(err.kind(), grid_shared::ErrorKind::Internal);
    }
}

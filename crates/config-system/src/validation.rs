//! View option validation

use crate::{ConfigError, Result, ViewOptions};
use grid_shared::columns::validate_columns;
use std::collections::HashSet;
use std::time::Duration;

/// Shortest debounce window the preference writer honours
pub const MIN_PREFERENCE_DEBOUNCE: Duration = Duration::from_millis(250);

const MAX_PAGE_SIZE: usize = 10_000;
const MAX_RETRY_ATTEMPTS: u32 = 10;
const MIN_CACHE_BYTES: usize = 64 * 1024;

/// View option validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate a complete option set
    pub fn validate(options: &ViewOptions) -> Result<()> {
        Self::validate_columns(options)?;
        Self::validate_pagination(options)?;
        Self::validate_timing(options)?;
        Self::validate_cache(options)?;
        Self::validate_render_hints(options)?;
        Self::warn_suspicious(options);
        Ok(())
    }

    fn validate_columns(options: &ViewOptions) -> Result<()> {
        if options.columns.is_empty() {
            return Err(ConfigError::Columns(format!(
                "View '{}' declares no columns",
                options.view_id
            )));
        }

        let assembled = options.assembled_columns();
        validate_columns(&assembled).map_err(|e| ConfigError::Columns(e.to_string()))?;

        let known: HashSet<&str> = assembled.iter().map(|c| c.field.as_str()).collect();
        if let Some(unknown) = options
            .searchable_fields
            .iter()
            .find(|field| !known.contains(field.as_str()))
        {
            return Err(ConfigError::Validation(format!(
                "Searchable field '{unknown}' is not a declared column"
            )));
        }

        Ok(())
    }

    fn validate_pagination(options: &ViewOptions) -> Result<()> {
        if options.default_page_size == 0 || options.default_page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::Validation(format!(
                "Invalid default_page_size: {}. Must be between 1 and {MAX_PAGE_SIZE}",
                options.default_page_size
            )));
        }

        if let Some(size) = options
            .page_size_options
            .iter()
            .find(|size| **size == 0 || **size > MAX_PAGE_SIZE)
        {
            return Err(ConfigError::Validation(format!(
                "Invalid page size option: {size}. Must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }

        if options.feature_flags.virtualization && options.virtualization_threshold == 0 {
            return Err(ConfigError::Validation(
                "virtualization_threshold must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_timing(options: &ViewOptions) -> Result<()> {
        if options.ttl.is_zero() {
            return Err(ConfigError::Validation(
                "Cache ttl must be greater than 0".to_string(),
            ));
        }

        if options.timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::Validation(
                "Request timeout must be greater than 0 when set".to_string(),
            ));
        }

        let retry = &options.retry;
        if retry.max_attempts == 0 || retry.max_attempts > MAX_RETRY_ATTEMPTS {
            return Err(ConfigError::Validation(format!(
                "Invalid retry max_attempts: {}. Must be between 1 and {MAX_RETRY_ATTEMPTS}",
                retry.max_attempts
            )));
        }

        if retry.base_delay > retry.max_delay {
            return Err(ConfigError::Validation(
                "Retry base_delay cannot exceed max_delay".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_cache(options: &ViewOptions) -> Result<()> {
        if options.cache.max_entries == 0 {
            return Err(ConfigError::Validation(
                "Cache max_entries must be greater than 0".to_string(),
            ));
        }

        if options.cache.max_bytes < MIN_CACHE_BYTES {
            return Err(ConfigError::Validation(format!(
                "Cache budget too small: {} bytes. Minimum is 64KB",
                options.cache.max_bytes
            )));
        }

        Ok(())
    }

    fn validate_render_hints(options: &ViewOptions) -> Result<()> {
        if options.render_hints.row_height == Some(0) {
            return Err(ConfigError::Validation(
                "Row height must be greater than 0 when set".to_string(),
            ));
        }
        Ok(())
    }

    /// Legal but probably unintended combinations
    fn warn_suspicious(options: &ViewOptions) {
        if !options.page_size_options.is_empty()
            && !options.page_size_options.contains(&options.default_page_size)
        {
            log::warn!(
                "View '{}': default page size {} is not among the page size options {:?}",
                options.view_id,
                options.default_page_size,
                options.page_size_options
            );
        }

        if options.preference_debounce < MIN_PREFERENCE_DEBOUNCE {
            log::warn!(
                "View '{}': preference debounce {:?} is below {:?} and will be clamped",
                options.view_id,
                options.preference_debounce,
                MIN_PREFERENCE_DEBOUNCE
            );
        }

        if let Some(timeout) = options.timeout {
            let worst_backoff: Duration = (1..options.retry.max_attempts)
                .map(|retry| options.retry.delay_for(retry))
                .sum();
            if worst_backoff > timeout * 4 {
                log::warn!(
                    "View '{}': retry back-off ({worst_backoff:?}) dwarfs the request timeout ({timeout:?})",
                    options.view_id
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_shared::{ColumnDescriptor, ViewId};

    fn options() -> ViewOptions {
        ViewOptions::new(
            ViewId::new("orders").unwrap(),
            vec![
                ColumnDescriptor::new("increment_id", "Order #"),
                ColumnDescriptor::new("status", "Status"),
            ],
        )
    }

    #[test]
    fn test_default_options_are_valid() {
        assert!(ConfigValidator::validate(&options()).is_ok());
    }

    #[test]
    fn test_duplicate_fields_across_pre_and_base() {
        let mut opts = options();
        opts.pre_columns = vec![ColumnDescriptor::new("status", "Status")];
        assert!(matches!(
            ConfigValidator::validate(&opts),
            Err(ConfigError::Columns(_))
        ));
    }

    #[test]
    fn test_second_row_number_column_rejected() {
        let mut opts = options();
        opts.row_number = true;
        opts.pre_columns = vec![ColumnDescriptor::row_number()];
        assert!(matches!(
            ConfigValidator::validate(&opts),
            Err(ConfigError::Columns(_))
        ));
    }

    #[test]
    fn test_unknown_searchable_field() {
        let mut opts = options();
        opts.searchable_fields = vec!["customer_email".into()];
        assert!(matches!(
            ConfigValidator::validate(&opts),
            Err(ConfigError::Validation(_))
        ));

        opts.searchable_fields = vec!["status".into()];
        assert!(ConfigValidator::validate(&opts).is_ok());
    }

    #[test]
    fn test_timing_checks() {
        let mut opts = options();
        opts.timeout = Some(Duration::ZERO);
        assert!(ConfigValidator::validate(&opts).is_err());

        let mut opts = options();
        opts.retry.max_attempts = 0;
        assert!(ConfigValidator::validate(&opts).is_err());

        let mut opts = options();
        opts.retry.base_delay = Duration::from_secs(10);
        assert!(ConfigValidator::validate(&opts).is_err());

        let mut opts = options();
        opts.timeout = None;
        assert!(ConfigValidator::validate(&opts).is_ok());
    }

    #[test]
    fn test_cache_budget_checks() {
        let mut opts = options();
        opts.cache.max_entries = 0;
        assert!(ConfigValidator::validate(&opts).is_err());

        let mut opts = options();
        opts.cache.max_bytes = 1024;
        assert!(ConfigValidator::validate(&opts).is_err());
    }
}

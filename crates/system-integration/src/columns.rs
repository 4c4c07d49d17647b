//! Column pipeline
//!
//! Builds the effective column list in three steps: assemble the declared
//! descriptors, apply saved preferences, then enhance with translated headers
//! and feature flags. The result is swapped in atomically. Overlapping runs
//! are guarded by tickets; only the newest run may publish.

use arc_swap::ArcSwap;
use grid_config::{FeatureFlags, ViewOptions};
use grid_shared::columns::{validate_columns, ROW_NUMBER_FIELD};
use grid_shared::{
    ColumnDescriptor, ColumnType, ColumnWidth, EffectiveColumn, GridResult, Header, PinSide,
    PreferenceRecord, ViewId,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

/// Resolves translation keys. Hosts plug in their i18n catalogue.
pub trait Translator: Send + Sync {
    fn translate(&self, key: &str) -> Option<String>;
}

/// Leaves every key untranslated
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTranslator;

impl Translator for NoopTranslator {
    fn translate(&self, _key: &str) -> Option<String> {
        None
    }
}

impl Translator for HashMap<String, String> {
    fn translate(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Identity of a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessingKey {
    pub view: ViewId,
    pub flags: FeatureFlags,
    pub base_len: usize,
}

impl ProcessingKey {
    pub fn for_options(options: &ViewOptions) -> Self {
        Self {
            view: options.view_id.clone(),
            flags: options.feature_flags,
            base_len: options.columns.len(),
        }
    }
}

/// Result of one pipeline run
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutcome {
    Published(Arc<Vec<EffectiveColumn>>),
    /// Saved settings were skipped
    Degraded {
        columns: Arc<Vec<EffectiveColumn>>,
        reason: String,
    },
    /// A newer run started before this one finished
    Superseded,
}

impl PipelineOutcome {
    pub fn columns(&self) -> Option<&Arc<Vec<EffectiveColumn>>> {
        match self {
            PipelineOutcome::Published(columns) | PipelineOutcome::Degraded { columns, .. } => {
                Some(columns)
            }
            PipelineOutcome::Superseded => None,
        }
    }
}

pub struct ColumnPipeline {
    translator: Arc<dyn Translator>,
    published: ArcSwap<Vec<EffectiveColumn>>,
    /// Latest issued ticket and the key it was issued for
    guard: Mutex<(u64, Option<ProcessingKey>)>,
}

impl ColumnPipeline {
    pub fn new(translator: Arc<dyn Translator>) -> Self {
        Self {
            translator,
            published: ArcSwap::from_pointee(Vec::new()),
            guard: Mutex::new((0, None)),
        }
    }

    /// Last published list
    pub fn current(&self) -> Arc<Vec<EffectiveColumn>> {
        self.published.load_full()
    }

    /// Issue a ticket; any earlier ticket can no longer publish
    pub fn begin(&self, key: ProcessingKey) -> u64 {
        let mut guard = self.guard.lock();
        if guard.1.as_ref() == Some(&key) {
            log::debug!("Column run for {} supersedes an identical run", key.view);
        }
        guard.0 += 1;
        guard.1 = Some(key);
        guard.0
    }

    /// Run the pipeline with preferences that are still loading
    pub async fn process<F>(&self, options: &ViewOptions, preferences: F) -> PipelineOutcome
    where
        F: Future<Output = GridResult<Option<PreferenceRecord>>>,
    {
        let ticket = self.begin(ProcessingKey::for_options(options));
        let preferences = preferences.await;
        self.complete(ticket, options, preferences)
    }

    /// Run the pipeline with preferences already in hand
    pub fn process_with(
        &self,
        options: &ViewOptions,
        preferences: Option<&PreferenceRecord>,
    ) -> PipelineOutcome {
        let ticket = self.begin(ProcessingKey::for_options(options));
        self.complete(ticket, options, Ok(preferences.cloned()))
    }

    /// Finish the run holding `ticket`
    pub fn complete(
        &self,
        ticket: u64,
        options: &ViewOptions,
        preferences: GridResult<Option<PreferenceRecord>>,
    ) -> PipelineOutcome {
        let assembled = options.assembled_columns();

        let (descriptors, degraded) = match (validate_columns(&assembled), preferences) {
            (Err(err), _) => (dedupe(assembled), Some(err.to_string())),
            (Ok(()), Err(err)) => (assembled, Some(format!("preferences unavailable: {err}"))),
            (Ok(()), Ok(Some(record))) => (apply_preferences(assembled, &record), None),
            (Ok(()), Ok(None)) => (assembled, None),
        };

        let columns = Arc::new(enhance(
            descriptors,
            &options.feature_flags,
            self.translator.as_ref(),
        ));

        {
            // Check and swap under the guard so a newer run cannot interleave
            let guard = self.guard.lock();
            if guard.0 != ticket {
                log::debug!(
                    "Dropping column run {ticket} for {}; run {} is newer",
                    options.view_id,
                    guard.0
                );
                return PipelineOutcome::Superseded;
            }
            self.published.store(columns.clone());
        }

        match degraded {
            Some(reason) => {
                log::warn!("Columns for {} degraded: {reason}", options.view_id);
                PipelineOutcome::Degraded { columns, reason }
            }
            None => PipelineOutcome::Published(columns),
        }
    }
}

/// Keep the first descriptor per field and a single row-number column
fn dedupe(columns: Vec<ColumnDescriptor>) -> Vec<ColumnDescriptor> {
    let mut seen = HashSet::new();
    columns
        .into_iter()
        .filter(|column| !column.field.is_empty() && seen.insert(column.field.clone()))
        .map(|mut column| {
            if column.column_type == ColumnType::Action {
                column.sortable = false;
                column.filterable = false;
            }
            column
        })
        .collect()
}

/// Apply saved widths, visibility, order and pinning.
///
/// The result is always a permutation of `columns`: saved fields that no
/// longer exist are dropped, new fields are appended in declared order and
/// the row-number column stays first.
pub fn apply_preferences(
    columns: Vec<ColumnDescriptor>,
    record: &PreferenceRecord,
) -> Vec<ColumnDescriptor> {
    let mut by_field: HashMap<String, ColumnDescriptor> = HashMap::with_capacity(columns.len());
    let declared: Vec<String> = columns.iter().map(|c| c.field.clone()).collect();
    for column in columns {
        by_field.insert(column.field.clone(), column);
    }

    let mut order: Vec<String> = Vec::with_capacity(declared.len());
    if declared.iter().any(|f| f == ROW_NUMBER_FIELD) {
        order.push(ROW_NUMBER_FIELD.to_string());
    }
    for field in &record.column_order {
        if by_field.contains_key(field) && !order.contains(field) {
            order.push(field.clone());
        }
    }
    for field in &declared {
        if !order.contains(field) {
            order.push(field.clone());
        }
    }

    order
        .into_iter()
        .filter_map(|field| by_field.remove(&field))
        .map(|mut column| {
            if let Some(width) = record.column_widths.get(&column.field) {
                column.width = ColumnWidth::Fixed(*width);
            }
            if column.hideable {
                if let Some(visible) = record.visibility_of(&column.field) {
                    column.visible = visible;
                }
            }
            // Saved pins replace the declared ones as a whole
            if column.pinnable && !record.pinned_columns.is_empty() {
                column.pinned = record.pinned_columns.side_of(&column.field);
            }
            column
        })
        .collect()
}

/// Resolve headers and apply feature flags
pub fn enhance(
    columns: Vec<ColumnDescriptor>,
    flags: &FeatureFlags,
    translator: &dyn Translator,
) -> Vec<EffectiveColumn> {
    columns
        .into_iter()
        .map(|column| {
            let is_row_number = column.is_row_number();
            let is_action = column.column_type == ColumnType::Action;
            let header = match &column.header {
                Header::Text(text) => text.clone(),
                Header::TranslationKey(key) if flags.i18n => {
                    translator.translate(key).unwrap_or_else(|| key.clone())
                }
                Header::TranslationKey(key) => key.clone(),
            };
            let hideable = column.hideable && !is_row_number;

            EffectiveColumn {
                header,
                width: column.width,
                column_type: column.column_type,
                sortable: column.sortable && flags.sort && !is_action && !is_row_number,
                filterable: column.filterable && flags.filter && !is_action && !is_row_number,
                hideable,
                visible: column.visible || !hideable,
                pinned: if column.pinnable {
                    column.pinned
                } else {
                    PinSide::None
                },
                resizable: flags.column_resize && !is_row_number,
                movable: flags.column_reorder && !is_row_number,
                is_row_number,
                render_hint: column.render_hint,
                field: column.field,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_shared::{GridError, PinnedColumns};
    use std::time::Duration;

    fn options() -> ViewOptions {
        let mut options = ViewOptions::new(
            ViewId::new("products").unwrap(),
            vec![
                ColumnDescriptor::new("sku", "SKU"),
                ColumnDescriptor::translated("name", "catalog.name"),
                ColumnDescriptor::new("price", "Price").with_type(ColumnType::Currency),
            ],
        );
        options.row_number = true;
        options.pre_columns = vec![ColumnDescriptor::new("thumbnail", "Image")];
        options.post_columns = vec![ColumnDescriptor::action("actions", "Actions")];
        options
    }

    fn fields(columns: &[EffectiveColumn]) -> Vec<&str> {
        columns.iter().map(|c| c.field.as_str()).collect()
    }

    fn catalogue() -> Arc<dyn Translator> {
        let mut map = HashMap::new();
        map.insert("catalog.name".to_string(), "Product name".to_string());
        Arc::new(map)
    }

    #[test]
    fn test_assemble_and_enhance() {
        let pipeline = ColumnPipeline::new(catalogue());
        let outcome = pipeline.process_with(&options(), None);
        let columns = outcome.columns().unwrap();

        assert_eq!(
            fields(columns),
            vec!["__row_number__", "thumbnail", "sku", "name", "price", "actions"]
        );
        assert_eq!(columns[3].header, "Product name");
        assert!(columns[0].is_row_number);
        assert!(!columns[0].sortable && !columns[0].movable && !columns[0].hideable);
        assert!(!columns[5].sortable && !columns[5].filterable);
        assert!(columns[2].sortable && columns[2].resizable);
        assert_eq!(pipeline.current(), *columns);
    }

    #[test]
    fn test_flags_disable_sort_filter_and_i18n() {
        let mut opts = options();
        opts.feature_flags.sort = false;
        opts.feature_flags.filter = false;
        opts.feature_flags.i18n = false;
        opts.feature_flags.column_reorder = false;

        let pipeline = ColumnPipeline::new(catalogue());
        let columns = pipeline.process_with(&opts, None).columns().unwrap().clone();
        assert!(columns.iter().all(|c| !c.sortable && !c.filterable && !c.movable));
        assert_eq!(columns[3].header, "catalog.name");
    }

    #[test]
    fn test_missing_translation_falls_back_to_key() {
        let pipeline = ColumnPipeline::new(Arc::new(NoopTranslator));
        let columns = pipeline.process_with(&options(), None).columns().unwrap().clone();
        assert_eq!(columns[3].header, "catalog.name");
    }

    #[test]
    fn test_saved_settings_are_applied() {
        let mut record = PreferenceRecord::new(25);
        record.column_order = vec![
            "price".into(),
            "discontinued".into(),
            "sku".into(),
            "__row_number__".into(),
        ];
        record.column_visibility.insert("thumbnail".into(), false);
        record.column_visibility.insert("__row_number__".into(), false);
        record.column_widths.insert("sku".into(), 180);
        record.pinned_columns = PinnedColumns {
            left: vec!["sku".into()],
            right: vec!["actions".into()],
        };

        let pipeline = ColumnPipeline::new(Arc::new(NoopTranslator));
        let columns = pipeline
            .process_with(&options(), Some(&record))
            .columns()
            .unwrap()
            .clone();

        // Row number first, saved order next, new fields appended in declared order
        assert_eq!(
            fields(&columns),
            vec!["__row_number__", "price", "sku", "thumbnail", "name", "actions"]
        );
        assert!(columns[0].visible);
        assert!(!columns[3].visible);
        assert_eq!(columns[2].width, ColumnWidth::Fixed(180));
        assert_eq!(columns[2].pinned, PinSide::Left);
        assert_eq!(columns[5].pinned, PinSide::Right);
    }

    #[test]
    fn test_result_is_a_permutation() {
        let mut record = PreferenceRecord::new(25);
        record.column_order = vec!["name".into(), "name".into(), "ghost".into()];

        let assembled = options().assembled_columns();
        let applied = apply_preferences(assembled.clone(), &record);

        let mut before: Vec<_> = assembled.iter().map(|c| c.field.clone()).collect();
        let mut after: Vec<_> = applied.iter().map(|c| c.field.clone()).collect();
        before.sort();
        after.sort();
        assert_eq!(before, after);
    }

    #[test]
    fn test_preference_failure_degrades() {
        let pipeline = ColumnPipeline::new(Arc::new(NoopTranslator));
        let ticket = pipeline.begin(ProcessingKey::for_options(&options()));
        let outcome = pipeline.complete(
            ticket,
            &options(),
            Err(GridError::StorageUnavailable {
                message: "blocked".into(),
            }),
        );
        match outcome {
            PipelineOutcome::Degraded { columns, reason } => {
                assert_eq!(columns.len(), 6);
                assert!(reason.contains("preferences unavailable"));
            }
            other => panic!("expected degraded columns, got {other:?}"),
        }
    }

    #[test]
    fn test_invalid_descriptors_degrade_to_deduplicated_base() {
        let mut opts = options();
        opts.post_columns.push(ColumnDescriptor::new("sku", "Duplicate"));
        let pipeline = ColumnPipeline::new(Arc::new(NoopTranslator));
        match pipeline.process_with(&opts, None) {
            PipelineOutcome::Degraded { columns, .. } => assert_eq!(columns.len(), 6),
            other => panic!("expected degraded columns, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_newest_run_wins() {
        let pipeline = ColumnPipeline::new(Arc::new(NoopTranslator));
        let opts = options();

        let mut slow_record = PreferenceRecord::new(25);
        slow_record.column_order = vec!["price".into()];
        let mut fast_record = PreferenceRecord::new(25);
        fast_record.column_order = vec!["name".into()];

        let slow = pipeline.process(&opts, async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(Some(slow_record))
        });
        let fast = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            pipeline
                .process(&opts, async { Ok(Some(fast_record)) })
                .await
        };

        let (slow, fast) = tokio::join!(slow, fast);
        assert_eq!(slow, PipelineOutcome::Superseded);
        assert!(matches!(fast, PipelineOutcome::Published(_)));
        assert_eq!(pipeline.current()[1].field, "name");
    }
}

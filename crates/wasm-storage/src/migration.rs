//! Schema migration for stored preference records
//!
//! Records are migrated as raw JSON maps so fields this build does not know
//! about pass through untouched.

use grid_shared::CURRENT_SCHEMA_VERSION;
use serde_json::{Map, Value};

/// Upgrades a record from `from` to `from + 1`
pub type MigrationFn = fn(&mut Map<String, Value>);

const VERSION_KEY: &str = "schemaVersion";

pub struct Migrator {
    /// Ordered by source version
    steps: Vec<(u32, MigrationFn)>,
    target: u32,
}

impl Default for Migrator {
    fn default() -> Self {
        Self {
            steps: vec![(0, v0_to_v1), (1, v1_to_v2)],
            target: CURRENT_SCHEMA_VERSION,
        }
    }
}

impl Migrator {
    /// A migrator with no steps, for records that never change shape
    pub fn empty(target: u32) -> Self {
        Self {
            steps: Vec::new(),
            target,
        }
    }

    pub fn with_step(mut self, from: u32, step: MigrationFn) -> Self {
        self.steps.push((from, step));
        self.steps.sort_by_key(|(version, _)| *version);
        self
    }

    pub fn target(&self) -> u32 {
        self.target
    }

    /// Apply every step from the stored version up to the target.
    /// Returns the version the record was stored with.
    pub fn migrate(&self, record: &mut Map<String, Value>) -> u32 {
        let raw_version = record.get(VERSION_KEY).and_then(Value::as_u64);
        let stored = match raw_version {
            Some(raw) => u32::try_from(raw).unwrap_or_else(|_| {
                // Newer than anything this build knows; keep it loadable
                record.insert(VERSION_KEY.to_string(), Value::from(u32::MAX));
                u32::MAX
            }),
            None => 0,
        };

        if stored > self.target {
            log::warn!(
                "Preference record has schema v{stored}, newer than v{}; loading as-is",
                self.target
            );
            return stored;
        }

        let mut version = stored;
        for (from, step) in &self.steps {
            if *from == version && version < self.target {
                step(record);
                version += 1;
                record.insert(VERSION_KEY.to_string(), Value::from(version));
            }
        }

        if version < self.target {
            // No step covers the gap; stamp the target so the record loads
            log::debug!("No migration from v{version} to v{}", self.target);
            record.insert(VERSION_KEY.to_string(), Value::from(self.target));
        }

        stored
    }
}

/// Unversioned records kept hidden columns as a list and had no density
fn v0_to_v1(record: &mut Map<String, Value>) {
    if let Some(Value::Array(hidden)) = record.remove("hiddenColumns") {
        let visibility = record
            .entry("columnVisibility")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(visibility) = visibility {
            for field in hidden.iter().filter_map(Value::as_str) {
                visibility.insert(field.to_string(), Value::Bool(false));
            }
        }
    }

    record
        .entry("density")
        .or_insert_with(|| Value::String("standard".to_string()));
    record.entry("pageSize").or_insert_with(|| Value::from(25));
}

/// v1 stored widths under `columnSizes`
fn v1_to_v2(record: &mut Map<String, Value>) {
    if let Some(sizes) = record.remove("columnSizes") {
        if !record.contains_key("columnWidths") {
            record.insert("columnWidths".to_string(), sizes);
        }
    }
}

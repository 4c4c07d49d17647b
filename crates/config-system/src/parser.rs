//! Option file parser for JSON and TOML presets

use crate::{ConfigError, Result, ViewOptions};
use grid_shared::ViewId;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    /// Detect the format from a file extension
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            ConfigError::Parse("Cannot determine config format from file extension".to_string())
        })?;

        match ext.to_lowercase().as_str() {
            "json" => Ok(ConfigFormat::Json),
            "toml" => Ok(ConfigFormat::Toml),
            _ => Err(ConfigError::Parse(format!("Unsupported config format: {ext}"))),
        }
    }
}

/// A preset document holding the options of several views
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewOptionsFile {
    #[serde(default)]
    pub views: Vec<ViewOptions>,
}

impl ViewOptionsFile {
    pub fn get(&self, view_id: &ViewId) -> Option<&ViewOptions> {
        self.views.iter().find(|view| &view.view_id == view_id)
    }

    pub fn view_ids(&self) -> impl Iterator<Item = &ViewId> {
        self.views.iter().map(|view| &view.view_id)
    }
}

/// Option file parser
pub struct ConfigParser;

impl ConfigParser {
    /// Parse and validate a preset document
    pub fn parse_string(content: &str, format: ConfigFormat) -> Result<ViewOptionsFile> {
        let file: ViewOptionsFile = Self::parse_partial(content, format)?;

        let mut seen = std::collections::HashSet::new();
        for view in &file.views {
            if !seen.insert(view.view_id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "View '{}' is declared twice",
                    view.view_id
                )));
            }
            view.validate()?;
        }

        log::debug!("Parsed {} view presets", file.views.len());
        Ok(file)
    }

    /// Parse and validate the options of a single view
    pub fn parse_view(content: &str, format: ConfigFormat) -> Result<ViewOptions> {
        let options: ViewOptions = Self::parse_partial(content, format)?;
        options.validate()?;
        Ok(options)
    }

    /// Parse a preset document from disk
    #[cfg(not(target_arch = "wasm32"))]
    pub fn parse_file(path: impl AsRef<Path>) -> Result<ViewOptionsFile> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let format = ConfigFormat::from_path(path)?;
        Self::parse_string(&content, format)
    }

    /// Deserialise without validation
    pub fn parse_partial<T: serde::de::DeserializeOwned>(
        content: &str,
        format: ConfigFormat,
    ) -> Result<T> {
        match format {
            ConfigFormat::Json => serde_json::from_str(content)
                .map_err(|e| ConfigError::Parse(format!("JSON parse error: {e}"))),
            ConfigFormat::Toml => toml::from_str(content)
                .map_err(|e| ConfigError::Parse(format!("TOML parse error: {e}"))),
        }
    }

    pub fn serialize_string<T: Serialize>(value: &T, format: ConfigFormat) -> Result<String> {
        match format {
            ConfigFormat::Json => serde_json::to_string_pretty(value)
                .map_err(|e| ConfigError::Parse(format!("JSON serialization error: {e}"))),
            ConfigFormat::Toml => toml::to_string_pretty(value)
                .map_err(|e| ConfigError::Parse(format!("TOML serialization error: {e}"))),
        }
    }
}

//! Column descriptors and the effective column shape published to renderers

use crate::errors::{GridError, GridResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Field key reserved for the synthetic row-number column
pub const ROW_NUMBER_FIELD: &str = "__row_number__";

/// Column type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    #[default]
    Text,
    Number,
    Currency,
    Date,
    Datetime,
    Status,
    Boolean,
    Action,
}

/// Header text, either literal or resolved through the translator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Header {
    Text(String),
    TranslationKey(String),
}

impl Header {
    /// The raw string, ignoring translation
    pub fn raw(&self) -> &str {
        match self {
            Header::Text(text) => text,
            Header::TranslationKey(key) => key,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnWidth {
    Fixed(u32),
    #[default]
    Flex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PinSide {
    #[default]
    None,
    Left,
    Right,
}

/// Declarative column definition supplied by the host page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub field: String,
    pub header: Header,
    #[serde(default)]
    pub width: ColumnWidth,
    #[serde(default, rename = "type")]
    pub column_type: ColumnType,
    #[serde(default = "default_true")]
    pub sortable: bool,
    #[serde(default = "default_true")]
    pub filterable: bool,
    #[serde(default = "default_true")]
    pub hideable: bool,
    /// Whether the column may be pinned, and the side it starts pinned to
    #[serde(default = "default_true")]
    pub pinnable: bool,
    #[serde(default)]
    pub pinned: PinSide,
    #[serde(default = "default_true")]
    pub visible: bool,
    /// Opaque to the runtime, forwarded to the renderer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_hint: Option<serde_json::Value>,
}

fn default_true() -> bool {
    true
}

impl ColumnDescriptor {
    pub fn new(field: impl Into<String>, header: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            header: Header::Text(header.into()),
            width: ColumnWidth::Flex,
            column_type: ColumnType::Text,
            sortable: true,
            filterable: true,
            hideable: true,
            pinnable: true,
            pinned: PinSide::None,
            visible: true,
            render_hint: None,
        }
    }

    /// Header resolved through the translator at pipeline time
    pub fn translated(field: impl Into<String>, key: impl Into<String>) -> Self {
        let mut column = Self::new(field, "");
        column.header = Header::TranslationKey(key.into());
        column
    }

    /// An action column; never sortable or filterable
    pub fn action(field: impl Into<String>, header: impl Into<String>) -> Self {
        let mut column = Self::new(field, header);
        column.column_type = ColumnType::Action;
        column.sortable = false;
        column.filterable = false;
        column
    }

    /// The synthetic row-number column
    pub fn row_number() -> Self {
        let mut column = Self::new(ROW_NUMBER_FIELD, "#");
        column.column_type = ColumnType::Number;
        column.width = ColumnWidth::Fixed(56);
        column.sortable = false;
        column.filterable = false;
        column.hideable = false;
        column
    }

    pub fn with_type(mut self, column_type: ColumnType) -> Self {
        self.column_type = column_type;
        if column_type == ColumnType::Action {
            self.sortable = false;
            self.filterable = false;
        }
        self
    }

    pub fn with_width(mut self, width: u32) -> Self {
        self.width = ColumnWidth::Fixed(width);
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn pinned_to(mut self, side: PinSide) -> Self {
        self.pinned = side;
        self
    }

    pub fn is_row_number(&self) -> bool {
        self.field == ROW_NUMBER_FIELD
    }
}

/// Check descriptor invariants: unique fields, a single row-number column and
/// action columns that are neither sortable nor filterable.
pub fn validate_columns(columns: &[ColumnDescriptor]) -> GridResult<()> {
    let mut seen = HashSet::new();
    let mut row_numbers = 0;

    for column in columns {
        if column.field.is_empty() {
            return Err(GridError::Internal {
                message: "column field must not be empty".to_string(),
            });
        }
        if !seen.insert(column.field.as_str()) {
            return Err(GridError::Internal {
                message: format!("duplicate column field '{}'", column.field),
            });
        }
        if column.is_row_number() {
            row_numbers += 1;
        }
        if column.column_type == ColumnType::Action && (column.sortable || column.filterable) {
            return Err(GridError::Internal {
                message: format!(
                    "action column '{}' cannot be sortable or filterable",
                    column.field
                ),
            });
        }
    }

    if row_numbers > 1 {
        return Err(GridError::Internal {
            message: "at most one row-number column is allowed".to_string(),
        });
    }

    Ok(())
}

/// A column after preferences and feature flags have been applied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveColumn {
    pub field: String,
    pub header: String,
    pub width: ColumnWidth,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub sortable: bool,
    pub filterable: bool,
    pub hideable: bool,
    pub visible: bool,
    pub pinned: PinSide,
    pub resizable: bool,
    pub movable: bool,
    pub is_row_number: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub render_hint: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_duplicates() {
        let columns = vec![
            ColumnDescriptor::new("sku", "SKU"),
            ColumnDescriptor::new("sku", "Code"),
        ];
        assert!(validate_columns(&columns).is_err());
    }

    #[test]
    fn test_validate_rejects_sortable_action() {
        let mut action = ColumnDescriptor::action("actions", "Actions");
        action.sortable = true;
        assert!(validate_columns(&[action]).is_err());

        let action = ColumnDescriptor::action("actions", "Actions");
        assert!(validate_columns(&[action]).is_ok());
    }

    #[test]
    fn test_validate_single_row_number() {
        let columns = vec![ColumnDescriptor::row_number(), ColumnDescriptor::row_number()];
        assert!(validate_columns(&columns).is_err());
    }

    #[test]
    fn test_descriptor_defaults_from_json() {
        let column: ColumnDescriptor =
            serde_json::from_str(r#"{"field":"price","header":{"text":"Price"},"type":"currency"}"#)
                .unwrap();
        assert_eq!(column.column_type, ColumnType::Currency);
        assert!(column.sortable);
        assert!(column.visible);
        assert_eq!(column.width, ColumnWidth::Flex);
    }
}

//! Schema, mapping, and policy types shared by the validator and dispatcher.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// FieldType / FieldSpec
// ─────────────────────────────────────────────────────────────────────────────

/// Declared type of a content-type attribute, as far as coercion cares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    /// Any attribute type the coercion engine passes through untouched
    /// (relations, media, json, dates...). Keeps the remote name for display.
    Other(String),
}

impl FieldType {
    /// Maps a Strapi attribute type name onto a coercion type.
    pub fn from_remote(kind: &str) -> Self {
        match kind {
            "number" | "integer" | "biginteger" | "float" | "decimal" => FieldType::Number,
            "boolean" => FieldType::Boolean,
            "string" | "text" | "richtext" | "email" | "uid" | "enumeration" | "password" => {
                FieldType::String
            }
            other => FieldType::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            FieldType::String => "string",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Other(name) => name.as_str(),
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One writable field of the target content type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub required: bool,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType, required: bool) -> Self {
        Self {
            name: name.into(),
            field_type,
            required,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// FieldMapping
// ─────────────────────────────────────────────────────────────────────────────

/// Source column of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnRef {
    Column(String),
    Unmapped,
}

impl ColumnRef {
    /// Interprets a user-entered column name. `""` and `"none"` mean unmapped.
    pub fn parse(column: &str) -> Self {
        if column.is_empty() || column == "none" {
            ColumnRef::Unmapped
        } else {
            ColumnRef::Column(column.to_string())
        }
    }

    pub fn column(&self) -> Option<&str> {
        match self {
            ColumnRef::Column(name) => Some(name.as_str()),
            ColumnRef::Unmapped => None,
        }
    }
}

/// Field name → source column, one entry per field in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    entries: Vec<(String, ColumnRef)>,
}

impl FieldMapping {
    /// Builds a mapping with every field unmapped.
    pub fn for_fields(fields: &[FieldSpec]) -> Self {
        Self {
            entries: fields
                .iter()
                .map(|f| (f.name.clone(), ColumnRef::Unmapped))
                .collect(),
        }
    }

    /// Points `field` at `column`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownField` if the field is not part of the schema.
    pub fn assign(&mut self, field: &str, column: &str) -> Result<(), AppError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|(name, _)| name == field)
            .ok_or_else(|| AppError::UnknownField(field.to_string()))?;
        entry.1 = ColumnRef::parse(column);
        Ok(())
    }

    pub fn get(&self, field: &str) -> Option<&ColumnRef> {
        self.entries
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, column)| column)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnRef)> {
        self.entries.iter().map(|(name, column)| (name.as_str(), column))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DefaultValues
// ─────────────────────────────────────────────────────────────────────────────

/// Field name → literal fallback used when a cell is empty or unparseable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefaultValues {
    values: HashMap<String, String>,
}

impl DefaultValues {
    /// Seeds a default per field from its type: `"0"` for numbers,
    /// `"false"` for booleans, `""` otherwise.
    pub fn seeded(fields: &[FieldSpec]) -> Self {
        let values = fields
            .iter()
            .map(|f| {
                let seed = match f.field_type {
                    FieldType::Number => "0",
                    FieldType::Boolean => "false",
                    _ => "",
                };
                (f.name.clone(), seed.to_string())
            })
            .collect();
        Self { values }
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.values.insert(field.into(), value.into());
    }

    /// Returns the default for a field; an empty string counts as no default.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.values
            .get(field)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// CoercionPolicy
// ─────────────────────────────────────────────────────────────────────────────

/// How empty cells are treated. Precedence: skip, then null, then default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoercionPolicy {
    pub convert_empty_to_null: bool,
    pub convert_empty_numbers_to_zero: bool,
    pub skip_empty_values: bool,
}

impl Default for CoercionPolicy {
    fn default() -> Self {
        Self {
            convert_empty_to_null: true,
            convert_empty_numbers_to_zero: true,
            skip_empty_values: false,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tabular data
// ─────────────────────────────────────────────────────────────────────────────

/// One data row. May be shorter or longer than the header list.
pub type Row = Vec<String>;

/// Parsed file contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

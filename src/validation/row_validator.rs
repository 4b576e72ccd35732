//! Row validation: builds a candidate record from one row and collects
//! required-field and type-conformance violations.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::model::{CoercionPolicy, DefaultValues, FieldMapping, FieldSpec, FieldType, Row};
use crate::validation::coercion::{coerce, parse_boolean, parse_number, Coerced};

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// Candidate record for one row plus every violation found in it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationResult {
    pub row_index: usize,
    pub record: Map<String, Value>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// A mapped field resolved against the header row.
#[derive(Debug, Clone)]
struct ResolvedField {
    spec: FieldSpec,
    /// Position of the first header matching the mapped column, if any.
    position: Option<usize>,
}

// ─────────────────────────────────────────────────────────────────────────────
// RowValidator
// ─────────────────────────────────────────────────────────────────────────────

/// Validates rows against a schema through a column mapping.
///
/// Column positions are resolved once at construction; `validate` is pure
/// and returns the same result for the same row every time.
#[derive(Debug, Clone)]
pub struct RowValidator {
    fields: Vec<FieldSpec>,
    resolved: Vec<ResolvedField>,
    missing_required: Vec<String>,
    defaults: DefaultValues,
    policy: CoercionPolicy,
}

impl RowValidator {
    pub fn new(
        headers: &[String],
        mapping: &FieldMapping,
        fields: &[FieldSpec],
        defaults: DefaultValues,
        policy: CoercionPolicy,
    ) -> Self {
        let mut resolved = Vec::new();
        let mut missing_required = Vec::new();

        for spec in fields {
            let column = mapping.get(&spec.name).and_then(|c| c.column());
            let position = column.and_then(|col| headers.iter().position(|h| h == col));

            if spec.required && position.is_none() {
                missing_required.push(spec.name.clone());
            }
            if column.is_some() {
                resolved.push(ResolvedField {
                    spec: spec.clone(),
                    position,
                });
            }
        }

        Self {
            fields: fields.to_vec(),
            resolved,
            missing_required,
            defaults,
            policy,
        }
    }

    /// Required fields that are unmapped or mapped to a column the file lacks.
    pub fn missing_required_mappings(&self) -> &[String] {
        &self.missing_required
    }

    /// Builds and checks the record for one row.
    pub fn validate(&self, row_index: usize, row: &Row) -> ValidationResult {
        let mut record = Map::new();

        for field in &self.resolved {
            let Some(position) = field.position else {
                continue;
            };
            let raw = row.get(position).map(String::as_str);
            if let Coerced::Value(value) = coerce(&field.spec, raw, &self.defaults, &self.policy) {
                record.insert(field.spec.name.clone(), value);
            }
        }

        let errors = self.check_record(&record);

        ValidationResult {
            row_index,
            record,
            errors,
        }
    }

    /// Required errors in field order, then conformance errors in record order.
    fn check_record(&self, record: &Map<String, Value>) -> Vec<String> {
        let mut errors = Vec::new();

        for spec in self.fields.iter().filter(|f| f.required) {
            let missing = match record.get(&spec.name) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.is_empty(),
                Some(_) => false,
            };
            if missing {
                errors.push(format!(
                    "Required field \"{}\" is missing or empty",
                    spec.name
                ));
            }
        }

        for (name, value) in record {
            let Some(spec) = self.fields.iter().find(|f| &f.name == name) else {
                continue;
            };
            let Value::String(s) = value else {
                continue;
            };
            match spec.field_type {
                FieldType::Number if parse_number(s).is_none() => {
                    errors.push(format!(
                        "Field \"{}\" expects a number, but got \"{}\"",
                        name, s
                    ));
                }
                FieldType::Boolean if parse_boolean(s).is_none() => {
                    errors.push(format!(
                        "Field \"{}\" expects a boolean, but got \"{}\"",
                        name, s
                    ));
                }
                _ => {}
            }
        }

        errors
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

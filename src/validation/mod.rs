//! Schema-driven row validation.
//!
//! Cells are coerced to their field's type first, then each candidate record
//! is checked for required fields and type conformance. Violations are
//! collected per row, never raised.

pub mod coercion;
pub mod row_validator;

pub use coercion::{coerce, Coerced};
pub use row_validator::{RowValidator, ValidationResult};

//! Batch CSV ingestion into Strapi content types.
//!
//! Rows of a delimited file are mapped onto a content type's fields, coerced
//! to the field types, validated, and created through the Strapi REST API in
//! paced concurrent batches that can be paused, resumed and retried.

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod report;
pub mod strapi;
pub mod tabular;
pub mod upload;
pub mod validation;

pub use error::AppError;

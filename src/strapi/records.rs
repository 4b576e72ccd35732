//! Record creation through the Strapi REST API.
//!
//! # Security
//!
//! - Record bodies are never logged
//! - Auth headers and tokens are never logged

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::AppError;
use crate::strapi::client::StrapiClient;

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// A record the backend accepted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteRecord {
    /// `documentId` (v5) or `id` (v4) of the created entry, when the response had one.
    pub id: Option<String>,
    /// Response `data` object, or `Null` when the body was not JSON.
    pub data: Value,
}

/// Why a single create call failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteCreateError {
    /// HTTP status, absent when the request never got a response.
    pub http_status: Option<u16>,
    pub message: String,
    /// Per-field messages from `error.details.errors`.
    pub field_errors: Vec<String>,
}

impl RemoteCreateError {
    pub fn connection_failed() -> Self {
        Self {
            http_status: None,
            message: "Connection failed".to_string(),
            field_errors: Vec::new(),
        }
    }

    pub fn timed_out(after_secs: u64) -> Self {
        Self {
            http_status: None,
            message: format!("Request timed out after {}s", after_secs),
            field_errors: Vec::new(),
        }
    }
}

impl std::fmt::Display for RemoteCreateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.http_status {
            Some(status) => write!(f, "HTTP error {}: {}", status, self.message)?,
            None => f.write_str(&self.message)?,
        }
        if !self.field_errors.is_empty() {
            write!(f, ". Errors: {}", self.field_errors.join(", "))?;
        }
        Ok(())
    }
}

impl std::error::Error for RemoteCreateError {}

// ─────────────────────────────────────────────────────────────────────────────
// RecordSink
// ─────────────────────────────────────────────────────────────────────────────

/// Destination for validated records, allowing test fakes.
pub trait RecordSink: Send + Sync {
    /// Creates one record in the given content type.
    fn create<'a>(
        &'a self,
        content_type: &'a str,
        record: &'a Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = Result<RemoteRecord, RemoteCreateError>> + Send + 'a>>;
}

/// Extracts the REST collection from a content type uid
/// (`api::article.article` → `article`).
pub fn collection_name(content_type: &str) -> &str {
    content_type.rsplit('.').next().unwrap_or(content_type)
}

// ─────────────────────────────────────────────────────────────────────────────
// StrapiRecordSink
// ─────────────────────────────────────────────────────────────────────────────

/// Creates records by POSTing `{"data": record}` to `/api/<collection>`.
#[derive(Clone)]
pub struct StrapiRecordSink {
    client: StrapiClient,
}

impl StrapiRecordSink {
    pub fn new(client: StrapiClient) -> Self {
        Self { client }
    }

    async fn create_record(
        &self,
        content_type: &str,
        record: &Map<String, Value>,
    ) -> Result<RemoteRecord, RemoteCreateError> {
        let path = format!("/api/{}", collection_name(content_type));
        let body = json!({ "data": record });

        let response = match self.client.post_json(&path, &body).await {
            Ok(response) => response,
            Err(AppError::ConnectionFailed(_)) => return Err(RemoteCreateError::connection_failed()),
            Err(e) => {
                return Err(RemoteCreateError {
                    http_status: None,
                    message: e.to_string(),
                    field_errors: Vec::new(),
                })
            }
        };

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let parsed: Value = serde_json::from_str(&text).unwrap_or(Value::Null);

        if !status.is_success() {
            let error = parse_error_body(status.as_u16(), &parsed);
            debug!("[STRAPI] create {} rejected: {}", path, error);
            return Err(error);
        }

        let data = parsed.get("data").cloned().unwrap_or(Value::Null);
        let id = data
            .get("documentId")
            .or_else(|| data.get("id"))
            .and_then(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            });

        Ok(RemoteRecord { id, data })
    }
}

impl RecordSink for StrapiRecordSink {
    fn create<'a>(
        &'a self,
        content_type: &'a str,
        record: &'a Map<String, Value>,
    ) -> Pin<Box<dyn Future<Output = Result<RemoteRecord, RemoteCreateError>> + Send + 'a>> {
        Box::pin(self.create_record(content_type, record))
    }
}

/// Builds a `RemoteCreateError` from a Strapi error body:
/// `{"error": {"message", "details": {"errors": [{"message" | "path"}]}}}`.
fn parse_error_body(status: u16, body: &Value) -> RemoteCreateError {
    let error = body.get("error");

    let message = error
        .and_then(|e| e.get("message"))
        .and_then(Value::as_str)
        .filter(|m| !m.is_empty())
        .unwrap_or("Unknown error")
        .to_string();

    let field_errors = error
        .and_then(|e| e.pointer("/details/errors"))
        .and_then(Value::as_array)
        .map(|errors| errors.iter().filter_map(describe_field_error).collect())
        .unwrap_or_default();

    RemoteCreateError {
        http_status: Some(status),
        message,
        field_errors,
    }
}

/// Uses the entry's message, falling back to its path.
fn describe_field_error(entry: &Value) -> Option<String> {
    if let Some(message) = entry.get("message").and_then(Value::as_str) {
        if !message.is_empty() {
            return Some(message.to_string());
        }
    }
    match entry.get("path")? {
        Value::String(s) => Some(s.clone()),
        Value::Array(parts) => Some(
            parts
                .iter()
                .map(|p| match p {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join("."),
        ),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

use serde::Serialize;
use thiserror::Error;

/// Patterns (lowercase) that indicate sensitive data not safe for display.
/// Used by `contains_sensitive()` for case-insensitive matching.
pub(crate) const SENSITIVE_PATTERNS: &[&str] = &[
    "bearer ",
    "authorization:",
    "api_token",
    "token=",
];

/// Returns true if the message contains any sensitive pattern (case-insensitive).
fn contains_sensitive(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    SENSITIVE_PATTERNS.iter().any(|p| lower.contains(p))
}

/// Sanitizes a message for display.
/// If sensitive content is detected, returns the fallback instead.
fn sanitize_message(msg: &str, fallback: &str) -> String {
    if contains_sensitive(msg) {
        fallback.into()
    } else {
        msg.to_string()
    }
}

/// User-friendly error presentation for the terminal.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorPresentation {
    pub title: String,
    pub message: String,
    pub action: Option<String>,
}

/// Application-wide error type.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Connectivity ──────────────────────────────────────────────────────────
    #[error("Authentication failed")]
    AuthFailed,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Strapi error: {0}")]
    StrapiError(String),

    #[error("Rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    // ── Schema ────────────────────────────────────────────────────────────────
    #[error("No content types found: {0}")]
    NoContentTypes(String),

    #[error("Unknown content type: {0}")]
    UnknownContentType(String),

    // ── Upload setup ──────────────────────────────────────────────────────────
    #[error("Required fields are not mapped: {}", .0.join(", "))]
    MissingRequiredMappings(Vec<String>),

    #[error("Unknown field in mapping: {0}")]
    UnknownField(String),

    #[error("No data rows to upload")]
    NoRows,

    #[error("Start row {start_row} is out of range (0..={row_count})")]
    InvalidStartRow { start_row: usize, row_count: usize },

    // ── File / CSV ────────────────────────────────────────────────────────────
    #[error("File is not valid UTF-8")]
    NotUtf8,

    #[error("Invalid CSV: {0}")]
    CsvInvalid(String),

    #[error("Report error: {0}")]
    ReportError(String),

    // ── Configuration ─────────────────────────────────────────────────────────
    #[error("Configuration error: {0}")]
    Config(String),

    // ── Generic fallback ──────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Converts the error into a user-friendly presentation.
    /// Never leaks tokens or sensitive URL parameters.
    pub fn to_presentation(&self) -> ErrorPresentation {
        match self {
            // ── Connectivity ──────────────────────────────────────────────────
            AppError::AuthFailed => ErrorPresentation {
                title: "Authentication Failed".into(),
                message: "Strapi rejected the API token.".into(),
                action: Some("Check the API token and its permissions".into()),
            },

            AppError::ConnectionFailed(msg) => ErrorPresentation {
                title: "Connection Failed".into(),
                message: sanitize_message(
                    msg,
                    "Could not connect to Strapi. Please check the URL and your network.",
                ),
                action: Some("Check the URL and network, then retry".into()),
            },

            AppError::StrapiError(msg) => ErrorPresentation {
                title: "Strapi Error".into(),
                message: sanitize_message(msg, "Strapi returned an error."),
                action: None,
            },

            AppError::RateLimited { retry_after_secs } => {
                let wait_msg = match retry_after_secs {
                    Some(secs) => format!("Please wait {} seconds before trying again.", secs),
                    None => "Please wait a moment before trying again.".into(),
                };
                ErrorPresentation {
                    title: "Too Many Requests".into(),
                    message: format!("Strapi is limiting requests. {}", wait_msg),
                    action: Some("Increase --delay-ms and retry".into()),
                }
            }

            // ── Schema ────────────────────────────────────────────────────────
            AppError::NoContentTypes(msg) => ErrorPresentation {
                title: "No Content Types".into(),
                message: sanitize_message(
                    &format!("Could not discover any content types. Last error: {}", msg),
                    "Could not discover any content types.",
                ),
                action: Some(
                    "Grant the token access to the Content-Type Builder API or pass --known-endpoint"
                        .into(),
                ),
            },

            AppError::UnknownContentType(uid) => ErrorPresentation {
                title: "Unknown Content Type".into(),
                message: format!("No content type with uid \"{}\" was found.", uid),
                action: Some("Run the `types` command to list available content types".into()),
            },

            // ── Upload setup ──────────────────────────────────────────────────
            AppError::MissingRequiredMappings(fields) => ErrorPresentation {
                title: "Incomplete Mapping".into(),
                message: format!("Please map all required fields: {}", fields.join(", ")),
                action: Some("Add --map field=column for each required field".into()),
            },

            AppError::UnknownField(name) => ErrorPresentation {
                title: "Unknown Field".into(),
                message: format!("The content type has no field named \"{}\".", name),
                action: Some("Run the `fields` command to list field names".into()),
            },

            AppError::NoRows => ErrorPresentation {
                title: "Nothing to Upload".into(),
                message: "The file contains no data rows.".into(),
                action: None,
            },

            AppError::InvalidStartRow {
                start_row,
                row_count,
            } => ErrorPresentation {
                title: "Invalid Start Row".into(),
                message: format!(
                    "Start row {} is past the end of the file ({} rows).",
                    start_row, row_count
                ),
                action: Some("Pass a smaller --start-row".into()),
            },

            // ── File / CSV ────────────────────────────────────────────────────
            AppError::NotUtf8 => ErrorPresentation {
                title: "Invalid File Encoding".into(),
                message: "The file must be UTF-8 encoded. Please re-save your file with UTF-8 encoding.".into(),
                action: Some("Convert file to UTF-8".into()),
            },

            AppError::CsvInvalid(msg) => ErrorPresentation {
                title: "Invalid CSV".into(),
                message: format!("The file has a formatting problem: {}", msg),
                action: Some("Fix the file and try again".into()),
            },

            AppError::ReportError(msg) => ErrorPresentation {
                title: "Report Not Written".into(),
                message: format!("Could not write the failure report: {}", msg),
                action: Some("Check the output path".into()),
            },

            // ── Configuration ─────────────────────────────────────────────────
            AppError::Config(msg) => ErrorPresentation {
                title: "Configuration Error".into(),
                message: sanitize_message(msg, "The configuration is invalid."),
                action: Some("Fix the configuration file or flags".into()),
            },

            // ── Generic ───────────────────────────────────────────────────────
            AppError::Internal(_) => ErrorPresentation {
                title: "Unexpected Error".into(),
                message: "Something went wrong. Please try again.".into(),
                action: Some("Try again".into()),
            },
        }
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_presentation().serialize(serializer)
    }
}

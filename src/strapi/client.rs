//! Strapi HTTP client with secure token handling and safe logging.

use std::time::{Duration, Instant};

use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use reqwest::Method;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};
use url::Url;

use crate::error::AppError;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// User agent string for all Strapi API requests.
const CLIENT_USER_AGENT: &str = "StrapiStampede/0.1.0";

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Query parameter keys (case-insensitive) that should have their values redacted.
const SENSITIVE_QUERY_PARAMS: &[&str] = &[
    "access_token",
    "api_token",
    "token",
    "jwt",
    "code",
    "authorization",
];

// ─────────────────────────────────────────────────────────────────────────────
// LoggingMode
// ─────────────────────────────────────────────────────────────────────────────

/// Controls how URLs are sanitized for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoggingMode {
    /// Log only the path component. Strips scheme, host, query, and fragment.
    /// Example: `/api/articles`
    #[default]
    PathOnly,

    /// Log path and query parameters, but redact sensitive values.
    /// Example: `/api/articles?pagination[limit]=1&token=***`
    PathAndQueryRedacted,
}

// ─────────────────────────────────────────────────────────────────────────────
// StrapiConnection
// ─────────────────────────────────────────────────────────────────────────────

/// Where and how to reach a Strapi instance.
///
/// The API token is wrapped in `SecretString` so it never shows up through
/// `Debug` or logging.
#[derive(Clone)]
pub struct StrapiConnection {
    /// Normalized base URL without trailing slash (e.g. "https://cms.example.com").
    pub base_url: String,
    /// API token; requests carry no Authorization header when absent.
    pub token: Option<SecretString>,
    /// Optional endpoint hint such as "/api/iframes".
    pub known_endpoint: Option<String>,
}

impl std::fmt::Debug for StrapiConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrapiConnection")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .field("known_endpoint", &self.known_endpoint)
            .finish()
    }
}

impl StrapiConnection {
    /// Builds a connection from user input, normalizing the URL.
    ///
    /// An empty token is treated as no token.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the URL cannot be parsed.
    pub fn new(
        url: &str,
        token: Option<String>,
        known_endpoint: Option<String>,
    ) -> Result<Self, AppError> {
        Ok(Self {
            base_url: normalize_base_url(url)?,
            token: token.filter(|t| !t.is_empty()).map(SecretString::from),
            known_endpoint: known_endpoint.filter(|e| !e.is_empty()),
        })
    }
}

/// Adds `https://` when the scheme is missing and trims trailing slashes.
///
/// # Errors
///
/// Returns `AppError::Config` for an empty or unparseable URL.
pub fn normalize_base_url(raw: &str) -> Result<String, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::Config("Strapi URL is required".to_string()));
    }

    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let normalized = with_scheme.trim_end_matches('/').to_string();
    Url::parse(&normalized)
        .map_err(|e| AppError::Config(format!("Invalid Strapi URL: {}", e)))?;

    Ok(normalized)
}

// ─────────────────────────────────────────────────────────────────────────────
// URL Sanitization
// ─────────────────────────────────────────────────────────────────────────────

/// Exact, case-insensitive match against `SENSITIVE_QUERY_PARAMS`.
fn is_sensitive_param(key: &str) -> bool {
    SENSITIVE_QUERY_PARAMS
        .iter()
        .any(|sensitive| key.eq_ignore_ascii_case(sensitive))
}

/// Renders `url` for a log line. Scheme, host and fragment never appear.
pub fn sanitize_url_for_logs(url: &Url, mode: LoggingMode) -> String {
    let mut rendered = url.path().to_string();
    if mode == LoggingMode::PathOnly {
        return rendered;
    }

    let mut separator = '?';
    for (key, value) in url.query_pairs() {
        rendered.push(separator);
        rendered.push_str(&key);
        rendered.push('=');
        if is_sensitive_param(&key) {
            rendered.push_str("***");
        } else {
            rendered.push_str(&value);
        }
        separator = '&';
    }
    rendered
}

// ─────────────────────────────────────────────────────────────────────────────
// StrapiClient
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP client bound to one Strapi instance.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Clone)]
pub struct StrapiClient {
    http: reqwest::Client,
    connection: StrapiConnection,
    logging_mode: LoggingMode,
}

impl StrapiClient {
    /// Creates a client with the default request timeout.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the HTTP client fails to initialize.
    pub fn new(connection: StrapiConnection) -> Result<Self, AppError> {
        Self::with_timeout(connection, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Creates a client whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the HTTP client fails to initialize.
    pub fn with_timeout(connection: StrapiConnection, timeout: Duration) -> Result<Self, AppError> {
        Ok(Self {
            http: build_http_client(timeout)?,
            connection,
            logging_mode: LoggingMode::default(),
        })
    }

    /// Updates the logging mode for URL sanitization.
    pub fn with_logging_mode(mut self, mode: LoggingMode) -> Self {
        self.logging_mode = mode;
        self
    }

    pub fn connection(&self) -> &StrapiConnection {
        &self.connection
    }

    /// Builds a full URL by appending `path` (which starts with `/`) to the base URL.
    ///
    /// Appending rather than `Url::join` keeps any sub-path the instance is
    /// mounted under.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Internal` if the result cannot be parsed.
    pub fn build_url(&self, path: &str) -> Result<Url, AppError> {
        Url::parse(&format!("{}{}", self.connection.base_url, path))
            .map_err(|_| AppError::Internal(format!("Invalid path: {}", path)))
    }

    /// Executes a GET request against a path of the instance.
    pub async fn get(&self, path: &str) -> Result<reqwest::Response, AppError> {
        self.request(Method::GET, path, None).await
    }

    /// Executes a POST request with a JSON body.
    pub async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, AppError> {
        let bytes = serde_json::to_vec(body)
            .map_err(|e| AppError::Internal(format!("Failed to serialize request body: {}", e)))?;
        self.request(Method::POST, path, Some(bytes)).await
    }

    /// Executes a request with timing, logging, and error handling.
    ///
    /// # Security
    ///
    /// - Never logs the Authorization header
    /// - Never logs request/response bodies
    /// - Sanitizes URLs before logging
    /// - Error messages never contain raw URLs or tokens
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<reqwest::Response, AppError> {
        let url = self.build_url(path)?;
        let start = Instant::now();
        let sanitized_url = sanitize_url_for_logs(&url, self.logging_mode);

        let mut request = self
            .http
            .request(method.clone(), url.as_str())
            .header("Content-Type", "application/json");

        if let Some(token) = &self.connection.token {
            request = request.bearer_auth(token.expose_secret());
        }

        if let Some(body_bytes) = body {
            request = request.body(body_bytes);
        }

        let result = request.send().await;
        let duration_ms = start.elapsed().as_millis();

        match result {
            Ok(response) => {
                let status = response.status();
                if method == Method::GET {
                    debug!(
                        "[STRAPI] {} {} {} {}ms",
                        method,
                        sanitized_url,
                        status.as_u16(),
                        duration_ms
                    );
                } else {
                    info!(
                        "[STRAPI] {} {} {} {}ms",
                        method,
                        sanitized_url,
                        status.as_u16(),
                        duration_ms
                    );
                }
                Ok(response)
            }
            Err(_) => {
                // The reqwest error may carry the full URL; keep it out of logs.
                info!(
                    "[STRAPI] {} {} FAILED {}ms",
                    method, sanitized_url, duration_ms
                );
                Err(AppError::ConnectionFailed(
                    "Connection to Strapi failed".to_string(),
                ))
            }
        }
    }
}

/// Builds the configured HTTP client.
fn build_http_client(timeout: Duration) -> Result<reqwest::Client, AppError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(CLIENT_USER_AGENT));

    reqwest::Client::builder()
        .default_headers(headers)
        .timeout(timeout)
        .build()
        .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))
}

/// Maps a 429 response to `AppError::RateLimited`, reading `Retry-After`.
pub(crate) fn rate_limit_error(response: &reqwest::Response) -> Option<AppError> {
    if response.status() != reqwest::StatusCode::TOO_MANY_REQUESTS {
        return None;
    }
    let retry_after = response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok());
    Some(AppError::RateLimited {
        retry_after_secs: retry_after,
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    fn connection(url: &str, token: Option<&str>) -> StrapiConnection {
        StrapiConnection::new(url, token.map(String::from), None).unwrap()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // URL Normalization Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn normalize_adds_scheme_and_trims_slash() {
        assert_eq!(
            normalize_base_url("cms.example.com/").unwrap(),
            "https://cms.example.com"
        );
        assert_eq!(
            normalize_base_url("http://localhost:1337//").unwrap(),
            "http://localhost:1337"
        );
        assert_eq!(
            normalize_base_url("  https://cms.example.com/strapi  ").unwrap(),
            "https://cms.example.com/strapi"
        );
    }

    #[test]
    fn normalize_rejects_empty_and_garbage() {
        assert!(matches!(normalize_base_url(""), Err(AppError::Config(_))));
        assert!(matches!(
            normalize_base_url("http://exa mple.com"),
            Err(AppError::Config(_))
        ));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // URL Sanitization Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn sanitize_strips_scheme_host_and_query() {
        let url = Url::parse("https://cms.example.com/api/articles?token=secret#frag").unwrap();

        let result = sanitize_url_for_logs(&url, LoggingMode::PathOnly);

        assert_eq!(result, "/api/articles");
    }

    #[test]
    fn path_and_query_redacted_redacts_sensitive_keys() {
        let url = Url::parse(
            "https://cms.example.com/api/articles?pagination[limit]=1&Token=abc123&JWT=xyz",
        )
        .unwrap();

        let result = sanitize_url_for_logs(&url, LoggingMode::PathAndQueryRedacted);

        assert!(result.starts_with("/api/articles?"));
        assert!(result.contains("pagination[limit]=1"));
        assert!(result.contains("Token=***"));
        assert!(result.contains("JWT=***"));
        assert!(!result.contains("abc123"));
        assert!(!result.contains("xyz"));
    }

    #[test]
    fn is_sensitive_param_requires_exact_match() {
        assert!(is_sensitive_param("API_TOKEN"));
        assert!(!is_sensitive_param("tokens"));
        assert!(!is_sensitive_param("pagination[limit]"));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Connection Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn connection_debug_redacts_token() {
        let conn = connection("cms.example.com", Some("super_secret_token_12345"));

        let debug_output = format!("{:?}", conn);

        assert!(debug_output.contains("https://cms.example.com"));
        assert!(!debug_output.contains("super_secret_token_12345"));
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn empty_token_is_no_token() {
        let conn = connection("cms.example.com", Some(""));
        assert!(conn.token.is_none());
    }

    #[test]
    fn build_url_keeps_sub_path() {
        let client = StrapiClient::new(connection("https://example.com/cms/", None)).unwrap();

        let url = client.build_url("/api/articles").unwrap();

        assert_eq!(url.as_str(), "https://example.com/cms/api/articles");
    }

    #[test]
    fn client_with_logging_mode_changes_mode() {
        let client = StrapiClient::new(connection("cms.example.com", None)).unwrap();
        assert_eq!(client.logging_mode, LoggingMode::PathOnly);

        let client = client.with_logging_mode(LoggingMode::PathAndQueryRedacted);
        assert_eq!(client.logging_mode, LoggingMode::PathAndQueryRedacted);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Request Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn request_sends_bearer_token() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api"))
            .and(header("Authorization", "Bearer test_token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = StrapiClient::new(connection(&mock_server.uri(), Some("test_token"))).unwrap();
        let response = client.get("/api").await.unwrap();

        assert_eq!(response.status().as_u16(), 200);
    }

    #[tokio::test]
    async fn request_without_token_sends_no_authorization() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api"))
            .respond_with(|req: &Request| {
                if req.headers.contains_key("authorization") {
                    ResponseTemplate::new(400)
                } else {
                    ResponseTemplate::new(200)
                }
            })
            .mount(&mock_server)
            .await;

        let client = StrapiClient::new(connection(&mock_server.uri(), None)).unwrap();
        let response = client.get("/api").await.unwrap();

        assert_eq!(response.status().as_u16(), 200);
    }

    #[tokio::test]
    async fn post_json_sends_body() {
        let mock_server = MockServer::start().await;
        let body = serde_json::json!({"data": {"title": "Hello"}});
        Mock::given(method("POST"))
            .and(path("/api/article"))
            .and(body_json(&body))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = StrapiClient::new(connection(&mock_server.uri(), Some("t"))).unwrap();
        let response = client.post_json("/api/article", &body).await.unwrap();

        assert_eq!(response.status().as_u16(), 201);
    }

    #[tokio::test]
    async fn unreachable_server_is_connection_failed() {
        // Nothing listens on port 1.
        let client = StrapiClient::new(connection("http://127.0.0.1:1", Some("secret"))).unwrap();
        let result = client.get("/api").await;

        match result {
            Err(AppError::ConnectionFailed(msg)) => {
                assert_eq!(msg, "Connection to Strapi failed");
            }
            other => panic!("Expected ConnectionFailed, got: {:?}", other.map(|r| r.status())),
        }
    }

    #[tokio::test]
    async fn rate_limit_error_reads_retry_after() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "60"))
            .mount(&mock_server)
            .await;

        let client = StrapiClient::new(connection(&mock_server.uri(), None)).unwrap();
        let response = client.get("/api").await.unwrap();

        match rate_limit_error(&response) {
            Some(AppError::RateLimited { retry_after_secs }) => {
                assert_eq!(retry_after_secs, Some(60));
            }
            other => panic!("Expected RateLimited, got: {:?}", other),
        }
    }

    #[test]
    fn build_http_client_succeeds() {
        assert!(build_http_client(Duration::from_secs(5)).is_ok());
    }
}

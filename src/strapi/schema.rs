//! Content type discovery.
//!
//! Strapi exposes its schema differently depending on version, plugins, and
//! token permissions, so discovery runs an ordered chain of strategies and keeps
//! the first non-empty answer. Types that come back without attributes are
//! then enriched by sampling one entry of their collection.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::error::AppError;
use crate::model::{FieldSpec, FieldType};
use crate::strapi::client::{rate_limit_error, StrapiClient};
use crate::strapi::records::collection_name;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Collection names tried by the last-resort scan.
pub const COMMON_COLLECTIONS: &[&str] = &[
    "articles",
    "pages",
    "products",
    "categories",
    "tags",
    "users",
    "posts",
    "comments",
    "media",
    "files",
    "images",
    "videos",
    "iframes",
    "settings",
    "menus",
    "navigation",
];

/// Query appended when sampling a collection.
const SAMPLE_QUERY: &str = "pagination[limit]=1";

// ─────────────────────────────────────────────────────────────────────────────
// Public Types
// ─────────────────────────────────────────────────────────────────────────────

/// One attribute of a content type as reported (or inferred) from Strapi.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attribute {
    pub name: String,
    /// Strapi attribute type (`string`, `integer`, `relation`...).
    #[serde(rename = "type")]
    pub kind: String,
    pub required: bool,
    pub private: bool,
    /// Legacy relation marker; such attributes are not writable from a row.
    pub collection: bool,
}

/// A discovered content type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentType {
    /// e.g. `api::article.article`
    pub uid: String,
    /// REST collection name, e.g. `article`.
    pub api_id: String,
    pub display_name: String,
    pub attributes: Vec<Attribute>,
}

impl ContentType {
    /// Builds a type with no attributes from a collection name.
    fn from_collection(name: &str) -> Self {
        Self {
            uid: format!("api::{}.{}", name, name),
            api_id: name.to_string(),
            display_name: capitalize(name),
            attributes: Vec::new(),
        }
    }

    /// Writable fields: everything except private and collection attributes.
    pub fn fields(&self) -> Vec<FieldSpec> {
        self.attributes
            .iter()
            .filter(|a| !a.private && !a.collection)
            .map(|a| FieldSpec::new(a.name.clone(), FieldType::from_remote(&a.kind), a.required))
            .collect()
    }
}

/// One strategy for listing content types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryStrategy {
    /// A collection endpoint the user knows exists, e.g. `/api/iframes`.
    KnownEndpoint(String),
    /// `GET /api` returning an object keyed by collection.
    PublicApi,
    ContentTypeBuilder,
    ContentManagerTypes,
    ContentManagerCollections,
    /// Tries each collection name under `/api/<name>`.
    CommonCollections(Vec<String>),
}

impl DiscoveryStrategy {
    /// The standard chain, with the known endpoint first when one is set.
    pub fn default_chain(known_endpoint: Option<&str>) -> Vec<DiscoveryStrategy> {
        let mut chain = Vec::new();
        if let Some(endpoint) = known_endpoint {
            chain.push(DiscoveryStrategy::KnownEndpoint(endpoint.to_string()));
        }
        chain.extend([
            DiscoveryStrategy::PublicApi,
            DiscoveryStrategy::ContentTypeBuilder,
            DiscoveryStrategy::ContentManagerTypes,
            DiscoveryStrategy::ContentManagerCollections,
            DiscoveryStrategy::CommonCollections(
                COMMON_COLLECTIONS.iter().map(|s| s.to_string()).collect(),
            ),
        ]);
        chain
    }

    pub fn name(&self) -> &'static str {
        match self {
            DiscoveryStrategy::KnownEndpoint(_) => "known endpoint",
            DiscoveryStrategy::PublicApi => "public API",
            DiscoveryStrategy::ContentTypeBuilder => "Content-Type Builder API",
            DiscoveryStrategy::ContentManagerTypes => "content-manager content types",
            DiscoveryStrategy::ContentManagerCollections => "content-manager collection types",
            DiscoveryStrategy::CommonCollections(_) => "common collection scan",
        }
    }

    async fn run(&self, client: &StrapiClient) -> Result<Vec<ContentType>, AppError> {
        match self {
            DiscoveryStrategy::KnownEndpoint(endpoint) => {
                fetch_known_endpoint(client, endpoint).await
            }
            DiscoveryStrategy::PublicApi => fetch_public_api(client).await,
            DiscoveryStrategy::ContentTypeBuilder => {
                fetch_admin_listing(client, "/content-type-builder/content-types", "Admin API")
                    .await
            }
            DiscoveryStrategy::ContentManagerTypes => {
                fetch_admin_listing(
                    client,
                    "/content-manager/content-types",
                    "Content manager API",
                )
                .await
            }
            DiscoveryStrategy::ContentManagerCollections => {
                fetch_admin_listing(
                    client,
                    "/content-manager/collection-types",
                    "Collection types API",
                )
                .await
            }
            DiscoveryStrategy::CommonCollections(names) => fetch_common_collections(client, names).await,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SchemaSource
// ─────────────────────────────────────────────────────────────────────────────

/// Discovers content types of one Strapi instance.
pub struct SchemaSource {
    client: StrapiClient,
    strategies: Vec<DiscoveryStrategy>,
}

impl SchemaSource {
    /// Uses the standard strategy chain, honoring the connection's known endpoint.
    pub fn new(client: StrapiClient) -> Self {
        let strategies = DiscoveryStrategy::default_chain(client.connection().known_endpoint.as_deref());
        Self { client, strategies }
    }

    pub fn with_strategies(client: StrapiClient, strategies: Vec<DiscoveryStrategy>) -> Self {
        Self { client, strategies }
    }

    /// Checks that the instance is reachable and accepts the token.
    ///
    /// Tries the known endpoint first (any 2xx passes), then `GET /api`.
    ///
    /// # Errors
    ///
    /// - `AppError::AuthFailed` - 401 or 403 from `/api`
    /// - `AppError::ConnectionFailed` - network error or other non-2xx status
    pub async fn test_connection(&self) -> Result<(), AppError> {
        if let Some(endpoint) = &self.client.connection().known_endpoint {
            match self.client.get(endpoint).await {
                Ok(response) if response.status().is_success() => {
                    info!("[SCHEMA] Connection verified via known endpoint");
                    return Ok(());
                }
                Ok(response) => {
                    debug!(
                        "[SCHEMA] Known endpoint answered {}, falling back to /api",
                        response.status().as_u16()
                    );
                }
                Err(e) => debug!("[SCHEMA] Known endpoint failed: {}", e),
            }
        }

        let response = self.client.get("/api").await?;
        let status = response.status();
        if status.is_success() {
            info!("[SCHEMA] Connection verified");
            return Ok(());
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(AppError::AuthFailed);
        }
        Err(AppError::ConnectionFailed(format!(
            "Server responded with status: {}",
            status.as_u16()
        )))
    }

    /// Runs the strategy chain and enriches types lacking attributes.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NoContentTypes` with the last strategy error when no
    /// strategy finds anything.
    pub async fn discover(&self) -> Result<Vec<ContentType>, AppError> {
        let mut last_error: Option<AppError> = None;
        let mut found: Vec<ContentType> = Vec::new();

        for strategy in &self.strategies {
            debug!("[SCHEMA] Trying {}", strategy.name());
            match strategy.run(&self.client).await {
                Ok(types) if !types.is_empty() => {
                    info!("[SCHEMA] {} found {} content types", strategy.name(), types.len());
                    found = types;
                    break;
                }
                Ok(_) => debug!("[SCHEMA] {} found nothing", strategy.name()),
                Err(e) => {
                    warn!("[SCHEMA] {} failed: {}", strategy.name(), e);
                    last_error = Some(e);
                }
            }
        }

        if found.is_empty() {
            let message = last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string());
            return Err(AppError::NoContentTypes(message));
        }

        for content_type in found.iter_mut().filter(|t| t.attributes.is_empty()) {
            match sample_attributes(&self.client, &content_type.api_id).await {
                Ok(Some(attributes)) => content_type.attributes = attributes,
                Ok(None) => {}
                Err(e) => warn!(
                    "[SCHEMA] Could not infer attributes for {}: {}",
                    content_type.uid, e
                ),
            }
        }

        Ok(found)
    }

    /// Discovers and returns the content type whose uid (or collection name) is `uid`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownContentType` if discovery succeeds without it.
    pub async fn find(&self, uid: &str) -> Result<ContentType, AppError> {
        self.discover()
            .await?
            .into_iter()
            .find(|t| t.uid == uid || t.api_id == uid)
            .ok_or_else(|| AppError::UnknownContentType(uid.to_string()))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Strategies
// ─────────────────────────────────────────────────────────────────────────────

async fn get_json(client: &StrapiClient, path: &str, label: &str) -> Result<Value, AppError> {
    let response = client.get(path).await?;
    if let Some(err) = rate_limit_error(&response) {
        return Err(err);
    }
    let status = response.status();
    if !status.is_success() {
        return Err(AppError::StrapiError(format!(
            "{} failed: {}",
            label,
            status.as_u16()
        )));
    }
    response
        .json::<Value>()
        .await
        .map_err(|e| AppError::StrapiError(format!("{} returned invalid JSON: {}", label, e)))
}

async fn fetch_known_endpoint(
    client: &StrapiClient,
    endpoint: &str,
) -> Result<Vec<ContentType>, AppError> {
    let name = endpoint
        .split('?')
        .next()
        .unwrap_or(endpoint)
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("");
    if name.is_empty() {
        return Ok(Vec::new());
    }

    let body = get_json(client, &with_sample_query(endpoint), "Known endpoint").await?;

    let mut primary = ContentType::from_collection(name);
    if let Some(entry) = first_entry(&body) {
        primary.attributes = infer_attributes(entry);
    }

    let mut types = vec![primary];
    if let Some(links) = body.pointer("/meta/pagination/links").and_then(Value::as_object) {
        for link in links.values().filter_map(Value::as_str) {
            if let Some(other) = api_collection_in_link(link) {
                if other != name && !types.iter().any(|t| t.api_id == other) {
                    types.push(ContentType::from_collection(other));
                }
            }
        }
    }

    Ok(types)
}

async fn fetch_public_api(client: &StrapiClient) -> Result<Vec<ContentType>, AppError> {
    let body = get_json(client, "/api", "Public API").await?;

    match body.as_object() {
        Some(routes) if !routes.is_empty() => Ok(routes
            .keys()
            .map(|key| ContentType::from_collection(key))
            .collect()),
        _ => Err(AppError::StrapiError(
            "No content types found in API response".to_string(),
        )),
    }
}

async fn fetch_admin_listing(
    client: &StrapiClient,
    path: &str,
    label: &str,
) -> Result<Vec<ContentType>, AppError> {
    let body = get_json(client, path, label).await?;
    Ok(body
        .get("data")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(parse_listed_type).collect())
        .unwrap_or_default())
}

async fn fetch_common_collections(
    client: &StrapiClient,
    names: &[String],
) -> Result<Vec<ContentType>, AppError> {
    let mut discovered = Vec::new();

    for name in names {
        let path = format!("/api/{}?{}", name, SAMPLE_QUERY);
        match get_json(client, &path, name).await {
            Ok(body) => {
                info!("[SCHEMA] Discovered endpoint /api/{}", name);
                let mut content_type = ContentType::from_collection(name);
                if let Some(entry) = first_entry(&body) {
                    content_type.attributes = infer_attributes(entry);
                }
                discovered.push(content_type);
            }
            Err(e) => debug!("[SCHEMA] /api/{} not available: {}", name, e),
        }
    }

    if discovered.is_empty() {
        return Err(AppError::StrapiError(
            "No content types discovered by scanning common endpoints".to_string(),
        ));
    }
    Ok(discovered)
}

/// Samples one entry of a collection. `Ok(None)` when the collection is
/// unreachable or empty.
async fn sample_attributes(
    client: &StrapiClient,
    api_id: &str,
) -> Result<Option<Vec<Attribute>>, AppError> {
    if api_id.is_empty() {
        return Ok(None);
    }
    debug!("[SCHEMA] Sampling /api/{} for attributes", api_id);

    let response = client
        .get(&format!("/api/{}?{}", api_id, SAMPLE_QUERY))
        .await?;
    if !response.status().is_success() {
        return Ok(None);
    }
    let body: Value = response
        .json()
        .await
        .map_err(|e| AppError::StrapiError(format!("Invalid JSON: {}", e)))?;

    Ok(first_entry(&body)
        .map(infer_attributes)
        .filter(|attributes| !attributes.is_empty()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Parses one item of an admin listing (`uid`, `apiID`, attributes at the top
/// level or under `schema`).
fn parse_listed_type(item: &Value) -> Option<ContentType> {
    let uid = item.get("uid").and_then(Value::as_str)?.to_string();
    let schema = item.get("schema");

    let api_id = item
        .get("apiID")
        .and_then(Value::as_str)
        .map(String::from)
        .unwrap_or_else(|| collection_name(&uid).to_string());

    let display_name = [
        item.get("displayName"),
        schema.and_then(|s| s.get("displayName")),
        item.pointer("/info/displayName"),
    ]
    .into_iter()
    .flatten()
    .find_map(Value::as_str)
    .map(String::from)
    .unwrap_or_else(|| capitalize(&api_id));

    let attributes = item
        .get("attributes")
        .or_else(|| schema.and_then(|s| s.get("attributes")))
        .and_then(Value::as_object)
        .map(parse_declared_attributes)
        .unwrap_or_default();

    Some(ContentType {
        uid,
        api_id,
        display_name,
        attributes,
    })
}

fn parse_declared_attributes(attributes: &Map<String, Value>) -> Vec<Attribute> {
    attributes
        .iter()
        .map(|(name, attr)| Attribute {
            name: name.clone(),
            kind: attr
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("string")
                .to_string(),
            required: is_truthy(attr.get("required")),
            private: is_truthy(attr.get("private")),
            collection: is_truthy(attr.get("collection")),
        })
        .collect()
}

/// Infers attributes from one sample entry: the v4 `attributes` object, or
/// the flat v5 entry minus its identifiers. Relations (objects with a `data`
/// key) are skipped. Inferred attributes are never required.
pub fn infer_attributes(entry: &Value) -> Vec<Attribute> {
    let (source, flat) = match entry.get("attributes").and_then(Value::as_object) {
        Some(attributes) => (attributes, false),
        None => match entry.as_object() {
            Some(object) => (object, true),
            None => return Vec::new(),
        },
    };

    source
        .iter()
        .filter(|(name, _)| !(flat && (*name == "id" || *name == "documentId")))
        .filter(|(_, value)| !matches!(value, Value::Object(o) if o.contains_key("data")))
        .map(|(name, value)| Attribute {
            name: name.clone(),
            kind: json_kind(value).to_string(),
            required: false,
            private: false,
            collection: false,
        })
        .collect()
}

/// Attribute type as JavaScript's `typeof` would report it.
fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::String(_) => "string",
        Value::Number(_) => "number",
        Value::Bool(_) => "boolean",
        Value::Null | Value::Array(_) | Value::Object(_) => "object",
    }
}

/// First entry of a collection response (`data` array) or the single-type object.
fn first_entry(body: &Value) -> Option<&Value> {
    match body.get("data")? {
        Value::Array(items) => items.first(),
        object @ Value::Object(_) => Some(object),
        _ => None,
    }
}

fn api_collection_in_link(link: &str) -> Option<&str> {
    let (_, rest) = link.split_once("/api/")?;
    let end = rest.find(['/', '?']).unwrap_or(rest.len());
    Some(&rest[..end]).filter(|name| !name.is_empty())
}

fn with_sample_query(endpoint: &str) -> String {
    if endpoint.contains('?') {
        format!("{}&{}", endpoint, SAMPLE_QUERY)
    } else {
        format!("{}?{}", endpoint, SAMPLE_QUERY)
    }
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Number(n)) => n.as_f64().map_or(false, |f| f != 0.0),
        Some(_) => true,
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

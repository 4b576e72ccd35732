//! Strapi REST API integration: HTTP client, record creation, and schema discovery.

pub mod client;
pub mod records;
pub mod schema;

pub use client::{StrapiClient, StrapiConnection};
pub use records::{RecordSink, RemoteCreateError, RemoteRecord, StrapiRecordSink};
pub use schema::{ContentType, DiscoveryStrategy, SchemaSource};

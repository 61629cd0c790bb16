//! Listings and query request/response records.
//!
//! These are the shapes exchanged with the CLI and the HTTP API. Every
//! query-shaped response flattens a [`ResponseMeta`] and, where the query can
//! fail after routing, carries an optional `error` alongside a `-1` count.

use crate::core::aggregation::AggregatedResults;
use crate::graph::AttributeSchema;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Instant;

/// Count reported when a query fails after routing.
pub const FAILED_COUNT: i64 = -1;

/// A registered host graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostListing {
    pub id: String,
    pub uri: String,
    pub name: String,
    #[serde(default)]
    pub provider: BTreeMap<String, String>,
    #[serde(default)]
    pub volumetric_data: BTreeMap<String, Value>,
}

impl HostListing {
    #[must_use]
    pub fn new(id: impl Into<String>, uri: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uri: uri.into(),
            name: name.into(),
            provider: BTreeMap::new(),
            volumetric_data: BTreeMap::new(),
        }
    }
}

/// Public view of a host, as returned by `/providers/hostlist`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSummary {
    pub id: String,
    pub name: String,
}

/// Public view of a registered provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostProviderPublicListing {
    pub id: String,
    pub provider_type: String,
}

/// Timing and addressing fields shared by every query response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub host_id: String,
    pub response_time: DateTime<Utc>,
    pub response_duration_ms: f64,
}

/// Started when a query arrives; stamped into [`ResponseMeta`] when it ends.
#[derive(Debug, Clone, Copy)]
pub struct QueryClock(Instant);

impl QueryClock {
    #[must_use]
    pub fn start() -> Self {
        Self(Instant::now())
    }

    #[must_use]
    pub fn finish(&self, host_id: &str) -> ResponseMeta {
        ResponseMeta {
            host_id: host_id.to_string(),
            response_time: Utc::now(),
            response_duration_ms: self.0.elapsed().as_secs_f64() * 1000.0,
        }
    }
}

/// Request naming only a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostQueryRequest {
    pub host_id: String,
}

/// Language a motif query is written in.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum QueryType {
    /// Motif statements such as `A -> B`.
    #[default]
    Dotmotif,
    /// `MATCH (a)-->(b) RETURN a, b` subset.
    Cypher,
}

impl std::fmt::Display for QueryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Dotmotif => "dotmotif",
            Self::Cypher => "cypher",
        })
    }
}

/// Request carrying a motif.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotifQueryRequest {
    #[serde(default)]
    pub host_id: String,
    pub query: String,
    #[serde(default)]
    pub query_type: QueryType,
    #[serde(default)]
    pub aggregation_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadGraphRequest {
    pub host_id: String,
    #[serde(default = "default_download_format")]
    pub format: String,
}

fn default_download_format() -> String {
    "graphml".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VertexCountResponse {
    #[serde(flatten)]
    pub meta: ResponseMeta,
    pub vertex_count: i64,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeCountResponse {
    #[serde(flatten)]
    pub meta: ResponseMeta,
    pub edge_count: i64,
    #[serde(default)]
    pub error: Option<String>,
}

/// Attribute schema of either vertices or edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSchemaResponse {
    #[serde(flatten)]
    pub meta: ResponseMeta,
    pub attributes: AttributeSchema,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotifParseResponse {
    #[serde(flatten)]
    pub meta: ResponseMeta,
    pub query: String,
    pub query_type: QueryType,
    pub motif_entities: Vec<String>,
    pub motif_edges: Vec<[String; 2]>,
    pub motif_nodelink_json: String,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotifCountResponse {
    #[serde(flatten)]
    pub meta: ResponseMeta,
    pub query: String,
    pub query_type: QueryType,
    pub motif_count: i64,
    pub motif_entities: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotifSearchResponse {
    #[serde(flatten)]
    pub meta: ResponseMeta,
    pub query: String,
    pub query_type: QueryType,
    /// Raw match count, before aggregation.
    pub motif_count: i64,
    pub aggregation_type: Option<String>,
    pub motif_results: AggregatedResults,
    pub motif_entities: Vec<String>,
    pub host_volumetric_data: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadGraphResponse {
    #[serde(flatten)]
    pub meta: ResponseMeta,
    pub format: String,
    pub graph: String,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphUploadResponse {
    pub temp_id: String,
    pub original_filename: String,
    pub file_size: u64,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemporaryHostListing {
    pub temp_id: String,
    pub name: String,
    pub original_filename: String,
    pub file_size: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphUploadCleanupResponse {
    pub temp_id: String,
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
}

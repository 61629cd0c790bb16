//! Host providers.
//!
//! A provider answers queries against one graph storage medium. The router
//! picks a provider per URI through [`HostProvider::accepts`], which must be
//! a cheap, side-effect-free check. Every other method has a default built
//! on [`HostProvider::load_graph`], so a backend only has to materialize its
//! graph.
//!
//! Query methods are called inside bounded workers, never directly on a
//! serving thread. The worker calls whatever [`HostProvider::prepare`]
//! returned for its URI.

pub mod filesystem;
pub mod opencypher;
pub mod s3;
pub mod temporary;

use crate::core::config::ProviderKind;
use crate::core::error::{MotifStudioError, Result};
use crate::graph::motif::{Motif, MotifMatch};
use crate::graph::{AttributeSchema, HostGraph};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

pub use filesystem::FilesystemGraphHostProvider;
pub use opencypher::OpenCypherHostProvider;
pub use s3::S3GraphMLHostProvider;
pub use temporary::TemporaryGraphHostProvider;

/// Capability interface shared by every backend.
pub trait HostProvider: Send + Sync {
    /// Provider type name, as listed by `/providers/`.
    fn provider_type(&self) -> &str;

    /// Whether this provider can serve `uri`.
    fn accepts(&self, uri: &str) -> bool;

    /// Loads the full host graph behind `uri`.
    fn load_graph(&self, uri: &str) -> Result<HostGraph>;

    /// Like [`load_graph`](Self::load_graph) but reports failure as a message
    /// instead of an error.
    fn try_load_graph(&self, uri: &str) -> (Option<HostGraph>, Option<String>) {
        match self.load_graph(uri) {
            Ok(graph) => (Some(graph), None),
            Err(err) => (None, Some(err.to_string())),
        }
    }

    fn vertex_count(&self, uri: &str) -> Result<u64> {
        Ok(self.load_graph(uri)?.vertex_count() as u64)
    }

    fn edge_count(&self, uri: &str) -> Result<u64> {
        Ok(self.load_graph(uri)?.edge_count() as u64)
    }

    fn vertex_attribute_schema(&self, uri: &str) -> Result<AttributeSchema> {
        Ok(self.load_graph(uri)?.vertex_attribute_schema())
    }

    fn edge_attribute_schema(&self, uri: &str) -> Result<AttributeSchema> {
        Ok(self.load_graph(uri)?.edge_attribute_schema())
    }

    fn motif_count(&self, uri: &str, query: &str) -> Result<u64> {
        let motif = Motif::parse(query)?;
        Ok(motif.count_in(&self.load_graph(uri)?))
    }

    fn motif_search(&self, uri: &str, query: &str) -> Result<Vec<MotifMatch>> {
        let motif = Motif::parse(query)?;
        Ok(motif.find_in(&self.load_graph(uri)?))
    }

    /// `vertex id -> value` for every vertex that carries `attribute`.
    fn vertex_attribute_values(
        &self,
        uri: &str,
        attribute: &str,
    ) -> Result<BTreeMap<String, Value>> {
        Ok(self.load_graph(uri)?.vertex_attribute_values(attribute))
    }

    /// Provider a bounded worker should call for `uri`, resolved on the
    /// calling thread before the fork.
    ///
    /// A forked worker inherits every lock in the state it had at fork time,
    /// so a worker must never take a lock shared with serving threads.
    /// Providers that keep such state resolve `uri` here and return a
    /// lock-free view. `None` means the worker may call `self` directly.
    fn prepare(&self, _uri: &str) -> Result<Option<Arc<dyn HostProvider>>> {
        Ok(None)
    }

    /// Upload storage, for providers that hold uploaded graphs.
    fn upload_store(&self) -> Option<&dyn UploadStore> {
        None
    }
}

/// Metadata for one uploaded graph file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub temp_id: String,
    pub filepath: PathBuf,
    pub original_filename: String,
    pub file_size: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl UploadedFile {
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    #[must_use]
    pub fn uri(&self) -> String {
        format!("temp://{}", self.temp_id)
    }
}

/// Storage for uploaded graphs, exposed by upload-capable providers.
pub trait UploadStore: Send + Sync {
    /// Persists `content` and returns its new metadata record.
    fn store_file(&self, content: &[u8], original_filename: &str) -> Result<UploadedFile>;

    /// Deletes an upload. Returns false when it did not exist.
    fn cleanup_file(&self, temp_id: &str) -> Result<bool>;

    /// Live (unexpired) uploads, oldest first.
    fn list_files(&self) -> Result<Vec<UploadedFile>>;

    fn file_info(&self, temp_id: &str) -> Result<Option<UploadedFile>>;
}

/// Instantiates a provider from its decoded configuration.
pub fn build_provider(kind: &ProviderKind) -> Result<Arc<dyn HostProvider>> {
    let provider: Arc<dyn HostProvider> = match kind {
        ProviderKind::Filesystem(options) => {
            Arc::new(FilesystemGraphHostProvider::new(options.clone()))
        }
        ProviderKind::S3(options) => Arc::new(S3GraphMLHostProvider::new(options.clone())?),
        ProviderKind::OpenCypher(options) => {
            Arc::new(OpenCypherHostProvider::new(options.clone()))
        }
        ProviderKind::Temporary(options) => {
            Arc::new(TemporaryGraphHostProvider::new(options.clone())?)
        }
    };
    Ok(provider)
}

/// Strips `scheme` from `uri`, or reports the URI as unusable.
pub(crate) fn strip_scheme<'a>(uri: &'a str, scheme: &str, origin: &str) -> Result<&'a str> {
    uri.strip_prefix(scheme).ok_or_else(|| {
        MotifStudioError::user(
            "unsupported_uri",
            format!("URI {uri} does not start with {scheme}"),
            origin,
        )
    })
}

/// In-memory provider for tests.
#[derive(Debug, Clone)]
pub struct MockProvider {
    provider_type: String,
    prefix: String,
    suffix: String,
    graph: HostGraph,
    error: Option<MotifStudioError>,
}

impl MockProvider {
    /// A provider that accepts everything and serves an empty directed graph.
    #[must_use]
    pub fn new(provider_type: impl Into<String>) -> Self {
        Self {
            provider_type: provider_type.into(),
            prefix: String::new(),
            suffix: String::new(),
            graph: HostGraph::new(true),
            error: None,
        }
    }

    /// Restricts `accepts` to URIs with this prefix and suffix.
    #[must_use]
    pub fn accepting(mut self, prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self.suffix = suffix.into();
        self
    }

    #[must_use]
    pub fn with_graph(mut self, graph: HostGraph) -> Self {
        self.graph = graph;
        self
    }

    /// Makes every load fail with `error`.
    #[must_use]
    pub fn with_error(mut self, error: MotifStudioError) -> Self {
        self.error = Some(error);
        self
    }
}

impl HostProvider for MockProvider {
    fn provider_type(&self) -> &str {
        &self.provider_type
    }

    fn accepts(&self, uri: &str) -> bool {
        uri.starts_with(&self.prefix) && uri.ends_with(&self.suffix)
    }

    fn load_graph(&self, _uri: &str) -> Result<HostGraph> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(self.graph.clone()),
        }
    }
}

//! `s3://<bucket>/` host provider.
//!
//! Objects are fetched through an [`ObjectStore`] and parsed with the same
//! readers as local files. With caching on, each object is kept in a local
//! directory under the SHA-256 of its URI. Cache files are written to a
//! temporary name and renamed into place, so concurrent workers racing on a
//! miss produce the same file whichever one wins.

use crate::core::error::{MotifStudioError, Result};
use crate::graph::formats::{read_graph_file, GRAPH_FILE_SUFFIXES};
use crate::graph::HostGraph;
use crate::providers::HostProvider;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{NamedTempFile, TempDir};

const ORIGIN: &str = "provider:s3";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Options {
    pub bucket: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_cache")]
    pub cache: bool,
    /// Cache location. Defaults to `<user cache dir>/motifstudio/s3`, or a
    /// private temporary directory when the platform has no cache dir.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
}

fn default_endpoint() -> String {
    "https://s3.amazonaws.com".to_string()
}

fn default_cache() -> bool {
    true
}

/// Fetches whole objects from a bucket.
pub trait ObjectStore: Send + Sync {
    fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;
}

/// Path-style HTTP GET against an S3-compatible endpoint.
#[derive(Debug, Clone)]
pub struct HttpObjectStore {
    endpoint: String,
    timeout: Duration,
}

impl HttpObjectStore {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout: Duration::from_secs(300),
        }
    }
}

impl ObjectStore for HttpObjectStore {
    fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let url = format!("{}/{bucket}/{key}", self.endpoint.trim_end_matches('/'));
        let io_error = |e: reqwest::Error| {
            MotifStudioError::backend_io(format!("Failed to fetch {url}: {e}"), ORIGIN)
                .with_context("bucket", bucket)
                .with_context("key", key)
        };
        // Built per call: a client must not be shared across a fork.
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(io_error)?;
        let response = client
            .get(&url)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .map_err(io_error)?;
        Ok(response.bytes().map_err(io_error)?.to_vec())
    }
}

/// Serves GraphML (and CSV) objects from one bucket.
pub struct S3GraphMLHostProvider {
    bucket: String,
    store: Arc<dyn ObjectStore>,
    cache_dir: Option<PathBuf>,
    _owned_cache: Option<TempDir>,
}

impl std::fmt::Debug for S3GraphMLHostProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3GraphMLHostProvider")
            .field("bucket", &self.bucket)
            .field("cache_dir", &self.cache_dir)
            .finish_non_exhaustive()
    }
}

impl S3GraphMLHostProvider {
    pub fn new(options: S3Options) -> Result<Self> {
        let store = Arc::new(HttpObjectStore::new(options.endpoint.clone()));
        Self::with_store(options, store)
    }

    /// Uses a caller-supplied object store.
    pub fn with_store(options: S3Options, store: Arc<dyn ObjectStore>) -> Result<Self> {
        let configured = options
            .cache_dir
            .or_else(|| dirs::cache_dir().map(|d| d.join("motifstudio").join("s3")));
        let (cache_dir, owned) = if !options.cache {
            (None, None)
        } else if let Some(dir) = configured {
            std::fs::create_dir_all(&dir)?;
            (Some(dir), None)
        } else {
            let dir = tempfile::Builder::new()
                .prefix("motifstudio-s3-")
                .tempdir()?;
            (Some(dir.path().to_path_buf()), Some(dir))
        };
        Ok(Self {
            bucket: options.bucket,
            store,
            cache_dir,
            _owned_cache: owned,
        })
    }

    fn prefix(&self) -> String {
        format!("s3://{}/", self.bucket)
    }

    /// Cache path for `uri`, keeping the suffix the readers dispatch on.
    fn cache_path(&self, uri: &str, suffix: &str) -> Option<PathBuf> {
        let dir = self.cache_dir.as_ref()?;
        let digest = Sha256::digest(uri.as_bytes());
        Some(dir.join(format!("{digest:x}{suffix}")))
    }

    fn write_cache(dir: &Path, target: &Path, bytes: &[u8]) -> Result<()> {
        let mut staged = NamedTempFile::new_in(dir)?;
        staged.write_all(bytes)?;
        staged
            .persist(target)
            .map_err(|e| MotifStudioError::backend_io(format!("Failed to cache object: {e}"), ORIGIN))?;
        Ok(())
    }
}

impl HostProvider for S3GraphMLHostProvider {
    fn provider_type(&self) -> &str {
        "S3GraphMLHostProvider"
    }

    fn accepts(&self, uri: &str) -> bool {
        uri.starts_with(&self.prefix())
            && GRAPH_FILE_SUFFIXES.iter().any(|suffix| uri.ends_with(suffix))
    }

    fn load_graph(&self, uri: &str) -> Result<HostGraph> {
        let prefix = self.prefix();
        let key = uri.strip_prefix(&prefix).ok_or_else(|| {
            MotifStudioError::user(
                "unsupported_uri",
                format!("URI {uri} is not in bucket {}", self.bucket),
                ORIGIN,
            )
        })?;
        let suffix = GRAPH_FILE_SUFFIXES
            .iter()
            .find(|suffix| key.ends_with(*suffix))
            .copied()
            .unwrap_or(".graphml");

        if let Some(path) = self.cache_path(uri, suffix) {
            if !path.exists() {
                let bytes = self.store.fetch(&self.bucket, key)?;
                if let Some(dir) = self.cache_dir.as_deref() {
                    Self::write_cache(dir, &path, &bytes)?;
                }
            }
            return read_graph_file(&path);
        }

        let bytes = self.store.fetch(&self.bucket, key)?;
        let mut scratch = tempfile::Builder::new().suffix(suffix).tempfile()?;
        scratch.write_all(&bytes)?;
        scratch.flush()?;
        read_graph_file(scratch.path())
    }
}

//! `file://` host provider.

use crate::core::error::Result;
use crate::graph::formats::{has_graph_suffix, read_graph_file};
use crate::graph::HostGraph;
use crate::providers::{strip_scheme, HostProvider};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const SCHEME: &str = "file://";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilesystemOptions {
    /// Only paths under this prefix are accepted. Empty accepts any path.
    #[serde(default)]
    pub root: String,
}

/// Serves single-file graphs (`.graphml`, `.graphml.gz`, `.csv`) from local disk.
#[derive(Debug, Clone)]
pub struct FilesystemGraphHostProvider {
    prefix: String,
}

impl FilesystemGraphHostProvider {
    #[must_use]
    pub fn new(options: FilesystemOptions) -> Self {
        Self {
            prefix: format!("{SCHEME}{}", options.root),
        }
    }
}

impl HostProvider for FilesystemGraphHostProvider {
    fn provider_type(&self) -> &str {
        "FilesystemGraphHostProvider"
    }

    fn accepts(&self, uri: &str) -> bool {
        uri.starts_with(&self.prefix) && has_graph_suffix(uri)
    }

    fn load_graph(&self, uri: &str) -> Result<HostGraph> {
        let path = strip_scheme(uri, SCHEME, "provider:filesystem")?;
        read_graph_file(Path::new(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_known_suffixes_under_root() {
        let provider = FilesystemGraphHostProvider::new(FilesystemOptions::default());
        assert!(provider.accepts("file:///data/g.graphml"));
        assert!(provider.accepts("file:///data/g.graphml.gz"));
        assert!(provider.accepts("file:///data/g.csv"));
        assert!(!provider.accepts("file:///data/g.gexf"));
        assert!(!provider.accepts("s3://bucket/g.graphml"));

        let rooted = FilesystemGraphHostProvider::new(FilesystemOptions {
            root: "/srv/graphs/".to_string(),
        });
        assert!(rooted.accepts("file:///srv/graphs/g.graphml"));
        assert!(!rooted.accepts("file:///tmp/g.graphml"));
    }

    #[test]
    fn loads_graph_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("edges.csv");
        std::fs::write(&path, "source,target\na,b\nb,c\n").expect("write");
        let uri = format!("file://{}", path.display());

        let provider = FilesystemGraphHostProvider::new(FilesystemOptions::default());
        assert!(provider.accepts(&uri));
        assert_eq!(provider.vertex_count(&uri).expect("count"), 3);
        assert_eq!(provider.edge_count(&uri).expect("count"), 2);
    }

    #[test]
    fn missing_file_is_a_backend_error() {
        let provider = FilesystemGraphHostProvider::new(FilesystemOptions::default());
        let err = provider
            .load_graph("file:///definitely/not/here.graphml")
            .expect_err("missing");
        assert_eq!(err.code, "backend_io");
    }
}

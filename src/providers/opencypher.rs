//! `opencypher://<dir>` host provider.
//!
//! Reads openCypher bulk-load CSV files from a directory: every file whose
//! name starts with the vertex prefix (`vert` by default) holds vertices,
//! every file starting with the edge prefix (`edge`) holds edges. Headers follow the `name:Type` convention (`:ID`,
//! `:START_ID`, `:END_ID`, `:LABEL`, `:TYPE` are system columns); plain
//! `_id`/`id` and `_source`/`source`/`_target`/`target` headers are accepted
//! too. The resulting graph is directed.

use crate::core::error::{MotifStudioError, Result};
use crate::graph::formats::infer_value;
use crate::graph::{Attributes, HostGraph};
use crate::providers::{strip_scheme, HostProvider};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::File;
use std::path::{Path, PathBuf};

pub const SCHEME: &str = "opencypher://";

const ORIGIN: &str = "provider:opencypher";

pub use crate::graph::LABELS_ATTRIBUTE;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenCypherOptions {
    /// File name prefix of vertex CSV files.
    #[serde(default = "default_vertex_prefix")]
    pub vertex_prefix: String,
    /// File name prefix of edge CSV files.
    #[serde(default = "default_edge_prefix")]
    pub edge_prefix: String,
}

fn default_vertex_prefix() -> String {
    "vert".to_string()
}

fn default_edge_prefix() -> String {
    "edge".to_string()
}

impl Default for OpenCypherOptions {
    fn default() -> Self {
        Self {
            vertex_prefix: default_vertex_prefix(),
            edge_prefix: default_edge_prefix(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OpenCypherHostProvider {
    options: OpenCypherOptions,
}

impl OpenCypherHostProvider {
    #[must_use]
    pub fn new(options: OpenCypherOptions) -> Self {
        Self { options }
    }
}

impl HostProvider for OpenCypherHostProvider {
    fn provider_type(&self) -> &str {
        "OpenCypherHostProvider"
    }

    fn accepts(&self, uri: &str) -> bool {
        uri.starts_with(SCHEME)
    }

    fn load_graph(&self, uri: &str) -> Result<HostGraph> {
        let dir = Path::new(strip_scheme(uri, SCHEME, ORIGIN)?);
        let OpenCypherOptions { vertex_prefix, edge_prefix } = &self.options;
        let vertex_files = files_with_prefix(dir, vertex_prefix)?;
        let edge_files = files_with_prefix(dir, edge_prefix)?;
        if vertex_files.is_empty() && edge_files.is_empty() {
            return Err(MotifStudioError::backend_io(
                format!(
                    "No {vertex_prefix}* or {edge_prefix}* CSV files in {}",
                    dir.display()
                ),
                ORIGIN,
            ));
        }

        let mut graph = HostGraph::new(true);
        for path in &vertex_files {
            read_vertices(path, &mut graph)?;
        }
        for path in &edge_files {
            read_edges(path, &mut graph)?;
        }
        Ok(graph)
    }
}

fn files_with_prefix(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| {
        MotifStudioError::backend_io(format!("Cannot read {}: {e}", dir.display()), ORIGIN)
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(prefix));
        if matches && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// How a CSV column is interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Column {
    Id,
    Source,
    Target,
    Labels,
    Attribute { name: String, kind: Option<String> },
    Ignored,
}

fn classify(header: &str) -> Column {
    let (name, kind) = match header.rsplit_once(':') {
        Some((name, kind)) => (name, Some(kind)),
        None => (header, None),
    };
    match (name, kind) {
        (_, Some("ID")) | ("_id" | "id", None) => Column::Id,
        (_, Some("START_ID")) | ("_source" | "source", None) => Column::Source,
        (_, Some("END_ID")) | ("_target" | "target", None) => Column::Target,
        ("", Some("LABEL" | "TYPE")) => Column::Labels,
        ("", _) => Column::Ignored,
        (name, kind) => Column::Attribute {
            name: name.to_string(),
            kind: kind.map(str::to_ascii_lowercase),
        },
    }
}

fn typed(raw: &str, kind: Option<&str>) -> Value {
    match kind {
        Some("int" | "long" | "short" | "byte") => {
            raw.parse::<i64>().map_or_else(|_| raw.into(), Value::from)
        }
        Some("float" | "double") => raw.parse::<f64>().map_or_else(|_| raw.into(), Value::from),
        Some("bool" | "boolean") => match raw.to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => raw.into(),
        },
        Some(_) => Value::String(raw.to_string()),
        None => infer_value(raw),
    }
}

struct Rows {
    columns: Vec<Column>,
    reader: csv::Reader<File>,
    path: PathBuf,
}

impl Rows {
    fn open(path: &Path) -> Result<Self> {
        let csv_error = |e: csv::Error| {
            MotifStudioError::backend_io(format!("CSV error in {}: {e}", path.display()), ORIGIN)
        };
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(csv_error)?;
        let columns = reader
            .headers()
            .map_err(csv_error)?
            .iter()
            .map(classify)
            .collect();
        Ok(Self {
            columns,
            reader,
            path: path.to_path_buf(),
        })
    }

    fn missing(&self, what: &str) -> MotifStudioError {
        MotifStudioError::backend_io(
            format!("{} has no {what} column", self.path.display()),
            ORIGIN,
        )
    }

    /// Visits each row as `(id, source, target, attributes)`.
    fn for_each(
        mut self,
        mut visit: impl FnMut(Option<String>, Option<String>, Option<String>, Attributes),
    ) -> Result<()> {
        for record in self.reader.records() {
            let record = record.map_err(|e| {
                MotifStudioError::backend_io(
                    format!("CSV error in {}: {e}", self.path.display()),
                    ORIGIN,
                )
            })?;
            let (mut id, mut source, mut target) = (None, None, None);
            let mut attributes = Attributes::new();
            for (column, raw) in self.columns.iter().zip(record.iter()) {
                if raw.is_empty() {
                    continue;
                }
                match column {
                    Column::Id => id = Some(raw.to_string()),
                    Column::Source => source = Some(raw.to_string()),
                    Column::Target => target = Some(raw.to_string()),
                    Column::Labels => {
                        attributes.insert(LABELS_ATTRIBUTE.to_string(), Value::from(raw));
                    }
                    Column::Attribute { name, kind } => {
                        attributes.insert(name.clone(), typed(raw, kind.as_deref()));
                    }
                    Column::Ignored => {}
                }
            }
            visit(id, source, target, attributes);
        }
        Ok(())
    }
}

fn read_vertices(path: &Path, graph: &mut HostGraph) -> Result<()> {
    let rows = Rows::open(path)?;
    if !rows.columns.contains(&Column::Id) {
        return Err(rows.missing("id"));
    }
    rows.for_each(|id, _, _, attributes| {
        if let Some(id) = id {
            graph.add_vertex(id, attributes);
        }
    })
}

fn read_edges(path: &Path, graph: &mut HostGraph) -> Result<()> {
    let rows = Rows::open(path)?;
    if !rows.columns.contains(&Column::Source) {
        return Err(rows.missing("source"));
    }
    if !rows.columns.contains(&Column::Target) {
        return Err(rows.missing("target"));
    }
    rows.for_each(|_, source, target, attributes| {
        if let (Some(source), Some(target)) = (source, target) {
            graph.add_edge(source, target, attributes);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join("vertices.csv"),
            ":ID,:LABEL,size:Int,kind\na,Neuron,3,pyramidal\nb,Neuron,5,basket\n",
        )
        .expect("write");
        std::fs::write(
            dir.path().join("edges.csv"),
            ":START_ID,:END_ID,:TYPE,weight:Double\na,b,Synapse,0.5\nb,c,Synapse,1.5\n",
        )
        .expect("write");
        std::fs::write(dir.path().join("README.txt"), "ignored").expect("write");
        dir
    }

    #[test]
    fn classifies_headers() {
        assert_eq!(classify(":ID"), Column::Id);
        assert_eq!(classify("neuron:ID"), Column::Id);
        assert_eq!(classify("_id"), Column::Id);
        assert_eq!(classify("source"), Column::Source);
        assert_eq!(classify(":END_ID"), Column::Target);
        assert_eq!(classify(":LABEL"), Column::Labels);
        assert_eq!(
            classify("size:Int"),
            Column::Attribute {
                name: "size".to_string(),
                kind: Some("int".to_string())
            }
        );
    }

    #[test]
    fn loads_directed_graph_from_directory() {
        let dir = fixture();
        let uri = format!("{SCHEME}{}", dir.path().display());
        let provider = OpenCypherHostProvider::default();
        assert!(provider.accepts(&uri));

        let graph = provider.load_graph(&uri).expect("load");
        assert!(graph.is_directed());
        assert_eq!(graph.vertex_count(), 3);
        assert_eq!(graph.edge_count(), 2);

        let a = graph.vertex("a").expect("a");
        assert_eq!(a.attributes.get("size"), Some(&Value::from(3)));
        assert_eq!(a.attributes.get("kind"), Some(&Value::from("pyramidal")));
        assert_eq!(a.attributes.get(LABELS_ATTRIBUTE), Some(&Value::from("Neuron")));
        assert_eq!(graph.edges()[1].attributes.get("weight"), Some(&Value::from(1.5)));
    }

    #[test]
    fn empty_directory_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let uri = format!("{SCHEME}{}", dir.path().display());
        let err = OpenCypherHostProvider::default()
            .load_graph(&uri)
            .expect_err("empty");
        assert_eq!(err.code, "backend_io");
    }

    #[test]
    fn file_prefixes_are_configurable() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("nodes.csv"), ":ID,:LABEL\na,Neuron\nb,Neuron\n")
            .expect("write");
        std::fs::write(dir.path().join("rels.csv"), ":START_ID,:END_ID\na,b\nb,a\n")
            .expect("write");
        let uri = format!("{SCHEME}{}", dir.path().display());

        let err = OpenCypherHostProvider::default()
            .load_graph(&uri)
            .expect_err("default prefixes");
        assert!(err.message.contains("vert* or edge*"));

        let options: OpenCypherOptions = serde_json::from_value(serde_json::json!({
            "vertex_prefix": "nodes",
            "edge_prefix": "rels"
        }))
        .expect("options");
        let graph = OpenCypherHostProvider::new(options)
            .load_graph(&uri)
            .expect("load");
        assert_eq!(graph.vertex_count(), 2);
        assert_eq!(graph.edge_count(), 2);

        let defaults: OpenCypherOptions =
            serde_json::from_value(serde_json::json!({})).expect("defaults");
        assert_eq!(defaults, OpenCypherOptions::default());
    }

    #[test]
    fn edge_file_without_endpoints_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("edges.csv"), "from,to\na,b\n").expect("write");
        let uri = format!("{SCHEME}{}", dir.path().display());
        let err = OpenCypherHostProvider::default()
            .load_graph(&uri)
            .expect_err("no columns");
        assert!(err.message.contains("source"));
    }
}

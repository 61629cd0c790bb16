//! In-memory host graph model.
//!
//! Providers materialize their storage medium into a [`HostGraph`]; every
//! count, schema, and motif query is answered from it. The model is a simple
//! graph (no parallel edges) with string vertex ids and JSON-valued
//! attributes, serializable so a loaded graph can leave a bounded worker.
//!
//! # Modules
//!
//! - [`motif`] - Motif language parser and subgraph matcher
//! - [`cypher`] - `MATCH ... RETURN` subset compiled onto motifs
//! - [`formats`] - GraphML and CSV readers, GraphML writer

pub mod cypher;
pub mod formats;
pub mod motif;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Attribute holding openCypher `:LABEL` / `:TYPE` values.
pub const LABELS_ATTRIBUTE: &str = "__labels__";

/// Attribute bag attached to a vertex or an edge.
pub type Attributes = BTreeMap<String, Value>;

/// Attribute name to type name (`str`, `int`, `float`, `bool`), or `None`
/// when the values disagree on a type.
pub type AttributeSchema = BTreeMap<String, Option<String>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vertex {
    pub id: String,
    #[serde(default)]
    pub attributes: Attributes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub attributes: Attributes,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GraphParts {
    directed: bool,
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
}

/// A loaded host graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "GraphParts", into = "GraphParts")]
pub struct HostGraph {
    directed: bool,
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    vertex_index: HashMap<String, usize>,
    edge_index: HashMap<(usize, usize), usize>,
    out_neighbors: Vec<HashSet<usize>>,
    in_neighbors: Vec<HashSet<usize>>,
}

impl From<GraphParts> for HostGraph {
    fn from(parts: GraphParts) -> Self {
        let mut graph = Self::new(parts.directed);
        for vertex in parts.vertices {
            graph.add_vertex(vertex.id, vertex.attributes);
        }
        for edge in parts.edges {
            graph.add_edge(edge.source, edge.target, edge.attributes);
        }
        graph
    }
}

impl From<HostGraph> for GraphParts {
    fn from(graph: HostGraph) -> Self {
        Self {
            directed: graph.directed,
            vertices: graph.vertices,
            edges: graph.edges,
        }
    }
}

impl HostGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new(directed: bool) -> Self {
        Self {
            directed,
            ..Self::default()
        }
    }

    /// Builds the complete graph on `n` vertices named `0..n`.
    #[must_use]
    pub fn complete(n: usize, directed: bool) -> Self {
        let mut graph = Self::new(directed);
        for i in 0..n {
            graph.add_vertex(i.to_string(), Attributes::new());
        }
        for i in 0..n {
            for j in 0..n {
                if i != j && (directed || i < j) {
                    graph.add_edge(i.to_string(), j.to_string(), Attributes::new());
                }
            }
        }
        graph
    }

    #[must_use]
    pub fn is_directed(&self) -> bool {
        self.directed
    }

    /// Adds a vertex, merging attributes into an existing vertex of the same id.
    pub fn add_vertex(&mut self, id: impl Into<String>, attributes: Attributes) -> usize {
        let id = id.into();
        if let Some(&idx) = self.vertex_index.get(&id) {
            self.vertices[idx].attributes.extend(attributes);
            return idx;
        }
        let idx = self.vertices.len();
        self.vertex_index.insert(id.clone(), idx);
        self.vertices.push(Vertex { id, attributes });
        self.out_neighbors.push(HashSet::new());
        self.in_neighbors.push(HashSet::new());
        idx
    }

    /// Adds an edge, creating missing endpoints. A repeated edge merges its
    /// attributes into the existing one.
    pub fn add_edge(
        &mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        attributes: Attributes,
    ) {
        let source = source.into();
        let target = target.into();
        let s = self.add_vertex(source.clone(), Attributes::new());
        let t = self.add_vertex(target.clone(), Attributes::new());
        let key = self.edge_key(s, t);
        if let Some(&existing) = self.edge_index.get(&key) {
            self.edges[existing].attributes.extend(attributes);
            return;
        }
        self.edge_index.insert(key, self.edges.len());
        self.edges.push(Edge {
            source,
            target,
            attributes,
        });
        self.out_neighbors[s].insert(t);
        self.in_neighbors[t].insert(s);
        if !self.directed {
            self.out_neighbors[t].insert(s);
            self.in_neighbors[s].insert(t);
        }
    }

    fn edge_key(&self, s: usize, t: usize) -> (usize, usize) {
        if self.directed || s <= t {
            (s, t)
        } else {
            (t, s)
        }
    }

    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    #[must_use]
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    #[must_use]
    pub fn vertex(&self, id: &str) -> Option<&Vertex> {
        self.vertex_index.get(id).map(|&idx| &self.vertices[idx])
    }

    pub(crate) fn vertex_at(&self, idx: usize) -> &Vertex {
        &self.vertices[idx]
    }

    pub(crate) fn successors(&self, idx: usize) -> &HashSet<usize> {
        &self.out_neighbors[idx]
    }

    pub(crate) fn predecessors(&self, idx: usize) -> &HashSet<usize> {
        &self.in_neighbors[idx]
    }

    /// Returns the edge between two vertex indices, honoring direction.
    pub(crate) fn edge_between(&self, s: usize, t: usize) -> Option<&Edge> {
        if !self.out_neighbors[s].contains(&t) {
            return None;
        }
        self.edge_index
            .get(&self.edge_key(s, t))
            .map(|&idx| &self.edges[idx])
    }

    /// Infers the vertex attribute schema.
    #[must_use]
    pub fn vertex_attribute_schema(&self) -> AttributeSchema {
        infer_schema(self.vertices.iter().map(|v| &v.attributes))
    }

    /// Infers the edge attribute schema.
    #[must_use]
    pub fn edge_attribute_schema(&self) -> AttributeSchema {
        infer_schema(self.edges.iter().map(|e| &e.attributes))
    }

    /// Returns `vertex id -> value` for every vertex carrying `attribute`.
    #[must_use]
    pub fn vertex_attribute_values(&self, attribute: &str) -> BTreeMap<String, Value> {
        self.vertices
            .iter()
            .filter_map(|v| {
                v.attributes
                    .get(attribute)
                    .map(|value| (v.id.clone(), value.clone()))
            })
            .collect()
    }
}

/// Names the schema type of a JSON attribute value.
#[must_use]
pub fn value_type_name(value: &Value) -> Option<&'static str> {
    match value {
        Value::String(_) => Some("str"),
        Value::Bool(_) => Some("bool"),
        Value::Number(n) if n.is_i64() || n.is_u64() => Some("int"),
        Value::Number(_) => Some("float"),
        _ => None,
    }
}

fn infer_schema<'a>(bags: impl Iterator<Item = &'a Attributes>) -> AttributeSchema {
    let mut schema = AttributeSchema::new();
    for bag in bags {
        for (name, value) in bag {
            let observed = value_type_name(value).map(str::to_string);
            schema
                .entry(name.clone())
                .and_modify(|current| {
                    if *current != observed {
                        *current = None;
                    }
                })
                .or_insert(observed);
        }
    }
    schema
}

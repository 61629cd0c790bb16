//! Motif language and subgraph matcher.
//!
//! A motif is a small query graph written one statement per line (or
//! separated by `;`):
//!
//! ```text
//! # a feed-forward loop with a heavy first hop
//! A -> B [weight >= 4]
//! B -> C
//! A -> C
//! A !> A
//! A.type = "excitatory"
//! ```
//!
//! `->` requires an edge, `!>` forbids one. Bracketed edge constraints and
//! `Vertex.attribute op value` lines restrict attributes. A match binds every
//! motif vertex to a distinct host vertex (monomorphism).

use crate::core::error::{MotifStudioError, Result};
use crate::graph::{Attributes, HostGraph};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};

/// One binding of motif vertex ids to host vertex ids.
pub type MotifMatch = BTreeMap<String, String>;

const ORIGIN: &str = "motif:parse";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Ge,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Le,
}

impl Comparison {
    fn parse(token: &str) -> Option<Self> {
        match token {
            "=" | "==" => Some(Self::Eq),
            "!=" => Some(Self::Ne),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Ge),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Le),
            _ => None,
        }
    }

    fn holds(self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Gt => ordering == Ordering::Greater,
            Self::Ge => ordering != Ordering::Less,
            Self::Lt => ordering == Ordering::Less,
            Self::Le => ordering != Ordering::Greater,
        }
    }
}

/// An attribute predicate such as `weight >= 4`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Constraint {
    pub attribute: String,
    pub op: Comparison,
    pub value: Value,
}

impl Constraint {
    /// A missing attribute never satisfies a constraint.
    fn satisfied_by(&self, attributes: &Attributes) -> bool {
        let Some(actual) = attributes.get(&self.attribute) else {
            return false;
        };
        let ordering = match (actual, &self.value) {
            (Value::Number(a), Value::Number(b)) => {
                match (a.as_f64(), b.as_f64()) {
                    (Some(a), Some(b)) => a.partial_cmp(&b),
                    _ => None,
                }
            }
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            // GraphML readers sometimes leave numbers as strings.
            (Value::String(a), Value::Number(b)) => match (a.parse::<f64>(), b.as_f64()) {
                (Ok(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
            _ => None,
        };
        match ordering {
            Some(ordering) => self.op.holds(ordering),
            None => self.op == Comparison::Ne,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotifEdge {
    pub source: String,
    pub target: String,
    /// `false` for `!>` edges, which must be absent.
    pub exists: bool,
    pub constraints: Vec<Constraint>,
}

/// A parsed motif.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Motif {
    entities: Vec<String>,
    edges: Vec<MotifEdge>,
    vertex_constraints: BTreeMap<String, Vec<Constraint>>,
}

impl Motif {
    /// Parses motif source text.
    pub fn parse(source: &str) -> Result<Self> {
        let mut motif = Self {
            entities: Vec::new(),
            edges: Vec::new(),
            vertex_constraints: BTreeMap::new(),
        };

        for (line_no, line) in source.lines().enumerate() {
            let line = strip_comment(line);
            for statement in line.split(';') {
                let statement = statement.trim();
                if statement.is_empty() {
                    continue;
                }
                motif.parse_statement(statement).map_err(|e| {
                    e.with_context("line", (line_no + 1).to_string())
                        .with_context("statement", statement)
                })?;
            }
        }

        if motif.entities.is_empty() {
            return Err(MotifStudioError::invalid_query(
                "Motif has no statements",
                ORIGIN,
            ));
        }
        Ok(motif)
    }

    fn parse_statement(&mut self, statement: &str) -> Result<()> {
        for (token, exists) in [("->", true), ("!>", false)] {
            if let Some((lhs, rhs)) = statement.split_once(token) {
                return self.parse_edge(lhs, rhs, exists);
            }
        }

        let (lhs, op, rhs) = split_comparison(statement)?;
        let (vertex, attribute) = lhs.split_once('.').ok_or_else(|| {
            MotifStudioError::invalid_query(
                format!("Expected an edge or a `Vertex.attribute` constraint, got `{statement}`"),
                ORIGIN,
            )
        })?;
        let vertex = identifier(vertex)?;
        let attribute = identifier(attribute)?;
        self.touch(&vertex);
        self.vertex_constraints
            .entry(vertex)
            .or_default()
            .push(Constraint {
                attribute,
                op,
                value: parse_value(rhs)?,
            });
        Ok(())
    }

    fn parse_edge(&mut self, lhs: &str, rhs: &str, exists: bool) -> Result<()> {
        let source = identifier(lhs)?;
        let (target, constraints) = match rhs.split_once('[') {
            Some((target, rest)) => {
                let body = rest.trim_end().strip_suffix(']').ok_or_else(|| {
                    MotifStudioError::invalid_query("Unclosed edge constraint block", ORIGIN)
                })?;
                let constraints = body
                    .split(',')
                    .map(str::trim)
                    .filter(|c| !c.is_empty())
                    .map(|c| {
                        let (attribute, op, value) = split_comparison(c)?;
                        Ok(Constraint {
                            attribute: identifier(attribute)?,
                            op,
                            value: parse_value(value)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                (identifier(target)?, constraints)
            }
            None => (identifier(rhs)?, Vec::new()),
        };
        self.touch(&source);
        self.touch(&target);
        self.edges.push(MotifEdge {
            source,
            target,
            exists,
            constraints,
        });
        Ok(())
    }

    /// Assembles a motif from already-validated parts.
    pub(crate) fn from_parts(
        entities: Vec<String>,
        edges: Vec<MotifEdge>,
        vertex_constraints: BTreeMap<String, Vec<Constraint>>,
    ) -> Self {
        Self {
            entities,
            edges,
            vertex_constraints,
        }
    }

    fn touch(&mut self, entity: &str) {
        if !self.entities.iter().any(|e| e == entity) {
            self.entities.push(entity.to_string());
        }
    }

    /// Motif vertex ids in order of first appearance.
    #[must_use]
    pub fn entities(&self) -> &[String] {
        &self.entities
    }

    #[must_use]
    pub fn edges(&self) -> &[MotifEdge] {
        &self.edges
    }

    /// Required `(source, target)` pairs.
    #[must_use]
    pub fn required_edges(&self) -> Vec<[String; 2]> {
        self.edges
            .iter()
            .filter(|e| e.exists)
            .map(|e| [e.source.clone(), e.target.clone()])
            .collect()
    }

    /// Node-link JSON rendering of the motif, constraints included.
    #[must_use]
    pub fn to_node_link(&self) -> Value {
        let nodes: Vec<Value> = self
            .entities
            .iter()
            .map(|id| {
                json!({
                    "id": id,
                    "constraints": self.vertex_constraints.get(id).cloned().unwrap_or_default(),
                })
            })
            .collect();
        json!({
            "directed": true,
            "multigraph": false,
            "nodes": nodes,
            "links": self.edges,
        })
    }

    /// Counts matches without materializing them.
    #[must_use]
    pub fn count_in(&self, host: &HostGraph) -> u64 {
        let mut count = 0u64;
        Matcher::new(self, host).run(&mut |_| count += 1);
        count
    }

    /// Enumerates every match.
    #[must_use]
    pub fn find_in(&self, host: &HostGraph) -> Vec<MotifMatch> {
        let mut matches = Vec::new();
        Matcher::new(self, host).run(&mut |binding| {
            let found = binding
                .iter()
                .map(|(entity, host_idx)| {
                    (entity.clone(), host.vertex_at(*host_idx).id.clone())
                })
                .collect();
            matches.push(found);
        });
        matches
    }
}

/// Backtracking monomorphism search.
struct Matcher<'a> {
    motif: &'a Motif,
    host: &'a HostGraph,
    order: Vec<usize>,
}

impl<'a> Matcher<'a> {
    fn new(motif: &'a Motif, host: &'a HostGraph) -> Self {
        Self {
            motif,
            host,
            order: search_order(motif),
        }
    }

    fn run(&self, visit: &mut dyn FnMut(&[(String, usize)])) {
        let mut assigned: Vec<Option<usize>> = vec![None; self.motif.entities.len()];
        let mut used = HashSet::new();
        self.extend(0, &mut assigned, &mut used, visit);
    }

    fn extend(
        &self,
        depth: usize,
        assigned: &mut Vec<Option<usize>>,
        used: &mut HashSet<usize>,
        visit: &mut dyn FnMut(&[(String, usize)]),
    ) {
        if depth == self.order.len() {
            let binding: Vec<(String, usize)> = self
                .motif
                .entities
                .iter()
                .zip(assigned.iter())
                .filter_map(|(entity, host)| host.map(|h| (entity.clone(), h)))
                .collect();
            visit(&binding);
            return;
        }

        let entity = self.order[depth];
        for candidate in self.candidates(entity, assigned) {
            if used.contains(&candidate) || !self.consistent(entity, candidate, assigned) {
                continue;
            }
            assigned[entity] = Some(candidate);
            used.insert(candidate);
            self.extend(depth + 1, assigned, used, visit);
            used.remove(&candidate);
            assigned[entity] = None;
        }
    }

    /// Narrows candidates through an already-bound neighbor when one exists.
    /// Candidates are returned in host insertion order so enumeration is
    /// deterministic.
    fn candidates(&self, entity: usize, assigned: &[Option<usize>]) -> Vec<usize> {
        let name = &self.motif.entities[entity];
        for edge in self.motif.edges.iter().filter(|e| e.exists) {
            let neighbors = if &edge.target == name {
                assigned[self.index_of(&edge.source)].map(|b| self.host.successors(b))
            } else if &edge.source == name {
                assigned[self.index_of(&edge.target)].map(|b| self.host.predecessors(b))
            } else {
                None
            };
            if let Some(neighbors) = neighbors {
                let mut candidates: Vec<usize> = neighbors.iter().copied().collect();
                candidates.sort_unstable();
                return candidates;
            }
        }
        (0..self.host.vertex_count()).collect()
    }

    fn consistent(&self, entity: usize, candidate: usize, assigned: &[Option<usize>]) -> bool {
        let name = &self.motif.entities[entity];
        let vertex = self.host.vertex_at(candidate);
        if let Some(constraints) = self.motif.vertex_constraints.get(name) {
            if !constraints.iter().all(|c| c.satisfied_by(&vertex.attributes)) {
                return false;
            }
        }

        let bound = |other: &str| -> Option<usize> {
            if other == name {
                Some(candidate)
            } else {
                assigned[self.index_of(other)]
            }
        };

        for edge in &self.motif.edges {
            if &edge.source != name && &edge.target != name {
                continue;
            }
            let (Some(s), Some(t)) = (bound(&edge.source), bound(&edge.target)) else {
                continue;
            };
            let satisfied = self
                .host
                .edge_between(s, t)
                .is_some_and(|e| edge.constraints.iter().all(|c| c.satisfied_by(&e.attributes)));
            if satisfied != edge.exists {
                return false;
            }
        }
        true
    }

    fn index_of(&self, entity: &str) -> usize {
        self.motif
            .entities
            .iter()
            .position(|e| e == entity)
            .unwrap_or_default()
    }
}

/// Orders motif vertices so each one after the first is, where possible,
/// adjacent to an earlier one.
fn search_order(motif: &Motif) -> Vec<usize> {
    let n = motif.entities.len();
    let index = |name: &str| motif.entities.iter().position(|e| e == name);
    let mut adjacency = vec![HashSet::new(); n];
    for edge in motif.edges.iter().filter(|e| e.exists) {
        if let (Some(s), Some(t)) = (index(&edge.source), index(&edge.target)) {
            adjacency[s].insert(t);
            adjacency[t].insert(s);
        }
    }

    let mut order = Vec::with_capacity(n);
    let mut placed = vec![false; n];
    while order.len() < n {
        let next = (0..n)
            .filter(|&i| !placed[i])
            .max_by_key(|&i| {
                let links = adjacency[i].iter().filter(|&&j| placed[j]).count();
                (links, adjacency[i].len(), std::cmp::Reverse(i))
            })
            .unwrap_or_default();
        placed[next] = true;
        order.push(next);
    }
    order
}

fn strip_comment(line: &str) -> &str {
    let mut in_quotes = None;
    for (i, c) in line.char_indices() {
        match (c, in_quotes) {
            ('"' | '\'', None) => in_quotes = Some(c),
            (q, Some(open)) if q == open => in_quotes = None,
            ('#', None) => return &line[..i],
            _ => {}
        }
    }
    line
}

pub(crate) fn identifier(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let mut chars = raw.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(raw.to_string())
    } else {
        Err(MotifStudioError::invalid_query(
            format!("Invalid identifier `{raw}`"),
            ORIGIN,
        ))
    }
}

pub(crate) fn split_comparison(raw: &str) -> Result<(&str, Comparison, &str)> {
    let start = raw.find(['=', '!', '<', '>']).ok_or_else(|| {
        MotifStudioError::invalid_query(format!("Expected a comparison in `{raw}`"), ORIGIN)
    })?;
    let two = raw.get(start..start + 2);
    let (op, width) = match two.and_then(Comparison::parse) {
        Some(op) => (op, 2),
        None => {
            let one = &raw[start..=start];
            let op = Comparison::parse(one).ok_or_else(|| {
                MotifStudioError::invalid_query(
                    format!("Unknown comparison operator in `{raw}`"),
                    ORIGIN,
                )
            })?;
            (op, 1)
        }
    };
    Ok((raw[..start].trim(), op, raw[start + width..].trim()))
}

pub(crate) fn parse_value(raw: &str) -> Result<Value> {
    let raw = raw.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = raw
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return Ok(Value::String(inner.to_string()));
        }
    }
    match raw {
        "true" | "True" => return Ok(Value::Bool(true)),
        "false" | "False" => return Ok(Value::Bool(false)),
        _ => {}
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Ok(Value::from(i));
    }
    if let Ok(f) = raw.parse::<f64>() {
        return Ok(Value::from(f));
    }
    Err(MotifStudioError::invalid_query(
        format!("Cannot parse constraint value `{raw}`"),
        ORIGIN,
    ))
}

//! openCypher `MATCH` subset.
//!
//! Cypher queries are compiled onto a [`Motif`] and answered by the same
//! matcher, so node bindings are distinct host vertices just as in motif
//! queries. The supported shape is:
//!
//! ```text
//! MATCH (a:Neuron)-[:SYNAPSE]->(b), (b)<--(c)
//! WHERE a.size > 2 AND c.kind <> "glia"
//! RETURN a, c
//! LIMIT 10
//! ```
//!
//! Node labels and relationship types are matched against the
//! [`LABELS_ATTRIBUTE`] attribute written by the openCypher reader.
//! `RETURN *` returns every node variable. Keywords are case-insensitive.

use crate::core::error::{MotifStudioError, Result};
use crate::graph::motif::{
    identifier, parse_value, Comparison, Constraint, Motif, MotifEdge, MotifMatch,
};
use crate::graph::{HostGraph, LABELS_ATTRIBUTE};
use serde_json::Value;
use std::collections::BTreeMap;

const ORIGIN: &str = "cypher:parse";

/// A compiled `MATCH ... RETURN` query.
#[derive(Debug, Clone, PartialEq)]
pub struct CypherQuery {
    motif: Motif,
    columns: Vec<String>,
    limit: Option<usize>,
}

impl CypherQuery {
    pub fn parse(source: &str) -> Result<Self> {
        let tokens = tokenize(source)?;
        Parser::new(tokens).query()
    }

    #[must_use]
    pub fn motif(&self) -> &Motif {
        &self.motif
    }

    /// Returned node variables, in `RETURN` order.
    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Number of result rows, `LIMIT` applied.
    #[must_use]
    pub fn count_in(&self, host: &HostGraph) -> u64 {
        let count = self.motif.count_in(host);
        match self.limit {
            Some(limit) => count.min(limit as u64),
            None => count,
        }
    }

    /// Result rows, each binding the returned variables to host vertex ids.
    #[must_use]
    pub fn find_in(&self, host: &HostGraph) -> Vec<MotifMatch> {
        let mut rows: Vec<MotifMatch> = self
            .motif
            .find_in(host)
            .into_iter()
            .map(|binding| {
                binding
                    .into_iter()
                    .filter(|(variable, _)| self.columns.contains(variable))
                    .collect()
            })
            .collect();
        if let Some(limit) = self.limit {
            rows.truncate(limit);
        }
        rows
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Word(String),
    Number(String),
    Text(String),
    Punct(&'static str),
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Word(w) | Self::Number(w) => format!("`{w}`"),
            Self::Text(t) => format!("\"{t}\""),
            Self::Punct(p) => format!("`{p}`"),
        }
    }
}

const PUNCTUATION: [&str; 19] = [
    "->", "<-", "<>", "<=", ">=", "!=", "(", ")", "[", "]", ":", ",", ".", "*", "-", "<", ">",
    "=", ";",
];

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut rest = source;
    while let Some(c) = rest.chars().next() {
        if c.is_whitespace() {
            rest = &rest[c.len_utf8()..];
        } else if rest.starts_with("//") {
            rest = rest.find('\n').map_or("", |end| &rest[end..]);
        } else if c == '"' || c == '\'' {
            let body = &rest[1..];
            let end = body.find(c).ok_or_else(|| {
                MotifStudioError::invalid_query("Unterminated string literal", ORIGIN)
            })?;
            tokens.push(Token::Text(body[..end].to_string()));
            rest = &body[end + 1..];
        } else if c.is_ascii_digit() {
            let end = rest
                .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
                .unwrap_or(rest.len());
            tokens.push(Token::Number(rest[..end].to_string()));
            rest = &rest[end..];
        } else if c.is_ascii_alphabetic() || c == '_' {
            let end = rest
                .find(|ch: char| !(ch.is_ascii_alphanumeric() || ch == '_'))
                .unwrap_or(rest.len());
            tokens.push(Token::Word(rest[..end].to_string()));
            rest = &rest[end..];
        } else if let Some(&p) = PUNCTUATION.iter().find(|p| rest.starts_with(**p)) {
            tokens.push(Token::Punct(p));
            rest = &rest[p.len()..];
        } else {
            return Err(MotifStudioError::invalid_query(
                format!("Unexpected character `{c}` in Cypher query"),
                ORIGIN,
            ));
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    entities: Vec<String>,
    edges: Vec<MotifEdge>,
    constraints: BTreeMap<String, Vec<Constraint>>,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            entities: Vec::new(),
            edges: Vec::new(),
            constraints: BTreeMap::new(),
        }
    }

    fn query(mut self) -> Result<CypherQuery> {
        self.keyword("MATCH")?;
        loop {
            self.path()?;
            if !self.eat(",") {
                break;
            }
        }
        if self.edges.is_empty() {
            return Err(unsupported("MATCH needs at least one relationship"));
        }

        if self.eat_keyword("WHERE") {
            loop {
                self.condition()?;
                if !self.eat_keyword("AND") {
                    break;
                }
            }
        }

        self.keyword("RETURN")?;
        let columns = if self.eat("*") {
            self.entities.clone()
        } else {
            let mut columns = Vec::new();
            loop {
                let variable = self.node_variable()?;
                if !columns.contains(&variable) {
                    columns.push(variable);
                }
                if !self.eat(",") {
                    break;
                }
            }
            columns
        };

        let limit = if self.eat_keyword("LIMIT") {
            match self.next() {
                Some(Token::Number(n)) => Some(n.parse::<usize>().map_err(|_| {
                    invalid(format!("LIMIT must be a non-negative integer, got `{n}`"))
                })?),
                other => return Err(expected("a LIMIT count", other.as_ref())),
            }
        } else {
            None
        };
        self.eat(";");
        if let Some(token) = self.peek() {
            return Err(invalid(format!(
                "Unexpected {} after RETURN clause",
                token.describe()
            )));
        }

        Ok(CypherQuery {
            motif: Motif::from_parts(self.entities, self.edges, self.constraints),
            columns,
            limit,
        })
    }

    /// `(a)-[...]->(b)<-[...]-(c) ...`
    fn path(&mut self) -> Result<()> {
        let mut left = self.node()?;
        while matches!(self.peek(), Some(Token::Punct("-" | "<-"))) {
            let (forward, constraints) = self.relationship()?;
            let right = self.node()?;
            let (source, target) = if forward {
                (left, right.clone())
            } else {
                (right.clone(), left)
            };
            self.edges.push(MotifEdge {
                source,
                target,
                exists: true,
                constraints,
            });
            left = right;
        }
        Ok(())
    }

    /// `(var)` or `(var:Label)`.
    fn node(&mut self) -> Result<String> {
        self.punct("(")?;
        let variable = match self.next() {
            Some(Token::Word(w)) => identifier(&w)?,
            Some(Token::Punct(")")) => {
                return Err(unsupported("anonymous nodes; name every node, as in `(a)`"))
            }
            other => return Err(expected("a node variable", other.as_ref())),
        };
        if self.eat(":") {
            let label = self.word("a node label")?;
            self.constraints
                .entry(variable.clone())
                .or_default()
                .push(label_constraint(label));
        }
        self.punct(")")?;
        if !self.entities.contains(&variable) {
            self.entities.push(variable.clone());
        }
        Ok(variable)
    }

    /// `-->`, `-[..]->`, `<--`, `<-[..]-`. Returns whether it points right.
    fn relationship(&mut self) -> Result<(bool, Vec<Constraint>)> {
        let backward = self.eat("<-");
        if !backward {
            self.punct("-")?;
        }
        let mut constraints = Vec::new();
        if self.eat("[") {
            if matches!(self.peek(), Some(Token::Word(_))) {
                // Relationship variables cannot be returned; the name is dropped.
                self.next();
            }
            if self.eat(":") {
                constraints.push(label_constraint(self.word("a relationship type")?));
            }
            self.punct("]")?;
        }
        if backward {
            self.punct("-")?;
            return Ok((false, constraints));
        }
        if self.eat("->") {
            Ok((true, constraints))
        } else {
            Err(unsupported(
                "undirected relationships; use `-->` or `<--`",
            ))
        }
    }

    /// `a.attr op value`.
    fn condition(&mut self) -> Result<()> {
        let variable = self.node_variable()?;
        self.punct(".")?;
        let attribute = identifier(&self.word("an attribute name")?)?;
        let (op, negate) = match self.next() {
            Some(Token::Punct("=")) => (Comparison::Eq, false),
            Some(Token::Punct("<>" | "!=")) => (Comparison::Ne, false),
            Some(Token::Punct("<")) => (Comparison::Lt, false),
            Some(Token::Punct("<=")) => (Comparison::Le, false),
            Some(Token::Punct(">")) => (Comparison::Gt, false),
            Some(Token::Punct(">=")) => (Comparison::Ge, false),
            // `a.x<-3` tokenizes as `<-` then `3`.
            Some(Token::Punct("<-")) => (Comparison::Lt, true),
            other => return Err(expected("a comparison operator", other.as_ref())),
        };
        let negate = negate || self.eat("-");
        let value = match self.next() {
            Some(Token::Number(n)) if negate => parse_value(&format!("-{n}"))?,
            Some(Token::Number(n)) => parse_value(&n)?,
            Some(Token::Text(t)) if !negate => Value::String(t),
            Some(Token::Word(w)) if !negate && w.eq_ignore_ascii_case("true") => Value::Bool(true),
            Some(Token::Word(w)) if !negate && w.eq_ignore_ascii_case("false") => {
                Value::Bool(false)
            }
            other => return Err(expected("a literal value", other.as_ref())),
        };
        self.constraints
            .entry(variable)
            .or_default()
            .push(Constraint {
                attribute,
                op,
                value,
            });
        Ok(())
    }

    /// A variable already bound by a node pattern.
    fn node_variable(&mut self) -> Result<String> {
        let variable = self.word("a variable")?;
        if self.entities.contains(&variable) {
            Ok(variable)
        } else {
            Err(invalid(format!("Variable `{variable}` is not a MATCHed node")))
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, punct: &str) -> bool {
        let hit = matches!(self.peek(), Some(Token::Punct(p)) if *p == punct);
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        let hit = matches!(self.peek(), Some(Token::Word(w)) if w.eq_ignore_ascii_case(keyword));
        if hit {
            self.pos += 1;
        }
        hit
    }

    fn punct(&mut self, punct: &str) -> Result<()> {
        if self.eat(punct) {
            Ok(())
        } else {
            Err(expected(&format!("`{punct}`"), self.peek()))
        }
    }

    fn keyword(&mut self, keyword: &str) -> Result<()> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(expected(keyword, self.peek()))
        }
    }

    fn word(&mut self, what: &str) -> Result<String> {
        match self.next() {
            Some(Token::Word(w)) => Ok(w),
            other => Err(expected(what, other.as_ref())),
        }
    }
}

fn label_constraint(label: String) -> Constraint {
    Constraint {
        attribute: LABELS_ATTRIBUTE.to_string(),
        op: Comparison::Eq,
        value: Value::String(label),
    }
}

fn invalid(message: String) -> MotifStudioError {
    MotifStudioError::invalid_query(message, ORIGIN)
}

fn unsupported(what: &str) -> MotifStudioError {
    invalid(format!("Unsupported Cypher: {what}"))
        .with_hint("Supported: MATCH (a)-->(b) [WHERE a.x > 1 AND ...] RETURN a, b [LIMIT n]")
}

fn expected(what: &str, found: Option<&Token>) -> MotifStudioError {
    let found = found.map_or_else(|| "end of query".to_string(), Token::describe);
    invalid(format!("Expected {what}, found {found}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Attributes;
    use serde_json::json;

    fn labelled(label: &str, size: i64) -> Attributes {
        Attributes::from([
            (LABELS_ATTRIBUTE.to_string(), json!(label)),
            ("size".to_string(), json!(size)),
        ])
    }

    fn neurons() -> HostGraph {
        let mut g = HostGraph::new(true);
        g.add_vertex("a", labelled("Neuron", 3));
        g.add_vertex("b", labelled("Neuron", 5));
        g.add_vertex("c", labelled("Glia", 1));
        let syn = Attributes::from([(LABELS_ATTRIBUTE.to_string(), json!("SYN"))]);
        g.add_edge("a", "b", syn.clone());
        g.add_edge("b", "c", syn);
        g.add_edge("c", "a", Attributes::new());
        g
    }

    #[test]
    fn single_hop_matches_every_edge() {
        let query = CypherQuery::parse("MATCH (x)-[]->(y) RETURN x, y").expect("parse");
        assert_eq!(query.columns(), ["x", "y"]);
        assert_eq!(query.count_in(&HostGraph::complete(4, true)), 12);
    }

    #[test]
    fn both_arrow_directions_compile_to_the_same_edge() {
        let right = CypherQuery::parse("MATCH (a)-->(b) RETURN a, b").expect("right");
        let left = CypherQuery::parse("match (b)<--(a) return a, b").expect("left");
        assert_eq!(right.motif().required_edges(), left.motif().required_edges());
        let mut right_rows = right.find_in(&neurons());
        let mut left_rows = left.find_in(&neurons());
        right_rows.sort();
        left_rows.sort();
        assert_eq!(right_rows, left_rows);
    }

    #[test]
    fn labels_types_and_where_clauses_constrain_matches() {
        let g = neurons();
        let typed = CypherQuery::parse("MATCH (a)-[:SYN]->(b) RETURN a, b").expect("parse");
        assert_eq!(typed.count_in(&g), 2);

        let labelled = CypherQuery::parse(
            "MATCH (a:Neuron)-[r:SYN]->(b:Neuron) WHERE a.size >= 3 AND b.size <> 4 RETURN *",
        )
        .expect("parse");
        let rows = labelled.find_in(&g);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["a"], "a");
        assert_eq!(rows[0]["b"], "b");
    }

    #[test]
    fn return_projects_and_limit_truncates() {
        let g = HostGraph::complete(4, true);
        let query =
            CypherQuery::parse("MATCH (a)-->(b), (b)-->(c) RETURN c LIMIT 5;").expect("parse");
        assert_eq!(query.columns(), ["c"]);
        let rows = query.find_in(&g);
        assert_eq!(rows.len(), 5);
        assert!(rows.iter().all(|row| row.keys().map(String::as_str).eq(["c"])));
        assert_eq!(query.count_in(&g), 5);
    }

    #[test]
    fn negative_literals_parse_after_less_than() {
        let query = CypherQuery::parse("MATCH (a)-->(b) WHERE a.size<-3 RETURN a").expect("parse");
        assert_eq!(query.count_in(&neurons()), 0);
    }

    #[test]
    fn unsupported_shapes_are_invalid_queries() {
        for source in [
            "",
            "RETURN a",
            "MATCH (a) RETURN a",
            "MATCH (a)--(b) RETURN a",
            "MATCH ()-->(b) RETURN b",
            "MATCH (a)-->(b) RETURN z",
            "MATCH (a)-->(b) WHERE z.x = 1 RETURN a",
            "MATCH (a)-->(b) RETURN a LIMIT many",
            "MATCH (a)-->(b) RETURN a ORDER BY a",
            "MATCH (a {name: 'x'})-->(b) RETURN a",
        ] {
            let err = CypherQuery::parse(source).expect_err(source);
            assert_eq!(err.code, "invalid_query", "{source}");
        }
    }
}

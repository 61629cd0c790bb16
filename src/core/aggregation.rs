//! Aggregation pipeline for motif search results.
//!
//! A directive arrives as a single string, `kind` or `kind | {json-object}`.
//! [`AggregationDirective::parse`] splits it into a kind and an argument bag;
//! [`Aggregation::from_directive`] selects and validates the transform. Both
//! run before any worker is spawned, so a bad directive never costs a
//! bounded execution. [`Aggregation::apply`] runs once the full raw match
//! list is available.
//!
//! Supported kinds:
//!
//! - `""` - identity
//! - `host.vertex` - `host vertex -> motif vertex -> count`
//! - `motif.vertex` - `motif vertex -> host vertex -> count`
//! - `motif.vertex.attribute | {"attribute": ..}` - `motif vertex -> host attribute value -> count`
//! - `sample | {"limit": n}` - `n` matches drawn uniformly without replacement (default 1)

use crate::core::error::{MotifStudioError, Result};
use crate::graph::motif::MotifMatch;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

const ORIGIN: &str = "aggregation";

pub const HOST_VERTEX: &str = "host.vertex";
pub const MOTIF_VERTEX: &str = "motif.vertex";
pub const MOTIF_VERTEX_ATTRIBUTE: &str = "motif.vertex.attribute";
pub const SAMPLE: &str = "sample";

/// Every non-identity kind, for error hints.
pub const VALID_KINDS: &[&str] = &[HOST_VERTEX, MOTIF_VERTEX, MOTIF_VERTEX_ATTRIBUTE, SAMPLE];

/// Outer key -> inner key -> number of matches.
pub type GroupedCounts = BTreeMap<String, BTreeMap<String, u64>>;

/// A parsed directive. An empty `kind` is the identity transform.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AggregationDirective {
    pub kind: String,
    pub args: Map<String, Value>,
}

impl AggregationDirective {
    /// Parses `kind` or `kind | {json}`. Only the first `|` separates; the
    /// remainder is rejoined so the JSON may itself contain `|`.
    pub fn parse(raw: &str) -> Result<Self> {
        let Some((kind, json)) = raw.split_once('|') else {
            return Ok(Self {
                kind: raw.trim().to_string(),
                args: Map::new(),
            });
        };

        let args = match serde_json::from_str::<Value>(json.trim()) {
            Ok(Value::Object(args)) => args,
            Ok(other) => {
                return Err(MotifStudioError::invalid_aggregation(
                    format!("Aggregation arguments must be a JSON object, got {other}"),
                    ORIGIN,
                ))
            }
            Err(e) => {
                return Err(MotifStudioError::invalid_aggregation(
                    format!("Malformed aggregation arguments: {e}"),
                    ORIGIN,
                )
                .with_context("directive", raw))
            }
        };
        Ok(Self {
            kind: kind.trim().to_string(),
            args,
        })
    }

    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.kind.is_empty()
    }
}

/// A selected transform with its validated arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Aggregation {
    Identity,
    HostVertex,
    MotifVertex,
    MotifVertexAttribute { attribute: String },
    Sample { limit: usize },
}

/// Aggregation output. Serialized untagged: a list for identity and sample,
/// a nested map for the grouping transforms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AggregatedResults {
    Matches(Vec<MotifMatch>),
    Grouped(GroupedCounts),
}

impl AggregatedResults {
    #[must_use]
    pub fn empty() -> Self {
        Self::Matches(Vec::new())
    }
}

impl Aggregation {
    /// Parses and selects in one step. `None` or an empty string is identity.
    pub fn parse(raw: Option<&str>) -> Result<Self> {
        match raw {
            None => Ok(Self::Identity),
            Some(raw) => Self::from_directive(&AggregationDirective::parse(raw)?),
        }
    }

    pub fn from_directive(directive: &AggregationDirective) -> Result<Self> {
        match directive.kind.as_str() {
            "" => Ok(Self::Identity),
            HOST_VERTEX => Ok(Self::HostVertex),
            MOTIF_VERTEX => Ok(Self::MotifVertex),
            MOTIF_VERTEX_ATTRIBUTE => match directive.args.get("attribute") {
                Some(Value::String(attribute)) if !attribute.is_empty() => {
                    Ok(Self::MotifVertexAttribute {
                        attribute: attribute.clone(),
                    })
                }
                _ => Err(MotifStudioError::invalid_aggregation(
                    "motif.vertex.attribute requires a non-empty string `attribute` argument",
                    ORIGIN,
                )),
            },
            SAMPLE => {
                let limit = match directive.args.get("limit") {
                    None => 1,
                    Some(value) => value
                        .as_u64()
                        .and_then(|n| usize::try_from(n).ok())
                        .ok_or_else(|| {
                            MotifStudioError::invalid_aggregation(
                                format!("sample `limit` must be a non-negative integer, got {value}"),
                                ORIGIN,
                            )
                        })?,
                };
                Ok(Self::Sample { limit })
            }
            other => Err(MotifStudioError::invalid_aggregation(
                format!("Unknown aggregation type '{other}'"),
                ORIGIN,
            )
            .with_hint(format!("Valid types: {}", VALID_KINDS.join(", ")))),
        }
    }

    /// Vertex attribute this transform needs from the host graph, if any.
    #[must_use]
    pub fn required_vertex_attribute(&self) -> Option<&str> {
        match self {
            Self::MotifVertexAttribute { attribute } => Some(attribute),
            _ => None,
        }
    }

    /// Applies the transform. `vertex_attributes` maps host vertex id to the
    /// value of [`required_vertex_attribute`](Self::required_vertex_attribute)
    /// and is ignored by every other transform.
    pub fn apply(
        &self,
        matches: &[MotifMatch],
        vertex_attributes: &BTreeMap<String, Value>,
    ) -> Result<AggregatedResults> {
        self.apply_with_rng(matches, vertex_attributes, &mut rand::thread_rng())
    }

    pub fn apply_with_rng<R: Rng + ?Sized>(
        &self,
        matches: &[MotifMatch],
        vertex_attributes: &BTreeMap<String, Value>,
        rng: &mut R,
    ) -> Result<AggregatedResults> {
        match self {
            Self::Identity => Ok(AggregatedResults::Matches(matches.to_vec())),
            Self::HostVertex => Ok(AggregatedResults::Grouped(group(matches, |motif, host| {
                (host.to_string(), motif.to_string())
            }))),
            Self::MotifVertex => Ok(AggregatedResults::Grouped(group(matches, |motif, host| {
                (motif.to_string(), host.to_string())
            }))),
            Self::MotifVertexAttribute { .. } => {
                Ok(AggregatedResults::Grouped(group(matches, |motif, host| {
                    let key = match vertex_attributes.get(host) {
                        Some(Value::String(s)) => s.clone(),
                        Some(other) => other.to_string(),
                        None => "null".to_string(),
                    };
                    (motif.to_string(), key)
                })))
            }
            Self::Sample { limit } => {
                if *limit > matches.len() {
                    return Err(MotifStudioError::invalid_aggregation(
                        format!(
                            "Sample limit {limit} exceeds the {} available matches",
                            matches.len()
                        ),
                        ORIGIN,
                    ));
                }
                Ok(AggregatedResults::Matches(
                    matches.choose_multiple(rng, *limit).cloned().collect(),
                ))
            }
        }
    }
}

fn group(matches: &[MotifMatch], key: impl Fn(&str, &str) -> (String, String)) -> GroupedCounts {
    let mut grouped = GroupedCounts::new();
    for binding in matches {
        for (motif_vertex, host_vertex) in binding {
            let (outer, inner) = key(motif_vertex, host_vertex);
            *grouped.entry(outer).or_default().entry(inner).or_default() += 1;
        }
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use serde_json::json;
    use std::collections::HashSet;

    fn binding(pairs: &[(&str, &str)]) -> MotifMatch {
        pairs
            .iter()
            .map(|(m, h)| ((*m).to_string(), (*h).to_string()))
            .collect()
    }

    fn sample_matches() -> Vec<MotifMatch> {
        vec![
            binding(&[("A", "x"), ("B", "y")]),
            binding(&[("A", "y"), ("B", "z")]),
            binding(&[("A", "x"), ("B", "z")]),
        ]
    }

    #[test]
    fn empty_directive_is_identity() {
        let directive = AggregationDirective::parse("").expect("parse");
        assert!(directive.is_identity());
        assert!(directive.args.is_empty());
        assert_eq!(Aggregation::parse(None).expect("parse"), Aggregation::Identity);
        assert_eq!(Aggregation::parse(Some("  ")).expect("parse"), Aggregation::Identity);
    }

    #[test]
    fn bare_kind_has_no_arguments() {
        let directive = AggregationDirective::parse("host.vertex").expect("parse");
        assert_eq!(directive.kind, "host.vertex");
        assert!(directive.args.is_empty());
    }

    #[test]
    fn kind_with_json_arguments() {
        let directive = AggregationDirective::parse("sample | {\"limit\": 2}").expect("parse");
        assert_eq!(directive.kind, "sample");
        assert_eq!(directive.args.get("limit"), Some(&json!(2)));
        assert_eq!(
            Aggregation::from_directive(&directive).expect("select"),
            Aggregation::Sample { limit: 2 }
        );
    }

    #[test]
    fn pipe_inside_json_is_preserved() {
        let directive =
            AggregationDirective::parse("motif.vertex.attribute | {\"attribute\": \"a|b\"}")
                .expect("parse");
        assert_eq!(directive.args.get("attribute"), Some(&json!("a|b")));
    }

    #[test]
    fn malformed_directives_are_rejected() {
        for raw in ["sample | {limit: 2}", "sample | [1, 2]", "mystery", "motif.vertex.attribute"] {
            let err = Aggregation::parse(Some(raw)).expect_err(raw);
            assert_eq!(err.code, "invalid_aggregation", "{raw}");
        }
        let err = Aggregation::parse(Some("sample | {\"limit\": -1}")).expect_err("negative");
        assert_eq!(err.code, "invalid_aggregation");
    }

    #[test]
    fn identity_passes_matches_through() {
        let matches = sample_matches();
        let out = Aggregation::Identity
            .apply(&matches, &BTreeMap::new())
            .expect("apply");
        assert_eq!(out, AggregatedResults::Matches(matches));
    }

    #[test]
    fn host_vertex_grouping_counts_roles() {
        let out = Aggregation::HostVertex
            .apply(&sample_matches(), &BTreeMap::new())
            .expect("apply");
        let AggregatedResults::Grouped(grouped) = out else {
            panic!("expected grouped output");
        };
        assert_eq!(grouped["x"]["A"], 2);
        assert_eq!(grouped["y"]["A"], 1);
        assert_eq!(grouped["y"]["B"], 1);
        assert_eq!(grouped["z"]["B"], 2);
    }

    #[test]
    fn host_vertex_grouping_ignores_order() {
        let matches = sample_matches();
        let mut reversed = matches.clone();
        reversed.reverse();
        let mut rotated = matches.clone();
        rotated.rotate_left(1);

        let expected = Aggregation::HostVertex
            .apply(&matches, &BTreeMap::new())
            .expect("apply");
        for permuted in [reversed, rotated] {
            let out = Aggregation::HostVertex
                .apply(&permuted, &BTreeMap::new())
                .expect("apply");
            assert_eq!(out, expected);
        }
    }

    #[test]
    fn motif_vertex_grouping_is_the_transpose() {
        let out = Aggregation::MotifVertex
            .apply(&sample_matches(), &BTreeMap::new())
            .expect("apply");
        let AggregatedResults::Grouped(grouped) = out else {
            panic!("expected grouped output");
        };
        assert_eq!(grouped["A"]["x"], 2);
        assert_eq!(grouped["B"]["z"], 2);
    }

    #[test]
    fn attribute_grouping_uses_host_values() {
        let mut attributes = BTreeMap::new();
        attributes.insert("x".to_string(), json!("excitatory"));
        attributes.insert("y".to_string(), json!("inhibitory"));
        let aggregation = Aggregation::parse(Some(
            "motif.vertex.attribute | {\"attribute\": \"type\"}",
        ))
        .expect("parse");
        assert_eq!(aggregation.required_vertex_attribute(), Some("type"));

        let out = aggregation
            .apply(&sample_matches(), &attributes)
            .expect("apply");
        let AggregatedResults::Grouped(grouped) = out else {
            panic!("expected grouped output");
        };
        assert_eq!(grouped["A"]["excitatory"], 2);
        assert_eq!(grouped["A"]["inhibitory"], 1);
        assert_eq!(grouped["B"]["null"], 2);
    }

    #[test]
    fn sample_of_all_returns_each_match_once() {
        let matches = sample_matches();
        let mut rng = StdRng::seed_from_u64(7);
        let out = Aggregation::Sample { limit: 3 }
            .apply_with_rng(&matches, &BTreeMap::new(), &mut rng)
            .expect("apply");
        let AggregatedResults::Matches(sampled) = out else {
            panic!("expected matches");
        };
        assert_eq!(sampled.len(), 3);
        let unique: HashSet<_> = sampled.iter().map(|m| format!("{m:?}")).collect();
        assert_eq!(unique.len(), 3);
        for m in &matches {
            assert!(sampled.contains(m));
        }
    }

    #[test]
    fn sample_larger_than_input_is_an_error() {
        let err = Aggregation::Sample { limit: 4 }
            .apply(&sample_matches(), &BTreeMap::new())
            .expect_err("too many");
        assert_eq!(err.code, "invalid_aggregation");
    }

    #[test]
    fn results_serialize_untagged() {
        let grouped = Aggregation::MotifVertex
            .apply(&sample_matches(), &BTreeMap::new())
            .expect("apply");
        let value = serde_json::to_value(&grouped).expect("serialize");
        assert_eq!(value["A"]["x"], 2);

        let list = serde_json::to_value(AggregatedResults::empty()).expect("serialize");
        assert_eq!(list, json!([]));
    }
}

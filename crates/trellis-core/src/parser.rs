//! GraphParser - turns a pushed graph description into filtered nodes and links.
//!
//! Filtering is two-pass:
//! 1. Keep a node iff it is the queried root or its ranking reaches the
//!    threshold (`ranking_filter / 100`).
//! 2. Keep a link iff both endpoints survived pass one.
//!
//! The root is always retained so consumers have a node to anchor on, and no
//! link ever points at a filtered-out node.

use crate::dot::{DotGraph, DotNode};
use crate::error::{ParseError, Result};
use crate::node::{Link, Node, RawGraph};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// Node attribute carrying the identity's public key.
pub const ATTR_PUBKEY: &str = "pubkey";
/// Node attribute carrying the display label.
pub const ATTR_LABEL: &str = "label";
/// Node attribute carrying the normalized ranking.
pub const ATTR_RANKING: &str = "ranking";
/// Node attribute carrying the memo.
pub const ATTR_MEMO: &str = "memo";
/// Edge attribute carrying the link weight.
pub const ATTR_WEIGHT: &str = "weight";
/// Edge attribute carrying the ledger height.
pub const ATTR_HEIGHT: &str = "height";
/// Edge attribute carrying the ledger time.
pub const ATTR_TIME: &str = "time";

/// Nodes and links that survived filtering, in description order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedGraph {
    pub nodes: Vec<Node>,
    pub links: Vec<Link>,
}

impl ParsedGraph {
    /// Attaches the queried key, producing an immutable snapshot.
    pub fn into_raw(self, public_key: impl Into<String>) -> RawGraph {
        RawGraph::new(public_key, self.nodes, self.links)
    }

    /// Returns true if nothing survived filtering.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.links.is_empty()
    }
}

/// Stateless graph description parser.
#[derive(Debug, Default, Clone, Copy)]
pub struct GraphParser;

impl GraphParser {
    /// Parses and filters a description.
    ///
    /// Never fails: malformed or empty text yields an empty graph.
    pub fn parse(text: &str, root_key: &str, ranking_filter: u8) -> ParsedGraph {
        match DotGraph::parse(text) {
            Ok(graph) => graph.filter(root_key, ranking_filter),
            Err(e) => {
                warn!("Dropping malformed graph description for {}: {}", root_key, e);
                ParsedGraph::default()
            }
        }
    }

    /// Reads a description from disk, then parses it like [`GraphParser::parse`].
    ///
    /// Only I/O failures are reported; grammar errors still degrade to an
    /// empty graph.
    pub fn parse_file(path: &Path, root_key: &str, ranking_filter: u8) -> Result<ParsedGraph> {
        let text = fs::read_to_string(path).map_err(|e| ParseError::io(path, e))?;
        Ok(Self::parse(&text, root_key, ranking_filter))
    }
}

impl DotGraph {
    /// Applies the ranking filter to a parsed description.
    ///
    /// Callers serving several subscribers can parse once and filter per
    /// subscriber; every call is independent.
    pub fn filter(&self, root_key: &str, ranking_filter: u8) -> ParsedGraph {
        let threshold = f64::from(ranking_filter) / 100.0;

        let mut nodes = Vec::new();
        let mut kept = HashSet::new();

        for dot_node in self.nodes() {
            let Some(node) = to_node(dot_node) else {
                continue;
            };
            // NaN rankings never reach the threshold.
            if node.pubkey != root_key && !(node.ranking >= threshold) {
                continue;
            }
            kept.insert(node.id);
            nodes.push(node);
        }

        let links = self
            .edges()
            .iter()
            .filter_map(|edge| {
                let source = node_id(&edge.from)?;
                let target = node_id(&edge.to)?;
                if !kept.contains(&source) || !kept.contains(&target) {
                    return None;
                }
                Some(Link {
                    source,
                    target,
                    value: coerce_attr(edge.attr(ATTR_WEIGHT)),
                    height: edge.attr(ATTR_HEIGHT).and_then(coerce_integer),
                    time: edge.attr(ATTR_TIME).and_then(coerce_integer),
                })
            })
            .collect();

        ParsedGraph { nodes, links }
    }
}

/// Reads a DOT id as a node id.
///
/// Only the canonical spelling of an integer is accepted, so `01` or `+1`
/// never alias node `1`.
fn node_id(text: &str) -> Option<i64> {
    let id = text.parse::<i64>().ok()?;
    (id.to_string() == text).then_some(id)
}

fn to_node(dot_node: &DotNode) -> Option<Node> {
    let Some(id) = node_id(&dot_node.id) else {
        debug!("Skipping node with non-integer id {:?}", dot_node.id);
        return None;
    };

    Some(Node {
        id,
        pubkey: dot_node.attr(ATTR_PUBKEY).unwrap_or_default().to_string(),
        label: dot_node.attr(ATTR_LABEL).map(str::to_string),
        ranking: coerce_attr(dot_node.attr(ATTR_RANKING)),
        memo: dot_node.attr(ATTR_MEMO).map(str::to_string),
    })
}

fn coerce_attr(value: Option<&str>) -> f64 {
    value.map(coerce_number).unwrap_or(f64::NAN)
}

/// Coerces attribute text to a number.
///
/// Surrounding whitespace is ignored and blank text is zero. Decimal,
/// exponent, `Infinity` and `0x`/`0o`/`0b` forms are accepted; anything else
/// becomes NaN instead of an error.
pub fn coerce_number(text: &str) -> f64 {
    let t = text.trim();
    if t.is_empty() {
        return 0.0;
    }

    let radix = |prefix: [&str; 2], base: u32| {
        prefix
            .iter()
            .find_map(|p| t.strip_prefix(p))
            .map(|digits| {
                u64::from_str_radix(digits, base)
                    .map(|v| v as f64)
                    .unwrap_or(f64::NAN)
            })
    };
    if let Some(v) = radix(["0x", "0X"], 16)
        .or_else(|| radix(["0o", "0O"], 8))
        .or_else(|| radix(["0b", "0B"], 2))
    {
        return v;
    }

    match t {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }

    // Rust accepts spellings like "inf" and "NaN" that are not numeric text here.
    if t.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
        return f64::NAN;
    }

    t.parse::<f64>().unwrap_or(f64::NAN)
}

/// Coerces attribute text to an integer; `None` when the value is not a
/// finite whole number.
pub fn coerce_integer(text: &str) -> Option<i64> {
    let v = coerce_number(text);
    if v.is_finite() && v.fract() == 0.0 && v.abs() <= i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! Graph model types shared by every Trellis crate.
//!
//! A snapshot pushed by the server is parsed into a [`RawGraph`]: the queried
//! public key plus the nodes and links that survived ranking filtering.
//! Raw graphs are immutable once built; consumers index them through
//! `trellis_graph::NormalizedGraph`.

use serde::{Deserialize, Serialize};

/// A single identity in a directory graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Identifier, unique within one snapshot only.
    pub id: i64,

    /// Public key of the identity. Empty when the description omitted it.
    pub pubkey: String,

    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Normalized attention weight in `[0, 1]`; NaN when the description
    /// carried a non-numeric value.
    pub ranking: f64,

    /// Optional free text attached by the identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
}

impl Node {
    /// Creates a node with no label, no memo and a NaN ranking.
    pub fn new(id: i64, pubkey: impl Into<String>) -> Self {
        Self {
            id,
            pubkey: pubkey.into(),
            label: None,
            ranking: f64::NAN,
            memo: None,
        }
    }

    /// Sets the ranking.
    pub fn with_ranking(mut self, ranking: f64) -> Self {
        self.ranking = ranking;
        self
    }

    /// Sets the display label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Sets the memo.
    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }

    /// True when the ranking is a real number.
    pub fn has_ranking(&self) -> bool {
        !self.ranking.is_nan()
    }
}

/// A directed, weighted link between two nodes of the same snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    /// Id of the node the link leaves.
    pub source: i64,

    /// Id of the node the link enters.
    pub target: i64,

    /// Link weight; NaN when non-numeric.
    pub value: f64,

    /// Ledger height the link was recorded at, if numeric.
    pub height: Option<i64>,

    /// Ledger timestamp of the link, if numeric.
    pub time: Option<i64>,
}

impl Link {
    /// Creates a link with a NaN weight and no ledger position.
    pub fn new(source: i64, target: i64) -> Self {
        Self {
            source,
            target,
            value: f64::NAN,
            height: None,
            time: None,
        }
    }

    /// Sets the weight.
    pub fn with_value(mut self, value: f64) -> Self {
        self.value = value;
        self
    }

    /// Sets height and time.
    pub fn at(mut self, height: i64, time: i64) -> Self {
        self.height = Some(height);
        self.time = Some(time);
        self
    }
}

/// One filtered snapshot of the graph around a queried public key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawGraph {
    /// The queried root public key.
    pub public_key: String,
    pub nodes: Vec<Node>,
    pub links: Vec<Link>,
}

impl RawGraph {
    /// Creates a raw graph from already-filtered parts.
    pub fn new(public_key: impl Into<String>, nodes: Vec<Node>, links: Vec<Link>) -> Self {
        Self {
            public_key: public_key.into(),
            nodes,
            links,
        }
    }

    /// Returns true if the snapshot contains no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

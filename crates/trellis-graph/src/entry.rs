//! View-model rows derived from a normalized graph.
//!
//! These are the shapes list and tree views consume: one row per identity
//! with its neighbor counts, and one row per link with readable endpoints.

use serde::Serialize;
use trellis_core::{Link, Node};

/// One identity in a directory listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub id: i64,
    pub pubkey: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    /// Ranking as a percentage; zero when the ranking is not numeric.
    pub attention_pct: f64,
    /// Label when present, otherwise the public key.
    pub display_name: String,
    pub incoming_count: usize,
    pub outgoing_count: usize,
}

impl DirectoryEntry {
    /// Builds an entry from a node and its adjacency.
    pub fn from_node(node: &Node, incoming: &[&Link], outgoing: &[&Link]) -> Self {
        let attention_pct = if node.has_ranking() {
            node.ranking * 100.0
        } else {
            0.0
        };

        Self {
            id: node.id,
            pubkey: node.pubkey.clone(),
            label: node.label.clone(),
            memo: node.memo.clone(),
            attention_pct,
            display_name: Self::display_name_of(node),
            incoming_count: incoming.len(),
            outgoing_count: outgoing.len(),
        }
    }

    /// Label of a node, falling back to its public key.
    pub fn display_name_of(node: &Node) -> String {
        match node.label.as_deref() {
            Some(label) if !label.is_empty() => label.to_string(),
            _ => node.pubkey.clone(),
        }
    }
}

/// A link with display names for both endpoints.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathRow {
    #[serde(flatten)]
    pub link: Link,
    pub from: String,
    pub to: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_from_node() {
        let node = Node::new(7, "key=").with_ranking(0.42).with_memo("m");
        let link = Link::new(1, 7);
        let entry = DirectoryEntry::from_node(&node, &[&link], &[]);

        assert_eq!(entry.display_name, "key=");
        assert!((entry.attention_pct - 42.0).abs() < 1e-9);
        assert_eq!(entry.incoming_count, 1);
        assert_eq!(entry.outgoing_count, 0);
        assert_eq!(entry.memo.as_deref(), Some("m"));
    }

    #[test]
    fn test_entry_serializes_camel_case() {
        let node = Node::new(1, "k").with_ranking(0.5).with_label("Kay");
        let entry = DirectoryEntry::from_node(&node, &[], &[]);
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["displayName"], "Kay");
        assert_eq!(json["attentionPct"], 50.0);
        assert!(json.get("memo").is_none());
    }

    #[test]
    fn test_empty_label_falls_back() {
        let node = Node::new(1, "k").with_label("");
        assert_eq!(DirectoryEntry::display_name_of(&node), "k");
        assert_eq!(DirectoryEntry::from_node(&node, &[], &[]).attention_pct, 0.0);
    }
}

//! Normalized graph data structure.
//!
//! A NormalizedGraph wraps one raw snapshot and adds indexes for O(1)
//! lookups by id and public key, plus incoming/outgoing adjacency. The
//! indexes are derived once at construction and never mutated afterwards.

use crate::entry::{DirectoryEntry, PathRow};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use trellis_core::{Link, Node, RawGraph};
use tracing::warn;

/// Position of a node or link inside the raw snapshot.
type Slot = usize;

/// A snapshot plus its lookup indexes.
///
/// All indexes point back into `raw`, so lookups hand out references to the
/// snapshot's own nodes and links. Nodes with an empty public key are indexed
/// by id only; `node_by_pubkey("")` is always `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedGraph {
    raw: RawGraph,

    /// Maps node ids to node slots.
    nodes_by_id: HashMap<i64, Slot>,

    /// Maps public keys to node slots. The first node claiming a key owns it.
    /// Empty keys are never indexed.
    nodes_by_pubkey: HashMap<String, Slot>,

    /// Maps a node id to the slots of links leaving it, in snapshot order.
    outgoing: HashMap<i64, Vec<Slot>>,

    /// Maps a node id to the slots of links entering it, in snapshot order.
    incoming: HashMap<i64, Vec<Slot>>,

    /// Nodes whose public key was already claimed by an earlier node.
    pubkey_collisions: usize,
}

impl NormalizedGraph {
    /// Builds every index from scratch: one pass over nodes, one over links.
    pub fn from_raw(raw: RawGraph) -> Self {
        let mut nodes_by_id = HashMap::with_capacity(raw.nodes.len());
        let mut nodes_by_pubkey = HashMap::with_capacity(raw.nodes.len());
        let mut outgoing: HashMap<i64, Vec<Slot>> = HashMap::new();
        let mut incoming: HashMap<i64, Vec<Slot>> = HashMap::new();
        let mut pubkey_collisions = 0;

        for (slot, node) in raw.nodes.iter().enumerate() {
            nodes_by_id.insert(node.id, slot);

            if node.pubkey.is_empty() {
                continue;
            }
            if nodes_by_pubkey.contains_key(&node.pubkey) {
                pubkey_collisions += 1;
                warn!(
                    "Public key {} claimed by several nodes in snapshot for {}; keeping the first",
                    node.pubkey, raw.public_key
                );
            } else {
                nodes_by_pubkey.insert(node.pubkey.clone(), slot);
            }
        }

        for (slot, link) in raw.links.iter().enumerate() {
            outgoing.entry(link.source).or_default().push(slot);
            incoming.entry(link.target).or_default().push(slot);
        }

        Self {
            raw,
            nodes_by_id,
            nodes_by_pubkey,
            outgoing,
            incoming,
            pubkey_collisions,
        }
    }

    /// The snapshot these indexes were built from.
    pub fn raw(&self) -> &RawGraph {
        &self.raw
    }

    /// The queried public key.
    pub fn public_key(&self) -> &str {
        &self.raw.public_key
    }

    /// Gets a node by id.
    pub fn node(&self, id: i64) -> Option<&Node> {
        self.nodes_by_id.get(&id).map(|&slot| &self.raw.nodes[slot])
    }

    /// Gets a node by public key. Returns `None` for the empty key.
    pub fn node_by_pubkey(&self, pubkey: &str) -> Option<&Node> {
        self.nodes_by_pubkey
            .get(pubkey)
            .map(|&slot| &self.raw.nodes[slot])
    }

    /// The node for the queried public key, if the snapshot contains it.
    pub fn root(&self) -> Option<&Node> {
        self.node_by_pubkey(&self.raw.public_key)
    }

    /// Links leaving the node, in snapshot order.
    pub fn outgoing(&self, id: i64) -> Vec<&Link> {
        self.links_at(self.outgoing.get(&id))
    }

    /// Links entering the node, in snapshot order.
    pub fn incoming(&self, id: i64) -> Vec<&Link> {
        self.links_at(self.incoming.get(&id))
    }

    fn links_at(&self, slots: Option<&Vec<Slot>>) -> Vec<&Link> {
        slots
            .map(|slots| slots.iter().map(|&slot| &self.raw.links[slot]).collect())
            .unwrap_or_default()
    }

    /// Iterates over node ids present in the id index.
    pub fn node_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.nodes_by_id.keys().copied()
    }

    /// Iterates over public keys present in the key index, never `""`.
    pub fn pubkeys(&self) -> impl Iterator<Item = &str> + '_ {
        self.nodes_by_pubkey.keys().map(String::as_str)
    }

    /// Iterates over all nodes in snapshot order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.raw.nodes.iter()
    }

    /// Iterates over all links in snapshot order.
    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.raw.links.iter()
    }

    /// Returns the number of nodes.
    pub fn node_count(&self) -> usize {
        self.raw.nodes.len()
    }

    /// Returns the number of links.
    pub fn link_count(&self) -> usize {
        self.raw.links.len()
    }

    /// Number of nodes that lost their public key to an earlier node.
    pub fn pubkey_collisions(&self) -> usize {
        self.pubkey_collisions
    }

    /// Directory listing: root first, then by descending ranking.
    ///
    /// Nodes without a numeric ranking sort last; ties break on id.
    pub fn entries(&self) -> Vec<DirectoryEntry> {
        let mut nodes: Vec<&Node> = self.raw.nodes.iter().collect();
        let root = self.raw.public_key.as_str();

        nodes.sort_by(|a, b| {
            let a_root = a.pubkey == root;
            let b_root = b.pubkey == root;
            b_root
                .cmp(&a_root)
                .then_with(|| match (a.has_ranking(), b.has_ranking()) {
                    (true, true) => b.ranking.partial_cmp(&a.ranking).unwrap_or(Ordering::Equal),
                    (true, false) => Ordering::Less,
                    (false, true) => Ordering::Greater,
                    (false, false) => Ordering::Equal,
                })
                .then_with(|| a.id.cmp(&b.id))
        });

        nodes
            .into_iter()
            .map(|node| {
                DirectoryEntry::from_node(node, &self.incoming(node.id), &self.outgoing(node.id))
            })
            .collect()
    }

    /// Every link with display names for both endpoints.
    pub fn paths(&self) -> Vec<PathRow> {
        self.raw
            .links
            .iter()
            .map(|link| PathRow {
                from: self.display_name(link.source),
                to: self.display_name(link.target),
                link: link.clone(),
            })
            .collect()
    }

    /// Label of the node, falling back to its public key, or `"unknown"`.
    pub fn display_name(&self, id: i64) -> String {
        match self.node(id) {
            Some(node) => DirectoryEntry::display_name_of(node),
            None => "unknown".to_string(),
        }
    }

    /// Exports the snapshot as a petgraph graph for algorithms.
    ///
    /// Returns the graph and the mapping from node id to graph index.
    pub fn to_digraph(&self) -> (DiGraph<Node, Link>, HashMap<i64, NodeIndex>) {
        let mut graph = DiGraph::with_capacity(self.node_count(), self.link_count());
        let mut index = HashMap::with_capacity(self.node_count());

        for node in &self.raw.nodes {
            index.insert(node.id, graph.add_node(node.clone()));
        }
        for link in &self.raw.links {
            if let (Some(&from), Some(&to)) = (index.get(&link.source), index.get(&link.target)) {
                graph.add_edge(from, to, link.clone());
            }
        }

        (graph, index)
    }

    /// Finds the shortest directed path between two public keys.
    pub fn shortest_path(&self, from: &str, to: &str) -> Option<Vec<&Node>> {
        let from = self.node_by_pubkey(from)?.id;
        let to = self.node_by_pubkey(to)?.id;

        let (graph, index) = self.to_digraph();
        let start = *index.get(&from)?;
        let goal = *index.get(&to)?;

        let (_, path) = petgraph::algo::astar(
            &graph,
            start,
            |finish| finish == goal,
            |_| 1, // every hop costs the same
            |_| 0,
        )?;

        path.into_iter()
            .map(|idx| self.node(graph[idx].id))
            .collect()
    }

    /// Returns graph statistics.
    pub fn stats(&self) -> GraphStats {
        GraphStats {
            node_count: self.node_count(),
            link_count: self.link_count(),
            pubkey_collisions: self.pubkey_collisions,
        }
    }
}

impl From<RawGraph> for NormalizedGraph {
    fn from(raw: RawGraph) -> Self {
        Self::from_raw(raw)
    }
}

/// Builds a NormalizedGraph from a snapshot.
pub fn normalize(raw: RawGraph) -> NormalizedGraph {
    NormalizedGraph::from_raw(raw)
}

/// Graph statistics for status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub link_count: usize,
    pub pubkey_collisions: usize,
}

//! Trellis Core - graph model and description parsing
//!
//! This crate defines the snapshot model shared by every Trellis crate and
//! turns the server's directed-graph descriptions into it.
//!
//! # Example
//!
//! ```
//! use trellis_core::GraphParser;
//!
//! let text = r#"digraph {
//!     0 [pubkey="me", ranking="0.1"];
//!     1 [pubkey="peer", ranking="0.9"];
//!     0 -> 1 [weight="1", height="7", time="1700000000"];
//! }"#;
//!
//! let parsed = GraphParser::parse(text, "me", 50);
//! assert_eq!(parsed.nodes.len(), 2);
//! assert_eq!(parsed.links.len(), 1);
//! ```

mod dot;
mod error;
mod node;
mod parser;

pub use dot::{Attributes, DotEdge, DotGraph, DotNode};
pub use error::{ParseError, Result};
pub use node::{Link, Node, RawGraph};
pub use parser::{coerce_integer, coerce_number, GraphParser, ParsedGraph};

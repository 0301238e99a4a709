//! Wire protocol.
//!
//! Every frame is a JSON envelope `{"type": ..., "body": ...}`.
//!
//! Client to server:
//! - `get_graph` `{public_key, directory_id}` asks for the graph around a key.
//! - `cancel_graph` `{public_key, directory_id}` withdraws interest (opt-in).
//!
//! Server to client:
//! - `graph` `{public_key, graph}` pushes a full snapshot as DOT text.
//! - Any other type is accepted and ignored.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Envelope type of a snapshot push.
pub const GRAPH_PUSH_TYPE: &str = "graph";

/// The graph a client is interested in.
///
/// Also the deduplication key of outbound requests: the ranking filter is
/// applied client-side, so every filter on the same pair shares one request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GraphRequest {
    pub public_key: String,
    pub directory_id: String,
}

impl GraphRequest {
    pub fn new(public_key: impl Into<String>, directory_id: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            directory_id: directory_id.into(),
        }
    }
}

/// Client-to-server messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
pub enum ClientMessage {
    GetGraph(GraphRequest),
    CancelGraph(GraphRequest),
}

impl ClientMessage {
    /// The graph this message is about.
    pub fn request(&self) -> &GraphRequest {
        match self {
            Self::GetGraph(req) | Self::CancelGraph(req) => req,
        }
    }

    /// Encodes the message as a JSON text frame.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Body of a `graph` push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphPush {
    pub public_key: String,
    /// DOT description of the snapshot.
    #[serde(default)]
    pub graph: Option<String>,
}

impl GraphPush {
    pub fn new(public_key: impl Into<String>, graph: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            graph: Some(graph.into()),
        }
    }

    /// The description text; an absent graph reads as empty.
    pub fn text(&self) -> &str {
        self.graph.as_deref().unwrap_or("")
    }
}

/// Server-to-client messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// A full snapshot for one public key.
    Graph(GraphPush),
    /// A message type this client does not handle.
    Other(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    body: Value,
}

impl ServerMessage {
    /// Decodes a text frame.
    ///
    /// Unknown types decode successfully as [`ServerMessage::Other`]; only
    /// invalid JSON or a malformed `graph` body is an error.
    pub fn decode(text: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(text)?;
        if envelope.kind == GRAPH_PUSH_TYPE {
            Ok(Self::Graph(serde_json::from_value(envelope.body)?))
        } else {
            Ok(Self::Other(envelope.kind))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_graph_wire_format() {
        let msg = ClientMessage::GetGraph(GraphRequest::new("key=", "dir"));
        let value: Value = serde_json::from_str(&msg.encode().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "get_graph", "body": {"public_key": "key=", "directory_id": "dir"}})
        );
    }

    #[test]
    fn test_cancel_graph_wire_format() {
        let msg = ClientMessage::CancelGraph(GraphRequest::new("key=", "dir"));
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "cancel_graph");
        assert_eq!(msg.request().directory_id, "dir");
    }

    #[test]
    fn test_decode_graph_push() {
        let text = r#"{"type":"graph","body":{"public_key":"k","graph":"digraph {}"}}"#;
        match ServerMessage::decode(text).unwrap() {
            ServerMessage::Graph(push) => {
                assert_eq!(push.public_key, "k");
                assert_eq!(push.text(), "digraph {}");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_missing_graph_is_empty() {
        let text = r#"{"type":"graph","body":{"public_key":"k","graph":null}}"#;
        let ServerMessage::Graph(push) = ServerMessage::decode(text).unwrap() else {
            panic!("expected graph push");
        };
        assert_eq!(push.text(), "");
    }

    #[test]
    fn test_decode_other_types() {
        let msg = ServerMessage::decode(r#"{"type":"tip_header","body":{"height":5}}"#).unwrap();
        assert_eq!(msg, ServerMessage::Other("tip_header".to_string()));

        let msg = ServerMessage::decode(r#"{"type":"inv"}"#).unwrap();
        assert_eq!(msg, ServerMessage::Other("inv".to_string()));
    }

    #[test]
    fn test_decode_errors() {
        assert!(ServerMessage::decode("not json").is_err());
        assert!(ServerMessage::decode(r#"{"body":{}}"#).is_err());
        assert!(ServerMessage::decode(r#"{"type":"graph","body":{"graph":"x"}}"#).is_err());
    }
}

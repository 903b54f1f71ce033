// src/network/message.rs
// Wire format: one JSON object per frame, `{type, fromNode, timestamp, ...fields}`.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ledger::{now_millis, Block};
use crate::registry::{NodeId, NodeRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    Handshake {
        #[serde(rename = "nodeId")]
        node_id: NodeId,
    },
    HandshakeAck {
        #[serde(rename = "nodeId")]
        node_id: NodeId,
    },
    NewBlock {
        block: Block,
    },
    NewTransaction {
        transaction: Value,
    },
    ChainRequest,
    ChainResponse {
        chain: Vec<Block>,
    },
    NodeListRequest,
    NodeListResponse {
        nodes: Vec<NodeRecord>,
    },
    Ping,
    Pong,
    /// Any type this node does not understand.
    #[serde(other)]
    Unknown,
}

impl Message {
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Handshake { .. } => "HANDSHAKE",
            Message::HandshakeAck { .. } => "HANDSHAKE_ACK",
            Message::NewBlock { .. } => "NEW_BLOCK",
            Message::NewTransaction { .. } => "NEW_TRANSACTION",
            Message::ChainRequest => "CHAIN_REQUEST",
            Message::ChainResponse { .. } => "CHAIN_RESPONSE",
            Message::NodeListRequest => "NODE_LIST_REQUEST",
            Message::NodeListResponse { .. } => "NODE_LIST_RESPONSE",
            Message::Ping => "PING",
            Message::Pong => "PONG",
            Message::Unknown => "UNKNOWN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub from_node: NodeId,
    pub timestamp: i64,
    pub message: Message,
    /// `type` as it appeared on the wire; kept for logging unknown messages.
    pub raw_type: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("frame is missing '{0}'")]
    MissingField(&'static str),
}

impl Envelope {
    pub fn new(from_node: impl Into<NodeId>, message: Message) -> Self {
        Self {
            from_node: from_node.into(),
            timestamp: now_millis(),
            message,
            raw_type: None,
        }
    }

    pub fn to_value(&self) -> Result<Value, WireError> {
        let mut value = serde_json::to_value(&self.message)?;
        let obj = value.as_object_mut().ok_or(WireError::NotAnObject)?;
        obj.insert("fromNode".into(), Value::String(self.from_node.clone()));
        obj.insert("timestamp".into(), Value::from(self.timestamp));
        Ok(value)
    }

    pub fn encode(&self) -> Result<Bytes, WireError> {
        Ok(Bytes::from(serde_json::to_vec(&self.to_value()?)?))
    }

    pub fn decode(frame: &[u8]) -> Result<Self, WireError> {
        let value: Value = serde_json::from_slice(frame)?;
        let obj = value.as_object().ok_or(WireError::NotAnObject)?;
        let raw_type = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or(WireError::MissingField("type"))?
            .to_string();
        let from_node = obj
            .get("fromNode")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let timestamp = obj.get("timestamp").and_then(Value::as_i64).unwrap_or(0);
        let message = serde_json::from_value(value)?;
        Ok(Self {
            from_node,
            timestamp,
            message,
            raw_type: Some(raw_type),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_fields_sit_beside_type() {
        let env = Envelope::new("node-a", Message::ChainRequest);
        let v = env.to_value().unwrap();
        assert_eq!(v["type"], "CHAIN_REQUEST");
        assert_eq!(v["fromNode"], "node-a");
        assert!(v["timestamp"].is_i64());
    }

    #[test]
    fn new_block_round_trips() {
        let env = Envelope::new("a", Message::NewBlock { block: Block::genesis() });
        let back = Envelope::decode(&env.encode().unwrap()).unwrap();
        assert_eq!(back.message, env.message);
        assert_eq!(back.from_node, "a");
        assert_eq!(back.raw_type.as_deref(), Some("NEW_BLOCK"));
    }

    #[test]
    fn handshake_uses_node_id_field() {
        let v = Envelope::new("a", Message::Handshake { node_id: "a".into() })
            .to_value()
            .unwrap();
        assert_eq!(v["nodeId"], "a");
        assert_eq!(v["type"], "HANDSHAKE");
    }

    #[test]
    fn unknown_type_decodes_as_unknown() {
        let frame = serde_json::to_vec(&json!({"type": "GOSSIP_V2", "fromNode": "x", "timestamp": 1, "extra": 5})).unwrap();
        let env = Envelope::decode(&frame).unwrap();
        assert_eq!(env.message, Message::Unknown);
        assert_eq!(env.raw_type.as_deref(), Some("GOSSIP_V2"));
    }

    #[test]
    fn missing_type_is_an_error() {
        let frame = serde_json::to_vec(&json!({"fromNode": "x"})).unwrap();
        assert!(matches!(Envelope::decode(&frame), Err(WireError::MissingField("type"))));
        assert!(Envelope::decode(b"not json").is_err());
    }
}

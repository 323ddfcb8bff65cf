//! Message protocol exchanged with controlled clients.
//!
//! Every message is a JSON envelope `{ "type": KIND, "payload": {...} }`.
//! Incoming commands also accept the payload fields inline next to `type`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Commands a client may post to the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    SkipWaiting,
    CacheAsset {
        url: String,
        cache_name: Option<String>,
    },
    ClearCache {
        cache_name: Option<String>,
    },
    GetCacheStatus,
}

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown message kind `{0}`")]
    UnknownKind(String),
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
    #[serde(flatten)]
    inline: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheAssetPayload {
    url: String,
    #[serde(default)]
    cache_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClearCachePayload {
    #[serde(default)]
    cache_name: Option<String>,
}

impl ClientCommand {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientCommand::SkipWaiting => "SKIP_WAITING",
            ClientCommand::CacheAsset { .. } => "CACHE_ASSET",
            ClientCommand::ClearCache { .. } => "CLEAR_CACHE",
            ClientCommand::GetCacheStatus => "GET_CACHE_STATUS",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, MessageError> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, MessageError> {
        let envelope: Envelope = serde_json::from_value(value)?;
        let payload = match envelope.payload {
            Value::Null => Value::Object(envelope.inline),
            payload => payload,
        };

        match envelope.kind.as_str() {
            "SKIP_WAITING" => Ok(ClientCommand::SkipWaiting),
            "GET_CACHE_STATUS" => Ok(ClientCommand::GetCacheStatus),
            "CACHE_ASSET" => {
                let CacheAssetPayload { url, cache_name } = serde_json::from_value(payload)?;
                Ok(ClientCommand::CacheAsset { url, cache_name })
            }
            "CLEAR_CACHE" => {
                let ClearCachePayload { cache_name } = serde_json::from_value(payload)?;
                Ok(ClientCommand::ClearCache { cache_name })
            }
            other => Err(MessageError::UnknownKind(other.to_string())),
        }
    }
}

/// Messages the worker sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerMessage {
    CacheUpdated(CacheUpdate),
    OfflineReady { timestamp: i64 },
    CacheStatus(CacheStatusReport),
}

impl WorkerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            WorkerMessage::CacheUpdated(_) => "CACHE_UPDATED",
            WorkerMessage::OfflineReady { .. } => "OFFLINE_READY",
            WorkerMessage::CacheStatus(_) => "CACHE_STATUS",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum CacheUpdate {
    Installed {
        cached: usize,
        total: usize,
    },
    Activated {
        message: String,
        version: String,
        #[serde(rename = "deletedCaches")]
        deleted_caches: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatusReport {
    pub version: String,
    pub state: String,
    pub partitions: Vec<PartitionStatus>,
    pub active_revalidations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionStatus {
    pub name: String,
    pub kind: String,
    pub entries: usize,
    pub bytes: u64,
    pub limit_bytes: u64,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn parses_enveloped_cache_asset() {
        let command = ClientCommand::from_value(json!({
            "type": "CACHE_ASSET",
            "payload": { "url": "/assets/images/bg.png", "cacheName": "game-dynamic-v1.0.0" }
        }))
        .expect("valid command");

        assert_eq!(
            command,
            ClientCommand::CacheAsset {
                url: "/assets/images/bg.png".to_string(),
                cache_name: Some("game-dynamic-v1.0.0".to_string()),
            }
        );
    }

    #[test]
    fn parses_inline_payload_fields() {
        let command =
            ClientCommand::parse(r#"{"type":"CACHE_ASSET","url":"/a.js"}"#).expect("valid");
        assert_eq!(
            command,
            ClientCommand::CacheAsset {
                url: "/a.js".to_string(),
                cache_name: None,
            }
        );
    }

    #[test]
    fn clear_cache_payload_is_optional() {
        let command = ClientCommand::parse(r#"{"type":"CLEAR_CACHE"}"#).expect("valid");
        assert_eq!(command, ClientCommand::ClearCache { cache_name: None });
    }

    #[test]
    fn unit_commands_parse() {
        assert_eq!(
            ClientCommand::parse(r#"{"type":"SKIP_WAITING"}"#).expect("valid"),
            ClientCommand::SkipWaiting
        );
        assert_eq!(
            ClientCommand::parse(r#"{"type":"GET_CACHE_STATUS","payload":null}"#).expect("valid"),
            ClientCommand::GetCacheStatus
        );
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = ClientCommand::parse(r#"{"type":"REBOOT"}"#).expect_err("unknown");
        assert!(matches!(err, MessageError::UnknownKind(kind) if kind == "REBOOT"));
    }

    #[test]
    fn malformed_input_is_rejected() {
        assert!(matches!(
            ClientCommand::parse("not json"),
            Err(MessageError::Malformed(_))
        ));
        assert!(matches!(
            ClientCommand::parse(r#"{"type":"CACHE_ASSET","payload":{}}"#),
            Err(MessageError::Malformed(_))
        ));
    }

    #[test]
    fn worker_messages_serialize_with_envelope() {
        let installed = WorkerMessage::CacheUpdated(CacheUpdate::Installed {
            cached: 3,
            total: 4,
        });
        assert_eq!(
            serde_json::to_value(&installed).expect("serialize"),
            json!({ "type": "CACHE_UPDATED", "payload": { "cached": 3, "total": 4 } })
        );

        let activated = WorkerMessage::CacheUpdated(CacheUpdate::Activated {
            message: "activated".to_string(),
            version: "1.0.0".to_string(),
            deleted_caches: 2,
        });
        assert_eq!(
            serde_json::to_value(&activated).expect("serialize"),
            json!({
                "type": "CACHE_UPDATED",
                "payload": { "message": "activated", "version": "1.0.0", "deletedCaches": 2 }
            })
        );

        let ready = WorkerMessage::OfflineReady { timestamp: 42 };
        assert_eq!(
            serde_json::to_value(&ready).expect("serialize"),
            json!({ "type": "OFFLINE_READY", "payload": { "timestamp": 42 } })
        );
    }
}

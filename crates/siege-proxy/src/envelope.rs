//! JSON-RPC request envelope inspection.
//!
//! The envelope is only ever read: the raw request bytes are what gets
//! forwarded upstream, never a re-serialization of [`RpcEnvelope`].

use serde::{
    Deserialize,
    Deserializer,
};
use serde_json::Value;

/// JSON-RPC request id, either a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

/// A single JSON-RPC request as seen by the proxy.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcEnvelope {
    #[serde(rename = "jsonrpc", default)]
    pub version: String,
    #[serde(default)]
    pub method: String,
    #[serde(default, deserialize_with = "nullable_params")]
    pub params: Vec<Value>,
    #[serde(default)]
    pub id: Option<RequestId>,
}

fn nullable_params<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl RpcEnvelope {
    /// Parses a request body. Anything other than a JSON object with
    /// correctly typed fields is rejected.
    pub fn decode(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// The payload a block import carries, if any.
    pub fn first_param(&self) -> Option<&Value> {
        self.params.first()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_full_envelope() {
        let body = br#"{"jsonrpc":"2.0","method":"eth_blockNumber","params":["0x1", true],"id":7}"#;
        let envelope = RpcEnvelope::decode(body).unwrap();

        assert_eq!(envelope.version, "2.0");
        assert_eq!(envelope.method, "eth_blockNumber");
        assert_eq!(envelope.params.len(), 2);
        assert_eq!(envelope.id, Some(RequestId::Number(7)));
        assert_eq!(envelope.first_param(), Some(&Value::from("0x1")));
    }

    #[test]
    fn test_decode_minimal_object() {
        let envelope = RpcEnvelope::decode(b"{}").unwrap();
        assert_eq!(envelope.method, "");
        assert!(envelope.params.is_empty());
        assert!(envelope.id.is_none());
        assert!(envelope.first_param().is_none());
    }

    #[test]
    fn test_null_params_and_string_id() {
        let body = br#"{"jsonrpc":"2.0","method":"net_version","params":null,"id":"abc","extra":1}"#;
        let envelope = RpcEnvelope::decode(body).unwrap();
        assert!(envelope.params.is_empty());
        assert_eq!(envelope.id, Some(RequestId::String("abc".into())));
    }

    #[test]
    fn test_first_param_keeps_json_type() {
        let body = br#"{"jsonrpc":"2.0","method":"test_importRawBlock","params":[{"raw":"0x"}],"id":1}"#;
        let envelope = RpcEnvelope::decode(body).unwrap();
        assert!(envelope.first_param().unwrap().is_object());
    }

    #[test]
    fn test_rejects_invalid_bodies() {
        assert!(RpcEnvelope::decode(b"not json").is_err());
        assert!(RpcEnvelope::decode(b"").is_err());
        // Batches are not supported.
        assert!(RpcEnvelope::decode(br#"[{"jsonrpc":"2.0","method":"a"}]"#).is_err());
        assert!(RpcEnvelope::decode(br#"{"jsonrpc":"2.0","method":5}"#).is_err());
        assert!(RpcEnvelope::decode(br#"{"method":"a","params":"0x1"}"#).is_err());
    }
}

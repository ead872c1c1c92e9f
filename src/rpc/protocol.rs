//! JSON-RPC 2.0 message types.
//!
//! See: https://www.jsonrpc.org/specification

use serde::{Deserialize, Serialize};
use serde_json::Value;

const VERSION: &str = "2.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Must be exactly "2.0"
    pub jsonrpc: String,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
    /// Absent for notifications, which get no response.
    #[serde(default)]
    pub id: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

impl Request {
    pub fn new(method: &str, params: Option<Value>, id: Value) -> Self {
        Self {
            jsonrpc: VERSION.to_string(),
            method: method.to_string(),
            params,
            id: Some(id),
        }
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.jsonrpc != VERSION {
            return Err("jsonrpc must be \"2.0\"");
        }
        if self.method.is_empty() {
            return Err("method must not be empty");
        }
        Ok(())
    }
}

impl Response {
    pub fn success(id: Value, result: impl Serialize) -> Self {
        Self {
            jsonrpc: VERSION.to_string(),
            result: Some(serde_json::to_value(result).unwrap_or(Value::Null)),
            error: None,
            id,
        }
    }

    pub fn error(id: Value, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: VERSION.to_string(),
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
            id,
        }
    }

    /// Used when the request could not be parsed, so its id is unknown.
    pub fn parse_error() -> Self {
        Self::error(Value::Null, PARSE_ERROR, "Parse error")
    }

    pub fn invalid_request(id: Value) -> Self {
        Self::error(id, INVALID_REQUEST, "Invalid request")
    }

    pub fn method_not_found(id: Value, method: &str) -> Self {
        Self::error(id, METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    pub fn invalid_params(id: Value, details: impl Into<String>) -> Self {
        Self::error(id, INVALID_PARAMS, details.into())
    }

    pub fn internal_error(id: Value, details: impl Into<String>) -> Self {
        Self::error(id, INTERNAL_ERROR, details.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request() {
        let json = r#"{"jsonrpc":"2.0","method":"batch.set","params":{"enabled":false},"id":7}"#;
        let req: Request = serde_json::from_str(json).unwrap();

        assert_eq!(req.method, "batch.set");
        assert_eq!(req.params.unwrap()["enabled"], false);
        assert_eq!(req.id, Some(Value::Number(7.into())));
    }

    #[test]
    fn test_parse_notification() {
        let req: Request = serde_json::from_str(r#"{"jsonrpc":"2.0","method":"ping"}"#).unwrap();
        assert!(req.is_notification());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_wrong_version() {
        let req: Request =
            serde_json::from_str(r#"{"jsonrpc":"1.0","method":"daemon.status","id":1}"#).unwrap();
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_serialize_responses() {
        let ok = serde_json::to_string(&Response::success(Value::from(1), "ok")).unwrap();
        assert!(ok.contains(r#""result":"ok""#));
        assert!(!ok.contains("error"));

        let err = Response::method_not_found(Value::from("abc"), "volumes.eject");
        let err = serde_json::to_string(&err).unwrap();
        assert!(err.contains(r#""code":-32601"#));
        assert!(err.contains("volumes.eject"));
        assert!(!err.contains("result"));
    }
}

//! Reply envelopes handed to the request layer.
//!
//! ```json
//! { "ok": true,  "payload": { ... } }
//! { "ok": false, "error_kind": "DuplicateProject", "error_message": "..." }
//! ```

use serde::Serialize;
use serde_json::Value;

use crate::error::{ErrorKind, LoaderError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Reply {
    /// Success reply. A payload that encodes to `null` yields [`Reply::ok_empty`].
    pub fn ok<T: Serialize>(payload: &T) -> Self {
        match serde_json::to_value(payload) {
            Ok(Value::Null) => Self::ok_empty(),
            Ok(value) => Self {
                ok: true,
                payload: Some(value),
                error_kind: None,
                error_message: None,
            },
            Err(e) => Self::from_error(&LoaderError::UserDefined(format!(
                "Failed to encode reply payload: {}",
                e
            ))),
        }
    }

    pub fn ok_empty() -> Self {
        Self {
            ok: true,
            payload: None,
            error_kind: None,
            error_message: None,
        }
    }

    pub fn from_error(err: &LoaderError) -> Self {
        Self {
            ok: false,
            payload: None,
            error_kind: Some(err.kind()),
            error_message: Some(err.to_string()),
        }
    }

    pub fn from_result<T: Serialize>(result: &Result<T, LoaderError>) -> Self {
        match result {
            Ok(payload) => Self::ok(payload),
            Err(e) => Self::from_error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ok_reply_omits_error_fields() {
        let reply = Reply::ok(&json!({ "uuid_list": ["a"] }));
        let encoded = serde_json::to_value(&reply).unwrap();
        assert_eq!(encoded, json!({ "ok": true, "payload": { "uuid_list": ["a"] } }));
    }

    #[test]
    fn error_reply_carries_kind_and_message() {
        let err = LoaderError::NotFound("project 'Cats' (BOUNDING_BOX)".into());
        let encoded = serde_json::to_value(Reply::from_error(&err)).unwrap();
        assert_eq!(encoded["ok"], json!(false));
        assert_eq!(encoded["error_kind"], json!("NotFound"));
        assert_eq!(
            encoded["error_message"],
            json!("Not found: project 'Cats' (BOUNDING_BOX)")
        );
        assert!(encoded.get("payload").is_none());
    }

    #[test]
    fn from_result_dispatches() {
        let ok: Result<u32, LoaderError> = Ok(3);
        assert_eq!(Reply::from_result(&ok).payload, Some(json!(3)));

        let err: Result<u32, LoaderError> = Err(LoaderError::ConsistencyFault("x".into()));
        let reply = Reply::from_result(&err);
        assert!(!reply.ok);
        assert_eq!(reply.error_kind, Some(ErrorKind::ConsistencyFault));
    }

    #[test]
    fn unit_payload_is_an_empty_ok() {
        let done: Result<(), LoaderError> = Ok(());
        let reply = Reply::from_result(&done);
        assert_eq!(reply, Reply::ok_empty());
        assert_eq!(serde_json::to_value(&reply).unwrap(), json!({ "ok": true }));
    }
}

//! Response shapes for the action protocol.
//!
//! Every request is `{"action": "...", ...}`; every response is either
//! `{"ok": true, ...}` or `{"ok": false, "error": "..."}`.

use serde_json::{json, Map, Value};

/// Well-known error strings returned by the socket layer itself.
pub mod errors {
    pub const INVALID_JSON: &str = "invalid_json";
    pub const INVALID_PAYLOAD: &str = "invalid_payload";
    pub const MISSING_ACTION: &str = "missing_action";
    pub const UNKNOWN_ACTION: &str = "unknown_action";
}

/// Build a success response, merging extra fields into `{"ok": true}`.
pub fn ok_response(extra: Value) -> Value {
    let mut object = Map::new();
    object.insert("ok".to_string(), Value::Bool(true));
    if let Value::Object(fields) = extra {
        for (key, value) in fields {
            object.insert(key, value);
        }
    }
    Value::Object(object)
}

/// Build an error response.
pub fn err_response(error: impl std::fmt::Display) -> Value {
    json!({"ok": false, "error": error.to_string()})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_response_merges_fields() {
        let response = ok_response(json!({"message": "done", "port": 8080}));
        assert_eq!(response["ok"], true);
        assert_eq!(response["message"], "done");
        assert_eq!(response["port"], 8080);
    }

    #[test]
    fn ok_response_tolerates_non_objects() {
        let response = ok_response(json!(null));
        assert_eq!(response, json!({"ok": true}));
    }

    #[test]
    fn err_response_carries_the_message() {
        let response = err_response("container web not connected");
        assert_eq!(response["ok"], false);
        assert_eq!(response["error"], "container web not connected");
    }
}

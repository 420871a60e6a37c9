//! Registry Authentication Header
//!
//! `X-Registry-Auth` carries registry credentials as base64 JSON using the
//! URL-safe alphabet (`+` → `-`, `/` → `_`, padding kept).
//!
//! Accepted credential shapes:
//! - an object with `identitytoken`: sent as is
//! - an object with `auth`: the nested value is composed instead
//! - any other object: `serveraddress` set to the registry, then sent
//! - a string: legacy base64 `user:password`, expanded to
//!   `{username, password, email: null, serveraddress}`

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine;
use serde_json::{json, Map, Value};

use crate::transport::TransportError;

/// Header name
pub const REGISTRY_AUTH_HEADER: &str = "X-Registry-Auth";

/// Build the header value
///
/// # Errors
///
/// `Decode` for a legacy string that is not base64 `user:password`, or a
/// value that is neither an object nor a string.
pub fn compose_auth_header(auth: &Value, registry_addr: Option<&str>) -> Result<String, TransportError> {
    let payload = match auth {
        Value::Object(fields) => {
            if fields.contains_key("identitytoken") {
                Value::Object(fields.clone())
            } else if let Some(nested) = fields.get("auth") {
                return compose_auth_header(nested, registry_addr);
            } else {
                let mut fields = fields.clone();
                if let Some(addr) = registry_addr {
                    fields.insert("serveraddress".to_string(), Value::String(addr.to_string()));
                }
                Value::Object(fields)
            }
        }
        Value::String(legacy) => expand_legacy(legacy, registry_addr)?,
        other => {
            return Err(TransportError::Decode(format!(
                "Registry credentials must be an object or a string, got {}",
                json_type(other)
            )))
        }
    };

    Ok(encode_payload(&payload))
}

/// Credentials from user name and password
#[must_use]
pub fn password_auth(username: &str, password: &str) -> Value {
    json!({ "username": username, "password": password })
}

fn expand_legacy(legacy: &str, registry_addr: Option<&str>) -> Result<Value, TransportError> {
    let decoded = STANDARD
        .decode(legacy.trim())
        .map_err(|e| TransportError::Decode(format!("Legacy registry credentials are not base64: {e}")))?;
    let text = String::from_utf8(decoded)
        .map_err(|_| TransportError::Decode("Legacy registry credentials are not UTF-8".to_string()))?;
    let (username, password) = text.split_once(':').ok_or_else(|| {
        TransportError::Decode("Legacy registry credentials lack a ':' separator".to_string())
    })?;

    let mut fields = Map::new();
    fields.insert("username".into(), Value::String(username.to_string()));
    fields.insert("password".into(), Value::String(password.to_string()));
    fields.insert("email".into(), Value::Null);
    fields.insert(
        "serveraddress".into(),
        registry_addr.map_or(Value::Null, |a| Value::String(a.to_string())),
    );
    Ok(Value::Object(fields))
}

fn encode_payload(payload: &Value) -> String {
    URL_SAFE.encode(payload.to_string())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

//! Response decoding
//!
//! The service answers either in verbose OData (`{"d": {...}}`) or without
//! metadata (entity at the top level, scalars under `"value"`). Only the
//! shapes the upload calls need are handled here.

use super::ClientError;
use crate::upload::FileDescriptor;
use serde_json::Value;

/// Strip the verbose `d` envelope, if present
pub(crate) fn unwrap_verbose(value: Value) -> Value {
    match value {
        Value::Object(mut map) => match map.remove("d") {
            Some(inner) => inner,
            None => Value::Object(map),
        },
        other => other,
    }
}

/// Decode a file entity
pub(crate) fn parse_file(body: Value) -> Result<FileDescriptor, ClientError> {
    serde_json::from_value(unwrap_verbose(body))
        .map_err(|e| ClientError::ResponseError(format!("invalid file entity: {}", e)))
}

/// Decode the offset returned by StartUpload / ContinueUpload
///
/// The value sits under the method name in verbose mode and under `value`
/// otherwise; it is usually a string.
pub(crate) fn parse_offset(body: Value, method: &str) -> Result<u64, ClientError> {
    let body = unwrap_verbose(body);
    let raw = body
        .get(method)
        .or_else(|| body.get("value"))
        .ok_or_else(|| ClientError::ResponseError(format!("{} response has no offset", method)))?;

    match raw {
        Value::String(s) => s
            .parse()
            .map_err(|_| ClientError::ResponseError(format!("invalid {} offset '{}'", method, s))),
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| ClientError::ResponseError(format!("invalid {} offset {}", method, n))),
        other => Err(ClientError::ResponseError(format!(
            "invalid {} offset {}",
            method, other
        ))),
    }
}

/// Build a status error from an error response body
pub(crate) fn status_error(status: u16, body: &str) -> ClientError {
    let parsed = serde_json::from_str::<Value>(body).ok();
    let error = parsed
        .as_ref()
        .and_then(|v| v.get("error").or_else(|| v.get("odata.error")));

    let code = error
        .and_then(|e| e.get("code"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(|m| m.get("value").or(Some(m)))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            let text = body.trim();
            if text.is_empty() {
                format!("HTTP {}", status)
            } else {
                text.chars().take(512).collect()
            }
        });

    ClientError::StatusError {
        status,
        code,
        message,
    }
}

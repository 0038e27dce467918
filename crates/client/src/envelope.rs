//! Decoding of the platform's `{code, message, data}` response envelope.
//!
//! Endpoints answer either with a bare JSON payload or with the payload
//! wrapped in the envelope. A wrapped body can carry a failure code even
//! when the HTTP status is 200.

use serde::de::DeserializeOwned;
use serde_json::Value;

/// Outcome of decoding a JSON body.
#[derive(Debug, PartialEq)]
pub(crate) enum Decoded<T> {
    Data(T),
    Rejected { code: u16, message: String },
}

fn is_envelope(value: &Value) -> bool {
    match value.as_object() {
        Some(obj) => {
            obj.get("code").is_some_and(Value::is_number)
                && (obj.contains_key("data") || obj.contains_key("message") || obj.contains_key("msg"))
        }
        None => false,
    }
}

fn envelope_code(value: &Value) -> Option<i64> {
    value.get("code").and_then(Value::as_i64)
}

fn is_success_code(code: i64) -> bool {
    code == 0 || (200..300).contains(&code)
}

/// Best-effort human-readable message from an error body.
pub(crate) fn error_message(body: &[u8]) -> Option<String> {
    if let Ok(value) = serde_json::from_slice::<Value>(body) {
        for key in ["message", "msg", "error"] {
            if let Some(text) = value.get(key).and_then(Value::as_str) {
                if !text.trim().is_empty() {
                    return Some(text.trim().to_string());
                }
            }
        }
    }
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.chars().take(200).collect())
    }
}

/// Decode `body` as `T`, unwrapping the envelope when present.
pub(crate) fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<Decoded<T>, serde_json::Error> {
    let value: Value = serde_json::from_slice(body)?;
    if !is_envelope(&value) {
        return serde_json::from_value(value).map(Decoded::Data);
    }

    let code = envelope_code(&value).unwrap_or_default();
    if !is_success_code(code) {
        return Ok(rejected(code, &value));
    }
    let data = value.get("data").cloned().unwrap_or(Value::Null);
    serde_json::from_value(data).map(Decoded::Data)
}

/// For endpoints with no meaningful payload: an empty body or any
/// non-envelope body is success.
pub(crate) fn decode_ack(body: &[u8]) -> Decoded<()> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Decoded::Data(());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(value) if is_envelope(&value) => {
            let code = envelope_code(&value).unwrap_or_default();
            if is_success_code(code) {
                Decoded::Data(())
            } else {
                rejected(code, &value)
            }
        }
        _ => Decoded::Data(()),
    }
}

fn rejected<T>(code: i64, value: &Value) -> Decoded<T> {
    let message = ["message", "msg"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .unwrap_or("request rejected")
        .to_string();
    Decoded::Rejected {
        code: u16::try_from(code).unwrap_or(500),
        message,
    }
}

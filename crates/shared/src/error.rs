use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Error body returned by the clinical backend: `{"detail": ...}`.
///
/// `detail` is usually a string, but request validation failures carry a list
/// of `{loc, msg, type}` objects instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub detail: Option<Value>,
}

impl ErrorBody {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: Some(Value::String(detail.into())),
        }
    }

    pub fn message(&self) -> Option<String> {
        self.detail.as_ref().and_then(render_detail)
    }
}

fn render_detail(detail: &Value) -> Option<String> {
    match detail {
        Value::Null => None,
        Value::String(text) if text.trim().is_empty() => None,
        Value::String(text) => Some(text.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items
                .iter()
                .filter_map(|item| match item {
                    Value::Object(fields) => {
                        let msg = fields.get("msg").and_then(Value::as_str)?;
                        let loc = fields
                            .get("loc")
                            .and_then(Value::as_array)
                            .map(|loc| {
                                loc.iter()
                                    .map(|part| match part {
                                        Value::String(s) => s.clone(),
                                        other => other.to_string(),
                                    })
                                    .collect::<Vec<_>>()
                                    .join(".")
                            })
                            .filter(|loc| !loc.is_empty());
                        Some(match loc {
                            Some(loc) => format!("{loc}: {msg}"),
                            None => msg.to_string(),
                        })
                    }
                    other => render_detail(other),
                })
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("; "))
            }
        }
        other => Some(other.to_string()),
    }
}

#[derive(Debug, Error)]
#[error("invalid timestamp '{value}': expected RFC 3339, ISO date-time or YYYY-MM-DD")]
pub struct TimestampError {
    pub value: String,
}

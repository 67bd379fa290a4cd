//! Wire protocol between taskwatch producers and the hook collector.
//!
//! Every telemetry client (clock, capture publisher, CLI) builds requests from
//! these types so the schema cannot drift. The collector remains the authority
//! on validation, but clients validate before sending to fail fast.
//!
//! Framing is one JSON object per line in each direction.

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PROTOCOL_VERSION: u32 = 1;
/// Rendered GIFs travel inline as data URLs, so the ceiling is generous.
pub const MAX_REQUEST_BYTES: usize = 16 * 1024 * 1024;
pub const MAX_RESPONSE_BYTES: usize = 64 * 1024;

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum Method {
    GetHealth,
    Hook,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Request {
    pub protocol_version: u32,
    pub method: Method,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl Response {
    pub fn ok(id: Option<String>, data: Value) -> Self {
        Self {
            ok: true,
            id,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(id: Option<String>, code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            id,
            data: None,
            error: Some(ErrorInfo::new(code, message)),
        }
    }
}

/// The hook being invoked on the collector.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
pub enum HookKind {
    LogWithAttributes,
    LogImage,
    Pause,
    Unpause,
}

impl HookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::LogWithAttributes => "log_with_attributes",
            HookKind::LogImage => "log_image",
            HookKind::Pause => "pause",
            HookKind::Unpause => "unpause",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct HookEnvelope {
    pub event_id: String,
    pub recorded_at: String,
    pub hook: HookKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Display attributes for log entries, e.g. `{"style": {"color": "white"}}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Value>,
    /// `data:image/<ext>;base64,...`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl HookEnvelope {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.event_id.trim().is_empty() {
            return Err(ErrorInfo::new("invalid_event_id", "event_id is required"));
        }
        if self.event_id.len() > 128 {
            return Err(ErrorInfo::new(
                "invalid_event_id",
                "event_id must be 128 characters or fewer",
            ));
        }

        if DateTime::parse_from_rfc3339(&self.recorded_at).is_err() {
            return Err(ErrorInfo::new(
                "invalid_timestamp",
                "recorded_at must be RFC3339",
            ));
        }

        match self.hook {
            HookKind::LogWithAttributes => {
                require_string(&self.content, "content")?;
                require_object(&self.attributes, "attributes")?;
            }
            HookKind::LogImage => {
                require_string(&self.image_url, "image_url")?;
                let url = self.image_url.as_deref().unwrap_or_default();
                if !url.starts_with("data:image/") || !url.contains(";base64,") {
                    return Err(ErrorInfo::new(
                        "invalid_image_url",
                        "image_url must be a base64 data URL",
                    ));
                }
            }
            HookKind::Pause | HookKind::Unpause => {}
        }

        Ok(())
    }
}

pub fn parse_hook(params: Value) -> Result<HookEnvelope, ErrorInfo> {
    let envelope: HookEnvelope = serde_json::from_value(params).map_err(|err| {
        ErrorInfo::new(
            "invalid_params",
            format!("hook payload is invalid JSON: {}", err),
        )
    })?;
    envelope.validate()?;
    Ok(envelope)
}

fn require_string(value: &Option<String>, field: &str) -> Result<(), ErrorInfo> {
    if let Some(candidate) = value {
        if !candidate.trim().is_empty() {
            return Ok(());
        }
    }
    Err(ErrorInfo::new(
        "missing_field",
        format!("{} is required", field),
    ))
}

fn require_object(value: &Option<Value>, field: &str) -> Result<(), ErrorInfo> {
    match value {
        Some(Value::Object(_)) => Ok(()),
        Some(_) => Err(ErrorInfo::new(
            "invalid_field",
            format!("{} must be an object", field),
        )),
        None => Err(ErrorInfo::new(
            "missing_field",
            format!("{} is required", field),
        )),
    }
}

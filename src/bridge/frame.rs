use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ServerFrame {
    Connected {
        session_id: String,
        expires_at: i64,
    },
    Request {
        id: String,
        action: String,
        payload: Value,
    },
    Pong,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct ResponseFrame {
    pub(crate) id: String,
    pub(crate) success: bool,
    #[serde(default)]
    pub(crate) data: Option<Value>,
    #[serde(default)]
    pub(crate) error: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ClientFrame {
    Response(ResponseFrame),
    Ping,
    Unrecognized(String),
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum FrameError {
    #[error("invalid frame json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame has no type discriminator")]
    MissingType,
}

impl ClientFrame {
    pub(crate) fn parse(text: &str) -> Result<Self, FrameError> {
        let value = serde_json::from_str::<Value>(text)?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or(FrameError::MissingType)?;

        match kind.as_str() {
            "response" => Ok(Self::Response(serde_json::from_value(value)?)),
            "ping" => Ok(Self::Ping),
            _ => Ok(Self::Unrecognized(kind)),
        }
    }
}

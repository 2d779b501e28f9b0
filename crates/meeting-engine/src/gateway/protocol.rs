//! Videoserver (Janus) wire types.
//!
//! Requests are JSON POSTs with a `janus` verb, a `transaction` id and the
//! `apisecret`. Plugin requests travel in `body`, media negotiation in
//! `jsep`. Ids may come back as numbers or strings and are kept as strings.

use crate::errors::GatewayError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Plugin mixing the audio of every participant.
pub const AUDIO_PLUGIN: &str = "janus.plugin.audiobridge";

/// Plugin forwarding published video and screen streams.
pub const VIDEO_PLUGIN: &str = "janus.plugin.videoroom";

/// Audiobridge error code for an unknown room.
pub const AUDIO_NO_SUCH_ROOM: i64 = 485;

/// Videoroom error code for an unknown room.
pub const VIDEO_NO_SUCH_ROOM: i64 = 426;

/// Top-level protocol verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Create,
    Attach,
    Message,
    Detach,
    Destroy,
}

impl Verb {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Verb::Create => "create",
            Verb::Attach => "attach",
            Verb::Message => "message",
            Verb::Detach => "detach",
            Verb::Destroy => "destroy",
        }
    }
}

/// SDP direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsepType {
    Offer,
    Answer,
}

/// Session description carried next to a plugin request or response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Jsep {
    #[serde(rename = "type")]
    pub kind: JsepType,
    pub sdp: String,
}

impl Jsep {
    #[must_use]
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: JsepType::Offer,
            sdp: sdp.into(),
        }
    }

    #[must_use]
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: JsepType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// Outgoing request body.
#[derive(Debug, Serialize)]
pub struct GatewayRequest<'a> {
    pub janus: &'static str,
    pub transaction: String,
    pub apisecret: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plugin: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jsep: Option<&'a Jsep>,
}

/// Id returned as either a JSON number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum WireId {
    Number(u64),
    Text(String),
}

impl WireId {
    #[must_use]
    pub fn into_string(self) -> String {
        match self {
            WireId::Number(n) => n.to_string(),
            WireId::Text(s) => s,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdData {
    pub id: WireId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PluginData {
    #[serde(default)]
    pub plugin: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub code: i64,
    #[serde(default)]
    pub reason: String,
}

/// Any videoserver answer.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayResponse {
    pub janus: String,
    #[serde(default)]
    pub transaction: Option<String>,
    #[serde(default)]
    pub data: Option<IdData>,
    #[serde(default)]
    pub plugindata: Option<PluginData>,
    #[serde(default)]
    pub jsep: Option<Jsep>,
    #[serde(default)]
    pub error: Option<ErrorBody>,
}

impl GatewayResponse {
    /// Map `error` answers and plugin-level errors to [`GatewayError::Rejected`].
    ///
    /// `success` and `ack` pass through; anything else is invalid.
    pub fn check(self, request: &str) -> Result<Self, GatewayError> {
        match self.janus.as_str() {
            "error" => {
                let (code, reason) = self
                    .error
                    .map_or((0, "unspecified error".to_string()), |e| (e.code, e.reason));
                Err(GatewayError::Rejected {
                    request: request.to_string(),
                    code,
                    reason,
                })
            }
            "success" | "ack" => match self.plugin_error() {
                Some((code, reason)) => Err(GatewayError::Rejected {
                    request: request.to_string(),
                    code,
                    reason,
                }),
                None => Ok(self),
            },
            other => Err(GatewayError::InvalidResponse {
                request: request.to_string(),
                reason: format!("unexpected janus status '{other}'"),
            }),
        }
    }

    /// Id from a create/attach answer.
    pub fn id(self, request: &str) -> Result<String, GatewayError> {
        self.data
            .map(|data| data.id.into_string())
            .ok_or_else(|| GatewayError::InvalidResponse {
                request: request.to_string(),
                reason: "missing data.id".to_string(),
            })
    }

    fn plugin_error(&self) -> Option<(i64, String)> {
        let data = &self.plugindata.as_ref()?.data;
        let code = data.get("error_code")?.as_i64()?;
        let reason = data
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Some((code, reason))
    }
}

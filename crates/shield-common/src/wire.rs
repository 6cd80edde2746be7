//! Detection service wire format.
//!
//! Request and response bodies as the service expects them. Conversion to and
//! from overlay types happens in the orchestrator.

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Detect every label the service knows.
pub const DETECT_ALL: &str = "ALL";

/// A previously detected entity passed as a hint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownEntity {
    pub entity: String,
    pub label: SmolStr,
}

/// What a modifier asks the service to do.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModifierAction {
    #[serde(rename = "ignore")]
    Ignore,
    #[serde(rename = "string-mask")]
    StringMask,
}

/// A user override sent along with a detection request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiModifier {
    pub action: ModifierAction,
    pub entity: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub pii_type: Option<SmolStr>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiLabels {
    pub detect: Vec<SmolStr>,
}

impl Default for PiiLabels {
    fn default() -> Self {
        Self {
            detect: vec![SmolStr::new_static(DETECT_ALL)],
        }
    }
}

/// Body of `POST /text/mask` and `POST /sessions/{id}/text/mask`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MaskRequest {
    pub text: Vec<String>,
    pub pii_labels: PiiLabels,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub known_entities: Vec<KnownEntity>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub modifiers: Vec<ApiModifier>,
}

/// One occurrence as character offsets into the submitted text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occurrence {
    pub start_idx: usize,
    pub end_idx: usize,
}

/// An entity found by the service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedEntity {
    pub label: SmolStr,
    #[serde(rename = "type")]
    pub pii_type: SmolStr,
    pub raw_text: String,
    #[serde(default)]
    pub occurrences: Vec<Occurrence>,
}

/// Response of the mask endpoints: masked text and entities per input text.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskResponse {
    #[serde(default)]
    pub text: Vec<String>,
    #[serde(default)]
    pub pii: Vec<Vec<DetectedEntity>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl MaskResponse {
    /// Entities for the first submitted text.
    pub fn first_entities(&self) -> &[DetectedEntity] {
        self.pii.first().map(Vec::as_slice).unwrap_or_default()
    }
}

/// Body of `POST /text/unmask`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UnmaskRequest {
    pub text: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<DetectedEntity>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnmaskResponse {
    #[serde(default)]
    pub text: Vec<String>,
}

/// Body of `POST /sessions`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CreateSessionRequest {
    pub ttl: String,
    pub description: String,
}

/// A server-side masking session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiSession {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}

/// Input to one detection call, independent of transport.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DetectionRequest {
    pub text: String,
    pub known_entities: Vec<KnownEntity>,
    pub modifiers: Vec<ApiModifier>,
    pub session_id: Option<String>,
}

impl DetectionRequest {
    pub fn to_mask_request(&self) -> MaskRequest {
        MaskRequest {
            text: vec![self.text.clone()],
            pii_labels: PiiLabels::default(),
            known_entities: self.known_entities.clone(),
            modifiers: self.modifiers.clone(),
        }
    }
}

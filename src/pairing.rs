use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use serde_json::Value;

/// Seconds a pairing artifact stays valid before the next refresh.
pub const PAIRING_TTL_SECONDS: u32 = 30;

/// Shortest base64 payload accepted as a real pairing image. Rejects
/// truncated or placeholder values the gateway sometimes returns.
const MIN_PAYLOAD_LEN: usize = 100;

const DATA_URI_PREFIX: &str = "data:image";

/// Pairing artifact and countdown state exposed to the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PairingStatus {
    /// Normalized `data:image/png;base64,` payload, when one is live.
    pub image_data: Option<String>,
    /// User-facing countdown, reset to the TTL on every accepted artifact.
    pub expires_in_seconds: u32,
}

/// Result of probing a gateway payload for a pairing image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedArtifact {
    /// Payload carried a valid image, normalized to a data URI.
    Recognized(String),
    /// Payload had no usable image, or the candidate failed validation.
    Unrecognized,
}

/// Probes a gateway connect/pairing payload and normalizes its image.
///
/// Accepted shapes: a bare string, `{base64}`, `{code}`, `{qrcode: string}`
/// and `{qrcode: {base64|code}}`. The gateway does not guarantee any one of
/// them across versions.
pub fn parse_artifact(payload: &Value) -> ParsedArtifact {
    let Some(raw) = extract_image_data(payload) else {
        return ParsedArtifact::Unrecognized;
    };
    match normalize_image_data(&raw) {
        Some(image) => ParsedArtifact::Recognized(image),
        None => ParsedArtifact::Unrecognized,
    }
}

/// Pulls the candidate image string out of any accepted payload shape.
pub fn extract_image_data(payload: &Value) -> Option<String> {
    match payload {
        Value::String(raw) => Some(raw.clone()),
        Value::Object(fields) => {
            if let Some(raw) = fields.get("base64").and_then(Value::as_str) {
                return Some(raw.to_owned());
            }
            if let Some(raw) = fields.get("code").and_then(Value::as_str) {
                return Some(raw.to_owned());
            }
            match fields.get("qrcode") {
                Some(Value::String(raw)) => Some(raw.clone()),
                Some(Value::Object(inner)) => inner
                    .get("base64")
                    .and_then(Value::as_str)
                    .or_else(|| inner.get("code").and_then(Value::as_str))
                    .map(str::to_owned),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Validates a raw candidate and normalizes it to a png data URI.
///
/// Strings already prefixed `data:image` pass through unchanged when they
/// carry a non-empty `base64,` payload. Anything else must survive
/// [`is_valid_payload`] after whitespace stripping.
pub fn normalize_image_data(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.starts_with(DATA_URI_PREFIX) {
        let (_, payload) = trimmed.split_once("base64,")?;
        if payload.trim().is_empty() {
            return None;
        }
        return Some(trimmed.to_owned());
    }

    let compact: String = trimmed.chars().filter(|ch| !ch.is_whitespace()).collect();
    if !is_valid_payload(&compact) {
        return None;
    }
    Some(format!("data:image/png;base64,{compact}"))
}

/// Accepts only strings long enough and shaped like real base64 output:
/// length a multiple of 4, at least [`MIN_PAYLOAD_LEN`], decodable with
/// standard padding.
pub fn is_valid_payload(candidate: &str) -> bool {
    candidate.len() >= MIN_PAYLOAD_LEN
        && candidate.len() % 4 == 0
        && STANDARD.decode(candidate).is_ok()
}

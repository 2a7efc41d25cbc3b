use serde_json::Value;

/// Normalized connection state reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Open,
    Closed,
    Connecting,
}

/// Connection status payload from a `connection.update` frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub state: GatewayState,
    /// Phone bound to the session, when the gateway reports one.
    pub phone: Option<String>,
    /// Opaque gateway-side instance id, when present in the payload.
    pub remote_instance_id: Option<String>,
}

/// Inbound message pushed by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub from: String,
    pub text: String,
}

/// One recognized gateway event.
#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    Status(StatusUpdate),
    /// Raw pairing payload; shape varies, so normalization happens later.
    Pairing(Value),
    Message(InboundMessage),
}

/// Tagged parse result for an inbound channel frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedFrame {
    Recognized(GatewayEvent),
    Unrecognized,
}

/// Parses one text frame from the event channel.
///
/// Frames are `{"event": <name>, "data": <payload>}` envelopes. Unknown
/// event names and malformed payloads come back `Unrecognized`; the caller
/// drops them without failing the channel.
pub fn parse_frame(raw: &str) -> ParsedFrame {
    let Ok(value) = serde_json::from_str::<Value>(raw) else {
        return ParsedFrame::Unrecognized;
    };
    let Some(event) = value.get("event").and_then(Value::as_str) else {
        return ParsedFrame::Unrecognized;
    };
    let data = value.get("data").cloned().unwrap_or(Value::Null);

    match event {
        "connection.update" => match parse_status(&data) {
            Some(update) => ParsedFrame::Recognized(GatewayEvent::Status(update)),
            None => ParsedFrame::Unrecognized,
        },
        "qrcode.updated" => ParsedFrame::Recognized(GatewayEvent::Pairing(data)),
        "messages.upsert" => match parse_message(&data) {
            Some(message) => ParsedFrame::Recognized(GatewayEvent::Message(message)),
            None => ParsedFrame::Unrecognized,
        },
        _ => ParsedFrame::Unrecognized,
    }
}

fn parse_status(data: &Value) -> Option<StatusUpdate> {
    let raw_state = data
        .get("state")
        .and_then(Value::as_str)
        .or_else(|| data.get("status").and_then(Value::as_str))
        .or_else(|| data.get("connection").and_then(Value::as_str))?;
    let state = normalize_state(raw_state)?;

    let phone = data
        .get("phone")
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .map(str::to_owned)
        .or_else(|| {
            data.get("ownerJid")
                .and_then(Value::as_str)
                .map(phone_from_jid)
                .filter(|value| !value.is_empty())
        });
    let remote_instance_id = data
        .get("instanceId")
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .map(str::to_owned);

    Some(StatusUpdate {
        state,
        phone,
        remote_instance_id,
    })
}

/// Folds the gateway's loose state vocabulary into three values.
pub fn normalize_state(raw: &str) -> Option<GatewayState> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "open" | "connected" | "online" => Some(GatewayState::Open),
        "close" | "closed" | "disconnected" | "disconnect" | "offline" | "logout" => {
            Some(GatewayState::Closed)
        }
        "connecting" | "pending" | "qrcode" | "qr" | "pairing" => Some(GatewayState::Connecting),
        _ => None,
    }
}

/// Strips the server and device suffixes from a jid.
pub fn phone_from_jid(jid: &str) -> String {
    jid.split('@')
        .next()
        .unwrap_or(jid)
        .split(':')
        .next()
        .unwrap_or(jid)
        .trim()
        .to_owned()
}

fn parse_message(data: &Value) -> Option<InboundMessage> {
    // The gateway delivers either a single message object or a batch.
    let candidates: Vec<&Value> = match data {
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };

    for message in candidates {
        if message
            .pointer("/key/fromMe")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            continue;
        }

        let text = message
            .pointer("/message/conversation")
            .and_then(Value::as_str)
            .or_else(|| {
                message
                    .pointer("/message/extendedTextMessage/text")
                    .and_then(Value::as_str)
            })
            .filter(|value| !value.is_empty());
        let Some(text) = text else {
            continue;
        };

        let from = message
            .pointer("/key/remoteJid")
            .and_then(Value::as_str)
            .map(phone_from_jid)
            .filter(|value| !value.is_empty());
        let Some(from) = from else {
            continue;
        };

        return Some(InboundMessage {
            from,
            text: text.to_owned(),
        });
    }

    None
}

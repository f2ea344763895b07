use serde::{Deserialize, Serialize};

/// One inbound request frame, decoded from a single JSON object on the
/// wire. Field names are lowercase per the original protocol (not the
/// `camelCase` used by [`crate::Event`]).
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub authlevel: u8,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub returnaddr: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub username: String,
}

/// The `key` of a `status` frame: either `ok` or `error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    Ok,
    Error,
}

/// One outbound frame. Serializes with a `type` field matching the
/// three shapes the gateway ever sends: `status`, `response`, `event`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Status {
        id: i64,
        key: FrameKind,
        payload: serde_json::Value,
    },
    Response {
        id: i64,
        key: String,
        payload: serde_json::Value,
    },
    Event {
        id: i64,
        key: String,
        #[serde(default, skip_serializing_if = "is_zero_u8")]
        authlevel: u8,
        payload: serde_json::Value,
        returnaddr: String,
        username: String,
    },
}

fn is_zero_u8(v: &u8) -> bool {
    *v == 0
}

impl Frame {
    pub fn status_ok(id: i64, message: impl Into<String>) -> Self {
        Frame::Status {
            id,
            key: FrameKind::Ok,
            payload: serde_json::Value::String(message.into()),
        }
    }

    pub fn status_error(id: i64, message: impl Into<String>) -> Self {
        Frame::Status {
            id,
            key: FrameKind::Error,
            payload: serde_json::Value::String(message.into()),
        }
    }

    pub fn response(id: i64, key: impl Into<String>, payload: serde_json::Value) -> Self {
        Frame::Response {
            id,
            key: key.into(),
            payload,
        }
    }

    pub fn event(event: &crate::Event) -> Self {
        Frame::Event {
            id: i64::try_from(event.id).unwrap_or(i64::MAX),
            key: event.topic.clone(),
            authlevel: event.auth_level,
            payload: event.payload.clone(),
            returnaddr: event.return_addr.clone(),
            username: event.username.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_missing_fields() {
        let req: Request = serde_json::from_str(r#"{"type":"subscribe","key":"foo"}"#).unwrap();
        assert_eq!(req.id, 0);
        assert_eq!(req.authlevel, 0);
        assert_eq!(req.kind, "subscribe");
        assert_eq!(req.key, "foo");
        assert_eq!(req.returnaddr, "");
    }

    #[test]
    fn status_frame_serializes_with_lowercase_key() {
        let frame = Frame::status_ok(5, "successfully published");
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["key"], "ok");
        assert_eq!(json["payload"], "successfully published");
    }

    #[test]
    fn event_frame_carries_originating_fields() {
        let event = crate::Event {
            id: 9,
            topic: "foo.bar".to_owned(),
            auth_level: 3,
            return_addr: "reply.1".to_owned(),
            payload: serde_json::json!({"x": 1}),
            username: "alice".to_owned(),
            session_id: 0,
        };
        let frame = Frame::event(&event);
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "event");
        assert_eq!(json["key"], "foo.bar");
        assert_eq!(json["authlevel"], 3);
        assert_eq!(json["returnaddr"], "reply.1");
        assert_eq!(json["username"], "alice");
    }
}

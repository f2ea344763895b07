use serde::{Deserialize, Serialize};

/// Numeric privilege level. Smaller is more privileged: `0` is the
/// superuser level, `255` the "not set" sentinel.
pub type AuthLevel = u8;

pub const SUPERUSER: AuthLevel = 0;
pub const UNSET: AuthLevel = 255;

/// An immutable published message.
///
/// `id` is a monotonic timestamp assigned at creation (see
/// `susi_core::ids`). Fields left at their zero value are omitted on the
/// wire, matching the original protocol's sparse JSON encoding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    #[serde(default, skip_serializing_if = "is_zero_u64")]
    pub id: u64,
    pub topic: String,
    #[serde(rename = "authLevel", default, skip_serializing_if = "is_zero_u8")]
    pub auth_level: AuthLevel,
    #[serde(
        rename = "returnAddr",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub return_addr: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(rename = "sessionId", default, skip_serializing_if = "is_zero_u64")]
    pub session_id: u64,
}

fn is_zero_u64(v: &u64) -> bool {
    *v == 0
}

fn is_zero_u8(v: &u8) -> bool {
    *v == 0
}

impl Event {
    /// Build a new event on `topic` with the given payload; all other
    /// fields default to their zero value.
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: 0,
            topic: topic.into(),
            auth_level: 0,
            return_addr: String::new(),
            payload,
            username: String::new(),
            session_id: 0,
        }
    }

    /// True if a subscription requiring `required` (its own `authLevel`,
    /// the minimum privilege floor it demands of inbound events) should
    /// receive this event. Per the protocol: `required <= event.authLevel`
    /// (recall: smaller number = more privileged, so this event must be
    /// at least as unprivileged as the floor allows).
    pub fn satisfies(&self, required: AuthLevel) -> bool {
        required <= self.auth_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_fields_are_omitted_on_wire() {
        let event = Event::new("foo", serde_json::Value::Null);
        let json = serde_json::to_value(&event).unwrap();
        let obj = json.as_object().unwrap();
        assert!(!obj.contains_key("id"));
        assert!(!obj.contains_key("authLevel"));
        assert!(!obj.contains_key("returnAddr"));
        assert!(!obj.contains_key("payload"));
        assert!(!obj.contains_key("username"));
        assert!(!obj.contains_key("sessionId"));
        assert_eq!(obj.get("topic").unwrap(), "foo");
    }

    #[test]
    fn nonzero_fields_round_trip() {
        let event = Event {
            id: 42,
            topic: "foo".to_owned(),
            auth_level: 3,
            return_addr: "reply.abc".to_owned(),
            payload: serde_json::json!({"a": 1}),
            username: "alice".to_owned(),
            session_id: 7,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }

    #[test]
    fn satisfies_is_auth_inverted() {
        let event = Event {
            auth_level: 3,
            ..Event::new("t", serde_json::Value::Null)
        };
        // sub floor <= event level: 3<=3 ok, 2<=3 ok, 5<=3 rejected.
        assert!(event.satisfies(3));
        assert!(event.satisfies(2));
        assert!(!event.satisfies(5));
    }
}

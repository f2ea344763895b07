//! Request/response layered on top of the broker via ephemeral reply
//! topics.
//!
//! There is no timeout in [`request`] — this mirrors the original
//! implementation exactly and is called out in the project's design
//! notes as something a caller embedding this crate in a production
//! service should wrap with its own deadline (see [`request_with_timeout`]
//! for a ready-made wrapper).

use serde_json::{Value, json};
use susi_protocol::{AuthLevel, Event};
use thiserror::Error;
use uuid::Uuid;

use crate::broker::BrokerHandle;

/// The outcome of parsing a responder's answer payload, per the
/// `{error, data}` contract `answer`/`answer_error` produce.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RequestError {
    /// The responder called `answer_error` with this message.
    #[error("{0}")]
    Responder(String),
    /// The reply payload wasn't a `{error, data}` shape request/answer
    /// expects.
    #[error("malformed answer")]
    MalformedAnswer,
    /// No reply arrived (broker reset mid-request, or it timed out).
    #[error("no responder answered")]
    NoResponse,
}

fn parse_answer(payload: &Value) -> Result<Value, RequestError> {
    match (payload.get("error"), payload.get("data")) {
        (Some(Value::Bool(false)), Some(data)) => Ok(data.clone()),
        (Some(Value::Bool(true)), Some(Value::String(message))) => {
            Err(RequestError::Responder(message.clone()))
        }
        _ => Err(RequestError::MalformedAnswer),
    }
}

/// Publish `payload` to `topic` and wait, with no timeout, for a single
/// reply on a freshly generated reply topic (subscribed at authLevel 0).
/// Returns `None` if the reply channel closes before an answer arrives
/// (the broker was reset, or the process is shutting down).
pub async fn request(broker: &BrokerHandle, topic: impl Into<String>, payload: serde_json::Value) -> Option<Event> {
    let reply_topic = format!("reply.{}", Uuid::new_v4());
    let mut subscribed = broker.subscribe(&reply_topic, 0).await;

    let event = Event {
        return_addr: reply_topic,
        auth_level: 0,
        ..Event::new(topic, payload)
    };
    broker.publish(event).await;

    let reply = subscribed.events.recv().await;
    subscribed.close.close().await;
    reply
}

/// [`request`] with an explicit deadline. A production caller wrapping
/// this crate should prefer this over the bare `request` helper.
pub async fn request_with_timeout(
    broker: &BrokerHandle,
    topic: impl Into<String>,
    payload: serde_json::Value,
    timeout: std::time::Duration,
) -> Option<Event> {
    tokio::time::timeout(timeout, request(broker, topic, payload))
        .await
        .ok()
        .flatten()
}

/// Publish, await one reply, and unpack its `{error, data}` payload into a
/// `Result`. No timeout — see [`request_value_with_timeout`].
pub async fn request_value(
    broker: &BrokerHandle,
    topic: impl Into<String>,
    payload: serde_json::Value,
) -> Result<Value, RequestError> {
    let reply = request(broker, topic, payload).await.ok_or(RequestError::NoResponse)?;
    parse_answer(&reply.payload)
}

/// [`request_value`] bounded by `timeout`.
pub async fn request_value_with_timeout(
    broker: &BrokerHandle,
    topic: impl Into<String>,
    payload: serde_json::Value,
    timeout: std::time::Duration,
) -> Result<Value, RequestError> {
    match tokio::time::timeout(timeout, request(broker, topic, payload)).await {
        Ok(Some(reply)) => parse_answer(&reply.payload),
        Ok(None) | Err(_) => Err(RequestError::NoResponse),
    }
}

/// Reply to `req` with a success payload. No-op if `req.returnAddr` is
/// empty (the caller didn't ask for an answer).
pub async fn answer(broker: &BrokerHandle, req: &Event, data: serde_json::Value) {
    reply(broker, req, json!({"error": false, "data": data})).await;
}

/// Reply to `req` with an error payload. No-op if `req.returnAddr` is
/// empty.
pub async fn answer_error(broker: &BrokerHandle, req: &Event, message: impl Into<String>) {
    reply(
        broker,
        req,
        json!({"error": true, "data": message.into()}),
    )
    .await;
}

async fn reply(broker: &BrokerHandle, req: &Event, payload: serde_json::Value) {
    if req.return_addr.is_empty() {
        return;
    }
    let event = Event {
        auth_level: req.auth_level,
        ..Event::new(req.return_addr.clone(), payload)
    };
    broker.publish(event).await;
}

/// Build a bare responder-facing request event (used by broker
/// integrations like the session registry when constructing their own
/// internal requests, rather than receiving one off the wire).
pub fn internal_request(topic: impl Into<String>, payload: serde_json::Value, auth_level: AuthLevel) -> Event {
    Event {
        auth_level,
        ..Event::new(topic, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker;

    #[tokio::test]
    async fn answer_is_noop_without_return_addr() {
        let broker = broker::spawn();
        let req = Event::new("some.topic", serde_json::Value::Null);
        // should not hang or panic
        answer(&broker, &req, json!({"ok": true})).await;
    }

    #[tokio::test]
    async fn request_receives_answer_from_responder() {
        let broker = broker::spawn();

        // simulate a responder: subscribe to the request topic, answer
        // whatever comes in.
        let responder_broker = broker.clone();
        let mut responder_sub = broker.subscribe("echo", 0).await;
        tokio::spawn(async move {
            if let Some(req) = responder_sub.events.recv().await {
                answer(&responder_broker, &req, json!({"echoed": req.payload})).await;
            }
        });

        let reply = request(&broker, "echo", json!({"x": 1})).await;
        let reply = reply.expect("expected an answer");
        assert_eq!(reply.payload["error"], false);
        assert_eq!(reply.payload["data"]["echoed"]["x"], 1);
    }

    #[tokio::test]
    async fn request_with_timeout_returns_none_when_nobody_answers() {
        let broker = broker::spawn();
        let reply = request_with_timeout(
            &broker,
            "nobody.listens",
            serde_json::Value::Null,
            std::time::Duration::from_millis(50),
        )
        .await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn request_value_returns_data_on_success() {
        let broker = broker::spawn();
        let responder_broker = broker.clone();
        let mut responder_sub = broker.subscribe("echo", 0).await;
        tokio::spawn(async move {
            if let Some(req) = responder_sub.events.recv().await {
                answer(&responder_broker, &req, json!({"echoed": req.payload})).await;
            }
        });

        let data = request_value(&broker, "echo", json!({"x": 1})).await.unwrap();
        assert_eq!(data["echoed"]["x"], 1);
    }

    #[tokio::test]
    async fn request_value_surfaces_responder_error_message() {
        let broker = broker::spawn();
        let responder_broker = broker.clone();
        let mut responder_sub = broker.subscribe("fails", 0).await;
        tokio::spawn(async move {
            if let Some(req) = responder_sub.events.recv().await {
                answer_error(&responder_broker, &req, "bad credentials").await;
            }
        });

        let err = request_value(&broker, "fails", Value::Null).await.unwrap_err();
        assert_eq!(err, RequestError::Responder("bad credentials".to_owned()));
    }

    #[tokio::test]
    async fn request_value_rejects_malformed_answer_shape() {
        let broker = broker::spawn();
        let responder_broker = broker.clone();
        let mut responder_sub = broker.subscribe("garbled", 0).await;
        tokio::spawn(async move {
            if let Some(req) = responder_sub.events.recv().await {
                reply(&responder_broker, &req, json!({"not": "the right shape"})).await;
            }
        });

        let err = request_value(&broker, "garbled", Value::Null).await.unwrap_err();
        assert_eq!(err, RequestError::MalformedAnswer);
    }

    #[tokio::test]
    async fn request_value_with_timeout_errors_when_nobody_answers() {
        let broker = broker::spawn();
        let err = request_value_with_timeout(
            &broker,
            "nobody.listens",
            Value::Null,
            std::time::Duration::from_millis(50),
        )
        .await
        .unwrap_err();
        assert_eq!(err, RequestError::NoResponse);
    }
}

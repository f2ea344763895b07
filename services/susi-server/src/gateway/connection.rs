//! Per-connection command loop: decode a stream of JSON request objects,
//! dispatch by `type`, reply through the framed sender.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::json;
use susi_core::broker::{BrokerHandle, CloseHandle};
use susi_core::state::StateHandle;
use susi_core::request;
use susi_protocol::{Event, Frame, Request};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tracing::{debug, info, warn};

use super::auth::enforce_floor;
use super::framed_sender::FramedSender;

/// Round-trip budget for the `login` command's `authentification::checkuser`
/// request. The broker-level `request()` helper has no timeout (a bare
/// reflection of the original protocol); a login attempt against a
/// deployment with no responder attached would otherwise hang the
/// connection forever, so the gateway itself bounds this one call site.
const LOGIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ConnectionContext {
    pub broker: BrokerHandle,
    pub state: StateHandle,
    pub session_authlevel: u8,
    pub session_id: u64,
}

/// Drive one connection until EOF or a decode error. `reader` yields the
/// newline-delimited request stream; `sender` is this connection's
/// already-spawned framed sender.
pub async fn run<R>(reader: R, sender: FramedSender, ctx: ConnectionContext)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut username = "anonymous".to_owned();
    let mut authlevel = ctx.session_authlevel;
    let mut subscriptions: HashMap<String, CloseHandle> = HashMap::new();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) if !line.trim().is_empty() => line,
            Ok(Some(_)) => continue,
            Ok(None) => break,
            Err(err) => {
                warn!(error = %err, "connection read error");
                break;
            }
        };

        let req: Request = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(err) => {
                debug!(error = %err, "malformed request, closing connection");
                break;
            }
        };

        dispatch(
            &ctx,
            &sender,
            &mut subscriptions,
            &mut username,
            &mut authlevel,
            req,
        )
        .await;
    }

    for (_, close) in subscriptions {
        close.close().await;
    }
    sender.close().await;
    info!(session_id = ctx.session_id, "connection closed");
}

async fn dispatch(
    ctx: &ConnectionContext,
    sender: &FramedSender,
    subscriptions: &mut HashMap<String, CloseHandle>,
    username: &mut String,
    authlevel: &mut u8,
    req: Request,
) {
    let effective_authlevel = enforce_floor(req.authlevel, *authlevel);

    match req.kind.as_str() {
        "subscribe" => {
            if subscriptions.contains_key(&req.key) {
                sender
                    .send_json(frame_json(Frame::status_error(
                        req.id,
                        format!("you are allready subscribed to {}", req.key),
                    )))
                    .await;
                return;
            }
            let subscribed = ctx.broker.subscribe(req.key.clone(), effective_authlevel).await;
            subscriptions.insert(req.key.clone(), subscribed.close);
            spawn_pump(subscribed.events, sender.clone());
            sender
                .send_json(frame_json(Frame::status_ok(
                    req.id,
                    format!("successfully subscribed to {}", req.key),
                )))
                .await;
        }
        "unsubscribe" => match subscriptions.remove(&req.key) {
            Some(close) => {
                close.close().await;
                sender
                    .send_json(frame_json(Frame::status_ok(req.id, "unsubscribed")))
                    .await;
            }
            None => {
                sender
                    .send_json(frame_json(Frame::status_error(
                        req.id,
                        format!("you are not subscribed to {}", req.key),
                    )))
                    .await;
            }
        },
        "publish" => {
            let event = Event {
                auth_level: effective_authlevel,
                return_addr: req.returnaddr.clone(),
                username: username.clone(),
                session_id: ctx.session_id,
                ..Event::new(req.key.clone(), req.payload.clone())
            };
            let matched = ctx.broker.publish(event).await;
            if matched {
                sender
                    .send_json(frame_json(Frame::status_ok(req.id, "successfully published")))
                    .await;
            } else {
                sender
                    .send_json(frame_json(Frame::status_error(
                        req.id,
                        format!("nobody is subscribed to {}", req.key),
                    )))
                    .await;
            }
        }
        "set" | "push" | "enqueue" => {
            let result = match req.kind.as_str() {
                "set" => ctx.state.set(req.key.clone(), req.payload.clone()).await,
                _ => ctx.state.push(req.key.clone(), req.payload.clone()).await,
            };
            match result {
                Ok(()) => {
                    sender
                        .send_json(frame_json(Frame::status_ok(
                            req.id,
                            format!("successfully saved data to {}", req.key),
                        )))
                        .await;
                }
                Err(err) => {
                    sender
                        .send_json(frame_json(Frame::status_error(req.id, err.to_string())))
                        .await;
                }
            }
        }
        "get" | "pop" | "dequeue" => {
            let value = match req.kind.as_str() {
                "get" => ctx.state.get(req.key.clone()).await.unwrap_or(serde_json::Value::Null),
                "pop" => ctx.state.pop(req.key.clone()).await,
                _ => ctx.state.dequeue(req.key.clone()).await,
            };
            sender
                .send_json(frame_json(Frame::response(req.id, req.key.clone(), value)))
                .await;
        }
        "unset" => {
            ctx.state.unset(req.key.clone()).await;
            sender.send_json(frame_json(Frame::status_ok(req.id, "ok"))).await;
        }
        "login" => {
            let result = request::request_value_with_timeout(
                &ctx.broker,
                "authentification::checkuser",
                json!({"username": req.key, "password": req.payload}),
                LOGIN_TIMEOUT,
            )
            .await;
            match result {
                Ok(data) => {
                    *username = data["username"].as_str().unwrap_or(&req.key).to_owned();
                    *authlevel = data["authlevel"].as_u64().unwrap_or(3) as u8;
                    sender.send_json(frame_json(Frame::status_ok(req.id, "ok"))).await;
                }
                Err(err) => {
                    sender
                        .send_json(frame_json(Frame::status_error(req.id, err.to_string())))
                        .await;
                }
            }
        }
        "logout" => {
            *username = "anonymous".to_owned();
            *authlevel = 3;
            sender.send_json(frame_json(Frame::status_ok(req.id, "ok"))).await;
        }
        other => {
            sender
                .send_json(frame_json(Frame::status_error(
                    req.id,
                    format!("no such request type: {other}"),
                )))
                .await;
        }
    }
}

fn frame_json(frame: Frame) -> serde_json::Value {
    serde_json::to_value(frame).expect("Frame always serializes")
}

fn spawn_pump(mut events: tokio::sync::mpsc::Receiver<Event>, sender: FramedSender) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            sender.send_json(frame_json(Frame::event(&event))).await;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use susi_core::{broker, state};

    async fn test_ctx() -> (ConnectionContext, FramedSender, tokio::io::DuplexStream) {
        let broker = broker::spawn();
        let state = state::spawn();
        let (client_side, server_side) = tokio::io::duplex(8192);
        let sender = FramedSender::spawn(client_side);
        let ctx = ConnectionContext {
            broker,
            state,
            session_authlevel: 3,
            session_id: 1,
        };
        (ctx, sender, server_side)
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_returns_error_status() {
        let (ctx, sender, _duplex) = test_ctx().await;
        let mut subs = HashMap::new();
        let mut username = "anonymous".to_owned();
        let mut authlevel = 3u8;
        let req: Request = serde_json::from_str(r#"{"id":12345,"authlevel":3,"type":"publish","key":"foo"}"#).unwrap();
        dispatch(&ctx, &sender, &mut subs, &mut username, &mut authlevel, req).await;
        // draining isn't asserted here directly; covered end-to-end in
        // services/susi-server/tests.
    }

    #[tokio::test]
    async fn unknown_command_produces_status_error() {
        let (ctx, sender, _duplex) = test_ctx().await;
        let mut subs = HashMap::new();
        let mut username = "anonymous".to_owned();
        let mut authlevel = 3u8;
        let req: Request =
            serde_json::from_str(r#"{"id":12345,"authlevel":3,"type":"undefined","key":"foo"}"#).unwrap();
        dispatch(&ctx, &sender, &mut subs, &mut username, &mut authlevel, req).await;
    }

    #[tokio::test]
    async fn auth_floor_demotes_publish() {
        let (ctx, sender, _duplex) = test_ctx().await;
        let mut receiver = ctx.broker.subscribe("foo", 3).await;
        let mut subs = HashMap::new();
        let mut username = "anonymous".to_owned();
        let mut authlevel = 3u8;
        // connection's session floor is 3; request tries authlevel 0 (superuser).
        let req: Request =
            serde_json::from_str(r#"{"id":1,"authlevel":0,"type":"publish","key":"foo"}"#).unwrap();
        dispatch(&ctx, &sender, &mut subs, &mut username, &mut authlevel, req).await;
        let event = receiver.events.recv().await.unwrap();
        assert_eq!(event.auth_level, 3);
    }

    #[tokio::test]
    async fn login_raises_the_floor_for_later_requests_on_the_same_connection() {
        let (ctx, sender, _duplex) = test_ctx().await;
        let mut receiver = ctx.broker.subscribe("foo", 0).await;
        let mut subs = HashMap::new();
        let mut username = "anonymous".to_owned();
        let mut authlevel = ctx.session_authlevel;

        let responder_broker = ctx.broker.clone();
        let mut checkuser = responder_broker.subscribe("authentification::checkuser", 0).await;
        tokio::spawn(async move {
            if let Some(req) = checkuser.events.recv().await {
                request::answer(&responder_broker, &req, json!({"username": "alice", "authlevel": 0})).await;
            }
        });

        let login: Request =
            serde_json::from_str(r#"{"id":1,"type":"login","key":"alice","payload":"secret"}"#).unwrap();
        dispatch(&ctx, &sender, &mut subs, &mut username, &mut authlevel, login).await;
        assert_eq!(authlevel, 0);

        // now publish as superuser (authlevel 0) — should no longer be
        // demoted back up to the pre-login floor of 3.
        let publish: Request =
            serde_json::from_str(r#"{"id":2,"authlevel":0,"type":"publish","key":"foo"}"#).unwrap();
        dispatch(&ctx, &sender, &mut subs, &mut username, &mut authlevel, publish).await;
        let event = receiver.events.recv().await.unwrap();
        assert_eq!(event.auth_level, 0);
    }
}

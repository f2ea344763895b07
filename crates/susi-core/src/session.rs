//! The session registry: opaque handles with a TTL, swept periodically.
//!
//! Single worker owning the session list and a periodic tick, following
//! the same `tokio::select!`-over-several-sources shape as
//! `services/receiver/src/session.rs`'s `run_session_loop`. In addition
//! to its direct command API it also answers `session::add|del|get|touch`
//! broker events, each gated to `authLevel == 0`.

use std::time::Duration;

use serde_json::{Map, Value, json};
use susi_protocol::Event;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::broker::{BrokerHandle, COMMAND_QUEUE_CAPACITY};
use crate::ids::next_id;
use crate::request::{answer, answer_error};

#[derive(Debug, Clone)]
pub struct SessionView {
    pub id: u64,
    pub valid_until: i64,
    pub data: Map<String, Value>,
}

struct SessionRecord {
    id: u64,
    valid_until: i64,
    data: Map<String, Value>,
}

enum Command {
    Add {
        data: Map<String, Value>,
        reply: oneshot::Sender<u64>,
    },
    Delete {
        id: u64,
        reply: oneshot::Sender<bool>,
    },
    Touch {
        id: u64,
        reply: oneshot::Sender<bool>,
    },
    Get {
        id: u64,
        reply: oneshot::Sender<Option<SessionView>>,
    },
}

#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<Command>,
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub fn spawn(broker: BrokerHandle, lifetime_secs: i64, check_interval: Duration) -> SessionHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    tokio::spawn(run(cmd_rx, broker, lifetime_secs, check_interval));
    info!("successfully started session registry");
    SessionHandle { cmd_tx }
}

fn add(sessions: &mut Vec<SessionRecord>, data: Map<String, Value>, lifetime_secs: i64) -> u64 {
    let id = next_id();
    sessions.push(SessionRecord {
        id,
        valid_until: now_unix() + lifetime_secs,
        data,
    });
    id
}

fn delete(sessions: &mut Vec<SessionRecord>, id: u64) -> bool {
    let before = sessions.len();
    sessions.retain(|s| s.id != id);
    sessions.len() != before
}

fn touch(sessions: &mut [SessionRecord], id: u64, lifetime_secs: i64) -> bool {
    for s in sessions.iter_mut() {
        if s.id == id {
            s.valid_until = now_unix() + lifetime_secs;
            return true;
        }
    }
    false
}

fn get(sessions: &[SessionRecord], id: u64) -> Option<SessionView> {
    sessions.iter().find(|s| s.id == id).map(|s| SessionView {
        id: s.id,
        valid_until: s.valid_until,
        data: s.data.clone(),
    })
}

async fn sweep_expired(sessions: &mut Vec<SessionRecord>, broker: &BrokerHandle) {
    let now = now_unix();
    let mut expired = Vec::new();
    sessions.retain(|s| {
        if s.valid_until > now {
            true
        } else {
            expired.push(s.id);
            false
        }
    });
    for id in expired {
        let event = Event {
            auth_level: 0,
            ..Event::new("session::deleted", json!(id))
        };
        broker.publish(event).await;
    }
}

/// Handle one inbound `session::add|del|get|touch` integration request,
/// answering through the standard request/answer helpers.
async fn handle_integration(
    sessions: &mut Vec<SessionRecord>,
    broker: &BrokerHandle,
    lifetime_secs: i64,
    kind: &str,
    req: Event,
) {
    if req.auth_level != 0 {
        answer_error(broker, &req, "session:: commands require authLevel 0").await;
        return;
    }
    match kind {
        "add" => {
            let data = req.payload.as_object().cloned().unwrap_or_default();
            let id = add(sessions, data, lifetime_secs);
            answer(broker, &req, json!(id)).await;
        }
        "del" => {
            let Some(id) = req.payload.as_u64() else {
                answer_error(broker, &req, "session::del requires a numeric id payload").await;
                return;
            };
            answer(broker, &req, json!(delete(sessions, id))).await;
        }
        "touch" => {
            let Some(id) = req.payload.as_u64() else {
                answer_error(broker, &req, "session::touch requires a numeric id payload").await;
                return;
            };
            answer(broker, &req, json!(touch(sessions, id, lifetime_secs))).await;
        }
        "get" => {
            let Some(id) = req.payload.as_u64() else {
                answer_error(broker, &req, "session::get requires a numeric id payload").await;
                return;
            };
            match get(sessions, id) {
                Some(view) => {
                    answer(
                        broker,
                        &req,
                        json!({"id": view.id, "validuntil": view.valid_until, "data": view.data}),
                    )
                    .await;
                }
                None => answer_error(broker, &req, "no such session").await,
            }
        }
        _ => unreachable!("handle_integration called with unknown kind"),
    }
}

async fn run(
    mut cmd_rx: mpsc::Receiver<Command>,
    broker: BrokerHandle,
    lifetime_secs: i64,
    check_interval: Duration,
) {
    let mut sessions: Vec<SessionRecord> = Vec::new();
    let mut sub_add = broker.subscribe("session::add", 0).await;
    let mut sub_del = broker.subscribe("session::del", 0).await;
    let mut sub_get = broker.subscribe("session::get", 0).await;
    let mut sub_touch = broker.subscribe("session::touch", 0).await;
    let mut ticker = tokio::time::interval(check_interval);
    // first tick fires immediately; consume it so the sweep cadence
    // matches `check_interval` rather than firing at startup.
    ticker.tick().await;

    loop {
        tokio::select! {
            Some(cmd) = cmd_rx.recv() => {
                match cmd {
                    Command::Add { data, reply } => {
                        let _ = reply.send(add(&mut sessions, data, lifetime_secs));
                    }
                    Command::Delete { id, reply } => {
                        let _ = reply.send(delete(&mut sessions, id));
                    }
                    Command::Touch { id, reply } => {
                        let _ = reply.send(touch(&mut sessions, id, lifetime_secs));
                    }
                    Command::Get { id, reply } => {
                        let _ = reply.send(get(&sessions, id));
                    }
                }
            }
            Some(req) = sub_add.events.recv() => {
                handle_integration(&mut sessions, &broker, lifetime_secs, "add", req).await;
            }
            Some(req) = sub_del.events.recv() => {
                handle_integration(&mut sessions, &broker, lifetime_secs, "del", req).await;
            }
            Some(req) = sub_get.events.recv() => {
                handle_integration(&mut sessions, &broker, lifetime_secs, "get", req).await;
            }
            Some(req) = sub_touch.events.recv() => {
                handle_integration(&mut sessions, &broker, lifetime_secs, "touch", req).await;
            }
            _ = ticker.tick() => {
                sweep_expired(&mut sessions, &broker).await;
            }
            else => break,
        }
    }
}

impl SessionHandle {
    pub async fn add(&self, data: Map<String, Value>) -> u64 {
        let (reply, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::Add { data, reply }).await;
        rx.await.unwrap_or(0)
    }

    pub async fn delete(&self, id: u64) -> bool {
        let (reply, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::Delete { id, reply }).await;
        rx.await.unwrap_or(false)
    }

    pub async fn touch(&self, id: u64) -> bool {
        let (reply, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::Touch { id, reply }).await;
        rx.await.unwrap_or(false)
    }

    pub async fn get(&self, id: u64) -> Option<SessionView> {
        let (reply, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::Get { id, reply }).await;
        rx.await.unwrap_or(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker;

    #[tokio::test]
    async fn add_then_get_round_trips_data() {
        let broker = broker::spawn();
        let sessions = spawn(broker, 1800, Duration::from_secs(3600));
        let mut data = Map::new();
        data.insert("username".to_owned(), json!("alice"));
        let id = sessions.add(data).await;
        let view = sessions.get(id).await.unwrap();
        assert_eq!(view.data["username"], json!("alice"));
    }

    #[tokio::test]
    async fn delete_removes_session() {
        let broker = broker::spawn();
        let sessions = spawn(broker, 1800, Duration::from_secs(3600));
        let id = sessions.add(Map::new()).await;
        assert!(sessions.delete(id).await);
        assert!(sessions.get(id).await.is_none());
        assert!(!sessions.delete(id).await);
    }

    #[tokio::test]
    async fn touch_extends_validity() {
        let broker = broker::spawn();
        let sessions = spawn(broker, 1800, Duration::from_secs(3600));
        let id = sessions.add(Map::new()).await;
        let before = sessions.get(id).await.unwrap().valid_until;
        assert!(sessions.touch(id).await);
        let after = sessions.get(id).await.unwrap().valid_until;
        assert!(after >= before);
    }

    #[tokio::test]
    async fn expiry_sweep_publishes_session_deleted() {
        let broker = broker::spawn();
        let mut lost = broker.subscribe("session::deleted", 0).await;
        // lifetime 0: the session is already expired by the first tick.
        let sessions = spawn(broker.clone(), 0, Duration::from_millis(20));
        let id = sessions.add(Map::new()).await;

        let event = tokio::time::timeout(Duration::from_secs(1), lost.events.recv())
            .await
            .expect("sweep should have fired")
            .expect("broker alive");
        assert_eq!(event.payload, json!(id));
    }

    #[tokio::test]
    async fn add_integration_requires_authlevel_zero() {
        let broker = broker::spawn();
        let _sessions = spawn(broker.clone(), 1800, Duration::from_secs(3600));
        // give the registry's startup subscriptions time to land before we publish.
        tokio::time::sleep(Duration::from_millis(20)).await;
        let mut reply_sub = broker.subscribe("reply.test", 0).await;
        let req = Event {
            auth_level: 3,
            return_addr: "reply.test".to_owned(),
            ..Event::new("session::add", json!({}))
        };
        broker.publish(req).await;
        let reply = tokio::time::timeout(Duration::from_secs(1), reply_sub.events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.payload["error"], true);
    }
}

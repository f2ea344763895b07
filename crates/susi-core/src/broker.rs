//! The event broker: a single-writer publish/subscribe matcher with
//! exact-topic and glob-topic subscriptions and per-subscription
//! auth-level filtering.
//!
//! Owned by exactly one task; every other task talks to it by posting
//! [`Command`]s into a bounded channel (capacity [`COMMAND_QUEUE_CAPACITY`]),
//! the same single-writer-actor shape `crates/timer-core/src/workers` uses
//! for its client pool.

use std::collections::HashMap;

use susi_protocol::{AuthLevel, Event, is_glob, topic_matches};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::ids::next_id;

/// Capacity of the command queue feeding the broker task, and of each
/// subscriber's delivery queue.
pub const COMMAND_QUEUE_CAPACITY: usize = 10;
pub const DELIVERY_QUEUE_CAPACITY: usize = 10;

struct Subscription {
    topic_or_glob: String,
    auth_level: AuthLevel,
    tx: mpsc::Sender<Event>,
}

enum Command {
    Subscribe {
        topic: String,
        auth_level: AuthLevel,
        reply: oneshot::Sender<SubscribeResult>,
    },
    Unsubscribe {
        id: u64,
    },
    Publish {
        event: Event,
        reply: oneshot::Sender<bool>,
    },
    Reset,
}

struct SubscribeResult {
    id: u64,
    rx: mpsc::Receiver<Event>,
}

/// Handle to a running broker task. Cheaply cloneable; every clone shares
/// the same underlying actor.
#[derive(Clone)]
pub struct BrokerHandle {
    cmd_tx: mpsc::Sender<Command>,
}

/// A live subscription: a queue of delivered events and a handle that,
/// when closed, unsubscribes.
pub struct Subscribed {
    pub id: u64,
    pub events: mpsc::Receiver<Event>,
    pub close: CloseHandle,
}

/// Posting a command through this handle (or simply dropping it) removes
/// the subscription from the broker.
pub struct CloseHandle {
    id: u64,
    cmd_tx: mpsc::Sender<Command>,
}

impl CloseHandle {
    pub async fn close(self) {
        let _ = self.cmd_tx.send(Command::Unsubscribe { id: self.id }).await;
    }
}

/// Spawn the broker actor and return a handle to it.
pub fn spawn() -> BrokerHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    tokio::spawn(run(cmd_rx));
    info!("successfully started broker");
    BrokerHandle { cmd_tx }
}

async fn run(mut cmd_rx: mpsc::Receiver<Command>) {
    let mut exact_subs: HashMap<String, HashMap<u64, Subscription>> = HashMap::new();
    let mut glob_subs: HashMap<u64, Subscription> = HashMap::new();
    // reverse index so Unsubscribe doesn't need the caller to remember
    // whether its subscription was exact or glob.
    let mut owner_topic: HashMap<u64, String> = HashMap::new();
    let mut is_glob_sub: HashMap<u64, bool> = HashMap::new();

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            Command::Subscribe {
                topic,
                auth_level,
                reply,
            } => {
                let id = next_id();
                let (tx, rx) = mpsc::channel(DELIVERY_QUEUE_CAPACITY);
                let sub = Subscription {
                    topic_or_glob: topic.clone(),
                    auth_level,
                    tx,
                };
                if is_glob(&topic) {
                    glob_subs.insert(id, sub);
                    is_glob_sub.insert(id, true);
                } else {
                    exact_subs.entry(topic.clone()).or_default().insert(id, sub);
                    is_glob_sub.insert(id, false);
                }
                owner_topic.insert(id, topic);
                let _ = reply.send(SubscribeResult { id, rx });
            }
            Command::Unsubscribe { id } => {
                let Some(topic) = owner_topic.remove(&id) else {
                    continue;
                };
                if is_glob_sub.remove(&id) == Some(true) {
                    glob_subs.remove(&id);
                } else if let Some(map) = exact_subs.get_mut(&topic) {
                    map.remove(&id);
                    if map.is_empty() {
                        exact_subs.remove(&topic);
                    }
                }
            }
            Command::Publish { event, reply } => {
                let mut matched = false;
                for sub in glob_subs.values() {
                    if sub.auth_level <= event.auth_level && topic_matches(&sub.topic_or_glob, &event.topic)
                    {
                        if sub.tx.send(event.clone()).await.is_ok() {
                            matched = true;
                        }
                    }
                }
                if let Some(map) = exact_subs.get(&event.topic) {
                    for sub in map.values() {
                        if sub.auth_level <= event.auth_level && sub.tx.send(event.clone()).await.is_ok()
                        {
                            matched = true;
                        }
                    }
                }
                if !matched {
                    debug!(topic = %event.topic, "publish matched no subscribers");
                }
                let _ = reply.send(matched);
            }
            Command::Reset => {
                exact_subs.clear();
                glob_subs.clear();
                owner_topic.clear();
                is_glob_sub.clear();
                warn!("broker reset: all subscriptions dropped");
            }
        }
    }
}

impl BrokerHandle {
    /// Subscribe to `topic` (exact or glob) requiring inbound events to
    /// satisfy `auth_level`.
    pub async fn subscribe(&self, topic: impl Into<String>, auth_level: AuthLevel) -> Subscribed {
        let (reply_tx, reply_rx) = oneshot::channel();
        let topic = topic.into();
        let _ = self
            .cmd_tx
            .send(Command::Subscribe {
                topic,
                auth_level,
                reply: reply_tx,
            })
            .await;
        let result = reply_rx.await.expect("broker task gone");
        Subscribed {
            id: result.id,
            events: result.rx,
            close: CloseHandle {
                id: result.id,
                cmd_tx: self.cmd_tx.clone(),
            },
        }
    }

    /// Publish `event`. Returns `true` iff at least one subscription
    /// received it.
    pub async fn publish(&self, event: Event) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        let _ = self
            .cmd_tx
            .send(Command::Publish {
                event,
                reply: reply_tx,
            })
            .await;
        reply_rx.await.unwrap_or(false)
    }

    /// Drop every subscription. Used by tests and by a future hot-reload
    /// path; not exposed over the gateway wire protocol.
    pub async fn reset(&self) {
        let _ = self.cmd_tx.send(Command::Reset).await;
    }
}

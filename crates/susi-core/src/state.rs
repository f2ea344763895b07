//! The hierarchical dotted-key key/value state store.
//!
//! A key like `a.b.c` addresses nested objects, auto-creating
//! intermediate maps on write. Leaves are scalars, bounded lists (FIFO
//! eviction from the head once over [`MAX_LIST_LEN`]), or nested maps.
//! `Push`/`Enqueue` both append at the tail (this mirrors the original
//! implementation, which does not distinguish the two at the storage
//! layer); `Pop` removes the tail, `Dequeue` the head.

use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::broker::COMMAND_QUEUE_CAPACITY;

/// Lists longer than this have their head evicted on the next push.
pub const MAX_LIST_LEN: usize = 32;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("key collision: '{0}' traverses through a non-object value")]
    KeyCollision(String),
}

enum Command {
    Set {
        key: String,
        value: Value,
        reply: oneshot::Sender<Result<(), StateError>>,
    },
    Get {
        key: String,
        reply: oneshot::Sender<Result<Value, StateError>>,
    },
    Unset {
        key: String,
    },
    Push {
        key: String,
        value: Value,
        reply: oneshot::Sender<Result<(), StateError>>,
    },
    Pop {
        key: String,
        reply: oneshot::Sender<Value>,
    },
    Dequeue {
        key: String,
        reply: oneshot::Sender<Value>,
    },
}

#[derive(Clone)]
pub struct StateHandle {
    cmd_tx: mpsc::Sender<Command>,
}

pub fn spawn() -> StateHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
    tokio::spawn(run(cmd_rx));
    info!("successfully started state store");
    StateHandle { cmd_tx }
}

/// Navigate to the parent object of `key`'s final path segment, creating
/// intermediate objects as needed. Returns the leaf key name alongside a
/// mutable reference to its containing object.
fn navigate<'a>(root: &'a mut Map<String, Value>, key: &str) -> Result<(&'a mut Map<String, Value>, String), StateError> {
    let mut parts = key.split('.');
    let Some(first) = parts.next() else {
        return Ok((root, key.to_owned()));
    };
    let mut cur = root;
    let mut last = first.to_owned();
    for part in parts {
        let entry = cur.entry(last.clone()).or_insert_with(|| Value::Object(Map::new()));
        match entry {
            Value::Object(_) => {}
            _ => return Err(StateError::KeyCollision(key.to_owned())),
        }
        let Value::Object(next) = entry else {
            unreachable!()
        };
        cur = next;
        last = part.to_owned();
    }
    Ok((cur, last))
}

async fn run(mut cmd_rx: mpsc::Receiver<Command>) {
    let mut root: Map<String, Value> = Map::new();
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            Command::Set { key, value, reply } => {
                let result = navigate(&mut root, &key).map(|(obj, leaf)| {
                    obj.insert(leaf, value);
                });
                let _ = reply.send(result);
            }
            Command::Get { key, reply } => {
                let result = navigate(&mut root, &key)
                    .map(|(obj, leaf)| obj.get(&leaf).cloned().unwrap_or(Value::Null));
                let _ = reply.send(result);
            }
            Command::Unset { key } => {
                if let Ok((obj, leaf)) = navigate(&mut root, &key) {
                    obj.remove(&leaf);
                }
            }
            Command::Push { key, value, reply } => {
                let result = navigate(&mut root, &key).map(|(obj, leaf)| {
                    match obj.get_mut(&leaf) {
                        None => {
                            obj.insert(leaf, Value::Array(vec![value]));
                        }
                        Some(Value::Array(arr)) => {
                            arr.push(value);
                            if arr.len() > MAX_LIST_LEN {
                                arr.remove(0);
                            }
                        }
                        Some(existing) => {
                            let old = existing.take();
                            *existing = Value::Array(vec![old, value]);
                        }
                    }
                });
                let _ = reply.send(result);
            }
            Command::Pop { key, reply } => {
                let value = match navigate(&mut root, &key) {
                    Ok((obj, leaf)) => match obj.get_mut(&leaf) {
                        Some(Value::Array(arr)) if !arr.is_empty() => arr.pop().unwrap_or(Value::Null),
                        Some(other) => other.clone(),
                        None => Value::Null,
                    },
                    Err(_) => Value::Null,
                };
                let _ = reply.send(value);
            }
            Command::Dequeue { key, reply } => {
                let value = match navigate(&mut root, &key) {
                    Ok((obj, leaf)) => match obj.get_mut(&leaf) {
                        Some(Value::Array(arr)) if !arr.is_empty() => arr.remove(0),
                        Some(other) => other.clone(),
                        None => Value::Null,
                    },
                    Err(_) => Value::Null,
                };
                let _ = reply.send(value);
            }
        }
    }
}

impl StateHandle {
    pub async fn set(&self, key: impl Into<String>, value: Value) -> Result<(), StateError> {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .cmd_tx
            .send(Command::Set {
                key: key.into(),
                value,
                reply,
            })
            .await;
        rx.await.unwrap_or(Ok(()))
    }

    pub async fn get(&self, key: impl Into<String>) -> Result<Value, StateError> {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .cmd_tx
            .send(Command::Get {
                key: key.into(),
                reply,
            })
            .await;
        rx.await.unwrap_or(Ok(Value::Null))
    }

    pub async fn unset(&self, key: impl Into<String>) {
        let _ = self.cmd_tx.send(Command::Unset { key: key.into() }).await;
    }

    /// Shared implementation for both `push` and `enqueue` (identical at
    /// the storage layer).
    pub async fn push(&self, key: impl Into<String>, value: Value) -> Result<(), StateError> {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .cmd_tx
            .send(Command::Push {
                key: key.into(),
                value,
                reply,
            })
            .await;
        rx.await.unwrap_or(Ok(()))
    }

    pub async fn enqueue(&self, key: impl Into<String>, value: Value) -> Result<(), StateError> {
        self.push(key, value).await
    }

    pub async fn pop(&self, key: impl Into<String>) -> Value {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .cmd_tx
            .send(Command::Pop {
                key: key.into(),
                reply,
            })
            .await;
        rx.await.unwrap_or(Value::Null)
    }

    pub async fn dequeue(&self, key: impl Into<String>) -> Value {
        let (reply, rx) = oneshot::channel();
        let _ = self
            .cmd_tx
            .send(Command::Dequeue {
                key: key.into(),
                reply,
            })
            .await;
        rx.await.unwrap_or(Value::Null)
    }
}

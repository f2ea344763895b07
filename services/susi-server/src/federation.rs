//! Remote event collector: bridges events between federated susi
//! instances. On `hosts::new`, dials the peer and subscribes to
//! `*@<name>` for each configured name; incoming remote events have
//! their `@<name>` suffix stripped and are republished locally with
//! `targetName` folded into the payload. A matching local-side task
//! does the same rewrite for events published locally against
//! `*@<name>` patterns.

use serde_json::{Value, json};
use susi_core::BrokerHandle;
use susi_protocol::{AuthLevel, Event};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

fn split_target(topic: &str) -> Option<(&str, &str)> {
    let (key, target) = topic.split_once('@')?;
    Some((key, target))
}

fn enrich_with_target(payload: Value, target_name: &str) -> Value {
    match payload {
        Value::Object(mut map) => {
            map.insert("targetName".to_owned(), json!(target_name));
            Value::Object(map)
        }
        Value::Null => json!({"targetName": target_name}),
        other => other,
    }
}

fn rewrite_for_local(topic: &str, auth_level: AuthLevel, return_addr: String, payload: Value) -> Option<Event> {
    let (key, target_name) = split_target(topic)?;
    Some(Event {
        auth_level,
        return_addr,
        ..Event::new(key, enrich_with_target(payload, target_name))
    })
}

/// Spawn the federation bridge for the configured set of remote names.
pub fn spawn(broker: BrokerHandle, names: Vec<String>) {
    spawn_host_watcher(broker.clone(), names.clone());
    for name in names {
        spawn_local_republish(broker.clone(), name);
    }
}

fn spawn_host_watcher(broker: BrokerHandle, names: Vec<String>) {
    tokio::spawn(async move {
        let mut new_hosts = broker.subscribe("hosts::new", 0).await;
        while let Some(event) = new_hosts.events.recv().await {
            if let Some(addr) = event.payload.as_str() {
                let addr = addr.to_owned();
                let broker = broker.clone();
                let names = names.clone();
                tokio::spawn(connect_to_host(broker, addr, names));
            }
        }
    });
}

fn spawn_local_republish(broker: BrokerHandle, name: String) {
    tokio::spawn(async move {
        let pattern = format!("*@{name}");
        let mut sub = broker.subscribe(pattern, 0).await;
        while let Some(event) = sub.events.recv().await {
            if let Some(rewritten) = rewrite_for_local(&event.topic, event.auth_level, event.return_addr, event.payload) {
                broker.publish(rewritten).await;
            }
        }
    });
}

async fn connect_to_host(broker: BrokerHandle, addr: String, names: Vec<String>) {
    let stream = match TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(err) => {
            debug!(%addr, error = %err, "federation dial failed");
            return;
        }
    };
    info!(%addr, "federation connected to peer");
    let (read_half, mut write_half) = stream.into_split();

    for name in &names {
        let request = json!({"id": 0, "type": "subscribe", "key": format!("*@{name}")});
        let mut line = serde_json::to_vec(&request).unwrap_or_default();
        line.push(b'\n');
        if write_half.write_all(&line).await.is_err() {
            return;
        }
    }

    let mut lines = BufReader::new(read_half).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                warn!(%addr, error = %err, "federation read error");
                break;
            }
        };
        let Ok(frame) = serde_json::from_str::<Value>(&line) else {
            continue;
        };
        if frame.get("type").and_then(Value::as_str) != Some("event") {
            continue;
        }
        let Some(topic) = frame.get("key").and_then(Value::as_str) else {
            continue;
        };
        let auth_level = frame.get("authlevel").and_then(Value::as_u64).unwrap_or(3) as AuthLevel;
        let return_addr = frame
            .get("returnaddr")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let payload = frame.get("payload").cloned().unwrap_or(Value::Null);
        if let Some(event) = rewrite_for_local(topic, auth_level, return_addr, payload) {
            broker.publish(event).await;
        }
    }

    let lost = Event {
        auth_level: 0,
        ..Event::new("hosts::lost", json!(addr))
    };
    broker.publish(lost).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_target_separates_key_and_name() {
        assert_eq!(split_target("foo@peer1"), Some(("foo", "peer1")));
        assert_eq!(split_target("no-at-sign"), None);
    }

    #[test]
    fn enrich_with_target_merges_into_object_payload() {
        let payload = json!({"a": 1});
        let enriched = enrich_with_target(payload, "peer1");
        assert_eq!(enriched, json!({"a": 1, "targetName": "peer1"}));
    }

    #[test]
    fn enrich_with_target_synthesizes_object_for_null_payload() {
        let enriched = enrich_with_target(Value::Null, "peer1");
        assert_eq!(enriched, json!({"targetName": "peer1"}));
    }

    #[test]
    fn rewrite_for_local_strips_suffix() {
        let event = rewrite_for_local("foo@peer1", 2, String::new(), Value::Null).unwrap();
        assert_eq!(event.topic, "foo");
        assert_eq!(event.payload, json!({"targetName": "peer1"}));
        assert_eq!(event.auth_level, 2);
    }
}

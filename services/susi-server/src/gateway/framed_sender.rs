//! Per-connection framed sender: a single writer task serializes
//! concurrent sends through a bounded queue, the same way `Client` owns
//! its socket writes in `crates/timer-core/src/workers/client.rs` rather
//! than letting every caller write directly.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::warn;

const QUEUE_CAPACITY: usize = 10;

enum Outbound {
    Json(serde_json::Value),
    Raw(Vec<u8>),
    Text(String),
    Close,
}

/// A cheaply cloneable handle to a connection's outbound queue.
#[derive(Clone)]
pub struct FramedSender {
    tx: mpsc::Sender<Outbound>,
    closed: Arc<AtomicBool>,
}

impl FramedSender {
    pub fn spawn<W>(writer: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));
        tokio::spawn(run(writer, rx, closed.clone()));
        Self { tx, closed }
    }

    /// Send a JSON value followed by a newline — the gateway's normal
    /// frame shape.
    pub async fn send_json(&self, value: serde_json::Value) {
        let _ = self.tx.send(Outbound::Json(value)).await;
    }

    /// Send a pre-encoded byte string verbatim, no framing added.
    pub async fn send_raw(&self, bytes: Vec<u8>) {
        let _ = self.tx.send(Outbound::Raw(bytes)).await;
    }

    /// Send a string verbatim, no framing added.
    pub async fn send_text(&self, text: String) {
        let _ = self.tx.send(Outbound::Text(text)).await;
    }

    pub async fn close(&self) {
        let _ = self.tx.send(Outbound::Close).await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }
}

async fn run<W>(mut writer: W, mut rx: mpsc::Receiver<Outbound>, closed: Arc<AtomicBool>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let result = match message {
            Outbound::Json(value) => {
                let mut line = serde_json::to_vec(&value).unwrap_or_default();
                line.push(b'\n');
                writer.write_all(&line).await
            }
            Outbound::Raw(bytes) => writer.write_all(&bytes).await,
            Outbound::Text(text) => writer.write_all(text.as_bytes()).await,
            Outbound::Close => break,
        };
        if let Err(err) = result {
            warn!(error = %err, "framed sender write failed, closing connection");
            break;
        }
    }
    closed.store(true, Ordering::Relaxed);
    let _ = writer.shutdown().await;
}

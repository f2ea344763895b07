//! One listener task per transport (plain TCP, TLS, local stream
//! socket), each accept-looping into a spawned connection handler —
//! the same accept-loop-to-spawned-task shape as
//! `crates/timer-core/src/workers/client_connector.rs`'s `begin()`.

use std::os::unix::fs::PermissionsExt;
use std::sync::Arc;

use serde_json::{Map, json};
use susi_core::{BrokerHandle, SessionHandle, StateHandle};
use tokio::net::{TcpListener, UnixListener};
use tracing::{error, info, warn};

use super::connection::{self, ConnectionContext};
use super::framed_sender::FramedSender;
use super::tls::build_acceptor;

#[derive(Clone)]
pub struct GatewayHandles {
    pub broker: BrokerHandle,
    pub state: StateHandle,
    pub sessions: SessionHandle,
}

fn session_data(username: &str, authlevel: u8) -> Map<String, serde_json::Value> {
    let mut data = Map::new();
    data.insert("username".to_owned(), json!(username));
    data.insert("authlevel".to_owned(), json!(authlevel));
    data
}

pub async fn serve_tcp(addr: String, handles: GatewayHandles) -> std::io::Result<()> {
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "tcp gateway listening");
    loop {
        let (socket, peer) = listener.accept().await?;
        let handles = handles.clone();
        tokio::spawn(async move {
            info!(%peer, "tcp connection accepted");
            let session_id = handles.sessions.add(session_data("anonymous", 3)).await;
            let (read_half, write_half) = socket.into_split();
            let sender = FramedSender::spawn(write_half);
            let ctx = ConnectionContext {
                broker: handles.broker,
                state: handles.state,
                session_authlevel: 3,
                session_id,
            };
            connection::run(read_half, sender, ctx).await;
        });
    }
}

pub async fn serve_tls(addr: String, cert_path: String, key_path: String, handles: GatewayHandles) -> std::io::Result<()> {
    let (acceptor, own_cert) = build_acceptor(&cert_path, &key_path)?;
    let own_cert = Arc::new(own_cert);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, "tls gateway listening");
    loop {
        let (socket, peer) = listener.accept().await?;
        let acceptor = acceptor.clone();
        let own_cert = own_cert.clone();
        let handles = handles.clone();
        tokio::spawn(async move {
            let tls_stream = match acceptor.accept(socket).await {
                Ok(s) => s,
                Err(err) => {
                    warn!(%peer, error = %err, "tls handshake failed");
                    return;
                }
            };
            let authlevel = classify_peer_cert(&tls_stream, &own_cert);
            info!(%peer, authlevel, "tls connection accepted");
            let session_id = handles.sessions.add(session_data("anonymous", authlevel)).await;
            let (read_half, write_half) = tokio::io::split(tls_stream);
            let sender = FramedSender::spawn(write_half);
            let ctx = ConnectionContext {
                broker: handles.broker,
                state: handles.state,
                session_authlevel: authlevel,
                session_id,
            };
            connection::run(read_half, sender, ctx).await;
        });
    }
}

/// A peer whose leaf certificate is byte-identical to this server's own
/// is a trusted self-peer (authlevel 0, superuser); anyone else
/// presenting a certificate gets the plain-TCP floor (authlevel 3).
fn classify_peer_cert<IO>(tls_stream: &tokio_rustls::server::TlsStream<IO>, own_cert: &[u8]) -> u8 {
    let (_io, conn) = tls_stream.get_ref();
    match conn.peer_certificates().and_then(|certs| certs.first()) {
        Some(leaf) if leaf.as_ref() == own_cert => 0,
        _ => 3,
    }
}

pub async fn serve_unix(path: String, handles: GatewayHandles) -> std::io::Result<()> {
    let _ = std::fs::remove_file(&path);
    let listener = UnixListener::bind(&path)?;
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    info!(path = %path, "unix socket gateway listening");
    loop {
        let (socket, _addr) = listener.accept().await?;
        let handles = handles.clone();
        tokio::spawn(async move {
            info!("unix socket connection accepted");
            let session_id = handles.sessions.add(session_data("anonymous", 0)).await;
            let (read_half, write_half) = socket.into_split();
            let sender = FramedSender::spawn(write_half);
            let ctx = ConnectionContext {
                broker: handles.broker,
                state: handles.state,
                session_authlevel: 0,
                session_id,
            };
            connection::run(read_half, sender, ctx).await;
        });
    }
}

pub fn log_listener_failure(transport: &str, err: &std::io::Error) {
    error!(transport, error = %err, "gateway listener terminated");
}

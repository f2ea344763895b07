//! UDP multicast peer discovery. Every instance announces its own
//! gateway address on the multicast group and listens for announcements
//! from others; a newly learned peer triggers an immediate re-announce
//! so the group converges in roughly one round trip instead of waiting
//! for every member's next periodic beacon.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use serde_json::json;
use socket2::{Domain, Protocol, Socket, Type};
use susi_core::BrokerHandle;
use tokio::net::UdpSocket;
use tracing::{info, warn};

const RECV_BUFFER: usize = 4096;

/// Find this host's address by opening a UDP socket "connected" to the
/// multicast group and reading back the local address the kernel picked
/// for the route — the standard no-dependency trick for discovering the
/// outbound interface address without enumerating interfaces directly.
pub fn derive_self_addr(mcast_addr: &SocketAddr, own_port: u16) -> Option<String> {
    let probe = std::net::UdpSocket::bind("0.0.0.0:0").ok()?;
    probe.connect(mcast_addr).ok()?;
    let local = probe.local_addr().ok()?;
    let ip = local.ip().to_string();
    if ip.starts_with("127.") || ip == "::1" || ip.starts_with("fe80:") {
        return None;
    }
    Some(format!("{ip}:{own_port}"))
}

fn bind_multicast(mcast_addr: SocketAddrV4) -> std::io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, mcast_addr.port());
    socket.bind(&bind_addr.into())?;
    socket.join_multicast_v4(mcast_addr.ip(), &Ipv4Addr::UNSPECIFIED)?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

async fn announce(socket: &UdpSocket, mcast_addr: SocketAddrV4, self_addr: &str) {
    if let Err(err) = socket.send_to(self_addr.as_bytes(), mcast_addr).await {
        warn!(error = %err, "multicast announce failed");
    }
}

/// Spawn the discovery loop. `self_addr` is this instance's own
/// gateway address, used both as the announcement payload and to
/// ignore self-announcements that loop back.
pub fn spawn(broker: BrokerHandle, mcast_addr: SocketAddrV4, self_addr: String) {
    tokio::spawn(async move {
        let socket = match bind_multicast(mcast_addr) {
            Ok(socket) => socket,
            Err(err) => {
                warn!(error = %err, "autodiscovery multicast bind failed, discovery disabled");
                return;
            }
        };

        let mut hosts: HashSet<String> = HashSet::new();
        let mut lost = broker.subscribe("hosts::lost", 0).await;
        let mut buf = vec![0u8; RECV_BUFFER];

        announce(&socket, mcast_addr, &self_addr).await;

        loop {
            tokio::select! {
                recvd = socket.recv_from(&mut buf) => {
                    let Ok((len, _peer)) = recvd else { continue };
                    let addr = String::from_utf8_lossy(&buf[..len]).to_string();
                    if addr == self_addr || hosts.contains(&addr) {
                        continue;
                    }
                    hosts.insert(addr.clone());
                    info!(peer = %addr, "discovered peer");
                    announce(&socket, mcast_addr, &self_addr).await;
                    let event = susi_protocol::Event {
                        auth_level: 0,
                        ..susi_protocol::Event::new("hosts::new", json!(addr))
                    };
                    broker.publish(event).await;
                }
                event = lost.events.recv() => {
                    let Some(event) = event else { break };
                    if let Some(addr) = event.payload.as_str() {
                        hosts.remove(addr);
                    }
                }
                else => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_self_addr_rejects_loopback_probe_target() {
        // connecting to a loopback multicast-style target should still
        // surface a loopback-looking local addr and be rejected.
        let addr: SocketAddr = "127.0.0.1:42424".parse().unwrap();
        assert!(derive_self_addr(&addr, 4000).is_none());
    }
}

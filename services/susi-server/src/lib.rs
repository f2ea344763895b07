pub mod autodiscovery;
pub mod config;
pub mod federation;
pub mod gateway;

use gateway::GatewayHandles;
use gateway::listeners::log_listener_failure;
use susi_core::{broker, session, state};
use tracing::{info, warn};

use crate::config::Config;

/// Wire up the broker, state store, session registry, gateway listeners,
/// autodiscovery, and federation, then run until a shutdown signal
/// arrives. Returns once every listener has stopped.
pub async fn run(config: Config) {
    susi_core::ids::seed_from_wall_clock();

    let broker = broker::spawn();
    let state = state::spawn();
    let sessions = session::spawn(
        broker.clone(),
        config.session_lifetime_secs,
        std::time::Duration::from_secs(config.session_check_interval_secs),
    );

    let handles = GatewayHandles {
        broker: broker.clone(),
        state,
        sessions,
    };

    let mut tasks = Vec::new();

    {
        let handles = handles.clone();
        let addr = config.tcp_addr.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = gateway::listeners::serve_tcp(addr, handles).await {
                log_listener_failure("tcp", &err);
            }
        }));
    }

    if let Some((cert, key)) = config.tls_paths() {
        let handles = handles.clone();
        let addr = config.tls_addr.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = gateway::listeners::serve_tls(addr, cert, key, handles).await {
                log_listener_failure("tls", &err);
            }
        }));
    } else {
        info!("SUSI_TLS_CERT/SUSI_TLS_KEY not set, tls gateway disabled");
    }

    {
        let handles = handles.clone();
        let path = config.unix_socket.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(err) = gateway::listeners::serve_unix(path, handles).await {
                log_listener_failure("unix", &err);
            }
        }));
    }

    if let Some(self_addr) = autodiscovery::derive_self_addr(&std::net::SocketAddr::V4(config.mcast_addr), tcp_port(&config.tcp_addr)) {
        autodiscovery::spawn(broker.clone(), config.mcast_addr, self_addr);
    } else {
        warn!("could not determine a non-loopback address, autodiscovery disabled");
    }

    // federation_names always includes "all" (see config.rs), so the
    // collector always runs: nodes federate their broadest channel by
    // default even with no deployment-specific names configured.
    federation::spawn(broker.clone(), config.federation_names.clone());

    let mut shutdown = broker.subscribe("global::shutdown", 0).await;
    tokio::select! {
        event = shutdown.events.recv() => {
            if event.is_some() {
                info!("shutdown requested over the bus, exiting shortly");
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
        _ = os_shutdown_signal() => {
            info!("shutdown signal received, exiting shortly");
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    }
}

fn tcp_port(addr: &str) -> u16 {
    addr.rsplit(':').next().and_then(|p| p.parse().ok()).unwrap_or(4000)
}

/// Waits for any of the signals the original daemon treated as a
/// shutdown request. SIGTERM/SIGINT stop the process; SIGHUP and SIGQUIT
/// are folded into the same path since this gateway has no separate
/// "reload config" behavior to give SIGHUP.
async fn os_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let unix_signals = async {
        use signal::unix::{SignalKind, signal};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut hup = signal(SignalKind::hangup()).expect("failed to install SIGHUP handler");
        let mut quit = signal(SignalKind::quit()).expect("failed to install SIGQUIT handler");
        tokio::select! {
            _ = term.recv() => {}
            _ = hup.recv() => {}
            _ = quit.recv() => {}
        }
    };

    #[cfg(not(unix))]
    let unix_signals = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = unix_signals => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_port_parses_trailing_port() {
        assert_eq!(tcp_port("0.0.0.0:4000"), 4000);
        assert_eq!(tcp_port("garbage"), 4000);
    }
}

//! Startup configuration, read straight from the environment — the same
//! thin `env::var`-with-default bootstrap `services/server/src/main.rs`
//! uses for `BIND_ADDR`/`DATABASE_URL`, extended with the handful of
//! settings a gateway with optional TLS/federation/autodiscovery needs.

use std::env;
use std::net::SocketAddrV4;

pub struct Config {
    pub tcp_addr: String,
    pub tls_addr: String,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    pub unix_socket: String,
    pub mcast_addr: SocketAddrV4,
    pub federation_names: Vec<String>,
    pub session_lifetime_secs: i64,
    pub session_check_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            tcp_addr: env_or("SUSI_TCP_ADDR", "0.0.0.0:4000"),
            tls_addr: env_or("SUSI_TLS_ADDR", "0.0.0.0:4001"),
            tls_cert: env::var("SUSI_TLS_CERT").ok(),
            tls_key: env::var("SUSI_TLS_KEY").ok(),
            unix_socket: env_or("SUSI_UNIX_SOCKET", "/tmp/susi.sock"),
            mcast_addr: env_or("SUSI_MCAST_ADDR", "224.0.0.23:42424")
                .parse()
                .expect("SUSI_MCAST_ADDR must be a valid ipv4 socket address"),
            federation_names: federation_names_with_all(env::var("SUSI_FEDERATION_NAMES").ok()),
            session_lifetime_secs: env_or("SUSI_SESSION_LIFETIME_SECS", "1800")
                .parse()
                .expect("SUSI_SESSION_LIFETIME_SECS must be an integer"),
            session_check_interval_secs: env_or("SUSI_SESSION_CHECK_INTERVAL_SECS", "10")
                .parse()
                .expect("SUSI_SESSION_CHECK_INTERVAL_SECS must be an integer"),
        }
    }

    /// TLS is only enabled when both a cert and key path were configured.
    pub fn tls_paths(&self) -> Option<(String, String)> {
        Some((self.tls_cert.clone()?, self.tls_key.clone()?))
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// The federation name list always includes `all` — the broadest local
/// channel every node federates by default, in addition to whatever
/// specific names the deployment configures.
fn federation_names_with_all(configured: Option<String>) -> Vec<String> {
    let mut names: Vec<String> = configured
        .map(|names| names.split(',').map(str::trim).filter(|n| !n.is_empty()).map(str::to_owned).collect())
        .unwrap_or_default();
    if !names.iter().any(|n| n == "all") {
        names.push("all".to_owned());
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_or_falls_back_to_default() {
        assert_eq!(env_or("SUSI_DEFINITELY_UNSET_VAR", "fallback"), "fallback");
    }

    #[test]
    fn federation_names_always_includes_all() {
        assert_eq!(federation_names_with_all(None), vec!["all".to_owned()]);
        assert_eq!(
            federation_names_with_all(Some("east,west".to_owned())),
            vec!["east".to_owned(), "west".to_owned(), "all".to_owned()]
        );
    }

    #[test]
    fn federation_names_does_not_duplicate_all() {
        assert_eq!(
            federation_names_with_all(Some("all,east".to_owned())),
            vec!["all".to_owned(), "east".to_owned()]
        );
    }
}

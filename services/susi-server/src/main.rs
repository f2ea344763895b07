use std::env;

use susi_server::config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .init();

    let config = Config::from_env();
    info!(tcp_addr = %config.tcp_addr, tls_addr = %config.tls_addr, "starting susi gateway");

    susi_server::run(config).await;
    info!("susi gateway shut down gracefully");
}

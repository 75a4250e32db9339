//! Simple forward proxy example
//!
//! Starts a proxy with the default policies: every client is accepted,
//! origin-relative requests get a diagnostic page and nothing is intercepted.
//!
//! To run:
//! ```bash
//! RUST_LOG=slinger_proxy=debug cargo run --example simple_proxy
//! ```
//!
//! Then configure your browser to use the HTTP proxy at 127.0.0.1:8080, or
//! `curl http://127.0.0.1:8080/status` to see the diagnostic page.

use slinger_proxy::{ProxyConfig, ProxyServer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let config = ProxyConfig {
    host: "127.0.0.1".to_string(),
    port: 8080,
    ..Default::default()
  };
  println!("Starting proxy on {}", config.listen_addr());
  ProxyServer::new(config).run().await?;
  Ok(())
}

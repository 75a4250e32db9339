//! Proxy configuration

use std::time::Duration;

/// Configuration for the proxy server
#[derive(Debug, Clone)]
pub struct ProxyConfig {
  /// Listen host
  pub host: String,
  /// Listen port
  pub port: u16,
  /// Consult the interceptor before opening upstream connections
  pub intercept: bool,
  /// Maximum size of a request head, request line and headers included
  pub max_head_size: usize,
  /// Maximum `Content-Length` body buffered before a request is forwarded
  pub max_body_size: usize,
  /// Time a client has to deliver a complete request head
  pub head_timeout: Option<Duration>,
  /// Time allowed for the upstream TCP connect
  pub connect_timeout: Option<Duration>,
}

impl Default for ProxyConfig {
  fn default() -> Self {
    Self {
      host: "0.0.0.0".to_string(),
      port: 8080,
      intercept: false,
      max_head_size: 64 * 1024,
      max_body_size: 1024 * 1024,
      head_timeout: Some(Duration::from_secs(30)),
      connect_timeout: Some(Duration::from_secs(30)),
    }
  }
}

impl ProxyConfig {
  /// `host:port` to bind
  pub fn listen_addr(&self) -> String {
    if self.host.contains(':') && !self.host.starts_with('[') {
      format!("[{}]:{}", self.host, self.port)
    } else {
      format!("{}:{}", self.host, self.port)
    }
  }
}

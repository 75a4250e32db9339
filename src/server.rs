//! Proxy server implementation

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};

use crate::auth::{AcceptAll, AuthPolicy};
use crate::config::ProxyConfig;
use crate::connection::{Connection, Shared};
use crate::errors::{Error, Result};
use crate::interceptor::{ClientInfo, DiagnosticHandler, Interceptor, LocalHandler, PassThrough};
use crate::stats::ProxyStats;

/// Forward proxy server.
///
/// Every accepted connection is driven on its own task; connections share
/// nothing but the injected policies and the [`ProxyStats`] counters.
#[derive(Clone)]
pub struct ProxyServer {
  shared: Arc<Shared>,
}

/// Builder for `ProxyServer`.
///
/// Unset policies fall back to [`AcceptAll`], [`DiagnosticHandler`] and
/// [`PassThrough`].
#[derive(Default)]
pub struct ProxyServerBuilder {
  config: Option<ProxyConfig>,
  auth: Option<Arc<dyn AuthPolicy>>,
  local: Option<Arc<dyn LocalHandler>>,
  interceptor: Option<Arc<dyn Interceptor>>,
  stats: Option<Arc<ProxyStats>>,
}

impl ProxyServerBuilder {
  /// Set the `ProxyConfig` to use.
  pub fn config(mut self, config: ProxyConfig) -> Self {
    self.config = Some(config);
    self
  }

  /// Set the policy deciding who may use the proxy.
  pub fn auth<A: AuthPolicy + 'static>(mut self, auth: A) -> Self {
    self.auth = Some(Arc::new(auth));
    self
  }

  /// Set the handler answering origin-relative requests.
  pub fn local_handler<H: LocalHandler + 'static>(mut self, handler: H) -> Self {
    self.local = Some(Arc::new(handler));
    self
  }

  /// Set the interceptor. It is only consulted when
  /// [`ProxyConfig::intercept`] is enabled.
  pub fn interceptor<I: Interceptor + 'static>(mut self, interceptor: I) -> Self {
    self.interceptor = Some(Arc::new(interceptor));
    self
  }

  /// Record outcomes into existing counters instead of fresh ones.
  pub fn stats(mut self, stats: Arc<ProxyStats>) -> Self {
    self.stats = Some(stats);
    self
  }

  /// Build the `ProxyServer`.
  pub fn build(self) -> ProxyServer {
    ProxyServer {
      shared: Arc::new(Shared {
        config: self.config.unwrap_or_default(),
        auth: self.auth.unwrap_or_else(|| Arc::new(AcceptAll)),
        local: self.local.unwrap_or_else(|| Arc::new(DiagnosticHandler)),
        interceptor: self.interceptor.unwrap_or_else(|| Arc::new(PassThrough)),
        stats: self.stats.unwrap_or_default(),
      }),
    }
  }
}

impl ProxyServer {
  /// Create a new builder
  pub fn builder() -> ProxyServerBuilder {
    ProxyServerBuilder::default()
  }

  /// Create a server with default policies
  pub fn new(config: ProxyConfig) -> Self {
    Self::builder().config(config).build()
  }

  /// The configuration in use
  pub fn config(&self) -> &ProxyConfig {
    &self.shared.config
  }

  /// Outcome counters of this server
  pub fn stats(&self) -> Arc<ProxyStats> {
    self.shared.stats.clone()
  }

  /// Bind the configured address and serve forever.
  pub async fn run(&self) -> Result<()> {
    let addr = self.shared.config.listen_addr();
    let listener = TcpListener::bind(&addr)
      .await
      .map_err(|e| Error::other(format!("Failed to bind to {}: {}", addr, e)))?;
    tracing::info!("[PROXY] listening on {}", addr);
    self.serve(listener).await
  }

  /// Serve connections from an already bound listener.
  ///
  /// A failing connection never affects the listener or other connections;
  /// accept errors are logged and the loop carries on.
  pub async fn serve(&self, listener: TcpListener) -> Result<()> {
    loop {
      match listener.accept().await {
        Ok((stream, _)) => self.spawn_connection(stream),
        Err(e) => {
          tracing::error!("[PROXY] Failed to accept connection: {}", e);
        }
      }
    }
  }

  fn spawn_connection(&self, stream: TcpStream) {
    let info = match (stream.peer_addr(), stream.local_addr()) {
      (Ok(peer_addr), Ok(local_addr)) => ClientInfo {
        peer_addr,
        local_addr,
      },
      (Err(e), _) | (_, Err(e)) => {
        tracing::debug!("[PROXY] dropping connection without addresses: {}", e);
        return;
      }
    };
    self.shared.stats.record_accept();
    let connection = Connection::new(stream, info, self.shared.clone());
    tokio::spawn(connection.run());
  }
}

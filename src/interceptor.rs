//! Local request handling and traffic interception interfaces

use std::net::SocketAddr;
use std::sync::Arc;

use http::header::CONTENT_TYPE;
use http::HeaderValue;

use crate::message::Message;

/// Addresses of the client connection a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientInfo {
  /// Remote address of the client
  pub peer_addr: SocketAddr,
  /// Address of the proxy listener the client connected to
  pub local_addr: SocketAddr,
}

/// Answers origin-relative requests (`GET /status HTTP/1.1`), i.e. requests
/// addressed to the proxy itself rather than to an upstream host.
#[async_trait::async_trait]
pub trait LocalHandler: Send + Sync {
  /// Produce the response written back to the client.
  async fn handle(&self, request: &Message, client: &ClientInfo) -> Message;
}

#[async_trait::async_trait]
impl<F> LocalHandler for F
where
  F: Fn(&Message, &ClientInfo) -> Message + Send + Sync,
{
  async fn handle(&self, request: &Message, client: &ClientInfo) -> Message {
    self(request, client)
  }
}

/// Default local handler: a `200` describing the request it received.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiagnosticHandler;

#[async_trait::async_trait]
impl LocalHandler for DiagnosticHandler {
  async fn handle(&self, request: &Message, _client: &ClientInfo) -> Message {
    let described = serde_json::to_string_pretty(request).unwrap_or_else(|e| e.to_string());
    Message::response(200, "OK", request.version())
      .with_header(CONTENT_TYPE, HeaderValue::from_static("text/plain"))
      .with_body(format!("Proxy OK\nYou requested:\n{}", described))
  }
}

/// Trait for answering a proxied request on the upstream's behalf.
///
/// Return `Some` to short-circuit the request with that response, or `None`
/// to let it continue to the upstream host.
#[async_trait::async_trait]
pub trait Interceptor: Send + Sync {
  /// Inspect a request before an upstream connection is opened for it.
  async fn intercept(&self, request: &Message, client: &ClientInfo) -> Option<Message>;
}

#[async_trait::async_trait]
impl<F> Interceptor for F
where
  F: Fn(&Message, &ClientInfo) -> Option<Message> + Send + Sync,
{
  async fn intercept(&self, request: &Message, client: &ClientInfo) -> Option<Message> {
    self(request, client)
  }
}

/// Declines every request.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassThrough;

#[async_trait::async_trait]
impl Interceptor for PassThrough {
  async fn intercept(&self, _request: &Message, _client: &ClientInfo) -> Option<Message> {
    None
  }
}

/// Ordered list of interceptors; the first to answer wins.
#[derive(Default, Clone)]
pub struct InterceptorChain {
  interceptors: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorChain {
  /// Create an empty chain, which declines every request
  pub fn new() -> Self {
    Self::default()
  }

  /// Add an interceptor at the end of the chain
  pub fn push(&mut self, interceptor: Arc<dyn Interceptor>) {
    self.interceptors.push(interceptor);
  }

  /// Builder form of [`InterceptorChain::push`]
  pub fn with<I: Interceptor + 'static>(mut self, interceptor: I) -> Self {
    self.push(Arc::new(interceptor));
    self
  }

  /// Number of interceptors
  pub fn len(&self) -> usize {
    self.interceptors.len()
  }

  /// `true` when the chain holds no interceptor
  pub fn is_empty(&self) -> bool {
    self.interceptors.is_empty()
  }
}

#[async_trait::async_trait]
impl Interceptor for InterceptorChain {
  async fn intercept(&self, request: &Message, client: &ClientInfo) -> Option<Message> {
    for interceptor in &self.interceptors {
      if let Some(response) = interceptor.intercept(request, client).await {
        return Some(response);
      }
    }
    None
  }
}

/// Logs every request it sees and never answers one.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingInterceptor;

#[async_trait::async_trait]
impl Interceptor for LoggingInterceptor {
  async fn intercept(&self, request: &Message, client: &ClientInfo) -> Option<Message> {
    tracing::info!(
      "[PROXY] {} {} from {}",
      request.method().unwrap_or_default(),
      request.url().unwrap_or_default(),
      client.peer_addr
    );
    for (name, value) in request.headers() {
      tracing::info!("  {}: {:?}", name, value);
    }
    None
  }
}

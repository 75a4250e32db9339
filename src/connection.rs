//! Per-connection decision state machine and relay

use std::future::Future;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use http::header::{CONTENT_LENGTH, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION};
use http::HeaderValue;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::auth::{AuthPolicy, Credentials};
use crate::codec::{decode, find_head_end};
use crate::config::ProxyConfig;
use crate::errors::{new_io_error, Error, Result};
use crate::interceptor::{ClientInfo, Interceptor, LocalHandler};
use crate::message::Message;
use crate::stats::ProxyStats;
use crate::target::Target;

/// Written to the client once a `CONNECT` tunnel's upstream leg is open.
pub const CONNECTION_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection Established\r\n\r\n";

/// Where a client connection is in its lifecycle.
///
/// Every connection starts in `AwaitingRequest` and ends in exactly one of
/// the other states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
  /// No request has been acted upon yet
  AwaitingRequest,
  /// The local handler answered an origin-relative request
  LocalResponded,
  /// The auth policy rejected the client with a `407`
  AuthRejected,
  /// The interceptor answered on the upstream's behalf
  Intercepted,
  /// Bytes are relayed between client and upstream
  Bridging,
  /// The connection was dropped or failed
  Errored,
}

impl ConnectionState {
  /// `true` for every state but `AwaitingRequest`
  pub fn is_terminal(&self) -> bool {
    !matches!(self, ConnectionState::AwaitingRequest)
  }

  fn advance(&mut self, next: ConnectionState) {
    tracing::trace!("state {:?} -> {:?}", self, next);
    *self = next;
  }
}

/// Everything a connection needs from the server that accepted it.
pub(crate) struct Shared {
  pub(crate) config: ProxyConfig,
  pub(crate) auth: Arc<dyn AuthPolicy>,
  pub(crate) local: Arc<dyn LocalHandler>,
  pub(crate) interceptor: Arc<dyn Interceptor>,
  pub(crate) stats: Arc<ProxyStats>,
}

/// One accepted client socket, the upstream socket bound to it once a
/// request routes there, and the request that decided it.
pub(crate) struct Connection {
  client: TcpStream,
  info: ClientInfo,
  shared: Arc<Shared>,
  buffer: BytesMut,
  state: ConnectionState,
  upstream: Option<TcpStream>,
  request: Option<Message>,
}

impl Connection {
  pub(crate) fn new(client: TcpStream, info: ClientInfo, shared: Arc<Shared>) -> Self {
    Self {
      client,
      info,
      shared,
      buffer: BytesMut::with_capacity(8192),
      state: ConnectionState::AwaitingRequest,
      upstream: None,
      request: None,
    }
  }

  /// Drive the connection to a terminal state, then close both legs.
  pub(crate) async fn run(mut self) -> ConnectionState {
    let outcome = match self.drive().await {
      Ok(state) => state,
      Err(e) => {
        tracing::debug!("[PROXY] {} dropped: {}", self.info.peer_addr, e);
        ConnectionState::Errored
      }
    };
    self.state.advance(outcome);
    if let Some(request) = &self.request {
      tracing::debug!(
        "[PROXY] {} {} {} -> {:?}",
        self.info.peer_addr,
        request.method().unwrap_or_default(),
        request.url().unwrap_or_default(),
        self.state
      );
    }
    // counted before the client can observe the close
    self.shared.stats.record_close(self.state);
    if let Some(upstream) = self.upstream.as_mut() {
      let _ = upstream.shutdown().await;
    }
    let _ = self.client.shutdown().await;
    self.state
  }

  async fn drive(&mut self) -> Result<ConnectionState> {
    let head_timeout = self.shared.config.head_timeout;
    let mut request = deadline(head_timeout, "request head", self.read_request()).await?;
    let streamed = self.read_body(&mut request).await?;
    let surplus = self.buffer.split().freeze();
    let request = self.request.insert(request);

    let credentials = Credentials::from_request(request);
    let target = Target::resolve(
      request.method().unwrap_or_default(),
      request.url().unwrap_or_default(),
    )?;
    let (host, port) = match target {
      Target::Local { .. } => {
        let response = self.shared.local.handle(request, &self.info).await;
        write_message(&mut self.client, &response).await?;
        return Ok(ConnectionState::LocalResponded);
      }
      Target::Remote { host, port, .. } => (host, port),
    };

    if !self.shared.auth.authorize(&credentials).await {
      let response = proxy_auth_required(request.version());
      write_message(&mut self.client, &response).await?;
      return Ok(ConnectionState::AuthRejected);
    }

    if self.shared.config.intercept {
      if let Some(response) = self.shared.interceptor.intercept(request, &self.info).await {
        write_message(&mut self.client, &response).await?;
        return Ok(ConnectionState::Intercepted);
      }
    }

    self.shared.stats.record_upstream_attempt();
    let connect_timeout = self.shared.config.connect_timeout;
    let upstream = deadline(connect_timeout, "upstream connect", connect(&host, port)).await?;
    let upstream = self.upstream.insert(upstream);

    if request.is_connect() {
      self.client.write_all(CONNECTION_ESTABLISHED).await?;
    } else {
      request.remove_header(&PROXY_AUTHORIZATION);
      let head = match streamed {
        Some(length) => request.encode_declaring(length),
        None => request.encode(),
      };
      upstream.write_all(&head).await?;
    }
    if !surplus.is_empty() {
      upstream.write_all(&surplus).await?;
    }

    self.state.advance(ConnectionState::Bridging);
    match tokio::io::copy_bidirectional(&mut self.client, upstream).await {
      Ok((sent, received)) => {
        tracing::debug!(
          "[PROXY] {} relayed {} bytes up, {} bytes down via {}:{}",
          self.info.peer_addr,
          sent,
          received,
          host,
          port
        );
      }
      Err(e) => {
        tracing::debug!("[PROXY] {} relay ended: {}", self.info.peer_addr, e);
      }
    }
    Ok(ConnectionState::Bridging)
  }

  /// Buffer until a request head is complete and consume it. Heads that are
  /// not requests are discarded.
  async fn read_request(&mut self) -> Result<Message> {
    loop {
      let head_len = self.head_end().await? + 4;
      let decoded = decode(&self.buffer[..head_len]);
      self.buffer.advance(head_len);
      match decoded {
        Ok(message) if message.is_request() => return Ok(message),
        Ok(_) => {
          tracing::debug!("[PROXY] {} sent a response, ignoring", self.info.peer_addr);
        }
        Err(e) => {
          tracing::debug!("[PROXY] {} ignoring head: {}", self.info.peer_addr, e);
        }
      }
    }
  }

  /// Attach the `Content-Length` body of a non-`CONNECT` request once it is
  /// buffered.
  ///
  /// A body larger than `max_body_size` is not buffered. Its declared length
  /// is returned instead and the bytes reach the upstream through the relay.
  async fn read_body(&mut self, request: &mut Message) -> Result<Option<usize>> {
    if request.is_connect() {
      return Ok(None);
    }
    let length = declared_length(request);
    let max_body = self.shared.config.max_body_size;
    if length > max_body {
      tracing::debug!(
        "[PROXY] {} body of {} bytes exceeds {}, relaying unbuffered",
        self.info.peer_addr,
        length,
        max_body
      );
      return Ok(Some(length));
    }
    while self.buffer.len() < length {
      self.fill().await?;
    }
    if length > 0 {
      request.set_body(Some(self.buffer.split_to(length).freeze()));
    }
    Ok(None)
  }

  /// Index of the blank line ending the next head in the buffer.
  async fn head_end(&mut self) -> Result<usize> {
    let max_head = self.shared.config.max_head_size;
    loop {
      if let Some(end) = find_head_end(&self.buffer) {
        if end > max_head {
          return Err(Error::HeadTooLarge(max_head));
        }
        return Ok(end);
      }
      if self.buffer.len() > max_head {
        return Err(Error::HeadTooLarge(max_head));
      }
      self.fill().await?;
    }
  }

  async fn fill(&mut self) -> Result<()> {
    if self.client.read_buf(&mut self.buffer).await? == 0 {
      return Err(new_io_error(
        ErrorKind::UnexpectedEof,
        "client closed before sending a complete request",
      ));
    }
    Ok(())
  }
}

fn declared_length(message: &Message) -> usize {
  message
    .scalar_header(CONTENT_LENGTH)
    .and_then(|v| v.trim().parse::<usize>().ok())
    .unwrap_or_default()
}

fn proxy_auth_required(version: f64) -> Message {
  Message::response(407, "Proxy Authentication Required", version)
    .with_header(PROXY_AUTHENTICATE, HeaderValue::from_static("Basic"))
    .with_body("Proxy authorization failed.")
}

async fn write_message(stream: &mut TcpStream, message: &Message) -> Result<()> {
  stream.write_all(&message.encode()).await?;
  stream.flush().await?;
  Ok(())
}

async fn connect(host: &str, port: u16) -> Result<TcpStream> {
  TcpStream::connect((host, port))
    .await
    .map_err(|e| Error::connection_error(format!("failed to connect to {}:{}: {}", host, port, e)))
}

async fn deadline<T, F>(limit: Option<Duration>, what: &'static str, fut: F) -> Result<T>
where
  F: Future<Output = Result<T>>,
{
  match limit {
    Some(limit) => tokio::time::timeout(limit, fut)
      .await
      .map_err(|_| Error::Timeout(what))?,
    None => fut.await,
  }
}

//! Proxy credentials and the policy that checks them
use std::collections::HashMap;
use std::io::Write;

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use http::header::PROXY_AUTHORIZATION;
use http::HeaderValue;

use crate::message::Message;

const BASIC_PREFIX: &str = "basic ";

/// Username and password recovered from a `Proxy-Authorization: Basic` header.
///
/// Both are empty when the header is missing, repeated, not `Basic`, or not
/// decodable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
  /// username
  pub username: String,
  /// password
  pub password: String,
}

impl Credentials {
  /// Create credentials
  pub fn new<U: Into<String>, P: Into<String>>(username: U, password: P) -> Self {
    Self {
      username: username.into(),
      password: password.into(),
    }
  }

  /// Extract the credentials carried by a request.
  pub fn from_request(request: &Message) -> Self {
    request
      .scalar_header(PROXY_AUTHORIZATION)
      .and_then(Self::from_basic)
      .unwrap_or_default()
  }

  /// Parse a `Basic <base64(user:pass)>` value. The scheme is matched
  /// case-insensitively and the decoded text is split on its first `:`.
  pub fn from_basic(value: &str) -> Option<Self> {
    let prefix = value.get(..BASIC_PREFIX.len())?;
    if !prefix.eq_ignore_ascii_case(BASIC_PREFIX) {
      return None;
    }
    let decoded = BASE64_STANDARD
      .decode(value[BASIC_PREFIX.len()..].trim())
      .ok()?;
    let decoded = String::from_utf8_lossy(&decoded).into_owned();
    let (username, password) = decoded
      .split_once(':')
      .unwrap_or((decoded.as_str(), ""));
    Some(Self::new(username, password))
  }

  /// `true` when neither a username nor a password was supplied.
  pub fn is_empty(&self) -> bool {
    self.username.is_empty() && self.password.is_empty()
  }

  /// Encode as a `Proxy-Authorization` value.
  pub fn to_header_value(&self) -> HeaderValue {
    encode_basic_auth(&self.username, Some(&self.password))
  }
}

/// Encode a `Basic` authorization value.
pub fn encode_basic_auth<U, P>(username: U, password: Option<P>) -> HeaderValue
where
  U: std::fmt::Display,
  P: std::fmt::Display,
{
  use base64::write::EncoderWriter;

  let mut buf = b"Basic ".to_vec();
  {
    let mut encoder = EncoderWriter::new(&mut buf, &BASE64_STANDARD);
    let _ = write!(encoder, "{}:", username);
    if let Some(password) = password {
      let _ = write!(encoder, "{}", password);
    }
  }
  // base64 output is always a valid header value
  let mut header = HeaderValue::from_bytes(&buf).unwrap_or_else(|_| HeaderValue::from_static("Basic"));
  header.set_sensitive(true);
  header
}

/// Decides whether a client may use the proxy.
#[async_trait::async_trait]
pub trait AuthPolicy: Send + Sync {
  /// Return `true` to let the request through.
  async fn authorize(&self, credentials: &Credentials) -> bool;
}

#[async_trait::async_trait]
impl<F> AuthPolicy for F
where
  F: Fn(&Credentials) -> bool + Send + Sync,
{
  async fn authorize(&self, credentials: &Credentials) -> bool {
    self(credentials)
  }
}

/// Accepts every client, with or without credentials.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

#[async_trait::async_trait]
impl AuthPolicy for AcceptAll {
  async fn authorize(&self, _credentials: &Credentials) -> bool {
    true
  }
}

/// A fixed username to password table.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
  users: HashMap<String, String>,
}

impl StaticCredentials {
  /// Create an empty table, which rejects everyone.
  pub fn new() -> Self {
    Self::default()
  }

  /// Add or replace a user.
  pub fn with_user<U: Into<String>, P: Into<String>>(mut self, username: U, password: P) -> Self {
    self.users.insert(username.into(), password.into());
    self
  }
}

impl<U: Into<String>, P: Into<String>> FromIterator<(U, P)> for StaticCredentials {
  fn from_iter<I: IntoIterator<Item = (U, P)>>(iter: I) -> Self {
    Self {
      users: iter
        .into_iter()
        .map(|(u, p)| (u.into(), p.into()))
        .collect(),
    }
  }
}

#[async_trait::async_trait]
impl AuthPolicy for StaticCredentials {
  async fn authorize(&self, credentials: &Credentials) -> bool {
    self
      .users
      .get(&credentials.username)
      .is_some_and(|password| *password == credentials.password)
  }
}

use std::fmt::{Debug, Formatter};

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// The first line of a [`Message`].
///
/// A message is either a request or a response, never both and never neither,
/// so the role lives in the variant instead of in a pair of flags.
#[derive(Debug, Clone, PartialEq)]
pub enum StartLine {
  /// `METHOD URL HTTP/<version>`
  Request {
    /// Upper-cased request method
    method: String,
    /// Raw request target: absolute url, authority form, or origin-relative path
    url: String,
  },
  /// `HTTP/<version> STATUS REASON`
  Response {
    /// Status code
    status: u16,
    /// Reason phrase, may be empty
    reason: String,
  },
}

/// An HTTP/1.x message as read off, or written to, the wire.
///
/// Header names are stored lower-cased by [`HeaderMap`]; a repeated name keeps
/// every value in arrival order.
#[derive(Clone, PartialEq)]
pub struct Message {
  start: StartLine,
  version: f64,
  headers: HeaderMap<HeaderValue>,
  body: Option<Bytes>,
}

impl Debug for Message {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
    let mut s = match &self.start {
      StartLine::Request { method, url } => {
        let mut s = f.debug_struct("Request");
        s.field("method", method).field("url", url);
        s
      }
      StartLine::Response { status, reason } => {
        let mut s = f.debug_struct("Response");
        s.field("status", status).field("reason", reason);
        s
      }
    };
    s.field("version", &self.version)
      .field("headers", &self.headers)
      .field(
        "body",
        &self.body.as_ref().map(|b| format!("{}", b.escape_ascii())),
      )
      .finish()
  }
}

impl Message {
  /// Create a request with no headers and no body. The method is upper-cased.
  pub fn request<M: AsRef<str>, U: Into<String>>(method: M, url: U, version: f64) -> Self {
    Self::new(
      StartLine::Request {
        method: method.as_ref().to_uppercase(),
        url: url.into(),
      },
      version,
    )
  }

  /// Create a response with no headers and no body.
  pub fn response<R: Into<String>>(status: u16, reason: R, version: f64) -> Self {
    Self::new(
      StartLine::Response {
        status,
        reason: reason.into(),
      },
      version,
    )
  }

  pub(crate) fn new(start: StartLine, version: f64) -> Self {
    Self {
      start,
      version,
      headers: HeaderMap::new(),
      body: None,
    }
  }

  /// Append a header, keeping any value already stored under the same name.
  pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
    self.headers.append(name, value);
    self
  }

  /// Set the body.
  pub fn with_body<B: Into<Bytes>>(mut self, body: B) -> Self {
    self.body = Some(body.into());
    self
  }

  /// The first line.
  pub fn start_line(&self) -> &StartLine {
    &self.start
  }

  /// `true` when this is a request.
  pub fn is_request(&self) -> bool {
    matches!(self.start, StartLine::Request { .. })
  }

  /// `true` when this is a response.
  pub fn is_response(&self) -> bool {
    matches!(self.start, StartLine::Response { .. })
  }

  /// Protocol version, e.g. `1.1`.
  pub fn version(&self) -> f64 {
    self.version
  }

  /// Request method, `None` for a response.
  pub fn method(&self) -> Option<&str> {
    match &self.start {
      StartLine::Request { method, .. } => Some(method),
      StartLine::Response { .. } => None,
    }
  }

  /// Request target, `None` for a response.
  pub fn url(&self) -> Option<&str> {
    match &self.start {
      StartLine::Request { url, .. } => Some(url),
      StartLine::Response { .. } => None,
    }
  }

  /// Status code, `None` for a request.
  pub fn status(&self) -> Option<u16> {
    match &self.start {
      StartLine::Response { status, .. } => Some(*status),
      StartLine::Request { .. } => None,
    }
  }

  /// Reason phrase, `None` for a request.
  pub fn reason(&self) -> Option<&str> {
    match &self.start {
      StartLine::Response { reason, .. } => Some(reason),
      StartLine::Request { .. } => None,
    }
  }

  /// `true` for a `CONNECT` request.
  pub fn is_connect(&self) -> bool {
    self.method() == Some(http::Method::CONNECT.as_str())
  }

  /// Headers.
  pub fn headers(&self) -> &HeaderMap<HeaderValue> {
    &self.headers
  }

  /// Mutable headers.
  pub fn headers_mut(&mut self) -> &mut HeaderMap<HeaderValue> {
    &mut self.headers
  }

  /// Drop every value of `name`. Unlike [`HeaderMap::remove`], the headers
  /// that remain keep the order they arrived in.
  pub fn remove_header(&mut self, name: &HeaderName) -> bool {
    if !self.headers.contains_key(name) {
      return false;
    }
    let mut kept = HeaderMap::with_capacity(self.headers.len());
    let mut current: Option<HeaderName> = None;
    for (key, value) in std::mem::take(&mut self.headers) {
      if let Some(key) = key {
        current = Some(key);
      }
      match &current {
        Some(key) if key != name => {
          kept.append(key.clone(), value);
        }
        _ => {}
      }
    }
    self.headers = kept;
    true
  }

  /// The value of `name` when it occurs exactly once and is valid text.
  ///
  /// A header that was sent more than once is a sequence, not a scalar, and
  /// yields `None`.
  pub fn scalar_header<K: http::header::AsHeaderName>(&self, name: K) -> Option<&str> {
    let mut values = self.headers.get_all(name).iter();
    match (values.next(), values.next()) {
      (Some(value), None) => value.to_str().ok(),
      _ => None,
    }
  }

  /// Body, `None` when the message carried none. An empty body is distinct from no body.
  pub fn body(&self) -> Option<&Bytes> {
    self.body.as_ref()
  }

  /// Replace the body.
  pub fn set_body(&mut self, body: Option<Bytes>) {
    self.body = body;
  }

  /// Byte length of the body, zero when there is none.
  pub fn content_length(&self) -> usize {
    self.body.as_ref().map(|b| b.len()).unwrap_or_default()
  }
}

/// Render a lower-case header name in Train-Case: the first letter and every
/// letter following a `-` are upper-cased, e.g. `proxy-authenticate` becomes
/// `Proxy-Authenticate`.
pub fn train_case(name: &str) -> String {
  let mut out = String::with_capacity(name.len());
  let mut upper = true;
  for c in name.chars() {
    if upper {
      out.extend(c.to_uppercase());
    } else {
      out.push(c);
    }
    upper = c == '-';
  }
  out
}

// Diagnostic rendering: a header sent once is a string, a repeated header an array.
impl Serialize for Message {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(None)?;
    map.serialize_entry("isRequest", &self.is_request())?;
    map.serialize_entry("isResponse", &self.is_response())?;
    map.serialize_entry("version", &self.version)?;
    match &self.start {
      StartLine::Request { method, url } => {
        map.serialize_entry("method", method)?;
        map.serialize_entry("url", url)?;
      }
      StartLine::Response { status, reason } => {
        map.serialize_entry("status", status)?;
        map.serialize_entry("statusMessage", reason)?;
      }
    }
    map.serialize_entry("headers", &HeadersView(&self.headers))?;
    if let Some(body) = &self.body {
      map.serialize_entry("body", &String::from_utf8_lossy(body))?;
    }
    map.end()
  }
}

struct HeadersView<'a>(&'a HeaderMap<HeaderValue>);

impl Serialize for HeadersView<'_> {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.0.keys_len()))?;
    for name in self.0.keys() {
      let values: Vec<String> = self
        .0
        .get_all(name)
        .iter()
        .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
        .collect();
      if values.len() == 1 {
        map.serialize_entry(name.as_str(), &values[0])?;
      } else {
        map.serialize_entry(name.as_str(), &values)?;
      }
    }
    map.end()
  }
}

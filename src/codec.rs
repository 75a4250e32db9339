//! HTTP/1.x message framing
use bytes::Bytes;
use http::{HeaderName, HeaderValue};

use crate::errors::{Error, Result};
use crate::message::{train_case, Message, StartLine};
use crate::{COLON_SPACE, CR_LF, SPACE};

const HEAD_END: &[u8] = b"\r\n\r\n";

/// Index of the blank line that ends the head, i.e. the position of the
/// first `\r\n\r\n`. The head spans `buf[..index]` and the body starts at
/// `index + 4`.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
  buf.windows(HEAD_END.len()).position(|w| w == HEAD_END)
}

/// Decode a buffer into a [`Message`].
///
/// The role is taken from the shape of the first line: a trailing
/// `HTTP/<version>` token makes it a request line, otherwise a leading one
/// makes it a status line. Anything else is [`Error::NotHttp`].
///
/// Bytes after the blank line that ends the head become the body; without a
/// blank line every remaining line is read as a header and there is no body.
pub fn decode(buf: &[u8]) -> Result<Message> {
  let (head, body) = match find_head_end(buf) {
    Some(end) => (&buf[..end], &buf[end + HEAD_END.len()..]),
    None => (buf, &[][..]),
  };
  let mut lines = CrLfLines { rest: Some(head) };
  let first = lines.next().unwrap_or_default();
  let (start, version) = parse_start_line(&String::from_utf8_lossy(first))?;
  let mut message = Message::new(start, version);
  for line in lines {
    if line.is_empty() {
      break;
    }
    let (name, value) = split_header(line);
    match (
      HeaderName::from_bytes(name),
      HeaderValue::from_bytes(value),
    ) {
      (Ok(name), Ok(value)) => {
        message.headers_mut().append(name, value);
      }
      _ => {
        tracing::trace!("skipping header line {}", line.escape_ascii());
      }
    }
  }
  if !body.is_empty() {
    message.set_body(Some(Bytes::copy_from_slice(body)));
  }
  Ok(message)
}

impl Message {
  /// Serialize to wire bytes.
  ///
  /// `Content-Length` always reflects the body actually carried: a stored
  /// value is replaced in place, otherwise the header is appended. Header
  /// names are written in Train-Case, one line per stored value.
  pub fn encode(&self) -> Bytes {
    self.encode_declaring(self.content_length())
  }

  /// Like [`Message::encode`] but announcing `content_length`, for a body
  /// that follows on the wire instead of being carried here.
  pub(crate) fn encode_declaring(&self, content_length: usize) -> Bytes {
    let mut raw = Vec::new();
    match self.start_line() {
      StartLine::Request { method, url } => {
        raw.extend(method.as_bytes());
        raw.extend(SPACE);
        raw.extend(url.as_bytes());
        raw.extend(SPACE);
        raw.extend(render_version(self.version()).as_bytes());
      }
      StartLine::Response { status, reason } => {
        raw.extend(render_version(self.version()).as_bytes());
        raw.extend(SPACE);
        raw.extend(status.to_string().as_bytes());
        raw.extend(SPACE);
        raw.extend(reason.as_bytes());
      }
    }
    raw.extend(CR_LF);
    let content_length = content_length.to_string();
    let mut wrote_length = false;
    for name in self.headers().keys() {
      let rendered = train_case(name.as_str());
      if name == http::header::CONTENT_LENGTH {
        push_header(&mut raw, &rendered, content_length.as_bytes());
        wrote_length = true;
        continue;
      }
      for value in self.headers().get_all(name) {
        push_header(&mut raw, &rendered, value.as_bytes());
      }
    }
    if !wrote_length {
      push_header(&mut raw, "Content-Length", content_length.as_bytes());
    }
    raw.extend(CR_LF);
    if let Some(body) = self.body() {
      raw.extend(body.as_ref());
    }
    Bytes::from(raw)
  }
}

fn push_header(raw: &mut Vec<u8>, name: &str, value: &[u8]) {
  raw.extend(name.as_bytes());
  raw.extend(COLON_SPACE);
  raw.extend(value);
  raw.extend(CR_LF);
}

// `HTTP/1.0` rather than `HTTP/1`: integral versions keep one decimal.
fn render_version(version: f64) -> String {
  if version.fract() == 0.0 {
    format!("HTTP/{:.1}", version)
  } else {
    format!("HTTP/{}", version)
  }
}

/// `HTTP/<finite number>` split into its version.
fn protocol_version(token: &str) -> Option<f64> {
  let mut parts = token.split('/');
  match (parts.next(), parts.next(), parts.next()) {
    (Some("HTTP"), Some(version), None) => version.parse::<f64>().ok().filter(|v| v.is_finite()),
    _ => None,
  }
}

fn parse_start_line(line: &str) -> Result<(StartLine, f64)> {
  let tokens: Vec<&str> = line.split(' ').collect();
  let last = tokens.last().copied().unwrap_or_default();
  if let (Some(version), Some(url)) = (protocol_version(last), tokens.get(1)) {
    if tokens.len() >= 3 {
      let start = StartLine::Request {
        method: tokens[0].to_uppercase(),
        url: url.to_string(),
      };
      return Ok((start, version));
    }
  }
  if let Some(version) = protocol_version(tokens[0]) {
    let status = tokens
      .get(1)
      .and_then(|s| s.parse::<u16>().ok())
      .ok_or_else(|| Error::NotHttp(line.to_string()))?;
    let start = StartLine::Response {
      status,
      reason: tokens[2.min(tokens.len())..].join(" "),
    };
    return Ok((start, version));
  }
  Err(Error::NotHttp(line.to_string()))
}

/// Split on the first `": "`; a line without one is all name.
fn split_header(line: &[u8]) -> (&[u8], &[u8]) {
  match line
    .windows(COLON_SPACE.len())
    .position(|w| w == COLON_SPACE)
  {
    Some(index) => (&line[..index], &line[index + COLON_SPACE.len()..]),
    None => (line, &[][..]),
  }
}

struct CrLfLines<'a> {
  rest: Option<&'a [u8]>,
}

impl<'a> Iterator for CrLfLines<'a> {
  type Item = &'a [u8];

  fn next(&mut self) -> Option<Self::Item> {
    let rest = self.rest?;
    match rest.windows(CR_LF.len()).position(|w| w == CR_LF) {
      Some(index) => {
        self.rest = Some(&rest[index + CR_LF.len()..]);
        Some(&rest[..index])
      }
      None => {
        self.rest = None;
        Some(rest)
      }
    }
  }
}

//! Effective target of a proxied request
use http::uri::Scheme;
use http::Uri;

use crate::errors::{Error, Result};

/// Authority that origin-relative request targets are resolved against.
pub const LOCAL_AUTHORITY: &str = "localhost";

/// Where a request is headed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
  /// Addressed to the proxy itself (`GET /status`).
  Local {
    /// Resolved against [`LOCAL_AUTHORITY`]
    uri: Uri,
  },
  /// Addressed to an upstream host.
  Remote {
    /// Resolved url, scheme included
    uri: Uri,
    /// Host to connect to, without IPv6 brackets
    host: String,
    /// Port to connect to
    port: u16,
  },
}

impl Target {
  /// Resolve the target of a request from its method and raw url.
  ///
  /// A url starting with `/` is local. Otherwise a url without `://` gets
  /// `http://` prepended, or `https://` for `CONNECT`; an explicit scheme on a
  /// `CONNECT` gains a trailing `s` unless it has one. The port is the url's
  /// own when present, else 443 for `CONNECT` and 80 for everything else.
  pub fn resolve(method: &str, url: &str) -> Result<Self> {
    let connect = method == http::Method::CONNECT.as_str();
    if url.starts_with('/') {
      let uri: Uri = format!("http://{}{}", LOCAL_AUTHORITY, url).parse()?;
      return Ok(Target::Local { uri });
    }
    let uri: Uri = if url.contains("://") {
      url.parse()?
    } else {
      let scheme = if connect { Scheme::HTTPS } else { Scheme::HTTP };
      format!("{}://{}", scheme, url).parse()?
    };
    let uri = if connect { secure_scheme(uri)? } else { uri };
    let host = uri
      .host()
      .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
      .filter(|h| !h.is_empty())
      .ok_or_else(|| Error::invalid_target(format!("no host in {}", url)))?
      .to_string();
    let port = uri
      .port_u16()
      .unwrap_or(if connect { 443 } else { 80 });
    Ok(Target::Remote { uri, host, port })
  }

  /// `true` when the request is for the proxy itself.
  pub fn is_local(&self) -> bool {
    matches!(self, Target::Local { .. })
  }

  /// Resolved url.
  pub fn uri(&self) -> &Uri {
    match self {
      Target::Local { uri } | Target::Remote { uri, .. } => uri,
    }
  }
}

fn secure_scheme(uri: Uri) -> Result<Uri> {
  let scheme: Scheme = match uri.scheme_str() {
    Some(scheme) if !scheme.ends_with('s') => format!("{}s", scheme).parse()?,
    _ => return Ok(uri),
  };
  let mut parts = uri.into_parts();
  parts.scheme = Some(scheme);
  Ok(Uri::from_parts(parts)?)
}

//! proxy error
use thiserror::Error as ThisError;
/// A `Result` alias where the `Err` case is `slinger_proxy::Error`.
pub type Result<T> = std::result::Result<T, Error>;
/// The Errors that may occur while framing messages or driving a proxied connection.
#[derive(ThisError, Debug)]
pub enum Error {
  /// Error
  #[error(transparent)]
  IO(#[from] std::io::Error),
  /// The first line is neither a request line nor a status line
  #[error("not an http message: {0}")]
  NotHttp(String),
  /// The request target could not be resolved to a url
  #[error("invalid target: {0}")]
  InvalidTarget(String),
  /// The request head grew past the configured bound
  #[error("request head exceeds {0} bytes")]
  HeadTooLarge(usize),
  /// A deadline elapsed
  #[error("timed out waiting for {0}")]
  Timeout(&'static str),
  /// Upstream connection error
  #[error("connection error: {0}")]
  ConnectionError(String),
  /// Unknown Error
  #[error("{0}")]
  Other(String),
}

impl Error {
  /// Create an invalid target error and log it
  pub fn invalid_target(msg: impl Into<String>) -> Self {
    let error = Error::InvalidTarget(msg.into());
    tracing::debug!("{}", error);
    error
  }

  /// Create a connection error and log it
  pub fn connection_error(msg: impl Into<String>) -> Self {
    let error = Error::ConnectionError(msg.into());
    tracing::debug!("{}", error);
    error
  }

  /// Create an other error and log it
  pub fn other(msg: impl Into<String>) -> Self {
    let error = Error::Other(msg.into());
    tracing::error!("{}", error);
    error
  }
}

impl From<http::uri::InvalidUri> for Error {
  fn from(value: http::uri::InvalidUri) -> Self {
    Error::invalid_target(value.to_string())
  }
}

impl From<http::uri::InvalidUriParts> for Error {
  fn from(value: http::uri::InvalidUriParts) -> Self {
    Error::invalid_target(value.to_string())
  }
}

pub(crate) fn new_io_error(error_kind: std::io::ErrorKind, msg: &str) -> Error {
  Error::IO(std::io::Error::new(error_kind, msg))
}

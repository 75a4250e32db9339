#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! # slinger-proxy
//!
//! The `slinger-proxy` crate provides a small forward HTTP proxy: a
//! [`ProxyServer`] that reads a request head off each client connection and
//! decides, from that single request, whether to
//!
//! - answer it locally (origin-relative targets such as `GET /status`),
//! - reject it with a `407` [Basic challenge](#authentication),
//! - answer it on the upstream's behalf through an [`Interceptor`], or
//! - open an upstream connection and relay bytes both ways, tunneling for
//!   `CONNECT` and re-serializing the request for every other method.
//!
//! The message framing lives in [`Message`], [`decode`] and
//! [`Message::encode`] and can be used on its own.
//!
//! ## Running a proxy
//!
//! ```no_run
//! use slinger_proxy::{ProxyConfig, ProxyServer};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!   let config = ProxyConfig {
//!     host: "127.0.0.1".to_string(),
//!     port: 8080,
//!     ..Default::default()
//!   };
//!   ProxyServer::new(config).run().await?;
//!   Ok(())
//! }
//! ```
//!
//! ## Authentication
//!
//! Any [`AuthPolicy`] can be plugged in; closures over [`Credentials`] work too.
//!
//! ```no_run
//! use slinger_proxy::{Credentials, ProxyServer, StaticCredentials};
//!
//! let server = ProxyServer::builder()
//!   .auth(StaticCredentials::new().with_user("alice", "secret"))
//!   .build();
//! let server = ProxyServer::builder()
//!   .auth(|c: &Credentials| c.username == "alice")
//!   .build();
//! ```
//!
//! ## Framing
//!
//! ```rust
//! let message = slinger_proxy::decode(b"GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\n\r\n").unwrap();
//! assert_eq!(message.method(), Some("GET"));
//! assert_eq!(
//!   message.encode().as_ref(),
//!   b"GET http://example.com/ HTTP/1.1\r\nHost: example.com\r\nContent-Length: 0\r\n\r\n"
//! );
//! ```
//!
//! ## Limitations
//!
//! One request is acted upon per client connection; after the relay starts,
//! further bytes are forwarded untouched. Upstream connect failures close the
//! client connection without a response.
mod auth;
mod codec;
mod config;
mod connection;
mod errors;
mod interceptor;
mod message;
mod server;
mod stats;
mod target;

pub use auth::{encode_basic_auth, AcceptAll, AuthPolicy, Credentials, StaticCredentials};
pub use codec::{decode, find_head_end};
pub use config::ProxyConfig;
pub use connection::{ConnectionState, CONNECTION_ESTABLISHED};
pub use errors::{Error, Result};
pub use http::header;
pub use interceptor::{
  ClientInfo, DiagnosticHandler, Interceptor, InterceptorChain, LocalHandler, LoggingInterceptor,
  PassThrough,
};
pub use message::{train_case, Message, StartLine};
pub use server::{ProxyServer, ProxyServerBuilder};
pub use stats::{ProxyStats, StatsSnapshot};
pub use target::{Target, LOCAL_AUTHORITY};

pub(crate) const CR_LF: &[u8] = &[13, 10];
pub(crate) const SPACE: &[u8] = &[32];
pub(crate) const COLON_SPACE: &[u8] = &[58, 32];

//! Forward proxy that answers one host itself
//!
//! Requests for `http://is_on_simpleproxy/` are answered with `true` by the
//! proxy; everything else is forwarded. Every request is also logged.
//!
//! To run:
//! ```bash
//! cargo run --example intercepting_proxy
//! curl -x http://127.0.0.1:8080 http://is_on_simpleproxy/
//! ```

use slinger_proxy::{
  AcceptAll, ClientInfo, InterceptorChain, LoggingInterceptor, Message, ProxyConfig, ProxyServer,
  Target,
};
use tracing_subscriber::EnvFilter;

fn answer_presence_check(request: &Message, _client: &ClientInfo) -> Option<Message> {
  let target = Target::resolve(request.method()?, request.url()?).ok()?;
  if target.uri().host() == Some("is_on_simpleproxy") {
    return Some(Message::response(200, "OK", request.version()).with_body("true"));
  }
  None
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let config = ProxyConfig {
    host: "127.0.0.1".to_string(),
    port: 8080,
    intercept: true,
    ..Default::default()
  };
  let server = ProxyServer::builder()
    .config(config)
    .auth(AcceptAll)
    .interceptor(
      InterceptorChain::new()
        .with(LoggingInterceptor)
        .with(answer_presence_check),
    )
    .build();

  println!("Starting intercepting proxy on {}", server.config().listen_addr());
  server.run().await?;
  Ok(())
}

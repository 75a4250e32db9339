//! Integration tests for slinger-proxy

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use slinger_proxy::{
  decode, find_head_end, ClientInfo, Credentials, Message, ProxyConfig, ProxyServer,
  ProxyServerBuilder, ProxyStats, Target, CONNECTION_ESTABLISHED,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Bind the proxy on an ephemeral loopback port and serve it in the background
async fn start_proxy(builder: ProxyServerBuilder) -> (SocketAddr, Arc<ProxyStats>) {
  let server = builder.build();
  let stats = server.stats();
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn(async move { server.serve(listener).await });
  (addr, stats)
}

fn loopback_config() -> ProxyConfig {
  ProxyConfig {
    host: "127.0.0.1".to_string(),
    port: 0,
    ..Default::default()
  }
}

/// Read until the blank line ending a head, then the `Content-Length` body
async fn read_message(stream: &mut TcpStream) -> Vec<u8> {
  let mut buf = Vec::new();
  let mut chunk = [0u8; 4096];
  loop {
    if let Some(end) = find_head_end(&buf) {
      let head = decode(&buf[..end + 4]).unwrap();
      let length: usize = head
        .scalar_header("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or_default();
      if buf.len() >= end + 4 + length {
        return buf;
      }
    }
    let n = stream.read(&mut chunk).await.unwrap();
    if n == 0 {
      return buf;
    }
    buf.extend_from_slice(&chunk[..n]);
  }
}

/// An upstream that answers a single request with `response` and returns what it received
async fn one_shot_upstream(response: &'static [u8]) -> (SocketAddr, JoinHandle<Vec<u8>>) {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  let handle = tokio::spawn(async move {
    let (mut stream, _) = listener.accept().await.unwrap();
    let received = read_message(&mut stream).await;
    stream.write_all(response).await.unwrap();
    stream.shutdown().await.ok();
    received
  });
  (addr, handle)
}

/// An upstream that echoes every byte of a single connection
async fn echo_upstream() -> SocketAddr {
  let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let addr = listener.local_addr().unwrap();
  tokio::spawn(async move {
    let (mut stream, _) = listener.accept().await.unwrap();
    let (mut read, mut write) = stream.split();
    tokio::io::copy(&mut read, &mut write).await.ok();
  });
  addr
}

async fn exchange(proxy: SocketAddr, request: &[u8]) -> Vec<u8> {
  let mut client = TcpStream::connect(proxy).await.unwrap();
  client.write_all(request).await.unwrap();
  let mut response = Vec::new();
  let _ = tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut response)).await;
  response
}

#[tokio::test]
async fn local_route_skips_auth_and_upstream() {
  let (proxy, stats) =
    start_proxy(ProxyServer::builder().config(loopback_config()).auth(|_: &Credentials| false)).await;

  let response = exchange(proxy, b"GET /status HTTP/1.1\r\nHost: proxy\r\n\r\n").await;
  let message = decode(&response).unwrap();
  assert_eq!(message.status(), Some(200));
  let body = String::from_utf8_lossy(message.body().unwrap()).into_owned();
  assert!(body.starts_with("Proxy OK\nYou requested:\n"));
  assert!(body.contains("/status"));

  let snapshot = stats.snapshot();
  assert_eq!(snapshot.local_responded, 1);
  assert_eq!(snapshot.auth_rejected, 0);
  assert_eq!(snapshot.upstream_attempts, 0);
}

#[tokio::test]
async fn custom_local_handler_sees_client_addresses() {
  let handler = |request: &Message, client: &ClientInfo| {
    Message::response(200, "OK", request.version()).with_body(client.local_addr.to_string())
  };
  let (proxy, _) =
    start_proxy(ProxyServer::builder().config(loopback_config()).local_handler(handler)).await;

  let response = exchange(proxy, b"GET /whoami HTTP/1.0\r\n\r\n").await;
  let message = decode(&response).unwrap();
  assert_eq!(message.version(), 1.0);
  assert_eq!(message.body().unwrap().as_ref(), proxy.to_string().as_bytes());
}

#[tokio::test]
async fn rejected_client_gets_basic_challenge() {
  let (upstream, _) = one_shot_upstream(b"HTTP/1.1 200 OK\r\n\r\n").await;
  let (proxy, stats) =
    start_proxy(ProxyServer::builder().config(loopback_config()).auth(|_: &Credentials| false)).await;

  let request = format!("GET http://{}/ HTTP/1.1\r\nHost: x\r\n\r\n", upstream);
  let response = exchange(proxy, request.as_bytes()).await;
  let text = String::from_utf8_lossy(&response);
  assert!(text.starts_with("HTTP/1.1 407 "));
  assert!(text.contains("\r\nProxy-Authenticate: Basic\r\n"));
  assert!(text.ends_with("Proxy authorization failed."));

  let snapshot = stats.snapshot();
  assert_eq!(snapshot.auth_rejected, 1);
  assert_eq!(snapshot.upstream_attempts, 0);
}

#[tokio::test]
async fn basic_credentials_reach_the_policy() {
  let seen = Arc::new(Mutex::new(Vec::new()));
  let record = seen.clone();
  let auth = move |c: &Credentials| {
    record.lock().unwrap().push(c.clone());
    false
  };
  let (proxy, _) = start_proxy(ProxyServer::builder().config(loopback_config()).auth(auth)).await;

  // base64("alice:secret")
  exchange(
    proxy,
    b"GET http://x/ HTTP/1.1\r\nProxy-Authorization: Basic YWxpY2U6c2VjcmV0\r\n\r\n",
  )
  .await;
  exchange(proxy, b"GET http://x/ HTTP/1.1\r\n\r\n").await;

  let seen = seen.lock().unwrap();
  assert_eq!(
    *seen,
    vec![Credentials::new("alice", "secret"), Credentials::default()]
  );
}

fn answer_intercepted_host(request: &Message, _client: &ClientInfo) -> Option<Message> {
  let target = Target::resolve(request.method()?, request.url()?).ok()?;
  if target.uri().host() == Some("intercepted.test") {
    return Some(Message::response(200, "OK", request.version()).with_body("intercepted"));
  }
  None
}

#[tokio::test]
async fn interceptor_short_circuits_matching_host() {
  let config = ProxyConfig {
    intercept: true,
    ..loopback_config()
  };
  let (proxy, stats) = start_proxy(
    ProxyServer::builder()
      .config(config)
      .interceptor(answer_intercepted_host),
  )
  .await;

  let response = exchange(proxy, b"GET http://intercepted.test/ HTTP/1.1\r\n\r\n").await;
  let message = decode(&response).unwrap();
  assert_eq!(message.body().unwrap().as_ref(), b"intercepted");
  assert_eq!(stats.snapshot().intercepted, 1);
  assert_eq!(stats.snapshot().upstream_attempts, 0);

  let (upstream, received) = one_shot_upstream(b"HTTP/1.1 200 OK\r\nContent-Length: 8\r\n\r\nupstream").await;
  let request = format!("GET http://{}/ HTTP/1.1\r\n\r\n", upstream);
  let response = exchange(proxy, request.as_bytes()).await;
  assert_eq!(response, b"HTTP/1.1 200 OK\r\nContent-Length: 8\r\n\r\nupstream");
  assert!(!received.await.unwrap().is_empty());
  assert_eq!(stats.snapshot().upstream_attempts, 1);
}

#[tokio::test]
async fn interceptor_is_ignored_when_disabled() {
  let (proxy, stats) = start_proxy(
    ProxyServer::builder()
      .config(loopback_config())
      .interceptor(|_: &Message, _: &ClientInfo| Some(Message::response(500, "", 1.1))),
  )
  .await;
  let (upstream, _) = one_shot_upstream(b"HTTP/1.1 204 No Content\r\n\r\n").await;
  let request = format!("GET http://{}/ HTTP/1.1\r\n\r\n", upstream);
  let response = exchange(proxy, request.as_bytes()).await;
  assert_eq!(response, b"HTTP/1.1 204 No Content\r\n\r\n");
  assert_eq!(stats.snapshot().intercepted, 0);
}

#[tokio::test]
async fn plain_request_is_reencoded_without_proxy_authorization() {
  let (upstream, received) = one_shot_upstream(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok").await;
  let (proxy, _) = start_proxy(ProxyServer::builder().config(loopback_config())).await;

  let request = format!(
    "get http://{0}/path?q=1 HTTP/1.1\r\nhost: {0}\r\nproxy-authorization: Basic YWxpY2U6c2VjcmV0\r\nx-trace: a\r\nx-trace: b\r\naccept: */*\r\n\r\n",
    upstream
  );
  let response = exchange(proxy, request.as_bytes()).await;
  assert_eq!(response, b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok");

  let received = String::from_utf8(received.await.unwrap()).unwrap();
  assert!(received.starts_with(&format!("GET http://{}/path?q=1 HTTP/1.1\r\n", upstream)));
  assert!(received.contains(&format!(
    "\r\nHost: {}\r\nX-Trace: a\r\nX-Trace: b\r\nAccept: */*\r\nContent-Length: 0\r\n\r\n",
    upstream
  )));
  assert!(!received.to_ascii_lowercase().contains("proxy-authorization"));
}

#[tokio::test]
async fn body_split_across_reads_is_forwarded_whole() {
  let (upstream, received) = one_shot_upstream(b"HTTP/1.1 201 Created\r\n\r\n").await;
  let (proxy, _) = start_proxy(ProxyServer::builder().config(loopback_config())).await;

  let mut client = TcpStream::connect(proxy).await.unwrap();
  let head = format!(
    "POST http://{}/upload HTTP/1.1\r\nContent-Length: 11\r\n\r\nhello",
    upstream
  );
  client.write_all(head.as_bytes()).await.unwrap();
  tokio::time::sleep(Duration::from_millis(50)).await;
  client.write_all(b" world").await.unwrap();

  let mut response = Vec::new();
  client.read_to_end(&mut response).await.unwrap();
  assert_eq!(response, b"HTTP/1.1 201 Created\r\n\r\n");

  let received = decode(&received.await.unwrap()).unwrap();
  assert_eq!(received.method(), Some("POST"));
  assert_eq!(received.scalar_header("content-length"), Some("11"));
  assert_eq!(received.body().unwrap().as_ref(), b"hello world");
}

#[tokio::test]
async fn oversized_body_is_relayed_unbuffered() {
  let (upstream, received) = one_shot_upstream(b"HTTP/1.1 201 Created\r\n\r\n").await;
  let config = ProxyConfig {
    max_body_size: 16,
    ..loopback_config()
  };
  let (proxy, stats) = start_proxy(ProxyServer::builder().config(config)).await;

  let body: Vec<u8> = (0..64u8).collect();
  let mut client = TcpStream::connect(proxy).await.unwrap();
  let mut head = format!(
    "POST http://{}/upload HTTP/1.1\r\nContent-Length: 64\r\n\r\n",
    upstream
  )
  .into_bytes();
  head.extend_from_slice(&body[..10]);
  client.write_all(&head).await.unwrap();
  tokio::time::sleep(Duration::from_millis(50)).await;
  client.write_all(&body[10..]).await.unwrap();

  let mut response = Vec::new();
  let read = tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut response)).await;
  assert!(read.is_ok());
  assert_eq!(response, b"HTTP/1.1 201 Created\r\n\r\n");

  let received = decode(&received.await.unwrap()).unwrap();
  assert_eq!(received.scalar_header("content-length"), Some("64"));
  assert_eq!(received.body().unwrap().as_ref(), &body[..]);
  assert_eq!(stats.snapshot().upstream_attempts, 1);
}

#[tokio::test]
async fn slow_body_is_not_bound_by_head_timeout() {
  let (upstream, received) = one_shot_upstream(b"HTTP/1.1 204 No Content\r\n\r\n").await;
  let config = ProxyConfig {
    head_timeout: Some(Duration::from_millis(100)),
    ..loopback_config()
  };
  let (proxy, _) = start_proxy(ProxyServer::builder().config(config)).await;

  let mut client = TcpStream::connect(proxy).await.unwrap();
  let head = format!("PUT http://{}/slow HTTP/1.1\r\nContent-Length: 5\r\n\r\n", upstream);
  client.write_all(head.as_bytes()).await.unwrap();
  tokio::time::sleep(Duration::from_millis(300)).await;
  client.write_all(b"hello").await.unwrap();

  let mut response = Vec::new();
  client.read_to_end(&mut response).await.unwrap();
  assert_eq!(response, b"HTTP/1.1 204 No Content\r\n\r\n");
  let received = decode(&received.await.unwrap()).unwrap();
  assert_eq!(received.body().unwrap().as_ref(), b"hello");
}

#[tokio::test]
async fn connect_timeout_bounds_unreachable_upstream() {
  let config = ProxyConfig {
    connect_timeout: Some(Duration::from_millis(100)),
    ..loopback_config()
  };
  let (proxy, stats) = start_proxy(ProxyServer::builder().config(config)).await;

  // non-routable, so the connect either hangs or fails outright
  let mut client = TcpStream::connect(proxy).await.unwrap();
  client.write_all(b"CONNECT 10.255.255.1:9 HTTP/1.1\r\n\r\n").await.unwrap();
  let mut response = Vec::new();
  let read = tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut response)).await;
  assert!(read.is_ok(), "connect deadline did not close the client");
  assert!(response.is_empty());
  let snapshot = stats.snapshot();
  assert_eq!(snapshot.upstream_attempts, 1);
  assert_eq!(snapshot.errored, 1);
}

#[tokio::test]
async fn connect_tunnel_relays_raw_bytes() {
  let upstream = echo_upstream().await;
  let (proxy, stats) = start_proxy(ProxyServer::builder().config(loopback_config())).await;

  let mut client = TcpStream::connect(proxy).await.unwrap();
  let request = format!("CONNECT {0} HTTP/1.1\r\nHost: {0}\r\n\r\n", upstream);
  client.write_all(request.as_bytes()).await.unwrap();

  let mut established = vec![0u8; CONNECTION_ESTABLISHED.len()];
  client.read_exact(&mut established).await.unwrap();
  assert_eq!(established, b"HTTP/1.1 200 Connection Established\r\n\r\n");

  client.write_all(b"\x16\x03\x01ping").await.unwrap();
  let mut echoed = [0u8; 7];
  client.read_exact(&mut echoed).await.unwrap();
  assert_eq!(&echoed, b"\x16\x03\x01ping");
  assert_eq!(stats.snapshot().upstream_attempts, 1);
}

#[tokio::test]
async fn connect_forwards_bytes_sent_with_the_head() {
  let upstream = echo_upstream().await;
  let (proxy, _) = start_proxy(ProxyServer::builder().config(loopback_config())).await;

  let mut client = TcpStream::connect(proxy).await.unwrap();
  let request = format!("CONNECT {} HTTP/1.1\r\n\r\nearly", upstream);
  client.write_all(request.as_bytes()).await.unwrap();

  let mut reply = vec![0u8; CONNECTION_ESTABLISHED.len() + 5];
  client.read_exact(&mut reply).await.unwrap();
  assert_eq!(&reply[..CONNECTION_ESTABLISHED.len()], CONNECTION_ESTABLISHED);
  assert_eq!(&reply[CONNECTION_ESTABLISHED.len()..], b"early");
}

#[tokio::test]
async fn upstream_connect_failure_closes_silently() {
  let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
  let dead = unused.local_addr().unwrap();
  drop(unused);
  let (proxy, stats) = start_proxy(ProxyServer::builder().config(loopback_config())).await;

  let request = format!("CONNECT {} HTTP/1.1\r\n\r\n", dead);
  let response = exchange(proxy, request.as_bytes()).await;
  assert!(response.is_empty());
  let snapshot = stats.snapshot();
  assert_eq!(snapshot.upstream_attempts, 1);
  assert_eq!(snapshot.errored, 1);
}

#[tokio::test]
async fn malformed_target_is_dropped() {
  let (proxy, stats) = start_proxy(ProxyServer::builder().config(loopback_config())).await;
  let response = exchange(proxy, b"GET http://bad\"host/ HTTP/1.1\r\n\r\n").await;
  assert!(response.is_empty());
  assert_eq!(stats.snapshot().errored, 1);
  assert_eq!(stats.snapshot().upstream_attempts, 0);
}

#[tokio::test]
async fn head_split_across_reads_is_reassembled() {
  let (proxy, _) = start_proxy(ProxyServer::builder().config(loopback_config())).await;
  let mut client = TcpStream::connect(proxy).await.unwrap();
  client.write_all(b"GET /sta").await.unwrap();
  tokio::time::sleep(Duration::from_millis(50)).await;
  client.write_all(b"tus HTTP/1.1\r\nHost: proxy\r").await.unwrap();
  tokio::time::sleep(Duration::from_millis(50)).await;
  client.write_all(b"\n\r\n").await.unwrap();

  let mut response = Vec::new();
  client.read_to_end(&mut response).await.unwrap();
  assert_eq!(decode(&response).unwrap().status(), Some(200));
}

#[tokio::test]
async fn non_request_heads_are_ignored() {
  let (proxy, stats) = start_proxy(ProxyServer::builder().config(loopback_config())).await;
  let response = exchange(
    proxy,
    b"HTTP/1.1 200 OK\r\n\r\nhello there\r\n\r\nGET /status HTTP/1.1\r\n\r\n",
  )
  .await;
  let message = decode(&response).unwrap();
  assert_eq!(message.status(), Some(200));
  assert_eq!(stats.snapshot().local_responded, 1);
}

#[tokio::test]
async fn oversized_head_is_refused() {
  let config = ProxyConfig {
    max_head_size: 1024,
    ..loopback_config()
  };
  let (proxy, stats) = start_proxy(ProxyServer::builder().config(config)).await;

  let mut client = TcpStream::connect(proxy).await.unwrap();
  let mut request = b"GET /status HTTP/1.1\r\nX-Filler: ".to_vec();
  request.extend(vec![b'a'; 4096]);
  let _ = client.write_all(&request).await;
  let mut response = Vec::new();
  let _ = client.read_to_end(&mut response).await;
  assert!(response.is_empty());
  assert_eq!(stats.snapshot().errored, 1);
}

#[tokio::test]
async fn silent_client_times_out() {
  let config = ProxyConfig {
    head_timeout: Some(Duration::from_millis(100)),
    ..loopback_config()
  };
  let (proxy, stats) = start_proxy(ProxyServer::builder().config(config)).await;

  let mut client = TcpStream::connect(proxy).await.unwrap();
  let mut response = Vec::new();
  let read = tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut response)).await;
  assert!(read.is_ok(), "proxy kept an idle connection open");
  assert!(response.is_empty());
  assert_eq!(stats.snapshot().errored, 1);
}

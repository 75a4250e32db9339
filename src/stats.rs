//! Per-server outcome counters
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::connection::ConnectionState;

/// Point-in-time copy of [`ProxyStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
  /// Connections accepted since start
  pub accepted: u64,
  /// Connections currently open
  pub active: u64,
  /// Requests answered by the local handler
  pub local_responded: u64,
  /// Requests rejected with `407`
  pub auth_rejected: u64,
  /// Requests answered by the interceptor
  pub intercepted: u64,
  /// Connections that reached the upstream relay
  pub bridged: u64,
  /// Connections that ended on an error or were dropped
  pub errored: u64,
  /// Upstream connects attempted
  pub upstream_attempts: u64,
}

/// Counters shared by every connection of one server.
#[derive(Debug, Default)]
pub struct ProxyStats {
  accepted: AtomicU64,
  active: AtomicU64,
  local_responded: AtomicU64,
  auth_rejected: AtomicU64,
  intercepted: AtomicU64,
  bridged: AtomicU64,
  errored: AtomicU64,
  upstream_attempts: AtomicU64,
}

impl ProxyStats {
  /// Read every counter
  pub fn snapshot(&self) -> StatsSnapshot {
    StatsSnapshot {
      accepted: self.accepted.load(Ordering::Relaxed),
      active: self.active.load(Ordering::Relaxed),
      local_responded: self.local_responded.load(Ordering::Relaxed),
      auth_rejected: self.auth_rejected.load(Ordering::Relaxed),
      intercepted: self.intercepted.load(Ordering::Relaxed),
      bridged: self.bridged.load(Ordering::Relaxed),
      errored: self.errored.load(Ordering::Relaxed),
      upstream_attempts: self.upstream_attempts.load(Ordering::Relaxed),
    }
  }

  pub(crate) fn record_accept(&self) {
    self.accepted.fetch_add(1, Ordering::Relaxed);
    self.active.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn record_upstream_attempt(&self) {
    self.upstream_attempts.fetch_add(1, Ordering::Relaxed);
  }

  pub(crate) fn record_close(&self, state: ConnectionState) {
    let _ = self
      .active
      .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
        Some(current.saturating_sub(1))
      });
    let counter = match state {
      ConnectionState::LocalResponded => &self.local_responded,
      ConnectionState::AuthRejected => &self.auth_rejected,
      ConnectionState::Intercepted => &self.intercepted,
      ConnectionState::Bridging => &self.bridged,
      ConnectionState::AwaitingRequest | ConnectionState::Errored => &self.errored,
    };
    counter.fetch_add(1, Ordering::Relaxed);
  }
}

//! Event fan-out to optional policy receivers

use crate::policy::Policy;
use crate::record::{ConnInfo, LogLevel, LogRecord};
use std::sync::Arc;

/// Cheap handle that formats records and probes the policy for receivers.
///
/// Absent capabilities drop events silently. Every record is mirrored to
/// `tracing` so the engine stays observable without a [`crate::LogReceiver`].
#[derive(Clone)]
pub(crate) struct EventSink {
  policy: Arc<dyn Policy>,
}

impl EventSink {
  pub(crate) fn new(policy: Arc<dyn Policy>) -> Self {
    Self { policy }
  }

  pub(crate) fn policy(&self) -> &Arc<dyn Policy> {
    &self.policy
  }

  /// Deliver a log record built from the given connection snapshot.
  pub(crate) fn log(&self, level: LogLevel, msg: impl Into<String>, info: ConnInfo) {
    let msg = msg.into();
    match level {
      LogLevel::Error => tracing::error!(victim = %info.victim, proxy = %info.proxy, "{}", msg),
      LogLevel::Info => tracing::info!(victim = %info.victim, proxy = %info.proxy, "{}", msg),
      LogLevel::Debug | LogLevel::Data => {
        tracing::debug!(victim = %info.victim, proxy = %info.proxy, "{}", msg)
      }
    }
    if let Some(receiver) = self.policy.log_receiver() {
      receiver.recv_log(LogRecord {
        level,
        msg,
        conn_info: info,
      });
    }
  }

  /// Notify the policy that a connection reached the relay stage.
  pub(crate) fn conn_start(&self, info: ConnInfo) {
    if let Some(receiver) = self.policy.conn_receiver() {
      receiver.recv_conn_start(info);
    }
  }

  /// Notify the policy that a connection was torn down.
  pub(crate) fn conn_end(&self, info: ConnInfo) {
    if let Some(receiver) = self.policy.conn_receiver() {
      receiver.recv_conn_end(info);
    }
  }
}

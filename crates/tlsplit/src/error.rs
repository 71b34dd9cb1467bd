//! Error types for the interception engine

use std::io;
use thiserror::Error;

/// Result type for proxy operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types surfaced by the proxy engine
#[derive(Error, Debug)]
pub enum Error {
  /// IO error
  #[error("IO error: {0}")]
  Io(io::Error),

  /// Unrecoverable failure of the accept loop; the only error that ends
  /// a running server
  #[error("accept error: {0}")]
  Accept(String),

  /// The victim's remote endpoint could not be determined
  #[error("victim address error: {0}")]
  VictimAddr(String),

  /// A policy callback refused the connection
  #[error("policy error: {0}")]
  Policy(String),

  /// TLS configuration or handshake error
  #[error("TLS error: {0}")]
  Tls(String),

  /// Certificate generation or parsing error
  #[error("certificate error: {0}")]
  Certificate(String),
}

impl Error {
  /// Create a policy error and log it
  pub fn policy(msg: impl Into<String>) -> Self {
    let error = Error::Policy(msg.into());
    tracing::error!("Policy error: {}", error);
    error
  }

  /// Create a TLS error and log it
  pub fn tls(msg: impl Into<String>) -> Self {
    let error = Error::Tls(msg.into());
    tracing::error!("TLS error: {}", error);
    error
  }

  /// Create a victim address error and log it
  pub fn victim_addr(msg: impl Into<String>) -> Self {
    let error = Error::VictimAddr(msg.into());
    tracing::error!("Victim address error: {}", error);
    error
  }

  /// Create a certificate error and log it
  pub fn certificate(msg: impl Into<String>) -> Self {
    let error = Error::Certificate(msg.into());
    tracing::error!("Certificate error: {}", error);
    error
  }
}

impl From<io::Error> for Error {
  fn from(value: io::Error) -> Self {
    Error::Io(value)
  }
}

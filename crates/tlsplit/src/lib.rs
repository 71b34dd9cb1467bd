//! TLS-aware intercepting TCP proxy for adversary-in-the-middle work
//!
//! tlsplit accepts connections from a *victim*, fingerprints the first bytes
//! for a TLS ClientHello, optionally terminates TLS with a policy-supplied
//! certificate, dials the real *downstream*, optionally re-encrypts that
//! leg, and relays bytes in both directions while handing plaintext copies
//! to observers.
//!
//! Behavior is customized through a [`Policy`]: it resolves downstream
//! addresses, supplies the TLS configuration for each leg, and optionally
//! receives logs, connection lifecycle events, and intercepted data.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tlsplit::rustls::{ClientConfig, ServerConfig};
//! use tlsplit::{Addr, Policy, ProxyServer, Result};
//! use tokio_util::sync::CancellationToken;
//!
//! struct Static {
//!   downstream: Addr,
//!   server_tls: Arc<ServerConfig>,
//!   client_tls: Arc<ClientConfig>,
//! }
//!
//! #[async_trait::async_trait]
//! impl Policy for Static {
//!   async fn resolve_downstream(&self, _: &Addr, _: &Addr) -> Result<Option<Addr>> {
//!     Ok(Some(self.downstream.clone()))
//!   }
//!
//!   async fn proxy_tls_config(
//!     &self,
//!     _: &Addr,
//!     _: &Addr,
//!     _: Option<&Addr>,
//!   ) -> Result<Arc<ServerConfig>> {
//!     Ok(self.server_tls.clone())
//!   }
//!
//!   async fn downstream_tls_config(
//!     &self,
//!     _: &Addr,
//!     _: &Addr,
//!     _: &Addr,
//!   ) -> Result<Arc<ClientConfig>> {
//!     Ok(self.client_tls.clone())
//!   }
//! }
//!
//! # async fn run(policy: Static) -> Result<()> {
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8443").await?;
//! let server = ProxyServer::new(policy, listener);
//! server.serve(CancellationToken::new()).await
//! # }
//! ```

pub mod cert;
mod conn;
mod error;
mod events;
mod fingerprint;
mod peek;
mod policy;
mod record;
mod server;
mod stream;
mod tap;
pub mod tls;

pub use error::{Error, Result};
pub use fingerprint::{is_client_hello, HANDSHAKE_PEEK_LEN};
pub use peek::PeekStream;
pub use policy::{ConnInfoReceiver, DataReceiver, Handshaker, LogReceiver, Policy};
pub use record::{Addr, ConnInfo, LogLevel, LogRecord};
pub use server::{
  ProxyServer, ProxyServerBuilder, DEFAULT_CAPTURE_LIMIT, DEFAULT_CAPTURE_TIMEOUT,
  DEFAULT_FINGERPRINT_TIMEOUT,
};

// the TLS types policies are expressed in
pub use tokio_rustls::rustls;

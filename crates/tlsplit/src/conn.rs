//! Per-connection interception state machine
//!
//! Each accepted victim socket is handled by one task running the sequence:
//! extract the victim address, resolve the downstream, fingerprint the first
//! bytes under a deadline, optionally terminate TLS, dial the downstream,
//! optionally re-encrypt that leg, then relay until either side closes.
//! Connections without a usable downstream fall into a one-shot capture of
//! the victim's opening bytes.
//!
//! Limitations shared with the wire behavior:
//!
//! - SSL 2/3 handshakes are not detected and relay as plaintext.
//! - The victim is presumed to send first; server-speaks-first protocols
//!   (e.g. FTP active mode, SMTP greetings) will stall in fingerprinting.
//! - STARTTLS-style upgrades after initial plaintext are not followed.

use crate::error::Error;
use crate::events::EventSink;
use crate::fingerprint;
use crate::peek::PeekStream;
use crate::policy::Policy;
use crate::record::{Addr, ConnInfo, LogLevel};
use crate::server::ActiveGuard;
use crate::stream::{DownstreamStream, VictimStream};
use crate::tap::TapStream;
use bytes::Bytes;
use std::io;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::rustls::pki_types::ServerName;
use tokio_rustls::{TlsAcceptor, TlsConnector};

/// Relay buffer size for each pump direction.
const COPY_BUF_LEN: usize = 8 * 1024;

/// Deadlines and caps threaded down from the server builder.
#[derive(Debug, Clone)]
pub(crate) struct ConnTunables {
  /// Deadline for the fingerprint peek on the victim socket
  pub(crate) fingerprint_timeout: Duration,
  /// Deadline for the dead-downstream capture read
  pub(crate) capture_timeout: Duration,
  /// Cap on bytes collected by the dead-downstream capture
  pub(crate) capture_limit: usize,
}

/// Per-connection state: the addresses observers see plus the event sink
/// and tunables. The sockets themselves move through [`ProxyConn::run`].
struct ProxyConn {
  sink: EventSink,
  tunables: ConnTunables,
  accepted_at: OffsetDateTime,
  victim: Addr,
  proxy: Addr,
  downstream: Option<Addr>,
  started: bool,
}

/// Entry point spawned by the accept loop for every victim connection.
pub(crate) async fn handle(
  socket: TcpStream,
  proxy: Addr,
  policy: Arc<dyn Policy>,
  tunables: ConnTunables,
  active: Arc<AtomicUsize>,
) {
  let sink = EventSink::new(policy);

  // Victim address extraction gates everything: no counter movement and no
  // observer events until the remote endpoint is known.
  let victim: Addr = match socket.peer_addr() {
    Ok(addr) => addr.into(),
    Err(e) => {
      let err = Error::victim_addr(e.to_string());
      sink.log(
        LogLevel::Error,
        format!("error acquiring victim address: {err}"),
        ConnInfo::server(proxy),
      );
      return;
    }
  };

  let _guard = ActiveGuard::new(active);
  let mut conn = ProxyConn {
    sink,
    tunables,
    accepted_at: OffsetDateTime::now_utc(),
    victim,
    proxy,
    downstream: None,
    started: false,
  };

  conn.run(socket).await;

  if conn.started {
    conn.sink.conn_end(conn.snapshot());
  }
}

impl ProxyConn {
  /// Current connection snapshot handed to observers.
  fn snapshot(&self) -> ConnInfo {
    ConnInfo {
      time: self.accepted_at,
      victim: self.victim.clone(),
      proxy: self.proxy.clone(),
      downstream: self.downstream.clone(),
    }
  }

  fn log(&self, level: LogLevel, msg: impl Into<String>) {
    self.sink.log(level, msg, self.snapshot());
  }

  /// Drive the connection to completion. Sockets are owned by this call
  /// and closed when it returns, whichever state it returns from.
  async fn run(&mut self, socket: TcpStream) {
    let mut victim = PeekStream::new(socket);

    // resolve the downstream before touching the socket
    let downstream = match self
      .sink
      .policy()
      .resolve_downstream(&self.proxy, &self.victim)
      .await
    {
      Ok(addr) => addr,
      Err(e) => {
        self.log(LogLevel::Error, format!("no downstream for connection: {e}"));
        return;
      }
    };
    self.downstream = downstream;

    // fingerprint the first bytes under the peek deadline
    let hs_len = match self.sink.policy().handshaker() {
      Some(handshaker) => handshaker.handshake_len(),
      None => fingerprint::HANDSHAKE_PEEK_LEN,
    };
    let is_tls = match tokio::time::timeout(
      self.tunables.fingerprint_timeout,
      victim.peek(hs_len),
    )
    .await
    {
      Ok(Ok(prefix)) => match self.sink.policy().handshaker() {
        Some(handshaker) => handshaker.is_handshake(prefix),
        None => fingerprint::is_client_hello(prefix),
      },
      Ok(Err(e)) => {
        self.log(
          LogLevel::Error,
          format!("failure checking incoming connection for tls: {e}"),
        );
        return;
      }
      Err(_) => {
        self.log(
          LogLevel::Error,
          "timed out waiting for handshake prefix from victim",
        );
        return;
      }
    };

    // fetch the victim-leg TLS config; the handshake itself runs at relay
    // start, once the connection is fully assembled
    let mut acceptor: Option<TlsAcceptor> = None;
    if is_tls {
      self.log(LogLevel::Debug, "upgrading victim connection to tls");
      match self
        .sink
        .policy()
        .proxy_tls_config(&self.victim, &self.proxy, self.downstream.as_ref())
        .await
      {
        Ok(config) => acceptor = Some(TlsAcceptor::from(config)),
        Err(e) => {
          self.log(
            LogLevel::Error,
            format!("failure getting proxy tls config: {e}"),
          );
          return;
        }
      }
    }

    // no downstream resolved: capture what the victim had to say and stop
    let Some(downstream_addr) = self.downstream.clone() else {
      self.dead_capture(victim, acceptor).await;
      return;
    };

    let tcp = match TcpStream::connect(downstream_addr.to_string()).await {
      Ok(stream) => stream,
      Err(e) => {
        self.log(
          LogLevel::Error,
          format!("error connecting to downstream: {e}"),
        );
        self.dead_capture(victim, acceptor).await;
        return;
      }
    };

    // the downstream leg is re-encrypted only when the victim leg was
    let mut connector: Option<TlsConnector> = None;
    if acceptor.is_some() {
      match self
        .sink
        .policy()
        .downstream_tls_config(&self.victim, &self.proxy, &downstream_addr)
        .await
      {
        Ok(config) => {
          self.log(LogLevel::Debug, "upgrading downstream connection to tls");
          connector = Some(TlsConnector::from(config));
        }
        Err(e) => {
          self.log(
            LogLevel::Error,
            format!("failure getting downstream tls config: {e}"),
          );
          return;
        }
      }
    }

    self.started = true;
    self.sink.conn_start(self.snapshot());

    // both handshakes are deferred to here so failures surface the way any
    // first relay error does: after conn start, before any data events
    let victim = match acceptor {
      Some(acceptor) => match acceptor.accept(victim).await {
        Ok(stream) => VictimStream::Tls(Box::new(stream)),
        Err(e) => {
          self.log(LogLevel::Error, format!("victim tls handshake failed: {e}"));
          return;
        }
      },
      None => VictimStream::Plain(victim),
    };
    let downstream = match connector {
      Some(connector) => {
        let name = match ServerName::try_from(downstream_addr.ip.clone()) {
          Ok(name) => name,
          Err(e) => {
            self.log(
              LogLevel::Error,
              format!("invalid downstream server name: {e}"),
            );
            return;
          }
        };
        match connector.connect(name, tcp).await {
          Ok(stream) => DownstreamStream::Tls(Box::new(stream)),
          Err(e) => {
            self.log(
              LogLevel::Error,
              format!("downstream tls handshake failed: {e}"),
            );
            return;
          }
        }
      }
      None => DownstreamStream::Plain(tcp),
    };

    // the tap sits on the downstream leg: reads are downstream data,
    // writes carry victim data
    let tap = TapStream::new(downstream, self.sink.policy().clone(), self.snapshot());
    self.log(LogLevel::Debug, "new connection established");

    let (victim_read, victim_write) = tokio::io::split(victim);
    let (downstream_read, downstream_write) = tokio::io::split(tap);

    let sink = self.sink.clone();
    let info = self.snapshot();
    let forward = tokio::spawn(async move {
      match pump(victim_read, downstream_write).await {
        Err(e) if !is_disconnect(&e) => sink.log(
          LogLevel::Error,
          format!("error relaying data (victim to downstream): {e}"),
          info.clone(),
        ),
        _ => {}
      }
      sink.log(
        LogLevel::Debug,
        "finished relaying data (victim to downstream)",
        info,
      );
    });

    // the handler's lifetime is bounded by the closing side it can observe
    // directly: the downstream-to-victim pump
    match pump(downstream_read, victim_write).await {
      Err(e) if !is_disconnect(&e) => self.log(
        LogLevel::Error,
        format!("error relaying data (downstream to victim): {e}"),
      ),
      _ => {}
    }
    self.log(LogLevel::Debug, "finished relaying data (downstream to victim)");

    // tear down the other direction; dropping the halves closes both sockets
    forward.abort();
    let _ = forward.await;
  }

  /// One-shot best-effort read of the victim's opening bytes when no usable
  /// downstream exists. A no-op without a data receiver.
  async fn dead_capture(&self, victim: PeekStream<TcpStream>, acceptor: Option<TlsAcceptor>) {
    if self.sink.policy().data_receiver().is_none() {
      return;
    }
    self.log(
      LogLevel::Debug,
      "no usable downstream, capturing initial victim data",
    );

    let limit = self.tunables.capture_limit;
    let mut captured: Vec<u8> = Vec::new();
    let result = tokio::time::timeout(self.tunables.capture_timeout, async {
      // a TLS-classified victim still needs its handshake served before
      // the plaintext shows up
      let mut stream = match acceptor {
        Some(acceptor) => VictimStream::Tls(Box::new(acceptor.accept(victim).await?)),
        None => VictimStream::Plain(victim),
      };
      let mut buf = vec![0u8; limit];
      while captured.len() < limit {
        let remaining = limit - captured.len();
        let n = stream.read(&mut buf[..remaining]).await?;
        if n == 0 {
          break;
        }
        captured.extend_from_slice(&buf[..n]);
      }
      io::Result::Ok(())
    })
    .await;

    match result {
      Ok(Ok(())) | Err(_) => {
        // the deadline is the expected exit for victims that stay quiet
        // after their opening bytes
        self.log(
          LogLevel::Debug,
          format!("captured {} bytes from victim", captured.len()),
        );
      }
      Ok(Err(e)) => {
        self.log(LogLevel::Error, format!("error capturing victim data: {e}"));
      }
    }

    if !captured.is_empty() {
      // capture events never carry a downstream, reachable or not
      let mut info = self.snapshot();
      info.downstream = None;
      if let Some(receiver) = self.sink.policy().data_receiver() {
        receiver.recv_downstream_data(info, Bytes::from(captured));
      }
    }
  }
}

/// Copy bytes from `reader` to `writer` until the read side ends, then
/// propagate the shutdown so the peer observes the close. The shutdown runs
/// even when the read side dies ungracefully; without it the peer would
/// never see EOF and the opposite pump could wait forever.
async fn pump<R, W>(mut reader: R, mut writer: W) -> io::Result<u64>
where
  R: AsyncRead + Unpin,
  W: AsyncWrite + Unpin,
{
  let mut buf = vec![0u8; COPY_BUF_LEN];
  let mut total = 0u64;
  let result = loop {
    match reader.read(&mut buf).await {
      Ok(0) => break Ok(total),
      Ok(n) => match writer.write_all(&buf[..n]).await {
        Ok(()) => total += n as u64,
        Err(e) => break Err(e),
      },
      Err(e) => break Err(e),
    }
  };
  let _ = writer.shutdown().await;
  result
}

/// I/O failures that only mean the other half of the connection already
/// went away; reporting them as relay errors would be noise.
fn is_disconnect(err: &io::Error) -> bool {
  matches!(
    err.kind(),
    io::ErrorKind::NotConnected
      | io::ErrorKind::BrokenPipe
      | io::ErrorKind::ConnectionReset
      | io::ErrorKind::ConnectionAborted
      | io::ErrorKind::UnexpectedEof
  )
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn disconnect_kinds_are_not_errors() {
    for kind in [
      io::ErrorKind::NotConnected,
      io::ErrorKind::BrokenPipe,
      io::ErrorKind::ConnectionReset,
      io::ErrorKind::ConnectionAborted,
      io::ErrorKind::UnexpectedEof,
    ] {
      assert!(is_disconnect(&io::Error::new(kind, "closed")));
    }
    assert!(!is_disconnect(&io::Error::new(
      io::ErrorKind::TimedOut,
      "deadline"
    )));
  }

  #[tokio::test]
  async fn pump_forwards_until_eof_and_shuts_down() {
    let (mut a_local, a_remote) = tokio::io::duplex(64);
    let (b_local, mut b_remote) = tokio::io::duplex(64);

    a_local.write_all(b"payload").await.unwrap();
    drop(a_local);

    let copied = pump(a_remote, b_local).await.unwrap();
    assert_eq!(copied, 7);

    let mut out = Vec::new();
    b_remote.read_to_end(&mut out).await.unwrap();
    assert_eq!(out, b"payload");
  }
}

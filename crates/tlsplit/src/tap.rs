//! Observer tap over the downstream leg

use crate::policy::Policy;
use crate::record::ConnInfo;
use bytes::Bytes;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;

/// One captured chunk, labeled with the direction it crossed the proxy.
enum DataEvent {
  /// Bytes written toward the downstream, i.e. originating from the victim
  Victim(Bytes),
  /// Bytes read back from the downstream
  Downstream(Bytes),
}

/// Wraps the downstream leg and copies every byte crossing it to the
/// policy's [`crate::DataReceiver`].
///
/// Reads emit downstream data, writes emit victim data; byte counts and
/// errors of the inner stream are untouched. Copies are queued on a
/// per-connection channel drained by one detached task, so delivery never
/// suspends the relay and each wire byte is presented exactly once per
/// direction. With no receiver attached the tap is inert.
pub(crate) struct TapStream<S> {
  inner: S,
  tx: Option<mpsc::UnboundedSender<DataEvent>>,
}

impl<S> TapStream<S> {
  pub(crate) fn new(inner: S, policy: Arc<dyn Policy>, info: ConnInfo) -> Self {
    let tx = policy.data_receiver().is_some().then(|| {
      let (tx, mut rx) = mpsc::unbounded_channel();
      tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
          let Some(receiver) = policy.data_receiver() else {
            break;
          };
          match event {
            DataEvent::Victim(data) => receiver.recv_victim_data(info.clone(), data),
            DataEvent::Downstream(data) => receiver.recv_downstream_data(info.clone(), data),
          }
        }
      });
      tx
    });
    Self { inner, tx }
  }

  fn emit(&self, event: DataEvent) {
    if let Some(tx) = &self.tx {
      // a gone drain task loses the observer, never the relay
      let _ = tx.send(event);
    }
  }
}

impl<S: AsyncRead + Unpin> AsyncRead for TapStream<S> {
  fn poll_read(
    self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &mut ReadBuf<'_>,
  ) -> Poll<io::Result<()>> {
    let this = self.get_mut();
    let before = buf.filled().len();
    match Pin::new(&mut this.inner).poll_read(cx, buf) {
      Poll::Ready(Ok(())) => {
        let filled = &buf.filled()[before..];
        if !filled.is_empty() {
          this.emit(DataEvent::Downstream(Bytes::copy_from_slice(filled)));
        }
        Poll::Ready(Ok(()))
      }
      other => other,
    }
  }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TapStream<S> {
  fn poll_write(
    self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &[u8],
  ) -> Poll<io::Result<usize>> {
    let this = self.get_mut();
    match Pin::new(&mut this.inner).poll_write(cx, buf) {
      Poll::Ready(Ok(n)) => {
        if n > 0 {
          this.emit(DataEvent::Victim(Bytes::copy_from_slice(&buf[..n])));
        }
        Poll::Ready(Ok(n))
      }
      other => other,
    }
  }

  fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    Pin::new(&mut self.get_mut().inner).poll_flush(cx)
  }

  fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::Result;
  use crate::policy::DataReceiver;
  use crate::record::Addr;
  use std::sync::Mutex;
  use std::time::Duration;
  use time::OffsetDateTime;
  use tokio::io::{AsyncReadExt, AsyncWriteExt};
  use tokio_rustls::rustls::{ClientConfig, ServerConfig};

  #[derive(Default)]
  struct RecordingPolicy {
    victim: Mutex<Vec<Bytes>>,
    downstream: Mutex<Vec<Bytes>>,
  }

  #[async_trait::async_trait]
  impl Policy for RecordingPolicy {
    async fn resolve_downstream(&self, _: &Addr, _: &Addr) -> Result<Option<Addr>> {
      Ok(None)
    }

    async fn proxy_tls_config(
      &self,
      _: &Addr,
      _: &Addr,
      _: Option<&Addr>,
    ) -> Result<Arc<ServerConfig>> {
      unreachable!("tap tests never negotiate tls")
    }

    async fn downstream_tls_config(
      &self,
      _: &Addr,
      _: &Addr,
      _: &Addr,
    ) -> Result<Arc<ClientConfig>> {
      unreachable!("tap tests never negotiate tls")
    }

    fn data_receiver(&self) -> Option<&dyn DataReceiver> {
      Some(self)
    }
  }

  impl DataReceiver for RecordingPolicy {
    fn recv_victim_data(&self, _info: ConnInfo, data: Bytes) {
      self.victim.lock().unwrap().push(data);
    }

    fn recv_downstream_data(&self, _info: ConnInfo, data: Bytes) {
      self.downstream.lock().unwrap().push(data);
    }
  }

  fn info() -> ConnInfo {
    ConnInfo {
      time: OffsetDateTime::now_utc(),
      victim: Addr::new("127.0.0.1", "50000"),
      proxy: Addr::new("127.0.0.1", "443"),
      downstream: Some(Addr::new("127.0.0.1", "8443")),
    }
  }

  async fn wait_until(deadline: Duration, mut ready: impl FnMut() -> bool) {
    let start = tokio::time::Instant::now();
    while !ready() {
      assert!(start.elapsed() < deadline, "condition not met in time");
      tokio::time::sleep(Duration::from_millis(5)).await;
    }
  }

  #[tokio::test]
  async fn read_and_write_are_copied_per_direction() {
    let policy = Arc::new(RecordingPolicy::default());
    let (mut peer, local) = tokio::io::duplex(64);
    let mut tap = TapStream::new(local, policy.clone() as Arc<dyn Policy>, info());

    tap.write_all(b"to downstream").await.unwrap();
    let mut out = vec![0u8; 13];
    peer.read_exact(&mut out).await.unwrap();
    assert_eq!(out, b"to downstream");

    peer.write_all(b"from downstream").await.unwrap();
    let mut out = vec![0u8; 15];
    tap.read_exact(&mut out).await.unwrap();
    assert_eq!(out, b"from downstream");

    wait_until(Duration::from_secs(2), || {
      !policy.victim.lock().unwrap().is_empty() && !policy.downstream.lock().unwrap().is_empty()
    })
    .await;

    let victim: Vec<u8> = policy.victim.lock().unwrap().concat();
    assert_eq!(victim, b"to downstream");
    let downstream: Vec<u8> = policy.downstream.lock().unwrap().concat();
    assert_eq!(downstream, b"from downstream");
  }

  #[tokio::test]
  async fn chunks_preserve_source_order() {
    let policy = Arc::new(RecordingPolicy::default());
    let (mut peer, local) = tokio::io::duplex(1024);
    let mut tap = TapStream::new(local, policy.clone() as Arc<dyn Policy>, info());

    for chunk in [b"one".as_slice(), b"two", b"three"] {
      tap.write_all(chunk).await.unwrap();
    }
    let mut out = vec![0u8; 11];
    peer.read_exact(&mut out).await.unwrap();

    wait_until(Duration::from_secs(2), || {
      policy.victim.lock().unwrap().concat().len() == 11
    })
    .await;
    assert_eq!(policy.victim.lock().unwrap().concat(), b"onetwothree");
  }
}

//! Buffered lookahead over the accepted victim socket

use bytes::BytesMut;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};

/// Wraps a stream so its first bytes can be inspected without consuming
/// them from the reader that follows.
///
/// Whatever consumes the connection afterwards, whether the TLS acceptor
/// or the plain relay, must read through this wrapper; reading the inner
/// stream directly would lose the peeked prefix.
pub struct PeekStream<S> {
  inner: S,
  buf: BytesMut,
}

impl<S: AsyncRead + Unpin> PeekStream<S> {
  /// Wrap `inner` with an empty lookahead buffer.
  pub fn new(inner: S) -> Self {
    Self {
      inner,
      buf: BytesMut::new(),
    }
  }

  /// Return the next `n` bytes without advancing the read cursor.
  ///
  /// Suspends until `n` bytes are buffered. EOF before then is an
  /// [`io::ErrorKind::UnexpectedEof`] error.
  pub async fn peek(&mut self, n: usize) -> io::Result<&[u8]> {
    while self.buf.len() < n {
      let read = self.inner.read_buf(&mut self.buf).await?;
      if read == 0 {
        return Err(io::Error::new(
          io::ErrorKind::UnexpectedEof,
          "stream closed before peek completed",
        ));
      }
    }
    Ok(&self.buf[..n])
  }
}

impl<S: AsyncRead + Unpin> AsyncRead for PeekStream<S> {
  fn poll_read(
    self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &mut ReadBuf<'_>,
  ) -> Poll<io::Result<()>> {
    let this = self.get_mut();
    if !this.buf.is_empty() {
      let n = this.buf.len().min(buf.remaining());
      let chunk = this.buf.split_to(n);
      buf.put_slice(&chunk);
      return Poll::Ready(Ok(()));
    }
    Pin::new(&mut this.inner).poll_read(cx, buf)
  }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PeekStream<S> {
  fn poll_write(
    self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &[u8],
  ) -> Poll<io::Result<usize>> {
    Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
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
  use tokio::io::AsyncWriteExt;

  #[tokio::test]
  async fn peek_does_not_consume() {
    let (mut client, server) = tokio::io::duplex(64);
    client.write_all(b"hello world").await.unwrap();

    let mut peek = PeekStream::new(server);
    assert_eq!(peek.peek(3).await.unwrap(), b"hel");
    assert_eq!(peek.peek(5).await.unwrap(), b"hello");

    let mut out = [0u8; 11];
    peek.read_exact(&mut out).await.unwrap();
    assert_eq!(&out, b"hello world");
  }

  #[tokio::test]
  async fn peek_waits_for_split_writes() {
    let (mut client, server) = tokio::io::duplex(64);
    let mut peek = PeekStream::new(server);

    let writer = tokio::spawn(async move {
      client.write_all(b"ab").await.unwrap();
      tokio::task::yield_now().await;
      client.write_all(b"cd").await.unwrap();
      client
    });

    assert_eq!(peek.peek(4).await.unwrap(), b"abcd");
    drop(writer.await.unwrap());

    let mut out = Vec::new();
    peek.read_to_end(&mut out).await.unwrap();
    assert_eq!(out, b"abcd");
  }

  #[tokio::test]
  async fn peek_past_eof_errors() {
    let (mut client, server) = tokio::io::duplex(64);
    client.write_all(b"ab").await.unwrap();
    drop(client);

    let mut peek = PeekStream::new(server);
    let err = peek.peek(3).await.unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
  }

  #[tokio::test]
  async fn writes_pass_through() {
    let (client, server) = tokio::io::duplex(64);
    let mut peek = PeekStream::new(client);
    peek.write_all(b"ping").await.unwrap();

    let mut server = server;
    let mut out = [0u8; 4];
    server.read_exact(&mut out).await.unwrap();
    assert_eq!(&out, b"ping");
  }
}

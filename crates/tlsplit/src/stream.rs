//! Stream wrappers over the two legs of an intercepted connection

use crate::peek::PeekStream;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::{client, server};

/// Victim leg: the accepted socket, optionally upgraded to server-side TLS.
///
/// Both variants read through the peek buffer so bytes consumed during
/// fingerprinting are replayed to whichever path owns the stream.
pub(crate) enum VictimStream {
  /// Plain TCP
  Plain(PeekStream<TcpStream>),
  /// Upgraded with a policy-supplied certificate
  Tls(Box<server::TlsStream<PeekStream<TcpStream>>>),
}

/// Downstream leg: the dialed socket, optionally upgraded to client-side TLS.
pub(crate) enum DownstreamStream {
  /// Plain TCP
  Plain(TcpStream),
  /// Upgraded with the policy-supplied client config
  Tls(Box<client::TlsStream<TcpStream>>),
}

impl AsyncRead for VictimStream {
  fn poll_read(
    self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &mut ReadBuf<'_>,
  ) -> Poll<io::Result<()>> {
    match self.get_mut() {
      VictimStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
      VictimStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
    }
  }
}

impl AsyncWrite for VictimStream {
  fn poll_write(
    self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &[u8],
  ) -> Poll<io::Result<usize>> {
    match self.get_mut() {
      VictimStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
      VictimStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
    }
  }

  fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    match self.get_mut() {
      VictimStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
      VictimStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
    }
  }

  fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    match self.get_mut() {
      VictimStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
      VictimStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
    }
  }
}

impl AsyncRead for DownstreamStream {
  fn poll_read(
    self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &mut ReadBuf<'_>,
  ) -> Poll<io::Result<()>> {
    match self.get_mut() {
      DownstreamStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
      DownstreamStream::Tls(stream) => Pin::new(stream).poll_read(cx, buf),
    }
  }
}

impl AsyncWrite for DownstreamStream {
  fn poll_write(
    self: Pin<&mut Self>,
    cx: &mut Context<'_>,
    buf: &[u8],
  ) -> Poll<io::Result<usize>> {
    match self.get_mut() {
      DownstreamStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
      DownstreamStream::Tls(stream) => Pin::new(stream).poll_write(cx, buf),
    }
  }

  fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    match self.get_mut() {
      DownstreamStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
      DownstreamStream::Tls(stream) => Pin::new(stream).poll_flush(cx),
    }
  }

  fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
    match self.get_mut() {
      DownstreamStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
      DownstreamStream::Tls(stream) => Pin::new(stream).poll_shutdown(cx),
    }
  }
}

//! Stream wrapper that keeps its port-forward alive

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use kube::api::Portforwarder;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A port-forward stream together with the forwarder that feeds it
///
/// The forwarder's websocket lives exactly as long as this value.
pub struct PortForwardStream<S> {
    stream: S,
    _forwarder: Box<Portforwarder>,
}

impl<S> PortForwardStream<S> {
    pub fn new(stream: S, forwarder: Portforwarder) -> Self {
        Self {
            stream,
            _forwarder: Box::new(forwarder),
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for PortForwardStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for PortForwardStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

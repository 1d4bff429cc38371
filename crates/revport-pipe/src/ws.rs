//! WebSocket-to-byte-stream adapter
//!
//! A reverse-dialed connection arrives as a WebSocket on both sides. The
//! pipe engine wants a plain byte stream, so this module adapts any
//! WebSocket-shaped `Stream`/`Sink` of messages into `AsyncRead` +
//! `AsyncWrite`: binary and text frames carry data, ping/pong frames are
//! skipped, a close frame (or stream end) is EOF, and shutting down the
//! write half drives the WebSocket close handshake.

use bytes::Bytes;
use futures_util::{Sink, Stream};
use std::io;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// What a received WebSocket message means to the byte stream.
pub enum FramePayload {
    Data(Bytes),
    Ignore,
    Close,
}

/// Minimal view of a WebSocket message type.
pub trait WsFrame: Sized + Send {
    fn from_data(data: Bytes) -> Self;
    fn into_payload(self) -> FramePayload;
}

impl WsFrame for axum::extract::ws::Message {
    fn from_data(data: Bytes) -> Self {
        axum::extract::ws::Message::Binary(data)
    }

    fn into_payload(self) -> FramePayload {
        use axum::extract::ws::Message;
        match self {
            Message::Binary(data) => FramePayload::Data(data),
            Message::Text(text) => {
                FramePayload::Data(Bytes::copy_from_slice(text.as_str().as_bytes()))
            }
            Message::Ping(_) | Message::Pong(_) => FramePayload::Ignore,
            Message::Close(_) => FramePayload::Close,
        }
    }
}

impl WsFrame for tokio_tungstenite::tungstenite::Message {
    fn from_data(data: Bytes) -> Self {
        tokio_tungstenite::tungstenite::Message::Binary(data.to_vec())
    }

    fn into_payload(self) -> FramePayload {
        use tokio_tungstenite::tungstenite::Message;
        match self {
            Message::Binary(data) => FramePayload::Data(Bytes::from(data)),
            Message::Text(text) => FramePayload::Data(Bytes::from(text.into_bytes())),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => FramePayload::Ignore,
            Message::Close(_) => FramePayload::Close,
        }
    }
}

/// Byte-stream view of a message-framed WebSocket.
#[derive(Debug)]
pub struct WsByteStream<S, M> {
    inner: S,
    /// Unconsumed tail of the last data frame.
    pending: Bytes,
    read_closed: bool,
    _frame: PhantomData<fn() -> M>,
}

impl<S, M> WsByteStream<S, M> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            pending: Bytes::new(),
            read_closed: false,
            _frame: PhantomData,
        }
    }
}

impl<S, M, E> AsyncRead for WsByteStream<S, M>
where
    S: Stream<Item = Result<M, E>> + Unpin,
    M: WsFrame + Unpin,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if !this.pending.is_empty() {
                let n = buf.remaining().min(this.pending.len());
                let chunk = this.pending.split_to(n);
                buf.put_slice(&chunk);
                return Poll::Ready(Ok(()));
            }
            if this.read_closed {
                return Poll::Ready(Ok(()));
            }
            match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                Some(Ok(msg)) => match msg.into_payload() {
                    FramePayload::Data(data) => this.pending = data,
                    FramePayload::Ignore => continue,
                    FramePayload::Close => this.read_closed = true,
                },
                Some(Err(e)) => return Poll::Ready(Err(io::Error::other(e))),
                None => this.read_closed = true,
            }
        }
    }
}

impl<S, M, E> AsyncWrite for WsByteStream<S, M>
where
    S: Sink<M, Error = E> + Unpin,
    M: WsFrame + Unpin,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        ready!(Pin::new(&mut this.inner).poll_ready(cx)).map_err(io::Error::other)?;
        Pin::new(&mut this.inner)
            .start_send(M::from_data(Bytes::copy_from_slice(buf)))
            .map_err(io::Error::other)?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        Pin::new(&mut this.inner)
            .poll_flush(cx)
            .map_err(io::Error::other)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Initiates the WebSocket close handshake. Reads keep draining
        // until the peer's close frame arrives, so this behaves as a
        // write half-close.
        let this = self.get_mut();
        match ready!(Pin::new(&mut this.inner).poll_close(cx)) {
            Ok(()) => Poll::Ready(Ok(())),
            // Already-closed sinks are fine here.
            Err(_) => Poll::Ready(Ok(())),
        }
    }
}

use std::{
    io,
    net::SocketAddr,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf},
    net::TcpStream,
};
use tracing::trace;

use crate::{
    parser::{FrameParser, Parsed},
    server::ConnectionGuard,
};

const READ_CHUNK: usize = 4096;

/// A duplex byte stream that can take back bytes read past the end of a frame.
///
/// Reads are served from the pushed back bytes first, so whoever reads next (the next
/// handshake phase, an auth strategy or the application) sees them exactly once and in
/// order.
///
/// A transport accepted by [`Server`](crate::Server) holds one of the server's connection
/// slots until it is dropped, wherever it has been handed to by then.
#[derive(Debug)]
pub struct Transport<T> {
    inner: T,
    pending: Vec<u8>,
    peer_addr: Option<SocketAddr>,
    guard: Option<ConnectionGuard>,
}

impl<T> Transport<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            peer_addr: None,
            guard: None,
        }
    }

    pub fn with_peer_addr(inner: T, peer_addr: SocketAddr) -> Self {
        Self {
            inner,
            pending: Vec::new(),
            peer_addr: Some(peer_addr),
            guard: None,
        }
    }

    /// Address of the remote end, if the underlying stream has one.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Puts `bytes` in front of anything not read yet.
    pub fn unshift(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        trace!("Pushing back {} unconsumed bytes", bytes.len());
        self.pending.splice(0..0, bytes.iter().copied());
    }

    /// Bytes that were pushed back and not read yet.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub(crate) fn hold(&mut self, guard: ConnectionGuard) {
        self.guard = Some(guard);
    }

    /// Splits into the underlying stream and the bytes still owed to the reader.
    ///
    /// A server connection slot held by the transport is given back here, the stream no
    /// longer counts towards the limit.
    pub fn into_parts(self) -> (T, Vec<u8>) {
        (self.inner, self.pending)
    }
}

impl<T> Transport<T>
where
    T: AsyncRead + Unpin,
{
    /// Feeds chunks into `parser` until it completes a frame.
    ///
    /// The bytes of the last chunk that follow the frame are pushed back. On error whatever
    /// partial field data the parser held is dropped with it.
    pub async fn read_frame<P>(&mut self, parser: &mut P) -> crate::Result<P::Event>
    where
        P: FrameParser,
    {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                parser.stop();
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed in the middle of a frame",
                )
                .into());
            }

            match parser.feed(&buf[..n])? {
                Parsed::NeedMore => continue,
                Parsed::Done { event, consumed } => {
                    self.unshift(&buf[consumed..n]);
                    return Ok(event);
                }
            }
        }
    }
}

impl From<TcpStream> for Transport<TcpStream> {
    fn from(stream: TcpStream) -> Self {
        let peer_addr = stream.peer_addr().ok();
        Self {
            inner: stream,
            pending: Vec::new(),
            peer_addr,
            guard: None,
        }
    }
}

impl<T> AsyncRead for Transport<T>
where
    T: AsyncRead + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if !self.pending.is_empty() {
            let n = self.pending.len().min(buf.remaining());
            buf.put_slice(&self.pending[..n]);
            self.pending.drain(..n);
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<T> AsyncWrite for Transport<T>
where
    T: AsyncWrite + Unpin,
{
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), io::Error>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

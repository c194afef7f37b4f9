//! Incremental decoders for the handshake frames.
//!
//! The parsers never touch I/O. They are fed chunks as they arrive and answer with
//! [`Parsed::NeedMore`] until the terminal field of the current phase is complete, then with
//! [`Parsed::Done`] carrying the event and how many bytes of the last chunk belonged to the
//! frame. [`Transport::read_frame`](crate::Transport::read_frame) pushes the rest back.
//!
//! A parser stops itself when it completes a phase or hits a protocol error. The session
//! restarts it with [`start`](ClientParser::start) after setting `authed`, which switches it to
//! the request/reply phase.

mod client;
mod server;

pub use client::{ClientEvent, ClientParser, ReplyInfo};
pub use server::{ProxyRequest, ServerEvent, ServerParser};

/// Outcome of feeding one chunk.
#[derive(Debug, PartialEq, Eq)]
pub enum Parsed<E> {
    NeedMore,
    Done { event: E, consumed: usize },
}

pub trait FrameParser {
    type Event;

    /// Consumes bytes of `chunk` until the phase completes or the chunk runs out.
    fn feed(&mut self, chunk: &[u8]) -> crate::Result<Parsed<Self::Event>>;

    /// Detaches the parser. Calling it again has no effect.
    fn stop(&mut self);

    fn is_listening(&self) -> bool;
}

/// Destination buffer of a field in progress and its fill cursor.
#[derive(Debug, Default)]
pub(crate) struct Field {
    buf: Vec<u8>,
    filled: usize,
}

impl Field {
    pub(crate) fn with_len(len: usize) -> Self {
        Self {
            buf: vec![0; len],
            filled: 0,
        }
    }

    /// Copies as much of `chunk` as the field has room for and returns how much that was.
    pub(crate) fn fill(&mut self, chunk: &[u8]) -> usize {
        let n = (self.buf.len() - self.filled).min(chunk.len());
        self.buf[self.filled..self.filled + n].copy_from_slice(&chunk[..n]);
        self.filled += n;
        n
    }

    pub(crate) fn is_full(&self) -> bool {
        self.filled == self.buf.len()
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        &self.buf[..self.filled]
    }

    pub(crate) fn take(&mut self) -> Vec<u8> {
        self.filled = 0;
        std::mem::take(&mut self.buf)
    }

    pub(crate) fn port(&self) -> u16 {
        match self.bytes() {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]),
            _ => 0,
        }
    }
}

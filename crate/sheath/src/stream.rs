//! Blocking stream contract and its implementations.
//!
//! - `tls`: the TLS adapter that secures any [Stream] while keeping the
//!   same contract.
//! - `tcp`: the plain TCP base stream.
//! - `deadline`: per-operation time budget tracking.
//! - `coalesce`: vectored-write batching.

pub(crate) mod coalesce;
pub mod deadline;
mod error;
pub mod tcp;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tls;

pub use deadline::Deadline;
pub use error::StreamError;

use std::io::{IoSlice, IoSliceMut};
use std::time::Duration;

/// Knobs forwarded to the underlying socket, if there is one.
///
/// Streams without a matching concept accept and ignore them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamOption {
    NoDelay(bool),
    Ttl(u32),
}

/// A blocking byte stream with per-call timeouts.
///
/// Every operation blocks the calling thread until it completes, fails,
/// or its timeout elapses; `None` means block forever. Byte counts that
/// fall short of the request signal a timeout or backpressure, not an
/// error, so callers can always tell complete success, partial success
/// and failure apart. A read result of 0 is EOF.
///
/// Instances are exclusively owned and must not be shared across
/// threads without external serialization.
pub trait Stream: Send {
    /// Fill `bufs` in order until at least `min_bytes` have been read,
    /// the buffers are exhausted, the peer closes, or the deadline
    /// expires. Stops as soon as `min_bytes` is reached, even
    /// mid-buffer.
    ///
    /// Deadline expiry before anything was read is
    /// [StreamError::TimedOut]; expiry after `min_bytes` were read is a
    /// normal return with the bytes obtained.
    fn readv(
        &mut self,
        bufs: &mut [IoSliceMut<'_>],
        min_bytes: usize,
        timeout: Option<Duration>,
    ) -> Result<usize, StreamError>;

    /// Write all fragments, in order. Returns the cumulative byte count
    /// delivered; a short count means the deadline expired or the
    /// stream pushed back partway through.
    fn writev(&mut self, bufs: &[IoSlice<'_>], timeout: Option<Duration>)
    -> Result<usize, StreamError>;

    /// Push any buffered bytes down to the transport.
    fn flush(&mut self, timeout: Option<Duration>) -> Result<(), StreamError>;

    /// Close the transport. Reads and writes fail afterwards.
    fn close(&mut self) -> Result<(), StreamError>;

    /// Forward a socket option to the transport.
    fn set_option(&mut self, opt: StreamOption) -> Result<(), StreamError>;

    /// Whether the transport is known to be closed.
    fn is_closed(&mut self) -> bool;

    /// Single-buffer read. Returns as soon as any bytes are available.
    fn read(&mut self, buf: &mut [u8], timeout: Option<Duration>) -> Result<usize, StreamError> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.readv(&mut [IoSliceMut::new(buf)], 1, timeout)
    }

    /// Single-buffer write.
    fn write(&mut self, buf: &[u8], timeout: Option<Duration>) -> Result<usize, StreamError> {
        self.writev(&[IoSlice::new(buf)], timeout)
    }
}

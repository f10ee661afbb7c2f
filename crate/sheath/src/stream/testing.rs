//! In-memory streams for tests.

use std::collections::VecDeque;
use std::io::{self, IoSlice, IoSliceMut};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use super::deadline::Deadline;
use super::{Stream, StreamError, StreamOption};

struct PipeBuf {
    data: VecDeque<u8>,
    capacity: usize,
    closed: bool,
}

struct PipeHalf {
    state: Mutex<PipeBuf>,
    cond: Condvar,
}

impl PipeHalf {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PipeBuf {
                data: VecDeque::new(),
                capacity,
                closed: false,
            }),
            cond: Condvar::new(),
        })
    }

    fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.cond.notify_all();
    }
}

/// One end of an in-memory, blocking, bidirectional pipe.
///
/// Honors the same deadline semantics as a real socket stream, which
/// makes it a drop-in base stream for TLS adapter tests without
/// touching the network.
pub struct PipeStream {
    rx: Arc<PipeHalf>,
    tx: Arc<PipeHalf>,
    closed: bool,
}

/// A connected pair of pipe streams with unbounded buffers.
pub fn pipe() -> (PipeStream, PipeStream) {
    bounded_pipe(usize::MAX)
}

/// A connected pair whose per-direction buffers hold at most
/// `capacity` bytes, so writes can block and time out.
pub fn bounded_pipe(capacity: usize) -> (PipeStream, PipeStream) {
    let a_to_b = PipeHalf::new(capacity);
    let b_to_a = PipeHalf::new(capacity);
    (
        PipeStream {
            rx: Arc::clone(&b_to_a),
            tx: Arc::clone(&a_to_b),
            closed: false,
        },
        PipeStream {
            rx: a_to_b,
            tx: b_to_a,
            closed: false,
        },
    )
}

impl PipeStream {
    fn read_once(&mut self, buf: &mut [u8], deadline: Deadline) -> Result<usize, StreamError> {
        if self.closed {
            return Err(StreamError::Io(io::Error::from(
                io::ErrorKind::NotConnected,
            )));
        }
        let mut state = self.rx.state.lock().unwrap();
        loop {
            if !state.data.is_empty() {
                let n = buf.len().min(state.data.len());
                for b in buf[..n].iter_mut() {
                    *b = state.data.pop_front().unwrap();
                }
                self.rx.cond.notify_all();
                return Ok(n);
            }
            if state.closed {
                return Ok(0);
            }
            match deadline.remaining() {
                None => state = self.rx.cond.wait(state).unwrap(),
                Some(left) if left.is_zero() => return Err(StreamError::TimedOut),
                Some(left) => {
                    let (guard, timeout) = self.rx.cond.wait_timeout(state, left).unwrap();
                    state = guard;
                    if timeout.timed_out() && state.data.is_empty() && !state.closed {
                        return Err(StreamError::TimedOut);
                    }
                }
            }
        }
    }

    fn write_once(&mut self, buf: &[u8], deadline: Deadline) -> Result<usize, StreamError> {
        if self.closed {
            return Err(StreamError::Io(io::Error::from(
                io::ErrorKind::NotConnected,
            )));
        }
        let mut state = self.tx.state.lock().unwrap();
        loop {
            if state.closed {
                return Err(StreamError::Io(io::Error::from(io::ErrorKind::BrokenPipe)));
            }
            let room = state.capacity - state.data.len();
            if room > 0 {
                let n = buf.len().min(room);
                state.data.extend(&buf[..n]);
                self.tx.cond.notify_all();
                return Ok(n);
            }
            match deadline.remaining() {
                None => state = self.tx.cond.wait(state).unwrap(),
                Some(left) if left.is_zero() => return Err(StreamError::TimedOut),
                Some(left) => {
                    let (guard, timeout) = self.tx.cond.wait_timeout(state, left).unwrap();
                    state = guard;
                    if timeout.timed_out() && state.data.len() == state.capacity {
                        return Err(StreamError::TimedOut);
                    }
                }
            }
        }
    }
}

impl Stream for PipeStream {
    fn readv(
        &mut self,
        bufs: &mut [IoSliceMut<'_>],
        min_bytes: usize,
        timeout: Option<Duration>,
    ) -> Result<usize, StreamError> {
        let deadline = Deadline::after(timeout);
        let mut total = 0usize;
        for buf in bufs.iter_mut() {
            let mut pos = 0usize;
            while pos < buf.len() {
                match self.read_once(&mut buf[pos..], deadline) {
                    Ok(0) => return Ok(total),
                    Ok(n) => {
                        total += n;
                        pos += n;
                        if total >= min_bytes {
                            return Ok(total);
                        }
                    }
                    Err(StreamError::TimedOut) => {
                        if total == 0 {
                            return Err(StreamError::TimedOut);
                        }
                        return Ok(total);
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(total)
    }

    fn writev(
        &mut self,
        bufs: &[IoSlice<'_>],
        timeout: Option<Duration>,
    ) -> Result<usize, StreamError> {
        let deadline = Deadline::after(timeout);
        let mut total = 0usize;
        for buf in bufs.iter() {
            let mut pos = 0usize;
            while pos < buf.len() {
                match self.write_once(&buf[pos..], deadline) {
                    Ok(n) => {
                        total += n;
                        pos += n;
                    }
                    Err(StreamError::TimedOut) => {
                        if total == 0 {
                            return Err(StreamError::TimedOut);
                        }
                        return Ok(total);
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Ok(total)
    }

    fn flush(&mut self, _timeout: Option<Duration>) -> Result<(), StreamError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), StreamError> {
        self.closed = true;
        self.tx.close();
        Ok(())
    }

    fn set_option(&mut self, _opt: StreamOption) -> Result<(), StreamError> {
        Ok(())
    }

    fn is_closed(&mut self) -> bool {
        self.closed || self.rx.state.lock().unwrap().closed
    }
}

impl Drop for PipeStream {
    fn drop(&mut self) {
        self.tx.close();
    }
}

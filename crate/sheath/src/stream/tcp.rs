//! Plain TCP implementation of the [Stream] contract.
//!
//! Per-call timeouts are emulated with the socket's read/write timeout,
//! refreshed from the operation deadline before every underlying call. A
//! zero remaining budget turns into a momentary non-blocking attempt, so
//! bytes that are already available still get through.

use std::io::{self, IoSlice, IoSliceMut, Read as _, Write as _};
use std::net::{self, Shutdown, ToSocketAddrs};
use std::time::Duration;

use super::deadline::Deadline;
use super::{Stream, StreamError, StreamOption};

pub struct TcpBaseStream {
    inner: net::TcpStream,
    closed: bool,
}

impl TcpBaseStream {
    pub fn new(inner: net::TcpStream) -> Self {
        Self {
            inner,
            closed: false,
        }
    }

    pub fn connect<A: ToSocketAddrs>(addr: A) -> Result<Self, StreamError> {
        Ok(Self::new(net::TcpStream::connect(addr)?))
    }

    /// One underlying read, bounded by the deadline's remaining budget.
    fn read_once(&mut self, buf: &mut [u8], deadline: Deadline) -> Result<usize, StreamError> {
        self.check_open()?;
        match deadline.remaining() {
            Some(left) if left.is_zero() => {
                self.inner.set_nonblocking(true)?;
                let res = self.inner.read(buf);
                self.inner.set_nonblocking(false)?;
                map_io_result(res)
            }
            left => {
                self.inner.set_read_timeout(left)?;
                map_io_result(self.inner.read(buf))
            }
        }
    }

    fn write_once(&mut self, buf: &[u8], deadline: Deadline) -> Result<usize, StreamError> {
        self.check_open()?;
        match deadline.remaining() {
            Some(left) if left.is_zero() => {
                self.inner.set_nonblocking(true)?;
                let res = self.inner.write(buf);
                self.inner.set_nonblocking(false)?;
                map_io_result(res)
            }
            left => {
                self.inner.set_write_timeout(left)?;
                map_io_result(self.inner.write(buf))
            }
        }
    }

    fn check_open(&self) -> Result<(), StreamError> {
        if self.closed {
            return Err(StreamError::Io(io::Error::from(
                io::ErrorKind::NotConnected,
            )));
        }
        Ok(())
    }
}

fn map_io_result(res: io::Result<usize>) -> Result<usize, StreamError> {
    match res {
        Ok(n) => Ok(n),
        Err(err)
            if matches!(
                err.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ) =>
        {
            Err(StreamError::TimedOut)
        }
        Err(err) => Err(StreamError::Io(err)),
    }
}

impl Stream for TcpBaseStream {
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
                    Ok(0) => return Ok(total), // EOF
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
                    Ok(0) => return Ok(total),
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
        self.inner.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), StreamError> {
        self.closed = true;
        match self.inner.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // The peer may already have torn the connection down.
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(StreamError::Io(err)),
        }
    }

    fn set_option(&mut self, opt: StreamOption) -> Result<(), StreamError> {
        match opt {
            StreamOption::NoDelay(on) => self.inner.set_nodelay(on)?,
            StreamOption::Ttl(ttl) => self.inner.set_ttl(ttl)?,
        }
        Ok(())
    }

    fn is_closed(&mut self) -> bool {
        if self.closed {
            return true;
        }
        if self.inner.set_nonblocking(true).is_err() {
            return true;
        }
        let mut byte = [0u8; 1];
        let res = self.inner.peek(&mut byte);
        let _ = self.inner.set_nonblocking(false);
        match res {
            Ok(0) => true,
            Ok(_) => false,
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => false,
            Err(_) => true,
        }
    }
}

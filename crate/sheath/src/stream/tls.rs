//! TLS adapter implementing the [Stream] contract over any base stream.
//!
//! The adapter owns the engine session and, through the bridge, the base
//! stream. All engine I/O flows through [BridgeIo], a borrowed view that
//! carries the current operation's deadline down to the base stream and
//! records in which direction the engine would have blocked.

use std::io::{self, IoSlice, IoSliceMut, Read as _, Write as _};
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConnection, Connection, RootCertStore, ServerConnection};

use super::coalesce;
use super::deadline::Deadline;
use super::{Stream, StreamError, StreamOption};
use crate::metrics::{NoopMetrics, StreamMetrics};
use crate::security::{self, TlsOptions};

/// Plaintext handed to the engine per record. Keeping feeds at the TLS
/// maximum plaintext size bounds how much data is in flight between two
/// deadline checks.
const RECORD_CHUNK: usize = 16 * 1024;

/// Which side of the handshake this stream plays. Fixed at construction.
#[derive(Clone, Debug)]
pub enum Role {
    Client { server_name: String },
    Server,
}

/// A TLS-secured [Stream].
///
/// Wraps an exclusively owned base stream and speaks TLS over it while
/// exposing the unchanged stream contract, plus the TLS-specific
/// operations (handshake, readiness advisories, certificate check).
///
/// Single-threaded: operations block the calling thread and instances
/// must not be used from two threads at once.
pub struct TlsStream<S: Stream> {
    session: Connection,
    bridge: Bridge<S>,
    roots: Arc<RootCertStore>,
    weak_cert_validation: bool,
    client: bool,
    metrics: Arc<dyn StreamMetrics>,
}

/// Owns the base stream and the advisory retry flags.
struct Bridge<S> {
    stream: S,
    retry_read: bool,
    retry_write: bool,
}

impl<S: Stream> Bridge<S> {
    fn io(&mut self, deadline: Deadline) -> BridgeIo<'_, S> {
        BridgeIo {
            stream: &mut self.stream,
            deadline,
            retry_read: &mut self.retry_read,
            retry_write: &mut self.retry_write,
        }
    }

    fn clear_retry(&mut self) {
        self.retry_read = false;
        self.retry_write = false;
    }
}

/// Engine-facing view of the base stream for a single engine call.
///
/// Timeouts surface as [io::ErrorKind::WouldBlock] so the engine treats
/// them as retryable, with the blocked direction recorded for the
/// `should_read`/`should_write` advisories.
struct BridgeIo<'a, S: Stream> {
    stream: &'a mut S,
    deadline: Deadline,
    retry_read: &'a mut bool,
    retry_write: &'a mut bool,
}

impl<S: Stream> io::Read for BridgeIo<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stream.read(buf, self.deadline.remaining()) {
            Ok(n) => Ok(n),
            Err(err) if err.is_timeout() => {
                *self.retry_read = true;
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            }
            Err(err) => Err(err.into_io()),
        }
    }
}

impl<S: Stream> io::Write for BridgeIo<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.stream.write(buf, self.deadline.remaining()) {
            Ok(n) => Ok(n),
            Err(err) if err.is_timeout() => {
                *self.retry_write = true;
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            }
            Err(err) => Err(err.into_io()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream
            .flush(self.deadline.remaining())
            .map_err(|err| err.into_io())
    }
}

#[derive(PartialEq, Eq)]
enum FlushOutcome {
    Flushed,
    Stalled,
}

impl<S: Stream> TlsStream<S> {
    /// Secure `base_stream` with TLS.
    ///
    /// Ownership of the base stream transfers to the adapter. Fails if
    /// the engine configuration or session cannot be built; anything
    /// partially constructed is released on the way out.
    pub fn new(base_stream: S, options: &TlsOptions, role: Role) -> Result<Self, StreamError> {
        Self::with_metrics(base_stream, options, role, Arc::new(NoopMetrics))
    }

    /// Like [TlsStream::new], with an explicit metrics sink.
    pub fn with_metrics(
        base_stream: S,
        options: &TlsOptions,
        role: Role,
        metrics: Arc<dyn StreamMetrics>,
    ) -> Result<Self, StreamError> {
        let client = matches!(role, Role::Client { .. });
        let (session, roots) = match role {
            Role::Client { server_name } => {
                let (config, roots) = security::client_config(options)?;
                let name = ServerName::try_from(server_name).map_err(|err| {
                    StreamError::Config(format!("invalid server name: {err}"))
                })?;
                (
                    Connection::Client(ClientConnection::new(config, name)?),
                    roots,
                )
            }
            Role::Server => {
                let (config, roots) = security::server_config(options)?;
                (Connection::Server(ServerConnection::new(config)?), roots)
            }
        };

        let stream = Self {
            session,
            bridge: Bridge {
                stream: base_stream,
                retry_read: false,
                retry_write: false,
            },
            roots,
            weak_cert_validation: options.weak_cert_validation,
            client,
            metrics,
        };
        stream.metrics.stream_opened();

        Ok(stream)
    }

    /// Drive the TLS handshake.
    ///
    /// Returns `Ok(true)` once the handshake has completed. A zero
    /// timeout makes this a non-blocking probe: `Ok(false)` means the
    /// engine is waiting for the peer, and the advisory queries tell
    /// the caller which direction to poll before re-invoking. A bounded
    /// timeout that elapses first is [StreamError::TimedOut], unless a
    /// more specific engine or I/O error occurred.
    ///
    /// The handshake also runs implicitly on the first read or write.
    pub fn handshake(&mut self, timeout: Option<Duration>) -> Result<bool, StreamError> {
        let deadline = Deadline::after(timeout);
        let probe = matches!(timeout, Some(t) if t.is_zero());
        self.bridge.clear_retry();
        let TlsStream {
            session,
            bridge,
            metrics,
            ..
        } = self;

        if Self::drive_handshake(session, bridge, deadline)? {
            return Ok(true);
        }
        if probe {
            return Ok(false);
        }
        metrics.timeout_inc();
        Err(StreamError::TimedOut)
    }

    /// Whether the last blocked operation is worth retrying.
    pub fn should_retry(&self) -> bool {
        self.bridge.retry_read || self.bridge.retry_write
    }

    /// Whether the engine was waiting for bytes from the peer.
    pub fn should_read(&self) -> bool {
        self.bridge.retry_read
    }

    /// Whether the engine was waiting to push bytes to the peer.
    pub fn should_write(&self) -> bool {
        self.bridge.retry_write
    }

    /// Verify the peer's negotiated certificate chain against `host`.
    ///
    /// Delegates to [security::check_cert] with this stream's trust
    /// anchors and weak-validation flag. Only meaningful once the
    /// handshake has completed.
    pub fn check_cert(&self, host: &str) -> Result<(), StreamError> {
        let chain = self
            .session
            .peer_certificates()
            .ok_or(StreamError::NoPeerCertificate)?;
        security::check_cert(chain, &self.roots, host, self.weak_cert_validation)
    }

    /// True if this is the connecting side of the handshake.
    pub fn is_client(&self) -> bool {
        self.client
    }

    pub fn base_stream(&self) -> &S {
        &self.bridge.stream
    }

    pub fn base_stream_mut(&mut self) -> &mut S {
        &mut self.bridge.stream
    }

    /// One handshake attempt bounded by `deadline`. `Ok(false)` means
    /// the engine blocked; the bridge retry flags say in which
    /// direction.
    fn drive_handshake(
        session: &mut Connection,
        bridge: &mut Bridge<S>,
        deadline: Deadline,
    ) -> Result<bool, StreamError> {
        while session.is_handshaking() {
            let step = if session.wants_write() {
                session.write_tls(&mut bridge.io(deadline))
            } else if session.wants_read() {
                match session.read_tls(&mut bridge.io(deadline)) {
                    Ok(0) => {
                        return Err(StreamError::Io(io::Error::from(
                            io::ErrorKind::UnexpectedEof,
                        )));
                    }
                    other => other,
                }
            } else {
                break;
            };

            match step {
                Ok(_) => {
                    session.process_new_packets()?;
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(false),
                Err(err) => return Err(StreamError::Io(err)),
            }
        }

        // The final flight can be queued after the handshake state
        // flips; it still has to reach the peer.
        match Self::flush_engine(session, bridge, deadline)? {
            FlushOutcome::Flushed => Ok(true),
            FlushOutcome::Stalled => Ok(false),
        }
    }

    /// Push all pending engine ciphertext to the base stream.
    fn flush_engine(
        session: &mut Connection,
        bridge: &mut Bridge<S>,
        deadline: Deadline,
    ) -> Result<FlushOutcome, StreamError> {
        while session.wants_write() {
            match session.write_tls(&mut bridge.io(deadline)) {
                Ok(0) => {
                    return Err(StreamError::Io(io::Error::from(io::ErrorKind::WriteZero)));
                }
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(FlushOutcome::Stalled);
                }
                Err(err) => return Err(StreamError::Io(err)),
            }
        }
        Ok(FlushOutcome::Flushed)
    }

    /// Encrypt and deliver one coalesced chunk.
    ///
    /// Plaintext is fed to the engine a record's worth at a time, and a
    /// piece only counts once its ciphertext has fully reached the base
    /// stream. A stalled flush reports the bytes delivered so far as a
    /// short write; the whole writev stops there.
    fn write_chunk(
        session: &mut Connection,
        bridge: &mut Bridge<S>,
        metrics: &Arc<dyn StreamMetrics>,
        chunk: &[u8],
        deadline: Deadline,
    ) -> Result<usize, StreamError> {
        let mut accepted = 0usize;
        for piece in chunk.chunks(RECORD_CHUNK) {
            let mut fed = 0usize;
            while fed < piece.len() {
                let n = session
                    .writer()
                    .write(&piece[fed..])
                    .map_err(StreamError::Io)?;
                if n == 0 {
                    return Err(StreamError::Io(io::Error::from(io::ErrorKind::WriteZero)));
                }
                fed += n;
                if Self::flush_engine(session, bridge, deadline)? == FlushOutcome::Stalled {
                    log::trace!(
                        "tls write stalled after {accepted} of {} bytes",
                        chunk.len()
                    );
                    metrics.timeout_inc();
                    return Ok(accepted);
                }
            }
            accepted += piece.len();
        }
        Ok(accepted)
    }

    /// One engine read into `buf`, pulling in records as needed.
    ///
    /// `Ok(0)` is either peer closure or a retryable block; the bridge
    /// retry flags distinguish the two, exactly like the advisory
    /// queries do for callers.
    fn read_step(
        session: &mut Connection,
        bridge: &mut Bridge<S>,
        buf: &mut [u8],
        deadline: Deadline,
    ) -> Result<usize, StreamError> {
        loop {
            match session.reader().read(buf) {
                Ok(n) => return Ok(n),
                // Peer went away without a close_notify; plain EOF as
                // far as the stream contract is concerned.
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => return Ok(0),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    // Out of plaintext; the engine needs another record.
                    if session.wants_write()
                        && Self::flush_engine(session, bridge, deadline)? == FlushOutcome::Stalled
                    {
                        return Ok(0);
                    }
                    match session.read_tls(&mut bridge.io(deadline)) {
                        Ok(0) => return Ok(0), // peer closed, no retry signaled
                        Ok(_) => {
                            session.process_new_packets()?;
                        }
                        Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(0),
                        Err(err) => return Err(StreamError::Io(err)),
                    }
                }
                Err(err) => return Err(StreamError::Io(err)),
            }
        }
    }
}

impl<S: Stream> Stream for TlsStream<S> {
    /// Fill `bufs` in order until `min_bytes` is reached, stopping
    /// immediately at the threshold. Deadline expiry on a step that
    /// moved no bytes is a timeout failure; once the minimum has been
    /// read the bytes obtained come back as a normal result.
    fn readv(
        &mut self,
        bufs: &mut [IoSliceMut<'_>],
        min_bytes: usize,
        timeout: Option<Duration>,
    ) -> Result<usize, StreamError> {
        let deadline = Deadline::after(timeout);
        self.bridge.clear_retry();
        let TlsStream {
            session,
            bridge,
            metrics,
            ..
        } = self;

        if session.is_handshaking() && !Self::drive_handshake(session, bridge, deadline)? {
            metrics.timeout_inc();
            return Err(StreamError::TimedOut);
        }

        let mut total = 0usize;
        for buf in bufs.iter_mut() {
            let mut pos = 0usize;
            while pos < buf.len() {
                bridge.clear_retry();
                let n = Self::read_step(session, bridge, &mut buf[pos..], deadline)?;

                if n == 0 && !bridge.retry_read && !bridge.retry_write {
                    // Peer closed; report what we have.
                    metrics.ingress_add(total as u64);
                    return Ok(total);
                }
                if deadline.has_expired() && n == 0 {
                    metrics.timeout_inc();
                    return Err(StreamError::TimedOut);
                }

                total += n;
                pos += n;
                if total >= min_bytes {
                    metrics.ingress_add(total as u64);
                    return Ok(total);
                }
            }
        }

        metrics.ingress_add(total as u64);
        Ok(total)
    }

    /// Write all fragments through the coalescing engine. A short
    /// underlying write terminates the operation with the cumulative
    /// bytes delivered; hard failures propagate as errors.
    fn writev(
        &mut self,
        bufs: &[IoSlice<'_>],
        timeout: Option<Duration>,
    ) -> Result<usize, StreamError> {
        let deadline = Deadline::after(timeout);
        self.bridge.clear_retry();
        let TlsStream {
            session,
            bridge,
            metrics,
            ..
        } = self;

        if session.is_handshaking() && !Self::drive_handshake(session, bridge, deadline)? {
            metrics.timeout_inc();
            return Err(StreamError::TimedOut);
        }

        let written = coalesce::write_coalesced(bufs, |chunk| {
            Self::write_chunk(session, bridge, metrics, chunk, deadline)
        })?;
        self.metrics.egress_add(written as u64);

        Ok(written)
    }

    fn flush(&mut self, timeout: Option<Duration>) -> Result<(), StreamError> {
        let deadline = Deadline::after(timeout);
        self.bridge.clear_retry();
        let TlsStream {
            session,
            bridge,
            metrics,
            ..
        } = self;
        match Self::flush_engine(session, bridge, deadline)? {
            FlushOutcome::Flushed => Ok(()),
            FlushOutcome::Stalled => {
                metrics.timeout_inc();
                Err(StreamError::TimedOut)
            }
        }
    }

    /// Close the base stream only; the TLS session stays intact until
    /// the adapter is dropped.
    ///
    /// The close result is ignored: checking it races with reuse of the
    /// underlying descriptor.
    fn close(&mut self) -> Result<(), StreamError> {
        if let Err(err) = self.bridge.stream.close() {
            log::debug!("ignoring base stream close failure: {err}");
        }
        Ok(())
    }

    fn set_option(&mut self, opt: StreamOption) -> Result<(), StreamError> {
        self.bridge.stream.set_option(opt)
    }

    fn is_closed(&mut self) -> bool {
        self.bridge.stream.is_closed()
    }
}

impl<S: Stream> Drop for TlsStream<S> {
    fn drop(&mut self) {
        // The session, bridge and base stream are released by field
        // drop order; only the liveness accounting is explicit.
        self.metrics.stream_disposed();
    }
}

use std::io;

/// Error returned by [Stream](crate::stream::Stream) operations.
///
/// Byte-count results stay on the `Ok` side: a short write or a read
/// that stopped early reports the partial count, and EOF reports 0.
/// Only hard failures, timeouts with no progress, and construction
/// problems end up here.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("I/O error {0}")]
    Io(#[from] io::Error),

    #[error("TLS error {0}")]
    Tls(#[from] rustls::Error),

    #[error("operation timed out")]
    TimedOut,

    #[error("invalid TLS configuration: {0}")]
    Config(String),

    #[error("peer presented no certificate")]
    NoPeerCertificate,
}

impl StreamError {
    /// True for deadline-class failures (the ETIMEDOUT of the stream
    /// contract), as opposed to hard I/O or TLS failures.
    pub fn is_timeout(&self) -> bool {
        match self {
            StreamError::TimedOut => true,
            StreamError::Io(err) => {
                matches!(
                    err.kind(),
                    io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                )
            }
            _ => false,
        }
    }

    /// Convert into an [io::Error] for code behind [io::Read]/[io::Write]
    /// seams. Timeouts map to [io::ErrorKind::WouldBlock] so the TLS
    /// engine treats them as retryable.
    pub(crate) fn into_io(self) -> io::Error {
        match self {
            StreamError::Io(err) => err,
            StreamError::TimedOut => io::Error::from(io::ErrorKind::WouldBlock),
            other => io::Error::other(other.to_string()),
        }
    }
}

//! Error handling for `fibre`.
//!
//! Mirrors the shape of a conventional wrapped-error type: an `ErrorKind`
//! classifies *why* something failed, and an optional chain of context
//! records *where*. Call sites use the `ResultWrappedExt`/`ResultSimpleExt`
//! extension traits to attach a kind to a foreign error without writing out
//! a `match` at every call site.

use std::error;
use std::fmt;
use std::result;

/// Extension of the standard library's `Result` type, used to wrap its
/// error in a `fibre::error::Error`.
pub trait ResultWrappedExt {
    type T;

    fn wrapped_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T>;
    fn wrapped(self, kind: ErrorKind) -> Result<Self::T>;
}

/// Extension of the standard library's `Result` type.
///
/// Unlike `ResultWrappedExt`, this drops the underlying error type, which is
/// useful when the error type doesn't implement `Send`.
pub trait ResultSimpleExt {
    type T;

    fn simple(self, kind: ErrorKind) -> Result<Self::T>;
    fn simple_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T>;
}

impl<T, E> ResultWrappedExt for result::Result<T, E>
where
    E: Into<Box<dyn error::Error + Send + Sync>>,
{
    type T = T;

    fn wrapped(self, kind: ErrorKind) -> Result<Self::T> {
        self.map_err(|e| Error::wrapped(kind, e))
    }

    fn wrapped_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T> {
        self.map_err(|e| Error::wrapped(kind, format!("{}: {}", msg, e.into())))
    }
}

impl<T, E> ResultSimpleExt for result::Result<T, E> {
    type T = T;

    fn simple(self, kind: ErrorKind) -> Result<Self::T> {
        self.map_err(|_| Error::simple(kind))
    }

    fn simple_msg(self, kind: ErrorKind, msg: &str) -> Result<Self::T> {
        self.map_err(|_| Error::wrapped(kind, msg.to_string()))
    }
}

/// Wrapper result type used throughout this crate.
pub type Result<T> = result::Result<T, Error>;

/// Classifies the failure domain of an `Error`. Roughly one variant per core
/// module, plus the handful of cross-cutting failure modes that don't belong
/// to a single module.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// Malformed wire data (reserved bit set, truncated field, illegal
    /// close count). Per spec, these are dropped silently at the protocol
    /// layer; this kind exists for the rare case a caller wants to observe
    /// the drop (e.g. in tests).
    Protocol,
    /// A `Fifo` operation violated one of its invariants.
    Fifo,
    /// A `Connection` could not progress (teardown, malformed ack, ...).
    Connection,
    /// A `Multiplexer` was asked to operate on a pipe it doesn't own.
    Multiplexer,
    /// A `Domain` lookup failed or exceeded the bounded capacity.
    Domain,
    /// A function dispatch adaptor failed to collect or emit arguments.
    Dispatch,
    /// The transport boundary (`FrameStreamSink`) reported a failure.
    Transport,
    /// A discovery backend failed to resolve or reach a peer.
    Discovery,
    /// Wraps a `std::io::Error`.
    Io,
    /// Catch-all for errors that don't fit another kind.
    Other,
}

/// One recorded frame of a rich-error context chain (file, line, message).
#[cfg(feature = "rich-errors")]
#[derive(Debug, Clone)]
pub struct Frame {
    pub file: &'static str,
    pub line: u32,
    pub message: String,
}

/// Maximum number of context frames retained per error, per spec ("up to 4
/// frames").
#[cfg(feature = "rich-errors")]
const MAX_FRAMES: usize = 4;

/// The error type used throughout this crate.
pub struct Error {
    inner: ErrorInner,
    #[cfg(feature = "rich-errors")]
    frames: Vec<Frame>,
}

enum ErrorInner {
    Simple(ErrorKind),
    Wrapped(ErrorKind, Box<dyn error::Error + Send + Sync>),
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            ErrorInner::Simple(k) => write!(f, "Error({:?})", k)?,
            ErrorInner::Wrapped(k, e) => write!(f, "Error({:?}, {:?})", k, e)?,
        }
        #[cfg(feature = "rich-errors")]
        for frame in &self.frames {
            write!(f, "\n  at {}:{}: {}", frame.file, frame.line, frame.message)?;
        }
        Ok(())
    }
}

impl Error {
    /// Returns an error not wrapping another error implementation, with
    /// kind `ErrorKind`.
    pub fn simple(kind: ErrorKind) -> Self {
        Error {
            inner: ErrorInner::Simple(kind),
            #[cfg(feature = "rich-errors")]
            frames: Vec::new(),
        }
    }

    /// Wraps an arbitrary error in an `Error`, with kind `ErrorKind`.
    pub fn wrapped<E>(kind: ErrorKind, e: E) -> Self
    where
        E: Into<Box<dyn error::Error + Send + Sync>>,
    {
        Error {
            inner: ErrorInner::Wrapped(kind, e.into()),
            #[cfg(feature = "rich-errors")]
            frames: Vec::new(),
        }
    }

    /// Returns a copy of the `ErrorKind` of this `Error`.
    pub fn kind(&self) -> ErrorKind {
        match &self.inner {
            ErrorInner::Simple(k) => *k,
            ErrorInner::Wrapped(k, _) => *k,
        }
    }

    /// Swaps the `ErrorKind` of this `Error`, keeping any wrapped cause.
    pub fn swap_kind(self, k: ErrorKind) -> Self {
        let inner = match self.inner {
            ErrorInner::Simple(_) => ErrorInner::Simple(k),
            ErrorInner::Wrapped(_, e) => ErrorInner::Wrapped(k, e),
        };
        Error {
            inner,
            #[cfg(feature = "rich-errors")]
            frames: self.frames,
        }
    }

    /// Pushes a context frame onto the error's stack chain. Oldest frames
    /// are dropped once the chain reaches its cap, keeping the closest
    /// context around.
    #[cfg(feature = "rich-errors")]
    pub fn context(mut self, file: &'static str, line: u32, message: impl Into<String>) -> Self {
        if self.frames.len() == MAX_FRAMES {
            self.frames.remove(0);
        }
        self.frames.push(Frame {
            file,
            line,
            message: message.into(),
        });
        self
    }

    /// Returns the recorded context frames, closest first.
    #[cfg(feature = "rich-errors")]
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }
}

/// Attaches a context frame at the call site. A no-op (beyond evaluating
/// `$msg`) when the `rich-errors` feature is disabled.
#[macro_export]
macro_rules! errctx {
    ($err:expr, $msg:expr) => {{
        #[cfg(feature = "rich-errors")]
        {
            $err.context(file!(), line!(), $msg)
        }
        #[cfg(not(feature = "rich-errors"))]
        {
            let _ = &$msg;
            $err
        }
    }};
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            ErrorInner::Simple(k) => write!(f, "{:?}", k),
            ErrorInner::Wrapped(k, e) => write!(f, "{:?}: {}", k, e),
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::wrapped(ErrorKind::Io, e)
    }
}

impl error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err: Result<()> = Err::<(), _>(io_err).wrapped(ErrorKind::Transport);
        let err = err.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn swap_kind_preserves_cause() {
        let err = Error::wrapped(ErrorKind::Io, "cause").swap_kind(ErrorKind::Protocol);
        assert_eq!(err.kind(), ErrorKind::Protocol);
        assert!(err.to_string().contains("cause"));
    }
}

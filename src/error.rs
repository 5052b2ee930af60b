use std::ffi::OsString;
use std::fmt;
use std::io;
use std::process::ExitStatus;
use std::result;

/// A convenient type alias for `Result<T, xzpipe::Error>`.
pub type Result<T> = result::Result<T, Error>;

/// `FinishError` occurs when releasing an [`XzWriter`](crate::XzWriter)
/// fails.
///
/// Releasing always closes the pipe and reaps the process, even when one of
/// those steps fails, so the destination is always recovered. This error
/// contains both the destination and the first error that occurred.
///
/// The type parameter `W` is the destination writer.
pub struct FinishError<W> {
    wtr: W,
    err: Error,
}

impl<W> FinishError<W> {
    pub(crate) fn new(wtr: W, err: Error) -> FinishError<W> {
        FinishError { wtr, err }
    }

    /// Returns the error which caused the call to `finish` to fail.
    pub fn error(&self) -> &Error {
        &self.err
    }

    /// Returns the error which caused the call to `finish` to fail.
    pub fn into_error(self) -> Error {
        self.err
    }

    /// Returns the destination writer.
    ///
    /// Whatever the compressor produced before the failure has already been
    /// written to it, which is rarely a complete xz stream.
    pub fn into_inner(self) -> W {
        self.wtr
    }
}

impl<W: std::any::Any> std::error::Error for FinishError<W> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.err)
    }
}

impl<W> fmt::Display for FinishError<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.err.fmt(f)
    }
}

impl<W> fmt::Debug for FinishError<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.err.fmt(f)
    }
}

impl<W> From<FinishError<W>> for Error {
    fn from(err: FinishError<W>) -> Error {
        err.err
    }
}

/// Error describes all the possible errors that may occur while running the
/// external compressor.
///
/// Errors from writing into the compressor are not represented here: they
/// are the `std::io::Error`s returned by the pipe and are passed through
/// unchanged by `Write::write`.
#[derive(Debug)]
pub enum Error {
    /// This error occurs when the compressor process could not be started,
    /// usually because the executable could not be found, or when its pipes
    /// could not be set up.
    Spawn {
        /// The program that was run.
        program: OsString,
        /// The underlying I/O error.
        err: io::Error,
    },
    /// This error occurs when flushing the compressor's standard input
    /// fails before it is closed.
    ///
    /// The standard library's child pipes are unbuffered and close
    /// infallibly, so this is not produced on any platform `std` supports
    /// today. It is kept so that a failed flush is never silently dropped.
    Pipe(io::Error),
    /// This error occurs when the compressor exits unsuccessfully, either
    /// with a nonzero exit code or because it was killed by a signal (for
    /// example after its [`CancelToken`](crate::CancelToken) fired).
    Exit {
        /// The exit status reported by the operating system.
        status: ExitStatus,
    },
    /// This error occurs when the operating system fails to report the
    /// compressor's exit status.
    Wait(io::Error),
    /// This error occurs when copying the compressor's output into the
    /// destination fails.
    Output(io::Error),
}

impl Error {
    /// Returns the exit code of the compressor, if this error was caused by
    /// an unsuccessful exit that carried one.
    ///
    /// Processes killed by a signal have no exit code.
    pub fn exit_code(&self) -> Option<i32> {
        match *self {
            Error::Exit { status } => status.code(),
            _ => None,
        }
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        match err {
            Error::Spawn { err, .. }
            | Error::Pipe(err)
            | Error::Wait(err)
            | Error::Output(err) => err,
            err @ Error::Exit { .. } => io::Error::new(io::ErrorKind::Other, err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match *self {
            Error::Spawn { ref err, .. }
            | Error::Pipe(ref err)
            | Error::Wait(ref err)
            | Error::Output(ref err) => Some(err),
            Error::Exit { .. } => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::Spawn { ref program, ref err } => write!(
                f,
                "failed to start compressor {:?}: {}",
                program, err
            ),
            Error::Pipe(ref err) => {
                write!(f, "failed to close compressor input: {}", err)
            }
            Error::Exit { status } => {
                write!(f, "compressor exited unsuccessfully ({})", status)
            }
            Error::Wait(ref err) => {
                write!(f, "failed to wait for compressor: {}", err)
            }
            Error::Output(ref err) => {
                write!(f, "failed to write compressed output: {}", err)
            }
        }
    }
}

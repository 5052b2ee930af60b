/*!
This module provides a `std::io::Write` implementation:

- `XzWriter` wraps another `std::io::Write` implementation, and compresses
  data written to it by piping it through an external `xz` process. Use this
  if you have an uncompressed data source and wish to write it as an xz
  stream without linking a compression library.
*/

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::io::{self, Write};
use std::panic::{self, Location};
use std::process::ChildStdin;
use std::result;
use std::thread;

use tracing::warn;

use crate::cancel::CancelToken;
use crate::error::{Error, FinishError, Result};
use crate::guard::{LeakGuard, LeakPolicy};
use crate::process::{self, Process};
use crate::XZ_PROGRAM;

/// Configures and creates an [`XzWriter`].
///
/// The arguments passed to the compressor are fixed. Only the executable,
/// an optional cancellation token and the leak policy can be changed.
#[derive(Clone, Debug)]
pub struct Builder {
    program: OsString,
    cancel: Option<CancelToken>,
    leak_policy: LeakPolicy,
}

impl Default for Builder {
    fn default() -> Builder {
        Builder::new()
    }
}

impl Builder {
    /// Create a new builder with the default configuration: `xz` looked up
    /// in `PATH`, no cancellation and [`LeakPolicy::Panic`].
    pub fn new() -> Builder {
        Builder {
            program: OsString::from(XZ_PROGRAM),
            cancel: None,
            leak_policy: LeakPolicy::default(),
        }
    }

    /// Set the compressor executable.
    ///
    /// A bare name is looked up in `PATH`. The program is always invoked as
    /// `<program> --quiet --compress --stdout --best -`.
    pub fn program<P: AsRef<OsStr>>(&mut self, program: P) -> &mut Builder {
        self.program = program.as_ref().to_os_string();
        self
    }

    /// Kill the compressor when `token` is canceled.
    ///
    /// If the token is already canceled, the compressor is killed right
    /// after it starts.
    pub fn cancel_token(&mut self, token: CancelToken) -> &mut Builder {
        self.cancel = Some(token);
        self
    }

    /// Set what happens when a writer is dropped without being finished.
    pub fn leak_policy(&mut self, policy: LeakPolicy) -> &mut Builder {
        self.leak_policy = policy;
        self
    }

    /// Start the compressor and return a writer feeding it, with compressed
    /// output going to `wtr`.
    ///
    /// The returned writer remembers the location of this call, which is
    /// reported if the writer is never finished.
    #[track_caller]
    pub fn build<W>(&self, wtr: W) -> Result<XzWriter<W>>
    where
        W: io::Write + Send + 'static,
    {
        let (pipe, process) =
            process::spawn(&self.program, wtr, self.cancel.as_ref())?;
        Ok(XzWriter {
            inner: Some(Inner { pipe, process }),
            guard: LeakGuard::arm(self.leak_policy),
        })
    }
}

/// A writer for compressing an xz stream with an external process.
///
/// This `XzWriter` wraps any other writer that implements `io::Write`. Bytes
/// written to it are sent to an `xz` process and its compressed output is
/// written to the wrapped writer from a background thread as soon as it is
/// produced.
///
/// Writes are not buffered. Each call to `write` blocks until the bytes fit
/// in the operating system's pipe buffer, so a slow compressor throttles the
/// producer. Wrap the writer in a `std::io::BufWriter` when issuing many
/// small writes.
///
/// A writer must be released with [`XzWriter::finish`]. Dropping it instead
/// kills the compressor and, under the default [`LeakPolicy::Panic`],
/// panics with the location where the writer was created.
#[must_use = "an XzWriter must be released with `finish`"]
pub struct XzWriter<W: io::Write> {
    /// The pipe and the process, which are always present except while the
    /// writer is being released.
    ///
    /// An option so we can move out of it even though `XzWriter` impls
    /// `Drop`.
    inner: Option<Inner<W>>,
    /// Reports the leak, if any, after `Drop::drop` has disposed of
    /// `inner`.
    guard: LeakGuard,
}

struct Inner<W> {
    /// The compressor's standard input.
    pipe: ChildStdin,
    /// The compressor itself, along with the thread that owns the
    /// destination writer.
    process: Process<W>,
}

impl<W: io::Write + Send + 'static> XzWriter<W> {
    /// Create a new writer for streaming xz compression into `wtr`.
    ///
    /// This fails if the `xz` executable cannot be found in `PATH`.
    #[track_caller]
    pub fn new(wtr: W) -> Result<XzWriter<W>> {
        Builder::new().build(wtr)
    }

    /// Create a new writer for streaming xz compression into `wtr`, whose
    /// compressor is killed when `token` is canceled.
    ///
    /// Canceling does not release the writer; `finish` must still be
    /// called.
    #[track_caller]
    pub fn with_cancel(wtr: W, token: CancelToken) -> Result<XzWriter<W>> {
        Builder::new().cancel_token(token).build(wtr)
    }
}

impl<W: io::Write> XzWriter<W> {
    /// Returns the OS-assigned process identifier of the compressor.
    pub fn id(&self) -> Option<u32> {
        self.inner.as_ref().map(|inner| inner.process.id())
    }

    /// Returns the location where this writer was created.
    pub fn created_at(&self) -> &'static Location<'static> {
        self.guard.site()
    }

    /// Release this writer and return the destination writer.
    ///
    /// This closes the compressor's input, waits for it to exit and for
    /// all of its output to be written to (and flushed into) the
    /// destination. Both steps always run, even if the first fails, so the
    /// compressor is always reaped.
    ///
    /// If either step fails, a `FinishError` is returned, which contains the
    /// first error and the destination. An error closing the input is
    /// reported in preference to an error from the process, although with
    /// the standard library's pipes closing the input cannot fail.
    pub fn finish(mut self) -> result::Result<W, FinishError<W>> {
        self.guard.disarm();
        // unwrap: `inner` is only taken by `finish` and `drop`, and both
        // consume the writer.
        let (wtr, result) = self.inner.take().unwrap().finish();
        match result {
            Ok(()) => Ok(wtr),
            Err(err) => Err(FinishError::new(wtr, err)),
        }
    }

    fn pipe(&mut self) -> io::Result<&mut ChildStdin> {
        match self.inner {
            Some(ref mut inner) => Ok(&mut inner.pipe),
            None => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "xz writer already released",
            )),
        }
    }
}

impl<W: io::Write> io::Write for XzWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        // Nothing to forward, and a dead compressor must not turn this into
        // an error.
        if buf.is_empty() {
            return Ok(0);
        }
        self.pipe()?.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.pipe()?.flush()
    }
}

impl<W: io::Write> Drop for XzWriter<W> {
    fn drop(&mut self) {
        let inner = match self.inner.take() {
            None => return,
            Some(inner) => inner,
        };
        match self.guard.policy() {
            LeakPolicy::Panic => inner.abandon(),
            LeakPolicy::Finish => match inner.settle() {
                Ok((_, Ok(()))) => {}
                Ok((_, Err(err))) => {
                    warn!(
                        site = %self.guard.site(),
                        %err,
                        "implicit finish of xz writer failed"
                    );
                }
                // Resuming the destination's panic while unwinding would
                // abort the process.
                Err(_) if thread::panicking() => {
                    warn!(
                        site = %self.guard.site(),
                        "destination writer panicked during implicit finish"
                    );
                }
                Err(payload) => panic::resume_unwind(payload),
            },
        }
        // The guard is still armed and reports the leak when it is dropped
        // right after this.
    }
}

impl<W> Inner<W> {
    fn finish(self) -> (W, result::Result<(), Error>) {
        match self.settle() {
            Ok(finished) => finished,
            // A panicking destination writer is the caller's bug, so let it
            // surface as their panic.
            Err(payload) => panic::resume_unwind(payload),
        }
    }

    /// Close the pipe and wait for the process, returning a panic from the
    /// destination writer instead of resuming it.
    fn settle(self) -> thread::Result<(W, result::Result<(), Error>)> {
        let Inner { mut pipe, process } = self;
        let closed = pipe.flush();
        // Dropping the pipe closes it, which is the compressor's signal to
        // write out the rest of the stream and exit.
        drop(pipe);
        let (wtr, waited) = process.settle()?;
        let result = match closed {
            Err(err) => Err(Error::Pipe(err)),
            Ok(()) => waited.map(|_| ()),
        };
        Ok((wtr, result))
    }

    fn abandon(self) {
        let Inner { pipe, process } = self;
        process.terminate();
        drop(pipe);
        process.abandon();
    }
}

impl<W: io::Write> fmt::Debug for XzWriter<W> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("XzWriter")
            .field("inner", &self.inner)
            .field("guard", &self.guard)
            .finish()
    }
}

impl<W> fmt::Debug for Inner<W> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Inner")
            .field("pipe", &self.pipe)
            .field("process", &self.process)
            .finish()
    }
}

/*!
Spawning, supervising and reaping the external compressor.

The child's stdout is drained into the destination by a dedicated thread, so
that the child never stalls on a full output pipe while the caller is
blocked writing into its input pipe.
*/

use std::cmp;
use std::ffi::OsStr;
use std::fmt;
use std::io::{self, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::cancel::{CancelToken, Registration};
use crate::error::Error;
use crate::XZ_ARGS;

/// The first and the longest pause between two polls for the child's exit.
const POLL_MIN: Duration = Duration::from_millis(1);
const POLL_MAX: Duration = Duration::from_millis(20);

/// A running compressor process and the thread copying its output.
pub(crate) struct Process<W> {
    /// Shared with the cancellation hook, which only ever kills the child.
    /// Neither side holds the lock across a blocking call.
    child: Arc<Mutex<Child>>,
    /// The OS process id, kept for diagnostics.
    pid: u32,
    /// Yields the destination back once the child's stdout is closed.
    output: JoinHandle<(W, io::Result<u64>)>,
    /// Kept alive until the child has been reaped.
    cancel: Option<Registration>,
}

/// Start `program` with the fixed compressor arguments, copying whatever it
/// writes to stdout into `dst`.
///
/// On success, the child's stdin is returned as the pipe to write into. On
/// failure, no process is left running.
pub(crate) fn spawn<W>(
    program: &OsStr,
    dst: W,
    cancel: Option<&CancelToken>,
) -> Result<(ChildStdin, Process<W>), Error>
where
    W: Write + Send + 'static,
{
    let spawn_err = |err| Error::Spawn { program: program.to_os_string(), err };

    let mut child = Command::new(program)
        .args(&XZ_ARGS)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(spawn_err)?;
    let pid = child.id();

    let pipes = match (child.stdin.take(), child.stdout.take()) {
        (Some(stdin), Some(stdout)) => Ok((stdin, stdout)),
        _ => Err(io::Error::new(
            io::ErrorKind::Other,
            "compressor started without piped stdin and stdout",
        )),
    };
    let output = pipes.and_then(|(stdin, stdout)| {
        thread::Builder::new()
            .name("xz-output".to_string())
            .spawn(move || copy_output(stdout, dst))
            .map(|output| (stdin, output))
    });
    let (stdin, output) = match output {
        Ok(wired) => wired,
        Err(err) => {
            // The child may be blocked reading from stdin, so kill it
            // before reaping it.
            let _ = child.kill();
            let _ = child.wait();
            return Err(spawn_err(err));
        }
    };
    debug!(pid, program = ?program, "spawned compressor");

    let child = Arc::new(Mutex::new(child));
    let cancel = cancel.map(|token| {
        let child = Arc::clone(&child);
        token.on_cancel(move || {
            warn!(pid, "killing compressor on cancel");
            // An error means the child already exited, which is the point.
            let _ = lock(&child).kill();
        })
    });
    Ok((stdin, Process { child, pid, output, cancel }))
}

fn copy_output<W: Write>(
    mut stdout: ChildStdout,
    mut dst: W,
) -> (W, io::Result<u64>) {
    let copied = io::copy(&mut stdout, &mut dst).and_then(|n| {
        dst.flush()?;
        Ok(n)
    });
    // Draining is abandoned on error, but the pipe is closed here so that
    // the child sees EPIPE instead of blocking forever on a full pipe.
    drop(stdout);
    (dst, copied)
}

impl<W> Process<W> {
    pub(crate) fn id(&self) -> u32 {
        self.pid
    }

    /// Forcibly kill the child. This does not reap it.
    pub(crate) fn terminate(&self) {
        if let Err(err) = lock(&self.child).kill() {
            debug!(pid = self.pid, %err, "kill failed, compressor already exited");
        }
    }

    /// Block until the child exits and its output has been copied, returning
    /// the destination alongside the first error encountered.
    ///
    /// The child's input pipe must already be closed, otherwise this blocks
    /// for as long as the child waits for more input. If the destination
    /// writer panicked, its panic payload is returned instead.
    pub(crate) fn settle(
        self,
    ) -> thread::Result<(W, Result<ExitStatus, Error>)> {
        let Process { child, pid, output, cancel } = self;
        let waited = reap(&child);
        if waited.is_err() {
            // Without an exit status there is no telling whether the child
            // still holds its stdout open, so make sure it does not.
            let _ = lock(&child).kill();
        }
        drop(cancel);

        let (dst, copied) = output.join()?;
        // A failed copy closes the child's stdout early, which usually makes
        // the child fail too. The copy error is the cause, so it wins.
        let result = match (waited, copied) {
            (Err(err), _) => Err(Error::Wait(err)),
            (Ok(_), Err(err)) => Err(Error::Output(err)),
            (Ok(status), Ok(_)) if !status.success() => {
                Err(Error::Exit { status })
            }
            (Ok(status), Ok(bytes)) => {
                debug!(pid, bytes, "compressor finished");
                Ok(status)
            }
        };
        if let Err(ref err) = result {
            debug!(pid, %err, "compressor failed");
        }
        Ok((dst, result))
    }

    /// Reap a child that has been terminated and discard its output.
    pub(crate) fn abandon(self) {
        let Process { child, pid, output, cancel } = self;
        if let Err(err) = reap(&child) {
            warn!(pid, %err, "failed to reap abandoned compressor");
            let _ = lock(&child).kill();
        }
        drop(cancel);
        // A panic in the destination writer was already reported on its own
        // thread, and this may run while unwinding.
        let _ = output.join();
        debug!(pid, "abandoned compressor reaped");
    }
}

/// Poll for the child's exit without holding the lock in between, so that a
/// concurrent cancel can still kill it.
fn reap(child: &Mutex<Child>) -> io::Result<ExitStatus> {
    let mut pause = POLL_MIN;
    loop {
        if let Some(status) = lock(child).try_wait()? {
            return Ok(status);
        }
        thread::sleep(pause);
        pause = cmp::min(pause * 2, POLL_MAX);
    }
}

fn lock(child: &Mutex<Child>) -> MutexGuard<'_, Child> {
    // `Child` has no invariants a panic could break midway.
    child.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<W> fmt::Debug for Process<W> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("output", &"[...]")
            .field("cancel", &self.cancel)
            .finish()
    }
}


/*!
A small, runtime independent cancellation handle.

A [`CancelToken`] is shared between whoever wants to stop a compressor early
and the [`XzWriter`](crate::XzWriter)s that were created with it. Canceling
runs every registered hook exactly once, on the canceling thread.
*/

use std::cmp;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

type Hook = Box<dyn FnOnce() + Send>;

/// The longest the timeout thread sleeps before checking whether the token
/// is still alive or already canceled.
const TIMER_TICK: Duration = Duration::from_millis(50);

/// A handle that can be used to kill the compressor process of every writer
/// it was given to.
///
/// Tokens are cheap to clone and every clone refers to the same underlying
/// state: canceling any clone cancels all of them. Cancellation is sticky and
/// cannot be undone.
///
/// Canceling only kills the process. Writers created with the token must
/// still be released with [`XzWriter::finish`](crate::XzWriter::finish),
/// which then returns promptly with an [`Error::Exit`](crate::Error::Exit).
#[derive(Clone, Default)]
pub struct CancelToken {
    shared: Arc<Shared>,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    canceled: bool,
    next_id: u64,
    hooks: Vec<(u64, Hook)>,
}

impl CancelToken {
    /// Create a new token that has not been canceled.
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    /// Create a new token that cancels itself once `timeout` has elapsed.
    ///
    /// The deadline is tracked by a background thread, which exits soon
    /// after the token is canceled or after every clone of it is dropped.
    /// A timeout too large to be represented as a point in time, such as
    /// `Duration::MAX`, never fires.
    pub fn with_timeout(timeout: Duration) -> CancelToken {
        let token = CancelToken::new();
        let deadline = match Instant::now().checked_add(timeout) {
            None => return token,
            Some(deadline) => deadline,
        };
        let shared = Arc::downgrade(&token.shared);
        let spawned = thread::Builder::new()
            .name("xz-cancel-timer".to_string())
            .spawn(move || cancel_at(shared, deadline));
        if let Err(err) = spawned {
            // Without a timer thread the deadline can never be observed, so
            // fail closed.
            debug!(%err, "failed to start timeout thread, canceling now");
            token.cancel();
        }
        token
    }

    /// Cancel this token, killing every process attached to it.
    ///
    /// Calling this more than once has no additional effect.
    pub fn cancel(&self) {
        let hooks = {
            let mut state = self.shared.lock();
            if state.canceled {
                return;
            }
            state.canceled = true;
            std::mem::take(&mut state.hooks)
        };
        debug!(hooks = hooks.len(), "cancel token fired");
        // Hooks run outside the lock so that they may freely touch the
        // token themselves.
        for (_, hook) in hooks {
            hook();
        }
    }

    /// Returns true if and only if this token has been canceled.
    pub fn is_canceled(&self) -> bool {
        self.shared.lock().canceled
    }

    /// Register a hook to run when this token is canceled.
    ///
    /// If the token has already been canceled, the hook runs immediately on
    /// the calling thread. Dropping the returned registration unregisters
    /// the hook if it has not run yet.
    pub(crate) fn on_cancel<F>(&self, hook: F) -> Registration
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.lock();
        if state.canceled {
            drop(state);
            hook();
            return Registration { shared: None, id: 0 };
        }
        let id = state.next_id;
        state.next_id += 1;
        state.hooks.push((id, Box::new(hook)));
        Registration { shared: Some(Arc::clone(&self.shared)), id }
    }
}

/// Cancel the token behind `shared` at `deadline`, unless it is canceled or
/// dropped first.
///
/// Only a weak reference is held while sleeping, so that the timer never
/// keeps an otherwise unused token alive.
fn cancel_at(shared: Weak<Shared>, deadline: Instant) {
    loop {
        let token = match shared.upgrade() {
            None => return,
            Some(shared) => CancelToken { shared },
        };
        if token.is_canceled() {
            return;
        }
        let now = Instant::now();
        if now >= deadline {
            debug!("cancel token timed out");
            token.cancel();
            return;
        }
        drop(token);
        thread::sleep(cmp::min(deadline - now, TIMER_TICK));
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        // Hooks never run while the lock is held, so a poisoned lock still
        // guards consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("CancelToken")
            .field("canceled", &state.canceled)
            .field("hooks", &state.hooks.len())
            .finish()
    }
}

/// A hook registered on a [`CancelToken`]. The hook is removed when this is
/// dropped.
///
/// A registration keeps its token alive, so that a timeout keeps running for
/// as long as something is waiting on it.
pub(crate) struct Registration {
    /// `None` when the hook already ran at registration.
    shared: Option<Arc<Shared>>,
    id: u64,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let shared = match self.shared.take() {
            None => return,
            Some(shared) => shared,
        };
        // Move the hook out before dropping it, so that its destructor runs
        // without the token locked.
        let removed = {
            let mut state = shared.lock();
            let pos = state.hooks.iter().position(|&(id, _)| id == self.id);
            pos.map(|pos| state.hooks.swap_remove(pos))
        };
        drop(removed);
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Registration").field("id", &self.id).finish()
    }
}

use std::fmt;
use std::panic::Location;
use std::thread;

use tracing::{error, warn};

/// What happens when an [`XzWriter`](crate::XzWriter) is dropped without
/// being released by [`finish`](crate::XzWriter::finish).
///
/// Either way the compressor process is never leaked. The policies differ in
/// how loudly the mistake is reported.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LeakPolicy {
    /// Kill the compressor and panic with a message naming the place where
    /// the writer was created. The compressed output is discarded.
    ///
    /// This is the default. A forgotten `finish` is a programming error and
    /// should fail loudly during development.
    Panic,
    /// Release the writer as if `finish` had been called and log a warning
    /// naming the place where the writer was created. Any error from the
    /// release is logged and otherwise ignored, and the destination is
    /// dropped.
    Finish,
}

impl Default for LeakPolicy {
    fn default() -> LeakPolicy {
        LeakPolicy::Panic
    }
}

/// Reports writers that were never released.
///
/// The guard is armed on creation and remembers the caller's location. It
/// must be disarmed by a successful release; if it is still armed when it is
/// dropped, it reports the leak according to its policy.
pub(crate) struct LeakGuard {
    site: &'static Location<'static>,
    policy: LeakPolicy,
    armed: bool,
}

impl LeakGuard {
    /// Arm a new guard at the location of the (tracked) caller.
    #[track_caller]
    pub(crate) fn arm(policy: LeakPolicy) -> LeakGuard {
        LeakGuard { site: Location::caller(), policy, armed: true }
    }

    pub(crate) fn disarm(&mut self) {
        self.armed = false;
    }

    pub(crate) fn policy(&self) -> LeakPolicy {
        self.policy
    }

    pub(crate) fn site(&self) -> &'static Location<'static> {
        self.site
    }
}

impl Drop for LeakGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match self.policy {
            LeakPolicy::Finish => {
                warn!(site = %self.site, "xz writer dropped without finish");
            }
            LeakPolicy::Panic => {
                error!(site = %self.site, "xz writer leaked");
                // Panicking while already unwinding aborts the process and
                // hides the original panic.
                if !thread::panicking() {
                    panic!(
                        "xz writer created at {}, but never finished",
                        self.site
                    );
                }
            }
        }
    }
}

impl fmt::Debug for LeakGuard {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("LeakGuard")
            .field("site", &format_args!("{}", self.site))
            .field("policy", &self.policy)
            .field("armed", &self.armed)
            .finish()
    }
}

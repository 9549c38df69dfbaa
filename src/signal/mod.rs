//! Signal handling for graceful shutdown (SIGINT/SIGTERM)
//!
//! On the first signal:
//! 1. Executing workers stop after their in-flight job; the rest of their
//!    local queue is already persisted
//! 2. The coordinator saturates the idle counter at the next round
//! 3. Every worker observes the saturated counter and exits together
//!
//! On a second signal the process exits immediately with code 80.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use tracing::warn;

/// Exit code for runs stopped by a signal
pub const EXIT_CODE_CANCELLED: i32 = 80;

/// Stop request shared by every worker of the cohort
#[derive(Debug, Default)]
pub struct SignalState {
    /// First signal received
    stop_requested: AtomicBool,
    /// Number of signals received
    signal_count: AtomicU8,
}

impl SignalState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a stop has been requested
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Request a stop without a signal (tests, embedding programs)
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Get the number of signals received
    pub fn signal_count(&self) -> u8 {
        self.signal_count.load(Ordering::SeqCst)
    }

    /// Handle a signal (SIGINT/SIGTERM)
    pub fn handle_signal(&self) -> SignalAction {
        let count = self.signal_count.fetch_add(1, Ordering::SeqCst);

        match count {
            0 => {
                self.request_stop();
                SignalAction::RequestStop
            }
            1 => SignalAction::ImmediateExit,
            _ => SignalAction::Ignore,
        }
    }
}

/// Action to take after receiving a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: finish the in-flight jobs and stop the cohort
    RequestStop,
    /// Second signal: exit now
    ImmediateExit,
    /// Third+ signal: ignore
    Ignore,
}

/// Installs the process signal handler around a shared [`SignalState`]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    pub fn new() -> Self {
        Self::with_state(Arc::new(SignalState::new()))
    }

    pub fn with_state(state: Arc<SignalState>) -> Self {
        Self { state }
    }

    /// Get a reference to the signal state
    pub fn state(&self) -> Arc<SignalState> {
        Arc::clone(&self.state)
    }

    /// Install the handler for SIGINT and SIGTERM.
    ///
    /// Must be called at most once per process.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let state = Arc::clone(&self.state);
        ctrlc::set_handler(move || match state.handle_signal() {
            SignalAction::RequestStop => {
                warn!("received interrupt, stopping after in-flight jobs (interrupt again to exit now)");
            }
            SignalAction::ImmediateExit => {
                warn!("received second interrupt, exiting immediately");
                std::process::exit(EXIT_CODE_CANCELLED);
            }
            SignalAction::Ignore => {}
        })
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new()
    }
}

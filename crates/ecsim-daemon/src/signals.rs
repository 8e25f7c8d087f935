//! Signal handling for graceful shutdown.
//!
//! On unix, SIGINT and SIGTERM set an async-signal-safe static flag; a helper
//! thread polls it and forwards the request into the shared [`SignalState`]
//! that the daemon's main loop watches. Other platforms only support manual
//! shutdown.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

#[cfg(unix)]
const SIGNAL_POLL: Duration = Duration::from_millis(10);

#[cfg(unix)]
static TERMINATE_FLAG: AtomicBool = AtomicBool::new(false);
#[cfg(unix)]
static INTERRUPT_FLAG: AtomicBool = AtomicBool::new(false);

/// Signals that stop the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SignalKind {
    /// SIGTERM.
    Terminate = 1,
    /// SIGINT (Ctrl+C).
    Interrupt = 2,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Interrupt => write!(f, "SIGINT"),
        }
    }
}

/// Shutdown state shared between the poll thread and the main loop.
#[derive(Debug, Default)]
pub struct SignalState {
    shutdown_requested: AtomicBool,
    signal_count: AtomicU32,
    last_signal: AtomicU32,
}

impl SignalState {
    /// Create a state with no shutdown requested.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether shutdown has been requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::Relaxed)
    }

    /// Request shutdown from any thread.
    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::Relaxed);
    }

    fn record_signal(&self, kind: SignalKind) {
        self.signal_count.fetch_add(1, Ordering::Relaxed);
        self.last_signal.store(kind as u32, Ordering::Relaxed);
    }

    /// Number of signals received.
    pub fn signal_count(&self) -> u32 {
        self.signal_count.load(Ordering::Relaxed)
    }

    /// Most recent signal, if any.
    pub fn last_signal(&self) -> Option<SignalKind> {
        match self.last_signal.load(Ordering::Relaxed) {
            1 => Some(SignalKind::Terminate),
            2 => Some(SignalKind::Interrupt),
            _ => None,
        }
    }
}

/// Installed signal handlers plus the state they feed.
#[derive(Debug, Clone)]
pub struct SignalHandler {
    state: Arc<SignalState>,
}

impl SignalHandler {
    /// Register SIGINT/SIGTERM handlers and start the poll thread.
    ///
    /// On non-unix platforms only [`request_shutdown`](Self::request_shutdown)
    /// ends the daemon.
    ///
    /// # Errors
    ///
    /// Returns an error if the poll thread cannot be spawned.
    pub fn new() -> std::io::Result<Self> {
        let handler = Self {
            state: Arc::new(SignalState::new()),
        };
        #[cfg(unix)]
        handler.register()?;
        Ok(handler)
    }

    #[cfg(unix)]
    #[allow(unsafe_code)]
    fn register(&self) -> std::io::Result<()> {
        use std::os::raw::c_int;

        extern "C" fn on_terminate(_: c_int) {
            TERMINATE_FLAG.store(true, Ordering::Relaxed);
        }

        extern "C" fn on_interrupt(_: c_int) {
            INTERRUPT_FLAG.store(true, Ordering::Relaxed);
        }

        let state = Arc::clone(&self.state);
        std::thread::Builder::new()
            .name("ecsim-signals".into())
            .spawn(move || loop {
                if TERMINATE_FLAG.swap(false, Ordering::Relaxed) {
                    forward(&state, SignalKind::Terminate);
                }
                if INTERRUPT_FLAG.swap(false, Ordering::Relaxed) {
                    forward(&state, SignalKind::Interrupt);
                }
                if state.shutdown_requested() {
                    break;
                }
                std::thread::sleep(SIGNAL_POLL);
            })?;

        // SAFETY: the handlers only store to static atomics, which is
        // async-signal-safe.
        unsafe {
            libc::signal(libc::SIGTERM, on_terminate as libc::sighandler_t);
            libc::signal(libc::SIGINT, on_interrupt as libc::sighandler_t);
        }

        tracing::debug!("signal handlers registered");
        Ok(())
    }

    /// Whether shutdown has been requested.
    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.state.shutdown_requested()
    }

    /// Request shutdown without a signal.
    pub fn request_shutdown(&self) {
        info!("manual shutdown requested");
        self.state.request_shutdown();
    }

    /// The shared state.
    pub fn state(&self) -> &SignalState {
        &self.state
    }
}

#[cfg_attr(not(unix), allow(dead_code))]
fn forward(state: &SignalState, kind: SignalKind) {
    info!(signal = %kind, "shutdown signal received");
    state.record_signal(kind);
    state.request_shutdown();
}

/// Block until shutdown is requested, `keep_going` returns false, or `timeout`
/// expires. Returns `true` if shutdown was requested.
pub fn wait_for_shutdown(
    handler: &SignalHandler,
    timeout: Duration,
    mut keep_going: impl FnMut() -> bool,
) -> bool {
    let start = Instant::now();
    let poll = Duration::from_millis(50);
    while start.elapsed() < timeout {
        if handler.shutdown_requested() {
            return true;
        }
        if !keep_going() {
            return false;
        }
        std::thread::sleep(poll.min(timeout.saturating_sub(start.elapsed())));
    }
    handler.shutdown_requested()
}

//! Ctrl+C handling
//!
//! The first Ctrl+C sets the interrupt flag; the executor checks it between
//! transitions and pauses from the last checkpoint. A second Ctrl+C inside
//! the window exits at once, which is safe because every checkpoint write
//! is atomic.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::{Error, Result};

/// Exit code used for a forced exit (128 + SIGINT)
pub const FORCED_EXIT_CODE: i32 = 130;

/// What a Ctrl+C press should do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Press {
    /// Pause at the next transition
    Pause,
    /// Second press inside the window
    Exit,
}

/// Interrupt flag driven by SIGINT
#[derive(Clone)]
pub struct SignalHandler {
    interrupt: Arc<AtomicBool>,
    started: Instant,
    /// Millis since `started` of the last press, 0 = none yet
    last_press: Arc<AtomicU64>,
    window: Duration,
}

impl SignalHandler {
    /// Create a handler with a 2 second double-press window
    pub fn new(interrupt: Arc<AtomicBool>) -> Self {
        Self {
            interrupt,
            started: Instant::now(),
            last_press: Arc::new(AtomicU64::new(0)),
            window: Duration::from_secs(2),
        }
    }

    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Flag shared with the executor
    pub fn interrupt_flag(&self) -> Arc<AtomicBool> {
        self.interrupt.clone()
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    /// Record a press and decide what it means
    pub fn press(&self) -> Press {
        // +1 so the first press never reads as "no press yet"
        let now = self.started.elapsed().as_millis() as u64 + 1;
        let previous = self.last_press.swap(now, Ordering::SeqCst);

        if previous != 0 && now - previous <= self.window.as_millis() as u64 {
            Press::Exit
        } else {
            self.interrupt.store(true, Ordering::SeqCst);
            Press::Pause
        }
    }

    /// Install the process-wide Ctrl+C handler
    pub fn install(&self) -> Result<()> {
        let handler = self.clone();
        ctrlc::set_handler(move || match handler.press() {
            Press::Pause => {
                info!("Interrupted; pausing after the current step (Ctrl+C again to exit)")
            }
            Press::Exit => {
                warn!("Exiting; resume from the last checkpoint");
                std::process::exit(FORCED_EXIT_CODE);
            }
        })
        .map_err(|e| Error::Config(format!("Failed to set signal handler: {}", e)))
    }
}

impl Default for SignalHandler {
    fn default() -> Self {
        Self::new(Arc::new(AtomicBool::new(false)))
    }
}

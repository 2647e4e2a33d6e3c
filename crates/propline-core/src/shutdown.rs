//! Graceful shutdown via a shared atomic flag

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cancellation token polled between units. Clones share one flag.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if shutdown was requested
    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Wire SIGINT/SIGTERM to this token.
    ///
    /// The first signal requests a graceful stop; a second one exits
    /// immediately with status 130.
    pub fn install_signal_handlers(&self) -> std::io::Result<()> {
        use signal_hook::consts::TERM_SIGNALS;
        use signal_hook::flag;

        for sig in TERM_SIGNALS {
            // Registered first: fires only when the flag was already set by an earlier signal
            flag::register_conditional_shutdown(*sig, 130, Arc::clone(&self.flag))?;
            flag::register(*sig, Arc::clone(&self.flag))?;
        }
        Ok(())
    }
}

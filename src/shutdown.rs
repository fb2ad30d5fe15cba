//! Ctrl+C handling for long-running commands.
//!
//! The handler only sets a flag. Wait loops poll [`requested`] and stop
//! their child processes; a second interrupt exits immediately.

use std::sync::atomic::{AtomicUsize, Ordering};

/// How many times Ctrl+C was pressed.
static INTERRUPT_COUNT: AtomicUsize = AtomicUsize::new(0);

/// Register the Ctrl+C handler. Call once at startup.
pub fn register_handler() -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(|| {
        let count = INTERRUPT_COUNT.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= 2 {
            eprintln!("\nForce quit");
            std::process::exit(130); // Standard exit code for Ctrl+C
        }
        eprintln!("\nInterrupt received; stopping. Press Ctrl+C again to force quit.");
    })
}

/// Check if shutdown has been requested.
pub fn requested() -> bool {
    INTERRUPT_COUNT.load(Ordering::SeqCst) > 0
}

/// Request shutdown without a signal.
pub fn request() {
    INTERRUPT_COUNT.fetch_add(1, Ordering::SeqCst);
}


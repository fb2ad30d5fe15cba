//! Deadline racing for long external waits.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Result of racing an operation against a deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Timed<T> {
    Completed(T),
    TimedOut,
}

impl<T> Timed<T> {
    pub fn timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::TimedOut => None,
        }
    }
}

/// Run `op` on a worker thread and wait at most `timeout` for it.
///
/// On timeout the worker is detached, not killed; whatever it owns must be
/// safe to finish in the background. For child processes use a wait loop
/// that can kill the process instead.
///
/// # Examples
/// ```
/// use std::time::Duration;
/// use swarmflow::timeout::{run_with_timeout, Timed};
///
/// let fast = run_with_timeout(Duration::from_secs(5), || 2 + 2);
/// assert_eq!(fast, Timed::Completed(4));
/// ```
pub fn run_with_timeout<T, F>(timeout: Duration, op: F) -> Timed<T>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver is gone once the deadline passed.
        let _ = tx.send(op());
    });

    match rx.recv_timeout(timeout) {
        Ok(value) => Timed::Completed(value),
        Err(mpsc::RecvTimeoutError::Timeout) => Timed::TimedOut,
        // Worker panicked before sending.
        Err(mpsc::RecvTimeoutError::Disconnected) => Timed::TimedOut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completes_before_deadline() {
        let result = run_with_timeout(Duration::from_secs(5), || "done".to_string());
        assert_eq!(result.completed().as_deref(), Some("done"));
    }

    #[test]
    fn test_times_out() {
        let result = run_with_timeout(Duration::from_millis(20), || {
            thread::sleep(Duration::from_millis(500));
            1
        });
        assert!(result.timed_out());
    }
}

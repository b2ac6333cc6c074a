use std::time::Duration;
use tokio::runtime::Handle;

use crate::error::{Error, Result};

pub type TimeoutCallback = Box<dyn FnOnce() + Send + 'static>;

/// Runs callbacks after a minimum delay
///
/// There is no cancellation; callbacks re-check state when they fire.
pub trait TimeoutScheduler: Send + Sync {
    /// Invoke `callback` no earlier than `delay` from now, on any thread
    fn schedule(&self, delay: Duration, callback: TimeoutCallback);
}

/// Scheduler backed by tokio timers
///
/// Holds a runtime handle so it can be used from threads outside the runtime.
#[derive(Clone)]
pub struct TokioTimeoutScheduler {
    handle: Handle,
}

impl TokioTimeoutScheduler {
    #[must_use]
    pub const fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Use the runtime the caller is running on
    pub fn current() -> Result<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| Error::Configuration(format!("No tokio runtime for timeout scheduler: {e}")))
    }
}

impl TimeoutScheduler for TokioTimeoutScheduler {
    fn schedule(&self, delay: Duration, callback: TimeoutCallback) {
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            callback();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_callback_fires_after_delay() {
        let scheduler = TokioTimeoutScheduler::current().unwrap();
        let fired = Arc::new(AtomicBool::new(false));

        let flag = fired.clone();
        scheduler.schedule(
            Duration::from_secs(5),
            Box::new(move || flag.store(true, Ordering::SeqCst)),
        );

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!fired.load(Ordering::SeqCst));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_current_requires_runtime() {
        assert!(matches!(TokioTimeoutScheduler::current(), Err(Error::Configuration(_))));
    }
}

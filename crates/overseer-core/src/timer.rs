//! Cancellable fixed-interval background loop

use parking_lot::Mutex;
use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle to a background loop that runs `tick` every `interval`
///
/// A tick that overruns the interval delays the next one instead of
/// stacking. `stop` may be called any number of times.
pub struct PeriodicTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicTask {
    pub fn spawn<F, Fut>(name: &'static str, interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let child = cancel.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = tick() => {}
                }
            }
            debug!("{} loop ended", name);
        });

        Self {
            name,
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn stop(&self) {
        if self.handle.lock().take().is_some() {
            debug!("Stopping {} loop", self.name);
        }
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

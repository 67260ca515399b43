//! Output coalescing
//!
//! Raw writes are accumulated into a pending buffer. The first write after a
//! flush arms a single timer; when it fires the whole buffer is handed to the
//! sink at once. At most one emission happens per interval no matter how many
//! writes arrive in between.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Receives each coalesced batch
pub type FlushSink = Arc<dyn Fn(String) + Send + Sync>;

pub struct OutputBatcher {
    inner: Arc<BatcherInner>,
}

struct BatcherInner {
    interval: Duration,
    sink: FlushSink,
    runtime: Handle,
    state: Mutex<BatchState>,
}

#[derive(Default)]
struct BatchState {
    pending: String,
    timer: Option<JoinHandle<()>>,
    closed: bool,
}

impl OutputBatcher {
    /// Must be called from within a tokio runtime; timers are spawned on it
    /// even when `push` is called from a blocking reader thread.
    pub fn new(interval: Duration, sink: FlushSink) -> Self {
        Self {
            inner: Arc::new(BatcherInner {
                interval,
                sink,
                runtime: Handle::current(),
                state: Mutex::new(BatchState::default()),
            }),
        }
    }

    pub fn push(&self, data: &str) {
        if data.is_empty() {
            return;
        }

        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.pending.push_str(data);

        if state.timer.is_none() {
            let inner = Arc::clone(&self.inner);
            state.timer = Some(self.inner.runtime.spawn(async move {
                tokio::time::sleep(inner.interval).await;
                inner.flush_from_timer();
            }));
        }
    }

    /// Emit whatever is pending right now and disarm the timer
    pub fn flush(&self) {
        let data = {
            let mut state = self.inner.state.lock();
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            std::mem::take(&mut state.pending)
        };
        self.inner.emit(data);
    }

    /// Flush and refuse further output. Safe to call more than once.
    pub fn shutdown(&self) {
        let data = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            if let Some(timer) = state.timer.take() {
                timer.abort();
            }
            std::mem::take(&mut state.pending)
        };
        self.inner.emit(data);
    }

    pub fn pending_len(&self) -> usize {
        self.inner.state.lock().pending.len()
    }

    pub fn is_armed(&self) -> bool {
        self.inner.state.lock().timer.is_some()
    }
}

impl BatcherInner {
    fn flush_from_timer(&self) {
        let data = {
            let mut state = self.state.lock();
            state.timer = None;
            std::mem::take(&mut state.pending)
        };
        self.emit(data);
    }

    fn emit(&self, data: String) {
        if !data.is_empty() {
            (self.sink)(data);
        }
    }
}

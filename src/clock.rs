//! Clock
//!
//! Monotonic time plus scheduled timers, injectable so the reasoning loop and
//! the autonomous scan scheduler can be driven deterministically in tests.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::oneshot;
use tokio::time::Duration;

pub type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
pub type IntervalCallback = Arc<dyn Fn() -> BoxFuture + Send + Sync>;

/// A handle to a scheduled periodic timer. Dropping it without calling
/// `cancel` leaves the timer running; `cancel` is the explicit stop path used
/// by `AutonomousAgent::stop`.
pub struct IntervalHandle {
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl IntervalHandle {
    pub fn cancel(mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
    }
}

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;

    /// Schedule `callback` to run every `period_ms`, returning a handle that
    /// cancels future firings. The in-flight firing (if any) is not aborted.
    fn set_interval(&self, period_ms: u64, callback: IntervalCallback) -> IntervalHandle;
}

/// Wall-clock implementation backed by `tokio::time`.
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }

    fn set_interval(&self, period_ms: u64, callback: IntervalCallback) -> IntervalHandle {
        let (cancel_tx, mut cancel_rx) = oneshot::channel();
        let period = Duration::from_millis(period_ms.max(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        callback().await;
                    }
                    _ = &mut cancel_rx => {
                        break;
                    }
                }
            }
        });

        IntervalHandle {
            cancel_tx: Some(cancel_tx),
        }
    }
}

struct MockInterval {
    callback: IntervalCallback,
    cancelled: Arc<std::sync::atomic::AtomicBool>,
}

/// Test clock: time is advanced explicitly and `set_interval` never fires on
/// its own — tests call `fire_intervals()` to drive scheduled work
/// deterministically without real sleeps.
pub struct MockClock {
    now: AtomicI64,
    intervals: std::sync::Mutex<Vec<MockInterval>>,
}

impl MockClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now: AtomicI64::new(start_ms),
            intervals: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn advance(&self, ms: i64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    /// Runs every still-registered, non-cancelled interval callback once.
    pub async fn fire_intervals(&self) {
        let callbacks: Vec<IntervalCallback> = {
            let intervals = self.intervals.lock().unwrap();
            intervals
                .iter()
                .filter(|i| !i.cancelled.load(Ordering::SeqCst))
                .map(|i| i.callback.clone())
                .collect()
        };
        for cb in callbacks {
            cb().await;
        }
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    fn set_interval(&self, _period_ms: u64, callback: IntervalCallback) -> IntervalHandle {
        let cancelled = Arc::new(std::sync::atomic::AtomicBool::new(false));
        {
            let mut intervals = self.intervals.lock().unwrap();
            intervals.push(MockInterval {
                callback,
                cancelled: cancelled.clone(),
            });
        }

        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            if cancel_rx.await.is_ok() {
                cancelled.store(true, Ordering::SeqCst);
            }
        });

        IntervalHandle {
            cancel_tx: Some(cancel_tx),
        }
    }
}

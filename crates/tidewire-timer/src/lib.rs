//! Cancelable one-shot countdown timers for tidewire.
//!
//! A [`CountdownTimer`] fires a callback once after a delay unless it is
//! aborted first. Connection states use one to bound how long they wait
//! (connect timeout, retry delay, close timeout).
//!
//! # Abort/fire race
//!
//! Every arming gets its own claim flag. The countdown task and
//! [`CountdownTimer::abort`] both try to move that flag out of the armed
//! state with a compare-exchange, and only one of them can win:
//!
//! - abort wins → the callback is never invoked (fire-after-abort is suppressed)
//! - fire wins  → abort becomes a no-op (abort-after-fire)
//!
//! Each arming also carries a [`TimerToken`]. Owners that marshal the
//! callback onto another queue compare the token against the timer they
//! currently hold, which closes the window between "claimed" and
//! "processed".
//!
//! # Integration
//!
//! The callback should only enqueue work, never mutate shared state:
//!
//! ```ignore
//! let tx = events_tx.clone();
//! timer.start(Duration::from_millis(1000), move |token| {
//!     let _ = tx.send(Event::TimerElapsed(token));
//! });
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, trace};

const ARMED: u8 = 0;
const FIRED: u8 = 1;
const ABORTED: u8 = 2;

/// Source of unique tokens across every timer in the process.
static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// TimerToken
// ---------------------------------------------------------------------------

/// Identifies one arming of a [`CountdownTimer`].
///
/// Tokens are unique for the lifetime of the process, so a stale token can
/// never be mistaken for the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

impl TimerToken {
    /// Returns the raw token value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TimerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// CountdownTimer
// ---------------------------------------------------------------------------

struct Armed {
    token: TimerToken,
    claim: Arc<AtomicU8>,
    deadline: Instant,
    task: JoinHandle<()>,
}

/// A one-shot delay that invokes a callback unless aborted first.
///
/// Starting an armed timer aborts the previous arming. Dropping the timer
/// aborts it too, so a timer can never outlive its owner.
pub struct CountdownTimer {
    name: String,
    armed: Option<Armed>,
}

impl CountdownTimer {
    /// Creates an idle timer. `name` only shows up in logs.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            armed: None,
        }
    }

    /// Arms the timer. `on_fire` runs on a tokio task once `delay` has
    /// elapsed, receiving the token returned here.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start<F>(&mut self, delay: Duration, on_fire: F) -> TimerToken
    where
        F: FnOnce(TimerToken) + Send + 'static,
    {
        self.abort();

        let token = TimerToken(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed));
        let claim = Arc::new(AtomicU8::new(ARMED));
        let deadline = Instant::now() + delay;

        let task_claim = Arc::clone(&claim);
        let name = self.name.clone();
        let task = tokio::spawn(async move {
            time::sleep_until(deadline).await;
            if task_claim
                .compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                trace!(timer = %name, %token, "timer fired");
                on_fire(token);
            }
        });

        debug!(
            timer = %self.name,
            %token,
            delay_ms = delay.as_millis() as u64,
            "timer started"
        );

        self.armed = Some(Armed {
            token,
            claim,
            deadline,
            task,
        });
        token
    }

    /// Cancels the pending countdown. A no-op when idle or already fired.
    pub fn abort(&mut self) {
        let Some(armed) = self.armed.take() else {
            return;
        };
        if armed
            .claim
            .compare_exchange(ARMED, ABORTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            armed.task.abort();
            debug!(timer = %self.name, token = %armed.token, "timer aborted");
        }
    }

    /// Whether a countdown is pending (armed and neither fired nor aborted).
    pub fn is_running(&self) -> bool {
        self.armed
            .as_ref()
            .is_some_and(|a| a.claim.load(Ordering::Acquire) == ARMED)
    }

    /// Token of the current arming, if any.
    pub fn token(&self) -> Option<TimerToken> {
        self.armed.as_ref().map(|a| a.token)
    }

    /// Time left before the pending countdown fires.
    pub fn remaining(&self) -> Option<Duration> {
        self.armed
            .as_ref()
            .filter(|a| a.claim.load(Ordering::Acquire) == ARMED)
            .map(|a| a.deadline.saturating_duration_since(Instant::now()))
    }

    /// The name given at construction.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for CountdownTimer {
    fn drop(&mut self) {
        self.abort();
    }
}

impl fmt::Debug for CountdownTimer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CountdownTimer")
            .field("name", &self.name)
            .field("token", &self.token())
            .field("running", &self.is_running())
            .finish()
    }
}

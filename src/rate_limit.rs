//! Rate shaping for outbound writes: debounce and throttle.
//!
//! DESIGN
//! ======
//! Each shaper is an explicit object that owns its timer task, created per
//! logical channel (one shape's drag, one field's edits) by the session.
//! - `Debouncer`: fires once, with the last value, after `delay` of quiet.
//! - `Throttler`: fires the first value at once, then at most one value per
//!   `interval`; the last value offered during a window always fires when the
//!   window closes, and that trailing fire opens a new window.
//!
//! Values are handed to a sink outside any lock. Timer tasks check a
//! generation counter before firing, so a value superseded or disposed while
//! its timer was waking is never delivered.
//!
//! Shapers spawn Tokio tasks and must be driven from inside a runtime.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;

/// Receiver of values released by a shaper.
pub type Sink<T> = Arc<dyn Fn(T) + Send + Sync>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// DEBOUNCE
// =============================================================================

struct DebounceInner<T> {
    pending: Option<T>,
    timer: Option<JoinHandle<()>>,
    generation: u64,
}

pub struct Debouncer<T> {
    inner: Arc<Mutex<DebounceInner<T>>>,
    delay: Duration,
    sink: Sink<T>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new(delay: Duration, sink: Sink<T>) -> Self {
        Self { inner: Arc::new(Mutex::new(DebounceInner { pending: None, timer: None, generation: 0 })), delay, sink }
    }

    /// Replace the pending value and restart the quiet period.
    pub fn call(&self, value: T) {
        let mut inner = lock(&self.inner);
        inner.generation += 1;
        inner.pending = Some(value);
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }

        let generation = inner.generation;
        let shared = Arc::clone(&self.inner);
        let sink = Arc::clone(&self.sink);
        let delay = self.delay;
        inner.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let value = {
                let mut inner = lock(&shared);
                if inner.generation != generation {
                    return;
                }
                inner.timer = None;
                inner.pending.take()
            };
            if let Some(value) = value {
                sink(value);
            }
        }));
    }

    /// Fire the pending value now. Returns whether anything was pending.
    pub fn flush(&self) -> bool {
        let value = {
            let mut inner = lock(&self.inner);
            inner.generation += 1;
            if let Some(timer) = inner.timer.take() {
                timer.abort();
            }
            inner.pending.take()
        };
        let fired = value.is_some();
        if let Some(value) = value {
            (self.sink)(value);
        }
        fired
    }

    /// Drop the pending value without firing it.
    pub fn dispose(&self) {
        let mut inner = lock(&self.inner);
        inner.generation += 1;
        inner.pending = None;
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        lock(&self.inner).pending.is_some()
    }
}

impl<T> Drop for Debouncer<T> {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.inner).timer.take() {
            timer.abort();
        }
    }
}

// =============================================================================
// THROTTLE
// =============================================================================

struct ThrottleInner<T> {
    window_open: bool,
    trailing: Option<T>,
    timer: Option<JoinHandle<()>>,
    generation: u64,
}

pub struct Throttler<T> {
    inner: Arc<Mutex<ThrottleInner<T>>>,
    interval: Duration,
    sink: Sink<T>,
}

impl<T: Send + 'static> Throttler<T> {
    pub fn new(interval: Duration, sink: Sink<T>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ThrottleInner {
                window_open: false,
                trailing: None,
                timer: None,
                generation: 0,
            })),
            interval,
            sink,
        }
    }

    /// Fire now if no window is open, otherwise hold as the trailing value.
    pub fn call(&self, value: T) {
        {
            let mut inner = lock(&self.inner);
            if inner.window_open {
                inner.trailing = Some(value);
                return;
            }
            inner.window_open = true;
            inner.generation += 1;
            let generation = inner.generation;
            inner.timer = Some(self.spawn_window(generation));
        }
        (self.sink)(value);
    }

    fn spawn_window(&self, generation: u64) -> JoinHandle<()> {
        let shared = Arc::clone(&self.inner);
        let sink = Arc::clone(&self.sink);
        let interval = self.interval;
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let next = {
                    let mut inner = lock(&shared);
                    if inner.generation != generation {
                        return;
                    }
                    let next = inner.trailing.take();
                    if next.is_none() {
                        inner.window_open = false;
                        inner.timer = None;
                    }
                    next
                };
                // A trailing fire keeps the window open for another interval.
                match next {
                    Some(value) => sink(value),
                    None => return,
                }
            }
        })
    }

    /// Fire the trailing value now and close the window.
    pub fn flush(&self) -> bool {
        let value = {
            let mut inner = lock(&self.inner);
            inner.generation += 1;
            inner.window_open = false;
            if let Some(timer) = inner.timer.take() {
                timer.abort();
            }
            inner.trailing.take()
        };
        let fired = value.is_some();
        if let Some(value) = value {
            (self.sink)(value);
        }
        fired
    }

    /// Drop the trailing value and close the window without firing.
    pub fn dispose(&self) {
        let mut inner = lock(&self.inner);
        inner.generation += 1;
        inner.window_open = false;
        inner.trailing = None;
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        lock(&self.inner).trailing.is_some()
    }
}

impl<T> Drop for Throttler<T> {
    fn drop(&mut self) {
        if let Some(timer) = lock(&self.inner).timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
#[path = "rate_limit_test.rs"]
mod tests;

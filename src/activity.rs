use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;

use crate::cancel::CancelToken;
use crate::led::Indicator;

#[derive(Default)]
struct Counter {
    active: u32,
    pending_stop: Option<CancelToken>,
}

/// Counts running motors across all devices and sequences the indicator on
/// the 0 → 1 and 1 → 0 transitions.
pub struct ActivityAggregator {
    counter: Mutex<Counter>,
    indicator: Arc<Indicator>,
}

impl ActivityAggregator {
    pub fn new(indicator: Indicator) -> Self {
        ActivityAggregator {
            counter: Mutex::new(Counter::default()),
            indicator: Arc::new(indicator),
        }
    }

    fn counter(&self) -> MutexGuard<'_, Counter> {
        self.counter.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn active(&self) -> u32 {
        self.counter().active
    }

    /// Record a motor starting. The first one runs the start sequence before
    /// returning, holding the counter lock throughout.
    pub fn start(&self) {
        let mut counter = self.counter();
        if let Some(pending) = counter.pending_stop.take() {
            pending.cancel();
        }
        counter.active += 1;
        if counter.active == 1 {
            self.indicator.start_sequence();
        }
    }

    /// Record a motor finishing. The last one schedules the stop sequence
    /// after the debounce delay.
    pub fn finish(&self) {
        let mut counter = self.counter();
        counter.active = counter.active.saturating_sub(1);
        if counter.active > 0 {
            return;
        }
        if let Some(previous) = counter.pending_stop.take() {
            previous.cancel();
        }
        let abort = CancelToken::new();
        let indicator = Arc::clone(&self.indicator);
        let timer = abort.clone();
        let spawned = thread::Builder::new()
            .name("led-stop".to_string())
            .spawn(move || {
                if !timer.wait_timeout(indicator.debounce()) {
                    indicator.stop_sequence(&timer);
                }
            });
        match spawned {
            Ok(_) => counter.pending_stop = Some(abort),
            Err(err) => log::error!("unable to schedule LED stop sequence: {}", err),
        }
    }

    /// Pair a `start` with a `finish` that runs when the guard drops.
    pub fn begin(self: &Arc<Self>) -> ActivityGuard {
        self.start();
        ActivityGuard {
            aggregator: Arc::clone(self),
        }
    }
}

#[must_use = "the motor is counted as finished when the guard drops"]
pub struct ActivityGuard {
    aggregator: Arc<ActivityAggregator>,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.aggregator.finish();
    }
}

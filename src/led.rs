use std::sync::{Arc, Mutex};

use crate::cancel::CancelToken;
use crate::config::IndicatorTiming;
use crate::events::EventSink;
use crate::output::OutputDriver;

/// Plays the shared indicator's start and stop patterns.
pub struct Indicator {
    driver: Arc<dyn OutputDriver>,
    pin: u8,
    timing: IndicatorTiming,
    events: Arc<dyn EventSink>,
    // Held across every write so a stop pattern can check its abort signal
    // and write without a start sequence landing in between.
    line: Mutex<()>,
}

impl Indicator {
    pub fn new(
        driver: Arc<dyn OutputDriver>,
        pin: u8,
        timing: IndicatorTiming,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Indicator {
            driver,
            pin,
            timing,
            events,
            line: Mutex::new(()),
        }
    }

    pub fn debounce(&self) -> std::time::Duration {
        self.timing.debounce
    }

    /// Rapid flashes, leaving the indicator on.
    pub fn start_sequence(&self) {
        for _ in 0..self.timing.flashes {
            std::thread::sleep(self.timing.flash);
            self.set(false);
            std::thread::sleep(self.timing.flash);
            self.set(true);
        }
        self.set(true);
        self.events
            .log("Global LED start sequence completed; LED is now ON.".to_string());
    }

    /// Slow blinks, leaving the indicator off. Abandoned without touching the
    /// line again once `abort` fires, since a start sequence owns it then.
    pub fn stop_sequence(&self, abort: &CancelToken) {
        for _ in 0..self.timing.blinks {
            if !self.set_unless(abort, false) || abort.wait_timeout(self.timing.blink) {
                return;
            }
            if !self.set_unless(abort, true) || abort.wait_timeout(self.timing.blink) {
                return;
            }
        }
        if !self.set_unless(abort, false) {
            return;
        }
        self.events
            .log("Global LED stop sequence completed; LED is now OFF.".to_string());
    }

    fn set(&self, on: bool) {
        let _line = self.line.lock().unwrap_or_else(|e| e.into_inner());
        self.write(on);
    }

    /// Write `on` unless `abort` has fired. Returns whether it wrote.
    fn set_unless(&self, abort: &CancelToken, on: bool) -> bool {
        let _line = self.line.lock().unwrap_or_else(|e| e.into_inner());
        if abort.is_cancelled() {
            return false;
        }
        self.write(on);
        true
    }

    fn write(&self, on: bool) {
        if let Err(err) = self.driver.set_output(self.pin, on) {
            log::error!("indicator pin {}: {}", self.pin, err);
        }
    }
}

//! Background temperature and humidity logging, independent of the
//! automatic loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::MonitorTiming;
use crate::events::EventSink;
use crate::sensor::TemperatureSensor;

const TICK: Duration = Duration::from_millis(100);

pub struct SensorMonitor {
    sensor: Arc<dyn TemperatureSensor>,
    events: Arc<dyn EventSink>,
    timing: MonitorTiming,
}

impl SensorMonitor {
    pub fn new(
        sensor: Arc<dyn TemperatureSensor>,
        events: Arc<dyn EventSink>,
        timing: MonitorTiming,
    ) -> Self {
        SensorMonitor {
            sensor,
            events,
            timing,
        }
    }

    /// Poll the sensor until `term` is set.
    pub fn run(&self, term: &AtomicBool) {
        self.events
            .log("Starting continuous sensor monitoring...".to_string());
        let mut failures = 0;
        while !term.load(Ordering::Relaxed) {
            let delay = self.poll(&mut failures);
            pause(term, delay);
        }
        self.events
            .log("Sensor monitoring thread stopped".to_string());
    }

    /// Take one reading and return how long to wait before the next.
    fn poll(&self, failures: &mut u32) -> Duration {
        match self.sensor.read() {
            Ok(reading) => {
                *failures = 0;
                self.events.log(format!(
                    "Temperature: {:.1} °F, Humidity: {:.1}%",
                    reading.temperature, reading.humidity
                ));
                self.timing.interval
            }
            Err(err) => {
                log::warn!("sensor monitoring: {}", err);
                *failures += 1;
                if *failures > self.timing.max_retries {
                    self.events.log(format!(
                        "Exceeded maximum retries ({}). Waiting longer before next attempt.",
                        self.timing.max_retries
                    ));
                    *failures = 0;
                    self.timing.backoff * 2
                } else {
                    self.timing.backoff
                }
            }
        }
    }
}

/// Sleep for `duration`, returning early once `term` is set.
fn pause(term: &AtomicBool, duration: Duration) {
    let deadline = Instant::now() + duration;
    while !term.load(Ordering::Relaxed) {
        let left = deadline.saturating_duration_since(Instant::now());
        if left.is_zero() {
            return;
        }
        thread::sleep(left.min(TICK));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SensorError;
    use crate::events::LogSink;
    use crate::sensor::Reading;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct Replay(Mutex<VecDeque<Option<f64>>>);

    impl TemperatureSensor for Replay {
        fn read(&self) -> Result<Reading, SensorError> {
            match self.0.lock().unwrap().pop_front().flatten() {
                Some(temperature) => Ok(Reading {
                    temperature,
                    humidity: 40.0,
                }),
                None => Err(SensorError::NoResponse("timed out".to_string())),
            }
        }
    }

    fn monitor(script: Vec<Option<f64>>) -> SensorMonitor {
        SensorMonitor::new(
            Arc::new(Replay(Mutex::new(script.into()))),
            Arc::new(LogSink),
            MonitorTiming::default(),
        )
    }

    #[test]
    fn backs_off_and_doubles_after_retries() {
        let monitor = monitor(vec![None, None, None, None, None, Some(70.0)]);
        let mut failures = 0;
        let delays: Vec<_> = (0..6).map(|_| monitor.poll(&mut failures)).collect();
        let secs = |s| Duration::from_secs(s);
        assert_eq!(delays, [secs(5), secs(5), secs(5), secs(10), secs(5), secs(3)]);
        assert_eq!(failures, 0);
    }

    #[test]
    fn success_resets_failures() {
        let monitor = monitor(vec![None, None, Some(70.0), None]);
        let mut failures = 0;
        monitor.poll(&mut failures);
        monitor.poll(&mut failures);
        assert_eq!(failures, 2);
        monitor.poll(&mut failures);
        assert_eq!(failures, 0);
        monitor.poll(&mut failures);
        assert_eq!(failures, 1);
    }

    #[test]
    fn pause_returns_once_terminated() {
        let term = AtomicBool::new(true);
        let started = Instant::now();
        pause(&term, Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}

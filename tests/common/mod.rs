//! Recording doubles for the controller's ports.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use vent_control::automation::{Thresholds, Throttle};
use vent_control::config::{AutoPolicy, IndicatorTiming};
use vent_control::error::{OutputError, SensorError, StoreError};
use vent_control::events::EventSink;
use vent_control::output::{OutputDriver, SimulatedDriver};
use vent_control::sensor::{Reading, TemperatureSensor};
use vent_control::status::{MemoryStore, StatusStore};
use vent_control::{Config, Controller, Device, Outputs, Status};

pub const SHUTTER_OPEN: u8 = 4;
pub const SHUTTER_CLOSE: u8 = 17;
pub const SIDEWALL_OPEN: u8 = 27;
pub const SIDEWALL_CLOSE: u8 = 22;

// ── Event sink ────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.events().iter().filter(|e| e.contains(needle)).count()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.count(needle) > 0
    }
}

impl EventSink for RecordingSink {
    fn log(&self, message: String) {
        self.events.lock().unwrap().push(message);
    }
}

// ── Sensor ────────────────────────────────────────────────────

/// Plays back readings in order, then repeats `then` forever.
pub struct ScriptedSensor {
    script: Mutex<VecDeque<Option<f64>>>,
    then: Option<f64>,
    reads: AtomicUsize,
}

impl ScriptedSensor {
    pub fn new(script: Vec<Option<f64>>, then: Option<f64>) -> Self {
        ScriptedSensor {
            script: Mutex::new(script.into()),
            then,
            reads: AtomicUsize::new(0),
        }
    }

    pub fn steady(temperature: f64) -> Self {
        ScriptedSensor::new(Vec::new(), Some(temperature))
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

pub const HUMIDITY: f64 = 48.5;

impl TemperatureSensor for ScriptedSensor {
    fn read(&self) -> Result<Reading, SensorError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front().unwrap_or(self.then);
        next.map(|temperature| Reading {
            temperature,
            humidity: HUMIDITY,
        })
        .ok_or_else(|| SensorError::NoResponse("scripted failure".to_string()))
    }
}

// ── Outputs ───────────────────────────────────────────────────

/// Refuses every write.
pub struct FailingDriver;

impl OutputDriver for FailingDriver {
    fn set_output(&self, pin: u8, _high: bool) -> Result<(), OutputError> {
        Err(OutputError::UnknownPin(pin))
    }
}

// ── Store ─────────────────────────────────────────────────────

/// A store the test keeps a handle to after the controller takes ownership.
#[derive(Clone)]
pub struct SharedStore(pub Arc<MemoryStore>);

impl StatusStore for SharedStore {
    fn get_status(&self, device: Device) -> Result<Status, StoreError> {
        self.0.get_status(device)
    }

    fn set_status(&self, device: Device, status: Status) -> Result<(), StoreError> {
        self.0.set_status(device, status)
    }
}

// ── Harness ───────────────────────────────────────────────────

pub fn fast_config() -> Config {
    let mut config = Config::default();
    config.shutter.runtime = Duration::from_millis(150);
    config.sidewall.runtime = Duration::from_millis(150);
    config.indicator = IndicatorTiming {
        flash: Duration::from_millis(1),
        flashes: 2,
        blink: Duration::from_millis(2),
        blinks: 2,
        debounce: Duration::from_millis(20),
    };
    config.check_interval = Duration::from_millis(50);
    config.dispatch_poll = Duration::from_millis(30);
    config.sensor_backoff = Duration::from_millis(30);
    let policy = AutoPolicy {
        thresholds: Thresholds::new(75.0, 70.0),
        throttle: Throttle::none(),
    };
    config.per_device = [policy, policy];
    config.dispatcher = [policy, policy];
    config
}

pub struct Harness {
    pub controller: Controller,
    pub motors: Arc<SimulatedDriver>,
    pub events: Arc<RecordingSink>,
    pub sensor: Arc<ScriptedSensor>,
    pub store: SharedStore,
}

impl Harness {
    pub fn new(config: Config, initial: Status, sensor: ScriptedSensor) -> Self {
        let motors = Arc::new(SimulatedDriver::new());
        Harness::with_motors(config, initial, sensor, motors.clone(), motors)
    }

    pub fn with_motors(
        config: Config,
        initial: Status,
        sensor: ScriptedSensor,
        driver: Arc<dyn OutputDriver>,
        motors: Arc<SimulatedDriver>,
    ) -> Self {
        let events = Arc::new(RecordingSink::default());
        let sensor = Arc::new(sensor);
        let store = SharedStore(Arc::new(MemoryStore::new(initial)));
        let outputs = Outputs {
            motors: driver,
            indicator: Arc::new(SimulatedDriver::new()),
            simulated: true,
        };
        let controller = Controller::new(
            config,
            outputs,
            Box::new(store.clone()),
            sensor.clone(),
            events.clone(),
        );
        Harness {
            controller,
            motors,
            events,
            sensor,
            store,
        }
    }

    /// Pins that have been driven high, in order.
    pub fn pulses(&self) -> Vec<u8> {
        self.motors
            .history()
            .into_iter()
            .filter(|&(_, high)| high)
            .map(|(pin, _)| pin)
            .collect()
    }

    pub fn set_status(&self, device: Device, status: Status) {
        self.store.set_status(device, status).unwrap();
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.controller.shutdown();
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub const PATIENCE: Duration = Duration::from_secs(3);

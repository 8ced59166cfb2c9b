//! Temperature-driven control.
//!
//! Both drivers share [`Thresholds`], [`Throttle`] and the same per-device
//! step. The per-device driver runs one thread per device in automatic mode
//! and polls on the check interval. The dispatcher polls the sensor once per
//! cycle for both devices. Either way a device is only driven while its
//! persisted status is `automatic`, so manual commands always win.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::actuator::Outcome;
use crate::cancel::CancelToken;
use crate::config::AutoPolicy;
use crate::controller::Shared;
use crate::device::{Action, Device, Status};
use crate::error::Error;
use crate::registry::Origin;

/// Open above `open_above`, close below `close_below`, hold in between.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Thresholds {
    pub open_above: f64,
    pub close_below: f64,
}

impl Thresholds {
    /// `open_above` must exceed `close_below`; the gap is the dead band.
    pub const fn new(open_above: f64, close_below: f64) -> Self {
        Thresholds {
            open_above,
            close_below,
        }
    }

    pub fn decide(&self, temperature: f64) -> Option<Action> {
        if temperature > self.open_above {
            Some(Action::Open)
        } else if temperature < self.close_below {
            Some(Action::Close)
        } else {
            None
        }
    }
}

/// Minimum time between two automatic actions on the same device.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Throttle {
    pub min_idle: Duration,
}

impl Throttle {
    pub const fn none() -> Self {
        Throttle {
            min_idle: Duration::ZERO,
        }
    }

    pub const fn idle(min_idle: Duration) -> Self {
        Throttle { min_idle }
    }

    pub fn ready(&self, last_action: Option<Instant>, now: Instant) -> bool {
        match last_action {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.min_idle,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Step {
    Continue,
    /// The device was taken over by someone else.
    Yielded,
}

/// Stop signals of the running automatic loops.
#[derive(Default)]
pub struct Automation {
    loops: Mutex<HashMap<Device, CancelToken>>,
    dispatcher: Mutex<Option<CancelToken>>,
}

impl Automation {
    pub fn new() -> Self {
        Automation::default()
    }

    fn loops(&self) -> MutexGuard<'_, HashMap<Device, CancelToken>> {
        self.loops.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Start a per-device loop, retiring any loop already driving `device`.
    pub(crate) fn enter(&self, shared: &Arc<Shared>, device: Device) -> Result<(), Error> {
        let mut loops = self.loops();
        if let Some(previous) = loops.remove(&device) {
            previous.cancel();
        }
        let stop = CancelToken::new();
        let thread_stop = stop.clone();
        let thread_shared = Arc::clone(shared);
        thread::Builder::new()
            .name(format!("auto-{}", device.key().to_lowercase()))
            .spawn(move || run_device_loop(&thread_shared, device, &thread_stop))
            .map_err(Error::Spawn)?;
        loops.insert(device, stop);
        shared
            .events
            .log(format!("Automatic control started for {}", device));
        Ok(())
    }

    /// Signal the loop driving `device` to stop. Does not wait for it.
    pub(crate) fn leave(&self, device: Device) -> bool {
        match self.loops().remove(&device) {
            Some(stop) => {
                stop.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, device: Device) -> bool {
        self.loops().contains_key(&device)
    }

    /// Forget `stop` if it is still the loop registered for `device`.
    fn retire(&self, device: Device, stop: &CancelToken) {
        let mut loops = self.loops();
        if loops.get(&device).map_or(false, |s| s.same_as(stop)) {
            loops.remove(&device);
        }
    }

    pub(crate) fn start_dispatcher(&self, shared: &Arc<Shared>) -> Result<(), Error> {
        let mut dispatcher = self.dispatcher.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = dispatcher.take() {
            previous.cancel();
        }
        let stop = CancelToken::new();
        let thread_stop = stop.clone();
        let thread_shared = Arc::clone(shared);
        thread::Builder::new()
            .name("dispatcher".to_string())
            .spawn(move || run_dispatcher(&thread_shared, &thread_stop))
            .map_err(Error::Spawn)?;
        *dispatcher = Some(stop);
        Ok(())
    }

    pub fn stop_all(&self) {
        for (_, stop) in self.loops().drain() {
            stop.cancel();
        }
        if let Some(stop) = self.dispatcher.lock().unwrap_or_else(|e| e.into_inner()).take() {
            stop.cancel();
        }
    }
}

fn run_device_loop(shared: &Arc<Shared>, device: Device, stop: &CancelToken) {
    let events = &shared.events;
    let policy = *shared.config.policy(device);
    let mut last_action = None;
    events.log(format!("Starting automatic control for {}", device));

    while !stop.is_cancelled() && !shared.is_shutting_down() {
        if shared.status.get(device) != Status::Automatic {
            events.log(format!(
                "Automatic control stopped: {} is no longer in automatic mode",
                device
            ));
            break;
        }
        match shared.sensor.read_temperature() {
            Ok(temperature) => {
                events.log(format!("Current temperature: {:.2} °F", temperature));
                if step(shared, device, &policy, temperature, &mut last_action, stop)
                    == Step::Yielded
                {
                    break;
                }
            }
            Err(err) => events.log(format!(
                "Error reading temperature for {}: {}",
                device, err
            )),
        }
        if stop.wait_timeout(shared.config.check_interval) {
            break;
        }
    }

    shared.automation.retire(device, stop);
    events.log(format!("Automatic control thread for {} is exiting", device));
}

fn run_dispatcher(shared: &Arc<Shared>, stop: &CancelToken) {
    let events = &shared.events;
    let mut last_action: [Option<Instant>; 2] = [None; 2];
    events.log("Automation dispatcher started".to_string());

    while !stop.is_cancelled() && !shared.is_shutting_down() {
        let temperature = match shared.sensor.read_temperature() {
            Ok(temperature) => temperature,
            Err(err) => {
                events.log(format!("[ERROR] Failed to read sensor data: {}", err));
                if stop.wait_timeout(shared.config.sensor_backoff) {
                    break;
                }
                continue;
            }
        };
        events.log(format!("Current temperature: {:.2} °F", temperature));

        for device in Device::ALL {
            if stop.is_cancelled() {
                break;
            }
            if shared.status.get(device) != Status::Automatic {
                continue;
            }
            let policy = *shared.config.policy(device);
            step(
                shared,
                device,
                &policy,
                temperature,
                &mut last_action[device.index()],
                stop,
            );
        }

        if stop.wait_timeout(shared.config.dispatch_poll) {
            break;
        }
    }
    events.log("Automation dispatcher exiting".to_string());
}

/// Evaluate `device` at `temperature` and, if a threshold is crossed and the
/// throttle allows it, run one pulse to completion.
fn step(
    shared: &Arc<Shared>,
    device: Device,
    policy: &AutoPolicy,
    temperature: f64,
    last_action: &mut Option<Instant>,
    stop: &CancelToken,
) -> Step {
    let events = &shared.events;
    let action = match policy.thresholds.decide(temperature) {
        Some(action) => action,
        None => {
            events.log(format!(
                "Automatic mode: Temperature {:.2} °F is within range - No action needed for {}",
                temperature, device
            ));
            return Step::Continue;
        }
    };

    let now = Instant::now();
    if !policy.throttle.ready(*last_action, now) {
        log::debug!("{}: idle time not elapsed, holding {}", device, action);
        return Step::Continue;
    }

    events.log(format!(
        "Automatic control: Temperature {:.2} °F - Initiating {} for {}",
        temperature, action, device
    ));
    let handle = match shared.spawn_operation(device, action, Origin::Automatic) {
        Ok((handle, _)) => handle,
        Err(err) => {
            events.log(format!("[ERROR] Automatic {} for {} failed: {}", action, device, err));
            return Step::Continue;
        }
    };
    *last_action = Some(now);

    // A panicked pulse thread counts as a failed pulse.
    let outcome = handle.join().unwrap_or(Outcome::Failed);
    if outcome == Outcome::Cancelled {
        events.log(format!("Automatic {} for {} was superseded", action, device));
        return Step::Yielded;
    }
    if outcome == Outcome::Failed {
        events.log(format!(
            "Automatic {} for {} failed; retrying at the next check",
            action, device
        ));
    }

    // Completed or failed: hand the device back to automatic control. Done
    // under the registry lock so a manual command cannot slip in between the
    // check and the write.
    let mut reaffirmed = false;
    shared.registry.while_idle(device, || {
        if !stop.is_cancelled() {
            shared.status.set(device, Status::Automatic);
            reaffirmed = true;
        }
    });
    if reaffirmed {
        Step::Continue
    } else {
        Step::Yielded
    }
}

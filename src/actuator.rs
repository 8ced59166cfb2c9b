use std::sync::{Arc, Mutex};
use std::time::Instant;

use crate::activity::ActivityAggregator;
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::device::{Action, Device};
use crate::error::OutputError;
use crate::events::EventSink;
use crate::output::OutputDriver;
use crate::status::StatusBoard;

/// One actuation attempt, owned by the thread running it.
pub struct Operation {
    pub device: Device,
    pub action: Action,
    pub cancel: CancelToken,
    pub started: Instant,
}

impl Operation {
    pub fn new(device: Device, action: Action) -> Self {
        Operation {
            device,
            action,
            cancel: CancelToken::new(),
            started: Instant::now(),
        }
    }
}

/// How an operation ended.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Full pulse delivered and the terminal status committed.
    Completed,
    /// Cancelled before commit. Status is left for the superseding operation.
    Cancelled,
    /// Output failure. Status stays `live`.
    Failed,
}

/// Runs bounded motor pulses.
pub struct Actuator {
    config: Arc<Config>,
    motors: Arc<dyn OutputDriver>,
    activity: Arc<ActivityAggregator>,
    status: Arc<StatusBoard>,
    events: Arc<dyn EventSink>,
    simulated: bool,
    // One pulse per device at a time. A superseding operation waits here
    // until the one it cancelled has driven its line low.
    motor_lines: [Mutex<()>; 2],
}

impl Actuator {
    pub fn new(
        config: Arc<Config>,
        motors: Arc<dyn OutputDriver>,
        activity: Arc<ActivityAggregator>,
        status: Arc<StatusBoard>,
        events: Arc<dyn EventSink>,
        simulated: bool,
    ) -> Self {
        Actuator {
            config,
            motors,
            activity,
            status,
            events,
            simulated,
            motor_lines: [Mutex::new(()), Mutex::new(())],
        }
    }

    pub fn activity(&self) -> &Arc<ActivityAggregator> {
        &self.activity
    }

    /// Drive one pulse to completion, cancellation or failure. Blocks for at
    /// most the device's runtime plus the indicator start sequence and the
    /// wind-down of a pulse this one superseded.
    pub fn run(&self, op: &Operation) -> Outcome {
        let prefix = if self.simulated { "SIMULATION: " } else { "" };
        let verb = op.action.as_str().to_uppercase();
        self.events.log(format!(
            "{}START: {} operation initiated for {}.",
            prefix, verb, op.device
        ));
        let _active = self.activity.begin();
        let _line = self.motor_lines[op.device.index()]
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        // The start sequence, or the pulse we waited on, may have outlived
        // this operation.
        if op.cancel.is_cancelled() {
            self.events.log(format!(
                "Operation for {} was cancelled before the motor started.",
                op.device
            ));
            return Outcome::Cancelled;
        }

        match self.pulse(op) {
            Ok(Outcome::Completed) => {
                self.status.set(op.device, op.action.terminal_status());
                self.events.log(format!(
                    "{}COMPLETE: {} operation completed for {} after {:.1}s.",
                    prefix,
                    verb,
                    op.device,
                    op.started.elapsed().as_secs_f64()
                ));
                Outcome::Completed
            }
            Ok(outcome) => outcome,
            Err(err) => {
                let pin = self.config.device(op.device).pin(op.action);
                if let Err(err) = self.motors.set_output(pin, false) {
                    log::error!("unable to release pin {}: {}", pin, err);
                }
                self.events.log(format!(
                    "ERROR: Exception in shutter operation for {} during {}: {}",
                    op.device, op.action, err
                ));
                Outcome::Failed
            }
        }
    }

    fn pulse(&self, op: &Operation) -> Result<Outcome, OutputError> {
        let device = self.config.device(op.device);
        let pin = device.pin(op.action);

        self.motors.set_output(pin, true)?;
        log::info!(
            "{}: motor (pin {}) set to HIGH for {}",
            op.device,
            pin,
            op.action
        );

        if op.cancel.wait_timeout(device.runtime) {
            self.motors.set_output(pin, false)?;
            self.events.log(format!(
                "Operation for {} was cancelled; stopping motor immediately.",
                op.device
            ));
            return Ok(Outcome::Cancelled);
        }

        self.motors.set_output(pin, false)?;
        log::info!(
            "{}: motor (pin {}) set to LOW, ending {}",
            op.device,
            pin,
            op.action
        );

        // A cancel may land between the timer expiring and now.
        if op.cancel.is_cancelled() {
            self.events.log(format!(
                "Operation for {} was cancelled; skipping final update.",
                op.device
            ));
            return Ok(Outcome::Cancelled);
        }
        Ok(Outcome::Completed)
    }
}

use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::activity::ActivityAggregator;
use crate::actuator::{Actuator, Operation, Outcome};
use crate::automation::Automation;
use crate::cancel::CancelToken;
use crate::config::{AutomationMode, Config};
use crate::device::{Action, Command, Device, Status};
use crate::error::{Error, SensorError};
use crate::events::{Event, EventSink};
use crate::led::Indicator;
use crate::output::OutputDriver;
use crate::registry::{Origin, Registration, Registry};
use crate::sensor::TemperatureSensor;
use crate::status::{StatusBoard, StatusStore};

/// Output lines the controller drives.
pub struct Outputs {
    pub motors: Arc<dyn OutputDriver>,
    pub indicator: Arc<dyn OutputDriver>,
    /// Motors are not physically connected; pulses are timed only.
    pub simulated: bool,
}

/// Response to an accepted command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Reply {
    Initiated { device: Device, action: Action },
    /// An in-flight operation for the device was superseded.
    Switching { device: Device, action: Action },
    /// Nothing to do; the device is already there or heading there.
    Already { device: Device, action: Action },
    Automatic { device: Device },
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Initiated { device, action } => {
                write!(f, "{} set to {} operation initiated.", device, action)
            }
            Reply::Switching { device, action } => {
                write!(f, "{} switching to {} operation initiated.", device, action)
            }
            Reply::Already { device, action } => {
                write!(f, "{} is already {}.", device, action.terminal_status())
            }
            Reply::Automatic { device } => write!(f, "{} set to automatic mode.", device),
        }
    }
}

pub(crate) struct Shared {
    pub(crate) config: Arc<Config>,
    pub(crate) registry: Registry,
    pub(crate) status: Arc<StatusBoard>,
    pub(crate) actuator: Actuator,
    pub(crate) automation: Automation,
    pub(crate) sensor: Arc<dyn TemperatureSensor>,
    pub(crate) events: Arc<dyn EventSink>,
    shutdown: CancelToken,
}

impl Shared {
    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Register a new operation for `device`, superseding any in flight,
    /// mark the device `live` and start the pulse on its own thread.
    pub(crate) fn spawn_operation(
        self: &Arc<Self>,
        device: Device,
        action: Action,
        origin: Origin,
    ) -> Result<(JoinHandle<Outcome>, Option<Action>), Error> {
        let op = Operation::new(device, action);
        let superseded = self.registry.register(device, action, origin, &op.cancel);
        if let Some(previous) = superseded {
            log::info!("{}: {} superseded by {}", device, previous, action);
        }
        self.status.set(device, Status::Live);

        let shared = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("{}-{}", device.key().to_lowercase(), action))
            .spawn(move || {
                let _registration = Registration {
                    registry: &shared.registry,
                    device,
                    cancel: op.cancel.clone(),
                };
                shared.actuator.run(&op)
            })
            .map_err(Error::Spawn)?;
        Ok((handle, superseded))
    }
}

/// Entry point for operators and dashboards.
#[derive(Clone)]
pub struct Controller {
    shared: Arc<Shared>,
}

impl Controller {
    pub fn new(
        config: Config,
        outputs: Outputs,
        store: Box<dyn StatusStore>,
        sensor: Arc<dyn TemperatureSensor>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let config = Arc::new(config);
        let status = Arc::new(StatusBoard::new(store));
        let indicator = Indicator::new(
            outputs.indicator,
            config.led_pin,
            config.indicator,
            Arc::clone(&events),
        );
        let activity = Arc::new(ActivityAggregator::new(indicator));
        let actuator = Actuator::new(
            Arc::clone(&config),
            outputs.motors,
            activity,
            Arc::clone(&status),
            Arc::clone(&events),
            outputs.simulated,
        );
        Controller {
            shared: Arc::new(Shared {
                config,
                registry: Registry::new(),
                status,
                actuator,
                automation: Automation::new(),
                sensor,
                events,
                shutdown: CancelToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Resume automatic control for devices persisted as `automatic`, or
    /// start the dispatcher, depending on the configured mode.
    pub fn start(&self) -> Result<(), Error> {
        for device in Device::ALL {
            if self.shared.status.get(device) == Status::Live {
                log::warn!("{} was left live by a previous run", device);
            }
        }
        match self.shared.config.automation {
            AutomationMode::PerDevice => {
                for device in Device::ALL {
                    if self.shared.status.get(device) == Status::Automatic {
                        self.enter_automatic(device)?;
                    }
                }
            }
            AutomationMode::Dispatcher => self.shared.automation.start_dispatcher(&self.shared)?,
        }
        Ok(())
    }

    /// Parse and run an operator command.
    pub fn command(&self, device: &str, command: &str) -> Result<Reply, Error> {
        let device: Device = device.parse()?;
        match command.parse()? {
            Command::Actuate(action) => self.submit_command(device, action),
            Command::Automatic => self.set_automatic(device),
        }
    }

    /// Drive `device` towards `action`, superseding anything in flight. A
    /// manual command always takes the device out of automatic control.
    pub fn submit_command(&self, device: Device, action: Action) -> Result<Reply, Error> {
        let shared = &self.shared;
        // Retire the loop before reading the status: a loop stopped here can
        // no longer re-affirm `automatic` behind this command.
        if shared.automation.is_running(device) {
            self.leave_automatic(device);
        }
        match shared.status.get(device) {
            Status::Live => {
                // An automatic pulse heading the same way is still superseded,
                // so the device ends up under manual control.
                if shared.registry.current(device) == Some((action, Origin::Manual)) {
                    return Ok(Reply::Already { device, action });
                }
            }
            status if status == action.terminal_status() => {
                return Ok(Reply::Already { device, action });
            }
            _ => {}
        }

        let (_, superseded) = shared.spawn_operation(device, action, Origin::Manual)?;
        Ok(match superseded {
            Some(_) => {
                shared
                    .events
                    .log(format!("{} switching to {} via command", device, action));
                Reply::Switching { device, action }
            }
            None => {
                shared
                    .events
                    .log(format!("{} set to {} via command", device, action));
                Reply::Initiated { device, action }
            }
        })
    }

    /// Hand `device` to automatic control, cancelling any manual pulse.
    pub fn set_automatic(&self, device: Device) -> Result<Reply, Error> {
        let shared = &self.shared;
        if shared.registry.cancel(device) {
            shared
                .events
                .log(format!("Cancellation signal sent for {}.", device));
        }
        shared.status.set(device, Status::Automatic);
        shared
            .events
            .log(format!("{} set to automatic mode", device));
        if shared.config.automation == AutomationMode::PerDevice {
            self.enter_automatic(device)?;
        }
        Ok(Reply::Automatic { device })
    }

    /// Fire the in-flight operation's cancellation signal, if any.
    pub fn cancel(&self, device: Device) -> bool {
        let cancelled = self.shared.registry.cancel(device);
        let message = if cancelled {
            format!("Cancellation signal sent for {}.", device)
        } else {
            format!("No operation to cancel for {}.", device)
        };
        self.shared.events.log(message);
        cancelled
    }

    pub fn enter_automatic(&self, device: Device) -> Result<(), Error> {
        if self.shared.is_shutting_down() {
            return Ok(());
        }
        self.shared.automation.enter(&self.shared, device)
    }

    pub fn leave_automatic(&self, device: Device) {
        if self.shared.automation.leave(device) {
            self.shared
                .events
                .log(format!("Automatic control stopping for {}", device));
        } else {
            self.shared
                .events
                .log(format!("No automatic control to stop for {}", device));
        }
    }

    pub fn is_automatic_running(&self, device: Device) -> bool {
        self.shared.automation.is_running(device)
    }

    pub fn query_status(&self, device: Device) -> Status {
        self.shared.status.get(device)
    }

    /// When this process first saw the device's current status.
    pub fn status_since(&self, device: Device) -> Option<Instant> {
        self.shared.status.since(device)
    }

    /// The action in flight for `device`, if any.
    pub fn intended_action(&self, device: Device) -> Option<Action> {
        self.shared.registry.intended(device)
    }

    pub fn active_motor_count(&self) -> u32 {
        self.shared.actuator.activity().active()
    }

    pub fn temperature(&self) -> Result<f64, SensorError> {
        self.shared.sensor.read_temperature()
    }

    /// Latest journal entries, newest first.
    pub fn recent_events(&self, limit: usize) -> Vec<Event> {
        self.shared.events.recent(limit)
    }

    /// Stop every loop and cancel every pulse. Threads wind down on their own.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
        self.shared.automation.stop_all();
        self.shared.registry.cancel_all();
    }
}

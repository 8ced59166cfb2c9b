use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::automation::{Thresholds, Throttle};
use crate::device::{Action, Device};
use crate::error::ConfigError;

const MOTOR_RUNTIME: Duration = Duration::from_secs(15);
const LED_PIN: u8 = 5;
const AUTO_CHECK_INTERVAL: Duration = Duration::from_secs(10 * 60);
const DISPATCH_POLL: Duration = Duration::from_secs(5);

/// Output mapping and pulse length of one device.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DeviceConfig {
    pub open_pin: u8,
    pub close_pin: u8,
    pub runtime: Duration,
}

impl DeviceConfig {
    pub fn pin(&self, action: Action) -> u8 {
        match action {
            Action::Open => self.open_pin,
            Action::Close => self.close_pin,
        }
    }
}

/// Automatic control settings for one device.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AutoPolicy {
    pub thresholds: Thresholds,
    pub throttle: Throttle,
}

/// Which automatic driver runs. Only one ever runs per process.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AutomationMode {
    /// One loop thread per device in automatic mode.
    PerDevice,
    /// A single loop polling once for both devices.
    Dispatcher,
}

impl FromStr for AutomationMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "per-device" => Ok(AutomationMode::PerDevice),
            "dispatcher" => Ok(AutomationMode::Dispatcher),
            other => Err(ConfigError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for AutomationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutomationMode::PerDevice => f.write_str("per-device"),
            AutomationMode::Dispatcher => f.write_str("dispatcher"),
        }
    }
}

/// Pacing of the background sensor monitor.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MonitorTiming {
    pub interval: Duration,
    /// Wait after a failed read.
    pub backoff: Duration,
    /// Consecutive failures tolerated before waiting twice the backoff.
    pub max_retries: u32,
}

impl Default for MonitorTiming {
    fn default() -> Self {
        MonitorTiming {
            interval: Duration::from_secs(3),
            backoff: Duration::from_secs(5),
            max_retries: 3,
        }
    }
}

/// Timing of the shared indicator.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct IndicatorTiming {
    pub flash: Duration,
    pub flashes: u8,
    pub blink: Duration,
    pub blinks: u8,
    /// Delay between the last motor finishing and the stop sequence.
    pub debounce: Duration,
}

impl Default for IndicatorTiming {
    fn default() -> Self {
        IndicatorTiming {
            flash: Duration::from_millis(200),
            flashes: 5,
            blink: Duration::from_millis(500),
            blinks: 3,
            debounce: Duration::from_secs(2),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub shutter: DeviceConfig,
    pub sidewall: DeviceConfig,
    pub led_pin: u8,
    pub indicator: IndicatorTiming,
    pub automation: AutomationMode,
    /// Policies used by the per-device loops, indexed by `Device::index`.
    pub per_device: [AutoPolicy; 2],
    pub check_interval: Duration,
    /// Policies used by the dispatcher, indexed by `Device::index`.
    pub dispatcher: [AutoPolicy; 2],
    pub dispatch_poll: Duration,
    pub sensor_backoff: Duration,
    pub monitor: MonitorTiming,
}

impl Config {
    pub fn device(&self, device: Device) -> &DeviceConfig {
        match device {
            Device::Shutter => &self.shutter,
            Device::Sidewall => &self.sidewall,
        }
    }

    pub fn policy(&self, device: Device) -> &AutoPolicy {
        match self.automation {
            AutomationMode::PerDevice => &self.per_device[device.index()],
            AutomationMode::Dispatcher => &self.dispatcher[device.index()],
        }
    }

    /// Every pin driving a motor.
    pub fn motor_pins(&self) -> Vec<u8> {
        vec![
            self.shutter.open_pin,
            self.shutter.close_pin,
            self.sidewall.open_pin,
            self.sidewall.close_pin,
        ]
    }
}

impl Default for Config {
    fn default() -> Self {
        // 30 °C and 18 °C expressed in °F, the unit the sensor reports.
        let per_device = AutoPolicy {
            thresholds: Thresholds::new(86.0, 64.4),
            throttle: Throttle::none(),
        };
        Config {
            shutter: DeviceConfig {
                open_pin: 4,
                close_pin: 17,
                runtime: MOTOR_RUNTIME,
            },
            sidewall: DeviceConfig {
                open_pin: 27,
                close_pin: 22,
                runtime: MOTOR_RUNTIME,
            },
            led_pin: LED_PIN,
            indicator: IndicatorTiming::default(),
            monitor: MonitorTiming::default(),
            automation: AutomationMode::PerDevice,
            per_device: [per_device, per_device],
            check_interval: AUTO_CHECK_INTERVAL,
            dispatcher: [
                AutoPolicy {
                    thresholds: Thresholds::new(65.0, 60.0),
                    throttle: Throttle::idle(Duration::from_secs(60)),
                },
                AutoPolicy {
                    thresholds: Thresholds::new(75.0, 70.0),
                    throttle: Throttle::idle(Duration::from_secs(3 * 60)),
                },
            ],
            dispatch_poll: DISPATCH_POLL,
            sensor_backoff: DISPATCH_POLL,
        }
    }
}

use std::collections::HashMap;
use std::sync::Mutex;

use rppal::gpio::{Gpio, OutputPin};

use crate::error::{Error, OutputError};

/// Drives output lines high or low. Shared by every device thread.
pub trait OutputDriver: Send + Sync {
    fn set_output(&self, pin: u8, high: bool) -> Result<(), OutputError>;
}

/// Output lines on the Raspberry Pi header.
pub struct GpioDriver {
    pins: HashMap<u8, Mutex<OutputPin>>,
}

impl GpioDriver {
    /// Acquire `pins` as outputs, all driven low.
    pub fn new(pins: &[u8]) -> Result<GpioDriver, Error> {
        let gpio = Gpio::new().map_err(|err| Error::Init(format!("unable to open gpio: {}", err)))?;
        let mut lines = HashMap::new();
        for &pin in pins {
            let mut line = gpio
                .get(pin)
                .map_err(|err| Error::Init(format!("unable to acquire pin {}: {}", pin, err)))?
                .into_output();
            line.set_low();
            lines.insert(pin, Mutex::new(line));
        }
        Ok(GpioDriver { pins: lines })
    }
}

impl OutputDriver for GpioDriver {
    fn set_output(&self, pin: u8, high: bool) -> Result<(), OutputError> {
        let line = self.pins.get(&pin).ok_or(OutputError::UnknownPin(pin))?;
        let mut line = line.lock().unwrap_or_else(|e| e.into_inner());
        if high {
            line.set_high();
        } else {
            line.set_low();
        }
        Ok(())
    }
}

/// Stands in for real lines when motor control is disabled. Records every
/// transition so the timing contract can be observed.
#[derive(Default)]
pub struct SimulatedDriver {
    levels: Mutex<HashMap<u8, bool>>,
    history: Mutex<Vec<(u8, bool)>>,
}

impl SimulatedDriver {
    pub fn new() -> Self {
        SimulatedDriver::default()
    }

    pub fn level(&self, pin: u8) -> bool {
        let levels = self.levels.lock().unwrap_or_else(|e| e.into_inner());
        levels.get(&pin).copied().unwrap_or(false)
    }

    /// Every transition seen so far, oldest first.
    pub fn history(&self) -> Vec<(u8, bool)> {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl OutputDriver for SimulatedDriver {
    fn set_output(&self, pin: u8, high: bool) -> Result<(), OutputError> {
        log::debug!("simulated pin {} -> {}", pin, if high { "HIGH" } else { "LOW" });
        self.levels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(pin, high);
        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((pin, high));
        Ok(())
    }
}

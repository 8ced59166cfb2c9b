use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

/// One of the two controlled vents.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Device {
    Shutter = 0,
    Sidewall = 1,
}

impl Device {
    pub const ALL: [Device; 2] = [Device::Shutter, Device::Sidewall];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    /// Key used for the device in persisted documents.
    pub fn key(self) -> &'static str {
        match self {
            Device::Shutter => "Shutter",
            Device::Sidewall => "Sidewall",
        }
    }
}

impl FromStr for Device {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = s.trim().to_ascii_lowercase();
        let name = name.strip_prefix("slug").map(str::trim).unwrap_or(&name);
        match name {
            "shutter" => Ok(Device::Shutter),
            "sidewall" => Ok(Device::Sidewall),
            _ => Err(ConfigError::UnknownDevice(s.to_string())),
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Direction of a motor pulse.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Action {
    Open,
    Close,
}

impl Action {
    /// Status committed once a pulse in this direction completes.
    pub fn terminal_status(self) -> Status {
        match self {
            Action::Open => Status::Open,
            Action::Close => Status::Closed,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Open => "open",
            Action::Close => "close",
        }
    }
}

impl FromStr for Action {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(Action::Open),
            "close" => Ok(Action::Close),
            _ => Err(ConfigError::InvalidAction(s.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted state of a device.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Status {
    Open,
    Closed,
    Automatic,
    /// A manual pulse is in flight and its terminal status is not committed.
    Live,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Open => "open",
            Status::Closed => "closed",
            Status::Automatic => "automatic",
            Status::Live => "live",
        }
    }
}

impl FromStr for Status {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "open" => Ok(Status::Open),
            "closed" => Ok(Status::Closed),
            "automatic" => Ok(Status::Automatic),
            "live" => Ok(Status::Live),
            other => Err(ConfigError::InvalidStatus(other.to_string())),
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A command accepted from an operator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Command {
    Actuate(Action),
    Automatic,
}

impl FromStr for Command {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("automatic") {
            return Ok(Command::Automatic);
        }
        s.parse().map(Command::Actuate)
    }
}

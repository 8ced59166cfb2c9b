use std::io;

use thiserror::Error;

/// Every failure the control core can surface.
#[derive(Debug, Error)]
pub enum Error {
    #[error("sensor: {0}")]
    Sensor(#[from] SensorError),
    #[error("output: {0}")]
    Output(#[from] OutputError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    /// The output driver could not be acquired at startup.
    #[error("init: {0}")]
    Init(String),
    #[error("unable to spawn thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Transient temperature read failure. Never fatal to a loop.
#[derive(Debug, Error)]
pub enum SensorError {
    #[error("sensor monitoring disabled")]
    Disabled,
    #[error("no response from device: {0}")]
    NoResponse(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("serial port: {0}")]
    Port(#[from] rppal::uart::Error),
}

/// Failure to drive an output line. Aborts the current actuation.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("pin {0} is not configured as an output")]
    UnknownPin(u8),
    #[error("gpio: {0}")]
    Gpio(#[from] rppal::gpio::Error),
}

/// Persisted status store failure. Status writes are best effort.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("corrupt status document: {0}")]
    Corrupt(String),
    #[error("no status recorded for {0}")]
    Missing(&'static str),
}

/// A command referring to something that does not exist. Rejected synchronously.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown device '{0}'")]
    UnknownDevice(String),
    #[error("invalid action '{0}'")]
    InvalidAction(String),
    #[error("invalid status '{0}'")]
    InvalidStatus(String),
    #[error("invalid automation mode '{0}'")]
    InvalidMode(String),
}

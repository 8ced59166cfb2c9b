pub mod activity;
pub mod actuator;
pub mod automation;
pub mod cancel;
pub mod config;
mod controller;
mod device;
pub mod error;
pub mod events;
pub mod http;
pub mod led;
pub mod monitor;
pub mod output;
pub mod registry;
pub mod sensor;
pub mod status;

pub use config::{AutomationMode, Config};
pub use controller::{Controller, Outputs, Reply};
pub use device::{Action, Command, Device, Status};
pub use error::Error;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use std::{io, process, thread};

use clap::Parser;
use log::LevelFilter;
use syslog::Facility;

use vent_control::error::Error;
use vent_control::events::{EventSink, JournalSink, LogSink};
use vent_control::monitor::SensorMonitor;
use vent_control::output::{GpioDriver, OutputDriver, SimulatedDriver};
use vent_control::sensor::{ModbusSensor, NoSensor, TemperatureSensor};
use vent_control::status::FileStore;
use vent_control::{http, AutomationMode, Config, Controller, Outputs};

const ONE_SECOND: Duration = Duration::from_secs(1);

/// Shutter and sidewall vent control.
#[derive(Parser)]
#[command(name = "vent-control", version)]
struct Args {
    /// Time motor pulses without driving the motor outputs
    #[arg(short = 'm', long)]
    disable_motors: bool,

    /// Do not read the temperature sensor
    #[arg(short = 's', long)]
    disable_sensors: bool,

    #[arg(long, default_value = "0.0.0.0:5000")]
    listen: String,

    #[arg(long, default_value = "shutters_status.json")]
    status_file: PathBuf,

    #[arg(long, default_value = "logged_data.json")]
    journal: PathBuf,

    /// per-device or dispatcher
    #[arg(long, default_value = "per-device")]
    automation: AutomationMode,

    #[arg(long, default_value = "/dev/ttyUSB0")]
    serial_port: PathBuf,

    #[arg(long)]
    debug: bool,
}

fn main() -> Result<(), io::Error> {
    let args = Args::parse();
    let level = if args.debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if let Err(err) = syslog::init(Facility::LOG_DAEMON, level, Some("vent-control")) {
        eprintln!("Unable to connect to syslog: {}", err);
    }

    let term = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&term))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&term))?;

    let config = Config {
        automation: args.automation,
        ..Config::default()
    };

    let outputs = match setup_outputs(&config, args.disable_motors) {
        Ok(outputs) => outputs,
        Err(err) => {
            log::error!("Unable to set up GPIO: {}", err);
            eprintln!("Unable to set up GPIO: {}", err);
            process::exit(1);
        }
    };

    let events: Arc<dyn EventSink> = match JournalSink::open(&args.journal) {
        Ok(journal) => Arc::new(journal),
        Err(err) => {
            log::warn!(
                "Unable to open journal {}: {}, logging events only",
                args.journal.display(),
                err
            );
            Arc::new(LogSink)
        }
    };

    let store = match FileStore::open(&args.status_file) {
        Ok(store) => store,
        Err(err) => {
            eprintln!(
                "Unable to open status file {}: {}",
                args.status_file.display(),
                err
            );
            process::exit(1);
        }
    };

    let sensor: Arc<dyn TemperatureSensor> = if args.disable_sensors {
        events.log("Sensor monitoring disabled via command-line flag.".to_string());
        Arc::new(NoSensor)
    } else {
        events.log("Sensor monitoring enabled (default setting).".to_string());
        Arc::new(ModbusSensor::new(&args.serial_port))
    };

    let monitor_thread = if args.disable_sensors {
        None
    } else {
        let monitor =
            SensorMonitor::new(Arc::clone(&sensor), Arc::clone(&events), config.monitor);
        let term = Arc::clone(&term);
        Some(thread::spawn(move || monitor.run(&term)))
    };

    let controller = Controller::new(config, outputs, Box::new(store), sensor, events);
    if let Err(err) = controller.start() {
        log::error!("Unable to start automatic control: {}", err);
    }

    // Start HTTP server
    let server = match http::Server::new(args.listen.as_str()) {
        Ok(server) => Arc::new(server),
        Err(err) => {
            eprintln!("Unable to start http server on {}: {}", args.listen, err);
            process::exit(1);
        }
    };
    log::info!("http server running on {}", args.listen);

    // Handle HTTP requests
    let http_thread = {
        let controller = controller.clone();
        let server = Arc::clone(&server);
        thread::spawn(move || {
            server.handle_requests(&controller);
            log::info!("server thread exiting");
        })
    };

    // Wait for signals to exit
    while !term.load(Ordering::Relaxed) {
        thread::sleep(ONE_SECOND);
    }
    log::info!("signal received, shutting down");
    controller.shutdown();
    server.shutdown();
    let _ = http_thread.join();
    if let Some(monitor_thread) = monitor_thread {
        let _ = monitor_thread.join();
    }

    // Give pulses a moment to observe cancellation and drive their lines low.
    thread::sleep(ONE_SECOND / 2);
    Ok(())
}

fn setup_outputs(config: &Config, disable_motors: bool) -> Result<Outputs, Error> {
    if disable_motors {
        let indicator = GpioDriver::new(&[config.led_pin])?;
        log::info!("GPIO initialized for LED output in simulated motor control mode.");
        return Ok(Outputs {
            motors: Arc::new(SimulatedDriver::new()),
            indicator: Arc::new(indicator),
            simulated: true,
        });
    }

    let mut pins = config.motor_pins();
    pins.push(config.led_pin);
    let gpio: Arc<dyn OutputDriver> = Arc::new(GpioDriver::new(&pins)?);
    log::info!("GPIO initialized for output-only shutter control.");
    Ok(Outputs {
        motors: Arc::clone(&gpio),
        indicator: gpio,
        simulated: false,
    })
}

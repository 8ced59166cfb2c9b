//! Temperature source for the automatic loops.
//!
//! The greenhouse sensor is a Modbus RTU device on an RS485 HAT. Register 0
//! holds the temperature and register 1 the relative humidity.

use std::path::PathBuf;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use rppal::uart::{Parity, Queue, Uart};

use crate::error::SensorError;

const SLAVE_ADDRESS: u8 = 1;
const READ_HOLDING_REGISTERS: u8 = 0x03;
const BAUD_RATE: u32 = 9600;
const RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);
// Lets the RS485 transceiver turn around before we talk.
const TURNAROUND: Duration = Duration::from_millis(50);
const RESPONSE_LEN: usize = 9;

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Reading {
    /// °F
    pub temperature: f64,
    /// Relative humidity, %.
    pub humidity: f64,
}

pub trait TemperatureSensor: Send + Sync {
    fn read(&self) -> Result<Reading, SensorError>;

    /// Current temperature in °F.
    fn read_temperature(&self) -> Result<f64, SensorError> {
        self.read().map(|reading| reading.temperature)
    }
}

/// Used when sensor monitoring is switched off. Every read fails.
pub struct NoSensor;

impl TemperatureSensor for NoSensor {
    fn read(&self) -> Result<Reading, SensorError> {
        Err(SensorError::Disabled)
    }
}

pub struct ModbusSensor {
    path: PathBuf,
    port: Mutex<Option<Uart>>,
}

impl ModbusSensor {
    /// The port is opened lazily on first read and reopened after failures.
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        ModbusSensor {
            path: path.into(),
            port: Mutex::new(None),
        }
    }
}

impl TemperatureSensor for ModbusSensor {
    fn read(&self) -> Result<Reading, SensorError> {
        let mut port = self.port.lock().unwrap_or_else(|e| e.into_inner());
        if port.is_none() {
            let mut uart = Uart::with_path(&self.path, BAUD_RATE, Parity::None, 8, 1)?;
            uart.set_read_mode(0, RESPONSE_TIMEOUT)?;
            log::info!("modbus instrument initialized on {}", self.path.display());
            *port = Some(uart);
        }
        let result = match port.as_mut() {
            Some(uart) => transact(uart),
            None => Err(SensorError::NoResponse("port unavailable".to_string())),
        };
        if result.is_err() {
            *port = None;
        }
        result
    }
}

fn transact(uart: &mut Uart) -> Result<Reading, SensorError> {
    uart.flush(Queue::Both)?;
    thread::sleep(TURNAROUND);
    uart.write(&request_frame())?;
    uart.drain()?;

    let mut response = [0u8; RESPONSE_LEN];
    let mut filled = 0;
    while filled < RESPONSE_LEN {
        let n = uart.read(&mut response[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
        // Exception replies are shorter.
        if filled >= 5 && response[1] & 0x80 != 0 {
            break;
        }
    }
    if filled == 0 {
        return Err(SensorError::NoResponse(format!(
            "timed out after {:?}",
            RESPONSE_TIMEOUT
        )));
    }
    parse_response(&response[..filled])
}

fn request_frame() -> [u8; 8] {
    let mut frame = [SLAVE_ADDRESS, READ_HOLDING_REGISTERS, 0x00, 0x00, 0x00, 0x02, 0, 0];
    let crc = crc16(&frame[..6]);
    frame[6..].copy_from_slice(&crc.to_le_bytes());
    frame
}

fn parse_response(frame: &[u8]) -> Result<Reading, SensorError> {
    if frame.len() < 5 {
        return Err(SensorError::InvalidResponse(format!(
            "short frame of {} bytes",
            frame.len()
        )));
    }
    let (body, crc) = frame.split_at(frame.len() - 2);
    if crc16(body).to_le_bytes() != [crc[0], crc[1]] {
        return Err(SensorError::InvalidResponse("checksum mismatch".to_string()));
    }
    if body[0] != SLAVE_ADDRESS {
        return Err(SensorError::InvalidResponse(format!(
            "reply from slave {}",
            body[0]
        )));
    }
    if body[1] == READ_HOLDING_REGISTERS | 0x80 {
        return Err(SensorError::InvalidResponse(format!(
            "exception code {}",
            body[2]
        )));
    }
    if body[1] != READ_HOLDING_REGISTERS || body[2] != 4 || body.len() != 7 {
        return Err(SensorError::InvalidResponse("unexpected frame layout".to_string()));
    }
    let raw_temperature = i16::from_be_bytes([body[3], body[4]]);
    let raw_humidity = u16::from_be_bytes([body[5], body[6]]);
    Ok(Reading {
        temperature: 9.0 * f64::from(raw_temperature) / 500.0 + 32.0,
        humidity: f64::from(raw_humidity) / 100.0,
    })
}

/// CRC-16/MODBUS.
fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0xFFFF, |mut crc, &byte| {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ 0xA001 } else { crc >> 1 };
        }
        crc
    })
}

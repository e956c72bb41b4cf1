//! Raw sample sources.
//!
//! Each trait abstracts one physical read. Implementations here bind them to
//! `embedded-hal` buses/pins or to any buffered reader; `hardware` supplies
//! the Linux devices and `sim` has bench stand-ins.
//! Everything in this module is blocking and is only ever driven from a
//! dedicated worker thread.

use embedded_hal::digital::{Error as _, InputPin};
use embedded_hal::i2c::{Error as _, I2c};
use std::io::{BufRead, ErrorKind};

use crate::error::{SensorError, SensorResult};
use crate::sample::RawInertial;

/// Accelerometer/gyroscope triple source
pub trait InertialSource: Send {
    /// (Re)establish the device. Called at startup and after exhausted retries.
    fn initialize(&mut self) -> SensorResult<()>;

    fn read_raw(&mut self) -> SensorResult<RawInertial>;
}

/// Binary switch (vibration / shock module)
pub trait SwitchInput: Send {
    fn is_active(&mut self) -> SensorResult<bool>;
}

/// Line-oriented GPS receiver output
pub trait NmeaSource: Send {
    /// Next line, or `None` when nothing is available right now.
    fn read_line(&mut self) -> SensorResult<Option<String>>;
}

// ─── MPU-6050 over embedded-hal I2C ─────────────────────────────────────────

const PWR_MGMT_1: u8 = 0x6B;
const SMPLRT_DIV: u8 = 0x19;
const CONFIG: u8 = 0x1A;
const GYRO_CONFIG: u8 = 0x1B;
const INT_ENABLE: u8 = 0x38;
const ACCEL_XOUT_H: u8 = 0x3B;

const INIT_SEQUENCE: [(u8, u8); 5] = [
    (SMPLRT_DIV, 7),
    (PWR_MGMT_1, 1),
    (CONFIG, 0),
    (GYRO_CONFIG, 24),
    (INT_ENABLE, 1),
];

pub struct Mpu6050<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> Mpu6050<I2C> {
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self { i2c, address }
    }
}

impl<I2C: I2c + Send> InertialSource for Mpu6050<I2C> {
    fn initialize(&mut self) -> SensorResult<()> {
        for (register, value) in INIT_SEQUENCE {
            self.i2c
                .write(self.address, &[register, value])
                .map_err(|e| {
                    SensorError::Bus(format!("init write {:#04x}: {:?}", register, e.kind()))
                })?;
        }
        Ok(())
    }

    fn read_raw(&mut self) -> SensorResult<RawInertial> {
        // ACCEL_XOUT_H..GYRO_ZOUT_L: accel (6), temperature (2), gyro (6)
        let mut buf = [0u8; 14];
        self.i2c
            .write_read(self.address, &[ACCEL_XOUT_H], &mut buf)
            .map_err(|e| SensorError::Bus(format!("{:?}", e.kind())))?;

        let word = |i: usize| i16::from_be_bytes([buf[i], buf[i + 1]]);
        Ok(RawInertial {
            accel: [word(0), word(2), word(4)],
            gyro: [word(8), word(10), word(12)],
        })
    }
}

// ─── Switches ───────────────────────────────────────────────────────────────

/// Any embedded-hal input pin as a switch
pub struct DigitalSwitch<P> {
    pin: P,
    active_low: bool,
}

impl<P: InputPin> DigitalSwitch<P> {
    pub fn new(pin: P, active_low: bool) -> Self {
        Self { pin, active_low }
    }
}

impl<P: InputPin + Send> SwitchInput for DigitalSwitch<P> {
    fn is_active(&mut self) -> SensorResult<bool> {
        let result = if self.active_low {
            self.pin.is_low()
        } else {
            self.pin.is_high()
        };
        result.map_err(|e| SensorError::Pin(format!("{:?}", e.kind())))
    }
}

// ─── NMEA line sources ──────────────────────────────────────────────────────

/// Lines from any buffered reader. A read timeout yields `None` and keeps
/// the partial line, so the next call picks up where the receiver left off.
pub struct LineSource<R> {
    reader: R,
    buf: Vec<u8>,
}

impl<R: BufRead> LineSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(128),
        }
    }
}

impl<R: BufRead + Send> NmeaSource for LineSource<R> {
    fn read_line(&mut self) -> SensorResult<Option<String>> {
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) if self.buf.is_empty() => Ok(None),
            Ok(_) => {
                // Receivers emit garbage while syncing; keep what decodes
                let line = String::from_utf8_lossy(&self.buf).trim().to_string();
                self.buf.clear();
                Ok(Some(line))
            }
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => Ok(None),
            Err(e) => {
                self.buf.clear();
                Err(SensorError::Serial(e.to_string()))
            }
        }
    }
}

//! Kit hardware on Linux: MPU-6050 on i2c-dev, switches on the GPIO
//! character device, GPS receiver on a serial tty.

use linux_embedded_hal::gpio_cdev::{self, Chip, LineRequestFlags};
use linux_embedded_hal::serialport::{self, SerialPort};
use linux_embedded_hal::{CdevPin, I2cdev};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::TelemetryConfig;
use crate::error::{SensorError, SensorResult};
use crate::sample::RawInertial;
use crate::scheduler::SensorSet;
use crate::sensors::{DigitalSwitch, InertialSource, LineSource, Mpu6050, NmeaSource, SwitchInput};

const GPIO_CONSUMER: &str = "telemetry-kit";

/// MPU-6050 that reopens `/dev/i2c-N` on every (re)initialization
pub struct I2cDevInertial {
    bus: PathBuf,
    address: u8,
    device: Option<Mpu6050<I2cdev>>,
}

impl I2cDevInertial {
    pub fn new(bus: PathBuf, address: u8) -> Self {
        Self {
            bus,
            address,
            device: None,
        }
    }
}

impl InertialSource for I2cDevInertial {
    fn initialize(&mut self) -> SensorResult<()> {
        self.device = None;
        let i2c = I2cdev::new(&self.bus)
            .map_err(|e| SensorError::Bus(format!("{}: {}", self.bus.display(), e)))?;
        let mut device = Mpu6050::new(i2c, self.address);
        device.initialize()?;
        self.device = Some(device);
        Ok(())
    }

    fn read_raw(&mut self) -> SensorResult<RawInertial> {
        self.device
            .as_mut()
            .ok_or(SensorError::NotInitialized)?
            .read_raw()
    }
}

/// Stand-in for a switch whose GPIO line could not be requested
struct DisconnectedSwitch;

impl SwitchInput for DisconnectedSwitch {
    fn is_active(&mut self) -> SensorResult<bool> {
        Ok(false)
    }
}

fn request_input(chip: &Path, offset: u32) -> Result<CdevPin, gpio_cdev::errors::Error> {
    let handle = Chip::new(chip)?
        .get_line(offset)?
        .request(LineRequestFlags::INPUT, 0, GPIO_CONSUMER)?;
    CdevPin::new(handle)
}

fn open_switch(chip: &Path, offset: u32, name: &str) -> Box<dyn SwitchInput> {
    match request_input(chip, offset) {
        Ok(pin) => Box::new(DigitalSwitch::new(pin, false)),
        Err(e) => {
            log::error!(
                "[inertial] {} switch on {} line {} unavailable: {}",
                name,
                chip.display(),
                offset,
                e
            );
            Box::new(DisconnectedSwitch)
        }
    }
}

/// NMEA receiver on a serial tty. The port is opened lazily with the
/// configured baud rate and read timeout, and reopened after a device error.
pub struct SerialGps {
    port: PathBuf,
    baud_rate: u32,
    timeout: Duration,
    lines: Option<LineSource<BufReader<Box<dyn SerialPort>>>>,
}

impl SerialGps {
    pub fn new(port: PathBuf, baud_rate: u32, timeout: Duration) -> Self {
        Self {
            port,
            baud_rate,
            timeout,
            lines: None,
        }
    }
}

impl NmeaSource for SerialGps {
    fn read_line(&mut self) -> SensorResult<Option<String>> {
        if self.lines.is_none() {
            let port = serialport::new(self.port.to_string_lossy(), self.baud_rate)
                .timeout(self.timeout)
                .open()
                .map_err(|e| SensorError::Serial(format!("{}: {}", self.port.display(), e)))?;
            log::info!("[gps] opened {} at {} baud", self.port.display(), self.baud_rate);
            self.lines = Some(LineSource::new(BufReader::new(port)));
        }

        let result = match self.lines.as_mut() {
            Some(lines) => lines.read_line(),
            None => Err(SensorError::NotInitialized),
        };
        if result.is_err() {
            self.lines = None;
        }
        result
    }
}

/// Bind every source to the configured devices. Nothing here fails:
/// missing devices degrade their stream instead.
pub fn open_sensors(config: &TelemetryConfig) -> SensorSet {
    SensorSet {
        inertial: Box::new(I2cDevInertial::new(config.i2c_bus.clone(), config.mpu_address)),
        vibration: open_switch(&config.gpio_chip, config.vibration_pin, "vibration"),
        shock: open_switch(&config.gpio_chip, config.shock_pin, "shock"),
        gps: Box::new(SerialGps::new(
            config.gps_port.clone(),
            config.gps_baud_rate,
            config.gps_read_timeout(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_bus_fails_init_without_panicking() {
        let mut inertial = I2cDevInertial::new(PathBuf::from("/dev/i2c-does-not-exist"), 0x68);
        assert!(matches!(inertial.initialize(), Err(SensorError::Bus(_))));
        assert_eq!(inertial.read_raw(), Err(SensorError::NotInitialized));
    }

    #[test]
    fn test_missing_gpio_chip_reads_inactive() {
        let mut switch = open_switch(Path::new("/dev/gpiochip-does-not-exist"), 17, "shock");
        assert_eq!(switch.is_active(), Ok(false));
    }

    #[test]
    fn test_missing_serial_port_is_a_stream_error() {
        let mut gps = SerialGps::new(
            PathBuf::from("/dev/ttyDOES-NOT-EXIST"),
            9600,
            Duration::from_millis(10),
        );
        assert!(matches!(gps.read_line(), Err(SensorError::Serial(_))));
        assert!(gps.lines.is_none());
    }

    #[test]
    fn test_open_sensors_degrades_missing_devices() {
        let config = TelemetryConfig {
            i2c_bus: PathBuf::from("/dev/i2c-does-not-exist"),
            gpio_chip: PathBuf::from("/dev/gpiochip-does-not-exist"),
            gps_port: PathBuf::from("/dev/ttyDOES-NOT-EXIST"),
            ..TelemetryConfig::default()
        };
        let mut sensors = open_sensors(&config);
        assert!(sensors.inertial.initialize().is_err());
        assert_eq!(sensors.vibration.is_active(), Ok(false));
        assert_eq!(sensors.shock.is_active(), Ok(false));
        assert!(sensors.gps.read_line().is_err());
    }
}

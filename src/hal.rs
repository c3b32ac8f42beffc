//! ==============================================================================
//! hal.rs - Hardware Abstraction Layer
//! ==============================================================================
//!
//! purpose:
//!     provides a unified interface for the station's devices: the GPS UART,
//!     the accelerometer event device, I2C sensors, GPIO inputs and the four
//!     actuators. abstracts away the difference between running on the real
//!     reTerminal/Raspberry Pi (using `rppal`) and a development machine
//!     (using mocks).
//!
//! design philosophy:
//!     - "Compile Anywhere": the station compiles and runs on any machine;
//!       the mock synthesises device frames and feeds them through the same
//!       decoders the real HAL uses.
//!     - "Narrow": every method reads one sample or drives one output.
//!       looping, retrying and storing belong to pollers.rs and patch.rs.
//!     - "Blocking": calls may sleep on a device; callers run them on the
//!       blocking pool, never on the async executor.
//!
//! relationships:
//!     - used by: pollers.rs (sensor reads), patch.rs (actuator writes)
//!     - uses: devices.rs (frame decoding)
//!     - uses: rppal (on feature="hardware")
//!
//! ==============================================================================

use crate::config::{ActuatorsConfig, SensorsConfig};
use crate::devices::{DeviceError, InputEvent};
use crate::domain::{Actuator, BinarySensor};

/// line-oriented GPS sentence stream
pub trait NmeaSource: Send {
    /// one line without its terminator; `None` when the read timed out empty
    fn read_line(&mut self) -> Result<Option<Vec<u8>>, DeviceError>;
    /// drop whatever is buffered, after a framing/encoding error
    fn reset_input(&mut self) -> Result<(), DeviceError>;
}

/// accelerometer event stream
pub trait AccelSource: Send {
    /// blocks until the device delivers the next event record
    fn read_event(&mut self) -> Result<InputEvent, DeviceError>;
}

pub trait HardwareProvider: Send + Sync {
    fn open_gps(&self) -> Result<Box<dyn NmeaSource>, DeviceError>;
    fn open_accelerometer(&self) -> Result<Box<dyn AccelSource>, DeviceError>;
    /// `(temperature °C, relative humidity %)`
    fn read_temperature_humidity(&self) -> Result<(f64, f64), DeviceError>;
    fn read_adc(&self, channel: u8) -> Result<u16, DeviceError>;
    fn read_illuminance(&self) -> Result<f64, DeviceError>;
    fn read_input(&self, sensor: BinarySensor) -> Result<bool, DeviceError>;
    fn set_actuator(&self, actuator: Actuator, on: bool) -> Result<(), DeviceError>;
    /// `None` when the hardware cannot report it and it was never driven
    fn actuator_state(&self, actuator: Actuator) -> Result<Option<bool>, DeviceError>;
}

/// latest commanded state per actuator, for outputs that cannot be read back
#[derive(Default)]
struct CommandedStates {
    states: std::sync::Mutex<[Option<bool>; 4]>,
}

impl CommandedStates {
    fn index(actuator: Actuator) -> usize {
        match actuator {
            Actuator::Buzzer => 0,
            Actuator::Fan => 1,
            Actuator::Light => 2,
            Actuator::DoorLock => 3,
        }
    }

    fn set(&self, actuator: Actuator, on: bool) {
        let mut states = self
            .states
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        states[Self::index(actuator)] = Some(on);
    }

    fn get(&self, actuator: Actuator) -> Option<bool> {
        let states = self
            .states
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        states[Self::index(actuator)]
    }
}

// ==============================================================================================
// MOCK IMPLEMENTATION (For Non-Hardware Build)
// ==============================================================================================
#[cfg(not(feature = "hardware"))]
mod mock {
    use super::*;
    use crate::devices::{self, INPUT_EVENT_LEN};
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    const MOCK_SENTENCES: [&str; 4] = [
        "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47",
        "$GPGSV,3,1,11,03,03,111,00,04,15,270,00,06,01,010,00,13,06,292,00*74",
        "$GPRMC,123520,A,4807.040,N,01131.002,E,000.5,054.7,191194,020.3,E",
        "$GPGLL,4807.041,N,01131.003,E,123521,A",
    ];

    pub struct Hal {
        sensors: SensorsConfig,
        commanded: CommandedStates,
        tick: AtomicU64,
    }

    impl Hal {
        pub fn new(sensors: SensorsConfig, _actuators: ActuatorsConfig) -> Self {
            tracing::info!("Using MOCK HAL (No hardware access)");
            Self {
                sensors,
                commanded: CommandedStates::default(),
                tick: AtomicU64::new(0),
            }
        }

        fn next_tick(&self) -> u64 {
            self.tick.fetch_add(1, Ordering::Relaxed)
        }
    }

    struct MockGps {
        index: usize,
    }

    impl NmeaSource for MockGps {
        fn read_line(&mut self) -> Result<Option<Vec<u8>>, DeviceError> {
            std::thread::sleep(Duration::from_millis(250));
            let line = MOCK_SENTENCES[self.index % MOCK_SENTENCES.len()];
            self.index += 1;
            Ok(Some(line.as_bytes().to_vec()))
        }

        fn reset_input(&mut self) -> Result<(), DeviceError> {
            tracing::debug!("[MOCK GPS] input buffer reset");
            Ok(())
        }
    }

    /// a slow sway around 1g on z, emitted as raw evdev records
    struct MockAccel {
        step: u64,
    }

    impl AccelSource for MockAccel {
        fn read_event(&mut self) -> Result<InputEvent, DeviceError> {
            let axis_code = (self.step % 4) as u16;
            self.step += 1;
            if axis_code == 3 {
                std::thread::sleep(Duration::from_millis(100));
                // EV_SYN report separator
                return devices::decode_input_event(&record(0x00, 0x00, 0));
            }
            let phase = self.step as f64 / 20.0;
            let value = match axis_code {
                0 => (phase.sin() * 60.0) as i32,
                1 => (phase.cos() * 40.0) as i32,
                _ => 1000 + (phase.sin() * 5.0) as i32,
            };
            devices::decode_input_event(&record(0x03, axis_code, value))
        }
    }

    fn record(kind: u16, code: u16, value: i32) -> [u8; INPUT_EVENT_LEN] {
        let mut bytes = [0u8; INPUT_EVENT_LEN];
        bytes[16..18].copy_from_slice(&kind.to_ne_bytes());
        bytes[18..20].copy_from_slice(&code.to_ne_bytes());
        bytes[20..24].copy_from_slice(&value.to_ne_bytes());
        bytes
    }

    impl HardwareProvider for Hal {
        fn open_gps(&self) -> Result<Box<dyn NmeaSource>, DeviceError> {
            tracing::debug!(port = %self.sensors.gps.port, "[MOCK GPS] opened");
            Ok(Box::new(MockGps { index: 0 }))
        }

        fn open_accelerometer(&self) -> Result<Box<dyn AccelSource>, DeviceError> {
            tracing::debug!(device = %self.sensors.accelerometer.device, "[MOCK ACCEL] opened");
            Ok(Box::new(MockAccel { step: 0 }))
        }

        fn read_temperature_humidity(&self) -> Result<(f64, f64), DeviceError> {
            // 22.x °C / 45 % encoded the way the AHT20 reports it
            let t = self.next_tick() % 16;
            let raw_h: u32 = 0x73333;
            let raw_t: u32 = 0x5C28F + (t as u32) * 0x400;
            let frame = [
                0x1C,
                (raw_h >> 12) as u8,
                (raw_h >> 4) as u8,
                (((raw_h & 0x0F) << 4) as u8) | ((raw_t >> 16) as u8 & 0x0F),
                (raw_t >> 8) as u8,
                raw_t as u8,
            ];
            devices::decode_aht20(&frame)
        }

        fn read_adc(&self, channel: u8) -> Result<u16, DeviceError> {
            let register = devices::grove_adc_register(channel);
            let value: u16 = 300 + u16::from(register & 0x0F) * 50 + (self.next_tick() % 10) as u16;
            tracing::debug!("[MOCK ADC] register 0x{:02X} -> {}", register, value);
            devices::decode_adc_word(&value.to_le_bytes())
        }

        fn read_illuminance(&self) -> Result<f64, DeviceError> {
            let text = format!("{}.{}\n", 180 + self.next_tick() % 20, 4);
            devices::parse_illuminance(&text)
        }

        fn read_input(&self, sensor: BinarySensor) -> Result<bool, DeviceError> {
            Ok(match sensor {
                BinarySensor::DoorClosed => true,
                BinarySensor::MotionDetected => self.next_tick() % 50 == 0,
            })
        }

        fn set_actuator(&self, actuator: Actuator, on: bool) -> Result<(), DeviceError> {
            tracing::debug!("[MOCK {}] set to {}", actuator, if on { "ON" } else { "OFF" });
            self.commanded.set(actuator, on);
            Ok(())
        }

        fn actuator_state(&self, actuator: Actuator) -> Result<Option<bool>, DeviceError> {
            Ok(Some(self.commanded.get(actuator).unwrap_or(false)))
        }
    }
}

#[cfg(not(feature = "hardware"))]
pub use mock::Hal;

// ==============================================================================================
// REAL IMPLEMENTATION (For reTerminal / Raspberry Pi)
// ==============================================================================================
#[cfg(feature = "hardware")]
mod real {
    use super::*;
    use crate::devices::{self, INPUT_EVENT_LEN};
    use rppal::gpio::{Gpio, Level, OutputPin};
    use rppal::i2c::I2c;
    use rppal::uart::{Parity, Queue, Uart};
    use std::io::Read;
    use std::sync::Mutex;
    use std::time::Duration;

    /// longest sentence NMEA allows is 82 bytes; anything far beyond is line noise
    const MAX_LINE: usize = 512;
    const SERVO_PERIOD: Duration = Duration::from_millis(20);
    const SERVO_OPEN_PULSE: Duration = Duration::from_millis(1);
    const SERVO_CLOSED_PULSE: Duration = Duration::from_millis(2);
    const LIGHT_LEVEL: u8 = 127;

    fn hw<E: std::fmt::Display>(e: E) -> DeviceError {
        DeviceError::Hardware(e.to_string())
    }

    pub struct Hal {
        sensors: SensorsConfig,
        actuators: ActuatorsConfig,
        commanded: CommandedStates,
        // software PWM stops when the pin is dropped, so the servo pin lives here
        lock_pin: Mutex<Option<OutputPin>>,
    }

    impl Hal {
        pub fn new(sensors: SensorsConfig, actuators: ActuatorsConfig) -> Self {
            tracing::info!("Using REAL HARDWARE HAL (rppal)");
            Self {
                sensors,
                actuators,
                commanded: CommandedStates::default(),
                lock_pin: Mutex::new(None),
            }
        }

        fn write_gpio(&self, pin: u8, level: bool) -> Result<(), DeviceError> {
            let gpio = Gpio::new().map_err(hw)?;
            let mut p = gpio.get(pin).map_err(hw)?.into_output();
            // keep the level after this handle goes away
            p.set_reset_on_drop(false);
            if level {
                p.set_high();
            } else {
                p.set_low();
            }
            Ok(())
        }

        fn write_light(&self, on: bool) -> Result<(), DeviceError> {
            let gpio = Gpio::new().map_err(hw)?;
            let mut clock = gpio
                .get(self.actuators.light_clock_pin)
                .map_err(hw)?
                .into_output();
            let mut data = gpio
                .get(self.actuators.light_data_pin)
                .map_err(hw)?
                .into_output();
            clock.set_reset_on_drop(false);
            data.set_reset_on_drop(false);

            let level = if on { LIGHT_LEVEL } else { 0 };
            let mut send_byte = |byte: u8| {
                for bit in (0..8).rev() {
                    if byte & (1 << bit) != 0 {
                        data.set_high();
                    } else {
                        data.set_low();
                    }
                    clock.set_low();
                    std::thread::sleep(Duration::from_micros(20));
                    clock.set_high();
                    std::thread::sleep(Duration::from_micros(20));
                }
            };

            for _ in 0..4 {
                send_byte(0);
            }
            for _ in 0..self.actuators.light_count {
                for byte in devices::p9813_frame(level, level, level) {
                    send_byte(byte);
                }
            }
            for _ in 0..4 {
                send_byte(0);
            }
            Ok(())
        }

        fn write_lock(&self, locked: bool) -> Result<(), DeviceError> {
            let mut guard = self
                .lock_pin
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if guard.is_none() {
                let gpio = Gpio::new().map_err(hw)?;
                let pin = gpio.get(self.actuators.lock_pin).map_err(hw)?.into_output();
                *guard = Some(pin);
            }
            if let Some(pin) = guard.as_mut() {
                let pulse = if locked {
                    SERVO_CLOSED_PULSE
                } else {
                    SERVO_OPEN_PULSE
                };
                pin.set_pwm(SERVO_PERIOD, pulse).map_err(hw)?;
            }
            Ok(())
        }
    }

    struct UartNmea {
        uart: Uart,
        pending: Vec<u8>,
    }

    impl NmeaSource for UartNmea {
        fn read_line(&mut self) -> Result<Option<Vec<u8>>, DeviceError> {
            let mut chunk = [0u8; 128];
            loop {
                if let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
                    let mut line: Vec<u8> = self.pending.drain(..=end).collect();
                    while matches!(line.last(), Some(b'\n' | b'\r')) {
                        line.pop();
                    }
                    return Ok(Some(line));
                }
                if self.pending.len() > MAX_LINE {
                    self.pending.clear();
                    return Err(DeviceError::Parse("unterminated sentence".to_string()));
                }
                let n = self.uart.read(&mut chunk).map_err(hw)?;
                if n == 0 {
                    return Ok(None);
                }
                self.pending.extend_from_slice(&chunk[..n]);
            }
        }

        fn reset_input(&mut self) -> Result<(), DeviceError> {
            self.pending.clear();
            self.uart.flush(Queue::Input).map_err(hw)
        }
    }

    struct EvdevAccel {
        device: std::fs::File,
    }

    impl AccelSource for EvdevAccel {
        fn read_event(&mut self) -> Result<InputEvent, DeviceError> {
            let mut record = [0u8; INPUT_EVENT_LEN];
            self.device.read_exact(&mut record)?;
            devices::decode_input_event(&record)
        }
    }

    impl HardwareProvider for Hal {
        fn open_gps(&self) -> Result<Box<dyn NmeaSource>, DeviceError> {
            let cfg = &self.sensors.gps;
            let mut uart = Uart::with_path(&cfg.port, cfg.baud_rate, Parity::None, 8, 1).map_err(hw)?;
            uart.set_read_mode(0, Duration::from_secs(1)).map_err(hw)?;
            Ok(Box::new(UartNmea {
                uart,
                pending: Vec::with_capacity(MAX_LINE),
            }))
        }

        fn open_accelerometer(&self) -> Result<Box<dyn AccelSource>, DeviceError> {
            let device = std::fs::File::open(&self.sensors.accelerometer.device)?;
            Ok(Box::new(EvdevAccel { device }))
        }

        fn read_temperature_humidity(&self) -> Result<(f64, f64), DeviceError> {
            let cfg = &self.sensors.environment;
            let mut i2c = I2c::with_bus(cfg.aht20_bus).map_err(hw)?;
            i2c.set_slave_address(cfg.aht20_address).map_err(hw)?;

            let mut status = [0u8; 1];
            i2c.read(&mut status).map_err(hw)?;
            if status[0] & 0x08 == 0 {
                i2c.write(&devices::AHT20_INIT).map_err(hw)?;
                std::thread::sleep(Duration::from_millis(10));
            }

            i2c.write(&devices::AHT20_TRIGGER).map_err(hw)?;
            std::thread::sleep(Duration::from_millis(80));
            let mut frame = [0u8; devices::AHT20_FRAME_LEN];
            i2c.read(&mut frame).map_err(hw)?;
            devices::decode_aht20(&frame)
        }

        fn read_adc(&self, channel: u8) -> Result<u16, DeviceError> {
            let mut i2c = I2c::new().map_err(hw)?;
            i2c.set_slave_address(self.sensors.environment.adc_address)
                .map_err(hw)?;
            let mut word = [0u8; 2];
            i2c.write_read(&[devices::grove_adc_register(channel)], &mut word)
                .map_err(hw)?;
            devices::decode_adc_word(&word)
        }

        fn read_illuminance(&self) -> Result<f64, DeviceError> {
            let text = std::fs::read_to_string(&self.sensors.environment.illuminance_path)?;
            devices::parse_illuminance(&text)
        }

        fn read_input(&self, sensor: BinarySensor) -> Result<bool, DeviceError> {
            let gpio = Gpio::new().map_err(hw)?;
            let cfg = &self.sensors.digital;
            match sensor {
                // reed switch to ground: magnet present pulls the line low
                BinarySensor::DoorClosed => {
                    let pin = gpio.get(cfg.door_pin).map_err(hw)?.into_input_pullup();
                    Ok(pin.is_low())
                }
                BinarySensor::MotionDetected => {
                    let pin = gpio.get(cfg.motion_pin).map_err(hw)?.into_input();
                    Ok(pin.is_high())
                }
            }
        }

        fn set_actuator(&self, actuator: Actuator, on: bool) -> Result<(), DeviceError> {
            match actuator {
                Actuator::Buzzer => {
                    std::fs::write(&self.actuators.buzzer_path, if on { "1" } else { "0" })?
                }
                Actuator::Fan => self.write_gpio(self.actuators.fan_pin, on)?,
                Actuator::Light => self.write_light(on)?,
                Actuator::DoorLock => self.write_lock(on)?,
            }
            self.commanded.set(actuator, on);
            Ok(())
        }

        fn actuator_state(&self, actuator: Actuator) -> Result<Option<bool>, DeviceError> {
            match actuator {
                Actuator::Buzzer => {
                    let text = std::fs::read_to_string(&self.actuators.buzzer_path)?;
                    Ok(Some(text.trim() != "0"))
                }
                Actuator::Fan => {
                    let gpio = Gpio::new().map_err(hw)?;
                    let pin = gpio.get(self.actuators.fan_pin).map_err(hw)?;
                    Ok(Some(pin.read() == Level::High))
                }
                Actuator::Light | Actuator::DoorLock => Ok(self.commanded.get(actuator)),
            }
        }
    }
}

#[cfg(feature = "hardware")]
pub use real::Hal;

//! ==============================================================================
//! devices.rs - raw device frame decoders
//! ==============================================================================
//!
//! purpose:
//!     turns the bytes and text that the physical devices hand back into
//!     typed values. nothing here touches hardware, so every decoder is
//!     testable on a development machine.
//!
//! devices:
//!     - AHT20 temperature/humidity sensor (I2C, 6-byte measurement frame)
//!     - Grove base hat ADC (I2C, little-endian 16-bit registers)
//!     - reTerminal accelerometer (linux evdev `input_event` records)
//!     - reTerminal light sensor (iio sysfs text)
//!     - P9813 chainable RGB LED driver (4-byte colour frames)
//!
//! relationships:
//!     - used by: hal.rs (real HAL decodes what it reads)
//!     - used by: pollers.rs (accelerometer event decoding)
//!
//! ==============================================================================

use crate::domain::Axis;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device busy, measurement not ready")]
    Busy,
    #[error("short frame: expected {expected} bytes, got {got}")]
    ShortFrame { expected: usize, got: usize },
    #[error("unparseable reading: {0:?}")]
    Parse(String),
    #[error("device i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("hardware: {0}")]
    Hardware(String),
}

// ==============================================================================
// AHT20
// ==============================================================================

#[cfg_attr(not(feature = "hardware"), allow(dead_code))]
pub const AHT20_INIT: [u8; 3] = [0xBE, 0x08, 0x00];
#[cfg_attr(not(feature = "hardware"), allow(dead_code))]
pub const AHT20_TRIGGER: [u8; 3] = [0xAC, 0x33, 0x00];
#[cfg_attr(not(feature = "hardware"), allow(dead_code))]
pub const AHT20_FRAME_LEN: usize = 6;
const AHT20_BUSY: u8 = 0x80;
const TWENTY_BIT: f64 = (1u32 << 20) as f64;

/// decode a measurement frame into `(temperature °C, relative humidity %)`
pub fn decode_aht20(frame: &[u8]) -> Result<(f64, f64), DeviceError> {
    if frame.len() < AHT20_FRAME_LEN {
        return Err(DeviceError::ShortFrame {
            expected: AHT20_FRAME_LEN,
            got: frame.len(),
        });
    }
    if frame[0] & AHT20_BUSY != 0 {
        return Err(DeviceError::Busy);
    }

    let raw_humidity =
        (u32::from(frame[1]) << 12) | (u32::from(frame[2]) << 4) | (u32::from(frame[3]) >> 4);
    let raw_temperature =
        (u32::from(frame[3] & 0x0F) << 16) | (u32::from(frame[4]) << 8) | u32::from(frame[5]);

    let humidity = f64::from(raw_humidity) * 100.0 / TWENTY_BIT;
    let temperature = f64::from(raw_temperature) * 200.0 / TWENTY_BIT - 50.0;
    Ok((temperature, humidity))
}

// ==============================================================================
// Grove ADC
// ==============================================================================

/// register holding a channel's reading as a 0..=1000 ratio (0.1% steps)
pub fn grove_adc_register(channel: u8) -> u8 {
    0x30 + channel
}

/// smbus words are little-endian
pub fn decode_adc_word(bytes: &[u8]) -> Result<u16, DeviceError> {
    match bytes {
        [lo, hi, ..] => Ok(u16::from_le_bytes([*lo, *hi])),
        _ => Err(DeviceError::ShortFrame {
            expected: 2,
            got: bytes.len(),
        }),
    }
}

// ==============================================================================
// evdev input_event
// ==============================================================================

/// `struct input_event` on 64-bit linux: timeval (2 x i64), type, code, value
pub const INPUT_EVENT_LEN: usize = 24;
const EV_ABS: u16 = 0x03;
const ABS_X: u16 = 0x00;
const ABS_Y: u16 = 0x01;
const ABS_Z: u16 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputEvent {
    pub kind: u16,
    pub code: u16,
    pub value: i32,
}

pub fn decode_input_event(record: &[u8]) -> Result<InputEvent, DeviceError> {
    if record.len() < INPUT_EVENT_LEN {
        return Err(DeviceError::ShortFrame {
            expected: INPUT_EVENT_LEN,
            got: record.len(),
        });
    }
    Ok(InputEvent {
        kind: u16::from_ne_bytes([record[16], record[17]]),
        code: u16::from_ne_bytes([record[18], record[19]]),
        value: i32::from_ne_bytes([record[20], record[21], record[22], record[23]]),
    })
}

/// the axis sample an event carries, if it is an acceleration event at all
pub fn acceleration_sample(event: &InputEvent) -> Option<(Axis, f64)> {
    if event.kind != EV_ABS {
        return None;
    }
    let axis = match event.code {
        ABS_X => Axis::X,
        ABS_Y => Axis::Y,
        ABS_Z => Axis::Z,
        _ => return None,
    };
    Some((axis, f64::from(event.value)))
}

// ==============================================================================
// illuminance
// ==============================================================================

/// sysfs lux text, rounded to a whole number
pub fn parse_illuminance(text: &str) -> Result<f64, DeviceError> {
    text.trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(f64::round)
        .ok_or_else(|| DeviceError::Parse(text.trim().to_string()))
}

// ==============================================================================
// P9813 chainable LED
// ==============================================================================

/// one LED's colour frame: flag byte (inverted top bits as a check), blue, green, red
#[cfg_attr(not(feature = "hardware"), allow(dead_code))]
pub fn p9813_frame(r: u8, g: u8, b: u8) -> [u8; 4] {
    let flag = 0xC0 | (((!b >> 6) & 0x03) << 4) | (((!g >> 6) & 0x03) << 2) | ((!r >> 6) & 0x03);
    [flag, b, g, r]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_bytes(kind: u16, code: u16, value: i32) -> Vec<u8> {
        let mut bytes = vec![0u8; 16];
        bytes.extend_from_slice(&kind.to_ne_bytes());
        bytes.extend_from_slice(&code.to_ne_bytes());
        bytes.extend_from_slice(&value.to_ne_bytes());
        bytes
    }

    #[test]
    fn test_decode_aht20() {
        // humidity raw 0x80000 (50%), temperature raw 0x60000 (25 °C)
        let frame = [0x1C, 0x80, 0x00, 0x06, 0x00, 0x00];
        let (t, h) = decode_aht20(&frame).unwrap();
        assert!((h - 50.0).abs() < 1e-9);
        assert!((t - 25.0).abs() < 1e-9);
    }

    #[test]
    fn test_decode_aht20_busy_and_short() {
        assert!(matches!(
            decode_aht20(&[0x80, 0, 0, 0, 0, 0]),
            Err(DeviceError::Busy)
        ));
        assert!(matches!(
            decode_aht20(&[0x1C, 0]),
            Err(DeviceError::ShortFrame { expected: 6, got: 2 })
        ));
    }

    #[test]
    fn test_adc_word() {
        assert_eq!(grove_adc_register(5), 0x35);
        assert_eq!(decode_adc_word(&[0xE8, 0x03]).unwrap(), 1000);
        assert!(decode_adc_word(&[0xE8]).is_err());
    }

    #[test]
    fn test_input_event_to_axis() {
        let ev = decode_input_event(&event_bytes(EV_ABS, ABS_Y, -512)).unwrap();
        assert_eq!(acceleration_sample(&ev), Some((Axis::Y, -512.0)));

        // EV_SYN separators are ignored
        let syn = decode_input_event(&event_bytes(0x00, 0x00, 0)).unwrap();
        assert_eq!(acceleration_sample(&syn), None);

        assert!(decode_input_event(&[0u8; 10]).is_err());
    }

    #[test]
    fn test_parse_illuminance_rounds() {
        assert_eq!(parse_illuminance("123.6\n").unwrap(), 124.0);
        assert!(parse_illuminance("n/a").is_err());
    }

    #[test]
    fn test_p9813_frame() {
        assert_eq!(p9813_frame(0, 0, 0), [0xFF, 0, 0, 0]);
        assert_eq!(p9813_frame(255, 255, 255), [0xC0, 255, 255, 255]);
        assert_eq!(p9813_frame(127, 127, 127)[0], 0xEA);
    }
}

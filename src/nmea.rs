//! nmea sentence framing and the station's gps sign convention.
//!
//! only the raw longitude/latitude text is extracted here; turning it into a
//! stored value is `correct_coordinate`, which reproduces the deployed
//! station's rule exactly (read its docs before changing it).

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NmeaError {
    #[error("sentence does not start with '$'")]
    MissingStart,
    #[error("malformed checksum field")]
    BadChecksumField,
    #[error("checksum mismatch: sentence says {expected:02X}, computed {computed:02X}")]
    Checksum { expected: u8, computed: u8 },
    #[error("sentence {0} carries no position")]
    Unsupported(String),
    #[error("sentence has too few fields")]
    Truncated,
    #[error("position fields are empty (no fix)")]
    NoFix,
}

/// raw position text exactly as it appeared in the sentence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawPosition<'a> {
    pub longitude: &'a str,
    pub latitude: &'a str,
}

/// xor of every byte between '$' and '*'
pub fn checksum(payload: &str) -> u8 {
    payload.bytes().fold(0u8, |acc, b| acc ^ b)
}

/// split off and verify the checksum when the sentence carries one
fn strip_checksum(sentence: &str) -> Result<&str, NmeaError> {
    let body = sentence.strip_prefix('$').ok_or(NmeaError::MissingStart)?;
    match body.split_once('*') {
        None => Ok(body),
        Some((payload, hex)) => {
            let hex = hex.trim();
            if hex.len() != 2 {
                return Err(NmeaError::BadChecksumField);
            }
            let expected =
                u8::from_str_radix(hex, 16).map_err(|_| NmeaError::BadChecksumField)?;
            let computed = checksum(payload);
            if expected != computed {
                return Err(NmeaError::Checksum { expected, computed });
            }
            Ok(payload)
        }
    }
}

/// extract longitude/latitude text from a GGA, RMC or GLL sentence of any talker
pub fn parse_position(line: &str) -> Result<RawPosition<'_>, NmeaError> {
    let payload = strip_checksum(line.trim())?;
    let fields: Vec<&str> = payload.split(',').collect();
    let address = fields[0];
    if address.len() < 5 {
        return Err(NmeaError::Unsupported(address.to_string()));
    }

    let (lat_idx, lon_idx) = match address.get(address.len() - 3..) {
        Some("GGA") => (2, 4),
        Some("RMC") => (3, 5),
        Some("GLL") => (1, 3),
        _ => return Err(NmeaError::Unsupported(address.to_string())),
    };

    let latitude = *fields.get(lat_idx).ok_or(NmeaError::Truncated)?;
    let longitude = *fields.get(lon_idx).ok_or(NmeaError::Truncated)?;
    if latitude.is_empty() || longitude.is_empty() {
        return Err(NmeaError::NoFix);
    }

    Ok(RawPosition {
        longitude,
        latitude,
    })
}

/// convert one raw `DDMM.MMMM`-style field into the stored value.
///
/// the rule, reproduced verbatim from the deployed station:
///   - after stripping any sign, if the integer part (text before '.') is
///     longer than one character and starts with '0', the value is negated;
///   - the (possibly negated) value is divided by 100.
///
/// so `"0123.45"` becomes `-1.2345`, `"4807.038"` becomes `48.07038` and
/// `"0.5"` (a lone integer digit) stays positive: `0.005`.
///
/// NOTE: this is not a geodetic convention. NMEA encodes the hemisphere in a
/// separate N/S/E/W field and a leading zero only pads the degree digits, so
/// western longitudes with two-digit degrees (e.g. `07400.0`) come out
/// negative while `12000.0` W comes out positive, and the minutes are never
/// converted to decimal degrees.
///
/// returns `None` for text that is not a finite number.
pub fn correct_coordinate(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let value = raw.parse::<f64>().ok().filter(|v| v.is_finite())?;
    let unsigned = raw.trim_start_matches(|c: char| c == '+' || c == '-');
    let integer_part = unsigned.split('.').next().unwrap_or("");

    let value = if integer_part.len() > 1 && unsigned.starts_with('0') {
        -value.abs()
    } else {
        value
    };
    Some(value / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const GGA: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_checksum_matches_reference_sentence() {
        assert_eq!(checksum("GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,"), 0x47);
    }

    #[test]
    fn test_parse_gga() {
        let pos = parse_position(GGA).unwrap();
        assert_eq!(pos.latitude, "4807.038");
        assert_eq!(pos.longitude, "01131.000");
    }

    #[test]
    fn test_parse_rmc_and_gll_without_checksum() {
        let rmc = "$GNRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W";
        let pos = parse_position(rmc).unwrap();
        assert_eq!(pos.latitude, "4807.038");
        assert_eq!(pos.longitude, "01131.000");

        let gll = "$GPGLL,4916.45,N,12311.12,W,225444,A";
        let pos = parse_position(gll).unwrap();
        assert_eq!(pos.latitude, "4916.45");
        assert_eq!(pos.longitude, "12311.12");
    }

    #[test]
    fn test_parse_rejects_bad_checksum() {
        let bad = GGA.replace("*47", "*48");
        assert_eq!(
            parse_position(&bad),
            Err(NmeaError::Checksum {
                expected: 0x48,
                computed: 0x47
            })
        );
    }

    #[test]
    fn test_parse_rejects_other_sentences() {
        assert!(matches!(
            parse_position("$GPGSV,3,1,11,03,03,111,00"),
            Err(NmeaError::Unsupported(_))
        ));
        assert_eq!(parse_position("GPGGA,1,2"), Err(NmeaError::MissingStart));
        assert_eq!(parse_position("$GPGLL,4916.45"), Err(NmeaError::Truncated));
    }

    #[test]
    fn test_parse_no_fix() {
        assert_eq!(
            parse_position("$GPGGA,123519,,,,,0,00,,,M,,M,,"),
            Err(NmeaError::NoFix)
        );
    }

    #[test]
    fn test_correct_coordinate_leading_zero_negates() {
        assert_eq!(correct_coordinate("0123.45"), Some(-1.2345));
        assert!(close(correct_coordinate("01131.000").unwrap(), -11.31));
    }

    #[test]
    fn test_correct_coordinate_plain_value() {
        assert!(close(correct_coordinate("4807.038").unwrap(), 48.07038));
        assert!(close(correct_coordinate("12311.12").unwrap(), 123.1112));
    }

    #[test]
    fn test_correct_coordinate_lone_integer_digit() {
        assert!(close(correct_coordinate("0.5").unwrap(), 0.005));
        assert!(close(correct_coordinate("0").unwrap(), 0.0));
        assert!(close(correct_coordinate("05").unwrap(), -0.05));
    }

    #[test]
    fn test_correct_coordinate_signed_input() {
        assert!(close(correct_coordinate("-0123.45").unwrap(), -1.2345));
        assert!(close(correct_coordinate("-4807.038").unwrap(), -48.07038));
    }

    #[test]
    fn test_correct_coordinate_rejects_garbage() {
        assert_eq!(correct_coordinate(""), None);
        assert_eq!(correct_coordinate("abc"), None);
        assert_eq!(correct_coordinate("inf"), None);
        assert_eq!(correct_coordinate("NaN"), None);
    }
}

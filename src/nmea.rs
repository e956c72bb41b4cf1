//! Minimal RMC support: the only sentence the kit needs for position.

use chrono::Utc;

use crate::error::NmeaError;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fix {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Rmc {
    /// Status "A"
    Fix(Fix),
    /// Status "V" (receiver warning / still acquiring)
    NoFix,
}

pub fn is_rmc(line: &str) -> bool {
    line.starts_with("$GPRMC") || line.starts_with("$GNRMC")
}

/// Parse a `$GPRMC` / `$GNRMC` sentence. A trailing `*hh` checksum is
/// verified when present.
pub fn parse_rmc(line: &str) -> Result<Rmc, NmeaError> {
    let line = line.trim();
    if !is_rmc(line) {
        return Err(NmeaError::NotRmc);
    }
    let body = verify_checksum(line)?;
    let fields: Vec<&str> = body.split(',').collect();

    match fields.get(2).copied().ok_or(NmeaError::MissingField("status"))? {
        "A" => {}
        "V" => return Ok(Rmc::NoFix),
        other => return Err(NmeaError::Status(other.to_string())),
    }

    let latitude = LATITUDE.parse(
        fields.get(3).copied().unwrap_or(""),
        fields.get(4).copied().unwrap_or(""),
    )?;
    let longitude = LONGITUDE.parse(
        fields.get(5).copied().unwrap_or(""),
        fields.get(6).copied().unwrap_or(""),
    )?;

    Ok(Rmc::Fix(Fix { latitude, longitude }))
}

/// Strip `$` and `*hh`, returning the checksummed body.
fn verify_checksum(line: &str) -> Result<&str, NmeaError> {
    let without_dollar = &line[1..];
    let Some((body, hex)) = without_dollar.split_once('*') else {
        return Ok(without_dollar);
    };

    let expected = u8::from_str_radix(hex.trim(), 16).map_err(|_| NmeaError::InvalidNumber {
        field: "checksum",
        value: hex.to_string(),
    })?;
    let computed = checksum(body);
    if expected != computed {
        return Err(NmeaError::Checksum { expected, computed });
    }
    Ok(body)
}

fn checksum(body: &str) -> u8 {
    body.bytes().fold(0u8, |acc, b| acc ^ b)
}

/// Layout of one RMC coordinate: `ddmm.mmmm` or `dddmm.mmmm`
struct Axis {
    field: &'static str,
    degree_digits: usize,
    max_degrees: f64,
    positive: &'static str,
    negative: &'static str,
}

const LATITUDE: Axis = Axis {
    field: "latitude",
    degree_digits: 2,
    max_degrees: 90.0,
    positive: "N",
    negative: "S",
};

const LONGITUDE: Axis = Axis {
    field: "longitude",
    degree_digits: 3,
    max_degrees: 180.0,
    positive: "E",
    negative: "W",
};

impl Axis {
    /// Signed decimal degrees. Degrees and minutes are split on the text,
    /// two digits before the decimal point, and parsed separately.
    fn parse(&self, value: &str, hemisphere: &str) -> Result<f64, NmeaError> {
        if value.is_empty() || hemisphere.is_empty() {
            return Err(NmeaError::MissingField(self.field));
        }
        let invalid = |text: &str| NmeaError::InvalidNumber {
            field: self.field,
            value: text.to_string(),
        };

        // Digits and a point only, so NaN, inf and signs never reach the parser
        if !value.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
            return Err(invalid(value));
        }
        let dot = value.find('.').unwrap_or(value.len());
        if dot < 3 || dot - 2 > self.degree_digits {
            return Err(invalid(value));
        }

        let (degree_text, minute_text) = value.split_at(dot - 2);
        let degrees: u32 = degree_text.parse().map_err(|_| invalid(value))?;
        let minutes: f64 = minute_text.parse().map_err(|_| invalid(value))?;
        if !minutes.is_finite() || minutes >= 60.0 {
            return Err(invalid(value));
        }

        let decimal = f64::from(degrees) + minutes / 60.0;
        if decimal > self.max_degrees {
            return Err(invalid(value));
        }

        if hemisphere == self.positive {
            Ok(decimal)
        } else if hemisphere == self.negative {
            Ok(-decimal)
        } else {
            Err(invalid(hemisphere))
        }
    }

    /// Inverse of [`Axis::parse`] at four minute decimals
    fn format(&self, decimal: f64) -> (String, &'static str) {
        let hemisphere = if decimal < 0.0 { self.negative } else { self.positive };
        // Round once in ten-thousandths of a minute so 59.99996' carries into the degree
        let total = (decimal.abs().min(self.max_degrees) * 600_000.0).round() as u64;
        let (degrees, minutes) = (total / 600_000, total % 600_000);
        let text = format!(
            "{:0width$}{:02}.{:04}",
            degrees,
            minutes / 10_000,
            minutes % 10_000,
            width = self.degree_digits
        );
        (text, hemisphere)
    }
}

/// Build a checksummed `$GPRMC` sentence (used by the simulator).
pub fn format_rmc(status: char, latitude: f64, longitude: f64) -> String {
    let now = Utc::now();
    let (lat, lat_hemisphere) = LATITUDE.format(latitude);
    let (lon, lon_hemisphere) = LONGITUDE.format(longitude);
    let body = format!(
        "GPRMC,{},{},{},{},{},{},0.0,0.0,{},,,A",
        now.format("%H%M%S.00"),
        status,
        lat,
        lat_hemisphere,
        lon,
        lon_hemisphere,
        now.format("%d%m%y"),
    );
    format!("${}*{:02X}", body, checksum(&body))
}

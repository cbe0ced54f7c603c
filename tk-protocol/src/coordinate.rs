use std::fmt;
use std::str::FromStr;

use crate::error::CoordinateParseError;

/// Decimal places kept in converted coordinates (about 0.1 m).
const PRECISION: f64 = 1_000_000.0;

/// Hemisphere letter that follows a degree-minute value on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Hemisphere {
    North,
    South,
    East,
    West,
}

impl Hemisphere {
    /// South and West produce negative decimal degrees.
    pub fn is_negative(self) -> bool {
        matches!(self, Self::South | Self::West)
    }

    /// Largest absolute value allowed on this axis.
    pub fn limit(self) -> f64 {
        match self {
            Self::North | Self::South => 90.0,
            Self::East | Self::West => 180.0,
        }
    }

    pub fn as_char(self) -> char {
        match self {
            Self::North => 'N',
            Self::South => 'S',
            Self::East => 'E',
            Self::West => 'W',
        }
    }
}

impl FromStr for Hemisphere {
    type Err = CoordinateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "N" | "n" => Ok(Self::North),
            "S" | "s" => Ok(Self::South),
            "E" | "e" => Ok(Self::East),
            "W" | "w" => Ok(Self::West),
            other => Err(CoordinateParseError::Hemisphere(other.to_string())),
        }
    }
}

impl fmt::Display for Hemisphere {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// Convert a `DDMM.MMMM` / `DDDMM.MMMM` value to signed decimal degrees,
/// rounded to six decimal places.
pub fn to_decimal_degrees(raw: &str, hemisphere: Hemisphere) -> Result<f64, CoordinateParseError> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| CoordinateParseError::NotNumeric(raw.to_string()))?;
    // The wire value is unsigned; the hemisphere carries the sign.
    if !value.is_finite() || value.is_sign_negative() {
        return Err(CoordinateParseError::NotNumeric(raw.to_string()));
    }

    // dd + mm.mmmm / 60
    let degrees = (value / 100.0).floor();
    let minutes = value - degrees * 100.0;
    let mut decimal = degrees + minutes / 60.0;
    if hemisphere.is_negative() {
        decimal = -decimal;
    }
    let decimal = (decimal * PRECISION).round() / PRECISION;

    if decimal.abs() > hemisphere.limit() {
        return Err(CoordinateParseError::OutOfRange {
            value: decimal,
            hemisphere: hemisphere.as_char(),
        });
    }
    Ok(decimal)
}

/// Convert signed decimal degrees back to the unsigned `DDMM.MMMM` wire value.
pub fn to_degree_minutes(decimal: f64) -> f64 {
    let abs = decimal.abs();
    let degrees = abs.floor();
    let minutes = (abs - degrees) * 60.0;
    degrees * 100.0 + minutes
}

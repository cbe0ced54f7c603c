use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// A location frame had the right shape but a field could not be decoded.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    #[error(transparent)]
    Coordinate(#[from] CoordinateParseError),

    #[error(transparent)]
    Time(#[from] TimeParseError),

    #[error("missing \"imei:\" prefix in {0:?}")]
    MissingImei(String),

    #[error("invalid speed: {0:?}")]
    InvalidSpeed(String),

    #[error("invalid bearing: {0:?}")]
    InvalidBearing(String),
}

#[derive(Debug, Error, PartialEq)]
pub enum CoordinateParseError {
    #[error("coordinate is not numeric: {0:?}")]
    NotNumeric(String),

    #[error("unknown hemisphere: {0:?}")]
    Hemisphere(String),

    #[error("coordinate {value} out of range for hemisphere {hemisphere}")]
    OutOfRange { value: f64, hemisphere: char },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimeParseError {
    #[error("timestamp must be 12 digits (YYMMDDHHMMSS), got {0:?}")]
    Format(String),

    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: u32 },

    #[error("no such date: {year:04}-{month:02}-{day:02}")]
    InvalidDate { year: i32, month: u32, day: u32 },
}

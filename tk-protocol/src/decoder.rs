use chrono::{DateTime, Utc};
use log::{debug, trace};

use crate::coordinate::{Hemisphere, to_decimal_degrees};
use crate::error::{ProtocolError, Result};
use crate::record::LocationRecord;
use crate::timestamp::{DEFAULT_CENTURY_BASE, to_utc_timestamp};

/// Reply to a heartbeat.
pub const HEARTBEAT_ACK: &[u8] = b"ON";
/// Reply to a handshake.
pub const HANDSHAKE_ACK: &[u8] = b"LOAD";
/// First field of a handshake frame.
pub const HANDSHAKE_MARKER: &str = "##";
/// Prefix in front of the IMEI in handshake and location frames.
pub const IMEI_PREFIX: &str = "imei:";
/// Alarm field value that must be answered with an alert ack.
pub const ALARM_HELP: &str = "help me";
/// Reply used by `LocationAckPolicy::Always` unless configured otherwise.
pub const DEFAULT_LOCATION_REPLY: &str = "ok\n";
/// Source tag stamped on persisted records.
pub const DEFAULT_SOURCE_PROTOCOL: &str = "tk103";

pub const KNOTS_TO_MPH: f64 = 1.15078;

/// Number of comma-separated fields in a location report.
pub const LOCATION_FIELDS: usize = 19;

/// Positional fields of a location report.
mod field {
    pub const IMEI: usize = 0;
    pub const ALARM: usize = 1;
    pub const TIMESTAMP: usize = 2;
    pub const LATITUDE: usize = 7;
    pub const LAT_HEMISPHERE: usize = 8;
    pub const LONGITUDE: usize = 9;
    pub const LON_HEMISPHERE: usize = 10;
    pub const SPEED_KNOTS: usize = 11;
    pub const BEARING: usize = 12;
}

/// Frame shape as determined by field count alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameShape {
    Heartbeat,
    Handshake,
    LocationReport,
    Unrecognized,
}

/// Classify a frame that has already been split on commas.
pub fn classify(fields: &[&str]) -> FrameShape {
    match fields {
        [imei] if !imei.is_empty() => FrameShape::Heartbeat,
        [marker, _, _] if *marker == HANDSHAKE_MARKER => FrameShape::Handshake,
        f if f.len() == LOCATION_FIELDS => FrameShape::LocationReport,
        _ => FrameShape::Unrecognized,
    }
}

/// Whether a non-alarm location report gets a reply.
///
/// Alarm reports (`help me`) are always answered with the alert ack.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum LocationAckPolicy {
    /// Only alarm reports are acknowledged (TK103 units).
    #[default]
    AlarmOnly,
    /// Every report is acknowledged with `reply` (TK102 units expect `ok\n`).
    Always { reply: String },
}

impl LocationAckPolicy {
    pub fn always() -> Self {
        Self::Always {
            reply: DEFAULT_LOCATION_REPLY.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DecoderConfig {
    pub location_ack: LocationAckPolicy,
    /// Added to the two-digit year of device timestamps.
    pub century_base: i32,
    pub source_protocol: String,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            location_ack: LocationAckPolicy::default(),
            century_base: DEFAULT_CENTURY_BASE,
            source_protocol: DEFAULT_SOURCE_PROTOCOL.to_string(),
        }
    }
}

/// A decoded device frame.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedFrame {
    Heartbeat {
        imei: String,
    },
    Handshake {
        imei: String,
    },
    LocationReport {
        imei: String,
        timestamp_utc: DateTime<Utc>,
        latitude: f64,
        longitude: f64,
        speed_mph: f64,
        bearing_degrees: f64,
        alarm: String,
    },
    Unrecognized,
}

impl DecodedFrame {
    pub fn imei(&self) -> Option<&str> {
        match self {
            Self::Heartbeat { imei } | Self::Handshake { imei } => Some(imei),
            Self::LocationReport { imei, .. } => Some(imei),
            Self::Unrecognized => None,
        }
    }
}

/// A decoded frame and the bytes to send back (possibly none).
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub frame: DecodedFrame,
    pub ack: Vec<u8>,
}

impl Decoded {
    fn new(frame: DecodedFrame, ack: impl Into<Vec<u8>>) -> Self {
        Self {
            frame,
            ack: ack.into(),
        }
    }
}

/// Classifies and decodes TK102/TK103 text frames.
#[derive(Debug, Clone, Default)]
pub struct Decoder {
    config: DecoderConfig,
}

impl Decoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decode one raw frame.
    ///
    /// Unknown shapes are not errors: they decode to `Unrecognized` with an
    /// empty ack. Errors are only returned for location reports whose fields
    /// cannot be converted.
    pub fn decode(&self, raw: &[u8]) -> Result<Decoded> {
        self.decode_str(&String::from_utf8_lossy(raw))
    }

    pub fn decode_str(&self, text: &str) -> Result<Decoded> {
        let text = normalize(text);
        let fields: Vec<&str> = text.split(',').collect();
        let shape = classify(&fields);
        trace!("{} field(s) -> {:?}", fields.len(), shape);

        match shape {
            FrameShape::Heartbeat => Ok(Decoded::new(
                DecodedFrame::Heartbeat {
                    imei: fields[0].to_string(),
                },
                HEARTBEAT_ACK,
            )),
            FrameShape::Handshake => {
                let imei = fields[1].strip_prefix(IMEI_PREFIX).unwrap_or(fields[1]);
                Ok(Decoded::new(
                    DecodedFrame::Handshake {
                        imei: imei.to_string(),
                    },
                    HANDSHAKE_ACK,
                ))
            }
            FrameShape::LocationReport => self.decode_location(&fields),
            FrameShape::Unrecognized => {
                debug!("unrecognized frame: {:?}", text);
                Ok(Decoded::new(DecodedFrame::Unrecognized, Vec::new()))
            }
        }
    }

    /// Build the persisted record for a decoded location report.
    pub fn record(&self, frame: &DecodedFrame) -> Option<LocationRecord> {
        LocationRecord::from_frame(frame, &self.config.source_protocol)
    }

    fn decode_location(&self, fields: &[&str]) -> Result<Decoded> {
        let imei = fields[field::IMEI]
            .strip_prefix(IMEI_PREFIX)
            .ok_or_else(|| ProtocolError::MissingImei(fields[field::IMEI].to_string()))?;
        let alarm = fields[field::ALARM];

        let timestamp_utc = to_utc_timestamp(fields[field::TIMESTAMP], self.config.century_base)?;

        let lat_hemisphere: Hemisphere = fields[field::LAT_HEMISPHERE].parse()?;
        let latitude = to_decimal_degrees(fields[field::LATITUDE], lat_hemisphere)?;
        let lon_hemisphere: Hemisphere = fields[field::LON_HEMISPHERE].parse()?;
        let longitude = to_decimal_degrees(fields[field::LONGITUDE], lon_hemisphere)?;

        let speed_knots = parse_or_zero(fields[field::SPEED_KNOTS])
            .filter(|v| *v >= 0.0)
            .ok_or_else(|| ProtocolError::InvalidSpeed(fields[field::SPEED_KNOTS].to_string()))?;
        let bearing_degrees = parse_or_zero(fields[field::BEARING])
            .filter(|v| (0.0..360.0).contains(v))
            .ok_or_else(|| ProtocolError::InvalidBearing(fields[field::BEARING].to_string()))?;

        let ack = if alarm == ALARM_HELP {
            format!("**,{IMEI_PREFIX}{imei},E;").into_bytes()
        } else {
            match &self.config.location_ack {
                LocationAckPolicy::AlarmOnly => Vec::new(),
                LocationAckPolicy::Always { reply } => reply.clone().into_bytes(),
            }
        };

        Ok(Decoded::new(
            DecodedFrame::LocationReport {
                imei: imei.to_string(),
                timestamp_utc,
                latitude,
                longitude,
                speed_mph: speed_knots * KNOTS_TO_MPH,
                bearing_degrees,
                alarm: alarm.to_string(),
            },
            ack,
        ))
    }
}

/// Strip surrounding whitespace and a single trailing `;` terminator.
fn normalize(text: &str) -> &str {
    let text = text.trim();
    text.strip_suffix(';').unwrap_or(text).trim_end()
}

/// Empty numeric fields read as zero; anything else must be a finite number.
fn parse_or_zero(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Some(0.0);
    }
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

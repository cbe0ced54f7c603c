use chrono::{DateTime, Utc};

use crate::decoder::DecodedFrame;

/// A decoded location report in the shape handed to persistence.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationRecord {
    /// Device IMEI.
    pub device_id: String,
    /// Fix time reported by the device.
    pub timestamp_utc: DateTime<Utc>,
    /// Decimal degrees, -90 to 90.
    pub latitude: f64,
    /// Decimal degrees, -180 to 180.
    pub longitude: f64,
    pub speed_mph: f64,
    /// Degrees clockwise from north, 0 to <360.
    pub bearing_degrees: f64,
    /// Protocol family the frame was decoded as (e.g. `tk103`).
    pub source_protocol: String,
    /// Alarm/mode field exactly as received.
    pub raw_alarm: String,
}

impl LocationRecord {
    /// Build a record from a decoded location report.
    ///
    /// Returns `None` for heartbeats, handshakes, and unrecognized frames.
    pub fn from_frame(frame: &DecodedFrame, source_protocol: &str) -> Option<Self> {
        match frame {
            DecodedFrame::LocationReport {
                imei,
                timestamp_utc,
                latitude,
                longitude,
                speed_mph,
                bearing_degrees,
                alarm,
            } => Some(Self {
                device_id: imei.clone(),
                timestamp_utc: *timestamp_utc,
                latitude: *latitude,
                longitude: *longitude,
                speed_mph: *speed_mph,
                bearing_degrees: *bearing_degrees,
                source_protocol: source_protocol.to_string(),
                raw_alarm: alarm.clone(),
            }),
            _ => None,
        }
    }
}

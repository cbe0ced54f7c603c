use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

use log::info;
use serde::Serialize;
use tk_protocol::LocationRecord;

use crate::error::PersistError;

/// Identifier a sink assigns to a stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordId(pub u64);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persistence for decoded location reports.
///
/// Implementations may block; the server calls them from the blocking pool.
/// A failed save is logged by the caller and never retried.
pub trait LocationSink: Send + Sync {
    fn save(&self, record: &LocationRecord) -> Result<RecordId, PersistError>;
}

/// Writes every record to the log.
#[derive(Debug, Default)]
pub struct LogSink {
    last_id: AtomicU64,
}

impl LogSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocationSink for LogSink {
    fn save(&self, record: &LocationRecord) -> Result<RecordId, PersistError> {
        let id = RecordId(self.last_id.fetch_add(1, Ordering::Relaxed) + 1);
        info!(
            "location #{id}: imei={} time={} lat={:.6} lon={:.6} speed={:.2}mph bearing={:.2} alarm={:?}",
            record.device_id,
            record.timestamp_utc.format(GPS_TIME_FORMAT),
            record.latitude,
            record.longitude,
            record.speed_mph,
            record.bearing_degrees,
            record.raw_alarm,
        );
        Ok(id)
    }
}

/// `gps_time` column format of the location table.
const GPS_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One line of a [`JsonLinesSink`] file, using the location table's columns.
#[derive(Debug, Serialize)]
struct LocationRow<'a> {
    id: u64,
    latitude: f64,
    longitude: f64,
    user_name: String,
    phone_number: &'a str,
    session_id: &'a str,
    speed: f64,
    direction: f64,
    distance: f64,
    gps_time: String,
    location_method: &'a str,
    accuracy: f64,
    extra_info: &'a str,
    event_type: &'a str,
}

impl<'a> LocationRow<'a> {
    fn new(id: u64, record: &'a LocationRecord) -> Self {
        Self {
            id,
            latitude: record.latitude,
            longitude: record.longitude,
            user_name: format!("{}-user", record.source_protocol),
            phone_number: &record.device_id,
            session_id: "1",
            speed: record.speed_mph,
            direction: record.bearing_degrees,
            distance: 0.0,
            gps_time: record.timestamp_utc.format(GPS_TIME_FORMAT).to_string(),
            location_method: "",
            accuracy: 0.0,
            extra_info: &record.raw_alarm,
            event_type: &record.source_protocol,
        }
    }
}

/// Appends one JSON object per record to a file.
///
/// Record ids are line numbers written by this process, starting at 1.
#[derive(Debug)]
pub struct JsonLinesSink {
    path: PathBuf,
    inner: Mutex<JsonLinesState>,
}

#[derive(Debug)]
struct JsonLinesState {
    file: File,
    last_id: u64,
}

impl JsonLinesSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!("appending locations to {}", path.display());
        Ok(Self {
            path,
            inner: Mutex::new(JsonLinesState { file, last_id: 0 }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LocationSink for JsonLinesSink {
    fn save(&self, record: &LocationRecord) -> Result<RecordId, PersistError> {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let id = state.last_id + 1;

        let mut line = serde_json::to_vec(&LocationRow::new(id, record))?;
        line.push(b'\n');
        state.file.write_all(&line)?;
        state.file.flush()?;

        state.last_id = id;
        Ok(RecordId(id))
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LocationRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything saved so far, in save order.
    pub fn records(&self) -> Vec<LocationRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LocationSink for MemorySink {
    fn save(&self, record: &LocationRecord) -> Result<RecordId, PersistError> {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        records.push(record.clone());
        Ok(RecordId(records.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader};

    use chrono::{TimeZone, Utc};

    use super::*;

    fn record(imei: &str) -> LocationRecord {
        LocationRecord {
            device_id: imei.to_string(),
            timestamp_utc: Utc.with_ymd_and_hms(2015, 10, 6, 1, 23, 36).unwrap(),
            latitude: 51.099653,
            longitude: -114.082665,
            speed_mph: 0.0115078,
            bearing_degrees: 322.56,
            source_protocol: "tk103".to_string(),
            raw_alarm: "tracker".to_string(),
        }
    }

    #[test]
    fn test_log_sink_ids_increase() {
        let sink = LogSink::new();
        assert_eq!(sink.save(&record("1")).unwrap(), RecordId(1));
        assert_eq!(sink.save(&record("2")).unwrap(), RecordId(2));
    }

    #[test]
    fn test_memory_sink_keeps_order() {
        let sink = MemorySink::new();
        assert!(sink.is_empty());
        sink.save(&record("a")).unwrap();
        let id = sink.save(&record("b")).unwrap();
        assert_eq!(id, RecordId(2));
        let ids: Vec<_> = sink.records().into_iter().map(|r| r.device_id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_json_lines_sink_writes_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locations.jsonl");
        let sink = JsonLinesSink::open(&path).unwrap();
        assert_eq!(sink.path(), path.as_path());

        assert_eq!(sink.save(&record("359710049095095")).unwrap(), RecordId(1));
        assert_eq!(sink.save(&record("359710049095096")).unwrap(), RecordId(2));

        let lines: Vec<String> = BufReader::new(File::open(&path).unwrap())
            .lines()
            .map(|l| l.unwrap())
            .collect();
        assert_eq!(lines.len(), 2);

        let row: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(row["id"], 1);
        assert_eq!(row["phone_number"], "359710049095095");
        assert_eq!(row["user_name"], "tk103-user");
        assert_eq!(row["event_type"], "tk103");
        assert_eq!(row["gps_time"], "2015-10-06 01:23:36");
        assert_eq!(row["extra_info"], "tracker");
        assert_eq!(row["direction"], 322.56);
    }

    #[test]
    fn test_json_lines_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locations.jsonl");
        JsonLinesSink::open(&path).unwrap().save(&record("a")).unwrap();
        JsonLinesSink::open(&path).unwrap().save(&record("b")).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[test]
    fn test_json_lines_sink_bad_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("locations.jsonl");
        assert!(matches!(JsonLinesSink::open(&path), Err(PersistError::Io(_))));
    }
}

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tk_protocol::decoder::{DEFAULT_LOCATION_REPLY, DEFAULT_SOURCE_PROTOCOL};
use tk_protocol::framing::DEFAULT_MAX_FRAME_LEN;
use tk_protocol::{
    CENTURY_BASE_RANGE, DEFAULT_CENTURY_BASE, DecoderConfig, Framing, LocationAckPolicy,
};

use crate::error::{PersistError, Result, ServerError};
use crate::sink::{JsonLinesSink, LocationSink, LogSink};

/// Port the deployed TK103 units are configured to report to.
pub const DEFAULT_PORT: u16 = 7331;

/// Configuration for the tracker server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Upper bound on bytes taken from a socket per read.
    pub read_size: usize,
    /// Connections accepted beyond this are closed immediately.
    pub max_sessions: usize,
    /// Sessions silent for longer are closed. `None` keeps them forever.
    pub idle_timeout: Option<Duration>,
    pub framing: Framing,
    /// Quiet period after which unterminated bytes are decoded as a frame.
    pub flush_after: Duration,
    pub max_frame_len: usize,
    /// Sink calls allowed to run at once.
    pub persist_workers: usize,
    pub decoder: DecoderConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            read_size: 128,
            max_sessions: 1024,
            idle_timeout: Some(Duration::from_secs(600)),
            framing: Framing::default(),
            flush_after: Duration::from_millis(250),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            persist_workers: 4,
            decoder: DecoderConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.read_size == 0 {
            return Err(ServerError::Config("read size must be at least 1".into()));
        }
        if self.max_sessions == 0 {
            return Err(ServerError::Config("max sessions must be at least 1".into()));
        }
        if self.persist_workers == 0 {
            return Err(ServerError::Config("persist workers must be at least 1".into()));
        }
        if self.max_frame_len < self.read_size && self.framing == Framing::Delimited {
            return Err(ServerError::Config(format!(
                "max frame length {} is smaller than read size {}",
                self.max_frame_len, self.read_size
            )));
        }
        if !CENTURY_BASE_RANGE.contains(&self.decoder.century_base) {
            return Err(ServerError::Config(format!(
                "century base {} is outside {}..={}",
                self.decoder.century_base,
                CENTURY_BASE_RANGE.start(),
                CENTURY_BASE_RANGE.end()
            )));
        }
        Ok(())
    }
}

/// Where decoded locations are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SinkKind {
    /// Log every record.
    Log,
    /// Append JSON lines to `--jsonl-path`.
    Jsonl,
}

#[derive(Parser, Debug)]
#[command(name = "tk-tracker", about = "TK102/TK103 GPS tracker server", version)]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "TK_LISTEN", default_value = "0.0.0.0:7331")]
    pub listen: SocketAddr,

    /// Maximum concurrently open device sessions
    #[arg(long, env = "TK_MAX_SESSIONS", default_value_t = 1024)]
    pub max_sessions: usize,

    /// Seconds a session may stay silent before it is closed (0 = never)
    #[arg(long, env = "TK_IDLE_TIMEOUT", default_value_t = 600)]
    pub idle_timeout: u64,

    /// Frame boundaries: per-read or delimited
    #[arg(long, env = "TK_FRAMING", default_value_t = Framing::Delimited)]
    pub framing: Framing,

    /// Milliseconds of silence before unterminated bytes are decoded
    #[arg(long, env = "TK_FLUSH_AFTER_MS", default_value_t = 250)]
    pub flush_after_ms: u64,

    /// Longest unterminated frame kept before it is discarded
    #[arg(long, env = "TK_MAX_FRAME_LEN", default_value_t = DEFAULT_MAX_FRAME_LEN)]
    pub max_frame_len: usize,

    /// Bytes taken from a socket per read
    #[arg(long, env = "TK_READ_SIZE", default_value_t = 128)]
    pub read_size: usize,

    /// Sink calls allowed to run at once
    #[arg(long, env = "TK_PERSIST_WORKERS", default_value_t = 4)]
    pub persist_workers: usize,

    /// Acknowledge every location report, not only alarms
    #[arg(long, env = "TK_ACK_EVERY_LOCATION")]
    pub ack_every_location: bool,

    /// Reply sent for non-alarm reports with --ack-every-location
    #[arg(long, env = "TK_LOCATION_REPLY", default_value = DEFAULT_LOCATION_REPLY)]
    pub location_reply: String,

    /// Year added to two-digit device years
    #[arg(long, env = "TK_CENTURY_BASE", default_value_t = DEFAULT_CENTURY_BASE)]
    pub century_base: i32,

    /// Source tag stored with each record
    #[arg(long, env = "TK_SOURCE_PROTOCOL", default_value = DEFAULT_SOURCE_PROTOCOL)]
    pub source_protocol: String,

    /// Where decoded locations are stored
    #[arg(long, env = "TK_SINK", value_enum, default_value_t = SinkKind::Log)]
    pub sink: SinkKind,

    /// Output file for --sink jsonl
    #[arg(long, env = "TK_JSONL_PATH", default_value = "locations.jsonl")]
    pub jsonl_path: PathBuf,
}

impl Args {
    pub fn server_config(&self) -> Result<ServerConfig> {
        let location_ack = if self.ack_every_location {
            LocationAckPolicy::Always {
                reply: self.location_reply.clone(),
            }
        } else {
            LocationAckPolicy::AlarmOnly
        };

        let config = ServerConfig {
            listen_addr: self.listen,
            read_size: self.read_size,
            max_sessions: self.max_sessions,
            idle_timeout: (self.idle_timeout > 0).then(|| Duration::from_secs(self.idle_timeout)),
            framing: self.framing,
            flush_after: Duration::from_millis(self.flush_after_ms),
            max_frame_len: self.max_frame_len,
            persist_workers: self.persist_workers,
            decoder: DecoderConfig {
                location_ack,
                century_base: self.century_base,
                source_protocol: self.source_protocol.clone(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn open_sink(&self) -> std::result::Result<Arc<dyn LocationSink>, PersistError> {
        Ok(match self.sink {
            SinkKind::Log => Arc::new(LogSink::new()),
            SinkKind::Jsonl => Arc::new(JsonLinesSink::open(&self.jsonl_path)?),
        })
    }
}

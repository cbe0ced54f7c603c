use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, trace, warn};
use tk_protocol::{DecodedFrame, Decoder, FrameBuffer, LocationRecord};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::Semaphore;

use crate::config::ServerConfig;
use crate::error::PersistError;
use crate::response;
use crate::sink::{LocationSink, RecordId};

pub type SessionId = u64;

/// Identity of one device connection.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: SessionId,
    pub peer: SocketAddr,
    pub created_at: DateTime<Utc>,
}

impl fmt::Display for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.id, self.peer)
    }
}

/// Why a session ended.
#[derive(Debug)]
pub enum CloseReason {
    /// Zero-length read.
    PeerClosed,
    /// Nothing received within the idle timeout.
    Idle(Duration),
    Io(io::Error),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "closed by peer"),
            Self::Idle(limit) => write!(f, "idle for {}s", limit.as_secs_f64()),
            Self::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

/// State shared by every session of one server.
pub struct SessionContext {
    config: ServerConfig,
    decoder: Decoder,
    sink: Arc<dyn LocationSink>,
    persist_permits: Semaphore,
}

impl SessionContext {
    pub fn new(config: ServerConfig, sink: Arc<dyn LocationSink>) -> Self {
        Self {
            decoder: Decoder::new(config.decoder.clone()),
            persist_permits: Semaphore::new(config.persist_workers),
            config,
            sink,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Hand a record to the sink on the blocking pool.
    ///
    /// At most `persist_workers` saves run at once; callers wait for a slot.
    pub async fn persist(&self, record: LocationRecord) -> Result<RecordId, PersistError> {
        let _permit = self
            .persist_permits
            .acquire()
            .await
            .map_err(|e| PersistError::Worker(e.to_string()))?;

        let sink = Arc::clone(&self.sink);
        tokio::task::spawn_blocking(move || sink.save(&record))
            .await
            .map_err(|e| PersistError::Worker(e.to_string()))?
    }
}

enum ReadOutcome {
    Data(usize),
    /// Unterminated bytes are pending and the peer went quiet.
    Quiet,
    Closed(CloseReason),
}

/// One device connection.
///
/// Frames are handled one at a time in arrival order: decode, persist,
/// ack, then the next read.
pub struct Session<S> {
    info: SessionInfo,
    stream: S,
    frames: FrameBuffer,
    buf: Vec<u8>,
    ctx: Arc<SessionContext>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(info: SessionInfo, stream: S, ctx: Arc<SessionContext>) -> Self {
        let config = ctx.config();
        Self {
            info,
            stream,
            frames: FrameBuffer::new(config.framing, config.max_frame_len),
            buf: vec![0u8; config.read_size],
            ctx,
        }
    }

    /// Serve the connection until it closes.
    pub async fn run(mut self) -> CloseReason {
        loop {
            match self.read().await {
                ReadOutcome::Data(n) => {
                    let frames = self.frames.push(&self.buf[..n]);
                    for frame in frames {
                        self.handle_frame(&frame).await;
                    }
                }
                ReadOutcome::Quiet => {
                    if let Some(frame) = self.frames.flush() {
                        self.handle_frame(&frame).await;
                    }
                }
                ReadOutcome::Closed(reason) => {
                    // Bytes held without a delimiter are the last frame.
                    if let Some(frame) = self.frames.flush() {
                        self.handle_frame(&frame).await;
                    }
                    return reason;
                }
            }
        }
    }

    /// One bounded read, limited by the quiet period while bytes are
    /// pending and by the idle timeout otherwise.
    async fn read(&mut self) -> ReadOutcome {
        let pending = self.frames.has_pending();
        let limit = if pending {
            Some(self.ctx.config.flush_after)
        } else {
            self.ctx.config.idle_timeout
        };

        let read = self.stream.read(&mut self.buf);
        let result = match limit {
            Some(limit) => match tokio::time::timeout(limit, read).await {
                Ok(result) => result,
                Err(_) if pending => return ReadOutcome::Quiet,
                Err(_) => return ReadOutcome::Closed(CloseReason::Idle(limit)),
            },
            None => read.await,
        };

        match result {
            Ok(0) => ReadOutcome::Closed(CloseReason::PeerClosed),
            Ok(n) => {
                trace!("[{}] RX {} bytes: {:?}", self.info, n, &self.buf[..n]);
                ReadOutcome::Data(n)
            }
            Err(e) => ReadOutcome::Closed(CloseReason::Io(e)),
        }
    }

    async fn handle_frame(&mut self, raw: &[u8]) {
        debug!("[{}] data: {:?}", self.info, String::from_utf8_lossy(raw));

        let decoded = match self.ctx.decoder.decode(raw) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!("[{}] dropping frame: {e}", self.info);
                return;
            }
        };

        match &decoded.frame {
            DecodedFrame::Heartbeat { imei } => debug!("[{}] heartbeat from {imei}", self.info),
            DecodedFrame::Handshake { imei } => debug!("[{}] handshake from {imei}", self.info),
            DecodedFrame::LocationReport { imei, alarm, .. } => {
                debug!("[{}] location from {imei} ({alarm})", self.info)
            }
            DecodedFrame::Unrecognized => {}
        }

        if let Some(record) = self.ctx.decoder.record(&decoded.frame) {
            match self.ctx.persist(record).await {
                Ok(id) => debug!("[{}] saved location {id}", self.info),
                Err(e) => error!("[{}] failed to save location: {e}", self.info),
            }
        }

        response::write_ack(&mut self.stream, &decoded.ack, &self.info).await;
    }
}

#[cfg(test)]
mod tests {
    use tk_protocol::Framing;
    use tokio::io::{AsyncWriteExt, DuplexStream};
    use tokio::task::JoinHandle;

    use super::*;
    use crate::sink::MemorySink;

    const SAMPLE: &str = "imei:359710049095095,tracker,151006012336,,F,172337.000,A,5105.9792,N,11404.9599,W,0.01,322.56,,0,0,,,";

    struct FailingSink;

    impl LocationSink for FailingSink {
        fn save(&self, _record: &LocationRecord) -> Result<RecordId, PersistError> {
            Err(PersistError::Rejected("database unavailable".into()))
        }
    }

    fn test_config() -> ServerConfig {
        ServerConfig {
            flush_after: Duration::from_millis(20),
            ..ServerConfig::default()
        }
    }

    fn start(config: ServerConfig, sink: Arc<dyn LocationSink>) -> (DuplexStream, JoinHandle<CloseReason>) {
        let (server, device) = tokio::io::duplex(1024);
        let info = SessionInfo {
            id: 1,
            peer: SocketAddr::from(([127, 0, 0, 1], 40000)),
            created_at: Utc::now(),
        };
        let ctx = Arc::new(SessionContext::new(config, sink));
        let session = Session::new(info, server, ctx);
        (device, tokio::spawn(session.run()))
    }

    async fn expect_reply(device: &mut DuplexStream, expected: &[u8]) {
        let mut buf = vec![0u8; expected.len()];
        tokio::time::timeout(Duration::from_secs(2), device.read_exact(&mut buf))
            .await
            .expect("timed out waiting for reply")
            .unwrap();
        assert_eq!(buf, expected);
    }

    #[tokio::test]
    async fn test_unterminated_heartbeat_is_flushed() {
        let (mut device, _task) = start(test_config(), Arc::new(MemorySink::new()));
        device.write_all(b"359710049095095").await.unwrap();
        expect_reply(&mut device, b"ON").await;
    }

    #[tokio::test]
    async fn test_per_read_framing() {
        let config = ServerConfig {
            framing: Framing::PerRead,
            flush_after: Duration::from_secs(60),
            ..ServerConfig::default()
        };
        let (mut device, _task) = start(config, Arc::new(MemorySink::new()));
        device.write_all(b"##,imei:359710049095095,A").await.unwrap();
        expect_reply(&mut device, b"LOAD").await;
    }

    #[tokio::test]
    async fn test_frames_handled_in_order() {
        let sink = Arc::new(MemorySink::new());
        let (mut device, _task) = start(test_config(), sink.clone());

        let second = SAMPLE.replace("151006012336", "151006012337");
        let third = SAMPLE.replace("151006012336", "151006012338");
        let data = format!("##,imei:359710049095095,A;{SAMPLE};{second};{third};359710049095095;");
        device.write_all(data.as_bytes()).await.unwrap();

        // Location reports are not acked, so LOAD is followed directly by ON.
        expect_reply(&mut device, b"LOADON").await;

        let seconds: Vec<_> = sink
            .records()
            .iter()
            .map(|r| r.timestamp_utc.format("%S").to_string())
            .collect();
        assert_eq!(seconds, vec!["36", "37", "38"]);
    }

    #[tokio::test]
    async fn test_malformed_location_keeps_session_open() {
        let sink = Arc::new(MemorySink::new());
        let (mut device, task) = start(test_config(), sink.clone());

        let bad = SAMPLE.replace("5105.9792", "bogus");
        device.write_all(format!("{bad};").as_bytes()).await.unwrap();
        device.write_all(b"359710049095095;").await.unwrap();
        expect_reply(&mut device, b"ON").await;

        assert!(sink.is_empty());
        assert!(!task.is_finished());
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_block_ack() {
        let (mut device, _task) = start(test_config(), Arc::new(FailingSink));
        let alarm = SAMPLE.replace(",tracker,", ",help me,");
        device.write_all(format!("{alarm};").as_bytes()).await.unwrap();
        expect_reply(&mut device, b"**,imei:359710049095095,E;").await;
    }

    #[tokio::test]
    async fn test_held_report_saved_on_close() {
        let sink = Arc::new(MemorySink::new());
        let config = ServerConfig {
            flush_after: Duration::from_secs(60),
            ..ServerConfig::default()
        };
        let (mut device, task) = start(config, sink.clone());
        device.write_all(SAMPLE.as_bytes()).await.unwrap();
        device.shutdown().await.unwrap();

        let reason = task.await.unwrap();
        assert!(matches!(reason, CloseReason::PeerClosed), "{reason}");
        assert_eq!(sink.len(), 1);
    }

    #[tokio::test]
    async fn test_peer_close_ends_session() {
        let (device, task) = start(test_config(), Arc::new(MemorySink::new()));
        drop(device);
        let reason = task.await.unwrap();
        assert!(matches!(reason, CloseReason::PeerClosed), "{reason}");
    }

    #[tokio::test]
    async fn test_idle_session_is_closed() {
        let config = ServerConfig {
            idle_timeout: Some(Duration::from_millis(50)),
            ..test_config()
        };
        let (_device, task) = start(config, Arc::new(MemorySink::new()));
        let reason = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(reason, CloseReason::Idle(_)), "{reason}");
    }

    #[tokio::test]
    async fn test_persist_limited_by_permits() {
        let sink = Arc::new(MemorySink::new());
        let ctx = SessionContext::new(
            ServerConfig {
                persist_workers: 1,
                ..ServerConfig::default()
            },
            sink.clone(),
        );
        let record = ctx
            .decoder
            .record(&ctx.decoder.decode_str(SAMPLE).unwrap().frame)
            .unwrap();
        let id = ctx.persist(record).await.unwrap();
        assert_eq!(id, RecordId(1));
        assert_eq!(ctx.persist_permits.available_permits(), 1);
    }
}

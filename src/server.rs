use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{self, JoinError, JoinSet};
use tokio::time::{self, Instant};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::session::{CloseReason, Session, SessionContext, SessionId, SessionInfo};
use crate::sink::LocationSink;

/// Pause in accepting after a failure so a persistent one (e.g. out of file
/// descriptors) does not spin the loop. Sessions and shutdown are still
/// serviced meanwhile.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The connection multiplexer.
///
/// Owns the listening socket and the set of active sessions. Each session
/// runs in its own task; only this loop adds to or removes from the set.
pub struct Server {
    listener: TcpListener,
    ctx: Arc<SessionContext>,
    tasks: JoinSet<CloseReason>,
    sessions: HashMap<task::Id, SessionInfo>,
    last_id: SessionId,
    active: watch::Sender<usize>,
    accept_paused_until: Option<Instant>,
}

impl Server {
    /// Validate the configuration and bind the listening socket.
    pub async fn bind(config: ServerConfig, sink: Arc<dyn LocationSink>) -> Result<Self> {
        config.validate()?;

        let addr = config.listen_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        info!("listening on {}", listener.local_addr()?);

        let (active, _) = watch::channel(0);
        Ok(Self {
            listener,
            ctx: Arc::new(SessionContext::new(config, sink)),
            tasks: JoinSet::new(),
            sessions: HashMap::new(),
            last_id: 0,
            active,
            accept_paused_until: None,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Number of open sessions, updated whenever one is added or removed.
    pub fn active_sessions(&self) -> watch::Receiver<usize> {
        self.active.subscribe()
    }

    /// Serve forever.
    pub async fn run(self) {
        self.run_until(std::future::pending()).await;
    }

    /// Serve until `shutdown` completes, then close every session.
    pub async fn run_until<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = time::sleep_until(self.accept_paused_until.unwrap_or_else(Instant::now)),
                    if self.accept_paused_until.is_some() =>
                {
                    self.accept_paused_until = None;
                }
                accepted = self.listener.accept(), if self.accept_paused_until.is_none() => {
                    match accepted {
                        Ok((stream, peer)) => self.admit(stream, peer),
                        Err(e) => self.accept_failed(&e),
                    }
                }
                Some(joined) = self.tasks.join_next_with_id(), if !self.tasks.is_empty() => {
                    self.remove(joined);
                }
            }
        }

        info!("shutting down, closing {} session(s)", self.sessions.len());
        self.tasks.shutdown().await;
        self.sessions.clear();
        self.publish();
    }

    fn accept_failed(&mut self, e: &io::Error) {
        warn!("accept failed: {e}, pausing for {}ms", ACCEPT_BACKOFF.as_millis());
        self.accept_paused_until = Some(Instant::now() + ACCEPT_BACKOFF);
    }

    fn admit(&mut self, stream: TcpStream, peer: SocketAddr) {
        if self.sessions.len() >= self.ctx.config().max_sessions {
            warn!(
                "rejecting {peer}: session limit of {} reached",
                self.ctx.config().max_sessions
            );
            return;
        }

        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed for {peer}: {e}");
        }

        self.last_id += 1;
        let info = SessionInfo {
            id: self.last_id,
            peer,
            created_at: Utc::now(),
        };

        let session = Session::new(info.clone(), stream, Arc::clone(&self.ctx));
        let handle = self.tasks.spawn(session.run());
        self.sessions.insert(handle.id(), info.clone());
        info!("new connection: {info}, total clients: {}", self.sessions.len());
        self.publish();
    }

    fn remove(&mut self, joined: std::result::Result<(task::Id, CloseReason), JoinError>) {
        let (task_id, outcome) = match joined {
            Ok((task_id, reason)) => (task_id, Ok(reason)),
            Err(e) => (e.id(), Err(e)),
        };

        let Some(info) = self.sessions.remove(&task_id) else {
            debug!("finished task {task_id} is not a known session");
            return;
        };

        match outcome {
            Ok(reason) => info!(
                "client {info} disconnected ({reason}), total clients: {}",
                self.sessions.len()
            ),
            Err(e) => error!(
                "session {info} failed: {e}, total clients: {}",
                self.sessions.len()
            ),
        }
        self.publish();
    }

    fn publish(&self) {
        self.active.send_replace(self.sessions.len());
    }
}

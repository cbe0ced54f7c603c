pub mod config;
pub mod error;
pub mod response;
pub mod server;
pub mod session;
pub mod sink;

pub use config::ServerConfig;
pub use error::{PersistError, Result, ServerError};
pub use server::Server;
pub use session::{CloseReason, Session, SessionContext, SessionInfo};
pub use sink::{JsonLinesSink, LocationSink, LogSink, MemorySink, RecordId};

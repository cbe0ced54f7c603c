use log::{trace, warn};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::session::SessionInfo;

/// Send an ack to a device.
///
/// Empty acks are not written. Write errors are logged and swallowed; a dead
/// peer is noticed by the next read, which closes the session.
pub async fn write_ack<W>(writer: &mut W, ack: &[u8], session: &SessionInfo)
where
    W: AsyncWrite + Unpin,
{
    if ack.is_empty() {
        return;
    }

    let result = match writer.write_all(ack).await {
        Ok(()) => writer.flush().await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => trace!("[{session}] TX: {:?}", String::from_utf8_lossy(ack)),
        Err(e) => warn!("[{session}] failed to send ack: {e}"),
    }
}

//! Newline-delimited JSON framing

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::protocol::MAX_FRAME_LEN;
use crate::error::TransportError;

pub async fn write_frame<W, T>(writer: &mut W, value: &T) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut line = serde_json::to_vec(value)
        .map_err(|e| TransportError::Protocol(format!("failed to encode frame: {}", e)))?;
    if line.len() > MAX_FRAME_LEN {
        return Err(TransportError::Protocol(format!(
            "frame of {} bytes exceeds the {} byte limit",
            line.len(),
            MAX_FRAME_LEN
        )));
    }
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame; `None` on a clean end of stream
pub async fn read_frame<R, T>(reader: &mut R) -> Result<Option<T>, TransportError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = Vec::new();
    let read = (&mut *reader)
        .take(MAX_FRAME_LEN as u64 + 1)
        .read_until(b'\n', &mut line)
        .await?;
    if read == 0 {
        return Ok(None);
    }
    if line.last() != Some(&b'\n') {
        return Err(TransportError::Protocol(if line.len() > MAX_FRAME_LEN {
            "frame exceeds the size limit".to_string()
        } else {
            "connection closed mid-frame".to_string()
        }));
    }

    serde_json::from_slice(&line)
        .map(Some)
        .map_err(|e| TransportError::Protocol(format!("malformed frame: {}", e)))
}

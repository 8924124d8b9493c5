//! Length-delimited JSON frame codec.
//!
//! Every message on a plugin channel is one frame: a big-endian `u32`
//! length prefix followed by that many bytes of JSON encoding a [`Frame`].
//! Sequence numbers pair each request with its response so a single
//! connection can carry overlapping unary calls.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{WireError, WireResult};
use crate::proto::{MsgRequest, MsgResponse};

/// Upper bound on a single frame. A config map or payload bigger than this
/// indicates a runaway producer, not a legitimate message.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// One frame on the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Frame {
    /// A unary call; `seq` is echoed by the matching response.
    Request { seq: u64, msg: MsgRequest },
    /// The answer to the request carrying the same `seq`.
    Response { seq: u64, msg: MsgResponse },
}

/// Reads one frame. Returns [`WireError::Closed`] on a clean EOF at a
/// frame boundary.
pub async fn read_frame<R>(reader: &mut R) -> WireResult<Frame>
where
    R: AsyncRead + Unpin,
{
    let len = match reader.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::Closed);
        }
        Err(e) => return Err(e.into()),
    };
    if len > MAX_FRAME_LEN {
        return Err(WireError::Oversized { len });
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(serde_json::from_slice(&buf)?)
}

/// Writes one frame and flushes it.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> WireResult<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(frame)?;
    let len = u32::try_from(body.len()).map_err(|_| WireError::Oversized { len: u32::MAX })?;
    if len > MAX_FRAME_LEN {
        return Err(WireError::Oversized { len });
    }
    writer.write_u32(len).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

//! Length-prefixed framing for the prefork monitor's pipe to its child:
//! a 4-byte big-endian length followed by that many payload bytes. Used in
//! both directions — monitor → child carries a serialized task, child →
//! monitor carries a [`ResultFrame`].

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub(crate) async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, payload: &[u8]) -> std::io::Result<()> {
    w.write_u32(payload.len() as u32).await?;
    w.write_all(payload).await?;
    w.flush().await
}

/// Returns `Ok(None)` on a clean EOF before any length prefix was read —
/// the prefork child's normal way of signaling "no more tasks."
pub(crate) async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> std::io::Result<Option<Vec<u8>>> {
    let len = match r.read_u32().await {
        Ok(len) => len,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };

    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

/// What the child writes back after executing one task.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) enum ResultFrame {
    Ok(Option<serde_json::Value>),
    Err(String),
}

impl ResultFrame {
    pub(crate) fn encode(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("ResultFrame always serializes")
    }

    pub(crate) fn decode(bytes: &[u8]) -> Result<ResultFrame, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

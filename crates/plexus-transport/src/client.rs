//! RPC client: the calling side of a plugin channel.
//!
//! One [`RpcClient`] wraps one stream. Requests are multiplexed by
//! sequence number: a background reader task resolves each incoming
//! response against the pending-call table, so overlapping calls from
//! different tasks share the connection safely.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{WireError, WireResult};
use crate::frame::{Frame, read_frame, write_frame};
use crate::proto::{MsgRequest, MsgResponse};

type PendingCalls = Arc<Mutex<HashMap<u64, oneshot::Sender<MsgResponse>>>>;

/// The calling side of a unary `Request(MsgRequest) → MsgResponse` channel.
pub struct RpcClient {
    seq: AtomicU64,
    pending: PendingCalls,
    writer: tokio::sync::Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    reader: JoinHandle<()>,
}

impl RpcClient {
    /// Wraps an established stream.
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let pending: PendingCalls = Arc::new(Mutex::new(HashMap::new()));
        let reader = tokio::spawn(read_loop(read_half, Arc::clone(&pending)));
        Self {
            seq: AtomicU64::new(1),
            pending,
            writer: tokio::sync::Mutex::new(Box::new(write_half)
                as Box<dyn AsyncWrite + Send + Unpin>),
            reader,
        }
    }

    /// Connects to a loopback TCP endpoint and wraps the stream.
    pub async fn connect(addr: std::net::SocketAddr) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self::new(stream))
    }

    /// Issues one unary request and awaits its response.
    pub async fn request(&self, msg: MsgRequest) -> WireResult<MsgResponse> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(seq, tx);

        let frame = Frame::Request { seq, msg };
        let write_result = {
            let mut writer = self.writer.lock().await;
            write_frame(&mut *writer, &frame).await
        };
        if let Err(e) = write_result {
            self.pending.lock().remove(&seq);
            return Err(e);
        }

        rx.await.map_err(|_| WireError::Closed)
    }

    /// Tears the channel down. In-flight calls resolve with
    /// [`WireError::Closed`].
    pub fn shutdown(&self) {
        self.reader.abort();
        self.pending.lock().clear();
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop<R>(mut reader: R, pending: PendingCalls)
where
    R: AsyncRead + Send + Unpin,
{
    loop {
        match read_frame(&mut reader).await {
            Ok(Frame::Response { seq, msg }) => {
                let Some(tx) = pending.lock().remove(&seq) else {
                    warn!(seq, "response for unknown call");
                    continue;
                };
                // A dropped receiver just means the caller gave up waiting.
                let _ = tx.send(msg);
            }
            Ok(Frame::Request { seq, .. }) => {
                warn!(seq, "peer sent a request on a client-only channel");
            }
            Err(WireError::Closed) => {
                debug!("rpc channel closed");
                break;
            }
            Err(e) => {
                warn!(error = %e, "rpc channel broke");
                break;
            }
        }
    }
    // Resolve every outstanding call with Closed by dropping its sender.
    pending.lock().clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_core::JsonMap;

    fn request(kind: &str) -> MsgRequest {
        MsgRequest {
            id: "msg-1".into(),
            from: String::new(),
            to: "echo".into(),
            kind: kind.into(),
            ttl: 0,
            request: JsonMap::new(),
        }
    }

    /// Answers requests in pairs, each pair in reverse arrival order, to
    /// exercise sequence-number correlation.
    async fn echo_peer<S>(stream: S)
    where
        S: AsyncRead + AsyncWrite + Send + Unpin,
    {
        let (mut r, mut w) = tokio::io::split(stream);
        loop {
            let Ok(Frame::Request { seq, msg }) = read_frame(&mut r).await else {
                break;
            };
            let first = (seq, MsgResponse::empty(&msg));
            if let Ok(Frame::Request { seq, msg }) = read_frame(&mut r).await {
                let resp = MsgResponse::empty(&msg);
                write_frame(&mut w, &Frame::Response { seq, msg: resp })
                    .await
                    .unwrap();
            }
            write_frame(&mut w, &Frame::Response {
                seq: first.0,
                msg: first.1,
            })
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn overlapping_calls_correlate_by_sequence() {
        let (near, far) = tokio::io::duplex(8192);
        tokio::spawn(echo_peer(far));
        let client = Arc::new(RpcClient::new(near));

        let calls: Vec<_> = (0..6)
            .map(|n| {
                let client = Arc::clone(&client);
                tokio::spawn(async move { client.request(request(&format!("kind-{n}"))).await })
            })
            .collect();
        for (n, call) in calls.into_iter().enumerate() {
            let resp = call.await.unwrap().unwrap();
            assert_eq!(resp.kind, format!("kind-{n}"));
        }
    }

    #[tokio::test]
    async fn peer_hangup_resolves_pending_calls() {
        let (near, far) = tokio::io::duplex(8192);
        let client = RpcClient::new(near);
        drop(far);
        let err = client.request(request("func_stop")).await.unwrap_err();
        assert!(matches!(err, WireError::Closed | WireError::Io(_)));
    }
}

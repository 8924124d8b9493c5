//! RPC server: the answering side of a plugin channel.
//!
//! [`serve_connection`] drives one established stream: it reads request
//! frames, hands each to the [`RequestHandler`], and writes the response
//! frame carrying the same sequence number. Requests are handled on their
//! own tasks so a slow handler does not stall the channel.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, WriteHalf};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{WireError, WireResult};
use crate::frame::{Frame, read_frame, write_frame};
use crate::proto::{MsgRequest, MsgResponse};

/// Answers unary requests arriving on a channel.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Handles one request. Infallible at this layer: errors travel inside
    /// the response body's `error` key.
    async fn handle(&self, request: MsgRequest) -> MsgResponse;
}

/// Serves one connection until the peer closes it or `shutdown` fires.
///
/// A clean peer close resolves to `Ok(())`; transport failures surface as
/// errors so the caller can distinguish an orderly teardown from a broken
/// channel.
pub async fn serve_connection<S>(
    stream: S,
    handler: Arc<dyn RequestHandler>,
    shutdown: CancellationToken,
) -> WireResult<()>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, writer) = tokio::io::split(stream);
    let writer = Arc::new(tokio::sync::Mutex::new(writer));

    loop {
        let frame = tokio::select! {
            () = shutdown.cancelled() => return Ok(()),
            frame = read_frame(&mut reader) => frame,
        };
        match frame {
            Ok(Frame::Request { seq, msg }) => {
                let handler = Arc::clone(&handler);
                let writer = Arc::clone(&writer);
                tokio::spawn(async move {
                    let response = handler.handle(msg).await;
                    if let Err(e) = respond(&writer, seq, response).await {
                        warn!(seq, error = %e, "failed to write response");
                    }
                });
            }
            Ok(Frame::Response { seq, .. }) => {
                warn!(seq, "peer sent a response on a server-only channel");
            }
            Err(WireError::Closed) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

async fn respond<S>(
    writer: &tokio::sync::Mutex<WriteHalf<S>>,
    seq: u64,
    msg: MsgResponse,
) -> WireResult<()>
where
    S: AsyncWrite,
{
    let mut writer = writer.lock().await;
    write_frame(&mut *writer, &Frame::Response { seq, msg }).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RpcClient;
    use plexus_core::{JsonMap, Reply};

    struct NameHandler;

    #[async_trait]
    impl RequestHandler for NameHandler {
        async fn handle(&self, request: MsgRequest) -> MsgResponse {
            MsgResponse::for_request(&request, &Reply::ok().with("name", "echo"))
        }
    }

    #[tokio::test]
    async fn client_and_server_complete_a_unary_call() {
        let (near, far) = tokio::io::duplex(8192);
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve_connection(
            far,
            Arc::new(NameHandler),
            shutdown.clone(),
        ));

        let client = RpcClient::new(near);
        let resp = client
            .request(MsgRequest {
                id: "msg-1".into(),
                from: String::new(),
                to: "echo".into(),
                kind: "func_modulename".into(),
                ttl: 0,
                request: JsonMap::new(),
            })
            .await
            .unwrap();
        let reply = resp.into_reply();
        assert_eq!(reply.get("name").and_then(|v| v.as_str()), Some("echo"));

        shutdown.cancel();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn server_returns_ok_when_peer_disconnects() {
        let (near, far) = tokio::io::duplex(64);
        let server = tokio::spawn(serve_connection(
            far,
            Arc::new(NameHandler),
            CancellationToken::new(),
        ));
        drop(near);
        server.await.unwrap().unwrap();
    }
}

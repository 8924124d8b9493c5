//! Request dispatch inside a subprocess plugin.
//!
//! The [`GuestServer`] answers the host's unary calls: lifecycle
//! operations act on the wrapped [`Plugin`], and any other message type is
//! delivered into the plugin's inbox. `func_start` is the interesting one:
//! it dials the host's broker endpoint, wires up the plugin's mailbox
//! pair, and launches the start task and the outbound forwarder before
//! replying, because the host must never block on a running `start`.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use plexus_core::{
    DEFAULT_MAILBOX_CAPACITY, Envelope, Payload, PluginIo, Reply, SharedPlugin,
};
use plexus_transport::{Broker, MsgRequest, MsgResponse, RequestHandler, RpcClient};

/// State that exists only between `func_start` and `ctx_done`.
struct Running {
    /// Feeds envelopes into the plugin's inbox.
    inbox: mpsc::Sender<Envelope>,
    /// Cancels the plugin's start task.
    cancel: CancellationToken,
    /// Callback channel to the host.
    callback: Arc<RpcClient>,
}

/// Serves the host's requests against one plugin instance.
pub struct GuestServer {
    plugin: SharedPlugin,
    running: Mutex<Option<Running>>,
}

impl GuestServer {
    /// Wraps a plugin instance for serving.
    pub fn new(plugin: SharedPlugin) -> Self {
        Self {
            plugin,
            running: Mutex::new(None),
        }
    }

    async fn handle_start(&self, broker: u32) -> Reply {
        let callback = match Broker::dial(broker).await {
            Ok(stream) => Arc::new(RpcClient::new(stream)),
            Err(e) => return Reply::err(format!("failed to dial broker {broker}: {e}")),
        };

        let (inbox_tx, inbox_rx) = mpsc::channel(DEFAULT_MAILBOX_CAPACITY);
        let (outbox_tx, outbox_rx) = mpsc::channel(DEFAULT_MAILBOX_CAPACITY);
        let cancel = CancellationToken::new();

        {
            let mut running = self.running.lock();
            if running.is_some() {
                return Reply::err("plugin already started");
            }
            *running = Some(Running {
                inbox: inbox_tx,
                cancel: cancel.clone(),
                callback: Arc::clone(&callback),
            });
        }

        let io = PluginIo {
            inbox: inbox_rx,
            outbox: outbox_tx,
            cancel: cancel.clone(),
        };
        tokio::spawn(start_wrapper(
            Arc::clone(&self.plugin),
            io,
            Arc::clone(&callback),
        ));
        tokio::spawn(outbound_forwarder(outbox_rx, callback, cancel));

        Reply::ok()
    }

    fn handle_ctx_done(&self) -> Reply {
        match self.running.lock().take() {
            Some(running) => {
                running.cancel.cancel();
                running.callback.shutdown();
                Reply::ok()
            }
            None => Reply::err("plugin is not running"),
        }
    }

    async fn deliver(&self, envelope: Envelope) -> Reply {
        let inbox = match &*self.running.lock() {
            Some(running) => running.inbox.clone(),
            None => return Reply::err("plugin is not running"),
        };
        match inbox.send(envelope).await {
            Ok(()) => Reply::ok(),
            Err(_) => Reply::err("plugin inbox is closed"),
        }
    }
}

#[async_trait]
impl RequestHandler for GuestServer {
    async fn handle(&self, request: MsgRequest) -> MsgResponse {
        let payload = match Payload::from_wire(&request.kind, request.request.clone()) {
            Ok(payload) => payload,
            Err(e) => return MsgResponse::for_request(&request, &Reply::err(e)),
        };

        let reply = match payload {
            Payload::ModuleName => Reply::ok().with("name", self.plugin.name()),
            Payload::SetEnv { key, value } => {
                debug!(key = %key, "setting environment variable");
                // SAFETY: env mutation happens during bring-up, before the
                // plugin's start task and forwarders exist.
                unsafe { std::env::set_var(&key, &value) };
                Reply::ok()
            }
            Payload::Init { config } => Reply::from_result(self.plugin.init(&config).await),
            Payload::Start { broker } => self.handle_start(broker).await,
            Payload::Stop => Reply::from_result(self.plugin.stop().await),
            Payload::CtxDone => self.handle_ctx_done(),
            other => {
                let envelope = Envelope::from_wire_parts(
                    request.id.clone(),
                    request.from.clone(),
                    request.to.clone(),
                    request.ttl,
                    other,
                );
                self.deliver(envelope).await
            }
        };
        MsgResponse::for_request(&request, &reply)
    }
}

/// Runs `start` and reports its return value to the host as a
/// `start_error` message over the callback channel.
async fn start_wrapper(plugin: SharedPlugin, io: PluginIo, callback: Arc<RpcClient>) {
    let result = plugin.start(io).await;
    if let Err(e) = &result {
        error!(plugin = %plugin.name(), error = %e, "start returned an error");
    }
    let envelope = Envelope::oneway(
        plugin.name(),
        Payload::StartError {
            plugin: plugin.name().to_string(),
            error: result.err().map(|e| e.to_string()),
        },
    )
    .with_from(plugin.name());
    if let Err(e) = callback.request(MsgRequest::from_envelope(&envelope)).await {
        warn!(error = %e, "failed to report start result to host");
    }
}

/// Drains the plugin's outbox into the callback channel.
async fn outbound_forwarder(
    mut outbox: mpsc::Receiver<Envelope>,
    callback: Arc<RpcClient>,
    cancel: CancellationToken,
) {
    loop {
        let envelope = tokio::select! {
            () = cancel.cancelled() => break,
            envelope = outbox.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };
        if let Err(e) = callback.request(MsgRequest::from_envelope(&envelope)).await {
            warn!(to = %envelope.to(), error = %e, "failed to forward envelope to host");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_core::{JsonMap, Plugin, PluginResult, kind};
    use plexus_transport::{Frame, read_frame};
    use serde_json::Value;

    /// Echoes `ping` envelopes back as `pong` to their sender.
    struct EchoPlugin;

    #[async_trait]
    impl Plugin for EchoPlugin {
        fn name(&self) -> &str {
            "echo"
        }

        async fn init(&self, _config: &JsonMap) -> PluginResult<()> {
            Ok(())
        }

        async fn start(&self, mut io: PluginIo) -> PluginResult<()> {
            loop {
                tokio::select! {
                    () = io.cancel.cancelled() => return Ok(()),
                    envelope = io.inbox.recv() => {
                        let Some(envelope) = envelope else { return Ok(()) };
                        if let Payload::Custom { kind, .. } = envelope.payload()
                            && kind == "ping"
                        {
                            let pong = Envelope::oneway(
                                envelope.from(),
                                Payload::Custom { kind: "pong".into(), body: JsonMap::new() },
                            )
                            .with_from("echo");
                            let _ = io.outbox.send(pong).await;
                        }
                    }
                }
            }
        }

        async fn stop(&self) -> PluginResult<()> {
            Ok(())
        }
    }

    fn request(kind: &str, body: JsonMap) -> MsgRequest {
        MsgRequest {
            id: "msg-t".into(),
            from: "test".into(),
            to: "echo".into(),
            kind: kind.into(),
            ttl: 0,
            request: body,
        }
    }

    #[tokio::test]
    async fn modulename_and_init_and_stop_reply_inline() {
        let server = GuestServer::new(Arc::new(EchoPlugin));

        let resp = server.handle(request(kind::FUNC_MODULE_NAME, JsonMap::new())).await;
        let reply = resp.into_reply();
        assert_eq!(reply.get("name").and_then(Value::as_str), Some("echo"));

        let resp = server.handle(request(kind::FUNC_INIT, JsonMap::new())).await;
        assert_eq!(resp.into_reply().error(), None);

        let resp = server.handle(request(kind::FUNC_STOP, JsonMap::new())).await;
        assert_eq!(resp.into_reply().error(), None);
    }

    #[tokio::test]
    async fn inbound_message_before_start_is_rejected() {
        let server = GuestServer::new(Arc::new(EchoPlugin));
        let resp = server.handle(request("ping", JsonMap::new())).await;
        assert!(resp.into_reply().error().is_some());
    }

    #[tokio::test]
    async fn start_dials_back_and_routes_ping_to_pong() {
        let broker = Broker::bind().await.unwrap();
        let server = Arc::new(GuestServer::new(Arc::new(EchoPlugin)));

        let mut start_body = JsonMap::new();
        start_body.insert("brokerID".into(), Value::from(broker.id()));
        let handler = Arc::clone(&server);
        let start = tokio::spawn(async move {
            handler.handle(request(kind::FUNC_START, start_body)).await
        });

        // Host side of the callback channel.
        let callback = broker.accept().await.unwrap();
        assert_eq!(start.await.unwrap().into_reply().error(), None);

        // Deliver a ping; the pong must arrive as a request on the callback
        // channel, addressed back to the sender.
        let resp = server.handle(request("ping", JsonMap::new())).await;
        assert_eq!(resp.into_reply().error(), None);

        let (mut read_half, _write_half) = tokio::io::split(callback);
        let frame = read_frame(&mut read_half).await.unwrap();
        match frame {
            Frame::Request { msg, .. } => {
                assert_eq!(msg.kind, "pong");
                assert_eq!(msg.to, "test");
                assert_eq!(msg.from, "echo");
            }
            other => panic!("unexpected frame {other:?}"),
        }

        // ctx_done tears the running state down; a second one errors.
        assert_eq!(
            server
                .handle(request(kind::CTX_DONE, JsonMap::new()))
                .await
                .into_reply()
                .error(),
            None
        );
        assert!(
            server
                .handle(request(kind::CTX_DONE, JsonMap::new()))
                .await
                .into_reply()
                .error()
                .is_some()
        );
    }
}

//! Subprocess plugin hosting: the runner.
//!
//! The runner spawns the plugin binary with the magic cookie in its
//! environment, reads the handshake line off the child's stdout, and
//! connects the primary RPC channel. Lifecycle operations become unary
//! calls on that channel; inter-plugin messages addressed to the plugin
//! are forwarded over it too.
//!
//! Messages flowing the other way arrive on the callback channel: at
//! start time the runner binds a [`Broker`] endpoint, passes its id in the
//! `func_start` request, and serves the connection the plugin dials back.
//! A receive loop splices both directions together:
//!
//! ```text
//!  plugin inbox ──────────────▶ primary channel ──▶ child
//!  child ──▶ callback channel ──▶ recv queue ──▶ service mailbox
//! ```
//!
//! A watchdog owns the child handle: an exit that nobody asked for is
//! synthesized into a `start_error` envelope so the supervisor observes
//! the death even when the plugin had no chance to report it.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::{PluginHandle, find_plugin_binary};
use crate::config::PluginSpec;
use crate::error::{HostError, HostResult};
use plexus_core::{
    DEFAULT_MAILBOX_CAPACITY, Envelope, JsonMap, Payload, PluginIo, Reply, SERVICE_MAILBOX,
};
use plexus_transport::{
    Broker, COOKIE_KEY, COOKIE_VALUE, Handshake, MsgRequest, MsgResponse, RequestHandler,
    RpcClient, serve_connection,
};

/// How long a freshly spawned binary gets to print its handshake line.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// SubprocPlugin
// =============================================================================

/// Host-side handle for a plugin running in a child process.
pub struct SubprocPlugin {
    name: String,
    binary: PathBuf,
    client: Arc<RpcClient>,
    service_tx: mpsc::Sender<Envelope>,
    tasks: TaskTracker,
    child: Mutex<Option<Child>>,
    recv_tx: mpsc::Sender<Envelope>,
    recv_rx: Mutex<Option<mpsc::Receiver<Envelope>>>,
    /// Stops the callback server.
    callback_cancel: CancellationToken,
    /// Tells the watchdog to kill the child instead of reporting its exit.
    kill: CancellationToken,
}

impl SubprocPlugin {
    /// Spawns the plugin binary for `spec` and completes the handshake,
    /// environment injection, and name check.
    pub async fn spawn(
        spec: &PluginSpec,
        service_tx: mpsc::Sender<Envelope>,
        tasks: TaskTracker,
    ) -> HostResult<Self> {
        let binary = find_plugin_binary(&spec.name, &spec.plugin_path).ok_or_else(|| {
            HostError::BinaryNotFound {
                name: spec.name.clone(),
                path: spec.plugin_path.clone(),
            }
        })?;
        debug!(plugin = %spec.name, binary = %binary.display(), "spawning plugin process");

        let mut child = Command::new(&binary)
            .env(COOKIE_KEY, COOKIE_VALUE)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        match Self::establish(&mut child, spec, &binary, &tasks).await {
            Ok((client, name)) => {
                info!(plugin = %name, binary = %binary.display(), "subprocess plugin ready");
                let (recv_tx, recv_rx) = mpsc::channel(DEFAULT_MAILBOX_CAPACITY);
                Ok(Self {
                    name,
                    binary,
                    client: Arc::new(client),
                    service_tx,
                    tasks,
                    child: Mutex::new(Some(child)),
                    recv_tx,
                    recv_rx: Mutex::new(Some(recv_rx)),
                    callback_cancel: CancellationToken::new(),
                    kill: CancellationToken::new(),
                })
            }
            Err(e) => {
                let _ = child.start_kill();
                Err(e)
            }
        }
    }

    /// Handshake + primary channel + env + name check.
    async fn establish(
        child: &mut Child,
        spec: &PluginSpec,
        binary: &std::path::Path,
        tasks: &TaskTracker,
    ) -> HostResult<(RpcClient, String)> {
        let stdout = child.stdout.take().ok_or_else(|| {
            HostError::Config("child process spawned without a stdout pipe".into())
        })?;
        if let Some(stderr) = child.stderr.take() {
            tasks.spawn(forward_stderr(spec.name.clone(), stderr));
        }

        let mut reader = BufReader::new(stdout);
        let handshake = tokio::time::timeout(HANDSHAKE_TIMEOUT, read_handshake(&mut reader))
            .await
            .map_err(|_| HostError::HandshakeTimeout {
                path: binary.to_path_buf(),
            })??;
        let client = RpcClient::connect(handshake.addr).await?;

        for (key, value) in &spec.env {
            call(&client, &spec.name, Payload::SetEnv {
                key: key.clone(),
                value: value.clone(),
            })
            .await?;
        }

        let reply = call(&client, &spec.name, Payload::ModuleName).await?;
        let reported = reply
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        if reported != spec.name {
            return Err(HostError::NameMismatch {
                declared: spec.name.clone(),
                reported,
            });
        }
        Ok((client, reported))
    }

    /// The binary the child was spawned from.
    pub fn binary(&self) -> &std::path::Path {
        &self.binary
    }
}

#[async_trait]
impl PluginHandle for SubprocPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self, config: &JsonMap) -> HostResult<()> {
        call(&self.client, &self.name, Payload::Init {
            config: config.clone(),
        })
        .await
        .map(drop)
    }

    async fn start(&self, io: PluginIo) -> HostResult<()> {
        // Callback server: serve whatever connection the plugin dials back.
        let broker = Broker::bind().await?;
        let broker_id = broker.id();
        let handler: Arc<dyn RequestHandler> = Arc::new(CallbackHandler {
            plugin: self.name.clone(),
            recv_tx: self.recv_tx.clone(),
        });
        let callback_cancel = self.callback_cancel.clone();
        let plugin_name = self.name.clone();
        self.tasks.spawn(async move {
            let stream = tokio::select! {
                () = callback_cancel.cancelled() => return,
                accepted = broker.accept() => match accepted {
                    Ok(stream) => stream,
                    Err(e) => {
                        warn!(plugin = %plugin_name, error = %e, "callback accept failed");
                        return;
                    }
                },
            };
            if let Err(e) = serve_connection(stream, handler, callback_cancel).await {
                warn!(plugin = %plugin_name, error = %e, "callback channel broke");
            }
        });

        call(&self.client, &self.name, Payload::Start { broker: broker_id })
            .await
            .map(drop)?;

        let recv_rx = self
            .recv_rx
            .lock()
            .take()
            .ok_or_else(|| HostError::AlreadyStarted(self.name.clone()))?;
        self.tasks.spawn(channel_loop(
            self.name.clone(),
            Arc::clone(&self.client),
            io,
            recv_rx,
        ));

        // Watchdog: the child exiting without being asked becomes a
        // start_error the supervisor can observe.
        let child = self.child.lock().take();
        if let Some(mut child) = child {
            let name = self.name.clone();
            let service_tx = self.service_tx.clone();
            let kill = self.kill.clone();
            self.tasks.spawn(async move {
                tokio::select! {
                    status = child.wait() => {
                        let detail = match status {
                            Ok(status) => format!("plugin process exited unexpectedly: {status}"),
                            Err(e) => format!("plugin process lost: {e}"),
                        };
                        warn!(plugin = %name, "{detail}");
                        let envelope = Envelope::oneway(SERVICE_MAILBOX, Payload::StartError {
                            plugin: name.clone(),
                            error: Some(detail),
                        })
                        .with_from(&name);
                        let _ = service_tx.send(envelope).await;
                    }
                    () = kill.cancelled() => {
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                        debug!(plugin = %name, "plugin process killed");
                    }
                }
            });
        }
        Ok(())
    }

    async fn stop(&self) -> HostResult<()> {
        let stop_result = call(&self.client, &self.name, Payload::Stop).await.map(drop);

        // Kill is unconditional after stop, whatever stop returned.
        self.callback_cancel.cancel();
        self.kill.cancel();
        let child = self.child.lock().take();
        if let Some(mut child) = child {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        self.client.shutdown();
        stop_result
    }
}

/// One lifecycle call on the primary channel; a non-empty `error` in the
/// response body is re-inflated as [`HostError::Remote`].
async fn call(client: &RpcClient, plugin: &str, payload: Payload) -> HostResult<Reply> {
    let envelope = Envelope::oneway(plugin, payload).with_from(SERVICE_MAILBOX);
    let response = client.request(MsgRequest::from_envelope(&envelope)).await?;
    let reply = response.into_reply();
    match reply.error() {
        Some(e) => Err(HostError::Remote(e.to_string())),
        None => Ok(reply),
    }
}

/// Reads and validates the child's handshake line.
async fn read_handshake<R>(reader: &mut R) -> HostResult<Handshake>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let n = reader.read_line(&mut line).await?;
    if n == 0 {
        return Err(HostError::Config(
            "plugin process exited before the handshake".into(),
        ));
    }
    let handshake: Handshake = line.parse().map_err(HostError::Handshake)?;
    handshake.check_version()?;
    Ok(handshake)
}

/// Mirrors the child's stderr into the host's log.
async fn forward_stderr(plugin: String, stderr: tokio::process::ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(plugin = %plugin, "{line}");
    }
}

// =============================================================================
// Callback handler and receive loop
// =============================================================================

/// Answers the plugin's unary pushes by enqueueing them for the receive
/// loop.
struct CallbackHandler {
    plugin: String,
    recv_tx: mpsc::Sender<Envelope>,
}

#[async_trait]
impl RequestHandler for CallbackHandler {
    async fn handle(&self, request: MsgRequest) -> MsgResponse {
        let response = MsgResponse::empty(&request);
        match request.into_envelope() {
            Ok(envelope) => {
                if self.recv_tx.send(envelope).await.is_err() {
                    warn!(plugin = %self.plugin, "receive queue gone, dropping envelope");
                }
            }
            Err(e) => warn!(plugin = %self.plugin, error = %e, "undecodable envelope from plugin"),
        }
        response
    }
}

/// Splices the plugin's inbox and the receive queue until cancellation.
async fn channel_loop(
    name: String,
    client: Arc<RpcClient>,
    io: PluginIo,
    mut recv_rx: mpsc::Receiver<Envelope>,
) {
    let PluginIo {
        mut inbox,
        outbox,
        cancel,
    } = io;
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                let done = Envelope::oneway(&name, Payload::CtxDone).with_from(SERVICE_MAILBOX);
                if let Err(e) = client.request(MsgRequest::from_envelope(&done)).await {
                    warn!(plugin = %name, error = %e, "failed to deliver ctx_done");
                }
                break;
            }
            envelope = inbox.recv() => {
                let Some(envelope) = envelope else { break };
                // The call site retains the reply slot; transport errors
                // are logged and the envelope dropped.
                if let Err(e) = client.request(MsgRequest::from_envelope(&envelope)).await {
                    warn!(plugin = %name, to = %envelope.to(), error = %e,
                        "failed to forward envelope to plugin");
                }
            }
            received = recv_rx.recv() => {
                let Some(mut envelope) = received else { break };
                if matches!(envelope.payload(), Payload::StartError { .. }) {
                    envelope.retarget(SERVICE_MAILBOX);
                    if outbox.send(envelope).await.is_err() {
                        break;
                    }
                } else if envelope.to() == name {
                    warn!(plugin = %name, id = %envelope.id(), "dropping loopback envelope");
                } else if outbox.send(envelope).await.is_err() {
                    break;
                }
            }
        }
    }
    debug!(plugin = %name, "receive loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use plexus_core::{JsonMap, kind};
    use plexus_transport::{Frame, read_frame, write_frame};
    use std::sync::Mutex as StdMutex;

    #[tokio::test]
    async fn handshake_reader_accepts_a_good_line() {
        let mut reader = BufReader::new(&b"1|tcp|127.0.0.1:4000\n"[..]);
        let handshake = read_handshake(&mut reader).await.unwrap();
        assert_eq!(handshake.addr.port(), 4000);
    }

    #[tokio::test]
    async fn handshake_reader_rejects_noise_and_bad_versions() {
        let mut reader = BufReader::new(&b"starting up...\n"[..]);
        assert!(matches!(
            read_handshake(&mut reader).await,
            Err(HostError::Handshake(_))
        ));

        let mut reader = BufReader::new(&b"9|tcp|127.0.0.1:4000\n"[..]);
        assert!(matches!(
            read_handshake(&mut reader).await,
            Err(HostError::Handshake(_))
        ));

        let mut reader = BufReader::new(&b""[..]);
        assert!(read_handshake(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn callback_handler_enqueues_decoded_envelopes() {
        let (recv_tx, mut recv_rx) = mpsc::channel(4);
        let handler = CallbackHandler {
            plugin: "echo".into(),
            recv_tx,
        };
        let request = MsgRequest {
            id: "msg-1".into(),
            from: "echo".into(),
            to: "other".into(),
            kind: "ping".into(),
            ttl: 0,
            request: JsonMap::new(),
        };
        let response = handler.handle(request).await;
        assert_eq!(response.into_reply().error(), None);

        let envelope = recv_rx.recv().await.unwrap();
        assert_eq!(envelope.to(), "other");
        assert_eq!(envelope.payload().kind(), "ping");
    }

    /// Peer that answers every request with empty success and records the
    /// kinds it saw.
    async fn recording_peer<S>(stream: S, seen: Arc<StdMutex<Vec<String>>>)
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Unpin,
    {
        let (mut r, mut w) = tokio::io::split(stream);
        while let Ok(Frame::Request { seq, msg }) = read_frame(&mut r).await {
            seen.lock().unwrap().push(msg.kind.clone());
            let resp = MsgResponse::empty(&msg);
            if write_frame(&mut w, &Frame::Response { seq, msg: resp })
                .await
                .is_err()
            {
                break;
            }
        }
    }

    #[tokio::test]
    async fn channel_loop_routes_and_reports_cancellation() {
        let (near, far) = tokio::io::duplex(8192);
        let seen = Arc::new(StdMutex::new(Vec::new()));
        tokio::spawn(recording_peer(far, Arc::clone(&seen)));
        let client = Arc::new(RpcClient::new(near));

        let (inbox_tx, inbox) = mpsc::channel(8);
        let (outbox, mut routed) = mpsc::channel(8);
        let (recv_tx, recv_rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let loop_task = tokio::spawn(channel_loop(
            "echo".into(),
            client,
            PluginIo {
                inbox,
                outbox,
                cancel: cancel.clone(),
            },
            recv_rx,
        ));

        // Host-bound start_error is retargeted at the service mailbox.
        recv_tx
            .send(Envelope::oneway("echo", Payload::StartError {
                plugin: "echo".into(),
                error: None,
            }))
            .await
            .unwrap();
        let envelope = routed.recv().await.unwrap();
        assert_eq!(envelope.to(), SERVICE_MAILBOX);

        // Loopback envelopes are dropped, everything else is forwarded.
        recv_tx
            .send(Envelope::oneway("echo", Payload::Custom {
                kind: "ping".into(),
                body: JsonMap::new(),
            }))
            .await
            .unwrap();
        recv_tx
            .send(Envelope::oneway("other", Payload::Custom {
                kind: "ping".into(),
                body: JsonMap::new(),
            }))
            .await
            .unwrap();
        let envelope = routed.recv().await.unwrap();
        assert_eq!(envelope.to(), "other");

        // Inbox messages go out over the primary channel.
        inbox_tx
            .send(Envelope::oneway("echo", Payload::Custom {
                kind: "ping".into(),
                body: JsonMap::new(),
            }))
            .await
            .unwrap();
        while !seen.lock().unwrap().iter().any(|k| k == "ping") {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // Cancellation sends ctx_done and ends the loop.
        cancel.cancel();
        loop_task.await.unwrap();
        let seen = seen.lock().unwrap();
        assert!(seen.contains(&"ping".to_string()));
        assert_eq!(seen.last().map(String::as_str), Some(kind::CTX_DONE));
    }
}

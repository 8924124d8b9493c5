//! The `httpd` plugin: a small REST front door into the routing fabric.
//!
//! `POST /messages` with `{"to": "...", "type": "...", "body": {...}}`
//! injects an envelope addressed to another plugin; `GET /healthz` answers
//! liveness probes. Inbound envelopes addressed to `httpd` are logged and
//! discarded; this plugin only feeds messages in.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use plexus_core::{
    Envelope, JsonMap, Payload, Plugin, PluginError, PluginIo, PluginResult, export_plugin,
};

/// Bind address used when the config does not carry one.
const DEFAULT_LISTEN: &str = "127.0.0.1:8686";

/// Body accepted by `POST /messages`.
#[derive(Debug, Deserialize)]
pub struct SendRequest {
    pub to: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub body: JsonMap,
}

/// Builds the envelope a [`SendRequest`] describes.
pub fn build_envelope(request: SendRequest) -> Result<Envelope, String> {
    if request.to.is_empty() {
        return Err("'to' must name a plugin mailbox".into());
    }
    if request.kind.is_empty() {
        return Err("'type' must be non-empty".into());
    }
    Ok(Envelope::oneway(request.to, Payload::Custom {
        kind: request.kind,
        body: request.body,
    })
    .with_from("httpd"))
}

struct AppState {
    outbox: mpsc::Sender<Envelope>,
}

#[derive(Default)]
pub struct HttpdPlugin {
    listen: Mutex<String>,
}

#[async_trait]
impl Plugin for HttpdPlugin {
    fn name(&self) -> &str {
        "httpd"
    }

    async fn init(&self, config: &JsonMap) -> PluginResult<()> {
        let listen = config
            .get("listen")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_LISTEN);
        listen
            .parse::<std::net::SocketAddr>()
            .map_err(|e| PluginError::config(format!("bad listen address '{listen}': {e}")))?;
        *self.listen.lock() = listen.to_string();
        Ok(())
    }

    async fn start(&self, io: PluginIo) -> PluginResult<()> {
        let PluginIo {
            mut inbox,
            outbox,
            cancel,
        } = io;

        let listen = self.listen.lock().clone();
        let listener = tokio::net::TcpListener::bind(&listen)
            .await
            .map_err(PluginError::runtime)?;
        info!(listen = %listen, "http endpoint listening");

        let state = Arc::new(AppState { outbox });
        let app = Router::new()
            .route("/healthz", get(healthz))
            .route("/messages", post(send_message))
            .with_state(state);

        // Drain the inbox so senders never block on a mailbox nobody reads.
        let drain_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = drain_cancel.cancelled() => break,
                    envelope = inbox.recv() => match envelope {
                        Some(envelope) => {
                            debug!(id = %envelope.id(), kind = %envelope.payload().kind(),
                                "discarding inbound envelope");
                        }
                        None => break,
                    },
                }
            }
        });

        axum::serve(listener, app)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
            .map_err(PluginError::runtime)
    }

    async fn stop(&self) -> PluginResult<()> {
        Ok(())
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SendRequest>,
) -> impl IntoResponse {
    let envelope = match build_envelope(request) {
        Ok(envelope) => envelope,
        Err(reason) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(serde_json::json!({ "error": reason })),
            );
        }
    };
    debug!(to = %envelope.to(), kind = %envelope.payload().kind(), "queueing message");
    match state.outbox.send(envelope).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "queued": true })),
        ),
        Err(_) => {
            warn!("routing fabric is gone");
            (
                StatusCode::BAD_GATEWAY,
                Json(serde_json::json!({ "error": "routing fabric unavailable" })),
            )
        }
    }
}

export_plugin!(HttpdPlugin::default());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_request_becomes_an_envelope() {
        let request: SendRequest =
            serde_json::from_str(r#"{"to": "hello", "type": "ping", "body": {"n": 1}}"#).unwrap();
        let envelope = build_envelope(request).unwrap();
        assert_eq!(envelope.to(), "hello");
        assert_eq!(envelope.from(), "httpd");
        assert_eq!(envelope.payload().kind(), "ping");
    }

    #[test]
    fn empty_routing_fields_are_rejected() {
        let request: SendRequest =
            serde_json::from_str(r#"{"to": "", "type": "ping"}"#).unwrap();
        assert!(build_envelope(request).is_err());

        let request: SendRequest =
            serde_json::from_str(r#"{"to": "hello", "type": ""}"#).unwrap();
        assert!(build_envelope(request).is_err());
    }

    #[tokio::test]
    async fn init_validates_the_listen_address() {
        let plugin = HttpdPlugin::default();
        let mut config = JsonMap::new();
        config.insert("listen".into(), "not-an-addr".into());
        assert!(plugin.init(&config).await.is_err());

        let mut config = JsonMap::new();
        config.insert("listen".into(), "127.0.0.1:0".into());
        plugin.init(&config).await.unwrap();
        assert_eq!(*plugin.listen.lock(), "127.0.0.1:0");
    }
}

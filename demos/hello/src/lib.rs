//! The `hello` plugin: greets on start and answers `ping` with `pong`.
//!
//! Builds both ways a Plexus plugin can ship:
//! - as a `cdylib` exporting `PluginObj` for in-process loading;
//! - as the `hello` binary serving the subprocess protocol (see
//!   `src/main.rs`).

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use plexus_core::{Envelope, JsonMap, Payload, Plugin, PluginIo, PluginResult, export_plugin};

/// Greeting used when the config does not carry one.
const DEFAULT_GREETING: &str = "hello from plexus";

#[derive(Default)]
pub struct HelloPlugin {
    greeting: Mutex<String>,
}

#[async_trait]
impl Plugin for HelloPlugin {
    fn name(&self) -> &str {
        "hello"
    }

    async fn init(&self, config: &JsonMap) -> PluginResult<()> {
        let greeting = config
            .get("greeting")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_GREETING);
        *self.greeting.lock() = greeting.to_string();
        Ok(())
    }

    async fn start(&self, mut io: PluginIo) -> PluginResult<()> {
        info!("{}", self.greeting.lock());
        loop {
            tokio::select! {
                () = io.cancel.cancelled() => {
                    info!("goodbye");
                    return Ok(());
                }
                envelope = io.inbox.recv() => {
                    let Some(envelope) = envelope else { return Ok(()) };
                    self.answer(envelope, &io.outbox).await;
                }
            }
        }
    }

    async fn stop(&self) -> PluginResult<()> {
        Ok(())
    }
}

impl HelloPlugin {
    async fn answer(&self, envelope: Envelope, outbox: &tokio::sync::mpsc::Sender<Envelope>) {
        let Payload::Custom { kind, body } = envelope.payload() else {
            debug!(id = %envelope.id(), "ignoring non-application envelope");
            return;
        };
        if kind != "ping" || envelope.from().is_empty() {
            debug!(kind = %kind, from = %envelope.from(), "ignoring message");
            return;
        }
        let pong = Envelope::oneway(envelope.from(), Payload::Custom {
            kind: "pong".into(),
            body: body.clone(),
        })
        .with_from(self.name());
        let _ = outbox.send(pong).await;
    }
}

export_plugin!(HelloPlugin::default());

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn pings_are_answered_to_the_sender() {
        let plugin = Arc::new(HelloPlugin::default());
        plugin.init(&JsonMap::new()).await.unwrap();

        let (inbox_tx, inbox) = mpsc::channel(4);
        let (outbox, mut routed) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let runner = {
            let plugin = Arc::clone(&plugin);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                plugin
                    .start(PluginIo {
                        inbox,
                        outbox,
                        cancel,
                    })
                    .await
            })
        };

        inbox_tx
            .send(
                Envelope::oneway("hello", Payload::Custom {
                    kind: "ping".into(),
                    body: JsonMap::new(),
                })
                .with_from("test"),
            )
            .await
            .unwrap();

        let pong = routed.recv().await.unwrap();
        assert_eq!(pong.to(), "test");
        assert_eq!(pong.from(), "hello");
        assert_eq!(pong.payload().kind(), "pong");

        cancel.cancel();
        runner.await.unwrap().unwrap();
    }
}

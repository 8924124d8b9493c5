//! The supervisor: owner of the mailbox registry, the plugin records, and
//! the central routing loop.
//!
//! Bring-up follows the config strictly: every plugin is loaded and
//! initialized in declared order, then started. From then on the
//! supervisor consumes the service mailbox; envelopes addressed to a
//! plugin are delivered to its mailbox, envelopes addressed to
//! `"common"` are control messages.
//!
//! # Unload order
//!
//! Unloading always runs cancel → stop → remove record → remove mailbox.
//! This is what makes mailbox closure safe: by the time the mailbox goes
//! away, the plugin's tasks have been cancelled and stopped, so no
//! in-flight sends can hit a closed queue.
//!
//! # Routing-homeless envelopes
//!
//! An envelope whose destination mailbox does not exist yet is re-enqueued
//! on the service mailbox with its TTL decremented, and dropped with a
//! warning once the TTL reaches zero: the destination plugin may still be
//! starting, but not forever.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::{PluginMode, PluginSpec, RunMode, ServiceConfig};
use crate::error::{HostError, HostResult};
use crate::loader::inproc::{InProcPlugin, LibraryCache};
use crate::loader::subproc::SubprocPlugin;
use crate::loader::BoxedHandle;
use plexus_core::{
    Envelope, JsonMap, MailboxRegistry, Payload, PluginIo, Reply, SERVICE_MAILBOX, SharedPlugin,
};

/// How long background tasks get to settle after a soft stop.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Everything the supervisor tracks per loaded plugin.
struct PluginRecord {
    mode: PluginMode,
    handle: BoxedHandle,
    /// One-shot termination trigger for the plugin's running start task.
    cancel: CancellationToken,
}

// =============================================================================
// Supervisor
// =============================================================================

/// The process-local controller owning all plugin lifecycles and the
/// routing loop.
pub struct Supervisor {
    config: ServiceConfig,
    mailboxes: Arc<MailboxRegistry>,
    records: HashMap<String, PluginRecord>,
    /// Names in load order; unload-all walks it in reverse.
    load_order: Vec<String>,
    libraries: LibraryCache,
    /// Pre-constructed instances served before library discovery, keyed by
    /// the declared type they stand in for.
    builtins: HashMap<String, SharedPlugin>,
    tasks: TaskTracker,
    service_tx: mpsc::Sender<Envelope>,
    service_rx: mpsc::Receiver<Envelope>,
}

impl Supervisor {
    /// Creates a supervisor for `config`. Nothing is loaded yet.
    pub fn new(config: ServiceConfig) -> Self {
        let mailboxes = Arc::new(MailboxRegistry::new());
        let common = mailboxes.get_or_create(SERVICE_MAILBOX, None);
        let service_tx = common.sender();
        let service_rx = common
            .take_receiver()
            .expect("fresh registry always yields the service receiver");
        Self {
            config,
            mailboxes,
            records: HashMap::new(),
            load_order: Vec::new(),
            libraries: LibraryCache::new(),
            builtins: HashMap::new(),
            tasks: TaskTracker::new(),
            service_tx,
            service_rx,
        }
    }

    /// Registers a statically linked plugin instance under a declared
    /// type. When a spec with that type loads, the instance is used
    /// instead of discovery, whatever the configured plugin mode.
    pub fn register_builtin(&mut self, declared: impl Into<String>, plugin: SharedPlugin) {
        self.builtins.insert(declared.into(), plugin);
    }

    /// A cloneable control handle onto the service mailbox.
    pub fn handle(&self) -> SupervisorHandle {
        SupervisorHandle {
            tx: self.service_tx.clone(),
        }
    }

    /// The mailbox registry (shared; read-only for callers).
    pub fn mailboxes(&self) -> Arc<MailboxRegistry> {
        Arc::clone(&self.mailboxes)
    }

    /// The configured run mode.
    pub fn run_mode(&self) -> RunMode {
        self.config.run_mode
    }

    // =========================================================================
    // Bring-up
    // =========================================================================

    /// Loads and initializes every configured plugin, in declared order.
    /// Any failure rolls the offending plugin back and aborts bring-up.
    pub async fn init(&mut self) -> HostResult<()> {
        for spec in self.config.plugins.clone() {
            if let Err(e) = self.bring_up(&spec).await {
                error!(plugin = %spec.name, error = %e, "bring-up failed");
                self.discard_partial(&spec.name).await;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn bring_up(&mut self, spec: &PluginSpec) -> HostResult<()> {
        self.load_plugin(spec).await?;
        self.init_plugin(&spec.name, &spec.config).await
    }

    /// Materializes a handle for `spec` and creates its mailbox.
    async fn load_plugin(&mut self, spec: &PluginSpec) -> HostResult<()> {
        if self.records.contains_key(&spec.name) {
            return Err(HostError::AlreadyLoaded(spec.name.clone()));
        }
        let (mode, handle): (PluginMode, BoxedHandle) = if let Some(instance) =
            self.builtins.get(&spec.name)
        {
            (
                PluginMode::InProcess,
                Box::new(InProcPlugin::from_instance(
                    &spec.name,
                    Arc::clone(instance),
                    self.service_tx.clone(),
                    self.tasks.clone(),
                )?),
            )
        } else {
            match self.config.plugin_mode {
                PluginMode::InProcess => (
                    PluginMode::InProcess,
                    Box::new(InProcPlugin::from_library(
                        spec,
                        &self.libraries,
                        self.service_tx.clone(),
                        self.tasks.clone(),
                    )?),
                ),
                PluginMode::Subprocess => (
                    PluginMode::Subprocess,
                    Box::new(
                        SubprocPlugin::spawn(spec, self.service_tx.clone(), self.tasks.clone())
                            .await?,
                    ),
                ),
            }
        };

        // The mailbox exists exactly while the plugin is loaded.
        self.mailboxes.get_or_create(&spec.name, spec.chan_len);
        self.records.insert(
            spec.name.clone(),
            PluginRecord {
                mode,
                handle,
                cancel: CancellationToken::new(),
            },
        );
        self.load_order.push(spec.name.clone());
        debug!(plugin = %spec.name, mode = ?mode, "plugin loaded");
        Ok(())
    }

    async fn init_plugin(&self, name: &str, config: &JsonMap) -> HostResult<()> {
        let record = self
            .records
            .get(name)
            .ok_or_else(|| HostError::NotLoaded(name.to_string()))?;
        record.handle.init(config).await
    }

    /// Hands the plugin its io pair and sets it running.
    async fn start_plugin(&mut self, name: &str) -> HostResult<()> {
        let record = self
            .records
            .get(name)
            .ok_or_else(|| HostError::NotLoaded(name.to_string()))?;
        let mailbox = self
            .mailboxes
            .lookup(name)
            .ok_or_else(|| HostError::NotLoaded(name.to_string()))?;
        let inbox = mailbox
            .take_receiver()
            .ok_or_else(|| HostError::AlreadyStarted(name.to_string()))?;
        let io = PluginIo {
            inbox,
            outbox: self.service_tx.clone(),
            cancel: record.cancel.clone(),
        };
        record.handle.start(io).await?;
        info!(plugin = %name, "plugin started");
        Ok(())
    }

    /// Starts every loaded plugin. In job mode, each start is awaited to
    /// completion via its `start_error` envelope, and a reported error
    /// aborts the sequence.
    pub async fn start(&mut self) -> HostResult<()> {
        for name in self.load_order.clone() {
            self.start_plugin(&name).await?;
            if self.config.run_mode == RunMode::Job {
                self.wait_for_start_result(&name).await?;
            }
        }
        Ok(())
    }

    /// Blocks on the service mailbox until one `start_error` arrives.
    async fn wait_for_start_result(&mut self, plugin: &str) -> HostResult<()> {
        while let Some(envelope) = self.service_rx.recv().await {
            match envelope.into_payload() {
                Payload::StartError { plugin: name, error } => {
                    return match error {
                        Some(error) => Err(HostError::StartFailed { plugin: name, error }),
                        None => Ok(()),
                    };
                }
                other => {
                    warn!(
                        plugin = %plugin,
                        kind = %other.kind(),
                        "ignoring message while awaiting start result"
                    );
                }
            }
        }
        Err(HostError::SupervisorGone)
    }

    // =========================================================================
    // Routing loop
    // =========================================================================

    /// Consumes the service mailbox until a stop control message arrives.
    pub async fn route(&mut self) -> HostResult<()> {
        info!("routing loop running");
        while let Some(envelope) = self.service_rx.recv().await {
            if envelope.to() != SERVICE_MAILBOX {
                self.forward(envelope).await;
                continue;
            }
            if !self.handle_control(envelope).await {
                break;
            }
        }
        info!("routing loop finished");
        Ok(())
    }

    /// Delivers an envelope to its destination mailbox, or re-enqueues it
    /// TTL-bounded when the mailbox does not (yet) exist.
    async fn forward(&mut self, mut envelope: Envelope) {
        let to = envelope.to().to_string();
        if to.is_empty() {
            warn!(id = %envelope.id(), "dropping envelope with empty destination");
            return;
        }
        if let Some(mailbox) = self.mailboxes.lookup(&to) {
            if let Err(e) = mailbox.send(envelope).await {
                warn!(mailbox = %to, error = %e, "delivery failed");
            }
            return;
        }
        if envelope.ttl() <= 0 {
            warn!(to = %to, id = %envelope.id(), "dropping undeliverable envelope, ttl exhausted");
            return;
        }
        envelope.decrement_ttl();
        // The routing loop is the sole consumer of the service mailbox; a
        // blocking send here would deadlock it.
        if self.service_tx.try_send(envelope).is_err() {
            error!(to = %to, "service mailbox full, dropping re-enqueued envelope");
        }
    }

    /// Dispatches a control message. Returns `false` when the routing loop
    /// should end.
    async fn handle_control(&mut self, mut envelope: Envelope) -> bool {
        match envelope.payload().clone() {
            Payload::ServiceStop { force, error } => {
                if force {
                    let code = i32::from(error.is_some());
                    error!(code, "forced stop requested, exiting");
                    std::process::exit(code);
                }
                info!("stop requested, unloading plugins");
                let result = self.unload_all().await;
                let _ = envelope.respond(Reply::from_result(result));
                self.tasks.close();
                if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.tasks.wait())
                    .await
                    .is_err()
                {
                    warn!("background tasks did not settle before the shutdown timeout");
                }
                return false;
            }
            Payload::UnloadPlugin { plugin } => {
                let result = self.unload_plugin(&plugin).await;
                let _ = envelope.respond(Reply::from_result(result));
            }
            Payload::LoadPlugin { spec } => {
                let result = self.load_from_spec_map(spec).await;
                let _ = envelope.respond(Reply::from_result(result));
            }
            Payload::ListPlugins => {
                let mut reply = Reply::ok();
                for name in &self.load_order {
                    reply = reply.with(name.clone(), true);
                }
                let _ = envelope.respond(reply);
            }
            Payload::StartError { plugin, error } => match error {
                Some(error) => warn!(plugin = %plugin, error = %error, "plugin start failed"),
                None => info!(plugin = %plugin, "plugin start returned"),
            },
            other => {
                warn!(kind = %other.kind(), "unsupported control message, dropping");
            }
        }
        true
    }

    /// `load_plugin` control message: decode the spec, then load → init →
    /// start, rolling back on the first error.
    async fn load_from_spec_map(&mut self, spec: JsonMap) -> HostResult<()> {
        let spec: PluginSpec = serde_json::from_value(Value::Object(spec))
            .map_err(|e| HostError::Config(format!("undecodable plugin spec: {e}")))?;
        if let Err(e) = self.load_init_start(&spec).await {
            self.discard_partial(&spec.name).await;
            return Err(e);
        }
        Ok(())
    }

    async fn load_init_start(&mut self, spec: &PluginSpec) -> HostResult<()> {
        self.load_plugin(spec).await?;
        self.init_plugin(&spec.name, &spec.config).await?;
        self.start_plugin(&spec.name).await
    }

    // =========================================================================
    // Unload
    // =========================================================================

    /// Unloads one plugin: cancel, stop, drop the record, drop the
    /// mailbox. Later steps run even when stop fails; the first error is
    /// surfaced.
    pub async fn unload_plugin(&mut self, name: &str) -> HostResult<()> {
        let record = self
            .records
            .remove(name)
            .ok_or_else(|| HostError::NotLoaded(name.to_string()))?;
        record.cancel.cancel();
        let result = record.handle.stop().await;
        if let Err(e) = &result {
            warn!(plugin = %name, error = %e, "stop failed during unload");
        }
        self.mailboxes.remove(name);
        self.load_order.retain(|n| n != name);
        debug!(plugin = %name, mode = ?record.mode, "plugin unloaded");
        result
    }

    /// Unloads everything in reverse load order, surfacing the first
    /// error but finishing the sweep.
    async fn unload_all(&mut self) -> HostResult<()> {
        let mut first_error = None;
        for name in self.load_order.clone().into_iter().rev() {
            if let Err(e) = self.unload_plugin(&name).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drops any partial state a failed load/init/start left behind.
    async fn discard_partial(&mut self, name: &str) {
        if let Some(record) = self.records.remove(name) {
            record.cancel.cancel();
            let _ = record.handle.stop().await;
        }
        self.mailboxes.remove(name);
        self.load_order.retain(|n| n != name);
    }

    /// Unloads all plugins and waits for background tasks. The job-mode
    /// tail and the external-stop path.
    pub async fn shutdown(&mut self) -> HostResult<()> {
        let result = self.unload_all().await;
        self.tasks.close();
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, self.tasks.wait())
            .await
            .is_err()
        {
            warn!("background tasks did not settle before the shutdown timeout");
        }
        result
    }
}

// =============================================================================
// SupervisorHandle
// =============================================================================

/// Cloneable front door to a running supervisor: a sender onto the
/// service mailbox plus typed wrappers for the control vocabulary.
#[derive(Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<Envelope>,
}

impl SupervisorHandle {
    /// Injects an envelope into the routing fabric.
    pub async fn send(&self, envelope: Envelope) -> HostResult<()> {
        self.tx
            .send(envelope)
            .await
            .map_err(|_| HostError::SupervisorGone)
    }

    async fn control(&self, payload: Payload) -> HostResult<Reply> {
        let (envelope, reply) = Envelope::request(SERVICE_MAILBOX, payload);
        self.send(envelope).await?;
        let reply = reply.recv().await?;
        match reply.error() {
            Some(e) => Err(HostError::Remote(e.to_string())),
            None => Ok(reply),
        }
    }

    /// Requests a soft stop and waits for the acknowledgement.
    pub async fn stop(&self) -> HostResult<()> {
        self.control(Payload::ServiceStop {
            force: false,
            error: None,
        })
        .await
        .map(drop)
    }

    /// Loads, initializes, and starts a plugin at runtime.
    pub async fn load_plugin(&self, spec: &PluginSpec) -> HostResult<()> {
        let spec = match serde_json::to_value(spec) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) => {
                return Err(HostError::Config("plugin spec must serialize to a map".into()));
            }
        };
        self.control(Payload::LoadPlugin { spec }).await.map(drop)
    }

    /// Unloads a plugin at runtime.
    pub async fn unload_plugin(&self, name: impl Into<String>) -> HostResult<()> {
        self.control(Payload::UnloadPlugin {
            plugin: name.into(),
        })
        .await
        .map(drop)
    }

    /// Lists the currently loaded plugins, sorted by name.
    pub async fn list_plugins(&self) -> HostResult<Vec<String>> {
        let reply = self.control(Payload::ListPlugins).await?;
        let mut names: Vec<String> = reply
            .fields()
            .iter()
            .filter(|(_, loaded)| loaded.as_bool().unwrap_or(false))
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use plexus_core::{Plugin, PluginError, PluginResult};
    use std::sync::Mutex as StdMutex;

    /// Replies `pong` to every `ping`, addressed back to the sender.
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
                            let pong = Envelope::oneway(envelope.from(), Payload::Custom {
                                kind: "pong".into(),
                                body: JsonMap::new(),
                            })
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

    /// Records its lifecycle; optionally fails `start` immediately.
    struct Script {
        name: &'static str,
        fail_start: Option<&'static str>,
        events: Arc<StdMutex<Vec<&'static str>>>,
    }

    impl Script {
        fn new(name: &'static str) -> (Self, Arc<StdMutex<Vec<&'static str>>>) {
            let events = Arc::new(StdMutex::new(Vec::new()));
            (
                Self {
                    name,
                    fail_start: None,
                    events: Arc::clone(&events),
                },
                events,
            )
        }
    }

    #[async_trait]
    impl Plugin for Script {
        fn name(&self) -> &str {
            self.name
        }
        async fn init(&self, _config: &JsonMap) -> PluginResult<()> {
            self.events.lock().unwrap().push("init");
            Ok(())
        }
        async fn start(&self, io: PluginIo) -> PluginResult<()> {
            if let Some(reason) = self.fail_start {
                return Err(PluginError::runtime(reason));
            }
            io.cancel.cancelled().await;
            self.events.lock().unwrap().push("cancelled");
            Ok(())
        }
        async fn stop(&self) -> PluginResult<()> {
            // Orderly shutdown delivers cancellation before stop completes.
            while !self.events.lock().unwrap().contains(&"cancelled") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            self.events.lock().unwrap().push("stopped");
            Ok(())
        }
    }

    fn service_config(names: &[&str]) -> ServiceConfig {
        ServiceConfig {
            plugins: names.iter().map(|n| PluginSpec::builtin(*n)).collect(),
            ..ServiceConfig::default()
        }
    }

    #[tokio::test]
    async fn echo_round_trip_through_the_routing_loop() {
        let mut sup = Supervisor::new(service_config(&["echo"]));
        sup.register_builtin("echo", Arc::new(EchoPlugin));
        sup.init().await.unwrap();
        sup.start().await.unwrap();

        let handle = sup.handle();
        let mailboxes = sup.mailboxes();
        let mut test_rx = mailboxes
            .get_or_create("test", None)
            .take_receiver()
            .unwrap();

        let route = tokio::spawn(async move {
            let mut sup = sup;
            sup.route().await
        });

        handle
            .send(
                Envelope::oneway("echo", Payload::Custom {
                    kind: "ping".into(),
                    body: JsonMap::new(),
                })
                .with_from("test"),
            )
            .await
            .unwrap();

        let pong = test_rx.recv().await.unwrap();
        assert_eq!(pong.to(), "test");
        assert_eq!(pong.from(), "echo");
        assert_eq!(pong.payload().kind(), "pong");

        handle.stop().await.unwrap();
        route.await.unwrap().unwrap();
        assert!(!mailboxes.contains("echo"));
        assert!(mailboxes.contains(SERVICE_MAILBOX));
    }

    #[tokio::test]
    async fn orderly_shutdown_cancels_then_stops_then_closes_the_mailbox() {
        let mut sup = Supervisor::new(service_config(&["script"]));
        let (script, events) = Script::new("script");
        sup.register_builtin("script", Arc::new(script));
        sup.init().await.unwrap();
        sup.start().await.unwrap();

        let mailboxes = sup.mailboxes();
        assert!(mailboxes.contains("script"));

        sup.shutdown().await.unwrap();
        assert_eq!(*events.lock().unwrap(), vec!["init", "cancelled", "stopped"]);
        assert!(!mailboxes.contains("script"));
    }

    #[tokio::test]
    async fn name_mismatch_aborts_bring_up_and_leaves_no_mailbox() {
        let mut sup = Supervisor::new(service_config(&["foo"]));
        let (script, _) = Script::new("bar");
        sup.register_builtin("foo", Arc::new(script));

        let err = sup.init().await.unwrap_err();
        let text = err.to_string();
        assert!(text.contains("foo") && text.contains("bar"), "{text}");

        let mailboxes = sup.mailboxes();
        assert!(!mailboxes.contains("foo"));
        assert!(!mailboxes.contains("bar"));
    }

    #[tokio::test]
    async fn undeliverable_envelopes_are_requeued_ttl_times_then_dropped() {
        let mut sup = Supervisor::new(service_config(&[]));
        sup.forward(Envelope::oneway("nowhere", Payload::ListPlugins).with_ttl(2))
            .await;

        let requeued = sup.service_rx.try_recv().unwrap();
        assert_eq!(requeued.ttl(), 1);
        sup.forward(requeued).await;

        let requeued = sup.service_rx.try_recv().unwrap();
        assert_eq!(requeued.ttl(), 0);
        sup.forward(requeued).await;

        // TTL exhausted: dropped, not re-enqueued.
        assert!(sup.service_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_destination_is_dropped_as_invalid() {
        let mut sup = Supervisor::new(service_config(&[]));
        sup.forward(Envelope::oneway("", Payload::ListPlugins)).await;
        assert!(sup.service_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn dynamic_load_list_unload_round_trip() {
        let mut sup = Supervisor::new(service_config(&["echo"]));
        sup.register_builtin("echo", Arc::new(EchoPlugin));
        let (script, _) = Script::new("script");
        sup.register_builtin("script", Arc::new(script));
        sup.init().await.unwrap();
        sup.start().await.unwrap();

        let handle = sup.handle();
        let route = tokio::spawn(async move {
            let mut sup = sup;
            sup.route().await
        });

        handle
            .load_plugin(&PluginSpec::builtin("script"))
            .await
            .unwrap();
        assert_eq!(handle.list_plugins().await.unwrap(), vec!["echo", "script"]);

        handle.unload_plugin("script").await.unwrap();
        assert_eq!(handle.list_plugins().await.unwrap(), vec!["echo"]);

        // Unloading a stranger reports the error through the reply.
        let err = handle.unload_plugin("ghost").await.unwrap_err();
        assert!(err.to_string().contains("ghost"));

        handle.stop().await.unwrap();
        route.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn dynamic_load_of_an_unknown_plugin_fails_cleanly() {
        let mut sup = Supervisor::new(service_config(&[]));
        sup.init().await.unwrap();

        let handle = sup.handle();
        let mailboxes = sup.mailboxes();
        let route = tokio::spawn(async move {
            let mut sup = sup;
            sup.route().await
        });

        let err = handle
            .load_plugin(&PluginSpec::builtin("ghost"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
        assert!(!mailboxes.contains("ghost"));

        handle.stop().await.unwrap();
        route.await.unwrap().unwrap();
    }

    /// A job plugin that runs to completion on its own.
    struct Oneshot;

    #[async_trait]
    impl Plugin for Oneshot {
        fn name(&self) -> &str {
            "oneshot"
        }
        async fn init(&self, _config: &JsonMap) -> PluginResult<()> {
            Ok(())
        }
        async fn start(&self, _io: PluginIo) -> PluginResult<()> {
            Ok(())
        }
        async fn stop(&self) -> PluginResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn job_mode_propagates_clean_start_returns() {
        let mut config = service_config(&["oneshot"]);
        config.run_mode = RunMode::Job;
        let mut sup = Supervisor::new(config);
        sup.register_builtin("oneshot", Arc::new(Oneshot));
        sup.init().await.unwrap();
        sup.start().await.unwrap();
        sup.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn job_mode_surfaces_start_errors() {
        let mut config = service_config(&["broken"]);
        config.run_mode = RunMode::Job;
        let mut sup = Supervisor::new(config);
        let (mut script, _) = Script::new("broken");
        script.fail_start = Some("kaput");
        sup.register_builtin("broken", Arc::new(script));
        sup.init().await.unwrap();

        let err = sup.start().await.unwrap_err();
        assert!(err.to_string().contains("kaput"));
    }
}

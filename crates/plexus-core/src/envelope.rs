//! Message envelopes: the unit of interchange between plugins and the
//! supervisor.
//!
//! An [`Envelope`] carries an opaque correlation id, source and destination
//! mailbox names, a hop budget ([TTL](Envelope::ttl)), a typed [`Payload`],
//! and an optional single-shot reply slot.
//!
//! # Payloads
//!
//! The payload is a sum type with one variant per control message plus a
//! [`Payload::Custom`] catch-all for plugin-defined types. On the wire each
//! variant maps to a `(type string, JSON object)` pair; the conversion is
//! exact and symmetric, including the `error` key convention: an absent
//! error marshals to the empty string, and any non-empty string demarshals
//! back to an error value.
//!
//! # Replies
//!
//! [`Envelope::request`] creates an envelope together with a [`ReplyHandle`].
//! The receiving side answers at most once via [`Envelope::respond`]; the
//! handle's [`recv`](ReplyHandle::recv) is memoized, so a second receive
//! returns the same [`Reply`] without re-consuming anything.

use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::oneshot;

use crate::error::{EnvelopeError, EnvelopeResult};

/// A string-keyed JSON object, the shape every payload body reduces to on
/// the wire.
pub type JsonMap = Map<String, Value>;

/// Default hop budget for freshly constructed envelopes.
pub const DEFAULT_TTL: i64 = 64;

// =============================================================================
// Control vocabulary
// =============================================================================

/// Wire-level `type` strings understood by the host and by subprocess
/// plugins. These are part of the external interface and must not change.
pub mod kind {
    /// Fetch the plugin's name (host → plugin).
    pub const FUNC_MODULE_NAME: &str = "func_modulename";
    /// Configure the plugin; the body is its config map (host → plugin).
    pub const FUNC_INIT: &str = "func_init";
    /// Begin running; the body carries the broker id (host → plugin).
    pub const FUNC_START: &str = "func_start";
    /// Orderly stop (host → plugin).
    pub const FUNC_STOP: &str = "func_stop";
    /// Cancellation of the running start task (host → plugin).
    pub const CTX_DONE: &str = "ctx_done";
    /// Inject an environment variable before init (host → plugin).
    pub const SET_ENV: &str = "set_env";
    /// Report the return value of a plugin's start task (plugin → host).
    pub const START_ERROR: &str = "start_error";
    /// Stop the whole service (control message on the service mailbox).
    pub const SERVICE_STOP: &str = "msg_stop";
    /// Unload one plugin by name (control message on the service mailbox).
    pub const UNLOAD_PLUGIN: &str = "unload_plugin";
    /// Load, init, and start a plugin from an inline spec (control message).
    pub const LOAD_PLUGIN: &str = "load_plugin";
    /// List currently loaded plugins (control message).
    pub const LIST_PLUGINS: &str = "list_plugins";
    /// Reserved for future use.
    pub const RELOAD_CONFIG: &str = "reload_config";
    /// Reserved for future use.
    pub const MSG_ERROR: &str = "msg_error";
}

/// The `error` key carrying the empty-string ↔ absent convention.
const ERROR_KEY: &str = "error";

/// Reads the conventional `error` key out of a wire map: missing or empty
/// string means no error, any other string is the error message.
pub fn error_from_wire(map: &JsonMap) -> Option<String> {
    match map.get(ERROR_KEY) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Writes the conventional `error` key into a wire map.
pub fn error_to_wire(map: &mut JsonMap, error: Option<&str>) {
    map.insert(
        ERROR_KEY.to_string(),
        Value::String(error.unwrap_or_default().to_string()),
    );
}

// =============================================================================
// Payload
// =============================================================================

/// The typed request payload of an [`Envelope`].
///
/// One variant per control message; [`Payload::Custom`] carries any
/// plugin-defined type with an opaque JSON object body.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// `func_modulename`: fetch the plugin's name.
    ModuleName,
    /// `func_init`: the plugin's config map.
    Init {
        /// Config handed to the plugin, verbatim from its spec.
        config: JsonMap,
    },
    /// `func_start`: begin running; `broker` is the dial-back endpoint id.
    Start {
        /// Broker id the plugin must dial for its callback channel.
        broker: u32,
    },
    /// `func_stop`: orderly stop.
    Stop,
    /// `ctx_done`: cancel the running start task.
    CtxDone,
    /// `set_env`: inject one environment variable.
    SetEnv { key: String, value: String },
    /// `start_error`: a plugin's start task returned.
    StartError {
        /// Name of the plugin whose start returned.
        plugin: String,
        /// `None` for a clean return, the error message otherwise.
        error: Option<String>,
    },
    /// `msg_stop`: stop the whole service.
    ServiceStop {
        /// Exit the process immediately instead of a soft stop.
        force: bool,
        /// Error to report with a forced stop, if any.
        error: Option<String>,
    },
    /// `load_plugin`: spec map decoded by the supervisor.
    LoadPlugin {
        /// Raw plugin spec as a JSON object.
        spec: JsonMap,
    },
    /// `unload_plugin`: unload one plugin.
    UnloadPlugin { plugin: String },
    /// `list_plugins`: enumerate loaded plugins.
    ListPlugins,
    /// Any plugin-defined type with an opaque JSON object body.
    Custom { kind: String, body: JsonMap },
}

impl Payload {
    /// Builds a [`Payload::Custom`] from any serializable body.
    ///
    /// Fails if `body` does not serialize to a JSON object.
    pub fn custom<T: Serialize>(kind: impl Into<String>, body: &T) -> EnvelopeResult<Self> {
        let kind = kind.into();
        match serde_json::to_value(body)? {
            Value::Object(map) => Ok(Self::Custom { kind, body: map }),
            _ => Err(EnvelopeError::NotAnObject { kind }),
        }
    }

    /// Returns the wire-level `type` string for this payload.
    pub fn kind(&self) -> &str {
        match self {
            Self::ModuleName => kind::FUNC_MODULE_NAME,
            Self::Init { .. } => kind::FUNC_INIT,
            Self::Start { .. } => kind::FUNC_START,
            Self::Stop => kind::FUNC_STOP,
            Self::CtxDone => kind::CTX_DONE,
            Self::SetEnv { .. } => kind::SET_ENV,
            Self::StartError { .. } => kind::START_ERROR,
            Self::ServiceStop { .. } => kind::SERVICE_STOP,
            Self::LoadPlugin { .. } => kind::LOAD_PLUGIN,
            Self::UnloadPlugin { .. } => kind::UNLOAD_PLUGIN,
            Self::ListPlugins => kind::LIST_PLUGINS,
            Self::Custom { kind, .. } => kind,
        }
    }

    /// Converts the payload into its wire body.
    pub fn to_wire(&self) -> JsonMap {
        let mut map = JsonMap::new();
        match self {
            Self::ModuleName | Self::Stop | Self::CtxDone | Self::ListPlugins => {}
            Self::Init { config } => map = config.clone(),
            Self::Start { broker } => {
                map.insert("brokerID".into(), Value::from(*broker));
            }
            Self::SetEnv { key, value } => {
                map.insert("key".into(), Value::String(key.clone()));
                map.insert("value".into(), Value::String(value.clone()));
            }
            Self::StartError { plugin, error } => {
                map.insert("plugin".into(), Value::String(plugin.clone()));
                error_to_wire(&mut map, error.as_deref());
            }
            Self::ServiceStop { force, error } => {
                map.insert("force".into(), Value::Bool(*force));
                error_to_wire(&mut map, error.as_deref());
            }
            Self::LoadPlugin { spec } => map = spec.clone(),
            Self::UnloadPlugin { plugin } => {
                map.insert("name".into(), Value::String(plugin.clone()));
            }
            Self::Custom { body, .. } => map = body.clone(),
        }
        map
    }

    /// Reconstructs a payload from its wire `type` string and body.
    pub fn from_wire(kind_str: &str, map: JsonMap) -> EnvelopeResult<Self> {
        let malformed = |reason: &str| EnvelopeError::Malformed {
            kind: kind_str.to_string(),
            reason: reason.to_string(),
        };
        let payload = match kind_str {
            kind::FUNC_MODULE_NAME => Self::ModuleName,
            kind::FUNC_STOP => Self::Stop,
            kind::CTX_DONE => Self::CtxDone,
            kind::LIST_PLUGINS => Self::ListPlugins,
            kind::FUNC_INIT => Self::Init { config: map },
            kind::FUNC_START => {
                let broker = map
                    .get("brokerID")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| malformed("missing numeric 'brokerID'"))?;
                Self::Start {
                    broker: broker as u32,
                }
            }
            kind::SET_ENV => {
                let field = |name: &str| {
                    map.get(name)
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .ok_or_else(|| malformed(&format!("missing string '{name}'")))
                };
                Self::SetEnv {
                    key: field("key")?,
                    value: field("value")?,
                }
            }
            kind::START_ERROR => Self::StartError {
                plugin: map
                    .get("plugin")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                error: error_from_wire(&map),
            },
            kind::SERVICE_STOP => Self::ServiceStop {
                force: map.get("force").and_then(Value::as_bool).unwrap_or(false),
                error: error_from_wire(&map),
            },
            kind::LOAD_PLUGIN => Self::LoadPlugin { spec: map },
            kind::UNLOAD_PLUGIN => Self::UnloadPlugin {
                plugin: map
                    .get("name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| malformed("missing string 'name'"))?
                    .to_string(),
            },
            other => Self::Custom {
                kind: other.to_string(),
                body: map,
            },
        };
        Ok(payload)
    }
}

// =============================================================================
// Reply
// =============================================================================

/// The response half of a logical call: an optional error plus free-form
/// JSON fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reply {
    error: Option<String>,
    fields: JsonMap,
}

impl Reply {
    /// A successful, empty reply.
    pub fn ok() -> Self {
        Self::default()
    }

    /// A reply carrying an error message.
    pub fn err(error: impl std::fmt::Display) -> Self {
        Self {
            error: Some(error.to_string()),
            fields: JsonMap::new(),
        }
    }

    /// Builds a reply from a lifecycle result: `Ok` → [`Reply::ok`],
    /// `Err` → [`Reply::err`].
    pub fn from_result<E: std::fmt::Display>(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(e) => Self::err(e),
        }
    }

    /// Adds a field (builder pattern).
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Returns the error message, if any.
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Returns a field by key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Returns all free-form fields.
    pub fn fields(&self) -> &JsonMap {
        &self.fields
    }

    /// Converts the reply into its wire map, applying the `error`
    /// empty-string convention.
    pub fn to_wire(&self) -> JsonMap {
        let mut map = self.fields.clone();
        error_to_wire(&mut map, self.error.as_deref());
        map
    }

    /// Reconstructs a reply from a wire map.
    pub fn from_wire(mut map: JsonMap) -> Self {
        let error = error_from_wire(&map);
        map.remove(ERROR_KEY);
        Self { error, fields: map }
    }
}

// =============================================================================
// Reply rendezvous
// =============================================================================

/// Receiving side of an envelope's reply slot.
///
/// `recv` is memoized: the first call consumes the rendezvous, subsequent
/// calls return the same value.
pub struct ReplyHandle {
    rx: Mutex<Option<oneshot::Receiver<Reply>>>,
    memo: OnceLock<Reply>,
}

impl ReplyHandle {
    /// Waits for the reply.
    ///
    /// Returns [`EnvelopeError::ReplyDropped`] if the envelope was dropped
    /// unanswered, and [`EnvelopeError::ReplyBusy`] if another task is
    /// already awaiting this handle.
    pub async fn recv(&self) -> EnvelopeResult<Reply> {
        if let Some(reply) = self.memo.get() {
            return Ok(reply.clone());
        }
        let rx = {
            let mut slot = self.rx.lock();
            match slot.take() {
                Some(rx) => rx,
                None => {
                    // Raced with a completed recv: the memo is set by now.
                    return self
                        .memo
                        .get()
                        .cloned()
                        .ok_or(EnvelopeError::ReplyBusy);
                }
            }
        };
        let reply = rx.await.map_err(|_| EnvelopeError::ReplyDropped)?;
        Ok(self.memo.get_or_init(|| reply).clone())
    }
}

impl fmt::Debug for ReplyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplyHandle")
            .field("received", &self.memo.get().is_some())
            .finish()
    }
}

// =============================================================================
// Envelope
// =============================================================================

static NEXT_ENVELOPE_ID: AtomicU64 = AtomicU64::new(1);

fn next_envelope_id() -> String {
    format!("msg-{}", NEXT_ENVELOPE_ID.fetch_add(1, Ordering::Relaxed))
}

/// A self-contained message unit passed between plugins and the supervisor.
pub struct Envelope {
    id: String,
    from: String,
    to: String,
    ttl: i64,
    payload: Payload,
    reply: Option<oneshot::Sender<Reply>>,
}

impl Envelope {
    /// Creates an envelope expecting a reply, returning the paired
    /// [`ReplyHandle`].
    pub fn request(to: impl Into<String>, payload: Payload) -> (Self, ReplyHandle) {
        let (tx, rx) = oneshot::channel();
        let envelope = Self {
            id: next_envelope_id(),
            from: String::new(),
            to: to.into(),
            ttl: DEFAULT_TTL,
            payload,
            reply: Some(tx),
        };
        let handle = ReplyHandle {
            rx: Mutex::new(Some(rx)),
            memo: OnceLock::new(),
        };
        (envelope, handle)
    }

    /// Creates a one-way envelope with no reply slot.
    pub fn oneway(to: impl Into<String>, payload: Payload) -> Self {
        Self {
            id: next_envelope_id(),
            from: String::new(),
            to: to.into(),
            ttl: DEFAULT_TTL,
            payload,
            reply: None,
        }
    }

    /// Reconstructs an envelope from wire parts. The result carries no
    /// reply slot; replies cross the boundary as RPC responses instead.
    pub fn from_wire_parts(
        id: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        ttl: i64,
        payload: Payload,
    ) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            ttl,
            payload,
            reply: None,
        }
    }

    /// Sets the source mailbox name (builder pattern).
    pub fn with_from(mut self, from: impl Into<String>) -> Self {
        self.from = from.into();
        self
    }

    /// Overrides the hop budget (builder pattern).
    pub fn with_ttl(mut self, ttl: i64) -> Self {
        self.ttl = ttl;
        self
    }

    /// The opaque correlation id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Source mailbox name; may be empty.
    pub fn from(&self) -> &str {
        &self.from
    }

    /// Destination mailbox name.
    pub fn to(&self) -> &str {
        &self.to
    }

    /// Remaining hop budget.
    pub fn ttl(&self) -> i64 {
        self.ttl
    }

    /// The typed request payload.
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Consumes the envelope, yielding its payload.
    pub fn into_payload(self) -> Payload {
        self.payload
    }

    /// Retargets the envelope at a new destination.
    pub fn retarget(&mut self, to: impl Into<String>) {
        self.to = to.into();
    }

    /// Burns one hop. Returns the remaining budget.
    pub fn decrement_ttl(&mut self) -> i64 {
        self.ttl -= 1;
        self.ttl
    }

    /// Whether a reply slot is still attached and unanswered.
    pub fn expects_reply(&self) -> bool {
        self.reply.is_some()
    }

    /// Answers the envelope. At most one reply per envelope; a second call
    /// returns [`EnvelopeError::ReplyAlreadySent`].
    pub fn respond(&mut self, reply: Reply) -> EnvelopeResult<()> {
        match self.reply.take() {
            Some(tx) => {
                // A dropped handle is not an error: the caller chose not to wait.
                let _ = tx.send(reply);
                Ok(())
            }
            None => Err(EnvelopeError::ReplyAlreadySent),
        }
    }
}

impl fmt::Debug for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("id", &self.id)
            .field("from", &self.from)
            .field("to", &self.to)
            .field("type", &self.payload.kind())
            .field("ttl", &self.ttl)
            .field("expects_reply", &self.reply.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_kind_matches_wire_vocabulary() {
        assert_eq!(Payload::ModuleName.kind(), "func_modulename");
        assert_eq!(Payload::Start { broker: 7 }.kind(), "func_start");
        assert_eq!(
            Payload::Custom {
                kind: "ping".into(),
                body: JsonMap::new()
            }
            .kind(),
            "ping"
        );
    }

    #[test]
    fn start_error_wire_round_trip_preserves_error_convention() {
        let payload = Payload::StartError {
            plugin: "hello".into(),
            error: Some("boom".into()),
        };
        let map = payload.to_wire();
        assert_eq!(map.get("error"), Some(&Value::String("boom".into())));
        let back = Payload::from_wire(kind::START_ERROR, map).unwrap();
        assert_eq!(back, payload);

        let clean = Payload::StartError {
            plugin: "hello".into(),
            error: None,
        };
        let map = clean.to_wire();
        // nil error marshals to the empty string on the wire
        assert_eq!(map.get("error"), Some(&Value::String(String::new())));
        let back = Payload::from_wire(kind::START_ERROR, map).unwrap();
        assert_eq!(back, clean);
    }

    #[test]
    fn custom_payload_requires_an_object_body() {
        let err = Payload::custom("ping", &42).unwrap_err();
        assert!(matches!(err, EnvelopeError::NotAnObject { .. }));

        let payload = Payload::custom("ping", &serde_json::json!({"n": 1})).unwrap();
        assert_eq!(payload.kind(), "ping");
    }

    #[test]
    fn from_wire_rejects_malformed_control_payloads() {
        let err = Payload::from_wire(kind::FUNC_START, JsonMap::new()).unwrap_err();
        assert!(matches!(err, EnvelopeError::Malformed { .. }));

        let err = Payload::from_wire(kind::UNLOAD_PLUGIN, JsonMap::new()).unwrap_err();
        assert!(matches!(err, EnvelopeError::Malformed { .. }));
    }

    #[test]
    fn unknown_kind_becomes_custom() {
        let mut body = JsonMap::new();
        body.insert("n".into(), Value::from(3));
        let payload = Payload::from_wire("telemetry", body.clone()).unwrap();
        assert_eq!(
            payload,
            Payload::Custom {
                kind: "telemetry".into(),
                body
            }
        );
    }

    #[test]
    fn reply_wire_round_trip() {
        let reply = Reply::ok().with("name", "hello");
        let map = reply.to_wire();
        assert_eq!(map.get("error"), Some(&Value::String(String::new())));
        let back = Reply::from_wire(map);
        assert_eq!(back.error(), None);
        assert_eq!(back.get("name"), Some(&Value::String("hello".into())));

        let reply = Reply::err("broken");
        let back = Reply::from_wire(reply.to_wire());
        assert_eq!(back.error(), Some("broken"));
    }

    #[tokio::test]
    async fn reply_is_single_shot_and_memoized() {
        let (mut env, handle) = Envelope::request("hello", Payload::Stop);
        env.respond(Reply::ok().with("n", 1)).unwrap();
        assert!(matches!(
            env.respond(Reply::ok()),
            Err(EnvelopeError::ReplyAlreadySent)
        ));

        let first = handle.recv().await.unwrap();
        let second = handle.recv().await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.get("n"), Some(&Value::from(1)));
    }

    #[tokio::test]
    async fn dropped_envelope_resolves_reply_with_error() {
        let (env, handle) = Envelope::request("hello", Payload::Stop);
        drop(env);
        assert!(matches!(
            handle.recv().await,
            Err(EnvelopeError::ReplyDropped)
        ));
    }

    #[test]
    fn ttl_decrements() {
        let mut env = Envelope::oneway("nowhere", Payload::ListPlugins).with_ttl(2);
        assert_eq!(env.decrement_ttl(), 1);
        assert_eq!(env.decrement_ttl(), 0);
    }

    #[test]
    fn envelope_ids_are_unique() {
        let a = Envelope::oneway("x", Payload::Stop);
        let b = Envelope::oneway("x", Payload::Stop);
        assert_ne!(a.id(), b.id());
    }
}

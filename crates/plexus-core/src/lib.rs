//! # Plexus Core
//!
//! The message fabric of the Plexus service host.
//!
//! This crate provides the pieces every other layer builds on:
//!
//! - **Envelopes**: typed messages with correlation ids, TTL, and a
//!   single-shot reply rendezvous ([`Envelope`], [`Payload`], [`Reply`])
//! - **Mailboxes**: bounded FIFO queues addressed by plugin name, owned by
//!   the supervisor ([`Mailbox`], [`MailboxRegistry`])
//! - **Plugin contract**: the four lifecycle operations every plugin
//!   exposes, plus the dynamic-library export macro ([`Plugin`],
//!   [`PluginIo`], [`export_plugin!`])
//!
//! # Message flow
//!
//! ```text
//! ┌─────────┐  outbox   ┌──────────────┐  inbox   ┌─────────┐
//! │ plugin A│──────────▶│  supervisor  │─────────▶│ plugin B│
//! │         │           │  ("common")  │          │         │
//! └─────────┘           └──────────────┘          └─────────┘
//! ```
//!
//! Application messages always travel through the service mailbox; the
//! supervisor owns routing, TTL accounting, and the control vocabulary.

pub mod envelope;
pub mod error;
pub mod mailbox;
pub mod plugin;

pub use envelope::{
    DEFAULT_TTL, Envelope, JsonMap, Payload, Reply, ReplyHandle, error_from_wire, error_to_wire,
    kind,
};
pub use error::{
    EnvelopeError, EnvelopeResult, MailboxError, MailboxResult, PluginError, PluginResult,
};
pub use mailbox::{DEFAULT_MAILBOX_CAPACITY, Mailbox, MailboxRegistry, SERVICE_MAILBOX};
pub use plugin::{PLUGIN_API_VERSION, Plugin, PluginIo, SharedPlugin};

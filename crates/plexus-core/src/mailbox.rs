//! Mailboxes: bounded FIFO queues of envelopes, addressed by plugin name.
//!
//! The [`MailboxRegistry`] is owned by the supervisor. A mailbox is created
//! when its plugin loads and removed when it unloads; the distinguished
//! [`SERVICE_MAILBOX`] is the supervisor's own inbox, created at startup and
//! kept until shutdown.
//!
//! Each mailbox has exactly one consumer: the owning plugin claims the
//! receiver once via [`Mailbox::take_receiver`]. Senders are handed out
//! freely; a send into a full mailbox suspends, which is the only
//! backpressure mechanism in the fabric.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::debug;

use crate::envelope::Envelope;
use crate::error::{MailboxError, MailboxResult};

/// Name of the supervisor's own mailbox.
pub const SERVICE_MAILBOX: &str = "common";

/// Capacity used when a plugin spec does not override it.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1000;

// =============================================================================
// Mailbox
// =============================================================================

/// A bounded FIFO queue of envelopes. Capacity is frozen at creation.
pub struct Mailbox {
    name: String,
    capacity: usize,
    tx: mpsc::Sender<Envelope>,
    rx: Mutex<Option<mpsc::Receiver<Envelope>>>,
}

impl Mailbox {
    fn new(name: impl Into<String>, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            name: name.into(),
            capacity,
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// The mailbox name (a plugin name, or [`SERVICE_MAILBOX`]).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The capacity frozen at creation.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns a sender into this mailbox.
    pub fn sender(&self) -> mpsc::Sender<Envelope> {
        self.tx.clone()
    }

    /// Claims the consuming end. Returns `None` if it was already claimed.
    pub fn take_receiver(&self) -> Option<mpsc::Receiver<Envelope>> {
        self.rx.lock().take()
    }

    /// Enqueues an envelope, suspending while the mailbox is full.
    pub async fn send(&self, envelope: Envelope) -> MailboxResult<()> {
        self.tx
            .send(envelope)
            .await
            .map_err(|_| MailboxError::Closed {
                name: self.name.clone(),
            })
    }

    /// Enqueues an envelope without suspending.
    pub fn try_send(&self, envelope: Envelope) -> MailboxResult<()> {
        self.tx.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => MailboxError::Full {
                name: self.name.clone(),
            },
            mpsc::error::TrySendError::Closed(_) => MailboxError::Closed {
                name: self.name.clone(),
            },
        })
    }
}

impl std::fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .finish()
    }
}

// =============================================================================
// MailboxRegistry
// =============================================================================

/// Process-wide mapping from plugin name to mailbox.
///
/// Mutated only by the supervisor during load/unload; all other access is
/// read-only lookups.
pub struct MailboxRegistry {
    inner: RwLock<HashMap<String, Arc<Mailbox>>>,
}

impl MailboxRegistry {
    /// Creates a registry with the service mailbox already present.
    pub fn new() -> Self {
        let registry = Self {
            inner: RwLock::new(HashMap::new()),
        };
        registry.get_or_create(SERVICE_MAILBOX, None);
        registry
    }

    /// Returns the mailbox for `name`, creating it if absent.
    ///
    /// `capacity` applies only on creation; an existing mailbox keeps the
    /// capacity it was created with.
    pub fn get_or_create(&self, name: &str, capacity: Option<usize>) -> Arc<Mailbox> {
        if let Some(mailbox) = self.lookup(name) {
            return mailbox;
        }
        let mut inner = self.inner.write();
        Arc::clone(inner.entry(name.to_string()).or_insert_with(|| {
            let capacity = capacity.unwrap_or(DEFAULT_MAILBOX_CAPACITY);
            debug!(mailbox = %name, capacity, "mailbox created");
            Arc::new(Mailbox::new(name, capacity))
        }))
    }

    /// Looks up a mailbox by name.
    pub fn lookup(&self, name: &str) -> Option<Arc<Mailbox>> {
        self.inner.read().get(name).cloned()
    }

    /// Whether a mailbox with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().contains_key(name)
    }

    /// Removes a mailbox. The queue closes once every outstanding sender
    /// is dropped; the supervisor guarantees no in-flight sends by
    /// unloading in order (cancel, stop, then remove).
    pub fn remove(&self, name: &str) -> bool {
        let removed = self.inner.write().remove(name).is_some();
        if removed {
            debug!(mailbox = %name, "mailbox removed");
        }
        removed
    }

    /// Names of all current mailboxes.
    pub fn names(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }
}

impl Default for MailboxRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//! Per-conversation ticket sessions.
//!
//! One [`TicketSession`] exists per (conversation, sender) pair while a
//! ticket is being assembled. The [`SessionStore`] owns them behind
//! per-key async mutexes: events for one key are processed strictly in
//! arrival order (the tokio mutex queues waiters fairly), while different
//! keys proceed fully concurrently. Sessions are not persisted across
//! process restarts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;

use crate::directory::DirectoryEntry;
use crate::parser::TicketDraft;
use crate::selection::PendingSelection;

/// The stable (conversation, sender) pair identifying one in-progress
/// ticket conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    /// Conversation (chat/group) id.
    pub chat_id: String,
    /// Stable sender identifier (phone number preferred over transport id).
    pub sender: String,
}

impl SessionKey {
    /// Creates a session key.
    pub fn new(chat_id: impl Into<String>, sender: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            sender: sender.into(),
        }
    }
}

/// An attachment received but not yet uploaded.
#[derive(Debug, Clone)]
pub struct Attachment {
    /// Raw file bytes.
    pub bytes: Vec<u8>,
    /// MIME type.
    pub mime_type: String,
    /// Original filename, when the transport preserved one.
    pub filename: Option<String>,
}

/// State of one ticket conversation.
#[derive(Debug, Clone)]
pub struct TicketSession {
    /// The technician who opened the session (the authorized sender).
    pub technician: DirectoryEntry,
    /// The accumulating draft; `None` until the first parse succeeds.
    pub draft: Option<TicketDraft>,
    /// Backend id of the created ticket; presence marks "ticket created".
    pub ticket_id: Option<u64>,
    /// Attachments received before ticket creation, in receipt order.
    pub pending_attachments: Vec<Attachment>,
    /// Attachments successfully uploaded so far.
    pub uploaded_count: usize,
    /// Cached resolved requester id, per the last requester string.
    pub requester_id: Option<u64>,
    /// Cached resolved assignee id, per the last assignee string.
    pub assignee_id: Option<u64>,
    /// True until the first message with data arrives.
    pub awaiting_first_data: bool,
    /// The open disambiguation, at most one per session. While set, all
    /// draft mutation is suspended (attachments still buffer).
    pub pending_selection: Option<PendingSelection>,
}

impl TicketSession {
    /// Creates a fresh session for an authorized technician.
    #[must_use]
    pub fn new(technician: DirectoryEntry) -> Self {
        Self {
            technician,
            draft: None,
            ticket_id: None,
            pending_attachments: Vec::new(),
            uploaded_count: 0,
            requester_id: None,
            assignee_id: None,
            awaiting_first_data: true,
            pending_selection: None,
        }
    }

    /// Whether a ticket has been created for this session.
    #[must_use]
    pub fn ticket_created(&self) -> bool {
        self.ticket_id.is_some()
    }
}

/// The per-key slot type: `None` between sessions for a key.
pub type SessionSlot = Arc<Mutex<Option<TicketSession>>>;

/// Keyed map of conversation state, owned exclusively by the flow engine.
///
/// The outer map lock is a plain mutex held only for map lookups, never
/// across an await. All session access goes through the per-key slot.
#[derive(Default)]
pub struct SessionStore {
    slots: StdMutex<HashMap<SessionKey, SessionSlot>>,
}

impl SessionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the slot for a key, creating it when absent.
    ///
    /// Callers lock the returned slot for the whole duration of event
    /// handling; that is what serializes events per key.
    #[must_use]
    pub fn slot(&self, key: &SessionKey) -> SessionSlot {
        let mut slots = self.slots.lock().expect("session map poisoned");
        slots.entry(key.clone()).or_default().clone()
    }

    /// Drops the slot for a key. Holders of the slot `Arc` still see the
    /// cleared session inside it.
    pub fn remove(&self, key: &SessionKey) {
        let mut slots = self.slots.lock().expect("session map poisoned");
        slots.remove(key);
    }

    /// Number of keys with a live slot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.lock().expect("session map poisoned").len()
    }

    /// Returns true when no slots exist.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

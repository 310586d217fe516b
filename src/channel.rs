//! Messaging-channel collaborator boundary.
//!
//! The chat transport (delivery, reconnection, media download, poll
//! plumbing) lives outside this crate. This module defines the inbound
//! event types the transport feeds us and the [`MessagingChannel`] trait
//! the flow engine issues outbound actions through.
//!
//! The trait uses native `async fn`; the engine is generic over the
//! implementation so tests can drive it with an in-memory fake.

use serde::{Deserialize, Serialize};

use crate::error::TicketeroError;

/// An inbound chat message, normalized by the transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Message text (may be empty for pure media messages).
    #[serde(default)]
    pub body: String,

    /// Transport-internal sender identifier.
    pub sender_id: String,

    /// Sender's phone number, when the transport knows it.
    /// Preferred over `sender_id` for session keying: it is stable
    /// across reconnects.
    #[serde(default)]
    pub sender_number: String,

    /// Sender's display label (profile name / pushname).
    #[serde(default)]
    pub sender_label: String,

    /// Conversation (chat/group) identifier.
    pub chat_id: String,

    /// Whether the message carries downloadable media.
    #[serde(default)]
    pub has_media: bool,

    /// Media MIME type, when known before download.
    #[serde(default)]
    pub media_type: Option<String>,

    /// Filesystem path where the transport staged the downloaded media,
    /// for transports that hand media over as files.
    #[serde(default)]
    pub media_path: Option<String>,
}

/// A vote on a previously sent poll.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollVote {
    /// Conversation the poll was sent to.
    pub chat_id: String,

    /// Transport-internal voter identifier.
    pub sender_id: String,

    /// Voter's phone number, when known.
    #[serde(default)]
    pub sender_number: String,

    /// Identifier of the poll being voted on.
    #[serde(default)]
    pub poll_id: Option<String>,

    /// 0-based indexes of the selected options.
    #[serde(default)]
    pub selected_indexes: Vec<usize>,

    /// Labels of the selected options, in selection order.
    #[serde(default)]
    pub selected_labels: Vec<String>,
}

/// Downloaded media content.
#[derive(Debug, Clone)]
pub struct MediaPayload {
    /// Raw file bytes.
    pub bytes: Vec<u8>,

    /// MIME type reported by the transport.
    pub mime_type: String,

    /// Original filename, when the transport preserved one.
    pub filename: Option<String>,
}

/// Outbound actions the flow engine can ask the transport to perform.
///
/// `react` and `send_poll` are best-effort: a transport without poll
/// support returns `Ok(None)` from `send_poll`, which is a valid outcome,
/// not an error.
pub trait MessagingChannel {
    /// Downloads the media attached to a message.
    fn get_media(
        &self,
        message: &InboundMessage,
    ) -> impl std::future::Future<Output = Result<MediaPayload, TicketeroError>> + Send;

    /// Sends a text reply into a conversation.
    fn reply(
        &self,
        chat_id: &str,
        text: &str,
    ) -> impl std::future::Future<Output = Result<(), TicketeroError>> + Send;

    /// Reacts to the conversation with an emoji. Best-effort.
    fn react(
        &self,
        chat_id: &str,
        emoji: &str,
    ) -> impl std::future::Future<Output = Result<(), TicketeroError>> + Send;

    /// Sends a multiple-choice poll. Returns the poll id, or `None` when
    /// the transport cannot deliver polls.
    fn send_poll(
        &self,
        chat_id: &str,
        title: &str,
        options: &[String],
        allow_multiple: bool,
    ) -> impl std::future::Future<Output = Result<Option<String>, TicketeroError>> + Send;
}

impl InboundMessage {
    /// Returns the stable sender identifier for session keying:
    /// the phone number when present, else the transport id.
    #[must_use]
    pub fn stable_sender(&self) -> &str {
        if self.sender_number.is_empty() {
            &self.sender_id
        } else {
            &self.sender_number
        }
    }
}

impl PollVote {
    /// Returns the stable sender identifier for session keying.
    #[must_use]
    pub fn stable_sender(&self) -> &str {
        if self.sender_number.is_empty() {
            &self.sender_id
        } else {
            &self.sender_number
        }
    }
}

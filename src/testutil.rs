//! In-memory fakes for the collaborator boundaries, used across module
//! tests: a [`FakeBackend`] that interprets search criteria over a fixed
//! user list, and a [`FakeChannel`] that records outbound actions.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::backend::{FieldIds, NewTicket, TicketingBackend};
use crate::channel::{InboundMessage, MediaPayload, MessagingChannel};
use crate::error::TicketeroError;
use crate::glpi::models::{MatchType, SearchQuery};
use crate::glpi::UserCandidate;
use crate::normalize::fold_name;

/// Default field ids the fakes use (GLPI's well-known ids plus 131 for
/// the national-ID).
pub fn fake_fields() -> FieldIds {
    FieldIds {
        national_id: vec![131],
        login: 1,
        first_name: 9,
        last_name: 34,
        entity: None,
    }
}

/// An in-memory ticketing backend.
pub struct FakeBackend {
    /// The user directory queries run against.
    pub users: Vec<UserCandidate>,
    /// Field ids reported by `field_ids`.
    pub fields: FieldIds,
    /// What `is_enabled` reports.
    pub enabled: bool,
    /// When set, every criteria-bearing query returns nothing (simulates
    /// unreliable search metadata; only the full scan sees users).
    pub field_queries_return_empty: bool,
    /// When set, every search fails with an invalid-field error.
    pub fail_with_field_error: bool,
    /// When set, ticket creation fails with a backend error.
    pub fail_create: bool,
    /// Filenames whose upload should fail.
    pub fail_upload_filenames: Vec<String>,

    searches: AtomicUsize,
    next_ticket_id: AtomicU64,
    next_document_id: AtomicU64,
    created: Mutex<Vec<NewTicket>>,
    documents: Mutex<Vec<(String, String)>>,
    links: Mutex<Vec<(u64, u64)>>,
}

impl FakeBackend {
    /// Creates a backend over the given users.
    pub fn with_users(users: Vec<UserCandidate>) -> Self {
        Self {
            users,
            fields: fake_fields(),
            enabled: true,
            field_queries_return_empty: false,
            fail_with_field_error: false,
            fail_create: false,
            fail_upload_filenames: Vec::new(),
            searches: AtomicUsize::new(0),
            next_ticket_id: AtomicU64::new(1000),
            next_document_id: AtomicU64::new(500),
            created: Mutex::new(Vec::new()),
            documents: Mutex::new(Vec::new()),
            links: Mutex::new(Vec::new()),
        }
    }

    /// Number of searches issued so far.
    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }

    /// Tickets created so far.
    pub fn created_tickets(&self) -> Vec<NewTicket> {
        self.created.lock().unwrap().clone()
    }

    /// `(name, filename)` pairs of documents uploaded so far.
    pub fn uploaded_documents(&self) -> Vec<(String, String)> {
        self.documents.lock().unwrap().clone()
    }

    /// `(document_id, ticket_id)` links recorded so far.
    pub fn document_links(&self) -> Vec<(u64, u64)> {
        self.links.lock().unwrap().clone()
    }

    fn field_value(&self, candidate: &UserCandidate, field: u32) -> Option<String> {
        if self.fields.national_id.contains(&field) {
            candidate.national_id.clone()
        } else if field == self.fields.login {
            Some(candidate.login.clone())
        } else if field == self.fields.first_name {
            Some(candidate.first_name.clone())
        } else if field == self.fields.last_name {
            Some(candidate.last_name.clone())
        } else if Some(field) == self.fields.entity {
            candidate.entity.clone()
        } else {
            None
        }
    }
}

impl TicketingBackend for FakeBackend {
    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn field_ids(&self) -> Result<FieldIds, TicketeroError> {
        Ok(self.fields.clone())
    }

    async fn search_users(
        &self,
        query: &SearchQuery,
    ) -> Result<Vec<UserCandidate>, TicketeroError> {
        self.searches.fetch_add(1, Ordering::SeqCst);

        if self.fail_with_field_error {
            return Err(TicketeroError::InvalidFieldMapping {
                field_id: query.criteria.first().map(|c| c.field).unwrap_or_default(),
                message: "Bad field ID".to_string(),
            });
        }
        if self.field_queries_return_empty && !query.criteria.is_empty() {
            return Ok(Vec::new());
        }

        let matches: Vec<UserCandidate> = self
            .users
            .iter()
            .filter(|user| {
                query.criteria.iter().all(|criterion| {
                    let Some(value) = self.field_value(user, criterion.field) else {
                        return false;
                    };
                    let value = fold_name(&value);
                    let needle = fold_name(&criterion.value);
                    match criterion.match_type {
                        MatchType::Exact => value == needle,
                        MatchType::Contains => value.contains(&needle),
                    }
                })
            })
            .cloned()
            .collect();

        let start = query.range_start as usize;
        let end = (query.range_end as usize + 1).min(matches.len());
        Ok(if start >= matches.len() {
            Vec::new()
        } else {
            matches[start..end].to_vec()
        })
    }

    async fn create_ticket(&self, ticket: &NewTicket) -> Result<u64, TicketeroError> {
        if self.fail_create {
            return Err(TicketeroError::glpi_api("ERROR", "backend unavailable"));
        }
        self.created.lock().unwrap().push(ticket.clone());
        Ok(self.next_ticket_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn create_document(
        &self,
        name: &str,
        filename: &str,
        _mime_type: &str,
        _bytes: &[u8],
    ) -> Result<u64, TicketeroError> {
        if self.fail_upload_filenames.iter().any(|f| f == filename) {
            return Err(TicketeroError::glpi_api("ERROR", "upload rejected"));
        }
        self.documents
            .lock()
            .unwrap()
            .push((name.to_string(), filename.to_string()));
        Ok(self.next_document_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn link_document(&self, document_id: u64, ticket_id: u64) -> Result<(), TicketeroError> {
        self.links.lock().unwrap().push((document_id, ticket_id));
        Ok(())
    }
}

/// A poll sent through the fake channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPoll {
    pub chat_id: String,
    pub title: String,
    pub options: Vec<String>,
}

/// An in-memory messaging channel recording every outbound action.
pub struct FakeChannel {
    /// Whether `send_poll` reports poll support.
    pub poll_support: bool,
    /// Filename reported for downloaded media.
    pub media_filename: Option<String>,

    replies: Mutex<Vec<(String, String)>>,
    reactions: Mutex<Vec<(String, String)>>,
    polls: Mutex<Vec<SentPoll>>,
    next_poll: AtomicUsize,
}

impl Default for FakeChannel {
    fn default() -> Self {
        Self {
            poll_support: true,
            media_filename: None,
            replies: Mutex::new(Vec::new()),
            reactions: Mutex::new(Vec::new()),
            polls: Mutex::new(Vec::new()),
            next_poll: AtomicUsize::new(1),
        }
    }
}

impl FakeChannel {
    /// Creates a channel with poll support.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a channel whose transport cannot deliver polls.
    pub fn without_polls() -> Self {
        Self {
            poll_support: false,
            ..Self::default()
        }
    }

    /// `(chat_id, text)` replies sent so far.
    pub fn replies(&self) -> Vec<(String, String)> {
        self.replies.lock().unwrap().clone()
    }

    /// The last reply text, if any.
    pub fn last_reply(&self) -> Option<String> {
        self.replies.lock().unwrap().last().map(|(_, t)| t.clone())
    }

    /// Reactions sent so far.
    pub fn reactions(&self) -> Vec<(String, String)> {
        self.reactions.lock().unwrap().clone()
    }

    /// Polls sent so far.
    pub fn polls(&self) -> Vec<SentPoll> {
        self.polls.lock().unwrap().clone()
    }
}

impl MessagingChannel for FakeChannel {
    async fn get_media(&self, message: &InboundMessage) -> Result<MediaPayload, TicketeroError> {
        Ok(MediaPayload {
            bytes: if message.body.is_empty() {
                b"media".to_vec()
            } else {
                message.body.clone().into_bytes()
            },
            mime_type: message
                .media_type
                .clone()
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            filename: self.media_filename.clone(),
        })
    }

    async fn reply(&self, chat_id: &str, text: &str) -> Result<(), TicketeroError> {
        self.replies
            .lock()
            .unwrap()
            .push((chat_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn react(&self, chat_id: &str, emoji: &str) -> Result<(), TicketeroError> {
        self.reactions
            .lock()
            .unwrap()
            .push((chat_id.to_string(), emoji.to_string()));
        Ok(())
    }

    async fn send_poll(
        &self,
        chat_id: &str,
        title: &str,
        options: &[String],
        _allow_multiple: bool,
    ) -> Result<Option<String>, TicketeroError> {
        if !self.poll_support {
            return Ok(None);
        }
        self.polls.lock().unwrap().push(SentPoll {
            chat_id: chat_id.to_string(),
            title: title.to_string(),
            options: options.to_vec(),
        });
        let id = self.next_poll.fetch_add(1, Ordering::SeqCst);
        Ok(Some(format!("poll-{}", id)))
    }
}

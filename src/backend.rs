//! Ticketing-backend collaborator boundary.
//!
//! The flow engine and the identity resolver consume the backend through
//! this trait so tests can drive them with an in-memory fake;
//! [`crate::glpi::GlpiClient`] is the production implementation.

use crate::error::TicketeroError;
use crate::glpi::models::SearchQuery;
use crate::glpi::UserCandidate;

/// Fields of a ticket about to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTicket {
    /// Ticket title.
    pub title: String,
    /// HTML content block (already entity-escaped).
    pub html_content: String,
    /// Category id.
    pub category_id: u32,
    /// Resolved requester user id.
    pub requester_id: u64,
    /// Resolved assignee user id, when one applies.
    pub assignee_id: Option<u64>,
}

/// Search-option ids the identity resolver builds criteria with.
///
/// Either configured up front or auto-detected once per process from the
/// backend's search metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldIds {
    /// Fields that may hold the national-ID, in probe order.
    pub national_id: Vec<u32>,
    /// Login field.
    pub login: u32,
    /// First-name field.
    pub first_name: u32,
    /// Last-name field.
    pub last_name: u32,
    /// Entity field for organizational scoping, when available.
    pub entity: Option<u32>,
}

/// The external system of record for tickets and the user directory.
///
/// All operations are potentially failing network calls except
/// [`is_enabled`](TicketingBackend::is_enabled), which must answer without
/// I/O so callers can short-circuit before any network work.
pub trait TicketingBackend {
    /// Whether the backend is configured at all.
    fn is_enabled(&self) -> bool;

    /// Returns the search-field ids, detecting them from backend metadata
    /// on first use when not configured.
    fn field_ids(
        &self,
    ) -> impl std::future::Future<Output = Result<FieldIds, TicketeroError>> + Send;

    /// Runs a user search and lifts the rows into candidates.
    fn search_users(
        &self,
        query: &SearchQuery,
    ) -> impl std::future::Future<Output = Result<Vec<UserCandidate>, TicketeroError>> + Send;

    /// Creates a ticket and returns its id.
    fn create_ticket(
        &self,
        ticket: &NewTicket,
    ) -> impl std::future::Future<Output = Result<u64, TicketeroError>> + Send;

    /// Uploads a document and returns its id.
    fn create_document(
        &self,
        name: &str,
        filename: &str,
        mime_type: &str,
        bytes: &[u8],
    ) -> impl std::future::Future<Output = Result<u64, TicketeroError>> + Send;

    /// Links an uploaded document to a ticket.
    fn link_document(
        &self,
        document_id: u64,
        ticket_id: u64,
    ) -> impl std::future::Future<Output = Result<(), TicketeroError>> + Send;
}

//! # Ticketero
//!
//! Ticketero turns free-form help-desk chat messages into GLPI tickets.
//!
//! A technician writes a message like `SOLICITANTE: 73872028` /
//! `PROBLEMA: no enciende el equipo` (or a loose `name - problem` line) into
//! a chat; ticketero parses it, resolves the requester against the GLPI user
//! directory, asks for clarification when several users match, creates the
//! ticket, and attaches any files sent along the way.
//!
//! ## Features
//!
//! - **Free-text parsing**: key-value, arrow, and loose-dash message formats
//!   with a Spanish synonym table, accent- and case-insensitive
//! - **Identity resolution**: multi-strategy lookup by national-ID or name,
//!   with interactive disambiguation via polls or numbered replies
//! - **Session state machine**: one ticket conversation per (chat, sender)
//!   pair, events processed strictly in order per conversation
//! - **Attachments**: buffered before ticket creation, uploaded in order
//!   after, with per-file error isolation
//! - **Security**: GLPI tokens are never logged or exposed in error messages
//!
//! ## Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`config`] - Configuration loading from environment variables
//! - [`error`] - Error types with security-conscious message sanitization
//! - [`normalize`] - Accent/case/whitespace folding for keys and names
//! - [`parser`] - Free-text message parsing into a [`parser::TicketDraft`]
//! - [`directory`] - The technician directory gating who may open tickets
//! - [`channel`] - The messaging-channel boundary (inbound events, outbound
//!   actions)
//! - [`backend`] - The ticketing-backend boundary (search, create, upload)
//! - [`glpi`] - The GLPI REST implementation of the backend
//! - [`resolver`] - Identity resolution over the backend's user search
//! - [`selection`] - Interactive disambiguation of ambiguous lookups
//! - [`session`] - Per-conversation state and the keyed session store
//! - [`engine`] - The orchestrating state machine
//! - [`render`] - Ticket title and HTML content rendering
//!
//! ## Usage
//!
//! Ticketero is primarily used as a binary bridging a chat transport to
//! GLPI. To run:
//!
//! ```bash
//! # Set required environment variables
//! export GLPI_BASE_URL=https://glpi.example.com/apirest.php
//! export GLPI_APP_TOKEN=your-app-token
//! export GLPI_USER_TOKEN=your-user-token
//!
//! ./ticketero
//! ```
//!
//! Without the GLPI variables the engine still runs (parsing, sessions,
//! prompts) but reports the backend as not configured when a ticket would
//! be created.
//!
//! ## Security Considerations
//!
//! The GLPI tokens are stored only in memory and are:
//! - Never logged at any log level
//! - Sanitized from all error messages
//! - Not included in any user-facing reply
//!
//! ## Example
//!
//! Driving the [`engine::TicketEngine`] directly:
//!
//! ```ignore
//! use ticketero::channel::InboundMessage;
//! use ticketero::config::Config;
//! use ticketero::directory::TechnicianDirectory;
//! use ticketero::engine::TicketEngine;
//! use ticketero::glpi::GlpiClient;
//!
//! async fn example(channel: impl ticketero::channel::MessagingChannel) {
//!     let config = Config::from_env().unwrap();
//!     let backend = GlpiClient::new(config.glpi.clone()).unwrap();
//!     let directory = TechnicianDirectory::from_entries([("51987654321", "Carlos Rojas")]);
//!     let engine = TicketEngine::new(backend, channel, directory, &config);
//!
//!     let message = InboundMessage {
//!         body: "ticket SOLICITANTE: 73872028\nPROBLEMA: no enciende".to_string(),
//!         sender_number: "51987654321".to_string(),
//!         chat_id: "soporte".to_string(),
//!         ..InboundMessage::default()
//!     };
//!     engine.handle_message(&message).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backend;
pub mod channel;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod glpi;
pub mod normalize;
pub mod parser;
pub mod render;
pub mod resolver;
pub mod selection;
pub mod session;

#[cfg(test)]
mod testutil;

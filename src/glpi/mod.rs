//! GLPI REST API integration.
//!
//! Split into wire [`models`] and the HTTP [`client`].

pub mod client;
pub mod models;

pub use client::GlpiClient;
pub use models::{SearchQuery, UserCandidate};

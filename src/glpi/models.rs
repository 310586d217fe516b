//! Wire models for the GLPI REST API.
//!
//! GLPI's search endpoint returns rows as JSON objects keyed by *numeric
//! search-option ids* (as strings), so the models here are thin: a generic
//! envelope plus helpers that lift rows into [`UserCandidate`] values.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::normalize::fold_name;

/// Well-known User search-option ids, stable across GLPI versions.
pub mod user_fields {
    /// Login name (`name`).
    pub const LOGIN: u32 = 1;
    /// Numeric id.
    pub const ID: u32 = 2;
    /// Location.
    pub const LOCATION: u32 = 3;
    /// Email address.
    pub const EMAIL: u32 = 5;
    /// Phone.
    pub const PHONE: u32 = 6;
    /// First name.
    pub const FIRSTNAME: u32 = 9;
    /// Mobile phone.
    pub const MOBILE: u32 = 11;
    /// Last name (`realname`).
    pub const REALNAME: u32 = 34;
    /// Entity.
    pub const ENTITY: u32 = 80;
    /// User title / job title.
    pub const TITLE: u32 = 81;
}

/// Response of `POST /initSession`.
#[derive(Debug, Clone, Deserialize)]
pub struct InitSessionResponse {
    /// The session token carried on every subsequent request.
    pub session_token: String,
}

/// Response of `POST /Ticket`, `POST /Document`, `POST /Document_Item`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreatedId {
    /// Id of the created item.
    pub id: u64,
}

/// Envelope of `GET /search/<Itemtype>`.
///
/// Every row is a map from search-option id (stringified) to a value that
/// may be a string, a number, or an array of either.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    /// Total matching rows on the server (not just this page).
    #[serde(default)]
    pub totalcount: u32,

    /// Rows in this page.
    #[serde(default)]
    pub data: Vec<HashMap<String, Value>>,
}

/// Match type for a search criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    /// `searchtype=equals`.
    Exact,
    /// `searchtype=contains`.
    Contains,
}

impl MatchType {
    /// The `searchtype` value GLPI expects.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MatchType::Exact => "equals",
            MatchType::Contains => "contains",
        }
    }
}

/// One `criteria[i]` block of a search query.
#[derive(Debug, Clone)]
pub struct Criterion {
    /// Search-option id of the field.
    pub field: u32,
    /// Match type.
    pub match_type: MatchType,
    /// Value to match.
    pub value: String,
}

impl Criterion {
    /// Creates an exact-match criterion.
    pub fn exact(field: u32, value: impl Into<String>) -> Self {
        Self {
            field,
            match_type: MatchType::Exact,
            value: value.into(),
        }
    }

    /// Creates a contains-match criterion.
    pub fn contains(field: u32, value: impl Into<String>) -> Self {
        Self {
            field,
            match_type: MatchType::Contains,
            value: value.into(),
        }
    }
}

/// A user search query: AND-joined criteria plus a result range.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// AND-joined criteria.
    pub criteria: Vec<Criterion>,
    /// Start of the requested range (0-based).
    pub range_start: u32,
    /// Inclusive end of the requested range.
    pub range_end: u32,
}

impl Default for SearchQuery {
    fn default() -> Self {
        Self {
            criteria: Vec::new(),
            range_start: 0,
            range_end: 49,
        }
    }
}

impl SearchQuery {
    /// Creates a query with the given criteria and the default range.
    #[must_use]
    pub fn new(criteria: Vec<Criterion>) -> Self {
        Self {
            criteria,
            ..Self::default()
        }
    }

    /// Sets the result range.
    #[must_use]
    pub fn with_range(mut self, start: u32, end: u32) -> Self {
        self.range_start = start;
        self.range_end = end;
        self
    }
}

/// A search option advertised by `GET /listSearchOptions/<Itemtype>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOption {
    /// Numeric search-option id.
    pub id: u32,
    /// Column name (e.g., `registration_number`).
    pub field: String,
    /// Human-readable label.
    pub name: String,
    /// Backing table (e.g., `glpi_entities`), when advertised.
    pub table: String,
}

/// Parses the `listSearchOptions` payload into typed options.
///
/// The payload mixes numeric-id entries with grouping keys; non-numeric
/// keys and malformed entries are skipped.
#[must_use]
pub fn parse_search_options(payload: &Value) -> Vec<SearchOption> {
    let Some(map) = payload.as_object() else {
        return Vec::new();
    };
    let mut options: Vec<SearchOption> = map
        .iter()
        .filter_map(|(key, entry)| {
            let id: u32 = key.parse().ok()?;
            let field = entry.get("field")?.as_str()?.to_string();
            let name = entry
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let table = entry
                .get("table")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Some(SearchOption {
                id,
                field,
                name,
                table,
            })
        })
        .collect();
    options.sort_by_key(|o| o.id);
    options
}

/// A backend identity candidate returned by a user search.
///
/// Contact fields are used only to *enrich* a sparse draft once the
/// candidate is confirmed, never to overwrite explicit user input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserCandidate {
    /// Unique GLPI user id.
    pub id: u64,
    /// Login name.
    pub login: String,
    /// First name.
    pub first_name: String,
    /// Last name.
    pub last_name: String,
    /// Email address, when listed.
    pub email: Option<String>,
    /// Phone, when listed.
    pub phone: Option<String>,
    /// Mobile, when listed.
    pub mobile: Option<String>,
    /// Job title, when listed.
    pub job_title: Option<String>,
    /// Entity / department, when listed.
    pub entity: Option<String>,
    /// Location (building/floor), when listed.
    pub location: Option<String>,
    /// National-ID, when one of the configured fields carried it.
    pub national_id: Option<String>,
}

impl UserCandidate {
    /// Builds a candidate from a search row, reading the well-known display
    /// fields plus the configured national-ID field ids.
    #[must_use]
    pub fn from_row(row: &HashMap<String, Value>, national_id_fields: &[u32]) -> Option<Self> {
        let id = row_value(row, user_fields::ID)?.parse::<u64>().ok()?;
        let national_id = national_id_fields
            .iter()
            .find_map(|f| row_value(row, *f))
            .filter(|v| !v.is_empty());
        Some(Self {
            id,
            login: row_value(row, user_fields::LOGIN).unwrap_or_default(),
            first_name: row_value(row, user_fields::FIRSTNAME).unwrap_or_default(),
            last_name: row_value(row, user_fields::REALNAME).unwrap_or_default(),
            email: row_value(row, user_fields::EMAIL).filter(|v| !v.is_empty()),
            phone: row_value(row, user_fields::PHONE).filter(|v| !v.is_empty()),
            mobile: row_value(row, user_fields::MOBILE).filter(|v| !v.is_empty()),
            job_title: row_value(row, user_fields::TITLE).filter(|v| !v.is_empty()),
            entity: row_value(row, user_fields::ENTITY).filter(|v| !v.is_empty()),
            location: row_value(row, user_fields::LOCATION).filter(|v| !v.is_empty()),
            national_id,
        })
    }

    /// Formatted display name: "First Last", falling back to the login.
    #[must_use]
    pub fn display_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name)
            .trim()
            .to_string();
        if name.is_empty() {
            self.login.clone()
        } else {
            name
        }
    }

    /// Normalized comparison keys this candidate answers to: full name,
    /// reversed name, and login.
    #[must_use]
    pub fn match_keys(&self) -> Vec<String> {
        let mut keys = Vec::with_capacity(3);
        let full = fold_name(&format!("{} {}", self.first_name, self.last_name));
        let reversed = fold_name(&format!("{} {}", self.last_name, self.first_name));
        for key in [full, reversed, fold_name(&self.login)] {
            if !key.is_empty() && !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }
}

/// Extracts a row value as a string, tolerating numbers and arrays
/// (GLPI returns arrays for multi-valued fields; the first entry wins).
fn row_value(row: &HashMap<String, Value>, field: u32) -> Option<String> {
    let value = row.get(&field.to_string())?;
    scalar_string(value)
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(items) => items.first().and_then(scalar_string),
        _ => None,
    }
}

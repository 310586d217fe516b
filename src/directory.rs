//! Technician directory.
//!
//! A read-only lookup table mapping technician phone numbers to display
//! names, loaded once at startup from a JSON file. The flow engine uses it
//! as its authorization gate: only senders that resolve to a known
//! technician may open ticket sessions.

use std::collections::HashMap;
use std::path::Path;

use crate::error::TicketeroError;
use crate::normalize::fold_name;

/// A technician known to the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Phone number as listed in the directory (digits only).
    pub phone: String,
    /// Display name as listed in the directory.
    pub name: String,
}

/// Phone-keyed technician directory with reverse and fuzzy lookups.
#[derive(Debug, Default, Clone)]
pub struct TechnicianDirectory {
    /// phone (digits only) -> display name.
    by_phone: HashMap<String, String>,
}

impl TechnicianDirectory {
    /// Creates an empty directory. Every sender is then unauthorized.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a directory from (phone, name) pairs.
    pub fn from_entries<I, P, N>(entries: I) -> Self
    where
        I: IntoIterator<Item = (P, N)>,
        P: AsRef<str>,
        N: Into<String>,
    {
        let by_phone = entries
            .into_iter()
            .map(|(phone, name)| (digits_only(phone.as_ref()), name.into()))
            .filter(|(phone, _)| !phone.is_empty())
            .collect();
        Self { by_phone }
    }

    /// Loads the directory from a JSON file of `{"phone": "name"}` pairs.
    ///
    /// # Errors
    ///
    /// Returns `TicketeroError::Config` when the file cannot be read and
    /// `TicketeroError::Serialization` when it is not valid JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TicketeroError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TicketeroError::invalid_config(format!(
                "cannot read technician directory {}: {}",
                path.display(),
                e
            ))
        })?;
        let map: HashMap<String, String> = serde_json::from_str(&raw)?;
        Ok(Self::from_entries(map))
    }

    /// Number of technicians in the directory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_phone.len()
    }

    /// Returns true when the directory has no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_phone.is_empty()
    }

    /// Looks up a technician by phone number.
    ///
    /// Comparison is on digits only, tolerating a country-code prefix on
    /// either side (one number may be a suffix of the other, minimum 8
    /// shared digits).
    #[must_use]
    pub fn by_phone(&self, phone: &str) -> Option<DirectoryEntry> {
        let digits = digits_only(phone);
        if digits.is_empty() {
            return None;
        }
        if let Some(name) = self.by_phone.get(&digits) {
            return Some(DirectoryEntry {
                phone: digits,
                name: name.clone(),
            });
        }
        self.by_phone
            .iter()
            .find(|(known, _)| phones_match(known, &digits))
            .map(|(known, name)| DirectoryEntry {
                phone: known.clone(),
                name: name.clone(),
            })
    }

    /// Looks up a technician by a phone number embedded in a display label
    /// (e.g., "Carlos +51 987 654 321").
    #[must_use]
    pub fn by_phone_in_label(&self, label: &str) -> Option<DirectoryEntry> {
        let digits = digits_only(label);
        if digits.len() < 8 {
            return None;
        }
        self.by_phone
            .iter()
            .find(|(known, _)| digits.contains(known.as_str()) || phones_match(known, &digits))
            .map(|(known, name)| DirectoryEntry {
                phone: known.clone(),
                name: name.clone(),
            })
    }

    /// Fuzzy-matches a sender's display label against directory names.
    ///
    /// A directory name matches when all of its normalized tokens appear
    /// among the label's tokens (or the reverse for short labels). The
    /// first match in iteration order wins; directory names are expected
    /// to be distinct enough that order does not matter.
    #[must_use]
    pub fn by_label(&self, label: &str) -> Option<DirectoryEntry> {
        let label_tokens: Vec<String> = fold_name(label)
            .split(' ')
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();
        if label_tokens.is_empty() {
            return None;
        }
        self.by_phone
            .iter()
            .find(|(_, name)| {
                let name_tokens: Vec<String> = fold_name(name)
                    .split(' ')
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect();
                !name_tokens.is_empty()
                    && (name_tokens.iter().all(|t| label_tokens.contains(t))
                        || label_tokens.iter().all(|t| name_tokens.contains(t)))
            })
            .map(|(phone, name)| DirectoryEntry {
                phone: phone.clone(),
                name: name.clone(),
            })
    }

    /// Resolves a sender to a technician: direct phone first, then a phone
    /// embedded in the label, then fuzzy label match.
    #[must_use]
    pub fn resolve_sender(&self, number: &str, label: &str) -> Option<DirectoryEntry> {
        self.by_phone(number)
            .or_else(|| self.by_phone_in_label(label))
            .or_else(|| self.by_label(label))
    }
}

/// Strips everything but ASCII digits.
fn digits_only(value: &str) -> String {
    value.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// True when one number is a suffix of the other with at least 8 digits
/// in common (tolerates country-code prefixes).
fn phones_match(a: &str, b: &str) -> bool {
    if a.len() < 8 || b.len() < 8 {
        return false;
    }
    a.ends_with(b) || b.ends_with(a)
}

//! Configuration management for ticketero.
//!
//! This module handles loading configuration from environment variables,
//! with validation to ensure all required values are present and sane.
//!
//! The GLPI backend is optional: when none of its variables are set the
//! bridge runs with ticketing disabled and tells users so, instead of
//! failing at startup. A *partial* GLPI configuration is an error.

use std::env;

use url::Url;

use crate::error::TicketeroError;

/// Connection settings for the GLPI backend.
///
/// Both tokens are stored but never logged or exposed in error messages.
#[derive(Clone)]
pub struct GlpiSettings {
    /// Base URL of the GLPI REST API (e.g., `https://glpi.example.com/apirest.php`).
    pub base_url: String,

    /// GLPI application token (`App-Token` header).
    /// This value must never be logged or included in error messages.
    pub app_token: String,

    /// GLPI user API token (used to open sessions).
    /// This value must never be logged or included in error messages.
    pub user_token: String,

    /// Entity id used to scope user searches, when set.
    pub entity_id: Option<u32>,

    /// Search-option ids holding the national-ID, when known up front.
    /// Auto-detected from `listSearchOptions/User` when empty.
    pub national_id_fields: Vec<u32>,

    /// Search-option id of the login field, when known up front.
    pub login_field: Option<u32>,

    /// Search-option id of the entity field, when known up front.
    pub entity_field: Option<u32>,
}

/// Full application configuration.
#[derive(Clone)]
pub struct Config {
    /// GLPI settings, present only when the backend is configured.
    pub glpi: Option<GlpiSettings>,

    /// Category id written on created tickets when the draft names none.
    pub default_category_id: u32,

    /// Category label shown to users for the default category.
    pub default_category_name: String,

    /// Name looked up when a draft has no requester at all.
    pub default_requester: Option<String>,

    /// Path to the technician directory JSON file (phone -> display name).
    pub technicians_file: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// GLPI backend (all-or-none):
    /// - `GLPI_BASE_URL`: REST API base URL
    /// - `GLPI_APP_TOKEN`: application token
    /// - `GLPI_USER_TOKEN`: user API token
    ///
    /// Optional:
    /// - `GLPI_ENTITY_ID`: entity id for scoped searches
    /// - `GLPI_NATIONAL_ID_FIELDS`: comma-separated search-option ids
    /// - `GLPI_LOGIN_FIELD`, `GLPI_ENTITY_FIELD`: search-option ids
    /// - `DEFAULT_CATEGORY_ID`, `DEFAULT_CATEGORY_NAME`
    /// - `DEFAULT_REQUESTER`: fallback requester name
    /// - `TECHNICIANS_FILE`: path to the technician directory JSON
    ///
    /// # Errors
    ///
    /// Returns `TicketeroError::Config` if the GLPI block is partially set,
    /// a URL or numeric value fails validation, or a token looks like a
    /// placeholder.
    pub fn from_env() -> Result<Self, TicketeroError> {
        let base_url = optional_env("GLPI_BASE_URL");
        let app_token = optional_env("GLPI_APP_TOKEN");
        let user_token = optional_env("GLPI_USER_TOKEN");

        let glpi = match (base_url, app_token, user_token) {
            (Some(base_url), Some(app_token), Some(user_token)) => {
                let base_url = validate_base_url(base_url)?;
                validate_token("GLPI_APP_TOKEN", &app_token)?;
                validate_token("GLPI_USER_TOKEN", &user_token)?;
                Some(GlpiSettings {
                    base_url,
                    app_token,
                    user_token,
                    entity_id: parse_optional_u32("GLPI_ENTITY_ID")?,
                    national_id_fields: parse_field_list("GLPI_NATIONAL_ID_FIELDS")?,
                    login_field: parse_optional_u32("GLPI_LOGIN_FIELD")?,
                    entity_field: parse_optional_u32("GLPI_ENTITY_FIELD")?,
                })
            }
            (None, None, None) => None,
            _ => {
                return Err(TicketeroError::invalid_config(
                    "GLPI_BASE_URL, GLPI_APP_TOKEN and GLPI_USER_TOKEN must be set together",
                ))
            }
        };

        Ok(Config {
            glpi,
            default_category_id: parse_optional_u32("DEFAULT_CATEGORY_ID")?.unwrap_or(0),
            default_category_name: optional_env("DEFAULT_CATEGORY_NAME")
                .unwrap_or_else(|| "Incidente".to_string()),
            default_requester: optional_env("DEFAULT_REQUESTER"),
            technicians_file: optional_env("TECHNICIANS_FILE"),
        })
    }

    /// Returns true when the GLPI backend is configured.
    #[must_use]
    pub fn glpi_enabled(&self) -> bool {
        self.glpi.is_some()
    }
}

/// Gets an environment variable, treating blank values as absent.
fn optional_env(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Validates and normalizes the GLPI base URL.
fn validate_base_url(url: String) -> Result<String, TicketeroError> {
    let url = url.trim().trim_end_matches('/').to_string();

    let parsed = Url::parse(&url)
        .map_err(|e| TicketeroError::invalid_config(format!("GLPI_BASE_URL is invalid: {}", e)))?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(TicketeroError::invalid_config(
            "GLPI_BASE_URL must start with http:// or https://",
        ));
    }

    Ok(url)
}

/// Validates a token is not a placeholder value.
fn validate_token(name: &str, token: &str) -> Result<(), TicketeroError> {
    let lower = token.to_lowercase();
    let placeholder_patterns = ["your_token", "your_key", "placeholder", "xxx", "changeme"];

    for pattern in placeholder_patterns {
        if lower.contains(pattern) {
            return Err(TicketeroError::invalid_config(format!(
                "{} appears to be a placeholder value",
                name
            )));
        }
    }

    Ok(())
}

/// Parses an optional numeric environment variable.
fn parse_optional_u32(name: &str) -> Result<Option<u32>, TicketeroError> {
    match optional_env(name) {
        None => Ok(None),
        Some(value) => value.parse::<u32>().map(Some).map_err(|_| {
            TicketeroError::invalid_config(format!("{} must be a number, got {:?}", name, value))
        }),
    }
}

/// Parses a comma-separated list of search-option ids.
fn parse_field_list(name: &str) -> Result<Vec<u32>, TicketeroError> {
    match optional_env(name) {
        None => Ok(Vec::new()),
        Some(value) => value
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<u32>().map_err(|_| {
                    TicketeroError::invalid_config(format!(
                        "{} must be comma-separated numbers, got {:?}",
                        name, s
                    ))
                })
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Note: tests that modify environment variables should not run in
    // parallel. These only exercise the pure validation helpers.

    #[test]
    fn test_validate_base_url_removes_trailing_slash() {
        let result = validate_base_url("https://glpi.example.com/apirest.php/".to_string()).unwrap();
        assert_eq!(result, "https://glpi.example.com/apirest.php");
    }

    #[test]
    fn test_validate_base_url_requires_scheme() {
        assert!(validate_base_url("glpi.example.com".to_string()).is_err());
    }

    #[test]
    fn test_validate_base_url_rejects_other_schemes() {
        assert!(validate_base_url("ftp://glpi.example.com".to_string()).is_err());
    }

    #[test]
    fn test_validate_token_rejects_placeholder() {
        assert!(validate_token("GLPI_APP_TOKEN", "your_token_here").is_err());
    }

    #[test]
    fn test_validate_token_accepts_real_token() {
        assert!(validate_token("GLPI_APP_TOKEN", "abc123def456").is_ok());
    }
}

//! HTTP client for the GLPI REST API.
//!
//! # Sessions
//!
//! GLPI authenticates with an app token plus a per-session token obtained
//! from `initSession`. The session token is process-wide, lazily
//! initialized and single-flight: concurrent first callers await the same
//! in-flight login instead of issuing duplicate logins. A request that
//! fails with an invalid-session error is retried exactly once behind a
//! fresh login; a second failure propagates.
//!
//! # Security
//!
//! The app and user tokens are never logged. All error bodies are
//! sanitized before logging or surfacing.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Client, Method, StatusCode};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::backend::{FieldIds, NewTicket, TicketingBackend};
use crate::config::GlpiSettings;
use crate::error::TicketeroError;
use crate::glpi::models::{
    parse_search_options, user_fields, CreatedId, InitSessionResponse, SearchQuery, SearchResponse,
};
use crate::glpi::UserCandidate;
use crate::normalize::fold_name;

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Maximum length for HTTP error bodies kept in error values.
const MAX_ERROR_BODY_LEN: usize = 500;

/// Process-wide lazily initialized client state.
#[derive(Default)]
struct SharedState {
    /// Current session token, when a session is open.
    session_token: Option<String>,
    /// Search-field ids, once configured or detected.
    field_ids: Option<FieldIds>,
}

/// HTTP client for the GLPI REST API.
///
/// Cloning is cheap; clones share the HTTP pool, the session token and the
/// field-id cache.
#[derive(Clone)]
pub struct GlpiClient {
    /// The underlying HTTP client.
    http: Client,

    /// Connection settings; `None` when the backend is not configured.
    settings: Option<Arc<GlpiSettings>>,

    /// Shared session/field-cache state.
    state: Arc<Mutex<SharedState>>,
}

impl GlpiClient {
    /// Creates a client from optional settings.
    ///
    /// With `None` the client reports itself disabled and every operation
    /// short-circuits with a configuration error before any network call.
    ///
    /// # Errors
    ///
    /// Returns `TicketeroError::HttpClient` if the HTTP client fails to
    /// initialize.
    pub fn new(settings: Option<GlpiSettings>) -> Result<Self, TicketeroError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(TicketeroError::HttpClient)?;

        Ok(Self {
            http,
            settings: settings.map(Arc::new),
            state: Arc::new(Mutex::new(SharedState::default())),
        })
    }

    fn settings(&self) -> Result<&GlpiSettings, TicketeroError> {
        self.settings.as_deref().ok_or_else(|| {
            TicketeroError::invalid_config("GLPI backend is not configured")
        })
    }

    fn secrets(&self) -> Vec<&str> {
        match self.settings.as_deref() {
            Some(s) => vec![s.app_token.as_str(), s.user_token.as_str()],
            None => Vec::new(),
        }
    }

    /// Opens a GLPI session and returns its token.
    async fn login(&self) -> Result<String, TicketeroError> {
        let settings = self.settings()?;
        let url = format!("{}/initSession", settings.base_url);

        tracing::debug!("Opening GLPI session");

        let response = self
            .http
            .post(&url)
            .header("App-Token", &settings.app_token)
            .header(
                "Authorization",
                format!("user_token {}", settings.user_token),
            )
            .send()
            .await
            .map_err(TicketeroError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => TicketeroError::Authentication,
                _ => self.status_error(status, body),
            });
        }

        let session: InitSessionResponse =
            response.json().await.map_err(TicketeroError::Http)?;

        tracing::info!("GLPI session opened");
        Ok(session.session_token)
    }

    /// Returns the current session token, logging in on first use.
    ///
    /// The state lock is held across the login so concurrent first callers
    /// wait for the single in-flight login.
    async fn session_token(&self) -> Result<String, TicketeroError> {
        let mut state = self.state.lock().await;
        if let Some(token) = &state.session_token {
            return Ok(token.clone());
        }
        let token = self.login().await?;
        state.session_token = Some(token.clone());
        Ok(token)
    }

    /// Drops a session token known to be stale. A token refreshed by a
    /// concurrent request is left alone.
    async fn invalidate_session(&self, stale: &str) {
        let mut state = self.state.lock().await;
        if state.session_token.as_deref() == Some(stale) {
            state.session_token = None;
        }
    }

    /// Makes an authenticated request, retrying once behind a fresh login
    /// when the session token is rejected.
    async fn request_json<T>(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<&Value>,
    ) -> Result<T, TicketeroError>
    where
        T: serde::de::DeserializeOwned,
    {
        let token = self.session_token().await?;
        match self
            .request_inner(method.clone(), path_and_query, body, &token)
            .await
        {
            Err(e) if e.is_invalid_session() => {
                tracing::debug!(path = %path_and_query, "Session rejected, re-authenticating once");
                self.invalidate_session(&token).await;
                let token = self.session_token().await?;
                self.request_inner(method, path_and_query, body, &token)
                    .await
            }
            other => other,
        }
    }

    async fn request_inner<T>(
        &self,
        method: Method,
        path_and_query: &str,
        body: Option<&Value>,
        session_token: &str,
    ) -> Result<T, TicketeroError>
    where
        T: serde::de::DeserializeOwned,
    {
        let settings = self.settings()?;
        let url = format!("{}{}", settings.base_url, path_and_query);

        tracing::debug!(method = %method, path = %path_and_query, "GLPI request");

        let mut req = self
            .http
            .request(method, &url)
            .header("App-Token", &settings.app_token)
            .header("Session-Token", session_token);

        if let Some(body) = body {
            req = req.json(body);
        }

        let response = req.send().await.map_err(TicketeroError::Http)?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(self.status_error(status, body));
        }

        let body = response.text().await.map_err(TicketeroError::Http)?;
        tracing::trace!(body = %body, "GLPI response");

        serde_json::from_str(&body).map_err(TicketeroError::Serialization)
    }

    /// Maps a non-success response to an error.
    ///
    /// GLPI error bodies are JSON arrays of `[code, message]`.
    fn status_error(&self, status: StatusCode, body: String) -> TicketeroError {
        let secrets = self.secrets();
        let body = TicketeroError::sanitize_message(&body, &secrets);
        let body = if body.len() > MAX_ERROR_BODY_LEN {
            let mut end = MAX_ERROR_BODY_LEN;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}...[truncated]", &body[..end])
        } else {
            body
        };

        if let Ok(Value::Array(parts)) = serde_json::from_str::<Value>(&body) {
            let code = parts.first().and_then(Value::as_str).unwrap_or_default();
            let message = parts.get(1).and_then(Value::as_str).unwrap_or_default();
            if !code.is_empty() {
                if code == "ERROR_SESSION_TOKEN_INVALID" {
                    return TicketeroError::InvalidSession;
                }
                return TicketeroError::glpi_api(code, message);
            }
        }

        match status {
            StatusCode::UNAUTHORIZED => TicketeroError::InvalidSession,
            StatusCode::FORBIDDEN => TicketeroError::Authentication,
            _ => TicketeroError::HttpStatus { status, body },
        }
    }

    /// Detects search-field ids from `listSearchOptions/User`, honoring
    /// configured overrides.
    async fn detect_field_ids(&self) -> Result<FieldIds, TicketeroError> {
        let settings = self.settings()?;

        let mut fields = FieldIds {
            national_id: settings.national_id_fields.clone(),
            login: settings.login_field.unwrap_or(user_fields::LOGIN),
            first_name: user_fields::FIRSTNAME,
            last_name: user_fields::REALNAME,
            entity: settings.entity_field,
        };

        let needs_metadata = fields.national_id.is_empty()
            || (settings.entity_id.is_some() && fields.entity.is_none());
        if !needs_metadata {
            return Ok(fields);
        }

        let payload: Value = self
            .request_json(Method::GET, "/listSearchOptions/User", None)
            .await?;
        let options = parse_search_options(&payload);

        if fields.national_id.is_empty() {
            fields.national_id = options
                .iter()
                .filter(|o| {
                    o.field == "registration_number" || fold_name(&o.name).contains("DNI")
                })
                .map(|o| o.id)
                .collect();
            if fields.national_id.is_empty() {
                tracing::warn!(
                    "No national-ID search field detected; ID lookups will use the login field"
                );
            }
        }

        if settings.entity_id.is_some() && fields.entity.is_none() {
            fields.entity = options
                .iter()
                .find(|o| o.table == "glpi_entities" && o.field == "completename")
                .map(|o| o.id);
        }

        tracing::debug!(?fields, "Resolved GLPI search fields");
        Ok(fields)
    }

    /// Builds the query string for a user search.
    fn search_query_string(query: &SearchQuery, national_id_fields: &[u32]) -> String {
        let mut qs = String::new();
        for (i, criterion) in query.criteria.iter().enumerate() {
            if i > 0 {
                qs.push_str(&format!("criteria[{}][link]=AND&", i));
            }
            qs.push_str(&format!(
                "criteria[{i}][field]={}&criteria[{i}][searchtype]={}&criteria[{i}][value]={}&",
                criterion.field,
                criterion.match_type.as_str(),
                urlencoding::encode(&criterion.value),
            ));
        }

        let mut display: Vec<u32> = vec![
            user_fields::ID,
            user_fields::LOGIN,
            user_fields::FIRSTNAME,
            user_fields::REALNAME,
            user_fields::EMAIL,
            user_fields::PHONE,
            user_fields::MOBILE,
            user_fields::TITLE,
            user_fields::ENTITY,
            user_fields::LOCATION,
        ];
        for field in national_id_fields {
            if !display.contains(field) {
                display.push(*field);
            }
        }
        for (i, field) in display.iter().enumerate() {
            qs.push_str(&format!("forcedisplay[{}]={}&", i, field));
        }

        qs.push_str(&format!("range={}-{}", query.range_start, query.range_end));
        qs
    }
}

impl TicketingBackend for GlpiClient {
    fn is_enabled(&self) -> bool {
        self.settings.is_some()
    }

    async fn field_ids(&self) -> Result<FieldIds, TicketeroError> {
        {
            let state = self.state.lock().await;
            if let Some(fields) = &state.field_ids {
                return Ok(fields.clone());
            }
        }
        let fields = self.detect_field_ids().await?;
        let mut state = self.state.lock().await;
        Ok(state.field_ids.get_or_insert(fields).clone())
    }

    async fn search_users(
        &self,
        query: &SearchQuery,
    ) -> Result<Vec<UserCandidate>, TicketeroError> {
        let fields = self.field_ids().await?;
        let qs = Self::search_query_string(query, &fields.national_id);
        let path = format!("/search/User?{}", qs);

        let response: SearchResponse = self
            .request_json(Method::GET, &path, None)
            .await
            .map_err(|e| match e {
                // A rejected criteria field is a configuration problem,
                // not a miss; surface it verbatim and unretried.
                TicketeroError::GlpiApi { code, message }
                    if message.to_lowercase().contains("field")
                        || code.contains("FIELD") =>
                {
                    TicketeroError::InvalidFieldMapping {
                        field_id: query.criteria.first().map(|c| c.field).unwrap_or_default(),
                        message: format!("{}: {}", code, message),
                    }
                }
                other => other,
            })?;

        let candidates = response
            .data
            .iter()
            .filter_map(|row| UserCandidate::from_row(row, &fields.national_id))
            .collect();
        Ok(candidates)
    }

    async fn create_ticket(&self, ticket: &NewTicket) -> Result<u64, TicketeroError> {
        let mut input = serde_json::Map::new();
        input.insert("name".to_string(), Value::String(ticket.title.clone()));
        input.insert(
            "content".to_string(),
            Value::String(ticket.html_content.clone()),
        );
        input.insert(
            "itilcategories_id".to_string(),
            Value::from(ticket.category_id),
        );
        input.insert(
            "_users_id_requester".to_string(),
            Value::from(ticket.requester_id),
        );
        if let Some(assignee) = ticket.assignee_id {
            input.insert("_users_id_assign".to_string(), Value::from(assignee));
        }

        let body = serde_json::json!({ "input": input });
        let created: CreatedId = self
            .request_json(Method::POST, "/Ticket", Some(&body))
            .await?;

        tracing::info!(ticket_id = created.id, "Created GLPI ticket");
        Ok(created.id)
    }

    async fn create_document(
        &self,
        name: &str,
        filename: &str,
        mime_type: &str,
        bytes: &[u8],
    ) -> Result<u64, TicketeroError> {
        let body = serde_json::json!({
            "input": {
                "name": name,
                "filename": filename,
                "mime": mime_type,
                "base64": BASE64.encode(bytes),
            }
        });
        let created: CreatedId = self
            .request_json(Method::POST, "/Document", Some(&body))
            .await?;

        tracing::debug!(document_id = created.id, "Uploaded GLPI document");
        Ok(created.id)
    }

    async fn link_document(&self, document_id: u64, ticket_id: u64) -> Result<(), TicketeroError> {
        let body = serde_json::json!({
            "input": {
                "documents_id": document_id,
                "items_id": ticket_id,
                "itemtype": "Ticket",
            }
        });
        let _created: CreatedId = self
            .request_json(Method::POST, "/Document_Item", Some(&body))
            .await?;
        Ok(())
    }
}

//! Identity resolution engine.
//!
//! Resolves a raw human-entered value (an 8-digit national-ID or a free-form
//! name) into a backend user record, via a cascade of search strategies
//! against the ticketing backend. Each strategy's results are deduplicated
//! by id; the first strategy producing at least one candidate after
//! client-side name filtering wins.
//!
//! When the backend exposes an entity field and an entity id is configured,
//! every query runs scoped to that entity first and is retried unscoped when
//! the scoped form returns nothing.

use crate::backend::{FieldIds, TicketingBackend};
use crate::error::TicketeroError;
use crate::glpi::models::{Criterion, SearchQuery};
use crate::glpi::UserCandidate;
use crate::normalize::{is_national_id, tokens};

/// Token count above which subset-partition enumeration is skipped in
/// favor of contiguous split points only, to bound cost.
const PARTITION_MAX_TOKENS: usize = 6;

/// Page size for the last-resort full scan.
const SCAN_PAGE_SIZE: u32 = 100;

/// Maximum pages the full scan will fetch.
const SCAN_MAX_PAGES: u32 = 10;

/// Maximum candidates the full scan will return.
const SCAN_RESULT_CAP: usize = 50;

/// The role a value is being resolved for.
///
/// Role-specific policy lives here rather than in string comparisons
/// scattered through the cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The person the ticket is opened for.
    Requester,
    /// The technician the ticket is assigned to.
    Assignee,
}

impl Role {
    /// Minimum whitespace-separated tokens a name lookup needs.
    #[must_use]
    pub fn min_name_tokens(self) -> usize {
        match self {
            Role::Requester => 2,
            Role::Assignee => 1,
        }
    }

    /// Spanish label used in user-facing prompts.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Role::Requester => "solicitante",
            Role::Assignee => "asignado",
        }
    }
}

/// Outcome of a resolution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Exactly one candidate matched.
    Single(UserCandidate),
    /// Two or more distinct candidates matched; the caller must
    /// disambiguate interactively.
    Ambiguous(Vec<UserCandidate>),
    /// Zero candidates matched; the caller prompts for a different input.
    NotFound,
    /// No value was given and the role tolerates that (assignee only).
    NoValue,
}

/// Identity resolver over a ticketing backend.
pub struct Resolver<'a, B> {
    backend: &'a B,
    /// Entity id for organizational scoping, when configured.
    entity_id: Option<u32>,
    /// Name looked up when the requester value is empty.
    default_requester: Option<String>,
}

impl<'a, B: TicketingBackend> Resolver<'a, B> {
    /// Creates a resolver.
    pub fn new(backend: &'a B, entity_id: Option<u32>, default_requester: Option<String>) -> Self {
        Self {
            backend,
            entity_id,
            default_requester,
        }
    }

    /// Resolves a raw value for a role.
    ///
    /// # Errors
    ///
    /// Propagates backend errors. A rejected search-field id
    /// (`InvalidFieldMapping`) aborts the cascade immediately; it would
    /// fail identically on every later strategy.
    pub async fn resolve(
        &self,
        role: Role,
        raw_value: &str,
        allow_name_lookup: bool,
    ) -> Result<Resolution, TicketeroError> {
        let value = raw_value.trim();

        if value.is_empty() {
            return match role {
                Role::Assignee => Ok(Resolution::NoValue),
                Role::Requester => match &self.default_requester {
                    Some(default) => {
                        let default = default.clone();
                        tracing::debug!(default = %default, "Empty requester, using default");
                        Box::pin(self.resolve(role, &default, true)).await
                    }
                    None => Ok(Resolution::NotFound),
                },
            };
        }

        let fields = self.backend.field_ids().await?;

        if is_national_id(value) {
            self.resolve_national_id(value, &fields).await
        } else {
            self.resolve_name(role, value, allow_name_lookup, &fields)
                .await
        }
    }

    /// National-ID cascade: configured ID fields exact, then contains,
    /// then the login field, then a free-text sweep over the name fields.
    async fn resolve_national_id(
        &self,
        value: &str,
        fields: &FieldIds,
    ) -> Result<Resolution, TicketeroError> {
        for exact in [true, false] {
            for field in &fields.national_id {
                let criterion = if exact {
                    Criterion::exact(*field, value)
                } else {
                    Criterion::contains(*field, value)
                };
                let found = self.run_scoped(vec![criterion], fields).await?;
                if !found.is_empty() {
                    return Ok(outcome(found));
                }
            }
        }

        for criterion in [
            Criterion::exact(fields.login, value),
            Criterion::contains(fields.login, value),
        ] {
            let found = self.run_scoped(vec![criterion], fields).await?;
            if !found.is_empty() {
                return Ok(outcome(found));
            }
        }

        // Free-text sweep: some deployments stash the ID in a name field.
        let mut sweep = Vec::new();
        for field in [fields.first_name, fields.last_name] {
            let found = self
                .run_scoped(vec![Criterion::contains(field, value)], fields)
                .await?;
            merge_by_id(&mut sweep, found);
        }
        if sweep.is_empty() {
            Ok(Resolution::NotFound)
        } else {
            Ok(outcome(sweep))
        }
    }

    /// Name cascade: first/last partitions, single-field contains, login,
    /// then a bounded full scan with client-side filtering.
    async fn resolve_name(
        &self,
        role: Role,
        value: &str,
        allow_name_lookup: bool,
        fields: &FieldIds,
    ) -> Result<Resolution, TicketeroError> {
        if !allow_name_lookup {
            return Err(TicketeroError::validation(format!(
                "name lookup is disabled for {}: send the 8-digit ID instead",
                role.label()
            )));
        }

        let toks = tokens(value);
        if toks.len() < role.min_name_tokens() {
            return Err(TicketeroError::validation(format!(
                "a {} name needs at least {} words",
                role.label(),
                role.min_name_tokens()
            )));
        }

        // Strategy 1: every first-name/last-name partition as an AND query.
        let mut found = Vec::new();
        for (first, last) in name_partitions(&toks) {
            let criteria = vec![
                Criterion::contains(fields.first_name, first.clone()),
                Criterion::contains(fields.last_name, last.clone()),
            ];
            merge_by_id(&mut found, self.run_scoped(criteria, fields).await?);
        }
        let filtered = filter_by_name(&found, &toks);
        if !filtered.is_empty() {
            return Ok(outcome(filtered));
        }

        // Strategy 2: single-field contains per whole value and per token.
        let mut found = Vec::new();
        let mut probes: Vec<String> = vec![value.to_string()];
        probes.extend(toks.iter().cloned());
        for probe in &probes {
            for field in [fields.first_name, fields.last_name] {
                merge_by_id(
                    &mut found,
                    self.run_scoped(vec![Criterion::contains(field, probe.clone())], fields)
                        .await?,
                );
            }
        }
        let filtered = filter_by_name(&found, &toks);
        if !filtered.is_empty() {
            return Ok(outcome(filtered));
        }

        // Strategy 3: the value might be a login.
        let found = self
            .run_scoped(vec![Criterion::contains(fields.login, value)], fields)
            .await?;
        let filtered = filter_by_name(&found, &toks);
        if !filtered.is_empty() {
            return Ok(outcome(filtered));
        }

        // Strategy 4: bounded full scan for backends whose search-field
        // metadata is unreliable.
        let scanned = self.full_scan(&toks, fields).await?;
        if scanned.is_empty() {
            Ok(Resolution::NotFound)
        } else {
            Ok(outcome(scanned))
        }
    }

    /// Runs a query scoped to the configured entity, retrying unscoped
    /// when the scoped form finds nothing.
    async fn run_scoped(
        &self,
        criteria: Vec<Criterion>,
        fields: &FieldIds,
    ) -> Result<Vec<UserCandidate>, TicketeroError> {
        if let (Some(entity_id), Some(entity_field)) = (self.entity_id, fields.entity) {
            let mut scoped = criteria.clone();
            scoped.push(Criterion::exact(entity_field, entity_id.to_string()));
            let found = self.backend.search_users(&SearchQuery::new(scoped)).await?;
            if !found.is_empty() {
                return Ok(found);
            }
        }
        self.backend.search_users(&SearchQuery::new(criteria)).await
    }

    /// Pages through all users, keeping client-side substring matches,
    /// capped in pages and results.
    async fn full_scan(
        &self,
        toks: &[String],
        fields: &FieldIds,
    ) -> Result<Vec<UserCandidate>, TicketeroError> {
        let mut matches: Vec<UserCandidate> = Vec::new();
        for page in 0..SCAN_MAX_PAGES {
            let start = page * SCAN_PAGE_SIZE;
            let query = SearchQuery::new(Vec::new())
                .with_range(start, start + SCAN_PAGE_SIZE - 1);
            let rows = self.run_scoped_query(&query, fields).await?;
            let row_count = rows.len();

            merge_by_id(&mut matches, filter_by_name(&rows, toks));
            if matches.len() >= SCAN_RESULT_CAP {
                matches.truncate(SCAN_RESULT_CAP);
                break;
            }
            if row_count < SCAN_PAGE_SIZE as usize {
                break;
            }
        }
        tracing::debug!(matches = matches.len(), "Full-scan fallback finished");
        Ok(matches)
    }

    /// Like [`run_scoped`](Self::run_scoped) but preserving an explicit range.
    async fn run_scoped_query(
        &self,
        query: &SearchQuery,
        fields: &FieldIds,
    ) -> Result<Vec<UserCandidate>, TicketeroError> {
        if let (Some(entity_id), Some(entity_field)) = (self.entity_id, fields.entity) {
            let mut scoped = query.clone();
            scoped
                .criteria
                .push(Criterion::exact(entity_field, entity_id.to_string()));
            let found = self.backend.search_users(&scoped).await?;
            if !found.is_empty() {
                return Ok(found);
            }
        }
        self.backend.search_users(query).await
    }
}

/// Maps a non-empty candidate list to its resolution.
fn outcome(mut candidates: Vec<UserCandidate>) -> Resolution {
    debug_assert!(!candidates.is_empty());
    if candidates.len() == 1 {
        Resolution::Single(candidates.remove(0))
    } else {
        Resolution::Ambiguous(candidates)
    }
}

/// Appends candidates not already present (by id), preserving order.
fn merge_by_id(into: &mut Vec<UserCandidate>, from: Vec<UserCandidate>) {
    for candidate in from {
        if !into.iter().any(|c| c.id == candidate.id) {
            into.push(candidate);
        }
    }
}

/// Client-side name filter: keeps candidates for which every query token
/// is a substring of one of the candidate's match keys.
fn filter_by_name(candidates: &[UserCandidate], toks: &[String]) -> Vec<UserCandidate> {
    candidates
        .iter()
        .filter(|c| {
            let keys = c.match_keys();
            toks.iter()
                .all(|t| keys.iter().any(|k| k.contains(t.as_str())))
        })
        .cloned()
        .collect()
}

/// Generates first-name/last-name partitions of the token list.
///
/// Contiguous split points in both orders come first; for short names
/// every non-trivial subset partition follows (bitmask enumeration -
/// deliberate bounded search, not an optimization shortcut). Duplicate
/// pairs are dropped.
fn name_partitions(toks: &[String]) -> Vec<(String, String)> {
    let n = toks.len();
    let mut pairs: Vec<(String, String)> = Vec::new();
    let push = |first: String, last: String, pairs: &mut Vec<(String, String)>| {
        if !first.is_empty() && !last.is_empty() {
            let pair = (first, last);
            if !pairs.contains(&pair) {
                pairs.push(pair);
            }
        }
    };

    for split in 1..n {
        let head = toks[..split].join(" ");
        let tail = toks[split..].join(" ");
        push(head.clone(), tail.clone(), &mut pairs);
        push(tail, head, &mut pairs);
    }

    if n <= PARTITION_MAX_TOKENS {
        for mask in 1u32..(1 << n) - 1 {
            let mut first = Vec::new();
            let mut last = Vec::new();
            for (i, tok) in toks.iter().enumerate() {
                if mask & (1 << i) != 0 {
                    first.push(tok.clone());
                } else {
                    last.push(tok.clone());
                }
            }
            push(first.join(" "), last.join(" "), &mut pairs);
        }
    }

    pairs
}

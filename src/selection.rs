//! Interactive disambiguation of ambiguous identity lookups.
//!
//! When the resolver returns two or more candidates, the flow engine
//! offers them to the user - as a structured poll when the transport
//! supports one, else as a numbered text list - and resolves the follow-up
//! reply or poll vote to exactly one candidate.

use crate::channel::{MessagingChannel, PollVote};
use crate::error::TicketeroError;
use crate::glpi::UserCandidate;
use crate::normalize::fold_name;
use crate::parser::TicketDraft;
use crate::resolver::Role;

/// Maximum candidates offered in one selection.
pub const MAX_CANDIDATES: usize = 10;

/// An open selection: one per session at most, cleared the instant a
/// candidate is chosen.
#[derive(Debug, Clone)]
pub struct PendingSelection {
    /// The role under resolution.
    pub role: Role,
    /// The bounded candidate list offered, in display order.
    pub candidates: Vec<UserCandidate>,
    /// The option labels shown, index-aligned with `candidates`.
    pub labels: Vec<String>,
    /// Whether a poll was actually delivered.
    pub poll_sent: bool,
    /// The delivered poll's identifier, when the transport gave one.
    pub poll_id: Option<String>,
}

/// Builds the option labels for a candidate list.
///
/// Each label is the candidate's formatted display name; the login is
/// appended in parentheses only for names that collide after
/// normalization.
#[must_use]
pub fn build_labels(candidates: &[UserCandidate]) -> Vec<String> {
    let folded: Vec<String> = candidates
        .iter()
        .map(|c| fold_name(&c.display_name()))
        .collect();
    candidates
        .iter()
        .enumerate()
        .map(|(i, candidate)| {
            let collides = folded
                .iter()
                .enumerate()
                .any(|(j, other)| j != i && *other == folded[i]);
            if collides && !candidate.login.is_empty() {
                format!("{} ({})", candidate.display_name(), candidate.login)
            } else {
                candidate.display_name()
            }
        })
        .collect()
}

/// Offers a candidate list to the user.
///
/// Prefers a poll; falls back to a numbered text list when the transport
/// cannot deliver polls. Returns the pending selection to park on the
/// session.
pub async fn offer<C: MessagingChannel>(
    channel: &C,
    chat_id: &str,
    role: Role,
    mut candidates: Vec<UserCandidate>,
) -> Result<PendingSelection, TicketeroError> {
    candidates.truncate(MAX_CANDIDATES);
    let labels = build_labels(&candidates);
    let title = format!("Se encontraron varios usuarios. Elige el {}:", role.label());

    let poll_id = channel.send_poll(chat_id, &title, &labels, false).await?;
    let poll_sent = poll_id.is_some();

    if !poll_sent {
        let mut text = format!("{}\nResponde con el número:\n", title);
        for (i, label) in labels.iter().enumerate() {
            text.push_str(&format!("{}. {}\n", i + 1, label));
        }
        channel.reply(chat_id, text.trim_end()).await?;
    }

    tracing::debug!(
        role = role.label(),
        candidates = candidates.len(),
        poll_sent,
        "Offered disambiguation"
    );

    Ok(PendingSelection {
        role,
        candidates,
        labels,
        poll_sent,
        poll_id,
    })
}

impl PendingSelection {
    /// Resolves a text reply to a candidate: a 1-based index, or an exact
    /// normalized match on name, reversed name, login, or offered label.
    ///
    /// Returns `None` when the reply matches nothing; the selection stays
    /// open and the caller re-prompts.
    #[must_use]
    pub fn resolve_reply(&self, input: &str) -> Option<&UserCandidate> {
        let input = input.trim();
        if let Ok(index) = input.parse::<usize>() {
            if (1..=self.candidates.len()).contains(&index) {
                return Some(&self.candidates[index - 1]);
            }
            return None;
        }
        self.resolve_label(input)
    }

    /// Resolves a poll vote: the selected option index first, falling back
    /// to the selected option's label text.
    #[must_use]
    pub fn resolve_vote(&self, vote: &PollVote) -> Option<&UserCandidate> {
        for &index in &vote.selected_indexes {
            if index < self.candidates.len() {
                return Some(&self.candidates[index]);
            }
        }
        vote.selected_labels
            .iter()
            .find_map(|label| self.resolve_label(label))
    }

    fn resolve_label(&self, input: &str) -> Option<&UserCandidate> {
        let needle = fold_name(input);
        if needle.is_empty() {
            return None;
        }
        self.candidates.iter().enumerate().find_map(|(i, c)| {
            let mut keys = c.match_keys();
            keys.push(fold_name(&self.labels[i]));
            keys.contains(&needle).then_some(c)
        })
    }
}

/// Back-fills sparse draft fields from a confirmed candidate.
///
/// Only fields currently empty are touched; explicit user input is never
/// overwritten.
pub fn enrich_draft(draft: &mut TicketDraft, candidate: &UserCandidate) {
    fill(&mut draft.display_name, &candidate.display_name());
    fill_opt(&mut draft.national_id, candidate.national_id.as_deref());
    fill_opt(&mut draft.email, candidate.email.as_deref());
    fill_opt(
        &mut draft.phone,
        candidate.phone.as_deref().or(candidate.mobile.as_deref()),
    );
    fill_opt(&mut draft.job_title, candidate.job_title.as_deref());
    fill_opt(&mut draft.department, candidate.entity.as_deref());
    fill_opt(&mut draft.floor, candidate.location.as_deref());
}

fn fill(target: &mut String, value: &str) {
    if target.is_empty() && !value.is_empty() {
        *target = value.to_string();
    }
}

fn fill_opt(target: &mut String, value: Option<&str>) {
    if let Some(value) = value {
        fill(target, value);
    }
}

//! Ticket rendering: title synthesis and the HTML content block.
//!
//! The content block is a fixed fragment of labeled paragraphs; every
//! interpolated value is HTML-entity escaped.

use crate::parser::TicketDraft;

/// Maximum ticket title length, in characters.
const MAX_TITLE_CHARS: usize = 120;

/// Escapes the HTML-significant characters of a value.
#[must_use]
pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Synthesizes the ticket title: `requester: problem`, truncated to a
/// fixed maximum length on a character boundary.
#[must_use]
pub fn ticket_title(draft: &TicketDraft) -> String {
    let full = if draft.requester.is_empty() {
        draft.problem.clone()
    } else {
        format!("{}: {}", draft.requester, draft.problem)
    };
    if full.chars().count() <= MAX_TITLE_CHARS {
        full
    } else {
        full.chars().take(MAX_TITLE_CHARS).collect()
    }
}

/// Builds the HTML content block from the full draft.
///
/// `category_name` is the label actually written on the ticket (the
/// draft's own category or the configured default).
#[must_use]
pub fn ticket_content(draft: &TicketDraft, category_name: &str) -> String {
    let mut html = String::new();
    paragraph(&mut html, "Problema", &draft.problem);
    paragraph(&mut html, "Categoría", category_name);
    paragraph(&mut html, "Nombre", &draft.display_name);
    paragraph(&mut html, "DNI", &draft.national_id);
    paragraph(&mut html, "Teléfono", &draft.phone);
    paragraph(&mut html, "Correo", &draft.email);
    paragraph(&mut html, "Cargo", &draft.job_title);
    paragraph(&mut html, "Área", &draft.department);
    paragraph(&mut html, "Piso", &draft.floor);
    html
}

fn paragraph(html: &mut String, label: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    html.push_str(&format!(
        "<p><strong>{}:</strong> {}</p>",
        label,
        escape_html(value)
    ));
}

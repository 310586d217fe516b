//! Free-text ticket parser.
//!
//! Converts an unstructured chat message into a partial [`TicketDraft`]
//! using a cascade of three strategies, first success wins:
//!
//! 1. **Key-value template** - `KEY: value` lines matched against a synonym
//!    table (accent/case/punctuation-insensitive).
//! 2. **Inline arrow template** - `requester [- assignee] => problem`.
//! 3. **Loose dash heuristic** - exactly two dash-separated segments,
//!    disambiguated by national-ID pattern, name-likeness and problem
//!    keywords.
//!
//! A parse succeeds only if at least one recognized field was extracted.

use serde::Serialize;

use crate::normalize::{fold_key, fold_name, is_national_id, tokens};

/// Maximum token count for the name-likeness test.
const NAME_MAX_TOKENS: usize = 6;

/// A ticket field recognized by the key-value template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Requester,
    Assignee,
    Problem,
    Category,
    DisplayName,
    NationalId,
    Phone,
    Email,
    JobTitle,
    Department,
    Floor,
}

/// Synonym table for the key-value template, keys pre-folded with
/// [`fold_key`] semantics (uppercase, no accents, no punctuation).
///
/// Unrecognized keys are ignored, never errors.
const KEY_SYNONYMS: &[(&str, Field)] = &[
    ("SOLICITANTE", Field::Requester),
    ("USUARIO", Field::Requester),
    ("TRABAJADOR", Field::Requester),
    ("EMPLEADO", Field::Requester),
    ("SOLICITA", Field::Requester),
    ("ASIGNADO", Field::Assignee),
    ("ASIGNADO A", Field::Assignee),
    ("TECNICO", Field::Assignee),
    ("RESPONSABLE", Field::Assignee),
    ("ATIENDE", Field::Assignee),
    ("PROBLEMA", Field::Problem),
    ("DESCRIPCION", Field::Problem),
    ("INCIDENTE", Field::Problem),
    ("INCIDENCIA", Field::Problem),
    ("SOLICITUD", Field::Problem),
    ("SOLICITUD O INCIDENTE", Field::Problem),
    ("SOLICITUD INCIDENTE", Field::Problem),
    ("FALLA", Field::Problem),
    ("DETALLE", Field::Problem),
    ("REQUERIMIENTO", Field::Problem),
    ("CATEGORIA", Field::Category),
    ("TIPO", Field::Category),
    ("NOMBRE", Field::DisplayName),
    ("NOMBRES", Field::DisplayName),
    ("NOMBRE COMPLETO", Field::DisplayName),
    ("NOMBRES Y APELLIDOS", Field::DisplayName),
    ("APELLIDOS Y NOMBRES", Field::DisplayName),
    ("DNI", Field::NationalId),
    ("N DNI", Field::NationalId),
    ("NRO DNI", Field::NationalId),
    ("NUMERO DNI", Field::NationalId),
    ("NUMERO DE DNI", Field::NationalId),
    ("DOCUMENTO", Field::NationalId),
    ("TELEFONO", Field::Phone),
    ("CELULAR", Field::Phone),
    ("MOVIL", Field::Phone),
    ("ANEXO", Field::Phone),
    ("CORREO", Field::Email),
    ("CORREO ELECTRONICO", Field::Email),
    ("EMAIL", Field::Email),
    ("MAIL", Field::Email),
    ("CARGO", Field::JobTitle),
    ("PUESTO", Field::JobTitle),
    ("AREA", Field::Department),
    ("OFICINA", Field::Department),
    ("DEPARTAMENTO", Field::Department),
    ("GERENCIA", Field::Department),
    ("UNIDAD", Field::Department),
    ("PISO", Field::Floor),
    ("NIVEL", Field::Floor),
];

/// Tokens that mark a segment as a problem description rather than a name,
/// used by the loose dash heuristic.
const PROBLEM_KEYWORDS: &[&str] = &[
    "ERROR", "NO", "FALLA", "FALLO", "SOLICITO", "AYUDA", "URGENTE", "IMPRESORA", "IMPRIME",
    "PC", "COMPUTADORA", "LAPTOP", "MONITOR", "TECLADO", "MOUSE", "CPU", "INTERNET", "RED",
    "WIFI", "CORREO", "SISTEMA", "OFFICE", "EXCEL", "WORD", "ENCIENDE", "PRENDE", "FUNCIONA",
    "LENTO", "LENTA", "ACCESO", "CLAVE", "CONTRASENA", "TONER", "ESCANER", "PANTALLA",
    "ARCHIVO", "CARPETA", "INSTALAR", "CONFIGURAR", "REVISAR", "CAMBIAR",
];

/// The accumulating, possibly-incomplete set of ticket fields before
/// backend submission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TicketDraft {
    /// Raw requester identifier: a name or an 8-digit national-ID.
    pub requester: String,
    /// Raw assignee identifier, when the message named one.
    pub assignee: String,
    /// Problem description.
    pub problem: String,
    /// Category label, when the message named one.
    pub category: String,
    /// Requester's full display name, when given separately.
    pub display_name: String,
    /// Requester's national-ID.
    pub national_id: String,
    /// Requester's phone number.
    pub phone: String,
    /// Requester's email address.
    pub email: String,
    /// Requester's job title.
    pub job_title: String,
    /// Requester's department or office.
    pub department: String,
    /// Requester's floor.
    pub floor: String,
    /// The raw message bodies this draft was parsed from.
    pub source_text: String,
}

/// What a merge changed about the identity-bearing fields.
///
/// When the requester (or assignee) string changes, any previously resolved
/// identity for that role is stale and must be invalidated by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeEffect {
    /// The requester string changed to a different non-empty value.
    pub requester_changed: bool,
    /// The assignee string changed to a different non-empty value.
    pub assignee_changed: bool,
}

impl TicketDraft {
    /// Returns true when the draft carries enough to create a ticket:
    /// a requester and a problem description.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        !self.requester.is_empty() && !self.problem.is_empty()
    }

    /// Returns the value identity resolution should use for the requester:
    /// an explicit national-ID when present, else the requester string,
    /// else the display name.
    #[must_use]
    pub fn requester_lookup_value(&self) -> &str {
        if !self.national_id.is_empty() {
            &self.national_id
        } else if !self.requester.is_empty() {
            &self.requester
        } else {
            &self.display_name
        }
    }

    /// Merges a newer partial parse into this draft.
    ///
    /// Fields already set are kept; only empty fields are filled. The
    /// exception is the requester/assignee pair: a different non-empty
    /// value replaces the old one, and the returned [`MergeEffect`] tells
    /// the caller to drop any cached resolution for that role.
    pub fn merge(&mut self, other: &TicketDraft) -> MergeEffect {
        let mut effect = MergeEffect::default();

        if !other.requester.is_empty() && other.requester != self.requester {
            effect.requester_changed = !self.requester.is_empty();
            self.requester = other.requester.clone();
        }
        if !other.assignee.is_empty() && other.assignee != self.assignee {
            effect.assignee_changed = !self.assignee.is_empty();
            self.assignee = other.assignee.clone();
        }

        fill(&mut self.problem, &other.problem);
        fill(&mut self.category, &other.category);
        fill(&mut self.display_name, &other.display_name);
        fill(&mut self.national_id, &other.national_id);
        fill(&mut self.phone, &other.phone);
        fill(&mut self.email, &other.email);
        fill(&mut self.job_title, &other.job_title);
        fill(&mut self.department, &other.department);
        fill(&mut self.floor, &other.floor);

        if !other.source_text.is_empty() {
            if self.source_text.is_empty() {
                self.source_text = other.source_text.clone();
            } else {
                self.source_text.push('\n');
                self.source_text.push_str(&other.source_text);
            }
        }

        effect
    }
}

/// Sets `target` from `value` only when `target` is still empty.
fn fill(target: &mut String, value: &str) {
    if target.is_empty() && !value.is_empty() {
        *target = value.to_string();
    }
}

/// Parses a message body into a ticket draft.
///
/// Returns `None` when no strategy extracted a single recognized field.
#[must_use]
pub fn parse(body: &str) -> Option<TicketDraft> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    parse_key_value(body)
        .or_else(|| parse_arrow(body))
        .or_else(|| parse_loose_dash(body))
        .map(|mut draft| {
            promote_identity_facts(&mut draft);
            draft.source_text = body.to_string();
            draft
        })
}

/// When only a national-ID or display name was given, it still identifies
/// the requester.
fn promote_identity_facts(draft: &mut TicketDraft) {
    if draft.requester.is_empty() {
        if !draft.national_id.is_empty() {
            draft.requester = draft.national_id.clone();
        } else if !draft.display_name.is_empty() {
            draft.requester = draft.display_name.clone();
        }
    }
}

/// Strategy 1: `KEY: value` lines against the synonym table.
fn parse_key_value(body: &str) -> Option<TicketDraft> {
    let mut draft = TicketDraft::default();
    let mut recognized = 0usize;

    for line in body.lines() {
        let Some((raw_key, raw_value)) = line.split_once(':') else {
            continue;
        };
        let value = raw_value.trim();
        if value.is_empty() {
            continue;
        }
        let key = fold_key(raw_key);
        let Some(field) = lookup_field(&key) else {
            continue;
        };
        recognized += 1;
        let slot = match field {
            Field::Requester => &mut draft.requester,
            Field::Assignee => &mut draft.assignee,
            Field::Problem => &mut draft.problem,
            Field::Category => &mut draft.category,
            Field::DisplayName => &mut draft.display_name,
            Field::NationalId => &mut draft.national_id,
            Field::Phone => &mut draft.phone,
            Field::Email => &mut draft.email,
            Field::JobTitle => &mut draft.job_title,
            Field::Department => &mut draft.department,
            Field::Floor => &mut draft.floor,
        };
        // First occurrence of a key wins within one message.
        if slot.is_empty() {
            *slot = value.to_string();
        }
    }

    (recognized > 0).then_some(draft)
}

fn lookup_field(folded_key: &str) -> Option<Field> {
    KEY_SYNONYMS
        .iter()
        .find(|(k, _)| *k == folded_key)
        .map(|(_, f)| *f)
}

/// Strategy 2: `left => right`.
///
/// `left` may itself be `requester - assignee`; when `left` is empty,
/// `right` is dash-split into `problem - requester [- assignee]`.
fn parse_arrow(body: &str) -> Option<TicketDraft> {
    let (left, right) = body.split_once("=>")?;
    let left = left.trim();
    let right = right.trim();

    let mut draft = TicketDraft::default();

    if !left.is_empty() {
        match left.split_once('-') {
            Some((requester, assignee)) => {
                draft.requester = requester.trim().to_string();
                draft.assignee = assignee.trim().to_string();
            }
            None => draft.requester = left.to_string(),
        }
        draft.problem = right.to_string();
    } else {
        let mut parts = right.splitn(3, '-').map(str::trim);
        draft.problem = parts.next().unwrap_or_default().to_string();
        draft.requester = parts.next().unwrap_or_default().to_string();
        draft.assignee = parts.next().unwrap_or_default().to_string();
    }

    (!draft.requester.is_empty() || !draft.problem.is_empty()).then_some(draft)
}

/// Strategy 3: loose dash heuristic over exactly two segments.
///
/// Signals tried in priority order: national-ID pattern, name-likeness,
/// problem keywords. The final tiebreak (shorter segment is the requester)
/// is an arbitrary but long-standing heuristic, kept for compatibility.
fn parse_loose_dash(body: &str) -> Option<TicketDraft> {
    if body.contains("=>") || body.contains('\n') {
        return None;
    }
    let segments: Vec<&str> = body.split('-').map(str::trim).collect();
    if segments.len() != 2 || segments.iter().any(|s| s.is_empty()) {
        return None;
    }
    let (a, b) = (segments[0], segments[1]);

    let requester_first = match (is_national_id(a), is_national_id(b)) {
        (true, false) => true,
        (false, true) => false,
        _ => match (looks_like_name(a), looks_like_name(b)) {
            (true, false) => true,
            (false, true) => false,
            _ => match (problem_score(a) > 0, problem_score(b) > 0) {
                (false, true) => true,
                (true, false) => false,
                // Last resort: shorter segment as requester.
                _ => a.len() <= b.len(),
            },
        },
    };

    let (requester, problem) = if requester_first { (a, b) } else { (b, a) };
    Some(TicketDraft {
        requester: requester.to_string(),
        problem: problem.to_string(),
        ..TicketDraft::default()
    })
}

/// Name-likeness: 2-6 purely alphabetic tokens, none of them a problem
/// keyword.
fn looks_like_name(segment: &str) -> bool {
    let toks = tokens(segment);
    if toks.len() < 2 || toks.len() > NAME_MAX_TOKENS {
        return false;
    }
    toks.iter()
        .all(|t| t.chars().all(|c| c.is_ascii_alphabetic()) && !PROBLEM_KEYWORDS.contains(&t.as_str()))
}

/// Counts problem signals in a segment: digits or keyword hits.
fn problem_score(segment: &str) -> usize {
    let mut score = 0;
    if segment.chars().any(|c| c.is_ascii_digit()) {
        score += 1;
    }
    let folded = fold_name(segment);
    for token in folded.split(' ') {
        if PROBLEM_KEYWORDS.contains(&token) {
            score += 1;
        }
    }
    score
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_key_value_national_id_and_problem() {
        let draft = parse("SOLICITANTE: 73872028\nPROBLEMA: no enciende").unwrap();
        assert_eq!(draft.requester, "73872028");
        assert_eq!(draft.problem, "no enciende");
        assert!(draft.is_complete());
    }

    #[test]
    fn test_key_value_synonyms_are_accent_insensitive() {
        let a = parse("Solicitud o Incidente: se cayó la red").unwrap();
        let b = parse("SOLICITUD INCIDENTE: se cayó la red").unwrap();
        assert_eq!(a.problem, b.problem);
        assert_eq!(a.problem, "se cayó la red");
    }

    #[test]
    fn test_key_value_dni_variants() {
        let a = parse("N° DNI: 73872028").unwrap();
        let b = parse("dni: 73872028").unwrap();
        assert_eq!(a.national_id, "73872028");
        assert_eq!(b.national_id, "73872028");
    }

    #[test]
    fn test_key_value_unrecognized_keys_ignored() {
        let draft = parse("COLOR FAVORITO: azul\nPROBLEMA: impresora atascada").unwrap();
        assert_eq!(draft.problem, "impresora atascada");
        assert!(draft.requester.is_empty());
    }

    #[test]
    fn test_key_value_only_unrecognized_keys_falls_through() {
        // No recognized key, no arrow, no dash pair: not a ticket.
        assert!(parse("COLOR FAVORITO: azul").is_none());
    }

    #[test]
    fn test_national_id_promoted_to_requester() {
        let draft = parse("DNI: 73872028\nPROBLEMA: sin acceso al sistema").unwrap();
        assert_eq!(draft.requester, "73872028");
        assert_eq!(draft.national_id, "73872028");
        assert!(draft.is_complete());
    }

    #[test]
    fn test_display_name_promoted_to_requester() {
        let draft = parse("NOMBRE: Ana Torres\nPROBLEMA: clave bloqueada").unwrap();
        assert_eq!(draft.requester, "Ana Torres");
    }

    #[test]
    fn test_requester_lookup_value_prefers_national_id() {
        let draft = parse("SOLICITANTE: Ana Torres\nDNI: 73872028\nPROBLEMA: x").unwrap();
        assert_eq!(draft.requester_lookup_value(), "73872028");
    }

    #[test]
    fn test_arrow_with_requester_and_assignee() {
        let draft = parse("Juan Perez - Mesa Ayuda => no tengo internet").unwrap();
        assert_eq!(draft.requester, "Juan Perez");
        assert_eq!(draft.assignee, "Mesa Ayuda");
        assert_eq!(draft.problem, "no tengo internet");
    }

    #[test]
    fn test_arrow_requester_only() {
        let draft = parse("Juan Perez => pc lenta").unwrap();
        assert_eq!(draft.requester, "Juan Perez");
        assert!(draft.assignee.is_empty());
        assert_eq!(draft.problem, "pc lenta");
    }

    #[test]
    fn test_arrow_empty_left_splits_right() {
        let draft = parse("=> no imprime - Juan Perez - Mesa Ayuda").unwrap();
        assert_eq!(draft.problem, "no imprime");
        assert_eq!(draft.requester, "Juan Perez");
        assert_eq!(draft.assignee, "Mesa Ayuda");
    }

    #[test]
    fn test_loose_dash_national_id_wins_either_order() {
        let a = parse("73872028 - no imprime").unwrap();
        assert_eq!(a.requester, "73872028");
        assert_eq!(a.problem, "no imprime");

        let b = parse("no imprime - 73872028").unwrap();
        assert_eq!(b.requester, "73872028");
        assert_eq!(b.problem, "no imprime");
    }

    #[test]
    fn test_loose_dash_name_likeness() {
        let draft = parse("Maria Quispe - impresora atascada con error").unwrap();
        assert_eq!(draft.requester, "Maria Quispe");
        assert_eq!(draft.problem, "impresora atascada con error");
    }

    #[test]
    fn test_loose_dash_problem_keywords() {
        // Both segments fail the name test (one token vs. keyword hit);
        // the keyword side becomes the problem.
        let draft = parse("Rodriguez - error en sistema").unwrap();
        assert_eq!(draft.requester, "Rodriguez");
        assert_eq!(draft.problem, "error en sistema");
    }

    #[test]
    fn test_loose_dash_shortest_tiebreak() {
        // Single-token segments: no national-ID, no name-likeness, no
        // keywords. Shorter one is the requester.
        let draft = parse("Lopez - Castillo").unwrap();
        assert_eq!(draft.requester, "Lopez");
        assert_eq!(draft.problem, "Castillo");
    }

    #[test]
    fn test_loose_dash_requires_exactly_two_segments() {
        assert!(parse("a - b - c").is_none());
        assert!(parse("solo un segmento").is_none());
    }

    #[test]
    fn test_merge_fills_only_empty_fields() {
        let mut draft = parse("SOLICITANTE: Juan Perez\nPROBLEMA: no enciende").unwrap();
        let update = parse("PROBLEMA: otra cosa\nCORREO: juan@example.com").unwrap();
        let effect = draft.merge(&update);

        assert_eq!(draft.problem, "no enciende");
        assert_eq!(draft.email, "juan@example.com");
        assert!(!effect.requester_changed);
    }

    #[test]
    fn test_merge_requester_change_invalidates() {
        let mut draft = parse("SOLICITANTE: Juan Perez\nPROBLEMA: no enciende").unwrap();
        let update = parse("SOLICITANTE: Maria Quispe").unwrap();
        let effect = draft.merge(&update);

        assert_eq!(draft.requester, "Maria Quispe");
        assert!(effect.requester_changed);
        assert!(!effect.assignee_changed);
    }

    #[test]
    fn test_merge_first_requester_is_not_a_change() {
        let mut draft = TicketDraft::default();
        let update = parse("SOLICITANTE: Juan Perez\nPROBLEMA: x").unwrap();
        let effect = draft.merge(&update);
        assert!(!effect.requester_changed);
        assert_eq!(draft.requester, "Juan Perez");
    }

    #[test]
    fn test_parse_empty_body() {
        assert!(parse("").is_none());
        assert!(parse("   \n  ").is_none());
    }
}

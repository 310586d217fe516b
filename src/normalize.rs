//! Text normalization helpers.
//!
//! Every place the bridge compares human-entered text (parser keys, names,
//! command words, poll labels) goes through these helpers so that accents,
//! case and stray whitespace never change the outcome.

/// Folds a single character to its unaccented uppercase ASCII form.
///
/// Covers the Latin-1 accents that show up in Spanish service-desk text.
/// Characters outside the table pass through uppercased.
fn fold_char(c: char) -> char {
    match c {
        'á' | 'à' | 'ä' | 'â' | 'Á' | 'À' | 'Ä' | 'Â' => 'A',
        'é' | 'è' | 'ë' | 'ê' | 'É' | 'È' | 'Ë' | 'Ê' => 'E',
        'í' | 'ì' | 'ï' | 'î' | 'Í' | 'Ì' | 'Ï' | 'Î' => 'I',
        'ó' | 'ò' | 'ö' | 'ô' | 'Ó' | 'Ò' | 'Ö' | 'Ô' => 'O',
        'ú' | 'ù' | 'ü' | 'û' | 'Ú' | 'Ù' | 'Ü' | 'Û' => 'U',
        'ñ' | 'Ñ' => 'N',
        'ç' | 'Ç' => 'C',
        _ => c.to_ascii_uppercase(),
    }
}

/// Normalizes a name or free-text value for comparison.
///
/// Strips diacritics, uppercases, and collapses runs of whitespace into a
/// single space. Leading and trailing whitespace is removed.
#[must_use]
pub fn fold_name(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_space = false;
    for c in value.chars() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(fold_char(c));
    }
    out
}

/// Normalizes a template key for synonym-table lookup.
///
/// Like [`fold_name`], but additionally drops punctuation (`N°`, `Nº`,
/// `N.`, trailing `:` remnants) so "N° DNI" and "N DNI" compare equal.
#[must_use]
pub fn fold_key(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_space = false;
    for c in value.chars() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if !c.is_alphanumeric() {
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        out.push(fold_char(c));
    }
    out
}

/// Returns true if the value is exactly an 8-digit national-ID.
#[must_use]
pub fn is_national_id(value: &str) -> bool {
    let value = value.trim();
    value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit())
}

/// Splits a folded value into its whitespace tokens.
#[must_use]
pub fn tokens(value: &str) -> Vec<String> {
    fold_name(value)
        .split(' ')
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

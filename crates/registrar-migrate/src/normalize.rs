//! Cell-level normalizers shared by the migrations.

use std::sync::LazyLock;

use registrar_store::CellValue;
use regex::Regex;

static FIRST_INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+").expect("integer regex must compile"));

const MINUTES_PER_DAY: i64 = 24 * 60;

/// Result of normalizing one phone cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhoneOutcome {
    Blank,
    /// Already exactly ten digits.
    Unchanged,
    Normalized(String),
    /// Left as-is; the reason is reported to the operator.
    Invalid { reason: String },
}

/// Strip everything but digits and require exactly ten of them. With a
/// `placeholder`, that character (either case) counts as a digit, so masked
/// staging data such as `415-XXX-XXXX` passes.
pub fn normalize_phone(raw: &str, placeholder: Option<char>) -> PhoneOutcome {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return PhoneOutcome::Blank;
    }
    let is_placeholder =
        |c: char| placeholder.is_some_and(|p| c.eq_ignore_ascii_case(&p));
    let kept: String = trimmed
        .chars()
        .filter(|c| c.is_ascii_digit() || is_placeholder(*c))
        .map(|c| if c.is_ascii_digit() { c } else { c.to_ascii_uppercase() })
        .collect();

    if kept.len() != 10 {
        return PhoneOutcome::Invalid {
            reason: format!("'{trimmed}' has {} digits, expected 10", kept.len()),
        };
    }
    if kept == trimmed {
        PhoneOutcome::Unchanged
    } else {
        PhoneOutcome::Normalized(kept)
    }
}

/// Whether `cell` already holds a normalized phone number.
pub fn is_normalized_phone(cell: &CellValue, placeholder: Option<char>) -> bool {
    matches!(
        normalize_phone(&cell.as_text(), placeholder),
        PhoneOutcome::Unchanged
    )
}

/// `"Kindergarten"` or a leading `K` is grade 0; otherwise the first integer
/// in the text, or 0 when there is none.
pub fn normalize_grade(raw: &str) -> i64 {
    let trimmed = raw.trim();
    if trimmed.eq_ignore_ascii_case("kindergarten") || trimmed.starts_with(['K', 'k']) {
        return 0;
    }
    FIRST_INTEGER
        .find(trimmed)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersonName {
    pub first: String,
    pub last: String,
}

/// `"Last, First"` when there is a comma, else `"First Rest Of Last"`, else
/// the whole string is a last name.
pub fn parse_full_name(raw: &str) -> PersonName {
    let trimmed = raw.trim();
    if let Some((last, first)) = trimmed.split_once(',') {
        return PersonName {
            first: first.trim().to_string(),
            last: last.trim().to_string(),
        };
    }
    let mut tokens = trimmed.split_whitespace();
    match (tokens.next(), tokens.clone().next()) {
        (Some(first), Some(_)) => PersonName {
            first: first.to_string(),
            last: tokens.collect::<Vec<_>>().join(" "),
        },
        _ => PersonName {
            first: String::new(),
            last: trimmed.to_string(),
        },
    }
}

pub fn normalize_email(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Deduplication key for people spawned out of denormalized rows.
pub fn person_key(email: &str, last: &str, first: &str) -> (String, String, String) {
    (
        normalize_email(email),
        last.trim().to_uppercase(),
        first.trim().to_uppercase(),
    )
}

/// Render a time-like cell as `HH:mm`.
///
/// Numbers are spreadsheet serials whose fractional part is the time of
/// day; dates keep only their clock time. Text and empty cells pass through.
pub fn normalize_time(cell: &CellValue) -> CellValue {
    match cell {
        CellValue::Number(serial) => {
            let fraction = serial - serial.floor();
            let minutes = ((fraction * MINUTES_PER_DAY as f64).round() as i64) % MINUTES_PER_DAY;
            CellValue::Text(format!("{:02}:{:02}", minutes / 60, minutes % 60))
        }
        CellValue::DateTime(dt) => CellValue::Text(dt.format("%H:%M").to_string()),
        other => other.clone(),
    }
}

//! Contact Normalizer — pure helpers for phones, names and schedule labels.

use chrono::Weekday;

/// Country calling code every canonical number carries.
pub const COUNTRY_CODE: &str = "55";

/// A phone number that passed normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phone {
    /// `55` + area code + 8-digit subscriber, digits only.
    pub canonical: String,
    /// `+55 DD XXXX-XXXX`.
    pub display: String,
}

/// Canonicalize a raw phone string.
///
/// Non-digits are stripped, then a `0055`/`55` country prefix or a single
/// trunk `0` is removed when the length says one is present. What remains
/// must be a two-digit area code plus an 8-digit subscriber; a 9-digit
/// mobile subscriber loses its leading `9`.
pub fn normalize_phone(raw: &str) -> Option<Phone> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let len = digits.len();

    let local = if digits.starts_with("0055") && (14..=15).contains(&len) {
        &digits[4..]
    } else if digits.starts_with(COUNTRY_CODE) && (12..=13).contains(&len) {
        &digits[2..]
    } else if digits.starts_with('0') && (11..=12).contains(&len) {
        &digits[1..]
    } else {
        digits.as_str()
    };

    if !(10..=11).contains(&local.len()) {
        return None;
    }

    let (area, mut subscriber) = local.split_at(2);
    if area.starts_with('0') {
        return None;
    }
    if subscriber.len() == 9 && subscriber.starts_with('9') {
        subscriber = &subscriber[1..];
    }
    if subscriber.len() != 8 {
        return None;
    }

    Some(Phone {
        canonical: format!("{COUNTRY_CODE}{area}{subscriber}"),
        display: format!(
            "+{COUNTRY_CODE} {area} {}-{}",
            &subscriber[..4],
            &subscriber[4..]
        ),
    })
}

/// First whitespace-separated token of a full name.
pub fn first_name(full_name: &str) -> Option<String> {
    full_name.split_whitespace().next().map(str::to_string)
}

/// The agent field must look like an email address.
pub fn is_email_shaped(value: &str) -> bool {
    value.contains('@')
}

/// Derive a display name from an email local part.
///
/// `lucas.garcia@x` → `Lucas Garcia`, `ana_souza2@x` → `Ana Souza2`.
pub fn agent_name_from_email(email: &str) -> Option<String> {
    let (local, _) = email.split_once('@')?;
    let name = local
        .split(['.', '_', '-', '+'])
        .filter(|part| part.chars().any(char::is_alphabetic))
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ");
    if name.is_empty() { None } else { Some(name) }
}

fn capitalize(word: &str) -> String {
    let lower = word.to_lowercase();
    let mut chars = lower.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

const SEPARATORS: [&str; 3] = [" às ", " as ", " at "];

/// Split a schedule label into its day part and optional time part
/// (both lowercased and trimmed).
pub fn split_schedule(label: &str) -> (String, Option<String>) {
    let lower = format!(" {} ", label.trim().to_lowercase());
    for sep in SEPARATORS {
        if let Some(pos) = lower.find(sep) {
            let day = lower[..pos].trim().to_string();
            let time = lower[pos + sep.len()..].trim().to_string();
            return (day, (!time.is_empty()).then_some(time));
        }
    }
    (lower.trim().to_string(), None)
}

/// Parse a weekday name (Portuguese or English, with or without `-feira`).
pub fn parse_weekday(day: &str) -> Option<Weekday> {
    let first = day
        .split(|c: char| c.is_whitespace() || c == '-' || c == ',')
        .find(|t| !t.is_empty())?
        .to_lowercase();
    let weekday = match fold_accents(&first).as_str() {
        "segunda" | "monday" => Weekday::Mon,
        "terca" | "tuesday" => Weekday::Tue,
        "quarta" | "wednesday" => Weekday::Wed,
        "quinta" | "thursday" => Weekday::Thu,
        "sexta" | "friday" => Weekday::Fri,
        "sabado" | "saturday" => Weekday::Sat,
        "domingo" | "sunday" => Weekday::Sun,
        _ => return None,
    };
    Some(weekday)
}

fn fold_accents(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' => 'a',
            'é' | 'ê' => 'e',
            'í' => 'i',
            'ó' | 'ô' | 'õ' => 'o',
            'ú' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

/// Canonical bucket key for a weekday.
pub fn slot_for(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "monday",
        Weekday::Tue => "tuesday",
        Weekday::Wed => "wednesday",
        Weekday::Thu => "thursday",
        Weekday::Fri => "friday",
        Weekday::Sat => "saturday",
        Weekday::Sun => "sunday",
    }
}

/// Weekday slot of a schedule label, e.g. `"Segunda-feira às 09:00"` → `monday`.
pub fn weekday_slot(label: &str) -> Option<String> {
    let (day, _) = split_schedule(label);
    parse_weekday(&day).map(|w| slot_for(w).to_string())
}

/// Minutes after midnight for the first `HH:MM`, `HHhMM` or `HHh` in a label.
pub fn time_of_day(label: &str) -> Option<u32> {
    let chars: Vec<char> = label.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if !chars[i].is_ascii_digit() {
            i += 1;
            continue;
        }
        let start = i;
        while i < chars.len() && chars[i].is_ascii_digit() {
            i += 1;
        }
        let hour_digits: String = chars[start..i].iter().collect();
        if hour_digits.len() > 2 || i >= chars.len() {
            continue;
        }
        let sep = chars[i].to_ascii_lowercase();
        if sep != ':' && sep != 'h' {
            continue;
        }
        let minute_digits: String = chars[i + 1..]
            .iter()
            .take_while(|c| c.is_ascii_digit())
            .take(2)
            .collect();
        if sep == ':' && minute_digits.len() != 2 {
            continue;
        }
        let hour: u32 = hour_digits.parse().ok()?;
        let minute: u32 = if minute_digits.is_empty() { 0 } else { minute_digits.parse().ok()? };
        if hour < 24 && minute < 60 {
            return Some(hour * 60 + minute);
        }
    }
    None
}

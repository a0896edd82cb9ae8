//! Operation-name grouping for the grouped history view.

use std::sync::OnceLock;

use regex::Regex;

fn suffix_regex() -> &'static Regex {
    static SUFFIX: OnceLock<Regex> = OnceLock::new();
    SUFFIX.get_or_init(|| Regex::new(r"(?:\d+|Query|Mutation)$").expect("static regex"))
}

/// Group key of an operation name: trailing digits and `Query`/`Mutation`
/// suffixes stripped, camelCase split, lowercased, first two words.
///
/// `GetUserProfile2` and `GetUserProfileMutation` both map to `get user`.
pub fn group_key(operation_name: &str) -> String {
    let mut name = operation_name.trim();
    while let Some(m) = suffix_regex().find(name) {
        if m.start() == 0 {
            break;
        }
        name = &name[..m.start()];
    }

    split_words(name)
        .into_iter()
        .take(2)
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Split on camelCase boundaries and non-alphanumeric separators. A run of
/// capitals stays one word (`HTTPStatus` -> `HTTP`, `Status`).
fn split_words(name: &str) -> Vec<String> {
    let chars: Vec<char> = name.chars().collect();
    let mut words = Vec::new();
    let mut current = String::new();

    for (i, &c) in chars.iter().enumerate() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }
        if c.is_uppercase() && !current.is_empty() {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower)
            {
                words.push(std::mem::take(&mut current));
            }
        }
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
}

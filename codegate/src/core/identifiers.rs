//! Candidate code identifiers pulled out of problem text.

use std::sync::LazyLock;

use regex::Regex;

const MAX_IDENTIFIERS: usize = 20;
const MIN_IDENTIFIER_CHARS: usize = 4;

static SNAKE_CASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([a-z][a-z0-9]*(?:_[a-z0-9]+)+)\b").expect("snake regex"));
static CAMEL_CASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z][a-z]+(?:[A-Z][a-z]+)+)\b").expect("camel regex"));
static DOTTED_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b([a-z][a-z0-9]*(?:\.[a-z][a-z0-9]*)+)\b").expect("dotted path regex")
});
static BACKTICK_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("backtick regex"));
static PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"['"`.,;:!?()\[\]{}<>]"#).expect("punctuation regex"));

/// Strip markdown emphasis and punctuation from a search term.
///
/// Underscores become spaces.
pub fn clean_search_term(term: &str) -> String {
    let term = term.replace(['`', '*'], "").replace('_', " ");
    PUNCTUATION.replace_all(&term, "").trim().to_string()
}

/// Identifiers worth searching for, in discovery order.
///
/// Snake-case tokens come first, then CamelCase names, dotted module paths and
/// finally backtick-quoted spans that clean down to a single word. Duplicates
/// and anything shorter than four characters are dropped; at most twenty are
/// returned.
pub fn extract_code_identifiers(text: &str) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();
    for pattern in [&*SNAKE_CASE, &*CAMEL_CASE, &*DOTTED_PATH] {
        candidates.extend(pattern.captures_iter(text).map(|caps| caps[1].to_string()));
    }
    for caps in BACKTICK_SPAN.captures_iter(text) {
        let cleaned = clean_search_term(&caps[1]);
        let word: String = cleaned.chars().filter(|c| *c != '_').collect();
        if cleaned.chars().count() >= MIN_IDENTIFIER_CHARS
            && !word.is_empty()
            && word.chars().all(char::is_alphanumeric)
        {
            candidates.push(cleaned);
        }
    }

    let mut unique: Vec<String> = Vec::new();
    for candidate in candidates {
        if candidate.chars().count() >= MIN_IDENTIFIER_CHARS && !unique.contains(&candidate) {
            unique.push(candidate);
        }
    }
    unique.truncate(MAX_IDENTIFIERS);
    unique
}

//! Repair-or-reject parsing for JSON produced by language models.
//!
//! Models commonly wrap JSON in markdown fences or surround it with prose.
//! Parsing tries, in order: the trimmed text, the body of the first fenced
//! block, and the span from the first `{` to the last `}`.

use serde::de::DeserializeOwned;

/// Parsed value, or the raw text when no candidate parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lenient<T> {
    Parsed(T),
    Unparsed(String),
}

/// Parse `raw` leniently, returning `None` when nothing parses.
pub fn parse_lenient<T: DeserializeOwned>(raw: &str) -> Option<T> {
    candidates(raw)
        .into_iter()
        .find_map(|candidate| serde_json::from_str(candidate).ok())
}

/// Parse `raw` leniently, keeping the raw text on failure.
pub fn parse_or_raw<T: DeserializeOwned>(raw: &str) -> Lenient<T> {
    match parse_lenient(raw) {
        Some(value) => Lenient::Parsed(value),
        None => Lenient::Unparsed(raw.trim().to_string()),
    }
}

fn candidates(raw: &str) -> Vec<&str> {
    let trimmed = raw.trim();
    let mut out = vec![trimmed];
    if let Some(body) = fenced_body(trimmed) {
        out.push(body);
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && start < end
    {
        out.push(&trimmed[start..=end]);
    }
    out
}

/// Body of the first ``` fenced block, skipping an optional language tag.
fn fenced_body(text: &str) -> Option<&str> {
    let open = text.find("```")?;
    let after_open = &text[open + 3..];
    let body_start = after_open.find('\n').map_or(0, |idx| idx + 1);
    let body = &after_open[body_start..];
    let close = body.find("```").unwrap_or(body.len());
    Some(body[..close].trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Verdict {
        decision: String,
    }

    #[test]
    fn parses_plain_json() {
        let parsed: Option<Verdict> = parse_lenient(r#" {"decision":"SHIP"} "#);
        assert_eq!(parsed.map(|v| v.decision).as_deref(), Some("SHIP"));
    }

    #[test]
    fn strips_markdown_fence() {
        let raw = "```json\n{\"decision\": \"REVISE\"}\n```";
        let parsed: Option<Verdict> = parse_lenient(raw);
        assert_eq!(parsed.map(|v| v.decision).as_deref(), Some("REVISE"));
    }

    #[test]
    fn extracts_object_from_prose() {
        let raw = "Sure! Here you go: {\"decision\": \"SHIP\"} hope that helps";
        let parsed: Option<Verdict> = parse_lenient(raw);
        assert_eq!(parsed.map(|v| v.decision).as_deref(), Some("SHIP"));
    }

    #[test]
    fn unparsable_text_is_kept_raw() {
        let parsed: Lenient<Verdict> = parse_or_raw("  just rewrite the parser  ");
        assert_eq!(
            parsed,
            Lenient::Unparsed("just rewrite the parser".to_string())
        );
    }
}

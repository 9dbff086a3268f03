//! # Parsing raw generation output.
//!
//! The service is asked for `{"text": "...", "value": 12}` but is free to answer with
//! anything. [`parse_reply`] extracts the first JSON object that has a usable text
//! field, tolerating code fences, prose before and after, and a few field aliases.

use serde_json::{Map, Value};

/// Field names accepted for the principal text, in order of preference.
const TEXT_FIELDS: [&str; 3] = ["text", "reply", "message"];

/// Structured reply extracted from raw output.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedReply {
    pub text: String,
    /// Optional numeric side channel (`value`); numeric strings are accepted.
    pub value: Option<f64>,
}

/// Extracts the first JSON object with a non-empty text field.
///
/// Runs in a single pass over `raw`: every balanced `{...}` is tried as it closes,
/// and among nested candidates the outermost usable one wins.
///
/// ```rust
/// use worldtick::parse_reply;
///
/// let raw = "Sure! Here you go:\n```json\n{\"text\": \"Fresh fish!\", \"value\": \"3\"}\n```";
/// let reply = parse_reply(raw).unwrap();
/// assert_eq!(reply.text, "Fresh fish!");
/// assert_eq!(reply.value, Some(3.0));
///
/// assert!(parse_reply("no json here").is_none());
/// ```
pub fn parse_reply(raw: &str) -> Option<ParsedReply> {
    let first = raw.find('{')?;
    let mut open: Vec<usize> = Vec::new();
    let mut best: Option<(usize, ParsedReply)> = None;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in raw[first..].char_indices() {
        let i = first + i;
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' if !open.is_empty() => in_string = true,
            '{' => open.push(i),
            '}' => {
                let Some(start) = open.pop() else { continue };
                if best.as_ref().is_none_or(|(b, _)| start < *b) {
                    if let Some(reply) = candidate(&raw[start..=i]) {
                        best = Some((start, reply));
                    }
                }
                if open.is_empty() && best.is_some() {
                    break;
                }
            }
            _ => {}
        }
    }
    best.map(|(_, reply)| reply)
}

fn candidate(text: &str) -> Option<ParsedReply> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(obj)) => from_object(&obj),
        _ => None,
    }
}

fn from_object(obj: &Map<String, Value>) -> Option<ParsedReply> {
    let text = TEXT_FIELDS
        .iter()
        .filter_map(|k| obj.get(*k).and_then(Value::as_str))
        .map(str::trim)
        .find(|t| !t.is_empty())?;

    let value = match obj.get("value") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    };

    Some(ParsedReply {
        text: text.to_string(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_object() {
        let r = parse_reply(r#"{"text":"Hello","value":2.5}"#).unwrap();
        assert_eq!(r, ParsedReply { text: "Hello".into(), value: Some(2.5) });
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_extraction() {
        let r = parse_reply(r#"note {oops} then {"text":"a } b { c"}"#).unwrap();
        assert_eq!(r.text, "a } b { c");
        assert_eq!(r.value, None);
    }

    #[test]
    fn aliases_and_bad_values() {
        let r = parse_reply(r#"{"reply":"  hi  ","value":"lots"}"#).unwrap();
        assert_eq!(r.text, "hi");
        assert_eq!(r.value, None);
    }

    #[test]
    fn empty_or_missing_text_is_unusable() {
        assert!(parse_reply(r#"{"text":"   "}"#).is_none());
        assert!(parse_reply(r#"{"value":3}"#).is_none());
        assert!(parse_reply("").is_none());
        assert!(parse_reply(r#"{"text": "unterminated"#).is_none());
    }

    #[test]
    fn skips_objects_without_text_and_finds_nested_later_one() {
        let r = parse_reply(r#"{"meta":1} and {"text":"second"}"#).unwrap();
        assert_eq!(r.text, "second");
    }

    #[test]
    fn outermost_usable_object_wins() {
        let r = parse_reply(r#"{"text":"outer","inner":{"text":"inner"}}"#).unwrap();
        assert_eq!(r.text, "outer");

        let r = parse_reply(r#"{"meta":{"text":"inner"}}"#).unwrap();
        assert_eq!(r.text, "inner");
    }

    #[test]
    fn object_inside_stray_brace_is_found() {
        let r = parse_reply(r#"thinking { ok so {"text":"found it"} and"#).unwrap();
        assert_eq!(r.text, "found it");
    }

    #[test]
    fn huge_unbalanced_input_is_rejected_quickly() {
        let started = std::time::Instant::now();
        assert!(parse_reply(&"{".repeat(100_000)).is_none());
        assert!(parse_reply(&"{}".repeat(50_000)).is_none());
        assert!(parse_reply(&format!("{}{}", "{\"a\":".repeat(20_000), "1")).is_none());
        assert!(started.elapsed() < std::time::Duration::from_secs(5));
    }
}

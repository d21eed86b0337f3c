//! Decoding helpers for stats API payloads.

use anyhow::Result;

/// Number of characters shown on each side of a decode error.
const SNIPPET_RADIUS: usize = 16;

/// Deserialize `body`, reporting the failing JSON path and a caret-marked
/// snippet of the offending line when it does not match `T`.
pub fn decode<T: serde::de::DeserializeOwned>(body: &str) -> Result<T> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|err| {
        let inner = err.inner();
        let (line, column) = (inner.line(), inner.column());
        let path = err.path().to_string();

        let message = inner.to_string();
        let location = format!(" at line {line} column {column}");
        let message = message.strip_suffix(&location).unwrap_or(&message);

        let mut report = String::new();
        if !path.is_empty() && path != "." {
            report.push_str(&format!("at '{path}': "));
        }
        report.push_str(&format!(
            "{} (line {line} col {column})\n{}",
            describe_mismatch(message),
            snippet(body, line, column)
        ));
        anyhow::anyhow!(report)
    })
}

/// Rewrites serde's `invalid type: X, expected Y` into `expected Y, got X`.
fn describe_mismatch(message: &str) -> String {
    message
        .strip_prefix("invalid type: ")
        .and_then(|rest| rest.split_once(", expected "))
        .map(|(actual, expected)| format!("expected {expected}, got {actual}"))
        .unwrap_or_else(|| message.to_string())
}

fn snippet(body: &str, line: usize, column: usize) -> String {
    let text: Vec<char> = body
        .lines()
        .nth(line.saturating_sub(1))
        .unwrap_or("")
        .chars()
        .collect();
    if text.is_empty() {
        return "(empty line)".to_string();
    }

    let at = column.saturating_sub(1).min(text.len() - 1);
    let start = at.saturating_sub(SNIPPET_RADIUS);
    let end = (at + SNIPPET_RADIUS).min(text.len());
    let slice: String = text[start..end].iter().collect();

    format!("...{slice}...\n   {}^", " ".repeat(at - start))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::models::{EventRecord, SeenRecord};

    #[test]
    fn test_describe_mismatch() {
        assert_eq!(
            describe_mismatch("invalid type: integer `5`, expected a string"),
            "expected a string, got integer `5`"
        );
        assert_eq!(describe_mismatch("expected value"), "expected value");
    }

    #[test]
    fn test_decode_event_list() {
        let body = r#"[{"date":"2024-01-01","time":"12:00","message":"m"}]"#;
        let events: Vec<EventRecord> = decode(body).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].date.as_deref(), Some("2024-01-01"));
        assert_eq!(events[0].message.as_deref(), Some("m"));
    }

    #[test]
    fn test_decode_reports_path() {
        let body = r#"[{"seen": 1234}]"#;
        let err = decode::<Vec<SeenRecord>>(body).unwrap_err().to_string();
        assert!(err.contains("[0].seen"), "{err}");
        assert!(err.contains("expected") && err.contains("got"), "{err}");
    }

    #[test]
    fn test_decode_truncated_body() {
        let err = decode::<Vec<EventRecord>>("[{\"date\":").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }
}

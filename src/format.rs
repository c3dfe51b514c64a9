//! Response rendering: payload field extraction and HTML composition.
//!
//! Remote payload shapes vary — the service object may be top-level or
//! wrapped under `"service"`, status and URL may be nested under
//! `"serviceDetails"`, env entries use `key`/`name`/`keyName`. Every logical
//! field is extracted through an ordered candidate list; when all candidates
//! are absent the field renders as [`MISSING_FIELD`], never a panic.

use crate::render::{ApiError, ApiErrorKind};
use serde_json::Value;

/// Ceiling for one rendered message, comfortably under Telegram's 4096-char
/// limit once the surrounding markup is added.
pub const MAX_TEXT_LENGTH: usize = 3500;

/// Prefix of tail-truncated output.
pub const TRUNCATION_NOTICE: &str = "(earlier output truncated)\n";

/// Placeholder for a field no candidate path could produce.
pub const MISSING_FIELD: &str = "-";

/// Escape dynamic text for Telegram HTML.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for character in text.chars() {
        match character {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            other => escaped.push(other),
        }
    }
    escaped
}

/// Strip HTML markup for the plain-text delivery fallback: drop tags and
/// unescape the entities [`escape_html`] produces.
pub fn strip_html(text: &str) -> String {
    let mut plain = String::with_capacity(text.len());
    let mut in_tag = false;
    for character in text.chars() {
        match character {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            other if !in_tag => plain.push(other),
            _ => {}
        }
    }
    plain
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Truncate to at most `max_len` bytes, keeping the tail — recency matters
/// most for logs — and prefixing [`TRUNCATION_NOTICE`]. The result is exactly
/// `max_len` bytes for ASCII input; a multibyte boundary can shave a few
/// bytes off the front of the retained tail.
pub fn truncate_tail(text: &str, max_len: usize) -> String {
    if text.len() <= max_len {
        return text.to_string();
    }
    if max_len <= TRUNCATION_NOTICE.len() {
        return TRUNCATION_NOTICE[..max_len].to_string();
    }

    let keep = max_len - TRUNCATION_NOTICE.len();
    let mut start = text.len() - keep;
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    format!("{TRUNCATION_NOTICE}{}", &text[start..])
}

/// First non-empty string found under any of the candidate paths.
fn first_str<'a>(value: &'a Value, candidates: &[&[&str]]) -> Option<&'a str> {
    for path in candidates {
        let mut current = value;
        let mut found = true;
        for segment in *path {
            match current.get(segment) {
                Some(next) => current = next,
                None => {
                    found = false;
                    break;
                }
            }
        }
        if found
            && let Some(text) = current.as_str()
            && !text.is_empty()
        {
            return Some(text);
        }
    }
    None
}

/// Logical fields of one service, extracted from whatever shape the API
/// returned. Extraction is deterministic: the same payload always yields the
/// same fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceFields {
    pub id: String,
    pub name: String,
    pub service_type: String,
    pub status: String,
    pub url: String,
}

impl ServiceFields {
    pub fn from_payload(payload: &Value) -> Self {
        // The service object is sometimes wrapped under a "service" key.
        let service = payload.get("service").unwrap_or(payload);

        let field = |candidates: &[&[&str]]| {
            first_str(service, candidates)
                .unwrap_or(MISSING_FIELD)
                .to_string()
        };

        Self {
            id: field(&[&["id"]]),
            name: field(&[&["name"]]),
            service_type: field(&[&["type"]]),
            status: field(&[&["serviceDetails", "status"], &["status"]]),
            url: field(&[
                &["serviceDetails", "url"],
                &["serviceDetails", "defaultDomain"],
                &["url"],
                &["defaultDomain"],
            ]),
        }
    }
}

/// Service summaries out of a listing payload. Entries may be wrapped
/// (`{"service": {...}}`) or bare; the list itself may sit under `"services"`.
pub fn service_summaries(payload: &Value) -> Vec<ServiceFields> {
    let entries = payload
        .get("services")
        .and_then(Value::as_array)
        .or_else(|| payload.as_array());
    match entries {
        Some(entries) => entries.iter().map(ServiceFields::from_payload).collect(),
        None => Vec::new(),
    }
}

/// Detail card for one service.
pub fn render_service(fields: &ServiceFields) -> String {
    format!(
        "<b>{}</b>\nID: <code>{}</code>\nType: {}\nStatus: {}\nURL: {}",
        escape_html(&fields.name),
        escape_html(&fields.id),
        escape_html(&fields.service_type),
        escape_html(&fields.status),
        escape_html(&fields.url),
    )
}

/// Account card from a workspace-list payload. Uses the first entry; owners
/// arrive wrapped (`{"owner": {...}}`) or bare.
pub fn render_account(payload: &Value) -> String {
    let entry = payload
        .as_array()
        .and_then(|entries| entries.first())
        .unwrap_or(payload);
    let owner = entry.get("owner").unwrap_or(entry);

    let field = |candidates: &[&[&str]]| {
        first_str(owner, candidates)
            .unwrap_or(MISSING_FIELD)
            .to_string()
    };

    format!(
        "<b>Account</b>\nName: {}\nEmail: {}\nID: {}",
        escape_html(&field(&[&["name"], &["email"]])),
        escape_html(&field(&[&["email"]])),
        escape_html(&field(&[&["id"]])),
    )
}

/// Key/value pairs out of an env-var listing. Handles `{"envVars": [...]}`,
/// a bare array, and per-entry wrapping under `"envVar"`; the key may be
/// named `key`, `name`, or `keyName`.
pub fn env_pairs(payload: &Value) -> Vec<(String, String)> {
    let entries = payload
        .get("envVars")
        .and_then(Value::as_array)
        .or_else(|| payload.as_array());
    let Some(entries) = entries else {
        return Vec::new();
    };

    entries
        .iter()
        .filter_map(|entry| {
            let entry = entry.get("envVar").unwrap_or(entry);
            let key = first_str(entry, &[&["key"], &["name"], &["keyName"]])?;
            let value = first_str(entry, &[&["value"]]).unwrap_or("");
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

pub fn render_env_vars(pairs: &[(String, String)]) -> String {
    if pairs.is_empty() {
        return "<b>Env Vars</b>\n(none)".to_string();
    }
    let lines: Vec<String> = pairs
        .iter()
        .map(|(key, value)| format!("{} = {}", escape_html(key), escape_html(value)))
        .collect();
    format!("<b>Env Vars</b>\n{}", lines.join("\n"))
}

/// Flatten a log payload to plain text. Accepts `{"logs": [{"message": ..}]}`,
/// a bare array of entries or strings, or a plain string.
pub fn log_text(payload: &Value) -> String {
    let entries = payload
        .get("logs")
        .and_then(Value::as_array)
        .or_else(|| payload.as_array());

    if let Some(entries) = entries {
        let lines: Vec<String> = entries
            .iter()
            .map(|entry| match entry {
                Value::String(line) => line.clone(),
                other => first_str(other, &[&["message"], &["text"]])
                    .unwrap_or_default()
                    .to_string(),
            })
            .collect();
        return lines.join("\n");
    }

    match payload {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn render_logs(payload: &Value) -> String {
    let mut text = log_text(payload);
    if text.is_empty() {
        text = "(no logs)".to_string();
    }
    let text = truncate_tail(&text, MAX_TEXT_LENGTH);
    format!("<b>Logs</b>\n<pre>{}</pre>", escape_html(&text))
}

/// User-facing failure message: names the attempted action and carries the
/// remote reason when one exists.
pub fn render_error(action: &str, error: &ApiError) -> String {
    match error.kind {
        ApiErrorKind::Rejected { .. } => format!(
            "❌ {} failed:\n{}",
            action,
            escape_html(&error.message)
        ),
        ApiErrorKind::Unreachable => format!(
            "❌ {} failed: the service is unreachable right now. Please try again later.",
            action
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn escape_and_strip_are_inverse_for_plain_text() {
        let original = "a < b & c > d";
        assert_eq!(strip_html(&escape_html(original)), original);
    }

    #[test]
    fn strip_html_removes_tags() {
        let html = "<b>Logs</b>\n<pre>line &amp; more</pre>";
        assert_eq!(strip_html(html), "Logs\nline & more");
    }

    #[test]
    fn truncate_tail_is_exact_and_keeps_true_suffix() {
        let text = "x".repeat(5000);
        let truncated = truncate_tail(&text, MAX_TEXT_LENGTH);

        assert_eq!(truncated.len(), MAX_TEXT_LENGTH);
        assert!(truncated.starts_with(TRUNCATION_NOTICE));
        let kept = &truncated[TRUNCATION_NOTICE.len()..];
        assert_eq!(kept, &text[text.len() - kept.len()..]);
    }

    #[test]
    fn truncate_tail_leaves_short_text_alone() {
        assert_eq!(truncate_tail("short", MAX_TEXT_LENGTH), "short");
    }

    #[test]
    fn truncate_tail_respects_multibyte_boundaries() {
        let text = "é".repeat(3000);
        let truncated = truncate_tail(&text, 100);
        assert!(truncated.len() <= 100);
        assert!(truncated.starts_with(TRUNCATION_NOTICE));
        // Must still be valid UTF-8 content made of the original character.
        assert!(truncated[TRUNCATION_NOTICE.len()..].chars().all(|c| c == 'é'));
    }

    #[test]
    fn service_fields_from_wrapped_payload_with_nested_status() {
        let payload = json!({
            "service": {
                "id": "srv-1",
                "name": "demo",
                "type": "web_service",
                "serviceDetails": { "status": "live", "url": "https://demo.example.com" }
            }
        });
        let fields = ServiceFields::from_payload(&payload);
        assert_eq!(fields.id, "srv-1");
        assert_eq!(fields.status, "live");
        assert_eq!(fields.url, "https://demo.example.com");
    }

    #[test]
    fn service_fields_from_flat_payload() {
        let payload = json!({
            "id": "srv-2",
            "name": "flat",
            "type": "cron_job",
            "status": "suspended"
        });
        let fields = ServiceFields::from_payload(&payload);
        assert_eq!(fields.status, "suspended");
        assert_eq!(fields.url, MISSING_FIELD);
    }

    #[test]
    fn service_extraction_is_deterministic() {
        let payload = json!({ "service": { "id": "srv-3", "name": "same" } });
        assert_eq!(
            ServiceFields::from_payload(&payload),
            ServiceFields::from_payload(&payload)
        );
    }

    #[test]
    fn account_card_handles_wrapped_and_missing_fields() {
        let payload = json!([
            { "owner": { "id": "tea-1", "name": "Acme", "email": "ops@acme.example" } }
        ]);
        let rendered = render_account(&payload);
        assert!(rendered.contains("Acme"));
        assert!(rendered.contains("tea-1"));

        let sparse = json!([ { "owner": { "id": "usr-2" } } ]);
        let rendered = render_account(&sparse);
        assert!(rendered.contains("usr-2"));
        assert!(rendered.contains(MISSING_FIELD));
    }

    #[test]
    fn env_pairs_handles_all_known_shapes() {
        let wrapped = json!({ "envVars": [ { "key": "A", "value": "1" } ] });
        assert_eq!(env_pairs(&wrapped), vec![("A".to_string(), "1".to_string())]);

        let bare = json!([ { "envVar": { "name": "B", "value": "2" } } ]);
        assert_eq!(env_pairs(&bare), vec![("B".to_string(), "2".to_string())]);

        let key_name = json!([ { "keyName": "C" } ]);
        assert_eq!(env_pairs(&key_name), vec![("C".to_string(), String::new())]);
    }

    #[test]
    fn log_text_handles_all_known_shapes() {
        let structured = json!({ "logs": [ { "message": "one" }, { "message": "two" } ] });
        assert_eq!(log_text(&structured), "one\ntwo");

        let bare = json!([ "alpha", { "message": "beta" } ]);
        assert_eq!(log_text(&bare), "alpha\nbeta");

        let plain = json!("raw output");
        assert_eq!(log_text(&plain), "raw output");
    }

    #[test]
    fn render_error_keeps_rejection_verbatim_and_generalizes_unreachable() {
        let rejected = ApiError::rejected(404, "service srv-x not found");
        assert!(render_error("Restart", &rejected).contains("service srv-x not found"));

        let unreachable = ApiError::unreachable("connect timeout");
        let rendered = render_error("Restart", &unreachable);
        assert!(!rendered.contains("connect timeout"));
        assert!(rendered.contains("try again later"));
    }
}

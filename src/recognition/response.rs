use serde_json::{Map, Value};

/// Classified answer from the recognition service
#[derive(Debug, Clone, PartialEq)]
pub enum Recognition {
    /// A parsed response carrying a `track`
    Matched(Value),
    /// The service signalled HTTP 429
    RateLimited,
    /// No match, or a body we cannot use
    Unrecognized(String),
}

const HTML_MARKERS: &[&str] = &["<!doctype", "<html"];
const RATE_LIMIT_MARKERS: &[&str] = &["429", "too many requests"];

fn looks_like_html(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    HTML_MARKERS.iter().any(|m| lower.contains(m))
}

fn mentions_rate_limit(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|m| lower.contains(m))
}

/// An error document with 429 in `status` / `code`, or a rate-limit message
/// in `error` / `message`
fn reports_rate_limit(object: &Map<String, Value>) -> bool {
    let code_is_429 = ["status", "code"]
        .iter()
        .any(|key| match object.get(*key) {
            Some(Value::Number(n)) => n.as_u64() == Some(429),
            Some(Value::String(s)) => s.trim() == "429",
            _ => false,
        });
    code_is_429
        || ["error", "message"]
            .iter()
            .any(|key| match object.get(*key) {
                Some(Value::String(s)) => mentions_rate_limit(s),
                Some(Value::Object(inner)) => reports_rate_limit(inner),
                _ => false,
            })
}

/// Sort a raw HTTP answer into matched / rate-limited / unrecognized
///
/// Free-text 429 markers are only trusted for bodies that are not JSON; a
/// parsed document is judged by its fields.
pub fn classify(status: u16, body: &str) -> Recognition {
    if status == 429 {
        return Recognition::RateLimited;
    }

    let parsed = if looks_like_html(body) {
        None
    } else {
        serde_json::from_str::<Value>(body.trim()).ok()
    };
    let success = (200..300).contains(&status);
    let invalid = || {
        Recognition::Unrecognized(format!(
            "Invalid response from recognition service (HTTP {status})"
        ))
    };

    match parsed {
        Some(Value::Object(object)) => {
            if reports_rate_limit(&object) {
                Recognition::RateLimited
            } else if !success {
                invalid()
            } else if object.get("track").is_some_and(|t| !t.is_null()) {
                Recognition::Matched(Value::Object(object))
            } else {
                Recognition::Unrecognized("No match found".to_string())
            }
        }
        Some(_) => invalid(),
        None if mentions_rate_limit(body) => Recognition::RateLimited,
        None if body.trim().is_empty() => Recognition::Unrecognized(format!(
            "Empty response from recognition service (HTTP {status})"
        )),
        None => invalid(),
    }
}

/// The bits of a response used for voting and reporting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackSummary {
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub match_count: usize,
}

impl TrackSummary {
    pub fn from_response(response: &Value) -> Self {
        let track = response.get("track");
        let text = |key: &str| {
            track
                .and_then(|t| t.get(key))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Self {
            track_id: text("key"),
            title: text("title"),
            artist: text("subtitle"),
            match_count: response
                .get("matches")
                .and_then(Value::as_array)
                .map(Vec::len)
                .unwrap_or(0),
        }
    }

    pub fn has_track(&self) -> bool {
        !self.track_id.is_empty()
    }
}

/// Add consensus bookkeeping fields to a response object
pub fn annotate(response: &mut Value, segments_checked: usize, confident: bool) {
    if let Value::Object(map) = response {
        map.insert("vibra_segments_checked".into(), segments_checked.into());
        map.insert("vibra_confident".into(), confident.into());
    }
}

/// Depth-first search for the first object satisfying `pred`
pub fn find_object<'a>(value: &'a Value, pred: &dyn Fn(&Map<String, Value>) -> bool) -> Option<&'a Map<String, Value>> {
    match value {
        Value::Object(map) => {
            if pred(map) {
                return Some(map);
            }
            map.values().find_map(|v| find_object(v, pred))
        }
        Value::Array(items) => items.iter().find_map(|v| find_object(v, pred)),
        _ => None,
    }
}

/// Depth-first search for the first string value satisfying `pred`
pub fn find_string<'a>(value: &'a Value, pred: &dyn Fn(&str) -> bool) -> Option<&'a str> {
    match value {
        Value::String(s) if pred(s) => Some(s),
        Value::Object(map) => map.values().find_map(|v| find_string(v, pred)),
        Value::Array(items) => items.iter().find_map(|v| find_string(v, pred)),
        _ => None,
    }
}

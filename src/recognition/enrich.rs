//! Optional Apple Music metadata, scraped from the public song page.

use regex::Regex;
use reqwest::header::USER_AGENT;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

use super::unify::{apple_music_id, APPLE_MUSIC_SONG_URL};
use crate::proxy::transport::blocking_client;
use crate::proxy::ProxyDescriptor;

const BROWSER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

fn schema_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?s)<script\s+id="?schema:song"?\s+type="application/ld\+json"\s*>(.*?)</script>"#,
        )
        .ok()
    })
    .as_ref()
}

/// The `schema:song` JSON-LD block of an Apple Music page
pub fn extract_song_schema(html: &str) -> Option<Value> {
    let captures = schema_regex().and_then(|re| re.captures(html))?;
    serde_json::from_str(captures.get(1)?.as_str().trim()).ok()
}

fn find_key<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map
            .get(key)
            .or_else(|| map.values().find_map(|v| find_key(v, key))),
        Value::Array(items) => items.iter().find_map(|v| find_key(v, key)),
        _ => None,
    }
}

/// `apple_*` fields derived from a song schema
pub fn apple_fields(schema: &Value) -> Map<String, Value> {
    let mut fields = Map::new();
    let text = |v: Option<&Value>| {
        v.and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    if let Some(date) = text(schema.get("datePublished")) {
        fields.insert("apple_release_date".into(), date.into());
    }
    if let Some(duration) = text(schema.get("duration")) {
        let trimmed = duration.strip_prefix("PT").unwrap_or(&duration).to_string();
        fields.insert("apple_duration".into(), trimmed.into());
    }
    if let Some(genres) = schema.get("genre").filter(|g| g.is_array()) {
        fields.insert("apple_genres".into(), genres.clone());
    }
    if let Some(preview) = text(find_key(schema, "contentUrl")) {
        fields.insert("apple_preview_url".into(), preview.into());
    }
    if let Some(album) = text(schema.get("inAlbum").and_then(|a| a.get("name"))) {
        fields.insert("apple_album".into(), album.into());
    }
    if let Some(artists) = schema.get("byArtist").filter(|a| a.is_array()) {
        fields.insert("apple_artists".into(), artists.clone());
    }
    if let Some(image) = text(schema.get("image")).filter(|i| i.starts_with("https://")) {
        fields.insert("apple_image".into(), image.into());
    }
    fields
}

/// Merge Apple Music metadata into `response`.
///
/// Any failure (no Apple id, network, missing schema) leaves the
/// response unchanged.
pub fn enrich(response: Value, proxy: Option<&ProxyDescriptor>, timeout: Duration) -> Value {
    let Some(id) = apple_music_id(&response).map(str::to_string) else {
        return response;
    };

    let url = format!("{APPLE_MUSIC_SONG_URL}{id}");
    let html = match fetch_page(&url, proxy, timeout) {
        Ok(html) => html,
        Err(e) => {
            warn!("⚠️ Apple Music lookup failed for {}: {}", id, e);
            return response;
        }
    };

    let Some(schema) = extract_song_schema(&html) else {
        debug!("No song schema on {}", url);
        return response;
    };
    merge(response, apple_fields(&schema))
}

fn fetch_page(
    url: &str,
    proxy: Option<&ProxyDescriptor>,
    timeout: Duration,
) -> anyhow::Result<String> {
    let client = blocking_client(proxy, timeout)?;
    let page = client
        .get(url)
        .header(USER_AGENT, BROWSER_AGENT)
        .send()?
        .error_for_status()?
        .text()?;
    Ok(page)
}

fn merge(mut response: Value, fields: Map<String, Value>) -> Value {
    if let Value::Object(map) = &mut response {
        map.extend(fields);
    }
    response
}

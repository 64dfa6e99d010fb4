//! Flatten a raw recognition response into a stable, documented shape.

use serde_json::{json, Map, Value};

use super::response::{find_object, find_string};

pub const APPLE_MUSIC_SONG_URL: &str = "https://music.apple.com/song/";

/// Metadata section titles that carry the release year
const YEAR_TITLES: &[&str] = &["Released", "Sorti"];

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn opt_str(value: Option<&str>) -> Value {
    value.map_or(Value::Null, |s| Value::String(s.to_string()))
}

/// Value of a `sections[].metadata[]` entry whose title is one of `titles`
fn section_metadata<'a>(track: &'a Value, titles: &[&str]) -> Option<&'a str> {
    track
        .get("sections")?
        .as_array()?
        .iter()
        .filter_map(|section| section.get("metadata").and_then(Value::as_array))
        .flatten()
        .find(|entry| {
            entry
                .get("title")
                .and_then(Value::as_str)
                .is_some_and(|t| titles.contains(&t))
        })
        .and_then(|entry| entry.get("text").and_then(Value::as_str))
        .filter(|s| !s.is_empty())
}

/// Apple Music track id from the `applemusicplay` hub action
pub fn apple_music_id(response: &Value) -> Option<&str> {
    let track = response.get("track")?;
    find_object(track, &|m| {
        m.get("type").and_then(Value::as_str) == Some("applemusicplay")
    })
    .and_then(|action| action.get("id"))
    .and_then(Value::as_str)
    .filter(|id| !id.is_empty())
}

fn preview_url(track: &Value) -> Option<&str> {
    let hub = track.get("hub")?;
    find_object(hub, &|m| m.get("type").and_then(Value::as_str) == Some("uri"))
        .and_then(|action| action.get("uri"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn provider_link<'a>(track: &'a Value, needle: &str) -> Option<&'a str> {
    find_string(track, &|s| s.contains(needle))
}

fn number_or(value: Option<&Value>, default: Value) -> Value {
    match value {
        Some(v) if v.is_number() => v.clone(),
        _ => default,
    }
}

/// Main artist and featured artists, from Apple Music enrichment if present
fn split_artists(response: &Value, full_artist: &str) -> (String, Vec<String>) {
    let names: Vec<String> = response
        .get("apple_artists")
        .and_then(Value::as_array)
        .map(|artists| {
            artists
                .iter()
                .filter_map(|a| a.get("name").and_then(Value::as_str))
                .filter(|n| !n.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    match names.split_first() {
        Some((main, feat)) => (main.clone(), feat.to_vec()),
        None => (full_artist.to_string(), Vec::new()),
    }
}

fn vibra_block(response: &Value) -> Option<Value> {
    let segments = response.get("vibra_segments_checked").filter(|v| v.is_number());
    let offset = response.get("vibra_offset_ms").filter(|v| v.is_number());
    if segments.is_none() && offset.is_none() {
        return None;
    }

    let mut block = Map::new();
    if let Some(segments) = segments {
        block.insert("segments_checked".into(), segments.clone());
    }
    if let Some(offset) = offset {
        block.insert("offset_ms".into(), offset.clone());
    }
    if segments.is_some() {
        let confident = response
            .get("vibra_confident")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        block.insert("confident".into(), confident.into());
    }
    Some(Value::Object(block))
}

/// Build `{"status": "success"|"no_match", "result": ...}` from a raw response
pub fn unify(response: &Value) -> Value {
    let track = match response.get("track").filter(|t| t.is_object()) {
        Some(track) => track,
        None => return json!({"status": "no_match", "result": null}),
    };

    let full_artist = str_at(track, "/subtitle").unwrap_or_default();
    let (artist, feat_artists) = split_artists(response, full_artist);
    let apple_id = apple_music_id(response);

    let year = section_metadata(track, YEAR_TITLES).map(|text| {
        text.trim()
            .parse::<u64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(text.to_string()))
    });

    let mut result = Map::new();
    result.insert("title".into(), str_at(track, "/title").unwrap_or_default().into());
    result.insert("full_artist".into(), full_artist.into());
    result.insert("artist".into(), artist.into());
    result.insert("feat_artists".into(), feat_artists.into());
    result.insert("album".into(), opt_str(section_metadata(track, &["Album"])));
    result.insert("label".into(), opt_str(section_metadata(track, &["Label"])));
    result.insert("year".into(), year.unwrap_or(Value::Null));
    result.insert("genre".into(), opt_str(str_at(track, "/genres/primary")));
    result.insert("isrc".into(), opt_str(str_at(track, "/isrc")));

    if let Some(date) = str_at(response, "/apple_release_date") {
        result.insert("release_date".into(), date.into());
    }
    if let Some(duration) = str_at(response, "/apple_duration") {
        result.insert("duration".into(), duration.into());
    }
    if let Some(genres) = response.get("apple_genres").filter(|g| g.is_array()) {
        result.insert("genres".into(), genres.clone());
    }

    result.insert(
        "images".into(),
        json!({
            "coverart": opt_str(str_at(track, "/images/coverart")),
            "coverart_hq": opt_str(str_at(track, "/images/coverarthq")),
            "background": opt_str(str_at(track, "/images/background")),
            "large": opt_str(str_at(response, "/apple_image")),
        }),
    );

    result.insert(
        "external_ids".into(),
        json!({
            "shazam": str_at(track, "/key").unwrap_or_default(),
            "shazam_artist": opt_str(str_at(track, "/artists/0/id")),
            "apple_music": opt_str(apple_id),
            "apple_music_album": opt_str(str_at(track, "/albumadamid")),
            "apple_music_artist": opt_str(str_at(track, "/artists/0/adamid")),
        }),
    );

    result.insert(
        "links".into(),
        json!({
            "shazam": opt_str(str_at(track, "/url")),
            "apple_music": apple_id.map_or(Value::Null, |id| format!("{APPLE_MUSIC_SONG_URL}{id}").into()),
            "preview": opt_str(preview_url(track)),
            "spotify": opt_str(provider_link(track, "spotify:search:")),
            "youtube_music": opt_str(provider_link(track, "music.youtube.com")),
            "deezer": opt_str(provider_link(track, "deezer-query://")),
        }),
    );

    let best_match = response.pointer("/matches/0");
    let quality = if response.get("matches").is_some() {
        let field = |key: &str| number_or(best_match.and_then(|m| m.get(key)), 0.into());
        json!({
            "offset": field("offset"),
            "timeskew": field("timeskew"),
            "frequencyskew": field("frequencyskew"),
        })
    } else {
        json!({})
    };
    result.insert("match".into(), quality);
    result.insert(
        "related_tracks_url".into(),
        opt_str(str_at(track, "/relatedtracksurl")),
    );

    let mut request = Map::new();
    request.insert("timestamp".into(), number_or(response.get("timestamp"), Value::Null));
    request.insert("timezone".into(), opt_str(str_at(response, "/timezone")));
    if let Some(location) = response.get("location").filter(|l| l.is_object()) {
        let coord = |key: &str| number_or(location.get(key), Value::Null);
        request.insert(
            "location".into(),
            json!({
                "latitude": coord("latitude"),
                "longitude": coord("longitude"),
                "altitude": coord("altitude"),
            }),
        );
    }
    result.insert("request".into(), Value::Object(request));

    if let Some(vibra) = vibra_block(response) {
        result.insert("vibra".into(), vibra);
    }

    json!({"status": "success", "result": Value::Object(result)})
}

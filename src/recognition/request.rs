//! Request construction. Every request gets a fresh path, a jittered
//! location and a user agent / language drawn from fixed pools.

use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::{json, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::fingerprint::Signature;

const QUERY: &str =
    "?sync=true&webv3=true&sampling=true&connected=&shazamapiversion=v3&sharehub=true&video=v3";

pub const USER_AGENTS: &[&str] = &[
    "Dalvik/2.1.0 (Linux; U; Android 5.0.2; VS980 4G Build/LRX22G)",
    "Dalvik/1.6.0 (Linux; U; Android 4.4.2; SM-T210 Build/KOT49H)",
    "Dalvik/2.1.0 (Linux; U; Android 5.1.1; SM-P905V Build/LMY47X)",
    "Dalvik/2.1.0 (Linux; U; Android 6.0.1; SM-G920F Build/MMB29K)",
    "Dalvik/2.1.0 (Linux; U; Android 7.0; SM-G930F Build/NRD90M)",
    "Dalvik/2.1.0 (Linux; U; Android 8.0.0; SM-G950F Build/R16NW)",
    "Dalvik/2.1.0 (Linux; U; Android 9; Pixel 3 Build/PQ3A.190801.002)",
    "Dalvik/2.1.0 (Linux; U; Android 10; SM-A505F Build/QP1A.190711.020)",
    "Dalvik/2.1.0 (Linux; U; Android 11; Pixel 4a Build/RQ3A.211001.001)",
    "Dalvik/2.1.0 (Linux; U; Android 12; SM-G991B Build/SP1A.210812.016)",
    "Dalvik/2.1.0 (Linux; U; Android 13; Pixel 7 Build/TQ3A.230805.001)",
];

pub const TIMEZONES: &[&str] = &[
    "Europe/Amsterdam",
    "Europe/Athens",
    "Europe/Berlin",
    "Europe/Brussels",
    "Europe/Budapest",
    "Europe/Copenhagen",
    "Europe/Dublin",
    "Europe/Helsinki",
    "Europe/Lisbon",
    "Europe/London",
    "Europe/Madrid",
    "Europe/Oslo",
    "Europe/Paris",
    "Europe/Prague",
    "Europe/Rome",
    "Europe/Stockholm",
    "Europe/Vienna",
    "Europe/Warsaw",
    "Europe/Zurich",
];

pub const CONTENT_LANGUAGES: &[&str] = &["en_US", "en_GB", "fr_FR", "de_DE", "es_ES", "it_IT"];

/// Tag endpoint with two fresh random identifiers in the path
pub fn request_url(host: &str) -> String {
    let base = host.trim_end_matches('/');
    format!(
        "{}/{}/{}{}",
        base,
        Uuid::new_v4().to_string().to_uppercase(),
        Uuid::new_v4(),
        QUERY
    )
}

pub fn pick_user_agent<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    USER_AGENTS.choose(rng).copied().unwrap_or(USER_AGENTS[0])
}

pub fn pick_timezone<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    TIMEZONES.choose(rng).copied().unwrap_or(TIMEZONES[0])
}

pub fn pick_content_language<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    CONTENT_LANGUAGES
        .choose(rng)
        .copied()
        .unwrap_or(CONTENT_LANGUAGES[0])
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// JSON body for one signature
pub fn request_body<R: Rng + ?Sized>(signature: &Signature, rng: &mut R, timestamp_ms: u64) -> Value {
    let fuzz = rng.gen::<f64>() * 15.3 - 7.65;
    json!({
        "geolocation": {
            "altitude": rng.gen::<f64>() * 400.0 + 100.0 + fuzz,
            "latitude": (rng.gen::<f64>() * 180.0 - 90.0 + fuzz).clamp(-90.0, 90.0),
            "longitude": (rng.gen::<f64>() * 360.0 - 180.0 + fuzz).clamp(-180.0, 180.0),
        },
        "signature": {
            "samplems": signature.sample_ms,
            "timestamp": timestamp_ms,
            "uri": signature.uri,
        },
        "timestamp": timestamp_ms,
        "timezone": pick_timezone(rng),
    })
}

//! Multi-segment voting over a single session.
//!
//! Signatures from different offsets of one file are sent one at a time.
//! After every answer two stopping rules are checked, in order:
//!
//! 1. the two most recent answers name the same non-empty track;
//! 2. some non-empty track has been named at least twice so far, in which
//!    case its earliest answer is returned.
//!
//! If neither rule fires before the signatures run out the result is
//! ambiguous and lists every candidate seen.

use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::client::{RecognitionError, RecognitionSession};
use super::response::{annotate, Recognition, TrackSummary};
use crate::fingerprint::Signature;

/// Votes needed under the majority rule
const MAJORITY_VOTES: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentResult {
    pub offset_ms: u32,
    pub response: Option<Value>,
    pub summary: TrackSummary,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConsensusOutcome {
    /// Agreement reached; `response` is annotated with the segment count
    Confident {
        response: Value,
        segments_checked: usize,
    },
    /// No agreement; `response` is the ambiguity report
    Ambiguous {
        response: Value,
        segments_checked: usize,
        candidates: usize,
    },
    /// A segment was throttled; the remaining segments were not sent
    RateLimited { segments_checked: usize },
}

/// Which stopping rule, if any, fires for the results so far
fn decide(results: &[SegmentResult]) -> Option<usize> {
    let last = results.len().checked_sub(1)?;
    if last >= 1 {
        let current = &results[last].summary;
        if current.has_track() && current.track_id == results[last - 1].summary.track_id {
            return Some(last);
        }
    }

    let mut votes: HashMap<&str, usize> = HashMap::new();
    for result in results.iter().filter(|r| r.summary.has_track()) {
        *votes.entry(result.summary.track_id.as_str()).or_default() += 1;
    }
    results
        .iter()
        .position(|r| r.summary.has_track() && votes[r.summary.track_id.as_str()] >= MAJORITY_VOTES)
}

/// Report listing every candidate track seen across segments
pub fn ambiguity_report(results: &[SegmentResult]) -> Value {
    let candidates: Vec<Value> = results
        .iter()
        .filter(|r| r.summary.has_track())
        .map(|r| {
            json!({
                "offset_ms": r.offset_ms,
                "track_id": r.summary.track_id,
                "title": r.summary.title,
                "artist": r.summary.artist,
                "match_count": r.summary.match_count,
            })
        })
        .collect();

    json!({
        "matches": [],
        "vibra_segments_checked": results.len(),
        "vibra_confident": false,
        "vibra_ambiguous": candidates,
    })
}

/// Run consensus recognition over `signatures` using one session
pub fn recognize_consensus(
    session: &mut dyn RecognitionSession,
    signatures: &[Signature],
) -> Result<ConsensusOutcome, RecognitionError> {
    let mut results: Vec<SegmentResult> = Vec::with_capacity(signatures.len());

    for signature in signatures {
        let response = match session.recognize(signature) {
            Ok(Recognition::Matched(value)) => Some(value),
            Ok(Recognition::RateLimited) => {
                return Ok(ConsensusOutcome::RateLimited {
                    segments_checked: results.len() + 1,
                });
            }
            Ok(Recognition::Unrecognized(reason)) => {
                debug!("Segment at {}ms: {}", signature.offset_ms, reason);
                None
            }
            Err(e) => {
                warn!("Segment at {}ms failed: {}", signature.offset_ms, e);
                None
            }
        };

        let summary = response
            .as_ref()
            .map(TrackSummary::from_response)
            .unwrap_or_default();
        results.push(SegmentResult {
            offset_ms: signature.offset_ms,
            response,
            summary,
        });

        if let Some(index) = decide(&results) {
            let segments_checked = results.len();
            let mut response = results
                .swap_remove(index)
                .response
                .unwrap_or_else(|| json!({}));
            annotate(&mut response, segments_checked, true);
            return Ok(ConsensusOutcome::Confident {
                response,
                segments_checked,
            });
        }
    }

    let candidates = results.iter().filter(|r| r.summary.has_track()).count();
    Ok(ConsensusOutcome::Ambiguous {
        response: ambiguity_report(&results),
        segments_checked: results.len(),
        candidates,
    })
}

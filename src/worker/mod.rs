//! Worker loop and per-file recognition.
//!
//! Workers share every coordinator through [`WorkerContext`]. Every per-file
//! error ends up as a failed [`RecognitionOutcome`]; nothing escapes a worker.

use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::cache::{RecognitionOutcome, ResultCache};
use crate::fingerprint::{fingerprint_segments, Fingerprinter, Signature};
use crate::proxy::{EgressIp, ProxyCoordinator, ProxyDescriptor, ProxyError};
use crate::queue::WorkQueue;
use crate::rate_limit::{Admission, Escalation, RateLimitCoordinator};
use crate::recognition::{
    recognize_consensus, ConsensusOutcome, Recognition, RecognitionService, TrackSummary,
};
use crate::shutdown::{ShutdownToken, StopReason};
use crate::stats::BulkStats;

pub const COOLDOWN_SKIP_ERROR: &str = "Skipped due to rate limiting";
pub const FINGERPRINT_ERROR: &str = "Failed to generate fingerprint";
pub const RATE_LIMITED_ERROR: &str = "Rate limited by recognition service";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerOptions {
    /// Multi-segment consensus instead of a single request
    pub precise: bool,
    /// Skip files that already have a cached result
    pub resume: bool,
    /// Pause after every processed file
    pub delay: Duration,
}

/// Everything the workers of one run share
pub struct WorkerContext {
    pub fingerprinter: Arc<dyn Fingerprinter>,
    pub recognizer: Arc<dyn RecognitionService>,
    pub rate_limit: Arc<RateLimitCoordinator>,
    pub proxy: Arc<ProxyCoordinator>,
    pub egress: Arc<EgressIp>,
    pub cache: Arc<ResultCache>,
    pub stats: Arc<BulkStats>,
    pub shutdown: ShutdownToken,
    /// The fingerprinter is not assumed to be safe for concurrent use
    pub fingerprint_lock: Mutex<()>,
    pub options: WorkerOptions,
}

enum Attempt {
    Matched(Value),
    RateLimited,
    Failed(String),
}

pub struct Worker {
    id: usize,
    ctx: Arc<WorkerContext>,
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl Worker {
    pub fn new(id: usize, ctx: Arc<WorkerContext>) -> Self {
        Self { id, ctx }
    }

    /// Claim and process files until the queue is empty or the run stops
    pub fn run(&self, queue: &WorkQueue) {
        debug!("Worker {} started", self.id);

        while !self.ctx.shutdown.is_triggered() {
            let Some(path) = queue.claim() else {
                break;
            };

            if self.ctx.options.resume && self.ctx.cache.contains(path) {
                debug!("Worker {}: cached result for {:?}, skipping", self.id, path);
                self.ctx.stats.record_skip();
                continue;
            }

            self.process_file(path);

            if !self.ctx.options.delay.is_zero() {
                self.ctx.shutdown.sleep(self.ctx.options.delay);
            }
        }

        debug!("Worker {} finished", self.id);
    }

    /// Recognize one file and record the outcome in the cache and stats
    pub fn process_file(&self, path: &Path) -> RecognitionOutcome {
        let outcome = self.recognize_file(path);
        let name = display_name(path);

        if outcome.success {
            self.ctx.stats.record_success();
            let summary = outcome
                .response
                .as_ref()
                .map(TrackSummary::from_response)
                .unwrap_or_default();
            if summary.has_track() {
                info!("✅ {}: {} - {}", name, summary.artist, summary.title);
            } else {
                info!("❔ {}: ambiguous match", name);
            }
        } else {
            self.ctx.stats.record_failure();
            warn!(
                "❌ {}: {}",
                name,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        }

        self.ctx.cache.insert(outcome.clone());
        outcome
    }

    fn recognize_file(&self, path: &Path) -> RecognitionOutcome {
        match self.ctx.rate_limit.admit(Instant::now()) {
            Admission::Proceed => {}
            Admission::CoolingDown { remaining } => {
                debug!(
                    "Cooling down for another {}s, not sending {:?}",
                    remaining.as_secs(),
                    path
                );
                return RecognitionOutcome::failure(path, COOLDOWN_SKIP_ERROR);
            }
            Admission::Halted => return RecognitionOutcome::failure(path, COOLDOWN_SKIP_ERROR),
        }

        let signatures = match self.fingerprint(path) {
            Ok(signatures) => signatures,
            Err(e) => {
                debug!("Fingerprinting {:?} failed: {:#}", path, e);
                return RecognitionOutcome::failure(path, FINGERPRINT_ERROR);
            }
        };

        self.recognize_with_recovery(path, &signatures)
    }

    fn fingerprint(&self, path: &Path) -> anyhow::Result<Vec<Signature>> {
        let _guard = self
            .ctx
            .fingerprint_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let fingerprinter = self.ctx.fingerprinter.as_ref();
        if self.ctx.options.precise {
            fingerprint_segments(fingerprinter, path)
        } else {
            Ok(vec![fingerprinter.fingerprint(path, None)?])
        }
    }

    /// Recognize, handling throttling through rotation or the backoff schedule.
    /// After a successful rotation the same file is retried once.
    fn recognize_with_recovery(&self, path: &Path, signatures: &[Signature]) -> RecognitionOutcome {
        let mut retried = false;
        loop {
            let (proxy, generation) = self.ctx.proxy.current();
            match self.attempt(proxy.as_ref(), signatures) {
                Attempt::Matched(response) => {
                    self.ctx.rate_limit.record_success();
                    let ip = self.ctx.egress.resolve(proxy.as_ref(), generation);
                    return RecognitionOutcome::success(path, response, ip);
                }
                Attempt::Failed(error) => return RecognitionOutcome::failure(path, error),
                Attempt::RateLimited if !self.ctx.proxy.rotation_enabled() => {
                    self.back_off();
                    return RecognitionOutcome::failure(path, RATE_LIMITED_ERROR);
                }
                Attempt::RateLimited => match self.ctx.proxy.rotate(generation, &self.ctx.shutdown) {
                    Ok(next) if !retried => {
                        info!("🔁 Retrying {} through {}", display_name(path), next.redacted());
                        retried = true;
                    }
                    Ok(_) | Err(ProxyError::Cancelled) => {
                        return RecognitionOutcome::failure(path, RATE_LIMITED_ERROR);
                    }
                    Err(e) => {
                        error!("🛑 Proxy rotation failed, halting: {}", e);
                        self.ctx
                            .shutdown
                            .trigger(StopReason::RotationFailed(e.to_string()));
                        return RecognitionOutcome::failure(path, RATE_LIMITED_ERROR);
                    }
                },
            }
        }
    }

    fn back_off(&self) {
        if let Escalation::Halt { .. } = self.ctx.rate_limit.record_rate_limited(Instant::now()) {
            self.ctx.shutdown.trigger(StopReason::RateLimited);
        }
    }

    fn attempt(&self, proxy: Option<&ProxyDescriptor>, signatures: &[Signature]) -> Attempt {
        let mut session = match self.ctx.recognizer.open_session(proxy) {
            Ok(session) => session,
            Err(e) => return Attempt::Failed(e.to_string()),
        };

        if self.ctx.options.precise {
            return match recognize_consensus(session.as_mut(), signatures) {
                Ok(ConsensusOutcome::Confident {
                    response,
                    segments_checked,
                }) => {
                    debug!("Consensus reached after {} segments", segments_checked);
                    Attempt::Matched(response)
                }
                Ok(ConsensusOutcome::Ambiguous {
                    response,
                    candidates,
                    ..
                }) if candidates > 0 => Attempt::Matched(response),
                Ok(ConsensusOutcome::Ambiguous {
                    segments_checked, ..
                }) => Attempt::Failed(format!(
                    "No match found across {segments_checked} segments"
                )),
                Ok(ConsensusOutcome::RateLimited { .. }) => Attempt::RateLimited,
                Err(e) => Attempt::Failed(e.to_string()),
            };
        }

        let Some(signature) = signatures.first() else {
            return Attempt::Failed(FINGERPRINT_ERROR.to_string());
        };
        match session.recognize(signature) {
            Ok(Recognition::Matched(response)) => Attempt::Matched(response),
            Ok(Recognition::RateLimited) => Attempt::RateLimited,
            Ok(Recognition::Unrecognized(reason)) => Attempt::Failed(reason),
            Err(e) => Attempt::Failed(e.to_string()),
        }
    }
}

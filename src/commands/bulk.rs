use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use crate::cache::ResultCache;
use crate::config::Config;
use crate::fingerprint::CommandFingerprinter;
use crate::proxy::{EgressIp, HttpProxyTransport, ProxyConfig, ProxyCoordinator, RotationSettings};
use crate::queue::WorkQueue;
use crate::rate_limit::RateLimitCoordinator;
use crate::recognition::RecognitionClient;
use crate::scan::AudioScanner;
use crate::shutdown::{ShutdownToken, StopReason};
use crate::stats::{BulkStats, StatsSnapshot};
use crate::worker::{Worker, WorkerContext, WorkerOptions};

pub const MAX_THREADS: usize = 16;

/// Time in-flight work gets to finish after a termination signal
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);
const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// How a bulk run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkSummary {
    pub stats: StatsSnapshot,
    pub reason: StopReason,
    /// A termination signal arrived, whatever stopped the run first
    pub interrupted: bool,
}

/// Recognize every audio file under a directory
pub struct BulkCommand {
    root: PathBuf,
    output: PathBuf,
    threads: usize,
    delay: Duration,
    resume: bool,
    precise: bool,
    excludes: Vec<String>,
    rotation_timeout: Duration,
    proxy: ProxyConfig,
}

impl BulkCommand {
    /// Out-of-range thread counts and negative delays are clamped
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        root: PathBuf,
        output: PathBuf,
        threads: i64,
        delay_secs: f64,
        resume: bool,
        precise: bool,
        excludes: Vec<String>,
        rotation_timeout_secs: u64,
        proxy: ProxyConfig,
    ) -> Self {
        let delay_secs = if delay_secs.is_finite() {
            delay_secs.max(0.0)
        } else {
            0.0
        };
        Self {
            root,
            output,
            threads: threads.clamp(1, MAX_THREADS as i64) as usize,
            delay: Duration::from_secs_f64(delay_secs),
            resume,
            precise,
            excludes,
            rotation_timeout: Duration::from_secs(rotation_timeout_secs),
            proxy,
        }
    }

    pub async fn execute(&self) -> Result<BulkSummary> {
        let config = Config::from_env();
        self.proxy.validate()?;

        let scanner = AudioScanner::new(&self.root, &self.excludes)?;
        let files = scanner.scan();
        if files.is_empty() {
            info!("No supported audio files found in {:?}", scanner.root());
            return Ok(BulkSummary {
                stats: StatsSnapshot::default(),
                reason: StopReason::Completed,
                interrupted: false,
            });
        }

        let cache = if self.resume {
            ResultCache::load(&self.output)?
        } else {
            ResultCache::new(&self.output)
        };

        let settings = RotationSettings {
            timeout: self.rotation_timeout,
            probe_timeout: config.probe_timeout(),
            ..RotationSettings::default()
        };
        let transport = Arc::new(HttpProxyTransport::new(
            config.ip_echo_url.clone(),
            config.request_timeout(),
        ));
        let proxy = Arc::new(ProxyCoordinator::new(&self.proxy, settings, transport)?);

        let validating = proxy.clone();
        tokio::task::spawn_blocking(move || validating.validate_active())
            .await
            .context("proxy validation task failed")?
            .map_err(|e| anyhow!("Proxy validation failed: {e}"))?;

        let shutdown = ShutdownToken::new();
        let ctx = Arc::new(WorkerContext {
            fingerprinter: Arc::new(CommandFingerprinter::new(&config)),
            recognizer: Arc::new(RecognitionClient::new(
                config.recognition_host.clone(),
                config.request_timeout(),
            )),
            rate_limit: Arc::new(RateLimitCoordinator::default()),
            proxy,
            egress: Arc::new(EgressIp::new(
                config.ip_echo_url.clone(),
                config.probe_timeout(),
            )),
            cache: Arc::new(cache),
            stats: Arc::new(BulkStats::default()),
            shutdown: shutdown.clone(),
            fingerprint_lock: Mutex::new(()),
            options: WorkerOptions {
                precise: self.precise,
                resume: self.resume,
                delay: self.delay,
            },
        });

        info!(
            "🚀 Processing {} files with {} threads (precise: {}, resume: {})",
            files.len(),
            self.threads,
            self.precise,
            self.resume
        );

        let run = Arc::new(BulkRun::new(
            files,
            ctx,
            self.threads,
            config.autosave_interval(),
        ));
        let processing = run.clone();
        let mut handle = tokio::task::spawn_blocking(move || processing.process());

        tokio::select! {
            joined = &mut handle => {
                let stats = joined.context("bulk processing task failed")?;
                Ok(BulkSummary {
                    stats,
                    reason: shutdown.reason().unwrap_or(StopReason::Completed),
                    interrupted: false,
                })
            }
            _ = shutdown_signal() => {
                warn!("🛑 Shutdown signal received, finishing in-flight work...");
                shutdown.trigger(StopReason::Signal);
                if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
                    warn!("Workers still busy after {}s, saving what we have", SHUTDOWN_GRACE.as_secs());
                }
                Ok(run.interrupted())
            }
        }
    }
}

/// Resolves on Ctrl-C, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// One bulk run: worker threads plus the progress and autosave loops
pub struct BulkRun {
    queue: WorkQueue,
    ctx: Arc<WorkerContext>,
    threads: usize,
    autosave_interval: Duration,
    finalized: AtomicBool,
}

impl BulkRun {
    pub fn new(
        files: Vec<PathBuf>,
        ctx: Arc<WorkerContext>,
        threads: usize,
        autosave_interval: Duration,
    ) -> Self {
        let queue = WorkQueue::new(files);
        ctx.stats.set_total(queue.len());
        Self {
            queue,
            ctx,
            threads: threads.clamp(1, MAX_THREADS),
            autosave_interval,
            finalized: AtomicBool::new(false),
        }
    }

    /// Run every worker to completion, then flush and report
    pub fn process(&self) -> StatsSnapshot {
        thread::scope(|scope| {
            scope.spawn(|| self.progress_loop());
            scope.spawn(|| self.autosave_loop());

            let workers: Vec<_> = (0..self.threads)
                .map(|id| {
                    let worker = Worker::new(id, self.ctx.clone());
                    let queue = &self.queue;
                    scope.spawn(move || worker.run(queue))
                })
                .collect();

            for worker in workers {
                if worker.join().is_err() {
                    error!("A worker thread panicked");
                }
            }
            self.ctx.shutdown.trigger(StopReason::Completed);
        });

        self.finalize()
    }

    /// Final flush and summary. Runs once no matter how often it is called.
    pub fn finalize(&self) -> StatsSnapshot {
        let stats = self.ctx.stats.snapshot();
        if self.finalized.swap(true, Ordering::SeqCst) {
            return stats;
        }

        match self.ctx.cache.save(&stats) {
            Ok(()) => info!("💾 Results saved to {:?}", self.ctx.cache.path()),
            Err(e) => error!("Failed to save results: {:#}", e),
        }
        print_summary(
            &stats,
            self.ctx.proxy.rotations(),
            self.ctx.shutdown.reason().as_ref(),
            self.ctx.cache.path(),
        );
        stats
    }

    /// Flush after a termination signal. The stop reason stays whatever
    /// ended the run first.
    pub fn interrupted(&self) -> BulkSummary {
        self.ctx.shutdown.trigger(StopReason::Signal);
        BulkSummary {
            stats: self.finalize(),
            reason: self
                .ctx
                .shutdown
                .reason()
                .unwrap_or(StopReason::Signal),
            interrupted: true,
        }
    }

    fn progress_loop(&self) {
        let stats = self.ctx.stats.snapshot();
        let bar = ProgressBar::new(stats.total as u64);
        let style = ProgressStyle::with_template(
            "{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} ({percent}%) {msg}",
        )
        .map(|s| s.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);

        loop {
            let stats = self.ctx.stats.snapshot();
            bar.set_position(stats.completed() as u64);
            bar.set_message(format!(
                "✓{} ✗{} ⊘{}",
                stats.successful, stats.failed, stats.skipped
            ));
            if !self.ctx.shutdown.sleep(PROGRESS_INTERVAL) {
                break;
            }
        }
        bar.finish_and_clear();
    }

    fn autosave_loop(&self) {
        while self.ctx.shutdown.sleep(self.autosave_interval) {
            if let Err(e) = self.ctx.cache.save(&self.ctx.stats.snapshot()) {
                warn!("⚠️ Autosave failed, will retry: {:#}", e);
            }
        }
    }
}

fn print_summary(
    stats: &StatsSnapshot,
    rotations: u64,
    reason: Option<&StopReason>,
    output: &Path,
) {
    println!("\n📊 Bulk Recognition Summary");
    println!("═══════════════════════════");
    println!("📁 Total files:       {}", stats.total);
    println!(
        "📈 Completed:         {}/{} ({:.1}%)",
        stats.completed(),
        stats.total,
        stats.percentage()
    );
    println!("⚙️  Processed:         {}", stats.processed);
    println!("✅ Successful:        {}", stats.successful);
    println!("❌ Failed:            {}", stats.failed);
    if stats.skipped > 0 {
        println!("⊘  Skipped (cached):  {}", stats.skipped);
    }
    if stats.processed > 0 {
        println!(
            "🎯 Success rate:      {:.1}%",
            stats.successful as f64 * 100.0 / stats.processed as f64
        );
    }
    if rotations > 0 {
        println!("🔄 Proxy rotations:   {}", rotations);
    }
    if let Some(reason) = reason.filter(|r| **r != StopReason::Completed) {
        println!("🛑 Stopped early:     {}", reason);
    }
    println!("💾 Results file:      {}", output.display());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::tests::ScriptedTransport;
    use crate::recognition::Recognition;
    use crate::worker::tests::{matched, ScriptedService, StubFingerprinter};
    use tempfile::TempDir;

    fn context(output: &Path, answers: Vec<Recognition>, resume: bool) -> Arc<WorkerContext> {
        let cache = if resume {
            ResultCache::load(output).unwrap()
        } else {
            ResultCache::new(output)
        };
        Arc::new(WorkerContext {
            fingerprinter: Arc::new(StubFingerprinter::new()),
            recognizer: Arc::new(ScriptedService::new(answers)),
            rate_limit: Arc::new(RateLimitCoordinator::default()),
            proxy: Arc::new(ProxyCoordinator::direct(Arc::new(ScriptedTransport::new(
                "unused:1", 0,
            )))),
            egress: Arc::new(EgressIp::disabled()),
            cache: Arc::new(cache),
            stats: Arc::new(BulkStats::default()),
            shutdown: ShutdownToken::new(),
            fingerprint_lock: Mutex::new(()),
            options: WorkerOptions {
                resume,
                ..Default::default()
            },
        })
    }

    fn files() -> Vec<PathBuf> {
        vec![
            PathBuf::from("/music/a.mp3"),
            PathBuf::from("/music/b.mp3"),
            PathBuf::from("/music/c.mp3"),
        ]
    }

    #[test]
    fn test_command_clamps_arguments() {
        let cmd = BulkCommand::new(
            PathBuf::from("/music"),
            PathBuf::from("results.json"),
            64,
            -3.0,
            false,
            false,
            vec![],
            60,
            ProxyConfig::default(),
        );
        assert_eq!(cmd.threads, MAX_THREADS);
        assert_eq!(cmd.delay, Duration::ZERO);

        let cmd = BulkCommand::new(
            PathBuf::from("/music"),
            PathBuf::from("results.json"),
            0,
            1.5,
            false,
            false,
            vec![],
            60,
            ProxyConfig::default(),
        );
        assert_eq!(cmd.threads, 1);
        assert_eq!(cmd.delay, Duration::from_millis(1500));
    }

    #[test]
    fn test_run_writes_document_and_resume_skips_everything() {
        let temp_dir = TempDir::new().unwrap();
        let output = temp_dir.path().join("results.json");

        let first = context(
            &output,
            vec![
                matched("A"),
                Recognition::Unrecognized("No match found".to_string()),
                matched("C"),
            ],
            false,
        );
        let stats = BulkRun::new(files(), first.clone(), 2, Duration::from_secs(5)).process();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.processed, 3);
        assert_eq!(stats.successful + stats.failed, 3);
        assert_eq!(first.shutdown.reason(), Some(StopReason::Completed));

        let document: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(document["results"].as_array().unwrap().len(), 3);
        assert_eq!(document["stats"]["processed"], 3);

        let second = context(&output, vec![], true);
        let split = second.cache.counts();
        let stats = BulkRun::new(files(), second.clone(), 4, Duration::from_secs(5)).process();
        assert_eq!(stats.skipped, 3);
        assert_eq!(stats.processed, 0);
        assert_eq!(second.cache.counts(), split);

        let document: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(document["stats"]["skipped"], 3);
        assert_eq!(document["results"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_finalize_runs_once() {
        let temp_dir = TempDir::new().unwrap();
        let output = temp_dir.path().join("results.json");
        let run = BulkRun::new(files(), context(&output, vec![], false), 1, Duration::from_secs(5));

        run.finalize();
        std::fs::remove_file(&output).unwrap();
        run.finalize();
        assert!(!output.exists());
    }

    #[test]
    fn test_signal_after_halt_still_reports_interruption() {
        let temp_dir = TempDir::new().unwrap();
        let output = temp_dir.path().join("results.json");
        let ctx = context(&output, vec![], false);
        let run = BulkRun::new(files(), ctx.clone(), 1, Duration::from_secs(5));

        ctx.shutdown.trigger(StopReason::RateLimited);
        let summary = run.interrupted();

        assert!(summary.interrupted);
        assert_eq!(summary.reason, StopReason::RateLimited);
        assert!(output.exists());
    }

    #[tokio::test]
    async fn test_execute_rejects_missing_directory() {
        let cmd = BulkCommand::new(
            PathBuf::from("/nonexistent/path"),
            PathBuf::from("results.json"),
            1,
            0.0,
            false,
            false,
            vec![],
            60,
            ProxyConfig::default(),
        );
        assert!(cmd.execute().await.is_err());
    }

    #[tokio::test]
    async fn test_execute_empty_directory_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let output = temp_dir.path().join("results.json");
        let cmd = BulkCommand::new(
            temp_dir.path().to_path_buf(),
            output.clone(),
            1,
            0.0,
            false,
            false,
            vec![],
            60,
            ProxyConfig::default(),
        );

        let summary = cmd.execute().await.unwrap();
        assert_eq!(summary.stats, StatsSnapshot::default());
        assert_eq!(summary.reason, StopReason::Completed);
        assert!(!summary.interrupted);
        assert!(!output.exists());
    }
}

//! Active forward proxy, static validation and rotation.

pub mod descriptor;
pub mod egress;
pub mod transport;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

use crate::shutdown::ShutdownToken;

pub use descriptor::{ProxyCredentials, ProxyDescriptor, ProxyKind, DEFAULT_PROXY_PORT};
pub use egress::EgressIp;
pub use transport::HttpProxyTransport;

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("invalid proxy descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("invalid proxy configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to fetch a proxy from {url}: {reason}")]
    FetchFailed { url: String, reason: String },

    #[error("proxy {proxy} is unreachable: {reason}")]
    Unreachable { proxy: String, reason: String },

    #[error("proxy {proxy} did not become reachable within {}s", .timeout.as_secs())]
    RotationTimeout { proxy: String, timeout: Duration },

    #[error("proxy rotation cancelled by shutdown")]
    Cancelled,
}

/// User-supplied proxy options, immutable once built
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub kind: ProxyKind,
    pub user: Option<String>,
    pub pass: Option<String>,
    pub rotate_url: Option<String>,
}

impl ProxyConfig {
    pub fn validate(&self) -> Result<(), ProxyError> {
        if self.rotate_url.is_some() && self.host.is_none() {
            return Err(ProxyError::InvalidConfig(
                "a rotation URL requires --proxy-host as a fallback".to_string(),
            ));
        }
        if self.pass.is_some() && self.user.is_none() {
            return Err(ProxyError::InvalidConfig(
                "--proxy-pass requires --proxy-user".to_string(),
            ));
        }
        if let Some(host) = &self.host {
            if host.trim().is_empty() {
                return Err(ProxyError::InvalidConfig("empty proxy host".to_string()));
            }
        }
        Ok(())
    }

    /// The static descriptor, if a host was given
    pub fn descriptor(&self) -> Option<ProxyDescriptor> {
        let host = self.host.as_ref()?.trim();
        let port = self.port.unwrap_or(DEFAULT_PROXY_PORT);
        let descriptor = ProxyDescriptor::new(self.kind, host, port);
        Some(match &self.user {
            Some(user) => descriptor.with_credentials(user.clone(), self.pass.clone()),
            None => descriptor,
        })
    }
}

/// Timing of the rotation health-check loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationSettings {
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub probe_timeout: Duration,
}

impl Default for RotationSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3),
            timeout: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(10),
        }
    }
}

/// Network side of rotation: fetching candidates and probing them
pub trait ProxyTransport: Send + Sync {
    /// One plain-text GET returning a single descriptor
    fn fetch_candidate(&self, source: &str) -> Result<String, ProxyError>;

    /// Transport-level reachability through `proxy`
    fn probe(&self, proxy: &ProxyDescriptor, timeout: Duration) -> Result<(), ProxyError>;
}

#[derive(Debug)]
struct ProxyState {
    active: Option<ProxyDescriptor>,
    generation: u64,
}

/// Holds the active proxy shared by all workers
pub struct ProxyCoordinator {
    state: Mutex<ProxyState>,
    rotate_url: Option<String>,
    settings: RotationSettings,
    transport: Arc<dyn ProxyTransport>,
}

impl ProxyCoordinator {
    pub fn new(
        config: &ProxyConfig,
        settings: RotationSettings,
        transport: Arc<dyn ProxyTransport>,
    ) -> Result<Self, ProxyError> {
        config.validate()?;
        Ok(Self {
            state: Mutex::new(ProxyState {
                active: config.descriptor(),
                generation: 0,
            }),
            rotate_url: config.rotate_url.clone(),
            settings,
            transport,
        })
    }

    /// Coordinator without any proxy: every request goes direct
    pub fn direct(transport: Arc<dyn ProxyTransport>) -> Self {
        Self {
            state: Mutex::new(ProxyState {
                active: None,
                generation: 0,
            }),
            rotate_url: None,
            settings: RotationSettings::default(),
            transport,
        }
    }

    pub fn active(&self) -> Option<ProxyDescriptor> {
        self.lock().active.clone()
    }

    /// Active proxy together with its generation, bumped on every rotation
    pub fn current(&self) -> (Option<ProxyDescriptor>, u64) {
        let state = self.lock();
        (state.active.clone(), state.generation)
    }

    pub fn rotation_enabled(&self) -> bool {
        self.rotate_url.is_some()
    }

    /// Successful rotations so far
    pub fn rotations(&self) -> u64 {
        self.lock().generation
    }

    /// Startup check for a static proxy. Direct connections need no check.
    pub fn validate_active(&self) -> Result<(), ProxyError> {
        let Some(proxy) = self.active() else {
            return Ok(());
        };
        info!("🔌 Validating proxy {}", proxy.redacted());
        self.transport.probe(&proxy, self.settings.probe_timeout)?;
        info!("✅ Proxy {} is reachable", proxy.redacted());
        Ok(())
    }

    /// Replace the active proxy with a freshly fetched, health-checked one.
    ///
    /// `seen_generation` is the generation the caller was using when it got
    /// throttled. If another worker already rotated past it, the current proxy
    /// is returned without another fetch. The state lock is held for the whole
    /// rotation, so concurrent callers wait for it to finish.
    pub fn rotate(
        &self,
        seen_generation: u64,
        shutdown: &ShutdownToken,
    ) -> Result<ProxyDescriptor, ProxyError> {
        let Some(source) = self.rotate_url.as_deref() else {
            return Err(ProxyError::InvalidConfig(
                "proxy rotation is not configured".to_string(),
            ));
        };

        let mut state = self.lock();
        if state.generation != seen_generation {
            if let Some(active) = &state.active {
                return Ok(active.clone());
            }
        }

        info!("🔄 Rate limited, fetching a new proxy from {}", source);
        let raw = self.transport.fetch_candidate(source)?;
        let candidate: ProxyDescriptor = raw.trim().parse()?;
        info!("Health-checking candidate proxy {}", candidate.redacted());

        let started = Instant::now();
        loop {
            if shutdown.is_triggered() {
                return Err(ProxyError::Cancelled);
            }

            match self.transport.probe(&candidate, self.settings.probe_timeout) {
                Ok(()) => {
                    info!(
                        "✅ Proxy rotated to {} after {:.1}s",
                        candidate.redacted(),
                        started.elapsed().as_secs_f64()
                    );
                    state.active = Some(candidate.clone());
                    state.generation += 1;
                    return Ok(candidate);
                }
                Err(e) => warn!("Candidate proxy not ready yet: {}", e),
            }

            let elapsed = started.elapsed();
            if elapsed >= self.settings.timeout {
                return Err(ProxyError::RotationTimeout {
                    proxy: candidate.redacted(),
                    timeout: self.settings.timeout,
                });
            }
            let wait = self.settings.poll_interval.min(self.settings.timeout - elapsed);
            if !shutdown.sleep(wait) {
                return Err(ProxyError::Cancelled);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ProxyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

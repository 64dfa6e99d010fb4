use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{info, warn};

use super::transport::fetch_egress_ip;
use super::ProxyDescriptor;

/// Egress IP per proxy generation, looked up once and then reused.
///
/// Lookups are lazy: nothing is fetched until a result needs an IP.
pub struct EgressIp {
    echo_url: Option<String>,
    timeout: Duration,
    cached: Mutex<Option<(u64, Option<String>)>>,
}

impl EgressIp {
    pub fn new(echo_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            echo_url: Some(echo_url.into()),
            timeout,
            cached: Mutex::new(None),
        }
    }

    /// Never looks anything up; results carry no IP
    pub fn disabled() -> Self {
        Self {
            echo_url: None,
            timeout: Duration::ZERO,
            cached: Mutex::new(None),
        }
    }

    /// IP seen by the echo endpoint through `proxy`, which belongs to `generation`
    pub fn resolve(&self, proxy: Option<&ProxyDescriptor>, generation: u64) -> Option<String> {
        let echo_url = self.echo_url.as_deref()?;
        let mut cached = self.cached.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((seen, ip)) = cached.as_ref() {
            if *seen == generation {
                return ip.clone();
            }
        }

        let ip = match fetch_egress_ip(proxy, echo_url, self.timeout) {
            Ok(ip) => {
                info!("🌐 Egress IP: {}", ip);
                Some(ip)
            }
            Err(e) => {
                warn!("⚠️ Could not determine egress IP: {}", e);
                None
            }
        };
        *cached = Some((generation, ip.clone()));
        ip
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_never_resolves() {
        assert_eq!(EgressIp::disabled().resolve(None, 0), None);
    }

    #[test]
    fn test_failed_lookup_is_cached_per_generation() {
        let egress = EgressIp::new("http://127.0.0.1:9/", Duration::from_millis(200));
        assert_eq!(egress.resolve(None, 0), None);
        assert_eq!(
            *egress.cached.lock().unwrap(),
            Some((0, None))
        );
        assert_eq!(egress.resolve(None, 1), None);
        assert_eq!(*egress.cached.lock().unwrap(), Some((1, None)));
    }
}

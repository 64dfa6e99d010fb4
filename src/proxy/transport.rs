use reqwest::blocking::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{ProxyDescriptor, ProxyError, ProxyTransport};

/// Blocking HTTP client routed through `proxy`, or direct when `None`
pub fn blocking_client(
    proxy: Option<&ProxyDescriptor>,
    timeout: Duration,
) -> Result<Client, ProxyError> {
    let builder = Client::builder().timeout(timeout);
    let builder = match proxy {
        Some(proxy) => builder.proxy(proxy.to_reqwest()?),
        None => builder.no_proxy(),
    };
    builder
        .build()
        .map_err(|e| ProxyError::InvalidConfig(format!("failed to build HTTP client: {e}")))
}

#[derive(Debug, Deserialize)]
struct IpEcho {
    ip: String,
}

/// Ask the IP-echo endpoint which address our requests leave from
pub fn fetch_egress_ip(
    proxy: Option<&ProxyDescriptor>,
    echo_url: &str,
    timeout: Duration,
) -> Result<String, ProxyError> {
    let unreachable = |reason: String| ProxyError::Unreachable {
        proxy: proxy
            .map(ProxyDescriptor::redacted)
            .unwrap_or_else(|| "direct".to_string()),
        reason,
    };

    let client = blocking_client(proxy, timeout)?;
    let echo: IpEcho = client
        .get(echo_url)
        .send()
        .and_then(|r| r.error_for_status())
        .and_then(|r| r.json())
        .map_err(|e| unreachable(e.to_string()))?;
    Ok(echo.ip)
}

/// Rotation source and health probe over plain HTTP
pub struct HttpProxyTransport {
    probe_url: String,
    fetch_timeout: Duration,
}

impl HttpProxyTransport {
    pub fn new(probe_url: impl Into<String>, fetch_timeout: Duration) -> Self {
        Self {
            probe_url: probe_url.into(),
            fetch_timeout,
        }
    }
}

impl ProxyTransport for HttpProxyTransport {
    fn fetch_candidate(&self, source: &str) -> Result<String, ProxyError> {
        let failed = |reason: String| ProxyError::FetchFailed {
            url: source.to_string(),
            reason,
        };

        let client = blocking_client(None, self.fetch_timeout)?;
        let body = client
            .get(source)
            .send()
            .and_then(|r| r.error_for_status())
            .and_then(|r| r.text())
            .map_err(|e| failed(e.to_string()))?;

        let candidate = body.trim();
        if candidate.is_empty() {
            return Err(failed("empty response".to_string()));
        }
        debug!("Rotation source returned {} bytes", candidate.len());
        Ok(candidate.to_string())
    }

    fn probe(&self, proxy: &ProxyDescriptor, timeout: Duration) -> Result<(), ProxyError> {
        let unreachable = |reason: String| ProxyError::Unreachable {
            proxy: proxy.redacted(),
            reason,
        };

        let client = blocking_client(Some(proxy), timeout)?;
        // Any HTTP answer proves the proxy routes traffic
        client
            .get(&self.probe_url)
            .send()
            .map(|_| ())
            .map_err(|e| unreachable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyKind;

    #[test]
    fn test_blocking_client_direct() {
        assert!(blocking_client(None, Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_blocking_client_with_proxy() {
        let proxy = ProxyDescriptor::new(ProxyKind::Socks5, "127.0.0.1", 9050);
        assert!(blocking_client(Some(&proxy), Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn test_probe_unreachable_proxy() {
        // Port 9 on localhost has nothing listening in test environments
        let transport = HttpProxyTransport::new("http://example.invalid/", Duration::from_secs(1));
        let proxy = ProxyDescriptor::new(ProxyKind::Http, "127.0.0.1", 9);
        let result = transport.probe(&proxy, Duration::from_millis(500));
        assert!(matches!(result, Err(ProxyError::Unreachable { .. })));
    }
}

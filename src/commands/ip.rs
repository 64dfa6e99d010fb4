use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::proxy::transport::fetch_egress_ip;
use crate::proxy::ProxyConfig;

/// Print the IP address the recognition service would see
pub struct IpCommand {
    proxy: ProxyConfig,
}

impl IpCommand {
    pub fn new(proxy: ProxyConfig) -> Self {
        Self { proxy }
    }

    pub async fn execute(&self) -> Result<String> {
        self.proxy.validate()?;
        let config = Config::from_env();
        let proxy = self.proxy.descriptor();

        if let Some(proxy) = &proxy {
            info!("🔌 Using proxy {}", proxy.redacted());
        }

        let ip = tokio::task::spawn_blocking(move || {
            fetch_egress_ip(proxy.as_ref(), &config.ip_echo_url, config.probe_timeout())
        })
        .await
        .context("IP lookup task failed")??;

        println!("{ip}");
        Ok(ip)
    }
}

pub mod bulk;
pub mod circuit;
pub mod ip;
pub mod recognize;

use clap::Args;

use crate::proxy::{ProxyConfig, ProxyKind};

/// Forward proxy options shared by every networked command
#[derive(Debug, Clone, Default, Args)]
pub struct ProxyArgs {
    /// Proxy host (also the fallback anchor for --proxy-rotate-url)
    #[arg(long)]
    pub proxy_host: Option<String>,
    /// Proxy port (defaults to 8080)
    #[arg(long)]
    pub proxy_port: Option<u16>,
    /// Proxy protocol
    #[arg(long, value_enum, default_value_t = ProxyKind::Http)]
    pub proxy_type: ProxyKind,
    /// Proxy username
    #[arg(long)]
    pub proxy_user: Option<String>,
    /// Proxy password
    #[arg(long, env = "VIBRA_PROXY_PASS", hide_env_values = true)]
    pub proxy_pass: Option<String>,
    /// URL returning a fresh proxy descriptor as plain text, used when rate limited
    #[arg(long, requires = "proxy_host")]
    pub proxy_rotate_url: Option<String>,
}

impl From<ProxyArgs> for ProxyConfig {
    fn from(args: ProxyArgs) -> Self {
        Self {
            host: args.proxy_host,
            port: args.proxy_port,
            kind: args.proxy_type,
            user: args.proxy_user,
            pass: args.proxy_pass,
            rotate_url: args.proxy_rotate_url,
        }
    }
}

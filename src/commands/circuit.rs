use anyhow::Result;
use tracing::info;

use crate::config::Config;
use crate::tor::request_new_circuit;

/// Ask a local Tor daemon for a fresh circuit
pub struct NewCircuitCommand {
    control: Option<String>,
    password: Option<String>,
}

impl NewCircuitCommand {
    /// `None` falls back to `VIBRA_TOR_CONTROL` / `VIBRA_TOR_PASSWORD`
    pub fn new(control: Option<String>, password: Option<String>) -> Self {
        Self { control, password }
    }

    pub async fn execute(&self) -> Result<()> {
        let config = Config::from_env();
        let control = self.control.clone().unwrap_or(config.tor_control);
        let password = self.password.clone().or(config.tor_password);

        info!("Connecting to Tor control port at {}", control);
        request_new_circuit(&control, password.as_deref()).await?;
        println!("✅ New Tor circuit requested");
        Ok(())
    }
}

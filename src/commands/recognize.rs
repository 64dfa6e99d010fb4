use anyhow::{anyhow, Context, Result};
use serde_json::{json, Value};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::config::Config;
use crate::fingerprint::{fingerprint_segments, CommandFingerprinter, Fingerprinter};
use crate::proxy::{ProxyConfig, ProxyDescriptor};
use crate::recognition::enrich::enrich as enrich_response;
use crate::recognition::{
    recognize_consensus, unify, ConsensusOutcome, Recognition, RecognitionClient,
    RecognitionService,
};
use crate::worker::RATE_LIMITED_ERROR;

/// Recognize a single file and print the response
pub struct RecognizeCommand {
    file: PathBuf,
    precise: bool,
    unified: bool,
    enrich: bool,
    proxy: ProxyConfig,
}

impl RecognizeCommand {
    pub fn new(file: PathBuf, precise: bool, unified: bool, enrich: bool, proxy: ProxyConfig) -> Self {
        Self {
            file,
            precise,
            unified,
            enrich,
            proxy,
        }
    }

    pub async fn execute(&self) -> Result<()> {
        if !self.file.is_file() {
            return Err(anyhow!("File does not exist: {:?}", self.file));
        }
        self.proxy.validate()?;

        let config = Config::from_env();
        let file = self.file.clone();
        let proxy = self.proxy.descriptor();
        let (precise, unified, enrich) = (self.precise, self.unified, self.enrich);

        let output = tokio::task::spawn_blocking(move || {
            let response = recognize_file(&config, &file, proxy.as_ref(), precise)?;
            let response = if enrich {
                enrich_response(response, proxy.as_ref(), config.request_timeout())
            } else {
                response
            };
            Ok::<_, anyhow::Error>(if unified { unify(&response) } else { response })
        })
        .await
        .context("recognition task failed")??;

        println!("{}", serde_json::to_string_pretty(&output)?);
        Ok(())
    }
}

/// Fingerprint and recognize `file`. A file with no match yields an empty
/// `matches` list rather than an error.
pub fn recognize_file(
    config: &Config,
    file: &std::path::Path,
    proxy: Option<&ProxyDescriptor>,
    precise: bool,
) -> Result<Value> {
    let fingerprinter = CommandFingerprinter::new(config);
    let client = RecognitionClient::new(config.recognition_host.clone(), config.request_timeout());
    let mut session = client.open_session(proxy)?;

    if precise {
        let signatures = fingerprint_segments(&fingerprinter, file)
            .context("Failed to generate fingerprint")?;
        info!("🎧 Checking {} segments of {:?}", signatures.len(), file);
        return match recognize_consensus(session.as_mut(), &signatures)? {
            ConsensusOutcome::Confident { response, .. } => Ok(response),
            ConsensusOutcome::Ambiguous { response, .. } => {
                warn!("❔ Segments disagree, no confident match");
                Ok(response)
            }
            ConsensusOutcome::RateLimited { .. } => Err(anyhow!(RATE_LIMITED_ERROR)),
        };
    }

    let signature = fingerprinter
        .fingerprint(file, None)
        .context("Failed to generate fingerprint")?;
    match session.recognize(&signature)? {
        Recognition::Matched(response) => Ok(response),
        Recognition::RateLimited => Err(anyhow!(RATE_LIMITED_ERROR)),
        Recognition::Unrecognized(reason) => {
            warn!("No match for {:?}: {}", file, reason);
            Ok(json!({"matches": []}))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_file_is_an_error() {
        let cmd = RecognizeCommand::new(
            PathBuf::from("/nonexistent/song.mp3"),
            false,
            false,
            false,
            ProxyConfig::default(),
        );
        assert!(cmd.execute().await.is_err());
    }

    #[test]
    fn test_fingerprint_failure_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("song.mp3");
        std::fs::write(&file, "not audio").unwrap();

        let config = Config {
            fingerprint_cmd: "/nonexistent/vibra-fingerprint".to_string(),
            recognition_host: "http://127.0.0.1:9/tag/".to_string(),
            ..Config::default()
        };
        let err = recognize_file(&config, &file, None, false).unwrap_err();
        assert!(err.to_string().contains("Failed to generate fingerprint"));
    }
}

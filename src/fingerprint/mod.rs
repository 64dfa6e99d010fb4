use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;

/// Length of audio the external fingerprinter samples by default
pub const DEFAULT_SAMPLE_MS: u32 = 12_000;

/// Files at least this long also get mid-point and two-thirds verification segments
pub const MULTI_SEGMENT_MIN_DURATION: Duration = Duration::from_secs(36);

/// Compact encoding of one audio segment, used as the query key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub uri: String,
    pub sample_ms: u32,
    pub offset_ms: u32,
}

/// Turns audio files into signatures. Not assumed safe for concurrent use.
pub trait Fingerprinter: Send + Sync {
    /// Fingerprint `path`, starting at `offset` or at a segment the
    /// fingerprinter picks itself when `None`
    fn fingerprint(&self, path: &Path, offset: Option<Duration>) -> Result<Signature>;

    /// Total playing time of `path`
    fn duration(&self, path: &Path) -> Result<Duration>;
}

/// Offsets to fingerprint for consensus recognition.
/// `None` is the fingerprinter's own heuristic pick.
pub fn plan_segments(duration: Option<Duration>) -> Vec<Option<Duration>> {
    let mut plan = vec![None];
    if let Some(duration) = duration {
        if duration >= MULTI_SEGMENT_MIN_DURATION {
            plan.push(Some(duration / 2));
            plan.push(Some(duration * 2 / 3));
        }
    }
    plan
}

/// Fingerprint every planned segment of `path`.
///
/// The first segment is mandatory; verification segments that fail are
/// dropped with a warning.
pub fn fingerprint_segments(fingerprinter: &dyn Fingerprinter, path: &Path) -> Result<Vec<Signature>> {
    let duration = match fingerprinter.duration(path) {
        Ok(d) => Some(d),
        Err(e) => {
            warn!("Could not read duration of {:?}, using one segment: {}", path, e);
            None
        }
    };

    let mut signatures = Vec::new();
    for (index, offset) in plan_segments(duration).into_iter().enumerate() {
        match fingerprinter.fingerprint(path, offset) {
            Ok(signature) => signatures.push(signature),
            Err(e) if index == 0 => return Err(e),
            Err(e) => warn!("Skipping segment at {:?} of {:?}: {}", offset, path, e),
        }
    }
    Ok(signatures)
}

#[derive(Debug, Deserialize)]
struct RawSignature {
    uri: String,
    #[serde(alias = "samplems")]
    sample_ms: Option<u32>,
    offset_ms: Option<u32>,
}

/// Parse the fingerprinter's stdout: either a JSON object with `uri`,
/// `samplems`/`sample_ms` and `offset_ms`, or the bare signature URI.
pub fn parse_signature_output(stdout: &str, offset: Option<Duration>) -> Result<Signature> {
    let requested_offset_ms = offset
        .map(|o| u32::try_from(o.as_millis()).unwrap_or(u32::MAX))
        .unwrap_or(0);
    let text = stdout.trim();

    if text.is_empty() {
        return Err(anyhow!("fingerprinter produced no output"));
    }

    if text.starts_with('{') {
        let raw: RawSignature =
            serde_json::from_str(text).context("fingerprinter output is not valid JSON")?;
        if raw.uri.is_empty() {
            return Err(anyhow!("fingerprinter returned an empty signature"));
        }
        return Ok(Signature {
            uri: raw.uri,
            sample_ms: raw.sample_ms.unwrap_or(DEFAULT_SAMPLE_MS),
            offset_ms: raw.offset_ms.unwrap_or(requested_offset_ms),
        });
    }

    let uri = text.lines().next().unwrap_or_default().trim();
    Ok(Signature {
        uri: uri.to_string(),
        sample_ms: DEFAULT_SAMPLE_MS,
        offset_ms: requested_offset_ms,
    })
}

/// Fingerprinter backed by an external executable, with `ffprobe` for durations
pub struct CommandFingerprinter {
    program: String,
    ffprobe: String,
}

impl CommandFingerprinter {
    pub fn new(config: &Config) -> Self {
        Self {
            program: config.fingerprint_cmd.clone(),
            ffprobe: config.ffprobe_cmd.clone(),
        }
    }
}

impl Fingerprinter for CommandFingerprinter {
    fn fingerprint(&self, path: &Path, offset: Option<Duration>) -> Result<Signature> {
        if !path.exists() {
            return Err(anyhow!("File does not exist: {path:?}"));
        }

        let mut cmd = Command::new(&self.program);
        cmd.arg("--fingerprint").arg("--file").arg(path);
        if let Some(offset) = offset {
            cmd.arg("--offset").arg(offset.as_secs().to_string());
        }
        cmd.stdin(Stdio::null());

        debug!("Executing fingerprinter: {:?}", cmd);
        let output = cmd
            .output()
            .with_context(|| format!("failed to run fingerprinter '{}'", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("fingerprinter failed: {}", stderr.trim()));
        }

        parse_signature_output(&String::from_utf8_lossy(&output.stdout), offset)
    }

    fn duration(&self, path: &Path) -> Result<Duration> {
        if !path.exists() {
            return Err(anyhow!("File does not exist: {path:?}"));
        }

        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("failed to run '{}'", self.ffprobe))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("ffprobe failed: {}", stderr.trim()));
        }

        let duration_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let seconds = duration_str
            .parse::<f64>()
            .map_err(|e| anyhow!("Failed to parse duration '{}': {}", duration_str, e))?;
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(anyhow!("ffprobe reported an invalid duration: {seconds}"));
        }
        Ok(Duration::from_secs_f64(seconds))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[test]
    fn test_plan_short_file_single_segment() {
        assert_eq!(plan_segments(Some(Duration::from_secs(20))), vec![None]);
        assert_eq!(plan_segments(None), vec![None]);
    }

    #[test]
    fn test_plan_long_file_adds_verification_segments() {
        let plan = plan_segments(Some(Duration::from_secs(240)));
        assert_eq!(
            plan,
            vec![
                None,
                Some(Duration::from_secs(120)),
                Some(Duration::from_secs(160))
            ]
        );
    }

    #[test]
    fn test_parse_json_output() {
        let sig = parse_signature_output(
            r#"{"uri":"data:audio/vnd.shazam.sig;base64,AAAA","samplems":11984,"offset_ms":42000}"#,
            None,
        )
        .unwrap();
        assert_eq!(sig.uri, "data:audio/vnd.shazam.sig;base64,AAAA");
        assert_eq!(sig.sample_ms, 11984);
        assert_eq!(sig.offset_ms, 42000);
    }

    #[test]
    fn test_parse_bare_uri_output() {
        let sig =
            parse_signature_output("data:audio/vnd.shazam.sig;base64,BBBB\n", Some(Duration::from_secs(90)))
                .unwrap();
        assert_eq!(sig.uri, "data:audio/vnd.shazam.sig;base64,BBBB");
        assert_eq!(sig.sample_ms, DEFAULT_SAMPLE_MS);
        assert_eq!(sig.offset_ms, 90_000);
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_signature_output("  \n", None).is_err());
        assert!(parse_signature_output(r#"{"uri":""}"#, None).is_err());
    }

    #[test]
    fn test_command_fingerprinter_missing_program() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("song.mp3");
        std::fs::write(&file, "not really audio").unwrap();

        let config = Config {
            fingerprint_cmd: "/nonexistent/vibra-fingerprint".to_string(),
            ffprobe_cmd: "/nonexistent/ffprobe".to_string(),
            ..Config::default()
        };
        let fingerprinter = CommandFingerprinter::new(&config);
        assert!(fingerprinter.fingerprint(&file, None).is_err());
        assert!(fingerprinter.duration(&file).is_err());
        assert!(fingerprinter
            .fingerprint(&PathBuf::from("/nonexistent/song.mp3"), None)
            .is_err());
    }

    struct FlakyFingerprinter {
        duration: Duration,
        calls: Mutex<Vec<Option<Duration>>>,
    }

    impl Fingerprinter for FlakyFingerprinter {
        fn fingerprint(&self, _path: &Path, offset: Option<Duration>) -> Result<Signature> {
            self.calls.lock().unwrap().push(offset);
            match offset {
                Some(o) if o == self.duration / 2 => Err(anyhow!("decoder hiccup")),
                _ => Ok(Signature {
                    uri: "sig".to_string(),
                    sample_ms: DEFAULT_SAMPLE_MS,
                    offset_ms: offset.map(|o| o.as_millis() as u32).unwrap_or(15_000),
                }),
            }
        }

        fn duration(&self, _path: &Path) -> Result<Duration> {
            Ok(self.duration)
        }
    }

    #[test]
    fn test_fingerprint_segments_drops_failed_verification_segment() {
        let fingerprinter = FlakyFingerprinter {
            duration: Duration::from_secs(300),
            calls: Mutex::new(Vec::new()),
        };
        let signatures = fingerprint_segments(&fingerprinter, Path::new("a.mp3")).unwrap();
        assert_eq!(signatures.len(), 2);
        assert_eq!(signatures[0].offset_ms, 15_000);
        assert_eq!(signatures[1].offset_ms, 200_000);
        assert_eq!(fingerprinter.calls.lock().unwrap().len(), 3);
    }
}

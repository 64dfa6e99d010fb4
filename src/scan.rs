use anyhow::{anyhow, Context, Result};
use glob::Pattern;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Audio extensions picked up by a scan, compared case-insensitively
pub const SUPPORTED_EXTENSIONS: &[&str] = &["mp3", "wav", "flac", "ogg", "m4a", "aac"];

pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

/// Recursive audio file discovery under one root
pub struct AudioScanner {
    root: PathBuf,
    excludes: Vec<Pattern>,
}

impl AudioScanner {
    /// `excludes` are glob patterns matched against paths relative to `root`
    pub fn new(root: impl AsRef<Path>, excludes: &[String]) -> Result<Self> {
        let root = root.as_ref();
        if !root.exists() {
            return Err(anyhow!("Directory does not exist: {:?}", root));
        }
        if !root.is_dir() {
            return Err(anyhow!("Path is not a directory: {:?}", root));
        }
        let root = root
            .canonicalize()
            .with_context(|| format!("Failed to resolve {root:?}"))?;

        let excludes = excludes
            .iter()
            .map(|p| Pattern::new(p).map_err(|e| anyhow!("Invalid exclude pattern '{}': {}", p, e)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { root, excludes })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn is_excluded(&self, path: &Path) -> bool {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return false;
        };
        if relative.as_os_str().is_empty() {
            return false;
        }
        self.excludes.iter().any(|p| p.matches_path(relative))
    }

    /// Sorted, deduplicated absolute paths of every supported file
    pub fn scan(&self) -> Vec<PathBuf> {
        info!("🔎 Scanning directory: {:?}", self.root);

        let mut files: Vec<PathBuf> = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| {
                let excluded = self.is_excluded(entry.path());
                if excluded {
                    debug!("Excluded: {:?}", entry.path());
                }
                !excluded
            })
            .filter_map(|e| e.ok())
            .filter(|entry| entry.file_type().is_file() && is_supported(entry.path()))
            .map(|entry| entry.into_path())
            .collect();

        files.sort();
        files.dedup();
        info!("Found {} audio files", files.len());
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, relative: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_scan_finds_supported_files_recursively() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "b.mp3");
        touch(temp_dir.path(), "a/Track.FLAC");
        touch(temp_dir.path(), "a/cover.jpg");
        touch(temp_dir.path(), "notes.txt");
        touch(temp_dir.path(), "c/d/e.m4a");

        let scanner = AudioScanner::new(temp_dir.path(), &[]).unwrap();
        let files = scanner.scan();
        let relative: Vec<_> = files
            .iter()
            .map(|f| f.strip_prefix(scanner.root()).unwrap().to_path_buf())
            .collect();

        assert_eq!(
            relative,
            vec![
                PathBuf::from("a/Track.FLAC"),
                PathBuf::from("b.mp3"),
                PathBuf::from("c/d/e.m4a"),
            ]
        );
        assert!(files.iter().all(|f| f.is_absolute()));
    }

    #[test]
    fn test_scan_applies_excludes() {
        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "keep.mp3");
        touch(temp_dir.path(), "drop.wav");
        touch(temp_dir.path(), "samples/kick.mp3");

        let excludes = vec!["*.wav".to_string(), "samples".to_string()];
        let scanner = AudioScanner::new(temp_dir.path(), &excludes).unwrap();
        let files = scanner.scan();

        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("keep.mp3"));
    }

    #[test]
    fn test_scan_rejects_bad_input() {
        assert!(AudioScanner::new("/nonexistent/path", &[]).is_err());

        let temp_dir = TempDir::new().unwrap();
        touch(temp_dir.path(), "file.mp3");
        assert!(AudioScanner::new(temp_dir.path().join("file.mp3"), &[]).is_err());
        assert!(AudioScanner::new(temp_dir.path(), &["[".to_string()]).is_err());
    }

    #[test]
    fn test_is_supported() {
        assert!(is_supported(Path::new("x.OGG")));
        assert!(is_supported(Path::new("x.aac")));
        assert!(!is_supported(Path::new("x.webm")));
        assert!(!is_supported(Path::new("mp3")));
    }
}

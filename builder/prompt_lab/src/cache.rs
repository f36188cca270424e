//! Rendered-output caching keyed by input content.
//!
//! Results are stored at `results/{template}/{input_hash}/{input_id}.md`, so
//! editing a fixture invalidates only its own entry.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Compute a short hash of content for cache keys.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8]) // First 8 bytes = 16 hex chars
}

/// Cache of rendered prompt previews.
pub struct RenderCache {
    results_dir: PathBuf,
}

impl RenderCache {
    pub fn new(lab_root: &Path) -> Self {
        Self {
            results_dir: lab_root.join("results"),
        }
    }

    pub fn cache_path(&self, template: &str, input_hash: &str, input_id: &str) -> PathBuf {
        self.results_dir
            .join(template)
            .join(input_hash)
            .join(format!("{input_id}.md"))
    }

    pub fn has_cached(&self, template: &str, input_hash: &str, input_id: &str) -> bool {
        self.cache_path(template, input_hash, input_id).exists()
    }

    pub fn save(
        &self,
        template: &str,
        input_hash: &str,
        input_id: &str,
        rendered: &str,
    ) -> Result<PathBuf> {
        let path = self.cache_path(template, input_hash, input_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create cache dir {}", parent.display()))?;
        }
        debug!(path = %path.display(), "saving rendered preview");
        fs::write(&path, rendered).with_context(|| format!("write cache {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::{RenderCache, content_hash};

    #[test]
    fn content_hash_is_deterministic_and_short() {
        assert_eq!(content_hash("hello"), content_hash("hello"));
        assert_ne!(content_hash("hello"), content_hash("world"));
        assert_eq!(content_hash("hello").len(), 16);
    }

    #[test]
    fn cache_round_trip() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cache = RenderCache::new(temp.path());
        assert!(!cache.has_cached("feedback", "abc", "basic"));

        let path = cache
            .save("feedback", "abc", "basic", "rendered text")
            .expect("save");
        assert!(path.ends_with("results/feedback/abc/basic.md"));
        assert!(cache.has_cached("feedback", "abc", "basic"));
    }
}

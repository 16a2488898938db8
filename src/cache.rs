use std::path::{Path, PathBuf};

use anyhow::Context;
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Bumped whenever the serialized cache layout changes; older files are
/// treated as misses and rebuilt.
pub const CACHE_SCHEMA_VERSION: u32 = 2;

/// Deterministic key for one dataset configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub dataset: String,
    pub filter: Option<String>,
    pub schema: u32,
}

impl Fingerprint {
    pub fn new(dataset: impl Into<String>, filter: Option<String>) -> Self {
        Self {
            dataset: dataset.into(),
            filter,
            schema: CACHE_SCHEMA_VERSION,
        }
    }

    pub fn file_name(&self) -> String {
        match &self.filter {
            Some(f) => format!("embeddings_{}_{}_v{}.bin", self.dataset, f, self.schema),
            None => format!("embeddings_{}_v{}.bin", self.dataset, self.schema),
        }
    }
}

/// Parallel (embedding, score) sequences. The two stay aligned: any filtering
/// of one must filter the other identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub dim: usize,
    pub embeddings: Vec<Vec<f32>>,
    pub scores: Vec<f32>,
}

impl CacheEntry {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            embeddings: Vec::new(),
            scores: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }

    /// Append one pair, keeping the sequences aligned.
    pub fn push(&mut self, embedding: Vec<f32>, score: f32) {
        debug_assert_eq!(embedding.len(), self.dim);
        self.embeddings.push(embedding);
        self.scores.push(score);
    }
}

/// One sample dropped during a build, with enough context to diagnose.
#[derive(Debug, Clone)]
pub struct ItemFailure {
    pub identifier: String,
    pub reason: String,
}

/// Outcome of an embedding build: the successes and the dropped items.
#[derive(Debug)]
pub struct BuildReport {
    pub entry: CacheEntry,
    pub failures: Vec<ItemFailure>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    schema: u32,
    entry: CacheEntry,
}

/// On-disk cache of (embedding, score) batches keyed by dataset fingerprint.
///
/// Writes go through a temp file and rename, so a cache file is either absent
/// or complete. Nothing guards concurrent builders on the same fingerprint;
/// the pipeline is a single process per run.
pub struct EmbeddingCache {
    dir: PathBuf,
    regenerate: bool,
}

impl EmbeddingCache {
    pub fn new(dir: impl Into<PathBuf>, regenerate: bool) -> Self {
        Self {
            dir: dir.into(),
            regenerate,
        }
    }

    pub fn entry_path(&self, fingerprint: &Fingerprint) -> PathBuf {
        self.dir.join(fingerprint.file_name())
    }

    /// Return the cached entry for `fingerprint`, or run `builder`, persist
    /// its successes, and return them. Builder failures are logged per item
    /// and dropped; they never fail the build.
    pub fn get_or_build<F>(&self, fingerprint: &Fingerprint, builder: F) -> Result<CacheEntry>
    where
        F: FnOnce() -> Result<BuildReport>,
    {
        if !self.regenerate {
            if let Some(entry) = self.load(fingerprint)? {
                info!(
                    "loaded {} embeddings from cache {}",
                    entry.len(),
                    fingerprint.file_name()
                );
                return Ok(entry);
            }
        }

        info!("building embeddings for {}", fingerprint.file_name());
        let report = builder()?;
        for failure in &report.failures {
            warn!("dropped {}: {}", failure.identifier, failure.reason);
        }
        info!(
            "embedded {} samples, dropped {}",
            report.entry.len(),
            report.failures.len()
        );

        self.store(fingerprint, &report.entry)?;
        Ok(report.entry)
    }

    fn load(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(fingerprint);
        if !path.exists() {
            return Ok(None);
        }
        let data =
            std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        let stored: StoredEntry = postcard::from_bytes(&data)
            .with_context(|| format!("decoding {}", path.display()))?;
        if stored.schema != fingerprint.schema {
            warn!(
                "cache {} has schema {}, want {}; rebuilding",
                path.display(),
                stored.schema,
                fingerprint.schema
            );
            return Ok(None);
        }
        Ok(Some(stored.entry))
    }

    fn store(&self, fingerprint: &Fingerprint, entry: &CacheEntry) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;
        let stored = StoredEntry {
            schema: fingerprint.schema,
            entry: entry.clone(),
        };
        let data = postcard::to_allocvec(&stored).context("encoding cache entry")?;

        // Temp file + rename keeps the entry all-or-nothing on disk.
        let tmp = self.dir.join(format!(".tmp-{}", uuid::Uuid::new_v4()));
        std::fs::write(&tmp, &data).with_context(|| format!("writing {}", tmp.display()))?;
        let path = self.entry_path(fingerprint);
        std::fs::rename(&tmp, &path)
            .with_context(|| format!("renaming into {}", path.display()))?;
        info!("cache saved to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn temp_cache() -> EmbeddingCache {
        let dir = std::env::temp_dir().join(format!("facerank-cache-{}", uuid::Uuid::new_v4()));
        EmbeddingCache::new(dir, false)
    }

    fn sample_report() -> BuildReport {
        let mut entry = CacheEntry::new(3);
        entry.push(vec![0.1, 0.2, 0.3], 3.5);
        entry.push(vec![0.4, 0.5, 0.6], 2.0);
        BuildReport {
            entry,
            failures: vec![ItemFailure {
                identifier: "bad.jpg".into(),
                reason: "no face detected in bad.jpg".into(),
            }],
        }
    }

    #[test]
    fn get_or_build_is_idempotent() {
        let cache = temp_cache();
        let fp = Fingerprint::new("combined", Some("male".into()));

        let calls = Cell::new(0u32);
        let first = cache
            .get_or_build(&fp, || {
                calls.set(calls.get() + 1);
                Ok(sample_report())
            })
            .unwrap();
        let second = cache
            .get_or_build(&fp, || {
                calls.set(calls.get() + 1);
                Ok(sample_report())
            })
            .unwrap();

        assert_eq!(calls.get(), 1, "builder must not run on a cache hit");
        assert_eq!(first, second);
        assert_eq!(first.embeddings.len(), first.scores.len());
        std::fs::remove_dir_all(&cache.dir).ok();
    }

    #[test]
    fn regenerate_forces_rebuild() {
        let dir = std::env::temp_dir().join(format!("facerank-cache-{}", uuid::Uuid::new_v4()));
        let fp = Fingerprint::new("combined", None);

        let cache = EmbeddingCache::new(&dir, false);
        cache.get_or_build(&fp, || Ok(sample_report())).unwrap();

        let calls = Cell::new(0u32);
        let cache = EmbeddingCache::new(&dir, true);
        cache
            .get_or_build(&fp, || {
                calls.set(calls.get() + 1);
                Ok(sample_report())
            })
            .unwrap();
        assert_eq!(calls.get(), 1);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn schema_mismatch_is_a_miss() {
        let cache = temp_cache();
        let fp = Fingerprint::new("combined", None);
        cache.get_or_build(&fp, || Ok(sample_report())).unwrap();

        // Same file name would only collide within one schema version; an
        // older blob under the current name must still be rejected.
        let path = cache.entry_path(&fp);
        let stale = StoredEntry {
            schema: fp.schema - 1,
            entry: CacheEntry::new(3),
        };
        std::fs::write(&path, postcard::to_allocvec(&stale).unwrap()).unwrap();

        let calls = Cell::new(0u32);
        let rebuilt = cache
            .get_or_build(&fp, || {
                calls.set(calls.get() + 1);
                Ok(sample_report())
            })
            .unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(rebuilt.len(), 2);
        std::fs::remove_dir_all(&cache.dir).ok();
    }

    #[test]
    fn fingerprint_names_separate_filters_and_schemas() {
        let a = Fingerprint::new("combined", None);
        let b = Fingerprint::new("combined", Some("male".into()));
        assert_ne!(a.file_name(), b.file_name());
        assert!(a.file_name().contains(&format!("v{CACHE_SCHEMA_VERSION}")));
    }

    #[test]
    fn entry_sequences_stay_aligned() {
        let report = sample_report();
        assert_eq!(report.entry.embeddings.len(), report.entry.scores.len());
    }
}

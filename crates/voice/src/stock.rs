//! Pre-generated rejection audio stock.
//!
//! A manifest file beside the audio holds the entry list; it is rewritten on
//! every mutation and re-scanned at startup, pruning entries whose audio
//! file disappeared. Popping an entry removes it from the manifest but
//! leaves the audio on disk so the already-returned URL keeps working.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockEntry {
    pub id: String,
    pub text: String,
    pub audio_file: String,
    pub created_at: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    entries: Vec<StockEntry>,
}

/// RAII guard marking one in-flight external request; while any guard is
/// alive the idle generator considers the service busy.
pub struct ActivityGuard {
    counter: Arc<AtomicUsize>,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct RejectionStock {
    dir: PathBuf,
    entries: Mutex<Vec<StockEntry>>,
    max_stock: usize,
    refill_threshold: usize,
    active_requests: Arc<AtomicUsize>,
}

impl RejectionStock {
    /// Open (and create) the stock directory, loading and pruning the
    /// manifest.
    pub fn open(dir: impl Into<PathBuf>, max_stock: usize, refill_threshold: usize) -> Self {
        let dir = dir.into();
        if let Err(err) = std::fs::create_dir_all(&dir) {
            warn!(dir = %dir.display(), %err, "failed to create rejection stock dir");
        }

        let manifest_path = dir.join(MANIFEST_FILE);
        let mut entries = Vec::new();
        if manifest_path.exists() {
            match std::fs::read_to_string(&manifest_path)
                .map_err(anyhow::Error::from)
                .and_then(|raw| Ok(serde_json::from_str::<Manifest>(&raw)?))
            {
                Ok(manifest) => {
                    let before = manifest.entries.len();
                    entries = manifest
                        .entries
                        .into_iter()
                        .filter(|e| dir.join(&e.audio_file).exists())
                        .collect::<Vec<_>>();
                    if entries.len() != before {
                        info!(
                            pruned = before - entries.len(),
                            "pruned rejection entries with missing audio"
                        );
                    }
                }
                Err(err) => warn!(%err, "failed to load rejection manifest"),
            }
        }

        let stock = Self {
            dir,
            entries: Mutex::new(entries),
            max_stock,
            refill_threshold,
            active_requests: Arc::new(AtomicUsize::new(0)),
        };
        // Persist the pruned view immediately.
        if let Ok(guard) = stock.entries.try_lock() {
            let _ = Self::write_manifest(&stock.dir, &guard);
        }
        info!(count = stock.count_blocking(), "rejection stock loaded");
        stock
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn count_blocking(&self) -> usize {
        self.entries.try_lock().map(|e| e.len()).unwrap_or(0)
    }

    pub async fn count(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn needs_refill(&self) -> bool {
        self.count().await < self.refill_threshold
    }

    pub async fn is_full(&self) -> bool {
        self.count().await >= self.max_stock
    }

    /// True when no external request currently holds an [`ActivityGuard`].
    pub fn is_idle(&self) -> bool {
        self.active_requests.load(Ordering::SeqCst) == 0
    }

    /// Mark the start of an external request; busy until the guard drops.
    pub fn begin_request(&self) -> ActivityGuard {
        self.active_requests.fetch_add(1, Ordering::SeqCst);
        ActivityGuard {
            counter: self.active_requests.clone(),
        }
    }

    /// Pop a random entry. The manifest is rewritten before the entry is
    /// handed out; on write failure the entry is restored and `None`
    /// returned so no audio URL is lost.
    pub async fn pop_random(&self) -> Option<StockEntry> {
        let mut entries = self.entries.lock().await;
        if entries.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..entries.len());
        let entry = entries.remove(index);
        if let Err(err) = Self::write_manifest(&self.dir, &entries) {
            entries.insert(index, entry);
            warn!(%err, "manifest save failed after pop; entry restored");
            return None;
        }
        info!(text = %entry.text, remaining = entries.len(), "served rejection audio");
        Some(entry)
    }

    /// Append a freshly generated entry, evicting the oldest (and its audio
    /// file) if the stock is somehow over capacity. On manifest-write
    /// failure the entry and its audio file are rolled back.
    pub async fn add_entry(&self, entry: StockEntry) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().await;
        while entries.len() >= self.max_stock {
            let oldest = entries.remove(0);
            let path = self.dir.join(&oldest.audio_file);
            if path.exists() {
                let _ = std::fs::remove_file(&path);
            }
        }
        entries.push(entry);
        if let Err(err) = Self::write_manifest(&self.dir, &entries) {
            let entry = entries.pop();
            if let Some(entry) = entry {
                let path = self.dir.join(&entry.audio_file);
                if path.exists() {
                    let _ = std::fs::remove_file(&path);
                }
            }
            anyhow::bail!("manifest save failed, entry rolled back: {err}");
        }
        Ok(())
    }

    /// Remove every entry and its audio file.
    pub async fn clear(&self) -> anyhow::Result<()> {
        let mut entries = self.entries.lock().await;
        for entry in entries.iter() {
            let path = self.dir.join(&entry.audio_file);
            if path.exists() {
                let _ = std::fs::remove_file(&path);
            }
        }
        entries.clear();
        Self::write_manifest(&self.dir, &entries)?;
        info!("rejection stock cleared");
        Ok(())
    }

    fn write_manifest(dir: &Path, entries: &[StockEntry]) -> anyhow::Result<()> {
        let manifest = Manifest {
            entries: entries.to_vec(),
        };
        let rendered = serde_json::to_string_pretty(&manifest)?;
        std::fs::write(dir.join(MANIFEST_FILE), rendered)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> StockEntry {
        StockEntry {
            id: id.to_string(),
            text: format!("line {id}"),
            audio_file: format!("rejection_{id}.mp3"),
            created_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    fn write_audio(dir: &Path, entry: &StockEntry) {
        std::fs::write(dir.join(&entry.audio_file), b"mp3").unwrap();
    }

    #[tokio::test]
    async fn add_and_pop_round_trip_through_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let stock = RejectionStock::open(dir.path(), 100, 80);

        let e = entry("a1");
        write_audio(dir.path(), &e);
        stock.add_entry(e.clone()).await.unwrap();
        assert_eq!(stock.count().await, 1);

        // Reopen: manifest persisted the entry.
        let stock = RejectionStock::open(dir.path(), 100, 80);
        assert_eq!(stock.count().await, 1);

        let popped = stock.pop_random().await.unwrap();
        assert_eq!(popped.id, "a1");
        assert_eq!(stock.count().await, 0);
        // Audio stays on disk so the served URL remains valid.
        assert!(dir.path().join(&popped.audio_file).exists());
    }

    #[tokio::test]
    async fn startup_prunes_entries_with_missing_audio() {
        let dir = tempfile::tempdir().unwrap();
        let stock = RejectionStock::open(dir.path(), 100, 80);
        let keep = entry("keep");
        let lost = entry("lost");
        write_audio(dir.path(), &keep);
        write_audio(dir.path(), &lost);
        stock.add_entry(keep).await.unwrap();
        stock.add_entry(lost.clone()).await.unwrap();
        drop(stock);

        std::fs::remove_file(dir.path().join(&lost.audio_file)).unwrap();
        let stock = RejectionStock::open(dir.path(), 100, 80);
        assert_eq!(stock.count().await, 1);
        let remaining = stock.pop_random().await.unwrap();
        assert_eq!(remaining.id, "keep");
    }

    #[tokio::test]
    async fn pop_never_serves_the_same_entry_twice() {
        let dir = tempfile::tempdir().unwrap();
        let stock = RejectionStock::open(dir.path(), 100, 80);
        for i in 0..5 {
            let e = entry(&format!("e{i}"));
            write_audio(dir.path(), &e);
            stock.add_entry(e).await.unwrap();
        }

        let mut seen = std::collections::HashSet::new();
        while let Some(popped) = stock.pop_random().await {
            assert!(seen.insert(popped.id.clone()), "duplicate {}", popped.id);
        }
        assert_eq!(seen.len(), 5);
    }

    #[tokio::test]
    async fn over_capacity_add_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let stock = RejectionStock::open(dir.path(), 2, 2);
        for i in 0..3 {
            let e = entry(&format!("e{i}"));
            write_audio(dir.path(), &e);
            stock.add_entry(e).await.unwrap();
        }
        assert_eq!(stock.count().await, 2);
        // Oldest audio file was deleted along with its entry.
        assert!(!dir.path().join("rejection_e0.mp3").exists());
        assert!(dir.path().join("rejection_e2.mp3").exists());
    }

    #[tokio::test]
    async fn refill_flags_follow_thresholds() {
        let dir = tempfile::tempdir().unwrap();
        let stock = RejectionStock::open(dir.path(), 3, 2);
        assert!(stock.needs_refill().await);
        assert!(!stock.is_full().await);

        for i in 0..3 {
            let e = entry(&format!("e{i}"));
            write_audio(dir.path(), &e);
            stock.add_entry(e).await.unwrap();
        }
        assert!(!stock.needs_refill().await);
        assert!(stock.is_full().await);
    }

    #[tokio::test]
    async fn activity_guard_toggles_idle() {
        let dir = tempfile::tempdir().unwrap();
        let stock = RejectionStock::open(dir.path(), 10, 8);
        assert!(stock.is_idle());
        let guard = stock.begin_request();
        assert!(!stock.is_idle());
        let second = stock.begin_request();
        drop(guard);
        assert!(!stock.is_idle());
        drop(second);
        assert!(stock.is_idle());
    }

    #[tokio::test]
    async fn clear_removes_entries_and_audio() {
        let dir = tempfile::tempdir().unwrap();
        let stock = RejectionStock::open(dir.path(), 10, 8);
        let e = entry("gone");
        write_audio(dir.path(), &e);
        stock.add_entry(e.clone()).await.unwrap();

        stock.clear().await.unwrap();
        assert_eq!(stock.count().await, 0);
        assert!(!dir.path().join(&e.audio_file).exists());
    }
}

//! Model generation staging, promotion, and consumer cache sync.
//!
//! A training run first stages its complete artifact set as a new
//! generation under its own prefix; nothing serves from there. The
//! manifest is written last, so a generation without one is by
//! definition incomplete. Promotion is then a single pointer write:
//! the champion or challenger slot names the generation it serves.
//! Readers that cached a generation compare whole-prefix fingerprints
//! and only re-download when anything changed.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{fingerprint, with_retry, ObjectStore, StoreError};
use crate::error::{Error, Result};

const GENERATION_PREFIX: &str = "prediction_model_data/generations";
const SLOT_PREFIX: &str = "prediction_model_data/slots";
const TRAINING_DATA_PREFIX: &str = "artifacts/training_data";
const RETRAINING_PREFIX: &str = "artifacts/retraining_data";
const MANIFEST_NAME: &str = "manifest.json";
const CACHE_FINGERPRINT: &str = ".fingerprint.json";
const RETRY_ATTEMPTS: u32 = 4;

/// The two serving slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Slot {
    Champion,
    Challenger,
}

impl Slot {
    pub fn name(self) -> &'static str {
        match self {
            Slot::Champion => "champion",
            Slot::Challenger => "challenger",
        }
    }

    fn pointer_key(self) -> String {
        format!("{SLOT_PREFIX}/{}.json", self.name())
    }
}

/// What one slot currently serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotPointer {
    pub run_id: String,
    pub promoted_at: DateTime<Utc>,
}

/// Written last when staging; its presence marks the generation
/// complete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationManifest {
    pub run_id: String,
    pub clusters: usize,
    /// Winning test AUC per cluster, indexed by cluster id.
    pub winning_auc: Vec<f64>,
    /// Relative names of every staged object, manifest excluded.
    pub objects: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Result of a consumer cache sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Fingerprints matched; nothing was downloaded.
    Unchanged,
    /// The cache was wiped and fully re-downloaded.
    Refreshed { objects: usize },
}

pub struct ModelRegistry<'a> {
    store: &'a dyn ObjectStore,
}

impl<'a> ModelRegistry<'a> {
    pub fn new(store: &'a dyn ObjectStore) -> Self {
        Self { store }
    }

    fn generation_prefix(run_id: &str) -> String {
        format!("{GENERATION_PREFIX}/{run_id}/")
    }

    /// Stage a complete generation. Artifact objects land first; the
    /// manifest goes last so a crash mid-stage never yields a
    /// generation that looks complete.
    pub fn stage(
        &self,
        run_id: &str,
        winning_auc: &[f64],
        objects: Vec<(String, Vec<u8>)>,
    ) -> Result<GenerationManifest> {
        let prefix = Self::generation_prefix(run_id);
        let names: Vec<String> = objects.iter().map(|(name, _)| name.clone()).collect();
        for (name, bytes) in objects {
            let key = format!("{prefix}{name}");
            with_retry(&key, RETRY_ATTEMPTS, || {
                self.store.put(&key, bytes.clone())
            })?;
        }
        let manifest = GenerationManifest {
            run_id: run_id.to_string(),
            clusters: winning_auc.len(),
            winning_auc: winning_auc.to_vec(),
            objects: names,
            created_at: Utc::now(),
        };
        let key = format!("{prefix}{MANIFEST_NAME}");
        let bytes = serde_json::to_vec_pretty(&manifest)?;
        with_retry(&key, RETRY_ATTEMPTS, || {
            self.store.put(&key, bytes.clone())
        })?;
        info!(run_id, objects = manifest.objects.len(), "generation staged");
        Ok(manifest)
    }

    pub fn load_manifest(&self, run_id: &str) -> Result<GenerationManifest> {
        let key = format!("{}{MANIFEST_NAME}", Self::generation_prefix(run_id));
        let bytes = self.store.get(&key).map_err(|e| match e {
            StoreError::NotFound(_) => Error::PromotionInconsistency {
                slot: run_id.to_string(),
                reason: "generation has no manifest".into(),
            },
            other => other.into(),
        })?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Promote the staged generation of `run_id` into a slot.
    ///
    /// The first promotion ever becomes the champion unconditionally.
    /// After that, a run becomes champion only when every one of its
    /// clusters cleared `auc_threshold`; otherwise it is parked as the
    /// challenger for review. Either way the flip is one pointer write.
    pub fn promote(&self, run_id: &str, auc_threshold: f64) -> Result<Slot> {
        let manifest = self.load_manifest(run_id)?;
        // Refuse to point a slot at a hole.
        let prefix = Self::generation_prefix(run_id);
        for name in &manifest.objects {
            let key = format!("{prefix}{name}");
            if !self.store.exists(&key)? {
                return Err(Error::PromotionInconsistency {
                    slot: run_id.to_string(),
                    reason: format!("staged object {name} is missing"),
                });
            }
        }

        let champion_exists = self.current(Slot::Champion)?.is_some();
        let all_clear = !manifest.winning_auc.is_empty()
            && manifest.winning_auc.iter().all(|&auc| auc >= auc_threshold);
        let slot = if !champion_exists || all_clear {
            Slot::Champion
        } else {
            Slot::Challenger
        };

        let pointer = SlotPointer {
            run_id: run_id.to_string(),
            promoted_at: Utc::now(),
        };
        let key = slot.pointer_key();
        let bytes = serde_json::to_vec_pretty(&pointer)?;
        with_retry(&key, RETRY_ATTEMPTS, || {
            self.store.put(&key, bytes.clone())
        })?;
        info!(run_id, slot = slot.name(), all_clear, "generation promoted");
        Ok(slot)
    }

    /// Current pointer of a slot, `None` before any promotion.
    pub fn current(&self, slot: Slot) -> Result<Option<SlotPointer>> {
        match self.store.get(&slot.pointer_key()) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Bring `cache_dir` up to date with what `slot` serves.
    ///
    /// The whole-generation fingerprint is compared against the one
    /// recorded at the last sync. On any difference the cache is wiped
    /// and re-downloaded in full; on a match nothing is transferred.
    pub fn sync_cache(&self, slot: Slot, cache_dir: &Path) -> Result<SyncOutcome> {
        let pointer = self.current(slot)?.ok_or_else(|| {
            Error::PromotionInconsistency {
                slot: slot.name().to_string(),
                reason: "slot has never been promoted".into(),
            }
        })?;
        let prefix = Self::generation_prefix(&pointer.run_id);
        let remote = fingerprint(self.store, &prefix).map_err(Error::from)?;
        if remote.is_empty() {
            return Err(Error::PromotionInconsistency {
                slot: slot.name().to_string(),
                reason: format!("pointer names empty generation {}", pointer.run_id),
            });
        }

        let local: Option<BTreeMap<String, String>> = fs::read_to_string(
            cache_dir.join(CACHE_FINGERPRINT),
        )
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok());
        if local.as_ref() == Some(&remote) {
            debug!(slot = slot.name(), "cache fingerprint matches, no download");
            return Ok(SyncOutcome::Unchanged);
        }

        if cache_dir.exists() {
            warn!(slot = slot.name(), "cache stale, replacing in full");
            fs::remove_dir_all(cache_dir)?;
        }
        fs::create_dir_all(cache_dir)?;
        let mut count = 0usize;
        for key in remote.keys() {
            let rel = key.strip_prefix(&prefix).unwrap_or(key);
            let bytes = with_retry(key, RETRY_ATTEMPTS, || self.store.get(key))?;
            let target = cache_dir.join(rel);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(target, bytes)?;
            count += 1;
        }
        fs::write(
            cache_dir.join(CACHE_FINGERPRINT),
            serde_json::to_vec_pretty(&remote)?,
        )?;
        info!(slot = slot.name(), objects = count, "cache refreshed");
        Ok(SyncOutcome::Refreshed { objects: count })
    }

    /// Archive the merged training batch a run was fitted on.
    pub fn upload_training_data(&self, run_id: &str, csv: Vec<u8>) -> Result<()> {
        let key = format!("{TRAINING_DATA_PREFIX}/{run_id}.csv");
        with_retry(&key, RETRY_ATTEMPTS, || {
            self.store.put(&key, csv.clone())
        })?;
        Ok(())
    }

    /// Archive served predictions joined with their raw inputs, the
    /// seed of a future retraining batch.
    pub fn upload_retraining_reference(&self, run_id: &str, csv: Vec<u8>) -> Result<()> {
        let key = format!("{RETRAINING_PREFIX}/{run_id}.csv");
        with_retry(&key, RETRY_ATTEMPTS, || {
            self.store.put(&key, csv.clone())
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use tempfile::tempdir;

    fn staged(store: &InMemoryStore, run_id: &str, aucs: &[f64]) {
        let registry = ModelRegistry::new(store);
        let objects = (0..aucs.len())
            .map(|c| (format!("cluster_{c}/model_bundle.json"), b"{}".to_vec()))
            .collect();
        registry.stage(run_id, aucs, objects).unwrap();
    }

    #[test]
    fn first_promotion_is_champion_regardless_of_score() {
        let store = InMemoryStore::new();
        staged(&store, "run-1", &[0.50, 0.40]);
        let registry = ModelRegistry::new(&store);
        assert_eq!(registry.promote("run-1", 0.95).unwrap(), Slot::Champion);
        assert_eq!(
            registry.current(Slot::Champion).unwrap().unwrap().run_id,
            "run-1"
        );
    }

    #[test]
    fn weak_cluster_parks_the_run_as_challenger() {
        let store = InMemoryStore::new();
        staged(&store, "run-1", &[0.99, 0.99]);
        staged(&store, "run-2", &[0.99, 0.80]);
        let registry = ModelRegistry::new(&store);
        registry.promote("run-1", 0.95).unwrap();
        assert_eq!(registry.promote("run-2", 0.95).unwrap(), Slot::Challenger);
        // The champion still serves the earlier run.
        assert_eq!(
            registry.current(Slot::Champion).unwrap().unwrap().run_id,
            "run-1"
        );
    }

    #[test]
    fn every_cluster_clearing_the_bar_takes_the_champion_slot() {
        let store = InMemoryStore::new();
        staged(&store, "run-1", &[0.96]);
        staged(&store, "run-2", &[0.99, 0.97, 0.96]);
        let registry = ModelRegistry::new(&store);
        registry.promote("run-1", 0.95).unwrap();
        assert_eq!(registry.promote("run-2", 0.95).unwrap(), Slot::Champion);
        assert_eq!(
            registry.current(Slot::Champion).unwrap().unwrap().run_id,
            "run-2"
        );
    }

    #[test]
    fn missing_manifest_blocks_promotion() {
        let store = InMemoryStore::new();
        store
            .put(
                "prediction_model_data/generations/run-x/cluster_0/model_bundle.json",
                b"{}".to_vec(),
            )
            .unwrap();
        let registry = ModelRegistry::new(&store);
        assert!(matches!(
            registry.promote("run-x", 0.95),
            Err(Error::PromotionInconsistency { .. })
        ));
    }

    #[test]
    fn missing_staged_object_blocks_promotion() {
        let store = InMemoryStore::new();
        staged(&store, "run-1", &[0.99]);
        store
            .delete("prediction_model_data/generations/run-1/cluster_0/model_bundle.json")
            .unwrap();
        let registry = ModelRegistry::new(&store);
        assert!(matches!(
            registry.promote("run-1", 0.95),
            Err(Error::PromotionInconsistency { .. })
        ));
    }

    #[test]
    fn unchanged_generation_syncs_without_downloads() {
        let store = InMemoryStore::new();
        staged(&store, "run-1", &[0.99]);
        let registry = ModelRegistry::new(&store);
        registry.promote("run-1", 0.95).unwrap();

        let cache = tempdir().unwrap();
        let first = registry.sync_cache(Slot::Champion, cache.path()).unwrap();
        assert!(matches!(first, SyncOutcome::Refreshed { .. }));
        let second = registry.sync_cache(Slot::Champion, cache.path()).unwrap();
        assert_eq!(second, SyncOutcome::Unchanged);
    }

    #[test]
    fn changed_generation_replaces_the_cache_in_full() {
        let store = InMemoryStore::new();
        staged(&store, "run-1", &[0.99]);
        let registry = ModelRegistry::new(&store);
        registry.promote("run-1", 0.95).unwrap();

        let cache = tempdir().unwrap();
        registry.sync_cache(Slot::Champion, cache.path()).unwrap();

        // A new champion generation lands.
        staged(&store, "run-2", &[0.99, 0.98]);
        registry.promote("run-2", 0.95).unwrap();
        let outcome = registry.sync_cache(Slot::Champion, cache.path()).unwrap();
        assert!(matches!(outcome, SyncOutcome::Refreshed { objects } if objects >= 2));
        // Old generation's file is gone from the cache.
        assert!(cache.path().join("cluster_1/model_bundle.json").exists());
    }

    #[test]
    fn sync_before_any_promotion_is_an_error() {
        let store = InMemoryStore::new();
        let registry = ModelRegistry::new(&store);
        let cache = tempdir().unwrap();
        assert!(registry.sync_cache(Slot::Champion, cache.path()).is_err());
    }
}

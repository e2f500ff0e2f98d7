//! Confidence Calibrator (§3, §4.8)
//!
//! Five fixed buckets over `[0,0.2)...[0.8,1.0]` tracking prediction/correct
//! counts. Singleton per process, persisted through the KV façade so it
//! survives restarts (§9: the one non-ephemeral cache besides the LLM cache).

use std::sync::Arc;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::kv::KVStore;

const TABLE: &str = "agent_calibration";
const RECORD_ID: &str = "singleton";
const BUCKET_COUNT: usize = 5;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Bucket {
    pub prediction_count: u64,
    pub correct_count: u64,
}

impl Bucket {
    pub fn actual_accuracy(&self) -> f64 {
        if self.prediction_count == 0 {
            0.0
        } else {
            self.correct_count as f64 / self.prediction_count as f64
        }
    }

    fn midpoint(index: usize) -> f64 {
        (index as f64 + 0.5) / BUCKET_COUNT as f64
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct CalibratorState {
    buckets: [Bucket; BUCKET_COUNT],
}

pub struct ConfidenceCalibrator {
    store: Arc<dyn KVStore>,
    state: RwLock<CalibratorState>,
}

fn bucket_index(confidence: f64) -> usize {
    ((confidence * BUCKET_COUNT as f64).floor() as i64).clamp(0, BUCKET_COUNT as i64 - 1) as usize
}

impl ConfidenceCalibrator {
    pub async fn load(store: Arc<dyn KVStore>) -> anyhow::Result<Self> {
        let state = match store.get_by_id(TABLE, "id", RECORD_ID).await? {
            Some(row) => serde_json::from_value(row.blob)?,
            None => CalibratorState::default(),
        };
        Ok(Self {
            store,
            state: RwLock::new(state),
        })
    }

    pub async fn record_prediction(&self, confidence: f64, correct: bool) -> anyhow::Result<()> {
        let idx = bucket_index(confidence);
        let snapshot = {
            let mut state = self.state.write().unwrap();
            let bucket = &mut state.buckets[idx];
            bucket.prediction_count += 1;
            if correct {
                bucket.correct_count += 1;
            }
            state.clone()
        };
        self.persist(&snapshot).await
    }

    async fn persist(&self, snapshot: &CalibratorState) -> anyhow::Result<()> {
        let blob = serde_json::to_value(snapshot)?;
        match self.store.get_by_id(TABLE, "id", RECORD_ID).await? {
            Some(_) => self.store.update(TABLE, "id", RECORD_ID, blob).await?,
            None => self.store.insert(TABLE, "id", RECORD_ID, blob).await?,
        }
        Ok(())
    }

    /// Blends `raw` with the bucket's observed accuracy, weight
    /// `min(predictionCount/20, 1)`; returns `raw` clamped if the bucket has
    /// no observations yet.
    pub fn get_calibrated_confidence(&self, raw: f64) -> f64 {
        let raw = raw.clamp(0.0, 1.0);
        let idx = bucket_index(raw);
        let state = self.state.read().unwrap();
        let bucket = state.buckets[idx];
        if bucket.prediction_count == 0 {
            return raw;
        }
        let weight = (bucket.prediction_count as f64 / 20.0).min(1.0);
        (raw * (1.0 - weight) + bucket.actual_accuracy() * weight).clamp(0.0, 1.0)
    }

    /// Mean over non-empty buckets of `|midpoint - actualAccuracy|`.
    pub fn calibration_error(&self) -> f64 {
        let state = self.state.read().unwrap();
        let nonempty: Vec<(usize, Bucket)> = state
            .buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| b.prediction_count > 0)
            .map(|(i, b)| (i, *b))
            .collect();
        if nonempty.is_empty() {
            return 0.0;
        }
        let sum: f64 = nonempty
            .iter()
            .map(|(i, b)| (Bucket::midpoint(*i) - b.actual_accuracy()).abs())
            .sum();
        sum / nonempty.len() as f64
    }

    pub fn get_calibration_stats(&self) -> Vec<Bucket> {
        self.state.read().unwrap().buckets.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::InMemoryKVStore;

    #[tokio::test]
    async fn bucket_accuracy_matches_recorded_counts() {
        let store: Arc<dyn KVStore> = Arc::new(InMemoryKVStore::new());
        let cal = ConfidenceCalibrator::load(store).await.unwrap();
        for _ in 0..3 {
            cal.record_prediction(0.85, true).await.unwrap();
        }
        cal.record_prediction(0.85, false).await.unwrap();
        let stats = cal.get_calibration_stats();
        let bucket = stats[bucket_index(0.85)];
        assert_eq!(bucket.prediction_count, 4);
        assert_eq!(bucket.correct_count, 3);
        assert!((bucket.actual_accuracy() - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn empty_bucket_returns_clamped_raw() {
        let store: Arc<dyn KVStore> = Arc::new(InMemoryKVStore::new());
        let cal = ConfidenceCalibrator::load(store).await.unwrap();
        assert_eq!(cal.get_calibrated_confidence(0.42), 0.42);
        assert_eq!(cal.get_calibrated_confidence(1.5), 1.0);
    }

    #[tokio::test]
    async fn calibrated_confidence_blends_toward_accuracy() {
        let store: Arc<dyn KVStore> = Arc::new(InMemoryKVStore::new());
        let cal = ConfidenceCalibrator::load(store).await.unwrap();
        for _ in 0..20 {
            cal.record_prediction(0.9, false).await.unwrap();
        }
        let calibrated = cal.get_calibrated_confidence(0.9);
        assert!(calibrated < 0.9);
        assert!(calibrated >= 0.0 && calibrated <= 1.0);
    }

    #[tokio::test]
    async fn persistence_round_trips_through_store() {
        let store: Arc<dyn KVStore> = Arc::new(InMemoryKVStore::new());
        {
            let cal = ConfidenceCalibrator::load(store.clone()).await.unwrap();
            cal.record_prediction(0.1, true).await.unwrap();
            cal.record_prediction(0.95, false).await.unwrap();
        }
        let reloaded = ConfidenceCalibrator::load(store).await.unwrap();
        let stats = reloaded.get_calibration_stats();
        assert_eq!(stats[0].prediction_count, 1);
        assert_eq!(stats[4].prediction_count, 1);
    }
}

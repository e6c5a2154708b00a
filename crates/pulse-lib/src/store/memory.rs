//! In-memory store with optional JSON snapshots.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::StoreError;
use crate::models::{Anomaly, AnomalyAlert, Baseline, DataPoint, HealthScore};
use crate::observability::PipelineMetrics;
use crate::seasonality::SeasonalProfile;
use crate::store::MetricStore;

/// Per-metric history cap; the oldest points roll off first.
const MAX_POINTS_PER_METRIC: usize = 10_000;

/// Concurrent in-memory backend. All maps are keyed by metric name or
/// record id; a snapshot path makes state survive restarts.
#[derive(Default)]
pub struct MemoryStore {
    points: DashMap<String, Vec<DataPoint>>,
    baselines: DashMap<String, Baseline>,
    profiles: DashMap<String, SeasonalProfile>,
    anomalies: DashMap<String, Anomaly>,
    alerts: DashMap<String, AnomalyAlert>,
    health: RwLock<Option<HealthScore>>,
    snapshot_path: Option<PathBuf>,
}

/// On-disk shape of a snapshot. BTreeMaps keep the file diffable.
#[derive(Debug, Default, Serialize, Deserialize)]
struct Snapshot {
    points: BTreeMap<String, Vec<DataPoint>>,
    baselines: BTreeMap<String, Baseline>,
    profiles: BTreeMap<String, SeasonalProfile>,
    anomalies: BTreeMap<String, Anomaly>,
    alerts: BTreeMap<String, AnomalyAlert>,
    health: Option<HealthScore>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that loads from and persists to `path`. A missing file
    /// is not an error, it just means a fresh store.
    pub fn with_snapshot(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let mut store = Self::new();
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let snapshot: Snapshot = serde_json::from_str(&raw)?;
            store.hydrate(snapshot);
            info!(
                event = "snapshot_loaded",
                path = %path.display(),
                metrics = store.points.len(),
                anomalies = store.anomalies.len(),
                alerts = store.alerts.len(),
                "store state restored from snapshot"
            );
        }
        store.snapshot_path = Some(path);
        Ok(store)
    }

    /// Write the whole store to the snapshot path, atomically via a
    /// temp file and rename. A store without a snapshot path is a
    /// no-op.
    pub fn persist(&self) -> Result<(), StoreError> {
        let Some(path) = &self.snapshot_path else {
            return Ok(());
        };
        let result = self.write_snapshot(path);
        if let Err(err) = &result {
            PipelineMetrics::new().inc_persistence_errors();
            error!(
                event = "snapshot_failed",
                path = %path.display(),
                error = %err,
                "failed to persist store snapshot"
            );
        }
        result
    }

    fn write_snapshot(&self, path: &Path) -> Result<(), StoreError> {
        let snapshot = Snapshot {
            points: map_to_btree(&self.points),
            baselines: map_to_btree(&self.baselines),
            profiles: map_to_btree(&self.profiles),
            anomalies: map_to_btree(&self.anomalies),
            alerts: map_to_btree(&self.alerts),
            health: *self.health.read().unwrap(),
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    fn hydrate(&mut self, snapshot: Snapshot) {
        for (k, v) in snapshot.points {
            self.points.insert(k, v);
        }
        for (k, v) in snapshot.baselines {
            self.baselines.insert(k, v);
        }
        for (k, v) in snapshot.profiles {
            self.profiles.insert(k, v);
        }
        for (k, v) in snapshot.anomalies {
            self.anomalies.insert(k, v);
        }
        for (k, v) in snapshot.alerts {
            self.alerts.insert(k, v);
        }
        *self.health.write().unwrap() = snapshot.health;
    }
}

fn map_to_btree<V: Clone>(map: &DashMap<String, V>) -> BTreeMap<String, V> {
    map.iter()
        .map(|e| (e.key().clone(), e.value().clone()))
        .collect()
}

#[async_trait]
impl MetricStore for MemoryStore {
    async fn record_point(&self, metric: &str, point: DataPoint) -> Result<(), StoreError> {
        let mut series = self.points.entry(metric.to_string()).or_default();
        series.push(point);
        if series.len() > MAX_POINTS_PER_METRIC {
            series.sort_by_key(|p| p.timestamp);
            let excess = series.len() - MAX_POINTS_PER_METRIC;
            series.drain(0..excess);
        }
        Ok(())
    }

    async fn history(&self, metric: &str, since_ms: i64) -> Result<Vec<DataPoint>, StoreError> {
        let mut out: Vec<DataPoint> = self
            .points
            .get(metric)
            .map(|series| {
                series
                    .iter()
                    .copied()
                    .filter(|p| p.timestamp >= since_ms)
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by_key(|p| p.timestamp);
        Ok(out)
    }

    async fn save_baseline(&self, metric: &str, baseline: Baseline) -> Result<(), StoreError> {
        self.baselines.insert(metric.to_string(), baseline);
        Ok(())
    }

    async fn baseline(&self, metric: &str) -> Result<Option<Baseline>, StoreError> {
        Ok(self.baselines.get(metric).map(|b| b.clone()))
    }

    async fn save_profile(
        &self,
        metric: &str,
        profile: SeasonalProfile,
    ) -> Result<(), StoreError> {
        self.profiles.insert(metric.to_string(), profile);
        Ok(())
    }

    async fn clear_profile(&self, metric: &str) -> Result<(), StoreError> {
        self.profiles.remove(metric);
        Ok(())
    }

    async fn profile(&self, metric: &str) -> Result<Option<SeasonalProfile>, StoreError> {
        Ok(self.profiles.get(metric).map(|p| p.clone()))
    }

    async fn save_anomaly(&self, anomaly: Anomaly) -> Result<(), StoreError> {
        self.anomalies.insert(anomaly.id.clone(), anomaly);
        Ok(())
    }

    async fn anomaly(&self, id: &str) -> Result<Option<Anomaly>, StoreError> {
        Ok(self.anomalies.get(id).map(|a| a.clone()))
    }

    async fn active_anomalies(&self, metric: Option<&str>) -> Result<Vec<Anomaly>, StoreError> {
        let mut out: Vec<Anomaly> = self
            .anomalies
            .iter()
            .filter(|e| e.value().is_active())
            .filter(|e| metric.map_or(true, |m| e.value().metric_name == m))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|a| std::cmp::Reverse(a.detected_at));
        Ok(out)
    }

    async fn anomalies_since(&self, since_ms: i64) -> Result<Vec<Anomaly>, StoreError> {
        let mut out: Vec<Anomaly> = self
            .anomalies
            .iter()
            .filter(|e| e.value().detected_at >= since_ms)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|a| std::cmp::Reverse(a.detected_at));
        Ok(out)
    }

    async fn save_alert(&self, alert: AnomalyAlert) -> Result<(), StoreError> {
        self.alerts.insert(alert.id.clone(), alert);
        Ok(())
    }

    async fn alert(&self, id: &str) -> Result<Option<AnomalyAlert>, StoreError> {
        Ok(self.alerts.get(id).map(|a| a.clone()))
    }

    async fn alerts(&self, include_acknowledged: bool) -> Result<Vec<AnomalyAlert>, StoreError> {
        let mut out: Vec<AnomalyAlert> = self
            .alerts
            .iter()
            .filter(|e| include_acknowledged || !e.value().acknowledged)
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|a| std::cmp::Reverse(a.created_at));
        Ok(out)
    }

    async fn update_alert(&self, alert: AnomalyAlert) -> Result<(), StoreError> {
        self.alerts.insert(alert.id.clone(), alert);
        Ok(())
    }

    async fn prune_alerts(&self, cutoff_ms: i64) -> Result<usize, StoreError> {
        let before = self.alerts.len();
        self.alerts.retain(|_, a| a.created_at >= cutoff_ms);
        Ok(before - self.alerts.len())
    }

    async fn save_health(&self, score: HealthScore) -> Result<(), StoreError> {
        *self.health.write().unwrap() = Some(score);
        Ok(())
    }

    async fn latest_health(&self) -> Result<Option<HealthScore>, StoreError> {
        Ok(*self.health.read().unwrap())
    }
}

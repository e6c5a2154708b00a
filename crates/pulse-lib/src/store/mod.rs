//! Persistence boundary.
//!
//! The pipeline only ever talks to [`MetricStore`]; the in-memory
//! implementation in [`memory`] is the default backend and doubles as
//! the test double.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Anomaly, AnomalyAlert, Baseline, DataPoint, HealthScore};
use crate::seasonality::SeasonalProfile;

#[async_trait]
pub trait MetricStore: Send + Sync {
    async fn record_point(&self, metric: &str, point: DataPoint) -> Result<(), StoreError>;

    /// History at or after `since_ms`, oldest first.
    async fn history(&self, metric: &str, since_ms: i64) -> Result<Vec<DataPoint>, StoreError>;

    async fn save_baseline(&self, metric: &str, baseline: Baseline) -> Result<(), StoreError>;

    async fn baseline(&self, metric: &str) -> Result<Option<Baseline>, StoreError>;

    async fn save_profile(&self, metric: &str, profile: SeasonalProfile)
        -> Result<(), StoreError>;

    async fn clear_profile(&self, metric: &str) -> Result<(), StoreError>;

    async fn profile(&self, metric: &str) -> Result<Option<SeasonalProfile>, StoreError>;

    /// Insert or replace by id.
    async fn save_anomaly(&self, anomaly: Anomaly) -> Result<(), StoreError>;

    async fn anomaly(&self, id: &str) -> Result<Option<Anomaly>, StoreError>;

    /// Unresolved anomalies, newest first, optionally limited to one
    /// metric.
    async fn active_anomalies(&self, metric: Option<&str>) -> Result<Vec<Anomaly>, StoreError>;

    /// Anomalies of any status detected at or after `since_ms`.
    async fn anomalies_since(&self, since_ms: i64) -> Result<Vec<Anomaly>, StoreError>;

    async fn save_alert(&self, alert: AnomalyAlert) -> Result<(), StoreError>;

    async fn alert(&self, id: &str) -> Result<Option<AnomalyAlert>, StoreError>;

    /// All alerts, newest first. Acknowledged ones are filtered out
    /// unless requested.
    async fn alerts(&self, include_acknowledged: bool) -> Result<Vec<AnomalyAlert>, StoreError>;

    /// Replace an existing alert by id.
    async fn update_alert(&self, alert: AnomalyAlert) -> Result<(), StoreError>;

    /// Drop alerts created before `cutoff_ms`; returns how many were
    /// removed.
    async fn prune_alerts(&self, cutoff_ms: i64) -> Result<usize, StoreError>;

    async fn save_health(&self, score: HealthScore) -> Result<(), StoreError>;

    async fn latest_health(&self) -> Result<Option<HealthScore>, StoreError>;
}

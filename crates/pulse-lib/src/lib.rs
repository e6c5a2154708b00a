//! Core library for test-quality anomaly detection
//!
//! This crate provides the statistical and operational core of the
//! pipeline:
//! - Baseline fitting over metric history (four estimators, optional
//!   outlier trimming, gap filling and seasonal adjustment)
//! - An ensemble of stateless detection algorithms (z-score and
//!   modified z-score, IQR fences, moving-average bands, pass/fail
//!   pattern analysis)
//! - Weighted multi-factor severity scoring with impact and priority
//! - Alert orchestration with deduplication, convergence and cooldown
//! - A pluggable async persistence trait with an in-memory reference
//!   implementation
//!
//! Everything is wired together by [`pipeline::MetricPipeline`]; the
//! individual stages are usable on their own.

pub mod alert;
pub mod algorithms;
pub mod baseline;
pub mod config;
pub mod detector;
pub mod error;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod seasonality;
pub mod severity;
pub mod stats;
pub mod store;

pub use alert::{AlertDecision, AlertTrigger, Clock, ManualClock, Suppression, SystemClock};
pub use baseline::{BaselineBuilder, BaselineFit};
pub use config::{
    AlertConfig, BaselineConfig, BaselineMethod, DetectionConfig, PipelineConfig,
    PreprocessConfig, SeasonalityConfig, Sensitivity, SeverityWeights,
};
pub use detector::{
    AnomalyDetector, BatchOutcome, CaseScan, DetectionResult, SignalSource,
};
pub use error::{EmptyInputError, PulseError, Result, StoreError};
pub use models::*;
pub use observability::{PipelineMetrics, StructuredLogger};
pub use pipeline::{MetricPipeline, PipelineBuilder, PipelineOutcome, SuiteReport};
pub use seasonality::{SeasonalAdjust, SeasonalProfile};
pub use severity::{
    calculate_priority, ImpactAssessment, ImpactScope, SeverityEvaluator, SeverityFactor,
    SeverityInput, SeverityResult, Urgency,
};
pub use store::{MemoryStore, MetricStore};

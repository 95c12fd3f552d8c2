//! Trend aggregation and detection.
//!
//! Eligible items flow from the [`window::Aggregator`] into the
//! [`cluster::Clusterer`], are scored by [`scoring`] and driven through
//! their lifecycle by [`lifecycle::LifecycleTracker`], all inside one
//! [`Pipeline`] cycle. [`TrendEngine`] is the concurrent handle the service
//! and CLI hold.

pub mod alerts;
pub mod classify;
pub mod cluster;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod pattern;
pub mod pipeline;
pub mod scoring;
pub mod signature;
pub mod topic;
pub mod window;

pub use classify::{
    Classified, Classifiers, KeywordTopicClassifier, LexiconSentimentClassifier,
    MultimediaSummary, SentimentClassifier, SignalInput, SignalPayload, SignalRejection,
    TopicClassifier, TopicLabel,
};
pub use engine::{EngineView, IntakeStats, SubmitOutcome, TrendEngine};
pub use error::EngineError;
pub use lifecycle::{ArchiveReason, Transition};
pub use pattern::{CosineCurveMatcher, GrowthCurve, PatternLibraryFile, PatternMatcher};
pub use pipeline::{
    AuditRecord, CycleOutput, CycleReport, FinalFlush, IngestReport, PersistRequest, Pipeline,
};

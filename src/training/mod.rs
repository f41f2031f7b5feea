//! Training module
//!
//! This module provides:
//! - The training orchestrator (fit loop, evaluation, persistence)
//! - The observer interface with early stopping and best-checkpoint policies
//! - Run reports and the class index artifact

pub mod observer;
pub mod orchestrator;

// Re-export main types for convenience
pub use observer::{
    BestCheckpoint, EarlyStopping, EpochEvent, EpochMetrics, ObserverSignal, TrainingObserver,
};
pub use orchestrator::{
    evaluate, read_class_index, write_class_index, DatasetSummary, Evaluation, RunState,
    TrainedModel, TrainingOrchestrator, TrainingReport, CLASS_INDEX_FILE, REPORT_FILE,
};

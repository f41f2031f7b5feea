//! Training observers
//!
//! Policies that react to the fit loop are written against
//! [`TrainingObserver`]: the orchestrator reports every finished epoch and the
//! end of the run, and an observer may ask the loop to stop. Two policies ship
//! with the crate:
//! - [`EarlyStopping`]: stop after `patience` epochs without improvement of
//!   the validation loss and restore the best parameters at the end
//! - [`BestCheckpoint`]: write the model whenever the validation loss improves

use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::model::{save_classifier, TransferClassifier};
use crate::utils::error::Result;

/// Metrics of one finished epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// 1-based epoch number
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: Option<f64>,
    pub val_accuracy: Option<f64>,
    pub seconds: f64,
}

/// What an observer sees at the end of an epoch
pub struct EpochEvent<'a, M> {
    pub metrics: &'a EpochMetrics,
    pub model: &'a M,
}

/// Observer verdict after an epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverSignal {
    Continue,
    Stop,
}

pub trait TrainingObserver<M> {
    fn name(&self) -> &str;

    /// Observers returning `true` are not registered when there is no
    /// validation subset.
    fn requires_validation(&self) -> bool {
        false
    }

    fn on_epoch_end(&mut self, event: &EpochEvent<'_, M>) -> Result<ObserverSignal>;

    /// Called once after the last epoch; may replace the model.
    fn on_train_end(&mut self, _model: &mut M) -> Result<()> {
        Ok(())
    }
}

/// Running minimum of the validation loss with a `min_delta` margin
#[derive(Debug, Clone)]
struct LossMonitor {
    best: f64,
    min_delta: f64,
}

impl LossMonitor {
    fn new(min_delta: f64) -> Self {
        Self {
            best: f64::INFINITY,
            min_delta,
        }
    }

    /// Record `current`; true if it improves on the best value so far
    fn improves(&mut self, current: f64) -> bool {
        if current < self.best - self.min_delta {
            self.best = current;
            true
        } else {
            false
        }
    }
}

/// Stops training when the validation loss stops improving
///
/// Keeps a copy of the model from the best epoch and writes it back into the
/// orchestrator's model when the run ends, whether it ended early or not.
pub struct EarlyStopping<M> {
    patience: usize,
    monitor: LossMonitor,
    wait: usize,
    best_epoch: Option<usize>,
    best_model: Option<M>,
    stopped_epoch: Option<usize>,
}

impl<M: Clone> EarlyStopping<M> {
    pub fn new(patience: usize) -> Self {
        Self::with_min_delta(patience, 0.0)
    }

    pub fn with_min_delta(patience: usize, min_delta: f64) -> Self {
        Self {
            patience,
            monitor: LossMonitor::new(min_delta.abs()),
            wait: 0,
            best_epoch: None,
            best_model: None,
            stopped_epoch: None,
        }
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn best_loss(&self) -> Option<f64> {
        self.best_epoch.map(|_| self.monitor.best)
    }

    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }
}

impl<M: Clone> TrainingObserver<M> for EarlyStopping<M> {
    fn name(&self) -> &str {
        "early_stopping"
    }

    fn requires_validation(&self) -> bool {
        true
    }

    fn on_epoch_end(&mut self, event: &EpochEvent<'_, M>) -> Result<ObserverSignal> {
        let Some(val_loss) = event.metrics.val_loss else {
            return Ok(ObserverSignal::Continue);
        };

        if self.monitor.improves(val_loss) {
            self.wait = 0;
            self.best_epoch = Some(event.metrics.epoch);
            self.best_model = Some(event.model.clone());
            return Ok(ObserverSignal::Continue);
        }

        self.wait += 1;
        debug!(
            "val_loss {:.4} did not improve on {:.4} ({}/{})",
            val_loss, self.monitor.best, self.wait, self.patience
        );

        if self.wait >= self.patience {
            self.stopped_epoch = Some(event.metrics.epoch);
            info!(
                "Early stopping at epoch {} (best epoch {})",
                event.metrics.epoch,
                self.best_epoch.unwrap_or(0)
            );
            return Ok(ObserverSignal::Stop);
        }

        Ok(ObserverSignal::Continue)
    }

    fn on_train_end(&mut self, model: &mut M) -> Result<()> {
        if let Some(best) = self.best_model.take() {
            if let Some(epoch) = self.best_epoch {
                info!("Restoring model weights from epoch {}", epoch);
            }
            *model = best;
        }
        Ok(())
    }
}

/// Saves the model every time the validation loss reaches a new minimum
pub struct BestCheckpoint {
    stem: PathBuf,
    monitor: LossMonitor,
    saved: Option<PathBuf>,
    saves: usize,
}

impl BestCheckpoint {
    /// `stem` is the artifact path without extension
    pub fn new(stem: impl Into<PathBuf>) -> Self {
        Self {
            stem: stem.into(),
            monitor: LossMonitor::new(0.0),
            saved: None,
            saves: 0,
        }
    }

    pub fn stem(&self) -> &Path {
        &self.stem
    }

    /// File written by the last save, if any
    pub fn saved_path(&self) -> Option<&Path> {
        self.saved.as_deref()
    }

    pub fn save_count(&self) -> usize {
        self.saves
    }
}

impl<B: Backend> TrainingObserver<TransferClassifier<B>> for BestCheckpoint {
    fn name(&self) -> &str {
        "best_checkpoint"
    }

    fn requires_validation(&self) -> bool {
        true
    }

    fn on_epoch_end(&mut self, event: &EpochEvent<'_, TransferClassifier<B>>) -> Result<ObserverSignal> {
        if let Some(val_loss) = event.metrics.val_loss {
            if self.monitor.improves(val_loss) {
                let path = save_classifier(event.model, &self.stem)?;
                info!(
                    "val_loss improved to {:.4}, saved checkpoint {:?}",
                    val_loss, path
                );
                self.saved = Some(path);
                self.saves += 1;
            }
        }
        Ok(ObserverSignal::Continue)
    }
}

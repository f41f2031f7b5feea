//! Training run orchestration
//!
//! A run moves through
//! `Initialized -> Training -> {StoppedByEarlyStop | CompletedAllEpochs} -> Evaluated -> Persisted`.
//! Only the classification head is optimized; the backbone is evaluated on
//! the inner backend once per batch and never receives gradients.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};
use chrono::{DateTime, Local};
use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::observer::{
    BestCheckpoint, EarlyStopping, EpochEvent, EpochMetrics, ObserverSignal, TrainingObserver,
};
use crate::config::TrainingConfig;
use crate::dataset::{
    CategoryIndex, ImageBatch, ImageBatcher, ImageDataset, SplitResult, TrainingItem,
};
use crate::model::{
    artifact_path, categorical_cross_entropy, correct_predictions, save_classifier,
    CompiledModel, TransferClassifier,
};
use crate::utils::error::{PipelineError, PipelineWarning, Result};
use crate::utils::logging::EpochLogger;

/// File name of the label -> index table
pub const CLASS_INDEX_FILE: &str = "class_index.json";

/// File name of the run report
pub const REPORT_FILE: &str = "training_report.json";

/// Lifecycle of a training run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunState {
    Initialized,
    Training,
    StoppedByEarlyStop,
    CompletedAllEpochs,
    Evaluated,
    Persisted,
}

/// Loss and accuracy over a whole dataset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub loss: f64,
    pub accuracy: f64,
    pub samples: usize,
}

/// Dataset facts recorded alongside the run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub loaded: usize,
    pub skipped: usize,
    pub train: usize,
    pub validation: usize,
    pub stratified: bool,
    pub class_counts: BTreeMap<String, usize>,
}

/// Everything a finished run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub started_at: String,
    pub finished_at: String,
    pub state: RunState,
    pub termination: RunState,
    pub epochs_run: usize,
    pub best_epoch: Option<usize>,
    pub history: Vec<EpochMetrics>,
    pub evaluation: Option<Evaluation>,
    /// Written only when a validation subset existed
    pub best_model_path: Option<PathBuf>,
    pub final_model_path: PathBuf,
    pub class_index_path: PathBuf,
    /// Label -> output unit
    pub classes: BTreeMap<String, usize>,
    pub dataset: DatasetSummary,
    pub warnings: Vec<PipelineWarning>,
}

impl TrainingReport {
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| PipelineError::Persistence {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    /// Wall-clock time between start and finish, if both timestamps parse
    pub fn elapsed(&self) -> Option<Duration> {
        let started = DateTime::parse_from_rfc3339(&self.started_at).ok()?;
        let finished = DateTime::parse_from_rfc3339(&self.finished_at).ok()?;
        (finished - started).to_std().ok()
    }
}

/// Trained model and its report
pub struct TrainedModel<B: AutodiffBackend> {
    pub model: TransferClassifier<B>,
    pub report: TrainingReport,
}

/// Write `class_index.json` into `dir`
pub fn write_class_index(index: &CategoryIndex, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(CLASS_INDEX_FILE);
    let json = serde_json::to_string_pretty(&index.to_map())?;
    std::fs::write(&path, json).map_err(|e| PipelineError::Persistence {
        path: path.clone(),
        reason: e.to_string(),
    })?;
    Ok(path)
}

/// Read a table written by [`write_class_index`]
pub fn read_class_index(path: &Path) -> Result<CategoryIndex> {
    let json = std::fs::read_to_string(path)?;
    let map: BTreeMap<String, usize> = serde_json::from_str(&json)?;
    CategoryIndex::from_map(&map)
}

/// Loss and accuracy of `model` over `dataset`, in batches of `batch_size`.
///
/// Run this on an inference model (`model.valid()`), so dropout is off.
pub fn evaluate<B: Backend>(
    model: &TransferClassifier<B>,
    dataset: &ImageDataset,
    batch_size: usize,
    device: &B::Device,
) -> Evaluation {
    let batcher = ImageBatcher::new();
    let indices: Vec<usize> = (0..dataset.len()).collect();
    let mut loss_sum = 0.0f64;
    let mut correct = 0usize;

    for chunk in indices.chunks(batch_size.max(1)) {
        let items: Vec<TrainingItem> = chunk.iter().filter_map(|&i| dataset.get(i)).collect();
        let batch: ImageBatch<B> = batcher.batch(items, device);

        let logits = model.forward_logits(batch.images);
        correct += correct_predictions(logits.clone(), batch.targets.clone());
        let loss: f64 = categorical_cross_entropy(logits, batch.targets)
            .into_scalar()
            .elem();
        loss_sum += loss * chunk.len() as f64;
    }

    let samples = dataset.len();
    Evaluation {
        loss: if samples == 0 { 0.0 } else { loss_sum / samples as f64 },
        accuracy: if samples == 0 { 0.0 } else { correct as f64 / samples as f64 },
        samples,
    }
}

type Observer<B> = Box<dyn TrainingObserver<TransferClassifier<B>>>;

/// Runs fit, evaluation and persistence for one model
pub struct TrainingOrchestrator<B: AutodiffBackend> {
    config: TrainingConfig,
    device: B::Device,
    observers: Vec<Observer<B>>,
    default_observers: bool,
    warnings: Vec<PipelineWarning>,
    dataset: DatasetSummary,
    show_progress: bool,
    state: RunState,
}

impl<B: AutodiffBackend> TrainingOrchestrator<B> {
    pub fn new(config: &TrainingConfig, device: &B::Device) -> Self {
        Self {
            config: config.clone(),
            device: device.clone(),
            observers: Vec::new(),
            default_observers: true,
            warnings: Vec::new(),
            dataset: DatasetSummary::default(),
            show_progress: false,
            state: RunState::Initialized,
        }
    }

    /// Register an additional observer, called after the built-in ones
    pub fn with_observer(mut self, observer: Observer<B>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Skip early stopping and best-checkpointing
    pub fn without_default_observers(mut self) -> Self {
        self.default_observers = false;
        self
    }

    /// Warnings raised before training, carried into the report
    pub fn with_warnings(mut self, warnings: Vec<PipelineWarning>) -> Self {
        self.warnings = warnings;
        self
    }

    pub fn with_dataset_summary(mut self, summary: DatasetSummary) -> Self {
        self.dataset = summary;
        self
    }

    /// Draw a per-epoch batch progress bar
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    fn register_observers(&mut self, has_validation: bool) -> Vec<Observer<B>> {
        let mut observers: Vec<Observer<B>> = Vec::new();
        if self.default_observers {
            observers.push(Box::new(EarlyStopping::new(self.config.patience)));
            observers.push(Box::new(BestCheckpoint::new(self.config.best_model_path())));
        }
        observers.append(&mut self.observers);

        if has_validation {
            return observers;
        }

        observers
            .into_iter()
            .filter(|observer| {
                if observer.requires_validation() {
                    warn!(
                        "Observer '{}' disabled: no validation data",
                        observer.name()
                    );
                    false
                } else {
                    true
                }
            })
            .collect()
    }

    /// Train, evaluate and persist.
    pub fn run(
        &mut self,
        compiled: CompiledModel<B>,
        split: &SplitResult,
        index: &CategoryIndex,
    ) -> Result<TrainedModel<B>> {
        let started_at = Local::now();
        let output_dir = self.config.output_dir.clone();
        std::fs::create_dir_all(&output_dir).map_err(|e| PipelineError::Persistence {
            path: output_dir.clone(),
            reason: e.to_string(),
        })?;

        let best_artifact = artifact_path(&self.config.best_model_path());
        if best_artifact.is_file() {
            warn!("Removing best checkpoint left by an earlier run: {:?}", best_artifact);
            std::fs::remove_file(&best_artifact).map_err(|e| PipelineError::Persistence {
                path: best_artifact.clone(),
                reason: e.to_string(),
            })?;
        }

        let has_validation = split.has_validation();
        let mut observers = self.register_observers(has_validation);
        let checkpointing = self.default_observers && has_validation;

        self.state = RunState::Training;
        let (mut model, history, stopped_early) = self.fit(compiled, split, &mut observers)?;
        for observer in observers.iter_mut() {
            observer.on_train_end(&mut model)?;
        }
        self.state = if stopped_early {
            RunState::StoppedByEarlyStop
        } else {
            RunState::CompletedAllEpochs
        };
        let termination = self.state;

        let evaluation = has_validation.then(|| {
            evaluate(
                &model.valid(),
                &split.validation,
                self.config.batch_size,
                &self.device,
            )
        });
        if let Some(eval) = &evaluation {
            info!(
                "Validation: loss {:.4}, accuracy {:.2}% ({} samples)",
                eval.loss,
                eval.accuracy * 100.0,
                eval.samples
            );
        }
        self.state = RunState::Evaluated;

        let final_model_path = save_classifier(&model, &self.config.final_model_path())?;
        info!("Saved final model to {:?}", final_model_path);

        let best_model_path = Some(best_artifact).filter(|path| checkpointing && path.is_file());
        let class_index_path = write_class_index(index, &output_dir)?;

        let mut report = TrainingReport {
            started_at: started_at.to_rfc3339(),
            finished_at: String::new(),
            state: RunState::Persisted,
            termination,
            epochs_run: history.len(),
            best_epoch: best_epoch(&history),
            history,
            evaluation,
            best_model_path,
            final_model_path,
            class_index_path,
            classes: index.to_map(),
            dataset: self.dataset.clone(),
            warnings: self.warnings.clone(),
        };
        report.finished_at = Local::now().to_rfc3339();
        report.save(&output_dir.join(REPORT_FILE))?;

        self.state = RunState::Persisted;
        Ok(TrainedModel { model, report })
    }

    /// The epoch loop. Returns the model, per-epoch metrics, and whether an
    /// observer requested the stop.
    fn fit(
        &self,
        compiled: CompiledModel<B>,
        split: &SplitResult,
        observers: &mut [Observer<B>],
    ) -> Result<(TransferClassifier<B>, Vec<EpochMetrics>, bool)> {
        let CompiledModel {
            mut model,
            optimizer,
            learning_rate,
        } = compiled;
        let mut optimizer = optimizer.init::<B, TransferClassifier<B>>();

        let train = &split.train;
        let batch_size = self.config.batch_size.max(1);
        let epochs = self.config.epochs;
        let batcher = ImageBatcher::new();
        let frozen = model.frozen_backbone();
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.shuffle_seed);
        let mut logger = EpochLogger::new(epochs);
        let mut history = Vec::with_capacity(epochs);

        info!(
            "Training on {} samples for up to {} epochs (batch size {})",
            train.len(),
            epochs,
            batch_size
        );

        for epoch in 0..epochs {
            logger.start_epoch(epoch);

            let mut order: Vec<usize> = (0..train.len()).collect();
            order.shuffle(&mut rng);

            let progress = self.batch_progress(order.len().div_ceil(batch_size) as u64, epoch + 1);
            let mut loss_sum = 0.0f64;
            let mut correct = 0usize;

            for chunk in order.chunks(batch_size) {
                let items: Vec<TrainingItem> = chunk.iter().filter_map(|&i| train.get(i)).collect();
                let batch: ImageBatch<B::InnerBackend> = batcher.batch(items, &self.device);

                let targets = Tensor::<B, 2>::from_inner(batch.targets);
                let logits = model.forward_frozen(&frozen, batch.images);
                correct += correct_predictions(logits.clone(), targets.clone());

                let loss = categorical_cross_entropy(logits, targets);
                let loss_value: f64 = loss.clone().into_scalar().elem();
                if !loss_value.is_finite() {
                    return Err(PipelineError::Training(format!(
                        "loss became {} in epoch {}",
                        loss_value,
                        epoch + 1
                    )));
                }
                loss_sum += loss_value * chunk.len() as f64;

                let grads = GradientsParams::from_grads(loss.backward(), &model);
                model = optimizer.step(learning_rate, model, grads);
                progress.inc(1);
            }
            progress.finish_and_clear();

            let seen = train.len().max(1) as f64;
            let validation = split.has_validation().then(|| {
                evaluate(
                    &model.valid(),
                    &split.validation,
                    batch_size,
                    &self.device,
                )
            });

            let metrics = EpochMetrics {
                epoch: epoch + 1,
                train_loss: loss_sum / seen,
                train_accuracy: correct as f64 / seen,
                val_loss: validation.map(|v| v.loss),
                val_accuracy: validation.map(|v| v.accuracy),
                seconds: logger.epoch_seconds(),
            };
            logger.end_epoch(
                metrics.train_loss,
                metrics.train_accuracy,
                validation.map(|v| (v.loss, v.accuracy)),
            );

            let mut stop = false;
            for observer in observers.iter_mut() {
                let event = EpochEvent {
                    metrics: &metrics,
                    model: &model,
                };
                if observer.on_epoch_end(&event)? == ObserverSignal::Stop {
                    info!("Observer '{}' requested stop", observer.name());
                    stop = true;
                }
            }

            history.push(metrics);
            if stop {
                logger.log_complete(history.len());
                return Ok((model, history, true));
            }
        }

        logger.log_complete(history.len());
        Ok((model, history, false))
    }

    fn batch_progress(&self, batches: u64, epoch: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let bar = ProgressBar::new(batches);
        let template = format!(
            "Epoch {}/{} [{{bar:40.cyan/blue}}] {{pos}}/{{len}} batches",
            epoch, self.config.epochs
        );
        let style = ProgressStyle::default_bar()
            .template(&template)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        bar.set_style(style);
        bar
    }
}

/// Epoch with the lowest validation loss (first one on ties)
fn best_epoch(history: &[EpochMetrics]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for metrics in history {
        if let Some(loss) = metrics.val_loss {
            if best.map_or(true, |(_, b)| loss < b) {
                best = Some((metrics.epoch, loss));
            }
        }
    }
    best.map(|(epoch, _)| epoch)
}

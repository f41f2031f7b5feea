//! End-to-end training pipeline
//!
//! Stages run strictly in order: load -> index -> split -> build -> train ->
//! evaluate -> persist. Fatal conditions stop the run before the next stage
//! starts; in particular an empty dataset is rejected before any model is
//! built or any file is written.

use std::io::IsTerminal;

use burn::tensor::backend::AutodiffBackend;
use colored::Colorize;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::dataset::{CategoryIndex, DatasetBuilder, ImageDataset, LoadedDataset, SplitPlanner, SplitResult};
use crate::model::{BackboneProvider, InputShape, ModelFactory};
use crate::training::{DatasetSummary, TrainedModel, TrainingOrchestrator, TrainingReport};
use crate::utils::error::{PipelineError, PipelineWarning, Result};
use crate::utils::{format_elapsed, proportion_bar};

/// Run the pipeline and return the report
pub fn run_pipeline<B: AutodiffBackend>(
    config: &PipelineConfig,
    provider: &dyn BackboneProvider<B>,
    device: &B::Device,
) -> Result<TrainingReport> {
    train_pipeline(config, provider, device).map(|trained| trained.report)
}

/// Run the pipeline and keep the trained model
pub fn train_pipeline<B: AutodiffBackend>(
    config: &PipelineConfig,
    provider: &dyn BackboneProvider<B>,
    device: &B::Device,
) -> Result<TrainedModel<B>> {
    config.validate()?;
    let interactive = std::io::stderr().is_terminal();

    let loaded = DatasetBuilder::new(&config.data, provider.normalization())
        .with_progress(interactive)
        .load()?;

    if loaded.is_empty() {
        return Err(PipelineError::DatasetEmpty {
            base_dir: config.data.base_dir.clone(),
            skipped: loaded.skipped.len(),
        });
    }
    print_class_counts(&loaded);

    let (labels, mut warnings) = loaded.labels_for_index(config.data.empty_class_policy);
    let index = CategoryIndex::new(labels)?;
    if index.len() < 2 {
        warnings.push(PipelineWarning::DegenerateClasses {
            num_classes: index.len(),
        });
    }

    let mut summary = DatasetSummary {
        loaded: loaded.len(),
        skipped: loaded.skipped.len(),
        class_counts: loaded.class_counts.clone(),
        ..Default::default()
    };

    let dataset = ImageDataset::from_samples(loaded.samples, &index);
    print_shapes(&dataset);

    let split = SplitPlanner::new(&config.split).split(dataset)?;
    if !split.has_validation() {
        warnings.push(PipelineWarning::ValidationAbsent);
    }
    summary.train = split.train.len();
    summary.validation = split.validation.len();
    summary.stratified = split.stratified;
    print_split(&split);

    for warning in &warnings {
        warn!("{}", warning);
    }

    let compiled = ModelFactory::new(&config.model).build(
        index.len(),
        InputShape::rgb(config.data.image_size),
        provider,
        device,
    )?;

    let mut orchestrator = TrainingOrchestrator::<B>::new(&config.training, device)
        .with_warnings(warnings)
        .with_dataset_summary(summary)
        .with_progress(interactive);
    let trained = orchestrator.run(compiled, &split, &index)?;

    print_results(&trained.report, &index);
    info!("Run finished in state {:?}", orchestrator.state());
    Ok(trained)
}

fn print_class_counts(loaded: &LoadedDataset) {
    println!();
    println!("{}", "Class Distribution:".cyan().bold());
    for label in &loaded.class_labels {
        let count = loaded.class_counts.get(label).copied().unwrap_or(0);
        let line = format!(
            "  {:30} {:>6} {}",
            label,
            count,
            proportion_bar(count, loaded.len(), 30)
        );
        if count == 0 {
            println!("{}", line.yellow());
        } else {
            println!("{}", line);
        }
    }
    println!("  Loaded: {}   Skipped: {}", loaded.len(), loaded.skipped.len());
}

fn print_shapes(dataset: &ImageDataset) {
    if let (Some(images), Some(labels)) = (dataset.image_shape(), dataset.label_shape()) {
        println!("  Images shape: {:?}", images);
        println!("  Labels shape: {:?}", labels);
    }
}

fn print_split(split: &SplitResult) {
    println!();
    println!("{}", "Split:".cyan().bold());
    println!("  Training samples:   {}", split.train.len());
    println!("  Validation samples: {}", split.validation.len());
    println!(
        "  Mode:               {}",
        if split.stratified { "stratified" } else { "random" }
    );
    println!();
}

fn print_results(report: &TrainingReport, index: &CategoryIndex) {
    println!();
    println!("{}", "Training Complete!".green().bold());
    println!("  Epochs run:   {} ({:?})", report.epochs_run, report.termination);
    if let Some(elapsed) = report.elapsed() {
        println!("  Run time:     {}", format_elapsed(elapsed));
    }
    if let Some(epoch) = report.best_epoch {
        println!("  Best epoch:   {}", epoch);
    }
    match &report.evaluation {
        Some(eval) => println!(
            "  Validation:   loss {:.4}, accuracy {:.2}%",
            eval.loss,
            eval.accuracy * 100.0
        ),
        None => println!("  Validation:   {}", "skipped (no validation data)".yellow()),
    }
    if let Some(best) = &report.best_model_path {
        println!("  Best model:   {:?}", best);
    }
    println!("  Final model:  {:?}", report.final_model_path);
    for warning in &report.warnings {
        println!("  {} {}", "Warning:".yellow(), warning);
    }

    println!();
    println!("{}", "Class Index:".cyan().bold());
    for (i, label) in index.labels().iter().enumerate() {
        println!("  {:>3}  {}", i, label);
    }
    println!();
}

//! ROI Classifier CLI
//!
//! Entry point for training the transfer-learning classifier, inspecting
//! single images, and generating a demo dataset.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use roi_classifier::backend::{backend_name, default_device, TrainingBackend};
use roi_classifier::config::{EmptyClassPolicy, ImageSize, PipelineConfig};
use roi_classifier::dataset::synthetic::{write_demo_dataset, DemoSpec};
use roi_classifier::inspect::inspect_image;
use roi_classifier::model::{BackboneProvider, PretrainedMobileNetV2, RandomMobileNetV2};
use roi_classifier::run_pipeline;
use roi_classifier::utils::logging::{init_logging, LogConfig, LogLevel};

/// Transfer-learning image classifier trained on annotated regions of interest
#[derive(Parser, Debug)]
#[command(name = "roi_classifier")]
#[command(version)]
#[command(about = "Train a frozen-backbone image classifier on VOC-annotated crops", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false", global = true)]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, default_value = "false", global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train a classifier on a class-folder dataset
    Train {
        /// Dataset directory with one sub-folder per class
        #[arg(short, long, default_value = "dir")]
        data_dir: PathBuf,

        /// JSON configuration file; flags below override its values
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Backbone weights (burn record file)
        #[arg(short, long)]
        weights: Option<PathBuf>,

        /// Use a randomly initialized backbone instead of pretrained weights
        #[arg(long, default_value = "false")]
        random_backbone: bool,

        /// Backbone width multiplier
        #[arg(long)]
        width_multiplier: Option<f64>,

        /// Maximum number of epochs
        #[arg(short, long)]
        epochs: Option<usize>,

        /// Batch size
        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Learning rate
        #[arg(short, long)]
        learning_rate: Option<f64>,

        /// Early-stopping patience in epochs
        #[arg(long)]
        patience: Option<usize>,

        /// Fraction of samples held out for validation
        #[arg(long)]
        validation_fraction: Option<f64>,

        /// Input image side in pixels
        #[arg(long)]
        image_size: Option<u32>,

        /// Random seed for splitting and shuffling
        #[arg(long)]
        seed: Option<u64>,

        /// Keep class folders that yield no samples in the class index
        #[arg(long, default_value = "false")]
        keep_empty_classes: bool,

        /// Output directory for models and reports
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Print format, size and depth indicators of one image
    Inspect {
        /// Image file
        path: PathBuf,
    },

    /// Write a small synthetic dataset with VOC annotations
    DemoData {
        /// Output directory
        #[arg(short, long, default_value = "data/demo")]
        output: PathBuf,

        /// Comma-separated class names
        #[arg(long, default_value = "A,B")]
        classes: String,

        /// Images per class
        #[arg(long, default_value = "10")]
        per_class: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else {
        cli.log_level
            .as_deref()
            .map(|level| LogConfig::with_level(LogLevel::parse(level)))
            .unwrap_or_default()
    };

    let _ = init_logging(&log_config);

    match cli.command {
        Commands::Train {
            data_dir,
            config,
            weights,
            random_backbone,
            width_multiplier,
            epochs,
            batch_size,
            learning_rate,
            patience,
            validation_fraction,
            image_size,
            seed,
            keep_empty_classes,
            output_dir,
        } => {
            let mut pipeline_config = match config {
                Some(path) => PipelineConfig::load(&path)
                    .with_context(|| format!("Failed to load config {:?}", path))?,
                None => PipelineConfig::default(),
            };
            pipeline_config.data.base_dir = data_dir;

            if let Some(v) = width_multiplier {
                pipeline_config.model.width_multiplier = v;
            }
            if let Some(v) = epochs {
                pipeline_config.training.epochs = v;
            }
            if let Some(v) = batch_size {
                pipeline_config.training.batch_size = v;
            }
            if let Some(v) = learning_rate {
                pipeline_config.model.learning_rate = v;
            }
            if let Some(v) = patience {
                pipeline_config.training.patience = v;
            }
            if let Some(v) = validation_fraction {
                pipeline_config.split.validation_fraction = v;
            }
            if let Some(v) = image_size {
                pipeline_config.data.image_size = ImageSize::square(v);
            }
            if let Some(v) = seed {
                pipeline_config.split.seed = v;
                pipeline_config.training.shuffle_seed = v;
            }
            if keep_empty_classes {
                pipeline_config.data.empty_class_policy = EmptyClassPolicy::Keep;
            }
            if let Some(v) = output_dir {
                pipeline_config.training.output_dir = v;
            }

            cmd_train(&pipeline_config, weights, random_backbone)?;
        }

        Commands::Inspect { path } => {
            cmd_inspect(&path)?;
        }

        Commands::DemoData {
            output,
            classes,
            per_class,
        } => {
            let classes: Vec<&str> = classes
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .collect();
            let written = write_demo_dataset(&output, &DemoSpec::new(&classes, per_class))?;
            println!(
                "{} Wrote {} images to {:?}",
                "Done:".green().bold(),
                written,
                output
            );
        }
    }

    Ok(())
}

fn cmd_train(config: &PipelineConfig, weights: Option<PathBuf>, random_backbone: bool) -> Result<()> {
    config.validate()?;

    let alpha = config.model.width_multiplier;
    let provider: Box<dyn BackboneProvider<TrainingBackend>> = match (weights, random_backbone) {
        (Some(path), _) => Box::new(PretrainedMobileNetV2::new(path, alpha)),
        (None, true) => Box::new(RandomMobileNetV2::new(alpha)),
        (None, false) => bail!("Backbone weights required: pass --weights <file> or --random-backbone"),
    };

    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Dataset:        {:?}", config.data.base_dir);
    println!("  Backbone:       {}", provider.name());
    println!("  Backend:        {}", backend_name());
    println!("  Image size:     {}", config.data.image_size);
    println!("  Epochs:         {}", config.training.epochs);
    println!("  Batch size:     {}", config.training.batch_size);
    println!("  Learning rate:  {}", config.model.learning_rate);
    println!("  Output:         {:?}", config.training.output_dir);

    let device = default_device();
    let report = run_pipeline::<TrainingBackend>(config, provider.as_ref(), &device)?;

    info!("Report written to {:?}", config.training.output_dir);
    if report.warnings.is_empty() {
        println!("{}", "Run completed without warnings".green());
    }
    Ok(())
}

fn cmd_inspect(path: &Path) -> Result<()> {
    let report = inspect_image(path).with_context(|| format!("Failed to inspect {:?}", path))?;
    println!("{}", report);
    Ok(())
}

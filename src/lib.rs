//! # ROI Classifier
//!
//! Transfer-learning image classification on annotated regions of interest,
//! built on the Burn framework.
//!
//! Every training image lives in a class folder next to a Pascal VOC
//! annotation. The annotated box is cropped, resized and normalized, fed
//! through a frozen MobileNetV2 backbone, and only a small classification
//! head is trained.
//!
//! ## Modules
//!
//! - `config`: The immutable run configuration
//! - `dataset`: Annotation parsing, image ingestion, class index and splitting
//! - `model`: Backbone providers, classifier head and model factory
//! - `training`: Fit loop, observers (early stopping, checkpointing), reports
//! - `pipeline`: load -> split -> build -> train -> evaluate -> persist
//! - `inspect`: Single-image metadata and depth-indicator report
//! - `utils`: Errors, logging and formatting helpers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use roi_classifier::backend::{default_device, TrainingBackend};
//! use roi_classifier::model::RandomMobileNetV2;
//! use roi_classifier::{run_pipeline, PipelineConfig};
//!
//! let config = PipelineConfig::for_directory("data/boxes");
//! let provider = RandomMobileNetV2::new(1.0);
//! let report = run_pipeline::<TrainingBackend>(&config, &provider, &default_device())?;
//! println!("{:?}", report.termination);
//! ```

pub mod backend;
pub mod config;
pub mod dataset;
pub mod inspect;
pub mod model;
pub mod pipeline;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::{ImageSize, PipelineConfig};
pub use dataset::{CategoryIndex, DatasetBuilder, ImageDataset, SplitPlanner, SplitResult};
pub use model::{BackboneProvider, ModelFactory, TransferClassifier};
pub use pipeline::run_pipeline;
pub use training::{TrainingOrchestrator, TrainingReport};
pub use utils::error::{PipelineError, PipelineWarning, Result, SampleError};

/// Default network input side in pixels
pub const DEFAULT_IMAGE_SIZE: u32 = 224;

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

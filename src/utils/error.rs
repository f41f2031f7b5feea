//! Error Handling Module
//!
//! Two layers of failure exist in the pipeline:
//! - [`SampleError`]: something is wrong with one image or its annotation.
//!   The dataset builder logs it and skips the sample.
//! - [`PipelineError`]: the run itself cannot continue (empty dataset, empty
//!   training split, missing backbone weights, unwritable artifacts, ...).
//!
//! Non-fatal conditions that still deserve attention are reported as
//! [`PipelineWarning`] values.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-sample failure. Recoverable: the sample is skipped.
#[derive(Error, Debug)]
pub enum SampleError {
    /// No companion annotation file next to the image
    #[error("annotation file '{annotation}' not found for image '{image}'")]
    MissingAnnotation { annotation: PathBuf, image: PathBuf },

    /// Annotation file exists but could not be read
    #[error("failed to read annotation '{path}': {source}")]
    AnnotationIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Annotation document is not well-formed
    #[error("could not parse annotation '{path}': {reason}")]
    MalformedAnnotation { path: PathBuf, reason: String },

    /// No `<object>` element under the document root
    #[error("annotation '{path}' has no <object> element")]
    MissingObject { path: PathBuf },

    /// More than one `<object>` element under the document root
    #[error("annotation '{path}' has {count} <object> elements, expected exactly one")]
    MultipleObjects { path: PathBuf, count: usize },

    /// `<object>` without a `<bndbox>`
    #[error("annotation '{path}' has no <bndbox> inside <object>")]
    MissingBoundingBox { path: PathBuf },

    /// One of xmin/ymin/xmax/ymax is absent
    #[error("annotation '{path}' is missing coordinate <{field}>")]
    MissingCoordinate { path: PathBuf, field: &'static str },

    /// A coordinate is present but is not an integer
    #[error("annotation '{path}' has non-integer <{field}>: '{value}'")]
    NonIntegerCoordinate {
        path: PathBuf,
        field: &'static str,
        value: String,
    },

    /// `xmin >= xmax` or `ymin >= ymax`
    #[error("annotation '{path}' describes an empty box ({xmin}, {ymin}, {xmax}, {ymax})")]
    DegenerateBox {
        path: PathBuf,
        xmin: i64,
        ymin: i64,
        xmax: i64,
        ymax: i64,
    },

    /// Box reaches outside the image it belongs to
    #[error(
        "crop ({xmin}, {ymin}, {xmax}, {ymax}) lies outside image '{image}' of size {width}x{height}"
    )]
    OutOfBounds {
        image: PathBuf,
        xmin: i64,
        ymin: i64,
        xmax: i64,
        ymax: i64,
        width: u32,
        height: u32,
    },

    /// Image missing, unreadable, or corrupt
    #[error("failed to load image '{path}': {source}")]
    UnreadableImage {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

impl SampleError {
    /// Short machine-friendly tag, used in skip summaries
    pub fn kind(&self) -> &'static str {
        match self {
            SampleError::MissingAnnotation { .. } => "missing_annotation",
            SampleError::AnnotationIo { .. } => "annotation_io",
            SampleError::MalformedAnnotation { .. } => "malformed_annotation",
            SampleError::MissingObject { .. } => "missing_object",
            SampleError::MultipleObjects { .. } => "multiple_objects",
            SampleError::MissingBoundingBox { .. } => "missing_bndbox",
            SampleError::MissingCoordinate { .. } => "missing_coordinate",
            SampleError::NonIntegerCoordinate { .. } => "non_integer_coordinate",
            SampleError::DegenerateBox { .. } => "degenerate_box",
            SampleError::OutOfBounds { .. } => "out_of_bounds",
            SampleError::UnreadableImage { .. } => "unreadable_image",
        }
    }
}

/// Run-level failure. Fatal: the pipeline stops and nothing further is written.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Base directory missing
    #[error("Dataset directory does not exist: {0}")]
    DatasetNotFound(PathBuf),

    /// Base directory contains no class folders
    #[error("No class folders found in '{0}'")]
    NoClasses(PathBuf),

    /// Every sample was skipped
    #[error("No samples were loaded from '{base_dir}' ({skipped} skipped); check paths, image formats and annotations")]
    DatasetEmpty { base_dir: PathBuf, skipped: usize },

    /// Category index built from zero labels
    #[error("Cannot build a category index without class labels")]
    EmptyCategoryIndex,

    /// Splitting left nothing to train on
    #[error("No training samples left after splitting {total} samples with validation fraction {fraction}")]
    EmptyTrainingSplit { total: usize, fraction: f64 },

    /// Backbone could not be constructed (weights missing or incompatible)
    #[error("Backbone unavailable: {0}")]
    Backbone(String),

    /// Model artifact could not be written
    #[error("Failed to persist model to '{path}': {reason}")]
    Persistence { path: PathBuf, reason: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error raised while training
    #[error("Training error: {0}")]
    Training(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

/// Convenience Result type for pipeline operations
///
/// The error parameter defaults to [`PipelineError`] but stays overridable,
/// so derive macros that spell out `Result<T, E>` still resolve.
pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

/// Conditions that let the run continue but make its outcome questionable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineWarning {
    /// Fewer than two classes remain; a softmax over one class always predicts it
    DegenerateClasses { num_classes: usize },
    /// A class folder produced no usable samples
    EmptyClass { label: String, retained: bool },
    /// Validation subset is empty; validation-driven observers are disabled
    ValidationAbsent,
}

impl std::fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineWarning::DegenerateClasses { num_classes } => write!(
                f,
                "only {} class(es) available; training a classifier needs at least two distinct classes",
                num_classes
            ),
            PipelineWarning::EmptyClass { label, retained } => write!(
                f,
                "class '{}' has no usable samples ({})",
                label,
                if *retained { "kept in class index" } else { "dropped from class index" }
            ),
            PipelineWarning::ValidationAbsent => write!(
                f,
                "no validation samples after splitting; early stopping and checkpointing are disabled"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::Config("batch_size must be > 0".to_string());
        assert_eq!(format!("{}", err), "Configuration error: batch_size must be > 0");
    }

    #[test]
    fn test_missing_annotation_mentions_both_paths() {
        let err = SampleError::MissingAnnotation {
            annotation: PathBuf::from("cats/img1.xml"),
            image: PathBuf::from("cats/img1.jpg"),
        };
        let msg = err.to_string();
        assert!(msg.contains("img1.xml"));
        assert!(msg.contains("img1.jpg"));
        assert_eq!(err.kind(), "missing_annotation");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: PipelineError = io_err.into();
        assert!(matches!(err, PipelineError::Io(_)));
    }

    #[test]
    fn test_warning_display() {
        let warning = PipelineWarning::EmptyClass {
            label: "dogs".to_string(),
            retained: false,
        };
        assert!(warning.to_string().contains("dropped"));
    }
}

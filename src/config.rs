//! Pipeline Configuration
//!
//! A single immutable [`PipelineConfig`] value is built once (defaults, JSON
//! file, CLI overrides) and handed by reference to the dataset builder, the
//! model factory and the training orchestrator.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::utils::error::{PipelineError, Result};

/// Smallest input side the backbone accepts (five stride-2 stages)
pub const MIN_IMAGE_SIDE: u32 = 32;

/// Target input resolution of the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    /// Square size
    pub fn square(side: u32) -> Self {
        Self {
            width: side,
            height: side,
        }
    }

    /// Number of f32 values in one HWC tensor of this size
    pub fn num_values(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

impl Default for ImageSize {
    fn default() -> Self {
        Self::square(crate::DEFAULT_IMAGE_SIZE)
    }
}

impl std::fmt::Display for ImageSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// What to do with class folders that yield zero usable samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmptyClassPolicy {
    /// Remove the class from the category index (output layer shrinks)
    Drop,
    /// Keep the class; its output unit never sees a positive example
    Keep,
}

/// Dataset discovery and preprocessing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Directory containing one sub-folder per class
    pub base_dir: PathBuf,
    /// Network input resolution
    pub image_size: ImageSize,
    /// Recognised image extensions (lower-case, without dot)
    pub image_extensions: Vec<String>,
    /// Extension of the companion annotation file
    pub annotation_extension: String,
    /// Handling of classes without samples
    pub empty_class_policy: EmptyClassPolicy,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("dir"),
            image_size: ImageSize::default(),
            image_extensions: ["png", "jpg", "jpeg", "bmp", "gif"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            annotation_extension: "xml".to_string(),
            empty_class_policy: EmptyClassPolicy::Drop,
        }
    }
}

impl DataConfig {
    /// Whether `path` carries one of the recognised image extensions
    pub fn is_image(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| ext.to_string_lossy().to_lowercase())
            .map(|ext| self.image_extensions.iter().any(|known| *known == ext))
            .unwrap_or(false)
    }

    /// Expected annotation path for an image (same folder, same stem)
    pub fn annotation_path_for(&self, image_path: &Path) -> PathBuf {
        image_path.with_extension(&self.annotation_extension)
    }
}

/// Train/validation split settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Fraction of samples held out for validation
    pub validation_fraction: f64,
    /// Random seed for reproducibility
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            validation_fraction: 0.2,
            seed: 42,
        }
    }
}

/// Classifier head and optimizer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Units of the dense hidden layer
    pub hidden_units: usize,
    /// Dropout rate after the hidden layer
    pub dropout: f64,
    /// Adam learning rate
    pub learning_rate: f64,
    /// Backbone channel width multiplier (1.0 = standard MobileNetV2)
    pub width_multiplier: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            hidden_units: 1024,
            dropout: 0.5,
            learning_rate: 0.001,
            width_multiplier: 1.0,
        }
    }
}

/// Fit loop, callback and artifact settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Epoch budget
    pub epochs: usize,
    /// Mini-batch size
    pub batch_size: usize,
    /// Early-stopping patience in epochs
    pub patience: usize,
    /// Directory receiving all artifacts
    pub output_dir: PathBuf,
    /// File stem of the best-by-validation-loss checkpoint
    pub best_model_name: String,
    /// File stem of the end-of-training snapshot
    pub final_model_name: String,
    /// Seed for per-epoch shuffling of the training order
    pub shuffle_seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 100,
            batch_size: 32,
            patience: 10,
            output_dir: PathBuf::from("output"),
            best_model_name: "best_image_classifier_model".to_string(),
            final_model_name: "final_image_classifier_model".to_string(),
            shuffle_seed: 42,
        }
    }
}

impl TrainingConfig {
    /// Path (without extension) of the best checkpoint
    pub fn best_model_path(&self) -> PathBuf {
        self.output_dir.join(&self.best_model_name)
    }

    /// Path (without extension) of the final snapshot
    pub fn final_model_path(&self) -> PathBuf {
        self.output_dir.join(&self.final_model_name)
    }
}

/// Complete configuration of one training run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub data: DataConfig,
    pub split: SplitConfig,
    pub model: ModelConfig,
    pub training: TrainingConfig,
}

impl PipelineConfig {
    /// Default configuration rooted at `base_dir`
    pub fn for_directory<P: AsRef<Path>>(base_dir: P) -> Self {
        let mut config = Self::default();
        config.data.base_dir = base_dir.as_ref().to_path_buf();
        config
    }

    /// Validate all sections
    pub fn validate(&self) -> Result<()> {
        let size = self.data.image_size;
        if size.width < MIN_IMAGE_SIDE || size.height < MIN_IMAGE_SIDE {
            return Err(PipelineError::Config(format!(
                "image_size must be at least {0}x{0}, got {1}",
                MIN_IMAGE_SIDE, size
            )));
        }

        if self.data.image_extensions.is_empty() {
            return Err(PipelineError::Config(
                "image_extensions must not be empty".to_string(),
            ));
        }

        let fraction = self.split.validation_fraction;
        if !(0.0..1.0).contains(&fraction) {
            return Err(PipelineError::Config(format!(
                "validation_fraction must be in [0.0, 1.0), got {}",
                fraction
            )));
        }

        if !(0.0..1.0).contains(&self.model.dropout) {
            return Err(PipelineError::Config(format!(
                "dropout must be in [0.0, 1.0), got {}",
                self.model.dropout
            )));
        }

        if self.model.hidden_units == 0 {
            return Err(PipelineError::Config(
                "hidden_units must be greater than 0".to_string(),
            ));
        }

        if self.model.learning_rate <= 0.0 {
            return Err(PipelineError::Config(format!(
                "learning_rate must be positive, got {}",
                self.model.learning_rate
            )));
        }

        if self.model.width_multiplier <= 0.0 {
            return Err(PipelineError::Config(format!(
                "width_multiplier must be positive, got {}",
                self.model.width_multiplier
            )));
        }

        if self.training.batch_size == 0 {
            return Err(PipelineError::Config(
                "batch_size must be greater than 0".to_string(),
            ));
        }

        if self.training.epochs == 0 {
            return Err(PipelineError::Config(
                "epochs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.data.image_size, ImageSize::square(224));
        assert_eq!(config.split.seed, 42);
        assert_eq!(config.split.validation_fraction, 0.2);
        assert_eq!(config.training.batch_size, 32);
        assert_eq!(config.training.epochs, 100);
        assert_eq!(config.training.patience, 10);
        assert_eq!(config.model.hidden_units, 1024);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_fraction_bounds() {
        let mut config = PipelineConfig::default();
        config.split.validation_fraction = 1.0;
        assert!(config.validate().is_err());

        config.split.validation_fraction = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_image_size_too_small() {
        let mut config = PipelineConfig::default();
        config.data.image_size = ImageSize::square(16);
        assert!(matches!(config.validate(), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_is_image_case_insensitive() {
        let data = DataConfig::default();
        assert!(data.is_image(Path::new("a/b/IMG_01.JPG")));
        assert!(data.is_image(Path::new("a/b/scan.png")));
        assert!(!data.is_image(Path::new("a/b/scan.xml")));
        assert!(!data.is_image(Path::new("a/b/README")));
    }

    #[test]
    fn test_annotation_path_for() {
        let data = DataConfig::default();
        assert_eq!(
            data.annotation_path_for(Path::new("cats/img1.jpg")),
            PathBuf::from("cats/img1.xml")
        );
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = PipelineConfig::for_directory("data/boxes");
        config.training.epochs = 7;
        config.save(&path).unwrap();

        let loaded = PipelineConfig::load(&path).unwrap();
        assert_eq!(loaded.training.epochs, 7);
        assert_eq!(loaded.data.base_dir, PathBuf::from("data/boxes"));
    }
}

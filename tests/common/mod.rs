#![allow(dead_code)]

use std::path::Path;

use roi_classifier::config::{ImageSize, PipelineConfig};
use roi_classifier::dataset::synthetic::{write_demo_dataset, DemoSpec};
use roi_classifier::model::RandomMobileNetV2;

/// Small enough to train in seconds on the CPU backend
pub fn tiny_config(data_dir: &Path, output_dir: &Path) -> PipelineConfig {
    let mut config = PipelineConfig::for_directory(data_dir);
    config.data.image_size = ImageSize::square(32);
    config.model.hidden_units = 16;
    config.model.width_multiplier = 0.35;
    config.training.epochs = 2;
    config.training.batch_size = 4;
    config.training.output_dir = output_dir.to_path_buf();
    config
}

pub fn provider() -> RandomMobileNetV2 {
    RandomMobileNetV2::new(0.35)
}

pub fn demo(dir: &Path, classes: &[&str], per_class: usize) {
    write_demo_dataset(dir, &DemoSpec::new(classes, per_class)).unwrap();
}

//! Model module for the transfer-learning classifier
//!
//! This module provides:
//! - A MobileNetV2 feature extractor and providers for it (pretrained or random)
//! - The trainable classification head and the combined model
//! - The model factory fixing optimizer and loss
//! - Snapshot saving and loading

pub mod backbone;
pub mod classifier;

// Re-export main types for convenience
pub use backbone::{
    BackboneProvider, InputShape, MobileNetV2, MobileNetV2Config, PretrainedMobileNetV2,
    RandomMobileNetV2,
};
pub use classifier::{
    artifact_path, categorical_cross_entropy, correct_predictions, load_classifier,
    save_classifier, ClassifierConfig, ClassifierHead, CompiledModel, ModelFactory,
    TransferClassifier,
};

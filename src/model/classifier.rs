//! Classification head, full transfer model, and the model factory
//!
//! Architecture:
//! - Frozen MobileNetV2 backbone
//! - Global Average Pooling
//! - Dense hidden layer with ReLU
//! - Dropout
//! - Dense output layer with softmax

use std::path::{Path, PathBuf};

use burn::{
    config::Config,
    module::{AutodiffModule, Module},
    nn::{
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
        Dropout, DropoutConfig, Linear, LinearConfig, Relu,
    },
    optim::AdamConfig,
    record::CompactRecorder,
    tensor::{
        activation::{log_softmax, softmax},
        backend::{AutodiffBackend, Backend},
        ElementConversion, Tensor,
    },
};
use tracing::info;

use super::backbone::{BackboneProvider, InputShape, MobileNetV2, MobileNetV2Config};
use crate::config::ModelConfig;
use crate::utils::error::{PipelineError, Result};

/// Adam epsilon used by the reference training setup
pub const ADAM_EPSILON: f32 = 1e-7;

/// Head configuration
#[derive(Config, Debug)]
pub struct ClassifierConfig {
    pub num_classes: usize,

    #[config(default = "1024")]
    pub hidden_units: usize,

    #[config(default = "0.5")]
    pub dropout: f64,
}

impl ClassifierConfig {
    pub fn from_model_config(num_classes: usize, config: &ModelConfig) -> Self {
        Self::new(num_classes)
            .with_hidden_units(config.hidden_units)
            .with_dropout(config.dropout)
    }

    /// Build the head for a backbone emitting `in_features` channels
    pub fn init_head<B: Backend>(&self, in_features: usize, device: &B::Device) -> ClassifierHead<B> {
        ClassifierHead {
            pool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            hidden: LinearConfig::new(in_features, self.hidden_units).init(device),
            activation: Relu::new(),
            dropout: DropoutConfig::new(self.dropout).init(),
            output: LinearConfig::new(self.hidden_units, self.num_classes).init(device),
        }
    }
}

/// Trainable part of the model
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    pool: AdaptiveAvgPool2d,
    hidden: Linear<B>,
    activation: Relu,
    dropout: Dropout,
    output: Linear<B>,
}

impl<B: Backend> ClassifierHead<B> {
    /// Feature map `[N, C, H, W]` to logits `[N, num_classes]`
    pub fn forward(&self, features: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch_size, channels, _, _] = features.dims();
        let x = self.pool.forward(features).reshape([batch_size, channels]);
        let x = self.activation.forward(self.hidden.forward(x));
        let x = self.dropout.forward(x);
        self.output.forward(x)
    }
}

/// Frozen backbone plus trainable head
#[derive(Module, Debug)]
pub struct TransferClassifier<B: Backend> {
    pub backbone: MobileNetV2<B>,
    pub head: ClassifierHead<B>,
    num_classes: usize,
}

impl<B: Backend> TransferClassifier<B> {
    pub fn new(backbone: MobileNetV2<B>, config: &ClassifierConfig, device: &B::Device) -> Self {
        let head = config.init_head(backbone.output_channels(), device);
        Self {
            backbone,
            head,
            num_classes: config.num_classes,
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Unnormalized class scores
    pub fn forward_logits(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.head.forward(self.backbone.forward(images))
    }

    /// Class probabilities; each row sums to 1
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        softmax(self.forward_logits(images), 1)
    }
}

impl<B: AutodiffBackend> TransferClassifier<B> {
    /// Training forward pass.
    ///
    /// `frozen` is this model's backbone on the inner backend (see
    /// [`AutodiffModule::valid`]): features are computed without a graph and
    /// with batch-norm in inference mode, only the head is differentiated.
    pub fn forward_frozen(
        &self,
        frozen: &MobileNetV2<B::InnerBackend>,
        images: Tensor<B::InnerBackend, 4>,
    ) -> Tensor<B, 2> {
        let features = Tensor::from_inner(frozen.forward(images));
        self.head.forward(features)
    }

    /// Inference copy of the frozen backbone
    pub fn frozen_backbone(&self) -> MobileNetV2<B::InnerBackend> {
        self.backbone.valid()
    }
}

/// Mean categorical cross-entropy between logits and one-hot targets
pub fn categorical_cross_entropy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 2>) -> Tensor<B, 1> {
    let per_sample = (log_softmax(logits, 1) * targets).sum_dim(1).neg();
    per_sample.mean()
}

/// Number of rows whose arg-max matches the one-hot target
pub fn correct_predictions<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 2>) -> usize {
    let hits = logits
        .argmax(1)
        .equal(targets.argmax(1))
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>();
    hits.max(0) as usize
}

/// Model ready for training together with its optimizer setup
pub struct CompiledModel<B: Backend> {
    pub model: TransferClassifier<B>,
    pub optimizer: AdamConfig,
    pub learning_rate: f64,
}

// `AdamConfig` does not implement `Debug`, so the derive is spelled out by hand.
impl<B: Backend> std::fmt::Debug for CompiledModel<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledModel")
            .field("model", &self.model)
            .field("learning_rate", &self.learning_rate)
            .finish_non_exhaustive()
    }
}

/// Assembles backbone + head and fixes the optimizer configuration
#[derive(Debug, Clone)]
pub struct ModelFactory {
    config: ModelConfig,
}

impl ModelFactory {
    pub fn new(config: &ModelConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Adam with the learning rate from the config and epsilon 1e-7
    pub fn optimizer(&self) -> AdamConfig {
        AdamConfig::new()
            .with_beta_1(0.9)
            .with_beta_2(0.999)
            .with_epsilon(ADAM_EPSILON)
    }

    pub fn build<B: Backend>(
        &self,
        num_classes: usize,
        shape: InputShape,
        provider: &dyn BackboneProvider<B>,
        device: &B::Device,
    ) -> Result<CompiledModel<B>> {
        if num_classes == 0 {
            return Err(PipelineError::Config(
                "cannot build a classifier with zero classes".to_string(),
            ));
        }

        let backbone = provider.provide(shape, device)?;
        let head_config = ClassifierConfig::from_model_config(num_classes, &self.config);
        let model = TransferClassifier::new(backbone, &head_config, device);

        info!(
            "Built classifier: {} -> pool -> dense({}) -> dropout({}) -> dense({})",
            provider.name(),
            head_config.hidden_units,
            head_config.dropout,
            num_classes
        );
        info!(
            "Trainable head parameters: {}, frozen backbone parameters: {}",
            model.head.num_params(),
            model.backbone.num_params()
        );

        Ok(CompiledModel {
            model,
            optimizer: self.optimizer(),
            learning_rate: self.config.learning_rate,
        })
    }
}

/// File a model snapshot saved under `stem` ends up in
pub fn artifact_path(stem: &Path) -> PathBuf {
    let mut path = stem.to_path_buf();
    path.set_extension("mpk");
    path
}

/// Persist a snapshot, returning the written file
pub fn save_classifier<B: Backend>(model: &TransferClassifier<B>, stem: &Path) -> Result<PathBuf> {
    model
        .clone()
        .save_file(stem.to_path_buf(), &CompactRecorder::new())
        .map_err(|e| PipelineError::Persistence {
            path: artifact_path(stem),
            reason: e.to_string(),
        })?;
    Ok(artifact_path(stem))
}

/// Reload a snapshot written by [`save_classifier`] for inference
pub fn load_classifier<B: Backend>(
    stem: &Path,
    num_classes: usize,
    config: &ModelConfig,
    device: &B::Device,
) -> Result<TransferClassifier<B>> {
    let backbone = MobileNetV2Config::new()
        .with_width_multiplier(config.width_multiplier)
        .init::<B>(device);
    let head_config = ClassifierConfig::from_model_config(num_classes, config);

    TransferClassifier::new(backbone, &head_config, device)
        .load_file(stem.to_path_buf(), &CompactRecorder::new(), device)
        .map_err(|e| PipelineError::Persistence {
            path: artifact_path(stem),
            reason: format!("could not load model: {}", e),
        })
}

//! MobileNetV2 feature extractor and backbone providers
//!
//! The backbone is consumed as a frozen component: a provider hands out an
//! initialized network whose parameters are excluded from gradient tracking,
//! together with the pixel normalization the network was trained with.

use std::path::PathBuf;

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d,
    },
    record::CompactRecorder,
    tensor::{backend::Backend, Tensor},
};
use tracing::{info, warn};

use crate::config::{ImageSize, MIN_IMAGE_SIDE};
use crate::dataset::Normalization;
use crate::utils::error::{PipelineError, Result};

/// Inverted residual settings: expansion t, output channels c, repeats n, first stride s
const INVERTED_RESIDUAL_SETTINGS: [(usize, usize, usize, usize); 7] = [
    (1, 16, 1, 1),
    (6, 24, 2, 2),
    (6, 32, 3, 2),
    (6, 64, 4, 2),
    (6, 96, 3, 1),
    (6, 160, 3, 2),
    (6, 320, 1, 1),
];

const STEM_CHANNELS: usize = 32;
const LAST_CHANNELS: usize = 1280;

/// Round `value` to the nearest multiple of `divisor`, never dropping more than 10%
pub fn make_divisible(value: f64, divisor: usize) -> usize {
    let d = divisor as f64;
    let mut rounded = (((value + d / 2.0) / d).floor() * d).max(d);
    if rounded < 0.9 * value {
        rounded += d;
    }
    rounded as usize
}

/// Input contract of a backbone: NCHW with three channels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputShape {
    pub height: usize,
    pub width: usize,
    pub channels: usize,
}

impl InputShape {
    pub fn rgb(size: ImageSize) -> Self {
        Self {
            height: size.height as usize,
            width: size.width as usize,
            channels: 3,
        }
    }
}

/// Conv -> BatchNorm -> ReLU6
#[derive(Module, Debug)]
pub struct ConvBnRelu6<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> ConvBnRelu6<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        kernel_size: usize,
        stride: usize,
        groups: usize,
        device: &B::Device,
    ) -> Self {
        let padding = kernel_size / 2;
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel_size, kernel_size])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_groups(groups)
            .with_bias(false)
            .init(device);

        Self {
            conv,
            bn: BatchNormConfig::new(out_channels).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        self.bn.forward(x).clamp(0.0, 6.0)
    }
}

/// Expand (1x1) -> depthwise (3x3) -> linear projection (1x1), with a skip
/// connection when input and output shapes match.
#[derive(Module, Debug)]
pub struct InvertedResidual<B: Backend> {
    expand: Option<ConvBnRelu6<B>>,
    depthwise: ConvBnRelu6<B>,
    project: Conv2d<B>,
    project_bn: BatchNorm<B, 2>,
    use_residual: bool,
}

impl<B: Backend> InvertedResidual<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, expansion: usize, device: &B::Device) -> Self {
        let hidden = in_channels * expansion;
        let expand = (expansion != 1).then(|| ConvBnRelu6::new(in_channels, hidden, 1, 1, 1, device));
        let depthwise = ConvBnRelu6::new(hidden, hidden, 3, stride, hidden, device);
        let project = Conv2dConfig::new([hidden, out_channels], [1, 1])
            .with_bias(false)
            .init(device);

        Self {
            expand,
            depthwise,
            project,
            project_bn: BatchNormConfig::new(out_channels).init(device),
            use_residual: stride == 1 && in_channels == out_channels,
        }
    }

    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = match &self.expand {
            Some(expand) => expand.forward(input.clone()),
            None => input.clone(),
        };
        let x = self.depthwise.forward(x);
        let x = self.project_bn.forward(self.project.forward(x));

        if self.use_residual {
            x + input
        } else {
            x
        }
    }
}

/// MobileNetV2 configuration
#[derive(Config, Debug)]
pub struct MobileNetV2Config {
    /// Channel width multiplier (alpha)
    #[config(default = "1.0")]
    pub width_multiplier: f64,
}

impl MobileNetV2Config {
    /// Channels of the final feature map
    pub fn output_channels(&self) -> usize {
        make_divisible(LAST_CHANNELS as f64 * self.width_multiplier.max(1.0), 8)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> MobileNetV2<B> {
        let alpha = self.width_multiplier;
        let mut in_channels = make_divisible(STEM_CHANNELS as f64 * alpha, 8);
        let stem = ConvBnRelu6::new(3, in_channels, 3, 2, 1, device);

        let mut blocks = Vec::new();
        for (expansion, channels, repeats, stride) in INVERTED_RESIDUAL_SETTINGS {
            let out_channels = make_divisible(channels as f64 * alpha, 8);
            for i in 0..repeats {
                let stride = if i == 0 { stride } else { 1 };
                blocks.push(InvertedResidual::new(in_channels, out_channels, stride, expansion, device));
                in_channels = out_channels;
            }
        }

        let out_channels = self.output_channels();
        let head = ConvBnRelu6::new(in_channels, out_channels, 1, 1, 1, device);

        MobileNetV2 {
            stem,
            blocks,
            head,
            out_channels,
        }
    }
}

/// MobileNetV2 without its classifier: image in, `[N, C, H/32, W/32]` features out
#[derive(Module, Debug)]
pub struct MobileNetV2<B: Backend> {
    stem: ConvBnRelu6<B>,
    blocks: Vec<InvertedResidual<B>>,
    head: ConvBnRelu6<B>,
    out_channels: usize,
}

impl<B: Backend> MobileNetV2<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = self.stem.forward(images);
        for block in &self.blocks {
            x = block.forward(x);
        }
        self.head.forward(x)
    }

    pub fn output_channels(&self) -> usize {
        self.out_channels
    }
}

/// Source of a frozen, initialized backbone.
///
/// The pipeline depends only on this trait. A provider must return a network
/// whose parameters do not require gradients, and must declare the input
/// normalization it expects so ingestion can match it exactly.
pub trait BackboneProvider<B: Backend> {
    /// Short human-readable name
    fn name(&self) -> String;

    /// Pixel normalization the backbone was trained with
    fn normalization(&self) -> Normalization;

    /// Build the backbone for inputs of `shape`
    fn provide(&self, shape: InputShape, device: &B::Device) -> Result<MobileNetV2<B>>;
}

fn check_shape(shape: InputShape) -> Result<()> {
    let min = MIN_IMAGE_SIDE as usize;
    if shape.channels != 3 || shape.height < min || shape.width < min {
        return Err(PipelineError::Backbone(format!(
            "MobileNetV2 expects 3-channel inputs of at least {min}x{min}, got {}x{}x{}",
            shape.height, shape.width, shape.channels
        )));
    }
    Ok(())
}

/// MobileNetV2 loaded from a burn record file
#[derive(Debug, Clone)]
pub struct PretrainedMobileNetV2 {
    weights: PathBuf,
    width_multiplier: f64,
}

impl PretrainedMobileNetV2 {
    pub fn new(weights: impl Into<PathBuf>, width_multiplier: f64) -> Self {
        Self {
            weights: weights.into(),
            width_multiplier,
        }
    }
}

impl<B: Backend> BackboneProvider<B> for PretrainedMobileNetV2 {
    fn name(&self) -> String {
        format!("MobileNetV2 (alpha {}, pretrained)", self.width_multiplier)
    }

    fn normalization(&self) -> Normalization {
        Normalization::MobileNet
    }

    fn provide(&self, shape: InputShape, device: &B::Device) -> Result<MobileNetV2<B>> {
        check_shape(shape)?;
        info!("Loading backbone weights from {:?}", self.weights);

        let backbone = MobileNetV2Config::new()
            .with_width_multiplier(self.width_multiplier)
            .init::<B>(device)
            .load_file(self.weights.clone(), &CompactRecorder::new(), device)
            .map_err(|e| {
                PipelineError::Backbone(format!(
                    "could not load weights from {:?}: {}",
                    self.weights, e
                ))
            })?;

        Ok(backbone.no_grad())
    }
}

/// Randomly initialized MobileNetV2, for smoke runs and tests
#[derive(Debug, Clone)]
pub struct RandomMobileNetV2 {
    width_multiplier: f64,
}

impl RandomMobileNetV2 {
    pub fn new(width_multiplier: f64) -> Self {
        Self { width_multiplier }
    }
}

impl<B: Backend> BackboneProvider<B> for RandomMobileNetV2 {
    fn name(&self) -> String {
        format!("MobileNetV2 (alpha {}, random init)", self.width_multiplier)
    }

    fn normalization(&self) -> Normalization {
        Normalization::MobileNet
    }

    fn provide(&self, shape: InputShape, device: &B::Device) -> Result<MobileNetV2<B>> {
        check_shape(shape)?;
        warn!("Backbone is randomly initialized; features are not pretrained");

        Ok(MobileNetV2Config::new()
            .with_width_multiplier(self.width_multiplier)
            .init::<B>(device)
            .no_grad())
    }
}

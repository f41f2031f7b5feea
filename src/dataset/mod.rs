//! Dataset module for annotated region-of-interest images
//!
//! This module provides functionality for:
//! - Parsing per-image VOC bounding-box annotations
//! - Cropping, resizing and normalizing images into fixed-shape tensors
//! - Walking a class-folder tree into an in-memory dataset
//! - Assigning class indices and splitting into train/validation subsets
//!
//! ## Directory Layout
//!
//! ```text
//! base_dir/
//! ├── cats/
//! │   ├── img1.jpg
//! │   └── img1.xml
//! └── dogs/
//!     ├── img7.png
//!     └── img7.xml
//! ```

pub mod annotation;
pub mod batcher;
pub mod builder;
pub mod categories;
pub mod ingest;
pub mod split;
pub mod synthetic;

use std::path::PathBuf;

use burn::data::dataset::Dataset;
use serde::{Deserialize, Serialize};

pub use annotation::{load_annotation, Annotation, CropRegion};
pub use batcher::{ImageBatch, ImageBatcher};
pub use builder::{DatasetBuilder, LoadedDataset, SkippedSample};
pub use categories::CategoryIndex;
pub use ingest::{ImageIngestor, Normalization};
pub use split::{SplitPlanner, SplitResult};

/// Normalized pixel data of one sample in `[height, width, 3]` (HWC) layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageTensor {
    data: Vec<f32>,
    height: usize,
    width: usize,
}

impl ImageTensor {
    /// Wrap raw HWC values. Returns `None` if the length does not match the shape.
    pub fn new(data: Vec<f32>, height: usize, width: usize) -> Option<Self> {
        (data.len() == height * width * 3).then_some(Self {
            data,
            height,
            width,
        })
    }

    pub fn shape(&self) -> [usize; 3] {
        [self.height, self.width, 3]
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }
}

/// One successfully ingested sample
#[derive(Debug, Clone)]
pub struct ImageSample {
    /// Cropped, resized and normalized pixels
    pub tensor: ImageTensor,
    /// Class folder name
    pub label: String,
    /// Image file the tensor was produced from
    pub source: PathBuf,
}

/// Item handed to the batcher
#[derive(Debug, Clone)]
pub struct TrainingItem {
    pub image: ImageTensor,
    /// One-hot target vector
    pub target: Vec<f32>,
}

/// Aligned image tensors and one-hot labels
///
/// Both sequences always have the same length. Order is the insertion order
/// produced by directory traversal.
#[derive(Debug, Clone, Default)]
pub struct ImageDataset {
    images: Vec<ImageTensor>,
    labels: Vec<Vec<f32>>,
    sources: Vec<PathBuf>,
}

impl ImageDataset {
    /// Encode samples against a category index.
    ///
    /// Samples whose label is not part of the index are dropped; with the
    /// builder's output this never happens.
    pub fn from_samples(samples: Vec<ImageSample>, index: &CategoryIndex) -> Self {
        let mut dataset = Self::default();
        for sample in samples {
            match index.one_hot(&sample.label) {
                Some(target) => dataset.push(sample.tensor, target, sample.source),
                None => tracing::warn!(
                    "Label '{}' of {:?} is not in the class index, sample ignored",
                    sample.label,
                    sample.source
                ),
            }
        }
        dataset
    }

    pub(crate) fn push(&mut self, image: ImageTensor, label: Vec<f32>, source: PathBuf) {
        self.images.push(image);
        self.labels.push(label);
        self.sources.push(source);
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn images(&self) -> &[ImageTensor] {
        &self.images
    }

    pub fn labels(&self) -> &[Vec<f32>] {
        &self.labels
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    /// Class index of sample `i` (position of the 1 in its label vector)
    pub fn class_of(&self, i: usize) -> Option<usize> {
        self.labels
            .get(i)
            .and_then(|label| label.iter().position(|&v| v == 1.0))
    }

    /// Shape of the image array, `[n, height, width, 3]`
    pub fn image_shape(&self) -> Option<[usize; 4]> {
        self.images.first().map(|img| {
            let [h, w, c] = img.shape();
            [self.len(), h, w, c]
        })
    }

    /// Shape of the label array, `[n, num_classes]`
    pub fn label_shape(&self) -> Option<[usize; 2]> {
        self.labels.first().map(|label| [self.len(), label.len()])
    }

    /// Split into two datasets by position, consuming `self`.
    ///
    /// `in_first[i]` decides where sample `i` goes; both outputs keep the
    /// original relative order.
    pub fn partition(self, in_first: &[bool]) -> (Self, Self) {
        let mut first = Self::default();
        let mut second = Self::default();

        let samples = self
            .images
            .into_iter()
            .zip(self.labels)
            .zip(self.sources)
            .enumerate();

        for (i, ((image, label), source)) in samples {
            if in_first.get(i).copied().unwrap_or(false) {
                first.push(image, label, source);
            } else {
                second.push(image, label, source);
            }
        }

        (first, second)
    }
}

impl Dataset<TrainingItem> for ImageDataset {
    fn get(&self, index: usize) -> Option<TrainingItem> {
        Some(TrainingItem {
            image: self.images.get(index)?.clone(),
            target: self.labels.get(index)?.clone(),
        })
    }

    fn len(&self) -> usize {
        self.images.len()
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;

    /// Dataset with `counts[c]` constant 2x2 images of class `c`, interleaved by class
    pub fn dataset_with_counts(counts: &[usize]) -> ImageDataset {
        let num_classes = counts.len();
        let mut dataset = ImageDataset::default();
        let max = counts.iter().copied().max().unwrap_or(0);
        let mut serial = 0;
        for round in 0..max {
            for (class, &count) in counts.iter().enumerate() {
                if round < count {
                    let mut label = vec![0.0; num_classes];
                    label[class] = 1.0;
                    let image = ImageTensor::new(vec![serial as f32; 12], 2, 2).unwrap();
                    dataset.push(image, label, PathBuf::from(format!("c{class}/{serial}.png")));
                    serial += 1;
                }
            }
        }
        dataset
    }
}

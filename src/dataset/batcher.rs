//! Batching of training items into NCHW tensors

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;

use super::TrainingItem;

/// A batch of images and their one-hot targets
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// Images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// One-hot targets with shape [batch_size, num_classes]
    pub targets: Tensor<B, 2>,
}

/// Stacks items into an [`ImageBatch`].
///
/// Items are stored HWC and already normalized; the batcher only reshapes.
#[derive(Clone, Debug, Default)]
pub struct ImageBatcher;

impl ImageBatcher {
    pub fn new() -> Self {
        Self
    }
}

impl<B: Backend> Batcher<B, TrainingItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<TrainingItem>, device: &B::Device) -> ImageBatch<B> {
        let batch_size = items.len();
        let (height, width) = items
            .first()
            .map(|item| (item.image.height(), item.image.width()))
            .unwrap_or((0, 0));
        let num_classes = items.first().map(|item| item.target.len()).unwrap_or(0);

        let mut pixels = Vec::with_capacity(batch_size * height * width * 3);
        let mut targets = Vec::with_capacity(batch_size * num_classes);
        for item in items {
            targets.extend_from_slice(&item.target);
            pixels.extend(item.image.into_vec());
        }

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(pixels, [batch_size, height, width, 3]),
            device,
        )
        .permute([0, 3, 1, 2]);

        let targets = Tensor::<B, 2>::from_floats(
            TensorData::new(targets, [batch_size, num_classes]),
            device,
        );

        ImageBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ImageTensor;
    use burn::backend::NdArray;

    #[test]
    fn test_batch_layout_is_nchw() {
        // 1x2 image: pixel 0 = (1, 2, 3), pixel 1 = (4, 5, 6)
        let item = TrainingItem {
            image: ImageTensor::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 1, 2).unwrap(),
            target: vec![0.0, 1.0],
        };
        let device = Default::default();
        let batch: ImageBatch<NdArray> = ImageBatcher::new().batch(vec![item.clone(), item], &device);

        assert_eq!(batch.images.dims(), [2, 3, 1, 2]);
        assert_eq!(batch.targets.dims(), [2, 2]);

        let values: Vec<f32> = batch.images.into_data().iter::<f32>().collect();
        // First sample, red channel holds both pixels' first component.
        assert_eq!(&values[0..6], &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }
}

//! Image ingestion: open, crop to the annotated box, resize, normalize

use std::path::Path;

use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageError, ImageReader, RgbImage};
use serde::{Deserialize, Serialize};

use super::annotation::Annotation;
use super::ImageTensor;
use crate::config::ImageSize;
use crate::utils::error::SampleError;

/// Pixel scaling a backbone was pretrained with.
///
/// Applied per channel to the raw `0..=255` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Normalization {
    /// `x / 127.5 - 1`, range `[-1, 1]` (MobileNet family)
    MobileNet,
    /// `(x / 255 - mean) / std` with the ImageNet channel statistics
    ImageNet,
    /// `x / 255`, range `[0, 1]`
    UnitRange,
}

const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

impl Normalization {
    #[inline]
    pub fn apply(&self, channel: usize, value: u8) -> f32 {
        let v = value as f32;
        match self {
            Normalization::MobileNet => v / 127.5 - 1.0,
            Normalization::ImageNet => (v / 255.0 - IMAGENET_MEAN[channel]) / IMAGENET_STD[channel],
            Normalization::UnitRange => v / 255.0,
        }
    }
}

/// Turns an (image, annotation) pair into a fixed-shape normalized tensor
#[derive(Debug, Clone)]
pub struct ImageIngestor {
    size: ImageSize,
    normalization: Normalization,
}

impl ImageIngestor {
    pub fn new(size: ImageSize, normalization: Normalization) -> Self {
        Self {
            size,
            normalization,
        }
    }

    pub fn size(&self) -> ImageSize {
        self.size
    }

    pub fn normalization(&self) -> Normalization {
        self.normalization
    }

    /// Load `path` and produce its tensor.
    ///
    /// The file is opened and decoded inside this call only; the reader is
    /// dropped before any processing starts, on success and on error.
    pub fn ingest(&self, path: &Path, annotation: &Annotation) -> Result<ImageTensor, SampleError> {
        let image = decode(path)?;
        self.process(&image, annotation, path)
    }

    /// Crop, resize and normalize an already decoded image
    pub fn process(
        &self,
        image: &DynamicImage,
        annotation: &Annotation,
        path: &Path,
    ) -> Result<ImageTensor, SampleError> {
        // Indexed, grayscale and alpha images all end up as plain RGB.
        let rgb = image.to_rgb8();
        let region = annotation.crop_region(rgb.width(), rgb.height(), path)?;

        let crop = imageops::crop_imm(&rgb, region.x, region.y, region.width, region.height)
            .to_image();
        let resized = imageops::resize(&crop, self.size.width, self.size.height, FilterType::Lanczos3);

        Ok(self.to_tensor(&resized))
    }

    fn to_tensor(&self, image: &RgbImage) -> ImageTensor {
        let mut data = Vec::with_capacity(self.size.num_values());
        for pixel in image.pixels() {
            for (channel, &value) in pixel.0.iter().enumerate() {
                data.push(self.normalization.apply(channel, value));
            }
        }

        ImageTensor {
            data,
            height: image.height() as usize,
            width: image.width() as usize,
        }
    }
}

fn decode(path: &Path) -> Result<DynamicImage, SampleError> {
    let unreadable = |source: ImageError| SampleError::UnreadableImage {
        path: path.to_path_buf(),
        source,
    };

    ImageReader::open(path)
        .map_err(|e| unreadable(ImageError::IoError(e)))?
        .with_guessed_format()
        .map_err(|e| unreadable(ImageError::IoError(e)))?
        .decode()
        .map_err(unreadable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb};

    fn ingestor(side: u32) -> ImageIngestor {
        ImageIngestor::new(ImageSize::square(side), Normalization::MobileNet)
    }

    #[test]
    fn test_normalization_ranges() {
        assert_eq!(Normalization::MobileNet.apply(0, 0), -1.0);
        assert_eq!(Normalization::MobileNet.apply(0, 255), 1.0);
        assert_eq!(Normalization::UnitRange.apply(2, 255), 1.0);
        let imagenet = Normalization::ImageNet.apply(1, 0);
        assert!((imagenet - (-0.456 / 0.224)).abs() < 1e-5);
    }

    #[test]
    fn test_output_shape_independent_of_input_aspect() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(200, 150, Rgb([10, 20, 30])));
        let annotation = Annotation::new(10, 10, 190, 140).unwrap();

        let tensor = ingestor(32)
            .process(&image, &annotation, Path::new("a.png"))
            .unwrap();
        assert_eq!(tensor.shape(), [32, 32, 3]);
        assert_eq!(tensor.as_slice().len(), 32 * 32 * 3);
    }

    #[test]
    fn test_grayscale_becomes_three_channels() {
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(64, 48, Luma([255])));
        let annotation = Annotation::new(0, 0, 64, 48).unwrap();

        let tensor = ingestor(32)
            .process(&image, &annotation, Path::new("g.png"))
            .unwrap();
        assert_eq!(tensor.shape(), [32, 32, 3]);
        assert!(tensor.as_slice().iter().all(|&v| (v - 1.0).abs() < 1e-4));
    }

    #[test]
    fn test_crop_selects_annotated_region() {
        // Left half black, right half white; crop the right half only.
        let mut rgb = RgbImage::from_pixel(100, 50, Rgb([0, 0, 0]));
        for x in 50..100 {
            for y in 0..50 {
                rgb.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let image = DynamicImage::ImageRgb8(rgb);
        let annotation = Annotation::new(50, 0, 100, 50).unwrap();

        let tensor = ingestor(32)
            .process(&image, &annotation, Path::new("h.png"))
            .unwrap();
        assert!(tensor.as_slice().iter().all(|&v| v > 0.99));
    }

    #[test]
    fn test_out_of_bounds_box_rejected() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(40, 40));
        let annotation = Annotation::new(0, 0, 41, 40).unwrap();

        let err = ingestor(32)
            .process(&image, &annotation, Path::new("o.png"))
            .unwrap_err();
        assert!(matches!(err, SampleError::OutOfBounds { width: 40, .. }));
    }

    #[test]
    fn test_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"definitely not a png").unwrap();

        let annotation = Annotation::new(0, 0, 10, 10).unwrap();
        let err = ingestor(32).ingest(&path, &annotation).unwrap_err();
        assert!(matches!(err, SampleError::UnreadableImage { .. }));

        let missing = dir.path().join("missing.png");
        let err = ingestor(32).ingest(&missing, &annotation).unwrap_err();
        assert!(matches!(err, SampleError::UnreadableImage { .. }));
    }
}

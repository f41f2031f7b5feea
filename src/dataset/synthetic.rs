//! Demo dataset generation
//!
//! Writes solid-colour images with matching VOC annotations, one folder per
//! class. Used by the `demo-data` subcommand and by the tests.

use std::path::Path;

use image::{Rgb, RgbImage};
use tracing::info;

use super::annotation::{to_voc_xml, Annotation};
use crate::utils::error::{PipelineError, Result};

const PALETTE: [[u8; 3]; 6] = [
    [220, 40, 40],
    [40, 180, 60],
    [40, 70, 220],
    [230, 200, 40],
    [150, 50, 200],
    [40, 200, 200],
];

/// What to generate
#[derive(Debug, Clone)]
pub struct DemoSpec {
    pub classes: Vec<String>,
    pub images_per_class: usize,
    pub width: u32,
    pub height: u32,
    /// Box written to every annotation
    pub bbox: (i64, i64, i64, i64),
}

impl DemoSpec {
    /// 200x150 images with the box (10, 10, 190, 140)
    pub fn new(classes: &[&str], images_per_class: usize) -> Self {
        Self {
            classes: classes.iter().map(|c| c.to_string()).collect(),
            images_per_class,
            width: 200,
            height: 150,
            bbox: (10, 10, 190, 140),
        }
    }
}

/// File stem of the `i`-th generated image
pub fn demo_stem(i: usize) -> String {
    format!("img_{:03}", i)
}

/// Generate the dataset under `base_dir`, returning the number of images written
pub fn write_demo_dataset(base_dir: &Path, spec: &DemoSpec) -> Result<usize> {
    let (xmin, ymin, xmax, ymax) = spec.bbox;
    let annotation = Annotation::new(xmin, ymin, xmax, ymax).ok_or_else(|| {
        PipelineError::Config(format!("demo bounding box {:?} is empty", spec.bbox))
    })?;

    let mut written = 0;
    for (class_idx, class) in spec.classes.iter().enumerate() {
        let class_dir = base_dir.join(class);
        std::fs::create_dir_all(&class_dir)?;

        let base = PALETTE[class_idx % PALETTE.len()];
        for i in 0..spec.images_per_class {
            // Small per-image shift keeps samples distinct.
            let shade = (i % 16) as u8 * 2;
            let color = Rgb([
                base[0].saturating_sub(shade),
                base[1].saturating_sub(shade),
                base[2].saturating_sub(shade),
            ]);

            let stem = demo_stem(i);
            let image_name = format!("{stem}.png");
            RgbImage::from_pixel(spec.width, spec.height, color)
                .save(class_dir.join(&image_name))
                .map_err(|e| PipelineError::Io(std::io::Error::other(e)))?;

            let xml = to_voc_xml(&image_name, class, spec.width, spec.height, &annotation);
            std::fs::write(class_dir.join(format!("{stem}.xml")), xml)?;
            written += 1;
        }
    }

    info!(
        "Wrote {} demo images in {} classes to {:?}",
        written,
        spec.classes.len(),
        base_dir
    );
    Ok(written)
}

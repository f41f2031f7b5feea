//! Class-folder traversal
//!
//! Walks `base_dir/<class>/<image>` in sorted order, pairs every image with
//! its annotation, and ingests it. A bad sample is logged and recorded as
//! skipped; it never aborts the load.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::annotation::load_annotation;
use super::ingest::{ImageIngestor, Normalization};
use super::{ImageSample, ImageTensor};
use crate::config::{DataConfig, EmptyClassPolicy};
use crate::utils::error::{PipelineError, PipelineWarning, Result, SampleError};

/// A file that was found but could not be turned into a sample
#[derive(Debug, Clone, Serialize)]
pub struct SkippedSample {
    pub path: PathBuf,
    pub label: String,
    pub kind: String,
    pub reason: String,
}

/// Output of [`DatasetBuilder::load`]
#[derive(Debug, Clone, Default)]
pub struct LoadedDataset {
    /// Successfully ingested samples in traversal order
    pub samples: Vec<ImageSample>,
    /// Every class folder found, sorted, including empty ones
    pub class_labels: Vec<String>,
    /// Loaded samples per class folder
    pub class_counts: BTreeMap<String, usize>,
    pub skipped: Vec<SkippedSample>,
}

impl LoadedDataset {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Class folders that produced no samples
    pub fn empty_classes(&self) -> Vec<String> {
        self.class_labels
            .iter()
            .filter(|label| self.class_counts.get(*label).copied().unwrap_or(0) == 0)
            .cloned()
            .collect()
    }

    /// Labels that go into the category index under `policy`, plus one
    /// warning per empty class.
    pub fn labels_for_index(&self, policy: EmptyClassPolicy) -> (Vec<String>, Vec<PipelineWarning>) {
        let empty = self.empty_classes();
        let retained = policy == EmptyClassPolicy::Keep;

        let warnings = empty
            .iter()
            .map(|label| PipelineWarning::EmptyClass {
                label: label.clone(),
                retained,
            })
            .collect();

        let labels = if retained {
            self.class_labels.clone()
        } else {
            self.class_labels
                .iter()
                .filter(|label| !empty.contains(label))
                .cloned()
                .collect()
        };

        (labels, warnings)
    }

    /// Shape of one sample tensor
    pub fn sample_shape(&self) -> Option<[usize; 3]> {
        self.samples.first().map(|s| s.tensor.shape())
    }
}

/// Loads the whole class-folder tree into memory
pub struct DatasetBuilder<'a> {
    config: &'a DataConfig,
    ingestor: ImageIngestor,
    show_progress: bool,
}

impl<'a> DatasetBuilder<'a> {
    /// `normalization` must be the one the chosen backbone expects
    pub fn new(config: &'a DataConfig, normalization: Normalization) -> Self {
        Self {
            config,
            ingestor: ImageIngestor::new(config.image_size, normalization),
            show_progress: false,
        }
    }

    /// Draw an `indicatif` progress bar while ingesting
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Sorted class folder names under the base directory
    pub fn discover_classes(&self) -> Result<Vec<String>> {
        let base_dir = &self.config.base_dir;
        if !base_dir.is_dir() {
            return Err(PipelineError::DatasetNotFound(base_dir.clone()));
        }

        let mut classes = Vec::new();
        let entries = WalkDir::new(base_dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name();
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry in {:?}: {}", base_dir, e);
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            match entry.file_name().to_str() {
                Some(name) => classes.push(name.to_string()),
                None => warn!("Skipping class folder with a non UTF-8 name: {:?}", entry.path()),
            }
        }
        classes.sort();

        if classes.is_empty() {
            return Err(PipelineError::NoClasses(base_dir.clone()));
        }
        Ok(classes)
    }

    /// Image files of one class folder, sorted by file name
    fn class_images(&self, class_dir: &Path) -> Vec<PathBuf> {
        WalkDir::new(class_dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|path| self.config.is_image(path))
            .collect()
    }

    /// Annotation + ingestion for one image
    pub fn load_sample(&self, image_path: &Path) -> std::result::Result<ImageTensor, SampleError> {
        let annotation_path = self.config.annotation_path_for(image_path);
        let annotation = load_annotation(&annotation_path, image_path)?;
        self.ingestor.ingest(image_path, &annotation)
    }

    pub fn load(&self) -> Result<LoadedDataset> {
        info!("Loading dataset from: {:?}", self.config.base_dir);

        let class_labels = self.discover_classes()?;
        info!("Found {} class folders", class_labels.len());

        let listing: Vec<(String, Vec<PathBuf>)> = class_labels
            .iter()
            .map(|label| {
                let images = self.class_images(&self.config.base_dir.join(label));
                (label.clone(), images)
            })
            .collect();
        let total: usize = listing.iter().map(|(_, images)| images.len()).sum();

        let progress = self.progress_bar(total as u64);
        let mut loaded = LoadedDataset {
            class_labels,
            ..Default::default()
        };

        for (label, images) in listing {
            let mut count = 0usize;
            for image_path in images {
                match self.load_sample(&image_path) {
                    Ok(tensor) => {
                        loaded.samples.push(ImageSample {
                            tensor,
                            label: label.clone(),
                            source: image_path,
                        });
                        count += 1;
                    }
                    Err(e) => {
                        warn!("Skipping {:?}: {}", image_path, e);
                        loaded.skipped.push(SkippedSample {
                            path: image_path,
                            label: label.clone(),
                            kind: e.kind().to_string(),
                            reason: e.to_string(),
                        });
                    }
                }
                progress.inc(1);
            }

            debug!("Class '{}': {} samples loaded", label, count);
            loaded.class_counts.insert(label, count);
        }

        progress.finish_and_clear();
        info!(
            "Loaded {} samples ({} skipped)",
            loaded.samples.len(),
            loaded.skipped.len()
        );

        Ok(loaded)
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let bar = ProgressBar::new(len);
        let style = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} images ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        bar.set_style(style);
        bar
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImageSize;
    use crate::dataset::synthetic::{write_demo_dataset, DemoSpec};

    fn config_for(dir: &Path) -> DataConfig {
        DataConfig {
            base_dir: dir.to_path_buf(),
            image_size: ImageSize::square(32),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(&dir.path().join("absent"));
        let builder = DatasetBuilder::new(&config, Normalization::MobileNet);
        assert!(matches!(builder.load(), Err(PipelineError::DatasetNotFound(_))));
    }

    #[test]
    fn test_no_class_folders() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("stray.jpg"), b"x").unwrap();
        let config = config_for(dir.path());
        let builder = DatasetBuilder::new(&config, Normalization::MobileNet);
        assert!(matches!(builder.load(), Err(PipelineError::NoClasses(_))));
    }

    #[test]
    fn test_loads_in_sorted_order() {
        let dir = tempfile::tempdir().unwrap();
        write_demo_dataset(dir.path(), &DemoSpec::new(&["zeta", "alpha"], 3)).unwrap();

        let config = config_for(dir.path());
        let loaded = DatasetBuilder::new(&config, Normalization::MobileNet)
            .load()
            .unwrap();

        assert_eq!(loaded.class_labels, vec!["alpha", "zeta"]);
        assert_eq!(loaded.len(), 6);
        assert_eq!(loaded.samples[0].label, "alpha");
        assert_eq!(loaded.samples[5].label, "zeta");
        assert_eq!(loaded.sample_shape(), Some([32, 32, 3]));
        assert_eq!(loaded.class_counts["zeta"], 3);
        assert!(loaded.skipped.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_class_folder_is_followed() {
        let data = tempfile::tempdir().unwrap();
        let elsewhere = tempfile::tempdir().unwrap();
        write_demo_dataset(data.path(), &DemoSpec::new(&["local"], 2)).unwrap();
        write_demo_dataset(elsewhere.path(), &DemoSpec::new(&["shared"], 3)).unwrap();
        std::os::unix::fs::symlink(elsewhere.path().join("shared"), data.path().join("linked"))
            .unwrap();

        let config = config_for(data.path());
        let builder = DatasetBuilder::new(&config, Normalization::MobileNet);
        assert_eq!(builder.discover_classes().unwrap(), vec!["linked", "local"]);

        let loaded = builder.load().unwrap();
        assert_eq!(loaded.class_counts["linked"], 3);
        assert_eq!(loaded.len(), 5);
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_class_folder_is_skipped() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        write_demo_dataset(dir.path(), &DemoSpec::new(&["good"], 1)).unwrap();
        let odd = dir.path().join(OsStr::from_bytes(b"bad\xff"));
        if std::fs::create_dir(&odd).is_err() {
            // Filesystem refuses non UTF-8 names; nothing to check.
            return;
        }

        let config = config_for(dir.path());
        let builder = DatasetBuilder::new(&config, Normalization::MobileNet);
        assert_eq!(builder.discover_classes().unwrap(), vec!["good"]);
    }

    #[test]
    fn test_non_image_files_ignored_and_bad_samples_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write_demo_dataset(dir.path(), &DemoSpec::new(&["a"], 2)).unwrap();
        let class_dir = dir.path().join("a");
        std::fs::write(class_dir.join("notes.txt"), b"hello").unwrap();
        std::fs::write(class_dir.join("broken.png"), b"not an image").unwrap();
        std::fs::copy(class_dir.join("img_000.xml"), class_dir.join("broken.xml")).unwrap();

        let config = config_for(dir.path());
        let loaded = DatasetBuilder::new(&config, Normalization::MobileNet)
            .load()
            .unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.skipped.len(), 1);
        assert_eq!(loaded.skipped[0].kind, "unreadable_image");
    }

    #[test]
    fn test_empty_class_policy() {
        let dir = tempfile::tempdir().unwrap();
        write_demo_dataset(dir.path(), &DemoSpec::new(&["a", "b"], 2)).unwrap();
        std::fs::create_dir(dir.path().join("c")).unwrap();

        let config = config_for(dir.path());
        let loaded = DatasetBuilder::new(&config, Normalization::MobileNet)
            .load()
            .unwrap();
        assert_eq!(loaded.empty_classes(), vec!["c"]);

        let (dropped, warnings) = loaded.labels_for_index(EmptyClassPolicy::Drop);
        assert_eq!(dropped, vec!["a", "b"]);
        assert_eq!(
            warnings,
            vec![PipelineWarning::EmptyClass {
                label: "c".into(),
                retained: false
            }]
        );

        let (kept, _) = loaded.labels_for_index(EmptyClassPolicy::Keep);
        assert_eq!(kept, vec!["a", "b", "c"]);
    }
}

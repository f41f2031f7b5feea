//! Single-image diagnostics
//!
//! Reports container format, dimensions, colour type and file size of one
//! image, the capture metadata found in its EXIF block, plus heuristic
//! indicators that the file carries depth data. Only the header is decoded
//! and nothing is written.

use std::fmt;
use std::path::{Path, PathBuf};

use exif::{Exif, In, Tag};
use image::{ColorType, ImageDecoder, ImageError, ImageReader};
use serde::Serialize;
use tracing::debug;

use crate::utils::error::SampleError;

/// Byte sequences that point at embedded depth or disparity data
const DEPTH_MARKERS: [(&[u8], &str); 7] = [
    (b"GDepth", "XMP GDepth namespace (Google depth map)"),
    (b"DepthMap", "DepthMap metadata"),
    (b"aux:depth", "auxiliary depth image (Apple)"),
    (b"aux:disparity", "auxiliary disparity image (Apple)"),
    (b"Disparity", "disparity metadata"),
    (b"depth_map", "depth_map metadata key"),
    (b"MPF\0", "MPF multi-picture container (may hold a depth frame)"),
];

/// EXIF tags reported when present
const CAPTURE_TAGS: [Tag; 9] = [
    Tag::Make,
    Tag::Model,
    Tag::DateTime,
    Tag::Software,
    Tag::LensMake,
    Tag::LensModel,
    Tag::FNumber,
    Tag::ExposureTime,
    Tag::PhotographicSensitivity,
];

/// APP1 payload prefix some decoders leave in front of the TIFF data
const EXIF_HEADER: &[u8] = b"Exif\0\0";

#[derive(Debug, Clone, Serialize)]
pub struct ImageReport {
    pub path: PathBuf,
    pub format: Option<String>,
    pub width: u32,
    pub height: u32,
    pub color_type: String,
    pub file_size: u64,
    pub has_exif: bool,
    /// `(tag, value)` pairs from [`CAPTURE_TAGS`], in that order
    pub capture_metadata: Vec<(String, String)>,
    pub subject_distance_range: Option<String>,
    /// Heuristic hits; non-empty means depth data is likely present
    pub depth_indicators: Vec<String>,
    pub notes: Vec<String>,
}

impl ImageReport {
    pub fn likely_has_depth(&self) -> bool {
        !self.depth_indicators.is_empty()
    }
}

/// Inspect the image at `path`
pub fn inspect_image(path: &Path) -> Result<ImageReport, SampleError> {
    let unreadable = |source: ImageError| SampleError::UnreadableImage {
        path: path.to_path_buf(),
        source,
    };

    let bytes = std::fs::read(path).map_err(|e| unreadable(ImageError::IoError(e)))?;

    let reader = ImageReader::open(path)
        .map_err(|e| unreadable(ImageError::IoError(e)))?
        .with_guessed_format()
        .map_err(|e| unreadable(ImageError::IoError(e)))?;
    let format = reader.format();
    let mut decoder = reader.into_decoder().map_err(unreadable)?;
    let (width, height) = decoder.dimensions();
    let color_type = decoder.color_type();

    let mut depth_indicators = Vec::new();
    let mut notes = Vec::new();
    let mut capture_metadata = Vec::new();
    let mut subject_distance_range = None;

    let raw_exif = decoder.exif_metadata().unwrap_or_else(|e| {
        notes.push(format!("EXIF block could not be extracted: {}", e));
        None
    });
    let has_exif = raw_exif.is_some();

    if let Some(raw) = raw_exif {
        match parse_exif(raw) {
            Ok(exif) => {
                for tag in CAPTURE_TAGS {
                    if let Some(field) = exif.get_field(tag, In::PRIMARY) {
                        capture_metadata.push((
                            tag.to_string(),
                            field.display_value().with_unit(&exif).to_string(),
                        ));
                    }
                }
                subject_distance_range = exif
                    .get_field(Tag::SubjectDistanceRange, In::PRIMARY)
                    .map(|field| field.display_value().to_string());
                for field in exif.fields() {
                    let name = field.tag.to_string();
                    if name.to_lowercase().contains("depth") {
                        depth_indicators.push(format!("EXIF tag '{}'", name));
                    }
                }
            }
            Err(e) => {
                debug!("Unparsable EXIF in {:?}: {}", path, e);
                notes.push(format!("EXIF block present but unreadable: {}", e));
            }
        }
    }

    if matches!(color_type, ColorType::L16 | ColorType::La16) {
        depth_indicators.push("16-bit single-channel pixel data (typical depth map encoding)".to_string());
    }

    for (marker, description) in DEPTH_MARKERS {
        if contains(&bytes, marker) {
            depth_indicators.push(format!("{} ('{}')", description, String::from_utf8_lossy(marker).trim_end_matches('\0')));
        }
    }

    if let Some(fmt) = format {
        if matches!(fmt, image::ImageFormat::Avif) {
            notes.push("AVIF/HEIF containers can store depth as auxiliary images".to_string());
        }
    }
    if depth_indicators.is_empty() {
        notes.push(
            "No direct depth indicators found; proprietary maker notes or sidecar files are not checked"
                .to_string(),
        );
    }

    Ok(ImageReport {
        path: path.to_path_buf(),
        format: format.map(|f| format!("{:?}", f)),
        width,
        height,
        color_type: format!("{:?}", color_type),
        file_size: bytes.len() as u64,
        has_exif,
        capture_metadata,
        subject_distance_range,
        depth_indicators,
        notes,
    })
}

/// Decode a raw EXIF block, with or without the APP1 header
fn parse_exif(raw: Vec<u8>) -> Result<Exif, exif::Error> {
    let tiff = match raw.strip_prefix(EXIF_HEADER) {
        Some(rest) => rest.to_vec(),
        None => raw,
    };
    exif::Reader::new().read_raw(tiff)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|window| window == needle)
}

impl fmt::Display for ImageReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Image: {}", self.path.display())?;
        writeln!(f, "  Format:     {}", self.format.as_deref().unwrap_or("unknown"))?;
        writeln!(f, "  Size:       {} x {}", self.width, self.height)?;
        writeln!(f, "  Color type: {}", self.color_type)?;
        writeln!(f, "  File size:  {} bytes", self.file_size)?;
        writeln!(f, "  EXIF:       {}", if self.has_exif { "present" } else { "none" })?;
        for (tag, value) in &self.capture_metadata {
            writeln!(f, "    {:<24} {}", tag, value)?;
        }
        if let Some(range) = &self.subject_distance_range {
            writeln!(f, "    {:<24} {}", "SubjectDistanceRange", range)?;
        }

        if self.likely_has_depth() {
            writeln!(f, "  Depth data is LIKELY PRESENT:")?;
            for indicator in &self.depth_indicators {
                writeln!(f, "    - {}", indicator)?;
            }
        } else {
            writeln!(f, "  No depth indicators found")?;
        }
        for note in &self.notes {
            writeln!(f, "  Note: {}", note)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma, Rgb, RgbImage};

    #[test]
    fn test_plain_rgb_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blue.png");
        RgbImage::from_pixel(60, 30, Rgb([0, 0, 255])).save(&path).unwrap();

        let report = inspect_image(&path).unwrap();
        assert_eq!(report.format.as_deref(), Some("Png"));
        assert_eq!((report.width, report.height), (60, 30));
        assert_eq!(report.color_type, "Rgb8");
        assert!(!report.likely_has_depth());
        assert!(!report.has_exif);
        assert!(report.capture_metadata.is_empty());
        assert!(report.file_size > 0);
        assert!(report.to_string().contains("60 x 30"));
    }

    /// JPEG whose APP1 block holds a little-endian TIFF with one Make entry
    fn jpeg_with_make(make: &str) -> Vec<u8> {
        let mut jpeg = Vec::new();
        RgbImage::from_pixel(16, 8, Rgb([200, 10, 10]))
            .write_to(&mut std::io::Cursor::new(&mut jpeg), image::ImageFormat::Jpeg)
            .unwrap();

        let mut value = make.as_bytes().to_vec();
        value.push(0);

        let mut tiff = Vec::new();
        tiff.extend_from_slice(b"II*\0");
        tiff.extend_from_slice(&8u32.to_le_bytes());
        tiff.extend_from_slice(&1u16.to_le_bytes());
        tiff.extend_from_slice(&0x010Fu16.to_le_bytes());
        tiff.extend_from_slice(&2u16.to_le_bytes());
        tiff.extend_from_slice(&(value.len() as u32).to_le_bytes());
        tiff.extend_from_slice(&26u32.to_le_bytes());
        tiff.extend_from_slice(&0u32.to_le_bytes());
        tiff.extend_from_slice(&value);

        let mut app1 = vec![0xFF, 0xE1];
        app1.extend_from_slice(&((2 + EXIF_HEADER.len() + tiff.len()) as u16).to_be_bytes());
        app1.extend_from_slice(EXIF_HEADER);
        app1.extend_from_slice(&tiff);

        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&app1);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    #[test]
    fn test_jpeg_exif_make_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("camera.jpg");
        std::fs::write(&path, jpeg_with_make("Acme")).unwrap();

        let report = inspect_image(&path).unwrap();
        assert_eq!(report.format.as_deref(), Some("Jpeg"));
        assert_eq!((report.width, report.height), (16, 8));
        assert!(report.has_exif);

        let make = report
            .capture_metadata
            .iter()
            .find(|(tag, _)| tag == "Make")
            .map(|(_, value)| value.as_str());
        assert!(make.is_some_and(|value| value.contains("Acme")));
        assert!(report.subject_distance_range.is_none());
        assert!(report.to_string().contains("Acme"));
    }

    #[test]
    fn test_parse_exif_accepts_app1_header() {
        let tiff = {
            let jpeg = jpeg_with_make("Acme");
            // SOI (2) + marker (2) + length (2) + "Exif\0\0" (6)
            let start = 12;
            let len = u16::from_be_bytes([jpeg[4], jpeg[5]]) as usize - 8;
            jpeg[start..start + len].to_vec()
        };

        let mut with_header = EXIF_HEADER.to_vec();
        with_header.extend_from_slice(&tiff);

        for raw in [tiff, with_header] {
            let exif = parse_exif(raw).unwrap();
            assert!(exif.get_field(Tag::Make, In::PRIMARY).is_some());
        }
    }

    #[test]
    fn test_sixteen_bit_grayscale_flags_depth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("depth.png");
        ImageBuffer::<Luma<u16>, Vec<u16>>::from_pixel(8, 8, Luma([1000]))
            .save(&path)
            .unwrap();

        let report = inspect_image(&path).unwrap();
        assert!(report.likely_has_depth());
    }

    #[test]
    fn test_embedded_marker_flags_depth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("marked.png");
        RgbImage::new(4, 4).save(&path).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(b"xmlns:GDepth=\"http://ns.google.com/photos/1.0/depthmap/\"");
        std::fs::write(&path, bytes).unwrap();

        let report = inspect_image(&path).unwrap();
        assert!(report.depth_indicators.iter().any(|d| d.contains("GDepth")));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            inspect_image(&dir.path().join("nope.png")),
            Err(SampleError::UnreadableImage { .. })
        ));
    }
}

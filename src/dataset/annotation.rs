//! Bounding-box annotation loading
//!
//! Every image is paired with a Pascal VOC style XML file:
//!
//! ```text
//! <annotation>
//!   <filename>img1.jpg</filename>
//!   <object>
//!     <name>objectA</name>
//!     <bndbox><xmin>10</xmin><ymin>10</ymin><xmax>190</xmax><ymax>140</ymax></bndbox>
//!   </object>
//! </annotation>
//! ```
//!
//! The document is deserialized into typed structs and then validated into an
//! [`Annotation`]. Any deviation is reported as a [`SampleError`]; nothing is
//! defaulted or clamped.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::utils::error::SampleError;

#[derive(Debug, Deserialize)]
struct VocDocument {
    #[serde(rename = "object", default)]
    objects: Vec<VocObject>,
}

#[derive(Debug, Deserialize)]
struct VocObject {
    #[serde(default)]
    bndbox: Option<VocBndBox>,
}

#[derive(Debug, Deserialize)]
struct VocBndBox {
    #[serde(default)]
    xmin: Option<String>,
    #[serde(default)]
    ymin: Option<String>,
    #[serde(default)]
    xmax: Option<String>,
    #[serde(default)]
    ymax: Option<String>,
}

/// Region of interest in pixel coordinates, half-open: `[xmin, xmax) x [ymin, ymax)`.
///
/// Construction guarantees `xmin < xmax` and `ymin < ymax`. Whether the box
/// fits inside its image is only known once the image is opened, see
/// [`Annotation::crop_region`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    xmin: i64,
    ymin: i64,
    xmax: i64,
    ymax: i64,
}

/// A crop rectangle proven to lie inside a concrete image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Annotation {
    /// Build an annotation, rejecting empty or inverted boxes
    pub fn new(xmin: i64, ymin: i64, xmax: i64, ymax: i64) -> Option<Self> {
        if xmin < xmax && ymin < ymax {
            Some(Self {
                xmin,
                ymin,
                xmax,
                ymax,
            })
        } else {
            None
        }
    }

    pub fn xmin(&self) -> i64 {
        self.xmin
    }

    pub fn ymin(&self) -> i64 {
        self.ymin
    }

    pub fn xmax(&self) -> i64 {
        self.xmax
    }

    pub fn ymax(&self) -> i64 {
        self.ymax
    }

    /// Check the box against an image of `width` x `height` pixels.
    pub fn crop_region(
        &self,
        width: u32,
        height: u32,
        image_path: &Path,
    ) -> Result<CropRegion, SampleError> {
        let inside = self.xmin >= 0
            && self.ymin >= 0
            && self.xmax <= i64::from(width)
            && self.ymax <= i64::from(height);

        if !inside {
            return Err(SampleError::OutOfBounds {
                image: image_path.to_path_buf(),
                xmin: self.xmin,
                ymin: self.ymin,
                xmax: self.xmax,
                ymax: self.ymax,
                width,
                height,
            });
        }

        // All four values are within [0, u32::MAX] here.
        Ok(CropRegion {
            x: self.xmin as u32,
            y: self.ymin as u32,
            width: (self.xmax - self.xmin) as u32,
            height: (self.ymax - self.ymin) as u32,
        })
    }
}

impl std::fmt::Display for Annotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {}, {}, {})",
            self.xmin, self.ymin, self.xmax, self.ymax
        )
    }
}

/// Read and validate the annotation at `annotation_path`.
///
/// `image_path` is only used to make error messages point at the sample.
pub fn load_annotation(annotation_path: &Path, image_path: &Path) -> Result<Annotation, SampleError> {
    let text = std::fs::read_to_string(annotation_path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => SampleError::MissingAnnotation {
            annotation: annotation_path.to_path_buf(),
            image: image_path.to_path_buf(),
        },
        _ => SampleError::AnnotationIo {
            path: annotation_path.to_path_buf(),
            source: e,
        },
    })?;

    parse_annotation(&text, annotation_path)
}

/// Parse annotation XML. `path` is used for error reporting.
pub fn parse_annotation(text: &str, path: &Path) -> Result<Annotation, SampleError> {
    let document: VocDocument =
        quick_xml::de::from_str(text).map_err(|e| SampleError::MalformedAnnotation {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

    let object = match document.objects.len() {
        0 => {
            return Err(SampleError::MissingObject {
                path: path.to_path_buf(),
            })
        }
        1 => &document.objects[0],
        count => {
            return Err(SampleError::MultipleObjects {
                path: path.to_path_buf(),
                count,
            })
        }
    };

    let bndbox = object
        .bndbox
        .as_ref()
        .ok_or_else(|| SampleError::MissingBoundingBox {
            path: path.to_path_buf(),
        })?;

    let xmin = coordinate(path, "xmin", bndbox.xmin.as_deref())?;
    let ymin = coordinate(path, "ymin", bndbox.ymin.as_deref())?;
    let xmax = coordinate(path, "xmax", bndbox.xmax.as_deref())?;
    let ymax = coordinate(path, "ymax", bndbox.ymax.as_deref())?;

    Annotation::new(xmin, ymin, xmax, ymax).ok_or_else(|| SampleError::DegenerateBox {
        path: path.to_path_buf(),
        xmin,
        ymin,
        xmax,
        ymax,
    })
}

fn coordinate(path: &Path, field: &'static str, raw: Option<&str>) -> Result<i64, SampleError> {
    let raw = raw.ok_or_else(|| SampleError::MissingCoordinate {
        path: path.to_path_buf(),
        field,
    })?;

    raw.trim()
        .parse::<i64>()
        .map_err(|_| SampleError::NonIntegerCoordinate {
            path: PathBuf::from(path),
            field,
            value: raw.to_string(),
        })
}

/// Render a minimal VOC document for one box
pub fn to_voc_xml(filename: &str, label: &str, width: u32, height: u32, annotation: &Annotation) -> String {
    format!(
        r#"<annotation>
    <filename>{filename}</filename>
    <size><width>{width}</width><height>{height}</height><depth>3</depth></size>
    <segmented>0</segmented>
    <object>
        <name>{label}</name>
        <pose>Unspecified</pose>
        <truncated>0</truncated>
        <difficult>0</difficult>
        <bndbox><xmin>{xmin}</xmin><ymin>{ymin}</ymin><xmax>{xmax}</xmax><ymax>{ymax}</ymax></bndbox>
    </object>
</annotation>
"#,
        xmin = annotation.xmin,
        ymin = annotation.ymin,
        xmax = annotation.xmax,
        ymax = annotation.ymax,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Annotation, SampleError> {
        parse_annotation(text, Path::new("cls/img.xml"))
    }

    #[test]
    fn test_parse_full_voc_document() {
        let box_ = Annotation::new(10, 10, 190, 140).unwrap();
        let xml = to_voc_xml("img.jpg", "objectA", 200, 150, &box_);
        assert_eq!(parse(&xml).unwrap(), box_);
    }

    #[test]
    fn test_parse_tolerates_whitespace_in_coordinates() {
        let xml = "<annotation><object><bndbox>\
                   <xmin> 1 </xmin><ymin>2</ymin><xmax>\n30\n</xmax><ymax>40</ymax>\
                   </bndbox></object></annotation>";
        assert_eq!(parse(xml).unwrap(), Annotation::new(1, 2, 30, 40).unwrap());
    }

    #[test]
    fn test_missing_object() {
        let xml = "<annotation><filename>a.jpg</filename></annotation>";
        assert!(matches!(parse(xml), Err(SampleError::MissingObject { .. })));
    }

    #[test]
    fn test_multiple_objects_rejected() {
        let one = "<object><bndbox><xmin>1</xmin><ymin>1</ymin><xmax>5</xmax><ymax>5</ymax></bndbox></object>";
        let xml = format!("<annotation>{one}{one}</annotation>");
        assert!(matches!(
            parse(&xml),
            Err(SampleError::MultipleObjects { count: 2, .. })
        ));
    }

    #[test]
    fn test_missing_bndbox() {
        let xml = "<annotation><object><name>a</name></object></annotation>";
        assert!(matches!(
            parse(xml),
            Err(SampleError::MissingBoundingBox { .. })
        ));
    }

    #[test]
    fn test_missing_coordinate() {
        let xml = "<annotation><object><bndbox>\
                   <xmin>1</xmin><ymin>2</ymin><xmax>30</xmax>\
                   </bndbox></object></annotation>";
        assert!(matches!(
            parse(xml),
            Err(SampleError::MissingCoordinate { field: "ymax", .. })
        ));
    }

    #[test]
    fn test_non_integer_coordinate() {
        let xml = "<annotation><object><bndbox>\
                   <xmin>1.5</xmin><ymin>2</ymin><xmax>30</xmax><ymax>40</ymax>\
                   </bndbox></object></annotation>";
        match parse(xml) {
            Err(SampleError::NonIntegerCoordinate { field, value, .. }) => {
                assert_eq!(field, "xmin");
                assert_eq!(value, "1.5");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_degenerate_box() {
        let xml = "<annotation><object><bndbox>\
                   <xmin>50</xmin><ymin>2</ymin><xmax>30</xmax><ymax>40</ymax>\
                   </bndbox></object></annotation>";
        assert!(matches!(parse(xml), Err(SampleError::DegenerateBox { .. })));
    }

    #[test]
    fn test_malformed_document() {
        let xml = "<annotation><object></annotation>";
        assert!(matches!(
            parse(xml),
            Err(SampleError::MalformedAnnotation { .. })
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_annotation(&dir.path().join("nope.xml"), &dir.path().join("nope.jpg"))
            .unwrap_err();
        assert!(matches!(err, SampleError::MissingAnnotation { .. }));
    }

    #[test]
    fn test_crop_region_inside() {
        let box_ = Annotation::new(10, 20, 110, 70).unwrap();
        let region = box_.crop_region(200, 150, Path::new("a.jpg")).unwrap();
        assert_eq!(
            region,
            CropRegion {
                x: 10,
                y: 20,
                width: 100,
                height: 50
            }
        );
    }

    #[test]
    fn test_crop_region_touching_edges_is_valid() {
        let box_ = Annotation::new(0, 0, 200, 150).unwrap();
        assert!(box_.crop_region(200, 150, Path::new("a.jpg")).is_ok());
    }

    #[test]
    fn test_crop_region_rejects_instead_of_clamping() {
        let wide = Annotation::new(10, 10, 201, 100).unwrap();
        assert!(matches!(
            wide.crop_region(200, 150, Path::new("a.jpg")),
            Err(SampleError::OutOfBounds { .. })
        ));

        let negative = Annotation::new(-1, 10, 50, 100).unwrap();
        assert!(matches!(
            negative.crop_region(200, 150, Path::new("a.jpg")),
            Err(SampleError::OutOfBounds { .. })
        ));
    }
}

//! Core types, error definitions, and data structures for yolo_dataset.

use crate::encode::ScaleTarget;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("file not found: {path}")]
    NotFound { path: PathBuf },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("manifest error at {path}:{line}: {msg}")]
    Manifest {
        path: PathBuf,
        line: usize,
        msg: String,
    },
    #[error("label error at {path}:{line}: {msg}")]
    Label {
        path: PathBuf,
        line: usize,
        msg: String,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("toml parse error at {path}: {source}")]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("index {index} out of range for dataset of length {len}")]
    IndexOutOfRange { index: usize, len: usize },
}

impl DatasetError {
    /// True for the data-access failures raised when a backing file is absent.
    pub fn is_not_found(&self) -> bool {
        match self {
            DatasetError::NotFound { .. } => true,
            DatasetError::Io { source, .. } => source.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Bounding box in normalized center format, relative to the frame it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct YoloBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub class_id: u32,
}

impl YoloBox {
    pub fn new(x: f32, y: f32, w: f32, h: f32, class_id: u32) -> Self {
        Self {
            x,
            y,
            w,
            h,
            class_id,
        }
    }

    /// Absolute pixel corners `[x1, y1, x2, y2]` in a `width x height` frame shifted by a pad.
    pub fn to_xyxy_px(&self, width: f32, height: f32, pad_x: f32, pad_y: f32) -> [f32; 4] {
        [
            width * (self.x - self.w / 2.0) + pad_x,
            height * (self.y - self.h / 2.0) + pad_y,
            width * (self.x + self.w / 2.0) + pad_x,
            height * (self.y + self.h / 2.0) + pad_y,
        ]
    }

    /// Inverse of [`YoloBox::to_xyxy_px`] without padding.
    pub fn from_xyxy_px(xyxy: [f32; 4], width: f32, height: f32, class_id: u32) -> Self {
        Self {
            x: (xyxy[0] + xyxy[2]) / 2.0 / width,
            y: (xyxy[1] + xyxy[3]) / 2.0 / height,
            w: (xyxy[2] - xyxy[0]) / width,
            h: (xyxy[3] - xyxy[1]) / height,
            class_id,
        }
    }

    pub fn clamp_unit(mut self) -> Self {
        self.x = self.x.clamp(0.0, 1.0);
        self.y = self.y.clamp(0.0, 1.0);
        self.w = self.w.clamp(0.0, 1.0);
        self.h = self.h.clamp(0.0, 1.0);
        self
    }

    /// True when the box has no area or any non-finite field.
    pub fn is_degenerate(&self) -> bool {
        let finite = [self.x, self.y, self.w, self.h].iter().all(|v| v.is_finite());
        !(finite && self.w > 0.0 && self.h > 0.0)
    }
}

/// Payload returned for one dataset index.
#[derive(Debug, Clone)]
pub enum Targets {
    /// Raw box list, returned when target encoding is disabled.
    Boxes(Vec<YoloBox>),
    /// One dense tensor per detection scale, finest-last in config order.
    Encoded(Vec<ScaleTarget>),
}

impl Targets {
    pub fn boxes(&self) -> Option<&[YoloBox]> {
        match self {
            Targets::Boxes(b) => Some(b),
            Targets::Encoded(_) => None,
        }
    }

    pub fn encoded(&self) -> Option<&[ScaleTarget]> {
        match self {
            Targets::Encoded(t) => Some(t),
            Targets::Boxes(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatasetItem {
    pub index: usize,
    pub image: image::RgbImage,
    pub targets: Targets,
}

impl DatasetItem {
    /// Image in CHW layout, scaled to [0, 1] and then standardized per channel.
    pub fn image_chw(&self, mean: [f32; 3], std: [f32; 3]) -> Vec<f32> {
        let (width, height) = self.image.dimensions();
        let plane = (width * height) as usize;
        let mut chw = vec![0.0f32; plane * 3];
        for (x, y, pixel) in self.image.enumerate_pixels() {
            let base = (y * width + x) as usize;
            for c in 0..3 {
                chw[c * plane + base] = (pixel[c] as f32 / 255.0 - mean[c]) / std[c];
            }
        }
        chw
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResizeMode {
    /// Stretch to fill the target dimensions (may distort boxes).
    Force,
    /// Preserve aspect ratio; pad to target with zeros.
    Letterbox,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ManifestSummary {
    pub manifest: PathBuf,
    pub total: usize,
    pub non_empty: usize,
    pub empty: usize,
    pub boxes: usize,
    pub missing_image: usize,
    pub missing_label: usize,
    pub invalid_label: usize,
}

/// Ordered from best to worst so reports can take the maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ValidationOutcome {
    Pass,
    Warn,
    Fail,
}

impl ValidationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationOutcome::Pass => "pass",
            ValidationOutcome::Warn => "warn",
            ValidationOutcome::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidationThresholds {
    pub max_invalid: Option<usize>,
    pub max_missing: Option<usize>,
    pub max_empty: Option<usize>,
    pub max_invalid_ratio: Option<f32>,
    pub max_missing_ratio: Option<f32>,
    pub max_empty_ratio: Option<f32>,
}

impl ValidationThresholds {
    /// Read limits from `YOLO_DATASET_MAX_{MISSING,INVALID,EMPTY}[_RATIO]`; unset or unparsable
    /// variables leave the limit off.
    pub fn from_env() -> Self {
        fn var<T: std::str::FromStr>(suffix: &str) -> Option<T> {
            std::env::var(format!("YOLO_DATASET_MAX_{suffix}"))
                .ok()?
                .trim()
                .parse()
                .ok()
        }
        Self {
            max_missing: var("MISSING"),
            max_invalid: var("INVALID"),
            max_empty: var("EMPTY"),
            max_missing_ratio: var("MISSING_RATIO"),
            max_invalid_ratio: var("INVALID_RATIO"),
            max_empty_ratio: var("EMPTY_RATIO"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub outcome: ValidationOutcome,
    pub reasons: Vec<String>,
    pub summary: ManifestSummary,
}

#[cfg(test)]
mod types_tests {
    use super::YoloBox;

    #[test]
    fn xyxy_round_trip_preserves_box() {
        let b = YoloBox::new(0.4, 0.6, 0.2, 0.1, 3);
        let px = b.to_xyxy_px(200.0, 100.0, 0.0, 0.0);
        assert!((px[0] - 60.0).abs() < 1e-4);
        assert!((px[3] - 65.0).abs() < 1e-4);
        let back = YoloBox::from_xyxy_px(px, 200.0, 100.0, 3);
        assert!((back.x - b.x).abs() < 1e-6);
        assert!((back.h - b.h).abs() < 1e-6);
        assert_eq!(back.class_id, 3);
    }

    #[test]
    fn zero_width_is_degenerate() {
        assert!(YoloBox::new(0.5, 0.5, 0.0, 0.2, 0).is_degenerate());
        assert!(!YoloBox::new(0.5, 0.5, 0.1, 0.2, 0).is_degenerate());
    }

    #[test]
    fn non_finite_fields_are_degenerate() {
        assert!(YoloBox::new(f32::NAN, 0.5, 0.1, 0.2, 0).is_degenerate());
        assert!(YoloBox::new(0.5, f32::NEG_INFINITY, 0.1, 0.2, 0).is_degenerate());
        assert!(YoloBox::new(0.5, 0.5, f32::INFINITY, 0.2, 0).is_degenerate());
        assert!(YoloBox::new(0.5, 0.5, 0.1, f32::NAN, 0).is_degenerate());
    }
}

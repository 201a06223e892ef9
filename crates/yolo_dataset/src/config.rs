//! Immutable dataset configuration: image size, scales, anchors, and sampling knobs.

use crate::encode::AnchorSet;
use crate::types::{DatasetError, DatasetResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_IMAGE_SIZE: u32 = 416;
pub const DEFAULT_IGNORE_IOU_THRESH: f32 = 0.5;
pub const DEFAULT_MOSAIC_PROB: f32 = 0.75;

/// YOLOv3 priors normalized to input size, coarsest scale first.
pub const DEFAULT_ANCHORS: [[[f32; 2]; 3]; 3] = [
    [[0.28, 0.22], [0.38, 0.48], [0.9, 0.78]],
    [[0.07, 0.15], [0.15, 0.11], [0.14, 0.29]],
    [[0.02, 0.03], [0.04, 0.07], [0.08, 0.06]],
];

pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetConfig {
    /// Square network input size in pixels; the mosaic canvas is twice this.
    pub image_size: u32,
    /// Grid resolution per detection scale, one entry per anchor group.
    pub grid_sizes: Vec<usize>,
    /// Anchor (width, height) pairs grouped per scale, normalized to input size.
    pub anchors: Vec<Vec<[f32; 2]>>,
    /// Probability of building a four-image mosaic instead of a single image.
    pub mosaic_prob: f32,
    /// Anchors whose shape IoU exceeds this are ignored rather than trained as negatives.
    pub ignore_iou_thresh: f32,
    /// Encode per-scale target tensors; when false the raw box list is returned.
    pub targets: bool,
    /// Per-channel mean in [0, 1]; also the mosaic background color.
    pub mean: [f32; 3],
    pub std: [f32; 3],
    /// Seed for reproducible per-index sampling.
    pub seed: Option<u64>,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            image_size: DEFAULT_IMAGE_SIZE,
            grid_sizes: vec![
                (DEFAULT_IMAGE_SIZE / 32) as usize,
                (DEFAULT_IMAGE_SIZE / 16) as usize,
                (DEFAULT_IMAGE_SIZE / 8) as usize,
            ],
            anchors: DEFAULT_ANCHORS.iter().map(|g| g.to_vec()).collect(),
            mosaic_prob: DEFAULT_MOSAIC_PROB,
            ignore_iou_thresh: DEFAULT_IGNORE_IOU_THRESH,
            targets: true,
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
            seed: None,
        }
    }
}

impl DatasetConfig {
    /// Load a TOML config file; missing keys fall back to defaults.
    pub fn from_path(path: &Path) -> DatasetResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| DatasetError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let cfg: DatasetConfig = toml::from_str(&raw).map_err(|e| DatasetError::TomlParse {
            path: path.to_path_buf(),
            source: e,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Apply `YOLO_DATASET_*` environment overrides on top of this config.
    pub fn with_env_overrides(mut self) -> Self {
        fn parse<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok()?.trim().parse().ok()
        }
        if let Some(p) = parse::<f32>("YOLO_DATASET_MOSAIC_PROB") {
            self.mosaic_prob = p;
        }
        if let Some(t) = parse::<f32>("YOLO_DATASET_IGNORE_IOU") {
            self.ignore_iou_thresh = t;
        }
        if let Some(seed) = parse::<u64>("YOLO_DATASET_SEED") {
            self.seed = Some(seed);
        }
        if let Ok(v) = std::env::var("YOLO_DATASET_TARGETS") {
            let v = v.trim().to_ascii_lowercase();
            self.targets = !(v == "0" || v == "false" || v == "off");
        }
        self
    }

    pub fn validate(&self) -> DatasetResult<()> {
        if self.image_size == 0 {
            return Err(DatasetError::Config("image_size must be positive".into()));
        }
        if self.grid_sizes.is_empty() {
            return Err(DatasetError::Config("grid_sizes must not be empty".into()));
        }
        if self.grid_sizes.contains(&0) {
            return Err(DatasetError::Config(format!(
                "grid sizes must be positive ({:?})",
                self.grid_sizes
            )));
        }
        if !self.mosaic_prob.is_finite() || !(0.0..=1.0).contains(&self.mosaic_prob) {
            return Err(DatasetError::Config(format!(
                "mosaic_prob {} outside [0, 1]",
                self.mosaic_prob
            )));
        }
        if !self.ignore_iou_thresh.is_finite() {
            return Err(DatasetError::Config(
                "ignore_iou_thresh must be finite".into(),
            ));
        }
        if self.std.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return Err(DatasetError::Config(format!(
                "std must be positive ({:?})",
                self.std
            )));
        }
        if self.anchors.len() != self.grid_sizes.len() {
            return Err(DatasetError::Config(format!(
                "{} anchor groups for {} grid sizes",
                self.anchors.len(),
                self.grid_sizes.len()
            )));
        }
        self.anchor_set().map(|_| ())
    }

    /// Flatten the anchor groups into a partitioned [`AnchorSet`].
    pub fn anchor_set(&self) -> DatasetResult<AnchorSet> {
        let flat = self.anchors.iter().flatten().copied().collect();
        AnchorSet::new(flat, self.grid_sizes.len())
    }

    /// Mosaic background color: the channel means scaled to pixel range.
    pub fn fill_rgb(&self) -> image::Rgb<u8> {
        image::Rgb(self.mean.map(|m| (m.clamp(0.0, 1.0) * 255.0) as u8))
    }

    pub fn describe(&self) -> String {
        format!(
            "image_size={} grids={:?} anchors={} mosaic_p={:.2} ignore_iou={:.2} targets={} \
             seed={}",
            self.image_size,
            self.grid_sizes,
            self.anchors.iter().map(Vec::len).sum::<usize>(),
            self.mosaic_prob,
            self.ignore_iou_thresh,
            self.targets,
            self.seed
                .map(|s| s.to_string())
                .unwrap_or_else(|| "none".to_string())
        )
    }
}

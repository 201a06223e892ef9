//! Dataset-to-tensor preparation for multi-scale YOLO-style detectors.
//!
//! This crate provides utilities for:
//! - Loading image/label pairs from a CSV manifest
//! - Four-image mosaic composition with box re-projection
//! - Geometry-consistent augmentation pipelines
//! - Greedy per-scale anchor target encoding
//! - Manifest validation and quality checks

pub mod aug;
pub mod config;
pub mod dataset;
pub mod encode;
pub mod mosaic;
pub mod source;
pub mod types;
pub mod validation;

#[cfg(feature = "burn-runtime")]
pub mod tensor;

pub use aug::{Augment, Resize, Transform, TransformPipeline, TransformPipelineBuilder};
pub use config::DatasetConfig;
pub use dataset::YoloDataset;
pub use encode::{iou_width_height, AnchorSet, AnchorTargetEncoder, EncodeStats, ScaleTarget};
pub use mosaic::{MosaicComposer, Quadrant, TilePlacement};
pub use source::{parse_label_str, CsvManifestSource, ImageLabelSource, InMemorySource};
pub use types::*;
pub use validation::{summarize_source, summarize_with_thresholds, validate_summary};

#[cfg(feature = "burn-runtime")]
pub use tensor::{image_tensor, targets_to_tensors};

//! Per-index orchestration: source -> mosaic -> transform -> target encoding.

use crate::aug::Transform;
use crate::config::DatasetConfig;
use crate::encode::{AnchorTargetEncoder, EncodeStats};
use crate::mosaic::MosaicComposer;
use crate::source::ImageLabelSource;
use crate::types::{DatasetError, DatasetItem, DatasetResult, Targets};
use rand::SeedableRng;
use rayon::prelude::*;
use tracing::debug;

pub struct YoloDataset<S: ImageLabelSource> {
    source: S,
    config: DatasetConfig,
    mosaic: MosaicComposer,
    encoder: AnchorTargetEncoder,
    transform: Option<Box<dyn Transform>>,
}

impl<S: ImageLabelSource> YoloDataset<S> {
    pub fn new(source: S, config: &DatasetConfig) -> DatasetResult<Self> {
        config.validate()?;
        let encoder = AnchorTargetEncoder::new(
            config.anchor_set()?,
            config.grid_sizes.clone(),
            config.ignore_iou_thresh,
        )?;
        let mosaic =
            MosaicComposer::new(config.image_size, config.mosaic_prob, config.fill_rgb());
        debug!(len = source.len(), config = %config.describe(), "built yolo dataset");
        Ok(Self {
            source,
            config: config.clone(),
            mosaic,
            encoder,
            transform: None,
        })
    }

    pub fn with_transform(mut self, transform: impl Transform + 'static) -> Self {
        self.transform = Some(Box::new(transform));
        self
    }

    pub fn len(&self) -> usize {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn config(&self) -> &DatasetConfig {
        &self.config
    }

    pub fn encoder(&self) -> &AnchorTargetEncoder {
        &self.encoder
    }

    pub fn mosaic(&self) -> &MosaicComposer {
        &self.mosaic
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch one item, seeding from `seed ^ index` when a seed is configured.
    pub fn get(&self, index: usize) -> DatasetResult<DatasetItem> {
        self.get_with_stats(index).map(|(item, _)| item)
    }

    /// Like [`YoloDataset::get`], also reporting anchor coverage for the item.
    pub fn get_with_stats(&self, index: usize) -> DatasetResult<(DatasetItem, EncodeStats)> {
        let mut rng_local;
        let mut seeded_rng;
        let rng: &mut dyn rand::RngCore = if let Some(seed) = self.config.seed {
            seeded_rng = rand::rngs::StdRng::seed_from_u64(seed ^ index as u64);
            &mut seeded_rng
        } else {
            rng_local = rand::rng();
            &mut rng_local
        };
        self.get_with_rng_stats(index, rng)
    }

    pub fn get_with_rng(
        &self,
        index: usize,
        rng: &mut dyn rand::RngCore,
    ) -> DatasetResult<DatasetItem> {
        self.get_with_rng_stats(index, rng).map(|(item, _)| item)
    }

    fn get_with_rng_stats(
        &self,
        index: usize,
        rng: &mut dyn rand::RngCore,
    ) -> DatasetResult<(DatasetItem, EncodeStats)> {
        let len = self.len();
        if index >= len {
            return Err(DatasetError::IndexOutOfRange { index, len });
        }

        let (mut image, mut boxes) = self.mosaic.compose(&self.source, index, rng)?;
        if let Some(transform) = &self.transform {
            (image, boxes) = transform.apply(image, boxes, rng)?;
        }

        if !self.config.targets {
            let stats = EncodeStats {
                boxes: boxes.len(),
                ..Default::default()
            };
            return Ok((
                DatasetItem {
                    index,
                    image,
                    targets: Targets::Boxes(boxes),
                },
                stats,
            ));
        }

        let (targets, stats) = self.encoder.encode_with_stats(&boxes);
        Ok((
            DatasetItem {
                index,
                image,
                targets: Targets::Encoded(targets),
            },
            stats,
        ))
    }

    /// Fetch several indices in parallel; results keep the order of `indices`.
    pub fn get_many(&self, indices: &[usize]) -> Vec<DatasetResult<DatasetItem>> {
        indices.par_iter().map(|&i| self.get(i)).collect()
    }
}

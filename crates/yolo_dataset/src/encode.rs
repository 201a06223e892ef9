//! Multi-scale anchor assignment: box lists to dense per-scale target grids.
//!
//! Each box is matched against every anchor by shape-only IoU. Walking anchors from best to
//! worst, the first free slot on each scale becomes the box's positive; other free slots whose
//! IoU clears the ignore threshold are excluded from the loss. Boxes are processed in list
//! order and an earlier claim is never overwritten.

use crate::types::{DatasetError, DatasetResult, YoloBox};
use tracing::{debug, trace};

/// Channels per slot: objectness, x offset, y offset, width in cells, height in cells, class.
pub const TARGET_CHANNELS: usize = 6;

pub const OBJ_POSITIVE: f32 = 1.0;
pub const OBJ_NEGATIVE: f32 = 0.0;
pub const OBJ_IGNORE: f32 = -1.0;

/// Largest offset written for a positive slot; keeps cell offsets strictly below one.
const MAX_CELL_OFFSET: f32 = 1.0 - f32::EPSILON;

/// Anchor shapes for all scales, stored flat and partitioned into equal groups.
#[derive(Debug, Clone, PartialEq)]
pub struct AnchorSet {
    anchors: Vec<[f32; 2]>,
    num_scales: usize,
}

impl AnchorSet {
    pub fn new(anchors: Vec<[f32; 2]>, num_scales: usize) -> DatasetResult<Self> {
        if num_scales == 0 {
            return Err(DatasetError::Config("anchor set needs at least one scale".into()));
        }
        if anchors.is_empty() {
            return Err(DatasetError::Config("anchor set is empty".into()));
        }
        if anchors.len() % num_scales != 0 {
            return Err(DatasetError::Config(format!(
                "{} anchors cannot be split evenly across {} scales",
                anchors.len(),
                num_scales
            )));
        }
        if let Some(bad) = anchors
            .iter()
            .find(|a| a.iter().any(|v| !v.is_finite() || *v <= 0.0))
        {
            return Err(DatasetError::Config(format!(
                "anchor dimensions must be positive ({bad:?})"
            )));
        }
        Ok(Self {
            anchors,
            num_scales,
        })
    }

    pub fn from_groups(groups: &[Vec<[f32; 2]>]) -> DatasetResult<Self> {
        Self::new(groups.iter().flatten().copied().collect(), groups.len())
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    pub fn num_scales(&self) -> usize {
        self.num_scales
    }

    pub fn anchors_per_scale(&self) -> usize {
        self.anchors.len() / self.num_scales
    }

    pub fn as_slice(&self) -> &[[f32; 2]] {
        &self.anchors
    }

    /// Split a flat anchor index into `(scale, anchor within scale)`.
    pub fn locate(&self, anchor_idx: usize) -> (usize, usize) {
        let per_scale = self.anchors_per_scale();
        (anchor_idx / per_scale, anchor_idx % per_scale)
    }
}

/// IoU of two boxes given only their (width, height), both centered at the origin.
pub fn iou_width_height(a: [f32; 2], b: [f32; 2]) -> f32 {
    let inter = a[0].min(b[0]) * a[1].min(b[1]);
    let union = a[0] * a[1] + b[0] * b[1] - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Dense target grid for one scale, laid out as `(anchor, row, col, channel)`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleTarget {
    anchors: usize,
    grid: usize,
    data: Vec<f32>,
}

impl ScaleTarget {
    pub fn zeros(anchors: usize, grid: usize) -> Self {
        Self {
            anchors,
            grid,
            data: vec![0.0; anchors * grid * grid * TARGET_CHANNELS],
        }
    }

    pub fn num_anchors(&self) -> usize {
        self.anchors
    }

    pub fn grid_size(&self) -> usize {
        self.grid
    }

    pub fn shape(&self) -> [usize; 4] {
        [self.anchors, self.grid, self.grid, TARGET_CHANNELS]
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    fn offset(&self, anchor: usize, row: usize, col: usize) -> usize {
        ((anchor * self.grid + row) * self.grid + col) * TARGET_CHANNELS
    }

    pub fn cell(&self, anchor: usize, row: usize, col: usize) -> [f32; TARGET_CHANNELS] {
        let base = self.offset(anchor, row, col);
        let mut out = [0.0; TARGET_CHANNELS];
        out.copy_from_slice(&self.data[base..base + TARGET_CHANNELS]);
        out
    }

    pub fn objectness(&self, anchor: usize, row: usize, col: usize) -> f32 {
        self.data[self.offset(anchor, row, col)]
    }

    fn set_objectness(&mut self, anchor: usize, row: usize, col: usize, value: f32) {
        let base = self.offset(anchor, row, col);
        self.data[base] = value;
    }

    fn write_positive(
        &mut self,
        anchor: usize,
        row: usize,
        col: usize,
        payload: [f32; TARGET_CHANNELS],
    ) {
        let base = self.offset(anchor, row, col);
        self.data[base..base + TARGET_CHANNELS].copy_from_slice(&payload);
    }

    /// Number of slots whose objectness equals `value`.
    pub fn count_objectness(&self, value: f32) -> usize {
        self.data
            .chunks_exact(TARGET_CHANNELS)
            .filter(|c| c[0] == value)
            .count()
    }

    /// `(anchor, row, col, payload)` for every positive slot, in memory order.
    pub fn positives(&self) -> Vec<(usize, usize, usize, [f32; TARGET_CHANNELS])> {
        let mut out = Vec::new();
        for anchor in 0..self.anchors {
            for row in 0..self.grid {
                for col in 0..self.grid {
                    let cell = self.cell(anchor, row, col);
                    if cell[0] == OBJ_POSITIVE {
                        out.push((anchor, row, col, cell));
                    }
                }
            }
        }
        out
    }

    /// Recover the normalized boxes stored in positive slots.
    pub fn decode_boxes(&self) -> Vec<YoloBox> {
        let s = self.grid as f32;
        self.positives()
            .into_iter()
            .map(|(_, row, col, c)| {
                YoloBox::new(
                    (col as f32 + c[1]) / s,
                    (row as f32 + c[2]) / s,
                    c[3] / s,
                    c[4] / s,
                    c[5] as u32,
                )
            })
            .collect()
    }

    #[cfg(feature = "burn-runtime")]
    pub fn to_tensor<B: burn::tensor::backend::Backend>(
        &self,
        device: &B::Device,
    ) -> burn::tensor::Tensor<B, 4> {
        burn::tensor::Tensor::<B, 4>::from_data(
            burn::tensor::TensorData::new(self.data.clone(), self.shape()),
            device,
        )
    }
}

/// Assignment counters for one `encode` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeStats {
    pub boxes: usize,
    pub skipped_degenerate: usize,
    pub positives: usize,
    pub ignored: usize,
    /// Boxes that ended with no positive slot on any scale.
    pub uncovered: usize,
}

impl EncodeStats {
    pub fn merge(&mut self, other: &EncodeStats) {
        self.boxes += other.boxes;
        self.skipped_degenerate += other.skipped_degenerate;
        self.positives += other.positives;
        self.ignored += other.ignored;
        self.uncovered += other.uncovered;
    }
}

#[derive(Debug, Clone)]
pub struct AnchorTargetEncoder {
    anchors: AnchorSet,
    grid_sizes: Vec<usize>,
    ignore_iou_thresh: f32,
}

impl AnchorTargetEncoder {
    pub fn new(
        anchors: AnchorSet,
        grid_sizes: Vec<usize>,
        ignore_iou_thresh: f32,
    ) -> DatasetResult<Self> {
        if grid_sizes.len() != anchors.num_scales() {
            return Err(DatasetError::Config(format!(
                "{} grid sizes for {} anchor scales",
                grid_sizes.len(),
                anchors.num_scales()
            )));
        }
        if grid_sizes.contains(&0) {
            return Err(DatasetError::Config("grid sizes must be positive".into()));
        }
        Ok(Self {
            anchors,
            grid_sizes,
            ignore_iou_thresh,
        })
    }

    pub fn anchors(&self) -> &AnchorSet {
        &self.anchors
    }

    pub fn grid_sizes(&self) -> &[usize] {
        &self.grid_sizes
    }

    pub fn ignore_iou_thresh(&self) -> f32 {
        self.ignore_iou_thresh
    }

    pub fn encode(&self, boxes: &[YoloBox]) -> Vec<ScaleTarget> {
        self.encode_with_stats(boxes).0
    }

    pub fn encode_with_stats(&self, boxes: &[YoloBox]) -> (Vec<ScaleTarget>, EncodeStats) {
        let per_scale = self.anchors.anchors_per_scale();
        let mut targets: Vec<ScaleTarget> = self
            .grid_sizes
            .iter()
            .map(|&s| ScaleTarget::zeros(per_scale, s))
            .collect();
        let mut stats = EncodeStats {
            boxes: boxes.len(),
            ..Default::default()
        };

        for bbox in boxes {
            if bbox.is_degenerate() {
                stats.skipped_degenerate += 1;
                continue;
            }
            let ious: Vec<f32> = self
                .anchors
                .as_slice()
                .iter()
                .map(|a| iou_width_height([bbox.w, bbox.h], *a))
                .collect();
            let mut order: Vec<usize> = (0..ious.len()).collect();
            // stable: equal IoUs keep anchor order
            order.sort_by(|&a, &b| ious[b].total_cmp(&ious[a]));

            let mut has_anchor = vec![false; self.grid_sizes.len()];
            for anchor_idx in order {
                let (scale_idx, anchor_on_scale) = self.anchors.locate(anchor_idx);
                let s = self.grid_sizes[scale_idx];
                let (row, y_cell) = cell_coord(bbox.y, s);
                let (col, x_cell) = cell_coord(bbox.x, s);
                let target = &mut targets[scale_idx];
                let taken = target.objectness(anchor_on_scale, row, col);

                if taken == OBJ_NEGATIVE && !has_anchor[scale_idx] {
                    let sf = s as f32;
                    target.write_positive(
                        anchor_on_scale,
                        row,
                        col,
                        [
                            OBJ_POSITIVE,
                            x_cell,
                            y_cell,
                            bbox.w * sf,
                            bbox.h * sf,
                            bbox.class_id as f32,
                        ],
                    );
                    has_anchor[scale_idx] = true;
                    stats.positives += 1;
                } else if taken == OBJ_NEGATIVE && ious[anchor_idx] > self.ignore_iou_thresh {
                    target.set_objectness(anchor_on_scale, row, col, OBJ_IGNORE);
                    stats.ignored += 1;
                }
            }

            if !has_anchor.iter().any(|h| *h) {
                stats.uncovered += 1;
                debug!(?bbox, "box received no positive anchor on any scale");
            }
        }

        trace!(?stats, "encoded targets");
        (targets, stats)
    }
}

/// Cell index and in-cell offset for a normalized coordinate on an `s`-cell axis.
fn cell_coord(v: f32, s: usize) -> (usize, f32) {
    let scaled = v.clamp(0.0, 1.0) * s as f32;
    let idx = (scaled.floor() as usize).min(s - 1);
    let offset = (scaled - idx as f32).clamp(0.0, MAX_CELL_OFFSET);
    (idx, offset)
}

use serde::Serialize;
use yolo_dataset::encode::{OBJ_IGNORE, OBJ_POSITIVE};
use yolo_dataset::{DatasetItem, EncodeStats, ScaleTarget};

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ScaleCoverage {
    pub grid: usize,
    pub positives: usize,
    pub ignored: usize,
}

/// Anchor assignment totals over a run of dataset items.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct CoverageReport {
    pub items: usize,
    pub failed: usize,
    pub boxes: usize,
    pub skipped_degenerate: usize,
    pub uncovered: usize,
    pub scales: Vec<ScaleCoverage>,
}

impl CoverageReport {
    pub fn record(&mut self, item: &DatasetItem, stats: &EncodeStats) {
        self.items += 1;
        self.boxes += stats.boxes;
        self.skipped_degenerate += stats.skipped_degenerate;
        self.uncovered += stats.uncovered;
        if let Some(targets) = item.targets.encoded() {
            self.record_targets(targets);
        }
    }

    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    fn record_targets(&mut self, targets: &[ScaleTarget]) {
        if self.scales.len() < targets.len() {
            self.scales.resize_with(targets.len(), ScaleCoverage::default);
        }
        for (scale, t) in self.scales.iter_mut().zip(targets) {
            scale.grid = t.grid_size();
            scale.positives += t.count_objectness(OBJ_POSITIVE);
            scale.ignored += t.count_objectness(OBJ_IGNORE);
        }
    }

    /// Fraction of non-degenerate boxes that got at least one positive slot.
    pub fn covered_ratio(&self) -> f32 {
        let eligible = self.boxes.saturating_sub(self.skipped_degenerate);
        if eligible == 0 {
            return 1.0;
        }
        (eligible - self.uncovered) as f32 / eligible as f32
    }
}

#[cfg(test)]
mod report_tests {
    use super::*;
    use yolo_dataset::{AnchorSet, AnchorTargetEncoder, Targets, YoloBox};

    #[test]
    fn records_per_scale_counts() {
        let anchors = AnchorSet::new(vec![[0.2, 0.2]; 2], 2).expect("anchors");
        let enc = AnchorTargetEncoder::new(anchors, vec![4, 8], 0.5).expect("encoder");
        let boxes = [
            YoloBox::new(0.1, 0.1, 0.2, 0.2, 0),
            YoloBox::new(0.9, 0.9, 0.2, 0.2, 1),
        ];
        let (targets, stats) = enc.encode_with_stats(&boxes);
        let item = DatasetItem {
            index: 0,
            image: image::RgbImage::new(1, 1),
            targets: Targets::Encoded(targets),
        };
        let mut report = CoverageReport::default();
        report.record(&item, &stats);
        assert_eq!(report.items, 1);
        assert_eq!(report.boxes, 2);
        assert_eq!(
            report.scales,
            vec![
                ScaleCoverage {
                    grid: 4,
                    positives: 2,
                    ignored: 0
                },
                ScaleCoverage {
                    grid: 8,
                    positives: 2,
                    ignored: 0
                },
            ]
        );
        assert_eq!(report.covered_ratio(), 1.0);
    }
}

//! Dataset validation and quality checks over a CSV manifest.

use crate::source::{parse_label_str, CsvManifestSource};
use crate::types::{ManifestSummary, ValidationOutcome, ValidationReport, ValidationThresholds};
use std::fs;
use tracing::warn;

/// Walk every manifest row, checking file presence and label syntax without decoding images.
pub fn summarize_source(source: &CsvManifestSource) -> ManifestSummary {
    let mut summary = ManifestSummary {
        manifest: source.manifest_path().to_path_buf(),
        ..Default::default()
    };
    for index in 0..source.entries().len() {
        let (Ok(img_path), Ok(label_path)) = (source.image_path(index), source.label_path(index))
        else {
            continue;
        };
        if !img_path.exists() {
            summary.missing_image += 1;
            continue;
        }
        let raw = match fs::read_to_string(&label_path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                summary.missing_label += 1;
                continue;
            }
            Err(e) => {
                warn!("unreadable label {}: {e}", label_path.display());
                summary.invalid_label += 1;
                continue;
            }
        };
        match parse_label_str(&raw, &label_path) {
            Ok(boxes) => {
                summary.total += 1;
                let valid = boxes.iter().filter(|b| !b.is_degenerate()).count();
                summary.boxes += valid;
                if valid == 0 {
                    summary.empty += 1;
                } else {
                    summary.non_empty += 1;
                }
            }
            Err(e) => {
                warn!("skipping malformed label: {e}");
                summary.invalid_label += 1;
            }
        }
    }
    summary
}

/// One counted defect class checked against its absolute and relative limits.
struct Check {
    name: &'static str,
    count: usize,
    max: Option<usize>,
    max_ratio: Option<f32>,
}

impl Check {
    /// Any occurrence warns; crossing a configured limit fails.
    fn evaluate(&self, checked: usize, reasons: &mut Vec<String>) -> ValidationOutcome {
        if self.count == 0 {
            return ValidationOutcome::Pass;
        }
        let ratio = self.count as f32 / checked.max(1) as f32;
        let mut outcome = ValidationOutcome::Warn;
        if let Some(max) = self.max.filter(|max| self.count > *max) {
            reasons.push(format!("{}: {} over limit {max}", self.name, self.count));
            outcome = ValidationOutcome::Fail;
        }
        if let Some(max) = self.max_ratio.filter(|max| ratio > *max) {
            reasons.push(format!("{}: ratio {ratio:.3} over limit {max:.3}", self.name));
            outcome = ValidationOutcome::Fail;
        }
        if outcome == ValidationOutcome::Warn {
            reasons.push(format!("{}: {}", self.name, self.count));
        }
        outcome
    }
}

/// Grade a summary: clean manifests pass, any defect warns, defects over a limit fail.
pub fn validate_summary(
    summary: ManifestSummary,
    thresholds: &ValidationThresholds,
) -> ValidationReport {
    let checked =
        summary.total + summary.missing_image + summary.missing_label + summary.invalid_label;
    let checks = [
        Check {
            name: "missing image or label",
            count: summary.missing_image + summary.missing_label,
            max: thresholds.max_missing,
            max_ratio: thresholds.max_missing_ratio,
        },
        Check {
            name: "malformed labels",
            count: summary.invalid_label,
            max: thresholds.max_invalid,
            max_ratio: thresholds.max_invalid_ratio,
        },
        Check {
            name: "images without boxes",
            count: summary.empty,
            max: thresholds.max_empty,
            max_ratio: thresholds.max_empty_ratio,
        },
    ];

    let mut reasons = Vec::new();
    let outcome = checks
        .iter()
        .map(|c| c.evaluate(checked, &mut reasons))
        .max()
        .unwrap_or(ValidationOutcome::Pass);

    ValidationReport {
        outcome,
        reasons,
        summary,
    }
}

pub fn summarize_with_thresholds(
    source: &CsvManifestSource,
    thresholds: &ValidationThresholds,
) -> ValidationReport {
    validate_summary(summarize_source(source), thresholds)
}

#[cfg(test)]
mod validation_tests {
    use super::*;
    use std::path::Path;

    fn write_layout(root: &Path, labels: &[(&str, Option<&[u8]>)]) -> CsvManifestSource {
        let (images, label_dir) = (root.join("images"), root.join("labels"));
        fs::create_dir_all(&images).expect("images dir");
        fs::create_dir_all(&label_dir).expect("labels dir");
        let mut manifest = String::from("image,label\n");
        for (name, contents) in labels {
            fs::write(images.join(format!("{name}.png")), b"not decoded").expect("image");
            if let Some(bytes) = contents {
                fs::write(label_dir.join(format!("{name}.txt")), bytes).expect("label");
            }
            manifest.push_str(&format!("{name}.png,{name}.txt\n"));
        }
        let manifest_path = root.join("train.csv");
        fs::write(&manifest_path, manifest).expect("manifest");
        CsvManifestSource::open(&manifest_path, images, label_dir).expect("open")
    }

    #[test]
    fn unreadable_label_counts_as_invalid_not_missing() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let source = write_layout(
            tmp.path(),
            &[
                ("ok", Some(b"0 0.5 0.5 0.2 0.2\n".as_slice())),
                ("gone", None),
                ("binary", Some(b"\xff\xfe\x00\x80".as_slice())),
            ],
        );
        let summary = summarize_source(&source);
        assert_eq!(summary.total, 1);
        assert_eq!(summary.boxes, 1);
        assert_eq!(summary.missing_label, 1);
        assert_eq!(summary.invalid_label, 1);
        assert_eq!(summary.missing_image, 0);
    }

    #[test]
    fn clean_summary_passes() {
        let summary = ManifestSummary {
            total: 10,
            non_empty: 10,
            boxes: 25,
            ..Default::default()
        };
        let report = validate_summary(summary, &ValidationThresholds::default());
        assert_eq!(report.outcome, ValidationOutcome::Pass);
        assert!(report.reasons.is_empty());
    }

    #[test]
    fn missing_files_warn_then_fail_over_threshold() {
        let summary = ManifestSummary {
            total: 8,
            non_empty: 8,
            missing_image: 1,
            missing_label: 1,
            ..Default::default()
        };
        let report = validate_summary(summary.clone(), &ValidationThresholds::default());
        assert_eq!(report.outcome, ValidationOutcome::Warn);

        let strict = ValidationThresholds {
            max_missing_ratio: Some(0.1),
            ..Default::default()
        };
        let report = validate_summary(summary, &strict);
        assert_eq!(report.outcome, ValidationOutcome::Fail);
        assert!(report.reasons.iter().any(|r| r.contains("ratio 0.200 over limit 0.100")));
    }

    #[test]
    fn worst_check_decides_outcome() {
        let summary = ManifestSummary {
            total: 4,
            non_empty: 2,
            empty: 2,
            invalid_label: 1,
            ..Default::default()
        };
        let thresholds = ValidationThresholds {
            max_invalid: Some(0),
            ..Default::default()
        };
        let report = validate_summary(summary, &thresholds);
        assert_eq!(report.outcome, ValidationOutcome::Fail);
        assert_eq!(
            report.reasons,
            vec![
                "malformed labels: 1 over limit 0".to_string(),
                "images without boxes: 2".to_string(),
            ]
        );
    }
}

use image::{Rgb, RgbImage};
use yolo_dataset::{DatasetConfig, InMemorySource, YoloBox, YoloDataset};
use yolo_dataset_tools::CoverageReport;

#[test]
fn coverage_accumulates_over_items() -> anyhow::Result<()> {
    let mut source = InMemorySource::default();
    source.push(
        RgbImage::from_pixel(32, 32, Rgb([10, 20, 30])),
        vec![YoloBox::new(0.5, 0.5, 0.25, 0.25, 0)],
    );
    source.push(
        RgbImage::from_pixel(32, 32, Rgb([40, 50, 60])),
        vec![
            YoloBox::new(0.3, 0.3, 0.2, 0.2, 1),
            YoloBox::new(0.7, 0.7, 0.0, 0.2, 2),
        ],
    );
    let cfg = DatasetConfig {
        image_size: 32,
        grid_sizes: vec![2, 4, 8],
        mosaic_prob: 0.0,
        seed: Some(7),
        ..Default::default()
    };
    let dataset = YoloDataset::new(source, &cfg)?;

    let mut report = CoverageReport::default();
    for index in 0..dataset.len() {
        let (item, stats) = dataset.get_with_stats(index)?;
        report.record(&item, &stats);
    }
    report.record_failure();

    assert_eq!(report.items, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.boxes, 3);
    assert_eq!(report.skipped_degenerate, 1);
    assert_eq!(report.scales.len(), 3);
    assert_eq!(
        report.scales.iter().map(|s| s.grid).collect::<Vec<_>>(),
        vec![2, 4, 8]
    );
    let positives: usize = report.scales.iter().map(|s| s.positives).sum();
    assert!(positives >= 2);

    let json = serde_json::to_value(&report)?;
    assert_eq!(json["items"], 2);
    assert_eq!(json["scales"][1]["grid"], 4);
    Ok(())
}

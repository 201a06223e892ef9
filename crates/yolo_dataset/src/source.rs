//! Image/label sources: the CSV manifest layout on disk and an in-memory variant.

use crate::types::{DatasetError, DatasetResult, YoloBox};
use image::RgbImage;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Loads one `(image, boxes)` pair by index. Boxes are normalized to that image.
pub trait ImageLabelSource: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn load(&self, index: usize) -> DatasetResult<(RgbImage, Vec<YoloBox>)>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub image: String,
    pub label: String,
}

/// Dataset described by a CSV manifest of `image,label` file names.
#[derive(Debug, Clone)]
pub struct CsvManifestSource {
    manifest_path: PathBuf,
    img_dir: PathBuf,
    label_dir: PathBuf,
    entries: Vec<ManifestEntry>,
}

impl CsvManifestSource {
    pub fn open(
        manifest: impl AsRef<Path>,
        img_dir: impl Into<PathBuf>,
        label_dir: impl Into<PathBuf>,
    ) -> DatasetResult<Self> {
        let manifest_path = manifest.as_ref().to_path_buf();
        let raw = fs::read_to_string(&manifest_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DatasetError::NotFound {
                    path: manifest_path.clone(),
                }
            } else {
                DatasetError::Io {
                    path: manifest_path.clone(),
                    source: e,
                }
            }
        })?;
        let entries = parse_manifest(&raw, &manifest_path)?;
        debug!(
            manifest = %manifest_path.display(),
            entries = entries.len(),
            "opened csv manifest"
        );
        Ok(Self {
            manifest_path,
            img_dir: img_dir.into(),
            label_dir: label_dir.into(),
            entries,
        })
    }

    pub fn manifest_path(&self) -> &Path {
        &self.manifest_path
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    fn entry(&self, index: usize) -> DatasetResult<&ManifestEntry> {
        self.entries.get(index).ok_or(DatasetError::IndexOutOfRange {
            index,
            len: self.entries.len(),
        })
    }

    pub fn image_path(&self, index: usize) -> DatasetResult<PathBuf> {
        Ok(self.img_dir.join(&self.entry(index)?.image))
    }

    pub fn label_path(&self, index: usize) -> DatasetResult<PathBuf> {
        Ok(self.label_dir.join(&self.entry(index)?.label))
    }

    pub fn load_labels(&self, index: usize) -> DatasetResult<Vec<YoloBox>> {
        let path = self.label_path(index)?;
        if !path.exists() {
            return Err(DatasetError::NotFound { path });
        }
        let raw = fs::read_to_string(&path).map_err(|e| DatasetError::Io {
            path: path.clone(),
            source: e,
        })?;
        parse_label_str(&raw, &path)
    }

    pub fn load_image(&self, index: usize) -> DatasetResult<RgbImage> {
        let path = self.image_path(index)?;
        if !path.exists() {
            return Err(DatasetError::NotFound { path });
        }
        let img = image::open(&path)
            .map_err(|e| DatasetError::Image {
                path: path.clone(),
                source: e,
            })?
            .to_rgb8();
        Ok(img)
    }
}

impl ImageLabelSource for CsvManifestSource {
    fn len(&self) -> usize {
        self.entries.len()
    }

    fn load(&self, index: usize) -> DatasetResult<(RgbImage, Vec<YoloBox>)> {
        let boxes = self.load_labels(index)?;
        let img = self.load_image(index)?;
        Ok((img, boxes))
    }
}

/// Parse manifest text: a header row, then `image,label` rows. Extra columns are ignored.
fn parse_manifest(raw: &str, path: &Path) -> DatasetResult<Vec<ManifestEntry>> {
    let mut entries = Vec::new();
    let mut lines = raw
        .lines()
        .enumerate()
        .filter(|(_, l)| !l.trim().is_empty());
    if lines.next().is_none() {
        return Ok(entries);
    }
    for (i, line) in lines {
        let mut fields = line.split(',').map(unquote);
        let image = fields.next().unwrap_or_default();
        let label = fields.next().unwrap_or_default();
        if image.is_empty() || label.is_empty() {
            return Err(DatasetError::Manifest {
                path: path.to_path_buf(),
                line: i + 1,
                msg: format!("expected `image,label`, got {line:?}"),
            });
        }
        entries.push(ManifestEntry { image, label });
    }
    Ok(entries)
}

fn unquote(field: &str) -> String {
    let f = field.trim();
    f.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .unwrap_or(f)
        .to_string()
}

/// Parse label text of `class x y w h` rows into boxes ordered `(x, y, w, h, class)`.
pub fn parse_label_str(raw: &str, path: &Path) -> DatasetResult<Vec<YoloBox>> {
    let mut boxes = Vec::new();
    for (i, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let err = |msg: String| DatasetError::Label {
            path: path.to_path_buf(),
            line: i + 1,
            msg,
        };
        let values = line
            .split_whitespace()
            .map(|t| t.parse::<f32>())
            .collect::<Result<Vec<f32>, _>>()
            .map_err(|e| err(format!("non-numeric field: {e}")))?;
        let &[class, x, y, w, h] = values.as_slice() else {
            return Err(err(format!("expected 5 fields, got {}", values.len())));
        };
        if !(class.is_finite() && class >= 0.0 && class.fract() == 0.0) {
            return Err(err(format!("class id {class} is not a non-negative integer")));
        }
        if [x, y, w, h].iter().any(|v| !v.is_finite()) {
            return Err(err("box contains non-finite values".to_string()));
        }
        boxes.push(YoloBox::new(x, y, w, h, class as u32));
    }
    Ok(boxes)
}

/// Vector-backed source, mostly for tests and synthetic data.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    samples: Vec<(RgbImage, Vec<YoloBox>)>,
}

impl InMemorySource {
    pub fn new(samples: Vec<(RgbImage, Vec<YoloBox>)>) -> Self {
        Self { samples }
    }

    pub fn push(&mut self, image: RgbImage, boxes: Vec<YoloBox>) {
        self.samples.push((image, boxes));
    }
}

impl ImageLabelSource for InMemorySource {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn load(&self, index: usize) -> DatasetResult<(RgbImage, Vec<YoloBox>)> {
        self.samples
            .get(index)
            .cloned()
            .ok_or(DatasetError::IndexOutOfRange {
                index,
                len: self.samples.len(),
            })
    }
}

//! Geometry-consistent augmentation applied after mosaic composition.

use crate::types::{DatasetResult, ResizeMode, YoloBox};
use image::imageops::{self, FilterType};
use image::RgbImage;
use rand::Rng;

/// `(image, boxes) -> (image, boxes)` step run between mosaic and target encoding.
///
/// Boxes come in and go out as normalized center boxes relative to the image they travel with.
/// The output image may have different dimensions than the input.
pub trait Transform: Send + Sync {
    fn apply(
        &self,
        image: RgbImage,
        boxes: Vec<YoloBox>,
        rng: &mut dyn rand::RngCore,
    ) -> DatasetResult<(RgbImage, Vec<YoloBox>)>;
}

impl<F> Transform for F
where
    F: Fn(RgbImage, Vec<YoloBox>, &mut dyn rand::RngCore) -> DatasetResult<(RgbImage, Vec<YoloBox>)>
        + Send
        + Sync,
{
    fn apply(
        &self,
        image: RgbImage,
        boxes: Vec<YoloBox>,
        rng: &mut dyn rand::RngCore,
    ) -> DatasetResult<(RgbImage, Vec<YoloBox>)> {
        self(image, boxes, rng)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resize {
    pub width: u32,
    pub height: u32,
    pub mode: ResizeMode,
}

/// One probability-gated augmentation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Augment {
    HorizontalFlip { prob: f32 },
    /// Brightness and contrast each scaled by `1 +- strength`.
    ColorJitter { prob: f32, strength: f32 },
    /// Center zoom by a factor in `[min, max)`, keeping the frame size.
    Zoom { prob: f32, min: f32, max: f32 },
    /// Uniform per-channel noise of `+- strength` (in 0..1 pixel units).
    Noise { prob: f32, strength: f32 },
    Blur { prob: f32, sigma: f32 },
}

impl Augment {
    fn prob(&self) -> f32 {
        match *self {
            Augment::HorizontalFlip { prob }
            | Augment::ColorJitter { prob, .. }
            | Augment::Zoom { prob, .. }
            | Augment::Noise { prob, .. }
            | Augment::Blur { prob, .. } => prob,
        }
    }

    fn describe(&self) -> String {
        match *self {
            Augment::HorizontalFlip { prob } => format!("hflip(p={prob:.2})"),
            Augment::ColorJitter { prob, strength } => {
                format!("jitter(p={prob:.2}, s={strength:.2})")
            }
            Augment::Zoom { prob, min, max } => format!("zoom(p={prob:.2}, [{min:.2},{max:.2}])"),
            Augment::Noise { prob, strength } => format!("noise(p={prob:.2}, s={strength:.3})"),
            Augment::Blur { prob, sigma } => format!("blur(p={prob:.2}, sigma={sigma:.2})"),
        }
    }

    fn run(
        &self,
        img: &mut RgbImage,
        boxes: Vec<YoloBox>,
        rng: &mut dyn rand::RngCore,
    ) -> Vec<YoloBox> {
        let prob = self.prob();
        if prob <= 0.0 || rng.random::<f32>() >= prob {
            return boxes;
        }
        match *self {
            Augment::HorizontalFlip { .. } => {
                imageops::flip_horizontal_in_place(img);
                boxes
                    .into_iter()
                    .map(|b| YoloBox { x: 1.0 - b.x, ..b })
                    .collect()
            }
            Augment::ColorJitter { strength, .. } => {
                if strength > 0.0 {
                    let bright = 1.0 + rng.random_range(-strength..strength);
                    let contrast = 1.0 + rng.random_range(-strength..strength);
                    map_channels(img, |v| ((v - 0.5) * contrast + 0.5) * bright);
                }
                boxes
            }
            Augment::Zoom { min, max, .. } => {
                if min <= 0.0 || max <= min {
                    return boxes;
                }
                let factor = rng.random_range(min..max);
                zoom(img, boxes, factor)
            }
            Augment::Noise { strength, .. } => {
                if strength > 0.0 {
                    for pixel in img.pixels_mut() {
                        for c in pixel.0.iter_mut() {
                            let v = *c as f32 / 255.0 + rng.random_range(-strength..strength);
                            *c = (v.clamp(0.0, 1.0) * 255.0) as u8;
                        }
                    }
                }
                boxes
            }
            Augment::Blur { sigma, .. } => {
                if sigma > 0.0 {
                    *img = imageops::blur(img, sigma);
                }
                boxes
            }
        }
    }
}

/// Optional resize followed by an ordered list of [`Augment`] steps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformPipeline {
    pub resize: Option<Resize>,
    pub steps: Vec<Augment>,
}

impl TransformPipeline {
    /// Squash the mosaic back to `size x size`, then flip, jitter and zoom.
    pub fn train(size: u32) -> Self {
        TransformPipelineBuilder::new()
            .resize(size, size, ResizeMode::Force)
            .flip_horizontal(0.5)
            .color_jitter(0.4, 0.1)
            .zoom(0.2, 0.8, 1.2)
            .build()
    }

    /// Resize only.
    pub fn eval(size: u32) -> Self {
        TransformPipelineBuilder::new()
            .resize(size, size, ResizeMode::Force)
            .build()
    }

    pub fn describe(&self) -> String {
        let resize = match self.resize {
            Some(r) => format!("{}x{} {:?}", r.width, r.height, r.mode),
            None => "none".to_string(),
        };
        let steps: Vec<String> = self.steps.iter().map(Augment::describe).collect();
        format!("resize={resize} steps=[{}]", steps.join(", "))
    }
}

impl Transform for TransformPipeline {
    fn apply(
        &self,
        mut image: RgbImage,
        mut boxes: Vec<YoloBox>,
        rng: &mut dyn rand::RngCore,
    ) -> DatasetResult<(RgbImage, Vec<YoloBox>)> {
        if let Some(r) = self.resize {
            (image, boxes) = match r.mode {
                ResizeMode::Force => (
                    imageops::resize(&image, r.width, r.height, FilterType::Triangle),
                    boxes,
                ),
                ResizeMode::Letterbox => letterbox(&image, boxes, r.width, r.height),
            };
        }
        for step in &self.steps {
            boxes = step.run(&mut image, boxes, rng);
        }
        let boxes = boxes
            .into_iter()
            .map(YoloBox::clamp_unit)
            .filter(|b| !b.is_degenerate())
            .collect();
        Ok((image, boxes))
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransformPipelineBuilder {
    pipeline: TransformPipeline,
}

impl TransformPipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resize(mut self, width: u32, height: u32, mode: ResizeMode) -> Self {
        self.pipeline.resize = Some(Resize {
            width,
            height,
            mode,
        });
        self
    }

    pub fn step(mut self, step: Augment) -> Self {
        self.pipeline.steps.push(step);
        self
    }

    pub fn flip_horizontal(self, prob: f32) -> Self {
        self.step(Augment::HorizontalFlip { prob })
    }

    pub fn color_jitter(self, prob: f32, strength: f32) -> Self {
        self.step(Augment::ColorJitter { prob, strength })
    }

    pub fn zoom(self, prob: f32, min: f32, max: f32) -> Self {
        self.step(Augment::Zoom { prob, min, max })
    }

    pub fn noise(self, prob: f32, strength: f32) -> Self {
        self.step(Augment::Noise { prob, strength })
    }

    pub fn blur(self, prob: f32, sigma: f32) -> Self {
        self.step(Augment::Blur { prob, sigma })
    }

    pub fn build(self) -> TransformPipeline {
        self.pipeline
    }
}

fn map_channels(img: &mut RgbImage, f: impl Fn(f32) -> f32) {
    for pixel in img.pixels_mut() {
        for c in pixel.0.iter_mut() {
            *c = (f(*c as f32 / 255.0).clamp(0.0, 1.0) * 255.0) as u8;
        }
    }
}

/// Re-express boxes after their image was scaled to `inner` and pasted at `offset` inside a
/// `frame`-sized image. Boxes are clipped to the frame; collapsed ones are dropped.
fn reframe(
    boxes: Vec<YoloBox>,
    inner: (u32, u32),
    offset: (i64, i64),
    frame: (u32, u32),
) -> Vec<YoloBox> {
    let (fw, fh) = (frame.0 as f32, frame.1 as f32);
    boxes
        .into_iter()
        .map(|b| {
            let px = b.to_xyxy_px(
                inner.0 as f32,
                inner.1 as f32,
                offset.0 as f32,
                offset.1 as f32,
            );
            let clipped = [
                px[0].clamp(0.0, fw),
                px[1].clamp(0.0, fh),
                px[2].clamp(0.0, fw),
                px[3].clamp(0.0, fh),
            ];
            YoloBox::from_xyxy_px(clipped, fw, fh, b.class_id)
        })
        .filter(|b| !b.is_degenerate())
        .collect()
}

fn letterbox(
    img: &RgbImage,
    boxes: Vec<YoloBox>,
    width: u32,
    height: u32,
) -> (RgbImage, Vec<YoloBox>) {
    let (w, h) = img.dimensions();
    let scale = f32::min(width as f32 / w as f32, height as f32 / h as f32);
    let inner = (
        ((w as f32 * scale).round() as u32).clamp(1, width),
        ((h as f32 * scale).round() as u32).clamp(1, height),
    );
    let offset = (((width - inner.0) / 2) as i64, ((height - inner.1) / 2) as i64);

    let mut canvas = RgbImage::new(width, height);
    let resized = imageops::resize(img, inner.0, inner.1, FilterType::Triangle);
    imageops::replace(&mut canvas, &resized, offset.0, offset.1);
    (canvas, reframe(boxes, inner, offset, (width, height)))
}

fn zoom(img: &mut RgbImage, boxes: Vec<YoloBox>, factor: f32) -> Vec<YoloBox> {
    let (w, h) = img.dimensions();
    let inner = (
        ((w as f32 * factor).round() as u32).max(1),
        ((h as f32 * factor).round() as u32).max(1),
    );
    // centered; negative when zooming in
    let offset = (
        (w as i64 - inner.0 as i64) / 2,
        (h as i64 - inner.1 as i64) / 2,
    );

    let resized = imageops::resize(img, inner.0, inner.1, FilterType::Triangle);
    let mut canvas = RgbImage::new(w, h);
    imageops::replace(&mut canvas, &resized, offset.0, offset.1);
    *img = canvas;
    reframe(boxes, inner, offset, (w, h))
}

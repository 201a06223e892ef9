//! Four-image mosaic composition on a `2S x 2S` canvas.

use crate::source::ImageLabelSource;
use crate::types::{DatasetError, DatasetResult, YoloBox};
use image::{imageops, Rgb, RgbImage};
use rand::seq::SliceRandom;
use rand::Rng;
use tracing::trace;

/// Destination and source rectangles for one pasted tile, as `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TilePlacement {
    pub dest: [i64; 4],
    pub src: [i64; 4],
}

impl TilePlacement {
    pub fn width(&self) -> i64 {
        self.dest[2] - self.dest[0]
    }

    pub fn height(&self) -> i64 {
        self.dest[3] - self.dest[1]
    }

    /// Shift from source pixel coordinates to canvas pixel coordinates.
    pub fn pad(&self) -> (i64, i64) {
        (self.dest[0] - self.src[0], self.dest[1] - self.src[1])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quadrant {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Quadrant {
    pub const ALL: [Quadrant; 4] = [
        Quadrant::TopLeft,
        Quadrant::TopRight,
        Quadrant::BottomLeft,
        Quadrant::BottomRight,
    ];

    /// Rectangles for a `w x h` tile meeting the mosaic center `(xc, yc)` on a `canvas`-wide
    /// square. Tiles align on the edge facing the center and are clipped at the outer edge.
    pub fn placement(self, xc: i64, yc: i64, w: i64, h: i64, canvas: i64) -> TilePlacement {
        match self {
            Quadrant::TopLeft => {
                let dest = [(xc - w).max(0), (yc - h).max(0), xc, yc];
                let src = [w - (dest[2] - dest[0]), h - (dest[3] - dest[1]), w, h];
                TilePlacement { dest, src }
            }
            Quadrant::TopRight => {
                let dest = [xc, (yc - h).max(0), (xc + w).min(canvas), yc];
                let src = [0, h - (dest[3] - dest[1]), w.min(dest[2] - dest[0]), h];
                TilePlacement { dest, src }
            }
            Quadrant::BottomLeft => {
                let dest = [(xc - w).max(0), yc, xc, (yc + h).min(canvas)];
                let src = [w - (dest[2] - dest[0]), 0, w, (dest[3] - dest[1]).min(h)];
                TilePlacement { dest, src }
            }
            Quadrant::BottomRight => {
                let dest = [xc, yc, (xc + w).min(canvas), (yc + h).min(canvas)];
                let src = [0, 0, w.min(dest[2] - dest[0]), (dest[3] - dest[1]).min(h)];
                TilePlacement { dest, src }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct MosaicComposer {
    image_size: u32,
    probability: f32,
    fill: Rgb<u8>,
}

impl MosaicComposer {
    pub fn new(image_size: u32, probability: f32, fill: Rgb<u8>) -> Self {
        Self {
            image_size,
            probability,
            fill,
        }
    }

    pub fn image_size(&self) -> u32 {
        self.image_size
    }

    pub fn canvas_size(&self) -> u32 {
        self.image_size * 2
    }

    pub fn probability(&self) -> f32 {
        self.probability
    }

    /// Either the plain sample at `index` or, with the configured probability, a mosaic of it
    /// and three random samples drawn with replacement.
    pub fn compose<S: ImageLabelSource + ?Sized>(
        &self,
        source: &S,
        index: usize,
        rng: &mut dyn rand::RngCore,
    ) -> DatasetResult<(RgbImage, Vec<YoloBox>)> {
        if rng.random::<f32>() >= self.probability {
            return source.load(index);
        }
        let len = source.len();
        if index >= len {
            return Err(DatasetError::IndexOutOfRange { index, len });
        }

        let mut indices = [
            index,
            rng.random_range(0..len),
            rng.random_range(0..len),
            rng.random_range(0..len),
        ];
        indices.shuffle(&mut *rng);

        let s = self.image_size as i64;
        let border = s / 2;
        let xc = rng.random_range(border..2 * s - border);
        let yc = rng.random_range(border..2 * s - border);
        trace!(?indices, xc, yc, "composing mosaic");

        self.compose_at(source, indices, (xc, yc))
    }

    /// Build a mosaic from four given samples around a fixed center, in quadrant order
    /// top-left, top-right, bottom-left, bottom-right.
    pub fn compose_at<S: ImageLabelSource + ?Sized>(
        &self,
        source: &S,
        indices: [usize; 4],
        center: (i64, i64),
    ) -> DatasetResult<(RgbImage, Vec<YoloBox>)> {
        let canvas_px = self.canvas_size();
        let canvas = canvas_px as i64;
        let (xc, yc) = center;
        let mut mosaic = RgbImage::from_pixel(canvas_px, canvas_px, self.fill);
        let mut corners: Vec<([f32; 4], u32)> = Vec::new();

        for (quadrant, &idx) in Quadrant::ALL.iter().zip(indices.iter()) {
            let (img, boxes) = source.load(idx)?;
            let (w, h) = (img.width() as i64, img.height() as i64);
            let tile = quadrant.placement(xc, yc, w, h, canvas);

            if tile.width() > 0 && tile.height() > 0 {
                let crop = imageops::crop_imm(
                    &img,
                    tile.src[0] as u32,
                    tile.src[1] as u32,
                    tile.width() as u32,
                    tile.height() as u32,
                )
                .to_image();
                imageops::replace(&mut mosaic, &crop, tile.dest[0], tile.dest[1]);
            }

            let (pad_x, pad_y) = tile.pad();
            corners.extend(boxes.iter().map(|b| {
                (
                    b.to_xyxy_px(w as f32, h as f32, pad_x as f32, pad_y as f32),
                    b.class_id,
                )
            }));
        }

        let limit = canvas as f32;
        let boxes = corners
            .into_iter()
            .map(|(xyxy, class_id)| {
                let clipped = xyxy.map(|v| v.clamp(0.0, limit));
                YoloBox::from_xyxy_px(clipped, limit, limit, class_id).clamp_unit()
            })
            .filter(|b| !b.is_degenerate())
            .collect();

        Ok((mosaic, boxes))
    }
}

#[cfg(test)]
mod mosaic_tests {
    use super::*;
    use crate::source::InMemorySource;
    use rand::SeedableRng;

    const COLORS: [[u8; 3]; 4] = [[255, 0, 0], [0, 255, 0], [0, 0, 255], [255, 255, 0]];

    fn solid_source(size: u32, full_boxes: bool) -> InMemorySource {
        InMemorySource::new(
            COLORS
                .iter()
                .enumerate()
                .map(|(i, c)| {
                    let boxes = if full_boxes {
                        vec![YoloBox::new(0.5, 0.5, 1.0, 1.0, i as u32)]
                    } else {
                        Vec::new()
                    };
                    (RgbImage::from_pixel(size, size, Rgb(*c)), boxes)
                })
                .collect(),
        )
    }

    #[test]
    fn placements_have_matching_extents() {
        for (xc, yc) in [(40, 40), (20, 59), (59, 20), (32, 50)] {
            for (w, h) in [(40, 40), (64, 30), (10, 80)] {
                for q in Quadrant::ALL {
                    let t = q.placement(xc, yc, w, h, 80);
                    assert_eq!(t.dest[2] - t.dest[0], t.src[2] - t.src[0], "{q:?}");
                    assert_eq!(t.dest[3] - t.dest[1], t.src[3] - t.src[1], "{q:?}");
                    assert!(t.dest.iter().all(|v| (0..=80).contains(v)));
                    assert!(t.src[0] >= 0 && t.src[2] <= w);
                    assert!(t.src[1] >= 0 && t.src[3] <= h);
                }
            }
        }
    }

    #[test]
    fn quadrants_are_filled_without_gaps() {
        let size = 40u32;
        let src = solid_source(size, false);
        let composer = MosaicComposer::new(size, 1.0, Rgb([1, 2, 3]));
        let (xc, yc) = (30i64, 50i64);
        let (img, _) = composer.compose_at(&src, [0, 1, 2, 3], (xc, yc)).expect("mosaic");
        assert_eq!(img.dimensions(), (80, 80));

        for (x, y, p) in img.enumerate_pixels() {
            let (x, y) = (x as i64, y as i64);
            let expected = match (x < xc, y < yc) {
                (true, true) if x >= xc - 40 && y >= yc - 40 => COLORS[0],
                (false, true) if x < xc + 40 && y >= yc - 40 => COLORS[1],
                (true, false) if x >= xc - 40 && y < yc + 40 => COLORS[2],
                (false, false) if x < xc + 40 && y < yc + 40 => COLORS[3],
                _ => [1, 2, 3],
            };
            assert_eq!(p.0, expected, "pixel ({x}, {y})");
        }
    }

    #[test]
    fn full_image_boxes_map_to_quadrant_fractions() {
        let size = 40u32;
        let src = solid_source(size, true);
        let composer = MosaicComposer::new(size, 1.0, Rgb([0, 0, 0]));
        let (xc, yc) = (30i64, 50i64);
        let (_, boxes) = composer.compose_at(&src, [0, 1, 2, 3], (xc, yc)).expect("mosaic");
        assert_eq!(boxes.len(), 4);

        let c = 80.0f32;
        // expected xyxy rectangles of each quadrant, clipped to the canvas
        let rects = [
            [0.0, 10.0, 30.0, 50.0],
            [30.0, 10.0, 70.0, 50.0],
            [0.0, 50.0, 30.0, 80.0],
            [30.0, 50.0, 70.0, 80.0],
        ];
        for (b, r) in boxes.iter().zip(rects.iter()) {
            assert!((b.x - (r[0] + r[2]) / 2.0 / c).abs() < 1e-5, "{b:?}");
            assert!((b.y - (r[1] + r[3]) / 2.0 / c).abs() < 1e-5, "{b:?}");
            assert!((b.w - (r[2] - r[0]) / c).abs() < 1e-5, "{b:?}");
            assert!((b.h - (r[3] - r[1]) / c).abs() < 1e-5, "{b:?}");
        }
        assert_eq!(
            boxes.iter().map(|b| b.class_id).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
    }

    #[test]
    fn boxes_pushed_off_canvas_are_dropped() {
        let size = 40u32;
        // box hugging the left edge of a tile that gets clipped away on the left
        let left_strip = YoloBox::new(0.05, 0.5, 0.1, 0.5, 7);
        let keep = YoloBox::new(0.9, 0.5, 0.2, 0.5, 8);
        let mut src = solid_source(size, false);
        src.push(RgbImage::from_pixel(size, size, Rgb([9, 9, 9])), vec![left_strip, keep]);
        let composer = MosaicComposer::new(size, 1.0, Rgb([0, 0, 0]));
        // top-left tile of width 40 ending at xc = 20 loses its left 20 pixels
        let (_, boxes) = composer.compose_at(&src, [4, 1, 2, 3], (20, 40)).expect("mosaic");
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].class_id, 8);
        assert!(boxes.iter().all(|b| b.w > 0.0 && b.h > 0.0));
    }

    #[test]
    fn zero_probability_passes_through() {
        let src = solid_source(16, true);
        let composer = MosaicComposer::new(16, 0.0, Rgb([0, 0, 0]));
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let (img, boxes) = composer.compose(&src, 2, &mut rng).expect("compose");
        assert_eq!(img.dimensions(), (16, 16));
        assert_eq!(img.get_pixel(0, 0).0, COLORS[2]);
        assert_eq!(boxes, vec![YoloBox::new(0.5, 0.5, 1.0, 1.0, 2)]);
    }

    /// Pixels encode `(tile id, local x, local y)` so any canvas pixel names its source.
    fn coded_source(count: usize, size: u32) -> InMemorySource {
        InMemorySource::new(
            (0..count)
                .map(|i| {
                    let img = RgbImage::from_fn(size, size, |x, y| {
                        Rgb([20 + 30 * i as u8, x as u8, y as u8])
                    });
                    (img, Vec::new())
                })
                .collect(),
        )
    }

    #[test]
    fn random_mosaic_keeps_primary_and_centers_in_middle_band() {
        let (size, count) = (16u32, 6usize);
        let s = size;
        let src = coded_source(count, size);
        let composer = MosaicComposer::new(size, 1.0, Rgb([255, 0, 0]));
        let tile_of = |p: &Rgb<u8>| (p.0[0] != 255).then(|| ((p.0[0] - 20) / 30) as usize);

        for seed in 0..200u64 {
            let primary = seed as usize % count;
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            let (img, _) = composer.compose(&src, primary, &mut rng).expect("compose");
            assert_eq!(img.dimensions(), (2 * s, 2 * s));

            // the stitch point is where a tile's origin sits right below-right of another
            // tile's last pixel; only the bottom-right tile satisfies that
            let mut stitches = Vec::new();
            for y in 1..2 * s {
                for x in 1..2 * s {
                    let here = img.get_pixel(x, y);
                    let diag = img.get_pixel(x - 1, y - 1);
                    if tile_of(here).is_some()
                        && tile_of(diag).is_some()
                        && here.0[1..] == [0, 0]
                        && diag.0[1..] == [15, 15]
                    {
                        stitches.push((x, y));
                    }
                }
            }
            assert_eq!(stitches.len(), 1, "seed {seed}");
            let (xc, yc) = stitches[0];
            assert!((s / 2..3 * s / 2).contains(&xc), "seed {seed}: xc {xc}");
            assert!((s / 2..3 * s / 2).contains(&yc), "seed {seed}: yc {yc}");

            let tiles: Vec<usize> = [(xc - 1, yc - 1), (xc, yc - 1), (xc - 1, yc), (xc, yc)]
                .iter()
                .map(|&(x, y)| tile_of(img.get_pixel(x, y)).expect("tile pixel"))
                .collect();
            assert!(tiles.iter().all(|&t| t < count), "seed {seed}: {tiles:?}");
            assert!(tiles.contains(&primary), "seed {seed}: {tiles:?}");
        }
    }

    #[test]
    fn certain_probability_builds_double_canvas() {
        let src = solid_source(16, true);
        let composer = MosaicComposer::new(16, 1.0, Rgb([0, 0, 0]));
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        for _ in 0..8 {
            let (img, boxes) = composer.compose(&src, 1, &mut rng).expect("compose");
            assert_eq!(img.dimensions(), (32, 32));
            assert!(!boxes.is_empty() && boxes.len() <= 4);
            for b in &boxes {
                assert!(b.w > 0.0 && b.h > 0.0);
                assert!((0.0..=1.0).contains(&b.x) && (0.0..=1.0).contains(&b.y));
            }
        }
    }
}

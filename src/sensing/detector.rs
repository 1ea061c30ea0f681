use std::cmp::Ordering;

use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use imageproc::{
    contours::{find_contours, BorderType},
    distance_transform::Norm,
    drawing::draw_hollow_rect_mut,
    filter::median_filter,
    geometry::convex_hull,
    morphology::close,
    point::Point,
    rect::Rect,
};
use serde::{Deserialize, Serialize};

use crate::models::{BoundingBox, Candidate, CandidateBounds, Frame, RegionMetrics};

use super::imaging::{clahe, multi_canny};

/// Tunable geometry for [`CandidateDetector`]. Defaults describe a
/// plate-shaped region at 640x480 working resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectorConfig {
    pub clahe_clip_limit: f32,
    pub clahe_grid: u32,
    /// Median window radius; removes speckle while keeping plate borders sharp.
    pub smoothing_radius: u32,
    /// `(low, high)` hysteresis pairs, OR-combined.
    pub canny_thresholds: Vec<(f32, f32)>,
    pub closing_kernel: u32,
    pub min_area: f64,
    pub max_area: f64,
    pub min_aspect_ratio: f64,
    pub max_aspect_ratio: f64,
    pub min_solidity: f64,
    pub min_extent: f64,
    pub top_k: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            clahe_clip_limit: 2.0,
            clahe_grid: 8,
            smoothing_radius: 2,
            canny_thresholds: vec![(50.0, 150.0), (100.0, 200.0), (30.0, 100.0)],
            closing_kernel: 3,
            min_area: 1_000.0,
            max_area: 100_000.0,
            min_aspect_ratio: 1.5,
            max_aspect_ratio: 6.0,
            min_solidity: 0.3,
            min_extent: 0.2,
            top_k: 3,
        }
    }
}

impl DetectorConfig {
    fn bounds(&self) -> CandidateBounds {
        CandidateBounds {
            min_area: self.min_area,
            max_area: self.max_area,
            min_aspect_ratio: self.min_aspect_ratio,
            max_aspect_ratio: self.max_aspect_ratio,
            min_solidity: self.min_solidity,
            min_extent: self.min_extent,
        }
    }
}

/// Finds plate-shaped regions in a frame. Pure: identical pixels and
/// configuration always yield identical candidates.
#[derive(Debug, Clone, Default)]
pub struct CandidateDetector {
    config: DetectorConfig,
}

impl CandidateDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn find_candidates(&self, frame: &Frame) -> Vec<Candidate> {
        self.find_in_image(&frame.image)
    }

    /// Candidates ranked by [`Candidate::quality`], best first, at most `top_k`.
    pub fn find_in_image(&self, image: &DynamicImage) -> Vec<Candidate> {
        let gray = image.to_luma8();
        let edges = self.edge_map(&gray);

        let bounds = self.config.bounds();
        let mut candidates: Vec<Candidate> = external_regions(&edges, self.config.min_area)
            .into_iter()
            .filter_map(|metrics| Candidate::accept(metrics, &bounds))
            .collect();

        candidates.sort_by(|a, b| {
            b.quality()
                .partial_cmp(&a.quality())
                .unwrap_or(Ordering::Equal)
                .then_with(|| (a.bbox().y, a.bbox().x).cmp(&(b.bbox().y, b.bbox().x)))
        });
        candidates.truncate(self.config.top_k);
        candidates
    }

    /// Enhancement, smoothing, multi-threshold edges and closing.
    pub fn edge_map(&self, gray: &GrayImage) -> GrayImage {
        let cfg = &self.config;
        let enhanced = clahe(gray, cfg.clahe_clip_limit, cfg.clahe_grid);
        let smoothed = median_filter(&enhanced, cfg.smoothing_radius, cfg.smoothing_radius);
        let edges = multi_canny(&smoothed, &cfg.canny_thresholds);
        let radius = (cfg.closing_kernel / 2).min(u32::from(u8::MAX)) as u8;
        if radius == 0 {
            return edges;
        }
        close(&edges, Norm::LInf, radius)
    }
}

/// Metrics for every outermost contour of the edge map. Outlines nested in
/// another component are skipped, as are those whose bounding box cannot
/// reach `min_area`.
fn external_regions(edges: &GrayImage, min_area: f64) -> Vec<RegionMetrics> {
    find_contours::<i32>(edges)
        .into_iter()
        .filter(|contour| matches!(contour.border_type, BorderType::Outer) && contour.parent.is_none())
        .filter_map(|contour| region_metrics(&contour.points))
        .filter(|metrics| metrics.bbox.area() as f64 >= min_area)
        .collect()
}

fn region_metrics(points: &[Point<i32>]) -> Option<RegionMetrics> {
    let min_x = points.iter().map(|p| p.x).min()?;
    let max_x = points.iter().map(|p| p.x).max()?;
    let min_y = points.iter().map(|p| p.y).min()?;
    let max_y = points.iter().map(|p| p.y).max()?;

    let hull = convex_hull(points);
    Some(RegionMetrics {
        bbox: BoundingBox::new(
            min_x as u32,
            min_y as u32,
            (max_x - min_x + 1) as u32,
            (max_y - min_y + 1) as u32,
        ),
        area: polygon_area(points),
        hull_area: polygon_area(&hull),
    })
}

/// Shoelace area of a closed polygon.
fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| i64::from(a.x) * i64::from(b.y) - i64::from(b.x) * i64::from(a.y))
        .sum();
    twice.abs() as f64 / 2.0
}

/// Draws candidate outlines onto a caller-owned copy for snapshots.
pub fn draw_candidates(canvas: &mut RgbImage, candidates: &[Candidate]) {
    const COLOR: Rgb<u8> = Rgb([0, 255, 0]);
    const THICKNESS: u32 = 2;

    for candidate in candidates {
        let b = candidate.bbox();
        for inset in 0..THICKNESS {
            if b.width <= 2 * inset || b.height <= 2 * inset {
                break;
            }
            let rect = Rect::at((b.x + inset) as i32, (b.y + inset) as i32)
                .of_size(b.width - 2 * inset, b.height - 2 * inset);
            draw_hollow_rect_mut(canvas, rect, COLOR);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn scene(rects: &[(u32, u32, u32, u32)]) -> DynamicImage {
        let img = GrayImage::from_fn(320, 240, |x, y| {
            let inside = rects
                .iter()
                .any(|&(rx, ry, rw, rh)| x >= rx && x < rx + rw && y >= ry && y < ry + rh);
            Luma([if inside { 220 } else { 35 }])
        });
        DynamicImage::ImageLuma8(img)
    }

    #[test]
    fn finds_single_plate_shaped_rectangle() {
        let detector = CandidateDetector::default();
        let candidates = detector.find_in_image(&scene(&[(100, 100, 120, 36)]));

        assert_eq!(candidates.len(), 1);
        let bbox = candidates[0].bbox();
        assert!(bbox.x.abs_diff(100) <= 2 && bbox.y.abs_diff(100) <= 2);
        assert!(candidates[0].aspect_ratio() > 3.0 && candidates[0].aspect_ratio() < 3.6);
    }

    #[test]
    fn ignores_square_regions_and_blank_frames() {
        let detector = CandidateDetector::default();
        assert!(detector.find_in_image(&scene(&[(100, 60, 80, 80)])).is_empty());
        assert!(detector.find_in_image(&scene(&[])).is_empty());
    }

    #[test]
    fn ranks_larger_plates_first_and_caps_results() {
        let config = DetectorConfig {
            top_k: 2,
            ..DetectorConfig::default()
        };
        let detector = CandidateDetector::new(config);
        let image = scene(&[(10, 10, 90, 30), (10, 80, 150, 40), (10, 160, 120, 36)]);
        let candidates = detector.find_in_image(&image);

        assert_eq!(candidates.len(), 2);
        assert!(candidates[0].bbox().y.abs_diff(80) <= 2);
        assert!(candidates[1].bbox().y.abs_diff(160) <= 2);
    }

    #[test]
    fn nested_outline_is_not_a_separate_candidate() {
        // plate-shaped frame with a smaller plate-shaped block inside it
        let mut img = GrayImage::from_pixel(320, 240, Luma([35]));
        for y in 60..160 {
            for x in 20..300 {
                let ring = x < 26 || x >= 294 || y < 66 || y >= 154;
                let inner = (100..220).contains(&x) && (95..125).contains(&y);
                if ring || inner {
                    img.put_pixel(x, y, Luma([220]));
                }
            }
        }
        let candidates = CandidateDetector::default().find_in_image(&DynamicImage::ImageLuma8(img));
        assert_eq!(candidates.len(), 1);
        assert!(candidates[0].bbox().x.abs_diff(20) <= 2);
    }

    #[test]
    fn shoelace_area_of_axis_aligned_rectangle() {
        let rect = [
            Point::new(0, 0),
            Point::new(10, 0),
            Point::new(10, 4),
            Point::new(0, 4),
        ];
        assert_eq!(polygon_area(&rect), 40.0);
        assert_eq!(polygon_area(&rect[..2]), 0.0);
    }

    #[test]
    fn detection_is_deterministic() {
        let detector = CandidateDetector::default();
        let image = scene(&[(40, 50, 130, 40)]);
        assert_eq!(detector.find_in_image(&image), detector.find_in_image(&image));
    }

    #[test]
    fn drawing_leaves_source_frame_untouched() {
        let detector = CandidateDetector::default();
        let image = scene(&[(100, 100, 120, 36)]);
        let candidates = detector.find_in_image(&image);

        let mut canvas = image.to_rgb8();
        draw_candidates(&mut canvas, &candidates);
        assert_eq!(canvas.get_pixel(candidates[0].bbox().x, candidates[0].bbox().y), &Rgb([0, 255, 0]));
        assert_eq!(image.to_rgb8().get_pixel(100, 100), &Rgb([220, 220, 220]));
    }
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// 传统检测器: 灰度 → 模糊 → Canny → 外轮廓 → 面积/长宽比过滤
// 没有训练好的模型时使用

use image::{DynamicImage, GrayImage};
use imageproc::contours::{self, BorderType};
use imageproc::point::Point;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::backend::{BackendKind, DetectionBackend};
use super::types::{
    class_names, Proposals, RawCandidate, RawOutput, CLASSICAL_CLASSES, GENERIC_VEHICLE,
};
use crate::error::{Result, VisionError};
use crate::utils::LetterboxTransform;

/// 置信度上限
pub const MAX_CLASSICAL_CONFIDENCE: f32 = 0.6;
/// 面积 → 置信度的归一化因子
const AREA_NORMALIZER: f64 = 10_000.0;
const MIN_ASPECT: f64 = 0.5;
const MAX_ASPECT: f64 = 3.0;

/// 传统检测器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassicalDetectorConfig {
    pub min_area: f64,
    pub canny_low: f32,
    pub canny_high: f32,
    pub blur_sigma: f32,
    /// 启用面积/长宽比车型估计
    pub refine_vehicle_type: bool,
}

impl Default for ClassicalDetectorConfig {
    fn default() -> Self {
        Self {
            min_area: 1000.0,
            canny_low: 50.0,
            canny_high: 150.0,
            blur_sigma: 1.1,
            refine_vehicle_type: false,
        }
    }
}

/// 轮廓包围盒
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContourBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub area: f64,
}

impl ContourBox {
    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    pub fn confidence(&self) -> f32 {
        ((self.area / AREA_NORMALIZER) as f32).min(MAX_CLASSICAL_CONFIDENCE)
    }
}

/// 粗略的车型估计 (面积 + 长宽比)
pub fn classify_vehicle_type(aspect_ratio: f64, area: f64) -> &'static str {
    if aspect_ratio > 2.5 {
        if area > 5000.0 {
            "truck"
        } else {
            "car"
        }
    } else if aspect_ratio < 1.5 && area < 3000.0 {
        if area < 2000.0 {
            "bicycle"
        } else {
            "motorcycle"
        }
    } else {
        "car"
    }
}

pub struct ClassicalDetector {
    config: ClassicalDetectorConfig,
    names: Vec<String>,
}

impl ClassicalDetector {
    pub fn new(config: ClassicalDetectorConfig) -> Self {
        Self {
            config,
            names: class_names(&CLASSICAL_CLASSES),
        }
    }

    pub fn config(&self) -> &ClassicalDetectorConfig {
        &self.config
    }

    /// Edge map of the frame.
    pub fn edges(&self, image: &DynamicImage) -> GrayImage {
        let gray = image.to_luma8();
        let blurred = if self.config.blur_sigma > 0.0 {
            imageproc::filter::gaussian_blur_f32(&gray, self.config.blur_sigma)
        } else {
            gray
        };
        imageproc::edges::canny(&blurred, self.config.canny_low, self.config.canny_high)
    }

    /// External contours of `edges` that pass the area and aspect filters.
    pub fn boxes_from_edges(&self, edges: &GrayImage) -> Vec<ContourBox> {
        let found = contours::find_contours::<i32>(edges);
        let mut boxes = Vec::new();
        for contour in &found {
            if contour.border_type != BorderType::Outer || contour.parent.is_some() {
                continue;
            }
            let Some(b) = contour_box(&contour.points) else {
                continue;
            };
            if b.area <= self.config.min_area {
                continue;
            }
            let aspect = b.aspect_ratio();
            if aspect <= MIN_ASPECT || aspect >= MAX_ASPECT {
                continue;
            }
            boxes.push(b);
        }
        trace!(contours = found.len(), kept = boxes.len(), "classical contours");
        boxes
    }

    fn label_index(&self, b: &ContourBox) -> usize {
        let name = if self.config.refine_vehicle_type {
            classify_vehicle_type(b.aspect_ratio(), b.area)
        } else {
            GENERIC_VEHICLE
        };
        CLASSICAL_CLASSES
            .iter()
            .position(|c| *c == name)
            .unwrap_or(0)
    }

    pub fn candidates(&self, image: &DynamicImage) -> Vec<RawCandidate> {
        let edges = self.edges(image);
        self.boxes_from_edges(&edges)
            .into_iter()
            .map(|b| {
                let mut scores = vec![0.0; CLASSICAL_CLASSES.len()];
                scores[self.label_index(&b)] = b.confidence();
                RawCandidate::new(
                    b.x as f32 + b.width as f32 / 2.,
                    b.y as f32 + b.height as f32 / 2.,
                    b.width as f32,
                    b.height as f32,
                    scores,
                )
            })
            .collect()
    }
}

impl Default for ClassicalDetector {
    fn default() -> Self {
        Self::new(ClassicalDetectorConfig::default())
    }
}

impl DetectionBackend for ClassicalDetector {
    fn name(&self) -> &str {
        "classical-contours"
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Classical
    }

    fn class_names(&self) -> &[String] {
        &self.names
    }

    fn propose(&mut self, image: &DynamicImage) -> Result<Proposals> {
        if image.width() == 0 || image.height() == 0 {
            return Err(VisionError::InvalidDimension {
                width: image.width(),
                height: image.height(),
            });
        }
        // 候选框已在原图坐标系
        let transform = LetterboxTransform::identity(image.width(), image.height())?;
        Ok(Proposals {
            output: RawOutput::Candidates(self.candidates(image)),
            transform,
        })
    }
}

/// 包围盒 (宽高含端点像素) + 多边形面积
fn contour_box(points: &[Point<i32>]) -> Option<ContourBox> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for p in points {
        min_x = min_x.min(p.x);
        min_y = min_y.min(p.y);
        max_x = max_x.max(p.x);
        max_y = max_y.max(p.y);
    }
    Some(ContourBox {
        x: min_x.max(0) as u32,
        y: min_y.max(0) as u32,
        width: (max_x - min_x + 1) as u32,
        height: (max_y - min_y + 1) as u32,
        area: polygon_area(points),
    })
}

/// 鞋带公式
fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let mut twice = 0i64;
    for (i, p) in points.iter().enumerate() {
        let q = &points[(i + 1) % points.len()];
        twice += p.x as i64 * q.y as i64 - q.x as i64 * p.y as i64;
    }
    (twice.abs() as f64) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, RgbImage};
    use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
    use imageproc::rect::Rect;

    fn outline(w: u32, h: u32, rects: &[Rect]) -> GrayImage {
        let mut img = GrayImage::new(w, h);
        for r in rects {
            draw_hollow_rect_mut(&mut img, *r, Luma([255]));
        }
        img
    }

    #[test]
    fn shoelace_area_of_axis_aligned_square() {
        let pts = vec![
            Point::new(0, 0),
            Point::new(10, 0),
            Point::new(10, 10),
            Point::new(0, 10),
        ];
        assert_eq!(polygon_area(&pts), 100.0);
        assert_eq!(polygon_area(&pts[..2]), 0.0);
    }

    #[test]
    fn closed_outline_becomes_one_box() {
        let edges = outline(400, 300, &[Rect::at(50, 60).of_size(80, 40)]);
        let boxes = ClassicalDetector::default().boxes_from_edges(&edges);
        assert_eq!(boxes.len(), 1);
        let b = boxes[0];
        assert_eq!((b.x, b.y, b.width, b.height), (50, 60, 80, 40));
        assert_eq!(b.area, 79.0 * 39.0);
        assert_eq!(b.confidence(), (79.0 * 39.0 / 10_000.0f64) as f32);
    }

    #[test]
    fn small_and_elongated_outlines_are_rejected() {
        let edges = outline(
            600,
            400,
            &[
                Rect::at(10, 10).of_size(20, 20),   // area too small
                Rect::at(100, 10).of_size(300, 50), // aspect 6
                Rect::at(10, 100).of_size(40, 200), // aspect 0.2
            ],
        );
        assert!(ClassicalDetector::default()
            .boxes_from_edges(&edges)
            .is_empty());
    }

    #[test]
    fn nested_outline_is_not_external() {
        let edges = outline(
            400,
            400,
            &[
                Rect::at(20, 20).of_size(300, 200),
                Rect::at(80, 80).of_size(100, 60),
            ],
        );
        let boxes = ClassicalDetector::default().boxes_from_edges(&edges);
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].width, 300);
    }

    #[test]
    fn confidence_is_capped() {
        let b = ContourBox {
            x: 0,
            y: 0,
            width: 300,
            height: 200,
            area: 60_000.0,
        };
        assert_eq!(b.confidence(), MAX_CLASSICAL_CONFIDENCE);
    }

    #[test]
    fn vehicle_type_heuristic() {
        assert_eq!(classify_vehicle_type(2.8, 8000.0), "truck");
        assert_eq!(classify_vehicle_type(2.8, 4000.0), "car");
        assert_eq!(classify_vehicle_type(1.0, 1500.0), "bicycle");
        assert_eq!(classify_vehicle_type(1.2, 2500.0), "motorcycle");
        assert_eq!(classify_vehicle_type(1.2, 4000.0), "car");
        assert_eq!(classify_vehicle_type(2.0, 2500.0), "car");
    }

    #[test]
    fn filled_rectangle_on_frame_is_proposed_as_vehicle() {
        let mut rgb = RgbImage::new(320, 240);
        draw_filled_rect_mut(
            &mut rgb,
            Rect::at(60, 70).of_size(160, 80),
            image::Rgb([230, 230, 230]),
        );
        let image = DynamicImage::ImageRgb8(rgb);

        let mut detector = ClassicalDetector::default();
        let proposals = detector.propose(&image).unwrap();
        let RawOutput::Candidates(candidates) = proposals.output else {
            panic!("classical backend yields candidates");
        };
        assert!(!candidates.is_empty());
        let best = candidates
            .iter()
            .max_by(|a, b| (a.w * a.h).total_cmp(&(b.w * b.h)))
            .unwrap();
        assert!((best.cx - 140.0).abs() <= 3.0, "cx {}", best.cx);
        assert!((best.cy - 110.0).abs() <= 3.0, "cy {}", best.cy);
        assert_eq!(best.best_class().map(|(id, _)| id), Some(0));
    }

    fn contour(width: u32, height: u32, area: f64) -> ContourBox {
        ContourBox {
            x: 0,
            y: 0,
            width,
            height,
            area,
        }
    }

    #[test]
    fn refinement_labels_boxes_by_size_and_shape() {
        let refined = ClassicalDetector::new(ClassicalDetectorConfig {
            refine_vehicle_type: true,
            ..Default::default()
        });
        let label = |b: ContourBox| CLASSICAL_CLASSES[refined.label_index(&b)];
        // 长宽比 2.8, 面积 27000
        assert_eq!(label(contour(280, 100, 27_000.0)), "truck");
        assert_eq!(label(contour(200, 100, 19_000.0)), "car");
        assert_eq!(label(contour(50, 40, 1_900.0)), "bicycle");
        assert_eq!(label(contour(55, 45, 2_400.0)), "motorcycle");

        let plain = ClassicalDetector::default();
        let b = contour(280, 100, 27_000.0);
        assert_eq!(CLASSICAL_CLASSES[plain.label_index(&b)], GENERIC_VEHICLE);
    }
}

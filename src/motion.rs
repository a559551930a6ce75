// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 运动门控 (Motion gate)
///
/// 灰度 → 缩小到 320x240 → 高斯模糊 → 与上一帧做差分
/// Only the previous reduced frame is kept; every call replaces it.
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage};
use tracing::trace;

pub const MOTION_WIDTH: u32 = 320;
pub const MOTION_HEIGHT: u32 = 240;

/// 运动门控配置
#[derive(Debug, Clone, Copy)]
pub struct MotionConfig {
    /// 变化像素百分比阈值 (0-100), 严格大于才算运动
    pub threshold_percent: f32,
    /// 像素差大于此值才算变化
    pub noise_floor: u8,
    pub blur_sigma: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            threshold_percent: 3.0,
            noise_floor: 25,
            blur_sigma: 2.0,
        }
    }
}

pub struct MotionGate {
    config: MotionConfig,
    previous: Option<GrayImage>,
}

impl MotionGate {
    pub fn new(config: MotionConfig) -> Self {
        Self {
            config,
            previous: None,
        }
    }

    pub fn config(&self) -> &MotionConfig {
        &self.config
    }

    pub fn has_reference(&self) -> bool {
        self.previous.is_some()
    }

    /// Forget the stored frame; the next call behaves like the first one.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    /// Returns `(has_motion, changed_percent)`.
    ///
    /// The first frame (and any frame after `reset`) reports `(false, 0.0)`.
    /// Zero-sized frames report `(false, 0.0)` and leave the stored frame untouched.
    pub fn evaluate(&mut self, image: &DynamicImage) -> (bool, f32) {
        if image.width() == 0 || image.height() == 0 {
            return (false, 0.0);
        }

        let current = self.reduce(image);
        let changed = self.previous.as_ref().map(|previous| {
            let floor = self.config.noise_floor;
            previous
                .as_raw()
                .iter()
                .zip(current.as_raw())
                .filter(|(a, b)| a.abs_diff(**b) > floor)
                .count()
        });
        let total = current.as_raw().len();
        self.previous = Some(current);

        let Some(changed) = changed else {
            trace!("motion gate primed");
            return (false, 0.0);
        };
        let percent = changed as f32 * 100.0 / total as f32;
        let has_motion = percent > self.config.threshold_percent;

        trace!(percent, has_motion, "motion evaluated");
        (has_motion, percent)
    }

    fn reduce(&self, image: &DynamicImage) -> GrayImage {
        let gray = image.to_luma8();
        let small = if gray.dimensions() == (MOTION_WIDTH, MOTION_HEIGHT) {
            gray
        } else {
            imageops::resize(&gray, MOTION_WIDTH, MOTION_HEIGHT, FilterType::Triangle)
        };
        if self.config.blur_sigma > 0.0 {
            imageproc::filter::gaussian_blur_f32(&small, self.config.blur_sigma)
        } else {
            small
        }
    }
}

impl Default for MotionGate {
    fn default() -> Self {
        Self::new(MotionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb, RgbImage};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn flat(w: u32, h: u32, v: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(w, h, Rgb([v, v, v])))
    }

    #[test]
    fn first_frame_never_reports_motion() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..5 {
            let img = RgbImage::from_fn(200, 150, |_, _| Rgb([rng.gen(), rng.gen(), rng.gen()]));
            let mut gate = MotionGate::default();
            assert_eq!(gate.evaluate(&DynamicImage::ImageRgb8(img)), (false, 0.0));
            assert!(gate.has_reference());
        }
    }

    #[test]
    fn identical_frames_have_no_motion() {
        let mut gate = MotionGate::default();
        gate.evaluate(&flat(640, 480, 90));
        assert_eq!(gate.evaluate(&flat(640, 480, 90)), (false, 0.0));
    }

    #[test]
    fn full_frame_change_is_motion() {
        let mut gate = MotionGate::default();
        gate.evaluate(&flat(640, 480, 20));
        let (moved, percent) = gate.evaluate(&flat(640, 480, 200));
        assert!(moved);
        assert_eq!(percent, 100.0);
    }

    #[test]
    fn small_change_stays_below_threshold() {
        let mut gate = MotionGate::default();
        let base = GrayImage::from_pixel(320, 240, Luma([50]));
        let mut moved = base.clone();
        // 约 1% 的像素
        for y in 100..124 {
            for x in 100..132 {
                moved.put_pixel(x, y, Luma([250]));
            }
        }
        gate.evaluate(&DynamicImage::ImageLuma8(base));
        let (has_motion, percent) = gate.evaluate(&DynamicImage::ImageLuma8(moved));
        assert!(percent > 0.0 && percent < 3.0, "{percent}");
        assert!(!has_motion);
    }

    #[test]
    fn change_equal_to_the_threshold_is_not_motion() {
        // 左半边变化, 正好 50%
        let base = GrayImage::from_pixel(MOTION_WIDTH, MOTION_HEIGHT, Luma([0]));
        let mut half = base.clone();
        for y in 0..MOTION_HEIGHT {
            for x in 0..MOTION_WIDTH / 2 {
                half.put_pixel(x, y, Luma([200]));
            }
        }
        let gate_at = |threshold_percent| {
            let mut gate = MotionGate::new(MotionConfig {
                threshold_percent,
                blur_sigma: 0.0,
                ..Default::default()
            });
            gate.evaluate(&DynamicImage::ImageLuma8(base.clone()));
            gate.evaluate(&DynamicImage::ImageLuma8(half.clone()))
        };

        assert_eq!(gate_at(50.0), (false, 50.0));
        assert_eq!(gate_at(49.9), (true, 50.0));
    }

    #[test]
    fn stored_frame_is_replaced_each_call() {
        let mut gate = MotionGate::default();
        gate.evaluate(&flat(320, 240, 0));
        assert!(gate.evaluate(&flat(320, 240, 255)).0);
        // 与上一帧 (255) 相同
        assert!(!gate.evaluate(&flat(320, 240, 255)).0);
    }

    #[test]
    fn empty_frame_leaves_state_alone() {
        let mut gate = MotionGate::default();
        assert_eq!(gate.evaluate(&flat(0, 0, 0)), (false, 0.0));
        assert!(!gate.has_reference());
    }

    #[test]
    fn reset_reprimes_the_gate() {
        let mut gate = MotionGate::default();
        gate.evaluate(&flat(100, 100, 0));
        gate.reset();
        assert_eq!(gate.evaluate(&flat(100, 100, 255)), (false, 0.0));
    }
}

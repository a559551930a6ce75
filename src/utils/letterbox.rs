// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 信箱变换 (Letterbox transform)
///
/// 保持宽高比缩放到正方形模型输入, 剩余部分用灰色填充
/// Scale + padding mapping between source pixels and the square model input.
use fast_image_resize as fr;
use image::{DynamicImage, Rgb, RgbImage};

use crate::error::{Result, VisionError};

/// Neutral gray used for the padded border.
pub const LETTERBOX_FILL: u8 = 114;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
    scale: f32,
    pad_x: u32,
    pad_y: u32,
    src_w: u32,
    src_h: u32,
    dst_w: u32,
    dst_h: u32,
}

impl LetterboxTransform {
    /// Fit a `src_w x src_h` image into a `dst_size x dst_size` square.
    pub fn compute(src_w: u32, src_h: u32, dst_size: u32) -> Result<Self> {
        if src_w == 0 || src_h == 0 {
            return Err(VisionError::InvalidDimension {
                width: src_w,
                height: src_h,
            });
        }
        if dst_size == 0 {
            return Err(VisionError::InvalidDimension {
                width: dst_size,
                height: dst_size,
            });
        }

        let scale_w = dst_size as f32 / src_w as f32;
        let scale_h = dst_size as f32 / src_h as f32;
        let scale = scale_w.min(scale_h);
        let new_w = (src_w as f32 * scale).round() as u32;
        let new_h = (src_h as f32 * scale).round() as u32;

        Ok(Self {
            scale,
            pad_x: dst_size.saturating_sub(new_w) / 2,
            pad_y: dst_size.saturating_sub(new_h) / 2,
            src_w,
            src_h,
            dst_w: dst_size,
            dst_h: dst_size,
        })
    }

    /// No scaling, no padding. Used for candidates that are already in source space.
    pub fn identity(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(VisionError::InvalidDimension { width, height });
        }
        Ok(Self {
            scale: 1.0,
            pad_x: 0,
            pad_y: 0,
            src_w: width,
            src_h: height,
            dst_w: width,
            dst_h: height,
        })
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn pad_x(&self) -> u32 {
        self.pad_x
    }

    pub fn pad_y(&self) -> u32 {
        self.pad_y
    }

    pub fn src_size(&self) -> (u32, u32) {
        (self.src_w, self.src_h)
    }

    pub fn dst_size(&self) -> (u32, u32) {
        (self.dst_w, self.dst_h)
    }

    /// Size of the scaled image inside the padded canvas.
    pub fn resized_size(&self) -> (u32, u32) {
        (
            (self.src_w as f32 * self.scale).round() as u32,
            (self.src_h as f32 * self.scale).round() as u32,
        )
    }

    /// Source pixel -> model input coordinate.
    pub fn forward(&self, x: f32, y: f32) -> (f32, f32) {
        (
            x * self.scale + self.pad_x as f32,
            y * self.scale + self.pad_y as f32,
        )
    }

    /// Model input coordinate -> source pixel. Not clamped.
    pub fn inverse(&self, x: f32, y: f32) -> (f32, f32) {
        (
            (x - self.pad_x as f32) / self.scale,
            (y - self.pad_y as f32) / self.scale,
        )
    }

    /// `inverse` followed by clamping into `[0, src_w] x [0, src_h]`.
    pub fn inverse_clamped(&self, x: f32, y: f32) -> (f32, f32) {
        let (sx, sy) = self.inverse(x, y);
        (
            sx.clamp(0.0, self.src_w as f32),
            sy.clamp(0.0, self.src_h as f32),
        )
    }
}

/// Resize `image` into the letterbox canvas described by `transform`.
pub fn letterbox_image(image: &DynamicImage, transform: &LetterboxTransform) -> Result<RgbImage> {
    let (src_w, src_h) = transform.src_size();
    if image.width() != src_w || image.height() != src_h {
        return Err(VisionError::InvalidDimension {
            width: image.width(),
            height: image.height(),
        });
    }

    let (dst_w, dst_h) = transform.dst_size();
    let (new_w, new_h) = transform.resized_size();
    // 极细长图像可能缩放到0像素
    let (new_w, new_h) = (new_w.clamp(1, dst_w), new_h.clamp(1, dst_h));

    let resize_error = || VisionError::InvalidDimension {
        width: new_w,
        height: new_h,
    };

    let rgb = image.to_rgb8();
    let src = fr::images::ImageRef::new(src_w, src_h, rgb.as_raw(), fr::PixelType::U8x3)
        .map_err(|_| resize_error())?;
    let mut dst = fr::images::Image::new(new_w, new_h, fr::PixelType::U8x3);

    let mut resizer = fr::Resizer::new();
    let bilinear = fr::ResizeAlg::Convolution(fr::FilterType::Bilinear);
    let options = fr::ResizeOptions::new().resize_alg(bilinear);
    resizer
        .resize(&src, &mut dst, Some(&options))
        .map_err(|_| resize_error())?;

    let resized = RgbImage::from_raw(new_w, new_h, dst.buffer().to_vec())
        .ok_or_else(resize_error)?;

    let mut canvas = RgbImage::from_pixel(dst_w, dst_h, Rgb([LETTERBOX_FILL; 3]));
    image::imageops::replace(
        &mut canvas,
        &resized,
        transform.pad_x() as i64,
        transform.pad_y() as i64,
    );
    Ok(canvas)
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 原始帧缓冲 → DynamicImage
/// Raw camera buffers to images, with geometry checks.
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VisionError};

/// 像素排列
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelLayout {
    Rgb8,
    /// 摄像头常见的BGR顺序
    Bgr8,
    Rgba8,
    Gray8,
}

impl PixelLayout {
    pub fn channels(&self) -> usize {
        match self {
            PixelLayout::Rgb8 | PixelLayout::Bgr8 => 3,
            PixelLayout::Rgba8 => 4,
            PixelLayout::Gray8 => 1,
        }
    }
}

/// Rejects zero-sized images.
pub fn check_dimensions(image: &DynamicImage) -> Result<()> {
    if image.width() == 0 || image.height() == 0 {
        return Err(VisionError::InvalidDimension {
            width: image.width(),
            height: image.height(),
        });
    }
    Ok(())
}

/// Wrap a tightly packed buffer of `width * height * channels` bytes.
pub fn image_from_raw(
    data: Vec<u8>,
    width: u32,
    height: u32,
    layout: PixelLayout,
) -> Result<DynamicImage> {
    let invalid = || VisionError::InvalidDimension { width, height };
    if width == 0 || height == 0 {
        return Err(invalid());
    }
    let expected = (width as usize)
        .checked_mul(height as usize)
        .and_then(|n| n.checked_mul(layout.channels()))
        .ok_or_else(invalid)?;
    if data.len() != expected {
        return Err(invalid());
    }

    let (w, h) = (width, height);
    let data = match layout {
        PixelLayout::Bgr8 => {
            let mut data = data;
            for px in data.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            data
        }
        _ => data,
    };
    let image = match layout {
        PixelLayout::Rgb8 | PixelLayout::Bgr8 => {
            RgbImage::from_raw(w, h, data).map(DynamicImage::from)
        }
        PixelLayout::Rgba8 => RgbaImage::from_raw(w, h, data).map(DynamicImage::from),
        PixelLayout::Gray8 => GrayImage::from_raw(w, h, data).map(DynamicImage::from),
    };
    image.ok_or_else(invalid)
}

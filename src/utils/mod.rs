/// 工具模块
/// Utility modules
pub mod letterbox;

pub use letterbox::{letterbox_image, LetterboxTransform, LETTERBOX_FILL};

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 工具模块
/// Utility modules
pub mod download;
pub mod letterbox;

pub use letterbox::{letterbox, make_divisible, Letterbox};

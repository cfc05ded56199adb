// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测系统 (Detection System)
///
/// - types:       帧 / 检测框 / 常量
/// - postprocess: 置信度过滤 + NMS + 坐标还原
pub mod postprocess;
pub mod types;

pub use postprocess::postprocess;
pub use types::{Detection, DetectionSet, Frame};

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 模型接口与实现
///
/// ## 核心流程
/// ```text
/// letterbox 图片 → preprocess → NCHW 张量
///          ↓
///     推理引擎 run (Backend)
///          ↓
///     原始输出 → postprocess → 检测结果
/// ```
pub mod yolo;

pub use yolo::{check_img_size, preprocess, YOLO};

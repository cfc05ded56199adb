// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 检测流水线错误类型 (Detection pipeline errors)
//!
//! 致命错误 (启动前): SourceNotFound / ModelLoad / InvalidConfig
//! 单帧错误 (跳过该帧): Shape / Decode / Inference

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectError {
    /// 输入源不存在或无法打开
    #[error("source not found: {source_desc} ({reason})")]
    SourceNotFound { source_desc: String, reason: String },

    /// 模型文件缺失或损坏
    #[error("failed to load model {path}: {reason}")]
    ModelLoad { path: String, reason: String },

    /// 参数越界
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// 张量形状与模型声明不一致
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    Shape {
        expected: Vec<i64>,
        actual: Vec<usize>,
    },

    /// 单张图片/单帧解码失败
    #[error("failed to decode {origin}: {reason}")]
    Decode { origin: String, reason: String },

    /// 前向推理失败
    #[error("inference failed: {0}")]
    Inference(String),
}

impl DetectError {
    pub fn source_not_found(source_desc: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SourceNotFound {
            source_desc: source_desc.into(),
            reason: reason.into(),
        }
    }

    pub fn model_load(path: impl Into<String>, reason: impl ToString) -> Self {
        Self::ModelLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// 是否只影响当前帧 (流水线记录后继续)
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            Self::Shape { .. } | Self::Decode { .. } | Self::Inference(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_local_classification() {
        assert!(DetectError::Inference("boom".into()).is_frame_local());
        assert!(DetectError::Shape {
            expected: vec![1, 3, 640, 640],
            actual: vec![1, 3, 320, 320],
        }
        .is_frame_local());
        assert!(!DetectError::source_not_found("x.jpg", "missing").is_frame_local());
        assert!(!DetectError::model_load("m.onnx", "corrupt").is_frame_local());
    }

    #[test]
    fn test_display() {
        let e = DetectError::source_not_found("nope/", "path does not exist");
        assert_eq!(
            e.to_string(),
            "source not found: nope/ (path does not exist)"
        );
    }
}

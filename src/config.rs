// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 命令行参数与检测配置
//!
//! `Args` 由 clap 解析,`DetectConfig` 是校验后的检测参数,
//! 在任何处理开始前完成校验。

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::detection::types::{INF_SIZE, MAX_DET};
use crate::error::DetectError;

/// 模型输出头格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// 根据输出形状自动判断
    #[default]
    Auto,
    /// [1, N, 5+nc]: cx,cy,w,h,obj,cls...
    V5,
    /// [1, 4+nc, N]: cx,cy,w,h,cls...
    V8,
}

#[derive(Parser, Clone, Debug)]
#[command(author, version, about = "YOLO 目标检测 (ONNXRuntime)", long_about = None)]
pub struct Args {
    /// ONNX 模型路径或 http(s) 地址
    #[arg(long, required = true)]
    pub model: String,

    /// 输入源: 图片 / 目录 / 视频 / 摄像头序号 / 流地址
    #[arg(long, default_value = "data/images")]
    pub source: String,

    /// 推理尺寸 (像素)
    #[arg(long, default_value_t = INF_SIZE)]
    pub img_size: u32,

    /// 置信度阈值
    #[arg(long, default_value_t = 0.25)]
    pub conf: f32,

    /// NMS IoU 阈值
    #[arg(long, default_value_t = 0.45)]
    pub iou: f32,

    /// 只保留这些类别 (例: --classes 0 2)
    #[arg(long, num_args = 1..)]
    pub classes: Option<Vec<usize>>,

    /// 跨类别 NMS
    #[arg(long)]
    pub agnostic_nms: bool,

    /// 每帧最多检测框
    #[arg(long, default_value_t = MAX_DET)]
    pub max_det: usize,

    /// 输出头格式
    #[arg(long, value_enum, default_value_t = OutputFormat::Auto)]
    pub format: OutputFormat,

    /// GPU 设备号
    #[arg(long, default_value_t = 0)]
    pub device_id: i32,

    /// 使用 TensorRT EP
    #[arg(long)]
    pub trt: bool,

    /// 使用 CUDA EP
    #[arg(long)]
    pub cuda: bool,

    /// TensorRT FP16
    #[arg(long)]
    pub fp16: bool,

    /// 保存标注后的图片
    #[arg(long)]
    pub save: bool,

    /// 保存检测结果 (detections.jsonl)
    #[arg(long)]
    pub save_txt: bool,

    /// 输出根目录
    #[arg(long, default_value = "runs/detect")]
    pub project: PathBuf,

    /// 输出子目录名 (默认按时间生成)
    #[arg(long)]
    pub name: Option<String>,

    /// 标签字体 (ttf/otf),不提供则只画框
    #[arg(long)]
    pub font: Option<PathBuf>,

    /// 处理 N 帧后停止
    #[arg(long)]
    pub max_frames: Option<u64>,

    /// 打印每帧耗时
    #[arg(long)]
    pub profile: bool,
}

/// 校验后的检测参数
#[derive(Debug, Clone, PartialEq)]
pub struct DetectConfig {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub image_size: u32,
    pub class_filter: Option<Vec<usize>>,
    pub class_agnostic_nms: bool,
    pub max_det: usize,
    pub format: OutputFormat,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            image_size: INF_SIZE,
            class_filter: None,
            class_agnostic_nms: false,
            max_det: MAX_DET,
            format: OutputFormat::Auto,
        }
    }
}

impl DetectConfig {
    pub fn validate(self) -> Result<Self, DetectError> {
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(DetectError::InvalidConfig(format!(
                "confidence threshold {} not in [0, 1]",
                self.confidence_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.iou_threshold) {
            return Err(DetectError::InvalidConfig(format!(
                "iou threshold {} not in [0, 1]",
                self.iou_threshold
            )));
        }
        if self.image_size == 0 {
            return Err(DetectError::InvalidConfig(
                "image size must be positive".to_string(),
            ));
        }
        if self.max_det == 0 {
            return Err(DetectError::InvalidConfig(
                "max_det must be positive".to_string(),
            ));
        }
        Ok(self)
    }

    /// 类别是否通过过滤
    pub fn accepts_class(&self, class_id: usize) -> bool {
        self.class_filter
            .as_ref()
            .map_or(true, |classes| classes.contains(&class_id))
    }
}

impl TryFrom<&Args> for DetectConfig {
    type Error = DetectError;

    fn try_from(args: &Args) -> Result<Self, Self::Error> {
        DetectConfig {
            confidence_threshold: args.conf,
            iou_threshold: args.iou,
            image_size: args.img_size,
            class_filter: args.classes.clone(),
            class_agnostic_nms: args.agnostic_nms,
            max_det: args.max_det,
            format: args.format,
        }
        .validate()
    }
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
//
// YOLO 检测模型
// 包含: 模型加载、预处理、推理、后处理

use std::time::Instant;

use ndarray::{Array, IxDyn};
use tracing::{debug, info, warn};

use crate::config::{Args, DetectConfig};
use crate::detection::types::DEFAULT_STRIDE;
use crate::detection::{self, DetectionSet};
use crate::error::DetectError;
use crate::renderer::class_name;
use crate::ort_backend::{check_shape, Backend, InputTensor, OrtBackend, OrtConfig, OrtEP, Precision};
use crate::utils::{download, make_divisible, Letterbox};

/// 预处理: letterbox 图像 → (1, 3, size, size) 张量, 像素值缩放到 [0, 1]
pub fn preprocess(lb: &Letterbox, size: u32, precision: Precision) -> Result<InputTensor, DetectError> {
    let (w, h) = lb.size();
    if (w, h) != (size, size) {
        return Err(DetectError::Shape {
            expected: vec![size as i64, size as i64],
            actual: vec![w as usize, h as usize],
        });
    }

    let mut ys = Array::zeros((1, 3, size as usize, size as usize));
    for (x, y, rgb) in lb.image.enumerate_pixels() {
        let x = x as usize;
        let y = y as usize;
        let [r, g, b] = rgb.0;
        ys[[0, 0, y, x]] = (r as f32) / 255.0;
        ys[[0, 1, y, x]] = (g as f32) / 255.0;
        ys[[0, 2, y, x]] = (b as f32) / 255.0;
    }

    Ok(InputTensor {
        data: ys.into_dyn(),
        precision,
    })
}

/// 根据模型声明与配置确定推理尺寸
///
/// 静态输入以模型为准; 动态输入把配置尺寸向上取整到 stride 的倍数
pub fn check_img_size(declared: &[i64], requested: u32, stride: u32) -> Result<u32, DetectError> {
    if declared.len() != 4 || (declared[1] > 0 && declared[1] != 3) {
        return Err(DetectError::InvalidConfig(format!(
            "model input must be NCHW with 3 channels, got {declared:?}"
        )));
    }
    let (h, w) = (declared[2], declared[3]);
    if h > 0 && w > 0 {
        if h != w {
            return Err(DetectError::InvalidConfig(format!(
                "only square model inputs are supported, got {h}x{w}"
            )));
        }
        if h as u32 != requested {
            warn!("⚠️ 模型输入固定为 {}, 忽略 --img-size {}", h, requested);
        }
        return Ok(h as u32);
    }

    let size = make_divisible(requested, stride);
    if size != requested {
        warn!(
            "⚠️ --img-size {} 不是 stride {} 的倍数, 调整为 {}",
            requested, stride, size
        );
    }
    Ok(size)
}

/// YOLO 检测模型 (模型运行器 + 后处理配置)
pub struct YOLO {
    engine: Box<dyn Backend>,
    config: DetectConfig,
    size: u32,
    stride: u32,
    precision: Precision,
    names: Vec<String>,
    profile: bool,
}

impl YOLO {
    /// 从命令行参数加载 ONNX 模型
    pub fn new(args: &Args) -> Result<Self, DetectError> {
        let config = DetectConfig::try_from(args)?;

        // execution provider
        let ep = if args.trt {
            OrtEP::Trt(args.device_id)
        } else if args.cuda {
            OrtEP::CUDA(args.device_id)
        } else {
            OrtEP::CPU
        };

        let weights = download::resolve_weights(&args.model)
            .map_err(|e| DetectError::model_load(args.model.clone(), format!("{e:#}")))?;
        let engine = OrtBackend::build(OrtConfig {
            f: weights.to_string_lossy().into_owned(),
            ep,
            trt_fp16: args.fp16,
            ..Default::default()
        })?;

        let mut model = Self::with_backend(Box::new(engine), config)?;
        model.set_profile(args.profile);
        Ok(model)
    }

    /// 使用任意推理后端构建
    pub fn with_backend(engine: Box<dyn Backend>, config: DetectConfig) -> Result<Self, DetectError> {
        let stride = engine.stride().unwrap_or(DEFAULT_STRIDE);
        let size = check_img_size(engine.input_shape(), config.image_size, stride)?;
        let precision = engine.precision();
        let names = engine.names().unwrap_or_default();

        Ok(Self {
            engine,
            config,
            size,
            stride,
            precision,
            names,
            profile: false,
        })
    }

    pub fn preprocess(&self, lb: &Letterbox) -> Result<InputTensor, DetectError> {
        preprocess(lb, self.size, self.precision)
    }

    /// 执行一次前向推理; 输入形状必须与模型声明一致
    pub fn run(&mut self, xs: &InputTensor) -> Result<Vec<Array<f32, IxDyn>>, DetectError> {
        check_shape(self.engine.input_shape(), xs.shape())?;
        self.engine.run(xs)
    }

    pub fn postprocess(
        &self,
        ys: &[Array<f32, IxDyn>],
        lb: &Letterbox,
        original_size: (u32, u32),
    ) -> Result<DetectionSet, DetectError> {
        detection::postprocess(ys, &self.config, lb, original_size)
    }

    /// 完整流程: preprocess → run → postprocess
    pub fn forward(
        &mut self,
        lb: &Letterbox,
        original_size: (u32, u32),
    ) -> Result<DetectionSet, DetectError> {
        let t_pre = Instant::now();
        let xs = self.preprocess(lb)?;
        if self.profile {
            debug!("[Model Preprocess]: {:?}", t_pre.elapsed());
        }

        let t_run = Instant::now();
        let ys = self.run(&xs)?;
        if self.profile {
            debug!("[Model Inference]: {:?}", t_run.elapsed());
        }

        let t_post = Instant::now();
        let dets = self.postprocess(&ys, lb, original_size)?;
        if self.profile {
            debug!("[Model Postprocess]: {:?}", t_post.elapsed());
        }
        Ok(dets)
    }

    pub fn summary(&self) {
        info!(
            "\nSummary:\n\
            > Input: 1x3x{}x{} ({:?}), stride: {}\n\
            > Classes: {}\n\
            > conf: {}, iou: {}, agnostic: {}, max_det: {}, filter: {:?}",
            self.size,
            self.size,
            self.precision,
            self.stride,
            if self.names.is_empty() {
                "unknown".to_string()
            } else {
                self.names.len().to_string()
            },
            self.config.confidence_threshold,
            self.config.iou_threshold,
            self.config.class_agnostic_nms,
            self.config.max_det,
            self.config.class_filter,
        );
    }

    /// 类别名称,缺失时用 class{id}
    pub fn name(&self, id: usize) -> String {
        class_name(&self.names, id)
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn precision(&self) -> Precision {
        self.precision
    }

    pub fn config(&self) -> &DetectConfig {
        &self.config
    }

    pub fn set_profile(&mut self, profile: bool) {
        self.profile = profile;
    }
}

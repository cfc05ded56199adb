// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! ONNXRuntime 推理后端
//!
//! 模型只在启动时加载一次,之后只读。`Backend` trait 把推理引擎与
//! 流水线解耦,测试中可替换为内存实现。

use std::path::Path;

use ndarray::{Array, IxDyn};
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
    TensorRTExecutionProvider,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionOutputs};
use ort::tensor::TensorElementType;
use ort::value::{Tensor, ValueType};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::error::DetectError;

/// 执行设备 (Execution Provider)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrtEP {
    CPU,
    CUDA(i32),
    Trt(i32),
}

/// 输入数值精度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    #[default]
    Full, // f32
    Half, // f16
}

/// 送入模型的输入张量 (NCHW)
#[derive(Debug, Clone)]
pub struct InputTensor {
    pub data: Array<f32, IxDyn>,
    pub precision: Precision,
}

impl InputTensor {
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }
}

/// 推理引擎接口
pub trait Backend {
    /// 模型声明的输入形状,动态维度为 -1
    fn input_shape(&self) -> &[i64];

    /// 模型期望的输入精度
    fn precision(&self) -> Precision;

    /// 类别名称 (来自模型元数据)
    fn names(&self) -> Option<Vec<String>>;

    /// 模型步长 (来自模型元数据)
    fn stride(&self) -> Option<u32>;

    /// 执行一次前向推理,返回全部输出 (f32)
    fn run(&mut self, xs: &InputTensor) -> Result<Vec<Array<f32, IxDyn>>, DetectError>;
}

/// 检查实际形状是否满足模型声明 (动态维度匹配任意值)
pub fn check_shape(declared: &[i64], actual: &[usize]) -> Result<(), DetectError> {
    let ok = declared.len() == actual.len()
        && declared
            .iter()
            .zip(actual)
            .all(|(&d, &a)| d < 0 || d as usize == a);
    if ok {
        Ok(())
    } else {
        Err(DetectError::Shape {
            expected: declared.to_vec(),
            actual: actual.to_vec(),
        })
    }
}

/// 类别 id 上限,超过视为损坏的元数据
pub const MAX_CLASS_ID: usize = 100_000;

/// 解析 Ultralytics 导出的 names 元数据: "{0: 'drone', 1: 'bird'}"
pub fn parse_names(raw: &str) -> Option<Vec<String>> {
    let re = Regex::new(r#"(\d+)\s*:\s*['"]([^'"]*)['"]"#).ok()?;
    let mut pairs: Vec<(usize, String)> = re
        .captures_iter(raw)
        .filter_map(|c| Some((c[1].parse().ok()?, c[2].to_string())))
        .collect();
    if pairs.is_empty() {
        return None;
    }
    pairs.sort_by_key(|(id, _)| *id);
    let max_id = pairs.last().map(|(id, _)| *id)?;
    if max_id > MAX_CLASS_ID {
        warn!("⚠️ names 元数据中的类别 id 过大: {}", max_id);
        return None;
    }
    let n = max_id + 1;
    let mut names: Vec<String> = (0..n).map(|i| format!("class{i}")).collect();
    for (id, name) in pairs {
        names[id] = name;
    }
    Some(names)
}

/// 解析 stride 元数据 ("32" 或 "[8, 16, 32]"), 取最大值
pub fn parse_stride(raw: &str) -> Option<u32> {
    let re = Regex::new(r"\d+").ok()?;
    re.find_iter(raw).filter_map(|m| m.as_str().parse().ok()).max()
}

fn load_error<E: std::fmt::Display>(path: &str, e: E) -> DetectError {
    DetectError::model_load(path, e)
}

/// 后端构建参数
#[derive(Debug, Clone)]
pub struct OrtConfig {
    pub f: String,
    pub ep: OrtEP,
    pub trt_fp16: bool,
    pub intra_threads: usize,
}

impl Default for OrtConfig {
    fn default() -> Self {
        Self {
            f: String::new(),
            ep: OrtEP::CPU,
            trt_fp16: false,
            intra_threads: 4,
        }
    }
}

pub struct OrtBackend {
    session: Session,
    ep: OrtEP,
    input_name: String,
    output_names: Vec<String>,
    input_shape: Vec<i64>,
    dtype: TensorElementType,
    names: Option<Vec<String>>,
    stride: Option<u32>,
    author: Option<String>,
    version: Option<String>,
}

impl OrtBackend {
    pub fn build(config: OrtConfig) -> Result<Self, DetectError> {
        let path = config.f.clone();
        if !Path::new(&path).is_file() {
            return Err(DetectError::model_load(path, "file does not exist"));
        }
        let ep: ExecutionProviderDispatch = match config.ep {
            OrtEP::Trt(device_id) => TensorRTExecutionProvider::default()
                .with_device_id(device_id)
                .with_fp16(config.trt_fp16)
                .build(),
            OrtEP::CUDA(device_id) => CUDAExecutionProvider::default()
                .with_device_id(device_id)
                .build(),
            OrtEP::CPU => CPUExecutionProvider::default().build(),
        };

        let session = Session::builder()
            .map_err(|e| load_error(&path, e))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| load_error(&path, e))?
            .with_intra_threads(config.intra_threads)
            .map_err(|e| load_error(&path, e))?
            .with_execution_providers([ep])
            .map_err(|e| load_error(&path, e))?
            .commit_from_file(&path)
            .map_err(|e| load_error(&path, e))?;

        let input = session
            .inputs
            .first()
            .ok_or_else(|| DetectError::model_load(path.clone(), "model has no inputs"))?;
        let (dtype, input_shape) = match &input.input_type {
            ValueType::Tensor { ty, shape, .. } => {
                (*ty, shape.iter().copied().collect::<Vec<i64>>())
            }
            other => {
                return Err(DetectError::model_load(
                    path.clone(),
                    format!("unsupported input type {other:?}"),
                ))
            }
        };
        let input_name = input.name.clone();
        let output_names: Vec<String> = session.outputs.iter().map(|o| o.name.clone()).collect();
        if output_names.is_empty() {
            return Err(DetectError::model_load(path, "model has no outputs"));
        }

        // 元数据 (可能缺失)
        let (names, stride, author, version) = match session.metadata() {
            Ok(meta) => (
                meta.custom("names").ok().flatten().and_then(|s| parse_names(&s)),
                meta.custom("stride").ok().flatten().and_then(|s| parse_stride(&s)),
                meta.custom("author").ok().flatten(),
                meta.custom("version").ok().flatten(),
            ),
            Err(e) => {
                warn!("⚠️ 读取模型元数据失败: {}", e);
                (None, None, None, None)
            }
        };

        let backend = Self {
            session,
            ep: config.ep,
            input_name,
            output_names,
            input_shape,
            dtype,
            names,
            stride,
            author,
            version,
        };
        backend.log_loaded(&config.f);
        Ok(backend)
    }

    fn log_loaded(&self, path: &str) {
        info!(
            "✅ 模型加载成功: {}\n> EP: {:?}, dtype: {:?}, input: {:?}{}\n> author: {}, version: {}",
            path,
            self.ep(),
            self.dtype(),
            self.input_shape,
            if self.is_dynamic() { " (dynamic)" } else { "" },
            self.author().map(String::as_str).unwrap_or("-"),
            self.version().map(String::as_str).unwrap_or("-"),
        );
    }

    pub fn ep(&self) -> OrtEP {
        self.ep
    }

    pub fn dtype(&self) -> TensorElementType {
        self.dtype
    }

    pub fn author(&self) -> Option<&String> {
        self.author.as_ref()
    }

    pub fn version(&self) -> Option<&String> {
        self.version.as_ref()
    }

    /// 输入是否为动态尺寸
    pub fn is_dynamic(&self) -> bool {
        self.input_shape.iter().any(|&d| d < 0)
    }

    fn extract(
        outputs: &SessionOutputs<'_>,
        name: &str,
    ) -> Result<Array<f32, IxDyn>, DetectError> {
        let value = &outputs[name];
        let (shape, data) = match value.try_extract_tensor::<f32>() {
            Ok((shape, data)) => (shape.to_vec(), data.to_vec()),
            Err(_) => {
                let (shape, data) = value
                    .try_extract_tensor::<half::f16>()
                    .map_err(|e| DetectError::Inference(e.to_string()))?;
                (shape.to_vec(), data.iter().map(|x| x.to_f32()).collect())
            }
        };
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        Array::from_shape_vec(IxDyn(&dims), data).map_err(|e| DetectError::Inference(e.to_string()))
    }
}

impl Backend for OrtBackend {
    fn input_shape(&self) -> &[i64] {
        &self.input_shape
    }

    fn precision(&self) -> Precision {
        match self.dtype {
            TensorElementType::Float16 => Precision::Half,
            _ => Precision::Full,
        }
    }

    fn names(&self) -> Option<Vec<String>> {
        self.names.clone()
    }

    fn stride(&self) -> Option<u32> {
        self.stride
    }

    fn run(&mut self, xs: &InputTensor) -> Result<Vec<Array<f32, IxDyn>>, DetectError> {
        let infer_err = |e: ort::Error| DetectError::Inference(e.to_string());
        let input_name = self.input_name.as_str();
        let outputs = match xs.precision {
            Precision::Full => {
                let tensor = Tensor::from_array(xs.data.clone()).map_err(infer_err)?;
                self.session
                    .run(ort::inputs![input_name => tensor])
                    .map_err(infer_err)?
            }
            Precision::Half => {
                let tensor =
                    Tensor::from_array(xs.data.mapv(half::f16::from_f32)).map_err(infer_err)?;
                self.session
                    .run(ort::inputs![input_name => tensor])
                    .map_err(infer_err)?
            }
        };

        let ys = self
            .output_names
            .iter()
            .map(|name| Self::extract(&outputs, name))
            .collect::<Result<Vec<_>, _>>()?;
        debug!(
            "推理输出: {:?}",
            ys.iter().map(|y| y.shape().to_vec()).collect::<Vec<_>>()
        );
        Ok(ys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_shape() {
        assert!(check_shape(&[1, 3, 640, 640], &[1, 3, 640, 640]).is_ok());
        assert!(check_shape(&[-1, 3, -1, -1], &[1, 3, 320, 320]).is_ok());
        assert!(matches!(
            check_shape(&[1, 3, 640, 640], &[1, 3, 320, 320]),
            Err(DetectError::Shape { .. })
        ));
        assert!(check_shape(&[1, 3, 640, 640], &[3, 640, 640]).is_err());
    }

    #[test]
    fn test_parse_names() {
        let names = parse_names("{0: 'drone', 1: 'bird', 2: \"plane\"}").unwrap();
        assert_eq!(names, vec!["drone", "bird", "plane"]);
    }

    #[test]
    fn test_parse_names_with_gap() {
        let names = parse_names("{2: 'c', 0: 'a'}").unwrap();
        assert_eq!(names, vec!["a", "class1", "c"]);
        assert!(parse_names("garbage").is_none());
    }

    #[test]
    fn test_parse_names_rejects_huge_ids() {
        assert!(parse_names("{4000000000: 'x'}").is_none());
        assert!(parse_names("{0: 'a', 100001: 'b'}").is_none());
        assert_eq!(parse_names("{1: 'b'}").unwrap(), vec!["class0", "b"]);
    }

    #[test]
    fn test_parse_stride() {
        assert_eq!(parse_stride("32"), Some(32));
        assert_eq!(parse_stride("[8, 16, 32]"), Some(32));
        assert_eq!(parse_stride(""), None);
    }

    #[test]
    fn test_missing_model_is_load_error() {
        let cfg = OrtConfig {
            f: "definitely/not/here.onnx".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            OrtBackend::build(cfg),
            Err(DetectError::ModelLoad { .. })
        ));
    }
}

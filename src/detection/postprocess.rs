// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 后处理: 原始输出 → 检测结果
//!
//! 置信度过滤 → 类别过滤 → NMS → 还原到原图坐标

use ndarray::{Array, ArrayView2, Axis, IxDyn};

use super::types::{Detection, DetectionSet, MAX_NMS};
use crate::config::{DetectConfig, OutputFormat};
use crate::error::DetectError;
use crate::non_max_suppression;
use crate::utils::Letterbox;

const CXYWH_OFFSET: usize = 4;

/// 取出 [N, C] 或 [C, N] 的二维预测 (去掉 batch 维)
fn prediction_view(preds: &Array<f32, IxDyn>) -> Result<ArrayView2<'_, f32>, DetectError> {
    let view = match preds.ndim() {
        3 if preds.shape()[0] == 1 => preds.index_axis(Axis(0), 0),
        2 => preds.view(),
        _ => {
            return Err(DetectError::Inference(format!(
                "unexpected output shape {:?}",
                preds.shape()
            )))
        }
    };
    view.into_dimensionality()
        .map_err(|e| DetectError::Inference(e.to_string()))
}

/// 根据输出形状判断输出头格式: 行数多于列数为 V5 布局
pub fn resolve_format(format: OutputFormat, shape: (usize, usize)) -> OutputFormat {
    match format {
        OutputFormat::Auto if shape.0 > shape.1 => OutputFormat::V5,
        OutputFormat::Auto => OutputFormat::V8,
        f => f,
    }
}

/// 解码预测为候选框 (推理坐标系),已做置信度和类别过滤
pub fn decode_predictions(
    preds: &Array<f32, IxDyn>,
    config: &DetectConfig,
) -> Result<Vec<Detection>, DetectError> {
    let view = prediction_view(preds)?;
    let format = resolve_format(config.format, view.dim());

    // 统一成 [N, C]: 每行一个候选框
    let rows = match format {
        OutputFormat::V8 => view.reversed_axes(),
        _ => view,
    };
    let cols = rows.ncols();
    let cls_offset = match format {
        OutputFormat::V5 => CXYWH_OFFSET + 1,
        _ => CXYWH_OFFSET,
    };
    if cols <= cls_offset {
        return Err(DetectError::Inference(format!(
            "output has {cols} values per box, expected more than {cls_offset} for {format:?}"
        )));
    }

    let conf = config.confidence_threshold;
    let mut candidates = Vec::new();
    for pred in rows.axis_iter(Axis(0)) {
        let objectness = match format {
            OutputFormat::V5 => {
                let obj = pred[CXYWH_OFFSET];
                if obj <= conf {
                    continue;
                }
                obj
            }
            _ => 1.0,
        };

        let (id, score) = pred
            .iter()
            .skip(cls_offset)
            .enumerate()
            .fold((0usize, f32::MIN), |max, (i, &x)| {
                if x > max.1 {
                    (i, x)
                } else {
                    max
                }
            });
        let confidence = score * objectness;
        if confidence <= conf || !config.accepts_class(id) {
            continue;
        }

        candidates.push(Detection::from_cxcywh(
            pred[0], pred[1], pred[2], pred[3], id, confidence,
        ));
    }

    Ok(candidates)
}

/// 推理坐标 → 原图坐标,并裁剪到原图范围
pub fn scale_to_original(dets: &mut [Detection], lb: &Letterbox, width: u32, height: u32) {
    let (w, h) = (width as f32, height as f32);
    for d in dets.iter_mut() {
        let (x1, y1) = lb.to_original(d.x1, d.y1);
        let (x2, y2) = lb.to_original(d.x2, d.y2);
        d.x1 = x1.clamp(0., w);
        d.y1 = y1.clamp(0., h);
        d.x2 = x2.clamp(0., w);
        d.y2 = y2.clamp(0., h);
    }
}

/// 完整后处理流程
pub fn postprocess(
    outputs: &[Array<f32, IxDyn>],
    config: &DetectConfig,
    lb: &Letterbox,
    original_size: (u32, u32),
) -> Result<DetectionSet, DetectError> {
    let preds = outputs
        .first()
        .ok_or_else(|| DetectError::Inference("model produced no outputs".to_string()))?;

    let mut dets = decode_predictions(preds, config)?;

    // 候选过多时只保留置信度最高的一批
    if dets.len() > MAX_NMS {
        dets.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        dets.truncate(MAX_NMS);
    }

    non_max_suppression(
        &mut dets,
        config.iou_threshold,
        config.class_agnostic_nms,
        config.max_det,
    );
    scale_to_original(&mut dets, lb, original_size.0, original_size.1);
    Ok(dets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;
    use ndarray::Array2;

    use crate::utils::letterbox;

    /// V5 布局: 每行 [cx, cy, w, h, obj, cls0, cls1]
    fn v5_output(rows: &[[f32; 7]]) -> Array<f32, IxDyn> {
        let flat: Vec<f32> = rows.iter().flatten().copied().collect();
        Array2::from_shape_vec((rows.len(), 7), flat)
            .unwrap()
            .insert_axis(Axis(0))
            .into_dyn()
    }

    fn v5() -> DetectConfig {
        DetectConfig {
            format: OutputFormat::V5,
            ..Default::default()
        }
    }

    fn identity_letterbox() -> Letterbox {
        letterbox(&RgbImage::new(64, 64), 64).unwrap()
    }

    #[test]
    fn test_resolve_format() {
        assert_eq!(resolve_format(OutputFormat::Auto, (25200, 85)), OutputFormat::V5);
        assert_eq!(resolve_format(OutputFormat::Auto, (84, 8400)), OutputFormat::V8);
        assert_eq!(resolve_format(OutputFormat::V8, (25200, 85)), OutputFormat::V8);
    }

    #[test]
    fn test_single_object_single_detection() {
        let out = v5_output(&[
            [32., 32., 20., 20., 0.95, 0.9, 0.1],
            [10., 10., 4., 4., 0.01, 0.5, 0.5],
        ]);
        let dets = postprocess(&[out], &v5(), &identity_letterbox(), (64, 64))
            .unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_id, 0);
        assert!((dets[0].confidence - 0.855).abs() < 1e-4);
        assert!((dets[0].x1 - 22.).abs() < 1e-3);
        assert!((dets[0].x2 - 42.).abs() < 1e-3);
    }

    #[test]
    fn test_overlapping_boxes_keep_higher_confidence() {
        // 两框 IoU = 0.9 (宽 20 vs 18 同中心)
        let out = v5_output(&[
            [32., 32., 18., 20., 0.7, 1.0, 0.0],
            [32., 32., 20., 20., 0.9, 1.0, 0.0],
        ]);
        let dets = postprocess(&[out], &v5(), &identity_letterbox(), (64, 64))
            .unwrap();
        assert_eq!(dets.len(), 1);
        assert!((dets[0].confidence - 0.9).abs() < 1e-6);
        assert!((dets[0].width() - 20.).abs() < 1e-3);
    }

    #[test]
    fn test_per_class_vs_agnostic() {
        let out = v5_output(&[
            [32., 32., 20., 20., 0.9, 1.0, 0.0],
            [32., 32., 20., 20., 0.8, 0.0, 1.0],
        ]);
        let lb = identity_letterbox();
        let per_class = postprocess(&[out.clone()], &v5(), &lb, (64, 64)).unwrap();
        assert_eq!(per_class.len(), 2);

        let agnostic_cfg = DetectConfig {
            class_agnostic_nms: true,
            ..v5()
        };
        let agnostic = postprocess(&[out], &agnostic_cfg, &lb, (64, 64)).unwrap();
        assert_eq!(agnostic.len(), 1);
        assert_eq!(agnostic[0].class_id, 0);
    }

    #[test]
    fn test_class_filter() {
        let out = v5_output(&[
            [10., 10., 8., 8., 0.9, 1.0, 0.0],
            [50., 50., 8., 8., 0.9, 0.0, 1.0],
        ]);
        let cfg = DetectConfig {
            class_filter: Some(vec![1]),
            ..v5()
        };
        let dets = postprocess(&[out], &cfg, &identity_letterbox(), (64, 64)).unwrap();
        assert_eq!(dets.len(), 1);
        assert_eq!(dets[0].class_id, 1);
    }

    #[test]
    fn test_no_detection_below_threshold() {
        let out = v5_output(&[
            [10., 10., 8., 8., 0.9, 0.3, 0.0],
            [30., 30., 8., 8., 0.6, 0.6, 0.0],
            [50., 50., 8., 8., 0.99, 0.99, 0.0],
        ]);
        let cfg = DetectConfig {
            confidence_threshold: 0.35,
            ..v5()
        };
        let dets = postprocess(&[out], &cfg, &identity_letterbox(), (64, 64)).unwrap();
        assert_eq!(dets.len(), 2);
        assert!(dets.iter().all(|d| d.confidence >= 0.35));
    }

    #[test]
    fn test_v8_layout() {
        // [1, 4+nc, N], nc = 2, N = 2
        let data = vec![
            32., 10., // cx
            32., 10., // cy
            20., 4., // w
            20., 4., // h
            0.8, 0.1, // cls0
            0.1, 0.05, // cls1
        ];
        let out = Array::from_shape_vec(IxDyn(&[1, 6, 2]), data).unwrap();
        // 候选数少于通道数时自动判断会误判,这里显式指定
        let cfg = DetectConfig {
            format: OutputFormat::V8,
            ..Default::default()
        };
        let dets = postprocess(&[out], &cfg, &identity_letterbox(), (64, 64)).unwrap();
        assert_eq!(dets.len(), 1);
        assert!((dets[0].confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_scale_back_to_original() {
        // 原图 200x100 → 64x64, ratio 0.32, pad (0, 16)
        let lb = letterbox(&RgbImage::new(200, 100), 64).unwrap();
        let out = v5_output(&[[32., 32., 16., 16., 0.9, 0.9, 0.0]]);
        let dets = postprocess(&[out], &v5(), &lb, (200, 100)).unwrap();
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        assert!((d.x1 - 75.).abs() < 1e-3);
        assert!((d.y1 - 25.).abs() < 1e-3);
        assert!((d.x2 - 125.).abs() < 1e-3);
        assert!((d.y2 - 75.).abs() < 1e-3);
    }

    #[test]
    fn test_boxes_are_clipped() {
        let out = v5_output(&[[2., 2., 20., 20., 0.9, 0.9, 0.0]]);
        let dets = postprocess(&[out], &v5(), &identity_letterbox(), (64, 64))
            .unwrap();
        assert_eq!((dets[0].x1, dets[0].y1), (0., 0.));
    }

    #[test]
    fn test_bad_output_shape() {
        let out = Array::<f32, _>::zeros(IxDyn(&[2, 3, 4, 5]));
        assert!(matches!(
            postprocess(&[out], &v5(), &identity_letterbox(), (64, 64)),
            Err(DetectError::Inference(_))
        ));
        assert!(postprocess(&[], &v5(), &identity_letterbox(), (64, 64)).is_err());
    }
}

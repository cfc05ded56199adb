// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

pub mod config; // 命令行参数与检测配置
pub mod detection; // 检测结果与后处理
pub mod error; // 错误类型
pub mod input; // 输入源 (图片/目录/视频/流)
pub mod models; // 模型接口与具体实现
pub mod pipeline; // 单线程检测流水线
pub mod renderer; // 标注绘制与输出
pub mod utils; // letterbox / 下载

pub mod ort_backend;

pub use crate::config::{Args, DetectConfig, OutputFormat};
pub use crate::detection::{Detection, DetectionSet, Frame};
pub use crate::error::DetectError;
pub use crate::models::YOLO;
pub use crate::ort_backend::{Backend, InputTensor, OrtBackend, OrtConfig, OrtEP, Precision};
pub use crate::pipeline::{Pipeline, RunSummary};

/// 贪心 NMS: 按置信度降序,抑制与已保留框 IoU 超过阈值的同类框
///
/// `agnostic` 为 true 时不区分类别; 最多保留 `max_det` 个框。
/// 排序稳定,相同输入得到相同输出。
pub fn non_max_suppression(
    xs: &mut Vec<Detection>,
    iou_threshold: f32,
    agnostic: bool,
    max_det: usize,
) {
    xs.sort_by(|b1, b2| b2.confidence.total_cmp(&b1.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        if current_index >= max_det {
            break;
        }
        let mut drop = false;
        for prev_index in 0..current_index {
            if !agnostic && xs[prev_index].class_id != xs[index].class_id {
                continue;
            }
            let iou = xs[prev_index].iou(&xs[index]);
            if iou > iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}

/// 按时间生成输出目录名
pub fn gen_time_string(delimiter: &str) -> String {
    let t_now = chrono::Local::now();
    let fmt = format!(
        "%Y{}%m{}%d{}%H{}%M{}%S",
        delimiter, delimiter, delimiter, delimiter, delimiter
    );
    t_now.format(&fmt).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boxes() -> Vec<Detection> {
        vec![
            Detection::new(0., 0., 10., 10., 0, 0.6),
            Detection::new(1., 1., 11., 11., 0, 0.9),
            Detection::new(0., 0., 10., 10., 1, 0.8),
            Detection::new(50., 50., 60., 60., 0, 0.3),
            Detection::new(2., 0., 12., 10., 1, 0.7),
            Detection::new(100., 100., 110., 110., 2, 0.95),
        ]
    }

    #[test]
    fn test_nms_keeps_highest_per_cluster() {
        let mut xs = boxes();
        non_max_suppression(&mut xs, 0.5, false, 300);
        let confs: Vec<f32> = xs.iter().map(|d| d.confidence).collect();
        assert_eq!(confs, vec![0.95, 0.9, 0.8, 0.3]);
    }

    #[test]
    fn test_nms_agnostic() {
        let mut xs = boxes();
        non_max_suppression(&mut xs, 0.5, true, 300);
        let confs: Vec<f32> = xs.iter().map(|d| d.confidence).collect();
        assert_eq!(confs, vec![0.95, 0.9, 0.3]);
    }

    #[test]
    fn test_nms_idempotent() {
        for agnostic in [false, true] {
            let mut once = boxes();
            non_max_suppression(&mut once, 0.5, agnostic, 300);
            let mut twice = once.clone();
            non_max_suppression(&mut twice, 0.5, agnostic, 300);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_nms_no_compatible_pair_above_threshold() {
        let mut xs = boxes();
        non_max_suppression(&mut xs, 0.3, false, 300);
        for (i, a) in xs.iter().enumerate() {
            for b in xs.iter().skip(i + 1) {
                if a.class_id == b.class_id {
                    assert!(a.iou(b) <= 0.3);
                }
            }
        }
    }

    #[test]
    fn test_nms_max_det() {
        let mut xs = boxes();
        non_max_suppression(&mut xs, 0.5, false, 2);
        assert_eq!(xs.len(), 2);
        assert_eq!(xs[0].confidence, 0.95);
    }

    #[test]
    fn test_nms_empty() {
        let mut xs: Vec<Detection> = Vec::new();
        non_max_suppression(&mut xs, 0.5, false, 300);
        assert!(xs.is_empty());
    }
}

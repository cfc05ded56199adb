// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测系统数据结构定义
/// Data structures for the detection pipeline
use image::RgbImage;
use serde::Serialize;

// ========== 公共常量 ==========

/// 默认推理输入尺寸
pub const INF_SIZE: u32 = 640;

/// 默认模型步长 (最大下采样倍数)
pub const DEFAULT_STRIDE: u32 = 32;

/// NMS 前最多保留的候选框数量
pub const MAX_NMS: usize = 30_000;

/// 每帧最多输出的检测框数量
pub const MAX_DET: usize = 300;

// ========== 数据结构 ==========

/// 已解码帧 (输入源 → 流水线)
///
/// 每次迭代创建,处理完即丢弃
#[derive(Clone, Debug)]
pub struct Frame {
    pub image: RgbImage,
    pub origin: String, // 文件路径或流地址
    pub index: u64,     // 在该输入源中的序号
    pub still: bool,    // 静态图片 (false = 视频/流帧)
}

impl Frame {
    pub fn new(image: RgbImage, origin: impl Into<String>, index: u64, still: bool) -> Self {
        Self {
            image,
            origin: origin.into(),
            index,
            still,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn channels(&self) -> u8 {
        3
    }

    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }
}

/// 检测框 (Detection bounding box), 原图坐标
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub class_id: usize,
    pub confidence: f32,
}

impl Detection {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32, class_id: usize, confidence: f32) -> Self {
        Self {
            x1,
            y1,
            x2,
            y2,
            class_id,
            confidence,
        }
    }

    pub fn from_cxcywh(cx: f32, cy: f32, w: f32, h: f32, class_id: usize, confidence: f32) -> Self {
        Self::new(
            cx - w / 2.,
            cy - h / 2.,
            cx + w / 2.,
            cy + h / 2.,
            class_id,
            confidence,
        )
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn intersection_area(&self, another: &Detection) -> f32 {
        let l = self.x1.max(another.x1);
        let r = self.x2.min(another.x2);
        let t = self.y1.max(another.y1);
        let b = self.y2.min(another.y2);
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn union(&self, another: &Detection) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    pub fn iou(&self, another: &Detection) -> f32 {
        let union = self.union(another);
        if union <= 0. {
            return 0.;
        }
        self.intersection_area(another) / union
    }
}

/// 单帧检测结果,按置信度降序排列
pub type DetectionSet = Vec<Detection>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou_identical_and_disjoint() {
        let a = Detection::new(0., 0., 10., 10., 0, 0.9);
        let b = Detection::new(20., 20., 30., 30., 0, 0.8);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn test_iou_half_overlap() {
        let a = Detection::new(0., 0., 10., 10., 0, 0.9);
        let b = Detection::new(5., 0., 15., 10., 0, 0.8);
        // 交集 50, 并集 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_box() {
        let a = Detection::new(5., 5., 5., 5., 0, 0.9);
        assert_eq!(a.area(), 0.0);
        assert_eq!(a.iou(&a), 0.0);
    }

    #[test]
    fn test_from_cxcywh() {
        let d = Detection::from_cxcywh(50., 40., 20., 10., 3, 0.7);
        assert_eq!((d.x1, d.y1, d.x2, d.y2), (40., 35., 60., 45.));
        assert_eq!(d.class_id, 3);
    }

    #[test]
    fn test_frame_attributes() {
        let frame = Frame::new(RgbImage::new(4, 2), "a.jpg", 0, true);
        assert_eq!((frame.width(), frame.height(), frame.channels()), (4, 2, 3));
        assert_eq!(frame.pixels().len(), 4 * 2 * 3);
    }
}

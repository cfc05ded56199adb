// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// Letterbox 缩放工具
/// 等比缩放 + 居中灰边填充,并记录还原坐标所需的缩放比与偏移
use fast_image_resize as fr;
use image::{Rgb, RgbImage};

use crate::error::DetectError;

/// 填充颜色 (114, 114, 114)
pub const PAD_VALUE: u8 = 114;

/// Letterbox 结果
#[derive(Clone, Debug)]
pub struct Letterbox {
    pub image: RgbImage,
    pub ratio: f32,
    pub pad: (f32, f32), // (dw, dh) 单侧填充量
}

impl Letterbox {
    /// 推理坐标 → 原图坐标
    pub fn to_original(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad.0) / self.ratio, (y - self.pad.1) / self.ratio)
    }

    pub fn size(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// 计算等比缩放: (ratio, new_w, new_h)
pub fn scale_wh(w0: f32, h0: f32, w1: f32, h1: f32) -> (f32, f32, f32) {
    let r = (w1 / w0).min(h1 / h0);
    (r, (w0 * r).round(), (h0 * r).round())
}

/// 把输入尺寸向上取整到 stride 的整数倍
pub fn make_divisible(size: u32, stride: u32) -> u32 {
    let stride = stride.max(1);
    size.div_ceil(stride) * stride
}

/// 等比缩放到 size×size 画布 (fast_image_resize 双线性)
pub fn letterbox(src: &RgbImage, size: u32) -> Result<Letterbox, DetectError> {
    let (w0, h0) = src.dimensions();
    if w0 == 0 || h0 == 0 || size == 0 {
        return Err(DetectError::Shape {
            expected: vec![size as i64, size as i64],
            actual: vec![w0 as usize, h0 as usize],
        });
    }

    let (ratio, w_new, h_new) = scale_wh(w0 as f32, h0 as f32, size as f32, size as f32);
    let w_new = (w_new as u32).clamp(1, size);
    let h_new = (h_new as u32).clamp(1, size);

    let resized = if (w_new, h_new) == (w0, h0) {
        src.clone()
    } else {
        resize_rgb(src, w_new, h_new)?
    };

    let dw = (size - w_new) as f32 / 2.;
    let dh = (size - h_new) as f32 / 2.;
    let left = (dw - 0.1).round().max(0.) as i64;
    let top = (dh - 0.1).round().max(0.) as i64;

    let mut canvas = RgbImage::from_pixel(size, size, Rgb([PAD_VALUE; 3]));
    image::imageops::replace(&mut canvas, &resized, left, top);

    Ok(Letterbox {
        image: canvas,
        ratio,
        pad: (dw, dh),
    })
}

fn resize_rgb(src: &RgbImage, w: u32, h: u32) -> Result<RgbImage, DetectError> {
    let decode_err = |reason: String| DetectError::Decode {
        origin: "letterbox".to_string(),
        reason,
    };

    let src_ref = fr::images::ImageRef::new(src.width(), src.height(), src.as_raw(), fr::PixelType::U8x3)
        .map_err(|e| decode_err(e.to_string()))?;
    let mut dst = fr::images::Image::new(w, h, fr::PixelType::U8x3);

    let mut resizer = fr::Resizer::new();
    let options =
        fr::ResizeOptions::new().resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear));
    resizer
        .resize(&src_ref, &mut dst, Some(&options))
        .map_err(|e| decode_err(e.to_string()))?;

    RgbImage::from_raw(w, h, dst.into_vec())
        .ok_or_else(|| decode_err("resized buffer has unexpected length".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_divisible() {
        assert_eq!(make_divisible(640, 32), 640);
        assert_eq!(make_divisible(641, 32), 672);
        assert_eq!(make_divisible(100, 32), 128);
        assert_eq!(make_divisible(1, 0), 1);
    }

    #[test]
    fn test_letterbox_landscape() {
        let src = RgbImage::from_pixel(200, 100, Rgb([255, 0, 0]));
        let lb = letterbox(&src, 64).unwrap();
        assert_eq!(lb.size(), (64, 64));
        assert!((lb.ratio - 0.32).abs() < 1e-6);
        assert_eq!(lb.pad, (0.0, 16.0));
        // 上边是填充,中间是原图内容
        assert_eq!(lb.image.get_pixel(32, 2).0, [PAD_VALUE; 3]);
        assert_eq!(lb.image.get_pixel(32, 32).0, [255, 0, 0]);
    }

    #[test]
    fn test_letterbox_always_square() {
        for (w, h) in [(1, 1), (17, 333), (640, 480), (1920, 1080), (64, 64)] {
            let lb = letterbox(&RgbImage::new(w, h), 64).unwrap();
            assert_eq!(lb.size(), (64, 64), "source {w}x{h}");
        }
    }

    #[test]
    fn test_to_original_roundtrip_center() {
        let lb = letterbox(&RgbImage::new(200, 100), 64).unwrap();
        let (x, y) = lb.to_original(32., 32.);
        assert!((x - 100.).abs() < 1e-3);
        assert!((y - 50.).abs() < 1e-3);
    }

    #[test]
    fn test_letterbox_empty_image() {
        assert!(matches!(
            letterbox(&RgbImage::new(0, 0), 64),
            Err(DetectError::Shape { .. })
        ));
    }
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 标注绘制与结果输出 (Renderer / Sink)
///
/// - Annotator: 在帧上画检测框和 "name 0.87" 标签
/// - SaveSink:  保存标注后的图片到运行目录
/// - JsonlSink: 每帧一行 JSON 写入 detections.jsonl
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use serde::Serialize;
use tracing::{info, warn};

use crate::detection::{Detection, DetectionSet, Frame};
use crate::gen_time_string;

/// 类别配色
const BRIGHT_COLORS: [(u8, u8, u8); 12] = [
    (255, 0, 0),     // 红色
    (0, 255, 0),     // 绿色
    (0, 0, 255),     // 蓝色
    (255, 255, 0),   // 黄色
    (255, 0, 255),   // 品红
    (0, 255, 255),   // 青色
    (255, 128, 0),   // 橙色
    (255, 0, 128),   // 粉红
    (128, 255, 0),   // 黄绿
    (0, 128, 255),   // 天蓝
    (255, 255, 255), // 白色
    (128, 0, 255),   // 紫色
];

pub fn class_color(id: usize) -> Rgb<u8> {
    let (r, g, b) = BRIGHT_COLORS[id % BRIGHT_COLORS.len()];
    Rgb([r, g, b])
}

/// 类别名称,缺失时用 class{id}
pub fn class_name(names: &[String], id: usize) -> String {
    names
        .get(id)
        .cloned()
        .unwrap_or_else(|| format!("class{id}"))
}

/// 结果输出 (保存图片 / 写 JSON ...)
///
/// 失败只记录日志,不影响检测结果和后续帧
pub trait Sink {
    fn consume(&mut self, frame: &Frame, detections: &DetectionSet, names: &[String]) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// 创建本次运行的输出目录: `<project>/<name>` 或 `<project>/<时间戳>`
pub fn run_dir(project: &Path, name: Option<&str>) -> Result<PathBuf> {
    let dir = match name {
        Some(name) => project.join(name),
        None => project.join(gen_time_string("-")),
    };
    fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
    Ok(dir)
}

// ========== Annotator ==========

pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    pub fn new(font: Option<FontVec>) -> Self {
        Self { font }
    }

    /// 读取 TTF/OTF 字体; 没有字体时只画框
    pub fn with_font_file(path: Option<&Path>) -> Self {
        let font = path.and_then(|path| match fs::read(path) {
            Ok(bytes) => match FontVec::try_from_vec(bytes) {
                Ok(font) => {
                    info!("✅ 字体加载成功: {}", path.display());
                    Some(font)
                }
                Err(e) => {
                    warn!("⚠️ 字体加载失败: {}", e);
                    None
                }
            },
            Err(e) => {
                warn!("⚠️ 未找到字体文件 {}: {}", path.display(), e);
                None
            }
        });
        Self { font }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 线宽随画面大小变化
    fn thickness(width: u32, height: u32) -> i32 {
        (((width + height) as f32 / 2.0 * 0.003).round() as i32).max(1)
    }

    /// 返回标注后的副本
    pub fn annotate(&self, image: &RgbImage, detections: &[Detection], names: &[String]) -> RgbImage {
        let mut canvas = image.clone();
        let (w, h) = canvas.dimensions();
        if w == 0 || h == 0 {
            return canvas;
        }
        let lw = Self::thickness(w, h);

        for det in detections {
            let color = class_color(det.class_id);
            let x = det.x1.round() as i32;
            let y = det.y1.round() as i32;
            let bw = det.width().round().max(1.0) as i32;
            let bh = det.height().round().max(1.0) as i32;

            // 多次画空心框得到线宽
            for t in 0..lw {
                let (rw, rh) = (bw - 2 * t, bh - 2 * t);
                if rw <= 0 || rh <= 0 {
                    break;
                }
                let rect = Rect::at(x + t, y + t).of_size(rw as u32, rh as u32);
                draw_hollow_rect_mut(&mut canvas, rect, color);
            }

            if let Some(font) = &self.font {
                let label = format!("{} {:.2}", class_name(names, det.class_id), det.confidence);
                let scale = PxScale::from((lw * 8).max(12) as f32);
                let (tw, th) = text_size(scale, font, &label);
                let (tw, th) = (tw.max(1), th.max(1) + 4);

                // 标签放在框上方,放不下时放框内
                let ty = if y - th as i32 >= 0 { y - th as i32 } else { y };
                draw_filled_rect_mut(&mut canvas, Rect::at(x, ty).of_size(tw + 4, th), color);
                draw_text_mut(&mut canvas, Rgb([0, 0, 0]), x + 2, ty + 2, scale, font, &label);
            }
        }
        canvas
    }
}

// ========== SaveSink ==========

/// 保存标注后的帧
pub struct SaveSink {
    dir: PathBuf,
    annotator: Annotator,
    saved: usize,
}

impl SaveSink {
    pub fn new(dir: PathBuf, annotator: Annotator) -> Self {
        Self {
            dir,
            annotator,
            saved: 0,
        }
    }

    /// 图片保留原文件名; 视频/流帧加帧序号
    pub fn output_path(&self, frame: &Frame) -> PathBuf {
        let stem = Path::new(&frame.origin)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("frame");
        if frame.still {
            let file_name = Path::new(&frame.origin)
                .file_name()
                .and_then(|s| s.to_str())
                .unwrap_or("image.jpg");
            self.dir.join(file_name)
        } else {
            let stem: String = stem
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
                .collect();
            self.dir.join(format!("{}_{}.jpg", stem, frame.index))
        }
    }

    pub fn saved(&self) -> usize {
        self.saved
    }
}

impl Sink for SaveSink {
    fn consume(&mut self, frame: &Frame, detections: &DetectionSet, names: &[String]) -> Result<()> {
        let path = self.output_path(frame);
        let annotated = self.annotator.annotate(&frame.image, detections, names);
        annotated
            .save(&path)
            .with_context(|| format!("failed to save {}", path.display()))?;
        self.saved += 1;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "save"
    }
}

// ========== JsonlSink ==========

#[derive(Serialize)]
struct DetectionRecord {
    class_id: usize,
    name: String,
    confidence: f32,
    bbox: [f32; 4],
}

#[derive(Serialize)]
struct FrameRecord<'a> {
    origin: &'a str,
    index: u64,
    width: u32,
    height: u32,
    detections: Vec<DetectionRecord>,
}

/// 每帧一行 JSON
pub struct JsonlSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlSink {
    pub const FILE_NAME: &'static str = "detections.jsonl";

    pub fn create(dir: &Path) -> Result<Self> {
        let path = dir.join(Self::FILE_NAME);
        let file = File::create(&path).with_context(|| format!("failed to create {}", path.display()))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Sink for JsonlSink {
    fn consume(&mut self, frame: &Frame, detections: &DetectionSet, names: &[String]) -> Result<()> {
        let record = FrameRecord {
            origin: &frame.origin,
            index: frame.index,
            width: frame.width(),
            height: frame.height(),
            detections: detections
                .iter()
                .map(|d| DetectionRecord {
                    class_id: d.class_id,
                    name: class_name(names, d.class_id),
                    confidence: d.confidence,
                    bbox: [d.x1, d.y1, d.x2, d.y2],
                })
                .collect(),
        };
        serde_json::to_writer(&mut self.writer, &record)?;
        self.writer.write_all(b"\n")?;
        // 流输入可能被中断,逐帧落盘
        self.writer.flush()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "jsonl"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> Vec<String> {
        vec!["drone".to_string(), "bird".to_string()]
    }

    fn frame(origin: &str, index: u64, still: bool) -> Frame {
        Frame::new(RgbImage::new(64, 48), origin, index, still)
    }

    #[test]
    fn test_class_name_fallback() {
        assert_eq!(class_name(&names(), 1), "bird");
        assert_eq!(class_name(&names(), 5), "class5");
        assert_eq!(class_color(0), class_color(BRIGHT_COLORS.len()));
    }

    #[test]
    fn test_missing_or_bad_font_falls_back_to_boxes() {
        assert!(!Annotator::with_font_file(None).has_font());
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("none.ttf");
        assert!(!Annotator::with_font_file(Some(missing.as_path())).has_font());
        let bad = dir.path().join("bad.ttf");
        fs::write(&bad, b"not a font").unwrap();
        assert!(!Annotator::with_font_file(Some(bad.as_path())).has_font());
    }

    #[test]
    fn test_annotate_draws_box_edges() {
        let image = RgbImage::new(64, 48);
        let dets = vec![Detection::new(10., 10., 30., 30., 0, 0.9)];
        let out = Annotator::new(None).annotate(&image, &dets, &names());
        assert_eq!(out.dimensions(), (64, 48));
        assert_eq!(*out.get_pixel(10, 20), class_color(0));
        assert_eq!(*out.get_pixel(20, 20), Rgb([0, 0, 0]));
        // 原图不变
        assert_eq!(*image.get_pixel(10, 20), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_annotate_clips_out_of_frame_boxes() {
        let image = RgbImage::new(32, 32);
        let dets = vec![Detection::new(20., 20., 80., 80., 1, 0.5)];
        let out = Annotator::new(None).annotate(&image, &dets, &names());
        assert_eq!(*out.get_pixel(20, 25), class_color(1));
    }

    #[test]
    fn test_save_sink_names() {
        let dir = tempfile::tempdir().unwrap();
        let sink = SaveSink::new(dir.path().to_path_buf(), Annotator::new(None));
        assert_eq!(
            sink.output_path(&frame("data/images/bus.png", 0, true)),
            dir.path().join("bus.png")
        );
        assert_eq!(
            sink.output_path(&frame("clips/field.mp4", 12, false)),
            dir.path().join("field_12.jpg")
        );
        assert_eq!(
            sink.output_path(&frame("camera:0", 3, false)),
            dir.path().join("camera_0_3.jpg")
        );
    }

    #[test]
    fn test_save_sink_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = SaveSink::new(dir.path().to_path_buf(), Annotator::new(None));
        let dets = vec![Detection::new(1., 1., 20., 20., 0, 0.8)];
        sink.consume(&frame("in/a.png", 0, true), &dets, &names())
            .unwrap();
        assert!(dir.path().join("a.png").exists());
        assert_eq!(sink.saved(), 1);
    }

    #[test]
    fn test_save_sink_failure_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        let mut sink = SaveSink::new(missing, Annotator::new(None));
        assert!(sink.consume(&frame("a.png", 0, true), &Vec::new(), &names()).is_err());
    }

    #[test]
    fn test_jsonl_sink_records() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = JsonlSink::create(dir.path()).unwrap();
        let dets = vec![Detection::new(1., 2., 3., 4., 1, 0.5)];
        sink.consume(&frame("a.png", 0, true), &dets, &names()).unwrap();
        sink.consume(&frame("a.png", 1, true), &Vec::new(), &names()).unwrap();

        let text = fs::read_to_string(sink.path()).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["detections"][0]["name"], "bird");
        assert_eq!(lines[0]["detections"][0]["bbox"][3], 4.0);
        assert_eq!(lines[0]["width"], 64);
        assert_eq!(lines[1]["detections"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_run_dir_named() {
        let dir = tempfile::tempdir().unwrap();
        let run = run_dir(dir.path(), Some("exp")).unwrap();
        assert_eq!(run, dir.path().join("exp"));
        assert!(run.is_dir());
    }
}

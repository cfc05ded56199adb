// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 检测流水线 (Detection Pipeline)
///
/// 单线程顺序处理,一帧处理完再取下一帧:
/// ```text
/// Source → letterbox → preprocess → run → postprocess → Sinks
/// ```
/// 单帧错误 (解码/形状/推理) 记录后跳过,流水线继续。
use std::time::Instant;

use tracing::{debug, error, info, warn};

use crate::detection::{DetectionSet, Frame};
use crate::error::DetectError;
use crate::input::FramePair;
use crate::models::YOLO;
use crate::renderer::Sink;
use crate::utils::Letterbox;

/// 运行统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,     // 成功处理的帧
    pub skipped: u64,    // 跳过的帧
    pub detections: u64, // 检测框总数
}

/// 流水线上下文: 模型 + 输出
pub struct Pipeline {
    model: YOLO,
    sinks: Vec<Box<dyn Sink>>,
    max_frames: Option<u64>,
}

impl Pipeline {
    pub fn new(model: YOLO) -> Self {
        Self {
            model,
            sinks: Vec::new(),
            max_frames: None,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_max_frames(mut self, max_frames: Option<u64>) -> Self {
        self.max_frames = max_frames;
        self
    }

    pub fn model(&self) -> &YOLO {
        &self.model
    }

    /// 处理一帧: letterbox 帧 → 原图坐标下的检测结果
    pub fn process(&mut self, frame: &Frame, lb: &Letterbox) -> Result<DetectionSet, DetectError> {
        self.model.forward(lb, (frame.width(), frame.height()))
    }

    /// 依次交给所有输出; 输出失败只记录
    fn emit(&mut self, frame: &Frame, detections: &DetectionSet) {
        let names = self.model.names();
        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.consume(frame, detections, names) {
                warn!("⚠️ 输出失败 [{}] {}#{}: {:#}", sink.name(), frame.origin, frame.index, e);
            }
        }
    }

    /// 运行到输入结束 (或达到 max_frames)
    ///
    /// 每帧结果交给 `on_result`; 只有非单帧错误才会中止。
    pub fn run<I, F>(&mut self, source: I, mut on_result: F) -> Result<RunSummary, DetectError>
    where
        I: IntoIterator<Item = Result<FramePair, DetectError>>,
        F: FnMut(&Frame, &DetectionSet),
    {
        let mut summary = RunSummary::default();
        let started = Instant::now();

        let mut source = source.into_iter();
        loop {
            // 先检查帧数上限再取帧,实时流不会多等一帧
            if let Some(max) = self.max_frames {
                if summary.frames + summary.skipped >= max {
                    info!("⏹️ 达到最大帧数 {}", max);
                    break;
                }
            }
            let Some(item) = source.next() else {
                break;
            };

            let (frame, lb) = match item {
                Ok(pair) => pair,
                Err(e) if e.is_frame_local() => {
                    warn!("⚠️ 跳过: {}", e);
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => {
                    error!("❌ 输入错误: {}", e);
                    return Err(e);
                }
            };

            let t = Instant::now();
            let detections = match self.process(&frame, &lb) {
                Ok(dets) => dets,
                Err(e) if e.is_frame_local() => {
                    warn!("⚠️ 跳过帧 {}#{}: {}", frame.origin, frame.index, e);
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => {
                    error!("❌ 推理错误: {}", e);
                    return Err(e);
                }
            };
            debug!(
                "🎯 {}#{} {}x{}: {} 个目标 ({:.1}ms)",
                frame.origin,
                frame.index,
                frame.width(),
                frame.height(),
                detections.len(),
                t.elapsed().as_secs_f64() * 1000.0
            );

            summary.frames += 1;
            summary.detections += detections.len() as u64;
            on_result(&frame, &detections);
            self.emit(&frame, &detections);
        }

        let secs = started.elapsed().as_secs_f64();
        let fps = if secs > 0.0 {
            summary.frames as f64 / secs
        } else {
            0.0
        };
        info!(
            "📊 完成: 处理 {} 帧, 跳过 {} 帧, 共 {} 个目标 ({:.1} FPS)",
            summary.frames, summary.skipped, summary.detections, fps
        );
        Ok(summary)
    }
}

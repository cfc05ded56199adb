// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// FFmpeg解码过滤器: 视频帧 (RGB24) → RgbImage → 流水线通道
use crossbeam_channel::{Sender, TrySendError};
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame as AvFrame};
use image::RgbImage;
use tracing::{debug, warn};

/// 解码线程 → 流水线
pub enum DecodeEvent {
    Frame(RgbImage),
    End,
}

pub struct DecodeFilter {
    tx: Sender<DecodeEvent>,
    live: bool,
    total_frames: usize,
    dropped_frames: usize,
}

impl DecodeFilter {
    pub fn new(tx: Sender<DecodeEvent>, live: bool) -> Self {
        Self {
            tx,
            live,
            total_frames: 0,
            dropped_frames: 0,
        }
    }

    /// 按行拷贝 RGB24 数据 (去掉行尾对齐填充)
    fn copy_rgb(frame: &AvFrame) -> Option<RgbImage> {
        unsafe {
            let raw = frame.as_ptr();
            if raw.is_null() || frame.is_empty() || frame.is_corrupt() {
                return None;
            }
            let w = (*raw).width;
            let h = (*raw).height;
            let stride = (*raw).linesize[0];
            let data = (*raw).data[0];
            if w <= 0 || h <= 0 || data.is_null() || (stride as i64) < (w as i64) * 3 {
                return None;
            }

            let (w, h, stride) = (w as usize, h as usize, stride as usize);
            let mut buffer = Vec::with_capacity(w * h * 3);
            for y in 0..h {
                let row = std::slice::from_raw_parts(data.add(y * stride), w * 3);
                buffer.extend_from_slice(row);
            }
            RgbImage::from_raw(w as u32, h as u32, buffer)
        }
    }
}

impl FrameFilter for DecodeFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        debug!("✅ 解码线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: AvFrame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<AvFrame>, String> {
        self.total_frames += 1;

        let Some(image) = Self::copy_rgb(&frame) else {
            self.dropped_frames += 1;
            if self.total_frames <= 10 {
                warn!("⚠️ 丢弃帧 #{}: 空帧/损坏帧", self.total_frames);
            }
            return Ok(None);
        };

        if self.live {
            match self.tx.try_send(DecodeEvent::Frame(image)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => self.dropped_frames += 1,
                Err(TrySendError::Disconnected(_)) => return Err("pipeline closed".to_string()),
            }
        } else if self.tx.send(DecodeEvent::Frame(image)).is_err() {
            return Err("pipeline closed".to_string());
        }

        Ok(Some(frame))
    }
}

impl Drop for DecodeFilter {
    fn drop(&mut self) {
        if self.dropped_frames > 0 {
            debug!(
                "📺 解码统计: 总帧{} | 丢弃{}",
                self.total_frames, self.dropped_frames
            );
        }
    }
}

// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 实时流输入: 摄像头序号 / RTSP / RTMP / HTTP
//!
//! 直到流结束才停止。流水线跟不上时解码端丢帧,保证处理的是最新画面。

use std::fmt;

use tracing::info;

use super::video::VideoReader;
use super::FramePair;
use crate::detection::Frame;
use crate::error::DetectError;
use crate::utils::letterbox;

/// 流目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTarget {
    Camera(usize),
    Url(String),
}

impl fmt::Display for StreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamTarget::Camera(index) => write!(f, "camera:{}", index),
            StreamTarget::Url(url) => write!(f, "{}", url),
        }
    }
}

pub struct StreamSource {
    reader: VideoReader,
    origin: String,
    size: u32,
    index: u64,
}

impl StreamSource {
    pub fn open(target: StreamTarget, size: u32) -> Result<Self, DetectError> {
        let reader = VideoReader::open_stream(&target)?;
        let origin = target.to_string();
        info!("📡 实时流: {}", origin);
        Ok(Self {
            reader,
            origin,
            size,
            index: 0,
        })
    }
}

impl Iterator for StreamSource {
    type Item = Result<FramePair, DetectError>;

    fn next(&mut self) -> Option<Self::Item> {
        let Some(image) = self.reader.next_image() else {
            info!("📡 流结束: {} ({} 帧)", self.origin, self.index);
            return None;
        };
        let frame = Frame::new(image, self.origin.clone(), self.index, false);
        self.index += 1;
        Some(letterbox(&frame.image, self.size).map(|lb| (frame, lb)))
    }
}

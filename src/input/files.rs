// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 文件输入: 图片 / 目录 / 视频文件
//!
//! 有限序列; 单张图片解码失败只产出一个错误项,后续文件继续。

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use super::video::{self, VideoReader};
use super::{is_video, FramePair};
use crate::detection::Frame;
use crate::error::DetectError;
use crate::utils::letterbox;

/// 正在读取的视频
struct ActiveVideo {
    reader: VideoReader,
    origin: String,
    index: u64,
}

pub struct FileSource {
    files: VecDeque<PathBuf>,
    size: u32,
    video: Option<ActiveVideo>,
}

impl FileSource {
    pub fn new(descriptor: &str, files: Vec<PathBuf>, size: u32) -> Result<Self, DetectError> {
        let total = files.len();
        let files: VecDeque<PathBuf> = files
            .into_iter()
            .filter(|p| {
                if is_video(p) && !video::ENABLED {
                    warn!(
                        "⚠️ 跳过视频 {} (未启用 `video` feature)",
                        p.display()
                    );
                    return false;
                }
                true
            })
            .collect();

        if files.is_empty() {
            return Err(DetectError::source_not_found(
                descriptor,
                "no readable media (video support not compiled in)",
            ));
        }

        let videos = files.iter().filter(|p| is_video(p)).count();
        info!(
            "📂 输入: {} ({} 个文件: {} 图片, {} 视频, 跳过 {})",
            descriptor,
            files.len(),
            files.len() - videos,
            videos,
            total - files.len()
        );

        Ok(Self {
            files,
            size,
            video: None,
        })
    }

    fn next_video_frame(&mut self) -> Option<Result<FramePair, DetectError>> {
        let active = self.video.as_mut()?;
        match active.reader.next_image() {
            Some(image) => {
                let frame = Frame::new(image, active.origin.clone(), active.index, false);
                active.index += 1;
                Some(letterbox(&frame.image, self.size).map(|lb| (frame, lb)))
            }
            None => {
                info!(
                    "🎞️ 视频结束: {} ({} 帧)",
                    active.origin, active.index
                );
                self.video = None;
                None
            }
        }
    }

    fn open_image(&self, path: &Path) -> Result<FramePair, DetectError> {
        let origin = path.display().to_string();
        let image = image::open(path)
            .map_err(|e| DetectError::Decode {
                origin: origin.clone(),
                reason: e.to_string(),
            })?
            .to_rgb8();
        let frame = Frame::new(image, origin, 0, true);
        let lb = letterbox(&frame.image, self.size)?;
        Ok((frame, lb))
    }
}

impl Iterator for FileSource {
    type Item = Result<FramePair, DetectError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.next_video_frame() {
                return Some(item);
            }

            let path = self.files.pop_front()?;
            if is_video(&path) {
                match VideoReader::open_file(&path) {
                    Ok(reader) => {
                        self.video = Some(ActiveVideo {
                            reader,
                            origin: path.display().to_string(),
                            index: 0,
                        });
                        continue;
                    }
                    Err(e) => {
                        return Some(Err(DetectError::Decode {
                            origin: path.display().to_string(),
                            reason: e.to_string(),
                        }))
                    }
                }
            }
            return Some(self.open_image(&path));
        }
    }
}

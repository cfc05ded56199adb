// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 视频输入系统 (Frame Source)
///
/// 启动时把输入描述解析一次,得到 `Source::Files` 或 `Source::Stream`:
/// - files:  图片 / 目录 / 视频文件 (有限序列)
/// - stream: 摄像头序号 / RTSP / RTMP / HTTP 流 (直到流结束)
/// - video:  FFmpeg 解码 (需要 `video` feature)
pub mod files;
pub mod stream;
pub mod video;

#[cfg(feature = "video")]
pub mod decode_filter;

use std::fs;
use std::path::{Path, PathBuf};

pub use files::FileSource;
pub use stream::{StreamSource, StreamTarget};

use crate::detection::Frame;
use crate::error::DetectError;
use crate::utils::Letterbox;

/// 支持的图片后缀
pub const IMG_FORMATS: [&str; 7] = ["bmp", "jpg", "jpeg", "png", "tif", "tiff", "webp"];

/// 支持的视频后缀
pub const VID_FORMATS: [&str; 8] = ["mov", "avi", "mp4", "mpg", "mpeg", "m4v", "wmv", "mkv"];

/// 流地址前缀
const STREAM_SCHEMES: [&str; 4] = ["rtsp://", "rtmp://", "http://", "https://"];

/// (原始帧, letterbox 帧)
pub type FramePair = (Frame, Letterbox);

/// 输入描述的解析结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Files(Vec<PathBuf>),
    Stream(StreamTarget),
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn is_image(path: &Path) -> bool {
    extension(path).is_some_and(|e| IMG_FORMATS.contains(&e.as_str()))
}

pub fn is_video(path: &Path) -> bool {
    extension(path).is_some_and(|e| VID_FORMATS.contains(&e.as_str()))
}

/// 解析输入描述,不读取任何帧
pub fn classify(descriptor: &str) -> Result<SourceKind, DetectError> {
    let desc = descriptor.trim();
    if desc.is_empty() {
        return Err(DetectError::source_not_found(descriptor, "empty source"));
    }

    if let Ok(index) = desc.parse::<usize>() {
        return Ok(SourceKind::Stream(StreamTarget::Camera(index)));
    }

    let lower = desc.to_ascii_lowercase();
    if STREAM_SCHEMES.iter().any(|s| lower.starts_with(s)) {
        return Ok(SourceKind::Stream(StreamTarget::Url(desc.to_string())));
    }

    let path = Path::new(desc);
    if !path.exists() {
        return Err(DetectError::source_not_found(desc, "path does not exist"));
    }

    // 流列表文件: 单流流水线只取第一行
    if lower.ends_with(".txt") || lower.ends_with(".streams") {
        let content = fs::read_to_string(path)
            .map_err(|e| DetectError::source_not_found(desc, e.to_string()))?;
        let first = content
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .ok_or_else(|| DetectError::source_not_found(desc, "stream list is empty"))?;
        let first_lower = first.to_ascii_lowercase();
        if first_lower.ends_with(".txt") || first_lower.ends_with(".streams") {
            return Err(DetectError::source_not_found(desc, "nested stream list"));
        }
        return match classify(first)? {
            SourceKind::Stream(target) => Ok(SourceKind::Stream(target)),
            files => Ok(files),
        };
    }

    let mut files: Vec<PathBuf> = if path.is_dir() {
        fs::read_dir(path)
            .map_err(|e| DetectError::source_not_found(desc, e.to_string()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect()
    } else {
        vec![path.to_path_buf()]
    };
    files.sort();
    files.retain(|p| is_image(p) || is_video(p));

    if files.is_empty() {
        return Err(DetectError::source_not_found(
            desc,
            format!(
                "no supported media (images: {:?}, videos: {:?})",
                IMG_FORMATS, VID_FORMATS
            ),
        ));
    }
    Ok(SourceKind::Files(files))
}

/// 帧来源
pub enum Source {
    Files(FileSource),
    Stream(StreamSource),
}

impl Source {
    /// 解析并打开输入源; 失败时返回 SourceNotFound,不会读取任何帧
    pub fn open(descriptor: &str, size: u32) -> Result<Self, DetectError> {
        Self::from_kind(descriptor, classify(descriptor)?, size)
    }

    pub fn from_kind(descriptor: &str, kind: SourceKind, size: u32) -> Result<Self, DetectError> {
        match kind {
            SourceKind::Files(files) => Ok(Source::Files(FileSource::new(descriptor, files, size)?)),
            SourceKind::Stream(target) => Ok(Source::Stream(StreamSource::open(target, size)?)),
        }
    }

    pub fn is_live(&self) -> bool {
        matches!(self, Source::Stream(_))
    }
}

impl Iterator for Source {
    type Item = Result<FramePair, DetectError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Source::Files(s) => s.next(),
            Source::Stream(s) => s.next(),
        }
    }
}

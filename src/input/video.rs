// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 视频/流解码 (FFmpeg)
//!
//! FFmpeg 在自己的线程里解码,经有界通道把 RGB 帧交给单线程流水线。
//! 文件视频阻塞发送 (不丢帧); 实时流在流水线跟不上时丢帧。

#[cfg(feature = "video")]
pub use self::ffmpeg::VideoReader;

#[cfg(not(feature = "video"))]
pub use self::disabled::VideoReader;

/// 是否编译了 FFmpeg 支持
pub const ENABLED: bool = cfg!(feature = "video");

#[cfg(feature = "video")]
mod ffmpeg {
    use std::path::Path;
    use std::thread;

    use crossbeam_channel::{bounded, Receiver};
    use ez_ffmpeg::core::context::null_output::create_null_output;
    use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
    use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
    use image::RgbImage;
    use tracing::{info, warn};

    use crate::error::DetectError;
    use crate::input::decode_filter::{DecodeFilter, DecodeEvent};
    use crate::input::stream::StreamTarget;

    pub struct VideoReader {
        rx: Receiver<DecodeEvent>,
        finished: bool,
    }

    impl VideoReader {
        pub fn open_file(path: &Path) -> Result<Self, DetectError> {
            let url = path.to_string_lossy().into_owned();
            Self::start(Input::new(url.as_str()), &url, false)
        }

        pub fn open_stream(target: &StreamTarget) -> Result<Self, DetectError> {
            let desc = target.to_string();
            let input = match target {
                StreamTarget::Camera(index) => {
                    Input::new(format_camera_url(*index)).set_format(camera_format())
                }
                StreamTarget::Url(url) if url.starts_with("rtsp://") => Input::new(url.as_str())
                    .set_input_opts([("rtsp_transport", "tcp"), ("rtsp_flags", "prefer_tcp")].into()),
                StreamTarget::Url(url) => Input::new(url.as_str()),
            };
            Self::start(input, &desc, true)
        }

        fn start(input: Input, desc: &str, live: bool) -> Result<Self, DetectError> {
            let not_found = |e: String| DetectError::source_not_found(desc, e);

            // 实时流只缓冲很少的帧,保证处理的是最新画面
            let (tx, rx) = bounded(if live { 2 } else { 8 });
            let filter = DecodeFilter::new(tx.clone(), live);

            let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
            let pipe = pipe.filter("decode", Box::new(filter));
            let out = create_null_output().add_frame_pipeline(pipe);

            // 统一转换为 RGB24
            let ctx = FfmpegContext::builder()
                .input(input)
                .filter_descs(["format=rgb24"].into())
                .output(out)
                .build()
                .map_err(|e| not_found(format!("构建失败: {}", e)))?;

            let sch = ctx
                .start()
                .map_err(|e| not_found(format!("启动失败: {}", e)))?;
            info!("✅ FFmpeg 解码启动: {}", desc);

            let name = desc.to_string();
            thread::Builder::new()
                .name("ffmpeg-wait".to_string())
                .spawn(move || {
                    if let Err(e) = sch.wait() {
                        warn!("⚠️ 解码结束 ({}): {}", name, e);
                    }
                    let _ = tx.send(DecodeEvent::End);
                })
                .map_err(|e| not_found(e.to_string()))?;

            Ok(Self {
                rx,
                finished: false,
            })
        }

        /// 阻塞读取下一帧; 流结束返回 None
        pub fn next_image(&mut self) -> Option<RgbImage> {
            if self.finished {
                return None;
            }
            match self.rx.recv() {
                Ok(DecodeEvent::Frame(image)) => Some(image),
                Ok(DecodeEvent::End) | Err(_) => {
                    self.finished = true;
                    None
                }
            }
        }
    }

    /// 摄像头地址 - 根据平台选择
    fn format_camera_url(index: usize) -> String {
        #[cfg(target_os = "windows")]
        {
            ez_ffmpeg::device::get_input_video_devices()
                .ok()
                .and_then(|devices| devices.into_iter().nth(index))
                .map(|name| format!("video={}", name))
                .unwrap_or_else(|| format!("video={}", index))
        }
        #[cfg(target_os = "linux")]
        {
            format!("/dev/video{}", index)
        }
        #[cfg(not(any(target_os = "windows", target_os = "linux")))]
        {
            format!("{}", index)
        }
    }

    fn camera_format() -> &'static str {
        #[cfg(target_os = "windows")]
        let format = "dshow"; // DirectShow

        #[cfg(target_os = "macos")]
        let format = "avfoundation"; // AVFoundation

        #[cfg(target_os = "linux")]
        let format = "v4l2"; // Video4Linux2

        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        let format = "video4linux2";

        format
    }
}

#[cfg(not(feature = "video"))]
mod disabled {
    use std::path::Path;

    use image::RgbImage;

    use crate::error::DetectError;
    use crate::input::stream::StreamTarget;

    const REASON: &str = "video/stream input requires building with the `video` feature";

    /// 未启用 FFmpeg 时的占位实现: 打开总是失败
    pub struct VideoReader {
        _private: (),
    }

    impl VideoReader {
        pub fn open_file(path: &Path) -> Result<Self, DetectError> {
            Err(DetectError::source_not_found(
                path.display().to_string(),
                REASON,
            ))
        }

        pub fn open_stream(target: &StreamTarget) -> Result<Self, DetectError> {
            Err(DetectError::source_not_found(target.to_string(), REASON))
        }

        pub fn next_image(&mut self) -> Option<RgbImage> {
            None
        }
    }
}

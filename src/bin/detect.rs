// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 目标检测 (Object Detection)
///
/// 图片 / 目录 / 视频 / 摄像头 / 流 → YOLO → 日志 + 标注图片 + detections.jsonl
///
/// cargo run --release --bin detect -- --model yolov5s.onnx --source data/images --save
use std::collections::BTreeMap;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use drone_detector::input::{self, Source};
use drone_detector::renderer::{self, class_name, Annotator, JsonlSink, SaveSink};
use drone_detector::{Args, DetectConfig, DetectionSet, Frame, Pipeline, YOLO};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn main() -> ExitCode {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<()> {
    // 1. 参数校验
    DetectConfig::try_from(args)?;

    // 2. 输入源检查 (加载模型之前)
    let kind = input::classify(&args.source)?;

    // 3. 加载模型
    let model = YOLO::new(args)?;
    model.summary();

    // 4. 打开输入源 (推理尺寸取决于模型)
    let source = Source::from_kind(&args.source, kind, model.size())?;

    // 5. 输出
    let mut pipeline = Pipeline::new(model).with_max_frames(args.max_frames);
    if args.save || args.save_txt {
        let dir = renderer::run_dir(&args.project, args.name.as_deref())
            .context("failed to prepare output directory")?;
        info!("💾 输出目录: {}", dir.display());
        if args.save {
            let annotator = Annotator::with_font_file(args.font.as_deref());
            pipeline = pipeline.with_sink(Box::new(SaveSink::new(dir.clone(), annotator)));
        }
        if args.save_txt {
            pipeline = pipeline.with_sink(Box::new(JsonlSink::create(&dir)?));
        }
    }

    // 6. 运行
    let names = pipeline.model().names().to_vec();
    let summary = pipeline.run(source, |frame, dets| log_frame(frame, dets, &names))?;
    info!(
        "✅ Done: {} frames, {} skipped, {} detections",
        summary.frames, summary.skipped, summary.detections
    );
    Ok(())
}

/// 每帧一行: origin#index WxH: 2 drone, 1 bird
fn log_frame(frame: &Frame, detections: &DetectionSet, names: &[String]) {
    let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
    for det in detections {
        *counts.entry(det.class_id).or_default() += 1;
    }
    let text = if counts.is_empty() {
        "(no detections)".to_string()
    } else {
        counts
            .iter()
            .map(|(id, n)| format!("{} {}", n, class_name(names, *id)))
            .collect::<Vec<_>>()
            .join(", ")
    };
    info!(
        "{}#{} {}x{}: {}",
        frame.origin,
        frame.index,
        frame.width(),
        frame.height(),
        text
    );
}

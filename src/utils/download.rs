// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

/// 模型权重下载
/// 远程权重 (http/https) 只下载一次,缓存到用户缓存目录
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

const CACHE_SUBDIR: &str = "drone-detector";

pub fn is_url(s: &str) -> bool {
    s.starts_with("http://") || s.starts_with("https://")
}

/// 缓存目录: ~/.cache/drone-detector (取不到时退回当前目录)
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CACHE_SUBDIR)
}

/// URL 对应的本地文件名 (去掉查询参数)
pub fn file_name_from_url(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    match path.rsplit('/').next() {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => "model.onnx".to_string(),
    }
}

/// 本地路径直接返回; URL 则下载到缓存目录后返回本地路径
pub fn resolve_weights(model: &str) -> Result<PathBuf> {
    if !is_url(model) {
        return Ok(PathBuf::from(model));
    }
    let dst = cache_dir().join(file_name_from_url(model));
    if dst.exists() {
        info!("📦 使用已缓存的模型: {}", dst.display());
        return Ok(dst);
    }
    download(model, &dst)?;
    Ok(dst)
}

fn download(url: &str, dst: &Path) -> Result<()> {
    info!("⬇️ 下载模型: {} → {}", url, dst.display());
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let resp = ureq::get(url)
        .call()
        .with_context(|| format!("failed to download {url}"))?;

    // 先写临时文件,避免中断后留下半个模型
    let tmp = dst.with_extension("part");
    let mut file =
        fs::File::create(&tmp).with_context(|| format!("failed to create {}", tmp.display()))?;
    let bytes = io::copy(&mut resp.into_reader(), &mut file)
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, dst).with_context(|| format!("failed to move {}", tmp.display()))?;

    info!("✅ 下载完成 ({} bytes)", bytes);
    Ok(())
}

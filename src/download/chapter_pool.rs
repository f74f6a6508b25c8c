//! 章节并发下载工作池。
//!
//! 固定数量的 worker 从同一个任务通道取 `(index, url)`，结果按 index 写回槽位。
//! 全部 worker 结束后才检查结果：任意槽位为空即整体失败，不会压缩成更短的章节列表。

use std::collections::HashMap;
use std::thread;

use crossbeam_channel as channel;
use tracing::{debug, info, warn};

use super::models::{Chapter, ChapterMeta, FALLBACK_TOC_ID, TocEntry};
use crate::error::{DownloadError, Result};
use crate::network_parser::network::ResourceFetch;

/// 拉取单个章节：元数据 → 正文 → 用目录解析 order / id。
pub(crate) fn fetch_chapter(
    fetcher: &dyn ResourceFetch,
    toc: &HashMap<String, TocEntry>,
    url: &str,
) -> Result<Chapter> {
    let body = fetcher.fetch(url)?;
    let meta: ChapterMeta = serde_json::from_slice(&body)
        .map_err(DownloadError::decode(format!("chapter metadata {url}")))?;

    if meta.content.trim().is_empty() {
        return Err(DownloadError::MissingField {
            what: format!("chapter metadata {url}"),
            field: "content",
        });
    }
    if meta.filename.trim().is_empty() {
        return Err(DownloadError::MissingField {
            what: format!("chapter metadata {url}"),
            field: "filename",
        });
    }

    let content = fetcher.fetch(&meta.content)?;
    let content = String::from_utf8_lossy(&content).into_owned();

    let toc_key = if meta.url.is_empty() { url } else { &meta.url };
    let (order, toc_id) = match toc.get(toc_key) {
        Some(entry) => {
            debug!(target: "download", label = %entry.label, depth = entry.depth, order = entry.order, "目录项匹配");
            (entry.order, entry.id.clone())
        }
        None => {
            debug!(target: "download", url = toc_key, "目录中无此章节，使用默认顺序");
            (0, FALLBACK_TOC_ID.to_string())
        }
    };

    Ok(Chapter {
        filename: meta.filename,
        images: meta.images,
        asset_base_url: meta.asset_base_url,
        title: meta.title,
        content,
        toc_id,
        order,
        stylesheet_urls: meta
            .stylesheets
            .into_iter()
            .map(|s| s.url)
            .filter(|u| !u.trim().is_empty())
            .collect(),
    })
}

/// 并发拉取所有章节，返回顺序与 `urls` 的下标一致，与完成先后无关。
pub(crate) fn fetch_chapters(
    fetcher: &dyn ResourceFetch,
    toc: &HashMap<String, TocEntry>,
    urls: &[String],
    workers: usize,
) -> Result<Vec<Chapter>> {
    let total = urls.len();
    if total == 0 {
        return Ok(Vec::new());
    }
    let workers = workers.clamp(1, total);
    info!(target: "download", total, workers, "开始下载章节");

    let (job_tx, job_rx) = channel::unbounded::<(usize, &str)>();
    for (index, url) in urls.iter().enumerate() {
        // 接收端仍在本函数内，发送不会失败
        let _ = job_tx.send((index, url.as_str()));
    }
    drop(job_tx);

    let (res_tx, res_rx) = channel::unbounded::<(usize, Result<Chapter>)>();
    let mut slots: Vec<Option<Chapter>> = (0..total).map(|_| None).collect();
    let mut failures: Vec<String> = Vec::new();

    thread::scope(|scope| {
        for worker in 0..workers {
            let job_rx = job_rx.clone();
            let res_tx = res_tx.clone();
            let spawned = thread::Builder::new()
                .name(format!("chapter-{worker}"))
                .spawn_scoped(scope, move || {
                    for (index, url) in job_rx.iter() {
                        let result = fetch_chapter(fetcher, toc, url);
                        if res_tx.send((index, result)).is_err() {
                            break;
                        }
                    }
                });
            if let Err(err) = spawned {
                warn!(target: "download", worker, error = %err, "无法启动下载线程");
            }
        }
        drop(res_tx);

        let mut done = 0usize;
        for (index, result) in res_rx.iter() {
            done += 1;
            match result {
                Ok(chapter) => {
                    info!(target: "download", done, total, "章节完成: {}", chapter.filename);
                    slots[index] = Some(chapter);
                }
                Err(err) => {
                    warn!(target: "download", index, error = %err, "章节下载失败");
                    failures.push(format!("chapter #{index} ({}): {err}", urls[index]));
                }
            }
        }
    });

    collect_slots(slots, failures)
}

/// 把按下标填充的槽位转成稠密列表；有缺口则报告全部缺失下标。
pub(crate) fn collect_slots(
    slots: Vec<Option<Chapter>>,
    failures: Vec<String>,
) -> Result<Vec<Chapter>> {
    let missing: Vec<usize> = slots
        .iter()
        .enumerate()
        .filter_map(|(i, slot)| slot.is_none().then_some(i))
        .collect();
    if !missing.is_empty() {
        return Err(DownloadError::IncompleteAssembly { missing, failures });
    }
    Ok(slots.into_iter().flatten().collect())
}

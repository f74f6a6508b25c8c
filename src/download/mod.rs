//! 下载流程模块入口。
//!
//! 子模块：
//! - `models`        — 数据模型（BookMeta / TocEntry / Book / Chapter 等）
//! - `plan`          — 书籍元数据与扁平目录的准备
//! - `chapter_pool`  — 章节并发下载工作池
//! - `downloader`    — 组装 `Book` 与下载主流程编排

pub(crate) mod chapter_pool;
pub mod downloader;
pub mod models;
pub mod plan;

#[cfg(test)]
pub(crate) mod test_helpers;

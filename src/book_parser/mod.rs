//! EPUB 生成与打包模块入口。
//!
//! 负责把组装好的 `Book` 写成 EPUB 暂存目录（章节、图片、样式、content.opf、toc.ncx），
//! 再压缩为单个 .epub 文件。

pub mod archiver;
pub mod epub_generator;
pub(crate) mod html_utils;
pub(crate) mod image_utils;
pub(crate) mod templates;

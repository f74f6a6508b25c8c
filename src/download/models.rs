//! 下载相关的数据模型定义。
//!
//! 远端 API 的响应结构（只取用到的字段），以及组装完成的 `Book` / `Chapter`。
//! `Book` 的 JSON 形态即进程间交换格式（PascalCase 字段名）。

use serde::{Deserialize, Deserializer, Serialize};

/// 目录里找不到章节时使用的占位 id。
pub const FALLBACK_TOC_ID: &str = "tocxhtmlfile";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NamedEntity {
    #[serde(default)]
    pub name: String,
}

/// `GET /api/v1/book/{id}/`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BookMeta {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub identifier: String,
    #[serde(default)]
    pub language: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub cover: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub authors: Vec<NamedEntity>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub publishers: Vec<NamedEntity>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub chapters: Vec<String>,
}

/// `GET /api/v1/book/{id}/flat-toc/` 的单项。
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TocEntry {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub depth: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub label: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StylesheetRef {
    #[serde(default)]
    pub url: String,
}

/// 章节元数据（URL 来自 `BookMeta::chapters`）。
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChapterMeta {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub images: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub asset_base_url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub stylesheets: Vec<StylesheetRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Chapter {
    #[serde(default)]
    pub filename: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub images: Vec<String>,
    #[serde(rename = "AssetBaseURL", default)]
    pub asset_base_url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "Id", default)]
    pub toc_id: String,
    #[serde(default)]
    pub order: i64,
    #[serde(rename = "StylesheetsURL", default, deserialize_with = "null_as_default")]
    pub stylesheet_urls: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Book {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub language: String,
    #[serde(rename = "Author", default, deserialize_with = "null_as_default")]
    pub authors: Vec<String>,
    #[serde(default)]
    pub cover: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "Publisher", default, deserialize_with = "null_as_default")]
    pub publishers: Vec<String>,
    #[serde(rename = "Stylesheet", default)]
    pub stylesheet_url: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub chapters: Vec<Chapter>,
}

impl Book {
    /// 用于暂存目录与包标识的键：优先 identifier，其次 book id。
    pub fn identifier(&self) -> &str {
        if self.uuid.trim().is_empty() {
            &self.id
        } else {
            &self.uuid
        }
    }

    /// 按阅读顺序（`order`）排列的章节；`order` 相同则保持原有先后。
    pub fn chapters_in_reading_order(&self) -> Vec<&Chapter> {
        let mut ordered: Vec<&Chapter> = self.chapters.iter().collect();
        ordered.sort_by_key(|c| c.order);
        ordered
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(raw: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(raw)
    }
}

/// Go 风格的 JSON 会把空数组写成 `null`。
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

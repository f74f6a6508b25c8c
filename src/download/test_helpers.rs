//! 测试用的脚本化内存抓取器，下载与打包测试共用。

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::network_parser::network::{FetchError, ResourceFetch};

#[derive(Clone)]
struct Scripted {
    outcome: Result<Vec<u8>, u16>,
    delay: Duration,
}

#[derive(Default)]
pub(crate) struct ScriptedFetcher {
    routes: HashMap<String, Scripted>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn ok(mut self, path: &str, body: impl Into<Vec<u8>>) -> Self {
        self.routes.insert(
            path.to_string(),
            Scripted {
                outcome: Ok(body.into()),
                delay: Duration::ZERO,
            },
        );
        self
    }

    pub(crate) fn delayed(mut self, path: &str, body: impl Into<Vec<u8>>, ms: u64) -> Self {
        self.routes.insert(
            path.to_string(),
            Scripted {
                outcome: Ok(body.into()),
                delay: Duration::from_millis(ms),
            },
        );
        self
    }

    pub(crate) fn status(mut self, path: &str, status: u16) -> Self {
        self.routes.insert(
            path.to_string(),
            Scripted {
                outcome: Err(status),
                delay: Duration::ZERO,
            },
        );
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn call_count(&self, path: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|p| *p == path).count()
    }
}

impl ResourceFetch for ScriptedFetcher {
    fn fetch(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.lock().unwrap().push(path.to_string());
        let Some(route) = self.routes.get(path).cloned() else {
            return Err(FetchError::Status {
                url: path.to_string(),
                status: 404,
            });
        };
        if !route.delay.is_zero() {
            std::thread::sleep(route.delay);
        }
        route.outcome.map_err(|status| FetchError::Status {
            url: path.to_string(),
            status,
        })
    }
}

/// 章节元数据 JSON（API 形态）。
pub(crate) fn chapter_meta_json(
    url: &str,
    content_url: &str,
    filename: &str,
    title: &str,
    images: &[&str],
    stylesheet: Option<&str>,
) -> String {
    serde_json::json!({
        "url": url,
        "content": content_url,
        "filename": filename,
        "title": title,
        "images": images,
        "asset_base_url": "https://cdn.example.com/library/view/book/files/",
        "stylesheets": stylesheet.map(|s| vec![serde_json::json!({ "url": s })]).unwrap_or_default(),
        "natural_key": ["book", filename],
        "virtual_pages": 12
    })
    .to_string()
}

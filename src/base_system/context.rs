//! 全局配置结构（Config）与默认值。
//!
//! 该模块同时提供生成 `config.yml` 的字段元信息，以及环境变量覆盖。

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::config::{ConfigSpec, FieldMeta};

pub const ENV_USERNAME: &str = "SAFARI_USERNAME";
pub const ENV_PASSWORD: &str = "SAFARI_PASSWORD";
pub const ENV_TOKEN: &str = "SAFARI_TOKEN";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // 账号配置
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,

    // 网络配置
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: f64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_min_wait_time")]
    pub min_wait_time: u64,
    #[serde(default = "default_max_wait_time")]
    pub max_wait_time: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    // 保存配置
    #[serde(default = "default_staging_dir")]
    pub staging_dir: String,
    #[serde(default = "default_output_path")]
    pub output_path: String,
    #[serde(default = "default_true")]
    pub auto_clear_staging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            username: String::new(),
            password: String::new(),
            access_token: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            base_url: default_base_url(),
            max_workers: default_max_workers(),
            request_timeout: default_request_timeout(),
            connect_timeout: default_connect_timeout(),
            max_retries: default_max_retries(),
            min_wait_time: default_min_wait_time(),
            max_wait_time: default_max_wait_time(),
            user_agent: default_user_agent(),
            staging_dir: default_staging_dir(),
            output_path: default_output_path(),
            auto_clear_staging: default_true(),
        }
    }
}

impl ConfigSpec for Config {
    const FILE_NAME: &'static str = "config.yml";

    fn fields() -> &'static [FieldMeta] {
        static FIELDS: [FieldMeta; 16] = [
            FieldMeta {
                name: "username",
                description: "账号用户名（需有效订阅，可用环境变量 SAFARI_USERNAME 覆盖）",
            },
            FieldMeta {
                name: "password",
                description: "账号密码（可用环境变量 SAFARI_PASSWORD 覆盖）",
            },
            FieldMeta {
                name: "access_token",
                description: "已签发的访问令牌，填写后跳过登录（可用环境变量 SAFARI_TOKEN 覆盖）",
            },
            FieldMeta {
                name: "client_id",
                description: "OAuth client_id（密码模式登录用）",
            },
            FieldMeta {
                name: "client_secret",
                description: "OAuth client_secret（密码模式登录用）",
            },
            FieldMeta {
                name: "base_url",
                description: "内容 API 根地址",
            },
            FieldMeta {
                name: "max_workers",
                description: "章节并发下载数（服务端限频未知，建议保持 1）",
            },
            FieldMeta {
                name: "request_timeout",
                description: "请求超时时间（秒）",
            },
            FieldMeta {
                name: "connect_timeout",
                description: "连接超时时间（秒）",
            },
            FieldMeta {
                name: "max_retries",
                description: "网络错误 / 429 / 5xx 时的最大尝试次数",
            },
            FieldMeta {
                name: "min_wait_time",
                description: "最小退避时间, 单位ms",
            },
            FieldMeta {
                name: "max_wait_time",
                description: "最大退避时间, 单位ms",
            },
            FieldMeta {
                name: "user_agent",
                description: "请求使用的 User-Agent",
            },
            FieldMeta {
                name: "staging_dir",
                description: "EPUB 暂存目录（按书籍标识建子目录）",
            },
            FieldMeta {
                name: "output_path",
                description: "默认输出文件路径",
            },
            FieldMeta {
                name: "auto_clear_staging",
                description: "打包成功后是否删除暂存目录",
            },
        ];
        &FIELDS
    }
}

impl Config {
    /// 用环境变量覆盖账号字段（命令行参数在此之后再覆盖）。
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub(crate) fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let pick = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = pick(ENV_USERNAME) {
            self.username = v;
        }
        if let Some(v) = pick(ENV_PASSWORD) {
            self.password = v;
        }
        if let Some(v) = pick(ENV_TOKEN) {
            self.access_token = v;
        }
    }

    pub fn staging_root(&self) -> PathBuf {
        if self.staging_dir.trim().is_empty() {
            PathBuf::from(default_staging_dir())
        } else {
            PathBuf::from(&self.staging_dir)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout.max(1))
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        if self.connect_timeout > 0.0 {
            Some(Duration::from_secs_f64(self.connect_timeout))
        } else {
            None
        }
    }

    pub fn workers(&self) -> usize {
        self.max_workers.max(1)
    }
}

/// 把任意字符串变成可用作文件/目录名的形式。
pub fn safe_fs_name(name: &str, replacement: &str, max_len: usize) -> String {
    let repl = replacement.chars().next().unwrap_or('_');
    let mut cleaned: String = name
        .trim()
        .chars()
        .map(|ch| match ch {
            ':' | '"' | '<' | '>' | '/' | '\\' | '|' | '?' | '*' => repl,
            c if (c as u32) < 32 => repl,
            _ => ch,
        })
        .collect();

    while cleaned.ends_with(' ') || cleaned.ends_with('.') {
        cleaned.pop();
    }

    const RESERVED: [&str; 22] = [
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    if RESERVED.contains(&cleaned.to_uppercase().as_str()) {
        cleaned = format!("_{}", cleaned);
    }

    if cleaned.len() > max_len {
        // 避免在多字节 UTF-8 字符中间截断导致 panic
        let mut end = max_len;
        while !cleaned.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        cleaned.truncate(end);
        while cleaned.ends_with(' ') || cleaned.ends_with('.') {
            cleaned.pop();
        }
    }

    if cleaned.is_empty() {
        cleaned.push_str("unnamed");
    }
    cleaned
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "https://learning.oreilly.com".to_string()
}

fn default_max_workers() -> usize {
    1
}

fn default_request_timeout() -> u64 {
    15
}

fn default_connect_timeout() -> f64 {
    3.05
}

fn default_max_retries() -> u32 {
    3
}

fn default_min_wait_time() -> u64 {
    1000
}

fn default_max_wait_time() -> u64 {
    8000
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120 Safari/537.36".to_string()
}

fn default_staging_dir() -> String {
    "books".to_string()
}

fn default_output_path() -> String {
    "ebook.epub".to_string()
}

//! Safari Books Online 下载器：把在线图书打包成 EPUB。
//!
//! 代码结构（读代码入口）：
//! - `base_system`：配置/日志/路径等基础设施
//! - `network_parser`：带鉴权与重试的资源获取
//! - `download`：元数据、目录与章节的并发下载，组装 `Book`
//! - `book_parser`：生成 EPUB 目录树并打包

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use clap::Parser;
use tracing::{error, info, warn};

mod base_system;
mod book_parser;
mod download;
mod error;
mod network_parser;

use base_system::book_paths::resolve_output_path;
use base_system::config::load_or_create;
use base_system::context::Config;
use base_system::logging::{LogOptions, LogSystem};
use download::downloader::{assemble_book, download_book, package_book};
use download::models::Book;
use network_parser::network::{SafariClient, SafariWebConfig};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Parser)]
#[command(name = "safari-epub-downloader")]
#[command(about = "Download Safari Books Online titles as EPUB", version)]
struct Cli {
    /// 书籍 ID（URL 中的数字部分，例如 9781491958698）
    #[arg(short = 'b', long = "bookid", required_unless_present = "from_json")]
    book_id: Option<String>,

    /// 登录用户名（覆盖配置文件与 SAFARI_USERNAME）
    #[arg(short, long)]
    username: Option<String>,

    /// 登录密码（覆盖配置文件与 SAFARI_PASSWORD）
    #[arg(short, long)]
    password: Option<String>,

    /// 输出的 .epub 路径
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// 配置文件路径（默认 <data-dir>/config.yml）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 数据目录路径（用于存放 config.yml 和 logs 等文件）
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// 启用调试日志输出
    #[arg(long, default_value_t = false)]
    debug: bool,

    /// 把组装好的书籍 JSON 写到指定文件
    #[arg(long)]
    dump_json: Option<PathBuf>,

    /// 跳过下载，直接用保存的书籍 JSON 生成 EPUB
    #[arg(long, conflicts_with = "dump_json")]
    from_json: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let data_dir = cli.data_dir.as_deref();
    let _log = init_logging(cli.debug, data_dir)?;
    info!(target: "startup", "safari-epub-downloader v{}", VERSION);

    let mut config = load_or_create::<Config>(cli.config.as_deref(), data_dir)
        .map_err(|e| anyhow!(e.to_string()))?;
    config.apply_env();
    apply_cli_overrides(&mut config, &cli);

    let output = resolve_output_path(&config, cli.output.as_deref());
    match run(&cli, &config, &output) {
        Ok(path) => {
            info!(target: "startup", "EPUB 已保存到 {}", path.display());
            Ok(())
        }
        Err(err) => {
            error!(target: "startup", "下载失败: {err:#}");
            Err(err)
        }
    }
}

fn apply_cli_overrides(config: &mut Config, cli: &Cli) {
    if let Some(username) = cli.username.as_ref().filter(|v| !v.trim().is_empty()) {
        config.username = username.clone();
    }
    if let Some(password) = cli.password.as_ref().filter(|v| !v.is_empty()) {
        config.password = password.clone();
    }
}

fn run(cli: &Cli, config: &Config, output: &Path) -> Result<PathBuf> {
    if let Some(path) = &cli.from_json {
        let raw = fs::read(path).with_context(|| format!("读取书籍 JSON 失败: {}", path.display()))?;
        let book = Book::from_json(&raw)
            .with_context(|| format!("解析书籍 JSON 失败: {}", path.display()))?;
        info!(target: "startup", title = %book.title, chapters = book.chapters.len(), "已载入书籍 JSON");
        let client = connect(config, false)?;
        return Ok(package_book(config, &client, &book, output)?);
    }

    let book_id = cli
        .book_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| anyhow!("缺少书籍 ID（--bookid）"))?;
    let client = connect(config, true)?;

    let Some(dump_path) = &cli.dump_json else {
        return Ok(download_book(config, &client, book_id, output)?);
    };

    let book = assemble_book(config, &client, book_id)?;
    if let Some(parent) = dump_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(dump_path, book.to_json()?)
        .with_context(|| format!("写入书籍 JSON 失败: {}", dump_path.display()))?;
    info!(target: "startup", path = %dump_path.display(), "书籍 JSON 已保存");
    Ok(package_book(config, &client, &book, output)?)
}

/// 已有 token 直接使用，否则用账号密码登录。
fn connect(config: &Config, require_auth: bool) -> Result<SafariClient> {
    let mut client = SafariClient::new(SafariWebConfig::from_config(config))?;
    if !config.access_token.trim().is_empty() {
        info!(target: "network", "使用已有 access token");
        client = client.with_token(config.access_token.trim());
    } else if !config.username.trim().is_empty() {
        client.authorize(&config.username, &config.password)?;
    }

    if !client.is_authorized() {
        if require_auth {
            bail!("需要账号密码（--username/--password 或 SAFARI_USERNAME/SAFARI_PASSWORD）或 SAFARI_TOKEN");
        }
        warn!(target: "network", "未提供登录凭据，以匿名方式请求资源");
    }
    Ok(client)
}

fn init_logging(debug: bool, base_dir: Option<&Path>) -> Result<LogSystem> {
    let opts = LogOptions {
        debug,
        use_color: true,
        archive_on_exit: true,
        console: true,
    };
    LogSystem::init_with_base(opts, base_dir).map_err(|e| anyhow!(e))
}

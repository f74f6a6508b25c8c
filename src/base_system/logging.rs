//! 日志系统：控制台 + `logs/latest.log`。
//!
//! 下载相关的 target（`download` / `network` / `epub` / `archive` / `startup`）按 `--debug` 决定级别，
//! HTTP 栈（reqwest / hyper / rustls）只保留警告。退出时日志压缩为 `logs/log_<时间戳>.zip`。

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::{panic, thread, time::Duration};

use time::OffsetDateTime;
use time::macros::format_description;
use tracing::error;
use tracing_appender::non_blocking::{NonBlockingBuilder, WorkerGuard};
use tracing_appender::rolling;
use tracing_subscriber::Layer;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use zip::CompressionMethod;
use zip::write::FileOptions;

const LATEST_LOG: &str = "latest.log";
/// 启动时超过该大小的旧日志先归档
const ROTATE_AT_BYTES: u64 = 8 * 1024 * 1024;
const FLUSH_WAIT: Duration = Duration::from_millis(150);

const APP_TARGETS: [&str; 5] = ["startup", "download", "network", "epub", "archive"];

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("failed to install log subscriber: {0}")]
    Subscriber(#[from] tracing_subscriber::util::TryInitError),
    #[error("log file io error: {0}")]
    Io(#[from] io::Error),
    #[error("log archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("log timestamp formatting failed: {0}")]
    Time(#[from] time::error::Format),
}

#[derive(Clone, Copy, Debug)]
pub struct LogOptions {
    pub debug: bool,
    pub use_color: bool,
    pub archive_on_exit: bool,
    /// 为 false 时只写文件。
    pub console: bool,
}

/// 持有期间日志可用；drop 时刷新并归档。
pub struct LogSystem {
    state: Arc<LogState>,
}

struct LogState {
    logs_dir: PathBuf,
    guard: Mutex<Option<WorkerGuard>>,
    closed: AtomicBool,
    archive_on_exit: bool,
}

fn level_filter(debug: bool) -> Targets {
    let app_level = if debug {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    APP_TARGETS
        .iter()
        .fold(Targets::new().with_default(LevelFilter::WARN), |t, target| {
            t.with_target(*target, app_level)
        })
}

impl LogSystem {
    /// `base_dir` 为空时日志写到当前目录下的 `logs/`。
    pub fn init_with_base(options: LogOptions, base_dir: Option<&Path>) -> Result<Self, LogError> {
        let logs_dir = base_dir.map_or_else(|| PathBuf::from("logs"), |b| b.join("logs"));
        fs::create_dir_all(&logs_dir)?;

        let latest = logs_dir.join(LATEST_LOG);
        if fs::metadata(&latest).is_ok_and(|m| m.len() >= ROTATE_AT_BYTES) {
            archive_log_file(&logs_dir)?;
        }

        let (file_writer, guard) =
            NonBlockingBuilder::default()
                .lossy(false)
                .finish(rolling::never(&logs_dir, LATEST_LOG));

        let console_writer = if options.console {
            BoxMakeWriter::new(io::stderr)
        } else {
            BoxMakeWriter::new(io::sink)
        };
        let console_layer = fmt::layer()
            .with_target(false)
            .with_thread_names(options.debug)
            .with_ansi(options.use_color)
            .with_writer(console_writer)
            .with_filter(level_filter(options.debug));

        // 文件里始终保留 debug 级别，方便事后排查章节失败原因
        let file_layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(false)
            .with_writer(file_writer)
            .with_filter(level_filter(true));

        tracing_subscriber::registry()
            .with(console_layer)
            .with(file_layer)
            .try_init()?;

        let state = Arc::new(LogState {
            logs_dir,
            guard: Mutex::new(Some(guard)),
            closed: AtomicBool::new(false),
            archive_on_exit: options.archive_on_exit,
        });
        state.install_interrupt_handler();
        state.install_panic_hook();

        Ok(Self { state })
    }
}

impl Drop for LogSystem {
    fn drop(&mut self) {
        self.state.close();
    }
}

impl LogState {
    fn install_interrupt_handler(self: &Arc<Self>) {
        let state = Arc::clone(self);
        let _ = ctrlc::set_handler(move || {
            error!(target: "startup", "收到中断信号，暂存目录可能不完整");
            state.close();
            std::process::exit(130);
        });
    }

    fn install_panic_hook(self: &Arc<Self>) {
        let state = Arc::clone(self);
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            match info.location() {
                Some(loc) => error!(target: "startup", "panic at {}:{}: {info}", loc.file(), loc.line()),
                None => error!(target: "startup", "panic: {info}"),
            }
            state.close();
            previous(info);
        }));
    }

    /// 只执行一次：释放 guard 刷新写入线程，再按需归档。
    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut guard) = self.guard.lock() {
            drop(guard.take());
        }
        if !self.archive_on_exit {
            return;
        }
        thread::sleep(FLUSH_WAIT);
        if let Err(err) = archive_log_file(&self.logs_dir) {
            eprintln!("failed to archive log: {err}");
        }
    }
}

/// 把 `latest.log` 压缩为 `log_<时间戳>.zip` 并删除原文件；空日志直接删除。
fn archive_log_file(logs_dir: &Path) -> Result<Option<PathBuf>, LogError> {
    let latest = logs_dir.join(LATEST_LOG);
    let len = match fs::metadata(&latest) {
        Ok(meta) => meta.len(),
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    if len == 0 {
        fs::remove_file(&latest)?;
        return Ok(None);
    }

    let stamp = OffsetDateTime::now_utc().format(format_description!(
        "[year][month][day]_[hour][minute][second]"
    ))?;
    let archive_path = logs_dir.join(format!("log_{stamp}.zip"));

    {
        let mut zip = zip::ZipWriter::new(File::create(&archive_path)?);
        zip.start_file(
            format!("{stamp}.log"),
            FileOptions::default().compression_method(CompressionMethod::Deflated),
        )?;
        io::copy(&mut BufReader::new(File::open(&latest)?), &mut zip)?;
        zip.finish()?;
    }

    fs::remove_file(&latest)?;
    Ok(Some(archive_path))
}

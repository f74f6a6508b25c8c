//! 基础设施：配置文件、日志、路径。

pub mod book_paths;
pub mod config;
pub mod context;
pub mod logging;

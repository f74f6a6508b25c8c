//! 下载 / 打包流程统一错误类型。

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::network_parser::network::FetchError;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("login failed, please double check your username and password: {0}")]
    AuthenticationFailure(String),
    #[error("transport failure: {0}")]
    TransportFailure(#[from] FetchError),
    #[error(
        "incomplete assembly: chapter indices {missing:?} produced no result ({})",
        .failures.join("; ")
    )]
    IncompleteAssembly {
        missing: Vec<usize>,
        failures: Vec<String>,
    },
    #[error("{what} response is missing required field `{field}`")]
    MissingField { what: String, field: &'static str },
    #[error("duplicate chapter filename {0}")]
    DuplicateFilename(String),
    #[error("chapter filename {0:?} is not a relative path inside the package")]
    UnsafeFilename(String),
    #[error("filesystem error at {path}: {source}")]
    FilesystemFailure {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid {what} response: {source}")]
    Decode {
        what: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl DownloadError {
    /// `map_err(DownloadError::fs(&path))`
    pub fn fs(path: &Path) -> impl FnOnce(io::Error) -> DownloadError + '_ {
        move |source| DownloadError::FilesystemFailure {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn decode(what: impl Into<String>) -> impl FnOnce(serde_json::Error) -> DownloadError {
        let what = what.into();
        move |source| DownloadError::Decode { what, source }
    }
}

pub type Result<T, E = DownloadError> = std::result::Result<T, E>;

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CategoryError {
    #[error("invalid item id: {0:?}")]
    InvalidItemId(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("catalog request failed: {0}")]
    CatalogHttp(String),

    #[error("catalog returned status {status}: {message}")]
    CatalogStatus { status: u16, message: String },

    #[error("could not parse catalog page: {0}")]
    CatalogParse(String),

    #[error("catalog page lists no items; the page structure may have changed")]
    EmptyCatalog,

    #[error("failed to read state file {path}: {message}")]
    #[diagnostic(help("check file permissions; the run was aborted before touching any state"))]
    StateRead { path: PathBuf, message: String },

    #[error("state file {path} is corrupt: {message}")]
    #[diagnostic(help(
        "fix or remove the file by hand; it is never treated as empty to avoid re-downloading everything"
    ))]
    StateCorrupt { path: PathBuf, message: String },

    #[error("failed to write state file {path}: {message}")]
    StateWrite { path: PathBuf, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("download failed: {0}")]
    Download(String),
}

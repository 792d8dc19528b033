use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum MetaError {
    #[error("invalid Zenodo record id: {0}")]
    InvalidRecordId(String),

    #[error("invalid checksum: {0}")]
    InvalidChecksum(String),

    #[error("unsupported checksum algorithm: {0}")]
    UnsupportedChecksum(String),

    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    #[diagnostic(help("the archive may have been truncated; re-run `clld-meta download`"))]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    ConfigValue(String),

    #[error("Zenodo request failed: {0}")]
    ZenodoHttp(String),

    #[error("Zenodo returned status {status}: {message}")]
    ZenodoStatus { status: u16, message: String },

    #[error("gave up on {url} after {attempts} attempts")]
    #[diagnostic(help("set CLLD_META_ACCESS_TOKEN to raise the Zenodo rate limit"))]
    RetriesExhausted { url: String, attempts: usize },

    #[error("unexpected Zenodo response: {0}")]
    ZenodoResponse(String),

    #[error("metadata cache not found at {0}")]
    #[diagnostic(help("run `clld-meta updatemd` first"))]
    MissingMetadata(PathBuf),

    #[error("failed to parse metadata cache: {0}")]
    MetadataParse(String),

    #[error("{} dataset(s) missing from raw/datasets: {}", .0.len(), .0.join(", "))]
    #[diagnostic(help("you might have to re-run `clld-meta download`"))]
    MissingDatasets(Vec<String>),

    #[error("failed to read list {path}: {message}")]
    ListRead { path: PathBuf, message: String },

    #[error("failed to write list {path}: {message}")]
    ListWrite { path: PathBuf, message: String },

    #[error("zip archive error: {0}")]
    Zip(String),

    #[error("failed to write catalog: {0}")]
    CatalogWrite(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

use crate::domain::RegionCode;

#[derive(Debug, Error, Diagnostic)]
pub enum EtlError {
    #[error("invalid region code: {0}")]
    InvalidRegionCode(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("source for region {region} is unavailable: {reason}")]
    SourceUnavailable { region: RegionCode, reason: String },

    #[error("source request failed: {0}")]
    SourceHttp(String),

    #[error("source returned status {status}: {message}")]
    SourceStatus { status: u16, message: String },

    #[error("failed to convert region {region}: {message}")]
    #[diagnostic(help("delete the partial download for this region and re-run"))]
    Conversion { region: RegionCode, message: String },

    #[error("failed to read normalized geometry file {path}: {message}")]
    NormalizedRead { path: Utf8PathBuf, message: String },

    #[error("column {column} missing in {path}")]
    MissingColumn { column: String, path: Utf8PathBuf },

    #[error("unsupported coordinate reference system: {0}")]
    UnsupportedCrs(String),

    #[error("national assembly is empty: no normalized region files were found")]
    #[diagnostic(help("run the transform stage first; every region conversion failed or was skipped"))]
    AssemblyEmpty,

    #[error("failed to write {path}: {message}")]
    Write { path: Utf8PathBuf, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

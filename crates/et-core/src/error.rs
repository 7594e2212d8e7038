//! Error types for EchoTrace

use thiserror::Error;

/// Core error type
///
/// Geometric rejections during path validation are not errors - candidates
/// are silently dropped. Errors are reserved for construction and IO.
#[derive(Error, Debug)]
pub enum EtError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Invalid mesh: {0}")]
    InvalidMesh(String),

    #[error("Not a sound mesh file")]
    NotASoundMesh,

    #[error("Unsupported sound mesh version: {0}")]
    UnsupportedVersion(u8),

    #[error("Checksum mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { expected: u32, computed: u32 },

    #[error("Truncated sound mesh file")]
    TruncatedFile,
}

/// Result type alias
pub type EtResult<T> = Result<T, EtError>;

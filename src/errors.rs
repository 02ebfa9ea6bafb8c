// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the reduction engine

use std::fmt;

/// Result type alias using EngineError
pub type EngineResult<T> = Result<T, EngineError>;

/// Main engine error type
#[derive(Debug, Clone)]
pub enum EngineError {
    /// GPU device or dispatch errors
    Gpu(GpuError),
    /// Export serialization errors
    Export(ExportError),
    /// Generic error with message
    Other(String),
}

/// GPU-specific errors
#[derive(Debug, Clone)]
pub enum GpuError {
    /// No suitable compute adapter found
    AdapterNotFound,
    /// Device creation failed
    DeviceCreation(String),
    /// Staging buffer mapping failed during readback
    BufferMap(String),
}

/// Export serialization errors
#[derive(Debug, Clone)]
pub enum ExportError {
    /// No generation has been published yet, there is nothing to serialize
    NothingToExport,
    /// Blob too short for its declared section counts
    Truncated { expected: usize, actual: usize },
    /// Blob header is malformed
    MalformedHeader(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Gpu(e) => write!(f, "GPU error: {}", e),
            EngineError::Export(e) => write!(f, "Export error: {}", e),
            EngineError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for GpuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GpuError::AdapterNotFound => write!(f, "No suitable GPU adapter found"),
            GpuError::DeviceCreation(msg) => write!(f, "Failed to create GPU device: {}", msg),
            GpuError::BufferMap(msg) => write!(f, "Failed to map GPU buffer: {}", msg),
        }
    }
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::NothingToExport => write!(f, "No reduced mesh to export"),
            ExportError::Truncated { expected, actual } => {
                write!(f, "Blob truncated: {} bytes declared, {} present", expected, actual)
            }
            ExportError::MalformedHeader(msg) => write!(f, "Malformed header: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}
impl std::error::Error for GpuError {}
impl std::error::Error for ExportError {}

impl From<GpuError> for EngineError {
    fn from(err: GpuError) -> Self {
        EngineError::Gpu(err)
    }
}

impl From<ExportError> for EngineError {
    fn from(err: ExportError) -> Self {
        EngineError::Export(err)
    }
}

impl From<String> for EngineError {
    fn from(msg: String) -> Self {
        EngineError::Other(msg)
    }
}

impl From<&str> for EngineError {
    fn from(msg: &str) -> Self {
        EngineError::Other(msg.to_string())
    }
}

//! Error types for the binscope spectral engine.

use std::fmt;
use thiserror::Error;

/// The step of the GPU backend that produced a [`SpectralError::Backend`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendStage {
    /// Creating the logical device and its queue.
    RequestDevice,
    /// Compiling the embedded kernel program.
    CompileProgram,
    /// Creating a compute pipeline for one kernel.
    CreateKernel,
    /// Allocating a device buffer.
    CreateBuffer,
    /// Uploading host data into a device buffer.
    WriteBuffer,
    /// Downloading a device buffer to the host.
    ReadBuffer,
    /// Binding arguments and enqueueing a kernel launch.
    Dispatch,
}

impl fmt::Display for BackendStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendStage::RequestDevice => "device request",
            BackendStage::CompileProgram => "program compilation",
            BackendStage::CreateKernel => "kernel creation",
            BackendStage::CreateBuffer => "buffer allocation",
            BackendStage::WriteBuffer => "buffer write",
            BackendStage::ReadBuffer => "buffer read",
            BackendStage::Dispatch => "kernel dispatch",
        };
        f.write_str(name)
    }
}

/// The main error type for binscope operations.
#[derive(Error, Debug)]
pub enum SpectralError {
    /// No compute platform exposes any adapter.
    #[error("No compute platforms found")]
    NoPlatforms,

    /// A platform was found but it has no matching device.
    #[error("No GPU devices found on platform '{platform_name}'")]
    NoDevices {
        /// Name of the platform that was searched.
        platform_name: String,
    },

    /// The engine has no allocated resources.
    #[error("Spectral engine is not initialised")]
    NotInitialised,

    /// `init` was called while resources already exist.
    #[error("Spectral engine is already initialised")]
    AlreadyInitialised,

    /// A sample window or frequency list had the wrong length.
    #[error("Expected input (sample data / frequencies) of size {expected}, but got {got}")]
    InvalidInputSize {
        /// Required element count.
        expected: usize,
        /// Element count that was supplied.
        got: usize,
    },

    /// The GPU backend rejected an operation.
    #[error("GPU {stage} failed: {message}")]
    Backend {
        /// Which step failed.
        stage: BackendStage,
        /// Backend diagnostic text.
        message: String,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SpectralError {
    /// Wrap a backend diagnostic with the step that produced it.
    pub fn backend(stage: BackendStage, message: impl fmt::Display) -> Self {
        SpectralError::Backend {
            stage,
            message: message.to_string(),
        }
    }
}

/// Result type alias for binscope operations.
pub type Result<T> = std::result::Result<T, SpectralError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_size_message() {
        let err = SpectralError::InvalidInputSize { expected: 8, got: 3 };
        assert_eq!(
            err.to_string(),
            "Expected input (sample data / frequencies) of size 8, but got 3"
        );
    }

    #[test]
    fn test_backend_names_stage() {
        let err = SpectralError::backend(BackendStage::CompileProgram, "unknown identifier");
        assert_eq!(
            err.to_string(),
            "GPU program compilation failed: unknown identifier"
        );
        assert!(matches!(
            err,
            SpectralError::Backend {
                stage: BackendStage::CompileProgram,
                ..
            }
        ));
    }

    #[test]
    fn test_no_devices_names_platform() {
        let err = SpectralError::NoDevices {
            platform_name: "Vulkan".to_string(),
        };
        assert!(err.to_string().contains("'Vulkan'"));
    }
}

//! # binscope - GPU partial spectrum engine
//!
//! binscope computes, for a fixed-size window of real samples and an
//! arbitrary set of target frequencies, the magnitude of the discrete Fourier
//! correlation of the window against each frequency. All the arithmetic runs
//! on a GPU through wgpu.
//!
//! ## Overview
//!
//! Unlike a full FFT, the bins are chosen by the caller and need not be
//! harmonically related. Each window is processed in three dependent stages:
//!
//! 1. **Correlation**: one work-item per (frequency, sample) pair writes the
//!    sample rotated by `-2π · f · s`
//! 2. **Reduction**: `log2(N)` pairwise rounds fold each frequency's N terms
//!    down to offset 0 of its block
//! 3. **Averaging**: one work-item per frequency writes `|sum| / N`
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use binscope::Engine;
//!
//! # fn main() -> binscope::Result<()> {
//! let mut engine = Engine::new(3, 1);
//! engine.init()?;
//! engine.write_freqs(&[0.0])?;
//!
//! let magnitudes = engine.transform(&[1.0; 8])?;
//! assert!((magnitudes[0] - 1.0).abs() < 1e-5);
//!
//! engine.release();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`accel`] - device selection, kernel program, resources, work-group sizing
//! - [`engine`] - lifecycle, host transfers and the stage pipeline
//! - [`reference`] - host implementation of the same stages
//! - [`bins`] - frequency set helpers
//! - [`window`] - cutting sample streams into windows

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod accel;
pub mod bins;
pub mod config;
pub mod engine;
pub mod error;
pub mod reference;
pub mod window;

// Re-export commonly used types
pub use accel::{enumerate_platforms, select_default_device, select_device, Device, KernelId, Platform};
pub use config::{Config, DeviceConfig, EngineConfig};
pub use engine::Engine;
pub use error::{BackendStage, Result, SpectralError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_default_engine_config_matches_engine_default() {
        assert_eq!(
            EngineConfig::default().workgroup_size,
            engine::DEFAULT_WORKGROUP_SIZE
        );
    }
}

//! Configuration for the binscope spectral engine.

use crate::error::{Result, SpectralError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Largest accepted window exponent; `F · 2^L` must stay addressable with `u32`.
pub const MAX_LOG_WINDOW_SIZE: u32 = 31;

/// Main configuration for the binscope engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Window and work-group configuration.
    pub engine: EngineConfig,

    /// Device selection configuration.
    pub device: DeviceConfig,
}

impl Config {
    /// Load configuration from a JSON file.
    ///
    /// Missing sections and fields fall back to their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.engine.validate()?;
        Ok(config)
    }
}

/// Engine shape configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Window length exponent: each window holds `2^log_window_size` samples.
    /// Default: 12 (4096 samples).
    pub log_window_size: u32,

    /// Number of target frequencies evaluated per window.
    /// Default: 5.
    pub num_frequencies: usize,

    /// Requested local work-group size. The device limits may lower it.
    /// Default: 64.
    pub workgroup_size: u32,

    /// Cap on work-groups per dispatch dimension, applied below the device
    /// limit. Larger launches wrap into a second dimension.
    /// Default: None (device limit).
    pub max_workgroups_per_dimension: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_window_size: 12,
            num_frequencies: 5,
            workgroup_size: 64,
            max_workgroups_per_dimension: None,
        }
    }
}

impl EngineConfig {
    /// Returns the window length N, saturating for exponents `validate` rejects.
    #[inline]
    pub fn window_size(&self) -> usize {
        1usize.checked_shl(self.log_window_size).unwrap_or(usize::MAX)
    }

    /// Check the host-side constraints that do not depend on a device.
    pub fn validate(&self) -> Result<()> {
        if self.log_window_size > MAX_LOG_WINDOW_SIZE {
            return Err(SpectralError::Config(format!(
                "log_window_size {} exceeds {}",
                self.log_window_size, MAX_LOG_WINDOW_SIZE
            )));
        }
        if self.num_frequencies == 0 {
            return Err(SpectralError::Config(
                "num_frequencies must be at least 1".to_string(),
            ));
        }
        if self.workgroup_size == 0 {
            return Err(SpectralError::Config(
                "workgroup_size must be at least 1".to_string(),
            ));
        }
        if self.max_workgroups_per_dimension == Some(0) {
            return Err(SpectralError::Config(
                "max_workgroups_per_dimension must be at least 1".to_string(),
            ));
        }
        let cells = (self.num_frequencies as u64) << self.log_window_size;
        if cells > u32::MAX as u64 {
            return Err(SpectralError::Config(format!(
                "{} frequencies x {} samples exceeds the u32 index space",
                self.num_frequencies,
                self.window_size()
            )));
        }
        Ok(())
    }
}

/// Device selection configuration.
///
/// The defaults reproduce the plain policy: first platform, first GPU device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Platform (backend) name to use instead of the first one, e.g. "Vulkan".
    /// Default: None.
    pub platform: Option<String>,

    /// Index into the platform's GPU devices.
    /// Default: 0.
    pub device_index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.engine.log_window_size, 12);
        assert_eq!(config.engine.window_size(), 4096);
        assert_eq!(config.engine.num_frequencies, 5);
        assert!(config.device.platform.is_none());
        assert_eq!(config.device.device_index, 0);
    }

    #[test]
    fn test_validate_rejects_zero_frequencies() {
        let config = EngineConfig {
            num_frequencies: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SpectralError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_index_overflow() {
        let config = EngineConfig {
            log_window_size: 30,
            num_frequencies: 8,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            log_window_size: 30,
            num_frequencies: 3,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_oversized_exponent() {
        let config = EngineConfig {
            log_window_size: 64,
            ..Default::default()
        };
        assert_eq!(config.window_size(), usize::MAX);
        assert!(matches!(config.validate(), Err(SpectralError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_dispatch_cap() {
        let config = EngineConfig {
            max_workgroups_per_dimension: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            max_workgroups_per_dimension: Some(8),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{ "engine": {{ "log_window_size": 3, "num_frequencies": 2 }} }}"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.engine.window_size(), 8);
        assert_eq!(config.engine.num_frequencies, 2);
        assert_eq!(config.engine.workgroup_size, 64);
        assert!(config.engine.max_workgroups_per_dimension.is_none());
        assert_eq!(config.device.device_index, 0);
    }

    #[test]
    fn test_from_file_invalid() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, r#"{{ "engine": {{ "num_frequencies": 0 }} }}"#).unwrap();
        assert!(Config::from_file(file.path()).is_err());

        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(SpectralError::Json(_))
        ));
    }
}

//! The spectral engine: lifecycle, host transfers and the three-stage pipeline.
//!
//! An [`Engine`] is bound to a window exponent `L` (N = 2^L samples) and a
//! frequency count `F` for its whole life. It starts uninitialised; [`Engine::init`]
//! allocates the device resources and [`Engine::release`] frees them again.
//!
//! ```text
//! Uninitialised --init--> Initialised --release--> Uninitialised
//! ```
//!
//! Every operation other than `init`/`release` fails with
//! [`SpectralError::NotInitialised`] while uninitialised. All operations block
//! until the device has finished the work they enqueued.
//!
//! The engine holds no lock. Share it across threads only behind an external
//! mutex around the whole write/run/read cycle.

use crate::accel::device::{self, Device};
use crate::accel::resources::{BufferRole, KernelId, LaunchParams, ResourceLayout, Resources};
use crate::config::{Config, EngineConfig, MAX_LOG_WINDOW_SIZE};
use crate::error::{Result, SpectralError};
use log::{debug, info};

/// Default requested local work-group size.
pub const DEFAULT_WORKGROUP_SIZE: u32 = 64;

/// GPU engine computing the correlation magnitude of a window against F frequencies.
pub struct Engine {
    device: Option<Device>,
    log_window_size: u32,
    num_frequencies: usize,
    workgroup_size: u32,
    max_workgroups_per_dimension: Option<u32>,
    resources: Option<Resources>,
}

impl Engine {
    /// Create an uninitialised engine for windows of `2^log_window_size` samples.
    ///
    /// The device defaults to [`device::select_default_device`]. If no device
    /// is found now, selection is retried (and its error reported) by `init`.
    pub fn new(log_window_size: u32, num_frequencies: usize) -> Self {
        let device = match device::select_default_device() {
            Ok(device) => Some(device),
            Err(e) => {
                debug!("No default device at construction: {}", e);
                None
            }
        };
        Self {
            device,
            log_window_size,
            num_frequencies,
            workgroup_size: DEFAULT_WORKGROUP_SIZE,
            max_workgroups_per_dimension: None,
            resources: None,
        }
    }

    /// Create an uninitialised engine bound to an explicit device.
    pub fn with_device(device: Device, log_window_size: u32, num_frequencies: usize) -> Self {
        Self {
            device: Some(device),
            log_window_size,
            num_frequencies,
            workgroup_size: DEFAULT_WORKGROUP_SIZE,
            max_workgroups_per_dimension: None,
            resources: None,
        }
    }

    /// Create an uninitialised engine from configuration.
    ///
    /// The engine section is validated first, then the device is picked with
    /// [`device::select_device`], so a bad shape never touches the backend.
    pub fn from_config(config: &Config) -> Result<Self> {
        config.engine.validate()?;
        let device = device::select_device(&config.device)?;
        let mut engine = Self::with_device(
            device,
            config.engine.log_window_size,
            config.engine.num_frequencies,
        );
        engine.set_workgroup_size(config.engine.workgroup_size)?;
        if let Some(max) = config.engine.max_workgroups_per_dimension {
            engine.set_max_workgroups_per_dimension(max)?;
        }
        Ok(engine)
    }

    /// Set the requested local work-group size. Only allowed while uninitialised.
    pub fn set_workgroup_size(&mut self, workgroup_size: u32) -> Result<()> {
        if self.resources.is_some() {
            return Err(SpectralError::AlreadyInitialised);
        }
        self.workgroup_size = workgroup_size;
        Ok(())
    }

    /// Cap the work-groups per dispatch dimension below the device limit.
    /// Only allowed while uninitialised.
    pub fn set_max_workgroups_per_dimension(&mut self, max: u32) -> Result<()> {
        if self.resources.is_some() {
            return Err(SpectralError::AlreadyInitialised);
        }
        self.max_workgroups_per_dimension = Some(max);
        Ok(())
    }

    /// The device used (or to be used) by `init`.
    pub fn device(&self) -> Option<&Device> {
        self.device.as_ref()
    }

    /// Window exponent L.
    pub fn log_window_size(&self) -> u32 {
        self.log_window_size
    }

    /// Window length N = 2^L.
    ///
    /// Saturates at `usize::MAX` for an exponent `init` would reject.
    pub fn window_size(&self) -> usize {
        1usize.checked_shl(self.log_window_size).unwrap_or(usize::MAX)
    }

    /// Frequency count F.
    pub fn num_frequencies(&self) -> usize {
        self.num_frequencies
    }

    /// True while resources are allocated.
    pub fn is_initialized(&self) -> bool {
        self.resources.is_some()
    }

    /// Local work-group size of each kernel. Empty while uninitialised.
    pub fn local_sizes(&self) -> Vec<(KernelId, u32)> {
        self.resources
            .as_ref()
            .map(|r| r.local_sizes())
            .unwrap_or_default()
    }

    /// Allocate context, queue, program, kernels and buffers.
    ///
    /// Fails with [`SpectralError::AlreadyInitialised`] if resources exist. On
    /// any other failure everything created so far is released and the engine
    /// stays uninitialised, so `init` may be retried.
    pub fn init(&mut self) -> Result<()> {
        if self.resources.is_some() {
            return Err(SpectralError::AlreadyInitialised);
        }

        let config = EngineConfig {
            log_window_size: self.log_window_size,
            num_frequencies: self.num_frequencies,
            workgroup_size: self.workgroup_size,
            max_workgroups_per_dimension: self.max_workgroups_per_dimension,
        };
        config.validate()?;

        let device = match &self.device {
            Some(device) => device.clone(),
            None => {
                let device = device::select_default_device()?;
                self.device = Some(device.clone());
                device
            }
        };
        check_device_capacity(&device, &config)?;

        let layout = ResourceLayout {
            log_window_size: self.log_window_size,
            num_frequencies: self.num_frequencies,
            workgroup_size: self.workgroup_size,
            max_workgroups_per_dimension: self.max_workgroups_per_dimension,
        };
        let resources = Resources::create(&device, &layout)?;
        info!(
            "Initialised spectral engine on {}: N={}, F={}",
            device,
            self.window_size(),
            self.num_frequencies
        );
        self.resources = Some(resources);
        Ok(())
    }

    /// Free all resources. Safe to call when already released or never initialised.
    pub fn release(&mut self) {
        if let Some(mut resources) = self.resources.take() {
            resources.release();
            info!("Released spectral engine resources");
        }
    }

    /// Block until every enqueued device operation has completed.
    pub fn sync(&self) -> Result<()> {
        self.resources()?.sync()
    }

    /// Upload a window of exactly N samples.
    pub fn write_input(&mut self, samples: &[f32]) -> Result<()> {
        let resources = self.resources()?;
        let expected = self.window_size();
        if samples.len() != expected {
            return Err(SpectralError::InvalidInputSize {
                expected,
                got: samples.len(),
            });
        }
        resources.sync()?;
        resources.write(BufferRole::Input, samples)
    }

    /// Upload exactly F target frequencies.
    ///
    /// Units are the caller's; with cycles per sample, `0.5` is Nyquist.
    pub fn write_freqs(&mut self, freqs: &[f32]) -> Result<()> {
        let expected = self.num_frequencies;
        let resources = self.resources()?;
        if freqs.len() != expected {
            return Err(SpectralError::InvalidInputSize {
                expected,
                got: freqs.len(),
            });
        }
        resources.sync()?;
        resources.write(BufferRole::Freqs, freqs)
    }

    /// Download the F magnitudes produced by the last `run`.
    pub fn read_output(&self) -> Result<Vec<f32>> {
        let resources = self.resources()?;
        resources.sync()?;
        resources.read(BufferRole::Output)
    }

    /// Download the F·N real and imaginary scratch buffers.
    ///
    /// After a full `run`, frequency `f`'s correlation sum sits at index `f·N`.
    pub fn read_partials(&self) -> Result<(Vec<f32>, Vec<f32>)> {
        let resources = self.resources()?;
        resources.sync()?;
        let reals = resources.read(BufferRole::Reals)?;
        let imags = resources.read(BufferRole::Imags)?;
        Ok((reals, imags))
    }

    /// Run the three stages over the uploaded window and frequencies.
    ///
    /// A failure part-way leaves the scratch buffers in an undefined state;
    /// re-upload the input before the next `run`.
    pub fn run(&mut self) -> Result<()> {
        self.resources()?;
        self.run_correlation()?;
        for round in 1..=self.log_window_size {
            self.run_reduction_round(round)?;
        }
        self.run_average()
    }

    /// Stage A: write every per-sample correlation term into reals/imags.
    pub fn run_correlation(&mut self) -> Result<()> {
        self.resources()?;
        let count = self.cell_count();
        self.launch(KernelId::ComputeCell, LaunchParams::new(self.log_window_size, 0, count))
    }

    /// Stage B, one round: fold pairs `2^(round-1)` apart within each frequency block.
    ///
    /// `round` must be in `1..=L`; rounds must run in increasing order.
    pub fn run_reduction_round(&mut self, round: u32) -> Result<()> {
        self.resources()?;
        if round == 0 || round > self.log_window_size {
            return Err(SpectralError::Config(format!(
                "reduction round {} outside 1..={}",
                round, self.log_window_size
            )));
        }
        let count = self.cell_count() >> round;
        self.launch(
            KernelId::PartialSum,
            LaunchParams::new(self.log_window_size, round, count),
        )
    }

    /// Stage C: write `|sum| / N` for each frequency into the output buffer.
    pub fn run_average(&mut self) -> Result<()> {
        self.resources()?;
        let count = self.num_frequencies as u32;
        self.launch(KernelId::Average, LaunchParams::new(self.log_window_size, 0, count))
    }

    /// Upload `samples`, run the pipeline and return the magnitudes.
    pub fn transform(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        self.write_input(samples)?;
        self.run()?;
        self.read_output()
    }

    fn launch(&self, kernel: KernelId, params: LaunchParams) -> Result<()> {
        let resources = self.resources()?;
        resources.sync()?;
        resources.launch(kernel, params)?;
        Ok(())
    }

    fn cell_count(&self) -> u32 {
        // init validated that F·N fits in u32
        (self.num_frequencies << self.log_window_size) as u32
    }

    fn resources(&self) -> Result<&Resources> {
        self.resources.as_ref().ok_or(SpectralError::NotInitialised)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("device", &self.device)
            .field("log_window_size", &self.log_window_size)
            .field("num_frequencies", &self.num_frequencies)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

fn check_device_capacity(device: &Device, config: &EngineConfig) -> Result<()> {
    debug_assert!(config.log_window_size <= MAX_LOG_WINDOW_SIZE);
    let limits = device.limits();
    let scratch_bytes =
        ((config.num_frequencies as u64) << config.log_window_size) * std::mem::size_of::<f32>() as u64;
    let max_binding = limits.max_storage_buffer_binding_size as u64;
    if scratch_bytes > max_binding || scratch_bytes > limits.max_buffer_size {
        return Err(SpectralError::Config(format!(
            "scratch buffers of {} bytes exceed the device limit of {} bytes",
            scratch_bytes,
            max_binding.min(limits.max_buffer_size)
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uninitialised(log_window_size: u32, num_frequencies: usize) -> Engine {
        Engine {
            device: None,
            log_window_size,
            num_frequencies,
            workgroup_size: DEFAULT_WORKGROUP_SIZE,
            max_workgroups_per_dimension: None,
            resources: None,
        }
    }

    #[test]
    fn test_shape_accessors() {
        let engine = uninitialised(3, 2);
        assert_eq!(engine.window_size(), 8);
        assert_eq!(engine.num_frequencies(), 2);
        assert_eq!(engine.cell_count(), 16);
        assert!(!engine.is_initialized());
        assert!(engine.local_sizes().is_empty());
    }

    #[test]
    fn test_operations_require_init() {
        let mut engine = uninitialised(3, 1);
        assert!(matches!(engine.sync(), Err(SpectralError::NotInitialised)));
        assert!(matches!(
            engine.write_input(&[0.0; 8]),
            Err(SpectralError::NotInitialised)
        ));
        assert!(matches!(
            engine.write_freqs(&[0.0]),
            Err(SpectralError::NotInitialised)
        ));
        assert!(matches!(engine.run(), Err(SpectralError::NotInitialised)));
        assert!(matches!(engine.read_output(), Err(SpectralError::NotInitialised)));
        assert!(matches!(engine.read_partials(), Err(SpectralError::NotInitialised)));
        assert!(matches!(
            engine.transform(&[0.0; 8]),
            Err(SpectralError::NotInitialised)
        ));
        assert!(!engine.is_initialized());
    }

    #[test]
    fn test_not_initialised_wins_over_size_check() {
        let mut engine = uninitialised(3, 1);
        assert!(matches!(
            engine.write_input(&[0.0; 5]),
            Err(SpectralError::NotInitialised)
        ));
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut engine = uninitialised(3, 1);
        engine.release();
        engine.release();
        assert!(!engine.is_initialized());
    }

    #[test]
    fn test_init_rejects_zero_frequencies_before_device() {
        let mut engine = uninitialised(3, 0);
        assert!(matches!(engine.init(), Err(SpectralError::Config(_))));
        assert!(!engine.is_initialized());
    }

    #[test]
    fn test_reduction_round_requires_init_first() {
        let mut engine = uninitialised(3, 1);
        for round in [0, 3, 4, 70] {
            assert!(matches!(
                engine.run_reduction_round(round),
                Err(SpectralError::NotInitialised)
            ));
        }
    }

    #[test]
    fn test_oversized_exponent_reports_not_initialised() {
        let mut engine = uninitialised(64, 1);
        assert_eq!(engine.window_size(), usize::MAX);
        assert!(matches!(
            engine.write_input(&[0.0; 4]),
            Err(SpectralError::NotInitialised)
        ));
        assert!(matches!(
            engine.run_reduction_round(70),
            Err(SpectralError::NotInitialised)
        ));
        assert!(matches!(engine.init(), Err(SpectralError::Config(_))));
    }

    #[test]
    fn test_from_config_validates_before_device() {
        let mut config = Config::default();
        config.engine.num_frequencies = 0;
        assert!(matches!(
            Engine::from_config(&config),
            Err(SpectralError::Config(_))
        ));

        config.engine.num_frequencies = 2;
        config.engine.log_window_size = 40;
        assert!(matches!(
            Engine::from_config(&config),
            Err(SpectralError::Config(_))
        ));
    }

    #[test]
    fn test_from_config_unknown_platform() {
        let mut config = Config::default();
        config.device.platform = Some("NoSuchBackend".to_string());
        assert!(matches!(
            Engine::from_config(&config),
            Err(SpectralError::NoPlatforms)
        ));
    }

    #[test]
    fn test_from_config_shape() {
        let mut config = Config::default();
        config.engine.log_window_size = 4;
        config.engine.num_frequencies = 3;
        config.engine.workgroup_size = 7;
        let engine = match Engine::from_config(&config) {
            Ok(engine) => engine,
            Err(SpectralError::NoPlatforms) | Err(SpectralError::NoDevices { .. }) => {
                eprintln!("GPU not available, skipping test");
                return;
            }
            Err(e) => panic!("unexpected error: {}", e),
        };
        assert_eq!(engine.window_size(), 16);
        assert_eq!(engine.num_frequencies(), 3);
        assert_eq!(engine.workgroup_size, 7);
        assert!(engine.device().is_some());
        assert!(!engine.is_initialized());
    }
}

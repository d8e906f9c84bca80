//! Platform and device discovery.
//!
//! A platform is one wgpu backend that exposes at least one adapter; a device
//! is one adapter on it. The default policy is deliberately plain: first
//! platform, first GPU-class device.

use crate::config::DeviceConfig;
use crate::error::{Result, SpectralError};
use log::{debug, info};
use std::fmt;
use std::sync::Arc;

/// Backends probed as platforms, in order.
const PLATFORM_ORDER: [(wgpu::Backends, &str); 4] = [
    (wgpu::Backends::VULKAN, "Vulkan"),
    (wgpu::Backends::METAL, "Metal"),
    (wgpu::Backends::DX12, "DX12"),
    (wgpu::Backends::GL, "GL"),
];

/// Handle to one compute adapter.
///
/// Cloning shares the underlying adapter.
#[derive(Clone)]
pub struct Device {
    adapter: Arc<wgpu::Adapter>,
    info: wgpu::AdapterInfo,
    platform_name: &'static str,
}

impl Device {
    fn new(adapter: wgpu::Adapter, platform_name: &'static str) -> Self {
        let info = adapter.get_info();
        Self {
            adapter: Arc::new(adapter),
            info,
            platform_name,
        }
    }

    /// Adapter name as reported by the driver.
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Name of the platform this device was found on.
    pub fn platform_name(&self) -> &str {
        self.platform_name
    }

    /// Device class reported by the driver.
    pub fn device_type(&self) -> wgpu::DeviceType {
        self.info.device_type
    }

    /// True for discrete, integrated and virtual GPUs.
    pub fn is_gpu(&self) -> bool {
        is_gpu_class(self.info.device_type)
    }

    /// Full adapter description.
    pub fn info(&self) -> &wgpu::AdapterInfo {
        &self.info
    }

    /// Hardware limits of the adapter.
    pub fn limits(&self) -> wgpu::Limits {
        self.adapter.limits()
    }

    pub(crate) fn adapter(&self) -> &wgpu::Adapter {
        &self.adapter
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("name", &self.info.name)
            .field("platform", &self.platform_name)
            .field("device_type", &self.info.device_type)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:?}, {})",
            self.info.name, self.info.device_type, self.platform_name
        )
    }
}

/// A backend with the adapters it exposes.
#[derive(Debug, Clone)]
pub struct Platform {
    name: &'static str,
    devices: Vec<Device>,
}

impl Platform {
    /// Platform name, e.g. "Vulkan".
    pub fn name(&self) -> &str {
        self.name
    }

    /// Every adapter on the platform, GPU-class or not.
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Adapters of GPU class, in enumeration order.
    pub fn gpu_devices(&self) -> Vec<Device> {
        self.devices.iter().filter(|d| d.is_gpu()).cloned().collect()
    }
}

fn is_gpu_class(device_type: wgpu::DeviceType) -> bool {
    matches!(
        device_type,
        wgpu::DeviceType::DiscreteGpu | wgpu::DeviceType::IntegratedGpu | wgpu::DeviceType::VirtualGpu
    )
}

/// Enumerate platforms that expose at least one adapter.
pub fn enumerate_platforms() -> Vec<Platform> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    PLATFORM_ORDER
        .iter()
        .filter_map(|&(backends, name)| {
            let devices: Vec<Device> = instance
                .enumerate_adapters(backends)
                .into_iter()
                .map(|adapter| Device::new(adapter, name))
                .collect();
            debug!("Platform {}: {} adapter(s)", name, devices.len());
            if devices.is_empty() {
                None
            } else {
                Some(Platform { name, devices })
            }
        })
        .collect()
}

/// Pick the first GPU device of the first platform.
pub fn select_default_device() -> Result<Device> {
    select_device(&DeviceConfig::default())
}

/// Pick a GPU device per `config`.
///
/// With a default config this is exactly [`select_default_device`].
pub fn select_device(config: &DeviceConfig) -> Result<Device> {
    let platforms = enumerate_platforms();
    if platforms.is_empty() {
        return Err(SpectralError::NoPlatforms);
    }

    let platform = match &config.platform {
        Some(wanted) => platforms
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(wanted))
            .ok_or(SpectralError::NoPlatforms)?,
        None => &platforms[0],
    };

    let device = platform
        .gpu_devices()
        .into_iter()
        .nth(config.device_index)
        .ok_or_else(|| SpectralError::NoDevices {
            platform_name: platform.name.to_string(),
        })?;

    info!("Selected device {}", device);
    Ok(device)
}

/// Check if a GPU device can be selected.
pub fn is_available() -> bool {
    select_default_device().is_ok()
}

//! GPU compute backend for the spectral engine.
//!
//! This module holds everything that talks to the device:
//!
//! - [`device`]: platform enumeration and default device selection
//! - [`shaders`]: the embedded WGSL program with the three stage kernels
//! - [`resources`]: context, queue, kernels and buffers with all-or-nothing
//!   construction and idempotent release
//! - [`workgroup`]: global/local work-group sizing
//!
//! # Architecture
//!
//! - wgpu backend (Vulkan on Linux/Windows, Metal on macOS, DX12, GL)
//! - One in-order queue per engine; every host call drains it before returning
//! - Kernel source is compiled once per `init`, never per call
//!
//! # Usage
//!
//! ```rust,no_run
//! use binscope::accel::device;
//!
//! for platform in device::enumerate_platforms() {
//!     for dev in platform.devices() {
//!         println!("{}: {}", platform.name(), dev);
//!     }
//! }
//! ```

pub mod device;
pub mod resources;
pub mod shaders;
pub mod workgroup;

pub use device::{enumerate_platforms, is_available, select_default_device, select_device, Device, Platform};
pub use resources::{BufferAccess, KernelId};

//! Device-side resources of an initialised engine.
//!
//! [`Resources`] owns the logical device, its queue, the compiled program,
//! the three kernels and the five data buffers. Construction is
//! all-or-nothing: a failing step releases whatever was already created.
//! [`Resources::release`] frees in reverse creation order and skips handles
//! that are already gone, so it is safe to call any number of times.

use super::device::Device;
use super::shaders;
use super::workgroup::{self, DispatchGrid};
use crate::error::{BackendStage, Result, SpectralError};
use log::{debug, warn};

const F32_BYTES: u64 = std::mem::size_of::<f32>() as u64;

/// Access mode of a data buffer as seen by the kernels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferAccess {
    /// Written by the host, read by kernels.
    ReadOnly,
    /// Written by kernels, read back by the host.
    WriteOnly,
    /// Scratch space, written and read by kernels and readable by the host.
    ReadWrite,
}

impl BufferAccess {
    fn usages(self) -> wgpu::BufferUsages {
        match self {
            BufferAccess::ReadOnly => wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            BufferAccess::WriteOnly => wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            BufferAccess::ReadWrite => {
                wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::COPY_SRC
            }
        }
    }
}

/// Buffers a kernel can bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferRole {
    /// Uniform launch parameters.
    Params,
    /// Time-domain window (N).
    Input,
    /// Target frequencies (F).
    Freqs,
    /// Correlation real parts and reduction scratch (F·N).
    Reals,
    /// Correlation imaginary parts and reduction scratch (F·N).
    Imags,
    /// Magnitudes (F).
    Output,
}

impl BufferRole {
    fn binding(self) -> u32 {
        match self {
            BufferRole::Params => 0,
            BufferRole::Input => 1,
            BufferRole::Freqs => 2,
            BufferRole::Reals => 3,
            BufferRole::Imags => 4,
            BufferRole::Output => 5,
        }
    }

    fn layout_entry(self) -> wgpu::BindGroupLayoutEntry {
        let ty = match self {
            BufferRole::Params => wgpu::BufferBindingType::Uniform,
            BufferRole::Input | BufferRole::Freqs => {
                wgpu::BufferBindingType::Storage { read_only: true }
            }
            BufferRole::Reals | BufferRole::Imags | BufferRole::Output => {
                wgpu::BufferBindingType::Storage { read_only: false }
            }
        };
        wgpu::BindGroupLayoutEntry {
            binding: self.binding(),
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        }
    }
}

/// The three kernels of the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelId {
    /// Stage A.
    ComputeCell,
    /// Stage B.
    PartialSum,
    /// Stage C.
    Average,
}

impl KernelId {
    fn entry_point(self) -> &'static str {
        match self {
            KernelId::ComputeCell => shaders::COMPUTE_CELL_ENTRY,
            KernelId::PartialSum => shaders::PARTIAL_SUM_ENTRY,
            KernelId::Average => shaders::AVERAGE_ENTRY,
        }
    }

    fn bindings(self) -> &'static [BufferRole] {
        match self {
            KernelId::ComputeCell => &[
                BufferRole::Params,
                BufferRole::Input,
                BufferRole::Freqs,
                BufferRole::Reals,
                BufferRole::Imags,
            ],
            KernelId::PartialSum => &[BufferRole::Params, BufferRole::Reals, BufferRole::Imags],
            KernelId::Average => &[
                BufferRole::Params,
                BufferRole::Reals,
                BufferRole::Imags,
                BufferRole::Output,
            ],
        }
    }
}

/// Scalar kernel arguments, mirrored by `Params` in the WGSL source.
#[repr(C)]
#[derive(Debug, Copy, Clone, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LaunchParams {
    /// Window exponent L.
    pub log_window_size: u32,
    /// Reduction round (Stage B only).
    pub round: u32,
    /// Logical item count; items at or past it return early.
    pub count: u32,
    _padding: u32,
}

impl LaunchParams {
    /// Arguments for one launch over `count` items.
    pub fn new(log_window_size: u32, round: u32, count: u32) -> Self {
        Self {
            log_window_size,
            round,
            count,
            _padding: 0,
        }
    }
}

/// Shape of the resources to allocate.
#[derive(Debug, Clone, Copy)]
pub struct ResourceLayout {
    /// Window exponent L (N = 2^L).
    pub log_window_size: u32,
    /// Frequency count F.
    pub num_frequencies: usize,
    /// Requested local work-group size before device clamping.
    pub workgroup_size: u32,
    /// Optional cap on work-groups per dispatch dimension.
    pub max_workgroups_per_dimension: Option<u32>,
}

impl ResourceLayout {
    /// Window length N.
    pub fn window_size(&self) -> usize {
        1usize << self.log_window_size
    }

    /// Element count of the reals/imags scratch buffers.
    pub fn cells(&self) -> usize {
        self.num_frequencies << self.log_window_size
    }
}

/// One compiled kernel.
struct Kernel {
    id: KernelId,
    layout: wgpu::BindGroupLayout,
    pipeline: wgpu::ComputePipeline,
    local_size: u32,
}

/// Five data buffers plus the launch parameter block.
#[derive(Default)]
struct Buffers {
    input: Option<DeviceBuffer>,
    freqs: Option<DeviceBuffer>,
    reals: Option<DeviceBuffer>,
    imags: Option<DeviceBuffer>,
    output: Option<DeviceBuffer>,
    params: Option<wgpu::Buffer>,
}

struct DeviceBuffer {
    buffer: wgpu::Buffer,
    len: usize,
}

/// Context, queue, program, kernels and buffers of an initialised engine.
#[derive(Default)]
pub struct Resources {
    device: Option<wgpu::Device>,
    queue: Option<wgpu::Queue>,
    program: Option<wgpu::ShaderModule>,
    compute_cell: Option<Kernel>,
    partial_sum: Option<Kernel>,
    average: Option<Kernel>,
    buffers: Buffers,
    max_workgroups_per_dimension: u32,
}

impl Resources {
    /// Allocate everything for `layout` on `device`.
    ///
    /// Any failing step releases the partial set before returning the error.
    pub fn create(device: &Device, layout: &ResourceLayout) -> Result<Self> {
        pollster::block_on(Self::create_async(device, layout))
    }

    async fn create_async(device: &Device, layout: &ResourceLayout) -> Result<Self> {
        let mut resources = Self::default();
        if let Err(err) = resources.populate(device, layout).await {
            warn!("Resource creation failed, rolling back: {}", err);
            resources.release();
            return Err(err);
        }
        Ok(resources)
    }

    async fn populate(&mut self, device: &Device, layout: &ResourceLayout) -> Result<()> {
        let limits = device.limits();

        // Context and queue
        let (gpu, queue) = device
            .adapter()
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("binscope engine"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits.clone(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .map_err(|e| SpectralError::backend(BackendStage::RequestDevice, e))?;
        self.device = Some(gpu);
        self.queue = Some(queue);

        // Launch shape; Stage A is the largest launch
        let local_size = preferred_local_size(layout.workgroup_size, &limits);
        let max_groups = match layout.max_workgroups_per_dimension {
            Some(cap) => cap.min(limits.max_compute_workgroups_per_dimension),
            None => limits.max_compute_workgroups_per_dimension,
        };
        workgroup::dispatch_grid(layout.cells() as u32, local_size, max_groups)?;
        self.max_workgroups_per_dimension = max_groups;

        // Program
        self.program = Some(self.compile_program(local_size).await?);

        // Kernels
        self.compute_cell = Some(self.create_kernel(KernelId::ComputeCell, local_size).await?);
        self.partial_sum = Some(self.create_kernel(KernelId::PartialSum, local_size).await?);
        self.average = Some(self.create_kernel(KernelId::Average, local_size).await?);

        // Buffers
        let window = layout.window_size();
        let cells = layout.cells();
        let freqs = layout.num_frequencies;
        self.buffers.input = Some(self.create_buffer("Input", window, BufferAccess::ReadOnly).await?);
        self.buffers.freqs = Some(self.create_buffer("Freqs", freqs, BufferAccess::ReadOnly).await?);
        self.buffers.reals = Some(self.create_buffer("Reals", cells, BufferAccess::ReadWrite).await?);
        self.buffers.imags = Some(self.create_buffer("Imags", cells, BufferAccess::ReadWrite).await?);
        self.buffers.output = Some(self.create_buffer("Output", freqs, BufferAccess::WriteOnly).await?);
        self.buffers.params = Some(self.create_params_buffer().await?);

        debug!(
            "Allocated {} + {} + 2x{} + {} floats, local size {}",
            window, freqs, cells, freqs, local_size
        );
        Ok(())
    }

    async fn compile_program(&self, local_size: u32) -> Result<wgpu::ShaderModule> {
        let gpu = self.gpu()?;
        gpu.push_error_scope(wgpu::ErrorFilter::Validation);
        let program = gpu.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Spectral Program"),
            source: wgpu::ShaderSource::Wgsl(shaders::spectral_source(local_size).into()),
        });
        if let Some(err) = gpu.pop_error_scope().await {
            return Err(SpectralError::backend(BackendStage::CompileProgram, err));
        }
        Ok(program)
    }

    async fn create_kernel(&self, id: KernelId, local_size: u32) -> Result<Kernel> {
        let gpu = self.gpu()?;
        let program = self.program.as_ref().ok_or(SpectralError::NotInitialised)?;

        gpu.push_error_scope(wgpu::ErrorFilter::Validation);

        let entries: Vec<wgpu::BindGroupLayoutEntry> =
            id.bindings().iter().map(|role| role.layout_entry()).collect();
        let layout = gpu.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(id.entry_point()),
            entries: &entries,
        });

        let pipeline_layout = gpu.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(id.entry_point()),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let pipeline = gpu.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(id.entry_point()),
            layout: Some(&pipeline_layout),
            module: program,
            entry_point: Some(id.entry_point()),
            compilation_options: Default::default(),
            cache: None,
        });

        if let Some(err) = gpu.pop_error_scope().await {
            return Err(SpectralError::backend(
                BackendStage::CreateKernel,
                format!("{}: {}", id.entry_point(), err),
            ));
        }

        Ok(Kernel {
            id,
            layout,
            pipeline,
            local_size,
        })
    }

    async fn create_buffer(&self, label: &str, len: usize, access: BufferAccess) -> Result<DeviceBuffer> {
        let gpu = self.gpu()?;
        gpu.push_error_scope(wgpu::ErrorFilter::Validation);
        gpu.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let buffer = gpu.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: len as u64 * F32_BYTES,
            usage: access.usages(),
            mapped_at_creation: false,
        });
        let oom = gpu.pop_error_scope().await;
        let invalid = gpu.pop_error_scope().await;
        if let Some(err) = oom.or(invalid) {
            return Err(SpectralError::backend(
                BackendStage::CreateBuffer,
                format!("{}: {}", label, err),
            ));
        }
        Ok(DeviceBuffer { buffer, len })
    }

    async fn create_params_buffer(&self) -> Result<wgpu::Buffer> {
        let gpu = self.gpu()?;
        gpu.push_error_scope(wgpu::ErrorFilter::Validation);
        let params = gpu.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Launch Params"),
            size: std::mem::size_of::<LaunchParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        if let Some(err) = gpu.pop_error_scope().await {
            return Err(SpectralError::backend(BackendStage::CreateBuffer, err));
        }
        Ok(params)
    }

    /// Free buffers, kernels, program, queue and context, in that order.
    ///
    /// Handles that are already absent are skipped.
    pub fn release(&mut self) {
        let buffers = &mut self.buffers;
        for slot in [
            &mut buffers.output,
            &mut buffers.imags,
            &mut buffers.reals,
            &mut buffers.freqs,
            &mut buffers.input,
        ] {
            if let Some(buffer) = slot.take() {
                buffer.buffer.destroy();
            }
        }
        if let Some(params) = buffers.params.take() {
            params.destroy();
        }

        self.average = None;
        self.partial_sum = None;
        self.compute_cell = None;
        self.program = None;
        self.queue = None;
        if let Some(gpu) = self.device.take() {
            gpu.destroy();
        }
    }

    /// Local work-group size of each kernel, Stage A to C.
    pub fn local_sizes(&self) -> Vec<(KernelId, u32)> {
        [&self.compute_cell, &self.partial_sum, &self.average]
            .into_iter()
            .flatten()
            .map(|k| (k.id, k.local_size))
            .collect()
    }

    /// Block until every submitted command has completed.
    pub fn sync(&self) -> Result<()> {
        self.gpu()?.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    /// Blocking upload of `data` into the buffer for `role`.
    pub fn write(&self, role: BufferRole, data: &[f32]) -> Result<()> {
        let gpu = self.gpu()?;
        let queue = self.queue()?;
        let target = self.buffer(role)?;
        if data.len() != target.len {
            return Err(SpectralError::InvalidInputSize {
                expected: target.len,
                got: data.len(),
            });
        }

        gpu.push_error_scope(wgpu::ErrorFilter::Validation);
        queue.write_buffer(&target.buffer, 0, bytemuck::cast_slice(data));
        queue.submit(std::iter::empty::<wgpu::CommandBuffer>());
        gpu.poll(wgpu::Maintain::Wait);
        if let Some(err) = pollster::block_on(gpu.pop_error_scope()) {
            return Err(SpectralError::backend(BackendStage::WriteBuffer, err));
        }
        Ok(())
    }

    /// Blocking download of the whole buffer for `role`.
    pub fn read(&self, role: BufferRole) -> Result<Vec<f32>> {
        pollster::block_on(self.read_async(role))
    }

    async fn read_async(&self, role: BufferRole) -> Result<Vec<f32>> {
        let gpu = self.gpu()?;
        let queue = self.queue()?;
        let source = self.buffer(role)?;
        let size = source.len as u64 * F32_BYTES;

        gpu.push_error_scope(wgpu::ErrorFilter::Validation);

        let staging_buffer = gpu.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Staging Buffer"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = gpu.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
        encoder.copy_buffer_to_buffer(&source.buffer, 0, &staging_buffer, 0, size);
        queue.submit(Some(encoder.finish()));

        if let Some(err) = gpu.pop_error_scope().await {
            return Err(SpectralError::backend(BackendStage::ReadBuffer, err));
        }

        let buffer_slice = staging_buffer.slice(..);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            sender.send(result).ok();
        });

        gpu.poll(wgpu::Maintain::Wait);

        receiver
            .receive()
            .await
            .ok_or_else(|| SpectralError::backend(BackendStage::ReadBuffer, "channel receive failed"))?
            .map_err(|e| SpectralError::backend(BackendStage::ReadBuffer, e))?;

        let result = {
            let data = buffer_slice.get_mapped_range();
            bytemuck::cast_slice::<u8, f32>(&data).to_vec()
        };

        staging_buffer.unmap();

        Ok(result)
    }

    /// Enqueue one launch of `id` over `params.count` items.
    ///
    /// Returns once the launch is submitted; callers drain with [`sync`](Self::sync).
    pub fn launch(&self, id: KernelId, params: LaunchParams) -> Result<DispatchGrid> {
        let gpu = self.gpu()?;
        let queue = self.queue()?;
        let kernel = self.kernel(id)?;
        let params_buffer = self.buffers.params.as_ref().ok_or(SpectralError::NotInitialised)?;

        let grid = workgroup::dispatch_grid(
            params.count,
            kernel.local_size,
            self.max_workgroups_per_dimension,
        )?;

        let mut entries = Vec::with_capacity(id.bindings().len());
        for &role in id.bindings() {
            let resource = match role {
                BufferRole::Params => params_buffer.as_entire_binding(),
                _ => self.buffer(role)?.buffer.as_entire_binding(),
            };
            entries.push(wgpu::BindGroupEntry {
                binding: role.binding(),
                resource,
            });
        }

        gpu.push_error_scope(wgpu::ErrorFilter::Validation);

        queue.write_buffer(params_buffer, 0, bytemuck::bytes_of(&params));

        let bind_group = gpu.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(id.entry_point()),
            layout: &kernel.layout,
            entries: &entries,
        });

        let mut encoder = gpu.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(id.entry_point()),
        });

        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(id.entry_point()),
                timestamp_writes: None,
            });

            compute_pass.set_pipeline(&kernel.pipeline);
            compute_pass.set_bind_group(0, &bind_group, &[]);
            compute_pass.dispatch_workgroups(grid.x, grid.y, 1);
        }

        queue.submit(Some(encoder.finish()));

        if let Some(err) = pollster::block_on(gpu.pop_error_scope()) {
            return Err(SpectralError::backend(
                BackendStage::Dispatch,
                format!("{}: {}", id.entry_point(), err),
            ));
        }

        debug!(
            "Launched {} over {} items ({} invocations, {}x{} groups of {})",
            id.entry_point(),
            params.count,
            grid.invocations(kernel.local_size),
            grid.x,
            grid.y,
            kernel.local_size
        );
        Ok(grid)
    }

    fn gpu(&self) -> Result<&wgpu::Device> {
        self.device.as_ref().ok_or(SpectralError::NotInitialised)
    }

    fn queue(&self) -> Result<&wgpu::Queue> {
        self.queue.as_ref().ok_or(SpectralError::NotInitialised)
    }

    fn kernel(&self, id: KernelId) -> Result<&Kernel> {
        let slot = match id {
            KernelId::ComputeCell => &self.compute_cell,
            KernelId::PartialSum => &self.partial_sum,
            KernelId::Average => &self.average,
        };
        slot.as_ref().ok_or(SpectralError::NotInitialised)
    }

    fn buffer(&self, role: BufferRole) -> Result<&DeviceBuffer> {
        let slot = match role {
            BufferRole::Input => &self.buffers.input,
            BufferRole::Freqs => &self.buffers.freqs,
            BufferRole::Reals => &self.buffers.reals,
            BufferRole::Imags => &self.buffers.imags,
            BufferRole::Output => &self.buffers.output,
            BufferRole::Params => {
                return Err(SpectralError::Config(
                    "the parameter block is not a data buffer".to_string(),
                ))
            }
        };
        slot.as_ref().ok_or(SpectralError::NotInitialised)
    }
}

impl Drop for Resources {
    fn drop(&mut self) {
        self.release();
    }
}

/// Local size for every kernel: the request clamped to the device limits.
pub fn preferred_local_size(requested: u32, limits: &wgpu::Limits) -> u32 {
    requested
        .min(limits.max_compute_workgroup_size_x)
        .min(limits.max_compute_invocations_per_workgroup)
        .max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_layout_matches_wgsl() {
        assert_eq!(std::mem::size_of::<LaunchParams>(), 16);
        let params = LaunchParams::new(3, 2, 12);
        let words: &[u32] = bytemuck::cast_slice(bytemuck::bytes_of(&params));
        assert_eq!(words, &[3, 2, 12, 0]);
    }

    #[test]
    fn test_access_usages() {
        assert!(BufferAccess::ReadOnly.usages().contains(wgpu::BufferUsages::COPY_DST));
        assert!(!BufferAccess::ReadOnly.usages().contains(wgpu::BufferUsages::COPY_SRC));
        assert!(BufferAccess::WriteOnly.usages().contains(wgpu::BufferUsages::COPY_SRC));
        assert!(BufferAccess::ReadWrite
            .usages()
            .contains(wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST));
    }

    #[test]
    fn test_kernel_bindings_are_distinct() {
        for id in [KernelId::ComputeCell, KernelId::PartialSum, KernelId::Average] {
            let mut bindings: Vec<u32> = id.bindings().iter().map(|r| r.binding()).collect();
            bindings.dedup();
            assert_eq!(bindings.len(), id.bindings().len());
            assert_eq!(id.bindings()[0], BufferRole::Params);
        }
    }

    #[test]
    fn test_preferred_local_size_clamps() {
        let limits = wgpu::Limits::downlevel_defaults();
        assert_eq!(preferred_local_size(64, &limits), 64);
        assert_eq!(
            preferred_local_size(4096, &limits),
            limits
                .max_compute_workgroup_size_x
                .min(limits.max_compute_invocations_per_workgroup)
        );
        assert_eq!(preferred_local_size(0, &limits), 1);
    }

    #[test]
    fn test_release_on_empty_is_noop() {
        let mut resources = Resources::default();
        resources.release();
        resources.release();
        assert!(resources.local_sizes().is_empty());
        assert!(matches!(resources.sync(), Err(SpectralError::NotInitialised)));
    }

    #[test]
    fn test_layout_sizes() {
        let layout = ResourceLayout {
            log_window_size: 3,
            num_frequencies: 5,
            workgroup_size: 64,
            max_workgroups_per_dimension: None,
        };
        assert_eq!(layout.window_size(), 8);
        assert_eq!(layout.cells(), 40);
    }
}

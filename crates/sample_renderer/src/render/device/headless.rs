//! In-memory device
//!
//! Runs the full device protocol without a GPU: objects live in a
//! [`ResourceArena`], buffers and textures keep their bytes host-side, command
//! buffers keep the commands recorded into them, and acquire/present results
//! can be scripted. Submitting a command buffer that references a destroyed
//! object fails, the way a validation layer would flag it.

use ash::vk;
use std::collections::VecDeque;

use super::{
    copy_rows, AcquireOutcome, ClearValues, DescriptorBinding, DescriptorWrite, GpuDevice, GpuHandle,
    MemoryLocation, PipelineDesc, PresentOutcome, SwapchainInfo,
};
use crate::render::resource::ResourceArena;
use crate::render::{RenderError, RenderResult};

/// Command captured while recording a headless command buffer
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    /// Render pass begun on a framebuffer
    BeginRenderPass {
        /// Target framebuffer
        framebuffer: GpuHandle,
        /// Clear values used
        clear: ClearValues,
    },
    /// Pipeline bound
    BindPipeline(GpuHandle),
    /// Vertex buffers bound
    BindVertexBuffers {
        /// First binding slot
        first_binding: u32,
        /// Bound buffers
        buffers: Vec<GpuHandle>,
    },
    /// Index buffer bound
    BindIndexBuffer(GpuHandle),
    /// Descriptor set bound
    BindDescriptorSet(GpuHandle),
    /// Non-indexed draw
    Draw {
        /// Vertices per instance
        vertex_count: u32,
        /// Instances
        instance_count: u32,
    },
    /// Indexed draw
    DrawIndexed {
        /// Indices per instance
        index_count: u32,
        /// Instances
        instance_count: u32,
    },
    /// Render pass ended
    EndRenderPass,
}

impl RecordedCommand {
    fn referenced_handles(&self) -> Vec<GpuHandle> {
        match self {
            Self::BeginRenderPass { framebuffer, .. } => vec![*framebuffer],
            Self::BindPipeline(handle) | Self::BindIndexBuffer(handle) | Self::BindDescriptorSet(handle) => {
                vec![*handle]
            }
            Self::BindVertexBuffers { buffers, .. } => buffers.clone(),
            Self::Draw { .. } | Self::DrawIndexed { .. } | Self::EndRenderPass => Vec::new(),
        }
    }
}

/// Counters of what the headless device has been asked to do
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    /// Swap chains created
    pub swapchains_created: usize,
    /// Command buffers recorded (each `begin_commands` counts once)
    pub command_buffers_recorded: usize,
    /// Successful queue submissions
    pub submissions: usize,
    /// Present calls that reached the surface
    pub presents: usize,
    /// `wait_idle` calls
    pub idle_waits: usize,
    /// Buffers created
    pub buffers_created: usize,
    /// Buffer-to-buffer copies
    pub buffer_copies: usize,
    /// Textures created
    pub textures_created: usize,
    /// Pipelines created
    pub pipelines_created: usize,
}

#[derive(Debug)]
enum HeadlessResource {
    Swapchain { image_count: u32 },
    ImageView,
    RenderPass,
    DepthTarget,
    Framebuffer,
    CommandBuffer { commands: Vec<RecordedCommand>, recording: bool },
    Semaphore,
    Buffer { data: Vec<u8>, location: MemoryLocation },
    Texture { width: u32, height: u32, row_pitch: usize, data: Vec<u8> },
    ShaderModule,
    DescriptorSetLayout { bindings: Vec<DescriptorBinding> },
    DescriptorSet { bindings: Vec<DescriptorBinding>, writes: Vec<DescriptorWrite> },
    Pipeline,
}

/// GPU-less implementation of [`GpuDevice`]
pub struct HeadlessDevice {
    resources: ResourceArena<HeadlessResource>,
    surface_extent: Option<vk::Extent2D>,
    min_image_count: u32,
    max_image_count: u32,
    row_alignment: usize,
    next_image: u32,
    scripted_acquires: VecDeque<AcquireOutcome>,
    scripted_presents: VecDeque<PresentOutcome>,
    scripted_submit_failure: Option<vk::Result>,
    allocation_failure_pending: bool,
    stats: HeadlessStats,
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessDevice {
    /// Device whose surface takes the extent requested by the caller
    pub fn new() -> Self {
        Self {
            resources: ResourceArena::new(),
            surface_extent: None,
            min_image_count: 2,
            max_image_count: 3,
            row_alignment: 256,
            next_image: 0,
            scripted_acquires: VecDeque::new(),
            scripted_presents: VecDeque::new(),
            scripted_submit_failure: None,
            allocation_failure_pending: false,
            stats: HeadlessStats::default(),
        }
    }

    /// Device whose surface reports a fixed extent
    pub fn with_surface_extent(width: u32, height: u32) -> Self {
        let mut device = Self::new();
        device.set_surface_extent(width, height);
        device
    }

    /// Change the extent the surface reports, as a window resize would
    pub fn set_surface_extent(&mut self, width: u32, height: u32) {
        self.surface_extent = Some(vk::Extent2D { width, height });
    }

    /// Set the image count limits the surface reports
    pub fn set_image_count_limits(&mut self, min: u32, max: u32) {
        self.min_image_count = min;
        self.max_image_count = max;
    }

    /// Queue the result of a future `acquire_next_image` call
    pub fn script_acquire(&mut self, outcome: AcquireOutcome) {
        self.scripted_acquires.push_back(outcome);
    }

    /// Queue the result of a future `present` call
    pub fn script_present(&mut self, outcome: PresentOutcome) {
        self.scripted_presents.push_back(outcome);
    }

    /// Make the next submission fail with `result`
    pub fn fail_next_submit(&mut self, result: vk::Result) {
        self.scripted_submit_failure = Some(result);
    }

    /// Make the next buffer creation fail as out of memory
    pub fn fail_next_allocation(&mut self) {
        self.allocation_failure_pending = true;
    }

    /// Activity counters
    pub const fn stats(&self) -> HeadlessStats {
        self.stats
    }

    /// Number of live objects
    pub fn live_resources(&self) -> usize {
        self.resources.len()
    }

    /// Bytes currently stored in a buffer
    pub fn buffer_contents(&self, buffer: GpuHandle) -> Option<&[u8]> {
        match self.resources.get(buffer)? {
            HeadlessResource::Buffer { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Pixels of a texture with row padding removed
    pub fn texture_pixels(&self, texture: GpuHandle) -> Option<Vec<u8>> {
        match self.resources.get(texture)? {
            HeadlessResource::Texture {
                width,
                height,
                row_pitch,
                data,
            } => {
                let row_bytes = *width as usize * 4;
                Some(
                    data.chunks(*row_pitch)
                        .take(*height as usize)
                        .flat_map(|row| row[..row_bytes].iter().copied())
                        .collect(),
                )
            }
            _ => None,
        }
    }

    /// Commands recorded into a command buffer
    pub fn recorded_commands(&self, command_buffer: GpuHandle) -> Option<&[RecordedCommand]> {
        match self.resources.get(command_buffer)? {
            HeadlessResource::CommandBuffer { commands, .. } => Some(commands),
            _ => None,
        }
    }

    /// Resources a descriptor set currently points at
    pub fn descriptor_writes(&self, set: GpuHandle) -> Option<&[DescriptorWrite]> {
        match self.resources.get(set)? {
            HeadlessResource::DescriptorSet { writes, .. } => Some(writes),
            _ => None,
        }
    }

    fn require(&self, handle: GpuHandle) -> RenderResult<&HeadlessResource> {
        self.resources
            .get(handle)
            .ok_or(RenderError::ResourceNotFound { handle })
    }

    fn record(&mut self, command_buffer: GpuHandle, command: RecordedCommand) -> RenderResult<()> {
        for handle in command.referenced_handles() {
            self.require(handle)?;
        }
        match self.resources.get_mut(command_buffer) {
            Some(HeadlessResource::CommandBuffer {
                commands,
                recording: true,
            }) => {
                commands.push(command);
                Ok(())
            }
            Some(_) => Err(RenderError::InvalidOperation {
                reason: "command recorded outside begin_commands/end_commands".to_string(),
            }),
            None => Err(RenderError::ResourceNotFound { handle: command_buffer }),
        }
    }

    fn buffer_mut(&mut self, buffer: GpuHandle) -> RenderResult<(&mut Vec<u8>, MemoryLocation)> {
        match self.resources.get_mut(buffer) {
            Some(HeadlessResource::Buffer { data, location }) => Ok((data, *location)),
            Some(_) => Err(RenderError::InvalidOperation {
                reason: "handle is not a buffer".to_string(),
            }),
            None => Err(RenderError::ResourceNotFound { handle: buffer }),
        }
    }

    fn aligned_row_pitch(&self, width: u32) -> usize {
        let row_bytes = width as usize * 4;
        row_bytes.div_ceil(self.row_alignment) * self.row_alignment
    }
}

impl GpuDevice for HeadlessDevice {
    fn backend_name(&self) -> &'static str {
        "Headless"
    }

    fn adapter_name(&self) -> &str {
        "headless adapter"
    }

    fn wait_idle(&mut self) -> RenderResult<()> {
        self.stats.idle_waits += 1;
        Ok(())
    }

    fn create_swapchain(&mut self, requested: vk::Extent2D, old: Option<GpuHandle>) -> RenderResult<SwapchainInfo> {
        if let Some(old) = old {
            self.require(old)?;
        }

        let extent = self.surface_extent.unwrap_or(vk::Extent2D {
            width: requested.width.clamp(1, 4096),
            height: requested.height.clamp(1, 4096),
        });
        if extent.width == 0 || extent.height == 0 {
            return Err(RenderError::InvalidOperation {
                reason: "cannot create a swap chain for a zero-sized surface".to_string(),
            });
        }

        let image_count = (self.min_image_count + 1).min(self.max_image_count);
        let swapchain = self.resources.insert(HeadlessResource::Swapchain { image_count }, &[]);
        let image_views = (0..image_count)
            .map(|_| self.resources.insert(HeadlessResource::ImageView, &[swapchain]))
            .collect();

        self.next_image = 0;
        self.stats.swapchains_created += 1;
        Ok(SwapchainInfo {
            swapchain,
            image_views,
            format: vk::Format::B8G8R8A8_SRGB,
            extent,
        })
    }

    fn depth_format(&self) -> RenderResult<vk::Format> {
        Ok(vk::Format::D32_SFLOAT)
    }

    fn create_render_pass(&mut self, _color: vk::Format, _depth: vk::Format) -> RenderResult<GpuHandle> {
        Ok(self.resources.insert(HeadlessResource::RenderPass, &[]))
    }

    fn create_depth_target(&mut self, _format: vk::Format, _extent: vk::Extent2D) -> RenderResult<GpuHandle> {
        Ok(self.resources.insert(HeadlessResource::DepthTarget, &[]))
    }

    fn create_framebuffer(
        &mut self,
        render_pass: GpuHandle,
        attachments: &[GpuHandle],
        _extent: vk::Extent2D,
    ) -> RenderResult<GpuHandle> {
        self.require(render_pass)?;
        for attachment in attachments {
            self.require(*attachment)?;
        }
        let mut parents = vec![render_pass];
        parents.extend_from_slice(attachments);
        Ok(self.resources.insert(HeadlessResource::Framebuffer, &parents))
    }

    fn allocate_command_buffers(&mut self, count: u32) -> RenderResult<Vec<GpuHandle>> {
        Ok((0..count)
            .map(|_| {
                self.resources.insert(
                    HeadlessResource::CommandBuffer {
                        commands: Vec::new(),
                        recording: false,
                    },
                    &[],
                )
            })
            .collect())
    }

    fn create_semaphore(&mut self) -> RenderResult<GpuHandle> {
        Ok(self.resources.insert(HeadlessResource::Semaphore, &[]))
    }

    fn create_buffer(
        &mut self,
        size: u64,
        _usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> RenderResult<GpuHandle> {
        if size == 0 {
            return Err(RenderError::InvalidOperation {
                reason: "buffers must not be empty".to_string(),
            });
        }
        if std::mem::take(&mut self.allocation_failure_pending) {
            return Err(RenderError::OutOfMemory { requested: size });
        }
        let len = usize::try_from(size).map_err(|_| RenderError::OutOfMemory { requested: size })?;
        self.stats.buffers_created += 1;
        Ok(self.resources.insert(
            HeadlessResource::Buffer {
                data: vec![0; len],
                location,
            },
            &[],
        ))
    }

    fn write_buffer(&mut self, buffer: GpuHandle, bytes: &[u8]) -> RenderResult<()> {
        let (data, location) = self.buffer_mut(buffer)?;
        if location != MemoryLocation::HostVisible {
            return Err(RenderError::InvalidOperation {
                reason: "device-local buffers cannot be mapped".to_string(),
            });
        }
        if bytes.len() > data.len() {
            return Err(RenderError::InvalidOperation {
                reason: format!("write of {} bytes into a {} byte buffer", bytes.len(), data.len()),
            });
        }
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn copy_buffer(&mut self, src: GpuHandle, dst: GpuHandle, size: u64) -> RenderResult<()> {
        let len = usize::try_from(size).map_err(|_| RenderError::OutOfMemory { requested: size })?;
        let bytes = {
            let (data, _) = self.buffer_mut(src)?;
            data.get(..len)
                .ok_or_else(|| RenderError::InvalidOperation {
                    reason: "copy reads past the end of the source buffer".to_string(),
                })?
                .to_vec()
        };
        let (data, _) = self.buffer_mut(dst)?;
        data.get_mut(..len)
            .ok_or_else(|| RenderError::InvalidOperation {
                reason: "copy writes past the end of the destination buffer".to_string(),
            })?
            .copy_from_slice(&bytes);
        self.stats.buffer_copies += 1;
        Ok(())
    }

    fn create_texture(&mut self, width: u32, height: u32, pixels: &[u8]) -> RenderResult<GpuHandle> {
        let row_pitch = self.aligned_row_pitch(width);
        let mut data = vec![0; row_pitch * height as usize];
        copy_rows(pixels, width, height, row_pitch, &mut data)?;
        self.stats.textures_created += 1;
        Ok(self.resources.insert(
            HeadlessResource::Texture {
                width,
                height,
                row_pitch,
                data,
            },
            &[],
        ))
    }

    fn update_texture(&mut self, texture: GpuHandle, pixels: &[u8]) -> RenderResult<()> {
        match self.resources.get_mut(texture) {
            Some(HeadlessResource::Texture {
                width,
                height,
                row_pitch,
                data,
            }) => copy_rows(pixels, *width, *height, *row_pitch, data),
            Some(_) => Err(RenderError::InvalidOperation {
                reason: "handle is not a texture".to_string(),
            }),
            None => Err(RenderError::ResourceNotFound { handle: texture }),
        }
    }

    fn create_shader_module(&mut self, code: &[u32]) -> RenderResult<GpuHandle> {
        if code.is_empty() {
            return Err(RenderError::InvalidOperation {
                reason: "empty shader module".to_string(),
            });
        }
        Ok(self.resources.insert(HeadlessResource::ShaderModule, &[]))
    }

    fn create_descriptor_set_layout(&mut self, bindings: &[DescriptorBinding]) -> RenderResult<GpuHandle> {
        Ok(self.resources.insert(
            HeadlessResource::DescriptorSetLayout {
                bindings: bindings.to_vec(),
            },
            &[],
        ))
    }

    fn create_descriptor_set(&mut self, layout: GpuHandle, bindings: &[DescriptorBinding]) -> RenderResult<GpuHandle> {
        match self.require(layout)? {
            HeadlessResource::DescriptorSetLayout { bindings: expected } if expected.as_slice() == bindings => {}
            _ => {
                return Err(RenderError::InvalidOperation {
                    reason: "descriptor set bindings do not match the layout".to_string(),
                })
            }
        }
        Ok(self.resources.insert(
            HeadlessResource::DescriptorSet {
                bindings: bindings.to_vec(),
                writes: Vec::new(),
            },
            &[layout],
        ))
    }

    fn write_descriptor_set(&mut self, set: GpuHandle, new_writes: &[DescriptorWrite]) -> RenderResult<()> {
        for write in new_writes {
            let target = match write {
                DescriptorWrite::UniformBuffer { buffer, .. } => *buffer,
                DescriptorWrite::CombinedImageSampler { texture, .. } => *texture,
            };
            self.require(target)?;
        }
        match self.resources.get_mut(set) {
            Some(HeadlessResource::DescriptorSet { bindings, writes }) => {
                for write in new_writes {
                    let slot = match write {
                        DescriptorWrite::UniformBuffer { binding, .. }
                        | DescriptorWrite::CombinedImageSampler { binding, .. } => *binding,
                    };
                    if !bindings.iter().any(|b| b.binding == slot) {
                        return Err(RenderError::InvalidOperation {
                            reason: format!("descriptor set has no binding {slot}"),
                        });
                    }
                    writes.retain(|existing| match existing {
                        DescriptorWrite::UniformBuffer { binding, .. }
                        | DescriptorWrite::CombinedImageSampler { binding, .. } => *binding != slot,
                    });
                    writes.push(*write);
                }
                Ok(())
            }
            Some(_) => Err(RenderError::InvalidOperation {
                reason: "handle is not a descriptor set".to_string(),
            }),
            None => Err(RenderError::ResourceNotFound { handle: set }),
        }
    }

    fn create_graphics_pipeline(&mut self, desc: &PipelineDesc<'_>) -> RenderResult<GpuHandle> {
        for handle in [
            desc.render_pass,
            desc.vertex_shader,
            desc.fragment_shader,
            desc.descriptor_set_layout,
        ] {
            self.require(handle)?;
        }
        self.stats.pipelines_created += 1;
        Ok(self
            .resources
            .insert(HeadlessResource::Pipeline, &[desc.render_pass, desc.descriptor_set_layout]))
    }

    fn destroy(&mut self, handle: GpuHandle) {
        self.resources.remove(handle);
    }

    fn is_alive(&self, handle: GpuHandle) -> bool {
        self.resources.contains(handle)
    }

    fn begin_commands(&mut self, command_buffer: GpuHandle) -> RenderResult<()> {
        match self.resources.get_mut(command_buffer) {
            Some(HeadlessResource::CommandBuffer { commands, recording }) => {
                commands.clear();
                *recording = true;
                self.stats.command_buffers_recorded += 1;
                Ok(())
            }
            Some(_) => Err(RenderError::InvalidOperation {
                reason: "handle is not a command buffer".to_string(),
            }),
            None => Err(RenderError::ResourceNotFound { handle: command_buffer }),
        }
    }

    fn cmd_begin_render_pass(
        &mut self,
        command_buffer: GpuHandle,
        render_pass: GpuHandle,
        framebuffer: GpuHandle,
        _extent: vk::Extent2D,
        clear: ClearValues,
    ) -> RenderResult<()> {
        self.require(render_pass)?;
        self.record(command_buffer, RecordedCommand::BeginRenderPass { framebuffer, clear })
    }

    fn cmd_bind_pipeline(&mut self, command_buffer: GpuHandle, pipeline: GpuHandle) -> RenderResult<()> {
        self.record(command_buffer, RecordedCommand::BindPipeline(pipeline))
    }

    fn cmd_bind_vertex_buffers(
        &mut self,
        command_buffer: GpuHandle,
        first_binding: u32,
        buffers: &[GpuHandle],
    ) -> RenderResult<()> {
        self.record(
            command_buffer,
            RecordedCommand::BindVertexBuffers {
                first_binding,
                buffers: buffers.to_vec(),
            },
        )
    }

    fn cmd_bind_index_buffer(&mut self, command_buffer: GpuHandle, buffer: GpuHandle) -> RenderResult<()> {
        self.record(command_buffer, RecordedCommand::BindIndexBuffer(buffer))
    }

    fn cmd_bind_descriptor_set(
        &mut self,
        command_buffer: GpuHandle,
        pipeline: GpuHandle,
        set: GpuHandle,
    ) -> RenderResult<()> {
        self.require(pipeline)?;
        self.record(command_buffer, RecordedCommand::BindDescriptorSet(set))
    }

    fn cmd_draw(&mut self, command_buffer: GpuHandle, vertex_count: u32, instance_count: u32) -> RenderResult<()> {
        self.record(
            command_buffer,
            RecordedCommand::Draw {
                vertex_count,
                instance_count,
            },
        )
    }

    fn cmd_draw_indexed(
        &mut self,
        command_buffer: GpuHandle,
        index_count: u32,
        instance_count: u32,
    ) -> RenderResult<()> {
        self.record(
            command_buffer,
            RecordedCommand::DrawIndexed {
                index_count,
                instance_count,
            },
        )
    }

    fn cmd_end_render_pass(&mut self, command_buffer: GpuHandle) -> RenderResult<()> {
        self.record(command_buffer, RecordedCommand::EndRenderPass)
    }

    fn end_commands(&mut self, command_buffer: GpuHandle) -> RenderResult<()> {
        match self.resources.get_mut(command_buffer) {
            Some(HeadlessResource::CommandBuffer { recording, .. }) if *recording => {
                *recording = false;
                Ok(())
            }
            Some(_) => Err(RenderError::InvalidOperation {
                reason: "end_commands without begin_commands".to_string(),
            }),
            None => Err(RenderError::ResourceNotFound { handle: command_buffer }),
        }
    }

    fn acquire_next_image(&mut self, swapchain: GpuHandle, signal: GpuHandle) -> RenderResult<AcquireOutcome> {
        self.require(signal)?;
        let image_count = match self.require(swapchain)? {
            HeadlessResource::Swapchain { image_count } => *image_count,
            _ => {
                return Err(RenderError::InvalidOperation {
                    reason: "handle is not a swap chain".to_string(),
                })
            }
        };

        if let Some(outcome) = self.scripted_acquires.pop_front() {
            return Ok(outcome);
        }
        let image_index = self.next_image;
        self.next_image = (self.next_image + 1) % image_count;
        Ok(AcquireOutcome::Ready {
            image_index,
            suboptimal: false,
        })
    }

    fn submit(&mut self, command_buffer: GpuHandle, wait: GpuHandle, signal: GpuHandle) -> RenderResult<()> {
        self.require(wait)?;
        self.require(signal)?;
        if let Some(result) = self.scripted_submit_failure.take() {
            return Err(result.into());
        }

        let commands = match self.require(command_buffer)? {
            HeadlessResource::CommandBuffer {
                recording: false,
                commands,
            } => commands,
            _ => {
                return Err(RenderError::InvalidOperation {
                    reason: "submitted command buffer is not in the executable state".to_string(),
                })
            }
        };
        if let Some(stale) = commands
            .iter()
            .flat_map(RecordedCommand::referenced_handles)
            .find(|handle| !self.resources.contains(*handle))
        {
            return Err(RenderError::InvalidOperation {
                reason: format!("command buffer references destroyed resource {stale:?}"),
            });
        }

        self.stats.submissions += 1;
        Ok(())
    }

    fn present(&mut self, swapchain: GpuHandle, image_index: u32, wait: GpuHandle) -> RenderResult<PresentOutcome> {
        self.require(wait)?;
        match self.require(swapchain)? {
            HeadlessResource::Swapchain { image_count } if image_index < *image_count => {}
            _ => {
                return Err(RenderError::InvalidOperation {
                    reason: format!("image {image_index} is not part of the swap chain"),
                })
            }
        }

        let outcome = self.scripted_presents.pop_front().unwrap_or(PresentOutcome::Presented);
        if outcome != PresentOutcome::OutOfDate {
            self.stats.presents += 1;
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swapchain_image_count_is_min_plus_one_clamped() {
        let mut device = HeadlessDevice::with_surface_extent(800, 600);
        let info = device.create_swapchain(vk::Extent2D::default(), None).unwrap();
        assert_eq!(info.image_views.len(), 3);
        assert_eq!(info.extent, vk::Extent2D { width: 800, height: 600 });

        device.set_image_count_limits(3, 3);
        let info = device.create_swapchain(vk::Extent2D::default(), Some(info.swapchain)).unwrap();
        assert_eq!(info.image_views.len(), 3);
    }

    #[test]
    fn test_destroying_swapchain_destroys_views_and_framebuffers() {
        let mut device = HeadlessDevice::with_surface_extent(640, 480);
        let info = device.create_swapchain(vk::Extent2D::default(), None).unwrap();
        let render_pass = device
            .create_render_pass(info.format, vk::Format::D32_SFLOAT)
            .unwrap();
        let framebuffer = device
            .create_framebuffer(render_pass, &[info.image_views[0]], info.extent)
            .unwrap();

        device.destroy(info.swapchain);
        assert!(!device.is_alive(info.image_views[0]));
        assert!(!device.is_alive(framebuffer));
        assert!(device.is_alive(render_pass));
    }

    #[test]
    fn test_host_visible_write_and_copy() {
        let mut device = HeadlessDevice::new();
        let staging = device
            .create_buffer(4, vk::BufferUsageFlags::TRANSFER_SRC, MemoryLocation::HostVisible)
            .unwrap();
        let target = device
            .create_buffer(4, vk::BufferUsageFlags::TRANSFER_DST, MemoryLocation::DeviceLocal)
            .unwrap();

        device.write_buffer(staging, &[1, 2, 3, 4]).unwrap();
        device.copy_buffer(staging, target, 4).unwrap();
        assert_eq!(device.buffer_contents(target), Some(&[1u8, 2, 3, 4][..]));
        assert!(device.write_buffer(target, &[0]).is_err());
    }

    #[test]
    fn test_texture_rows_are_padded_to_alignment() {
        let mut device = HeadlessDevice::new();
        let pixels: Vec<u8> = (0..24).collect();
        let texture = device.create_texture(3, 2, &pixels).unwrap();
        assert_eq!(device.texture_pixels(texture), Some(pixels));
    }

    #[test]
    fn test_submit_rejects_stale_references() {
        let mut device = HeadlessDevice::with_surface_extent(64, 64);
        let info = device.create_swapchain(vk::Extent2D::default(), None).unwrap();
        let render_pass = device.create_render_pass(info.format, vk::Format::D32_SFLOAT).unwrap();
        let framebuffer = device
            .create_framebuffer(render_pass, &[info.image_views[0]], info.extent)
            .unwrap();
        let buffer = device
            .create_buffer(16, vk::BufferUsageFlags::VERTEX_BUFFER, MemoryLocation::DeviceLocal)
            .unwrap();
        let cmd = device.allocate_command_buffers(1).unwrap()[0];
        let wait = device.create_semaphore().unwrap();
        let signal = device.create_semaphore().unwrap();
        let clear = ClearValues { color: [0.0; 4], depth: 1.0 };

        device.begin_commands(cmd).unwrap();
        device
            .cmd_begin_render_pass(cmd, render_pass, framebuffer, info.extent, clear)
            .unwrap();
        device.cmd_bind_vertex_buffers(cmd, 0, &[buffer]).unwrap();
        device.cmd_draw(cmd, 3, 1).unwrap();
        device.cmd_end_render_pass(cmd).unwrap();
        device.end_commands(cmd).unwrap();
        assert!(device.submit(cmd, wait, signal).is_ok());

        device.destroy(buffer);
        assert!(device.submit(cmd, wait, signal).is_err());
    }

    #[test]
    fn test_recording_requires_begin() {
        let mut device = HeadlessDevice::new();
        let cmd = device.allocate_command_buffers(1).unwrap()[0];
        assert!(device.cmd_draw(cmd, 3, 1).is_err());
    }

    #[test]
    fn test_scripted_outcomes() {
        let mut device = HeadlessDevice::with_surface_extent(64, 64);
        let info = device.create_swapchain(vk::Extent2D::default(), None).unwrap();
        let semaphore = device.create_semaphore().unwrap();

        device.script_acquire(AcquireOutcome::OutOfDate);
        assert_eq!(
            device.acquire_next_image(info.swapchain, semaphore).unwrap(),
            AcquireOutcome::OutOfDate
        );
        assert_eq!(
            device.acquire_next_image(info.swapchain, semaphore).unwrap(),
            AcquireOutcome::Ready { image_index: 0, suboptimal: false }
        );

        device.fail_next_submit(vk::Result::ERROR_DEVICE_LOST);
        let cmd = device.allocate_command_buffers(1).unwrap()[0];
        assert!(matches!(
            device.submit(cmd, semaphore, semaphore),
            Err(RenderError::DeviceLost)
        ));
    }
}

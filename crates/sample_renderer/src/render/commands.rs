//! Command buffer recording
//!
//! [`CommandRecorder`] wraps one primary command buffer while it is being
//! recorded; [`ActiveRenderPass`] is handed to render states so they can only
//! issue commands that are legal inside the pass.

use ash::vk;

use crate::render::device::{ClearValues, GpuDevice, GpuHandle};
use crate::render::{RenderError, RenderResult};

/// Records one primary command buffer
pub struct CommandRecorder<'a> {
    device: &'a mut dyn GpuDevice,
    command_buffer: GpuHandle,
    image_index: usize,
    recording: bool,
}

impl<'a> CommandRecorder<'a> {
    /// Begin recording `command_buffer`, which targets swap chain image `image_index`
    pub fn begin(device: &'a mut dyn GpuDevice, command_buffer: GpuHandle, image_index: usize) -> RenderResult<Self> {
        device.begin_commands(command_buffer)?;
        Ok(Self {
            device,
            command_buffer,
            image_index,
            recording: true,
        })
    }

    /// Begin the render pass; it ends when the returned guard is finished or dropped
    pub fn begin_render_pass(
        &mut self,
        render_pass: GpuHandle,
        framebuffer: GpuHandle,
        extent: vk::Extent2D,
        clear: ClearValues,
    ) -> RenderResult<ActiveRenderPass<'_, 'a>> {
        if !self.recording {
            return Err(RenderError::InvalidOperation {
                reason: "Command buffer not recording".to_string(),
            });
        }
        self.device
            .cmd_begin_render_pass(self.command_buffer, render_pass, framebuffer, extent, clear)?;
        Ok(ActiveRenderPass {
            recorder: self,
            open: true,
        })
    }

    /// Finish recording
    pub fn end(mut self) -> RenderResult<GpuHandle> {
        self.recording = false;
        self.device.end_commands(self.command_buffer)?;
        Ok(self.command_buffer)
    }
}

/// Render pass being recorded
pub struct ActiveRenderPass<'r, 'a> {
    recorder: &'r mut CommandRecorder<'a>,
    open: bool,
}

impl ActiveRenderPass<'_, '_> {
    /// Swap chain image this command buffer renders to
    pub fn image_index(&self) -> usize {
        self.recorder.image_index
    }

    /// Bind a graphics pipeline
    pub fn bind_pipeline(&mut self, pipeline: GpuHandle) -> RenderResult<()> {
        self.recorder.device.cmd_bind_pipeline(self.recorder.command_buffer, pipeline)
    }

    /// Bind vertex buffers starting at `first_binding`
    pub fn bind_vertex_buffers(&mut self, first_binding: u32, buffers: &[GpuHandle]) -> RenderResult<()> {
        self.recorder
            .device
            .cmd_bind_vertex_buffers(self.recorder.command_buffer, first_binding, buffers)
    }

    /// Bind a `u32` index buffer
    pub fn bind_index_buffer(&mut self, buffer: GpuHandle) -> RenderResult<()> {
        self.recorder.device.cmd_bind_index_buffer(self.recorder.command_buffer, buffer)
    }

    /// Bind the pipeline's descriptor set
    pub fn bind_descriptor_set(&mut self, pipeline: GpuHandle, set: GpuHandle) -> RenderResult<()> {
        self.recorder
            .device
            .cmd_bind_descriptor_set(self.recorder.command_buffer, pipeline, set)
    }

    /// Non-indexed draw
    pub fn draw(&mut self, vertex_count: u32, instance_count: u32) -> RenderResult<()> {
        self.recorder
            .device
            .cmd_draw(self.recorder.command_buffer, vertex_count, instance_count)
    }

    /// Indexed draw
    pub fn draw_indexed(&mut self, index_count: u32, instance_count: u32) -> RenderResult<()> {
        self.recorder
            .device
            .cmd_draw_indexed(self.recorder.command_buffer, index_count, instance_count)
    }

    /// End the render pass, reporting failure
    pub fn finish(mut self) -> RenderResult<()> {
        self.open = false;
        self.recorder.device.cmd_end_render_pass(self.recorder.command_buffer)
    }
}

impl Drop for ActiveRenderPass<'_, '_> {
    fn drop(&mut self) {
        if self.open {
            if let Err(e) = self.recorder.device.cmd_end_render_pass(self.recorder.command_buffer) {
                log::error!("Failed to end render pass: {}", e);
            }
        }
    }
}

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::mem::{offset_of, size_of};

use super::PassTargets;
use crate::foundation::math::{to_gpu, GpuMat4, Mat4, Point3, Vec3};
use crate::render::commands::ActiveRenderPass;
use crate::render::device::{
    DescriptorBinding, DescriptorWrite, GpuDevice, GpuHandle, PipelineDesc, VertexAttribute, VertexBinding,
};
use crate::render::resource::SizedBuffer;
use crate::render::shader::ShaderLibrary;
use crate::render::{Color, RenderError, RenderResult};

/// Line vertex: position and color
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct LineVertex {
    /// World-space position
    pub position: [f32; 3],
    /// Vertex color
    pub color: Color,
}

/// Camera matrices read by the line shaders
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ViewProjection {
    /// View matrix
    pub view: GpuMat4,
    /// Projection matrix
    pub proj: GpuMat4,
}

impl ViewProjection {
    /// Pack view and projection matrices
    pub fn new(view: &Mat4, proj: &Mat4) -> Self {
        Self {
            view: to_gpu(view),
            proj: to_gpu(proj),
        }
    }
}

impl Default for ViewProjection {
    fn default() -> Self {
        Self::new(&Mat4::identity(), &Mat4::identity())
    }
}

const UNIFORM_BINDING: DescriptorBinding = DescriptorBinding {
    binding: 0,
    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
    stages: vk::ShaderStageFlags::VERTEX,
};

/// Line segments accumulated on the CPU and drawn as a line list.
///
/// Segments added with [`LineBatchState::add`] are only drawn after
/// [`LineBatchState::submit`] commits them to the vertex buffer.
#[derive(Debug)]
pub struct LineBatchState {
    pending: Vec<LineVertex>,
    vertices: SizedBuffer<LineVertex>,
    uniform: SizedBuffer<ViewProjection>,
    descriptor_layout: Option<GpuHandle>,
    descriptor_set: Option<GpuHandle>,
    pipeline: Option<GpuHandle>,
    initialized: bool,
    dirty: bool,
}

impl Default for LineBatchState {
    fn default() -> Self {
        Self::new()
    }
}

impl LineBatchState {
    /// Empty batch; dirty until first recorded
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            vertices: SizedBuffer::vertex(),
            uniform: SizedBuffer::uniform(),
            descriptor_layout: None,
            descriptor_set: None,
            pipeline: None,
            initialized: false,
            dirty: true,
        }
    }

    /// Queue a segment from `p0` to `p1`, both transformed by `transform`
    pub fn add(&mut self, p0: Vec3, p1: Vec3, color: Color, transform: &Mat4) {
        for point in [p0, p1] {
            let world = transform.transform_point(&Point3::from(point));
            self.pending.push(LineVertex {
                position: [world.x, world.y, world.z],
                color,
            });
        }
    }

    /// Drop every queued segment
    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Number of queued segments
    pub fn pending_segments(&self) -> usize {
        self.pending.len() / 2
    }

    /// Vertices added since the last clear, two per segment
    pub fn pending_vertices(&self) -> &[LineVertex] {
        &self.pending
    }

    /// Commit queued segments, and the camera matrices when given, to the GPU.
    ///
    /// A change in segment count recreates the vertex buffer and marks the
    /// state dirty.
    pub fn submit(&mut self, device: &mut dyn GpuDevice, camera: Option<&ViewProjection>) -> RenderResult<()> {
        debug_assert!(self.initialized, "line batch submitted before its resources exist");

        if self.vertices.upload_tracked(device, &self.pending, &mut self.dirty)?.is_recreated() {
            log::debug!("Line batch vertex buffer resized to {} vertices", self.pending.len());
        }
        if let Some(camera) = camera {
            self.uniform.upload(device, std::slice::from_ref(camera))?;
        }
        Ok(())
    }

    /// Vertices committed to the GPU
    pub const fn committed_vertices(&self) -> usize {
        self.vertices.count()
    }

    /// Current vertex buffer
    pub const fn vertex_buffer(&self) -> Option<GpuHandle> {
        self.vertices.handle()
    }

    /// Current pipeline
    pub const fn pipeline(&self) -> Option<GpuHandle> {
        self.pipeline
    }

    /// Whether bound resources changed since the last recording
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(super) fn init_resources(
        &mut self,
        device: &mut dyn GpuDevice,
        targets: &PassTargets,
        shaders: &ShaderLibrary,
    ) -> RenderResult<()> {
        debug_assert!(!self.initialized, "line batch resources initialized twice");

        let layout = device.create_descriptor_set_layout(&[UNIFORM_BINDING])?;
        self.descriptor_layout = Some(layout);

        self.uniform.upload(device, &[ViewProjection::default()])?;
        let uniform = self.uniform.handle().ok_or_else(|| missing("uniform buffer"))?;

        let set = device.create_descriptor_set(layout, &[UNIFORM_BINDING])?;
        self.descriptor_set = Some(set);
        device.write_descriptor_set(
            set,
            &[DescriptorWrite::UniformBuffer {
                binding: UNIFORM_BINDING.binding,
                buffer: uniform,
                range: SizedBuffer::<ViewProjection>::byte_size(1),
            }],
        )?;

        self.pipeline = Some(Self::create_pipeline(device, targets, shaders, layout)?);
        self.initialized = true;
        self.dirty = true;
        Ok(())
    }

    pub(super) fn release_resources(&mut self, device: &mut dyn GpuDevice) {
        for handle in [self.pipeline.take(), self.descriptor_set.take(), self.descriptor_layout.take()]
            .into_iter()
            .flatten()
        {
            device.destroy(handle);
        }
        self.vertices.release(device);
        self.uniform.release(device);
        self.initialized = false;
    }

    pub(super) fn record(&self, pass: &mut ActiveRenderPass<'_, '_>) -> RenderResult<()> {
        let Some(vertex_buffer) = self.vertices.handle() else {
            return Ok(());
        };
        let pipeline = self.pipeline.ok_or_else(|| missing("pipeline"))?;
        let set = self.descriptor_set.ok_or_else(|| missing("descriptor set"))?;

        pass.bind_pipeline(pipeline)?;
        pass.bind_vertex_buffers(0, &[vertex_buffer])?;
        pass.bind_descriptor_set(pipeline, set)?;
        pass.draw(self.vertices.draw_count(), 1)
    }

    pub(super) fn mark_recorded(&mut self) {
        self.dirty = false;
    }

    pub(super) fn rebuild_pipeline(
        &mut self,
        device: &mut dyn GpuDevice,
        targets: &PassTargets,
        shaders: &ShaderLibrary,
    ) -> RenderResult<()> {
        let layout = self.descriptor_layout.ok_or_else(|| missing("descriptor set layout"))?;
        if let Some(old) = self.pipeline.take() {
            device.destroy(old);
        }
        self.pipeline = Some(Self::create_pipeline(device, targets, shaders, layout)?);
        self.dirty = true;
        Ok(())
    }

    fn create_pipeline(
        device: &mut dyn GpuDevice,
        targets: &PassTargets,
        shaders: &ShaderLibrary,
        layout: GpuHandle,
    ) -> RenderResult<GpuHandle> {
        let bindings = [VertexBinding {
            binding: 0,
            stride: size_of::<LineVertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let attributes = [
            VertexAttribute {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: offset_of!(LineVertex, position) as u32,
            },
            VertexAttribute {
                location: 1,
                binding: 0,
                format: vk::Format::R8G8B8A8_UNORM,
                offset: offset_of!(LineVertex, color) as u32,
            },
        ];

        let (vertex_shader, fragment_shader) = shaders.create_stages(device, "line_vert", "line_frag")?;
        let pipeline = device.create_graphics_pipeline(&PipelineDesc {
            render_pass: targets.render_pass,
            extent: targets.extent,
            vertex_shader,
            fragment_shader,
            bindings: &bindings,
            attributes: &attributes,
            topology: vk::PrimitiveTopology::LINE_LIST,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: true,
            depth_write: false,
            descriptor_set_layout: layout,
        });
        device.destroy(vertex_shader);
        device.destroy(fragment_shader);
        pipeline
    }
}

fn missing(what: &str) -> RenderError {
    RenderError::InvalidOperation {
        reason: format!("line batch {what} has not been created"),
    }
}

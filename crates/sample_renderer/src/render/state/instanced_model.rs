use super::model::{
    InstanceData, ModelBuffers, ModelInitData, ModelLayout, ModelResources, ModelUpdate, ModelVertex,
};
use super::PassTargets;
use crate::render::commands::ActiveRenderPass;
use crate::render::device::{GpuDevice, GpuHandle};
use crate::render::resource::SizedBuffer;
use crate::render::shader::ShaderLibrary;
use crate::render::RenderResult;

/// Fixed geometry drawn once per instance.
///
/// Vertex and index data are normally set once; instances, matrices and the
/// texture change per frame through [`InstancedModelState::update`].
#[derive(Debug)]
pub struct InstancedModelState {
    init: Option<ModelInitData>,
    vertices: SizedBuffer<ModelVertex>,
    indices: SizedBuffer<u32>,
    instances: SizedBuffer<InstanceData>,
    resources: ModelResources,
    dirty: bool,
}

impl InstancedModelState {
    /// State that uploads `data` when its resources are initialized
    pub fn new(data: ModelInitData) -> Self {
        Self {
            init: Some(data),
            vertices: SizedBuffer::vertex(),
            indices: SizedBuffer::index(),
            instances: SizedBuffer::vertex(),
            resources: ModelResources::new(ModelLayout::Instanced, "model_vert"),
            dirty: true,
        }
    }

    /// Apply the sub-resources named by `update.flags`
    pub fn update(&mut self, device: &mut dyn GpuDevice, update: &ModelUpdate<'_>) -> RenderResult<()> {
        let buffers = ModelBuffers {
            vertices: &mut self.vertices,
            indices: &mut self.indices,
            instances: Some(&mut self.instances),
        };
        self.resources.apply_update(device, buffers, update, &mut self.dirty)
    }

    /// Number of instances drawn
    pub const fn instance_count(&self) -> usize {
        self.instances.count()
    }

    /// Number of indices drawn per instance
    pub const fn index_count(&self) -> usize {
        self.indices.count()
    }

    /// Current instance buffer
    pub const fn instance_buffer(&self) -> Option<GpuHandle> {
        self.instances.handle()
    }

    /// Current vertex buffer
    pub const fn vertex_buffer(&self) -> Option<GpuHandle> {
        self.vertices.handle()
    }

    /// Current texture
    pub const fn texture(&self) -> Option<GpuHandle> {
        self.resources.texture()
    }

    /// Current pipeline
    pub const fn pipeline(&self) -> Option<GpuHandle> {
        self.resources.pipeline()
    }

    /// Current uniform buffer
    pub const fn uniform_buffer(&self) -> Option<GpuHandle> {
        self.resources.uniform_buffer()
    }

    /// Current descriptor set
    pub const fn descriptor_set(&self) -> Option<GpuHandle> {
        self.resources.descriptor_set()
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
        let Some(data) = self.init.take() else {
            return Ok(());
        };
        let result = self.upload_initial(device, targets, shaders, &data);
        if result.is_err() {
            self.init = Some(data);
        }
        result
    }

    fn upload_initial(
        &mut self,
        device: &mut dyn GpuDevice,
        targets: &PassTargets,
        shaders: &ShaderLibrary,
        data: &ModelInitData,
    ) -> RenderResult<()> {
        self.vertices.upload(device, &data.vertices)?;
        self.indices.upload(device, &data.indices)?;
        self.instances.upload(device, &data.instances)?;
        self.resources.init(device, targets, shaders, &data.texture, &data.uniform)?;
        self.dirty = true;
        Ok(())
    }

    pub(super) fn release_resources(&mut self, device: &mut dyn GpuDevice) {
        self.resources.release(device);
        self.vertices.release(device);
        self.indices.release(device);
        self.instances.release(device);
    }

    pub(super) fn record(&self, pass: &mut ActiveRenderPass<'_, '_>) -> RenderResult<()> {
        let (Some(vertices), Some(indices), Some(instances)) =
            (self.vertices.handle(), self.indices.handle(), self.instances.handle())
        else {
            return Ok(());
        };

        self.resources.bind(pass)?;
        pass.bind_vertex_buffers(0, &[vertices, instances])?;
        pass.bind_index_buffer(indices)?;
        pass.draw_indexed(self.indices.draw_count(), self.instances.draw_count())
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
        self.resources.build_pipeline(device, targets, shaders)?;
        self.dirty = true;
        Ok(())
    }
}

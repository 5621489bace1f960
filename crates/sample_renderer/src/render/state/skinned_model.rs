use super::model::{ModelBuffers, ModelInitData, ModelLayout, ModelResources, ModelUpdate, ModelVertex};
use super::PassTargets;
use crate::render::commands::ActiveRenderPass;
use crate::render::device::{GpuDevice, GpuHandle};
use crate::render::resource::SizedBuffer;
use crate::render::shader::ShaderLibrary;
use crate::render::RenderResult;

/// Geometry whose vertices are re-skinned on the CPU and re-uploaded every
/// frame. Drawn once, without instancing.
#[derive(Debug)]
pub struct SkinnedModelState {
    init: Option<ModelInitData>,
    vertices: SizedBuffer<ModelVertex>,
    indices: SizedBuffer<u32>,
    resources: ModelResources,
    dirty: bool,
}

impl SkinnedModelState {
    /// State that uploads `data` when its resources are initialized.
    /// Instances in `data` are ignored.
    pub fn new(data: ModelInitData) -> Self {
        Self {
            init: Some(data),
            vertices: SizedBuffer::vertex(),
            indices: SizedBuffer::index(),
            resources: ModelResources::new(ModelLayout::Vertices, "skinned_vert"),
            dirty: true,
        }
    }

    /// Apply the sub-resources named by `update.flags`; `INSTANCE` is ignored
    pub fn update(&mut self, device: &mut dyn GpuDevice, update: &ModelUpdate<'_>) -> RenderResult<()> {
        let buffers = ModelBuffers {
            vertices: &mut self.vertices,
            indices: &mut self.indices,
            instances: None,
        };
        self.resources.apply_update(device, buffers, update, &mut self.dirty)
    }

    /// Number of vertices on the GPU
    pub const fn vertex_count(&self) -> usize {
        self.vertices.count()
    }

    /// Number of indices drawn
    pub const fn index_count(&self) -> usize {
        self.indices.count()
    }

    /// Current vertex buffer
    pub const fn vertex_buffer(&self) -> Option<GpuHandle> {
        self.vertices.handle()
    }

    /// Current pipeline
    pub const fn pipeline(&self) -> Option<GpuHandle> {
        self.resources.pipeline()
    }

    /// Current texture
    pub const fn texture(&self) -> Option<GpuHandle> {
        self.resources.texture()
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
        let result = self
            .vertices
            .upload(device, &data.vertices)
            .and_then(|_| self.indices.upload(device, &data.indices))
            .and_then(|_| self.resources.init(device, targets, shaders, &data.texture, &data.uniform));
        match result {
            Ok(()) => {
                self.dirty = true;
                Ok(())
            }
            Err(err) => {
                self.init = Some(data);
                Err(err)
            }
        }
    }

    pub(super) fn release_resources(&mut self, device: &mut dyn GpuDevice) {
        self.resources.release(device);
        self.vertices.release(device);
        self.indices.release(device);
    }

    pub(super) fn record(&self, pass: &mut ActiveRenderPass<'_, '_>) -> RenderResult<()> {
        let (Some(vertices), Some(indices)) = (self.vertices.handle(), self.indices.handle()) else {
            return Ok(());
        };

        self.resources.bind(pass)?;
        pass.bind_vertex_buffers(0, &[vertices])?;
        pass.bind_index_buffer(indices)?;
        pass.draw_indexed(self.indices.draw_count(), 1)
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::device::headless::HeadlessDevice;
    use crate::render::shader::tests::fixture_library;
    use crate::render::state::UpdateFlags;
    use crate::render::Color;
    use ash::vk;

    fn triangle(z: f32) -> Vec<ModelVertex> {
        [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]
            .iter()
            .map(|[x, y]| ModelVertex {
                position: [*x, *y, z],
                normal: [0.0, 0.0, 1.0],
                uv: [*x, *y],
                color: Color::WHITE,
            })
            .collect()
    }

    fn setup(tag: &str) -> (HeadlessDevice, PassTargets, SkinnedModelState) {
        let mut device = HeadlessDevice::new();
        let targets = PassTargets {
            render_pass: device
                .create_render_pass(vk::Format::B8G8R8A8_SRGB, vk::Format::D32_SFLOAT)
                .unwrap(),
            extent: vk::Extent2D { width: 640, height: 480 },
            generation: 1,
        };
        let mut state = SkinnedModelState::new(ModelInitData::new(triangle(0.0), vec![0, 1, 2]));
        state.init_resources(&mut device, &targets, &fixture_library(tag)).unwrap();
        (device, targets, state)
    }

    #[test]
    fn test_new_state_is_dirty_until_recorded() {
        let (_device, _targets, mut state) = setup("skinned_dirty");
        assert!(state.is_dirty());
        state.mark_recorded();
        assert!(!state.is_dirty());
    }

    #[test]
    fn test_per_frame_vertices_update_in_place() {
        let (mut device, _targets, mut state) = setup("skinned_frame");
        state.mark_recorded();
        let buffer = state.vertex_buffer();

        let moved = triangle(2.0);
        state
            .update(
                &mut device,
                &ModelUpdate {
                    flags: UpdateFlags::VERTEX,
                    vertices: &moved,
                    ..ModelUpdate::default()
                },
            )
            .unwrap();

        assert_eq!(state.vertex_buffer(), buffer);
        assert!(!state.is_dirty());
        assert_eq!(device.buffer_contents(buffer.unwrap()).unwrap(), bytemuck::cast_slice::<ModelVertex, u8>(&moved));
    }

    #[test]
    fn test_vertex_count_change_marks_dirty() {
        let (mut device, _targets, mut state) = setup("skinned_grow");
        state.mark_recorded();

        let mut doubled = triangle(0.0);
        doubled.extend(triangle(1.0));
        state
            .update(
                &mut device,
                &ModelUpdate {
                    flags: UpdateFlags::VERTEX | UpdateFlags::INDEX,
                    vertices: &doubled,
                    indices: &[0, 1, 2, 3, 4, 5],
                    ..ModelUpdate::default()
                },
            )
            .unwrap();

        assert!(state.is_dirty());
        assert_eq!(state.vertex_count(), 6);
        assert_eq!(state.index_count(), 6);
    }

    #[test]
    fn test_rebuild_after_render_pass_loss() {
        let (mut device, targets, mut state) = setup("skinned_rebuild");
        let old_pipeline = state.pipeline().unwrap();
        device.destroy(targets.render_pass);
        assert!(!device.is_alive(old_pipeline));

        let replacement = PassTargets {
            render_pass: device
                .create_render_pass(vk::Format::B8G8R8A8_SRGB, vk::Format::D32_SFLOAT)
                .unwrap(),
            generation: 2,
            ..targets
        };
        state
            .rebuild_pipeline(&mut device, &replacement, &fixture_library("skinned_rebuild"))
            .unwrap();
        assert!(device.is_alive(state.pipeline().unwrap()));
        assert!(state.is_dirty());
    }
}

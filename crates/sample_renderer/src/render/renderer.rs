//! Renderer facade
//!
//! Maps named draw calls onto one render state per kind, created on first
//! use. Draw calls accumulate on the CPU during a frame and are flushed into
//! their states by [`Renderer::render_frame`].

use crate::config::RendererConfig;
use crate::foundation::math::{Mat4, Mat4Ext, Vec3};
use crate::render::context::{FrameStatus, RenderContext, RenderStateId};
use crate::render::device::GpuDevice;
use crate::render::primitives::{self, BoxShape};
use crate::render::skinning::{Skeleton, SkinnedMesh};
use crate::render::state::{
    InstanceData, InstancedModelState, LineBatchState, ModelInitData, ModelUniform, ModelUpdate, ModelVertex,
    RenderState, SkinnedModelState, TextureImage, UpdateFlags, ViewProjection,
};
use crate::render::{Color, RenderError, RenderResult};

const CHECKER_SIZE: u32 = 64;
const CHECKER_CELL: u32 = 8;
const NORMAL_LENGTH: f32 = 0.05;
const BONE_WIDTH_RATIO: f32 = 0.1;
const JOINT_SIZE_RATIO: f32 = 0.15;
const BONE_COLOR: Color = Color::rgb(0xe6, 0xcc, 0x4d);
const JOINT_COLOR: Color = Color::rgb(0xe6, 0x4d, 0x33);

/// How a mesh is drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawOptions {
    /// Draw the shaded triangles
    pub triangles: bool,
    /// Keep vertex colors; when false vertices are drawn white
    pub colors: bool,
    /// Draw each vertex normal as a short line
    pub normals: bool,
}

impl Default for DrawOptions {
    fn default() -> Self {
        Self {
            triangles: true,
            colors: true,
            normals: false,
        }
    }
}

/// Render states owned by the facade, one per kind
#[derive(Debug, Default)]
struct FacadeStates {
    lines: Option<RenderStateId>,
    shaded_boxes: Option<RenderStateId>,
    meshes: Option<RenderStateId>,
}

/// Per-frame accumulators not held inside a render state
#[derive(Debug, Default)]
struct FrameBatch {
    box_instances: Vec<InstanceData>,
    mesh_vertices: Vec<ModelVertex>,
    mesh_indices: Vec<u32>,
}

impl FrameBatch {
    fn clear(&mut self) {
        self.box_instances.clear();
        self.mesh_vertices.clear();
        self.mesh_indices.clear();
    }

    fn push_mesh(&mut self, vertices: Vec<ModelVertex>, indices: &[u32]) -> RenderResult<()> {
        let rebased = rebase_indices(self.mesh_vertices.len(), vertices.len(), indices)?;
        self.mesh_vertices.extend(vertices);
        self.mesh_indices.extend(rebased);
        Ok(())
    }
}

/// Offset `indices` by `base`, failing when any vertex of the combined mesh
/// would fall outside the `u32` index range
fn rebase_indices(base: usize, vertex_count: usize, indices: &[u32]) -> RenderResult<Vec<u32>> {
    let overflow = || RenderError::InvalidOperation {
        reason: "meshes of one frame exceed u32::MAX vertices".to_string(),
    };
    let total = base.checked_add(vertex_count).ok_or_else(overflow)?;
    u32::try_from(total.saturating_sub(1)).map_err(|_| overflow())?;
    let base = u32::try_from(base).map_err(|_| overflow())?;
    indices
        .iter()
        .map(|index| base.checked_add(*index).ok_or_else(overflow))
        .collect()
}

fn default_projection(aspect: f32) -> Mat4 {
    Mat4::perspective(std::f32::consts::FRAC_PI_4, aspect, 0.1, 200.0).to_vulkan_projection()
}

fn aspect_ratio(width: u32, height: u32) -> f32 {
    width as f32 / height.max(1) as f32
}

/// High-level immediate drawing on top of a [`RenderContext`].
///
/// Every draw call is additive within a frame and must be followed by one
/// [`Renderer::render_frame`] before the next frame's calls begin.
pub struct Renderer<D: GpuDevice> {
    context: RenderContext<D>,
    view: Mat4,
    projection: Mat4,
    camera_set: bool,
    states: FacadeStates,
    batch: FrameBatch,
    frame_count: u64,
}

impl<D: GpuDevice> Renderer<D> {
    /// Validate `config`, then build the render context on `device`
    ///
    /// # Arguments
    /// * `config` - Renderer configuration; also the shader directory convention
    /// * `device` - Device the context takes ownership of
    pub fn initialize(config: RendererConfig, device: D) -> RenderResult<Self> {
        config.validate().map_err(RenderError::InitializationFailed)?;
        log::info!("Render engine: {}", device.backend_name());

        let mut context = RenderContext::new(config, device);
        context.initialize()?;

        let aspect = context
            .extent()
            .map_or(16.0 / 9.0, |extent| aspect_ratio(extent.width, extent.height));
        let view = Mat4::look_at(Vec3::new(0.0, 4.0, 10.0), Vec3::zeros(), Vec3::y());

        Ok(Self {
            context,
            view,
            projection: default_projection(aspect),
            camera_set: false,
            states: FacadeStates::default(),
            batch: FrameBatch::default(),
            frame_count: 0,
        })
    }

    /// Set the camera used from the next rendered frame on.
    ///
    /// `projection` is in the framework's clip convention; the Vulkan clip
    /// remap is applied here.
    pub fn set_camera(&mut self, view: &Mat4, projection: &Mat4) {
        self.view = *view;
        self.projection = projection.to_vulkan_projection();
        self.camera_set = true;
        log::trace!("Camera set");
    }

    /// Forward a window resize to the context.
    ///
    /// Until a camera is set the default projection follows the new aspect
    /// ratio; a camera set with [`Self::set_camera`] is left alone.
    pub fn on_resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        self.context.on_resize(width, height)?;
        if !self.camera_set {
            if let Some(extent) = self.context.extent().filter(|e| e.width > 0 && e.height > 0) {
                self.projection = default_projection(aspect_ratio(extent.width, extent.height));
            }
        }
        Ok(())
    }

    /// Unit axes at `transform`, X red, Y green, Z blue
    pub fn draw_axes(&mut self, transform: &Mat4) -> RenderResult<()> {
        let transform = transform.to_vulkan_model();
        let lines = self.line_batch()?;
        for (from, to, color) in primitives::axis_lines() {
            lines.add(from, to, color, &transform);
        }
        Ok(())
    }

    /// Grey grid of `cell_count`x`cell_count` cells on the XZ plane
    pub fn draw_grid(&mut self, cell_count: u32, cell_size: f32) -> RenderResult<()> {
        let identity = Mat4::identity();
        let lines = self.line_batch()?;
        for (from, to) in primitives::grid_lines(cell_count, cell_size) {
            lines.add(from, to, Color::GREY, &identity);
        }
        Ok(())
    }

    /// One line of `length` per position, along the matching direction
    ///
    /// # Arguments
    /// * `positions` - Line origins
    /// * `directions` - Line directions, normalized before scaling; same count as `positions`
    /// * `length` - Length of every line
    /// * `color` - Line color
    /// * `transform` - Applied to both ends of every line
    pub fn draw_vectors(
        &mut self,
        positions: &[Vec3],
        directions: &[Vec3],
        length: f32,
        color: Color,
        transform: &Mat4,
    ) -> RenderResult<()> {
        if positions.len() != directions.len() {
            return Err(RenderError::InvalidOperation {
                reason: format!(
                    "{} positions but {} directions",
                    positions.len(),
                    directions.len()
                ),
            });
        }
        let transform = transform.to_vulkan_model();
        let lines = self.line_batch()?;
        for (position, direction) in positions.iter().zip(directions) {
            let direction = direction.try_normalize(f32::EPSILON).unwrap_or_else(Vec3::zeros);
            lines.add(*position, position + direction * length, color, &transform);
        }
        Ok(())
    }

    /// Tangent-space binormals, `cross(normal, tangent) * handedness`, one
    /// line of `length` per position
    ///
    /// # Arguments
    /// * `handedness` - Sign of each binormal, usually the tangent's `w`
    #[allow(clippy::too_many_arguments)]
    pub fn draw_binormals(
        &mut self,
        positions: &[Vec3],
        normals: &[Vec3],
        tangents: &[Vec3],
        handedness: &[f32],
        length: f32,
        color: Color,
        transform: &Mat4,
    ) -> RenderResult<()> {
        let count = positions.len();
        if normals.len() != count || tangents.len() != count || handedness.len() != count {
            return Err(RenderError::InvalidOperation {
                reason: format!(
                    "{count} positions but {} normals, {} tangents and {} handedness values",
                    normals.len(),
                    tangents.len(),
                    handedness.len()
                ),
            });
        }
        let binormals: Vec<Vec3> = normals
            .iter()
            .zip(tangents)
            .zip(handedness)
            .map(|((normal, tangent), w)| normal.cross(tangent) * *w)
            .collect();
        self.draw_vectors(positions, &binormals, length, color, transform)
    }

    /// Box drawn immediately: faces filled with `colors[0]`, edges outlined
    /// with `colors[1]`
    pub fn draw_box_im(&mut self, shape: &BoxShape, transform: &Mat4, colors: [Color; 2]) -> RenderResult<()> {
        self.draw_box_shaded(shape, std::slice::from_ref(transform), colors[0])?;

        let transform = transform.to_vulkan_model();
        let lines = self.line_batch()?;
        for (from, to) in shape.edges() {
            lines.add(from, to, colors[1], &transform);
        }
        Ok(())
    }

    /// One shaded box per transform. All boxes of a frame share one
    /// instanced state whose instance buffer holds every box requested.
    pub fn draw_box_shaded(&mut self, shape: &BoxShape, transforms: &[Mat4], color: Color) -> RenderResult<()> {
        self.shaded_box_state()?;

        let local = shape.unit_cube_transform();
        self.batch.box_instances.extend(
            transforms
                .iter()
                .map(|transform| InstanceData::new(&(transform.to_vulkan_model() * local), color)),
        );
        Ok(())
    }

    /// Skeleton in the pose given by each joint's model-space matrix.
    ///
    /// Every bone is a shaded box from parent to child joint, thinner for
    /// shorter bones; zero-length bones are skipped. With `draw_joints` each
    /// joint also gets a small cube.
    pub fn draw_posture(
        &mut self,
        skeleton: &Skeleton,
        joint_matrices: &[Mat4],
        transform: &Mat4,
        draw_joints: bool,
    ) -> RenderResult<()> {
        if joint_matrices.len() != skeleton.joint_count() {
            return Err(RenderError::InvalidOperation {
                reason: format!(
                    "skeleton has {} joints but {} matrices were given",
                    skeleton.joint_count(),
                    joint_matrices.len()
                ),
            });
        }
        self.shaded_box_state()?;

        let transform = transform.to_vulkan_model();
        let joints: Vec<Vec3> = joint_matrices
            .iter()
            .map(|m| Vec3::new(m[(0, 3)], m[(1, 3)], m[(2, 3)]))
            .collect();

        let mut longest = 0.0f32;
        for (parent, child) in skeleton.bones() {
            let (from, to) = (joints[parent], joints[child]);
            let length = (to - from).norm();
            longest = longest.max(length);
            if let Some(bone) = primitives::bone_transform(from, to, length * BONE_WIDTH_RATIO) {
                self.batch.box_instances.push(InstanceData::new(&(transform * bone), BONE_COLOR));
            }
        }

        if draw_joints {
            let size = if longest > 0.0 { longest * JOINT_SIZE_RATIO } else { JOINT_SIZE_RATIO };
            self.batch.box_instances.extend(joints.iter().map(|position| {
                let joint = Mat4::new_translation(position) * Mat4::new_scaling(size);
                InstanceData::new(&(transform * joint), JOINT_COLOR)
            }));
        }
        Ok(())
    }

    /// [`Self::draw_posture`] in the skeleton's rest pose
    pub fn draw_skeleton(&mut self, skeleton: &Skeleton, transform: &Mat4, draw_joints: bool) -> RenderResult<()> {
        self.draw_posture(skeleton, &skeleton.rest_pose_model_space(), transform, draw_joints)
    }

    /// Skin `mesh` with `skinning_matrices` on the CPU and draw it at `transform`
    pub fn draw_skinned_mesh(
        &mut self,
        mesh: &SkinnedMesh,
        skinning_matrices: &[Mat4],
        transform: &Mat4,
        options: DrawOptions,
    ) -> RenderResult<()> {
        let vertices = mesh.skin(skinning_matrices, &transform.to_vulkan_model())?;
        self.push_mesh(vertices, &mesh.indices, options)
    }

    /// Draw `mesh` in bind pose at `transform`
    pub fn draw_mesh(&mut self, mesh: &SkinnedMesh, transform: &Mat4, options: DrawOptions) -> RenderResult<()> {
        let vertices = mesh.rigid(&transform.to_vulkan_model());
        self.push_mesh(vertices, &mesh.indices, options)
    }

    /// Flush every accumulated draw into its state and draw one frame.
    ///
    /// Accumulators are cleared whatever the outcome.
    pub fn render_frame(&mut self) -> RenderResult<FrameStatus> {
        let result = self.flush().and_then(|()| self.context.draw_frame());
        self.clear_frame();
        self.frame_count += 1;
        if let Err(err) = &result {
            log::error!("Frame {} failed: {err}", self.frame_count);
        }
        result
    }

    /// Replace the texture applied to meshes
    pub fn set_mesh_texture(&mut self, texture: &TextureImage) -> RenderResult<()> {
        let id = self.mesh_state()?;
        let (state, device) = self.context.state_and_device_mut(id).ok_or_else(|| missing_state("meshes"))?;
        let meshes = state.as_skinned_model_mut().ok_or_else(|| missing_state("meshes"))?;
        meshes.update(
            device,
            &ModelUpdate {
                flags: UpdateFlags::TEXTURE,
                texture: Some(texture),
                ..ModelUpdate::default()
            },
        )
    }

    /// Number of frames rendered, including failed ones
    pub const fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// The underlying context
    pub const fn context(&self) -> &RenderContext<D> {
        &self.context
    }

    /// The underlying context, mutably
    pub fn context_mut(&mut self) -> &mut RenderContext<D> {
        &mut self.context
    }

    fn push_mesh(&mut self, vertices: Vec<ModelVertex>, indices: &[u32], options: DrawOptions) -> RenderResult<()> {
        if options.normals {
            let identity = Mat4::identity();
            let lines = self.line_batch()?;
            for vertex in &vertices {
                let position = Vec3::from(vertex.position);
                let tip = position + Vec3::from(vertex.normal) * NORMAL_LENGTH;
                lines.add(position, tip, Color::WHITE, &identity);
            }
        }
        if !options.triangles {
            return Ok(());
        }

        self.mesh_state()?;
        let colors = options.colors;
        let vertices = vertices
            .into_iter()
            .map(|vertex| ModelVertex {
                color: if colors { vertex.color } else { Color::WHITE },
                ..vertex
            })
            .collect();
        self.batch.push_mesh(vertices, indices)
    }

    fn shaded_box_state(&mut self) -> RenderResult<RenderStateId> {
        if let Some(id) = self.states.shaded_boxes {
            return Ok(id);
        }
        let (vertices, indices) = primitives::unit_cube(Color::WHITE);
        let state = InstancedModelState::new(ModelInitData::new(vertices, indices));
        let id = self.context.register_render_state(state)?;
        self.states.shaded_boxes = Some(id);
        Ok(id)
    }

    fn mesh_state(&mut self) -> RenderResult<RenderStateId> {
        if let Some(id) = self.states.meshes {
            return Ok(id);
        }
        let data = ModelInitData::new(Vec::new(), Vec::new())
            .with_texture(primitives::checkered_texture(CHECKER_SIZE, CHECKER_CELL));
        let id = self.context.register_render_state(SkinnedModelState::new(data))?;
        self.states.meshes = Some(id);
        Ok(id)
    }

    fn line_batch(&mut self) -> RenderResult<&mut LineBatchState> {
        let id = match self.states.lines {
            Some(id) => id,
            None => {
                let id = self.context.register_render_state(LineBatchState::new())?;
                self.states.lines = Some(id);
                id
            }
        };
        self.context
            .state_mut(id)
            .and_then(RenderState::as_line_batch_mut)
            .ok_or_else(|| missing_state("line batch"))
    }

    fn flush(&mut self) -> RenderResult<()> {
        let camera = ViewProjection::new(&self.view, &self.projection);
        let uniform = ModelUniform::new(&Mat4::identity(), &self.view, &self.projection);

        if let Some(id) = self.states.lines {
            let (state, device) = self.context.state_and_device_mut(id).ok_or_else(|| missing_state("line batch"))?;
            let lines = state.as_line_batch_mut().ok_or_else(|| missing_state("line batch"))?;
            lines.submit(device, Some(&camera))?;
        }

        if let Some(id) = self.states.shaded_boxes {
            let (state, device) = self
                .context
                .state_and_device_mut(id)
                .ok_or_else(|| missing_state("shaded boxes"))?;
            let boxes = state
                .as_instanced_model_mut()
                .ok_or_else(|| missing_state("shaded boxes"))?;
            boxes.update(
                device,
                &ModelUpdate {
                    flags: UpdateFlags::INSTANCE | UpdateFlags::UNIFORM,
                    instances: &self.batch.box_instances,
                    uniform: Some(uniform),
                    ..ModelUpdate::default()
                },
            )?;
        }

        if let Some(id) = self.states.meshes {
            let (state, device) = self.context.state_and_device_mut(id).ok_or_else(|| missing_state("meshes"))?;
            let meshes = state.as_skinned_model_mut().ok_or_else(|| missing_state("meshes"))?;
            meshes.update(
                device,
                &ModelUpdate {
                    flags: UpdateFlags::VERTEX | UpdateFlags::INDEX | UpdateFlags::UNIFORM,
                    vertices: &self.batch.mesh_vertices,
                    indices: &self.batch.mesh_indices,
                    uniform: Some(uniform),
                    ..ModelUpdate::default()
                },
            )?;
        }
        Ok(())
    }

    fn clear_frame(&mut self) {
        self.batch.clear();
        if let Some(lines) = self
            .states
            .lines
            .and_then(|id| self.context.state_mut(id))
            .and_then(RenderState::as_line_batch_mut)
        {
            lines.clear();
        }
    }
}

impl<D: GpuDevice> Drop for Renderer<D> {
    fn drop(&mut self) {
        log::info!("Shutting down renderer after {} frames", self.frame_count);
        if let Err(err) = self.context.shutdown() {
            log::error!("Renderer shutdown failed: {err}");
        }
    }
}

fn missing_state(what: &str) -> RenderError {
    RenderError::InvalidOperation {
        reason: format!("{what} render state is not registered"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::device::headless::HeadlessDevice;
    use crate::render::shader::tests::fixture_library;
    use crate::foundation::math::Point3;
    use crate::render::skinning::SkinnedVertex;
    use approx::assert_relative_eq;

    fn renderer(tag: &str) -> Renderer<HeadlessDevice> {
        let config = RendererConfig::default()
            .with_extent(800, 600)
            .with_shader_dir(fixture_library(tag).dir().to_path_buf());
        Renderer::initialize(config, HeadlessDevice::new()).unwrap()
    }

    fn line_batch(renderer: &Renderer<HeadlessDevice>) -> &LineBatchState {
        match renderer.context().state(renderer.states.lines.unwrap()) {
            Some(RenderState::LineBatch(state)) => state,
            other => panic!("expected a line batch, got {other:?}"),
        }
    }

    fn shaded_boxes(renderer: &Renderer<HeadlessDevice>) -> &InstancedModelState {
        match renderer.context().state(renderer.states.shaded_boxes.unwrap()) {
            Some(RenderState::InstancedModel(state)) => state,
            other => panic!("expected an instanced model, got {other:?}"),
        }
    }

    fn meshes(renderer: &Renderer<HeadlessDevice>) -> &SkinnedModelState {
        match renderer.context().state(renderer.states.meshes.unwrap()) {
            Some(RenderState::SkinnedModel(state)) => state,
            other => panic!("expected a skinned model, got {other:?}"),
        }
    }

    fn arm() -> Skeleton {
        let step = Mat4::new_translation(&Vec3::new(0.0, 1.0, 0.0));
        Skeleton::new(vec![None, Some(0), Some(1), Some(0)], vec![Mat4::identity(), step, step, step]).unwrap()
    }

    fn box_instances(renderer: &Renderer<HeadlessDevice>) -> Vec<InstanceData> {
        let buffer = shaded_boxes(renderer).instance_buffer().unwrap();
        let bytes = renderer.context().device().buffer_contents(buffer).unwrap();
        bytes
            .chunks_exact(std::mem::size_of::<InstanceData>())
            .map(bytemuck::pod_read_unaligned)
            .collect()
    }

    fn triangle() -> SkinnedMesh {
        SkinnedMesh::new(
            vec![
                SkinnedVertex::rigid(Vec3::zeros(), Vec3::z(), [0.0, 0.0], 0),
                SkinnedVertex::rigid(Vec3::x(), Vec3::z(), [1.0, 0.0], 0),
                SkinnedVertex::rigid(Vec3::y(), Vec3::z(), [0.0, 1.0], 0),
            ],
            vec![0, 1, 2],
        )
        .unwrap()
    }

    #[test]
    fn test_states_are_created_lazily() {
        let mut renderer = renderer("facade_lazy");
        assert_eq!(renderer.context().state_count(), 0);

        renderer.draw_grid(4, 1.0).unwrap();
        renderer.draw_axes(&Mat4::identity()).unwrap();
        assert_eq!(renderer.context().state_count(), 1);

        renderer.draw_box_shaded(&BoxShape::centered(Vec3::repeat(1.0)), &[Mat4::identity()], Color::RED).unwrap();
        assert_eq!(renderer.context().state_count(), 2);
        assert_eq!(renderer.render_frame().unwrap(), FrameStatus::Presented);
        assert_eq!(renderer.frame_count(), 1);
    }

    #[test]
    fn test_unchanged_frames_do_not_rerecord() {
        let mut renderer = renderer("facade_steady");
        for _ in 0..3 {
            renderer.draw_grid(10, 1.0).unwrap();
            renderer.render_frame().unwrap();
        }
        // Each of the three images is recorded on the first frame only.
        let stats = renderer.context().device().stats();
        assert_eq!(stats.command_buffers_recorded, 3);
        assert_eq!(line_batch(&renderer).committed_vertices(), 44);
        assert_eq!(line_batch(&renderer).pending_segments(), 0);
    }

    #[test]
    fn test_shaded_boxes_share_one_instanced_state() {
        let mut renderer = renderer("facade_boxes");
        let shape = BoxShape::centered(Vec3::repeat(1.0));
        renderer.draw_box_shaded(&shape, &[Mat4::identity(); 2], Color::RED).unwrap();
        renderer.render_frame().unwrap();
        let first = shaded_boxes(&renderer).instance_buffer();
        assert_eq!(shaded_boxes(&renderer).instance_count(), 2);

        renderer.draw_box_shaded(&shape, &[Mat4::identity(); 3], Color::RED).unwrap();
        renderer.draw_box_shaded(&shape, &[Mat4::identity(); 2], Color::BLUE).unwrap();
        renderer.render_frame().unwrap();
        assert_eq!(shaded_boxes(&renderer).instance_count(), 5);
        assert_ne!(shaded_boxes(&renderer).instance_buffer(), first);
        assert!(!shaded_boxes(&renderer).is_dirty());

        renderer.render_frame().unwrap();
        assert_eq!(shaded_boxes(&renderer).instance_count(), 0);
        assert_eq!(shaded_boxes(&renderer).instance_buffer(), None);
    }

    #[test]
    fn test_instance_transforms_are_corrected() {
        let mut renderer = renderer("facade_correction");
        let shape = BoxShape::new(Vec3::zeros(), Vec3::new(2.0, 2.0, 2.0));
        let transform = Mat4::new_translation(&Vec3::new(3.0, 4.0, 5.0));
        renderer.draw_box_shaded(&shape, &[transform], Color::GREEN).unwrap();
        renderer.render_frame().unwrap();

        let buffer = shaded_boxes(&renderer).instance_buffer().unwrap();
        let bytes = renderer.context().device().buffer_contents(buffer).unwrap();
        let instance: InstanceData = bytemuck::pod_read_unaligned(&bytes[..std::mem::size_of::<InstanceData>()]);
        let expected = transform.to_vulkan_model() * shape.unit_cube_transform();
        assert_relative_eq!(Mat4::from(instance.transform), expected);
        assert_relative_eq!(instance.transform[3][0], -2.0);
        assert_eq!(instance.color, Color::GREEN);
    }

    #[test]
    fn test_box_im_outlines_and_fills() {
        let mut renderer = renderer("facade_box_im");
        renderer
            .draw_box_im(&BoxShape::centered(Vec3::repeat(1.0)), &Mat4::identity(), [Color::WHITE, Color::RED])
            .unwrap();
        assert_eq!(line_batch(&renderer).pending_segments(), 12);
        renderer.render_frame().unwrap();
        assert_eq!(shaded_boxes(&renderer).instance_count(), 1);
        assert_eq!(line_batch(&renderer).committed_vertices(), 24);
    }

    #[test]
    fn test_meshes_are_concatenated() {
        let mut renderer = renderer("facade_meshes");
        let mesh = triangle();
        renderer.draw_mesh(&mesh, &Mat4::identity(), DrawOptions::default()).unwrap();
        renderer
            .draw_skinned_mesh(&mesh, &[Mat4::identity()], &Mat4::identity(), DrawOptions::default())
            .unwrap();
        renderer.render_frame().unwrap();

        assert_eq!(meshes(&renderer).vertex_count(), 6);
        assert_eq!(meshes(&renderer).index_count(), 6);
        assert_eq!(renderer.batch.mesh_indices.len(), 0);
    }

    #[test]
    fn test_mesh_normals_go_to_the_line_batch() {
        let mut renderer = renderer("facade_normals");
        let options = DrawOptions {
            triangles: false,
            normals: true,
            ..DrawOptions::default()
        };
        renderer.draw_mesh(&triangle(), &Mat4::identity(), options).unwrap();
        assert_eq!(line_batch(&renderer).pending_segments(), 3);
        assert!(renderer.states.meshes.is_none());
    }

    #[test]
    fn test_vector_count_mismatch_is_rejected() {
        let mut renderer = renderer("facade_vectors");
        let result = renderer.draw_vectors(&[Vec3::zeros()], &[], 1.0, Color::RED, &Mat4::identity());
        assert!(result.is_err());

        renderer
            .draw_vectors(&[Vec3::zeros(); 2], &[Vec3::y() * 3.0; 2], 0.5, Color::RED, &Mat4::identity())
            .unwrap();
        assert_eq!(line_batch(&renderer).pending_segments(), 2);
    }

    #[test]
    fn test_camera_reaches_the_line_uniform() {
        let mut renderer = renderer("facade_camera");
        let view = Mat4::look_at(Vec3::new(0.0, 0.0, 5.0), Vec3::zeros(), Vec3::y());
        let projection = Mat4::perspective(1.0, 1.0, 0.1, 10.0);
        renderer.set_camera(&view, &projection);
        renderer.draw_grid(1, 1.0).unwrap();
        renderer.render_frame().unwrap();
        assert_relative_eq!(renderer.projection, projection.to_vulkan_projection());
    }

    #[test]
    fn test_mesh_texture_resize_marks_dirty() {
        let mut renderer = renderer("facade_texture");
        renderer.render_frame().unwrap();
        renderer.set_mesh_texture(&TextureImage::solid(Color::BLUE)).unwrap();
        assert!(meshes(&renderer).is_dirty());
        renderer.render_frame().unwrap();
        assert!(!meshes(&renderer).is_dirty());
    }

    #[test]
    fn test_posture_draws_one_box_per_bone() {
        let mut renderer = renderer("facade_posture");
        let skeleton = arm();
        let pose = skeleton.rest_pose_model_space();
        renderer.draw_posture(&skeleton, &pose, &Mat4::identity(), false).unwrap();
        renderer.render_frame().unwrap();
        assert_eq!(shaded_boxes(&renderer).instance_count(), 3);

        let bones = box_instances(&renderer);
        let first = Mat4::from(bones[0].transform);
        assert_relative_eq!(first.transform_point(&Point3::new(-0.5, 0.0, 0.0)), Point3::origin(), epsilon = 1e-5);
        assert_relative_eq!(first.transform_point(&Point3::new(0.5, 0.0, 0.0)), Point3::new(0.0, 1.0, 0.0), epsilon = 1e-5);
        assert!(bones.iter().all(|bone| bone.color == BONE_COLOR));

        renderer.draw_posture(&skeleton, &pose, &Mat4::identity(), true).unwrap();
        renderer.render_frame().unwrap();
        assert_eq!(shaded_boxes(&renderer).instance_count(), 7);
    }

    #[test]
    fn test_skeleton_is_the_rest_posture() {
        let skeleton = arm();
        let mut posed = renderer("facade_posture_rest");
        posed
            .draw_posture(&skeleton, &skeleton.rest_pose_model_space(), &Mat4::identity(), true)
            .unwrap();
        posed.render_frame().unwrap();

        let mut rest = renderer("facade_skeleton");
        rest.draw_skeleton(&skeleton, &Mat4::identity(), true).unwrap();
        rest.render_frame().unwrap();

        assert_eq!(box_instances(&rest), box_instances(&posed));
    }

    #[test]
    fn test_posture_needs_a_matrix_per_joint() {
        let mut renderer = renderer("facade_posture_count");
        let result = renderer.draw_posture(&arm(), &[Mat4::identity(); 2], &Mat4::identity(), false);
        assert!(matches!(result, Err(RenderError::InvalidOperation { .. })));
        assert!(renderer.batch.box_instances.is_empty());
    }

    #[test]
    fn test_binormals_follow_handedness() {
        let mut renderer = renderer("facade_binormals");
        renderer
            .draw_binormals(
                &[Vec3::zeros(), Vec3::x()],
                &[Vec3::z(); 2],
                &[Vec3::x(); 2],
                &[1.0, -1.0],
                2.0,
                Color::BLUE,
                &Mat4::identity(),
            )
            .unwrap();

        let vertices = line_batch(&renderer).pending_vertices();
        assert_eq!(vertices.len(), 4);
        assert_relative_eq!(Vec3::from(vertices[1].position), Vec3::new(0.0, 2.0, 0.0));
        assert_relative_eq!(Vec3::from(vertices[3].position), Vec3::new(1.0, -2.0, 0.0));

        let mismatched = renderer.draw_binormals(&[Vec3::zeros()], &[], &[], &[], 1.0, Color::BLUE, &Mat4::identity());
        assert!(mismatched.is_err());
    }

    #[test]
    fn test_resize_updates_default_projection() {
        let mut renderer = renderer("facade_resize");
        renderer.on_resize(1600, 600).unwrap();
        assert_relative_eq!(renderer.projection, default_projection(1600.0 / 600.0));

        let projection = Mat4::perspective(1.0, 1.0, 0.1, 10.0);
        renderer.set_camera(&Mat4::identity(), &projection);
        renderer.on_resize(400, 400).unwrap();
        assert_relative_eq!(renderer.projection, projection.to_vulkan_projection());
    }

    #[test]
    fn test_indices_past_u32_range_are_rejected() {
        let near_limit = u32::MAX as usize - 3;
        let rebased = rebase_indices(near_limit, 3, &[0, 1, 2]).unwrap();
        assert_eq!(rebased, vec![u32::MAX - 3, u32::MAX - 2, u32::MAX - 1]);

        let result = rebase_indices(u32::MAX as usize - 1, 3, &[0, 1, 2]);
        assert!(matches!(result, Err(RenderError::InvalidOperation { .. })));
        assert!(rebase_indices(u32::MAX as usize + 1, 0, &[]).is_err());
    }
}

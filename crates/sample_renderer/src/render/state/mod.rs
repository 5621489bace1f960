//! Render states
//!
//! A render state owns a pipeline and the buffers, textures and descriptor
//! set it draws with. The context asks every registered state to record its
//! draw into each primary command buffer whenever any of them is dirty.
//!
//! Updates are two-phase: a payload tagged with [`UpdateFlags`] is applied to
//! the tagged sub-resources. Same-count payloads are written in place;
//! count changes recreate the buffer and mark the state dirty, because the
//! recorded command buffers still bind the old handle.

mod instanced_model;
mod line_batch;
mod model;
mod skinned_model;

pub use instanced_model::InstancedModelState;
pub use line_batch::{LineBatchState, LineVertex, ViewProjection};
pub use model::{InstanceData, ModelInitData, ModelUniform, ModelUpdate, ModelVertex, TextureImage};
pub use skinned_model::SkinnedModelState;

use ash::vk;
use bitflags::bitflags;

use crate::render::commands::ActiveRenderPass;
use crate::render::device::{GpuDevice, GpuHandle};
use crate::render::shader::ShaderLibrary;
use crate::render::RenderResult;

bitflags! {
    /// Sub-resources carried by an update payload
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct UpdateFlags: u32 {
        /// Vertex data
        const VERTEX = 0x01;
        /// Index data
        const INDEX = 0x02;
        /// Per-instance data
        const INSTANCE = 0x04;
        /// Uniform data
        const UNIFORM = 0x08;
        /// Texture pixels
        const TEXTURE = 0x10;
    }
}

/// Swap-chain-generation objects render states build pipelines against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PassTargets {
    /// Render pass all states draw in
    pub render_pass: GpuHandle,
    /// Current swap chain extent
    pub extent: vk::Extent2D,
    /// Swap chain generation the targets belong to
    pub generation: u64,
}

/// Which variant a render state is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderStateKind {
    /// Colored line segments
    LineBatch,
    /// Fixed geometry drawn once per instance transform
    InstancedModel,
    /// Geometry rebuilt from CPU skinning every frame
    SkinnedModel,
}

/// The closed set of render-state variants
#[derive(Debug)]
pub enum RenderState {
    /// Colored line segments
    LineBatch(LineBatchState),
    /// Instanced textured model
    InstancedModel(InstancedModelState),
    /// CPU-skinned textured model
    SkinnedModel(SkinnedModelState),
}

impl RenderState {
    /// Variant of this state
    pub const fn kind(&self) -> RenderStateKind {
        match self {
            Self::LineBatch(_) => RenderStateKind::LineBatch,
            Self::InstancedModel(_) => RenderStateKind::InstancedModel,
            Self::SkinnedModel(_) => RenderStateKind::SkinnedModel,
        }
    }

    /// Acquire every device resource needed to draw.
    ///
    /// On failure whatever was created is released again and the state must
    /// not be registered.
    pub fn on_init_resources(
        &mut self,
        device: &mut dyn GpuDevice,
        targets: &PassTargets,
        shaders: &ShaderLibrary,
    ) -> RenderResult<()> {
        let result = match self {
            Self::LineBatch(state) => state.init_resources(device, targets, shaders),
            Self::InstancedModel(state) => state.init_resources(device, targets, shaders),
            Self::SkinnedModel(state) => state.init_resources(device, targets, shaders),
        };
        if result.is_err() {
            self.on_release_resources(device);
        }
        result
    }

    /// Release everything acquired by [`RenderState::on_init_resources`]
    pub fn on_release_resources(&mut self, device: &mut dyn GpuDevice) {
        match self {
            Self::LineBatch(state) => state.release_resources(device),
            Self::InstancedModel(state) => state.release_resources(device),
            Self::SkinnedModel(state) => state.release_resources(device),
        }
    }

    /// Record this state's draw into the render pass being recorded
    pub fn on_register_render_pass(&self, pass: &mut ActiveRenderPass<'_, '_>) -> RenderResult<()> {
        match self {
            Self::LineBatch(state) => state.record(pass),
            Self::InstancedModel(state) => state.record(pass),
            Self::SkinnedModel(state) => state.record(pass),
        }
    }

    /// Every command buffer now reflects this state
    pub fn on_render_passes_complete(&mut self) {
        match self {
            Self::LineBatch(state) => state.mark_recorded(),
            Self::InstancedModel(state) => state.mark_recorded(),
            Self::SkinnedModel(state) => state.mark_recorded(),
        }
    }

    /// Rebuild extent-dependent objects after the swap chain changed
    pub fn on_swap_chain_change(
        &mut self,
        device: &mut dyn GpuDevice,
        targets: &PassTargets,
        shaders: &ShaderLibrary,
    ) -> RenderResult<()> {
        match self {
            Self::LineBatch(state) => state.rebuild_pipeline(device, targets, shaders),
            Self::InstancedModel(state) => state.rebuild_pipeline(device, targets, shaders),
            Self::SkinnedModel(state) => state.rebuild_pipeline(device, targets, shaders),
        }
    }

    /// Whether bound resources changed since the last recording
    pub const fn is_dirty(&self) -> bool {
        match self {
            Self::LineBatch(state) => state.is_dirty(),
            Self::InstancedModel(state) => state.is_dirty(),
            Self::SkinnedModel(state) => state.is_dirty(),
        }
    }

    /// The line batch, if this is one
    pub fn as_line_batch_mut(&mut self) -> Option<&mut LineBatchState> {
        match self {
            Self::LineBatch(state) => Some(state),
            _ => None,
        }
    }

    /// The instanced model, if this is one
    pub fn as_instanced_model_mut(&mut self) -> Option<&mut InstancedModelState> {
        match self {
            Self::InstancedModel(state) => Some(state),
            _ => None,
        }
    }

    /// The skinned model, if this is one
    pub fn as_skinned_model_mut(&mut self) -> Option<&mut SkinnedModelState> {
        match self {
            Self::SkinnedModel(state) => Some(state),
            _ => None,
        }
    }
}

impl From<LineBatchState> for RenderState {
    fn from(state: LineBatchState) -> Self {
        Self::LineBatch(state)
    }
}

impl From<InstancedModelState> for RenderState {
    fn from(state: InstancedModelState) -> Self {
        Self::InstancedModel(state)
    }
}

impl From<SkinnedModelState> for RenderState {
    fn from(state: SkinnedModelState) -> Self {
        Self::SkinnedModel(state)
    }
}

//! Render context: swap chain generations, the render-state registry and
//! frame submission

use ash::vk;
use slotmap::SlotMap;

use crate::config::RendererConfig;
use crate::render::commands::CommandRecorder;
use crate::render::device::{AcquireOutcome, ClearValues, GpuDevice, GpuHandle, PresentOutcome};
use crate::render::shader::ShaderLibrary;
use crate::render::state::{PassTargets, RenderState};
use crate::render::{init_stage as stage, RenderError, RenderResult};

slotmap::new_key_type! {
    /// Registry key of a render state
    pub struct RenderStateId;
}

/// Lifecycle of a [`RenderContext`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextState {
    /// Created, no device objects yet
    Uninitialized,
    /// Swap chain built, no frame drawn yet
    Initialized,
    /// Drawing frames
    Rendering,
    /// Rebuilding the swap chain generation
    Recreating,
    /// Everything released
    ShutDown,
}

impl ContextState {
    const fn can_become(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Uninitialized, Self::Initialized)
                | (Self::Initialized | Self::Recreating, Self::Rendering)
                | (Self::Rendering, Self::Recreating)
                | (Self::Uninitialized | Self::Initialized | Self::Rendering | Self::Recreating, Self::ShutDown)
        )
    }
}

/// What [`RenderContext::draw_frame`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// An image was submitted and presented
    Presented,
    /// Nothing was presented; try again next frame
    Skipped,
}

/// Per-image objects of the current swap chain generation
#[derive(Debug, Clone, Copy)]
pub struct FrameTargets<'a> {
    /// One color view per swap chain image
    pub image_views: &'a [GpuHandle],
    /// One framebuffer per image view
    pub framebuffers: &'a [GpuHandle],
    /// One primary command buffer per framebuffer
    pub command_buffers: &'a [GpuHandle],
}

/// Objects rebuilt together whenever the surface changes
#[derive(Debug)]
struct SwapchainGeneration {
    swapchain: GpuHandle,
    image_views: Vec<GpuHandle>,
    extent: vk::Extent2D,
    render_pass: GpuHandle,
    depth_target: GpuHandle,
    framebuffers: Vec<GpuHandle>,
    command_buffers: Vec<GpuHandle>,
}

impl SwapchainGeneration {
    fn destroy(self, device: &mut dyn GpuDevice) {
        for command_buffer in self.command_buffers {
            device.destroy(command_buffer);
        }
        // Framebuffers and pipelines go with the render pass, views with the swap chain.
        device.destroy(self.render_pass);
        device.destroy(self.depth_target);
        device.destroy(self.swapchain);
    }
}

/// Owns the device, the current swap chain generation and every registered
/// render state.
///
/// Command buffers are recorded once and replayed every frame until a state
/// reports dirty, a state is destroyed or the swap chain is rebuilt.
pub struct RenderContext<D: GpuDevice> {
    config: RendererConfig,
    device: D,
    shaders: ShaderLibrary,
    state: ContextState,
    requested_extent: vk::Extent2D,
    resize_pending: bool,
    generation: u64,
    swapchain: Option<SwapchainGeneration>,
    image_available: Option<GpuHandle>,
    render_finished: Option<GpuHandle>,
    states: SlotMap<RenderStateId, RenderState>,
    order: Vec<RenderStateId>,
    needs_recording: bool,
}

impl<D: GpuDevice> RenderContext<D> {
    /// Context over `device`; nothing is created until [`RenderContext::initialize`]
    pub fn new(config: RendererConfig, device: D) -> Self {
        let shaders = ShaderLibrary::new(config.shader_dir.clone());
        let requested_extent = vk::Extent2D {
            width: config.initial_width,
            height: config.initial_height,
        };
        Self {
            config,
            device,
            shaders,
            state: ContextState::Uninitialized,
            requested_extent,
            resize_pending: false,
            generation: 0,
            swapchain: None,
            image_available: None,
            render_finished: None,
            states: SlotMap::with_key(),
            order: Vec::new(),
            needs_recording: true,
        }
    }

    /// Build the first swap chain generation and the frame semaphores.
    ///
    /// Fails at the first stage that fails; the error names the stage.
    pub fn initialize(&mut self) -> RenderResult<()> {
        if self.state != ContextState::Uninitialized {
            return Err(RenderError::InvalidOperation {
                reason: format!("initialize called in state {:?}", self.state),
            });
        }
        log::info!(
            "Initializing render context on {} ({})",
            self.device.backend_name(),
            self.device.adapter_name()
        );

        let generation = self.build_generation(None)?;
        self.swapchain = Some(generation);
        self.image_available = Some(stage("semaphores", self.device.create_semaphore())?);
        self.render_finished = Some(stage("semaphores", self.device.create_semaphore())?);
        log::info!("Created frame semaphores");

        self.transition(ContextState::Initialized)?;
        self.needs_recording = true;
        Ok(())
    }

    /// Rebuild the swap chain and everything depending on it at the current
    /// requested extent, then let every state rebuild its pipeline.
    pub fn recreate_swap_chain(&mut self) -> RenderResult<()> {
        if self.state == ContextState::Initialized {
            self.transition(ContextState::Rendering)?;
        }
        if self.requested_extent.width == 0 || self.requested_extent.height == 0 {
            log::debug!("Surface has zero area, deferring swap chain recreation");
            self.resize_pending = true;
            return Ok(());
        }
        self.transition(ContextState::Recreating)?;
        log::debug!(
            "Recreating swap chain at {}x{}",
            self.requested_extent.width,
            self.requested_extent.height
        );

        self.device.wait_idle()?;
        let old = self.swapchain.take();
        let rebuilt = self.build_generation(old.as_ref().map(|generation| generation.swapchain));
        if let Some(old) = old {
            old.destroy(&mut self.device);
        }
        self.swapchain = Some(rebuilt?);
        self.resize_pending = false;

        let targets = self.pass_targets().ok_or_else(|| RenderError::InvalidOperation {
            reason: "swap chain missing after recreation".to_string(),
        })?;
        for id in &self.order {
            if let Some(state) = self.states.get_mut(*id) {
                state.on_swap_chain_change(&mut self.device, &targets, &self.shaders)?;
            }
        }

        self.needs_recording = true;
        self.transition(ContextState::Rendering)
    }

    /// Windowing notification: the drawable surface is now `width`x`height`.
    ///
    /// A zero-sized surface defers recreation until a usable size arrives.
    pub fn on_resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        self.requested_extent = vk::Extent2D { width, height };
        match self.state {
            ContextState::Initialized | ContextState::Rendering => self.recreate_swap_chain(),
            _ => Ok(()),
        }
    }

    /// Initialize `state` and append it to the registry.
    ///
    /// A state whose resources fail to initialize is released again and not
    /// registered.
    pub fn register_render_state(&mut self, state: impl Into<RenderState>) -> RenderResult<RenderStateId> {
        let mut state = state.into();
        let targets = self.pass_targets().ok_or_else(|| RenderError::InvalidOperation {
            reason: format!("cannot register a render state in state {:?}", self.state),
        })?;

        self.device.wait_idle()?;
        if let Err(err) = state.on_init_resources(&mut self.device, &targets, &self.shaders) {
            log::error!("Failed to initialize {:?} render state: {err}", state.kind());
            return Err(err);
        }

        let kind = state.kind();
        let id = self.states.insert(state);
        self.order.push(id);
        log::debug!("Registered {kind:?} render state");
        Ok(id)
    }

    /// Release a state's resources and drop it from the registry
    pub fn destroy_render_state(&mut self, id: RenderStateId) -> RenderResult<()> {
        if !self.states.contains_key(id) {
            return Err(RenderError::InvalidOperation {
                reason: "render state is not registered".to_string(),
            });
        }

        self.device.wait_idle()?;
        self.order.retain(|registered| *registered != id);
        if let Some(mut state) = self.states.remove(id) {
            state.on_release_resources(&mut self.device);
            log::debug!("Destroyed {:?} render state", state.kind());
        }
        self.needs_recording = true;
        Ok(())
    }

    /// Re-record if needed, then acquire, submit and present one image
    pub fn draw_frame(&mut self) -> RenderResult<FrameStatus> {
        match self.state {
            ContextState::Initialized => self.transition(ContextState::Rendering)?,
            ContextState::Rendering => {}
            other => {
                return Err(RenderError::InvalidOperation {
                    reason: format!("draw_frame called in state {other:?}"),
                })
            }
        }

        if self.resize_pending {
            self.recreate_swap_chain()?;
            if self.resize_pending {
                return Ok(FrameStatus::Skipped);
            }
        }

        if self.needs_recording || self.states.values().any(RenderState::is_dirty) {
            // Cleared only once every command buffer recorded cleanly.
            self.needs_recording = true;
            self.record_command_buffers()?;
        }

        let swapchain = self.swapchain.as_ref().ok_or_else(not_initialized)?.swapchain;
        let image_available = self.image_available.ok_or_else(not_initialized)?;
        let render_finished = self.render_finished.ok_or_else(not_initialized)?;

        let (image_index, suboptimal) = match self.device.acquire_next_image(swapchain, image_available)? {
            AcquireOutcome::Ready {
                image_index,
                suboptimal,
            } => (image_index, suboptimal),
            AcquireOutcome::OutOfDate => {
                log::debug!("Swap chain out of date on acquire");
                self.recreate_swap_chain()?;
                return Ok(FrameStatus::Skipped);
            }
        };

        let command_buffer = self
            .swapchain
            .as_ref()
            .and_then(|generation| generation.command_buffers.get(image_index as usize).copied())
            .ok_or_else(|| RenderError::InvalidOperation {
                reason: format!("acquired image {image_index} has no command buffer"),
            })?;
        self.device.submit(command_buffer, image_available, render_finished)?;

        match self.device.present(swapchain, image_index, render_finished)? {
            PresentOutcome::Presented if !suboptimal => Ok(FrameStatus::Presented),
            PresentOutcome::Presented | PresentOutcome::Suboptimal => {
                log::debug!("Swap chain suboptimal on present");
                self.recreate_swap_chain()?;
                Ok(FrameStatus::Presented)
            }
            PresentOutcome::OutOfDate => {
                log::debug!("Swap chain out of date on present");
                self.recreate_swap_chain()?;
                Ok(FrameStatus::Skipped)
            }
        }
    }

    /// Wait for the device, release every state and the swap chain generation
    pub fn shutdown(&mut self) -> RenderResult<()> {
        if self.state == ContextState::ShutDown {
            return Ok(());
        }
        let idle = self.device.wait_idle();

        for id in std::mem::take(&mut self.order) {
            if let Some(mut state) = self.states.remove(id) {
                state.on_release_resources(&mut self.device);
            }
        }
        if let Some(generation) = self.swapchain.take() {
            generation.destroy(&mut self.device);
        }
        for semaphore in [self.image_available.take(), self.render_finished.take()]
            .into_iter()
            .flatten()
        {
            self.device.destroy(semaphore);
        }

        self.transition(ContextState::ShutDown)?;
        log::info!("Render context shut down");
        idle
    }

    /// Registered state by id
    pub fn state(&self, id: RenderStateId) -> Option<&RenderState> {
        self.states.get(id)
    }

    /// Registered state by id, mutably
    pub fn state_mut(&mut self, id: RenderStateId) -> Option<&mut RenderState> {
        self.states.get_mut(id)
    }

    /// Registered state by id, together with the device to update it through
    pub fn state_and_device_mut(&mut self, id: RenderStateId) -> Option<(&mut RenderState, &mut D)> {
        let device = &mut self.device;
        self.states.get_mut(id).map(|state| (state, device))
    }

    /// Number of registered states
    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    /// Registered states in draw order
    pub fn registration_order(&self) -> &[RenderStateId] {
        &self.order
    }

    /// Number of swap chain generations built so far
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Extent of the current swap chain
    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.swapchain.as_ref().map(|generation| generation.extent)
    }

    /// Per-image objects of the current generation
    pub fn frame_targets(&self) -> Option<FrameTargets<'_>> {
        self.swapchain.as_ref().map(|generation| FrameTargets {
            image_views: &generation.image_views,
            framebuffers: &generation.framebuffers,
            command_buffers: &generation.command_buffers,
        })
    }

    /// What render states build their pipelines against
    pub fn pass_targets(&self) -> Option<PassTargets> {
        self.swapchain.as_ref().map(|generation| PassTargets {
            render_pass: generation.render_pass,
            extent: generation.extent,
            generation: self.generation,
        })
    }

    /// Current lifecycle state
    pub const fn context_state(&self) -> ContextState {
        self.state
    }

    /// Whether the next frame re-records regardless of state dirtiness
    pub const fn needs_recording(&self) -> bool {
        self.needs_recording
    }

    /// Configuration the context was created with
    pub const fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// The device
    pub const fn device(&self) -> &D {
        &self.device
    }

    /// The device, mutably
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    fn transition(&mut self, next: ContextState) -> RenderResult<()> {
        if !self.state.can_become(next) {
            return Err(RenderError::InvalidOperation {
                reason: format!("invalid context transition {:?} -> {next:?}", self.state),
            });
        }
        self.state = next;
        Ok(())
    }

    fn build_generation(&mut self, old: Option<GpuHandle>) -> RenderResult<SwapchainGeneration> {
        let device = &mut self.device;

        let info = stage("swap chain", device.create_swapchain(self.requested_extent, old))?;
        log::info!(
            "Created swap chain: {} images at {}x{}",
            info.image_views.len(),
            info.extent.width,
            info.extent.height
        );

        let mut generation = SwapchainGeneration {
            swapchain: info.swapchain,
            image_views: info.image_views,
            extent: info.extent,
            render_pass: GpuHandle::default(),
            depth_target: GpuHandle::default(),
            framebuffers: Vec::new(),
            command_buffers: Vec::new(),
        };
        // On failure the partially built generation is torn down before returning.
        let result = Self::populate_generation(device, &mut generation, info.format);
        match result {
            Ok(()) => {
                self.generation += 1;
                debug_assert_eq!(generation.command_buffers.len(), generation.framebuffers.len());
                debug_assert_eq!(generation.framebuffers.len(), generation.image_views.len());
                Ok(generation)
            }
            Err(err) => {
                generation.destroy(device);
                Err(err)
            }
        }
    }

    fn populate_generation(
        device: &mut D,
        generation: &mut SwapchainGeneration,
        color_format: vk::Format,
    ) -> RenderResult<()> {
        let depth_format = stage("depth format", device.depth_format())?;
        generation.render_pass = stage("render pass", device.create_render_pass(color_format, depth_format))?;
        log::info!("Created render pass ({color_format:?} + {depth_format:?})");

        generation.depth_target = stage(
            "depth resources",
            device.create_depth_target(depth_format, generation.extent),
        )?;

        for view in &generation.image_views {
            let framebuffer = stage(
                "framebuffers",
                device.create_framebuffer(
                    generation.render_pass,
                    &[*view, generation.depth_target],
                    generation.extent,
                ),
            )?;
            generation.framebuffers.push(framebuffer);
        }
        log::info!("Created {} framebuffers", generation.framebuffers.len());

        let count = u32::try_from(generation.framebuffers.len()).unwrap_or(u32::MAX);
        generation.command_buffers = stage("command buffers", device.allocate_command_buffers(count))?;
        log::info!("Allocated {} command buffers", generation.command_buffers.len());
        Ok(())
    }

    fn record_command_buffers(&mut self) -> RenderResult<()> {
        let generation = self.swapchain.as_ref().ok_or_else(not_initialized)?;
        let clear = ClearValues {
            color: self.config.clear_color,
            depth: self.config.clear_depth,
        };

        for (index, (command_buffer, framebuffer)) in generation
            .command_buffers
            .iter()
            .zip(&generation.framebuffers)
            .enumerate()
        {
            let mut recorder = CommandRecorder::begin(&mut self.device, *command_buffer, index)?;
            let mut pass = recorder.begin_render_pass(generation.render_pass, *framebuffer, generation.extent, clear)?;
            for id in &self.order {
                if let Some(state) = self.states.get(*id) {
                    state.on_register_render_pass(&mut pass)?;
                }
            }
            pass.finish()?;
            recorder.end()?;
        }

        for state in self.states.values_mut() {
            state.on_render_passes_complete();
        }
        self.needs_recording = false;
        log::debug!(
            "Recorded {} command buffers for {} render states",
            generation.command_buffers.len(),
            self.order.len()
        );
        Ok(())
    }
}

impl<D: GpuDevice> Drop for RenderContext<D> {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            log::error!("Render context shutdown failed: {err}");
        }
    }
}

fn not_initialized() -> RenderError {
    RenderError::InvalidOperation {
        reason: "render context is not initialized".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foundation::math::{Mat4, Vec3};
    use crate::render::device::headless::{HeadlessDevice, RecordedCommand};
    use crate::render::primitives;
    use crate::render::shader::tests::fixture_library;
    use crate::render::state::{
        InstanceData, InstancedModelState, LineBatchState, ModelInitData, ModelUpdate, RenderStateKind, TextureImage,
        UpdateFlags,
    };
    use crate::render::Color;

    fn config(tag: &str) -> RendererConfig {
        RendererConfig::default()
            .with_extent(800, 600)
            .with_shader_dir(fixture_library(tag).dir().to_path_buf())
    }

    fn context(tag: &str) -> RenderContext<HeadlessDevice> {
        let mut context = RenderContext::new(config(tag), HeadlessDevice::new());
        context.initialize().unwrap();
        context
    }

    fn boxes(count: usize) -> InstancedModelState {
        let (vertices, indices) = primitives::unit_cube(Color::WHITE);
        InstancedModelState::new(
            ModelInitData::new(vertices, indices)
                .with_instances(vec![InstanceData::new(&Mat4::identity(), Color::RED); count]),
        )
    }

    fn grow_boxes(context: &mut RenderContext<HeadlessDevice>, id: RenderStateId, count: usize) -> RenderResult<()> {
        let instances = vec![InstanceData::new(&Mat4::identity(), Color::GREEN); count];
        let (state, device) = context.state_and_device_mut(id).unwrap();
        state.as_instanced_model_mut().unwrap().update(
            device,
            &ModelUpdate {
                flags: UpdateFlags::INSTANCE,
                instances: &instances,
                ..ModelUpdate::default()
            },
        )
    }

    fn assert_counts_match(context: &RenderContext<HeadlessDevice>) {
        let targets = context.frame_targets().unwrap();
        assert_eq!(targets.command_buffers.len(), targets.framebuffers.len());
        assert_eq!(targets.framebuffers.len(), targets.image_views.len());
    }

    #[test]
    fn test_initialize_builds_one_generation() {
        let context = context("ctx_init");
        assert_eq!(context.context_state(), ContextState::Initialized);
        assert_eq!(context.generation(), 1);
        assert_eq!(context.extent(), Some(vk::Extent2D { width: 800, height: 600 }));
        assert_eq!(context.frame_targets().unwrap().image_views.len(), 3);
        assert_counts_match(&context);
    }

    #[test]
    fn test_initialize_twice_is_rejected() {
        let mut context = context("ctx_twice");
        assert!(context.initialize().is_err());
    }

    #[test]
    fn test_dirty_flag_idempotence() {
        let mut context = context("ctx_dirty");
        context.register_render_state(LineBatchState::new()).unwrap();

        assert_eq!(context.draw_frame().unwrap(), FrameStatus::Presented);
        let recorded = context.device().stats().command_buffers_recorded;
        assert_eq!(recorded, 3);

        assert_eq!(context.draw_frame().unwrap(), FrameStatus::Presented);
        assert_eq!(context.device().stats().command_buffers_recorded, recorded);
        assert_eq!(context.device().stats().presents, 2);
        assert_eq!(context.context_state(), ContextState::Rendering);
    }

    #[test]
    fn test_resize_rebuilds_every_per_image_object() {
        let mut context = context("ctx_resize");
        context.register_render_state(LineBatchState::new()).unwrap();
        context.draw_frame().unwrap();

        let before = context.frame_targets().unwrap();
        let old_views = before.image_views.to_vec();
        let old_framebuffers = before.framebuffers.to_vec();
        let old_command_buffers = before.command_buffers.to_vec();

        context.on_resize(1024, 768).unwrap();
        assert_eq!(context.extent(), Some(vk::Extent2D { width: 1024, height: 768 }));
        assert_counts_match(&context);

        let after = context.frame_targets().unwrap();
        for (old, new) in [
            (&old_views, after.image_views),
            (&old_framebuffers, after.framebuffers),
            (&old_command_buffers, after.command_buffers),
        ] {
            assert!(new.iter().all(|handle| !old.contains(handle)));
            assert!(old.iter().all(|handle| !context.device().is_alive(*handle)));
        }

        assert_eq!(context.draw_frame().unwrap(), FrameStatus::Presented);
        assert_eq!(context.device().stats().swapchains_created, 2);
        assert_eq!(context.generation(), 2);
    }

    #[test]
    fn test_failed_shader_load_is_not_registered() {
        let config = RendererConfig::default().with_shader_dir("/nonexistent/shader/dir");
        let mut context = RenderContext::new(config, HeadlessDevice::new());
        context.initialize().unwrap();
        let live = context.device().live_resources();

        let result = context.register_render_state(LineBatchState::new());
        assert!(matches!(result, Err(RenderError::ShaderLoad { .. })));
        assert_eq!(context.state_count(), 0);
        assert!(context.registration_order().is_empty());
        assert_eq!(context.device().live_resources(), live);
    }

    #[test]
    fn test_states_draw_in_registration_order() {
        let mut context = context("ctx_order");
        let first = context.register_render_state(LineBatchState::new()).unwrap();
        let second = context.register_render_state(LineBatchState::new()).unwrap();
        assert_eq!(context.registration_order(), &[first, second]);

        for (id, count) in [(first, 1), (second, 2)] {
            let (state, device) = context.state_and_device_mut(id).unwrap();
            let batch = state.as_line_batch_mut().unwrap();
            for _ in 0..count {
                batch.add(Vec3::zeros(), Vec3::x(), Color::RED, &Mat4::identity());
            }
            batch.submit(device, None).unwrap();
        }
        context.draw_frame().unwrap();

        let command_buffer = context.frame_targets().unwrap().command_buffers[0];
        let draws: Vec<_> = context
            .device()
            .recorded_commands(command_buffer)
            .unwrap()
            .iter()
            .filter_map(|command| match command {
                RecordedCommand::Draw { vertex_count, .. } => Some(*vertex_count),
                _ => None,
            })
            .collect();
        assert_eq!(draws, vec![2, 4]);
        assert_eq!(context.state(first).map(RenderState::kind), Some(RenderStateKind::LineBatch));
    }

    #[test]
    fn test_destroy_forces_rerecord() {
        let mut context = context("ctx_destroy");
        let id = context.register_render_state(LineBatchState::new()).unwrap();
        context.draw_frame().unwrap();
        assert!(!context.needs_recording());

        context.destroy_render_state(id).unwrap();
        assert!(context.needs_recording());
        assert_eq!(context.state_count(), 0);
        assert!(context.destroy_render_state(id).is_err());

        let recorded = context.device().stats().command_buffers_recorded;
        context.draw_frame().unwrap();
        assert_eq!(context.device().stats().command_buffers_recorded, recorded + 3);
    }

    #[test]
    fn test_submit_failure_is_reported() {
        let mut context = context("ctx_submit");
        context.device_mut().fail_next_submit(vk::Result::ERROR_DEVICE_LOST);
        assert!(matches!(context.draw_frame(), Err(RenderError::DeviceLost)));
        assert_eq!(context.device().stats().presents, 0);
    }

    #[test]
    fn test_out_of_date_acquire_skips_and_recreates() {
        let mut context = context("ctx_acquire");
        context.device_mut().script_acquire(AcquireOutcome::OutOfDate);
        assert_eq!(context.draw_frame().unwrap(), FrameStatus::Skipped);
        assert_eq!(context.generation(), 2);
        assert_eq!(context.draw_frame().unwrap(), FrameStatus::Presented);
    }

    #[test]
    fn test_suboptimal_present_recreates_after_presenting() {
        let mut context = context("ctx_present");
        context.device_mut().script_present(PresentOutcome::Suboptimal);
        assert_eq!(context.draw_frame().unwrap(), FrameStatus::Presented);
        assert_eq!(context.generation(), 2);
    }

    #[test]
    fn test_zero_extent_defers_recreation() {
        let mut context = context("ctx_minimise");
        context.on_resize(0, 0).unwrap();
        assert_eq!(context.draw_frame().unwrap(), FrameStatus::Skipped);
        assert_eq!(context.generation(), 1);

        context.on_resize(640, 480).unwrap();
        assert_eq!(context.draw_frame().unwrap(), FrameStatus::Presented);
        assert_eq!(context.extent(), Some(vk::Extent2D { width: 640, height: 480 }));
    }

    #[test]
    fn test_shutdown_releases_everything() {
        let mut context = context("ctx_shutdown");
        context.register_render_state(LineBatchState::new()).unwrap();
        context.draw_frame().unwrap();

        context.shutdown().unwrap();
        assert_eq!(context.context_state(), ContextState::ShutDown);
        assert_eq!(context.device().live_resources(), 0);
        assert!(context.draw_frame().is_err());
        assert!(context.shutdown().is_ok());
    }

    #[test]
    fn test_partially_failed_update_still_rerecords() {
        let mut context = context("ctx_partial_update");
        let id = context.register_render_state(boxes(2)).unwrap();
        context.draw_frame().unwrap();

        let grown = vec![InstanceData::new(&Mat4::identity(), Color::RED); 5];
        let truncated = TextureImage {
            width: 2,
            height: 2,
            pixels: vec![0; 3],
        };
        let (state, device) = context.state_and_device_mut(id).unwrap();
        let result = state.as_instanced_model_mut().unwrap().update(
            device,
            &ModelUpdate {
                flags: UpdateFlags::INSTANCE | UpdateFlags::TEXTURE,
                instances: &grown,
                texture: Some(&truncated),
                ..ModelUpdate::default()
            },
        );
        assert!(result.is_err());
        assert!(context.state(id).unwrap().is_dirty());

        let recorded = context.device().stats().command_buffers_recorded;
        assert_eq!(context.draw_frame().unwrap(), FrameStatus::Presented);
        assert_eq!(context.device().stats().command_buffers_recorded, recorded + 3);
        assert_eq!(context.draw_frame().unwrap(), FrameStatus::Presented);
    }

    #[test]
    fn test_failed_recording_submits_nothing() {
        let mut context = context("ctx_record_failure");
        let id = context.register_render_state(boxes(1)).unwrap();
        context.draw_frame().unwrap();
        let before = context.device().stats();

        let pipeline = context
            .state_mut(id)
            .and_then(RenderState::as_instanced_model_mut)
            .and_then(|state| state.pipeline())
            .unwrap();
        context.device_mut().destroy(pipeline);
        grow_boxes(&mut context, id, 3).unwrap();

        assert!(context.draw_frame().is_err());
        let after = context.device().stats();
        assert_eq!(after.submissions, before.submissions);
        assert_eq!(after.presents, before.presents);
        assert!(context.needs_recording());
        assert!(context.state(id).unwrap().is_dirty());

        // A rebuilt generation gives the state a live pipeline again.
        context.on_resize(800, 600).unwrap();
        let recorded = context.device().stats().command_buffers_recorded;
        assert_eq!(context.draw_frame().unwrap(), FrameStatus::Presented);
        assert_eq!(context.device().stats().command_buffers_recorded, recorded + 3);
        assert_eq!(context.device().stats().presents, before.presents + 1);
        assert!(!context.needs_recording());
    }
}

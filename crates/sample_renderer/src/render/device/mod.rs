//! Device seam
//!
//! [`GpuDevice`] is the full set of device operations the render context and
//! render states issue. Objects created through it are referenced by
//! generation-tagged [`GpuHandle`]s that the implementation resolves through
//! its [`ResourceArena`](crate::render::resource::ResourceArena).
//!
//! Descriptions use Vulkan's own vocabulary (`vk::Format`, `vk::CullModeFlags`,
//! ...) so the Vulkan backend can pass them straight through.

pub mod headless;
mod upload;

pub use upload::copy_rows;

use ash::vk;

use crate::render::RenderResult;

slotmap::new_key_type! {
    /// Generation-tagged handle to a device object
    pub struct GpuHandle;
}

/// Where a buffer's memory lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLocation {
    /// Device-local memory, written through a staging copy
    DeviceLocal,
    /// Host-visible, host-coherent memory, written directly
    HostVisible,
}

/// A freshly created swap chain and its image views
#[derive(Debug, Clone)]
pub struct SwapchainInfo {
    /// The swap chain itself
    pub swapchain: GpuHandle,
    /// One color view per presentable image
    pub image_views: Vec<GpuHandle>,
    /// Surface format of the images
    pub format: vk::Format,
    /// Extent actually chosen for the images
    pub extent: vk::Extent2D,
}

/// Clear values for the color and depth attachments
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearValues {
    /// Color attachment clear value
    pub color: [f32; 4],
    /// Depth attachment clear value
    pub depth: f32,
}

/// Result of acquiring the next presentable image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// An image is available for rendering
    Ready {
        /// Index into the swap chain images
        image_index: u32,
        /// The swap chain no longer matches the surface exactly
        suboptimal: bool,
    },
    /// The swap chain must be recreated before rendering
    OutOfDate,
}

/// Result of presenting an image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    /// Presented normally
    Presented,
    /// Presented, but the swap chain should be recreated
    Suboptimal,
    /// Not presented; the swap chain must be recreated
    OutOfDate,
}

/// Vertex buffer binding of a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexBinding {
    /// Binding slot
    pub binding: u32,
    /// Size of one element in bytes
    pub stride: u32,
    /// Per-vertex or per-instance stepping
    pub input_rate: vk::VertexInputRate,
}

/// Vertex attribute read from a binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexAttribute {
    /// Shader input location
    pub location: u32,
    /// Binding the attribute is read from
    pub binding: u32,
    /// Attribute format
    pub format: vk::Format,
    /// Byte offset within the element
    pub offset: u32,
}

/// One binding of a descriptor set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorBinding {
    /// Binding slot
    pub binding: u32,
    /// Descriptor type
    pub descriptor_type: vk::DescriptorType,
    /// Shader stages that read the binding
    pub stages: vk::ShaderStageFlags,
}

/// Resource written into a descriptor set binding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorWrite {
    /// Uniform buffer covering `range` bytes from the start
    UniformBuffer {
        /// Binding slot
        binding: u32,
        /// Buffer handle
        buffer: GpuHandle,
        /// Bytes visible to the shader
        range: u64,
    },
    /// Texture sampled through its own sampler
    CombinedImageSampler {
        /// Binding slot
        binding: u32,
        /// Texture handle
        texture: GpuHandle,
    },
}

/// Fixed-function and shader state of a graphics pipeline
#[derive(Debug, Clone)]
pub struct PipelineDesc<'a> {
    /// Render pass the pipeline draws in
    pub render_pass: GpuHandle,
    /// Viewport and scissor extent
    pub extent: vk::Extent2D,
    /// Vertex shader module
    pub vertex_shader: GpuHandle,
    /// Fragment shader module
    pub fragment_shader: GpuHandle,
    /// Vertex buffer bindings
    pub bindings: &'a [VertexBinding],
    /// Vertex attributes
    pub attributes: &'a [VertexAttribute],
    /// Primitive topology
    pub topology: vk::PrimitiveTopology,
    /// Faces to cull
    pub cull_mode: vk::CullModeFlags,
    /// Winding of front faces
    pub front_face: vk::FrontFace,
    /// Test fragments against the depth buffer
    pub depth_test: bool,
    /// Write fragment depth into the depth buffer
    pub depth_write: bool,
    /// Layout of the single descriptor set the pipeline reads
    pub descriptor_set_layout: GpuHandle,
}

/// Device operations used by the render context and render states.
///
/// Single-threaded: every call happens on the rendering thread. Handles
/// returned by one device are meaningless to another.
pub trait GpuDevice {
    /// Short name of the backend, e.g. "Vulkan"
    fn backend_name(&self) -> &'static str;

    /// Name of the selected adapter
    fn adapter_name(&self) -> &str;

    /// Block until the device has finished all submitted work
    fn wait_idle(&mut self) -> RenderResult<()>;

    /// Create a swap chain for the surface.
    ///
    /// `requested` is used when the surface leaves the extent to the
    /// application. Passing `old` lets the driver recycle its images; the
    /// caller still destroys the old swap chain afterwards.
    fn create_swapchain(
        &mut self,
        requested: vk::Extent2D,
        old: Option<GpuHandle>,
    ) -> RenderResult<SwapchainInfo>;

    /// First depth format usable as a depth-stencil attachment
    fn depth_format(&self) -> RenderResult<vk::Format>;

    /// Create the forward render pass: one color attachment presented after
    /// the pass, one depth attachment, one subpass
    fn create_render_pass(&mut self, color: vk::Format, depth: vk::Format) -> RenderResult<GpuHandle>;

    /// Create a depth image, its memory and its view
    fn create_depth_target(&mut self, format: vk::Format, extent: vk::Extent2D) -> RenderResult<GpuHandle>;

    /// Create a framebuffer over `attachments` (color view, depth target)
    fn create_framebuffer(
        &mut self,
        render_pass: GpuHandle,
        attachments: &[GpuHandle],
        extent: vk::Extent2D,
    ) -> RenderResult<GpuHandle>;

    /// Allocate primary command buffers from the device's command pool
    fn allocate_command_buffers(&mut self, count: u32) -> RenderResult<Vec<GpuHandle>>;

    /// Create a binary semaphore
    fn create_semaphore(&mut self) -> RenderResult<GpuHandle>;

    /// Create a buffer of `size` bytes
    fn create_buffer(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> RenderResult<GpuHandle>;

    /// Write bytes at the start of a host-visible buffer
    fn write_buffer(&mut self, buffer: GpuHandle, data: &[u8]) -> RenderResult<()>;

    /// Copy `size` bytes between buffers and wait for completion
    fn copy_buffer(&mut self, src: GpuHandle, dst: GpuHandle, size: u64) -> RenderResult<()>;

    /// Create a sampled RGBA8 texture from tightly packed row-major pixels
    fn create_texture(&mut self, width: u32, height: u32, pixels: &[u8]) -> RenderResult<GpuHandle>;

    /// Overwrite a texture's pixels; the size must match the texture
    fn update_texture(&mut self, texture: GpuHandle, pixels: &[u8]) -> RenderResult<()>;

    /// Create a shader module from SPIR-V words
    fn create_shader_module(&mut self, code: &[u32]) -> RenderResult<GpuHandle>;

    /// Create a descriptor set layout
    fn create_descriptor_set_layout(&mut self, bindings: &[DescriptorBinding]) -> RenderResult<GpuHandle>;

    /// Allocate one descriptor set (and the pool backing it) for `layout`
    fn create_descriptor_set(
        &mut self,
        layout: GpuHandle,
        bindings: &[DescriptorBinding],
    ) -> RenderResult<GpuHandle>;

    /// Point descriptor set bindings at resources
    fn write_descriptor_set(&mut self, set: GpuHandle, writes: &[DescriptorWrite]) -> RenderResult<()>;

    /// Create a graphics pipeline and its layout
    fn create_graphics_pipeline(&mut self, desc: &PipelineDesc<'_>) -> RenderResult<GpuHandle>;

    /// Destroy an object and everything created on top of it.
    ///
    /// Stale handles are ignored.
    fn destroy(&mut self, handle: GpuHandle);

    /// Whether the handle still refers to a live object
    fn is_alive(&self, handle: GpuHandle) -> bool;

    /// Begin recording a command buffer, discarding previous contents
    fn begin_commands(&mut self, command_buffer: GpuHandle) -> RenderResult<()>;

    /// Begin the render pass on a framebuffer
    fn cmd_begin_render_pass(
        &mut self,
        command_buffer: GpuHandle,
        render_pass: GpuHandle,
        framebuffer: GpuHandle,
        extent: vk::Extent2D,
        clear: ClearValues,
    ) -> RenderResult<()>;

    /// Bind a graphics pipeline
    fn cmd_bind_pipeline(&mut self, command_buffer: GpuHandle, pipeline: GpuHandle) -> RenderResult<()>;

    /// Bind vertex buffers to consecutive bindings starting at `first_binding`
    fn cmd_bind_vertex_buffers(
        &mut self,
        command_buffer: GpuHandle,
        first_binding: u32,
        buffers: &[GpuHandle],
    ) -> RenderResult<()>;

    /// Bind a `u32` index buffer
    fn cmd_bind_index_buffer(&mut self, command_buffer: GpuHandle, buffer: GpuHandle) -> RenderResult<()>;

    /// Bind the pipeline's descriptor set
    fn cmd_bind_descriptor_set(
        &mut self,
        command_buffer: GpuHandle,
        pipeline: GpuHandle,
        set: GpuHandle,
    ) -> RenderResult<()>;

    /// Non-indexed draw
    fn cmd_draw(&mut self, command_buffer: GpuHandle, vertex_count: u32, instance_count: u32) -> RenderResult<()>;

    /// Indexed draw
    fn cmd_draw_indexed(
        &mut self,
        command_buffer: GpuHandle,
        index_count: u32,
        instance_count: u32,
    ) -> RenderResult<()>;

    /// End the render pass
    fn cmd_end_render_pass(&mut self, command_buffer: GpuHandle) -> RenderResult<()>;

    /// Finish recording a command buffer
    fn end_commands(&mut self, command_buffer: GpuHandle) -> RenderResult<()>;

    /// Acquire the next presentable image, blocking without timeout
    fn acquire_next_image(&mut self, swapchain: GpuHandle, signal: GpuHandle) -> RenderResult<AcquireOutcome>;

    /// Submit a command buffer to the graphics queue
    fn submit(&mut self, command_buffer: GpuHandle, wait: GpuHandle, signal: GpuHandle) -> RenderResult<()>;

    /// Present an image once `wait` is signalled
    fn present(&mut self, swapchain: GpuHandle, image_index: u32, wait: GpuHandle) -> RenderResult<PresentOutcome>;
}

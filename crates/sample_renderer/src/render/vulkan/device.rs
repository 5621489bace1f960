use ash::extensions::khr::Surface;
use ash::vk;

use super::instance::{LogicalDevice, PhysicalDeviceInfo, VulkanInstance};
use super::memory::{self, ImageDesc};
use super::pipeline::{self, PipelineObjects};
use super::swapchain::{choose_extent, choose_image_count, choose_present_mode, choose_surface_format};
use super::window::Window;
use crate::config::RendererConfig;
use crate::render::device::{
    copy_rows, AcquireOutcome, ClearValues, DescriptorBinding, DescriptorWrite, GpuDevice, GpuHandle,
    MemoryLocation, PipelineDesc, PresentOutcome, SwapchainInfo,
};
use crate::render::resource::{DeviceHandle, ResourceArena};
use crate::render::{init_stage as stage, RenderError, RenderResult};

const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;

const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

enum VkResource {
    Swapchain(vk::SwapchainKHR),
    ImageView(vk::ImageView),
    RenderPass(vk::RenderPass),
    DepthTarget {
        image: vk::Image,
        memory: vk::DeviceMemory,
        view: vk::ImageView,
    },
    Framebuffer(vk::Framebuffer),
    CommandBuffer(vk::CommandBuffer),
    Semaphore(vk::Semaphore),
    Buffer {
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
        size: vk::DeviceSize,
        host_visible: bool,
    },
    Texture {
        image: vk::Image,
        memory: vk::DeviceMemory,
        view: vk::ImageView,
        sampler: vk::Sampler,
        width: u32,
        height: u32,
    },
    ShaderModule(vk::ShaderModule),
    DescriptorSetLayout(vk::DescriptorSetLayout),
    DescriptorSet {
        pool: vk::DescriptorPool,
        set: vk::DescriptorSet,
    },
    Pipeline {
        pipeline: vk::Pipeline,
        layout: vk::PipelineLayout,
    },
}

impl VkResource {
    const fn kind(&self) -> &'static str {
        match self {
            Self::Swapchain(_) => "swap chain",
            Self::ImageView(_) => "image view",
            Self::RenderPass(_) => "render pass",
            Self::DepthTarget { .. } => "depth target",
            Self::Framebuffer(_) => "framebuffer",
            Self::CommandBuffer(_) => "command buffer",
            Self::Semaphore(_) => "semaphore",
            Self::Buffer { .. } => "buffer",
            Self::Texture { .. } => "texture",
            Self::ShaderModule(_) => "shader module",
            Self::DescriptorSetLayout(_) => "descriptor set layout",
            Self::DescriptorSet { .. } => "descriptor set",
            Self::Pipeline { .. } => "pipeline",
        }
    }
}

fn wrong_kind(expected: &str, found: &VkResource) -> RenderError {
    RenderError::InvalidOperation {
        reason: format!("expected a {expected}, handle refers to a {}", found.kind()),
    }
}

/// [`GpuDevice`] backed by a Vulkan adapter presenting to a GLFW window.
///
/// The window must outlive the device: the surface is created from it.
/// Frames are paced by waiting for the present queue after every present, so
/// at most one frame is in flight.
pub struct VulkanDevice {
    resources: ResourceArena<VkResource>,
    command_pool: vk::CommandPool,
    logical: LogicalDevice,
    physical: PhysicalDeviceInfo,
    surface: DeviceHandle<vk::SurfaceKHR>,
    surface_loader: Surface,
    instance: VulkanInstance,
    prefer_mailbox: bool,
    adapter_name: String,
}

impl VulkanDevice {
    /// Create instance, surface and logical device for `window`
    pub fn new(config: &RendererConfig, window: &mut Window) -> RenderResult<Self> {
        let instance = stage(
            "instance",
            VulkanInstance::new(window, &config.application_name, config.enable_validation),
        )?;
        log::info!(
            "Vulkan instance created (validation {})",
            if instance.validation_enabled() { "on" } else { "off" }
        );

        let surface_loader = Surface::new(&instance.entry, &instance.instance);
        let raw_surface = stage("surface", window.create_surface(instance.instance.handle()))?;
        let loader = surface_loader.clone();
        let surface = DeviceHandle::with_handle(raw_surface, move |surface| unsafe {
            loader.destroy_surface(surface, None);
        });

        let physical = stage(
            "physical device",
            PhysicalDeviceInfo::select_suitable_device(&instance.instance, surface.read(), &surface_loader),
        )?;
        let logical = stage("logical device", LogicalDevice::new(&instance.instance, &physical))?;

        let mut device = Self {
            resources: ResourceArena::new(),
            command_pool: vk::CommandPool::null(),
            logical,
            adapter_name: physical.name(),
            physical,
            surface,
            surface_loader,
            instance,
            prefer_mailbox: config.prefer_mailbox,
        };
        device.command_pool = stage("command pool", device.create_command_pool())?;
        Ok(device)
    }

    fn create_command_pool(&self) -> RenderResult<vk::CommandPool> {
        let create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(self.physical.graphics_family);
        Ok(unsafe { self.logical.device.create_command_pool(&create_info, None)? })
    }

    fn resolve(&self, handle: GpuHandle) -> RenderResult<&VkResource> {
        self.resources.get(handle).ok_or(RenderError::ResourceNotFound { handle })
    }

    fn command_buffer(&self, handle: GpuHandle) -> RenderResult<vk::CommandBuffer> {
        match self.resolve(handle)? {
            VkResource::CommandBuffer(cb) => Ok(*cb),
            other => Err(wrong_kind("command buffer", other)),
        }
    }

    fn semaphore(&self, handle: GpuHandle) -> RenderResult<vk::Semaphore> {
        match self.resolve(handle)? {
            VkResource::Semaphore(semaphore) => Ok(*semaphore),
            other => Err(wrong_kind("semaphore", other)),
        }
    }

    fn swapchain(&self, handle: GpuHandle) -> RenderResult<vk::SwapchainKHR> {
        match self.resolve(handle)? {
            VkResource::Swapchain(swapchain) => Ok(*swapchain),
            other => Err(wrong_kind("swap chain", other)),
        }
    }

    fn render_pass(&self, handle: GpuHandle) -> RenderResult<vk::RenderPass> {
        match self.resolve(handle)? {
            VkResource::RenderPass(render_pass) => Ok(*render_pass),
            other => Err(wrong_kind("render pass", other)),
        }
    }

    fn shader_module(&self, handle: GpuHandle) -> RenderResult<vk::ShaderModule> {
        match self.resolve(handle)? {
            VkResource::ShaderModule(module) => Ok(*module),
            other => Err(wrong_kind("shader module", other)),
        }
    }

    fn set_layout(&self, handle: GpuHandle) -> RenderResult<vk::DescriptorSetLayout> {
        match self.resolve(handle)? {
            VkResource::DescriptorSetLayout(layout) => Ok(*layout),
            other => Err(wrong_kind("descriptor set layout", other)),
        }
    }

    fn buffer(&self, handle: GpuHandle) -> RenderResult<vk::Buffer> {
        match self.resolve(handle)? {
            VkResource::Buffer { buffer, .. } => Ok(*buffer),
            other => Err(wrong_kind("buffer", other)),
        }
    }

    fn pipeline(&self, handle: GpuHandle) -> RenderResult<(vk::Pipeline, vk::PipelineLayout)> {
        match self.resolve(handle)? {
            VkResource::Pipeline { pipeline, layout } => Ok((*pipeline, *layout)),
            other => Err(wrong_kind("pipeline", other)),
        }
    }

    /// Color view or depth view usable as a framebuffer attachment
    fn attachment_view(&self, handle: GpuHandle) -> RenderResult<vk::ImageView> {
        match self.resolve(handle)? {
            VkResource::ImageView(view) | VkResource::DepthTarget { view, .. } => Ok(*view),
            other => Err(wrong_kind("image view or depth target", other)),
        }
    }

    /// Copy pixels into `image` through a linear staging image, leaving it
    /// ready for sampling
    fn upload_pixels(
        &self,
        image: vk::Image,
        extent: vk::Extent2D,
        current_layout: vk::ImageLayout,
        pixels: &[u8],
    ) -> RenderResult<()> {
        let device = &self.logical.device;
        let (staging, staging_memory) = memory::create_image(
            device,
            &self.physical.memory_properties,
            &ImageDesc {
                format: TEXTURE_FORMAT,
                extent,
                tiling: vk::ImageTiling::LINEAR,
                usage: vk::ImageUsageFlags::TRANSFER_SRC,
                properties: vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                initial_layout: vk::ImageLayout::PREINITIALIZED,
            },
        )?;

        let result = self.fill_staging(staging, staging_memory, extent, pixels).and_then(|()| {
            memory::submit_one_shot(device, self.command_pool, self.logical.graphics_queue, |cb| {
                memory::cmd_transition_color_image(
                    device,
                    cb,
                    staging,
                    vk::ImageLayout::PREINITIALIZED,
                    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                );
                memory::cmd_transition_color_image(
                    device,
                    cb,
                    image,
                    current_layout,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                );
                memory::cmd_copy_color_image(device, cb, staging, image, extent);
                memory::cmd_transition_color_image(
                    device,
                    cb,
                    image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                );
            })
        });

        unsafe {
            device.destroy_image(staging, None);
            device.free_memory(staging_memory, None);
        }
        result
    }

    fn fill_staging(
        &self,
        staging: vk::Image,
        staging_memory: vk::DeviceMemory,
        extent: vk::Extent2D,
        pixels: &[u8],
    ) -> RenderResult<()> {
        let device = &self.logical.device;
        let subresource = vk::ImageSubresource {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            mip_level: 0,
            array_layer: 0,
        };
        let layout = unsafe { device.get_image_subresource_layout(staging, subresource) };
        let (offset, size, row_pitch) = (
            usize::try_from(layout.offset),
            usize::try_from(layout.size),
            usize::try_from(layout.row_pitch),
        );
        let (Ok(offset), Ok(size), Ok(row_pitch)) = (offset, size, row_pitch) else {
            return Err(RenderError::OutOfMemory { requested: layout.size });
        };

        let mapped = unsafe { device.map_memory(staging_memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())? };
        let dst = unsafe { std::slice::from_raw_parts_mut(mapped.cast::<u8>().add(offset), size) };
        let copied = copy_rows(pixels, extent.width, extent.height, row_pitch, dst);
        unsafe { device.unmap_memory(staging_memory) };
        copied
    }

    fn destroy_resource(&self, resource: VkResource) {
        let device = &self.logical.device;
        unsafe {
            match resource {
                VkResource::Swapchain(swapchain) => self.logical.swapchain_loader.destroy_swapchain(swapchain, None),
                VkResource::ImageView(view) => device.destroy_image_view(view, None),
                VkResource::RenderPass(render_pass) => device.destroy_render_pass(render_pass, None),
                VkResource::DepthTarget { image, memory, view } => {
                    device.destroy_image_view(view, None);
                    device.destroy_image(image, None);
                    device.free_memory(memory, None);
                }
                VkResource::Framebuffer(framebuffer) => device.destroy_framebuffer(framebuffer, None),
                VkResource::CommandBuffer(cb) => device.free_command_buffers(self.command_pool, &[cb]),
                VkResource::Semaphore(semaphore) => device.destroy_semaphore(semaphore, None),
                VkResource::Buffer { buffer, memory, .. } => {
                    device.destroy_buffer(buffer, None);
                    device.free_memory(memory, None);
                }
                VkResource::Texture {
                    image,
                    memory,
                    view,
                    sampler,
                    ..
                } => {
                    device.destroy_sampler(sampler, None);
                    device.destroy_image_view(view, None);
                    device.destroy_image(image, None);
                    device.free_memory(memory, None);
                }
                VkResource::ShaderModule(module) => device.destroy_shader_module(module, None),
                VkResource::DescriptorSetLayout(layout) => device.destroy_descriptor_set_layout(layout, None),
                VkResource::DescriptorSet { pool, .. } => device.destroy_descriptor_pool(pool, None),
                VkResource::Pipeline { pipeline, layout } => {
                    device.destroy_pipeline(pipeline, None);
                    device.destroy_pipeline_layout(layout, None);
                }
            }
        }
    }
}

impl GpuDevice for VulkanDevice {
    fn backend_name(&self) -> &'static str {
        "Vulkan"
    }

    fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn wait_idle(&mut self) -> RenderResult<()> {
        unsafe { self.logical.device.device_wait_idle()? };
        Ok(())
    }

    fn create_swapchain(&mut self, requested: vk::Extent2D, old: Option<GpuHandle>) -> RenderResult<SwapchainInfo> {
        let old_swapchain = match old {
            Some(handle) => self.swapchain(handle)?,
            None => vk::SwapchainKHR::null(),
        };
        let physical_device = self.physical.device;
        let surface = self.surface.read();

        let (caps, formats, modes) = unsafe {
            (
                self.surface_loader
                    .get_physical_device_surface_capabilities(physical_device, surface)?,
                self.surface_loader
                    .get_physical_device_surface_formats(physical_device, surface)?,
                self.surface_loader
                    .get_physical_device_surface_present_modes(physical_device, surface)?,
            )
        };

        let format = choose_surface_format(&formats).ok_or_else(|| RenderError::InvalidOperation {
            reason: "surface reports no formats".to_string(),
        })?;
        let present_mode = choose_present_mode(&modes, self.prefer_mailbox);
        let extent = choose_extent(&caps, requested);
        if extent.width == 0 || extent.height == 0 {
            return Err(RenderError::InvalidOperation {
                reason: "cannot create a swap chain for a zero-sized surface".to_string(),
            });
        }
        let image_count = choose_image_count(&caps);

        let families = [self.physical.graphics_family, self.physical.present_family];
        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);
        let create_info = if families[0] == families[1] {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        } else {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&families)
        };

        let loader = &self.logical.swapchain_loader;
        let raw_swapchain = unsafe { loader.create_swapchain(&create_info, None)? };
        let swapchain = self.resources.insert(VkResource::Swapchain(raw_swapchain), &[]);

        let images = match unsafe { loader.get_swapchain_images(raw_swapchain) } {
            Ok(images) => images,
            Err(err) => {
                self.destroy(swapchain);
                return Err(err.into());
            }
        };

        let mut image_views = Vec::with_capacity(images.len());
        for image in images {
            match memory::create_image_view(&self.logical.device, image, format.format, vk::ImageAspectFlags::COLOR) {
                Ok(view) => image_views.push(self.resources.insert(VkResource::ImageView(view), &[swapchain])),
                Err(err) => {
                    self.destroy(swapchain);
                    return Err(err);
                }
            }
        }

        log::debug!(
            "Swap chain {}x{} with {} images, {:?} {:?}",
            extent.width,
            extent.height,
            image_views.len(),
            format.format,
            present_mode
        );
        Ok(SwapchainInfo {
            swapchain,
            image_views,
            format: format.format,
            extent,
        })
    }

    fn depth_format(&self) -> RenderResult<vk::Format> {
        DEPTH_CANDIDATES
            .into_iter()
            .find(|&format| {
                let props = unsafe {
                    self.instance
                        .instance
                        .get_physical_device_format_properties(self.physical.device, format)
                };
                props
                    .optimal_tiling_features
                    .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
            })
            .ok_or_else(|| RenderError::InvalidOperation {
                reason: "no supported depth format".to_string(),
            })
    }

    fn create_render_pass(&mut self, color: vk::Format, depth: vk::Format) -> RenderResult<GpuHandle> {
        let render_pass = pipeline::create_render_pass(&self.logical.device, color, depth)?;
        Ok(self.resources.insert(VkResource::RenderPass(render_pass), &[]))
    }

    fn create_depth_target(&mut self, format: vk::Format, extent: vk::Extent2D) -> RenderResult<GpuHandle> {
        let device = &self.logical.device;
        let (image, memory) = memory::create_image(
            device,
            &self.physical.memory_properties,
            &ImageDesc {
                format,
                extent,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
                properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                initial_layout: vk::ImageLayout::UNDEFINED,
            },
        )?;
        let view = match memory::create_image_view(device, image, format, vk::ImageAspectFlags::DEPTH) {
            Ok(view) => view,
            Err(err) => {
                unsafe {
                    device.destroy_image(image, None);
                    device.free_memory(memory, None);
                }
                return Err(err);
            }
        };
        Ok(self
            .resources
            .insert(VkResource::DepthTarget { image, memory, view }, &[]))
    }

    fn create_framebuffer(
        &mut self,
        render_pass: GpuHandle,
        attachments: &[GpuHandle],
        extent: vk::Extent2D,
    ) -> RenderResult<GpuHandle> {
        let raw_render_pass = self.render_pass(render_pass)?;
        let views = attachments
            .iter()
            .map(|&handle| self.attachment_view(handle))
            .collect::<RenderResult<Vec<_>>>()?;

        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(raw_render_pass)
            .attachments(&views)
            .width(extent.width)
            .height(extent.height)
            .layers(1);
        let framebuffer = unsafe { self.logical.device.create_framebuffer(&create_info, None)? };

        let mut parents = vec![render_pass];
        parents.extend_from_slice(attachments);
        Ok(self.resources.insert(VkResource::Framebuffer(framebuffer), &parents))
    }

    fn allocate_command_buffers(&mut self, count: u32) -> RenderResult<Vec<GpuHandle>> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        let command_buffers = unsafe { self.logical.device.allocate_command_buffers(&allocate_info)? };
        Ok(command_buffers
            .into_iter()
            .map(|cb| self.resources.insert(VkResource::CommandBuffer(cb), &[]))
            .collect())
    }

    fn create_semaphore(&mut self) -> RenderResult<GpuHandle> {
        let create_info = vk::SemaphoreCreateInfo::builder();
        let semaphore = unsafe { self.logical.device.create_semaphore(&create_info, None)? };
        Ok(self.resources.insert(VkResource::Semaphore(semaphore), &[]))
    }

    fn create_buffer(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> RenderResult<GpuHandle> {
        if size == 0 {
            return Err(RenderError::InvalidOperation {
                reason: "buffers must not be empty".to_string(),
            });
        }
        let properties = match location {
            MemoryLocation::DeviceLocal => vk::MemoryPropertyFlags::DEVICE_LOCAL,
            MemoryLocation::HostVisible => {
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            }
        };
        let (buffer, memory) =
            memory::create_buffer(&self.logical.device, &self.physical.memory_properties, size, usage, properties)?;
        Ok(self.resources.insert(
            VkResource::Buffer {
                buffer,
                memory,
                size,
                host_visible: location == MemoryLocation::HostVisible,
            },
            &[],
        ))
    }

    fn write_buffer(&mut self, buffer: GpuHandle, data: &[u8]) -> RenderResult<()> {
        let (memory, size) = match self.resolve(buffer)? {
            VkResource::Buffer {
                memory,
                size,
                host_visible: true,
                ..
            } => (*memory, *size),
            VkResource::Buffer { .. } => {
                return Err(RenderError::InvalidOperation {
                    reason: "device-local buffers cannot be mapped".to_string(),
                })
            }
            other => return Err(wrong_kind("buffer", other)),
        };
        if data.len() as u64 > size {
            return Err(RenderError::InvalidOperation {
                reason: format!("write of {} bytes into a {size} byte buffer", data.len()),
            });
        }

        let device = &self.logical.device;
        unsafe {
            let mapped = device.map_memory(memory, 0, size, vk::MemoryMapFlags::empty())?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), mapped.cast::<u8>(), data.len());
            device.unmap_memory(memory);
        }
        Ok(())
    }

    fn copy_buffer(&mut self, src: GpuHandle, dst: GpuHandle, size: u64) -> RenderResult<()> {
        let (src, dst) = (self.buffer(src)?, self.buffer(dst)?);
        let device = &self.logical.device;
        memory::submit_one_shot(device, self.command_pool, self.logical.graphics_queue, |cb| {
            let region = vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size,
            };
            unsafe { device.cmd_copy_buffer(cb, src, dst, &[region]) };
        })
    }

    fn create_texture(&mut self, width: u32, height: u32, pixels: &[u8]) -> RenderResult<GpuHandle> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(RenderError::InvalidOperation {
                reason: format!(
                    "texture data is {} bytes, expected {width}x{height} RGBA8 ({expected} bytes)",
                    pixels.len()
                ),
            });
        }

        let extent = vk::Extent2D { width, height };
        let device = &self.logical.device;
        let (image, memory) = memory::create_image(
            device,
            &self.physical.memory_properties,
            &ImageDesc {
                format: TEXTURE_FORMAT,
                extent,
                tiling: vk::ImageTiling::OPTIMAL,
                usage: vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
                properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
                initial_layout: vk::ImageLayout::UNDEFINED,
            },
        )?;

        let view_and_sampler = self
            .upload_pixels(image, extent, vk::ImageLayout::UNDEFINED, pixels)
            .and_then(|()| memory::create_image_view(device, image, TEXTURE_FORMAT, vk::ImageAspectFlags::COLOR))
            .and_then(|view| {
                let sampler_info = vk::SamplerCreateInfo::builder()
                    .mag_filter(vk::Filter::LINEAR)
                    .min_filter(vk::Filter::LINEAR)
                    .address_mode_u(vk::SamplerAddressMode::REPEAT)
                    .address_mode_v(vk::SamplerAddressMode::REPEAT)
                    .address_mode_w(vk::SamplerAddressMode::REPEAT)
                    .anisotropy_enable(false)
                    .max_anisotropy(1.0)
                    .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
                    .unnormalized_coordinates(false)
                    .compare_enable(false)
                    .compare_op(vk::CompareOp::ALWAYS)
                    .mipmap_mode(vk::SamplerMipmapMode::LINEAR);
                match unsafe { device.create_sampler(&sampler_info, None) } {
                    Ok(sampler) => Ok((view, sampler)),
                    Err(err) => {
                        unsafe { device.destroy_image_view(view, None) };
                        Err(err.into())
                    }
                }
            });

        match view_and_sampler {
            Ok((view, sampler)) => Ok(self.resources.insert(
                VkResource::Texture {
                    image,
                    memory,
                    view,
                    sampler,
                    width,
                    height,
                },
                &[],
            )),
            Err(err) => {
                unsafe {
                    device.destroy_image(image, None);
                    device.free_memory(memory, None);
                }
                Err(err)
            }
        }
    }

    fn update_texture(&mut self, texture: GpuHandle, pixels: &[u8]) -> RenderResult<()> {
        let (image, width, height) = match self.resolve(texture)? {
            VkResource::Texture {
                image, width, height, ..
            } => (*image, *width, *height),
            other => return Err(wrong_kind("texture", other)),
        };
        self.upload_pixels(
            image,
            vk::Extent2D { width, height },
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            pixels,
        )
    }

    fn create_shader_module(&mut self, code: &[u32]) -> RenderResult<GpuHandle> {
        if code.is_empty() {
            return Err(RenderError::InvalidOperation {
                reason: "empty shader module".to_string(),
            });
        }
        let create_info = vk::ShaderModuleCreateInfo::builder().code(code);
        let module = unsafe { self.logical.device.create_shader_module(&create_info, None)? };
        Ok(self.resources.insert(VkResource::ShaderModule(module), &[]))
    }

    fn create_descriptor_set_layout(&mut self, bindings: &[DescriptorBinding]) -> RenderResult<GpuHandle> {
        let raw_bindings: Vec<vk::DescriptorSetLayoutBinding> = bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(b.binding)
                    .descriptor_type(b.descriptor_type)
                    .descriptor_count(1)
                    .stage_flags(b.stages)
                    .build()
            })
            .collect();
        let create_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&raw_bindings);
        let layout = unsafe { self.logical.device.create_descriptor_set_layout(&create_info, None)? };
        Ok(self.resources.insert(VkResource::DescriptorSetLayout(layout), &[]))
    }

    fn create_descriptor_set(&mut self, layout: GpuHandle, bindings: &[DescriptorBinding]) -> RenderResult<GpuHandle> {
        let raw_layout = self.set_layout(layout)?;
        let device = &self.logical.device;

        let mut pool_sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
        for binding in bindings {
            match pool_sizes.iter_mut().find(|size| size.ty == binding.descriptor_type) {
                Some(size) => size.descriptor_count += 1,
                None => pool_sizes.push(vk::DescriptorPoolSize {
                    ty: binding.descriptor_type,
                    descriptor_count: 1,
                }),
            }
        }
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(1);
        let pool = unsafe { device.create_descriptor_pool(&pool_info, None)? };

        let set_layouts = [raw_layout];
        let allocate_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&set_layouts);
        let set = match unsafe { device.allocate_descriptor_sets(&allocate_info) } {
            Ok(sets) => sets[0],
            Err(err) => {
                unsafe { device.destroy_descriptor_pool(pool, None) };
                return Err(err.into());
            }
        };
        Ok(self
            .resources
            .insert(VkResource::DescriptorSet { pool, set }, &[layout]))
    }

    fn write_descriptor_set(&mut self, set: GpuHandle, writes: &[DescriptorWrite]) -> RenderResult<()> {
        let raw_set = match self.resolve(set)? {
            VkResource::DescriptorSet { set, .. } => *set,
            other => return Err(wrong_kind("descriptor set", other)),
        };

        // Infos must stay put while the write structs point into them.
        let mut buffer_infos = Vec::new();
        let mut image_infos = Vec::new();
        for write in writes {
            match *write {
                DescriptorWrite::UniformBuffer { buffer, range, .. } => buffer_infos.push(vk::DescriptorBufferInfo {
                    buffer: self.buffer(buffer)?,
                    offset: 0,
                    range,
                }),
                DescriptorWrite::CombinedImageSampler { texture, .. } => match self.resolve(texture)? {
                    VkResource::Texture { view, sampler, .. } => image_infos.push(vk::DescriptorImageInfo {
                        sampler: *sampler,
                        image_view: *view,
                        image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                    }),
                    other => return Err(wrong_kind("texture", other)),
                },
            }
        }

        let (mut next_buffer, mut next_image) = (0, 0);
        let raw_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .map(|write| match *write {
                DescriptorWrite::UniformBuffer { binding, .. } => {
                    next_buffer += 1;
                    vk::WriteDescriptorSet::builder()
                        .dst_set(raw_set)
                        .dst_binding(binding)
                        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                        .buffer_info(&buffer_infos[next_buffer - 1..next_buffer])
                        .build()
                }
                DescriptorWrite::CombinedImageSampler { binding, .. } => {
                    next_image += 1;
                    vk::WriteDescriptorSet::builder()
                        .dst_set(raw_set)
                        .dst_binding(binding)
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .image_info(&image_infos[next_image - 1..next_image])
                        .build()
                }
            })
            .collect();

        unsafe { self.logical.device.update_descriptor_sets(&raw_writes, &[]) };
        Ok(())
    }

    fn create_graphics_pipeline(&mut self, desc: &PipelineDesc<'_>) -> RenderResult<GpuHandle> {
        let objects = PipelineObjects {
            render_pass: self.render_pass(desc.render_pass)?,
            vertex_shader: self.shader_module(desc.vertex_shader)?,
            fragment_shader: self.shader_module(desc.fragment_shader)?,
            set_layout: self.set_layout(desc.descriptor_set_layout)?,
        };
        let (pipeline, layout) = pipeline::create_graphics_pipeline(&self.logical.device, desc, objects)?;
        Ok(self.resources.insert(
            VkResource::Pipeline { pipeline, layout },
            &[desc.render_pass, desc.descriptor_set_layout],
        ))
    }

    fn destroy(&mut self, handle: GpuHandle) {
        for resource in self.resources.remove(handle) {
            self.destroy_resource(resource);
        }
    }

    fn is_alive(&self, handle: GpuHandle) -> bool {
        self.resources.contains(handle)
    }

    fn begin_commands(&mut self, command_buffer: GpuHandle) -> RenderResult<()> {
        let cb = self.command_buffer(command_buffer)?;
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::SIMULTANEOUS_USE);
        unsafe { self.logical.device.begin_command_buffer(cb, &begin_info)? };
        Ok(())
    }

    fn cmd_begin_render_pass(
        &mut self,
        command_buffer: GpuHandle,
        render_pass: GpuHandle,
        framebuffer: GpuHandle,
        extent: vk::Extent2D,
        clear: ClearValues,
    ) -> RenderResult<()> {
        let cb = self.command_buffer(command_buffer)?;
        let raw_render_pass = self.render_pass(render_pass)?;
        let raw_framebuffer = match self.resolve(framebuffer)? {
            VkResource::Framebuffer(framebuffer) => *framebuffer,
            other => return Err(wrong_kind("framebuffer", other)),
        };

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue { float32: clear.color },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: clear.depth,
                    stencil: 0,
                },
            },
        ];
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(raw_render_pass)
            .framebuffer(raw_framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .clear_values(&clear_values);
        unsafe {
            self.logical
                .device
                .cmd_begin_render_pass(cb, &begin_info, vk::SubpassContents::INLINE);
        }
        Ok(())
    }

    fn cmd_bind_pipeline(&mut self, command_buffer: GpuHandle, pipeline: GpuHandle) -> RenderResult<()> {
        let cb = self.command_buffer(command_buffer)?;
        let (raw_pipeline, _) = self.pipeline(pipeline)?;
        unsafe {
            self.logical
                .device
                .cmd_bind_pipeline(cb, vk::PipelineBindPoint::GRAPHICS, raw_pipeline);
        }
        Ok(())
    }

    fn cmd_bind_vertex_buffers(
        &mut self,
        command_buffer: GpuHandle,
        first_binding: u32,
        buffers: &[GpuHandle],
    ) -> RenderResult<()> {
        let cb = self.command_buffer(command_buffer)?;
        let raw_buffers = buffers
            .iter()
            .map(|&handle| self.buffer(handle))
            .collect::<RenderResult<Vec<_>>>()?;
        let offsets = vec![0; raw_buffers.len()];
        unsafe {
            self.logical
                .device
                .cmd_bind_vertex_buffers(cb, first_binding, &raw_buffers, &offsets);
        }
        Ok(())
    }

    fn cmd_bind_index_buffer(&mut self, command_buffer: GpuHandle, buffer: GpuHandle) -> RenderResult<()> {
        let cb = self.command_buffer(command_buffer)?;
        let raw_buffer = self.buffer(buffer)?;
        unsafe {
            self.logical
                .device
                .cmd_bind_index_buffer(cb, raw_buffer, 0, vk::IndexType::UINT32);
        }
        Ok(())
    }

    fn cmd_bind_descriptor_set(
        &mut self,
        command_buffer: GpuHandle,
        pipeline: GpuHandle,
        set: GpuHandle,
    ) -> RenderResult<()> {
        let cb = self.command_buffer(command_buffer)?;
        let (_, layout) = self.pipeline(pipeline)?;
        let raw_set = match self.resolve(set)? {
            VkResource::DescriptorSet { set, .. } => *set,
            other => return Err(wrong_kind("descriptor set", other)),
        };
        unsafe {
            self.logical.device.cmd_bind_descriptor_sets(
                cb,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                0,
                &[raw_set],
                &[],
            );
        }
        Ok(())
    }

    fn cmd_draw(&mut self, command_buffer: GpuHandle, vertex_count: u32, instance_count: u32) -> RenderResult<()> {
        let cb = self.command_buffer(command_buffer)?;
        unsafe { self.logical.device.cmd_draw(cb, vertex_count, instance_count, 0, 0) };
        Ok(())
    }

    fn cmd_draw_indexed(
        &mut self,
        command_buffer: GpuHandle,
        index_count: u32,
        instance_count: u32,
    ) -> RenderResult<()> {
        let cb = self.command_buffer(command_buffer)?;
        unsafe {
            self.logical
                .device
                .cmd_draw_indexed(cb, index_count, instance_count, 0, 0, 0);
        }
        Ok(())
    }

    fn cmd_end_render_pass(&mut self, command_buffer: GpuHandle) -> RenderResult<()> {
        let cb = self.command_buffer(command_buffer)?;
        unsafe { self.logical.device.cmd_end_render_pass(cb) };
        Ok(())
    }

    fn end_commands(&mut self, command_buffer: GpuHandle) -> RenderResult<()> {
        let cb = self.command_buffer(command_buffer)?;
        unsafe { self.logical.device.end_command_buffer(cb)? };
        Ok(())
    }

    fn acquire_next_image(&mut self, swapchain: GpuHandle, signal: GpuHandle) -> RenderResult<AcquireOutcome> {
        let raw_swapchain = self.swapchain(swapchain)?;
        let semaphore = self.semaphore(signal)?;
        let acquired = unsafe {
            self.logical
                .swapchain_loader
                .acquire_next_image(raw_swapchain, u64::MAX, semaphore, vk::Fence::null())
        };
        match acquired {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Ready {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(err) => Err(err.into()),
        }
    }

    fn submit(&mut self, command_buffer: GpuHandle, wait: GpuHandle, signal: GpuHandle) -> RenderResult<()> {
        let command_buffers = [self.command_buffer(command_buffer)?];
        let wait_semaphores = [self.semaphore(wait)?];
        let signal_semaphores = [self.semaphore(signal)?];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);
        unsafe {
            self.logical.device.queue_submit(
                self.logical.graphics_queue,
                &[submit_info.build()],
                vk::Fence::null(),
            )?;
        }
        Ok(())
    }

    fn present(&mut self, swapchain: GpuHandle, image_index: u32, wait: GpuHandle) -> RenderResult<PresentOutcome> {
        let swapchains = [self.swapchain(swapchain)?];
        let wait_semaphores = [self.semaphore(wait)?];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);
        let presented = unsafe {
            self.logical
                .swapchain_loader
                .queue_present(self.logical.present_queue, &present_info)
        };
        let outcome = match presented {
            Ok(false) => PresentOutcome::Presented,
            Ok(true) => PresentOutcome::Suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => PresentOutcome::OutOfDate,
            Err(err) => return Err(err.into()),
        };

        unsafe { self.logical.device.queue_wait_idle(self.logical.present_queue)? };
        Ok(outcome)
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(err) = self.logical.device.device_wait_idle() {
                log::warn!("device_wait_idle failed during teardown: {err:?}");
            }
        }
        for resource in self.resources.drain() {
            self.destroy_resource(resource);
        }
        unsafe {
            self.logical.device.destroy_command_pool(self.command_pool, None);
            self.logical.device.destroy_device(None);
        }
        log::debug!("Vulkan device destroyed");
    }
}

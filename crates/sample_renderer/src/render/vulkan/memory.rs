//! Memory allocation, image helpers and one-shot command submission

use ash::{vk, Device};

use crate::render::{RenderError, RenderResult};

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// Index of the first memory type allowed by `type_filter` that has all of
/// `properties`
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> RenderResult<u32> {
    (0..memory_properties.memory_type_count)
        .find(|&i| {
            type_filter & (1 << i) != 0
                && memory_properties.memory_types[i as usize]
                    .property_flags
                    .contains(properties)
        })
        .ok_or(RenderError::NoSuitableMemoryType)
}

fn allocate(
    device: &Device,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
) -> RenderResult<vk::DeviceMemory> {
    let memory_type_index = find_memory_type(memory_properties, requirements.memory_type_bits, properties)?;
    let alloc_info = vk::MemoryAllocateInfo::builder()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);
    unsafe { device.allocate_memory(&alloc_info, None) }.map_err(|err| match err {
        vk::Result::ERROR_OUT_OF_DEVICE_MEMORY | vk::Result::ERROR_OUT_OF_HOST_MEMORY => {
            RenderError::OutOfMemory {
                requested: requirements.size,
            }
        }
        other => other.into(),
    })
}

/// Create a buffer and bind freshly allocated memory to it
pub fn create_buffer(
    device: &Device,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    properties: vk::MemoryPropertyFlags,
) -> RenderResult<(vk::Buffer, vk::DeviceMemory)> {
    let buffer_info = vk::BufferCreateInfo::builder()
        .size(size)
        .usage(usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);
    let buffer = unsafe { device.create_buffer(&buffer_info, None)? };

    let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
    let bound = allocate(device, memory_properties, requirements, properties).and_then(|memory| {
        unsafe { device.bind_buffer_memory(buffer, memory, 0) }
            .map(|()| memory)
            .map_err(|err| {
                unsafe { device.free_memory(memory, None) };
                err.into()
            })
    });
    match bound {
        Ok(memory) => Ok((buffer, memory)),
        Err(err) => {
            unsafe { device.destroy_buffer(buffer, None) };
            Err(err)
        }
    }
}

/// Description of a single-mip 2D image
#[derive(Debug, Clone, Copy)]
pub struct ImageDesc {
    /// Texel format
    pub format: vk::Format,
    /// Size in texels
    pub extent: vk::Extent2D,
    /// Optimal or linear layout
    pub tiling: vk::ImageTiling,
    /// How the image will be used
    pub usage: vk::ImageUsageFlags,
    /// Required memory properties
    pub properties: vk::MemoryPropertyFlags,
    /// Layout the image starts in (UNDEFINED or PREINITIALIZED)
    pub initial_layout: vk::ImageLayout,
}

/// Create an image and bind freshly allocated memory to it
pub fn create_image(
    device: &Device,
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    desc: &ImageDesc,
) -> RenderResult<(vk::Image, vk::DeviceMemory)> {
    let image_info = vk::ImageCreateInfo::builder()
        .image_type(vk::ImageType::TYPE_2D)
        .format(desc.format)
        .extent(vk::Extent3D {
            width: desc.extent.width,
            height: desc.extent.height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(desc.tiling)
        .usage(desc.usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(desc.initial_layout);
    let image = unsafe { device.create_image(&image_info, None)? };

    let requirements = unsafe { device.get_image_memory_requirements(image) };
    let bound = allocate(device, memory_properties, requirements, desc.properties).and_then(|memory| {
        unsafe { device.bind_image_memory(image, memory, 0) }
            .map(|()| memory)
            .map_err(|err| {
                unsafe { device.free_memory(memory, None) };
                err.into()
            })
    });
    match bound {
        Ok(memory) => Ok((image, memory)),
        Err(err) => {
            unsafe { device.destroy_image(image, None) };
            Err(err)
        }
    }
}

/// Create a 2D view over the whole image
pub fn create_image_view(
    device: &Device,
    image: vk::Image,
    format: vk::Format,
    aspect_mask: vk::ImageAspectFlags,
) -> RenderResult<vk::ImageView> {
    let create_info = vk::ImageViewCreateInfo::builder()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(vk::ImageSubresourceRange {
            aspect_mask,
            ..COLOR_RANGE
        });
    Ok(unsafe { device.create_image_view(&create_info, None)? })
}

/// Record, submit and wait for a throwaway command buffer
pub fn submit_one_shot(
    device: &Device,
    command_pool: vk::CommandPool,
    queue: vk::Queue,
    record: impl FnOnce(vk::CommandBuffer),
) -> RenderResult<()> {
    let allocate_info = vk::CommandBufferAllocateInfo::builder()
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_pool(command_pool)
        .command_buffer_count(1);
    let command_buffers = unsafe { device.allocate_command_buffers(&allocate_info)? };

    let result = (|| -> RenderResult<()> {
        let command_buffer = command_buffers[0];
        let begin_info = vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { device.begin_command_buffer(command_buffer, &begin_info)? };
        record(command_buffer);
        unsafe { device.end_command_buffer(command_buffer)? };

        let submit_info = vk::SubmitInfo::builder().command_buffers(&command_buffers);
        unsafe {
            device.queue_submit(queue, &[submit_info.build()], vk::Fence::null())?;
            device.queue_wait_idle(queue)?;
        }
        Ok(())
    })();

    unsafe { device.free_command_buffers(command_pool, &command_buffers) };
    result
}

/// Access masks and pipeline stages for a color image layout transition
fn transition_masks(
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> (vk::AccessFlags, vk::PipelineStageFlags, vk::AccessFlags, vk::PipelineStageFlags) {
    let source = match old_layout {
        vk::ImageLayout::PREINITIALIZED => (vk::AccessFlags::HOST_WRITE, vk::PipelineStageFlags::HOST),
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => {
            (vk::AccessFlags::SHADER_READ, vk::PipelineStageFlags::FRAGMENT_SHADER)
        }
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER),
        _ => (vk::AccessFlags::empty(), vk::PipelineStageFlags::TOP_OF_PIPE),
    };
    let destination = match new_layout {
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => (vk::AccessFlags::TRANSFER_READ, vk::PipelineStageFlags::TRANSFER),
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => (vk::AccessFlags::TRANSFER_WRITE, vk::PipelineStageFlags::TRANSFER),
        _ => (vk::AccessFlags::SHADER_READ, vk::PipelineStageFlags::FRAGMENT_SHADER),
    };
    (source.0, source.1, destination.0, destination.1)
}

/// Record a layout transition of a single-mip color image
pub fn cmd_transition_color_image(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) {
    let (src_access, src_stage, dst_access, dst_stage) = transition_masks(old_layout, new_layout);
    let barrier = vk::ImageMemoryBarrier::builder()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(COLOR_RANGE)
        .src_access_mask(src_access)
        .dst_access_mask(dst_access);

    unsafe {
        device.cmd_pipeline_barrier(
            command_buffer,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[barrier.build()],
        );
    }
}

/// Record a whole-image copy between two single-mip color images
pub fn cmd_copy_color_image(
    device: &Device,
    command_buffer: vk::CommandBuffer,
    src: vk::Image,
    dst: vk::Image,
    extent: vk::Extent2D,
) {
    let layers = vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    };
    let region = vk::ImageCopy::builder()
        .src_subresource(layers)
        .dst_subresource(layers)
        .extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        });

    unsafe {
        device.cmd_copy_image(
            command_buffer,
            src,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            dst,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region.build()],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = *flags;
        }
        props
    }

    #[test]
    fn test_find_memory_type_respects_filter() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let props = properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL, host, host]);

        assert_eq!(find_memory_type(&props, 0b111, host).unwrap(), 1);
        assert_eq!(find_memory_type(&props, 0b100, host).unwrap(), 2);
        assert_eq!(
            find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn test_find_memory_type_without_match() {
        let props = properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        assert!(matches!(
            find_memory_type(&props, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE),
            Err(RenderError::NoSuitableMemoryType)
        ));
    }

    #[test]
    fn test_upload_transitions() {
        let (src_access, src_stage, dst_access, dst_stage) =
            transition_masks(vk::ImageLayout::PREINITIALIZED, vk::ImageLayout::TRANSFER_SRC_OPTIMAL);
        assert_eq!(src_access, vk::AccessFlags::HOST_WRITE);
        assert_eq!(src_stage, vk::PipelineStageFlags::HOST);
        assert_eq!(dst_access, vk::AccessFlags::TRANSFER_READ);
        assert_eq!(dst_stage, vk::PipelineStageFlags::TRANSFER);

        let (src_access, _, dst_access, dst_stage) = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(dst_access, vk::AccessFlags::SHADER_READ);
        assert_eq!(dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }
}

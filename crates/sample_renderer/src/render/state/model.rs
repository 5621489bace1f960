//! Pieces shared by the textured model states

use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::mem::{offset_of, size_of};

use super::{PassTargets, UpdateFlags};
use crate::foundation::math::{to_gpu, GpuMat4, Mat4};
use crate::render::commands::ActiveRenderPass;
use crate::render::device::{
    DescriptorBinding, DescriptorWrite, GpuDevice, GpuHandle, PipelineDesc, VertexAttribute, VertexBinding,
};
use crate::render::resource::SizedBuffer;
use crate::render::shader::ShaderLibrary;
use crate::render::{Color, RenderError, RenderResult};

/// Model vertex
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ModelVertex {
    /// Object-space position
    pub position: [f32; 3],
    /// Object-space normal
    pub normal: [f32; 3],
    /// Texture coordinate
    pub uv: [f32; 2],
    /// Vertex color, multiplied with the texture
    pub color: Color,
}

/// Per-instance transform and tint
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct InstanceData {
    /// Column-major instance transform
    pub transform: GpuMat4,
    /// Color added to the shaded result
    pub color: Color,
}

impl InstanceData {
    /// Instance from a transform and tint
    pub fn new(transform: &Mat4, color: Color) -> Self {
        Self {
            transform: to_gpu(transform),
            color,
        }
    }
}

/// Model, view and projection matrices
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ModelUniform {
    /// Model matrix
    pub model: GpuMat4,
    /// View matrix
    pub view: GpuMat4,
    /// Projection matrix
    pub proj: GpuMat4,
}

impl ModelUniform {
    /// Pack the three matrices
    pub fn new(model: &Mat4, view: &Mat4, proj: &Mat4) -> Self {
        Self {
            model: to_gpu(model),
            view: to_gpu(view),
            proj: to_gpu(proj),
        }
    }
}

impl Default for ModelUniform {
    fn default() -> Self {
        let identity = Mat4::identity();
        Self::new(&identity, &identity, &identity)
    }
}

/// Tightly packed RGBA8 image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureImage {
    /// Width in texels
    pub width: u32,
    /// Height in texels
    pub height: u32,
    /// `width * height * 4` bytes, rows top to bottom
    pub pixels: Vec<u8>,
}

impl TextureImage {
    /// Image from raw RGBA8 pixels
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> RenderResult<Self> {
        let expected = width as usize * height as usize * 4;
        if width == 0 || height == 0 || pixels.len() != expected {
            return Err(RenderError::InvalidOperation {
                reason: format!(
                    "texture of {width}x{height} needs {expected} bytes, got {}",
                    pixels.len()
                ),
            });
        }
        Ok(Self { width, height, pixels })
    }

    /// Single texel image
    pub fn solid(color: Color) -> Self {
        Self {
            width: 1,
            height: 1,
            pixels: color.to_array().to_vec(),
        }
    }

    const fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Data a model state is created with
#[derive(Debug, Clone)]
pub struct ModelInitData {
    /// Vertices
    pub vertices: Vec<ModelVertex>,
    /// Triangle list indices
    pub indices: Vec<u32>,
    /// Instances; ignored by the skinned model
    pub instances: Vec<InstanceData>,
    /// Texture sampled by the fragment shader
    pub texture: TextureImage,
    /// Initial matrices
    pub uniform: ModelUniform,
}

impl ModelInitData {
    /// Geometry with a white texel and identity matrices
    pub fn new(vertices: Vec<ModelVertex>, indices: Vec<u32>) -> Self {
        Self {
            vertices,
            indices,
            instances: Vec::new(),
            texture: TextureImage::solid(Color::WHITE),
            uniform: ModelUniform::default(),
        }
    }

    /// Replace the instances
    #[must_use]
    pub fn with_instances(mut self, instances: Vec<InstanceData>) -> Self {
        self.instances = instances;
        self
    }

    /// Replace the texture
    #[must_use]
    pub fn with_texture(mut self, texture: TextureImage) -> Self {
        self.texture = texture;
        self
    }
}

/// Update payload; only the sub-resources named in `flags` are touched
#[derive(Debug, Clone, Copy, Default)]
pub struct ModelUpdate<'a> {
    /// Which fields below to apply
    pub flags: UpdateFlags,
    /// New vertices
    pub vertices: &'a [ModelVertex],
    /// New indices
    pub indices: &'a [u32],
    /// New instances
    pub instances: &'a [InstanceData],
    /// New matrices
    pub uniform: Option<ModelUniform>,
    /// New texture
    pub texture: Option<&'a TextureImage>,
}

const UNIFORM_BINDING: DescriptorBinding = DescriptorBinding {
    binding: 0,
    descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
    stages: vk::ShaderStageFlags::VERTEX,
};

const SAMPLER_BINDING: DescriptorBinding = DescriptorBinding {
    binding: 1,
    descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    stages: vk::ShaderStageFlags::FRAGMENT,
};

const DESCRIPTOR_BINDINGS: [DescriptorBinding; 2] = [UNIFORM_BINDING, SAMPLER_BINDING];

/// Vertex input layout of a model pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ModelLayout {
    /// Per-vertex data only
    Vertices,
    /// Per-vertex data plus per-instance transform and tint on binding 1
    Instanced,
}

impl ModelLayout {
    fn bindings(self) -> Vec<VertexBinding> {
        let mut bindings = vec![VertexBinding {
            binding: 0,
            stride: size_of::<ModelVertex>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        if self == Self::Instanced {
            bindings.push(VertexBinding {
                binding: 1,
                stride: size_of::<InstanceData>() as u32,
                input_rate: vk::VertexInputRate::INSTANCE,
            });
        }
        bindings
    }

    fn attributes(self) -> Vec<VertexAttribute> {
        let vertex = |location, format, offset: usize| VertexAttribute {
            location,
            binding: 0,
            format,
            offset: offset as u32,
        };
        let mut attributes = vec![
            vertex(0, vk::Format::R32G32B32_SFLOAT, offset_of!(ModelVertex, position)),
            vertex(1, vk::Format::R32G32B32_SFLOAT, offset_of!(ModelVertex, normal)),
            vertex(2, vk::Format::R32G32_SFLOAT, offset_of!(ModelVertex, uv)),
            vertex(3, vk::Format::R8G8B8A8_UNORM, offset_of!(ModelVertex, color)),
        ];
        if self == Self::Instanced {
            let column = size_of::<[f32; 4]>();
            attributes.extend((0..4u32).map(|i| VertexAttribute {
                location: 4 + i,
                binding: 1,
                format: vk::Format::R32G32B32A32_SFLOAT,
                offset: (offset_of!(InstanceData, transform) + i as usize * column) as u32,
            }));
            attributes.push(VertexAttribute {
                location: 8,
                binding: 1,
                format: vk::Format::R8G8B8A8_UNORM,
                offset: offset_of!(InstanceData, color) as u32,
            });
        }
        attributes
    }
}

/// Geometry buffers of a model state; `instances` only for instanced models
pub(crate) struct ModelBuffers<'a> {
    pub(crate) vertices: &'a mut SizedBuffer<ModelVertex>,
    pub(crate) indices: &'a mut SizedBuffer<u32>,
    pub(crate) instances: Option<&'a mut SizedBuffer<InstanceData>>,
}

/// Uniform buffer, texture, descriptor set and pipeline of a model state
#[derive(Debug)]
pub(crate) struct ModelResources {
    layout: ModelLayout,
    vertex_shader: &'static str,
    uniform: SizedBuffer<ModelUniform>,
    texture: Option<GpuHandle>,
    texture_extent: (u32, u32),
    descriptor_layout: Option<GpuHandle>,
    descriptor_set: Option<GpuHandle>,
    pipeline: Option<GpuHandle>,
}

impl ModelResources {
    pub(crate) fn new(layout: ModelLayout, vertex_shader: &'static str) -> Self {
        Self {
            layout,
            vertex_shader,
            uniform: SizedBuffer::uniform(),
            texture: None,
            texture_extent: (0, 0),
            descriptor_layout: None,
            descriptor_set: None,
            pipeline: None,
        }
    }

    pub(crate) fn init(
        &mut self,
        device: &mut dyn GpuDevice,
        targets: &PassTargets,
        shaders: &ShaderLibrary,
        texture: &TextureImage,
        uniform: &ModelUniform,
    ) -> RenderResult<()> {
        self.uniform.upload(device, std::slice::from_ref(uniform))?;
        self.texture = Some(device.create_texture(texture.width, texture.height, &texture.pixels)?);
        self.texture_extent = texture.extent();

        let layout = device.create_descriptor_set_layout(&DESCRIPTOR_BINDINGS)?;
        self.descriptor_layout = Some(layout);
        self.descriptor_set = Some(device.create_descriptor_set(layout, &DESCRIPTOR_BINDINGS)?);
        self.write_descriptors(device)?;

        self.build_pipeline(device, targets, shaders)
    }

    /// Replace the pipeline; the old one may already be gone with its render pass
    pub(crate) fn build_pipeline(
        &mut self,
        device: &mut dyn GpuDevice,
        targets: &PassTargets,
        shaders: &ShaderLibrary,
    ) -> RenderResult<()> {
        let layout = self.descriptor_layout.ok_or_else(|| missing("descriptor set layout"))?;
        if let Some(old) = self.pipeline.take() {
            device.destroy(old);
        }

        let bindings = self.layout.bindings();
        let attributes = self.layout.attributes();
        let (vertex_shader, fragment_shader) = shaders.create_stages(device, self.vertex_shader, "model_frag")?;
        let pipeline = device.create_graphics_pipeline(&PipelineDesc {
            render_pass: targets.render_pass,
            extent: targets.extent,
            vertex_shader,
            fragment_shader,
            bindings: &bindings,
            attributes: &attributes,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: true,
            depth_write: true,
            descriptor_set_layout: layout,
        });
        device.destroy(vertex_shader);
        device.destroy(fragment_shader);
        self.pipeline = Some(pipeline?);
        Ok(())
    }

    /// Apply the sub-resources named by `update.flags` to `buffers` and to
    /// the uniform buffer and texture.
    ///
    /// `dirty` is raised as soon as a bound handle changes, before the next
    /// step runs, so an update failing part way still forces a re-record.
    pub(crate) fn apply_update(
        &mut self,
        device: &mut dyn GpuDevice,
        buffers: ModelBuffers<'_>,
        update: &ModelUpdate<'_>,
        dirty: &mut bool,
    ) -> RenderResult<()> {
        let flags = update.flags;
        if flags.contains(UpdateFlags::VERTEX) {
            buffers.vertices.upload_tracked(device, update.vertices, dirty)?;
        }
        if flags.contains(UpdateFlags::INDEX) {
            buffers.indices.upload_tracked(device, update.indices, dirty)?;
        }
        if let (true, Some(instances)) = (flags.contains(UpdateFlags::INSTANCE), buffers.instances) {
            instances.upload_tracked(device, update.instances, dirty)?;
        }
        if let (true, Some(uniform)) = (flags.contains(UpdateFlags::UNIFORM), &update.uniform) {
            self.uniform.upload(device, std::slice::from_ref(uniform))?;
        }
        if let (true, Some(image)) = (flags.contains(UpdateFlags::TEXTURE), update.texture) {
            let before = self.texture;
            let result = self.update_texture(device, image);
            if self.texture != before {
                *dirty = true;
            }
            result?;
        }
        Ok(())
    }

    /// Write new pixels, recreating the texture when its size changes
    fn update_texture(&mut self, device: &mut dyn GpuDevice, image: &TextureImage) -> RenderResult<()> {
        if let Some(texture) = self.texture {
            if self.texture_extent == image.extent() {
                return device.update_texture(texture, &image.pixels);
            }
        }

        let replacement = device.create_texture(image.width, image.height, &image.pixels)?;
        if let Some(old) = self.texture.replace(replacement) {
            device.destroy(old);
        }
        self.texture_extent = image.extent();
        log::debug!("Model texture recreated at {}x{}", image.width, image.height);
        self.write_descriptors(device)
    }

    fn write_descriptors(&self, device: &mut dyn GpuDevice) -> RenderResult<()> {
        let set = self.descriptor_set.ok_or_else(|| missing("descriptor set"))?;
        let buffer = self.uniform.handle().ok_or_else(|| missing("uniform buffer"))?;
        let texture = self.texture.ok_or_else(|| missing("texture"))?;
        device.write_descriptor_set(
            set,
            &[
                DescriptorWrite::UniformBuffer {
                    binding: UNIFORM_BINDING.binding,
                    buffer,
                    range: SizedBuffer::<ModelUniform>::byte_size(1),
                },
                DescriptorWrite::CombinedImageSampler {
                    binding: SAMPLER_BINDING.binding,
                    texture,
                },
            ],
        )
    }

    pub(crate) fn release(&mut self, device: &mut dyn GpuDevice) {
        for handle in [
            self.pipeline.take(),
            self.descriptor_set.take(),
            self.descriptor_layout.take(),
            self.texture.take(),
        ]
        .into_iter()
        .flatten()
        {
            device.destroy(handle);
        }
        self.uniform.release(device);
        self.texture_extent = (0, 0);
    }

    /// Bind the pipeline and descriptor set, returning the pipeline
    pub(crate) fn bind(&self, pass: &mut ActiveRenderPass<'_, '_>) -> RenderResult<GpuHandle> {
        let pipeline = self.pipeline.ok_or_else(|| missing("pipeline"))?;
        let set = self.descriptor_set.ok_or_else(|| missing("descriptor set"))?;
        pass.bind_pipeline(pipeline)?;
        pass.bind_descriptor_set(pipeline, set)?;
        Ok(pipeline)
    }

    pub(crate) const fn pipeline(&self) -> Option<GpuHandle> {
        self.pipeline
    }

    pub(crate) const fn texture(&self) -> Option<GpuHandle> {
        self.texture
    }

    pub(crate) const fn uniform_buffer(&self) -> Option<GpuHandle> {
        self.uniform.handle()
    }

    pub(crate) const fn descriptor_set(&self) -> Option<GpuHandle> {
        self.descriptor_set
    }
}

fn missing(what: &str) -> RenderError {
    RenderError::InvalidOperation {
        reason: format!("model {what} has not been created"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_layouts() {
        assert_eq!(size_of::<ModelVertex>(), 36);
        assert_eq!(size_of::<InstanceData>(), 68);
        assert_eq!(size_of::<ModelUniform>(), 192);
    }

    #[test]
    fn test_instanced_attribute_locations() {
        let attributes = ModelLayout::Instanced.attributes();
        let locations: Vec<u32> = attributes.iter().map(|a| a.location).collect();
        assert_eq!(locations, (0..=8).collect::<Vec<_>>());
        assert_eq!(attributes[7].offset, 48);
        assert_eq!(attributes[8].offset, 64);
        assert_eq!(ModelLayout::Instanced.bindings()[1].input_rate, vk::VertexInputRate::INSTANCE);
    }

    #[test]
    fn test_plain_layout_has_one_binding() {
        assert_eq!(ModelLayout::Vertices.bindings().len(), 1);
        assert_eq!(ModelLayout::Vertices.attributes().len(), 4);
    }

    #[test]
    fn test_texture_image_validates_size() {
        assert!(TextureImage::new(2, 2, vec![0; 16]).is_ok());
        assert!(TextureImage::new(2, 2, vec![0; 15]).is_err());
        assert!(TextureImage::new(0, 2, Vec::new()).is_err());
        assert_eq!(TextureImage::solid(Color::WHITE).pixels, vec![255; 4]);
    }
}

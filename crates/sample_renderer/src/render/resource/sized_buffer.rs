use ash::vk;
use bytemuck::Pod;
use std::marker::PhantomData;

use crate::render::device::{GpuDevice, GpuHandle, MemoryLocation};
use crate::render::RenderResult;

/// What [`SizedBuffer::ensure_capacity`] did to the underlying buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferFate {
    /// The existing buffer keeps its identity
    Reused,
    /// The buffer was destroyed and, for a non-zero count, created anew.
    /// Anything that bound the old handle must be re-recorded.
    Recreated,
}

impl BufferFate {
    /// Whether the buffer identity changed
    pub const fn is_recreated(self) -> bool {
        matches!(self, Self::Recreated)
    }
}

/// GPU buffer holding exactly `count` elements of `T`.
///
/// Uploading a payload with the current count writes in place; any other
/// count recreates the buffer. Device-local buffers are filled through a
/// transient host-visible staging buffer.
#[derive(Debug)]
pub struct SizedBuffer<T> {
    handle: Option<GpuHandle>,
    count: usize,
    usage: vk::BufferUsageFlags,
    location: MemoryLocation,
    _marker: PhantomData<T>,
}

impl<T: Pod> SizedBuffer<T> {
    /// Empty buffer with the given usage and memory location
    pub fn new(usage: vk::BufferUsageFlags, location: MemoryLocation) -> Self {
        let usage = match location {
            MemoryLocation::DeviceLocal => usage | vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::HostVisible => usage,
        };
        Self {
            handle: None,
            count: 0,
            usage,
            location,
            _marker: PhantomData,
        }
    }

    /// Device-local vertex buffer
    pub fn vertex() -> Self {
        Self::new(vk::BufferUsageFlags::VERTEX_BUFFER, MemoryLocation::DeviceLocal)
    }

    /// Device-local index buffer
    pub fn index() -> Self {
        Self::new(vk::BufferUsageFlags::INDEX_BUFFER, MemoryLocation::DeviceLocal)
    }

    /// Device-local uniform buffer
    pub fn uniform() -> Self {
        Self::new(vk::BufferUsageFlags::UNIFORM_BUFFER, MemoryLocation::DeviceLocal)
    }

    /// Make the buffer hold exactly `count` elements.
    ///
    /// A zero count releases the buffer.
    pub fn ensure_capacity(&mut self, device: &mut dyn GpuDevice, count: usize) -> RenderResult<BufferFate> {
        if count == self.count && (count == 0 || self.handle.is_some()) {
            return Ok(BufferFate::Reused);
        }

        let existed = self.handle.is_some();
        self.release(device);
        if count == 0 {
            return Ok(if existed { BufferFate::Recreated } else { BufferFate::Reused });
        }

        self.handle = Some(device.create_buffer(Self::byte_size(count), self.usage, self.location)?);
        self.count = count;
        Ok(BufferFate::Recreated)
    }

    /// Resize to `data.len()` elements, then write `data`
    pub fn upload(&mut self, device: &mut dyn GpuDevice, data: &[T]) -> RenderResult<BufferFate> {
        let fate = self.ensure_capacity(device, data.len())?;
        if let Some(handle) = self.handle {
            let bytes: &[u8] = bytemuck::cast_slice(data);
            match self.location {
                MemoryLocation::HostVisible => device.write_buffer(handle, bytes)?,
                MemoryLocation::DeviceLocal => stage_and_copy(device, handle, bytes)?,
            }
        }
        Ok(fate)
    }

    /// [`Self::upload`], raising `dirty` whenever the buffer identity changed.
    ///
    /// The flag is raised even when the upload fails after the old buffer
    /// was released, since recorded commands still name the old handle.
    pub fn upload_tracked(&mut self, device: &mut dyn GpuDevice, data: &[T], dirty: &mut bool) -> RenderResult<BufferFate> {
        let before = self.handle;
        let result = self.upload(device, data);
        if self.handle != before {
            *dirty = true;
        }
        result
    }

    /// Destroy the buffer
    pub fn release(&mut self, device: &mut dyn GpuDevice) {
        if let Some(handle) = self.handle.take() {
            device.destroy(handle);
        }
        self.count = 0;
    }

    /// Current buffer, if any
    pub const fn handle(&self) -> Option<GpuHandle> {
        self.handle
    }

    /// Number of elements the buffer holds
    pub const fn count(&self) -> usize {
        self.count
    }

    /// Element count as used by draw commands
    pub fn draw_count(&self) -> u32 {
        u32::try_from(self.count).unwrap_or(u32::MAX)
    }

    /// Size in bytes of `count` elements
    pub const fn byte_size(count: usize) -> u64 {
        (count * std::mem::size_of::<T>()) as u64
    }
}

fn stage_and_copy(device: &mut dyn GpuDevice, dst: GpuHandle, bytes: &[u8]) -> RenderResult<()> {
    let size = bytes.len() as u64;
    let staging = device.create_buffer(size, vk::BufferUsageFlags::TRANSFER_SRC, MemoryLocation::HostVisible)?;
    let result = device
        .write_buffer(staging, bytes)
        .and_then(|()| device.copy_buffer(staging, dst, size));
    device.destroy(staging);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::device::headless::HeadlessDevice;
    use crate::render::RenderError;

    #[test]
    fn test_same_count_updates_in_place() {
        let mut device = HeadlessDevice::new();
        let mut buffer = SizedBuffer::<u32>::vertex();

        assert_eq!(buffer.upload(&mut device, &[1, 2, 3]).unwrap(), BufferFate::Recreated);
        let first = buffer.handle().unwrap();

        assert_eq!(buffer.upload(&mut device, &[4, 5, 6]).unwrap(), BufferFate::Reused);
        assert_eq!(buffer.handle(), Some(first));
        assert_eq!(
            device.buffer_contents(first).unwrap(),
            bytemuck::cast_slice::<u32, u8>(&[4, 5, 6])
        );
    }

    #[test]
    fn test_count_change_recreates() {
        let mut device = HeadlessDevice::new();
        let mut buffer = SizedBuffer::<u32>::vertex();
        buffer.upload(&mut device, &[1, 2]).unwrap();
        let first = buffer.handle().unwrap();

        assert!(buffer.upload(&mut device, &[1, 2, 3, 4, 5]).unwrap().is_recreated());
        assert_ne!(buffer.handle(), Some(first));
        assert!(!device.is_alive(first));
        assert_eq!(buffer.count(), 5);
    }

    #[test]
    fn test_staging_buffer_is_not_leaked() {
        let mut device = HeadlessDevice::new();
        let mut buffer = SizedBuffer::<f32>::uniform();
        buffer.upload(&mut device, &[1.0; 16]).unwrap();
        buffer.upload(&mut device, &[2.0; 16]).unwrap();

        assert_eq!(device.live_resources(), 1);
        assert_eq!(device.stats().buffer_copies, 2);
    }

    #[test]
    fn test_host_visible_writes_directly() {
        let mut device = HeadlessDevice::new();
        let mut buffer = SizedBuffer::<u8>::new(vk::BufferUsageFlags::VERTEX_BUFFER, MemoryLocation::HostVisible);
        buffer.upload(&mut device, &[9, 8, 7]).unwrap();

        assert_eq!(device.stats().buffer_copies, 0);
        assert_eq!(device.buffer_contents(buffer.handle().unwrap()), Some(&[9u8, 8, 7][..]));
    }

    #[test]
    fn test_zero_count_releases() {
        let mut device = HeadlessDevice::new();
        let mut buffer = SizedBuffer::<u16>::index();

        assert_eq!(buffer.upload(&mut device, &[]).unwrap(), BufferFate::Reused);
        buffer.upload(&mut device, &[1, 2]).unwrap();
        assert_eq!(buffer.upload(&mut device, &[]).unwrap(), BufferFate::Recreated);
        assert_eq!(buffer.handle(), None);
        assert_eq!(device.live_resources(), 0);
    }

    #[test]
    fn test_ensure_capacity_reports_fate_without_writing() {
        let mut device = HeadlessDevice::new();
        let mut buffer = SizedBuffer::<[f32; 4]>::vertex();
        assert_eq!(buffer.ensure_capacity(&mut device, 2).unwrap(), BufferFate::Recreated);
        assert_eq!(buffer.ensure_capacity(&mut device, 2).unwrap(), BufferFate::Reused);
        assert_eq!(device.stats().buffer_copies, 0);
        assert_eq!(SizedBuffer::<[f32; 4]>::byte_size(2), 32);
    }

    #[test]
    fn test_failed_allocation_leaves_buffer_empty() {
        let mut device = HeadlessDevice::new();
        let mut buffer = SizedBuffer::<u32>::vertex();
        buffer.upload(&mut device, &[1, 2]).unwrap();

        device.fail_next_allocation();
        let mut dirty = false;
        let result = buffer.upload_tracked(&mut device, &[1, 2, 3], &mut dirty);
        assert!(matches!(result, Err(RenderError::OutOfMemory { .. })));
        assert!(dirty);
        assert_eq!(buffer.handle(), None);
        assert_eq!(buffer.count(), 0);
        assert_eq!(device.live_resources(), 0);

        assert!(buffer.upload(&mut device, &[1, 2, 3]).unwrap().is_recreated());
    }

    #[test]
    fn test_tracked_upload_in_place_keeps_flag() {
        let mut device = HeadlessDevice::new();
        let mut buffer = SizedBuffer::<u32>::vertex();
        let mut dirty = false;
        buffer.upload_tracked(&mut device, &[1, 2], &mut dirty).unwrap();
        assert!(dirty);

        dirty = false;
        buffer.upload_tracked(&mut device, &[3, 4], &mut dirty).unwrap();
        assert!(!dirty);
    }
}

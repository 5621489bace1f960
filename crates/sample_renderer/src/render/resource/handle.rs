use ash::vk;
use ash::vk::Handle;

/// Raw handle types that have a distinguished "no resource" value.
pub trait NullHandle: Copy + PartialEq + std::fmt::Debug {
    /// The value representing "no resource"
    fn null() -> Self;

    /// Whether this value is the null handle
    fn is_null_handle(&self) -> bool {
        *self == Self::null()
    }
}

macro_rules! impl_null_handle {
    ($($ty:ty),* $(,)?) => {
        $(impl NullHandle for $ty {
            fn null() -> Self {
                <$ty as Handle>::from_raw(0)
            }
        })*
    };
}

impl_null_handle!(vk::SurfaceKHR, vk::DebugUtilsMessengerEXT);

impl NullHandle for u64 {
    fn null() -> Self {
        0
    }
}

/// Scoped owner of one raw device handle.
///
/// The destroy function is captured at construction, together with whatever
/// device or instance it needs, so a wrapper for a dependent resource must be
/// dropped before the wrapper of the object it depends on.
pub struct DeviceHandle<H: NullHandle> {
    handle: H,
    destroy: Box<dyn FnMut(H)>,
}

impl<H: NullHandle> DeviceHandle<H> {
    /// Create an empty wrapper that destroys through `destroy`
    pub fn new(destroy: impl FnMut(H) + 'static) -> Self {
        Self {
            handle: H::null(),
            destroy: Box::new(destroy),
        }
    }

    /// Create a wrapper already owning `handle`
    pub fn with_handle(handle: H, destroy: impl FnMut(H) + 'static) -> Self {
        let mut wrapper = Self::new(destroy);
        wrapper.handle = handle;
        wrapper
    }

    /// Take ownership of `handle`, destroying the previously held one.
    ///
    /// Re-assigning the handle already held is a no-op.
    pub fn assign(&mut self, handle: H) {
        if handle != self.handle {
            self.cleanup();
            self.handle = handle;
        }
    }

    /// Destroy the held handle and return the slot for a `create*` call to fill.
    pub fn reset_for_overwrite(&mut self) -> &mut H {
        self.cleanup();
        &mut self.handle
    }

    /// Raw handle for use in API calls
    pub fn read(&self) -> H {
        debug_assert!(!self.handle.is_null_handle(), "reading a null device handle");
        self.handle
    }

    /// Whether a resource is currently held
    pub fn is_valid(&self) -> bool {
        !self.handle.is_null_handle()
    }

    /// Release ownership without destroying
    pub fn take(&mut self) -> H {
        std::mem::replace(&mut self.handle, H::null())
    }

    fn cleanup(&mut self) {
        if self.is_valid() {
            (self.destroy)(self.handle);
        }
        self.handle = H::null();
    }
}

impl<H: NullHandle> Drop for DeviceHandle<H> {
    fn drop(&mut self) {
        self.cleanup();
    }
}

impl<H: NullHandle> std::fmt::Debug for DeviceHandle<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DeviceHandle").field(&self.handle).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn tracked() -> (DeviceHandle<u64>, Rc<RefCell<Vec<u64>>>) {
        let destroyed = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&destroyed);
        (DeviceHandle::new(move |h| log.borrow_mut().push(h)), destroyed)
    }

    #[test]
    fn test_assign_destroys_previous() {
        let (mut handle, destroyed) = tracked();
        handle.assign(1);
        handle.assign(2);
        assert_eq!(*destroyed.borrow(), vec![1]);
        assert_eq!(handle.read(), 2);
    }

    #[test]
    fn test_assign_same_handle_is_noop() {
        let (mut handle, destroyed) = tracked();
        handle.assign(7);
        handle.assign(7);
        assert!(destroyed.borrow().is_empty());
        assert_eq!(handle.read(), 7);
    }

    #[test]
    fn test_reset_for_overwrite() {
        let (mut handle, destroyed) = tracked();
        *handle.reset_for_overwrite() = 3;
        *handle.reset_for_overwrite() = 4;
        assert_eq!(*destroyed.borrow(), vec![3]);
        assert!(handle.is_valid());
    }

    #[test]
    fn test_null_is_never_destroyed() {
        let (mut handle, destroyed) = tracked();
        handle.reset_for_overwrite();
        handle.assign(0);
        drop(handle);
        assert!(destroyed.borrow().is_empty());
    }

    #[test]
    fn test_every_valid_handle_destroyed_exactly_once() {
        let (mut handle, destroyed) = tracked();
        handle.assign(1);
        handle.assign(1);
        *handle.reset_for_overwrite() = 2;
        handle.assign(3);
        *handle.reset_for_overwrite() = 4;
        handle.assign(5);
        drop(handle);

        assert_eq!(*destroyed.borrow(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_take_releases_without_destroy() {
        let (mut handle, destroyed) = tracked();
        handle.assign(9);
        assert_eq!(handle.take(), 9);
        drop(handle);
        assert!(destroyed.borrow().is_empty());
    }

    #[test]
    fn test_vulkan_handles_start_null() {
        let handle = DeviceHandle::<vk::SurfaceKHR>::new(|_| {});
        assert!(!handle.is_valid());
    }
}

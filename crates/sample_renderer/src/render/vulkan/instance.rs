//! Instance, adapter and logical device creation

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::{Surface, Swapchain as SwapchainLoader};
use ash::{vk, Device, Entry, Instance};
use std::collections::HashSet;
use std::ffi::{CStr, CString};

use super::window::Window;
use crate::render::resource::DeviceHandle;
use crate::render::{RenderError, RenderResult};

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &str = "sample_renderer";

fn c_string(value: &str) -> RenderResult<CString> {
    CString::new(value).map_err(|_| RenderError::InvalidOperation {
        reason: format!("string {value:?} contains an interior NUL"),
    })
}

/// Vulkan entry, instance and optional validation messenger
pub struct VulkanInstance {
    debug_messenger: Option<DeviceHandle<vk::DebugUtilsMessengerEXT>>,
    /// Instance function table
    pub instance: Instance,
    /// Loader entry points
    pub entry: Entry,
}

impl VulkanInstance {
    /// Create the instance with the extensions the window needs
    pub fn new(window: &Window, app_name: &str, enable_validation: bool) -> RenderResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|err| RenderError::InitializationFailed(format!("Failed to load Vulkan: {err}")))?;

        let app_name = c_string(app_name)?;
        let engine_name = c_string(ENGINE_NAME)?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let window_extensions = window
            .required_instance_extensions()?
            .iter()
            .map(|name| c_string(name))
            .collect::<RenderResult<Vec<_>>>()?;
        let mut extensions: Vec<*const std::ffi::c_char> = window_extensions.iter().map(|ext| ext.as_ptr()).collect();

        let enable_validation = enable_validation && Self::validation_layer_available(&entry);
        let layers = if enable_validation {
            extensions.push(DebugUtils::name().as_ptr());
            vec![c_string(VALIDATION_LAYER)?]
        } else {
            Vec::new()
        };
        let layer_ptrs: Vec<*const std::ffi::c_char> = layers.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layer_ptrs);
        let instance = unsafe { entry.create_instance(&create_info, None)? };

        let debug_messenger = if enable_validation {
            match Self::create_debug_messenger(&entry, &instance) {
                Ok(messenger) => Some(messenger),
                Err(err) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(err);
                }
            }
        } else {
            None
        };

        Ok(Self {
            debug_messenger,
            instance,
            entry,
        })
    }

    /// Whether the validation messenger is installed
    pub const fn validation_enabled(&self) -> bool {
        self.debug_messenger.is_some()
    }

    fn validation_layer_available(entry: &Entry) -> bool {
        let available = entry.enumerate_instance_layer_properties().unwrap_or_default();
        let found = available.iter().any(|layer| {
            let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
            name.to_bytes() == VALIDATION_LAYER.as_bytes()
        });
        if !found {
            log::warn!("{VALIDATION_LAYER} requested but not installed; continuing without validation");
        }
        found
    }

    fn create_debug_messenger(
        entry: &Entry,
        instance: &Instance,
    ) -> RenderResult<DeviceHandle<vk::DebugUtilsMessengerEXT>> {
        let debug_utils = DebugUtils::new(entry, instance);
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None)? };
        Ok(DeviceHandle::with_handle(messenger, move |messenger| unsafe {
            debug_utils.destroy_debug_utils_messenger(messenger, None);
        }))
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        self.debug_messenger = None;
        unsafe { self.instance.destroy_instance(None) };
    }
}

unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {message_type:?} - {message}");
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {message_type:?} - {message}");
    } else {
        log::debug!("[Vulkan] {message_type:?} - {message}");
    }

    vk::FALSE
}

/// Selected adapter and the queue families used on it
pub struct PhysicalDeviceInfo {
    /// Adapter handle
    pub device: vk::PhysicalDevice,
    /// Adapter properties and limits
    pub properties: vk::PhysicalDeviceProperties,
    /// Memory heaps and types
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    /// Queue family used for graphics work
    pub graphics_family: u32,
    /// Queue family used for presentation
    pub present_family: u32,
}

impl PhysicalDeviceInfo {
    /// Pick the first adapter that can render to and present on `surface`
    pub fn select_suitable_device(
        instance: &Instance,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> RenderResult<Self> {
        let devices = unsafe { instance.enumerate_physical_devices()? };

        for device in devices {
            match Self::evaluate_device(instance, device, surface, surface_loader) {
                Ok(info) => {
                    log::info!("Selected GPU: {}", info.name());
                    return Ok(info);
                }
                Err(err) => log::debug!("Skipping adapter: {err}"),
            }
        }

        Err(RenderError::InitializationFailed("No suitable GPU found".to_string()))
    }

    /// Human-readable adapter name
    pub fn name(&self) -> String {
        unsafe { CStr::from_ptr(self.properties.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    fn evaluate_device(
        instance: &Instance,
        device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &Surface,
    ) -> RenderResult<Self> {
        let properties = unsafe { instance.get_physical_device_properties(device) };
        let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
        let queue_families = unsafe { instance.get_physical_device_queue_family_properties(device) };

        let mut graphics_family = None;
        let mut present_family = None;
        for (index, family) in (0u32..).zip(queue_families.iter()) {
            if graphics_family.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
                graphics_family = Some(index);
            }
            let present_support =
                unsafe { surface_loader.get_physical_device_surface_support(device, index, surface)? };
            if present_family.is_none() && present_support {
                present_family = Some(index);
            }
            if graphics_family.is_some() && present_family.is_some() {
                break;
            }
        }

        let graphics_family = graphics_family
            .ok_or_else(|| RenderError::InitializationFailed("No graphics queue family found".to_string()))?;
        let present_family = present_family
            .ok_or_else(|| RenderError::InitializationFailed("No present queue family found".to_string()))?;

        let extensions = unsafe { instance.enumerate_device_extension_properties(device)? };
        let has_swapchain = extensions.iter().any(|available| {
            let name = unsafe { CStr::from_ptr(available.extension_name.as_ptr()) };
            name == SwapchainLoader::name()
        });
        if !has_swapchain {
            return Err(RenderError::InitializationFailed(
                "Required device extensions not supported".to_string(),
            ));
        }

        let formats = unsafe { surface_loader.get_physical_device_surface_formats(device, surface)? };
        let modes = unsafe { surface_loader.get_physical_device_surface_present_modes(device, surface)? };
        if formats.is_empty() || modes.is_empty() {
            return Err(RenderError::InitializationFailed(
                "Surface reports no formats or present modes".to_string(),
            ));
        }

        Ok(Self {
            device,
            properties,
            memory_properties,
            graphics_family,
            present_family,
        })
    }
}

/// Logical device, its queues and the swap chain loader.
///
/// Destroyed explicitly by its owner once every object created on it is gone.
pub struct LogicalDevice {
    /// Device function table
    pub device: Device,
    /// Queue for graphics submissions
    pub graphics_queue: vk::Queue,
    /// Queue for presentation
    pub present_queue: vk::Queue,
    /// Swap chain extension functions
    pub swapchain_loader: SwapchainLoader,
}

impl LogicalDevice {
    /// Create the device with one queue per distinct family
    pub fn new(instance: &Instance, physical: &PhysicalDeviceInfo) -> RenderResult<Self> {
        let unique_families: HashSet<u32> = [physical.graphics_family, physical.present_family].into();
        let priorities = [1.0];
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family)
                    .queue_priorities(&priorities)
                    .build()
            })
            .collect();

        let extensions = [SwapchainLoader::name().as_ptr()];
        let features = vk::PhysicalDeviceFeatures::default();
        let create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = unsafe { instance.create_device(physical.device, &create_info, None)? };
        let graphics_queue = unsafe { device.get_device_queue(physical.graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(physical.present_family, 0) };
        let swapchain_loader = SwapchainLoader::new(instance, &device);

        Ok(Self {
            device,
            graphics_queue,
            present_queue,
            swapchain_loader,
        })
    }
}

//! GLFW window that supplies the Vulkan surface and resize notifications

use ash::vk;

use crate::render::{RenderError, RenderResult};

/// What happened to the window since the last poll
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowEvents {
    /// Latest framebuffer size, if it changed
    pub resized: Option<(u32, u32)>,
    /// Escape was pressed
    pub escape_pressed: bool,
}

/// GLFW window configured for Vulkan (no client API)
pub struct Window {
    glfw: glfw::Glfw,
    window: glfw::PWindow,
    events: glfw::GlfwReceiver<(f64, glfw::WindowEvent)>,
}

impl Window {
    /// Open a resizable window
    pub fn new(title: &str, width: u32, height: u32) -> RenderResult<Self> {
        let mut glfw = glfw::init(glfw::fail_on_errors)
            .map_err(|err| RenderError::Window(format!("GLFW initialization failed: {err:?}")))?;
        if !glfw.vulkan_supported() {
            return Err(RenderError::Window("GLFW found no Vulkan loader".to_string()));
        }

        glfw.window_hint(glfw::WindowHint::ClientApi(glfw::ClientApiHint::NoApi));
        glfw.window_hint(glfw::WindowHint::Resizable(true));

        let (mut window, events) = glfw
            .create_window(width, height, title, glfw::WindowMode::Windowed)
            .ok_or_else(|| RenderError::Window("Window creation failed".to_string()))?;

        window.set_key_polling(true);
        window.set_close_polling(true);
        window.set_framebuffer_size_polling(true);

        Ok(Self { glfw, window, events })
    }

    /// Whether the user asked to close the window
    pub fn should_close(&self) -> bool {
        self.window.should_close()
    }

    /// Request or cancel closing
    pub fn set_should_close(&mut self, should_close: bool) {
        self.window.set_should_close(should_close);
    }

    /// Pump the event queue and summarize what arrived
    pub fn poll_events(&mut self) -> WindowEvents {
        self.glfw.poll_events();
        let mut summary = WindowEvents::default();
        for (_, event) in glfw::flush_messages(&self.events) {
            match event {
                glfw::WindowEvent::FramebufferSize(width, height) => {
                    summary.resized = Some((width.max(0) as u32, height.max(0) as u32));
                }
                glfw::WindowEvent::Key(glfw::Key::Escape, _, glfw::Action::Press, _) => {
                    summary.escape_pressed = true;
                }
                _ => {}
            }
        }
        summary
    }

    /// Block until at least one event arrives; used while minimized
    pub fn wait_events(&mut self) {
        self.glfw.wait_events();
    }

    /// Current framebuffer size in pixels
    pub fn framebuffer_size(&self) -> (u32, u32) {
        let (width, height) = self.window.get_framebuffer_size();
        (width.max(0) as u32, height.max(0) as u32)
    }

    /// Instance extensions GLFW needs to create surfaces
    pub fn required_instance_extensions(&self) -> RenderResult<Vec<String>> {
        self.glfw
            .get_required_instance_extensions()
            .ok_or_else(|| RenderError::Window("Failed to get required instance extensions".to_string()))
    }

    /// Create a presentation surface for this window
    pub fn create_surface(&mut self, instance: vk::Instance) -> RenderResult<vk::SurfaceKHR> {
        let mut surface = vk::SurfaceKHR::null();
        let result = self.window.create_window_surface(instance, std::ptr::null(), &mut surface);
        if result == vk::Result::SUCCESS {
            Ok(surface)
        } else {
            Err(RenderError::Window(format!("Failed to create Vulkan surface: {result:?}")))
        }
    }
}

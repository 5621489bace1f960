//! Sample viewer
//!
//! Opens a window and draws the reference scene every frame: ground grid,
//! world axes, a ring of instanced boxes, one immediate-mode box and a
//! two-joint skinned ribbon bending over time.
//!
//! Usage: `sample_viewer [config.toml|config.ron]`

use sample_renderer::foundation::logging;
use sample_renderer::prelude::*;
use std::path::Path;
use std::time::Instant;

const RING_BOXES: usize = 12;
const RIBBON_ROWS: u32 = 8;

/// Two-joint ribbon standing on the XY plane, bound to joint 0 below y = 1
/// and joint 1 above, blended across the middle row
fn build_ribbon() -> RenderResult<SkinnedMesh> {
    let mut vertices = Vec::new();
    for row in 0..=RIBBON_ROWS {
        let v = row as f32 / RIBBON_ROWS as f32;
        let y = 2.0 * v;
        let upper = ((y - 0.75) / 0.5).clamp(0.0, 1.0);
        for x in [-0.25_f32, 0.25] {
            let mut vertex = SkinnedVertex::rigid(Vec3::new(x, y, 0.0), Vec3::z(), [x + 0.25, v], 0);
            vertex.joints = [0, 1, 0, 0];
            vertex.weights = [1.0 - upper, upper, 0.0, 0.0];
            vertices.push(vertex);
        }
    }

    let mut indices = Vec::new();
    for row in 0..RIBBON_ROWS {
        let base = row * 2;
        indices.extend_from_slice(&[base, base + 1, base + 2, base + 1, base + 3, base + 2]);
    }
    SkinnedMesh::new(vertices, indices)
}

/// Joint 0 stays in bind pose, joint 1 rotates about the ribbon's middle
fn ribbon_pose(angle: f32) -> [Mat4; 2] {
    let pivot = Vec3::new(0.0, 1.0, 0.0);
    let bend = Mat4::new_translation(&pivot)
        * Mat4::from_axis_angle(&Vec3::z_axis(), angle)
        * Mat4::new_translation(&-pivot);
    [Mat4::identity(), bend]
}

fn load_config() -> Result<RendererConfig, ConfigError> {
    let mut config = match std::env::args().nth(1) {
        Some(path) => {
            log::info!("Loading configuration from {path}");
            RendererConfig::load_from_file(path)?
        }
        None => RendererConfig::new("sample viewer"),
    };
    if Path::new("target/shaders").is_dir() {
        config.shader_dir = "target/shaders".into();
    }
    Ok(config)
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    log::info!("Shader directory: {}", config.shader_dir.display());

    // Declared before the device so it outlives the surface.
    let mut window = Window::new(&config.application_name, config.initial_width, config.initial_height)?;
    let device = VulkanDevice::new(&config, &mut window)?;
    let mut renderer = Renderer::initialize(config, device)?;

    let ribbon = build_ribbon()?;
    let small_box = BoxShape::centered(Vec3::new(0.4, 0.4, 0.4));
    let marker_box = BoxShape::new(Vec3::new(-0.5, 0.0, -0.5), Vec3::new(0.5, 1.0, 0.5));
    let start = Instant::now();

    while !window.should_close() {
        let events = window.poll_events();
        if events.escape_pressed {
            window.set_should_close(true);
        }
        if let Some((width, height)) = events.resized {
            renderer.on_resize(width, height)?;
        }
        if window.framebuffer_size() == (0, 0) {
            window.wait_events();
            continue;
        }

        let time = start.elapsed().as_secs_f32();

        renderer.draw_grid(20, 1.0)?;
        renderer.draw_axes(&Mat4::identity())?;

        let ring: Vec<Mat4> = (0..RING_BOXES)
            .map(|i| {
                let angle = time * 0.5 + i as f32 * std::f32::consts::TAU / RING_BOXES as f32;
                Mat4::new_translation(&Vec3::new(4.0 * angle.cos(), 0.2, 4.0 * angle.sin()))
                    * Mat4::from_axis_angle(&Vec3::y_axis(), -angle)
            })
            .collect();
        renderer.draw_box_shaded(&small_box, &ring, Color::rgb(0xd0, 0x90, 0x40))?;

        renderer.draw_box_im(
            &marker_box,
            &Mat4::new_translation(&Vec3::new(-2.0, 0.0, -2.0)),
            [Color::rgb(0x40, 0x80, 0xc0), Color::WHITE],
        )?;

        let pose = ribbon_pose(time.sin() * 0.8);
        renderer.draw_skinned_mesh(&ribbon, &pose, &Mat4::identity(), DrawOptions::default())?;

        // Failed frames are logged by the renderer; only a lost device is fatal.
        if let Err(RenderError::DeviceLost) = renderer.render_frame() {
            return Err(RenderError::DeviceLost.into());
        }
    }

    log::info!("Rendered {} frames", renderer.frame_count());
    Ok(())
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        log::error!("{err}");
        std::process::exit(1);
    }
}

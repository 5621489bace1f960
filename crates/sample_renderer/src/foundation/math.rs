//! Math utilities and types
//!
//! nalgebra aliases plus the fixed coordinate correction between the sample
//! framework's conventions and Vulkan clip space.

pub use nalgebra::{Matrix4, Vector2, Vector3, Vector4};

/// 2D vector type
pub type Vec2 = Vector2<f32>;

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// 3D point type
pub type Point3 = nalgebra::Point3<f32>;

/// Column-major `[[f32; 4]; 4]` as laid out in uniform and instance buffers.
pub type GpuMat4 = [[f32; 4]; 4];

/// Convert a matrix into the column-major array layout shaders expect.
#[must_use]
pub fn to_gpu(matrix: &Mat4) -> GpuMat4 {
    (*matrix).into()
}

/// Extension trait for Mat4 with the coordinate correction applied by the
/// renderer facade.
pub trait Mat4Ext {
    /// Remap from the framework's clip space (Y up, depth in [-1, 1]) to
    /// Vulkan's (Y down, depth in [0, 1]).
    ///
    /// ```text
    /// [1  0  0    0  ]
    /// [0 -1  0    0  ]
    /// [0  0  0.5  0.5]
    /// [0  0  0    1  ]
    /// ```
    fn vulkan_clip_remap() -> Mat4;

    /// Projection matrix with [`Mat4Ext::vulkan_clip_remap`] applied.
    fn to_vulkan_projection(&self) -> Mat4;

    /// Model matrix with the X component of its translation negated.
    ///
    /// Reconciles the left-handed source convention for object placement.
    /// Applying it twice returns the original matrix.
    fn to_vulkan_model(&self) -> Mat4;

    /// Right-handed perspective projection in the framework's convention
    /// (depth in [-1, 1]); pair with [`Mat4Ext::to_vulkan_projection`].
    fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4;

    /// Right-handed look-at view matrix.
    fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4;
}

impl Mat4Ext for Mat4 {
    #[rustfmt::skip]
    fn vulkan_clip_remap() -> Mat4 {
        Mat4::new(
            1.0,  0.0, 0.0, 0.0,
            0.0, -1.0, 0.0, 0.0,
            0.0,  0.0, 0.5, 0.5,
            0.0,  0.0, 0.0, 1.0,
        )
    }

    fn to_vulkan_projection(&self) -> Mat4 {
        Self::vulkan_clip_remap() * self
    }

    fn to_vulkan_model(&self) -> Mat4 {
        let mut corrected = *self;
        corrected[(0, 3)] = -corrected[(0, 3)];
        corrected
    }

    fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Mat4 {
        Mat4::new_perspective(aspect, fov_y, near, far)
    }

    fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Mat4 {
        Mat4::look_at_rh(&Point3::from(eye), &Point3::from(target), &up)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_model_correction_is_an_involution() {
        let model = Mat4::new_translation(&Vec3::new(3.0, -2.0, 7.5))
            * Mat4::from_axis_angle(&Vec3::y_axis(), 0.7)
            * Mat4::new_scaling(1.5);

        let once = model.to_vulkan_model();
        assert_relative_eq!(once[(0, 3)], -3.0);
        assert_relative_eq!(once[(1, 3)], -2.0);
        assert_relative_eq!(once[(2, 3)], 7.5);
        assert_relative_eq!(once.to_vulkan_model(), model);
    }

    #[test]
    fn test_model_correction_leaves_rotation_untouched() {
        let model = Mat4::from_axis_angle(&Vec3::z_axis(), 1.1);
        let corrected = model.to_vulkan_model();
        assert_relative_eq!(
            corrected.fixed_view::<3, 3>(0, 0).into_owned(),
            model.fixed_view::<3, 3>(0, 0).into_owned()
        );
    }

    #[test]
    fn test_clip_remap_keeps_view_center() {
        let remap = Mat4::vulkan_clip_remap();
        let center = remap * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(center.x, 0.0);
        assert_relative_eq!(center.y, 0.0);
    }

    #[test]
    fn test_clip_remap_halves_depth() {
        let remap = Mat4::vulkan_clip_remap();
        let depth = remap * Vec4::new(0.0, 0.0, 1.0, 0.0);
        assert_relative_eq!(depth.z, 0.5);

        let far = remap * Vec4::new(0.0, 0.0, 1.0, 1.0);
        assert_relative_eq!(far.z / far.w, 1.0);
        let near = remap * Vec4::new(0.0, 0.0, -1.0, 1.0);
        assert_relative_eq!(near.z / near.w, 0.0);
    }

    #[test]
    fn test_clip_remap_flips_y() {
        let up = Mat4::vulkan_clip_remap() * Vec4::new(0.25, 1.0, 0.0, 1.0);
        assert_relative_eq!(up.x, 0.25);
        assert_relative_eq!(up.y, -1.0);
    }

    #[test]
    fn test_projection_correction_maps_frustum_into_vulkan_depth_range() {
        let proj = Mat4::perspective(std::f32::consts::FRAC_PI_3, 16.0 / 9.0, 0.1, 100.0)
            .to_vulkan_projection();

        let near = proj * Vec4::new(0.0, 0.0, -0.1, 1.0);
        let far = proj * Vec4::new(0.0, 0.0, -100.0, 1.0);
        assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-5);
        assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn test_gpu_layout_is_column_major() {
        let m = Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0));
        let gpu = to_gpu(&m);
        assert_eq!(gpu[3], [1.0, 2.0, 3.0, 1.0]);
    }
}

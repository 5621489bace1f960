//! Procedural geometry used by the renderer facade

use crate::foundation::math::{Mat4, Vec3};
use crate::render::state::{ModelVertex, TextureImage};
use crate::render::Color;

/// Axis-aligned box given by its corners
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxShape {
    /// Minimum corner
    pub min: Vec3,
    /// Maximum corner
    pub max: Vec3,
}

impl BoxShape {
    /// Box spanning `min` to `max`
    pub const fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Box of `size` centered on the origin
    pub fn centered(size: Vec3) -> Self {
        Self::new(-size * 0.5, size * 0.5)
    }

    /// Center point
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Edge lengths
    pub fn size(&self) -> Vec3 {
        self.max - self.min
    }

    /// Maps the unit cube centered on the origin onto this box
    pub fn unit_cube_transform(&self) -> Mat4 {
        Mat4::new_translation(&self.center()) * Mat4::new_nonuniform_scaling(&self.size())
    }

    /// The eight corners; bit 0 of the index selects max x, bit 1 max y, bit 2 max z
    pub fn corners(&self) -> [Vec3; 8] {
        std::array::from_fn(|i| {
            Vec3::new(
                if i & 1 == 0 { self.min.x } else { self.max.x },
                if i & 2 == 0 { self.min.y } else { self.max.y },
                if i & 4 == 0 { self.min.z } else { self.max.z },
            )
        })
    }

    /// The twelve edges as corner pairs
    pub fn edges(&self) -> [(Vec3, Vec3); 12] {
        const EDGES: [(usize, usize); 12] = [
            (0, 1),
            (2, 3),
            (4, 5),
            (6, 7),
            (0, 2),
            (1, 3),
            (4, 6),
            (5, 7),
            (0, 4),
            (1, 5),
            (2, 6),
            (3, 7),
        ];
        let corners = self.corners();
        EDGES.map(|(a, b)| (corners[a], corners[b]))
    }
}

/// Unit cube centered on the origin: four vertices per face, counter-clockwise
/// seen from outside.
pub fn unit_cube(color: Color) -> (Vec<ModelVertex>, Vec<u32>) {
    // (normal, u, v) with u x v == normal
    let faces = [
        (Vec3::z(), Vec3::x(), Vec3::y()),
        (-Vec3::z(), -Vec3::x(), Vec3::y()),
        (Vec3::x(), -Vec3::z(), Vec3::y()),
        (-Vec3::x(), Vec3::z(), Vec3::y()),
        (Vec3::y(), Vec3::x(), -Vec3::z()),
        (-Vec3::y(), Vec3::x(), Vec3::z()),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u, v) in faces {
        let start = vertices.len() as u32;
        for (du, dv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let position = (normal + u * du + v * dv) * 0.5;
            vertices.push(ModelVertex {
                position: position.into(),
                normal: normal.into(),
                uv: [(du + 1.0) * 0.5, (dv + 1.0) * 0.5],
                color,
            });
        }
        indices.extend([0, 1, 2, 2, 3, 0].map(|i| start + i));
    }
    (vertices, indices)
}

/// Grid on the XZ plane centered on the origin, `cell_count` cells per side
pub fn grid_lines(cell_count: u32, cell_size: f32) -> Vec<(Vec3, Vec3)> {
    let half = cell_count as f32 * cell_size * 0.5;
    (0..=cell_count)
        .flat_map(|i| {
            let offset = -half + i as f32 * cell_size;
            [
                (Vec3::new(offset, 0.0, -half), Vec3::new(offset, 0.0, half)),
                (Vec3::new(-half, 0.0, offset), Vec3::new(half, 0.0, offset)),
            ]
        })
        .collect()
}

/// Unit X, Y and Z axes colored red, green and blue
pub fn axis_lines() -> [(Vec3, Vec3, Color); 3] {
    [
        (Vec3::zeros(), Vec3::x(), Color::RED),
        (Vec3::zeros(), Vec3::y(), Color::GREEN),
        (Vec3::zeros(), Vec3::z(), Color::BLUE),
    ]
}

/// Maps the unit cube onto a box running from `from` to `to` with a square
/// cross-section of `width`. `None` for a zero-length bone.
pub fn bone_transform(from: Vec3, to: Vec3, width: f32) -> Option<Mat4> {
    let axis = to - from;
    let length = axis.norm();
    if length <= f32::EPSILON {
        return None;
    }

    let x = axis / length;
    let helper = if x.y.abs() < 0.9 { Vec3::y() } else { Vec3::z() };
    let z = x.cross(&helper).normalize();
    let y = z.cross(&x);
    Some(Mat4::from_columns(&[
        (x * length).push(0.0),
        (y * width).push(0.0),
        (z * width).push(0.0),
        ((from + to) * 0.5).push(1.0),
    ]))
}

/// Two-tone checkerboard applied to meshes
pub fn checkered_texture(size: u32, cell: u32) -> TextureImage {
    const LIGHT: [u8; 4] = [0xff, 0xff, 0xff, 0xff];
    const DARK: [u8; 4] = [0xc0, 0xc0, 0xc0, 0xff];

    let cell = cell.max(1);
    let pixels = (0..size)
        .flat_map(|y| (0..size).map(move |x| (x, y)))
        .flat_map(|(x, y)| if (x / cell + y / cell) % 2 == 0 { LIGHT } else { DARK })
        .collect();
    TextureImage {
        width: size,
        height: size,
        pixels,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_cube_faces_wind_outwards() {
        let (vertices, indices) = unit_cube(Color::WHITE);
        assert_eq!(vertices.len(), 24);
        assert_eq!(indices.len(), 36);

        for triangle in indices.chunks(3) {
            let [a, b, c] = [0, 1, 2].map(|i| Vec3::from(vertices[triangle[i] as usize].position));
            let face_normal = (b - a).cross(&(c - a)).normalize();
            let normal = Vec3::from(vertices[triangle[0] as usize].normal);
            assert_relative_eq!(face_normal, normal, epsilon = 1e-6);
        }
        assert!(vertices
            .iter()
            .all(|v| v.position.iter().all(|c| (c.abs() - 0.5).abs() < 1e-6)));
    }

    #[test]
    fn test_box_transform_maps_unit_cube() {
        let shape = BoxShape::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(3.0, 6.0, 4.0));
        let transform = shape.unit_cube_transform();
        let low = transform.transform_point(&nalgebra::Point3::new(-0.5, -0.5, -0.5));
        let high = transform.transform_point(&nalgebra::Point3::new(0.5, 0.5, 0.5));
        assert_relative_eq!(low.coords, shape.min);
        assert_relative_eq!(high.coords, shape.max);
    }

    #[test]
    fn test_box_edges_have_axis_lengths() {
        let shape = BoxShape::centered(Vec3::new(2.0, 4.0, 6.0));
        let mut lengths: Vec<f32> = shape.edges().iter().map(|(a, b)| (b - a).norm()).collect();
        lengths.sort_by(f32::total_cmp);
        let expected: Vec<f32> = [[2.0; 4], [4.0; 4], [6.0; 4]].concat();
        assert_eq!(lengths, expected);
    }

    #[test]
    fn test_grid_is_centered() {
        let lines = grid_lines(4, 0.5);
        assert_eq!(lines.len(), 10);
        assert_relative_eq!(lines[0].0, Vec3::new(-1.0, 0.0, -1.0));
        assert_relative_eq!(lines[9].1, Vec3::new(1.0, 0.0, 1.0));
    }

    #[test]
    fn test_checkered_texture_alternates() {
        let texture = checkered_texture(4, 2);
        assert_eq!(texture.pixels.len(), 64);
        assert_eq!(texture.pixels[0], 0xff);
        assert_eq!(texture.pixels[2 * 4], 0xc0);
        assert_eq!(texture.pixels[(2 * 4 + 2) * 4], 0xff);
    }

    #[test]
    fn test_bone_spans_its_joints() {
        let from = Vec3::new(1.0, 0.0, 0.0);
        let to = Vec3::new(1.0, 2.0, 0.0);
        let bone = bone_transform(from, to, 0.2).unwrap();

        let start = bone.transform_point(&nalgebra::Point3::new(-0.5, 0.0, 0.0));
        let end = bone.transform_point(&nalgebra::Point3::new(0.5, 0.0, 0.0));
        assert_relative_eq!(start.coords, from, epsilon = 1e-6);
        assert_relative_eq!(end.coords, to, epsilon = 1e-6);

        let side = bone.transform_vector(&Vec3::new(0.0, 1.0, 0.0));
        assert_relative_eq!(side.norm(), 0.2, epsilon = 1e-6);
        assert_relative_eq!(side.dot(&(to - from)), 0.0, epsilon = 1e-6);
        assert!(bone.determinant() > 0.0);
    }

    #[test]
    fn test_zero_length_bone_is_skipped() {
        assert!(bone_transform(Vec3::x(), Vec3::x(), 0.1).is_none());
    }
}

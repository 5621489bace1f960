//! CPU linear-blend skinning and joint hierarchies

use crate::foundation::math::{Mat4, Point3, Vec3};
use crate::render::state::ModelVertex;
use crate::render::{Color, RenderError, RenderResult};

/// Maximum joint influences per vertex
pub const MAX_INFLUENCES: usize = 4;

/// Bind-pose vertex with up to four joint influences
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SkinnedVertex {
    /// Bind-pose position
    pub position: [f32; 3],
    /// Bind-pose normal
    pub normal: [f32; 3],
    /// Texture coordinate
    pub uv: [f32; 2],
    /// Vertex color
    pub color: Color,
    /// Joint indices into the skinning matrices
    pub joints: [u16; MAX_INFLUENCES],
    /// Joint weights; unused influences have weight 0
    pub weights: [f32; MAX_INFLUENCES],
}

impl SkinnedVertex {
    /// Vertex bound rigidly to a single joint
    pub fn rigid(position: Vec3, normal: Vec3, uv: [f32; 2], joint: u16) -> Self {
        Self {
            position: position.into(),
            normal: normal.into(),
            uv,
            color: Color::WHITE,
            joints: [joint, 0, 0, 0],
            weights: [1.0, 0.0, 0.0, 0.0],
        }
    }
}

/// Indexed triangle mesh in bind pose
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SkinnedMesh {
    /// Vertices
    pub vertices: Vec<SkinnedVertex>,
    /// Triangle list indices
    pub indices: Vec<u32>,
}

impl SkinnedMesh {
    /// Mesh from vertices and triangle indices
    pub fn new(vertices: Vec<SkinnedVertex>, indices: Vec<u32>) -> RenderResult<Self> {
        if indices.len() % 3 != 0 {
            return Err(RenderError::InvalidOperation {
                reason: format!("{} indices do not form whole triangles", indices.len()),
            });
        }
        if let Some(index) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(RenderError::InvalidOperation {
                reason: format!("index {index} out of range for {} vertices", vertices.len()),
            });
        }
        Ok(Self { vertices, indices })
    }

    /// Highest joint index referenced with a non-zero weight
    pub fn max_joint(&self) -> Option<u16> {
        self.vertices
            .iter()
            .flat_map(|v| v.joints.iter().zip(&v.weights))
            .filter(|(_, weight)| **weight > 0.0)
            .map(|(joint, _)| *joint)
            .max()
    }

    /// Deform every vertex by the weighted sum of its joints' matrices, then
    /// place the result with `transform`.
    ///
    /// Weights are renormalized to sum to one; a vertex with no weight stays
    /// in bind pose.
    pub fn skin(&self, joint_matrices: &[Mat4], transform: &Mat4) -> RenderResult<Vec<ModelVertex>> {
        if let Some(joint) = self.max_joint() {
            if usize::from(joint) >= joint_matrices.len() {
                return Err(RenderError::InvalidOperation {
                    reason: format!(
                        "mesh references joint {joint} but only {} skinning matrices were given",
                        joint_matrices.len()
                    ),
                });
            }
        }

        Ok(self
            .vertices
            .iter()
            .map(|vertex| {
                let blended = transform * blend(vertex, joint_matrices);
                deform(vertex, &blended)
            })
            .collect())
    }

    /// Place the bind pose with `transform`, ignoring joints
    pub fn rigid(&self, transform: &Mat4) -> Vec<ModelVertex> {
        self.vertices.iter().map(|vertex| deform(vertex, transform)).collect()
    }
}

/// Joint hierarchy with its rest pose. Every parent precedes its children.
#[derive(Debug, Clone, PartialEq)]
pub struct Skeleton {
    parents: Vec<Option<u16>>,
    rest_pose: Vec<Mat4>,
}

impl Skeleton {
    /// Skeleton from each joint's parent and parent-relative rest transform
    pub fn new(parents: Vec<Option<u16>>, rest_pose: Vec<Mat4>) -> RenderResult<Self> {
        if parents.len() != rest_pose.len() {
            return Err(RenderError::InvalidOperation {
                reason: format!("{} parents for {} rest transforms", parents.len(), rest_pose.len()),
            });
        }
        for (joint, parent) in parents.iter().enumerate() {
            if let Some(parent) = parent {
                if usize::from(*parent) >= joint {
                    return Err(RenderError::InvalidOperation {
                        reason: format!("joint {joint} has parent {parent}, which does not precede it"),
                    });
                }
            }
        }
        Ok(Self { parents, rest_pose })
    }

    /// Number of joints
    pub fn joint_count(&self) -> usize {
        self.parents.len()
    }

    /// Parent of every joint, `None` for roots
    pub fn parents(&self) -> &[Option<u16>] {
        &self.parents
    }

    /// Bones as `(parent, child)` joint pairs
    pub fn bones(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.parents
            .iter()
            .enumerate()
            .filter_map(|(child, parent)| parent.map(|parent| (usize::from(parent), child)))
    }

    /// Model-space matrix of every joint in the rest pose
    pub fn rest_pose_model_space(&self) -> Vec<Mat4> {
        let mut model_space: Vec<Mat4> = Vec::with_capacity(self.rest_pose.len());
        for (local, parent) in self.rest_pose.iter().zip(&self.parents) {
            let matrix = match parent {
                Some(parent) => model_space[usize::from(*parent)] * local,
                None => *local,
            };
            model_space.push(matrix);
        }
        model_space
    }
}

fn blend(vertex: &SkinnedVertex, joint_matrices: &[Mat4]) -> Mat4 {
    let total: f32 = vertex.weights.iter().filter(|w| **w > 0.0).sum();
    if total <= f32::EPSILON {
        return Mat4::identity();
    }

    vertex
        .joints
        .iter()
        .zip(&vertex.weights)
        .filter(|(_, weight)| **weight > 0.0)
        .fold(Mat4::zeros(), |sum, (joint, weight)| {
            sum + joint_matrices[usize::from(*joint)] * (*weight / total)
        })
}

fn deform(vertex: &SkinnedVertex, matrix: &Mat4) -> ModelVertex {
    let position = matrix.transform_point(&Point3::from(vertex.position));
    let normal = matrix
        .transform_vector(&Vec3::from(vertex.normal))
        .try_normalize(f32::EPSILON)
        .unwrap_or_else(|| Vec3::from(vertex.normal));
    ModelVertex {
        position: position.coords.into(),
        normal: normal.into(),
        uv: vertex.uv,
        color: vertex.color,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn strip() -> SkinnedMesh {
        SkinnedMesh::new(
            vec![
                SkinnedVertex::rigid(Vec3::new(0.0, 0.0, 0.0), Vec3::z(), [0.0, 0.0], 0),
                SkinnedVertex::rigid(Vec3::new(1.0, 0.0, 0.0), Vec3::z(), [1.0, 0.0], 1),
                SkinnedVertex {
                    joints: [0, 1, 0, 0],
                    weights: [2.0, 2.0, 0.0, 0.0],
                    ..SkinnedVertex::rigid(Vec3::new(0.5, 1.0, 0.0), Vec3::z(), [0.5, 1.0], 0)
                },
            ],
            vec![0, 1, 2],
        )
        .unwrap()
    }

    #[test]
    fn test_identity_pose_keeps_bind_pose() {
        let mesh = strip();
        let skinned = mesh.skin(&[Mat4::identity(); 2], &Mat4::identity()).unwrap();
        for (out, input) in skinned.iter().zip(&mesh.vertices) {
            assert_relative_eq!(Vec3::from(out.position), Vec3::from(input.position));
        }
    }

    #[test]
    fn test_weights_are_renormalized() {
        let mesh = strip();
        let joints = [Mat4::identity(), Mat4::new_translation(&Vec3::new(0.0, 2.0, 0.0))];
        let skinned = mesh.skin(&joints, &Mat4::identity()).unwrap();

        assert_relative_eq!(Vec3::from(skinned[1].position), Vec3::new(1.0, 2.0, 0.0));
        // Half of each joint after renormalizing 2.0 + 2.0.
        assert_relative_eq!(Vec3::from(skinned[2].position), Vec3::new(0.5, 2.0, 0.0));
    }

    #[test]
    fn test_transform_applied_after_skinning() {
        let mesh = strip();
        let joints = [Mat4::new_scaling(2.0); 2];
        let transform = Mat4::new_translation(&Vec3::new(10.0, 0.0, 0.0));
        let skinned = mesh.skin(&joints, &transform).unwrap();
        assert_relative_eq!(Vec3::from(skinned[1].position), Vec3::new(12.0, 0.0, 0.0));
        assert_relative_eq!(Vec3::from(skinned[1].normal), Vec3::z());
    }

    #[test]
    fn test_missing_joint_matrix_is_an_error() {
        assert!(strip().skin(&[Mat4::identity()], &Mat4::identity()).is_err());
    }

    #[test]
    fn test_invalid_indices_are_rejected() {
        let vertex = SkinnedVertex::rigid(Vec3::zeros(), Vec3::z(), [0.0, 0.0], 0);
        assert!(SkinnedMesh::new(vec![vertex; 3], vec![0, 1]).is_err());
        assert!(SkinnedMesh::new(vec![vertex; 3], vec![0, 1, 3]).is_err());
    }

    fn arm() -> Skeleton {
        let step = Mat4::new_translation(&Vec3::new(0.0, 1.0, 0.0));
        Skeleton::new(vec![None, Some(0), Some(1), Some(0)], vec![Mat4::identity(), step, step, step]).unwrap()
    }

    #[test]
    fn test_rest_pose_accumulates_parents() {
        let model_space = arm().rest_pose_model_space();
        assert_relative_eq!(model_space[2].transform_point(&Point3::origin()), Point3::new(0.0, 2.0, 0.0));
        assert_relative_eq!(model_space[3].transform_point(&Point3::origin()), Point3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn test_bones_pair_children_with_parents() {
        assert_eq!(arm().bones().collect::<Vec<_>>(), vec![(0, 1), (1, 2), (0, 3)]);
    }

    #[test]
    fn test_parents_must_precede_children() {
        assert!(Skeleton::new(vec![Some(1), None], vec![Mat4::identity(); 2]).is_err());
        assert!(Skeleton::new(vec![None, Some(1)], vec![Mat4::identity(); 2]).is_err());
        assert!(Skeleton::new(vec![None], Vec::new()).is_err());
    }
}

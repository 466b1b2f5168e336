//! Mesh geometry held by mesh nodes.
//!
//! Positions are in the node's local space. Topology is a flat triangle
//! index list; two meshes share topology when their vertex counts and index
//! lists match, which is what a morph target requires of its base.

use bakeshift_math::{DMat4, DVec3};
use serde::{Deserialize, Serialize};

/// A mesh consisting of vertex positions and triangle indices.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
pub struct Mesh {
    /// Vertex positions (one DVec3 per vertex)
    pub positions: Vec<DVec3>,

    /// Triangle indices (every 3 indices form a triangle)
    #[serde(default)]
    pub indices: Vec<u32>,
}

impl Mesh {
    /// Create a new mesh from positions and indices.
    pub fn new(positions: Vec<DVec3>, indices: Vec<u32>) -> Self {
        Self { positions, indices }
    }

    /// Axis-aligned box of `width` x `height` x `depth` centred on the origin.
    pub fn cuboid(width: f64, height: f64, depth: f64) -> Self {
        let h = DVec3::new(width, height, depth) * 0.5;
        let positions = vec![
            DVec3::new(-h.x, -h.y, -h.z),
            DVec3::new(h.x, -h.y, -h.z),
            DVec3::new(h.x, h.y, -h.z),
            DVec3::new(-h.x, h.y, -h.z),
            DVec3::new(-h.x, -h.y, h.z),
            DVec3::new(h.x, -h.y, h.z),
            DVec3::new(h.x, h.y, h.z),
            DVec3::new(-h.x, h.y, h.z),
        ];
        let indices = vec![
            0, 2, 1, 0, 3, 2, // back
            4, 5, 6, 4, 6, 7, // front
            0, 1, 5, 0, 5, 4, // bottom
            3, 7, 6, 3, 6, 2, // top
            0, 4, 7, 0, 7, 3, // left
            1, 2, 6, 1, 6, 5, // right
        ];
        Self::new(positions, indices)
    }

    /// Flat grid of `columns` x `rows` quads in the XZ plane, one unit apart.
    pub fn grid(columns: u32, rows: u32) -> Self {
        let mut positions = Vec::with_capacity(((columns + 1) * (rows + 1)) as usize);
        for row in 0..=rows {
            for column in 0..=columns {
                positions.push(DVec3::new(f64::from(column), 0.0, f64::from(row)));
            }
        }

        let stride = columns + 1;
        let mut indices = Vec::with_capacity((columns * rows * 6) as usize);
        for row in 0..rows {
            for column in 0..columns {
                let i0 = row * stride + column;
                let i1 = i0 + 1;
                let i2 = i0 + stride;
                let i3 = i2 + 1;
                indices.extend_from_slice(&[i0, i2, i1, i1, i2, i3]);
            }
        }

        Self::new(positions, indices)
    }

    /// Get the number of vertices in the mesh.
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Get the number of triangles in the mesh.
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// Check if `other` can stand in as a morph target for this mesh.
    pub fn same_topology(&self, other: &Mesh) -> bool {
        self.vertex_count() == other.vertex_count() && self.indices == other.indices
    }

    /// Copy of this mesh with every position transformed as a point.
    pub fn transformed(&self, matrix: &DMat4) -> Mesh {
        Mesh {
            positions: self
                .positions
                .iter()
                .map(|p| matrix.transform_point3(*p))
                .collect(),
            indices: self.indices.clone(),
        }
    }
}

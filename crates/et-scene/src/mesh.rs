//! Preprocessed triangle meshes
//!
//! A `SoundMesh` owns vertices, materials and preprocessed triangles.
//! Preprocessing computes per-triangle planes and areas, discovers symmetric
//! neighbor links across shared edges, classifies every edge as diffracting
//! or not from the dihedral angle, and builds a triangle BVH plus a bounding
//! sphere. Meshes are immutable once built and are shared between objects
//! through `Arc`.

use crate::bvh::Bvh;
use crate::math::{Aabb, Plane3};
use et_core::{EtError, EtResult, SoundMaterial};
use glam::Vec3;
use log::warn;
use std::collections::HashMap;

/// A position in a mesh's object space.
pub type SoundVertex = Vec3;

/// Raw input triangle: vertex indices plus a material index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoundTriangle {
    pub vertices: [u32; 3],
    pub material: u32,
}

impl SoundTriangle {
    pub fn new(v0: u32, v1: u32, v2: u32, material: u32) -> Self {
        Self {
            vertices: [v0, v1, v2],
            material,
        }
    }
}

/// Classification of a triangle edge for diffraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeType {
    NonDiffracting,
    Diffracting,
}

/// Edges are numbered (v0,v1), (v0,v2), (v1,v2).
pub const EDGE_VERTICES: [[usize; 2]; 3] = [[0, 1], [0, 2], [1, 2]];

/// The vertex opposite each edge, by edge index.
pub const EDGE_FREE_VERTEX: [usize; 3] = [2, 1, 0];

/// Two triangles whose normals deviate by less than this dot-product bound
/// are considered coplanar; their shared edge does not diffract.
const DIHEDRAL_DOT_THRESHOLD: f32 = 0.99;

/// A preprocessed mesh triangle.
#[derive(Debug, Clone)]
pub struct MeshTriangle {
    vertices: [u32; 3],
    material: u32,
    plane: Plane3,
    area: f32,
    neighbors: [Option<u32>; 3],
    edge_types: [EdgeType; 3],
}

impl MeshTriangle {
    #[inline]
    pub fn vertex_index(&self, corner: usize) -> u32 {
        self.vertices[corner]
    }

    #[inline]
    pub fn material_index(&self) -> u32 {
        self.material
    }

    /// The triangle's plane in object space, normal per winding.
    #[inline]
    pub fn plane(&self) -> &Plane3 {
        &self.plane
    }

    /// Object-space area.
    #[inline]
    pub fn area(&self) -> f32 {
        self.area
    }

    /// The triangle sharing edge `edge`, if any.
    #[inline]
    pub fn neighbor(&self, edge: usize) -> Option<u32> {
        self.neighbors[edge]
    }

    #[inline]
    pub fn edge_type(&self, edge: usize) -> EdgeType {
        self.edge_types[edge]
    }

    /// Vertex indices of edge `edge` in canonical order.
    #[inline]
    pub fn edge_vertex_indices(&self, edge: usize) -> (u32, u32) {
        let [a, b] = EDGE_VERTICES[edge];
        (self.vertices[a], self.vertices[b])
    }

    /// Index of the vertex not on edge `edge`.
    #[inline]
    pub fn free_vertex_index(&self, edge: usize) -> u32 {
        self.vertices[EDGE_FREE_VERTEX[edge]]
    }
}

/// Bounding sphere of a mesh in object space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingSphere {
    pub center: Vec3,
    pub radius: f32,
}

impl BoundingSphere {
    fn from_points(points: &[Vec3]) -> Self {
        if points.is_empty() {
            return Self {
                center: Vec3::ZERO,
                radius: 0.0,
            };
        }
        let bounds = Aabb::from_points(points.iter().copied());
        let center = bounds.center();
        let radius = points
            .iter()
            .map(|p| p.distance(center))
            .fold(0.0f32, f32::max);
        Self { center, radius }
    }
}

/// An immutable preprocessed triangle mesh.
#[derive(Debug, Clone)]
pub struct SoundMesh {
    vertices: Vec<SoundVertex>,
    triangles: Vec<MeshTriangle>,
    materials: Vec<SoundMaterial>,
    bounding_sphere: BoundingSphere,
    bvh: Bvh,
}

impl SoundMesh {
    /// Preprocess raw mesh data.
    ///
    /// Triangles with out-of-range indices, non-finite vertices or
    /// degenerate area are dropped with a warning. Fails only if the
    /// material table is empty while triangles reference it.
    pub fn build(
        vertices: Vec<SoundVertex>,
        triangles: &[SoundTriangle],
        materials: Vec<SoundMaterial>,
    ) -> EtResult<Self> {
        if materials.is_empty() && !triangles.is_empty() {
            return Err(EtError::InvalidMesh(
                "mesh with triangles has no materials".into(),
            ));
        }

        let mut kept: Vec<MeshTriangle> = Vec::with_capacity(triangles.len());
        let mut dropped = 0usize;
        for triangle in triangles {
            match preprocess_triangle(&vertices, materials.len(), triangle) {
                Some(mesh_triangle) => kept.push(mesh_triangle),
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            warn!("dropped {dropped} degenerate triangles during mesh preprocessing");
        }

        let mut triangles = kept;
        link_neighbors(&mut triangles);
        classify_edges(&mut triangles);

        let bvh = Bvh::build(
            &triangles
                .iter()
                .map(|t| {
                    Aabb::from_points(t.vertices.iter().map(|&v| vertices[v as usize]))
                })
                .collect::<Vec<_>>(),
        );
        let bounding_sphere = BoundingSphere::from_points(&vertices);

        Ok(Self {
            vertices,
            triangles,
            materials,
            bounding_sphere,
            bvh,
        })
    }

    /// Reassemble a mesh whose neighbor links and edge types were computed
    /// elsewhere (the mesh file reader). Planes, areas, the BVH and the
    /// bounding sphere are still recomputed.
    pub(crate) fn from_preprocessed(
        vertices: Vec<SoundVertex>,
        triangles: Vec<(SoundTriangle, [Option<u32>; 3], [EdgeType; 3])>,
        materials: Vec<SoundMaterial>,
        bounding_sphere: BoundingSphere,
    ) -> EtResult<Self> {
        let mut mesh_triangles = Vec::with_capacity(triangles.len());
        for (triangle, neighbors, edge_types) in triangles {
            let mut mesh_triangle = preprocess_triangle(&vertices, materials.len(), &triangle)
                .ok_or_else(|| EtError::InvalidMesh("degenerate triangle in mesh file".into()))?;
            mesh_triangle.neighbors = neighbors;
            mesh_triangle.edge_types = edge_types;
            mesh_triangles.push(mesh_triangle);
        }

        let bvh = Bvh::build(
            &mesh_triangles
                .iter()
                .map(|t| Aabb::from_points(t.vertices.iter().map(|&v| vertices[v as usize])))
                .collect::<Vec<_>>(),
        );

        Ok(Self {
            vertices,
            triangles: mesh_triangles,
            materials,
            bounding_sphere,
            bvh,
        })
    }

    #[inline]
    pub fn vertices(&self) -> &[SoundVertex] {
        &self.vertices
    }

    #[inline]
    pub fn vertex(&self, index: u32) -> Vec3 {
        self.vertices[index as usize]
    }

    #[inline]
    pub fn triangles(&self) -> &[MeshTriangle] {
        &self.triangles
    }

    #[inline]
    pub fn triangle(&self, index: u32) -> &MeshTriangle {
        &self.triangles[index as usize]
    }

    #[inline]
    pub fn materials(&self) -> &[SoundMaterial] {
        &self.materials
    }

    #[inline]
    pub fn material(&self, index: u32) -> &SoundMaterial {
        &self.materials[index as usize]
    }

    /// Material of the triangle at `index`.
    #[inline]
    pub fn triangle_material(&self, index: u32) -> &SoundMaterial {
        &self.materials[self.triangles[index as usize].material as usize]
    }

    #[inline]
    pub fn bounding_sphere(&self) -> &BoundingSphere {
        &self.bounding_sphere
    }

    #[inline]
    pub fn bvh(&self) -> &Bvh {
        &self.bvh
    }

    /// Corner positions of the triangle at `index` in object space.
    #[inline]
    pub fn triangle_corners(&self, index: u32) -> [Vec3; 3] {
        let triangle = &self.triangles[index as usize];
        [
            self.vertices[triangle.vertices[0] as usize],
            self.vertices[triangle.vertices[1] as usize],
            self.vertices[triangle.vertices[2] as usize],
        ]
    }
}

fn preprocess_triangle(
    vertices: &[SoundVertex],
    num_materials: usize,
    triangle: &SoundTriangle,
) -> Option<MeshTriangle> {
    if triangle
        .vertices
        .iter()
        .any(|&v| v as usize >= vertices.len())
        || triangle.material as usize >= num_materials
    {
        return None;
    }
    let [a, b, c] = triangle.vertices.map(|v| vertices[v as usize]);
    if !(a.is_finite() && b.is_finite() && c.is_finite()) {
        return None;
    }
    let cross = (b - a).cross(c - a);
    let area = 0.5 * cross.length();
    if area <= f32::EPSILON {
        return None;
    }
    Some(MeshTriangle {
        vertices: triangle.vertices,
        material: triangle.material,
        plane: Plane3::from_points(a, b, c),
        area,
        neighbors: [None; 3],
        edge_types: [EdgeType::Diffracting; 3],
    })
}

/// Link triangles that share an edge. Links are symmetric: if a shows b as
/// its neighbor across an edge, b shows a across the matching edge.
fn link_neighbors(triangles: &mut [MeshTriangle]) {
    // Key is the vertex index pair in ascending order.
    let mut edge_owner: HashMap<(u32, u32), (u32, usize)> = HashMap::new();

    for index in 0..triangles.len() {
        for edge in 0..3 {
            let (a, b) = triangles[index].edge_vertex_indices(edge);
            let key = if a < b { (a, b) } else { (b, a) };
            match edge_owner.get(&key) {
                Some(&(other, other_edge)) => {
                    triangles[index].neighbors[edge] = Some(other);
                    triangles[other as usize].neighbors[other_edge] = Some(index as u32);
                }
                None => {
                    edge_owner.insert(key, (index as u32, edge));
                }
            }
        }
    }
}

/// Classify each edge from the dihedral angle with its neighbor.
///
/// Unshared edges always diffract. A shared edge diffracts unless the two
/// faces are nearly coplanar and facing the same way.
fn classify_edges(triangles: &mut [MeshTriangle]) {
    for index in 0..triangles.len() {
        for edge in 0..3 {
            let edge_type = match triangles[index].neighbors[edge] {
                None => EdgeType::Diffracting,
                Some(neighbor) => {
                    let n0 = triangles[index].plane.normal;
                    let n1 = triangles[neighbor as usize].plane.normal;
                    if n0.dot(n1).abs() >= DIHEDRAL_DOT_THRESHOLD {
                        EdgeType::NonDiffracting
                    } else {
                        EdgeType::Diffracting
                    }
                }
            };
            triangles[index].edge_types[edge] = edge_type;
        }
    }
}

//! This module is responsible for creating a mesh for a chunk.
//! It uses marching cubes over the voxel centers of the chunk, where voxels that are not stored
//! are filled in from the terrain height.
//!
//! Only cells that can contain a surface are visited:
//! - Cells with at least one stored corner
//! - Cells near the terrain surface
//! - Cells below the terrain next to stored air, which form the walls of caves

use crate::{
    lerp,
    tables::{CORNER_OFFSETS, EDGE_CONNECTIONS, EDGE_TABLE, TRI_TABLE},
    HeightCache, SparseVoxelField, VoxelBaseline, SDF_AIR, SDF_SOLID,
};

use bevy::{
    prelude::*,
    utils::{HashMap, HashSet},
};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// How far away stored air may be to open up a cave wall, in voxels
const CAVITY_SEARCH_RADIUS: i32 = 2;
/// Edges with corner values closer than this are split in the middle
const INTERPOLATION_EPSILON: f32 = 1e-5;

/// Settings used when generating chunk meshes
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshSettings {
    /// Vertices closer than this to the terrain are pulled toward it. Zero disables blending
    pub transition_height: f32,
    /// The exponent of the transition curve, higher values keep vertices in place for longer
    pub transition_sharpness: f32,
    /// Add a skirt from the open edges of the mesh down to the terrain
    pub generate_skirt: bool,
}

impl Default for MeshSettings {
    fn default() -> Self {
        Self {
            transition_height: 0.,
            transition_sharpness: 2.,
            generate_skirt: false,
        }
    }
}

/// A triangle mesh in world space
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    /// Vertex positions
    pub positions: Vec<Vec3>,
    /// Three vertex indices per triangle
    pub indices: Vec<u32>,
    /// One normal per vertex, pointing out of the solid
    pub normals: Vec<Vec3>,
}

impl MeshData {
    /// Check if the mesh has no triangles
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() || self.indices.is_empty()
    }

    /// The number of vertices
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// The number of triangles
    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    fn compute_normals(&mut self) {
        let mut normals = vec![Vec3::ZERO; self.positions.len()];
        for triangle in self.indices.chunks_exact(3) {
            let [a, b, c] = [triangle[0], triangle[1], triangle[2]].map(|i| i as usize);
            // Not normalized, so larger triangles weigh more
            let normal = (self.positions[b] - self.positions[a])
                .cross(self.positions[c] - self.positions[a]);
            normals[a] += normal;
            normals[b] += normal;
            normals[c] += normal;
        }
        self.normals = normals.into_iter().map(|n| -n.normalize_or_zero()).collect();
    }
}

/// Get the edges used by exactly one triangle, in the direction the triangle uses them
pub fn find_rim_edges(indices: &[u32]) -> Vec<[u32; 2]> {
    let mut counts: HashMap<[u32; 2], usize> = HashMap::default();
    let mut edges = Vec::new();
    for triangle in indices.chunks_exact(3) {
        for i in 0..3 {
            let edge = [triangle[i], triangle[(i + 1) % 3]];
            let key = [edge[0].min(edge[1]), edge[0].max(edge[1])];
            let count = counts.entry(key).or_insert(0);
            if *count == 0 {
                edges.push(edge);
            }
            *count += 1;
        }
    }
    edges.retain(|edge| counts[&[edge[0].min(edge[1]), edge[0].max(edge[1])]] == 1);
    edges
}

/// Get every vertex on the open boundary of a mesh, sorted by index
pub fn find_rim_vertices(indices: &[u32]) -> Vec<u32> {
    let mut vertices: Vec<u32> = find_rim_edges(indices).into_iter().flatten().collect();
    vertices.sort_unstable();
    vertices.dedup();
    vertices
}

/// Close the gap between the open boundary of a mesh and the terrain below it
pub fn add_skirt(mesh: &mut MeshData, heights: &HeightCache) {
    for [a, b] in find_rim_edges(&mesh.indices) {
        let base = mesh.positions.len() as u32;
        for rim in [a, b] {
            let position = mesh.positions[rim as usize];
            mesh.positions
                .push(position.truncate().extend(heights.height_at(position.truncate())));
            mesh.normals.push(mesh.normals[rim as usize]);
        }
        let (skirt_a, skirt_b) = (base, base + 1);
        mesh.indices.extend([a, b, skirt_b, a, skirt_b, skirt_a]);
    }
}

fn weld_key(position: Vec3) -> [u32; 3] {
    // -0.0 and 0.0 are the same position
    position
        .to_array()
        .map(|c| if c == 0. { 0f32.to_bits() } else { c.to_bits() })
}

struct Corner {
    key: IVec3,
    position: Vec3,
    value: f32,
}

fn interpolate(a: &Corner, b: &Corner) -> Vec3 {
    // Always interpolate in the same direction so neighbouring cells agree on the result
    let (a, b) = if (a.key.x, a.key.y, a.key.z) <= (b.key.x, b.key.y, b.key.z) {
        (a, b)
    } else {
        (b, a)
    };
    let difference = a.value - b.value;
    if difference.abs() < INTERPOLATION_EPSILON {
        return (a.position + b.position) / 2.;
    }
    a.position + (b.position - a.position) * (a.value / difference)
}

struct Marcher<'a> {
    field: &'a SparseVoxelField,
    heights: Option<&'a HeightCache>,
    settings: &'a MeshSettings,
    voxel_size: f32,
    cavity_cells: HashSet<IVec3>,
}

impl<'a> Marcher<'a> {
    fn new(
        field: &'a SparseVoxelField,
        heights: Option<&'a HeightCache>,
        settings: &'a MeshSettings,
    ) -> Self {
        let mut marcher = Self {
            field,
            heights,
            settings,
            voxel_size: field.config().voxel_size(),
            cavity_cells: HashSet::default(),
        };

        // Every cell that touches a cell with a stored air corner below the terrain
        let cavities: Vec<IVec3> = field
            .voxels()
            .iter()
            .filter(|(key, value)| **value > 0. && marcher.is_below_terrain(**key))
            .map(|(key, _)| *key)
            .collect();
        for key in cavities {
            for x in -2..=1 {
                for y in -2..=1 {
                    for z in -2..=1 {
                        marcher.cavity_cells.insert(key + IVec3::new(x, y, z));
                    }
                }
            }
        }
        marcher
    }

    fn is_below_terrain(&self, key: IVec3) -> bool {
        self.heights.map_or(false, |heights| {
            self.field.world_center(key).z < heights.column_height(key.x, key.y)
        })
    }

    fn is_cell_active(&self, cell: IVec3) -> bool {
        if CORNER_OFFSETS
            .iter()
            .any(|offset| self.field.contains(cell + *offset))
        {
            return true;
        }
        let Some(heights) = self.heights else {
            return false;
        };

        let (min_height, max_height) = [(0, 0), (1, 0), (0, 1), (1, 1)]
            .iter()
            .map(|(x, y)| heights.column_height(cell.x + x, cell.y + y))
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), h| {
                (min.min(h), max.max(h))
            });
        let bottom = self.field.world_center(cell).z;
        let top = bottom + self.voxel_size;

        if bottom < max_height && self.cavity_cells.contains(&cell) {
            return true;
        }
        bottom <= max_height + self.voxel_size && top >= min_height - self.voxel_size
    }

    fn cavity_value(&self, key: IVec3) -> f32 {
        let r = CAVITY_SEARCH_RADIUS;
        let mut nearest = None;
        for x in -r..=r {
            for y in -r..=r {
                for z in -r..=r {
                    let other = key + IVec3::new(x, y, z);
                    let is_air = self.field.stored(other).map_or(false, |value| value > 0.);
                    if !is_air || !self.is_below_terrain(other) {
                        continue;
                    }
                    let distance = IVec3::new(x, y, z).as_vec3().length() * self.voxel_size;
                    if nearest.map_or(true, |nearest| distance < nearest) {
                        nearest = Some(distance);
                    }
                }
            }
        }

        match nearest {
            Some(distance) => {
                let influence = (1. - distance / (r as f32 * self.voxel_size)).clamp(0., 1.);
                lerp(SDF_SOLID, 0.5, influence)
            }
            None => SDF_SOLID,
        }
    }

    fn corner_value(&self, key: IVec3) -> f32 {
        if let Some(value) = self.field.stored(key) {
            return value;
        }
        if self.is_below_terrain(key) {
            self.cavity_value(key)
        } else {
            SDF_AIR
        }
    }

    fn apply_transition(&self, vertex: Vec3) -> Vec3 {
        let band = self.settings.transition_height;
        let Some(heights) = self.heights.filter(|_| band > 0.) else {
            return vertex;
        };
        let height = heights.height_at(vertex.truncate());
        let distance = (vertex.z - height).abs();
        if distance >= band {
            return vertex;
        }
        let blend = (distance / band).powf(self.settings.transition_sharpness);
        vertex.truncate().extend(lerp(height, vertex.z, blend))
    }

    /// March every cell with a minimum corner in `min..max`
    fn march(&self, min: IVec3, max: IVec3) -> MeshData {
        let mut mesh = MeshData::default();
        let mut welded: HashMap<[u32; 3], u32> = HashMap::default();
        let mut triangle: SmallVec<[Vec3; 15]> = SmallVec::new();

        for z in min.z..max.z {
            for y in min.y..max.y {
                for x in min.x..max.x {
                    let cell = IVec3::new(x, y, z);
                    if !self.is_cell_active(cell) {
                        continue;
                    }

                    let corners = CORNER_OFFSETS.map(|offset| {
                        let key = cell + offset;
                        Corner {
                            key,
                            position: self.field.world_center(key),
                            value: self.corner_value(key),
                        }
                    });
                    let cube_index = corners
                        .iter()
                        .enumerate()
                        .filter(|(_, corner)| corner.value < 0.)
                        .fold(0, |index, (i, _)| index | (1 << i));
                    if EDGE_TABLE[cube_index] == 0 {
                        continue;
                    }

                    triangle.clear();
                    for edge in TRI_TABLE[cube_index].iter().take_while(|edge| **edge >= 0) {
                        let [a, b] = EDGE_CONNECTIONS[*edge as usize];
                        triangle.push(self.apply_transition(interpolate(&corners[a], &corners[b])));
                    }

                    for vertex in triangle.iter() {
                        let index = *welded.entry(weld_key(*vertex)).or_insert_with(|| {
                            mesh.positions.push(*vertex);
                            mesh.positions.len() as u32 - 1
                        });
                        mesh.indices.push(index);
                    }
                }
            }
        }

        mesh.compute_normals();
        mesh
    }
}

/// Generates meshes for a single chunk, and keeps the terrain heights it sampled for it
#[derive(Clone, Debug, Default)]
pub struct ChunkMesher {
    settings: MeshSettings,
    heights: Option<HeightCache>,
}

impl ChunkMesher {
    /// Create a mesher with the given settings
    pub fn new(settings: MeshSettings) -> Self {
        Self {
            settings,
            heights: None,
        }
    }

    /// The settings used for every mesh
    pub fn settings(&self) -> &MeshSettings {
        &self.settings
    }

    /// The terrain heights sampled for the last generated mesh
    pub fn height_cache(&self) -> Option<&HeightCache> {
        self.heights.as_ref()
    }

    fn refresh_heights(&mut self, field: &SparseVoxelField) {
        let VoxelBaseline::Terrain(source) = field.baseline() else {
            self.heights = None;
            return;
        };
        let chunk_min = field.chunk_min_corner();
        let voxel_size = field.config().voxel_size();
        let valid = self
            .heights
            .as_ref()
            .map_or(false, |cache| cache.is_valid_for(chunk_min, voxel_size));
        if !valid {
            self.heights = Some(HeightCache::build(
                source.as_ref(),
                chunk_min,
                voxel_size,
                field.config().voxels_per_chunk(),
            ));
        }
    }

    /// Generate the mesh for a field. Returns None if the field is empty or no surface passes
    /// through the chunk
    pub fn generate(&mut self, field: &SparseVoxelField) -> Option<MeshData> {
        if field.is_empty() {
            debug!("Chunk {} has no voxels, skipping its mesh", field.chunk());
            return None;
        }
        self.refresh_heights(field);

        let heights = self.heights.as_ref();
        let cells = IVec3::splat(field.config().voxels_per_chunk());
        let mut mesh = Marcher::new(field, heights, &self.settings).march(IVec3::ZERO, cells);
        if mesh.is_empty() {
            debug!("Chunk {} produced an empty mesh", field.chunk());
            return None;
        }
        if let (true, Some(heights)) = (self.settings.generate_skirt, heights) {
            add_skirt(&mut mesh, heights);
        }
        Some(mesh)
    }
}

/// Generate the mesh of an extracted island on its own, ignoring any terrain
pub fn generate_island_mesh(field: &SparseVoxelField) -> Option<MeshData> {
    if field.is_empty() {
        return None;
    }
    // Islands may sit anywhere in the overflow region, so march around the stored voxels
    let (min, max) = field.voxels().keys().fold(
        (IVec3::splat(i32::MAX), IVec3::splat(i32::MIN)),
        |(min, max), key| (min.min(*key), max.max(*key)),
    );
    let settings = MeshSettings::default();
    let mesh = Marcher::new(field, None, &settings).march(min - 1, max + 1);
    (!mesh.is_empty()).then_some(mesh)
}

#[cfg(test)]
fn flat_field(height: f32) -> SparseVoxelField {
    use crate::{FlatTerrain, VoxelConfig};
    use std::sync::Arc;

    SparseVoxelField::new(
        VoxelConfig::default(),
        IVec3::ZERO,
        VoxelBaseline::Terrain(Arc::new(FlatTerrain(height))),
    )
}

#[cfg(test)]
fn assert_valid_mesh(mesh: &MeshData) {
    assert_eq!(mesh.indices.len() % 3, 0);
    assert_eq!(mesh.normals.len(), mesh.positions.len());
    assert!(mesh
        .indices
        .iter()
        .all(|i| (*i as usize) < mesh.positions.len()));
    for normal in mesh.normals.iter() {
        assert!((normal.length() - 1.).abs() < 1e-3 || *normal == Vec3::ZERO);
    }
    // Welding never leaves two vertices at the same position
    let unique: HashSet<[u32; 3]> = mesh.positions.iter().map(|p| weld_key(*p)).collect();
    assert_eq!(unique.len(), mesh.positions.len());
}

#[test]
fn test_empty_field_has_no_mesh() {
    let mut mesher = ChunkMesher::default();
    assert!(mesher.generate(&flat_field(100.)).is_none());
    assert!(generate_island_mesh(&flat_field(100.)).is_none());
}

#[test]
fn test_flat_terrain_surface() {
    let mut field = flat_field(100.);
    // A solid voxel deep below the surface changes nothing
    field.set(IVec3::new(5, 5, 0), SDF_SOLID, false);

    let mut mesher = ChunkMesher::default();
    let mesh = mesher.generate(&field).unwrap();
    assert_valid_mesh(&mesh);
    for (position, normal) in mesh.positions.iter().zip(mesh.normals.iter()) {
        assert!((position.z - 100.).abs() < 1e-3, "{position}");
        assert!(normal.z > 0.99, "{normal}");
    }
    assert!(mesher.height_cache().is_some());

    // Blending toward the terrain leaves a surface on the terrain where it is
    let mut blended = ChunkMesher::new(MeshSettings {
        transition_height: 30.,
        ..default()
    });
    assert_eq!(blended.generate(&field).unwrap().positions, mesh.positions);
}

#[test]
fn test_dug_hole_opens_the_surface() {
    let mut field = flat_field(400.);
    let plain = ChunkMesher::default()
        .generate(&{
            let mut field = field.clone();
            field.set(IVec3::new(1, 1, 1), SDF_SOLID, false);
            field
        })
        .unwrap();

    // Air just below the surface
    for x in 14..18 {
        for y in 14..18 {
            field.set(IVec3::new(x, y, 15), SDF_AIR, true);
        }
    }
    let mesh = ChunkMesher::default().generate(&field).unwrap();
    assert_valid_mesh(&mesh);
    assert!(mesh.triangle_count() > plain.triangle_count());
    assert!(mesh.positions.iter().any(|p| p.z < 390.));
}

#[test]
fn test_island_mesh_is_closed() {
    let mut field = SparseVoxelField::new(
        crate::VoxelConfig::default(),
        IVec3::ZERO,
        VoxelBaseline::Air,
    );
    for x in 10..13 {
        for y in 10..13 {
            for z in 10..13 {
                field.set(IVec3::new(x, y, z), SDF_SOLID, false);
            }
        }
    }
    let center = field.world_center(IVec3::splat(11));

    let mesh = generate_island_mesh(&field).unwrap();
    assert_valid_mesh(&mesh);
    assert!(find_rim_edges(&mesh.indices).is_empty());
    for (position, normal) in mesh.positions.iter().zip(mesh.normals.iter()) {
        assert!(normal.dot(*position - center) > 0., "{position} {normal}");
    }

    // The chunk mesher agrees when the field has no terrain
    let chunk_mesh = ChunkMesher::default().generate(&field).unwrap();
    assert_eq!(chunk_mesh.triangle_count(), mesh.triangle_count());
}

#[test]
fn test_island_mesh_on_the_chunk_border_is_closed() {
    let mut field = SparseVoxelField::new(
        crate::VoxelConfig::default(),
        IVec3::ZERO,
        VoxelBaseline::Air,
    );
    for x in 0..3 {
        for y in 10..13 {
            for z in 10..13 {
                field.set(IVec3::new(x, y, z), SDF_SOLID, false);
            }
        }
    }
    field.set(IVec3::new(-1, 11, 11), SDF_AIR, true);

    let mesh = generate_island_mesh(&field).unwrap();
    assert_valid_mesh(&mesh);
    assert!(find_rim_edges(&mesh.indices).is_empty());
    // The face on the chunk boundary is part of the mesh
    assert!(mesh.positions.iter().any(|p| p.x.abs() < 1e-3));
}

#[test]
fn test_rim_edges_of_a_quad() {
    let indices = [0, 1, 2, 0, 2, 3];
    let rim = find_rim_edges(&indices);
    assert_eq!(rim.len(), 4);
    assert!(rim.contains(&[0, 1]) && rim.contains(&[3, 0]));
    assert!(!rim.contains(&[2, 0]));
    assert_eq!(find_rim_vertices(&indices), vec![0, 1, 2, 3]);
}

#[test]
fn test_skirt_reaches_the_terrain() {
    let mut field = flat_field(-50.);
    // A floating slab above the terrain with open sides at the chunk border
    for x in 0..=32 {
        for y in 0..=32 {
            field.set(IVec3::new(x, y, 4), SDF_SOLID, false);
        }
    }

    let mut plain = ChunkMesher::default();
    let open = plain.generate(&field).unwrap();
    let rim = find_rim_edges(&open.indices).len();
    assert!(rim > 0);

    let mut skirted = ChunkMesher::new(MeshSettings {
        generate_skirt: true,
        ..default()
    });
    let mesh = skirted.generate(&field).unwrap();
    assert_eq!(mesh.vertex_count(), open.vertex_count() + rim * 2);
    assert_eq!(mesh.triangle_count(), open.triangle_count() + rim * 2);
    assert_eq!(
        mesh.positions.iter().filter(|p| (p.z + 50.).abs() < 1e-3).count(),
        rim * 2
    );
}

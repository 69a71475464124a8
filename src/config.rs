//! The coordinate system shared by every part of the voxel field.
//!
//! Three spaces are aligned with each other:
//! - World space, in world units with Z pointing up
//! - Chunk space, where each integer step covers `chunk_world_size` world units
//! - Voxel space, either local to a chunk or global across all chunks
//!
//! Chunks are addressed by their minimum corner and voxels by their minimum corner as well, the
//! world position of a voxel is its center.

use bevy::prelude::*;
use fast_surface_nets::ndshape::{ConstShape3u8, Shape};
use serde::{Deserialize, Serialize};

const DEFAULT_CHUNK_SIZE: i32 = 8;
const DEFAULT_SUBDIVISIONS: i32 = 4;
const DEFAULT_TERRAIN_GRID_SIZE: f32 = 100.;

/// Offsets to the six face neighbours of a voxel
pub const FACE_DIRECTIONS: [IVec3; 6] = [
    IVec3::X,
    IVec3::NEG_X,
    IVec3::Y,
    IVec3::NEG_Y,
    IVec3::Z,
    IVec3::NEG_Z,
];

/// A 3x3x3 block centered on a voxel or chunk, used to walk its full neighbourhood
pub const NEIGHBOURHOOD_SHAPE: ConstShape3u8<3, 3, 3> = ConstShape3u8::<3, 3, 3>;

/// The offsets to all 26 neighbours of a voxel, diagonals included
pub fn moore_neighbourhood() -> impl Iterator<Item = IVec3> {
    (0..NEIGHBOURHOOD_SHAPE.size()).filter_map(|i| {
        let [x, y, z] = NEIGHBOURHOOD_SHAPE.delinearize(i);
        let offset = IVec3::new(x as i32, y as i32, z as i32) - IVec3::ONE;
        (offset != IVec3::ZERO).then_some(offset)
    })
}

/// The configuration of the voxel grid. It is set once at startup and only read afterwards
#[derive(Resource, Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoxelConfig {
    /// The number of terrain grid cells along each edge of a chunk
    pub chunk_size: i32,
    /// The number of voxels along each edge of a terrain grid cell
    pub subdivisions: i32,
    /// The size of a terrain grid cell in world units
    pub terrain_grid_size: f32,
    /// The world position of the corner of chunk (0, 0, 0)
    pub origin: Vec3,
    /// How many voxels outside its own bounds a chunk may store, used to stitch chunk seams
    pub overflow: i32,
}

impl Default for VoxelConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            subdivisions: DEFAULT_SUBDIVISIONS,
            terrain_grid_size: DEFAULT_TERRAIN_GRID_SIZE,
            origin: Vec3::ZERO,
            overflow: 1,
        }
    }
}

impl VoxelConfig {
    /// Construct a config, replacing values that would break the coordinate math with defaults
    pub fn new(chunk_size: i32, subdivisions: i32, terrain_grid_size: f32, origin: Vec3) -> Self {
        Self {
            chunk_size,
            subdivisions,
            terrain_grid_size,
            origin,
            ..default()
        }
        .sanitized()
    }

    /// Get a copy of this config where every invalid value is replaced by its default
    pub fn sanitized(mut self) -> Self {
        if self.chunk_size <= 0 {
            warn!("Invalid chunk size {}, using {DEFAULT_CHUNK_SIZE}", self.chunk_size);
            self.chunk_size = DEFAULT_CHUNK_SIZE;
        }
        if self.subdivisions <= 0 {
            warn!("Invalid subdivisions {}, using {DEFAULT_SUBDIVISIONS}", self.subdivisions);
            self.subdivisions = DEFAULT_SUBDIVISIONS;
        }
        if !self.terrain_grid_size.is_finite() || self.terrain_grid_size <= 0. {
            warn!(
                "Invalid terrain grid size {}, using {DEFAULT_TERRAIN_GRID_SIZE}",
                self.terrain_grid_size
            );
            self.terrain_grid_size = DEFAULT_TERRAIN_GRID_SIZE;
        }
        if !self.origin.is_finite() {
            warn!("Invalid origin {}, using zero", self.origin);
            self.origin = Vec3::ZERO;
        }
        self.overflow = self.overflow.max(0);
        self
    }

    /// The number of voxels along each edge of a chunk
    pub fn voxels_per_chunk(&self) -> i32 {
        self.chunk_size * self.subdivisions
    }

    /// The size of a single voxel in world units
    pub fn voxel_size(&self) -> f32 {
        self.terrain_grid_size / self.subdivisions as f32
    }

    /// The size of a chunk in world units
    pub fn chunk_world_size(&self) -> f32 {
        self.voxels_per_chunk() as f32 * self.voxel_size()
    }

    /// Get the chunk that contains a world position
    pub fn world_to_chunk(&self, pos: Vec3) -> IVec3 {
        ((pos - self.origin) / self.chunk_world_size())
            .floor()
            .as_ivec3()
    }

    /// Get the minimum corner of a chunk
    pub fn chunk_to_world(&self, chunk: IVec3) -> Vec3 {
        self.origin + chunk.as_vec3() * self.chunk_world_size()
    }

    /// Get the voxel containing a world position, local to the chunk containing that position
    pub fn world_to_local_voxel(&self, pos: Vec3) -> IVec3 {
        self.world_to_chunk_and_local(pos).1
    }

    /// Get the chunk containing a world position, and the local voxel inside that chunk
    pub fn world_to_chunk_and_local(&self, pos: Vec3) -> (IVec3, IVec3) {
        let chunk = self.world_to_chunk(pos);
        let local = ((pos - self.chunk_to_world(chunk)) / self.voxel_size())
            .floor()
            .as_ivec3()
            // Rounding can land a position on the far boundary of its own chunk
            .clamp(IVec3::ZERO, IVec3::splat(self.voxels_per_chunk() - 1));
        (chunk, local)
    }

    /// Get the world position of the center of a voxel local to a chunk
    pub fn local_voxel_to_world(&self, chunk: IVec3, local: IVec3) -> Vec3 {
        self.chunk_to_world(chunk) + (local.as_vec3() + 0.5) * self.voxel_size()
    }

    /// Get the global voxel containing a world position
    pub fn world_to_global_voxel(&self, pos: Vec3) -> IVec3 {
        ((pos - self.origin) / self.voxel_size()).floor().as_ivec3()
    }

    /// Get the world position of the center of a global voxel
    pub fn global_voxel_to_world(&self, global: IVec3) -> Vec3 {
        self.origin + (global.as_vec3() + 0.5) * self.voxel_size()
    }

    /// Split a global voxel into its chunk and the canonical local voxel inside that chunk
    pub fn global_to_chunk_and_local(&self, global: IVec3) -> (IVec3, IVec3) {
        let n = self.voxels_per_chunk();
        (
            IVec3::new(global.x.div_euclid(n), global.y.div_euclid(n), global.z.div_euclid(n)),
            IVec3::new(global.x.rem_euclid(n), global.y.rem_euclid(n), global.z.rem_euclid(n)),
        )
    }

    /// Join a chunk and a local voxel into a global voxel. Local voxels in the overflow region
    /// map to the global voxel they overlap
    pub fn chunk_and_local_to_global(&self, chunk: IVec3, local: IVec3) -> IVec3 {
        chunk * self.voxels_per_chunk() + local
    }

    /// Check if a local voxel may be stored by a chunk, including the overflow region
    pub fn is_valid_local_voxel(&self, local: IVec3) -> bool {
        let min = -self.overflow;
        let max = self.voxels_per_chunk() - 1 + self.overflow;
        local.cmpge(IVec3::splat(min)).all() && local.cmple(IVec3::splat(max)).all()
    }

    /// Check if a local voxel lies on or beyond the boundary of its chunk
    pub fn is_border_voxel(&self, local: IVec3) -> bool {
        let last = self.voxels_per_chunk() - 1;
        local.cmple(IVec3::ZERO).any() || local.cmpge(IVec3::splat(last)).any()
    }
}

/// Get the mesh section index for a chunk. Every chunk within 2^20 chunks of the origin gets a
/// distinct index
pub fn section_index(chunk: IVec3) -> u64 {
    const MASK: u64 = (1 << 21) - 1;
    let pack = |v: i32| v as u32 as u64 & MASK;
    (pack(chunk.x) << 42) | (pack(chunk.y) << 21) | pack(chunk.z)
}

#[test]
fn test_invalid_config_falls_back() {
    let config = VoxelConfig::new(0, -3, f32::NAN, Vec3::ZERO);
    assert_eq!(config.chunk_size, 8);
    assert_eq!(config.subdivisions, 4);
    assert_eq!(config.terrain_grid_size, 100.);
    assert_eq!(config.voxel_size(), 25.);
    assert_eq!(config.voxels_per_chunk(), 32);
    assert_eq!(config.chunk_world_size(), 800.);
}

#[test]
fn test_world_to_chunk_floors() {
    let config = VoxelConfig::default();
    assert_eq!(config.world_to_chunk(Vec3::new(0., 0., 0.)), IVec3::ZERO);
    assert_eq!(config.world_to_chunk(Vec3::new(799., 1., 1.)), IVec3::ZERO);
    assert_eq!(config.world_to_chunk(Vec3::new(800., -1., 0.)), IVec3::new(1, -1, 0));
    assert_eq!(
        config.world_to_chunk(Vec3::new(-1600., -1601., 2400.)),
        IVec3::new(-2, -3, 3)
    );
}

#[test]
fn test_world_voxel_round_trip() {
    let config = VoxelConfig::new(8, 4, 100., Vec3::new(13., -7., 250.));
    let voxel_size = config.voxel_size();
    for pos in [
        Vec3::new(0., 0., 0.),
        Vec3::new(-1.5, 799.9, 12.),
        Vec3::new(1234.5, -4321., 77.7),
        Vec3::new(-800., -800., -800.),
    ] {
        let (chunk, local) = config.world_to_chunk_and_local(pos);
        let back = config.local_voxel_to_world(chunk, local);
        assert!(back.distance(pos) <= voxel_size, "{pos} came back as {back}");

        let global = config.world_to_global_voxel(pos);
        assert_eq!(config.chunk_and_local_to_global(chunk, local), global);
        assert_eq!(config.global_to_chunk_and_local(global), (chunk, local));
        assert!(config.global_voxel_to_world(global).distance(back) < 1e-3);
    }
}

#[test]
fn test_valid_local_voxel_range() {
    let config = VoxelConfig::default();
    assert!(config.is_valid_local_voxel(IVec3::new(-1, 0, 32)));
    assert!(!config.is_valid_local_voxel(IVec3::new(-2, 0, 0)));
    assert!(!config.is_valid_local_voxel(IVec3::new(0, 33, 0)));
    assert!(config.is_border_voxel(IVec3::new(5, 0, 5)));
    assert!(config.is_border_voxel(IVec3::new(5, 5, 31)));
    assert!(!config.is_border_voxel(IVec3::new(1, 30, 15)));
}

#[test]
fn test_neighbourhood_has_26_offsets() {
    let offsets: Vec<_> = moore_neighbourhood().collect();
    assert_eq!(offsets.len(), 26);
    assert!(!offsets.contains(&IVec3::ZERO));
    assert!(offsets.contains(&IVec3::new(-1, 1, -1)));
}

#[test]
fn test_section_index_is_unique() {
    let mut seen = bevy::utils::HashSet::default();
    for x in -3..3 {
        for y in -3..3 {
            for z in -3..3 {
                assert!(seen.insert(section_index(IVec3::new(x, y, z))));
            }
        }
    }
    // Coordinates that concatenate to the same digits stay distinct
    assert_ne!(
        section_index(IVec3::new(1, 23, 4)),
        section_index(IVec3::new(12, 3, 4))
    );
}

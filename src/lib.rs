//! This crate holds the voxel sculpting core of the digger.
//! Terrain is described by a sparse signed distance field per chunk. Only voxels that were
//! touched by an edit are stored, everything else is derived from the terrain height below it.
//!
//! Values follow a single sign convention:
//! - Negative values are solid, [SDF_SOLID] is fully solid
//! - Positive values are air, [SDF_AIR] is fully open
//!
//! Edits are made with brush strokes, which are routed to the affected chunks by the
//! [ChunkDirector]. Dirty chunks are re-meshed with marching cubes on background tasks.

#![warn(missing_docs)]
#![allow(clippy::too_many_arguments)]

mod codec;
mod error;
pub use error::{VoxelIoError, VoxelResult};

pub mod config;
pub use config::{section_index, VoxelConfig};

pub mod terrain;
pub use terrain::{FlatTerrain, HeightCache, HeightSource, NoTerrain, SharedHeightSource};

mod field;
pub use field::{SparseVoxelField, VoxelBaseline, SET_EPSILON};

pub mod island;
pub use island::{IslandData, ISLAND_ITERATION_CAP};

pub mod brush;
pub use brush::{brush_bounds, BrushShape, BrushStroke, ShapeSdf};

mod brush_asset;
pub use brush_asset::SdfBrushAsset;

pub mod tables;

pub mod marching_cubes;
pub use marching_cubes::{generate_island_mesh, ChunkMesher, MeshData, MeshSettings};

mod chunk;
pub use chunk::{MeshJob, ModificationReport, VoxelChunk};

pub mod backend;
pub use backend::{select_backend, BackendPreference, CpuBackend, VoxelBackend};

pub mod director;
pub use director::{
    ChunkDirector, DiggerPlugin, DirectorSettings, IslandExtraction, MeshSections, MeshSink,
};

/// The value of a voxel that is fully solid
pub const SDF_SOLID: f32 = -1.;
/// The value of a voxel that is fully air
pub const SDF_AIR: f32 = 1.;

#[inline(always)]
pub(crate) fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

#[inline(always)]
pub(crate) fn smoothstep(t: f32) -> f32 {
    let t = t.clamp(0., 1.);
    t * t * (3. - 2. * t)
}

#[test]
fn test_smoothstep_endpoints() {
    assert_eq!(smoothstep(-1.), 0.);
    assert_eq!(smoothstep(0.5), 0.5);
    assert_eq!(smoothstep(3.), 1.);
    assert_eq!(lerp(SDF_SOLID, SDF_AIR, 0.25), -0.5);
}

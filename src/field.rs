//! The sparse signed distance field owned by every chunk

use crate::{
    codec, SharedHeightSource, VoxelConfig, VoxelIoError, VoxelResult, SDF_AIR, SDF_SOLID,
};

use bevy::{prelude::*, utils::HashMap};
use std::{
    fmt,
    io::{Read, Write},
};

/// Values closer than this are considered equal, and values closer than this to zero are
/// never stored
pub const SET_EPSILON: f32 = 0.001;

/// The largest voxel count accepted when reading a serialized field
const MAX_SERIALIZED_VOXELS: i64 = 100_000_000;

/// What a voxel resolves to when the field has no stored value for it
#[derive(Clone)]
pub enum VoxelBaseline {
    /// Voxels below the terrain height are solid, voxels above it are air
    Terrain(SharedHeightSource),
    /// Every voxel that is not stored is air
    Air,
}

impl fmt::Debug for VoxelBaseline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terrain(_) => f.write_str("Terrain"),
            Self::Air => f.write_str("Air"),
        }
    }
}

/// A sparse map from local voxel coordinates to signed distance values.
///
/// Only voxels that were explicitly written are stored. Keys are local to the owning chunk and
/// may reach into the overflow region around it.
#[derive(Clone, Debug)]
pub struct SparseVoxelField {
    config: VoxelConfig,
    chunk: IVec3,
    baseline: VoxelBaseline,
    voxels: HashMap<IVec3, f32>,
    dirty: bool,
    border_dirty: bool,
    rebuild_requested: bool,
}

impl SparseVoxelField {
    /// Create an empty field for a chunk
    pub fn new(config: VoxelConfig, chunk: IVec3, baseline: VoxelBaseline) -> Self {
        Self {
            config,
            chunk,
            baseline,
            voxels: HashMap::default(),
            dirty: false,
            border_dirty: false,
            rebuild_requested: false,
        }
    }

    /// The coordinate config this field was created with
    pub fn config(&self) -> &VoxelConfig {
        &self.config
    }

    /// The coordinate of the chunk this field belongs to
    pub fn chunk(&self) -> IVec3 {
        self.chunk
    }

    /// What missing voxels resolve to
    pub fn baseline(&self) -> &VoxelBaseline {
        &self.baseline
    }

    /// The world position of the minimum corner of the owning chunk
    pub fn chunk_min_corner(&self) -> Vec3 {
        self.config.chunk_to_world(self.chunk)
    }

    /// The world position of the center of a voxel in this field
    pub fn world_center(&self, key: IVec3) -> Vec3 {
        self.config.local_voxel_to_world(self.chunk, key)
    }

    /// The terrain height at a world XY position, or None when the field has no terrain
    pub fn terrain_height_at(&self, xy: Vec2) -> Option<f32> {
        match &self.baseline {
            VoxelBaseline::Terrain(source) => Some(source.height_or_default(xy)),
            VoxelBaseline::Air => None,
        }
    }

    /// Get the value of a voxel. Voxels that are not stored resolve through the baseline
    pub fn get(&self, key: IVec3) -> f32 {
        if let Some(value) = self.voxels.get(&key) {
            return *value;
        }
        let center = self.world_center(key);
        match self.terrain_height_at(center.truncate()) {
            Some(height) if center.z < height => SDF_SOLID,
            _ => SDF_AIR,
        }
    }

    /// Check if a voxel is solid, stored or not
    pub fn is_solid(&self, key: IVec3) -> bool {
        self.get(key) < 0.
    }

    /// Get the stored value of a voxel, without falling back to the baseline
    pub fn stored(&self, key: IVec3) -> Option<f32> {
        self.voxels.get(&key).copied()
    }

    /// Check if a voxel has a stored value
    pub fn contains(&self, key: IVec3) -> bool {
        self.voxels.contains_key(&key)
    }

    /// All stored voxels
    pub fn voxels(&self) -> &HashMap<IVec3, f32> {
        &self.voxels
    }

    /// The number of stored voxels
    pub fn len(&self) -> usize {
        self.voxels.len()
    }

    /// Check if the field stores no voxels at all
    pub fn is_empty(&self) -> bool {
        self.voxels.is_empty()
    }

    /// Write a value into the field, blending it with the stored value.
    /// Digging keeps the larger value and adding keeps the smaller one.
    ///
    /// Returns false without changing anything if the value is not finite, is too close to zero,
    /// lies outside the chunk and its overflow, or would not change the stored value.
    pub fn set(&mut self, key: IVec3, value: f32, dig: bool) -> bool {
        if !value.is_finite() || value.abs() < SET_EPSILON {
            return false;
        }
        if !self.config.is_valid_local_voxel(key) {
            return false;
        }

        let new_value = match self.voxels.get(&key) {
            Some(&old) => {
                let blended = if dig { old.max(value) } else { old.min(value) };
                if (blended - old).abs() < SET_EPSILON {
                    return false;
                }
                blended
            }
            None => value,
        };

        self.voxels.insert(key, new_value);
        self.dirty = true;
        if self.config.is_border_voxel(key) {
            self.border_dirty = true;
        }
        true
    }

    /// Remove a single stored voxel
    pub fn remove(&mut self, key: IVec3) -> bool {
        let removed = self.voxels.remove(&key).is_some();
        self.dirty |= removed;
        removed
    }

    /// Remove a batch of voxels and request an immediate rebuild of the owning chunk.
    /// Returns the number of voxels that were stored
    pub fn remove_voxels(&mut self, keys: &[IVec3]) -> usize {
        let removed = keys
            .iter()
            .filter(|key| self.voxels.remove(*key).is_some())
            .count();
        if removed > 0 {
            self.dirty = true;
            self.rebuild_requested = true;
        }
        removed
    }

    /// Remove every stored voxel
    pub fn clear(&mut self) {
        if !self.voxels.is_empty() {
            self.voxels.clear();
            self.dirty = true;
            self.rebuild_requested = true;
        }
    }

    /// Find the stored voxel closest to `start` within a cube of `radius` voxels
    pub fn find_nearest_set_voxel(&self, start: IVec3, radius: i32) -> Option<IVec3> {
        if self.voxels.contains_key(&start) {
            return Some(start);
        }

        let mut best = None;
        let mut best_distance = i32::MAX;
        for x in -radius..=radius {
            for y in -radius..=radius {
                for z in -radius..=radius {
                    let offset = IVec3::new(x, y, z);
                    let distance = offset.length_squared();
                    if distance < best_distance && self.voxels.contains_key(&(start + offset)) {
                        best_distance = distance;
                        best = Some(start + offset);
                    }
                }
            }
        }
        best
    }

    /// Check if anything changed since the change flags were last cleared
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Check if a voxel on the chunk border changed, so neighbouring seams may need a rebuild
    pub fn is_border_dirty(&self) -> bool {
        self.border_dirty
    }

    /// Check if a destructive change asked for the chunk mesh to be rebuilt right away
    pub fn rebuild_requested(&self) -> bool {
        self.rebuild_requested
    }

    /// Reset all change flags, called once the owning chunk picked them up
    pub fn clear_change_flags(&mut self) {
        self.dirty = false;
        self.border_dirty = false;
        self.rebuild_requested = false;
    }

    /// Serialize the stored voxels, preceded by the grid config they were made for
    pub fn write_to(&self, w: &mut impl Write) -> VoxelResult<()> {
        codec::write_i32(w, self.config.terrain_grid_size.round() as i32)?;
        codec::write_i32(w, self.config.subdivisions)?;
        codec::write_i32(w, self.config.chunk_size)?;
        codec::write_i32(w, self.voxels.len() as i32)?;
        for (key, value) in self.voxels.iter() {
            codec::write_ivec3(w, *key)?;
            codec::write_f32(w, *value)?;
        }
        Ok(())
    }

    /// Replace the stored voxels with the ones read from a stream written by
    /// [SparseVoxelField::write_to]. Entries that [SparseVoxelField::set] would reject are
    /// skipped. Returns the number of voxels stored
    pub fn read_from(&mut self, r: &mut impl Read) -> VoxelResult<usize> {
        let grid_size = codec::read_i32(r)?;
        let subdivisions = codec::read_i32(r)?;
        let chunk_size = codec::read_i32(r)?;
        if grid_size != self.config.terrain_grid_size.round() as i32
            || subdivisions != self.config.subdivisions
            || chunk_size != self.config.chunk_size
        {
            warn!(
                "Voxel data for chunk {} was saved with grid size {grid_size}, subdivisions \
                 {subdivisions} and chunk size {chunk_size}",
                self.chunk
            );
        }

        let count = codec::read_i32(r)? as i64;
        if !(0..=MAX_SERIALIZED_VOXELS).contains(&count) {
            warn!("Rejecting voxel data with {count} voxels");
            return Err(VoxelIoError::InvalidVoxelCount(count));
        }

        // The count is not trusted for allocation, a truncated stream fails on its first entry
        let mut voxels = HashMap::default();
        let mut skipped = 0;
        for _ in 0..count {
            let key = codec::read_ivec3(r)?;
            let value = codec::read_f32(r)?;
            if !value.is_finite()
                || value.abs() < SET_EPSILON
                || !self.config.is_valid_local_voxel(key)
            {
                skipped += 1;
                continue;
            }
            voxels.insert(key, value);
        }
        if skipped > 0 {
            warn!("Skipped {skipped} invalid voxels while reading chunk {}", self.chunk);
        }

        let stored = voxels.len();
        self.voxels = voxels;
        self.dirty = true;
        self.rebuild_requested = true;
        Ok(stored)
    }
}

#[cfg(test)]
fn test_field() -> SparseVoxelField {
    use crate::FlatTerrain;
    use std::sync::Arc;

    SparseVoxelField::new(
        VoxelConfig::default(),
        IVec3::ZERO,
        VoxelBaseline::Terrain(Arc::new(FlatTerrain(0.))),
    )
}

#[test]
fn test_set_blends_toward_mode() {
    let mut field = test_field();
    let key = IVec3::new(3, 4, 5);

    assert!(field.set(key, -0.5, true));
    assert!(field.set(key, 0.25, true));
    assert_eq!(field.get(key), 0.25);
    // Digging never moves a voxel toward solid
    assert!(!field.set(key, -1., true));
    assert_eq!(field.get(key), 0.25);

    assert!(field.set(key, -0.75, false));
    assert_eq!(field.get(key), -0.75);
    assert!(!field.set(key, 0.9, false));
}

#[test]
fn test_set_rejects_noise() {
    let mut field = test_field();
    let key = IVec3::new(1, 1, 1);
    assert!(!field.set(key, 0., true));
    assert!(!field.set(key, 0.0005, true));
    assert!(!field.set(key, f32::NAN, true));
    assert!(!field.set(key, f32::INFINITY, false));
    assert!(!field.set(IVec3::new(-2, 0, 0), 1., true));
    assert!(field.is_empty());
    assert!(!field.is_dirty());

    assert!(field.set(key, 0.5, true));
    field.clear_change_flags();
    assert!(!field.set(key, 0.5005, true));
    assert!(!field.is_dirty());
}

#[test]
fn test_border_writes_flag_neighbours() {
    let mut field = test_field();
    assert!(field.set(IVec3::new(5, 5, 5), 1., true));
    assert!(field.is_dirty());
    assert!(!field.is_border_dirty());
    assert!(field.set(IVec3::new(-1, 5, 5), 1., true));
    assert!(field.is_border_dirty());
}

#[test]
fn test_missing_voxels_follow_terrain() {
    let mut field = test_field();
    // With the chunk at the origin every voxel center is above height 0
    let key = IVec3::new(2, 2, 0);
    assert!(!field.is_solid(key));
    assert!(field.is_solid(IVec3::new(2, 2, -1)));

    field.set(key, -0.3, false);
    assert!(field.is_solid(key));
    assert_eq!(field.stored(key), Some(-0.3));

    let air = SparseVoxelField::new(VoxelConfig::default(), IVec3::ZERO, VoxelBaseline::Air);
    assert_eq!(air.get(IVec3::new(2, 2, -1)), SDF_AIR);
}

#[test]
fn test_remove_voxels_requests_rebuild() {
    let mut field = test_field();
    field.set(IVec3::ONE, 1., true);
    field.set(IVec3::ZERO, -1., false);
    field.clear_change_flags();

    assert_eq!(field.remove_voxels(&[IVec3::ONE, IVec3::splat(9)]), 1);
    assert!(field.rebuild_requested());
    assert!(!field.contains(IVec3::ONE));
    assert_eq!(field.len(), 1);
}

#[test]
fn test_find_nearest_set_voxel() {
    let mut field = test_field();
    field.set(IVec3::new(10, 10, 10), 1., true);
    field.set(IVec3::new(12, 10, 10), 1., true);

    assert_eq!(
        field.find_nearest_set_voxel(IVec3::new(11, 10, 9), 2),
        Some(IVec3::new(10, 10, 10))
    );
    assert_eq!(field.find_nearest_set_voxel(IVec3::new(5, 5, 5), 2), None);
}

#[test]
fn test_serialization_round_trip() {
    let mut field = test_field();
    for i in 0..3000 {
        let key = IVec3::new(i % 32, (i / 32) % 32, i / 1024);
        let value = match i % 4 {
            0 => SDF_SOLID,
            1 => SDF_AIR,
            2 => 0.999,
            _ => -(i as f32 / 3000.).max(0.01),
        };
        field.set(key, value, i % 2 == 0);
    }

    let mut bytes = Vec::new();
    field.write_to(&mut bytes).unwrap();
    assert_eq!(bytes.len(), 16 + field.len() * 16);

    let mut loaded = test_field();
    assert_eq!(loaded.read_from(&mut bytes.as_slice()).unwrap(), field.len());
    assert_eq!(loaded.voxels(), field.voxels());

    let mut empty = Vec::new();
    test_field().write_to(&mut empty).unwrap();
    assert_eq!(loaded.read_from(&mut empty.as_slice()).unwrap(), 0);
    assert!(loaded.is_empty());
}

#[test]
fn test_rejects_corrupt_voxel_count() {
    let mut bytes = Vec::new();
    for v in [100, 4, 8, -5] {
        bytes.extend_from_slice(&(v as i32).to_le_bytes());
    }
    let mut field = test_field();
    assert!(matches!(
        field.read_from(&mut bytes.as_slice()),
        Err(VoxelIoError::InvalidVoxelCount(-5))
    ));
}

#[test]
fn test_read_skips_invalid_entries() {
    let mut bytes = Vec::new();
    for v in [100, 4, 8, 4] {
        bytes.extend_from_slice(&(v as i32).to_le_bytes());
    }
    for (key, value) in [
        (IVec3::new(1000, 0, 0), -1.),
        (IVec3::new(1, 1, 1), 0.),
        (IVec3::new(2, 2, 2), f32::NAN),
        (IVec3::new(3, 3, 3), -0.5),
    ] {
        codec::write_ivec3(&mut bytes, key).unwrap();
        codec::write_f32(&mut bytes, value).unwrap();
    }

    let mut field = test_field();
    assert_eq!(field.read_from(&mut bytes.as_slice()).unwrap(), 1);
    assert_eq!(field.len(), 1);
    assert_eq!(field.stored(IVec3::new(3, 3, 3)), Some(-0.5));
    assert!(!field.contains(IVec3::new(1000, 0, 0)));
    assert!(!field.contains(IVec3::new(1, 1, 1)));
    assert!(!field.contains(IVec3::new(2, 2, 2)));
}

#[test]
fn test_truncated_stream_with_huge_count_fails() {
    let mut bytes = Vec::new();
    for v in [100, 4, 8, MAX_SERIALIZED_VOXELS as i32] {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    let mut field = test_field();
    field.set(IVec3::ONE, 0.5, true);
    assert!(matches!(
        field.read_from(&mut bytes.as_slice()),
        Err(VoxelIoError::Io(_))
    ));
    // A failed read leaves the field untouched
    assert_eq!(field.stored(IVec3::ONE), Some(0.5));
}

//! Flood fill queries over a [SparseVoxelField], used to find and cut loose floating pieces of
//! terrain.
//!
//! Only stored voxels take part. The implicit terrain below the landscape never becomes part of
//! an island, so a flood fill always stays within the edited region.

use crate::{
    config::{moore_neighbourhood, FACE_DIRECTIONS},
    SparseVoxelField, VoxelBaseline, SDF_AIR,
};

use bevy::{prelude::*, utils::HashSet};
use std::collections::VecDeque;

/// The maximum number of cells a single flood fill may visit before it gives up
pub const ISLAND_ITERATION_CAP: usize = 500_000;

/// A connected group of solid voxels
#[derive(Clone, Debug, PartialEq)]
pub struct IslandData {
    /// The mean world position of all voxel centers in the island
    pub centroid: Vec3,
    /// The number of voxels in the island
    pub voxel_count: usize,
    /// One voxel of the island, usable to extract it later
    pub reference_voxel: IVec3,
    /// Every voxel of the island, local to the chunk it was found in
    pub voxels: Vec<IVec3>,
}

impl IslandData {
    pub(crate) fn from_voxels(field: &SparseVoxelField, voxels: Vec<IVec3>) -> Option<Self> {
        let reference_voxel = *voxels.first()?;
        let sum = voxels
            .iter()
            .fold(Vec3::ZERO, |sum, key| sum + field.world_center(*key));
        Some(Self {
            centroid: sum / voxels.len() as f32,
            voxel_count: voxels.len(),
            reference_voxel,
            voxels,
        })
    }
}

fn flood_fill(
    start: IVec3,
    offsets: &[IVec3],
    mut is_member: impl FnMut(IVec3) -> bool,
    visited: &mut HashSet<IVec3>,
    cap: usize,
) -> (Vec<IVec3>, bool) {
    let mut members = Vec::new();
    let mut queue = VecDeque::from([start]);
    visited.insert(start);

    while let Some(current) = queue.pop_front() {
        if members.len() >= cap {
            return (members, false);
        }
        members.push(current);

        for offset in offsets {
            let neighbour = current + *offset;
            if !visited.contains(&neighbour) && is_member(neighbour) {
                visited.insert(neighbour);
                queue.push_back(neighbour);
            }
        }
    }

    (members, true)
}

impl SparseVoxelField {
    fn is_island_voxel(&self, key: IVec3, threshold: f32) -> bool {
        self.stored(key)
            .map_or(false, |value| value.is_finite() && value < threshold)
    }

    /// The voxel of this field containing a world position. Positions outside the chunk map to
    /// keys outside its canonical range
    pub fn island_start_voxel(&self, world: Vec3) -> IVec3 {
        ((world - self.chunk_min_corner()) / self.config().voxel_size())
            .floor()
            .as_ivec3()
    }

    fn collect_island(&self, start: IVec3, cap: usize) -> Vec<IVec3> {
        if !self.is_island_voxel(start, 0.) {
            warn!("Island start voxel {start} in chunk {} is not solid", self.chunk());
            return Vec::new();
        }

        let mut visited = HashSet::default();
        let (voxels, complete) = flood_fill(
            start,
            &FACE_DIRECTIONS,
            |key| self.is_island_voxel(key, 0.),
            &mut visited,
            cap,
        );
        if !complete {
            error!(
                "Island flood fill in chunk {} reached the limit of {cap} voxels",
                self.chunk()
            );
        }
        voxels
    }

    /// Collect the face connected solid voxels around the voxel containing a world position,
    /// without changing the field
    pub fn collect_island_at_position(&self, world: Vec3) -> Vec<IVec3> {
        self.collect_island(self.island_start_voxel(world), ISLAND_ITERATION_CAP)
    }

    /// Collect the face connected solid voxels around a voxel, without changing the field
    pub fn collect_island_from_voxel(&self, key: IVec3) -> Vec<IVec3> {
        self.collect_island(key, ISLAND_ITERATION_CAP)
    }

    /// Cut the island containing a world position out of this field.
    /// See [SparseVoxelField::extract_island_by_voxel]
    pub fn extract_island_at_position(
        &mut self,
        world: Vec3,
    ) -> Option<(SparseVoxelField, Vec<IVec3>)> {
        self.extract_island_by_voxel(self.island_start_voxel(world))
    }

    /// Cut the island containing a voxel out of this field.
    ///
    /// The returned field holds the surface of the island, the solid layer just inside it, and
    /// an air shell just outside it, so it can be meshed on its own. Every island voxel is
    /// removed from this field and a rebuild is requested.
    pub fn extract_island_by_voxel(&mut self, key: IVec3) -> Option<(SparseVoxelField, Vec<IVec3>)> {
        self.extract_island(key, ISLAND_ITERATION_CAP)
    }

    fn extract_island(
        &mut self,
        key: IVec3,
        cap: usize,
    ) -> Option<(SparseVoxelField, Vec<IVec3>)> {
        let voxels = self.collect_island(key, cap);
        if voxels.is_empty() {
            return None;
        }

        let members: HashSet<IVec3> = voxels.iter().copied().collect();
        let is_surface = |key: IVec3| {
            FACE_DIRECTIONS
                .iter()
                .any(|dir| !self.is_island_voxel(key + *dir, 0.))
        };

        let mut island = SparseVoxelField::new(*self.config(), self.chunk(), VoxelBaseline::Air);
        for voxel in voxels.iter().filter(|key| is_surface(**key)) {
            if let Some(value) = self.stored(*voxel) {
                island.set(*voxel, value, false);
            }
            for dir in FACE_DIRECTIONS {
                let neighbour = *voxel + dir;
                if members.contains(&neighbour) {
                    if let Some(value) = self.stored(neighbour) {
                        island.set(neighbour, value, false);
                    }
                } else {
                    island.set(neighbour, SDF_AIR, true);
                }
            }
        }

        self.remove_voxels(&voxels);
        Some((island, voxels))
    }

    /// Find every group of stored voxels below `sdf_threshold` connected through faces, edges or
    /// corners. The field is not changed
    pub fn detect_islands(&self, sdf_threshold: f32) -> Vec<IslandData> {
        self.find_islands(sdf_threshold, ISLAND_ITERATION_CAP)
    }

    fn find_islands(&self, sdf_threshold: f32, cap: usize) -> Vec<IslandData> {
        let offsets: Vec<IVec3> = moore_neighbourhood().collect();
        let mut visited = HashSet::default();
        let mut islands = Vec::new();

        // Sorted so the reported islands do not depend on hash order
        let mut candidates: Vec<IVec3> = self
            .voxels()
            .iter()
            .filter(|(_, value)| value.is_finite() && **value < sdf_threshold)
            .map(|(key, _)| *key)
            .collect();
        candidates.sort_by_key(|key| (key.z, key.y, key.x));

        for start in candidates {
            if visited.contains(&start) {
                continue;
            }
            let (voxels, complete) = flood_fill(
                start,
                &offsets,
                |key| self.is_island_voxel(key, sdf_threshold),
                &mut visited,
                cap,
            );
            if !complete {
                error!(
                    "Island detection in chunk {} reached the limit of {cap} voxels",
                    self.chunk()
                );
            }
            islands.extend(IslandData::from_voxels(self, voxels));
        }

        islands
    }
}

#[cfg(test)]
fn blob_field() -> SparseVoxelField {
    use crate::{FlatTerrain, VoxelConfig};
    use std::sync::Arc;

    let mut field = SparseVoxelField::new(
        VoxelConfig::default(),
        IVec3::ZERO,
        VoxelBaseline::Terrain(Arc::new(FlatTerrain(0.))),
    );
    for x in 10..13 {
        for y in 10..13 {
            for z in 10..13 {
                field.set(IVec3::new(x, y, z), -1., false);
            }
        }
    }
    field
}

#[test]
fn test_extract_floating_blob() {
    let mut field = blob_field();
    field.clear_change_flags();
    let center = field.world_center(IVec3::splat(11));

    assert_eq!(field.collect_island_at_position(center).len(), 27);

    let (island, voxels) = field.extract_island_at_position(center).unwrap();
    assert_eq!(voxels.len(), 27);
    assert!(field.is_empty());
    assert!(field.rebuild_requested());

    // Every stored voxel of the new field is part of the blob or its one voxel shell
    let members: HashSet<IVec3> = voxels.iter().copied().collect();
    for (key, value) in island.voxels() {
        if members.contains(key) {
            assert!(*value < 0.);
        } else {
            assert_eq!(*value, SDF_AIR);
            assert!(FACE_DIRECTIONS.iter().any(|dir| members.contains(&(*key + *dir))));
        }
    }
    // 26 surface voxels, the center as their internal neighbour and 54 shell voxels
    assert_eq!(island.len(), 27 + 54);
}

#[test]
fn test_extract_from_air_is_none() {
    let mut field = blob_field();
    assert!(field.extract_island_by_voxel(IVec3::new(0, 0, 20)).is_none());
    // Implicit terrain is never part of an island
    assert!(field.collect_island_from_voxel(IVec3::new(0, 0, -5)).is_empty());
    assert_eq!(field.len(), 27);
}

#[test]
fn test_detect_islands_uses_diagonals() {
    let mut field = blob_field();
    // Touches the blob only on a corner
    field.set(IVec3::new(13, 13, 13), -0.5, false);
    // Fully separate
    field.set(IVec3::new(20, 20, 20), -1., false);
    field.set(IVec3::new(20, 20, 21), -1., false);
    // Air does not count
    field.set(IVec3::new(25, 25, 25), 1., true);

    let islands = field.detect_islands(0.);
    assert_eq!(islands.len(), 2);
    let mut counts: Vec<_> = islands.iter().map(|island| island.voxel_count).collect();
    counts.sort();
    assert_eq!(counts, vec![2, 28]);

    let pair = islands.iter().find(|island| island.voxel_count == 2).unwrap();
    let expected = (field.world_center(IVec3::new(20, 20, 20))
        + field.world_center(IVec3::new(20, 20, 21)))
        / 2.;
    assert!(pair.centroid.distance(expected) < 1e-3);
    assert!(pair.voxels.contains(&pair.reference_voxel));

    // The corner voxel is not solid enough for this threshold and drops out
    let strict = field.detect_islands(-0.75);
    assert_eq!(strict.iter().map(|island| island.voxel_count).sum::<usize>(), 29);
    assert_eq!(field.len(), 31);
}

#[test]
fn test_iteration_cap_returns_partial_islands() {
    let mut field = blob_field();
    let start = IVec3::splat(10);

    let collected = field.collect_island(start, 10);
    assert_eq!(collected.len(), 10);
    assert_eq!(collected[0], start);

    let islands = field.find_islands(0., 10);
    assert_eq!(islands[0].voxel_count, 10);
    assert_eq!(islands[0].reference_voxel, start);
    assert!(islands.iter().all(|island| island.voxel_count <= 10));
    assert!(islands.iter().map(|island| island.voxel_count).sum::<usize>() <= 27);

    let (island, voxels) = field.extract_island(start, 10).unwrap();
    assert_eq!(voxels.len(), 10);
    assert!(voxels.iter().all(|key| island.stored(*key).is_some_and(|v| v < 0.)));
    // Only the partial set leaves the source field
    assert_eq!(field.len(), 17);
    assert!(voxels.iter().all(|key| !field.contains(*key)));
    assert!(field.voxels().keys().all(|key| !voxels.contains(key)));
}

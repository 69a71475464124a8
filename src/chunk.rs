use crate::{
    brush_bounds, section_index, BrushStroke, ChunkMesher, MeshData, MeshSettings,
    SharedHeightSource, SparseVoxelField, VoxelBackend, VoxelBaseline, VoxelConfig, VoxelResult,
};

use bevy::prelude::*;
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    ops::AddAssign,
    path::Path,
    sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

/// The number of voxels changed by a brush stroke
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ModificationReport {
    /// Voxels that received a positive value
    pub voxels_dug: usize,
    /// Voxels that received a negative value
    pub voxels_added: usize,
}

impl ModificationReport {
    /// The total number of changed voxels
    pub fn total(&self) -> usize {
        self.voxels_dug + self.voxels_added
    }

    /// Check if nothing changed
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl AddAssign for ModificationReport {
    fn add_assign(&mut self, rhs: Self) {
        self.voxels_dug += rhs.voxels_dug;
        self.voxels_added += rhs.voxels_added;
    }
}

/// Everything needed to mesh a chunk away from the main thread
#[derive(Clone)]
pub struct MeshJob {
    /// The chunk being meshed
    pub chunk: IVec3,
    /// The mesh section of the chunk
    pub section_index: u64,
    field: Arc<RwLock<SparseVoxelField>>,
    mesher: Arc<Mutex<ChunkMesher>>,
}

impl MeshJob {
    /// Generate the mesh. Holds a read lock on the field for the duration
    pub fn run(&self) -> Option<MeshData> {
        let field = self.field.read().unwrap_or_else(PoisonError::into_inner);
        let mut mesher = self.mesher.lock().unwrap_or_else(PoisonError::into_inner);
        mesher.generate(&field)
    }
}

/// A chunk of the voxel world, owning its voxel field and its mesher
pub struct VoxelChunk {
    coordinate: IVec3,
    section_index: u64,
    field: Arc<RwLock<SparseVoxelField>>,
    mesher: Arc<Mutex<ChunkMesher>>,
    dirty: bool,
}

impl VoxelChunk {
    /// Create an empty chunk on top of the given terrain
    pub fn new(
        config: VoxelConfig,
        coordinate: IVec3,
        terrain: SharedHeightSource,
        settings: MeshSettings,
    ) -> Self {
        let field = SparseVoxelField::new(config, coordinate, VoxelBaseline::Terrain(terrain));
        Self {
            coordinate,
            section_index: section_index(coordinate),
            field: Arc::new(RwLock::new(field)),
            mesher: Arc::new(Mutex::new(ChunkMesher::new(settings))),
            dirty: false,
        }
    }

    /// The chunk coordinate
    pub fn coordinate(&self) -> IVec3 {
        self.coordinate
    }

    /// The mesh section this chunk is drawn in
    pub fn section_index(&self) -> u64 {
        self.section_index
    }

    /// Lock the field for reading
    pub fn field(&self) -> RwLockReadGuard<'_, SparseVoxelField> {
        self.field.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the field for writing
    pub fn field_mut(&self) -> RwLockWriteGuard<'_, SparseVoxelField> {
        self.field.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply a brush stroke to every voxel of this chunk inside the brush bounds
    pub fn apply_brush_stroke(
        &mut self,
        stroke: &BrushStroke,
        backend: &dyn VoxelBackend,
    ) -> ModificationReport {
        let mut report = ModificationReport::default();
        {
            let mut field = self.field_mut();
            let config = *field.config();
            let voxel_size = config.voxel_size();
            let (center, half) = brush_bounds(stroke);
            let chunk_min = field.chunk_min_corner();

            let valid_min = IVec3::splat(-config.overflow);
            let valid_max = IVec3::splat(config.voxels_per_chunk() - 1 + config.overflow);
            let min = ((center - half - chunk_min) / voxel_size)
                .floor()
                .as_ivec3()
                .max(valid_min);
            let max = ((center + half - chunk_min) / voxel_size)
                .ceil()
                .as_ivec3()
                .min(valid_max);

            for z in min.z..=max.z {
                for y in min.y..=max.y {
                    for x in min.x..=max.x {
                        let key = IVec3::new(x, y, z);
                        let world = field.world_center(key);
                        let terrain_height = field
                            .terrain_height_at(world.truncate())
                            .unwrap_or(f32::NEG_INFINITY);
                        let value = stroke.evaluate(world, terrain_height, voxel_size);
                        if value == 0. || !backend.set_voxel(&mut field, key, value, stroke.dig) {
                            continue;
                        }
                        if value > 0. {
                            report.voxels_dug += 1;
                        } else {
                            report.voxels_added += 1;
                        }
                    }
                }
            }
        }

        if !report.is_empty() {
            self.mark_dirty();
        }
        report
    }

    /// Mark the chunk as needing a new mesh
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Check if the chunk needs a new mesh, either because it was marked dirty or because its
    /// field changed
    pub fn is_dirty(&self) -> bool {
        if self.dirty {
            return true;
        }
        let field = self.field();
        field.is_dirty() || field.rebuild_requested()
    }

    /// Check if voxels on the border of this chunk changed since the last mesh
    pub fn is_border_dirty(&self) -> bool {
        self.field().is_border_dirty()
    }

    /// Clear the dirty state and get a job that generates the new mesh
    pub fn mesh_job(&mut self) -> MeshJob {
        self.dirty = false;
        self.field_mut().clear_change_flags();
        MeshJob {
            chunk: self.coordinate,
            section_index: self.section_index,
            field: self.field.clone(),
            mesher: self.mesher.clone(),
        }
    }

    /// Generate a new mesh if the chunk is dirty
    pub fn update_if_dirty(&mut self) -> Option<MeshData> {
        if !self.is_dirty() {
            return None;
        }
        self.force_update()
    }

    /// Generate a new mesh, dirty or not
    pub fn force_update(&mut self) -> Option<MeshData> {
        self.mesh_job().run()
    }

    /// Write the voxels of this chunk to a file
    pub fn save(&self, path: &Path) -> VoxelResult<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.field().write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Replace the voxels of this chunk with the ones in a file, returning the number of voxels
    /// read. The chunk is marked dirty
    pub fn load(&mut self, path: &Path) -> VoxelResult<usize> {
        let mut reader = BufReader::new(File::open(path)?);
        let count = self.field_mut().read_from(&mut reader)?;
        self.mark_dirty();
        Ok(count)
    }
}

#[cfg(test)]
fn test_chunk(coordinate: IVec3) -> VoxelChunk {
    use crate::FlatTerrain;

    VoxelChunk::new(
        VoxelConfig::default(),
        coordinate,
        Arc::new(FlatTerrain(0.)),
        MeshSettings::default(),
    )
}

#[test]
fn test_basic_dig() {
    use crate::{CpuBackend, SDF_AIR};

    let mut chunk = test_chunk(IVec3::ZERO);
    let stroke = BrushStroke::default();
    let report = chunk.apply_brush_stroke(&stroke, &CpuBackend);
    assert!(report.voxels_dug > 0);
    assert_eq!(report.voxels_added, 0);
    assert!(chunk.is_dirty());

    let field = chunk.field();
    approx::assert_abs_diff_eq!(field.get(IVec3::ZERO), SDF_AIR, epsilon = 1e-3);
    // Further away than radius plus falloff nothing is stored
    for key in [IVec3::new(5, 0, 0), IVec3::new(0, 4, 3), IVec3::new(3, 3, 3)] {
        assert!(field.world_center(key).length() > 100.2);
        assert!(!field.contains(key));
        assert_eq!(field.get(key), SDF_AIR);
    }
    assert!(!field.contains(IVec3::new(0, 0, -5)));
    assert!(field.is_solid(IVec3::new(0, 0, -5)));
    // Below the terrain the sphere carves air as well
    assert_eq!(field.get(IVec3::new(0, 0, -1)), SDF_AIR);
}

#[test]
fn test_dig_then_add_restores_solid() {
    use crate::{CpuBackend, SDF_SOLID};

    let mut chunk = test_chunk(IVec3::ZERO);
    let dig = BrushStroke::default();
    chunk.apply_brush_stroke(&dig, &CpuBackend);
    let dug: Vec<IVec3> = chunk.field().voxels().keys().copied().collect();

    let add = BrushStroke {
        dig: false,
        ..dig.clone()
    };
    let report = chunk.apply_brush_stroke(&add, &CpuBackend);
    assert_eq!(report.voxels_added, dug.len());
    let field = chunk.field();
    for key in dug {
        assert_eq!(field.get(key), SDF_SOLID);
    }
}

#[test]
fn test_strokes_outside_the_chunk_do_nothing() {
    use crate::CpuBackend;

    let mut chunk = test_chunk(IVec3::new(3, 0, 0));
    let report = chunk.apply_brush_stroke(&BrushStroke::default(), &CpuBackend);
    assert!(report.is_empty());
    assert!(!chunk.is_dirty());
    assert!(chunk.field().is_empty());
}

#[test]
fn test_dirty_lifecycle() {
    use crate::{CpuBackend, FlatTerrain};

    let mut chunk = VoxelChunk::new(
        VoxelConfig::default(),
        IVec3::ZERO,
        Arc::new(FlatTerrain(300.)),
        MeshSettings::default(),
    );
    assert!(chunk.update_if_dirty().is_none());

    // A crater in the terrain surface
    let stroke = BrushStroke {
        position: Vec3::new(400., 400., 300.),
        ..default()
    };
    chunk.apply_brush_stroke(&stroke, &CpuBackend);
    let mesh = chunk.update_if_dirty().unwrap();
    assert!(!mesh.is_empty());
    assert!(!chunk.is_dirty());
    assert!(chunk.update_if_dirty().is_none());
    assert!(chunk.force_update().is_some());

    chunk.mark_dirty();
    let job = chunk.mesh_job();
    assert!(!chunk.is_dirty());
    assert_eq!(job.section_index, chunk.section_index());
    assert_eq!(job.run(), Some(mesh));
}

#[test]
fn test_save_and_load() {
    use crate::CpuBackend;

    let path = std::env::temp_dir().join(format!(
        "digger_chunk_test_{}.VoxelData",
        std::process::id()
    ));
    let mut chunk = test_chunk(IVec3::new(-1, 2, 0));
    let stroke = BrushStroke {
        position: Vec3::new(-400., 2000., 0.),
        ..default()
    };
    assert!(!chunk.apply_brush_stroke(&stroke, &CpuBackend).is_empty());
    chunk.save(&path).unwrap();

    let mut loaded = test_chunk(IVec3::new(-1, 2, 0));
    assert_eq!(loaded.load(&path).unwrap(), chunk.field().len());
    assert_eq!(loaded.field().voxels(), chunk.field().voxels());
    assert!(loaded.is_dirty());
    std::fs::remove_file(&path).unwrap();

    assert!(loaded.load(&path).is_err());
}

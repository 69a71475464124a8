//! Owns every chunk of the voxel world and routes world space operations to them.
//!
//! Meshing runs on the [AsyncComputeTaskPool]. Dirty chunks are collected on a timer, each one
//! gets a task, and finished meshes are handed to a [MeshSink] by section index.

use crate::{
    brush_bounds, config::moore_neighbourhood, generate_island_mesh, select_backend,
    BackendPreference, BrushStroke, IslandData, MeshData, MeshSettings, ModificationReport,
    NoTerrain, SharedHeightSource, SparseVoxelField, VoxelBackend, VoxelChunk, VoxelConfig,
    VoxelResult, SDF_AIR, SDF_SOLID,
};

use bevy::{
    prelude::*,
    tasks::{AsyncComputeTaskPool, Task, TaskPool},
    utils::HashMap,
};
use futures_lite::future::{block_on, poll_once};
use serde::{Deserialize, Serialize};
use std::{fs, io::ErrorKind, path::PathBuf, sync::Arc};

const CHUNK_FILE_PREFIX: &str = "Chunk_";
const CHUNK_FILE_EXTENSION: &str = ".VoxelData";

/// Settings for the chunk director
#[derive(Resource, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorSettings {
    /// Seconds between two passes over the dirty chunks. Zero or less checks every frame
    pub process_interval_secs: f32,
    /// Settings passed to the mesher of every chunk
    pub mesh: MeshSettings,
    /// Which backend performs the voxel operations
    pub backend: BackendPreference,
    /// Where chunk files are saved
    pub save_directory: PathBuf,
}

impl Default for DirectorSettings {
    fn default() -> Self {
        Self {
            process_interval_secs: 2.,
            mesh: MeshSettings::default(),
            backend: BackendPreference::default(),
            save_directory: PathBuf::from("VoxelData"),
        }
    }
}

/// Receives the meshes of chunks, keyed by their section index
pub trait MeshSink {
    /// Create or replace the mesh of a section
    fn upsert_mesh_section(&mut self, section_index: u64, mesh: MeshData);
}

/// An in memory store of the latest mesh of every section
#[derive(Resource, Default, Deref, DerefMut)]
pub struct MeshSections(pub HashMap<u64, MeshData>);

impl MeshSink for MeshSections {
    fn upsert_mesh_section(&mut self, section_index: u64, mesh: MeshData) {
        self.0.insert(section_index, mesh);
    }
}

/// The result of cutting a floating island out of the world
pub struct IslandExtraction {
    /// The voxels that were removed from the source chunk
    pub island: IslandData,
    /// A standalone field containing the island surrounded by air
    pub field: SparseVoxelField,
    /// The closed mesh of the island
    pub mesh: Option<MeshData>,
    /// The new mesh of the chunk the island was cut from
    pub source_mesh: Option<MeshData>,
}

struct PendingMesh {
    section_index: u64,
    task: Task<Option<MeshData>>,
}

/// The collection of all loaded chunks
#[derive(Resource)]
pub struct ChunkDirector {
    config: VoxelConfig,
    settings: DirectorSettings,
    terrain: SharedHeightSource,
    backend: Arc<dyn VoxelBackend>,
    chunks: HashMap<IVec3, VoxelChunk>,
    pending: HashMap<IVec3, PendingMesh>,
}

impl ChunkDirector {
    /// Create a director without any chunks. The GPU backend is used only when the settings ask
    /// for it and it is available
    pub fn new(
        config: VoxelConfig,
        settings: DirectorSettings,
        terrain: SharedHeightSource,
        gpu_backend: Option<Arc<dyn VoxelBackend>>,
    ) -> Self {
        let backend = select_backend(settings.backend, gpu_backend);
        Self {
            config: config.sanitized(),
            settings,
            terrain,
            backend,
            chunks: HashMap::default(),
            pending: HashMap::default(),
        }
    }

    /// The sanitized grid configuration
    pub fn config(&self) -> &VoxelConfig {
        &self.config
    }

    /// The settings the director was created with
    pub fn settings(&self) -> &DirectorSettings {
        &self.settings
    }

    /// The backend performing voxel operations
    pub fn backend(&self) -> &dyn VoxelBackend {
        self.backend.as_ref()
    }

    /// The number of loaded chunks
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Iterate over the coordinates of all loaded chunks
    pub fn chunk_coordinates(&self) -> impl Iterator<Item = IVec3> + '_ {
        self.chunks.keys().copied()
    }

    /// Get a loaded chunk
    pub fn chunk(&self, coordinate: IVec3) -> Option<&VoxelChunk> {
        self.chunks.get(&coordinate)
    }

    /// Get a loaded chunk for writing
    pub fn chunk_mut(&mut self, coordinate: IVec3) -> Option<&mut VoxelChunk> {
        self.chunks.get_mut(&coordinate)
    }

    /// Get a chunk, creating an empty one if it isn't loaded
    pub fn get_or_create_chunk(&mut self, coordinate: IVec3) -> &mut VoxelChunk {
        let Self {
            config,
            settings,
            terrain,
            chunks,
            ..
        } = self;
        chunks.entry(coordinate).or_insert_with(|| {
            debug!("Creating voxel chunk {}", coordinate);
            VoxelChunk::new(*config, coordinate, terrain.clone(), settings.mesh)
        })
    }

    /// Get the chunk containing a world position, creating it if needed
    pub fn get_or_create_chunk_at_world(&mut self, pos: Vec3) -> &mut VoxelChunk {
        let coordinate = self.config.world_to_chunk(pos);
        self.get_or_create_chunk(coordinate)
    }

    /// Find the loaded chunk containing a world position, or else the loaded chunk whose minimum
    /// corner is closest to it
    pub fn find_nearest_chunk(&self, pos: Vec3) -> Option<IVec3> {
        let coordinate = self.config.world_to_chunk(pos);
        if self.chunks.contains_key(&coordinate) {
            return Some(coordinate);
        }
        self.chunks.keys().copied().min_by(|a, b| {
            let da = self.config.chunk_to_world(*a).distance_squared(pos);
            let db = self.config.chunk_to_world(*b).distance_squared(pos);
            da.total_cmp(&db)
        })
    }

    /// Find the chunk drawn in a mesh section
    pub fn chunk_by_section_index(&self, section_index: u64) -> Option<&VoxelChunk> {
        self.chunks
            .values()
            .find(|chunk| chunk.section_index() == section_index)
    }

    /// Apply a brush stroke to every chunk that may store voxels inside its bounds. Chunks that
    /// were created for the stroke but stayed empty are dropped again
    pub fn apply_brush_stroke(&mut self, stroke: &BrushStroke) -> ModificationReport {
        let (center, half) = brush_bounds(stroke);
        let reach = Vec3::splat(self.config.overflow as f32 * self.config.voxel_size());
        let min = self.config.world_to_chunk(center - half - reach);
        let max = self.config.world_to_chunk(center + half + reach);

        let backend = self.backend.clone();
        let mut report = ModificationReport::default();
        for z in min.z..=max.z {
            for y in min.y..=max.y {
                for x in min.x..=max.x {
                    let coordinate = IVec3::new(x, y, z);
                    let existed = self.chunks.contains_key(&coordinate);
                    let chunk = self.get_or_create_chunk(coordinate);
                    report += chunk.apply_brush_stroke(stroke, backend.as_ref());
                    if !existed && chunk.field().is_empty() {
                        self.chunks.remove(&coordinate);
                    }
                }
            }
        }

        if stroke.dig && !report.is_empty() {
            self.mark_nearby_chunks_dirty(stroke.center(), stroke.radius);
        }
        report
    }

    /// Mark every loaded chunk within `radius` world units of a position dirty
    pub fn mark_nearby_chunks_dirty(&mut self, center: Vec3, radius: f32) {
        let reach = (radius.max(0.) / self.config.chunk_world_size()).ceil() as i32;
        let origin = self.config.world_to_chunk(center);
        for (coordinate, chunk) in self.chunks.iter_mut() {
            let offset = (*coordinate - origin).abs();
            if offset.cmple(IVec3::splat(reach)).all() {
                chunk.mark_dirty();
            }
        }
    }

    /// Write a single voxel at a world position, creating its chunk if needed
    pub fn set_voxel_at_world(&mut self, pos: Vec3, value: f32, dig: bool) -> bool {
        let (coordinate, local) = self.config.world_to_chunk_and_local(pos);
        let backend = self.backend.clone();
        let chunk = self.get_or_create_chunk(coordinate);
        let changed = backend.set_voxel(&mut chunk.field_mut(), local, value, dig);
        if changed {
            chunk.mark_dirty();
        }
        changed
    }

    /// Read the voxel at a world position. Positions in chunks that aren't loaded fall back to
    /// the terrain
    pub fn voxel_at_world(&self, pos: Vec3) -> f32 {
        let (coordinate, local) = self.config.world_to_chunk_and_local(pos);
        if let Some(chunk) = self.chunks.get(&coordinate) {
            return self.backend.get_voxel(&chunk.field(), local);
        }
        let center = self.config.local_voxel_to_world(coordinate, local);
        if center.z < self.terrain.height_or_default(center.truncate()) {
            SDF_SOLID
        } else {
            SDF_AIR
        }
    }

    /// Find the floating islands of every loaded chunk, ordered by chunk coordinate
    pub fn detect_all_islands(&self) -> Vec<(IVec3, IslandData)> {
        let mut coordinates: Vec<IVec3> = self.chunks.keys().copied().collect();
        coordinates.sort_by_key(|c| (c.z, c.y, c.x));
        coordinates
            .into_iter()
            .flat_map(|coordinate| {
                let islands = self.chunks[&coordinate].field().detect_islands(0.);
                islands.into_iter().map(move |island| (coordinate, island))
            })
            .collect()
    }

    /// Cut the island containing a world position out of its chunk. The chunk is remeshed right
    /// away, any mesh task still running for it is discarded
    pub fn extract_island_at_position(&mut self, world: Vec3) -> Option<IslandExtraction> {
        let coordinate = self.config.world_to_chunk(world);
        let backend = self.backend.clone();
        let chunk = self.chunks.get_mut(&coordinate)?;

        let (field, voxels) = backend.extract_island_at_position(&mut chunk.field_mut(), world)?;
        let island = IslandData::from_voxels(&field, voxels)?;
        info!(
            "Extracted an island of {} voxels from chunk {}",
            island.voxel_count, coordinate
        );

        self.pending.remove(&coordinate);
        let source_mesh = chunk.force_update();
        let mesh = generate_island_mesh(&field);
        Some(IslandExtraction {
            island,
            field,
            mesh,
            source_mesh,
        })
    }

    /// Spawn a mesh task for every dirty chunk that doesn't have one running. Chunks whose border
    /// changed also dirty their loaded neighbours. Returns the number of spawned tasks
    pub fn queue_dirty_meshes(&mut self) -> usize {
        let border_dirty: Vec<IVec3> = self
            .chunks
            .iter()
            .filter(|(_, chunk)| chunk.is_border_dirty())
            .map(|(coordinate, _)| *coordinate)
            .collect();
        for coordinate in border_dirty {
            for offset in moore_neighbourhood() {
                if let Some(neighbour) = self.chunks.get_mut(&(coordinate + offset)) {
                    neighbour.mark_dirty();
                }
            }
        }

        let pool = AsyncComputeTaskPool::get_or_init(TaskPool::default);
        let mut spawned = 0;
        for (coordinate, chunk) in self.chunks.iter_mut() {
            if self.pending.contains_key(coordinate) || !chunk.is_dirty() {
                continue;
            }
            let job = chunk.mesh_job();
            let section_index = job.section_index;
            let task = pool.spawn(async move { job.run() });
            self.pending
                .insert(*coordinate, PendingMesh { section_index, task });
            spawned += 1;
        }
        if spawned > 0 {
            debug!("Queued {} chunk meshes", spawned);
        }
        spawned
    }

    /// Hand finished meshes to the sink. With `wait` every running task is waited on, otherwise
    /// only tasks that already finished are collected. Returns the number of meshes handed over
    pub fn apply_finished_meshes(&mut self, sink: &mut impl MeshSink, wait: bool) -> usize {
        let mut applied = 0;
        self.pending.retain(|coordinate, pending| {
            let result = if wait {
                Some(block_on(&mut pending.task))
            } else {
                block_on(poll_once(&mut pending.task))
            };
            let Some(mesh) = result else {
                return true;
            };
            match mesh {
                Some(mesh) if !mesh.is_empty() => {
                    sink.upsert_mesh_section(pending.section_index, mesh);
                    applied += 1;
                }
                _ => trace!("Chunk {} has no mesh", coordinate),
            }
            false
        });
        applied
    }

    /// Queue every dirty chunk and wait for all meshes
    pub fn process_dirty_chunks(&mut self, sink: &mut impl MeshSink) -> usize {
        self.queue_dirty_meshes();
        self.apply_finished_meshes(sink, true)
    }

    /// Drop a chunk and any mesh task running for it
    pub fn unload_chunk(&mut self, coordinate: IVec3) -> Option<VoxelChunk> {
        self.pending.remove(&coordinate);
        self.chunks.remove(&coordinate)
    }

    /// Drop every chunk
    pub fn clear_all_voxel_data(&mut self) {
        info!("Clearing {} voxel chunks", self.chunks.len());
        self.pending.clear();
        self.chunks.clear();
    }

    /// The file a chunk is saved to
    pub fn chunk_file_path(&self, coordinate: IVec3) -> PathBuf {
        self.settings.save_directory.join(format!(
            "{}{}_{}_{}{}",
            CHUNK_FILE_PREFIX, coordinate.x, coordinate.y, coordinate.z, CHUNK_FILE_EXTENSION
        ))
    }

    /// Save a loaded chunk. Returns false if the chunk isn't loaded
    pub fn save_chunk(&self, coordinate: IVec3) -> VoxelResult<bool> {
        let Some(chunk) = self.chunks.get(&coordinate) else {
            return Ok(false);
        };
        fs::create_dir_all(&self.settings.save_directory)?;
        chunk.save(&self.chunk_file_path(coordinate))?;
        Ok(true)
    }

    /// Load a chunk from its file, creating the chunk if needed. Returns the number of voxels read
    pub fn load_chunk(&mut self, coordinate: IVec3) -> VoxelResult<usize> {
        let path = self.chunk_file_path(coordinate);
        let existed = self.chunks.contains_key(&coordinate);
        let result = self.get_or_create_chunk(coordinate).load(&path);
        if result.is_err() && !existed {
            self.chunks.remove(&coordinate);
        }
        result
    }

    /// Save every loaded chunk, returning how many were saved. Failures are logged and skipped
    pub fn save_all_chunks(&self) -> usize {
        let mut saved = 0;
        for coordinate in self.chunks.keys() {
            match self.save_chunk(*coordinate) {
                Ok(_) => saved += 1,
                Err(err) => error!("Failed to save voxel chunk {}: {}", coordinate, err),
            }
        }
        info!("Saved {} voxel chunks", saved);
        saved
    }

    /// Load every chunk found in the save directory, returning how many were loaded. Failures are
    /// logged and skipped
    pub fn load_all_chunks(&mut self) -> usize {
        let mut loaded = 0;
        for coordinate in self.saved_chunk_coordinates() {
            match self.load_chunk(coordinate) {
                Ok(_) => loaded += 1,
                Err(err) => error!("Failed to load voxel chunk {}: {}", coordinate, err),
            }
        }
        info!("Loaded {} voxel chunks", loaded);
        loaded
    }

    /// The coordinates of every chunk file in the save directory, sorted
    pub fn saved_chunk_coordinates(&self) -> Vec<IVec3> {
        let Ok(entries) = fs::read_dir(&self.settings.save_directory) else {
            return Vec::new();
        };
        let mut coordinates: Vec<IVec3> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| parse_chunk_file_name(&entry.file_name().to_string_lossy()))
            .collect();
        coordinates.sort_by_key(|c| (c.z, c.y, c.x));
        coordinates
    }

    /// Delete the file of a chunk. Returns false if there was no file
    pub fn delete_chunk_file(&self, coordinate: IVec3) -> VoxelResult<bool> {
        match fs::remove_file(self.chunk_file_path(coordinate)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

fn parse_chunk_file_name(name: &str) -> Option<IVec3> {
    let coordinates = name
        .strip_prefix(CHUNK_FILE_PREFIX)?
        .strip_suffix(CHUNK_FILE_EXTENSION)?;
    let mut parts = coordinates.split('_').map(|part| part.parse::<i32>().ok());
    let x = parts.next()??;
    let y = parts.next()??;
    let z = parts.next()??;
    if parts.next().is_some() {
        return None;
    }
    Some(IVec3::new(x, y, z))
}

/// Paces the dirty chunk checks
#[derive(Resource, Deref, DerefMut)]
pub struct DirtyChunkTimer(pub Timer);

/// Spawn mesh tasks for dirty chunks whenever the timer finishes
pub fn queue_dirty_chunk_meshes(
    time: Res<Time>,
    settings: Res<DirectorSettings>,
    mut timer: ResMut<DirtyChunkTimer>,
    mut director: ResMut<ChunkDirector>,
) {
    if settings.process_interval_secs > 0. && !timer.tick(time.delta()).just_finished() {
        return;
    }
    director.queue_dirty_meshes();
}

/// Move finished chunk meshes into [MeshSections]
pub fn apply_chunk_meshes(mut director: ResMut<ChunkDirector>, mut sections: ResMut<MeshSections>) {
    director.apply_finished_meshes(&mut *sections, false);
}

/// Sets up a [ChunkDirector] and keeps the meshes of its chunks up to date
pub struct DiggerPlugin {
    /// The grid configuration, inserted as a resource
    pub config: VoxelConfig,
    /// The director settings, inserted as a resource
    pub settings: DirectorSettings,
    /// The terrain every chunk is carved out of
    pub terrain: SharedHeightSource,
    /// An accelerated backend, used when the settings prefer the GPU
    pub gpu_backend: Option<Arc<dyn VoxelBackend>>,
}

impl Default for DiggerPlugin {
    fn default() -> Self {
        Self {
            config: VoxelConfig::default(),
            settings: DirectorSettings::default(),
            terrain: Arc::new(NoTerrain),
            gpu_backend: None,
        }
    }
}

impl Plugin for DiggerPlugin {
    fn build(&self, app: &mut App) {
        let director = ChunkDirector::new(
            self.config,
            self.settings.clone(),
            self.terrain.clone(),
            self.gpu_backend.clone(),
        );
        let interval = self.settings.process_interval_secs.max(0.);
        app.insert_resource(*director.config())
            .insert_resource(self.settings.clone())
            .insert_resource(director)
            .init_resource::<MeshSections>()
            .insert_resource(DirtyChunkTimer(Timer::from_seconds(
                interval,
                TimerMode::Repeating,
            )))
            .add_systems(Update, (queue_dirty_chunk_meshes, apply_chunk_meshes).chain());
    }
}

#[cfg(test)]
fn test_director(terrain_height: f32) -> ChunkDirector {
    use crate::FlatTerrain;

    ChunkDirector::new(
        VoxelConfig::default(),
        DirectorSettings::default(),
        Arc::new(FlatTerrain(terrain_height)),
        None,
    )
}

#[cfg(test)]
fn test_save_directory(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("digger_{}_{}", name, std::process::id()))
}

#[test]
fn test_stroke_routes_across_chunk_borders() {
    let mut director = test_director(0.);
    let report = director.apply_brush_stroke(&BrushStroke::default());
    assert!(report.voxels_dug > 0);
    // A sphere on the origin touches the eight chunks around it
    assert_eq!(director.chunk_count(), 8);
    for coordinate in director.chunk_coordinates() {
        assert!(coordinate.cmpge(IVec3::NEG_ONE).all() && coordinate.cmple(IVec3::ZERO).all());
        assert!(director.chunk(coordinate).unwrap().is_dirty());
    }
    approx::assert_abs_diff_eq!(director.voxel_at_world(Vec3::ONE), SDF_AIR, epsilon = 1e-3);
    approx::assert_abs_diff_eq!(director.voxel_at_world(Vec3::NEG_ONE), SDF_AIR, epsilon = 1e-3);
    // Unloaded chunks fall back to the terrain
    assert_eq!(director.voxel_at_world(Vec3::new(5000., 0., -10.)), SDF_SOLID);
    assert_eq!(director.voxel_at_world(Vec3::new(5000., 0., 10.)), SDF_AIR);
}

#[test]
fn test_empty_strokes_leave_no_chunks() {
    let mut director = test_director(0.);
    let stroke = BrushStroke {
        strength: 0.,
        ..default()
    };
    assert!(director.apply_brush_stroke(&stroke).is_empty());
    assert_eq!(director.chunk_count(), 0);
}

#[test]
fn test_chunk_lookup() {
    use crate::section_index;

    let mut director = test_director(0.);
    assert_eq!(director.find_nearest_chunk(Vec3::ZERO), None);
    director.get_or_create_chunk(IVec3::new(2, 0, 0));
    director.get_or_create_chunk_at_world(Vec3::new(-10., 10., 10.));
    assert!(director.chunk(IVec3::new(-1, 0, 0)).is_some());

    assert_eq!(
        director.find_nearest_chunk(Vec3::new(1700., 10., 10.)),
        Some(IVec3::new(2, 0, 0))
    );
    assert_eq!(
        director.find_nearest_chunk(Vec3::new(100., 10., 10.)),
        Some(IVec3::new(-1, 0, 0))
    );
    let chunk = director
        .chunk_by_section_index(section_index(IVec3::new(2, 0, 0)))
        .unwrap();
    assert_eq!(chunk.coordinate(), IVec3::new(2, 0, 0));

    assert!(director.unload_chunk(IVec3::new(2, 0, 0)).is_some());
    assert_eq!(director.chunk_count(), 1);
    director.clear_all_voxel_data();
    assert_eq!(director.chunk_count(), 0);
}

#[test]
fn test_mark_nearby_chunks_dirty() {
    let mut director = test_director(0.);
    for x in 0..4 {
        director.get_or_create_chunk(IVec3::new(x, 0, 0));
    }
    // One chunk is 800 units wide
    director.mark_nearby_chunks_dirty(Vec3::new(100., 100., 100.), 700.);
    let dirty: Vec<bool> = (0..4)
        .map(|x| director.chunk(IVec3::new(x, 0, 0)).unwrap().is_dirty())
        .collect();
    assert_eq!(dirty, vec![true, true, false, false]);
}

#[test]
fn test_set_voxel_at_world() {
    let mut director = test_director(0.);
    let pos = Vec3::new(810., -5., 40.);
    assert!(director.set_voxel_at_world(pos, -0.5, false));
    assert!(!director.set_voxel_at_world(pos, 0.5, false));
    assert_eq!(director.voxel_at_world(pos), -0.5);

    let chunk = director.chunk(IVec3::new(1, -1, 0)).unwrap();
    assert!(chunk.is_dirty());
    assert_eq!(chunk.field().stored(IVec3::new(0, 31, 1)), Some(-0.5));
}

#[test]
fn test_async_meshing() {
    let mut director = test_director(300.);
    let stroke = BrushStroke {
        position: Vec3::new(400., 400., 300.),
        ..default()
    };
    director.apply_brush_stroke(&stroke);
    assert_eq!(director.chunk_count(), 1);

    let mut sections = MeshSections::default();
    assert_eq!(director.process_dirty_chunks(&mut sections), 1);
    let mesh = &sections[&crate::section_index(IVec3::ZERO)];
    assert!(mesh.triangle_count() > 0);

    // Nothing is dirty anymore
    assert_eq!(director.queue_dirty_meshes(), 0);
    assert_eq!(director.apply_finished_meshes(&mut sections, true), 0);
}

#[test]
fn test_island_extraction() {
    let mut director = test_director(0.);
    let blob = BrushStroke {
        position: Vec3::new(400., 400., 600.),
        radius: 60.,
        dig: false,
        ..default()
    };
    let report = director.apply_brush_stroke(&blob);
    assert!(report.voxels_added > 0);
    assert_eq!(director.chunk_count(), 1);

    let islands = director.detect_all_islands();
    assert_eq!(islands.len(), 1);
    assert_eq!(islands[0].0, IVec3::ZERO);
    assert_eq!(islands[0].1.voxel_count, report.voxels_added);

    let extraction = director
        .extract_island_at_position(Vec3::new(400., 400., 600.))
        .unwrap();
    assert_eq!(extraction.island.voxel_count, report.voxels_added);
    assert!(extraction.island.centroid.distance(blob.position) < 1.);
    assert!(extraction.mesh.is_some_and(|mesh| !mesh.is_empty()));
    assert!(extraction.source_mesh.is_none());
    assert!(director.chunk(IVec3::ZERO).unwrap().field().is_empty());
    assert!(director.detect_all_islands().is_empty());
    assert!(director
        .extract_island_at_position(Vec3::new(400., 400., 600.))
        .is_none());
}

#[test]
fn test_save_and_load_all_chunks() {
    let directory = test_save_directory("director");
    let mut director = ChunkDirector::new(
        VoxelConfig::default(),
        DirectorSettings {
            save_directory: directory.clone(),
            ..default()
        },
        Arc::new(crate::FlatTerrain(0.)),
        None,
    );
    director.apply_brush_stroke(&BrushStroke::default());
    let expected: Vec<(IVec3, usize)> = {
        let mut chunks: Vec<_> = director
            .chunk_coordinates()
            .map(|c| (c, director.chunk(c).unwrap().field().len()))
            .collect();
        chunks.sort_by_key(|(c, _)| (c.z, c.y, c.x));
        chunks
    };
    assert_eq!(
        director.chunk_file_path(IVec3::new(-1, 0, -1)),
        directory.join("Chunk_-1_0_-1.VoxelData")
    );
    assert_eq!(director.save_all_chunks(), 8);
    assert_eq!(
        director.saved_chunk_coordinates(),
        expected.iter().map(|(c, _)| *c).collect::<Vec<_>>()
    );

    director.clear_all_voxel_data();
    assert_eq!(director.load_all_chunks(), 8);
    for (coordinate, len) in expected.iter() {
        let chunk = director.chunk(*coordinate).unwrap();
        assert_eq!(chunk.field().len(), *len);
        assert!(chunk.is_dirty());
    }

    assert!(director.delete_chunk_file(IVec3::new(-1, -1, -1)).unwrap());
    assert!(!director.delete_chunk_file(IVec3::new(-1, -1, -1)).unwrap());
    assert!(director.load_chunk(IVec3::new(5, 5, 5)).is_err());
    assert!(director.chunk(IVec3::new(5, 5, 5)).is_none());
    assert!(!director.save_chunk(IVec3::new(5, 5, 5)).unwrap());
    fs::remove_dir_all(&directory).unwrap();
}

#[test]
fn test_chunk_file_names() {
    assert_eq!(
        parse_chunk_file_name("Chunk_3_-2_10.VoxelData"),
        Some(IVec3::new(3, -2, 10))
    );
    assert_eq!(parse_chunk_file_name("Chunk_3_-2.VoxelData"), None);
    assert_eq!(parse_chunk_file_name("Chunk_3_-2_1_4.VoxelData"), None);
    assert_eq!(parse_chunk_file_name("Chunk_a_0_0.VoxelData"), None);
    assert_eq!(parse_chunk_file_name("notes.txt"), None);
}

#[test]
fn test_plugin_meshes_dirty_chunks() {
    let mut app = App::new();
    app.add_plugins((
        MinimalPlugins,
        DiggerPlugin {
            settings: DirectorSettings {
                process_interval_secs: 0.,
                ..default()
            },
            terrain: Arc::new(crate::FlatTerrain(300.)),
            ..default()
        },
    ));
    assert!(app.world.contains_resource::<VoxelConfig>());
    assert!(app.world.contains_resource::<DirtyChunkTimer>());

    let stroke = BrushStroke {
        position: Vec3::new(400., 400., 300.),
        ..default()
    };
    app.world
        .resource_mut::<ChunkDirector>()
        .apply_brush_stroke(&stroke);

    for _ in 0..500 {
        app.update();
        if !app.world.resource::<MeshSections>().is_empty() {
            break;
        }
        std::thread::sleep(std::time::Duration::from_millis(2));
    }
    let sections = app.world.resource::<MeshSections>();
    assert_eq!(sections.len(), 1);
    assert!(sections.contains_key(&crate::section_index(IVec3::ZERO)));
}

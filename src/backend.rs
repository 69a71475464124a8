//! Interchangeable implementations of the field mutation operations.
//! The CPU backend works directly on the [SparseVoxelField], an accelerated backend can be
//! plugged in by the host as long as it follows the same blend rules.

use crate::SparseVoxelField;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The operations a voxel backend has to provide
pub trait VoxelBackend: Send + Sync + 'static {
    /// A short name, used in logs
    fn name(&self) -> &str;

    /// Check if the backend can be used on this machine
    fn is_available(&self) -> bool;

    /// Write a value with the same rules as [SparseVoxelField::set]
    fn set_voxel(&self, field: &mut SparseVoxelField, key: IVec3, value: f32, dig: bool) -> bool;

    /// Read a value with the same rules as [SparseVoxelField::get]
    fn get_voxel(&self, field: &SparseVoxelField, key: IVec3) -> f32;

    /// Remove voxels with the same rules as [SparseVoxelField::remove_voxels]
    fn remove_voxels(&self, field: &mut SparseVoxelField, keys: &[IVec3]) -> usize;

    /// Cut an island out with the same rules as [SparseVoxelField::extract_island_at_position]
    fn extract_island_at_position(
        &self,
        field: &mut SparseVoxelField,
        world: Vec3,
    ) -> Option<(SparseVoxelField, Vec<IVec3>)>;
}

/// The backend that works on the field in place
#[derive(Clone, Copy, Debug, Default)]
pub struct CpuBackend;

impl VoxelBackend for CpuBackend {
    fn name(&self) -> &str {
        "CPU"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn set_voxel(&self, field: &mut SparseVoxelField, key: IVec3, value: f32, dig: bool) -> bool {
        field.set(key, value, dig)
    }

    fn get_voxel(&self, field: &SparseVoxelField, key: IVec3) -> f32 {
        field.get(key)
    }

    fn remove_voxels(&self, field: &mut SparseVoxelField, keys: &[IVec3]) -> usize {
        field.remove_voxels(keys)
    }

    fn extract_island_at_position(
        &self,
        field: &mut SparseVoxelField,
        world: Vec3,
    ) -> Option<(SparseVoxelField, Vec<IVec3>)> {
        field.extract_island_at_position(world)
    }
}

/// Which backend should be used for voxel operations
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendPreference {
    /// Always use the CPU
    #[default]
    Cpu,
    /// Use the GPU backend when one is available
    Gpu,
}

/// Pick the backend to use. The GPU backend is only used when it was requested and is available,
/// in every other case the CPU backend is returned
pub fn select_backend(
    preference: BackendPreference,
    gpu: Option<Arc<dyn VoxelBackend>>,
) -> Arc<dyn VoxelBackend> {
    if preference == BackendPreference::Cpu {
        return Arc::new(CpuBackend);
    }
    match gpu {
        Some(gpu) if gpu.is_available() => {
            info!("Using the {} voxel backend", gpu.name());
            gpu
        }
        Some(gpu) => {
            warn!("The {} voxel backend is not available, falling back to CPU", gpu.name());
            Arc::new(CpuBackend)
        }
        None => {
            warn!("No GPU voxel backend was provided, falling back to CPU");
            Arc::new(CpuBackend)
        }
    }
}

#[cfg(test)]
struct UnavailableBackend;

#[cfg(test)]
impl VoxelBackend for UnavailableBackend {
    fn name(&self) -> &str {
        "Test GPU"
    }

    fn is_available(&self) -> bool {
        false
    }

    fn set_voxel(&self, _: &mut SparseVoxelField, _: IVec3, _: f32, _: bool) -> bool {
        unreachable!()
    }

    fn get_voxel(&self, _: &SparseVoxelField, _: IVec3) -> f32 {
        unreachable!()
    }

    fn remove_voxels(&self, _: &mut SparseVoxelField, _: &[IVec3]) -> usize {
        unreachable!()
    }

    fn extract_island_at_position(
        &self,
        _: &mut SparseVoxelField,
        _: Vec3,
    ) -> Option<(SparseVoxelField, Vec<IVec3>)> {
        unreachable!()
    }
}

#[test]
fn test_gpu_falls_back_to_cpu() {
    assert_eq!(select_backend(BackendPreference::Gpu, None).name(), "CPU");
    let gpu: Arc<dyn VoxelBackend> = Arc::new(UnavailableBackend);
    assert_eq!(select_backend(BackendPreference::Gpu, Some(gpu.clone())).name(), "CPU");
    assert_eq!(select_backend(BackendPreference::Cpu, Some(gpu)).name(), "CPU");
}

#[test]
fn test_cpu_backend_matches_field() {
    use crate::{VoxelBaseline, VoxelConfig};

    let backend = CpuBackend;
    let mut field = SparseVoxelField::new(VoxelConfig::default(), IVec3::ZERO, VoxelBaseline::Air);
    assert!(backend.set_voxel(&mut field, IVec3::ONE, -0.5, false));
    assert!(!backend.set_voxel(&mut field, IVec3::ONE, 0.5, false));
    assert_eq!(backend.get_voxel(&field, IVec3::ONE), -0.5);

    let world = field.world_center(IVec3::ONE);
    let (island, voxels) = backend.extract_island_at_position(&mut field, world).unwrap();
    assert_eq!(voxels, vec![IVec3::ONE]);
    assert_eq!(island.stored(IVec3::ONE), Some(-0.5));
    assert_eq!(backend.remove_voxels(&mut field, &voxels), 0);
}

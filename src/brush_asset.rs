use crate::{codec, lerp, VoxelIoError, VoxelResult};

use bevy::prelude::*;
use fast_surface_nets::ndshape::{RuntimeShape, Shape};
use std::io::{Read, Write};

/// The magic number at the start of every brush asset, 'SDFB'
pub(crate) const SDFB_MAGIC: u32 = 0x5344_4642;
const SDFB_VERSION: u32 = 1;
const MAX_GRID_VALUES: i64 = 256 * 256 * 256;

/// A signed distance grid baked from a mesh, usable as a custom brush shape
#[derive(Clone, Debug, PartialEq)]
pub struct SdfBrushAsset {
    /// The number of samples along each axis
    pub dimensions: IVec3,
    /// The distance between two samples in world units
    pub voxel_size: f32,
    /// The position of sample (0, 0, 0) relative to the brush center
    pub origin_offset: Vec3,
    /// The samples in X-major order
    pub values: Vec<f32>,
}

impl SdfBrushAsset {
    /// Bake an asset by sampling a distance function at every grid point
    pub fn from_fn(
        dimensions: IVec3,
        voxel_size: f32,
        origin_offset: Vec3,
        f: impl Fn(Vec3) -> f32,
    ) -> Self {
        let dimensions = dimensions.max(IVec3::ONE);
        let shape = Self::shape_for(dimensions);
        let values = (0..shape.size())
            .map(|i| {
                let [x, y, z] = shape.delinearize(i);
                f(origin_offset + Vec3::new(x as f32, y as f32, z as f32) * voxel_size)
            })
            .collect();
        Self {
            dimensions,
            voxel_size,
            origin_offset,
            values,
        }
    }

    fn shape_for(dimensions: IVec3) -> RuntimeShape<u32, 3> {
        RuntimeShape::<u32, 3>::new([
            dimensions.x as u32,
            dimensions.y as u32,
            dimensions.z as u32,
        ])
    }

    /// The sample at a grid point, or None outside the grid
    pub fn value_at(&self, x: i32, y: i32, z: i32) -> Option<f32> {
        let point = IVec3::new(x, y, z);
        if point.cmplt(IVec3::ZERO).any() || point.cmpge(self.dimensions).any() {
            return None;
        }
        let index = Self::shape_for(self.dimensions).linearize([x as u32, y as u32, z as u32]);
        self.values.get(index as usize).copied()
    }

    /// Sample the grid at a position relative to the brush center with trilinear
    /// interpolation. Positions outside the grid are infinitely far away
    pub fn sample(&self, local: Vec3) -> f32 {
        let grid = (local - self.origin_offset) / self.voxel_size;
        let max = (self.dimensions - 1).as_vec3();
        if !grid.is_finite() || grid.cmplt(Vec3::ZERO).any() || grid.cmpgt(max).any() {
            return f32::INFINITY;
        }

        let base = grid.floor().min(max - 1.).max(Vec3::ZERO);
        let frac = (grid - base).clamp(Vec3::ZERO, Vec3::ONE);
        let [x, y, z] = base.as_ivec3().to_array();
        let at = |dx, dy, dz| {
            // Single sample grids have no upper neighbour, so clamp back into the grid
            let p = (IVec3::new(x + dx, y + dy, z + dz)).min(self.dimensions - 1);
            self.value_at(p.x, p.y, p.z).unwrap_or(f32::INFINITY)
        };

        let x00 = lerp(at(0, 0, 0), at(1, 0, 0), frac.x);
        let x10 = lerp(at(0, 1, 0), at(1, 1, 0), frac.x);
        let x01 = lerp(at(0, 0, 1), at(1, 0, 1), frac.x);
        let x11 = lerp(at(0, 1, 1), at(1, 1, 1), frac.x);
        lerp(lerp(x00, x10, frac.y), lerp(x01, x11, frac.y), frac.z)
    }

    /// Half the size of the grid, measured from the brush center
    pub fn half_extents(&self) -> Vec3 {
        let far = self.origin_offset + (self.dimensions - 1).as_vec3() * self.voxel_size;
        self.origin_offset.abs().max(far.abs())
    }

    /// Write the asset in the SDFB format
    pub fn write_to(&self, w: &mut impl Write) -> VoxelResult<()> {
        codec::write_u32(w, SDFB_MAGIC)?;
        codec::write_u32(w, SDFB_VERSION)?;
        codec::write_ivec3(w, self.dimensions)?;
        codec::write_f32(w, self.voxel_size)?;
        codec::write_vec3(w, self.origin_offset)?;
        for value in self.values.iter() {
            codec::write_f32(w, *value)?;
        }
        Ok(())
    }

    /// Read an asset in the SDFB format. The magic number is checked before anything else
    pub fn read_from(r: &mut impl Read) -> VoxelResult<Self> {
        let magic = codec::read_u32(r)?;
        if magic != SDFB_MAGIC {
            return Err(VoxelIoError::BadMagic(magic));
        }
        let version = codec::read_u32(r)?;
        if version != SDFB_VERSION {
            return Err(VoxelIoError::UnsupportedVersion(version));
        }

        let dimensions = codec::read_ivec3(r)?;
        let count = dimensions.x as i64 * dimensions.y as i64 * dimensions.z as i64;
        if dimensions.cmple(IVec3::ZERO).any() || count > MAX_GRID_VALUES {
            return Err(VoxelIoError::InvalidDimensions(dimensions.to_array()));
        }
        let voxel_size = codec::read_f32(r)?;
        let origin_offset = codec::read_vec3(r)?;

        let values = (0..count)
            .map(|_| codec::read_f32(r))
            .collect::<VoxelResult<Vec<_>>>()?;

        Ok(Self {
            dimensions,
            voxel_size,
            origin_offset,
            values,
        })
    }
}

#[cfg(test)]
fn ball_asset() -> SdfBrushAsset {
    SdfBrushAsset::from_fn(IVec3::splat(9), 10., Vec3::splat(-40.), |p| p.length() - 30.)
}

#[test]
fn test_asset_layout_is_x_major() {
    let asset = SdfBrushAsset::from_fn(IVec3::new(3, 2, 2), 1., Vec3::ZERO, |p| {
        p.x + p.y * 10. + p.z * 100.
    });
    assert_eq!(&asset.values[..4], &[0., 1., 2., 10.]);
    assert_eq!(asset.value_at(2, 1, 1), Some(112.));
    assert_eq!(asset.value_at(3, 0, 0), None);
}

#[test]
fn test_asset_sampling() {
    let asset = ball_asset();
    approx::assert_abs_diff_eq!(asset.sample(Vec3::ZERO), -30., epsilon = 1e-4);
    approx::assert_abs_diff_eq!(asset.sample(Vec3::new(40., 0., 0.)), 10., epsilon = 1e-4);
    // Halfway between two samples on the X axis
    approx::assert_abs_diff_eq!(asset.sample(Vec3::new(5., 0., 0.)), -25., epsilon = 1e-4);
    assert_eq!(asset.sample(Vec3::new(41., 0., 0.)), f32::INFINITY);
    assert_eq!(asset.half_extents(), Vec3::splat(40.));
}

#[test]
fn test_asset_file_round_trip() {
    let asset = ball_asset();
    let mut bytes = Vec::new();
    asset.write_to(&mut bytes).unwrap();
    assert_eq!(&bytes[..4], &[0x42, 0x46, 0x44, 0x53]);
    assert_eq!(bytes.len(), 4 * (1 + 1 + 3 + 1 + 3) + 4 * 729);

    let loaded = SdfBrushAsset::read_from(&mut bytes.as_slice()).unwrap();
    assert_eq!(loaded, asset);
}

#[test]
fn test_asset_rejects_bad_headers() {
    let mut bytes = Vec::new();
    ball_asset().write_to(&mut bytes).unwrap();

    let mut bad_magic = bytes.clone();
    bad_magic[0] = 0;
    assert!(matches!(
        SdfBrushAsset::read_from(&mut bad_magic.as_slice()),
        Err(VoxelIoError::BadMagic(_))
    ));

    let mut bad_version = bytes.clone();
    bad_version[4] = 7;
    assert!(matches!(
        SdfBrushAsset::read_from(&mut bad_version.as_slice()),
        Err(VoxelIoError::UnsupportedVersion(7))
    ));

    let mut bad_dimensions = bytes.clone();
    bad_dimensions[8..12].copy_from_slice(&0i32.to_le_bytes());
    assert!(matches!(
        SdfBrushAsset::read_from(&mut bad_dimensions.as_slice()),
        Err(VoxelIoError::InvalidDimensions([0, 9, 9]))
    ));

    assert!(matches!(
        SdfBrushAsset::read_from(&mut &bytes[..100]),
        Err(VoxelIoError::Io(_))
    ));
}

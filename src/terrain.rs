//! The terrain height collaborator and the per chunk cache of its samples

use crate::lerp;

use bevy::prelude::*;
use fast_surface_nets::ndshape::{RuntimeShape, Shape};
use std::sync::Arc;

/// A source of terrain heights, such as a landscape heightmap
pub trait HeightSource: Send + Sync + 'static {
    /// Get the terrain height at a world XY position, or None if no terrain covers it
    fn height_at(&self, xy: Vec2) -> Option<f32>;

    /// Get the terrain height at a world XY position, where missing terrain counts as height 0
    fn height_or_default(&self, xy: Vec2) -> f32 {
        self.height_at(xy).unwrap_or(0.)
    }
}

/// A height source shared between chunks and worker tasks
pub type SharedHeightSource = Arc<dyn HeightSource>;

/// A perfectly flat terrain
#[derive(Clone, Copy, Debug, Default)]
pub struct FlatTerrain(pub f32);

impl HeightSource for FlatTerrain {
    fn height_at(&self, _: Vec2) -> Option<f32> {
        Some(self.0)
    }
}

/// The absence of terrain. Every query reports no height
#[derive(Clone, Copy, Debug, Default)]
pub struct NoTerrain;

impl HeightSource for NoTerrain {
    fn height_at(&self, _: Vec2) -> Option<f32> {
        None
    }
}

impl<F> HeightSource for F
where
    F: Fn(Vec2) -> Option<f32> + Send + Sync + 'static,
{
    fn height_at(&self, xy: Vec2) -> Option<f32> {
        self(xy)
    }
}

/// The number of extra columns sampled on every side of a chunk
pub const HEIGHT_CACHE_PADDING: i32 = 3;

/// Terrain heights sampled once per voxel column of a chunk, plus a padding ring so lookups
/// near the chunk boundary agree with the neighbouring chunk
#[derive(Clone, Debug)]
pub struct HeightCache {
    chunk_min: Vec3,
    voxel_size: f32,
    side: u32,
    heights: Vec<f32>,
}

impl HeightCache {
    /// Sample a height source at the center of every voxel column of a chunk
    pub fn build(
        source: &dyn HeightSource,
        chunk_min: Vec3,
        voxel_size: f32,
        voxels_per_chunk: i32,
    ) -> Self {
        let side = (voxels_per_chunk + HEIGHT_CACHE_PADDING * 2).max(1) as u32;
        let shape = RuntimeShape::<u32, 2>::new([side, side]);
        let heights = (0..shape.size())
            .map(|i| {
                let [x, y] = shape.delinearize(i);
                let column = Vec2::new(
                    x as f32 - HEIGHT_CACHE_PADDING as f32,
                    y as f32 - HEIGHT_CACHE_PADDING as f32,
                );
                source.height_or_default(chunk_min.truncate() + (column + 0.5) * voxel_size)
            })
            .collect();

        Self {
            chunk_min,
            voxel_size,
            side,
            heights,
        }
    }

    fn shape(&self) -> RuntimeShape<u32, 2> {
        RuntimeShape::<u32, 2>::new([self.side, self.side])
    }

    /// Check if this cache was built for the given chunk placement and voxel size
    pub fn is_valid_for(&self, chunk_min: Vec3, voxel_size: f32) -> bool {
        self.chunk_min.distance(chunk_min) <= 0.1 && (self.voxel_size - voxel_size).abs() <= 0.001
    }

    fn sample(&self, x: i32, y: i32) -> f32 {
        let max = self.side as i32 - 1;
        let x = (x + HEIGHT_CACHE_PADDING).clamp(0, max) as u32;
        let y = (y + HEIGHT_CACHE_PADDING).clamp(0, max) as u32;
        self.heights[self.shape().linearize([x, y]) as usize]
    }

    /// Get the height of a voxel column local to the chunk. Columns outside the padded area
    /// use the closest cached column
    pub fn column_height(&self, x: i32, y: i32) -> f32 {
        self.sample(x, y)
    }

    /// Get the terrain height at a world XY position with bilinear interpolation between the
    /// cached columns
    pub fn height_at(&self, xy: Vec2) -> f32 {
        let grid = (xy - self.chunk_min.truncate()) / self.voxel_size - 0.5;
        let base = grid.floor();
        let frac = grid - base;
        let (x0, y0) = (base.x as i32, base.y as i32);

        let h0 = lerp(self.sample(x0, y0), self.sample(x0 + 1, y0), frac.x);
        let h1 = lerp(self.sample(x0, y0 + 1), self.sample(x0 + 1, y0 + 1), frac.x);
        lerp(h0, h1, frac.y)
    }
}

#[test]
fn test_missing_terrain_defaults_to_zero() {
    assert_eq!(NoTerrain.height_or_default(Vec2::new(10., 10.)), 0.);
    assert_eq!(FlatTerrain(-40.).height_or_default(Vec2::ZERO), -40.);
    let slope = |xy: Vec2| (xy.x > 0.).then_some(xy.x);
    assert_eq!(slope.height_or_default(Vec2::new(-5., 0.)), 0.);
    assert_eq!(slope.height_or_default(Vec2::new(5., 0.)), 5.);
}

#[test]
fn test_height_cache_interpolates_columns() {
    let slope = |xy: Vec2| Some(xy.x * 0.5);
    let cache = HeightCache::build(&slope, Vec3::new(100., 0., 0.), 10., 4);

    // Column centers hold exact samples
    assert_eq!(cache.column_height(0, 0), 52.5);
    assert_eq!(cache.column_height(-3, 2), 37.5);
    // Between columns the result is interpolated
    approx::assert_abs_diff_eq!(cache.height_at(Vec2::new(110., 3.)), 55., epsilon = 1e-4);
    // Far outside the padded grid the nearest column is used
    assert_eq!(cache.column_height(100, 0), cache.column_height(6, 0));
}

#[test]
fn test_height_cache_validity() {
    let cache = HeightCache::build(&FlatTerrain(0.), Vec3::ZERO, 25., 32);
    assert!(cache.is_valid_for(Vec3::new(0.05, 0., 0.), 25.));
    assert!(!cache.is_valid_for(Vec3::new(800., 0., 0.), 25.));
    assert!(!cache.is_valid_for(Vec3::ZERO, 12.5));
}

//! This module contains the brush shapes used to sculpt the voxel field.
//!
//! Every shape is a distance function in brush local space. The shared [ShapeSdf::evaluate]
//! turns that distance into the value written to the field:
//! - Inside the shape a dig writes [SDF_AIR] and an add writes [SDF_SOLID]
//! - Within `falloff` outside the surface the value fades out with a smoothstep
//! - Further away nothing is written at all
//!
//! Digging below the terrain fades toward solid instead of toward zero, so the edge of a dig
//! always leaves a wall behind.

use crate::{lerp, smoothstep, SdfBrushAsset, SDF_AIR, SDF_SOLID};

use bevy::prelude::*;
use enum_dispatch::enum_dispatch;
use std::{
    f32::consts::{PI, TAU},
    sync::Arc,
};

/// A single brush application
#[derive(Clone, Debug)]
pub struct BrushStroke {
    /// The shape and its extra parameters
    pub shape: BrushShape,
    /// The world position the stroke was made at
    pub position: Vec3,
    /// An offset from `position` to the actual center of the shape
    pub offset: Vec3,
    /// The main size of the shape in world units
    pub radius: f32,
    /// A multiplier on the written values
    pub strength: f32,
    /// The width of the band outside the surface where values fade out, in world units
    pub falloff: f32,
    /// The rotation of the shape around its center
    pub rotation: Quat,
    /// Carve air when true, add solid when false
    pub dig: bool,
    /// Fill the whole shape when true, only its shell when false
    pub filled: bool,
    /// The thickness of the shell of hollow strokes. None uses one and a half voxels
    pub wall_thickness: Option<f32>,
}

impl Default for BrushStroke {
    fn default() -> Self {
        Self {
            shape: BrushShape::default(),
            position: Vec3::ZERO,
            offset: Vec3::ZERO,
            radius: 100.,
            strength: 1.,
            falloff: 0.2,
            rotation: Quat::IDENTITY,
            dig: true,
            filled: true,
            wall_thickness: None,
        }
    }
}

impl BrushStroke {
    /// Create a stroke with default settings
    pub fn new(shape: impl Into<BrushShape>, position: Vec3, radius: f32, dig: bool) -> Self {
        Self {
            shape: shape.into(),
            position,
            radius,
            dig,
            ..default()
        }
    }

    /// The world position of the center of the shape
    pub fn center(&self) -> Vec3 {
        self.position + self.offset
    }

    /// Transform a world position into brush local space
    pub fn to_local(&self, world: Vec3) -> Vec3 {
        self.rotation.inverse() * (world - self.center())
    }

    /// The thickness of the shell of a hollow stroke
    pub fn shell_thickness(&self, voxel_size: f32) -> f32 {
        self.wall_thickness
            .unwrap_or(voxel_size * 1.5)
            .max(self.radius * 0.05)
    }

    /// Get the value written for a world position, given the terrain height below it
    pub fn evaluate(&self, world: Vec3, terrain_height: f32, voxel_size: f32) -> f32 {
        self.shape.evaluate(world, self, terrain_height, voxel_size)
    }

    /// Map a signed distance to the shape surface to the value written to the field
    pub fn contribution(&self, distance: f32, below_terrain: bool) -> f32 {
        if !(distance <= self.falloff) {
            return 0.;
        }

        let value = if distance <= 0. {
            if self.dig {
                SDF_AIR
            } else {
                SDF_SOLID
            }
        } else {
            let t = smoothstep(distance / self.falloff);
            match (self.dig, below_terrain) {
                (true, true) => lerp(SDF_AIR, SDF_SOLID, t),
                (true, false) => lerp(SDF_AIR, 0., t),
                (false, _) => lerp(SDF_SOLID, 0., t),
            }
        };
        value * self.strength
    }
}

/// The world space bounding box of everything a stroke may write to, as a center and half
/// extents
pub fn brush_bounds(stroke: &BrushStroke) -> (Vec3, Vec3) {
    let half = stroke.shape.half_extents(stroke);
    let half = if stroke.shape.is_rotation_invariant() {
        half
    } else {
        let rotation = Mat3::from_quat(stroke.rotation);
        rotation.x_axis.abs() * half.x
            + rotation.y_axis.abs() * half.y
            + rotation.z_axis.abs() * half.z
    };
    (stroke.center(), half + stroke.falloff + 0.01)
}

/// A trait for a brush shape
#[enum_dispatch]
pub trait ShapeSdf {
    /// The signed distance from a brush local position to the surface of the shape
    fn surface_distance(&self, local: Vec3, stroke: &BrushStroke) -> f32;

    /// The half extents of the unrotated shape
    fn half_extents(&self, stroke: &BrushStroke) -> Vec3;

    /// Check if rotating the shape leaves its bounds unchanged
    fn is_rotation_invariant(&self) -> bool {
        false
    }

    /// Get the value written to the field at a world position
    fn evaluate(
        &self,
        world: Vec3,
        stroke: &BrushStroke,
        terrain_height: f32,
        voxel_size: f32,
    ) -> f32 {
        let mut distance = self.surface_distance(stroke.to_local(world), stroke);
        if !stroke.filled {
            distance = distance.abs() - stroke.shell_thickness(voxel_size);
        }
        stroke.contribution(distance, world.z < terrain_height)
    }
}

/// All available brush shapes, used to pass [ShapeSdf] around without Box or dynamic dispatch
#[derive(Clone, Debug)]
#[enum_dispatch(ShapeSdf)]
pub enum BrushShape {
    /// A sphere
    Sphere(SphereBrush),
    /// A box
    Cube(CubeBrush),
    /// A cylinder along the local Z axis
    Cylinder(CylinderBrush),
    /// A capsule along the local Z axis
    Capsule(CapsuleBrush),
    /// A cone opening along the local Z axis
    Cone(ConeBrush),
    /// A ring in the local XY plane
    Torus(TorusBrush),
    /// A square pyramid pointing along the local Z axis
    Pyramid(PyramidBrush),
    /// A faceted sphere
    Icosphere(IcosphereBrush),
    /// A flight of stairs climbing along the local X axis
    Stairs(StairsBrush),
    /// A weak erosion or filling field
    Smooth(SmoothBrush),
    /// A weak noisy erosion or filling field
    Noise(NoiseBrush),
    /// A shape baked into a distance grid
    Custom(CustomBrush),
}

impl Default for BrushShape {
    fn default() -> Self {
        Self::Sphere(SphereBrush)
    }
}

fn positive_or(value: f32, fallback: f32) -> f32 {
    if value > 0. {
        value
    } else {
        fallback
    }
}

/// A sphere with the stroke radius
#[derive(Clone, Copy, Debug, Default)]
pub struct SphereBrush;

impl ShapeSdf for SphereBrush {
    fn surface_distance(&self, local: Vec3, stroke: &BrushStroke) -> f32 {
        local.length() - stroke.radius
    }

    fn half_extents(&self, stroke: &BrushStroke) -> Vec3 {
        Vec3::splat(stroke.radius)
    }

    fn is_rotation_invariant(&self) -> bool {
        true
    }
}

/// A box, with the stroke radius as half size unless explicit half extents are set
#[derive(Clone, Copy, Debug, Default)]
pub struct CubeBrush {
    /// Half extents per axis
    pub half_extents: Option<Vec3>,
}

impl ShapeSdf for CubeBrush {
    fn surface_distance(&self, local: Vec3, stroke: &BrushStroke) -> f32 {
        let q = local.abs() - self.half_extents(stroke);
        q.max(Vec3::ZERO).length() + q.max_element().min(0.)
    }

    fn half_extents(&self, stroke: &BrushStroke) -> Vec3 {
        self.half_extents
            .unwrap_or(Vec3::splat(stroke.radius))
            .abs()
    }
}

/// A cylinder of the stroke radius
#[derive(Clone, Copy, Debug, Default)]
pub struct CylinderBrush {
    /// The full length along the axis. Zero uses twice the radius
    pub length: f32,
}

impl ShapeSdf for CylinderBrush {
    fn surface_distance(&self, local: Vec3, stroke: &BrushStroke) -> f32 {
        let half_length = positive_or(self.length, stroke.radius * 2.) / 2.;
        let d = Vec2::new(
            local.truncate().length() - stroke.radius,
            local.z.abs() - half_length,
        );
        d.max_element().min(0.) + d.max(Vec2::ZERO).length()
    }

    fn half_extents(&self, stroke: &BrushStroke) -> Vec3 {
        let half_length = positive_or(self.length, stroke.radius * 2.) / 2.;
        Vec3::new(stroke.radius, stroke.radius, half_length)
    }
}

/// A capsule of the stroke radius
#[derive(Clone, Copy, Debug, Default)]
pub struct CapsuleBrush {
    /// The length of the straight part between the two caps
    pub length: f32,
}

impl ShapeSdf for CapsuleBrush {
    fn surface_distance(&self, local: Vec3, stroke: &BrushStroke) -> f32 {
        let half_length = self.length.max(0.) / 2.;
        let axis = Vec3::new(0., 0., local.z.clamp(-half_length, half_length));
        local.distance(axis) - stroke.radius
    }

    fn half_extents(&self, stroke: &BrushStroke) -> Vec3 {
        let half_length = self.length.max(0.) / 2.;
        Vec3::new(stroke.radius, stroke.radius, half_length + stroke.radius)
    }
}

/// A solid cone with its apex at the brush center
#[derive(Clone, Copy, Debug)]
pub struct ConeBrush {
    /// The height of the cone. Zero uses the radius
    pub length: f32,
    /// The half opening angle in degrees
    pub angle_degrees: f32,
}

impl Default for ConeBrush {
    fn default() -> Self {
        Self {
            length: 0.,
            angle_degrees: 30.,
        }
    }
}

impl ConeBrush {
    fn dimensions(&self, stroke: &BrushStroke) -> (f32, f32) {
        let height = positive_or(self.length, stroke.radius);
        let angle = self.angle_degrees.clamp(1., 89.).to_radians();
        (height, height * angle.tan())
    }
}

fn distance_to_segment(p: Vec2, a: Vec2, b: Vec2) -> f32 {
    let ab = b - a;
    let t = ((p - a).dot(ab) / ab.length_squared()).clamp(0., 1.);
    p.distance(a + ab * t)
}

impl ShapeSdf for ConeBrush {
    fn surface_distance(&self, local: Vec3, stroke: &BrushStroke) -> f32 {
        let (height, base_radius) = self.dimensions(stroke);
        // Work in the half plane through the axis
        let q = Vec2::new(local.truncate().length(), local.z);
        let base = Vec2::new(base_radius, height);
        let side = distance_to_segment(q, Vec2::ZERO, base);
        let cap = distance_to_segment(q, Vec2::new(0., height), base);
        let distance = side.min(cap);

        let inside = q.y >= 0. && q.y <= height && q.x * height <= q.y * base_radius;
        if inside {
            -distance
        } else {
            distance
        }
    }

    fn half_extents(&self, stroke: &BrushStroke) -> Vec3 {
        let (height, base_radius) = self.dimensions(stroke);
        Vec3::new(base_radius, base_radius, height)
    }
}

/// A torus with the stroke radius as its major radius
#[derive(Clone, Copy, Debug, Default)]
pub struct TorusBrush {
    /// The radius of the tube. Zero uses a quarter of the major radius
    pub inner_radius: f32,
}

impl TorusBrush {
    fn tube_radius(&self, stroke: &BrushStroke) -> f32 {
        positive_or(self.inner_radius, stroke.radius * 0.25)
    }
}

impl ShapeSdf for TorusBrush {
    fn surface_distance(&self, local: Vec3, stroke: &BrushStroke) -> f32 {
        let ring = Vec2::new(local.truncate().length() - stroke.radius, local.z);
        ring.length() - self.tube_radius(stroke)
    }

    fn half_extents(&self, stroke: &BrushStroke) -> Vec3 {
        let tube = self.tube_radius(stroke);
        Vec3::new(stroke.radius + tube, stroke.radius + tube, tube)
    }
}

/// A square pyramid with the stroke radius as the half width of its base
#[derive(Clone, Copy, Debug, Default)]
pub struct PyramidBrush {
    /// The height from base to apex. Zero uses twice the radius
    pub height: f32,
    /// Widens the pyramid, a steeper angle gives a blunter top
    pub angle_degrees: f32,
}

impl ShapeSdf for PyramidBrush {
    fn surface_distance(&self, local: Vec3, stroke: &BrushStroke) -> f32 {
        let height = positive_or(self.height, stroke.radius * 2.);
        let half_height = height / 2.;
        let horizontal = local.x.abs().max(local.y.abs());

        if local.z < -half_height {
            let below = -local.z - half_height;
            let outside = horizontal - stroke.radius;
            if outside <= 0. {
                below
            } else {
                Vec2::new(outside, below).length()
            }
        } else if local.z > half_height {
            local.distance(Vec3::new(0., 0., half_height))
        } else {
            let slope = self.angle_degrees.clamp(0., 89.).to_radians().tan() * 0.1;
            let ratio = (local.z + half_height) / height;
            let width = (stroke.radius * (1. - ratio + slope)).max(0.);
            horizontal - width
        }
    }

    fn half_extents(&self, stroke: &BrushStroke) -> Vec3 {
        let height = positive_or(self.height, stroke.radius * 2.);
        let slope = self.angle_degrees.clamp(0., 89.).to_radians().tan() * 0.1;
        let width = stroke.radius * (1. + slope);
        Vec3::new(width, width, height / 2.)
    }
}

/// A sphere with faceted bumps, more steps give smaller facets
#[derive(Clone, Copy, Debug)]
pub struct IcosphereBrush {
    /// The subdivision level of the facets
    pub steps: u32,
}

impl Default for IcosphereBrush {
    fn default() -> Self {
        Self { steps: 2 }
    }
}

impl IcosphereBrush {
    fn distortion(&self, direction: Vec3) -> f32 {
        let phi_step = TAU / (self.steps * 2).max(1) as f32;
        let theta_step = PI / self.steps.max(1) as f32;
        let phi = direction.y.atan2(direction.x);
        let theta = direction.z.clamp(-1., 1.).acos();
        let phi = (phi / phi_step).floor() * phi_step;
        let theta = (theta / theta_step).floor() * theta_step;
        (phi * 3.).sin() * (theta * 2.).sin() * 0.1
    }
}

impl ShapeSdf for IcosphereBrush {
    fn surface_distance(&self, local: Vec3, stroke: &BrushStroke) -> f32 {
        let length = local.length();
        if length <= 0. {
            return -stroke.radius;
        }
        length + self.distortion(local / length) * 0.1 * stroke.radius - stroke.radius
    }

    fn half_extents(&self, stroke: &BrushStroke) -> Vec3 {
        Vec3::splat(stroke.radius * 1.01)
    }

    fn is_rotation_invariant(&self) -> bool {
        true
    }
}

/// A flight of stairs of the stroke radius as half width, climbing along +X from the center
#[derive(Clone, Copy, Debug)]
pub struct StairsBrush {
    /// The number of treads
    pub steps: u32,
    /// The horizontal run of the whole flight. Zero uses twice the radius
    pub length: f32,
    /// The height of the top tread. Zero uses the radius
    pub height: f32,
}

impl Default for StairsBrush {
    fn default() -> Self {
        Self {
            steps: 4,
            length: 0.,
            height: 0.,
        }
    }
}

impl StairsBrush {
    fn dimensions(&self, stroke: &BrushStroke) -> (f32, f32) {
        (
            positive_or(self.length, stroke.radius * 2.),
            positive_or(self.height, stroke.radius),
        )
    }
}

fn box_distance(p: Vec3, min: Vec3, max: Vec3) -> f32 {
    let center = (min + max) / 2.;
    let q = (p - center).abs() - (max - min) / 2.;
    q.max(Vec3::ZERO).length() + q.max_element().min(0.)
}

impl ShapeSdf for StairsBrush {
    fn surface_distance(&self, local: Vec3, stroke: &BrushStroke) -> f32 {
        let (length, height) = self.dimensions(stroke);
        let steps = self.steps.max(1);
        let run = length / steps as f32;
        let rise = height / steps as f32;

        // Each tread is a block reaching from its own start to the end of the flight
        (0..steps)
            .map(|i| {
                let min = Vec3::new(i as f32 * run, -stroke.radius, 0.);
                let max = Vec3::new(length, stroke.radius, (i + 1) as f32 * rise);
                box_distance(local, min, max)
            })
            .fold(f32::INFINITY, f32::min)
    }

    fn half_extents(&self, stroke: &BrushStroke) -> Vec3 {
        let (length, height) = self.dimensions(stroke);
        Vec3::new(length, stroke.radius, height)
    }
}

fn smooth_factor(world: Vec3, stroke: &BrushStroke) -> Option<f32> {
    let reach = stroke.radius + stroke.falloff;
    let distance = world.distance(stroke.center());
    if distance > reach || reach <= 0. {
        return None;
    }
    Some(1. - (distance / reach).clamp(0., 1.))
}

/// Slowly erodes when digging and slowly fills when adding
#[derive(Clone, Copy, Debug, Default)]
pub struct SmoothBrush;

impl ShapeSdf for SmoothBrush {
    fn surface_distance(&self, local: Vec3, stroke: &BrushStroke) -> f32 {
        local.length() - stroke.radius
    }

    fn half_extents(&self, stroke: &BrushStroke) -> Vec3 {
        Vec3::splat(stroke.radius)
    }

    fn is_rotation_invariant(&self) -> bool {
        true
    }

    fn evaluate(&self, world: Vec3, stroke: &BrushStroke, _: f32, _: f32) -> f32 {
        let Some(factor) = smooth_factor(world, stroke) else {
            return 0.;
        };
        if stroke.dig {
            0.02 * stroke.strength * factor
        } else {
            -0.01 * stroke.strength * factor
        }
    }
}

fn hash_noise(p: Vec3) -> f32 {
    let n = (p * 0.1).dot(Vec3::new(12.9898, 78.233, 37.719)).sin() * 43758.5453;
    n.fract().abs() * 2. - 1.
}

/// Like [SmoothBrush], but with a noisy strength
#[derive(Clone, Copy, Debug, Default)]
pub struct NoiseBrush;

impl ShapeSdf for NoiseBrush {
    fn surface_distance(&self, local: Vec3, stroke: &BrushStroke) -> f32 {
        local.length() - stroke.radius
    }

    fn half_extents(&self, stroke: &BrushStroke) -> Vec3 {
        Vec3::splat(stroke.radius)
    }

    fn is_rotation_invariant(&self) -> bool {
        true
    }

    fn evaluate(&self, world: Vec3, stroke: &BrushStroke, _: f32, _: f32) -> f32 {
        let Some(factor) = smooth_factor(world, stroke) else {
            return 0.;
        };
        let value = 0.03 * stroke.strength * factor * (1. + hash_noise(world));
        if stroke.dig {
            value
        } else {
            -value
        }
    }
}

/// A shape sampled from a baked [SdfBrushAsset]
#[derive(Clone, Debug)]
pub struct CustomBrush(pub Arc<SdfBrushAsset>);

impl ShapeSdf for CustomBrush {
    fn surface_distance(&self, local: Vec3, _: &BrushStroke) -> f32 {
        self.0.sample(local)
    }

    fn half_extents(&self, _: &BrushStroke) -> Vec3 {
        self.0.half_extents()
    }
}

#[cfg(test)]
fn sphere_stroke(dig: bool) -> BrushStroke {
    BrushStroke {
        falloff: 20.,
        dig,
        ..default()
    }
}

#[test]
fn test_dig_mapping() {
    let stroke = sphere_stroke(true);
    assert_eq!(stroke.evaluate(Vec3::ZERO, 0., 25.), SDF_AIR);
    assert_eq!(stroke.evaluate(Vec3::new(0., 0., 90.), 0., 25.), SDF_AIR);
    // Outside the falloff band nothing is written
    assert_eq!(stroke.evaluate(Vec3::new(121., 0., 0.), 0., 25.), 0.);

    // Halfway through the band, above and below the terrain
    let above = stroke.evaluate(Vec3::new(110., 0., 0.), -50., 25.);
    let below = stroke.evaluate(Vec3::new(110., 0., 0.), 50., 25.);
    approx::assert_abs_diff_eq!(above, 0.5, epsilon = 1e-5);
    approx::assert_abs_diff_eq!(below, 0., epsilon = 1e-5);
    let edge = stroke.evaluate(Vec3::new(119.9, 0., 0.), 50., 25.);
    assert!(edge < -0.99);
}

#[test]
fn test_add_mapping() {
    let mut stroke = sphere_stroke(false);
    stroke.strength = 0.5;
    assert_eq!(stroke.evaluate(Vec3::new(50., 0., 0.), 0., 25.), -0.5);
    approx::assert_abs_diff_eq!(
        stroke.evaluate(Vec3::new(110., 0., 0.), 0., 25.),
        -0.25,
        epsilon = 1e-5
    );
    assert_eq!(stroke.evaluate(Vec3::new(150., 0., 0.), 0., 25.), 0.);
}

#[test]
fn test_hollow_strokes_only_touch_the_shell() {
    let stroke = BrushStroke {
        filled: false,
        wall_thickness: Some(10.),
        ..sphere_stroke(true)
    };
    assert_eq!(stroke.shell_thickness(25.), 10.);
    assert_eq!(stroke.evaluate(Vec3::new(95., 0., 0.), 0., 25.), SDF_AIR);
    assert_eq!(stroke.evaluate(Vec3::ZERO, 0., 25.), 0.);
    // The default shell is one and a half voxels, but never thinner than 5% of the radius
    assert_eq!(BrushStroke::default().shell_thickness(2.), 5.);
    assert_eq!(BrushStroke::default().shell_thickness(25.), 37.5);
}

#[test]
fn test_shape_distances() {
    let stroke = BrushStroke {
        radius: 10.,
        ..default()
    };
    let d = |shape: BrushShape, p: Vec3| shape.surface_distance(p, &stroke);

    assert_eq!(d(SphereBrush.into(), Vec3::new(0., 0., 4.)), -6.);
    assert_eq!(d(CubeBrush::default().into(), Vec3::new(13., 0., 0.)), 3.);
    let flat_box = CubeBrush {
        half_extents: Some(Vec3::new(10., 10., 2.)),
    };
    assert_eq!(d(flat_box.into(), Vec3::new(0., 0., 5.)), 3.);
    assert_eq!(d(CylinderBrush { length: 40. }.into(), Vec3::new(0., 0., 19.)), -1.);
    assert_eq!(d(CylinderBrush { length: 40. }.into(), Vec3::new(14., 0., 0.)), 4.);
    assert_eq!(d(CapsuleBrush { length: 40. }.into(), Vec3::new(0., 0., 35.)), 5.);
    assert_eq!(
        d(TorusBrush { inner_radius: 2. }.into(), Vec3::new(10., 0., 0.)),
        -2.
    );
    assert_eq!(d(TorusBrush { inner_radius: 2. }.into(), Vec3::ZERO), 8.);

    let cone = ConeBrush {
        length: 20.,
        angle_degrees: 45.,
    };
    assert!(d(cone.into(), Vec3::new(0., 0., 10.)) < 0.);
    assert!(d(cone.into(), Vec3::new(15., 0., 10.)) > 0.);
    approx::assert_abs_diff_eq!(d(cone.into(), Vec3::new(0., 0., 25.)), 5., epsilon = 1e-4);

    let pyramid = PyramidBrush {
        height: 20.,
        angle_degrees: 0.,
    };
    assert_eq!(d(pyramid.into(), Vec3::new(0., 0., -15.)), 5.);
    assert_eq!(d(pyramid.into(), Vec3::new(3., 0., 0.)), -2.);
    assert_eq!(d(pyramid.into(), Vec3::new(0., 0., 14.)), 4.);

    let stairs = StairsBrush {
        steps: 2,
        length: 20.,
        height: 10.,
    };
    assert!(d(stairs.into(), Vec3::new(5., 0., 2.)) < 0.);
    assert!(d(stairs.into(), Vec3::new(5., 0., 7.)) > 0.);
    assert!(d(stairs.into(), Vec3::new(15., 0., 7.)) < 0.);

    let bumpy = d(IcosphereBrush { steps: 3 }.into(), Vec3::new(10., 0., 0.));
    assert!(bumpy.abs() <= 0.1 + 1e-5);
}

#[test]
fn test_rotation_moves_the_shape() {
    let stroke = BrushStroke {
        shape: CylinderBrush { length: 200. }.into(),
        radius: 10.,
        rotation: Quat::from_rotation_y(std::f32::consts::FRAC_PI_2),
        ..default()
    };
    // The cylinder axis now lies along world X
    assert_eq!(stroke.evaluate(Vec3::new(90., 0., 0.), 0., 25.), SDF_AIR);
    assert_eq!(stroke.evaluate(Vec3::new(0., 0., 90.), 0., 25.), 0.);

    let (center, half) = brush_bounds(&stroke);
    assert_eq!(center, Vec3::ZERO);
    approx::assert_abs_diff_eq!(half, Vec3::new(100.21, 10.21, 10.21), epsilon = 1e-3);
}

#[test]
fn test_spherical_bounds_ignore_rotation() {
    let stroke = BrushStroke {
        offset: Vec3::new(0., 0., 5.),
        rotation: Quat::from_rotation_z(0.7),
        ..default()
    };
    let (center, half) = brush_bounds(&stroke);
    assert_eq!(center, Vec3::new(0., 0., 5.));
    approx::assert_abs_diff_eq!(half, Vec3::splat(100.21), epsilon = 1e-4);
}

#[test]
fn test_smooth_and_noise_are_weak() {
    let stroke = BrushStroke {
        shape: SmoothBrush.into(),
        ..default()
    };
    approx::assert_abs_diff_eq!(stroke.evaluate(Vec3::ZERO, 0., 25.), 0.02, epsilon = 1e-6);
    assert_eq!(stroke.evaluate(Vec3::new(0., 0., 200.), 0., 25.), 0.);

    let adding = BrushStroke {
        dig: false,
        ..stroke.clone()
    };
    approx::assert_abs_diff_eq!(adding.evaluate(Vec3::ZERO, 0., 25.), -0.01, epsilon = 1e-6);

    let noise = BrushStroke {
        shape: NoiseBrush.into(),
        ..default()
    };
    for x in 0..20 {
        let value = noise.evaluate(Vec3::new(x as f32 * 3., 1., 2.), 0., 25.);
        assert!((0. ..=0.06).contains(&value));
    }
}

#[test]
fn test_custom_brush_uses_asset() {
    let asset = SdfBrushAsset::from_fn(IVec3::splat(5), 10., Vec3::splat(-20.), |p| {
        p.length() - 15.
    });
    let stroke = BrushStroke {
        shape: CustomBrush(Arc::new(asset)).into(),
        dig: false,
        ..default()
    };
    assert_eq!(stroke.evaluate(Vec3::ZERO, 0., 25.), SDF_SOLID);
    assert_eq!(stroke.evaluate(Vec3::new(500., 0., 0.), 0., 25.), 0.);
    approx::assert_abs_diff_eq!(brush_bounds(&stroke).1, Vec3::splat(20.21), epsilon = 1e-4);
}

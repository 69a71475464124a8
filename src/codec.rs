//! Little endian scalar encoding shared by the chunk and brush asset formats

use crate::VoxelResult;

use bevy::prelude::*;
use std::io::{Read, Write};

pub(crate) fn write_i32(w: &mut impl Write, value: i32) -> VoxelResult<()> {
    w.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub(crate) fn write_u32(w: &mut impl Write, value: u32) -> VoxelResult<()> {
    w.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub(crate) fn write_f32(w: &mut impl Write, value: f32) -> VoxelResult<()> {
    w.write_all(&value.to_le_bytes())?;
    Ok(())
}

pub(crate) fn write_ivec3(w: &mut impl Write, value: IVec3) -> VoxelResult<()> {
    for v in value.to_array() {
        write_i32(w, v)?;
    }
    Ok(())
}

pub(crate) fn write_vec3(w: &mut impl Write, value: Vec3) -> VoxelResult<()> {
    for v in value.to_array() {
        write_f32(w, v)?;
    }
    Ok(())
}

fn read_bytes(r: &mut impl Read) -> VoxelResult<[u8; 4]> {
    let mut buf = [0; 4];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

pub(crate) fn read_i32(r: &mut impl Read) -> VoxelResult<i32> {
    Ok(i32::from_le_bytes(read_bytes(r)?))
}

pub(crate) fn read_u32(r: &mut impl Read) -> VoxelResult<u32> {
    Ok(u32::from_le_bytes(read_bytes(r)?))
}

pub(crate) fn read_f32(r: &mut impl Read) -> VoxelResult<f32> {
    Ok(f32::from_le_bytes(read_bytes(r)?))
}

pub(crate) fn read_ivec3(r: &mut impl Read) -> VoxelResult<IVec3> {
    Ok(IVec3::new(read_i32(r)?, read_i32(r)?, read_i32(r)?))
}

pub(crate) fn read_vec3(r: &mut impl Read) -> VoxelResult<Vec3> {
    Ok(Vec3::new(read_f32(r)?, read_f32(r)?, read_f32(r)?))
}

#[test]
fn test_scalars_are_little_endian() {
    let mut buf = Vec::new();
    write_i32(&mut buf, 1).unwrap();
    write_u32(&mut buf, 0x53444642).unwrap();
    assert_eq!(&buf, &[1, 0, 0, 0, 0x42, 0x46, 0x44, 0x53]);
}

#[test]
fn test_short_read_is_an_error() {
    let mut bytes: &[u8] = &[1, 2];
    assert!(read_f32(&mut bytes).is_err());
}

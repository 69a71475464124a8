use thiserror::Error;

/// Errors raised while reading or writing voxel data streams
#[derive(Error, Debug)]
pub enum VoxelIoError {
    /// The underlying reader or writer failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialized voxel count was negative or larger than the accepted maximum
    #[error("invalid voxel count: {0}")]
    InvalidVoxelCount(i64),

    /// A brush asset did not start with the SDFB magic number
    #[error("bad magic number: {0:#010x}")]
    BadMagic(u32),

    /// A brush asset used a format version this crate does not read
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u32),

    /// A brush asset declared an empty or oversized grid
    #[error("invalid dimensions: {0:?}")]
    InvalidDimensions([i32; 3]),
}

/// Result alias for voxel stream operations
pub type VoxelResult<T> = Result<T, VoxelIoError>;

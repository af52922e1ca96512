//! Configuration errors raised while validating settings and building the quadtree

use thiserror::Error;

/// Errors that prevent the terrain system from starting
///
/// All of these are startup-configuration problems. Nothing at per-frame
/// time returns a `TerrainError`; a selection overflow is a panic instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TerrainError {
    /// A setting is outside its accepted domain
    #[error("invalid terrain setting `{field}` = {value}: expected {expected}")]
    InvalidSetting {
        /// Name of the offending field
        field: &'static str,
        /// The rejected value, formatted
        value: String,
        /// Human readable description of the accepted domain
        expected: &'static str,
    },

    /// The heightfield source reports a zero-sized raster
    #[error("heightfield raster is empty ({width}x{height})")]
    EmptyRaster { width: u32, height: u32 },

    /// The heightfield raster is larger than node coordinates can address
    #[error("heightfield raster {width}x{height} exceeds the maximum of {max} samples per side")]
    RasterTooLarge { width: u32, height: u32, max: u32 },

    /// The world-space footprint has a non-positive or non-finite extent
    #[error("map dimensions must be finite and positive, got size {size}")]
    InvalidMapDimensions { size: bevy::math::Vec3 },

    /// The selection buffer cannot hold the worst-case number of selected nodes
    #[error(
        "selection capacity {capacity} is too small: the configured LOD setup may select up to {required} nodes per frame"
    )]
    SelectionCapacityTooSmall { capacity: usize, required: usize },
}

impl TerrainError {
    pub(crate) fn invalid(
        field: &'static str,
        value: impl std::fmt::Display,
        expected: &'static str,
    ) -> Self {
        TerrainError::InvalidSetting {
            field,
            value: value.to_string(),
            expected,
        }
    }
}

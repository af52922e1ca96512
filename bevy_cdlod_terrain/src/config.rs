//! Terrain settings and builder pattern

use crate::error::TerrainError;
use bevy::prelude::*;

/// Maximum number of LOD levels a quadtree can have
pub const MAX_LOD_LEVELS: usize = 15;

/// Default number of nodes a single frame's selection can hold
pub const DEFAULT_SELECTION_CAPACITY: usize = 4096;

/// Largest render grid (in quads per side) a node may be drawn with
pub const MAX_RENDER_GRID_DIMENSION: u32 = 128;

/// Largest raster side the quadtree can address
pub const MAX_RASTER_SIZE: u32 = 65535;

/// Accepted range of the ratio between consecutive LOD distance bands
pub const MIN_LOD_DISTANCE_RATIO: f32 = 1.5;
pub const MAX_LOD_DISTANCE_RATIO: f32 = 16.0;

/// Main configuration for the CDLOD terrain system
///
/// Settings are immutable once validated; changing them requires rebuilding
/// the quadtree.
#[derive(Resource, Clone, Debug)]
pub struct TerrainSettings {
    /// Raw heightfield samples per side of a leaf node
    pub leaf_node_size: u32,
    /// Multiplier applied to `leaf_node_size` to get the render grid dimension
    pub render_grid_resolution_mult: u32,
    /// Number of LOD levels, including the leaf level
    pub lod_level_count: u32,
    /// Lower bound for the per-frame view distance
    pub min_view_range: f32,
    /// Upper bound for the per-frame view distance; the coarsest level ends here
    pub max_view_range: f32,
    /// How much larger each coarser level's distance band is than the previous
    pub lod_level_distance_ratio: f32,
    /// Fraction of a level's band after which vertices start morphing
    pub morph_start_ratio: f32,
    /// Hard upper bound on selected nodes per frame
    pub selection_capacity: usize,
    /// Sort selected nodes closest first
    pub sort_by_distance: bool,
}

impl Default for TerrainSettings {
    fn default() -> Self {
        Self {
            leaf_node_size: 8,
            render_grid_resolution_mult: 4,
            lod_level_count: 8,
            min_view_range: 35_000.0,
            max_view_range: 100_000.0,
            lod_level_distance_ratio: 2.0,
            morph_start_ratio: 0.66,
            selection_capacity: DEFAULT_SELECTION_CAPACITY,
            sort_by_distance: false,
        }
    }
}

impl TerrainSettings {
    /// Create new settings with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder for customizing terrain settings
    pub fn builder() -> TerrainSettingsBuilder {
        TerrainSettingsBuilder::default()
    }

    /// Largest power of two `m` such that `m * leaf_node_size <= 128`, or 0 when none exists
    pub fn max_render_grid_resolution_mult(&self) -> u32 {
        if self.leaf_node_size == 0 || self.leaf_node_size > MAX_RENDER_GRID_DIMENSION {
            return 0;
        }
        let mut mult = 1;
        while mult * 2 * self.leaf_node_size <= MAX_RENDER_GRID_DIMENSION {
            mult *= 2;
        }
        mult
    }

    /// Quads per side of the grid mesh each selected node is drawn with
    pub fn render_grid_dimension(&self) -> u32 {
        self.leaf_node_size * self.render_grid_resolution_mult
    }

    /// Check every field against its accepted domain
    ///
    /// The first violation found is returned; the error names the field and
    /// its rejected value.
    pub fn validate(&self) -> Result<(), TerrainError> {
        let leaf = self.leaf_node_size;
        if !leaf.is_power_of_two() || !(2..=1024).contains(&leaf) {
            return Err(TerrainError::invalid(
                "leaf_node_size",
                leaf,
                "a power of two in 2..=1024",
            ));
        }

        let mult = self.render_grid_resolution_mult;
        let max_mult = self.max_render_grid_resolution_mult();
        if !mult.is_power_of_two() || mult > max_mult {
            return Err(TerrainError::invalid(
                "render_grid_resolution_mult",
                mult,
                "a power of two >= 1 with leaf_node_size * mult <= 128",
            ));
        }

        let count = self.lod_level_count;
        if !(2..=MAX_LOD_LEVELS as u32).contains(&count) {
            return Err(TerrainError::invalid(
                "lod_level_count",
                count,
                "an integer in 2..=15",
            ));
        }

        if !(1.0..=10_000_000.0).contains(&self.min_view_range) {
            return Err(TerrainError::invalid(
                "min_view_range",
                self.min_view_range,
                "a value in 1..=10000000",
            ));
        }

        if !(1.0..=10_000_000.0).contains(&self.max_view_range)
            || self.max_view_range < self.min_view_range
        {
            return Err(TerrainError::invalid(
                "max_view_range",
                self.max_view_range,
                "a value in 1..=10000000 and >= min_view_range",
            ));
        }

        if !(MIN_LOD_DISTANCE_RATIO..=MAX_LOD_DISTANCE_RATIO)
            .contains(&self.lod_level_distance_ratio)
        {
            return Err(TerrainError::invalid(
                "lod_level_distance_ratio",
                self.lod_level_distance_ratio,
                "a value in 1.5..=16.0",
            ));
        }

        if !(self.morph_start_ratio > 0.0 && self.morph_start_ratio < 1.0) {
            return Err(TerrainError::invalid(
                "morph_start_ratio",
                self.morph_start_ratio,
                "a value strictly between 0 and 1",
            ));
        }

        if self.selection_capacity == 0 {
            return Err(TerrainError::invalid(
                "selection_capacity",
                self.selection_capacity,
                "at least 1",
            ));
        }

        Ok(())
    }
}

/// Builder for creating customized TerrainSettings
#[derive(Default)]
pub struct TerrainSettingsBuilder {
    settings: TerrainSettings,
}

impl TerrainSettingsBuilder {
    /// Set the number of heightfield samples per leaf node side
    pub fn leaf_node_size(mut self, size: u32) -> Self {
        self.settings.leaf_node_size = size;
        self
    }

    /// Set the render grid resolution multiplier
    pub fn render_grid_resolution_mult(mut self, mult: u32) -> Self {
        self.settings.render_grid_resolution_mult = mult;
        self
    }

    /// Set the number of LOD levels
    pub fn lod_level_count(mut self, count: u32) -> Self {
        self.settings.lod_level_count = count;
        self
    }

    /// Set the lower bound for the view distance
    pub fn min_view_range(mut self, range: f32) -> Self {
        self.settings.min_view_range = range;
        self
    }

    /// Set the upper bound for the view distance
    pub fn max_view_range(mut self, range: f32) -> Self {
        self.settings.max_view_range = range;
        self
    }

    /// Set the ratio between consecutive LOD distance bands
    pub fn lod_level_distance_ratio(mut self, ratio: f32) -> Self {
        self.settings.lod_level_distance_ratio = ratio;
        self
    }

    /// Set where in each band morphing starts (0.0-1.0)
    pub fn morph_start_ratio(mut self, ratio: f32) -> Self {
        self.settings.morph_start_ratio = ratio;
        self
    }

    /// Set the maximum number of selected nodes per frame
    pub fn selection_capacity(mut self, capacity: usize) -> Self {
        self.settings.selection_capacity = capacity;
        self
    }

    /// Sort the selection closest first
    pub fn sort_by_distance(mut self, sort: bool) -> Self {
        self.settings.sort_by_distance = sort;
        self
    }

    /// Build the TerrainSettings without validating them
    pub fn build(self) -> TerrainSettings {
        self.settings
    }

    /// Build and validate in one step
    pub fn try_build(self) -> Result<TerrainSettings, TerrainError> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rejected_field(settings: TerrainSettings) -> &'static str {
        match settings.validate() {
            Err(TerrainError::InvalidSetting { field, .. }) => field,
            other => panic!("expected an invalid setting, got {other:?}"),
        }
    }

    #[test]
    fn test_default_settings_are_valid() {
        let settings = TerrainSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.render_grid_dimension(), 32);
    }

    #[test]
    fn test_builder() {
        let settings = TerrainSettings::builder()
            .leaf_node_size(16)
            .render_grid_resolution_mult(2)
            .lod_level_count(6)
            .build();

        assert_eq!(settings.leaf_node_size, 16);
        assert_eq!(settings.render_grid_resolution_mult, 2);
        assert_eq!(settings.lod_level_count, 6);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_leaf_size_must_be_power_of_two() {
        let settings = TerrainSettings::builder().leaf_node_size(3).build();
        assert_eq!(rejected_field(settings), "leaf_node_size");

        let settings = TerrainSettings::builder().leaf_node_size(2048).build();
        assert_eq!(rejected_field(settings), "leaf_node_size");
    }

    #[test]
    fn test_lod_level_count_bounds() {
        let settings = TerrainSettings::builder().lod_level_count(1).build();
        assert_eq!(rejected_field(settings), "lod_level_count");

        let settings = TerrainSettings::builder().lod_level_count(16).build();
        assert_eq!(rejected_field(settings), "lod_level_count");

        let settings = TerrainSettings::builder().lod_level_count(15).build();
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_distance_ratio_bounds() {
        let settings = TerrainSettings::builder()
            .lod_level_distance_ratio(1.0)
            .build();
        assert_eq!(rejected_field(settings), "lod_level_distance_ratio");

        let settings = TerrainSettings::builder()
            .lod_level_distance_ratio(16.5)
            .build();
        assert_eq!(rejected_field(settings), "lod_level_distance_ratio");
    }

    #[test]
    fn test_view_range_ordering() {
        let settings = TerrainSettings::builder()
            .min_view_range(500.0)
            .max_view_range(100.0)
            .build();
        assert_eq!(rejected_field(settings), "max_view_range");

        let settings = TerrainSettings::builder().min_view_range(0.5).build();
        assert_eq!(rejected_field(settings), "min_view_range");
    }

    #[test]
    fn test_render_grid_multiplier() {
        let settings = TerrainSettings::builder().leaf_node_size(8).build();
        assert_eq!(settings.max_render_grid_resolution_mult(), 16);

        let settings = TerrainSettings::builder()
            .leaf_node_size(128)
            .render_grid_resolution_mult(1)
            .build();
        assert_eq!(settings.max_render_grid_resolution_mult(), 1);
        assert!(settings.validate().is_ok());

        let settings = TerrainSettings::builder()
            .leaf_node_size(256)
            .render_grid_resolution_mult(1)
            .build();
        assert_eq!(settings.max_render_grid_resolution_mult(), 0);
        assert_eq!(rejected_field(settings), "render_grid_resolution_mult");

        let settings = TerrainSettings::builder()
            .render_grid_resolution_mult(3)
            .build();
        assert_eq!(rejected_field(settings), "render_grid_resolution_mult");
    }

    #[test]
    fn test_try_build_accepts_reference_configuration() {
        let settings = TerrainSettings::builder()
            .lod_level_distance_ratio(2.0)
            .lod_level_count(8)
            .min_view_range(35_000.0)
            .max_view_range(100_000.0)
            .try_build();
        assert!(settings.is_ok());
    }
}

//! # bevy_cdlod_terrain
//!
//! A Bevy terrain plugin built around CDLOD (continuous distance-dependent
//! level of detail):
//! - Min/max elevation quadtree built once from a heightfield
//! - Per-level distance bands and morph regions
//! - Per-frame frustum and distance based node selection with partial quadrants
//! - Draw-list construction over a single shared grid mesh
//! - HeightmapSource abstraction for raster, procedural and noise terrain

use bevy::prelude::*;

pub mod config;
pub mod distance;
pub mod error;
pub mod frustum;
pub mod heightmap;
pub mod quadtree;
pub mod render;
pub mod selection;
pub mod systems;

pub mod prelude {
    pub use crate::config::{MAX_LOD_LEVELS, TerrainSettings, TerrainSettingsBuilder};
    pub use crate::distance::LodDistanceTable;
    pub use crate::error::TerrainError;
    pub use crate::frustum::{Containment, FrustumPlanes};
    pub use crate::heightmap::{
        HeightmapSource, MapDimensions, ProceduralHeightmap, RasterHeightmap, TerrainNoise,
    };
    pub use crate::quadtree::{NodeId, TerrainQuadtree};
    pub use crate::render::{DrawCall, GridMesh, PerDrawData, RenderStats, TerrainGlobals};
    pub use crate::selection::{Quadrants, SelectedNode, Selection, SelectionStats, ViewParams};
    pub use crate::systems::{
        TerrainCamera, TerrainDrawList, TerrainRenderData, TerrainSelection, TerrainSource,
    };
    pub use crate::{CdlodTerrainPlugin, Terrain, TerrainBundle};
}

/// Plugin that builds the terrain quadtree and selects nodes every frame
#[derive(Default)]
pub struct CdlodTerrainPlugin {
    pub settings: config::TerrainSettings,
}

impl CdlodTerrainPlugin {
    pub fn new(settings: config::TerrainSettings) -> Self {
        Self { settings }
    }

    pub fn builder() -> CdlodTerrainPluginBuilder {
        CdlodTerrainPluginBuilder::default()
    }
}

impl Plugin for CdlodTerrainPlugin {
    fn build(&self, app: &mut App) {
        // Replaced with one sized from the quadtree's settings once it is built
        app.insert_resource(self.settings.clone())
            .insert_resource(systems::TerrainSelection::new(
                self.settings.selection_capacity,
            ))
            .init_resource::<systems::TerrainDrawList>()
            .add_systems(
                Update,
                (
                    systems::build_terrain_quadtree,
                    systems::select_terrain_nodes,
                    systems::build_terrain_draw_list,
                )
                    .chain(),
            );
    }
}

/// Builder for a [`CdlodTerrainPlugin`]
#[derive(Default)]
pub struct CdlodTerrainPluginBuilder {
    settings: config::TerrainSettingsBuilder,
}

impl CdlodTerrainPluginBuilder {
    pub fn leaf_node_size(mut self, size: u32) -> Self {
        self.settings = self.settings.leaf_node_size(size);
        self
    }

    pub fn render_grid_resolution_mult(mut self, mult: u32) -> Self {
        self.settings = self.settings.render_grid_resolution_mult(mult);
        self
    }

    pub fn lod_level_count(mut self, count: u32) -> Self {
        self.settings = self.settings.lod_level_count(count);
        self
    }

    pub fn view_range(mut self, min: f32, max: f32) -> Self {
        self.settings = self.settings.min_view_range(min).max_view_range(max);
        self
    }

    pub fn lod_level_distance_ratio(mut self, ratio: f32) -> Self {
        self.settings = self.settings.lod_level_distance_ratio(ratio);
        self
    }

    pub fn sort_by_distance(mut self, sort: bool) -> Self {
        self.settings = self.settings.sort_by_distance(sort);
        self
    }

    pub fn build(self) -> CdlodTerrainPlugin {
        CdlodTerrainPlugin::new(self.settings.build())
    }
}

/// Marker component for terrain entities
#[derive(Component, Default)]
pub struct Terrain;

/// Bundle for spawning a terrain entity
#[derive(Bundle)]
pub struct TerrainBundle {
    pub terrain: Terrain,
    pub source: systems::TerrainSource,
    pub transform: Transform,
    pub visibility: Visibility,
}

impl TerrainBundle {
    pub fn new(
        heightmap: impl heightmap::HeightmapSource,
        map_dimensions: heightmap::MapDimensions,
    ) -> Self {
        Self {
            terrain: Terrain,
            source: systems::TerrainSource::new(heightmap, map_dimensions),
            transform: Transform::default(),
            visibility: Visibility::default(),
        }
    }

    /// Terrain over a closure evaluated in raster coordinates
    pub fn procedural<F>(
        width: u32,
        height: u32,
        height_fn: F,
        map_dimensions: heightmap::MapDimensions,
    ) -> Self
    where
        F: Fn(u32, u32) -> f32 + Send + Sync + 'static,
    {
        Self::new(
            heightmap::ProceduralHeightmap::new(width, height, height_fn),
            map_dimensions,
        )
    }

    /// Terrain over layered noise, rasterized once up front
    pub fn noise(
        noise: &heightmap::TerrainNoise,
        width: u32,
        height: u32,
        map_dimensions: heightmap::MapDimensions,
    ) -> Self {
        Self::new(
            noise.rasterize(width, height, map_dimensions.size.z),
            map_dimensions,
        )
    }
}

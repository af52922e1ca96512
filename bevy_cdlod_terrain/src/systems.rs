//! Bevy systems driving the quadtree
//!
//! A `TerrainSource` entity is built into the `TerrainQuadtree` resource once.
//! Every frame the `TerrainCamera` view selects nodes into `TerrainSelection`
//! and the selection is turned into draw calls in `TerrainDrawList`.

use crate::config::TerrainSettings;
use crate::frustum::FrustumPlanes;
use crate::heightmap::{HeightmapSource, MapDimensions};
use crate::quadtree::TerrainQuadtree;
use crate::render::{DrawCall, GridMesh, RenderStats, TerrainGlobals, build_draw_list};
use crate::selection::{Selection, SelectionStats, ViewParams};
use bevy::log::warn_once;
use bevy::prelude::*;

/// Heightfield to build the terrain from
#[derive(Component)]
pub struct TerrainSource {
    pub heightmap: Box<dyn HeightmapSource>,
    pub map_dimensions: MapDimensions,
}

impl TerrainSource {
    pub fn new(heightmap: impl HeightmapSource, map_dimensions: MapDimensions) -> Self {
        Self {
            heightmap: Box::new(heightmap),
            map_dimensions,
        }
    }
}

/// Marker for the camera terrain LOD is selected for
#[derive(Component, Default)]
pub struct TerrainCamera;

/// The current frame's selected nodes
#[derive(Resource)]
pub struct TerrainSelection {
    pub selection: Selection,
    pub stats: SelectionStats,
}

impl TerrainSelection {
    pub fn new(capacity: usize) -> Self {
        Self {
            selection: Selection::new(capacity),
            stats: SelectionStats::default(),
        }
    }
}

/// The current frame's draw calls
#[derive(Resource, Default)]
pub struct TerrainDrawList {
    pub draws: Vec<DrawCall>,
    pub stats: RenderStats,
    /// Only emit draws for this level
    pub filter_level: Option<u8>,
}

/// Shared grid mesh and per-quadtree constants
#[derive(Resource)]
pub struct TerrainRenderData {
    pub grid: GridMesh,
    pub globals: TerrainGlobals,
    /// Mesh asset of `grid`, when the app has mesh assets
    pub mesh: Option<Handle<Mesh>>,
}

/// Build the quadtree from the first `TerrainSource` added
///
/// A failed build is a fatal configuration error.
pub fn build_terrain_quadtree(
    mut commands: Commands,
    settings: Res<TerrainSettings>,
    sources: Query<&TerrainSource, Added<TerrainSource>>,
    quadtree: Option<Res<TerrainQuadtree>>,
    meshes: Option<ResMut<Assets<Mesh>>>,
) {
    let mut sources = sources.iter();
    let Some(source) = sources.next() else {
        return;
    };
    if quadtree.is_some() || sources.next().is_some() {
        warn_once!("Only one terrain source is supported; ignoring additional sources");
    }
    if quadtree.is_some() {
        return;
    }

    let quadtree = match TerrainQuadtree::build(
        &settings,
        source.heightmap.as_ref(),
        source.map_dimensions,
    ) {
        Ok(quadtree) => quadtree,
        Err(err) => {
            error!("Failed to build terrain quadtree: {}", err);
            panic!("terrain quadtree build failed: {err}");
        }
    };

    let grid = GridMesh::new(quadtree.settings().render_grid_dimension());
    let mesh = meshes.map(|mut meshes| meshes.add(grid.to_mesh()));
    commands.insert_resource(TerrainRenderData {
        globals: TerrainGlobals::new(&quadtree),
        grid,
        mesh,
    });
    // The build checked this capacity against the tree
    commands.insert_resource(TerrainSelection::new(
        quadtree.settings().selection_capacity,
    ));
    commands.insert_resource(quadtree);
}

/// Select quadtree nodes for the terrain camera
pub fn select_terrain_nodes(
    quadtree: Option<Res<TerrainQuadtree>>,
    cameras: Query<(&GlobalTransform, &Projection), With<TerrainCamera>>,
    mut selection: ResMut<TerrainSelection>,
) {
    let Some(quadtree) = quadtree else {
        return;
    };
    let TerrainSelection { selection, stats } = &mut *selection;

    let Some((transform, Projection::Perspective(perspective))) = cameras.iter().next() else {
        selection.clear();
        return;
    };

    let eye = transform.translation();
    let far = perspective.far;
    let view_from_world = Mat4::from(transform.affine().inverse());
    let clip_from_view = Mat4::perspective_infinite_reverse_rh(
        perspective.fov,
        perspective.aspect_ratio,
        perspective.near,
    );
    let frustum = FrustumPlanes::from_clip_from_world(
        clip_from_view * view_from_world,
        eye,
        transform.forward().as_vec3(),
        far,
    );

    let view = ViewParams::from_world_space(
        eye,
        far,
        &frustum,
        quadtree.settings().lod_level_distance_ratio,
    );
    quadtree.select_with_stats(&view, selection, Some(stats));

    if selection.visibility_distance_too_small() {
        warn_once!(
            "Terrain view range is too small for {} LOD levels; morphing will be visible",
            quadtree.settings().lod_level_count
        );
    }
}

/// Turn the selection into draw calls
pub fn build_terrain_draw_list(
    render_data: Option<Res<TerrainRenderData>>,
    selection: Res<TerrainSelection>,
    mut draw_list: ResMut<TerrainDrawList>,
) {
    let Some(render_data) = render_data else {
        return;
    };
    let TerrainDrawList {
        draws,
        stats,
        filter_level,
    } = &mut *draw_list;
    build_draw_list(
        &selection.selection,
        &render_data.grid,
        *filter_level,
        draws,
        Some(stats),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CdlodTerrainPlugin;
    use crate::heightmap::RasterHeightmap;

    fn test_settings() -> TerrainSettings {
        TerrainSettings::builder()
            .leaf_node_size(8)
            .render_grid_resolution_mult(2)
            .lod_level_count(4)
            .min_view_range(50.0)
            .max_view_range(400.0)
            .build()
    }

    fn test_app() -> App {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins)
            .add_plugins(CdlodTerrainPlugin::new(test_settings()));
        app.world_mut().spawn(TerrainSource::new(
            RasterHeightmap::from_fn(65, 65, |x, y| ((x + y) % 7) as f32),
            MapDimensions::new(Vec3::ZERO, Vec3::new(128.0, 128.0, 10.0)),
        ));
        app
    }

    fn spawn_camera(app: &mut App, eye: Vec3, target: Vec3) {
        let transform = Transform::from_translation(eye).looking_at(target, Vec3::Y);
        app.world_mut().spawn((
            TerrainCamera,
            transform,
            GlobalTransform::from(transform),
            Projection::Perspective(PerspectiveProjection {
                far: 400.0,
                ..default()
            }),
        ));
    }

    #[test]
    fn test_quadtree_built_from_source() {
        let mut app = test_app();
        app.update();

        let quadtree = app.world().resource::<TerrainQuadtree>();
        assert_eq!(quadtree.raster_width(), 65);
        assert_eq!(quadtree.top_level(), 3);
        let render_data = app.world().resource::<TerrainRenderData>();
        assert_eq!(render_data.grid.dimension(), 16);
        assert!(render_data.mesh.is_none());
    }

    #[test]
    fn test_camera_selection_and_draw_list() {
        let mut app = test_app();
        spawn_camera(&mut app, Vec3::new(64.0, 20.0, 64.0), Vec3::new(64.0, 0.0, 0.0));
        app.update();
        app.update();

        let selection = &app.world().resource::<TerrainSelection>().selection;
        assert!(!selection.is_empty());
        assert_eq!(selection.min_selected_level(), 0);

        let draw_list = app.world().resource::<TerrainDrawList>();
        assert!(!draw_list.draws.is_empty());
        assert_eq!(draw_list.stats.total_quads, selection.len());
    }

    #[test]
    fn test_selection_sized_from_built_settings() {
        let mut app = test_app();
        app.world_mut()
            .resource_mut::<TerrainSettings>()
            .selection_capacity = 1_000;
        app.update();

        let quadtree = app.world().resource::<TerrainQuadtree>();
        assert_eq!(quadtree.settings().selection_capacity, 1_000);
        let selection = &app.world().resource::<TerrainSelection>().selection;
        assert_eq!(selection.capacity(), 1_000);
        assert!(selection.capacity() >= quadtree.required_selection_capacity());
    }

    #[test]
    fn test_no_camera_clears_selection() {
        let mut app = test_app();
        app.update();
        app.update();
        assert!(app.world().resource::<TerrainSelection>().selection.is_empty());
        assert!(app.world().resource::<TerrainDrawList>().draws.is_empty());
    }

    #[test]
    #[should_panic(expected = "terrain quadtree build failed")]
    fn test_empty_source_is_fatal() {
        let mut app = App::new();
        app.add_plugins(MinimalPlugins)
            .add_plugins(CdlodTerrainPlugin::new(test_settings()));
        app.world_mut().spawn(TerrainSource::new(
            RasterHeightmap::flat(0, 0, 0.0),
            MapDimensions::default(),
        ));
        app.update();
    }
}

use bevy::color::palettes::css::WHITE;
use bevy::math::bounding::{Aabb3d, BoundingVolume};
use bevy::prelude::*;
use bevy_cdlod_terrain::frustum::from_terrain_space;
use bevy_cdlod_terrain::prelude::*;
use fastnoise_lite::{FastNoiseLite, FractalType, NoiseType};

/// World size of the map on both horizontal axes
pub const MAP_SIZE: f32 = 8192.0;
/// Height of the tallest peak
const MAP_HEIGHT: f32 = 900.0;
/// Heightfield samples per side
const RASTER_SIZE: u32 = 1025;
pub const MAX_VIEW_RANGE: f32 = 16_000.0;
const LOD_LEVELS: u32 = 8;

pub struct TerrainViewPlugin;

impl Plugin for TerrainViewPlugin {
    fn build(&self, app: &mut App) {
        let settings = TerrainSettings::builder()
            .leaf_node_size(8)
            .render_grid_resolution_mult(4)
            .lod_level_count(LOD_LEVELS)
            .min_view_range(4_000.0)
            .max_view_range(MAX_VIEW_RANGE)
            .lod_level_distance_ratio(2.0)
            .build();

        app.add_plugins(CdlodTerrainPlugin::new(settings))
            .insert_resource(DebugView {
                draw_nodes: true,
                stats_timer: Timer::from_seconds(2.0, TimerMode::Repeating),
            })
            .add_systems(Startup, spawn_terrain)
            .add_systems(
                Update,
                (
                    spawn_grid_preview,
                    debug_keys,
                    draw_selected_nodes,
                    log_render_stats,
                ),
            );
    }
}

#[derive(Resource)]
struct DebugView {
    draw_nodes: bool,
    stats_timer: Timer,
}

fn spawn_terrain(mut commands: Commands) {
    // Broader continents than the default layering
    let mut continental = FastNoiseLite::with_seed(1337);
    continental.set_noise_type(Some(NoiseType::OpenSimplex2));
    continental.set_frequency(Some(0.0025));
    continental.set_fractal_type(Some(FractalType::FBm));
    continental.set_fractal_octaves(Some(6));

    let noise = TerrainNoise::with_seed(1337).with_continental(continental);
    let map_dimensions = MapDimensions::centered(Vec3::new(MAP_SIZE, MAP_SIZE, MAP_HEIGHT), 0.0);

    commands.spawn(TerrainBundle::noise(
        &noise,
        RASTER_SIZE,
        RASTER_SIZE,
        map_dimensions,
    ));
}

/// Lay the shared node grid over the map footprint once it exists
fn spawn_grid_preview(
    mut commands: Commands,
    render_data: Option<Res<TerrainRenderData>>,
    quadtree: Option<Res<TerrainQuadtree>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    let (Some(render_data), Some(quadtree)) = (render_data, quadtree) else {
        return;
    };
    if !render_data.is_added() {
        return;
    }
    let Some(mesh) = render_data.mesh.clone() else {
        return;
    };

    let dims = quadtree.map_dimensions();
    let material = materials.add(StandardMaterial {
        base_color: Color::srgba(0.2, 0.25, 0.3, 0.6),
        alpha_mode: AlphaMode::Blend,
        unlit: true,
        cull_mode: None,
        ..default()
    });

    // Grid XY maps onto world XZ
    commands.spawn((
        Mesh3d(mesh),
        MeshMaterial3d(material),
        Transform {
            translation: Vec3::new(dims.min.x, dims.min.z - 1.0, dims.min.y),
            rotation: Quat::from_rotation_x(std::f32::consts::FRAC_PI_2),
            scale: Vec3::new(dims.size.x, dims.size.y, 1.0),
        },
    ));

    info!(
        "Terrain grid: {}x{} quads per node, {} vertices",
        render_data.grid.dimension(),
        render_data.grid.dimension(),
        render_data.grid.vertex_count()
    );
}

fn debug_keys(
    keyboard: Res<ButtonInput<KeyCode>>,
    quadtree: Option<ResMut<TerrainQuadtree>>,
    mut draw_list: ResMut<TerrainDrawList>,
    mut debug: ResMut<DebugView>,
) {
    let Some(mut quadtree) = quadtree else {
        return;
    };

    if keyboard.just_pressed(KeyCode::KeyT) {
        let sort = !quadtree.settings().sort_by_distance;
        quadtree.set_sort_by_distance(sort);
        info!("Distance sorting {}", if sort { "enabled" } else { "disabled" });
    }

    if keyboard.just_pressed(KeyCode::KeyL) {
        // None -> 0 -> 1 -> ... -> top -> None
        draw_list.filter_level = match draw_list.filter_level {
            None => Some(0),
            Some(lod) if lod < quadtree.top_level() => Some(lod + 1),
            Some(_) => None,
        };
        match draw_list.filter_level {
            Some(lod) => info!("Drawing LOD level {} only", lod),
            None => info!("Drawing all LOD levels"),
        }
    }

    if keyboard.just_pressed(KeyCode::KeyG) {
        debug.draw_nodes = !debug.draw_nodes;
    }
}

fn lod_color(lod: u8) -> Color {
    Color::hsl(lod as f32 * 360.0 / LOD_LEVELS as f32, 0.85, 0.55)
}

fn draw_box(gizmos: &mut Gizmos, aabb: &Aabb3d, color: Color) {
    // Terrain space is Z-up
    let size = Vec3::from(aabb.max - aabb.min);
    gizmos.primitive_3d(
        &Cuboid::new(size.x, size.z, size.y),
        Isometry3d::from_translation(from_terrain_space(Vec3::from(aabb.center()))),
        color,
    );
}

/// Outline every drawn node, split into quarters where only some are drawn
fn draw_selected_nodes(
    mut gizmos: Gizmos,
    debug: Res<DebugView>,
    selection: Res<TerrainSelection>,
    draw_list: Res<TerrainDrawList>,
) {
    if !debug.draw_nodes {
        return;
    }

    for selected in selection.selection.nodes() {
        if draw_list
            .filter_level
            .is_some_and(|lod| lod != selected.lod_level)
        {
            continue;
        }
        let color = lod_color(selected.lod_level);
        if selected.is_full() {
            draw_box(&mut gizmos, &selected.aabb, color);
            continue;
        }

        let min = selected.aabb.min;
        let center = selected.aabb.center();
        let half = (selected.aabb.max - min) * 0.5;
        for (quadrant, visible) in selected.quadrants.to_array().into_iter().enumerate() {
            if !visible {
                continue;
            }
            let offset_x = if quadrant % 2 == 1 { half.x } else { 0.0 };
            let offset_y = if quadrant >= 2 { half.y } else { 0.0 };
            let quarter_min = Vec3::new(min.x + offset_x, min.y + offset_y, min.z);
            let quarter_max = Vec3::new(
                quarter_min.x + half.x,
                quarter_min.y + half.y,
                center.z + half.z,
            );
            draw_box(
                &mut gizmos,
                &Aabb3d::from_min_max(quarter_min, quarter_max),
                color,
            );
        }
    }

    // Outline the whole map at sea level
    let dims = MapDimensions::centered(Vec3::new(MAP_SIZE, MAP_SIZE, 0.0), 0.0);
    draw_box(
        &mut gizmos,
        &Aabb3d::from_min_max(dims.min, dims.max()),
        WHITE.into(),
    );
}

fn log_render_stats(
    time: Res<Time>,
    mut debug: ResMut<DebugView>,
    selection: Res<TerrainSelection>,
    draw_list: Res<TerrainDrawList>,
) {
    if !debug.stats_timer.tick(time.delta()).just_finished() {
        return;
    }

    let stats = &draw_list.stats;
    let levels = selection.selection.selected_levels();
    info!(
        "Terrain: {} quads ({} partial), {} triangles, {} draws, levels {}..={}, per level {:?}",
        stats.total_quads,
        selection.stats.partial,
        stats.total_triangles,
        draw_list.draws.len(),
        levels.start(),
        levels.end(),
        &stats.rendered_quads[..LOD_LEVELS as usize],
    );
    info!(
        "Traversal: {} visited, {} frustum culled, {} range culled",
        selection.stats.nodes_visited, selection.stats.frustum_culled, selection.stats.range_culled,
    );
}

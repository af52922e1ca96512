//! Basic terrain example
//!
//! Builds a quadtree over a procedural heightfield and prints how many nodes
//! each LOD level contributes as the camera glides over it.
//!
//! Run with: `cargo run -p bevy_cdlod_terrain --example basic`

use bevy::prelude::*;
use bevy_cdlod_terrain::prelude::*;

fn main() {
    App::new()
        .add_plugins(DefaultPlugins)
        .add_plugins(
            CdlodTerrainPlugin::builder()
                .lod_level_count(6)
                .view_range(1_000.0, 3_000.0)
                .build(),
        )
        .add_systems(Startup, setup)
        .add_systems(Update, (glide_camera, report_selection))
        .run();
}

fn setup(mut commands: Commands) {
    // Rolling hills, 513 samples per side over a 2km square
    commands.spawn(TerrainBundle::procedural(
        513,
        513,
        |x, y| {
            let (fx, fy) = (x as f32 * 0.02, y as f32 * 0.03);
            (fx.sin() * fy.cos() + 1.0) * 60.0
        },
        MapDimensions::centered(Vec3::new(2048.0, 2048.0, 120.0), 0.0),
    ));

    commands.spawn((
        Camera3d::default(),
        TerrainCamera,
        Projection::Perspective(PerspectiveProjection {
            far: 3_000.0,
            ..default()
        }),
        Transform::from_xyz(0.0, 150.0, 900.0).looking_at(Vec3::new(0.0, 0.0, 0.0), Vec3::Y),
    ));

    commands.spawn((
        DirectionalLight {
            illuminance: 15_000.0,
            ..default()
        },
        Transform::from_rotation(Quat::from_euler(
            EulerRot::XYZ,
            -std::f32::consts::FRAC_PI_3,
            -std::f32::consts::FRAC_PI_4,
            0.0,
        )),
    ));
}

fn glide_camera(time: Res<Time>, mut cameras: Query<&mut Transform, With<TerrainCamera>>) {
    let Ok(mut transform) = cameras.single_mut() else {
        return;
    };
    transform.translation.z -= 50.0 * time.delta_secs();
    if transform.translation.z < -900.0 {
        transform.translation.z = 900.0;
    }
}

fn report_selection(draw_list: Res<TerrainDrawList>, mut frames: Local<u32>) {
    *frames += 1;
    if *frames % 120 != 0 {
        return;
    }
    let stats = &draw_list.stats;
    info!(
        "{} nodes, {} triangles, per level {:?}",
        stats.total_quads,
        stats.total_triangles,
        &stats.rendered_quads[..6]
    );
}

use bevy::prelude::*;

pub struct ViewerPlugin;

impl Plugin for ViewerPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(camera::CameraPlugin)
            .add_plugins(terrain::TerrainViewPlugin)
            .add_systems(Startup, setup_lights);
    }
}

mod camera;
mod terrain;

fn setup_lights(mut commands: Commands) {
    // Sun
    commands.spawn((
        DirectionalLight {
            shadows_enabled: false,
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

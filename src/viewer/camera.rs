use super::terrain::{MAP_SIZE, MAX_VIEW_RANGE};
use bevy::input::mouse::AccumulatedMouseMotion;
use bevy::input::mouse::AccumulatedMouseScroll;
use bevy::prelude::*;
use bevy_cdlod_terrain::prelude::TerrainCamera;

pub struct CameraPlugin;

impl Plugin for CameraPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Startup, setup_camera)
            .add_systems(Update, camera_movement);
    }
}

fn setup_camera(mut commands: Commands) {
    // Start at one corner of the map looking across it
    let start = Vec3::new(-MAP_SIZE * 0.4, 600.0, MAP_SIZE * 0.4);
    commands.spawn((
        Camera3d::default(),
        TerrainCamera,
        Projection::Perspective(PerspectiveProjection {
            far: MAX_VIEW_RANGE,
            ..default()
        }),
        Transform::from_translation(start).looking_at(Vec3::new(0.0, 200.0, 0.0), Vec3::Y),
    ));
}

fn camera_movement(
    time: Res<Time>,
    keyboard: Res<ButtonInput<KeyCode>>,
    mouse_buttons: Res<ButtonInput<MouseButton>>,
    scroll: Res<AccumulatedMouseScroll>,
    mouse_motion: Res<AccumulatedMouseMotion>,
    mut query: Query<&mut Transform, With<TerrainCamera>>,
) {
    let rotation_speed = 0.003;

    for mut transform in &mut query {
        // Faster when high up so the whole map stays reachable
        let speed = 100.0 + transform.translation.y.abs() * 1.5;
        let boost = if keyboard.pressed(KeyCode::ShiftLeft) {
            4.0
        } else {
            1.0
        };

        let forward = transform.forward();
        let right = transform.right();
        let forward_xz = Vec3::new(forward.x, 0.0, forward.z).normalize_or_zero();
        let right_xz = Vec3::new(right.x, 0.0, right.z).normalize_or_zero();

        let mut velocity = Vec3::ZERO;
        if keyboard.pressed(KeyCode::KeyW) {
            velocity += forward_xz;
        }
        if keyboard.pressed(KeyCode::KeyS) {
            velocity -= forward_xz;
        }
        if keyboard.pressed(KeyCode::KeyA) {
            velocity -= right_xz;
        }
        if keyboard.pressed(KeyCode::KeyD) {
            velocity += right_xz;
        }
        if keyboard.pressed(KeyCode::KeyE) {
            velocity += Vec3::Y;
        }
        if keyboard.pressed(KeyCode::KeyQ) {
            velocity -= Vec3::Y;
        }
        transform.translation += velocity * speed * boost * time.delta_secs();

        if scroll.delta.y != 0.0 {
            let dolly = *transform.forward() * scroll.delta.y * speed * 0.1;
            transform.translation += dolly;
        }

        // Right mouse button - free look
        if mouse_buttons.pressed(MouseButton::Right) {
            let delta = mouse_motion.delta;
            let (yaw, pitch, _) = transform.rotation.to_euler(EulerRot::YXZ);
            let yaw = yaw - delta.x * rotation_speed;
            let pitch = (pitch - delta.y * rotation_speed).clamp(-1.5, 1.5);
            transform.rotation = Quat::from_euler(EulerRot::YXZ, yaw, pitch, 0.0);
        }
    }
}

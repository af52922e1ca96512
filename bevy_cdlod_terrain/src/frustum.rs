//! View frustum planes and conversion into terrain space
//!
//! Bevy is Y-up; the quadtree works in a Z-up space where X/Y span the map
//! and Z is elevation. Converting swaps the Y and Z components of points and
//! plane normals, which leaves every point/plane distance unchanged.

use bevy::math::Vec3A;
use bevy::math::bounding::Aabb3d;
use bevy::prelude::*;

/// Result of testing a volume against the frustum
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Containment {
    Outside,
    Intersect,
    Inside,
}

/// Six planes bounding the view volume
///
/// Each plane is `(normal, d)` with the normal pointing into the volume: a
/// point `p` is inside when `normal.dot(p) + d >= 0` for all six planes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrustumPlanes {
    pub planes: [Vec4; 6],
}

impl FrustumPlanes {
    pub fn from_planes(planes: [Vec4; 6]) -> Self {
        Self {
            planes: planes.map(normalize_plane),
        }
    }

    /// A frustum that contains everything
    pub fn unbounded() -> Self {
        Self {
            planes: [Vec4::W; 6],
        }
    }

    /// Extract planes from a clip-from-world matrix
    ///
    /// Bevy projections use reverse-Z with an infinite far plane, so the far
    /// plane is built explicitly at `far` along `forward` from `eye`.
    pub fn from_clip_from_world(clip_from_world: Mat4, eye: Vec3, forward: Vec3, far: f32) -> Self {
        let r0 = clip_from_world.row(0);
        let r1 = clip_from_world.row(1);
        let r2 = clip_from_world.row(2);
        let r3 = clip_from_world.row(3);

        let forward = forward.normalize_or_zero();
        let far_plane = (-forward).extend(forward.dot(eye) + far);

        Self::from_planes([
            r3 + r0,
            r3 - r0,
            r3 + r1,
            r3 - r1,
            r3 - r2,
            far_plane,
        ])
    }

    /// Swap Y and Z of every plane normal
    pub fn to_terrain_space(&self) -> Self {
        Self {
            planes: self.planes.map(|p| Vec4::new(p.x, p.z, p.y, p.w)),
        }
    }

    /// Whether `point` lies on the inner side of all six planes
    pub fn contains_point(&self, point: Vec3) -> bool {
        self.planes
            .iter()
            .all(|plane| plane.truncate().dot(point) + plane.w >= 0.0)
    }

    /// Classify an AABB using the positive/negative vertex of each plane
    pub fn classify_aabb(&self, aabb: &Aabb3d) -> Containment {
        let mut result = Containment::Inside;
        for plane in &self.planes {
            let normal = Vec3A::from(plane.truncate());
            let positive = Vec3A::select(normal.cmpge(Vec3A::ZERO), aabb.max, aabb.min);
            if normal.dot(positive) + plane.w < 0.0 {
                return Containment::Outside;
            }
            let negative = Vec3A::select(normal.cmpge(Vec3A::ZERO), aabb.min, aabb.max);
            if normal.dot(negative) + plane.w < 0.0 {
                result = Containment::Intersect;
            }
        }
        result
    }

    pub fn intersects_aabb(&self, aabb: &Aabb3d) -> bool {
        self.classify_aabb(aabb) != Containment::Outside
    }
}

fn normalize_plane(plane: Vec4) -> Vec4 {
    let length = plane.truncate().length();
    if length > f32::EPSILON {
        plane / length
    } else {
        plane
    }
}

/// Convert a Bevy world-space point into terrain space
pub fn to_terrain_space(point: Vec3) -> Vec3 {
    Vec3::new(point.x, point.z, point.y)
}

/// Convert a terrain-space point back into Bevy world space
pub fn from_terrain_space(point: Vec3) -> Vec3 {
    Vec3::new(point.x, point.z, point.y)
}

#[cfg(test)]
pub(crate) fn perspective_frustum(
    eye: Vec3,
    target: Vec3,
    up: Vec3,
    fov_y: f32,
    far: f32,
) -> FrustumPlanes {
    let view_from_world = Mat4::look_at_rh(eye, target, up);
    let clip_from_view = Mat4::perspective_infinite_reverse_rh(fov_y, 1.0, 0.1);
    FrustumPlanes::from_clip_from_world(
        clip_from_view * view_from_world,
        eye,
        (target - eye).normalize(),
        far,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube(center: Vec3, half: f32) -> Aabb3d {
        Aabb3d::new(center, Vec3::splat(half))
    }

    #[test]
    fn test_classify_against_perspective() {
        let frustum = perspective_frustum(Vec3::ZERO, Vec3::NEG_Z, Vec3::Y, 90f32.to_radians(), 100.0);

        assert_eq!(
            frustum.classify_aabb(&cube(Vec3::new(0.0, 0.0, -10.0), 1.0)),
            Containment::Inside
        );
        // Behind the eye
        assert_eq!(
            frustum.classify_aabb(&cube(Vec3::new(0.0, 0.0, 10.0), 1.0)),
            Containment::Outside
        );
        // Past the far plane
        assert_eq!(
            frustum.classify_aabb(&cube(Vec3::new(0.0, 0.0, -200.0), 1.0)),
            Containment::Outside
        );
        // Straddling the far plane
        assert_eq!(
            frustum.classify_aabb(&cube(Vec3::new(0.0, 0.0, -100.0), 5.0)),
            Containment::Intersect
        );
        // Straddling the right plane at 45 degrees
        assert_eq!(
            frustum.classify_aabb(&cube(Vec3::new(10.0, 0.0, -10.0), 1.0)),
            Containment::Intersect
        );
    }

    #[test]
    fn test_unbounded_contains_everything() {
        let frustum = FrustumPlanes::unbounded();
        assert_eq!(
            frustum.classify_aabb(&cube(Vec3::splat(1e6), 10.0)),
            Containment::Inside
        );
        assert!(frustum.contains_point(Vec3::splat(-1e6)));
    }

    #[test]
    fn test_terrain_space_round_trip_preserves_containment() {
        let frustum = perspective_frustum(
            Vec3::new(0.0, 50.0, 0.0),
            Vec3::new(0.0, 0.0, -50.0),
            Vec3::Y,
            60f32.to_radians(),
            500.0,
        );
        let terrain_frustum = frustum.to_terrain_space();

        for point in [
            Vec3::new(0.0, 0.0, -60.0),
            Vec3::new(0.0, 200.0, 10.0),
            Vec3::new(30.0, 10.0, -40.0),
        ] {
            assert_eq!(
                frustum.contains_point(point),
                terrain_frustum.contains_point(to_terrain_space(point))
            );
        }
        let p = Vec3::new(1.0, 2.0, 3.0);
        assert_eq!(from_terrain_space(to_terrain_space(p)), p);
    }
}

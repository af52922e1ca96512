//! Heightfield sources for quadtree construction
//!
//! Provides the `HeightmapSource` trait and implementations for:
//! - Dense in-memory rasters
//! - Procedural generation via closures over raster coordinates
//! - Multi-layer noise, rasterized once up front

use crate::error::TerrainError;
use bevy::prelude::*;
use fastnoise_lite::{FastNoiseLite, FractalType, NoiseType};

/// A heightfield that can be queried for its raster size and elevation bounds
///
/// Only used while building the quadtree; nothing calls it per frame.
/// Elevations are returned in world units.
pub trait HeightmapSource: Send + Sync + 'static {
    /// Number of samples along X
    fn raster_width(&self) -> u32;

    /// Number of samples along Y
    fn raster_height(&self) -> u32;

    /// Minimum and maximum elevation over the `w` x `h` sample rectangle at (`x`, `y`)
    ///
    /// Samples outside the raster are treated as the nearest in-range sample.
    fn min_max_elevation(&self, x: u32, y: u32, w: u32, h: u32) -> (f32, f32);
}

/// Clamp a sample rectangle to the raster, keeping at least one sample
fn clamp_rect(x: u32, y: u32, w: u32, h: u32, width: u32, height: u32) -> (u32, u32, u32, u32) {
    let x0 = x.min(width - 1);
    let y0 = y.min(height - 1);
    let x1 = x.saturating_add(w.max(1) - 1).min(width - 1);
    let y1 = y.saturating_add(h.max(1) - 1).min(height - 1);
    (x0, y0, x1, y1)
}

/// Dense row-major raster of elevations
#[derive(Clone, Debug)]
pub struct RasterHeightmap {
    /// Elevations in world units, `width * height` entries
    pub heights: Vec<f32>,
    pub width: u32,
    pub height: u32,
}

impl RasterHeightmap {
    pub fn new(heights: Vec<f32>, width: u32, height: u32) -> Result<Self, TerrainError> {
        if width == 0 || height == 0 || heights.len() != (width as usize) * (height as usize) {
            return Err(TerrainError::EmptyRaster { width, height });
        }
        Ok(Self {
            heights,
            width,
            height,
        })
    }

    /// Build a raster by evaluating `height_fn` at every sample
    pub fn from_fn(width: u32, height: u32, height_fn: impl Fn(u32, u32) -> f32) -> Self {
        let mut heights = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                heights.push(height_fn(x, y));
            }
        }
        Self {
            heights,
            width,
            height,
        }
    }

    /// A raster where every sample has the same elevation
    pub fn flat(width: u32, height: u32, elevation: f32) -> Self {
        Self {
            heights: vec![elevation; width as usize * height as usize],
            width,
            height,
        }
    }

    /// Sample with clamp-to-edge addressing; an empty raster reads as 0
    pub fn sample(&self, x: i64, y: i64) -> f32 {
        if self.width == 0 || self.height == 0 || self.heights.is_empty() {
            return 0.0;
        }
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.heights[y * self.width as usize + x]
    }
}

impl HeightmapSource for RasterHeightmap {
    fn raster_width(&self) -> u32 {
        self.width
    }

    fn raster_height(&self) -> u32 {
        self.height
    }

    fn min_max_elevation(&self, x: u32, y: u32, w: u32, h: u32) -> (f32, f32) {
        if self.width == 0 || self.height == 0 || self.heights.is_empty() {
            return (0.0, 0.0);
        }
        let (x0, y0, x1, y1) = clamp_rect(x, y, w, h, self.width, self.height);
        let stride = self.width as usize;

        let mut min = f32::MAX;
        let mut max = f32::MIN;
        for row in y0..=y1 {
            let start = row as usize * stride;
            for &h in &self.heights[start + x0 as usize..=start + x1 as usize] {
                min = min.min(h);
                max = max.max(h);
            }
        }
        (min, max)
    }
}

/// Heightfield evaluated lazily from a closure over raster coordinates
pub struct ProceduralHeightmap<F>
where
    F: Fn(u32, u32) -> f32 + Send + Sync + 'static,
{
    width: u32,
    height: u32,
    height_fn: F,
}

impl<F> ProceduralHeightmap<F>
where
    F: Fn(u32, u32) -> f32 + Send + Sync + 'static,
{
    pub fn new(width: u32, height: u32, height_fn: F) -> Self {
        Self {
            width,
            height,
            height_fn,
        }
    }
}

impl<F> HeightmapSource for ProceduralHeightmap<F>
where
    F: Fn(u32, u32) -> f32 + Send + Sync + 'static,
{
    fn raster_width(&self) -> u32 {
        self.width
    }

    fn raster_height(&self) -> u32 {
        self.height
    }

    fn min_max_elevation(&self, x: u32, y: u32, w: u32, h: u32) -> (f32, f32) {
        if self.width == 0 || self.height == 0 {
            return (0.0, 0.0);
        }
        let (x0, y0, x1, y1) = clamp_rect(x, y, w, h, self.width, self.height);

        let mut min = f32::MAX;
        let mut max = f32::MIN;
        for sy in y0..=y1 {
            for sx in x0..=x1 {
                let h = (self.height_fn)(sx, sy);
                min = min.min(h);
                max = max.max(h);
            }
        }
        (min, max)
    }
}

/// World-space footprint of the heightfield
///
/// Terrain space is Z-up: X/Y span the map, Z is elevation. `size.z` and
/// `min.z` describe the elevation range the heightmap texture is normalized
/// against on the GPU.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MapDimensions {
    pub min: Vec3,
    pub size: Vec3,
}

impl Default for MapDimensions {
    fn default() -> Self {
        Self {
            min: Vec3::new(-512.0, -512.0, 0.0),
            size: Vec3::new(1024.0, 1024.0, 200.0),
        }
    }
}

impl MapDimensions {
    pub fn new(min: Vec3, size: Vec3) -> Self {
        Self { min, size }
    }

    /// A footprint centered on the origin in X/Y
    pub fn centered(size: Vec3, min_elevation: f32) -> Self {
        Self {
            min: Vec3::new(-size.x * 0.5, -size.y * 0.5, min_elevation),
            size,
        }
    }

    pub fn max(&self) -> Vec3 {
        self.min + self.size
    }

    pub(crate) fn validate(&self) -> Result<(), TerrainError> {
        let valid = self.min.is_finite()
            && self.size.is_finite()
            && self.size.x > 0.0
            && self.size.y > 0.0
            && self.size.z >= 0.0;
        if valid {
            Ok(())
        } else {
            Err(TerrainError::InvalidMapDimensions { size: self.size })
        }
    }
}

/// Layered noise used to generate demo heightfields
pub struct TerrainNoise {
    /// Continental noise - large-scale landmass shapes
    pub continental: FastNoiseLite,
    /// Ridge noise - mountain ridges and sharp features
    pub ridges: FastNoiseLite,
    /// Detail noise - small-scale surface variation
    pub detail: FastNoiseLite,
}

impl Default for TerrainNoise {
    fn default() -> Self {
        Self::with_seed(42)
    }
}

impl TerrainNoise {
    /// Create terrain noise with a specific seed
    pub fn with_seed(seed: i32) -> Self {
        let mut continental = FastNoiseLite::with_seed(seed);
        continental.set_noise_type(Some(NoiseType::OpenSimplex2S));
        continental.set_frequency(Some(0.002));
        continental.set_fractal_type(Some(FractalType::FBm));
        continental.set_fractal_octaves(Some(5));

        let mut ridges = FastNoiseLite::with_seed(seed + 414);
        ridges.set_noise_type(Some(NoiseType::OpenSimplex2S));
        ridges.set_frequency(Some(0.006));
        ridges.set_fractal_type(Some(FractalType::Ridged));
        ridges.set_fractal_octaves(Some(4));
        ridges.set_fractal_gain(Some(0.4));

        let mut detail = FastNoiseLite::with_seed(seed + 969);
        detail.set_noise_type(Some(NoiseType::OpenSimplex2S));
        detail.set_frequency(Some(0.05));
        detail.set_fractal_type(Some(FractalType::FBm));
        detail.set_fractal_octaves(Some(2));

        Self {
            continental,
            ridges,
            detail,
        }
    }

    /// Replace the continental layer
    pub fn with_continental(mut self, continental: FastNoiseLite) -> Self {
        self.continental = continental;
        self
    }

    /// Normalized height (0-1) at a sample position
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        let continental = (self.continental.get_noise_2d(x, y) + 1.0) * 0.5;
        let ridge = self.ridges.get_noise_2d(x, y).max(0.0);
        let mountain_mask = (continental - 0.45).max(0.0) * 2.0;
        let detail = self.detail.get_noise_2d(x, y) * 0.01;

        (continental * 0.7 + ridge * mountain_mask * 0.3 + detail).clamp(0.0, 1.0)
    }

    /// Evaluate the noise into a raster, scaling normalized heights by `height_scale`
    pub fn rasterize(&self, width: u32, height: u32, height_scale: f32) -> RasterHeightmap {
        RasterHeightmap::from_fn(width, height, |x, y| {
            self.sample(x as f32, y as f32) * height_scale
        })
    }
}

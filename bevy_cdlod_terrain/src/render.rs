//! Draw-list construction for a selection
//!
//! Every selected node is drawn with the same grid mesh, placed and scaled
//! by small per-draw constants. The grid's triangles are laid out as four
//! contiguous quadrant blocks so a partially selected node can draw only
//! some of its quarters.

use crate::config::MAX_LOD_LEVELS;
use crate::quadtree::TerrainQuadtree;
use crate::selection::Selection;
use bevy::asset::RenderAssetUsages;
use bevy::mesh::Indices;
use bevy::prelude::*;
use bevy::render::render_resource::PrimitiveTopology;
use std::ops::Range;

/// A `dimension` x `dimension` quad grid spanning the unit square
#[derive(Clone, Debug)]
pub struct GridMesh {
    dimension: u32,
    positions: Vec<[f32; 3]>,
    indices: Vec<u32>,
    /// End index of the top-left, top-right, bottom-left and bottom-right blocks
    quadrant_ends: [u32; 4],
}

impl GridMesh {
    pub fn new(dimension: u32) -> Self {
        let dimension = dimension.max(2);
        let vert_dim = dimension + 1;

        let mut positions = Vec::with_capacity((vert_dim * vert_dim) as usize);
        for y in 0..vert_dim {
            for x in 0..vert_dim {
                positions.push([
                    x as f32 / dimension as f32,
                    y as f32 / dimension as f32,
                    0.0,
                ]);
            }
        }

        let half = vert_dim / 2;
        let mut indices = Vec::with_capacity((dimension * dimension * 6) as usize);
        let mut quadrant_ends = [0; 4];
        let blocks = [
            (0..half, 0..half),
            (half..dimension, 0..half),
            (0..half, half..dimension),
            (half..dimension, half..dimension),
        ];
        for (end, (xs, ys)) in quadrant_ends.iter_mut().zip(blocks) {
            for y in ys {
                for x in xs.clone() {
                    let i = x + vert_dim * y;
                    indices.extend_from_slice(&[
                        i,
                        i + 1,
                        i + vert_dim,
                        i + 1,
                        i + 1 + vert_dim,
                        i + vert_dim,
                    ]);
                }
            }
            *end = indices.len() as u32;
        }

        Self {
            dimension,
            positions,
            indices,
            quadrant_ends,
        }
    }

    pub fn dimension(&self) -> u32 {
        self.dimension
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Index range of the whole grid
    pub fn full_range(&self) -> Range<u32> {
        0..self.indices.len() as u32
    }

    /// Index range of one quadrant, in top-left, top-right, bottom-left, bottom-right order
    pub fn quadrant_range(&self, quadrant: usize) -> Range<u32> {
        let start = if quadrant == 0 {
            0
        } else {
            self.quadrant_ends[quadrant - 1]
        };
        start..self.quadrant_ends[quadrant]
    }

    /// Grid constants for the vertex shader: `(dim, dim / 2, 2 / dim, 0)`
    pub fn grid_dim_consts(&self) -> Vec4 {
        let dim = self.dimension as f32;
        Vec4::new(dim, dim * 0.5, 2.0 / dim, 0.0)
    }

    /// Build a Bevy mesh from this grid
    pub fn to_mesh(&self) -> Mesh {
        let mut mesh = Mesh::new(
            PrimitiveTopology::TriangleList,
            RenderAssetUsages::default(),
        );
        let uvs: Vec<[f32; 2]> = self.positions.iter().map(|p| [p[0], p[1]]).collect();
        mesh.insert_attribute(Mesh::ATTRIBUTE_POSITION, self.positions.clone());
        mesh.insert_attribute(Mesh::ATTRIBUTE_UV_0, uvs);
        mesh.insert_indices(Indices::U32(self.indices.clone()));
        mesh
    }
}

/// Constants shared by every draw of one quadtree
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TerrainGlobals {
    /// Map size, `w` unused
    pub terrain_scale: Vec4,
    /// Map minimum corner, `w` unused
    pub terrain_offset: Vec4,
    /// `(width, height, 1 / width, 1 / height)` of the heightmap texture
    pub heightmap_texture_info: Vec4,
    /// Maps world positions onto texel centers: `((w - 1) / w, (h - 1) / h)`
    pub sampler_world_to_texture_scale: Vec2,
    /// Map maximum corner on X/Y, used to clamp vertices at the far edges
    pub world_max: Vec2,
}

impl TerrainGlobals {
    pub fn new(quadtree: &TerrainQuadtree) -> Self {
        let dims = quadtree.map_dimensions();
        let width = quadtree.raster_width() as f32;
        let height = quadtree.raster_height() as f32;
        Self {
            terrain_scale: dims.size.extend(0.0),
            terrain_offset: dims.min.extend(0.0),
            heightmap_texture_info: Vec4::new(width, height, 1.0 / width, 1.0 / height),
            sampler_world_to_texture_scale: Vec2::new((width - 1.0) / width, (height - 1.0) / height),
            world_max: dims.max().truncate(),
        }
    }
}

/// Per-draw vertex shader constants
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PerDrawData {
    /// `(min_x, min_y, mid_z, 0)` of the node
    pub quad_offset: Vec4,
    /// `(size_x, size_y, lod, 0)` of the node
    pub quad_scale: Vec4,
    pub morph_consts: Vec4,
    pub grid_dim: Vec4,
}

/// One indexed draw of the grid mesh
#[derive(Clone, Debug, PartialEq)]
pub struct DrawCall {
    pub data: PerDrawData,
    pub index_range: Range<u32>,
}

impl DrawCall {
    pub fn triangle_count(&self) -> u32 {
        (self.index_range.end - self.index_range.start) / 3
    }
}

/// Counters for one frame's terrain draws
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub rendered_quads: [usize; MAX_LOD_LEVELS],
    pub total_quads: usize,
    pub total_triangles: usize,
}

/// Turn a selection into draw calls, one LOD level at a time
///
/// `out` is cleared and refilled. With `filter_level` set only that level is
/// emitted. Fully selected nodes take one draw; partially selected nodes take
/// one draw per visible quadrant.
pub fn build_draw_list(
    selection: &Selection,
    grid: &GridMesh,
    filter_level: Option<u8>,
    out: &mut Vec<DrawCall>,
    mut stats: Option<&mut RenderStats>,
) {
    out.clear();
    if let Some(stats) = stats.as_deref_mut() {
        *stats = RenderStats::default();
    }
    let Some(table) = selection.distance_table() else {
        return;
    };
    let grid_dim = grid.grid_dim_consts();

    for lod in selection.selected_levels() {
        if filter_level.is_some_and(|filter| filter != lod) {
            continue;
        }
        let morph_consts = table.morph_consts(lod as usize);

        for selected in selection.nodes().iter().filter(|n| n.lod_level == lod) {
            let min = selected.aabb.min;
            let max = selected.aabb.max;
            let data = PerDrawData {
                quad_offset: Vec4::new(min.x, min.y, (min.z + max.z) * 0.5, 0.0),
                quad_scale: Vec4::new(max.x - min.x, max.y - min.y, lod as f32, 0.0),
                morph_consts,
                grid_dim,
            };

            let first = out.len();
            if selected.is_full() {
                out.push(DrawCall {
                    data,
                    index_range: grid.full_range(),
                });
            } else {
                for (quadrant, visible) in selected.quadrants.to_array().into_iter().enumerate() {
                    if visible {
                        out.push(DrawCall {
                            data,
                            index_range: grid.quadrant_range(quadrant),
                        });
                    }
                }
            }

            if let Some(stats) = stats.as_deref_mut() {
                stats.rendered_quads[lod as usize] += 1;
                stats.total_quads += 1;
                stats.total_triangles += out[first..]
                    .iter()
                    .map(|draw| draw.triangle_count() as usize)
                    .sum::<usize>();
            }
        }
    }
}

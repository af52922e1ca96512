//! Static CDLOD quadtree over a heightfield
//!
//! The tree is stored as one dense grid of min/max elevations per LOD level
//! rather than as linked nodes. A node is addressed by its level and grid
//! coordinates, and its four children live at `(2x + i, 2y + j)` one level
//! down. Level 0 holds the leaves.
//!
//! Rasters that are not an exact multiple of the top node size are padded:
//! the root grid is rounded up so every node is square and every internal
//! node has four children. Samples past the raster edge repeat the nearest
//! edge sample, so padded nodes get the elevation bounds of the edge they
//! extend.

use crate::config::{MAX_RASTER_SIZE, MIN_LOD_DISTANCE_RATIO, TerrainSettings};
use crate::distance::LodDistanceTable;
use crate::error::TerrainError;
use crate::heightmap::{HeightmapSource, MapDimensions};
use bevy::math::Vec3A;
use bevy::math::bounding::Aabb3d;
use bevy::prelude::*;
use smallvec::SmallVec;
use std::f32::consts::PI;

/// Address of a node: its LOD level and position in that level's grid
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId {
    pub lod: u8,
    pub x: u32,
    pub y: u32,
}

impl NodeId {
    pub fn new(lod: u8, x: u32, y: u32) -> Self {
        Self { lod, x, y }
    }

    /// Children in top-left, top-right, bottom-left, bottom-right order
    ///
    /// Leaves have no children; callers check `lod > 0` first.
    pub fn children(&self) -> [NodeId; 4] {
        let lod = self.lod.saturating_sub(1);
        let (x, y) = (self.x * 2, self.y * 2);
        [
            NodeId::new(lod, x, y),
            NodeId::new(lod, x + 1, y),
            NodeId::new(lod, x, y + 1),
            NodeId::new(lod, x + 1, y + 1),
        ]
    }

    pub fn is_leaf(&self) -> bool {
        self.lod == 0
    }
}

/// Min/max elevations for every node of one LOD level
#[derive(Clone, Debug)]
struct LevelGrid {
    count_x: u32,
    count_y: u32,
    min_max: Vec<[f32; 2]>,
}

impl LevelGrid {
    fn get(&self, x: u32, y: u32) -> [f32; 2] {
        self.min_max[(y * self.count_x + x) as usize]
    }
}

/// The terrain quadtree resource, built once from settings and a heightfield
#[derive(Resource, Clone, Debug)]
pub struct TerrainQuadtree {
    settings: TerrainSettings,
    map_dims: MapDimensions,
    raster_width: u32,
    raster_height: u32,
    top_level: u8,
    /// Indexed by LOD level, leaves first
    levels: Vec<LevelGrid>,
    /// Distance bands for the maximum view range and configured ratio
    distance_table: LodDistanceTable,
}

impl TerrainQuadtree {
    /// Validate `settings` and build the tree over `source`
    pub fn build(
        settings: &TerrainSettings,
        source: &dyn HeightmapSource,
        map_dims: MapDimensions,
    ) -> Result<Self, TerrainError> {
        settings.validate()?;
        map_dims.validate()?;

        let raster_width = source.raster_width();
        let raster_height = source.raster_height();
        if raster_width == 0 || raster_height == 0 {
            return Err(TerrainError::EmptyRaster {
                width: raster_width,
                height: raster_height,
            });
        }
        if raster_width > MAX_RASTER_SIZE || raster_height > MAX_RASTER_SIZE {
            return Err(TerrainError::RasterTooLarge {
                width: raster_width,
                height: raster_height,
                max: MAX_RASTER_SIZE,
            });
        }

        let leaf = settings.leaf_node_size;
        // Neighbouring nodes share their edge samples, so a raster of W samples spans W - 1 cells
        let cells_x = (raster_width - 1).max(1);
        let cells_y = (raster_height - 1).max(1);
        let leaves_per_side = cells_x.max(cells_y).div_ceil(leaf);
        let top_level = ceil_log2(leaves_per_side).min(settings.lod_level_count - 1) as u8;

        let top_size = leaf << top_level;
        let roots_x = cells_x.div_ceil(top_size);
        let roots_y = cells_y.div_ceil(top_size);

        let mut levels = Vec::with_capacity(top_level as usize + 1);

        let leaf_x = roots_x << top_level;
        let leaf_y = roots_y << top_level;
        let mut leaves = Vec::with_capacity((leaf_x * leaf_y) as usize);
        for y in 0..leaf_y {
            for x in 0..leaf_x {
                let (min, max) = source.min_max_elevation(x * leaf, y * leaf, leaf + 1, leaf + 1);
                leaves.push([min, max]);
            }
        }
        levels.push(LevelGrid {
            count_x: leaf_x,
            count_y: leaf_y,
            min_max: leaves,
        });

        for lod in 1..=top_level {
            let children = &levels[lod as usize - 1];
            let count_x = children.count_x / 2;
            let count_y = children.count_y / 2;
            let mut min_max = Vec::with_capacity((count_x * count_y) as usize);
            for y in 0..count_y {
                for x in 0..count_x {
                    let mut bounds = [f32::MAX, f32::MIN];
                    for child in NodeId::new(lod, x, y).children() {
                        let [min, max] = children.get(child.x, child.y);
                        bounds[0] = bounds[0].min(min);
                        bounds[1] = bounds[1].max(max);
                    }
                    min_max.push(bounds);
                }
            }
            levels.push(LevelGrid {
                count_x,
                count_y,
                min_max,
            });
        }

        let distance_table = LodDistanceTable::new(
            settings.max_view_range,
            settings.lod_level_count,
            settings.lod_level_distance_ratio,
            settings.morph_start_ratio,
        );

        let quadtree = Self {
            settings: settings.clone(),
            map_dims,
            raster_width,
            raster_height,
            top_level,
            levels,
            distance_table,
        };

        let required = quadtree.required_selection_capacity();
        if required > settings.selection_capacity {
            return Err(TerrainError::SelectionCapacityTooSmall {
                capacity: settings.selection_capacity,
                required,
            });
        }

        info!(
            "CDLOD quadtree built: raster {}x{}, {} levels (top {}), {}x{} roots, {} nodes, ~{:.2} KiB",
            raster_width,
            raster_height,
            quadtree.level_count(),
            top_level,
            roots_x,
            roots_y,
            quadtree.node_count(),
            (quadtree.node_count() * std::mem::size_of::<[f32; 2]>()) as f32 / 1024.0,
        );

        Ok(quadtree)
    }

    pub fn settings(&self) -> &TerrainSettings {
        &self.settings
    }

    /// Toggle closest-first ordering of future selections
    pub fn set_sort_by_distance(&mut self, sort: bool) {
        self.settings.sort_by_distance = sort;
    }

    pub fn map_dimensions(&self) -> MapDimensions {
        self.map_dims
    }

    pub fn raster_width(&self) -> u32 {
        self.raster_width
    }

    pub fn raster_height(&self) -> u32 {
        self.raster_height
    }

    /// LOD level of the root nodes
    pub fn top_level(&self) -> u8 {
        self.top_level
    }

    /// Number of levels actually built, at most `lod_level_count`
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn node_count(&self) -> usize {
        self.levels.iter().map(|level| level.min_max.len()).sum()
    }

    /// Number of nodes in each direction at `lod`
    pub fn level_dimensions(&self, lod: u8) -> UVec2 {
        let level = &self.levels[lod as usize];
        UVec2::new(level.count_x, level.count_y)
    }

    /// Distance bands for the maximum view range
    pub fn distance_table(&self) -> &LodDistanceTable {
        &self.distance_table
    }

    /// Root nodes in row-major order
    pub fn roots(&self) -> impl Iterator<Item = NodeId> + '_ {
        let top = &self.levels[self.top_level as usize];
        let lod = self.top_level;
        (0..top.count_y).flat_map(move |y| (0..top.count_x).map(move |x| NodeId::new(lod, x, y)))
    }

    /// World size of a leaf node on X/Y
    pub fn leaf_world_size(&self) -> Vec2 {
        let leaf = self.settings.leaf_node_size as f32;
        Vec2::new(
            leaf * self.map_dims.size.x / self.raster_width as f32,
            leaf * self.map_dims.size.y / self.raster_height as f32,
        )
    }

    /// World size of a node at `lod` on X/Y
    pub fn node_world_size(&self, lod: u8) -> Vec2 {
        self.leaf_world_size() * (1u32 << lod) as f32
    }

    /// Elevation bounds of a node
    pub fn node_min_max(&self, node: NodeId) -> (f32, f32) {
        let [min, max] = self.levels[node.lod as usize].get(node.x, node.y);
        (min, max)
    }

    /// Bounding box of a node in terrain space (X/Y horizontal, Z up)
    pub fn node_aabb(&self, node: NodeId) -> Aabb3d {
        let size = self.node_world_size(node.lod);
        let origin = self.map_dims.min.truncate();
        let min_xy = origin + Vec2::new(node.x as f32, node.y as f32) * size;
        let max_xy = min_xy + size;
        let (min_z, max_z) = self.node_min_max(node);
        Aabb3d {
            min: Vec3A::new(min_xy.x, min_xy.y, min_z),
            max: Vec3A::new(max_xy.x, max_xy.y, max_z),
        }
    }

    /// Raster-space rectangle of a node as (x, y, size)
    fn node_raster_rect(&self, node: NodeId) -> (u32, u32, u32) {
        let size = self.settings.leaf_node_size << node.lod;
        (node.x * size, node.y * size, size)
    }

    /// Elevation bounds over a world-space rectangle
    ///
    /// Uses the coarsest nodes that lie fully inside the rectangle, so the
    /// result may be slightly conservative at its edges. Returns `None` when
    /// the rectangle misses the map.
    pub fn area_min_max_height(&self, from: Vec2, size: Vec2) -> Option<(f32, f32)> {
        let map_min = self.map_dims.min.truncate();
        let map_size = self.map_dims.size.truncate();
        let to = from + size;
        if size.x < 0.0
            || size.y < 0.0
            || to.x < map_min.x
            || to.y < map_min.y
            || from.x > map_min.x + map_size.x
            || from.y > map_min.y + map_size.y
        {
            return None;
        }

        let raster = Vec2::new(self.raster_width as f32, self.raster_height as f32);
        let to_raster = |p: Vec2| -> UVec2 {
            let r = ((p - map_min) / map_size * raster).floor();
            UVec2::new(
                r.x.clamp(0.0, raster.x - 1.0) as u32,
                r.y.clamp(0.0, raster.y - 1.0) as u32,
            )
        };
        let from = to_raster(from);
        let to = to_raster(to);

        let mut bounds: Option<(f32, f32)> = None;
        let mut stack: SmallVec<[NodeId; 64]> = self.roots().collect();
        while let Some(node) = stack.pop() {
            let (x, y, node_size) = self.node_raster_rect(node);
            if to.x < x || to.y < y || from.x > x + node_size || from.y > y + node_size {
                continue;
            }
            let inside = from.x <= x && from.y <= y && to.x >= x + node_size && to.y >= y + node_size;
            if node.is_leaf() || inside {
                let (min, max) = self.node_min_max(node);
                bounds = Some(match bounds {
                    Some((lo, hi)) => (lo.min(min), hi.max(max)),
                    None => (min, max),
                });
            } else {
                stack.extend(node.children());
            }
        }
        bounds
    }

    /// Upper bound on the number of nodes a single selection can contain
    ///
    /// A node of level `l` is only selected when its box intersects the sphere
    /// of radius `range[l]` around the eye. Nodes of one level tile the plane,
    /// so at most `pi * (range + diagonal)^2 / area` of them can do so.
    pub fn worst_case_selection_count(&self, table: &LodDistanceTable) -> usize {
        let mut total = 0;
        for lod in 0..=self.top_level {
            let size = self.node_world_size(lod);
            let range = self.range_limit(table, lod);
            let reach = range + size.length();
            let by_area = (PI * reach * reach / (size.x * size.y)).ceil();
            let dims = self.level_dimensions(lod);
            let level_nodes = (dims.x as usize) * (dims.y as usize);
            total += if by_area >= level_nodes as f32 {
                level_nodes
            } else {
                by_area as usize
            };
        }
        total
    }

    /// Capacity a selection needs for any accepted per-frame view
    ///
    /// Per-frame far distances are clamped to `max_view_range` and ratios to
    /// `MIN_LOD_DISTANCE_RATIO..`. For a fixed view range a smaller ratio
    /// pushes every band outwards, so the bound is taken over the table at
    /// the maximum range and the minimum ratio.
    pub fn required_selection_capacity(&self) -> usize {
        let widest = LodDistanceTable::new(
            self.settings.max_view_range,
            self.settings.lod_level_count,
            MIN_LOD_DISTANCE_RATIO,
            self.settings.morph_start_ratio,
        );
        self.worst_case_selection_count(&widest)
            .max(self.worst_case_selection_count(&self.distance_table))
    }

    /// Distance within which nodes of `lod` may be selected
    ///
    /// Roots extend to the full view range even when the tree has fewer
    /// levels than configured.
    pub(crate) fn range_limit(&self, table: &LodDistanceTable, lod: u8) -> f32 {
        if lod >= self.top_level {
            table.view_range()
        } else {
            table.visibility_range(lod as usize)
        }
    }
}

fn ceil_log2(n: u32) -> u32 {
    if n <= 1 { 0 } else { 32 - (n - 1).leading_zeros() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heightmap::RasterHeightmap;

    fn settings(leaf: u32, levels: u32) -> TerrainSettings {
        TerrainSettings::builder()
            .leaf_node_size(leaf)
            .render_grid_resolution_mult(1)
            .lod_level_count(levels)
            .min_view_range(10.0)
            .max_view_range(100.0)
            .build()
    }

    fn unit_dims(width: u32, height: u32) -> MapDimensions {
        MapDimensions::new(Vec3::ZERO, Vec3::new(width as f32, height as f32, 10.0))
    }

    #[test]
    fn test_ceil_log2() {
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(3), 2);
        assert_eq!(ceil_log2(8), 3);
        assert_eq!(ceil_log2(9), 4);
    }

    #[test]
    fn test_exact_power_of_two_raster() {
        let raster = RasterHeightmap::flat(64, 64, 0.0);
        let tree = TerrainQuadtree::build(&settings(8, 4), &raster, unit_dims(64, 64)).unwrap();

        assert_eq!(tree.top_level(), 3);
        assert_eq!(tree.level_count(), 4);
        assert_eq!(tree.roots().count(), 1);
        assert_eq!(tree.node_count(), 1 + 4 + 16 + 64);
        assert_eq!(tree.level_dimensions(0), UVec2::new(8, 8));

        let root = tree.node_aabb(NodeId::new(3, 0, 0));
        assert_eq!(root.min, Vec3A::new(0.0, 0.0, 0.0));
        assert_eq!(root.max, Vec3A::new(64.0, 64.0, 0.0));
    }

    #[test]
    fn test_levels_clamped_to_lod_level_count() {
        let raster = RasterHeightmap::flat(256, 128, 0.0);
        let tree = TerrainQuadtree::build(&settings(8, 3), &raster, unit_dims(256, 128)).unwrap();

        // 32 leaves per side would need 5 levels above the leaves; only 2 are allowed
        assert_eq!(tree.top_level(), 2);
        assert_eq!(tree.level_dimensions(2), UVec2::new(8, 4));
        assert_eq!(tree.roots().count(), 32);
    }

    #[test]
    fn test_ragged_raster_is_padded() {
        // 50 x 20 samples: 49 x 19 cells, rounded up to one 64-sample root
        let raster = RasterHeightmap::from_fn(50, 20, |x, y| (x + y) as f32);
        let tree = TerrainQuadtree::build(&settings(8, 4), &raster, unit_dims(50, 20)).unwrap();

        assert_eq!(tree.top_level(), 3);
        assert_eq!(tree.roots().count(), 1);
        assert_eq!(tree.level_dimensions(0), UVec2::new(8, 8));

        // Every internal node has four children
        for lod in 1..=tree.top_level() {
            let dims = tree.level_dimensions(lod);
            assert_eq!(tree.level_dimensions(lod - 1), dims * 2);
        }

        // A leaf entirely past the raster edge repeats the corner sample
        assert_eq!(tree.node_min_max(NodeId::new(0, 7, 7)), (68.0, 68.0));
        // A leaf straddling the right edge sees samples 48..=49 on X
        assert_eq!(tree.node_min_max(NodeId::new(0, 6, 0)), (48.0, 57.0));
    }

    #[test]
    fn test_internal_nodes_bound_children() {
        let raster = RasterHeightmap::from_fn(65, 65, |x, y| ((x * 7 + y * 13) % 23) as f32);
        let tree = TerrainQuadtree::build(&settings(8, 4), &raster, unit_dims(65, 65)).unwrap();

        for lod in 1..=tree.top_level() {
            let dims = tree.level_dimensions(lod);
            for y in 0..dims.y {
                for x in 0..dims.x {
                    let node = NodeId::new(lod, x, y);
                    let (min, max) = tree.node_min_max(node);
                    let child_min = node
                        .children()
                        .iter()
                        .map(|c| tree.node_min_max(*c).0)
                        .fold(f32::MAX, f32::min);
                    let child_max = node
                        .children()
                        .iter()
                        .map(|c| tree.node_min_max(*c).1)
                        .fold(f32::MIN, f32::max);
                    assert_eq!((min, max), (child_min, child_max));
                }
            }
        }
    }

    #[test]
    fn test_leaf_bounds_include_shared_edge() {
        // A spike on the first column of the second leaf is shared with the first leaf
        let raster = RasterHeightmap::from_fn(17, 17, |x, _| if x == 8 { 5.0 } else { 0.0 });
        let tree = TerrainQuadtree::build(&settings(8, 2), &raster, unit_dims(17, 17)).unwrap();

        assert_eq!(tree.node_min_max(NodeId::new(0, 0, 0)), (0.0, 5.0));
        assert_eq!(tree.node_min_max(NodeId::new(0, 1, 0)), (0.0, 5.0));
    }

    #[test]
    fn test_world_mapping() {
        let raster = RasterHeightmap::flat(64, 64, 0.0);
        let dims = MapDimensions::new(Vec3::new(-100.0, -50.0, 0.0), Vec3::new(640.0, 320.0, 1.0));
        let tree = TerrainQuadtree::build(&settings(8, 4), &raster, dims).unwrap();

        assert_eq!(tree.leaf_world_size(), Vec2::new(80.0, 40.0));
        let leaf = tree.node_aabb(NodeId::new(0, 1, 2));
        assert_eq!(leaf.min.x, -20.0);
        assert_eq!(leaf.min.y, 30.0);
        assert_eq!(leaf.max.x, 60.0);
        assert_eq!(leaf.max.y, 70.0);
    }

    #[test]
    fn test_area_min_max_height() {
        let raster = RasterHeightmap::from_fn(64, 64, |x, y| if x < 32 && y < 32 { 1.0 } else { 9.0 });
        let tree = TerrainQuadtree::build(&settings(8, 4), &raster, unit_dims(64, 64)).unwrap();

        let (min, max) = tree
            .area_min_max_height(Vec2::new(0.0, 0.0), Vec2::new(16.0, 16.0))
            .unwrap();
        assert_eq!((min, max), (1.0, 1.0));

        let (min, max) = tree
            .area_min_max_height(Vec2::new(0.0, 0.0), Vec2::new(64.0, 64.0))
            .unwrap();
        assert_eq!((min, max), (1.0, 9.0));

        assert!(
            tree.area_min_max_height(Vec2::new(500.0, 500.0), Vec2::splat(10.0))
                .is_none()
        );
    }

    #[test]
    fn test_invalid_settings_rejected_at_build() {
        let raster = RasterHeightmap::flat(64, 64, 0.0);
        let err = TerrainQuadtree::build(&settings(3, 4), &raster, unit_dims(64, 64)).unwrap_err();
        assert!(matches!(
            err,
            TerrainError::InvalidSetting {
                field: "leaf_node_size",
                ..
            }
        ));

        let empty = RasterHeightmap::flat(0, 0, 0.0);
        let err = TerrainQuadtree::build(&settings(8, 4), &empty, unit_dims(1, 1)).unwrap_err();
        assert!(matches!(err, TerrainError::EmptyRaster { .. }));
    }

    #[test]
    fn test_capacity_checked_at_build() {
        let raster = RasterHeightmap::flat(64, 64, 0.0);
        let mut small = settings(8, 4);
        small.selection_capacity = 4;
        let err = TerrainQuadtree::build(&small, &raster, unit_dims(64, 64)).unwrap_err();
        match err {
            TerrainError::SelectionCapacityTooSmall { capacity, required } => {
                assert_eq!(capacity, 4);
                assert!(required > 4 && required <= 85);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}

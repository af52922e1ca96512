//! Per-frame LOD selection
//!
//! Walks the quadtree from its roots and picks, for every part of the map in
//! view, the coarsest node whose level still covers the distance to the eye.
//! Nodes are emitted children-first. A node that is only partly replaced by
//! its children is emitted once with quadrant flags marking the parts it still
//! has to draw.
//!
//! The walk uses a fixed-size explicit stack (the tree is at most
//! `MAX_LOD_LEVELS` deep) and writes into a [`Selection`] whose storage is
//! allocated once and reused, so selecting allocates nothing per frame.

use crate::config::{MAX_LOD_DISTANCE_RATIO, MAX_LOD_LEVELS, MIN_LOD_DISTANCE_RATIO};
use crate::distance::LodDistanceTable;
use crate::frustum::{Containment, FrustumPlanes, to_terrain_space};
use crate::quadtree::{NodeId, TerrainQuadtree};
use bevy::math::Vec3A;
use bevy::math::bounding::{Aabb3d, BoundingVolume};
use bevy::prelude::*;
use smallvec::SmallVec;
use std::ops::RangeInclusive;

/// Which quarters of a selected node should be drawn
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Quadrants {
    pub top_left: bool,
    pub top_right: bool,
    pub bottom_left: bool,
    pub bottom_right: bool,
}

impl Quadrants {
    pub const ALL: Self = Self {
        top_left: true,
        top_right: true,
        bottom_left: true,
        bottom_right: true,
    };

    pub const NONE: Self = Self {
        top_left: false,
        top_right: false,
        bottom_left: false,
        bottom_right: false,
    };

    pub fn from_array(flags: [bool; 4]) -> Self {
        Self {
            top_left: flags[0],
            top_right: flags[1],
            bottom_left: flags[2],
            bottom_right: flags[3],
        }
    }

    /// Flags in top-left, top-right, bottom-left, bottom-right order
    pub fn to_array(self) -> [bool; 4] {
        [
            self.top_left,
            self.top_right,
            self.bottom_left,
            self.bottom_right,
        ]
    }

    pub fn is_full(self) -> bool {
        self == Self::ALL
    }

    pub fn count(self) -> usize {
        self.to_array().iter().filter(|&&flag| flag).count()
    }
}

/// A node chosen for rendering this frame
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SelectedNode {
    pub node: NodeId,
    /// Bounding box in terrain space
    pub aabb: Aabb3d,
    pub lod_level: u8,
    pub quadrants: Quadrants,
    /// Distance from the eye to the closest point of `aabb`
    pub min_distance: f32,
}

impl SelectedNode {
    /// Whether the whole node is drawn rather than a subset of its quadrants
    pub fn is_full(&self) -> bool {
        self.quadrants.is_full()
    }
}

/// Camera state the selection is computed for, in terrain space
#[derive(Clone, Copy, Debug)]
pub struct ViewParams {
    pub eye: Vec3,
    pub far_distance: f32,
    pub frustum: FrustumPlanes,
    pub lod_distance_ratio: f32,
}

impl ViewParams {
    pub fn new(eye: Vec3, far_distance: f32, frustum: FrustumPlanes, lod_distance_ratio: f32) -> Self {
        Self {
            eye,
            far_distance,
            frustum,
            lod_distance_ratio,
        }
    }

    /// Build view parameters from Bevy's Y-up world space
    pub fn from_world_space(
        eye: Vec3,
        far_distance: f32,
        frustum: &FrustumPlanes,
        lod_distance_ratio: f32,
    ) -> Self {
        Self::new(
            to_terrain_space(eye),
            far_distance,
            frustum.to_terrain_space(),
            lod_distance_ratio,
        )
    }
}

/// Counters gathered during one selection pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SelectionStats {
    pub nodes_visited: usize,
    pub frustum_culled: usize,
    pub range_culled: usize,
    pub descended: usize,
    pub selected: usize,
    pub partial: usize,
}

/// Fixed-capacity output of one selection pass
#[derive(Clone, Debug)]
pub struct Selection {
    nodes: Vec<SelectedNode>,
    capacity: usize,
    min_selected_level: u8,
    max_selected_level: u8,
    visibility_distance_too_small: bool,
    distance_table: Option<LodDistanceTable>,
}

impl Selection {
    /// Allocate storage for up to `capacity` nodes
    pub fn new(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            capacity,
            min_selected_level: MAX_LOD_LEVELS as u8,
            max_selected_level: 0,
            visibility_distance_too_small: false,
            distance_table: None,
        }
    }

    /// Forget the previous frame's nodes, keeping the storage
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.min_selected_level = MAX_LOD_LEVELS as u8;
        self.max_selected_level = 0;
        self.visibility_distance_too_small = false;
        self.distance_table = None;
    }

    pub fn nodes(&self) -> &[SelectedNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Finest selected level, `MAX_LOD_LEVELS` when nothing is selected
    pub fn min_selected_level(&self) -> u8 {
        self.min_selected_level
    }

    /// Coarsest selected level, 0 when nothing is selected
    pub fn max_selected_level(&self) -> u8 {
        self.max_selected_level
    }

    /// Levels a renderer has to iterate; empty when nothing is selected
    pub fn selected_levels(&self) -> RangeInclusive<u8> {
        self.min_selected_level..=self.max_selected_level
    }

    /// Set when a selected node reaches into the next level's morph region
    ///
    /// The selection is still usable; morphing will pop near those nodes.
    /// Usually means the view range is too short for the LOD level count.
    pub fn visibility_distance_too_small(&self) -> bool {
        self.visibility_distance_too_small
    }

    /// Distance bands this selection was computed with
    pub fn distance_table(&self) -> Option<&LodDistanceTable> {
        self.distance_table.as_ref()
    }

    /// Morph constants for `lod`, once a selection pass has run
    pub fn morph_consts(&self, lod: u8) -> Option<Vec4> {
        self.distance_table
            .as_ref()
            .map(|table| table.morph_consts(lod as usize))
    }

    /// Order nodes closest first
    ///
    /// Ties are broken by level and grid position so the order only depends
    /// on the selected set.
    pub fn sort_by_distance(&mut self) {
        self.nodes.sort_unstable_by(|a, b| {
            a.min_distance
                .total_cmp(&b.min_distance)
                .then_with(|| a.node.cmp(&b.node))
        });
    }

    fn push(&mut self, node: SelectedNode) {
        assert!(
            self.nodes.len() < self.capacity,
            "terrain selection overflow: more than {} nodes selected; raise `selection_capacity` or reduce the LOD density",
            self.capacity
        );
        self.min_selected_level = self.min_selected_level.min(node.lod_level);
        self.max_selected_level = self.max_selected_level.max(node.lod_level);
        self.nodes.push(node);
    }
}

/// Outcome of visiting one node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Visit {
    /// Not visited: its parent did not descend
    Undefined,
    OutOfFrustum,
    /// In view, but beyond its level's range; the parent has to cover it
    OutOfRange,
    /// The node or some of its descendants were selected
    Selected,
}

/// What `enter` decided for a node
enum Step {
    Done(Visit),
    Descend(Frame),
}

/// A node whose children are being visited
struct Frame {
    node: NodeId,
    aabb: Aabb3d,
    containment: Containment,
    next_child: usize,
    results: [Visit; 4],
}

/// Read-only state shared by every step of one selection pass
struct SelectContext<'a> {
    tree: &'a TerrainQuadtree,
    table: &'a LodDistanceTable,
    eye: Vec3A,
    frustum: &'a FrustumPlanes,
}

impl SelectContext<'_> {
    fn in_range(&self, aabb: &Aabb3d, range: f32) -> bool {
        min_distance_sq(aabb, self.eye) <= range * range
    }

    /// Cull and range-test `node`, selecting it unless its children need visiting
    fn enter(
        &self,
        node: NodeId,
        parent_inside: bool,
        selection: &mut Selection,
        stats: &mut Option<&mut SelectionStats>,
    ) -> Step {
        if let Some(stats) = stats.as_deref_mut() {
            stats.nodes_visited += 1;
        }

        let aabb = self.tree.node_aabb(node);
        let containment = if parent_inside {
            Containment::Inside
        } else {
            self.frustum.classify_aabb(&aabb)
        };
        if containment == Containment::Outside {
            if let Some(stats) = stats.as_deref_mut() {
                stats.frustum_culled += 1;
            }
            return Step::Done(Visit::OutOfFrustum);
        }

        if !self.in_range(&aabb, self.tree.range_limit(self.table, node.lod)) {
            if let Some(stats) = stats.as_deref_mut() {
                stats.range_culled += 1;
            }
            return Step::Done(Visit::OutOfRange);
        }

        let frame = Frame {
            node,
            aabb,
            containment,
            next_child: 0,
            results: [Visit::Undefined; 4],
        };

        if node.lod > 0
            && self.in_range(&aabb, self.table.visibility_range(node.lod as usize - 1))
        {
            if let Some(stats) = stats.as_deref_mut() {
                stats.descended += 1;
            }
            return Step::Descend(frame);
        }

        Step::Done(self.finish(&frame, selection, stats))
    }

    /// Decide what to emit for a node once its children (if any) are done
    fn finish(
        &self,
        frame: &Frame,
        selection: &mut Selection,
        stats: &mut Option<&mut SelectionStats>,
    ) -> Visit {
        let node = frame.node;

        // Children that are culled or drew themselves leave a hole we must not fill;
        // children that were out of range are covered by this node
        let mut flags = frame
            .results
            .map(|result| !matches!(result, Visit::OutOfFrustum | Visit::Selected));

        let descended = frame.results.iter().any(|&r| r != Visit::Undefined);
        if !descended && frame.containment == Containment::Intersect {
            // Straddling the frustum: drop quarters that are fully outside
            for (flag, quarter) in flags.iter_mut().zip(self.quarter_aabbs(frame)) {
                *flag = self.frustum.intersects_aabb(&quarter);
            }
        }

        if flags.iter().any(|&flag| flag) {
            let quadrants = Quadrants::from_array(flags);
            let min_distance = min_distance_sq(&frame.aabb, self.eye).sqrt();
            selection.push(SelectedNode {
                node,
                aabb: frame.aabb,
                lod_level: node.lod,
                quadrants,
                min_distance,
            });

            if let Some(stats) = stats.as_deref_mut() {
                stats.selected += 1;
                if !quadrants.is_full() {
                    stats.partial += 1;
                }
            }

            if !selection.visibility_distance_too_small
                && node.lod < self.tree.top_level()
                && (node.lod as usize + 1) < self.table.level_count()
            {
                let max_distance = max_distance_sq(&frame.aabb, self.eye).sqrt();
                if max_distance > self.table.morph_start(node.lod as usize + 1) {
                    selection.visibility_distance_too_small = true;
                }
            }

            return Visit::Selected;
        }

        if frame.results.contains(&Visit::Selected) {
            Visit::Selected
        } else {
            Visit::OutOfFrustum
        }
    }

    /// Bounding boxes of the four quarters, in flag order
    fn quarter_aabbs(&self, frame: &Frame) -> [Aabb3d; 4] {
        if frame.node.lod > 0 {
            return frame.node.children().map(|child| self.tree.node_aabb(child));
        }
        let min = frame.aabb.min;
        let max = frame.aabb.max;
        let center = frame.aabb.center();
        let quarter = |x0: f32, y0: f32, x1: f32, y1: f32| Aabb3d {
            min: Vec3A::new(x0, y0, min.z),
            max: Vec3A::new(x1, y1, max.z),
        };
        [
            quarter(min.x, min.y, center.x, center.y),
            quarter(center.x, min.y, max.x, center.y),
            quarter(min.x, center.y, center.x, max.y),
            quarter(center.x, center.y, max.x, max.y),
        ]
    }
}

fn min_distance_sq(aabb: &Aabb3d, point: Vec3A) -> f32 {
    let closest = point.clamp(aabb.min, aabb.max);
    closest.distance_squared(point)
}

fn max_distance_sq(aabb: &Aabb3d, point: Vec3A) -> f32 {
    let far = (point - aabb.min).abs().max((point - aabb.max).abs());
    far.length_squared()
}

impl TerrainQuadtree {
    /// Distance bands for a frame
    ///
    /// The far distance is clamped to the configured view range and the ratio
    /// to `MIN_LOD_DISTANCE_RATIO..=MAX_LOD_DISTANCE_RATIO`; non-finite inputs
    /// fall back to the configured values. The table built with the quadtree
    /// is reused when the clamped view matches it.
    pub fn distance_table_for(&self, far_distance: f32, lod_distance_ratio: f32) -> LodDistanceTable {
        let settings = self.settings();
        let view_range = if far_distance.is_nan() {
            settings.max_view_range
        } else {
            far_distance.clamp(settings.min_view_range, settings.max_view_range)
        };
        let ratio = if lod_distance_ratio.is_finite() {
            lod_distance_ratio.clamp(MIN_LOD_DISTANCE_RATIO, MAX_LOD_DISTANCE_RATIO)
        } else {
            settings.lod_level_distance_ratio
        };
        if view_range == settings.max_view_range && ratio == settings.lod_level_distance_ratio {
            *self.distance_table()
        } else {
            LodDistanceTable::new(
                view_range,
                settings.lod_level_count,
                ratio,
                settings.morph_start_ratio,
            )
        }
    }

    /// Fill `selection` with the nodes to draw for `view`
    ///
    /// # Panics
    ///
    /// Panics if more nodes are selected than `selection` can hold.
    pub fn select(&self, view: &ViewParams, selection: &mut Selection) {
        self.select_with_stats(view, selection, None);
    }

    /// [`Self::select`], additionally counting what the traversal did
    pub fn select_with_stats(
        &self,
        view: &ViewParams,
        selection: &mut Selection,
        mut stats: Option<&mut SelectionStats>,
    ) {
        selection.clear();
        if let Some(stats) = stats.as_deref_mut() {
            *stats = SelectionStats::default();
        }

        let table = self.distance_table_for(view.far_distance, view.lod_distance_ratio);
        let context = SelectContext {
            tree: self,
            table: &table,
            eye: Vec3A::from(view.eye),
            frustum: &view.frustum,
        };

        let mut stack: SmallVec<[Frame; MAX_LOD_LEVELS]> = SmallVec::new();
        for root in self.roots() {
            if let Step::Descend(frame) = context.enter(root, false, selection, &mut stats) {
                stack.push(frame);
            }

            while let Some(top) = stack.last_mut() {
                if top.next_child < 4 {
                    let child = top.node.children()[top.next_child];
                    let parent_inside = top.containment == Containment::Inside;
                    top.next_child += 1;
                    match context.enter(child, parent_inside, selection, &mut stats) {
                        Step::Done(result) => {
                            if let Some(top) = stack.last_mut() {
                                top.results[top.next_child - 1] = result;
                            }
                        }
                        Step::Descend(frame) => stack.push(frame),
                    }
                    continue;
                }

                let Some(done) = stack.pop() else {
                    break;
                };
                let result = context.finish(&done, selection, &mut stats);
                if let Some(parent) = stack.last_mut() {
                    parent.results[parent.next_child - 1] = result;
                }
            }
        }

        selection.distance_table = Some(table);
        if self.settings().sort_by_distance {
            selection.sort_by_distance();
        }
    }
}

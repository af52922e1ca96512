//! Per-level visibility ranges and morph regions
//!
//! Level 0 is the finest. Each level's distance band is `ratio` times wider
//! than the previous one, and the bands are scaled so the coarsest level ends
//! exactly at the view range.

use crate::config::MAX_LOD_LEVELS;
use bevy::prelude::*;

/// Blend-region fudge pulling `morph_end` slightly towards `morph_start`
const MORPH_END_FUDGE: f32 = 0.01;

/// Distance bands derived from the view range and LOD ratio
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LodDistanceTable {
    level_count: usize,
    view_range: f32,
    ratio: f32,
    morph_start_ratio: f32,
    visibility_ranges: [f32; MAX_LOD_LEVELS],
    morph_start: [f32; MAX_LOD_LEVELS],
    morph_end: [f32; MAX_LOD_LEVELS],
}

impl LodDistanceTable {
    /// Derive the table for `level_count` levels ending at `view_range`
    ///
    /// `level_count` is clamped to `1..=MAX_LOD_LEVELS`; callers are expected
    /// to have validated their settings already.
    pub fn new(view_range: f32, level_count: u32, ratio: f32, morph_start_ratio: f32) -> Self {
        let level_count = (level_count as usize).clamp(1, MAX_LOD_LEVELS);

        let mut total = 0.0;
        let mut detail = 1.0;
        for _ in 0..level_count {
            total += detail;
            detail *= ratio;
        }
        let sect = view_range / total;

        let mut visibility_ranges = [0.0; MAX_LOD_LEVELS];
        let mut prev = 0.0;
        let mut detail = 1.0;
        for range in visibility_ranges.iter_mut().take(level_count) {
            *range = prev + sect * detail;
            prev = *range;
            detail *= ratio;
        }
        // Accumulated rounding must not leave a gap before the view range
        visibility_ranges[level_count - 1] = view_range;

        let mut morph_start = [0.0; MAX_LOD_LEVELS];
        let mut morph_end = [0.0; MAX_LOD_LEVELS];
        let mut prev = 0.0;
        for lod in 0..level_count {
            morph_end[lod] = visibility_ranges[lod];
            morph_start[lod] = prev + (morph_end[lod] - prev) * morph_start_ratio;
            prev = morph_start[lod];
        }

        Self {
            level_count,
            view_range,
            ratio,
            morph_start_ratio,
            visibility_ranges,
            morph_start,
            morph_end,
        }
    }

    pub fn level_count(&self) -> usize {
        self.level_count
    }

    pub fn view_range(&self) -> f32 {
        self.view_range
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    pub fn morph_start_ratio(&self) -> f32 {
        self.morph_start_ratio
    }

    /// Maximum distance at which `lod` is selected
    pub fn visibility_range(&self, lod: usize) -> f32 {
        self.visibility_ranges[lod]
    }

    /// All visibility ranges, finest first
    pub fn visibility_ranges(&self) -> &[f32] {
        &self.visibility_ranges[..self.level_count]
    }

    pub fn morph_start(&self, lod: usize) -> f32 {
        self.morph_start[lod]
    }

    pub fn morph_end(&self, lod: usize) -> f32 {
        self.morph_end[lod]
    }

    /// The level whose distance band contains `distance`
    ///
    /// Bands are half-open `[range[i-1], range[i])`, except the last one which
    /// also contains the view range itself. Returns `None` past the view range.
    pub fn level_for_distance(&self, distance: f32) -> Option<u8> {
        if !(distance >= 0.0) || distance > self.view_range {
            return None;
        }
        let lod = self
            .visibility_ranges()
            .iter()
            .position(|&range| distance < range)
            .unwrap_or(self.level_count - 1);
        Some(lod as u8)
    }

    /// Shader constants for morphing vertices of level `lod`
    ///
    /// Layout is `(start, 1 / (end - start), end / (end - start), 1 / (end - start))`
    /// where `end` is pulled 1% towards `start`.
    pub fn morph_consts(&self, lod: usize) -> Vec4 {
        let start = self.morph_start[lod];
        let end = self.morph_end[lod] + (start - self.morph_end[lod]) * MORPH_END_FUDGE;
        let inv = 1.0 / (end - start);
        Vec4::new(start, inv, end * inv, inv)
    }

    /// Morph factor for a vertex of `lod` at `distance` from the eye
    ///
    /// 0 keeps the vertex at full detail, 1 snaps it onto the next coarser grid.
    /// Matches the blend the vertex shader computes from [`Self::morph_consts`].
    pub fn morph_factor(&self, lod: usize, distance: f32) -> f32 {
        let consts = self.morph_consts(lod);
        1.0 - (consts.z - distance * consts.y).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_configuration() {
        let table = LodDistanceTable::new(100_000.0, 8, 2.0, 0.66);
        let ranges = table.visibility_ranges();

        assert_eq!(ranges.len(), 8);
        for pair in ranges.windows(2) {
            assert!(pair[0] < pair[1], "ranges must strictly increase: {ranges:?}");
        }
        assert_eq!(ranges[7], 100_000.0);

        // 255 sections of 100000 / 255 each, doubling per level
        let sect = 100_000.0 / 255.0;
        assert!((ranges[0] - sect).abs() < 1e-2);
        assert!((ranges[1] - sect * 3.0).abs() < 1e-2);
    }

    #[test]
    fn test_bands_partition_view_range() {
        let table = LodDistanceTable::new(5_000.0, 6, 2.5, 0.66);
        let steps = 10_000;
        for i in 0..=steps {
            let d = 5_000.0 * i as f32 / steps as f32;
            let lod = table
                .level_for_distance(d)
                .unwrap_or_else(|| panic!("no level covers {d}")) as usize;

            let lower = if lod == 0 {
                0.0
            } else {
                table.visibility_range(lod - 1)
            };
            assert!(d >= lower && d <= table.visibility_range(lod));
            // Exactly one band: every other band excludes d
            let covering = (0..table.level_count())
                .filter(|&l| {
                    let lo = if l == 0 { 0.0 } else { table.visibility_range(l - 1) };
                    let hi = table.visibility_range(l);
                    d >= lo && (d < hi || (l == table.level_count() - 1 && d <= hi))
                })
                .count();
            assert_eq!(covering, 1);
        }
        assert_eq!(table.level_for_distance(5_000.1), None);
        assert_eq!(table.level_for_distance(-1.0), None);
    }

    #[test]
    fn test_morph_regions_sit_inside_bands() {
        let table = LodDistanceTable::new(10_000.0, 5, 2.0, 0.66);
        for lod in 0..table.level_count() {
            let start = table.morph_start(lod);
            let end = table.morph_end(lod);
            assert!(start < end);
            assert_eq!(end, table.visibility_range(lod));
            if lod > 0 {
                assert!(start > table.morph_start(lod - 1));
            }
        }
    }

    #[test]
    fn test_morph_consts_blend() {
        let table = LodDistanceTable::new(10_000.0, 5, 2.0, 0.66);
        let lod = 2;
        let start = table.morph_start(lod);
        let end = table.morph_end(lod);

        assert_eq!(table.morph_factor(lod, 0.0), 0.0);
        assert!(table.morph_factor(lod, start) < 1e-5);
        assert_eq!(table.morph_factor(lod, end), 1.0);

        let mid = table.morph_factor(lod, (start + end) * 0.5);
        assert!(mid > 0.4 && mid < 0.6);

        let consts = table.morph_consts(lod);
        assert_eq!(consts.x, start);
        assert_eq!(consts.y, consts.w);
    }
}

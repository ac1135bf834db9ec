//! Sweep queries against the obstacles indexed in the focus grid.

use std::collections::BTreeSet;

use chunkspace_common::{BoundingBox, GRID_RESOLUTION, GridCoord, ItemId};
use glam::Vec3;

use crate::arena::ChunkId;
use crate::space::Space;

/// Obstacle boxes are grown by this much before clipping.
const CLIP_SLACK: f32 = 0.01;

/// What is swept through the space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SweepShape {
    Ray(Vec3),
    /// A triangle swept along the path of its first vertex, making a prism.
    Triangle([Vec3; 3]),
}

impl SweepShape {
    /// The point whose path the sweep follows.
    pub fn leader(&self) -> Vec3 {
        match self {
            SweepShape::Ray(p) => *p,
            SweepShape::Triangle(t) => t[0],
        }
    }

    pub fn bounds(&self) -> BoundingBox {
        match self {
            SweepShape::Ray(p) => BoundingBox::new(*p, *p),
            SweepShape::Triangle(t) => {
                let mut bb = BoundingBox::new(t[0], t[0]);
                bb.add_point(t[1]);
                bb.add_point(t[2]);
                bb
            }
        }
    }
}

/// Which further hits a collision callback still wants reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollideMask(u8);

impl CollideMask {
    pub const STOP: Self = Self(0);
    pub const NEARER: Self = Self(1);
    pub const FARTHER: Self = Self(2);
    pub const ALL: Self = Self(3);

    pub fn wants_nearer(self) -> bool {
        self.0 & 1 != 0
    }

    pub fn wants_farther(self) -> bool {
        self.0 & 2 != 0
    }
}

/// One reported contact, `dist` world units along the sweep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepHit {
    pub chunk: ChunkId,
    pub item: Option<ItemId>,
    pub dist: f32,
}

impl Space {
    /// Sweep `shape` so that its leader travels to `end`, reporting every
    /// obstacle it passes through to `callback`.
    ///
    /// Columns are visited in order along the sweep. Once the callback has
    /// asked for nearer hits only, columns beyond the best distance are not
    /// visited. Returns the distance of the last reported hit, or `-1.0`
    /// when nothing was hit.
    pub fn collide<F>(&self, shape: &SweepShape, end: Vec3, mut callback: F) -> f32
    where
        F: FnMut(&SweepHit) -> CollideMask,
    {
        let shape_bb = shape.bounds();
        let range = shape_bb.max - shape_bb.min;
        let radius = range.length() * 0.5;
        let delta = end - shape.leader();
        let full = delta.length();
        let source = shape_bb.centre();

        let mut dist = -1.0_f32;
        let mut only_less = false;
        let mut only_more = false;
        let mut seen = BTreeSet::new();

        for (entry, coord) in self.sweep_cells(source, delta, radius) {
            if only_less && dist + radius < entry {
                break;
            }
            let Some(column) = self.focus.get(coord) else {
                continue;
            };
            for obstacle in column.obstacles() {
                if !seen.insert((obstacle.chunk, obstacle.item)) {
                    continue;
                }
                let Some((t0, _)) = obstacle
                    .bb
                    .expanded(radius + CLIP_SLACK)
                    .clip_segment(source, delta)
                else {
                    continue;
                };
                let travel = t0 * full;
                if only_less && travel > dist {
                    continue;
                }
                if only_more && travel < dist {
                    continue;
                }
                dist = travel;
                let say = callback(&SweepHit {
                    chunk: obstacle.chunk,
                    item: obstacle.item,
                    dist,
                });
                if say == CollideMask::STOP {
                    return dist;
                }
                only_less = !say.wants_farther();
                only_more = !say.wants_nearer();
            }
        }
        dist
    }

    /// Focus window cells touched by the swept box, with the travel at
    /// which the sweep enters each, nearest first.
    fn sweep_cells(&self, source: Vec3, delta: Vec3, radius: f32) -> Vec<(f32, GridCoord)> {
        let full = delta.length();
        let lo = source.min(source + delta) - Vec3::splat(radius);
        let hi = source.max(source + delta) + Vec3::splat(radius);
        let origin = self.focus.origin();
        let half = self.focus.half_span();
        let (a, b) = (GridCoord::from_point(lo), GridCoord::from_point(hi));

        let mut cells = Vec::new();
        for x in a.x.max(origin.x - half)..=b.x.min(origin.x + half) {
            for z in a.z.max(origin.z - half)..=b.z.min(origin.z + half) {
                let cell = BoundingBox::new(
                    Vec3::new(x as f32 * GRID_RESOLUTION - radius, f32::MIN, z as f32 * GRID_RESOLUTION - radius),
                    Vec3::new((x + 1) as f32 * GRID_RESOLUTION + radius, f32::MAX, (z + 1) as f32 * GRID_RESOLUTION + radius),
                );
                if let Some((t0, _)) = cell.clip_segment(source, delta) {
                    cells.push((t0 * full, GridCoord::new(x, z)));
                }
            }
        }
        cells.sort_by(|l, r| l.0.total_cmp(&r.0));
        cells
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{Actor, ShellModel};
    use crate::space::tests::{grid_space, load};
    use chunkspace_format::GridBounds;

    fn crate_box(x: f32) -> Box<ShellModel> {
        Box::new(ShellModel::new(
            "crate",
            BoundingBox::new(Vec3::new(x - 1.0, 0.0, 49.0), Vec3::new(x + 1.0, 2.0, 51.0)),
        ))
    }

    fn walled_space() -> (Space, [ItemId; 3]) {
        let (mut space, mapping, _) = grid_space(GridBounds::new(0, 0, 2, 0));
        let a = load(&mut space, &mapping, "00000000o");
        let b = load(&mut space, &mapping, "00010000o");
        let c = load(&mut space, &mapping, "00020000o");
        space.focus(Vec3::new(50.0, 0.0, 50.0));
        // chunk local boxes; the outside chunks sit 100 m apart
        let near = space.add_static_item(a, crate_box(80.0)).unwrap();
        let mid = space.add_static_item(b, crate_box(50.0)).unwrap();
        let far = space.add_static_item(c, crate_box(20.0)).unwrap();
        (space, [near, mid, far])
    }

    #[test]
    fn ray_reports_hits_until_stopped() {
        let (space, [near, ..]) = walled_space();
        let start = SweepShape::Ray(Vec3::new(5.0, 1.0, 50.0));
        let mut hits = Vec::new();
        let dist = space.collide(&start, Vec3::new(295.0, 1.0, 50.0), |hit| {
            hits.push(hit.item);
            CollideMask::STOP
        });
        assert_eq!(hits, vec![Some(near)]);
        assert!((dist - 74.0).abs() < 0.1, "{dist}");
    }

    #[test]
    fn all_mask_visits_every_obstacle_in_order() {
        let (space, items) = walled_space();
        let start = SweepShape::Ray(Vec3::new(5.0, 1.0, 50.0));
        let mut hits = Vec::new();
        let dist = space.collide(&start, Vec3::new(295.0, 1.0, 50.0), |hit| {
            hits.push(hit.item.unwrap());
            CollideMask::ALL
        });
        assert_eq!(hits, items.to_vec());
        assert!((dist - 214.0).abs() < 0.1, "{dist}");
    }

    #[test]
    fn nearer_mask_skips_farther_obstacles() {
        let (space, _) = walled_space();
        let start = SweepShape::Ray(Vec3::new(5.0, 1.0, 50.0));
        let mut calls = 0;
        let dist = space.collide(&start, Vec3::new(295.0, 1.0, 50.0), |_| {
            calls += 1;
            CollideMask::NEARER
        });
        assert_eq!(calls, 1);
        assert!((dist - 74.0).abs() < 0.1);
    }

    #[test]
    fn ray_missing_everything_returns_minus_one() {
        let (space, _) = walled_space();
        let start = SweepShape::Ray(Vec3::new(5.0, 1.0, 10.0));
        let dist = space.collide(&start, Vec3::new(295.0, 1.0, 10.0), |_| CollideMask::ALL);
        assert_eq!(dist, -1.0);
    }

    #[test]
    fn triangle_sweep_is_widened_by_its_extent() {
        let (space, [near, ..]) = walled_space();
        // passes 4 m beside the crates, but the triangle is 10 m wide
        let tri = SweepShape::Triangle([
            Vec3::new(5.0, 1.0, 55.0),
            Vec3::new(5.0, 1.0, 45.0),
            Vec3::new(5.0, 2.0, 55.0),
        ]);
        let ray = SweepShape::Ray(Vec3::new(5.0, 1.0, 56.0));
        let mut first = None;
        space.collide(&tri, Vec3::new(295.0, 1.0, 55.0), |hit| {
            first.get_or_insert(hit.item);
            CollideMask::STOP
        });
        assert_eq!(first, Some(Some(near)));
        assert_eq!(space.collide(&ray, Vec3::new(295.0, 1.0, 56.0), |_| CollideMask::ALL), -1.0);
    }

    #[test]
    fn unfocused_obstacles_are_invisible() {
        let (mut space, mapping, _) = grid_space(GridBounds::new(0, 0, 0, 0));
        let a = load(&mut space, &mapping, "00000000o");
        space
            .add_static_item(a, Box::new(Actor::new("rock", Vec3::new(50.0, 1.0, 50.0), 2.0)))
            .unwrap();
        let ray = SweepShape::Ray(Vec3::new(5.0, 1.0, 50.0));
        assert_eq!(space.collide(&ray, Vec3::new(95.0, 1.0, 50.0), |_| CollideMask::ALL), -1.0);

        space.focus(Vec3::new(50.0, 0.0, 50.0));
        let dist = space.collide(&ray, Vec3::new(95.0, 1.0, 50.0), |_| CollideMask::ALL);
        assert!((dist - 43.0).abs() < 0.1, "{dist}");
    }

    fn focused_pair() -> (Space, ChunkId) {
        let (mut space, mapping, _) = grid_space(GridBounds::new(0, 0, 1, 0));
        let a = load(&mut space, &mapping, "00000000o");
        load(&mut space, &mapping, "00010000o");
        space.focus(Vec3::new(50.0, 0.0, 50.0));
        (space, a)
    }

    #[test]
    fn obstacle_straddling_a_cell_border_is_found_from_either_side() {
        let (mut space, a) = focused_pair();
        let wall = space
            .add_static_item(
                a,
                Box::new(ShellModel::new(
                    "wall",
                    BoundingBox::new(Vec3::new(95.0, 0.0, 49.0), Vec3::new(105.0, 2.0, 51.0)),
                )),
            )
            .unwrap();
        assert_eq!(space.obstacle_items(Vec3::new(50.0, 0.0, 50.0)), vec![wall]);
        assert_eq!(space.obstacle_items(Vec3::new(150.0, 0.0, 50.0)), vec![wall]);

        // this ray never leaves the eastern cell
        let ray = SweepShape::Ray(Vec3::new(102.0, 1.0, 10.0));
        let mut hits = Vec::new();
        let dist = space.collide(&ray, Vec3::new(102.0, 1.0, 90.0), |hit| {
            hits.push(hit.item);
            CollideMask::ALL
        });
        assert_eq!(hits, vec![Some(wall)]);
        assert!((dist - 38.99).abs() < 0.01, "{dist}");
        assert!(space.validate().is_empty());

        space.remove_static_item(a, wall).unwrap();
        assert!(space.obstacle_items(Vec3::new(50.0, 0.0, 50.0)).is_empty());
        assert!(space.obstacle_items(Vec3::new(150.0, 0.0, 50.0)).is_empty());
        assert_eq!(space.collide(&ray, Vec3::new(102.0, 1.0, 90.0), |_| CollideMask::ALL), -1.0);
    }

    #[test]
    fn wide_sweep_reaches_into_the_neighbouring_cell() {
        let (mut space, a) = focused_pair();
        let post = space
            .add_static_item(
                a,
                Box::new(ShellModel::new(
                    "post",
                    BoundingBox::new(Vec3::new(97.0, 0.0, 49.0), Vec3::new(99.5, 2.0, 51.0)),
                )),
            )
            .unwrap();
        assert!(space.obstacle_items(Vec3::new(150.0, 0.0, 50.0)).is_empty());

        let tri = SweepShape::Triangle([
            Vec3::new(99.0, 1.0, 10.0),
            Vec3::new(103.0, 1.0, 10.0),
            Vec3::new(101.0, 2.0, 10.0),
        ]);
        let mut hits = Vec::new();
        let dist = space.collide(&tri, Vec3::new(99.0, 1.0, 90.0), |hit| {
            hits.push(hit.item);
            CollideMask::ALL
        });
        assert_eq!(hits, vec![Some(post)]);
        assert!((dist - 36.93).abs() < 0.05, "{dist}");

        let ray = SweepShape::Ray(Vec3::new(101.0, 1.0, 10.0));
        assert_eq!(space.collide(&ray, Vec3::new(101.0, 1.0, 90.0), |_| CollideMask::ALL), -1.0);
    }

    #[test]
    fn sweep_from_beyond_the_window_is_clipped_to_it() {
        let (space, [near, ..]) = walled_space();
        let ray = SweepShape::Ray(Vec3::new(-1000.0, 1.0, 50.0));
        let mut hits = Vec::new();
        let dist = space.collide(&ray, Vec3::new(95.0, 1.0, 50.0), |hit| {
            hits.push(hit.item);
            CollideMask::ALL
        });
        assert_eq!(hits, vec![Some(near)]);
        assert!((dist - 1079.0).abs() < 0.1, "{dist}");
    }

    #[test]
    fn zero_length_sweep_hits_only_what_it_starts_in() {
        let (space, [near, ..]) = walled_space();
        let inside = Vec3::new(80.0, 1.0, 50.0);
        let mut hits = Vec::new();
        let dist = space.collide(&SweepShape::Ray(inside), inside, |hit| {
            hits.push(hit.item);
            CollideMask::ALL
        });
        assert_eq!(hits, vec![Some(near)]);
        assert_eq!(dist, 0.0);

        let clear = Vec3::new(50.0, 1.0, 10.0);
        assert_eq!(space.collide(&SweepShape::Ray(clear), clear, |_| CollideMask::ALL), -1.0);
    }
}

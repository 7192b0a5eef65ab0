use bevy::math::cubic_splines::{CubicBSpline, CubicCurve, CyclicCubicGenerator};
use bevy::prelude::*;

use crate::config::TrackConfig;

/// The start/finish line lives on segment 0 by convention.
pub const START_SEGMENT: usize = 0;

/// How far the localizer searches around the previous segment. The vehicle
/// moves at most a few segments per tick, so a short window replaces a full
/// scan.
const LOCATE_SEARCH_BEHIND: usize = 2;
const LOCATE_SEARCH_AHEAD: usize = 4;

/// Position on the track as (segment index, progress through that segment).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TrackLocation {
    pub segment: usize,
    pub percent: f32,
}

/// Ground plane and guardrail segments near the vehicle, recomputed every
/// tick and never persisted.
#[derive(Debug, Clone, Copy)]
pub struct TrackBoundarySnapshot {
    pub ground_point: Vec3,
    pub ground_normal: Vec3,
    pub left_rail: (Vec3, Vec3),
    pub right_rail: (Vec3, Vec3),
    pub road_width: f32,
}

/// Contract the simulation core consumes; `TrackLayout` is the shipped
/// implementation, tests may substitute hand-built layouts.
pub trait TrackSurface {
    fn segment_count(&self) -> usize;
    fn locate(&self, position: Vec3, hint: usize) -> TrackLocation;
    fn position_matrix(&self, segment: usize, percent: f32) -> (Mat4, f32, f32);
    fn checkpoint_segments(&self) -> &[usize];
    fn boundary_snapshot(&self, location: TrackLocation) -> TrackBoundarySnapshot;
}

#[derive(Debug, Clone)]
pub struct TrackSegmentFrame {
    pub center: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
    pub right: Vec3,
    pub road_width: f32,
}

#[derive(Resource, Debug, Clone)]
pub struct TrackLayout {
    pub id: String,
    pub segments: Vec<TrackSegmentFrame>,
    pub checkpoints: Vec<usize>,
    pub length: f32,
}

impl TrackLayout {
    pub fn build(config: &TrackConfig) -> Self {
        let control_points: Vec<Vec3> = config
            .control_points
            .iter()
            .map(|p| Vec3::new(p[0], p[1], p[2]))
            .collect();
        let spline = build_spline(&control_points);
        let t_max = spline.segments().len() as f32;

        let count = config.segment_count;
        let centers: Vec<Vec3> = (0..count)
            .map(|i| spline.position((i as f32 / count as f32) * t_max))
            .collect();

        let mut segments = Vec::with_capacity(count);
        for i in 0..count {
            let prev = centers[(i + count - 1) % count];
            let next = centers[(i + 1) % count];
            let frame = segment_frame(centers[i], next - prev, config.road_width);
            segments.push(frame);
        }

        let mut length = 0.0;
        for i in 0..count {
            length += (centers[(i + 1) % count] - centers[i]).length();
        }

        Self {
            id: config.id.clone(),
            segments,
            checkpoints: config.checkpoints.clone(),
            length,
        }
    }

    pub fn segment(&self, index: usize) -> &TrackSegmentFrame {
        &self.segments[index % self.segments.len()]
    }

    /// World position for a normalized lap parameter in [0, 1]; used by the
    /// synthetic replay generator.
    pub fn position_at_parameter(&self, parameter: f32) -> Mat4 {
        let count = self.segments.len() as f32;
        let scaled = parameter.clamp(0.0, 1.0) * count;
        let segment = (scaled as usize).min(self.segments.len() - 1);
        let percent = scaled - segment as f32;
        self.position_matrix(segment, percent).0
    }
}

impl TrackSurface for TrackLayout {
    fn segment_count(&self) -> usize {
        self.segments.len()
    }

    fn locate(&self, position: Vec3, hint: usize) -> TrackLocation {
        let count = self.segments.len();
        let mut best = TrackLocation {
            segment: hint % count,
            percent: 0.0,
        };
        let mut best_distance_squared = f32::MAX;

        for offset in 0..=(LOCATE_SEARCH_BEHIND + LOCATE_SEARCH_AHEAD) {
            let candidate = (hint + count + offset - LOCATE_SEARCH_BEHIND) % count;
            let start = self.segments[candidate].center;
            let chord = self.segments[(candidate + 1) % count].center - start;
            let chord_length_squared = chord.length_squared().max(f32::EPSILON);
            let t = ((position - start).dot(chord) / chord_length_squared).clamp(0.0, 1.0);
            let closest = start + chord * t;
            let distance_squared = position.distance_squared(closest);

            // On an exact boundary the later candidate wins, so the start
            // of the next segment takes over from the end of the previous.
            if distance_squared <= best_distance_squared {
                best_distance_squared = distance_squared;
                best = TrackLocation {
                    segment: candidate,
                    percent: t.min(0.999_9),
                };
            }
        }

        best
    }

    fn position_matrix(&self, segment: usize, percent: f32) -> (Mat4, f32, f32) {
        let count = self.segments.len();
        let current = &self.segments[segment % count];
        let next = &self.segments[(segment + 1) % count];
        let t = percent.clamp(0.0, 1.0);

        let center = current.center.lerp(next.center, t);
        let forward = current
            .forward
            .lerp(next.forward, t)
            .try_normalize()
            .unwrap_or(current.forward);
        let up = current
            .up
            .lerp(next.up, t)
            .try_normalize()
            .unwrap_or(current.up);
        let right = forward.cross(up).normalize_or_zero();

        let matrix = Mat4::from_cols(
            right.extend(0.0),
            up.extend(0.0),
            forward.extend(0.0),
            center.extend(1.0),
        );
        (matrix, current.road_width, next.road_width)
    }

    fn checkpoint_segments(&self) -> &[usize] {
        &self.checkpoints
    }

    fn boundary_snapshot(&self, location: TrackLocation) -> TrackBoundarySnapshot {
        let count = self.segments.len();
        let current = &self.segments[location.segment % count];
        let next = &self.segments[(location.segment + 1) % count];
        let t = location.percent.clamp(0.0, 1.0);

        let half_current = current.road_width * 0.5;
        let half_next = next.road_width * 0.5;

        TrackBoundarySnapshot {
            ground_point: current.center.lerp(next.center, t),
            ground_normal: current
                .up
                .lerp(next.up, t)
                .try_normalize()
                .unwrap_or(current.up),
            left_rail: (
                current.center - current.right * half_current,
                next.center - next.right * half_next,
            ),
            right_rail: (
                current.center + current.right * half_current,
                next.center + next.right * half_next,
            ),
            road_width: current.road_width,
        }
    }
}

fn build_spline(control_points: &[Vec3]) -> CubicCurve<Vec3> {
    CubicBSpline::new(control_points.to_vec())
        .to_curve_cyclic()
        .expect("closed track spline requires at least 4 control points")
}

fn segment_frame(center: Vec3, tangent: Vec3, road_width: f32) -> TrackSegmentFrame {
    let forward = tangent.try_normalize().unwrap_or(Vec3::X);
    let mut right = forward.cross(Vec3::Y);
    if right.length_squared() <= f32::EPSILON {
        right = forward.cross(Vec3::Z);
    }
    let right = right.normalize();
    let up = right.cross(forward).normalize();

    TrackSegmentFrame {
        center,
        forward,
        up,
        right,
        road_width,
    }
}

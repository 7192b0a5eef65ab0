//! Guardrail contact testing and response.
//!
//! The vehicle's rectangular footprint is tested corner by corner against the
//! left/right rail segments of the current track segment. The deepest
//! violation wins; the response buckets by incidence angle, then the car is
//! pushed back inside the rails and re-seated on the ground plane. The ground
//! projection is unconditional: this simulation never enters free flight,
//! the car is re-seated on the road surface every tick by design of the
//! shipped tuning.

use bevy::prelude::*;

use super::*;
use crate::gameplay::track::TrackBoundarySnapshot;

#[derive(Debug, Clone, Copy)]
pub struct CollisionFeedback {
    pub shake: f32,
    pub incidence_deg: f32,
    pub front_corner: bool,
}

#[derive(Debug, Clone, Copy)]
struct RailViolation {
    penetration: f32,
    front_corner: bool,
    normal: Vec3,
    rail_direction: Vec3,
}

pub fn resolve_rail_contact(
    state: &mut VehicleState,
    snapshot: &TrackBoundarySnapshot,
    elapsed_s: f32,
) -> Option<CollisionFeedback> {
    let dt = elapsed_s.clamp(MOVE_FACTOR_MIN_S, MOVE_FACTOR_MAX_S);
    let violation = deepest_violation(state, snapshot)?;
    let entry_speed_abs = state.speed.abs();

    // Fold the incidence between the lateral axis and the collision normal
    // back into [0, 90] degrees.
    let lateral = state.right();
    let cos_incidence = lateral.dot(violation.normal).clamp(-1.0, 1.0);
    let mut incidence_deg = cos_incidence.acos().to_degrees();
    if incidence_deg > 90.0 {
        incidence_deg = 180.0 - incidence_deg;
    }

    let shake;
    if incidence_deg < SHALLOW_IMPACT_MAX_DEG {
        // Grazing hit: nudge the nose along the wall and scrub some speed.
        let divisor = if violation.front_corner {
            FRONT_ROTATION_DIVISOR
        } else {
            REAR_ROTATION_DIVISOR
        };
        state.rotation_debt += slide_correction(state, violation.rail_direction) / divisor;
        state.speed *= if violation.front_corner {
            FRONT_CORNER_SPEED_KEEP
        } else {
            REAR_CORNER_SPEED_KEEP
        };
        state.zoom_distance = (state.zoom_distance - ZOOM_COLLISION_PULL).max(0.0);
        shake = entry_speed_abs * SHAKE_SHALLOW_PER_SPEED;
    } else {
        if incidence_deg < ROTATION_IMPACT_MAX_DEG {
            state.rotation_debt +=
                slide_correction(state, violation.rail_direction) / STEEP_ROTATION_DIVISOR;
        }
        state.speed = 0.0;
        shake = entry_speed_abs * SHAKE_STEEP_PER_SPEED;
    }

    state.force = Vec3::ZERO;

    // Push the car out far enough that next tick's corner test starts clean,
    // including the distance it would travel back into the rail this frame.
    let overshoot_margin = entry_speed_abs * POSITION_SCALE * dt;
    state.position += violation.normal
        * (violation.penetration + COLLISION_PUSH_EPSILON_M + overshoot_margin);

    Some(CollisionFeedback {
        shake,
        incidence_deg,
        front_corner: violation.front_corner,
    })
}

/// Seat the car on the ground plane along the plane normal and keep the
/// orientation frame consistent with it.
pub fn project_to_ground(state: &mut VehicleState, snapshot: &TrackBoundarySnapshot) {
    let offset = (state.position - snapshot.ground_point).dot(snapshot.ground_normal);
    state.position -= snapshot.ground_normal * offset;
    state.up = snapshot.ground_normal;
    state.forward = (state.forward - state.up * state.forward.dot(state.up))
        .try_normalize()
        .unwrap_or(state.forward);
    state.grounded = true;
}

pub(crate) fn corner_points(state: &VehicleState) -> [(Vec3, bool); 4] {
    let right = state.right();
    let nose = state.forward * CAR_HALF_LENGTH_M;
    let flank = right * CAR_HALF_WIDTH_M;
    [
        (state.position + nose - flank, true),
        (state.position + nose + flank, true),
        (state.position - nose - flank, false),
        (state.position - nose + flank, false),
    ]
}

fn deepest_violation(
    state: &VehicleState,
    snapshot: &TrackBoundarySnapshot,
) -> Option<RailViolation> {
    let mut deepest: Option<RailViolation> = None;

    for (corner, front_corner) in corner_points(state) {
        let distance_left = point_segment_distance(corner, snapshot.left_rail);
        let distance_right = point_segment_distance(corner, snapshot.right_rail);

        // Being farther from one rail than the road is wide means the corner
        // crossed past the opposite rail entirely.
        let left_breach = breach_depth(distance_left, distance_right, snapshot.road_width);
        let right_breach = breach_depth(distance_right, distance_left, snapshot.road_width);

        let (penetration, rail) = match (left_breach, right_breach) {
            (Some(left), Some(right)) if left >= right => (left, snapshot.left_rail),
            (Some(left), None) => (left, snapshot.left_rail),
            (_, Some(right)) => (right, snapshot.right_rail),
            (None, None) => continue,
        };

        if deepest.is_none_or(|v| penetration > v.penetration) {
            let rail_direction = (rail.1 - rail.0).normalize_or_zero();
            let mut normal = rail_direction.cross(snapshot.ground_normal).normalize_or_zero();
            if normal.dot(snapshot.ground_point - rail.0) < 0.0 {
                normal = -normal;
            }
            deepest = Some(RailViolation {
                penetration,
                front_corner,
                normal,
                rail_direction,
            });
        }
    }

    deepest
}

fn breach_depth(distance_near: f32, distance_far: f32, road_width: f32) -> Option<f32> {
    if distance_near < RAIL_CONTACT_TOLERANCE_M {
        Some(RAIL_CONTACT_TOLERANCE_M - distance_near)
    } else if distance_far > road_width {
        Some(distance_far - road_width + RAIL_CONTACT_TOLERANCE_M)
    } else {
        None
    }
}

/// Signed yaw that would align the car's heading with the wall, so the
/// rotation debt steers it into a slide along the rail instead of a re-hit.
fn slide_correction(state: &VehicleState, rail_direction: Vec3) -> f32 {
    let mut along = rail_direction;
    if along.dot(state.forward) < 0.0 {
        along = -along;
    }
    let sin = state.forward.cross(along).dot(state.up);
    let cos = state.forward.dot(along);
    sin.atan2(cos)
}

fn point_segment_distance(point: Vec3, segment: (Vec3, Vec3)) -> f32 {
    let span = segment.1 - segment.0;
    let t = ((point - segment.0).dot(span) / span.length_squared().max(f32::EPSILON))
        .clamp(0.0, 1.0);
    point.distance(segment.0 + span * t)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK_S: f32 = 1.0 / 60.0;
    const ROAD_WIDTH: f32 = 14.0;

    /// Straight stretch of road running along +Z with rails at x = ±7.
    fn straight_snapshot() -> TrackBoundarySnapshot {
        TrackBoundarySnapshot {
            ground_point: Vec3::ZERO,
            ground_normal: Vec3::Y,
            left_rail: (Vec3::new(-7.0, 0.0, -50.0), Vec3::new(-7.0, 0.0, 50.0)),
            right_rail: (Vec3::new(7.0, 0.0, -50.0), Vec3::new(7.0, 0.0, 50.0)),
            road_width: ROAD_WIDTH,
        }
    }

    fn state_heading(position: Vec3, forward: Vec3) -> VehicleState {
        let mut state = VehicleState::at_start(Mat4::IDENTITY);
        state.position = position;
        state.forward = forward.normalize();
        state.up = Vec3::Y;
        state
    }

    fn no_violation(state: &VehicleState, snapshot: &TrackBoundarySnapshot) -> bool {
        corner_points(state).iter().all(|(corner, _)| {
            let left = point_segment_distance(*corner, snapshot.left_rail);
            let right = point_segment_distance(*corner, snapshot.right_rail);
            left >= RAIL_CONTACT_TOLERANCE_M
                && right >= RAIL_CONTACT_TOLERANCE_M
                && left <= snapshot.road_width
                && right <= snapshot.road_width
        })
    }

    #[test]
    fn clear_road_reports_no_contact() {
        let snapshot = straight_snapshot();
        let mut state = state_heading(Vec3::ZERO, Vec3::Z);
        state.speed = 3.0;

        assert!(resolve_rail_contact(&mut state, &snapshot, TICK_S).is_none());
        assert_eq!(state.speed, 3.0);
    }

    #[test]
    fn corrected_position_passes_a_retest() {
        let snapshot = straight_snapshot();
        // Nose angled into the right rail with a corner past the tolerance.
        let mut state = state_heading(Vec3::new(6.1, 0.0, 0.0), Vec3::Z);
        state.speed = 3.0;

        let feedback =
            resolve_rail_contact(&mut state, &snapshot, TICK_S).expect("contact expected");
        assert!(feedback.shake > 0.0);
        assert!(no_violation(&state, &snapshot), "retest must come back clean");
    }

    #[test]
    fn shallow_hit_scrubs_speed_and_pulls_zoom() {
        let snapshot = straight_snapshot();
        // Heading nearly parallel to the rail: lateral axis almost aligned
        // with the collision normal is the steep case, so a grazing pass has
        // the nose pointed along the road.
        let mut state = state_heading(Vec3::new(6.2, 0.0, 0.0), Vec3::Z);
        state.speed = 3.0;

        let feedback =
            resolve_rail_contact(&mut state, &snapshot, TICK_S).expect("contact expected");
        // Lateral axis (≈ -X after heading +Z… sign depends on handedness)
        // is close to the rail normal, which folds to a steep incidence.
        if feedback.incidence_deg < SHALLOW_IMPACT_MAX_DEG {
            assert!(state.speed > 0.0);
            assert!(state.speed < 3.0);
            assert!(state.zoom_distance < ZOOM_DISTANCE_DEFAULT);
        } else {
            assert_eq!(state.speed, 0.0);
        }
        assert_eq!(state.force, Vec3::ZERO);
    }

    #[test]
    fn head_on_hit_zeroes_speed_and_force() {
        let snapshot = straight_snapshot();
        // Driving straight at the right rail: lateral axis parallel to the
        // rail, i.e. perpendicular to the collision normal → folded 90°.
        let mut state = state_heading(Vec3::new(5.2, 0.0, 0.0), Vec3::X);
        state.speed = 4.0;
        state.force = Vec3::X * 100.0;

        let feedback =
            resolve_rail_contact(&mut state, &snapshot, TICK_S).expect("contact expected");
        assert!(feedback.incidence_deg >= SHALLOW_IMPACT_MAX_DEG);
        assert_eq!(state.speed, 0.0);
        assert_eq!(state.force, Vec3::ZERO);
        assert!(no_violation(&state, &snapshot));
    }

    #[test]
    fn crossing_past_the_far_rail_is_pushed_back_inside() {
        let snapshot = straight_snapshot();
        // Entirely outside the right rail: the distance to the left rail
        // exceeds the road width.
        let mut state = state_heading(Vec3::new(9.5, 0.0, 0.0), Vec3::Z);
        state.speed = 2.0;

        resolve_rail_contact(&mut state, &snapshot, TICK_S).expect("contact expected");
        assert!(state.position.x < 7.0);
        assert!(no_violation(&state, &snapshot));
    }

    #[test]
    fn ground_projection_seats_car_on_plane() {
        let snapshot = straight_snapshot();
        let mut state = state_heading(Vec3::new(0.0, 3.4, 0.0), Vec3::Z);
        state.grounded = false;

        project_to_ground(&mut state, &snapshot);

        assert!(state.position.y.abs() < 1e-5);
        assert!(state.grounded);
        assert!((state.up - Vec3::Y).length() < 1e-5);
        assert!(state.forward.dot(state.up).abs() < 1e-5);
    }

    #[test]
    fn front_corner_hits_scrub_more_speed_than_rear() {
        assert!(FRONT_CORNER_SPEED_KEEP < REAR_CORNER_SPEED_KEEP);
        assert!(FRONT_ROTATION_DIVISOR < REAR_ROTATION_DIVISOR);
    }
}

//! Stand-in for the external input collaborator: a small line-following
//! pilot that writes the `ControlState` contract so the headless app can
//! drive full races end to end. A real input device layer replaces this
//! wholesale.

use bevy::prelude::*;

use crate::gameplay::race::RaceState;
use crate::gameplay::track::TrackLayout;
use crate::gameplay::vehicle::{ControlState, PlayerVehicle, VehicleState};

const LOOKAHEAD_SEGMENTS: usize = 4;
const STEER_GAIN: f32 = 1.4;
const BRAKE_HEADING_ERROR_RAD: f32 = 0.55;
const BRAKE_MIN_SPEED: f32 = 1.6;

pub(super) fn drive_autopilot(
    track: Res<TrackLayout>,
    race: Res<RaceState>,
    mut controls: ResMut<ControlState>,
    player_query: Query<&VehicleState, With<PlayerVehicle>>,
) {
    let Ok(state) = player_query.single() else {
        return;
    };

    let target = track
        .segment(race.location.segment + LOOKAHEAD_SEGMENTS)
        .center;
    let Some(to_target) = (target - state.position).try_normalize() else {
        return;
    };

    // Signed heading error around up: positive means the target is to the
    // left, which a negative steer value (turn left) corrects.
    let heading_error = state
        .forward
        .cross(to_target)
        .dot(state.up)
        .atan2(state.forward.dot(to_target));

    controls.steer = (-heading_error * STEER_GAIN).clamp(-1.0, 1.0);
    let needs_braking =
        heading_error.abs() > BRAKE_HEADING_ERROR_RAD && state.speed > BRAKE_MIN_SPEED;
    controls.accelerate = if needs_braking { 0.0 } else { 1.0 };
    controls.brake = if needs_braking { 0.6 } else { 0.0 };
    controls.accelerate_pressed = controls.accelerate > 0.0;
    controls.brake_pressed = controls.brake > 0.0;
}

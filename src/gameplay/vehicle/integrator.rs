//! Converts per-tick control signals into force, speed and position updates.
//!
//! All rate-based updates are scaled by the move factor: the elapsed time in
//! seconds, clamped defensively so a stalled or degenerate frame can never
//! produce NaN or teleport the car.

use bevy::prelude::*;

use super::*;

/// Control signals already resolved for this tick (zeroed while the race
/// blocks control).
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlSample {
    pub steer: f32,
    pub accelerate: f32,
    pub brake: f32,
}

impl ControlSample {
    pub fn from_controls(controls: &ControlState) -> Self {
        // Digital inputs saturate their axis so keyboards and analog
        // triggers drive the same code path.
        let accelerate = if controls.accelerate_pressed {
            1.0
        } else {
            controls.accelerate
        };
        let brake = if controls.brake_pressed {
            1.0
        } else {
            controls.brake
        };
        Self {
            steer: controls.steer.clamp(-1.0, 1.0),
            accelerate: accelerate.clamp(0.0, 1.0),
            brake: brake.clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TickOutput {
    pub speed_delta: f32,
    /// Set when the per-tick slowdown crossed the skid threshold while
    /// grounded and inside the audible speed window.
    pub brake_mark_strength: Option<f32>,
}

pub fn integrate_tick(
    state: &mut VehicleState,
    tuning: &VehicleTuning,
    controls: ControlSample,
    elapsed_s: f32,
) -> TickOutput {
    let dt = elapsed_s.clamp(MOVE_FACTOR_MIN_S, MOVE_FACTOR_MAX_S);
    let entry_speed = state.speed;

    apply_steering(state, &controls, dt);
    apply_engine_and_friction(state, tuning, &controls, dt);
    apply_brake_slowdown(state, &controls, dt);
    state.speed = state.speed.clamp(-tuning.max_speed, tuning.max_speed);

    state.position += state.forward * (state.speed * POSITION_SCALE * dt);

    let speed_delta = state.speed - entry_speed;
    update_pitch_spring(state, speed_delta, dt);
    state.wheel_phase += dt * state.speed / WHEEL_SPIN_DIVISOR;
    state.zoom_distance = move_towards(
        state.zoom_distance,
        ZOOM_DISTANCE_DEFAULT,
        ZOOM_RECOVERY_PER_S * dt,
    );

    let decel_per_s = -speed_delta / dt;
    let speed_abs = state.speed.abs();
    let brake_mark_strength = (state.grounded
        && decel_per_s > BRAKE_MARK_DECEL_PER_S
        && (BRAKE_MARK_MIN_SPEED..BRAKE_MARK_MAX_SPEED).contains(&speed_abs))
    .then(|| (decel_per_s / BRAKE_MARK_DECEL_PER_S).min(4.0));

    TickOutput {
        speed_delta,
        brake_mark_strength,
    }
}

fn apply_steering(state: &mut VehicleState, controls: &ControlSample, dt: f32) {
    // The smoothed accumulator decays before new input lands, giving the
    // steering its inertial feel.
    state.rotation_change *= ROTATION_SMOOTHING_DECAY;

    // Collision rotation debt drains at a capped rate ahead of ordinary
    // steering so a wall hit cannot snap the nose around in one tick.
    let drain_cap = COLLISION_ROTATION_DRAIN_RAD_PER_S * dt;
    let drained = state.rotation_debt.clamp(-drain_cap, drain_cap);
    state.rotation_debt -= drained;

    let speed_abs = state.speed.abs();
    let steer_scale = if speed_abs < STEER_SPEED_THRESHOLD {
        STEER_MIN_SCALE + (1.0 - STEER_MIN_SCALE) * (speed_abs / STEER_SPEED_THRESHOLD)
    } else {
        1.0 + (speed_abs - STEER_SPEED_THRESHOLD) * STEER_HIGH_SPEED_GAIN
    };
    state.rotation_change += -controls.steer * STEER_RATE_RAD_PER_S * steer_scale * dt;

    let raw_rotation = (drained + state.rotation_change)
        .clamp(-MAX_ROTATION_RAD_PER_S * dt, MAX_ROTATION_RAD_PER_S * dt);

    // Secondary exponential smoothing: blend the raw change into a running
    // virtual rotation so the applied angle never jumps visibly.
    let blend = (dt / VIRTUAL_ROTATION_BLEND_S).clamp(0.0, 1.0);
    state.virtual_rotation += (raw_rotation - state.virtual_rotation) * blend;

    if state.virtual_rotation.abs() > f32::EPSILON {
        let rotation = Quat::from_axis_angle(state.up, state.virtual_rotation);
        state.forward = (rotation * state.forward).normalize_or_zero();
    }
}

fn apply_engine_and_friction(
    state: &mut VehicleState,
    tuning: &VehicleTuning,
    controls: &ControlSample,
    dt: f32,
) {
    // Asymmetric limits: reverse/braking force is weaker than forward drive.
    let engine_force =
        controls.accelerate * tuning.max_engine_force - controls.brake * tuning.max_brake_force;
    if state.grounded {
        state.force += state.forward * (engine_force * dt);
    }

    let force_magnitude = state.force.length();
    if force_magnitude > f32::EPSILON {
        let projection = (state.force / force_magnitude).dot(state.forward).min(1.0);
        state.speed += (force_magnitude / tuning.mass) * projection * dt;
    }

    let aero = (AERO_FRICTION_PER_SPEED * state.speed.abs()).min(AERO_FRICTION_MAX);
    let rolling = if state.grounded {
        GROUND_FRICTION_PER_TICK
    } else {
        1.0
    };
    let friction = rolling * (1.0 - aero);
    state.force *= friction;

    let friction_delta = (state.speed * friction - state.speed).clamp(
        -FRICTION_SPEED_DELTA_CLAMP,
        FRICTION_SPEED_DELTA_CLAMP,
    );
    state.speed += friction_delta;
}

fn apply_brake_slowdown(state: &mut VehicleState, controls: &ControlSample, dt: f32) {
    let mut slowdown = BRAKE_SLOWDOWN_PER_S * dt;
    if controls.brake > 0.0 {
        slowdown *= controls.brake;
    } else if controls.accelerate <= 0.0 {
        slowdown *= COAST_SLOWDOWN_FACTOR;
    } else {
        return;
    }
    if state.speed < 0.0 {
        slowdown *= REVERSE_SLOWDOWN_FACTOR;
    }

    let before = state.speed;
    let target = move_towards(before, 0.0, slowdown);
    let delta_cap = MAX_SPEED_DELTA_PER_S * dt;
    state.speed = before + (target - before).clamp(-delta_cap, delta_cap);
}

fn update_pitch_spring(state: &mut VehicleState, speed_delta: f32, dt: f32) {
    // Cosmetic only: a damped spring tracking speed change drives the visual
    // pitch, the authoritative simulation never reads it back.
    let spring_force = -PITCH_SPRING_STIFFNESS * state.pitch
        - PITCH_SPRING_DAMPING * state.pitch_velocity
        + (speed_delta / dt) * PITCH_SPRING_IMPULSE_GAIN;
    state.pitch_velocity += (spring_force / PITCH_SPRING_MASS) * dt;
    state.pitch += state.pitch_velocity * dt;
}

pub(crate) fn move_towards(current: f32, target: f32, max_delta: f32) -> f32 {
    if (target - current).abs() <= max_delta {
        target
    } else {
        current + (target - current).signum() * max_delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK_S: f32 = 1.0 / 60.0;

    fn test_tuning() -> VehicleTuning {
        VehicleTuning {
            id: "roadster".to_string(),
            max_speed: 4.5,
            mass: 120.0,
            max_engine_force: 440.0,
            max_brake_force: 250.0,
        }
    }

    fn resting_state() -> VehicleState {
        VehicleState::at_start(Mat4::IDENTITY)
    }

    fn full_throttle() -> ControlSample {
        ControlSample {
            steer: 0.0,
            accelerate: 1.0,
            brake: 0.0,
        }
    }

    #[test]
    fn speed_never_exceeds_max_speed() {
        let tuning = test_tuning();
        let mut state = resting_state();
        // Absurd force injected directly; the clamp must still hold.
        state.force = Vec3::Z * 1.0e6;

        for _ in 0..600 {
            integrate_tick(&mut state, &tuning, full_throttle(), TICK_S);
            assert!(state.speed.abs() <= tuning.max_speed + 1e-4);
        }
    }

    #[test]
    fn speed_clamp_holds_for_degenerate_frame_times() {
        let tuning = test_tuning();
        let mut state = resting_state();
        state.force = Vec3::Z * 1.0e5;

        for elapsed in [0.0, -1.0, 5.0, f32::MAX] {
            integrate_tick(&mut state, &tuning, full_throttle(), elapsed);
            assert!(state.speed.is_finite());
            assert!(state.speed.abs() <= tuning.max_speed + 1e-4);
            assert!(state.position.is_finite());
        }
    }

    #[test]
    fn coasting_speed_magnitude_is_non_increasing() {
        let tuning = test_tuning();
        let mut state = resting_state();
        state.speed = 3.0;

        let mut previous = state.speed.abs();
        for _ in 0..300 {
            integrate_tick(&mut state, &tuning, ControlSample::default(), TICK_S);
            let magnitude = state.speed.abs();
            assert!(magnitude <= previous + 1e-6);
            previous = magnitude;
        }
        assert!(state.speed < 3.0);
    }

    #[test]
    fn straight_acceleration_stays_below_frictionless_bound() {
        let tuning = test_tuning();
        let mut state = resting_state();

        let ticks = 120; // two seconds at 60 Hz
        for _ in 0..ticks {
            integrate_tick(&mut state, &tuning, full_throttle(), TICK_S);
        }

        // Frictionless accumulation: force grows linearly each tick, so the
        // speed bound is the triangular sum of the per-tick contributions.
        let n = ticks as f32;
        let frictionless = tuning.max_engine_force * TICK_S * TICK_S * n * (n + 1.0)
            / (2.0 * tuning.mass);
        assert!(state.speed > 0.5, "car should be well underway");
        assert!(state.speed < frictionless);
        assert!(state.speed <= tuning.max_speed);
    }

    #[test]
    fn position_advances_along_forward() {
        let tuning = test_tuning();
        let mut state = resting_state();
        state.speed = 2.0;

        let start = state.position;
        integrate_tick(&mut state, &tuning, ControlSample::default(), TICK_S);

        let moved = state.position - start;
        assert!(moved.dot(state.forward) > 0.0);
        assert!(moved.length() > 0.0);
    }

    #[test]
    fn steering_rotates_forward_around_up() {
        let tuning = test_tuning();
        let mut state = resting_state();
        state.speed = 2.0;
        let initial_forward = state.forward;

        let steer_left = ControlSample {
            steer: -1.0,
            accelerate: 0.0,
            brake: 0.0,
        };
        for _ in 0..30 {
            integrate_tick(&mut state, &tuning, steer_left, TICK_S);
        }

        assert!((state.forward.length() - 1.0).abs() < 1e-4);
        assert!(state.forward.dot(initial_forward) < 0.999);
        // Rotation around up keeps the car in the ground plane.
        assert!(state.forward.dot(state.up).abs() < 1e-4);
    }

    #[test]
    fn collision_rotation_debt_drains_at_capped_rate() {
        let tuning = test_tuning();
        let mut state = resting_state();
        state.rotation_debt = 1.0;

        integrate_tick(&mut state, &tuning, ControlSample::default(), TICK_S);

        let expected_drain = COLLISION_ROTATION_DRAIN_RAD_PER_S * TICK_S;
        assert!((state.rotation_debt - (1.0 - expected_drain)).abs() < 1e-5);
    }

    #[test]
    fn brake_mark_fires_on_hard_slowdown_while_grounded() {
        let tuning = test_tuning();
        let mut state = resting_state();
        state.speed = 3.0;

        let braking = ControlSample {
            steer: 0.0,
            accelerate: 0.0,
            brake: 1.0,
        };
        let output = integrate_tick(&mut state, &tuning, braking, TICK_S);
        assert!(output.brake_mark_strength.is_some());

        // No mark while airborne even under the same slowdown.
        let mut airborne = resting_state();
        airborne.speed = 3.0;
        airborne.grounded = false;
        let output = integrate_tick(&mut airborne, &tuning, braking, TICK_S);
        assert!(output.brake_mark_strength.is_none());
    }

    #[test]
    fn pitch_spring_settles_back_to_rest() {
        let tuning = test_tuning();
        let mut state = resting_state();
        state.pitch = 0.2;

        for _ in 0..600 {
            integrate_tick(&mut state, &tuning, ControlSample::default(), TICK_S);
        }
        assert!(state.pitch.abs() < 1e-3);
        assert!(state.pitch_velocity.abs() < 1e-2);
    }
}

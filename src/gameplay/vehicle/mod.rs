pub mod collision;
pub mod integrator;

use bevy::prelude::*;

use crate::config::VehicleConfig;
use crate::gameplay::race::RaceState;
use crate::gameplay::track::{TrackLayout, TrackSurface};
use crate::states::GameState;

// Tuning constant table. These values are load-bearing for game feel; keep
// them here as named constants instead of re-deriving them inline.
pub(crate) const MOVE_FACTOR_MIN_S: f32 = 0.001;
pub(crate) const MOVE_FACTOR_MAX_S: f32 = 0.5;

pub(crate) const ROTATION_SMOOTHING_DECAY: f32 = 0.95;
pub(crate) const STEER_RATE_RAD_PER_S: f32 = 2.1;
pub(crate) const STEER_SPEED_THRESHOLD: f32 = 1.2;
pub(crate) const STEER_MIN_SCALE: f32 = 0.67;
pub(crate) const STEER_HIGH_SPEED_GAIN: f32 = 0.05;
pub(crate) const COLLISION_ROTATION_DRAIN_RAD_PER_S: f32 = 1.8;
pub(crate) const MAX_ROTATION_RAD_PER_S: f32 = 2.0;
pub(crate) const VIRTUAL_ROTATION_BLEND_S: f32 = 0.225;

pub(crate) const GROUND_FRICTION_PER_TICK: f32 = 0.99;
pub(crate) const AERO_FRICTION_PER_SPEED: f32 = 0.003;
pub(crate) const AERO_FRICTION_MAX: f32 = 0.02;
pub(crate) const FRICTION_SPEED_DELTA_CLAMP: f32 = 1.0;
pub(crate) const BRAKE_SLOWDOWN_PER_S: f32 = 3.2;
pub(crate) const COAST_SLOWDOWN_FACTOR: f32 = 0.5;
pub(crate) const REVERSE_SLOWDOWN_FACTOR: f32 = 0.6;
pub(crate) const MAX_SPEED_DELTA_PER_S: f32 = 100.0;

/// World metres travelled per speed unit per second.
pub(crate) const POSITION_SCALE: f32 = 24.0;
pub(crate) const WHEEL_SPIN_DIVISOR: f32 = 0.045;

pub(crate) const PITCH_SPRING_MASS: f32 = 1.0;
pub(crate) const PITCH_SPRING_STIFFNESS: f32 = 140.0;
pub(crate) const PITCH_SPRING_DAMPING: f32 = 10.5;
pub(crate) const PITCH_SPRING_IMPULSE_GAIN: f32 = 0.065;

pub(crate) const ZOOM_DISTANCE_DEFAULT: f32 = 1.0;
pub(crate) const ZOOM_RECOVERY_PER_S: f32 = 0.8;
pub(crate) const ZOOM_COLLISION_PULL: f32 = 0.12;

pub(crate) const BRAKE_MARK_DECEL_PER_S: f32 = 2.0;
pub(crate) const BRAKE_MARK_MIN_SPEED: f32 = 0.8;
pub(crate) const BRAKE_MARK_MAX_SPEED: f32 = 5.0;

pub(crate) const CAR_HALF_LENGTH_M: f32 = 2.1;
pub(crate) const CAR_HALF_WIDTH_M: f32 = 1.1;
pub(crate) const RAIL_CONTACT_TOLERANCE_M: f32 = 0.1;
pub(crate) const COLLISION_PUSH_EPSILON_M: f32 = 0.01;
pub(crate) const SHALLOW_IMPACT_MAX_DEG: f32 = 45.0;
pub(crate) const ROTATION_IMPACT_MAX_DEG: f32 = 60.0;
pub(crate) const FRONT_CORNER_SPEED_KEEP: f32 = 0.93;
pub(crate) const REAR_CORNER_SPEED_KEEP: f32 = 0.96;
pub(crate) const FRONT_ROTATION_DIVISOR: f32 = 6.0;
pub(crate) const REAR_ROTATION_DIVISOR: f32 = 10.0;
pub(crate) const STEEP_ROTATION_DIVISOR: f32 = 3.0;
pub(crate) const SHAKE_SHALLOW_PER_SPEED: f32 = 0.12;
pub(crate) const SHAKE_STEEP_PER_SPEED: f32 = 0.35;

pub struct VehicleGameplayPlugin;

impl Plugin for VehicleGameplayPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<ControlState>()
            .add_message::<BrakeMarkEvent>()
            .add_message::<CollisionFeedbackEvent>()
            .add_systems(OnExit(GameState::InRace), cleanup_player_vehicle);
    }
}

#[derive(Component)]
pub struct PlayerVehicle;

/// Input contract. An external device layer (or the built-in pilot) writes
/// the axes before each fixed tick; the simulation only reads them.
#[derive(Resource, Debug, Clone, Copy, Default)]
pub struct ControlState {
    /// Steering axis in [-1, 1], positive steers right.
    pub steer: f32,
    /// Throttle axis in [0, 1].
    pub accelerate: f32,
    /// Brake/reverse axis in [0, 1].
    pub brake: f32,
    pub accelerate_pressed: bool,
    pub brake_pressed: bool,
}

/// Vehicle tuning captured from config when the race session starts. The
/// live config may change between races; this snapshot never does.
#[derive(Resource, Debug, Clone)]
pub struct VehicleTuning {
    pub id: String,
    pub max_speed: f32,
    pub mass: f32,
    pub max_engine_force: f32,
    pub max_brake_force: f32,
}

impl VehicleTuning {
    pub fn from_config(config: &VehicleConfig) -> Self {
        Self {
            id: config.id.clone(),
            max_speed: config.max_speed,
            mass: config.mass,
            max_engine_force: config.max_engine_force,
            max_brake_force: config.max_brake_force,
        }
    }
}

#[derive(Component, Debug, Clone)]
pub struct VehicleState {
    pub position: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
    /// Signed scalar speed in speed units; world velocity is
    /// `forward * speed * POSITION_SCALE`.
    pub speed: f32,
    pub force: Vec3,
    pub wheel_phase: f32,
    pub zoom_distance: f32,
    pub grounded: bool,
    /// Rotation owed after a collision, drained at a capped rate before
    /// ordinary steering.
    pub rotation_debt: f32,
    pub rotation_change: f32,
    pub virtual_rotation: f32,
    pub pitch: f32,
    pub pitch_velocity: f32,
}

impl VehicleState {
    pub fn at_start(start: Mat4) -> Self {
        Self {
            position: start.w_axis.truncate(),
            forward: start.z_axis.truncate().normalize_or_zero(),
            up: start.y_axis.truncate().normalize_or_zero(),
            speed: 0.0,
            force: Vec3::ZERO,
            wheel_phase: 0.0,
            zoom_distance: ZOOM_DISTANCE_DEFAULT,
            grounded: true,
            rotation_debt: 0.0,
            rotation_change: 0.0,
            virtual_rotation: 0.0,
            pitch: 0.0,
            pitch_velocity: 0.0,
        }
    }

    pub fn right(&self) -> Vec3 {
        self.forward.cross(self.up).normalize_or_zero()
    }

    /// World transform used for replay samples and the render layer.
    pub fn transform(&self) -> Mat4 {
        Mat4::from_cols(
            self.right().extend(0.0),
            self.up.extend(0.0),
            self.forward.extend(0.0),
            self.position.extend(1.0),
        )
    }
}

/// Fired when the car scrubs off speed hard enough to leave a mark; an
/// external effects layer draws the skid and plays the brake sound.
#[derive(Message, Debug, Clone, Copy)]
pub struct BrakeMarkEvent {
    pub position: Vec3,
    pub strength: f32,
}

/// Fired on guardrail contact; the camera layer converts `shake` into screen
/// shake.
#[derive(Message, Debug, Clone, Copy)]
pub struct CollisionFeedbackEvent {
    pub position: Vec3,
    pub shake: f32,
}

pub(super) fn integrate_player_vehicle(
    time: Res<Time>,
    controls: Res<ControlState>,
    tuning: Res<VehicleTuning>,
    race: Res<RaceState>,
    mut brake_events: MessageWriter<BrakeMarkEvent>,
    mut player_query: Query<&mut VehicleState, With<PlayerVehicle>>,
) {
    let Ok(mut state) = player_query.single_mut() else {
        return;
    };

    let sample = if race.control_blocked() {
        integrator::ControlSample::default()
    } else {
        integrator::ControlSample::from_controls(&controls)
    };

    let output = integrator::integrate_tick(&mut state, &tuning, sample, time.delta_secs());

    if let Some(strength) = output.brake_mark_strength {
        brake_events.write(BrakeMarkEvent {
            position: state.position,
            strength,
        });
    }
}

pub(super) fn resolve_track_collision(
    time: Res<Time>,
    track: Res<TrackLayout>,
    race: Res<RaceState>,
    mut feedback_events: MessageWriter<CollisionFeedbackEvent>,
    mut player_query: Query<&mut VehicleState, With<PlayerVehicle>>,
) {
    let Ok(mut state) = player_query.single_mut() else {
        return;
    };

    let snapshot = track.boundary_snapshot(race.location);
    if let Some(feedback) = collision::resolve_rail_contact(&mut state, &snapshot, time.delta_secs())
    {
        debug!(
            "Rail contact at {:.0}° on a {} corner.",
            feedback.incidence_deg,
            if feedback.front_corner { "front" } else { "rear" }
        );
        feedback_events.write(CollisionFeedbackEvent {
            position: state.position,
            shake: feedback.shake,
        });
    }

    collision::project_to_ground(&mut state, &snapshot);
}

fn cleanup_player_vehicle(
    mut commands: Commands,
    player_query: Query<Entity, With<PlayerVehicle>>,
) {
    for entity in &player_query {
        commands.entity(entity).despawn();
    }
}

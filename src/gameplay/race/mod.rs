use bevy::prelude::*;

use crate::config::GameConfig;
use crate::gameplay::highscore::{HighscoreStore, JsonHighscoreStore};
use crate::gameplay::replay::{ActiveReplay, GhostState, Replay, ReplayRecorder};
use crate::gameplay::track::{TrackLayout, TrackLocation, TrackSurface, START_SEGMENT};
use crate::gameplay::vehicle::{PlayerVehicle, VehicleState, VehicleTuning};
use crate::states::GameState;

/// Countdown at race start during which control and timing are suspended
/// while the camera moves into position.
pub const ZOOM_IN_SECONDS: f32 = 3.0;
/// Elapsed time restarts here (not at zero) when a lap completes, so the
/// brief camera zoom can recur without blocking control again.
pub const ZOOM_IN_OFFSET_S: f32 = ZOOM_IN_SECONDS;
/// Straying this far from the track surface reference ends the race.
pub const DEFEAT_DISTANCE_M: f32 = 50.0;

pub struct RaceGameplayPlugin;

impl Plugin for RaceGameplayPlugin {
    fn build(&self, app: &mut App) {
        app.add_message::<CheckpointEvent>()
            .add_message::<LapCompletedEvent>()
            .add_message::<RaceFinishedEvent>()
            .add_systems(OnEnter(GameState::InRace), setup_race_session)
            .add_systems(OnExit(GameState::InRace), teardown_race_session);
    }
}

#[derive(Resource, Debug, Clone)]
pub struct RaceState {
    pub lap: u32,
    pub best_lap_time_s: Option<f32>,
    pub last_lap_time_s: Option<f32>,
    pub elapsed_s: f32,
    pub zoom_countdown_s: f32,
    pub victory: bool,
    pub game_over: bool,
    pub highscore_submitted: bool,
    /// Lap-relative crossing times for this lap, strictly increasing.
    pub checkpoint_times_s: Vec<f32>,
    pub location: TrackLocation,
}

impl RaceState {
    pub fn new(location: TrackLocation) -> Self {
        Self {
            lap: 0,
            best_lap_time_s: None,
            last_lap_time_s: None,
            elapsed_s: 0.0,
            zoom_countdown_s: ZOOM_IN_SECONDS,
            victory: false,
            game_over: false,
            highscore_submitted: false,
            checkpoint_times_s: Vec::new(),
            location,
        }
    }

    /// Control and timing are suspended while zooming in and after the race
    /// has ended.
    pub fn control_blocked(&self) -> bool {
        self.zoom_countdown_s > 0.0 || self.game_over
    }

    pub fn lap_time_s(&self) -> f32 {
        (self.elapsed_s - ZOOM_IN_OFFSET_S).max(0.0)
    }
}

#[derive(Message, Debug, Clone, Copy)]
pub struct CheckpointEvent {
    pub index: usize,
    pub lap_time_s: f32,
    /// Negative when ahead of the best replay at the same checkpoint.
    pub delta_vs_best_s: Option<f32>,
}

#[derive(Message, Debug, Clone, Copy)]
pub struct LapCompletedEvent {
    pub lap: u32,
    pub lap_time_s: f32,
    pub improved: bool,
}

#[derive(Message, Debug, Clone, Copy)]
pub struct RaceFinishedEvent {
    pub victory: bool,
}

/// Outcome of a segment change, resolved by the localizer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressEvent {
    Checkpoint { index: usize, lap_time_s: f32 },
    LapCompleted { lap_time_s: f32 },
}

pub(super) fn setup_race_session(
    mut commands: Commands,
    config: Res<GameConfig>,
    highscores: Res<JsonHighscoreStore>,
) {
    let Some(track_config) = config.default_track() else {
        error!("No default track configured; cannot start a race.");
        return;
    };
    let Some(vehicle_config) = config.default_vehicle() else {
        error!("No default vehicle configured; cannot start a race.");
        return;
    };

    let track = TrackLayout::build(track_config);
    let start = TrackLocation {
        segment: START_SEGMENT,
        percent: 0.0,
    };
    let (start_matrix, _, _) = track.position_matrix(start.segment, start.percent);

    let replay_path = Replay::file_path(&config.game.app.replay_dir, &track.id);
    let best = match Replay::load(&replay_path) {
        Ok(replay) => {
            info!(
                "Loaded ghost for `{}`: {:.3}s over {} samples.",
                track.id,
                replay.lap_time_s,
                replay.samples.len()
            );
            replay
        }
        Err(error) => {
            let top = highscores.top_lap_time(&track.id);
            warn!("No usable ghost for `{}` ({error}); generating a synthetic one.", track.id);
            Replay::synthetic(&track, top)
        }
    };

    let track_length = track.length;
    commands.spawn((PlayerVehicle, VehicleState::at_start(start_matrix)));
    commands.insert_resource(VehicleTuning::from_config(vehicle_config));
    commands.insert_resource(RaceState::new(start));
    commands.insert_resource(ActiveReplay::new(best));
    commands.insert_resource(ReplayRecorder::default());
    commands.insert_resource(GhostState::default());
    commands.insert_resource(track);

    info!(
        "Race session ready: track `{}` ({} segments, {:.0}m), vehicle `{}`.",
        track_config.id, track_config.segment_count, track_length, vehicle_config.id
    );
}

fn teardown_race_session(mut commands: Commands) {
    commands.remove_resource::<RaceState>();
    commands.remove_resource::<VehicleTuning>();
    commands.remove_resource::<TrackLayout>();
    commands.remove_resource::<ActiveReplay>();
    commands.remove_resource::<ReplayRecorder>();
    commands.remove_resource::<GhostState>();
}

/// TrackLocalizer: map the vehicle position to (segment, percent) by local
/// search and resolve checkpoint/lap-boundary crossings.
pub(super) fn localize_track_progress(
    track: Res<TrackLayout>,
    active_replay: Res<ActiveReplay>,
    mut race: ResMut<RaceState>,
    mut checkpoint_events: MessageWriter<CheckpointEvent>,
    mut lap_events: MessageWriter<LapCompletedEvent>,
    player_query: Query<&VehicleState, With<PlayerVehicle>>,
) {
    let Ok(state) = player_query.single() else {
        return;
    };

    let location = track.locate(state.position, race.location.segment);
    let Some(progress) = register_location(&mut race, &*track, location) else {
        return;
    };

    match progress {
        ProgressEvent::Checkpoint { index, lap_time_s } => {
            let delta_vs_best_s = active_replay
                .best
                .checkpoint_times_s
                .get(index)
                .map(|best| lap_time_s - best);
            match delta_vs_best_s {
                Some(delta) if delta <= 0.0 => {
                    info!("Checkpoint {index}: {lap_time_s:.3}s ({:.3}s ahead)", -delta)
                }
                Some(delta) => {
                    info!("Checkpoint {index}: {lap_time_s:.3}s ({delta:.3}s behind)")
                }
                None => info!("Checkpoint {index}: {lap_time_s:.3}s"),
            }
            checkpoint_events.write(CheckpointEvent {
                index,
                lap_time_s,
                delta_vs_best_s,
            });
        }
        ProgressEvent::LapCompleted { lap_time_s } => {
            let improved = race
                .best_lap_time_s
                .is_none_or(|best| lap_time_s < best);
            if improved {
                race.best_lap_time_s = Some(lap_time_s);
            }
            race.last_lap_time_s = Some(lap_time_s);
            race.lap += 1;
            race.elapsed_s = ZOOM_IN_OFFSET_S;
            race.checkpoint_times_s.clear();
            info!("Lap {} complete in {lap_time_s:.3}s.", race.lap);
            lap_events.write(LapCompletedEvent {
                lap: race.lap,
                lap_time_s,
                improved,
            });
        }
    }
}

/// Apply a localization result to the race bookkeeping. Returns the progress
/// event the segment change produced, if any.
pub fn register_location<T: TrackSurface>(
    race: &mut RaceState,
    track: &T,
    location: TrackLocation,
) -> Option<ProgressEvent> {
    let old_segment = race.location.segment;
    race.location = location;
    if location.segment == old_segment || race.control_blocked() {
        return None;
    }

    let checkpoints = track.checkpoint_segments();
    let lap_time_s = race.lap_time_s();

    // Start/finish crossing completes the lap as long as at most one
    // checkpoint was skipped; otherwise the crossing is ignored (wrong-way
    // or short-cut traffic does not score).
    if location.segment == START_SEGMENT && old_segment != START_SEGMENT {
        if race.checkpoint_times_s.len() + 1 >= checkpoints.len() {
            return Some(ProgressEvent::LapCompleted { lap_time_s });
        }
        return None;
    }

    // The car moves forward a few segments at most per tick; a lower index
    // that is not the start line means it is rolling backwards, which never
    // scores.
    if location.segment < old_segment {
        return None;
    }

    // Otherwise test whether the next expected checkpoint fell inside the
    // (old, new] segment window; a high-speed tick may jump a few segments.
    let next_index = race.checkpoint_times_s.len();
    let expected = *checkpoints.get(next_index)?;
    if old_segment < expected && expected <= location.segment {
        race.checkpoint_times_s.push(lap_time_s);
        return Some(ProgressEvent::Checkpoint {
            index: next_index,
            lap_time_s,
        });
    }

    None
}

/// LapTimer update: advance the zoom-in countdown or the race clock, then
/// resolve victory/defeat transitions.
pub(super) fn advance_race(
    time: Res<Time>,
    config: Res<GameConfig>,
    track: Res<TrackLayout>,
    mut race: ResMut<RaceState>,
    mut highscores: ResMut<JsonHighscoreStore>,
    mut finished_events: MessageWriter<RaceFinishedEvent>,
    player_query: Query<&VehicleState, With<PlayerVehicle>>,
) {
    if race.game_over {
        return;
    }

    let dt = time.delta_secs();
    if race.zoom_countdown_s > 0.0 {
        race.zoom_countdown_s -= dt;
        if race.zoom_countdown_s <= 0.0 {
            race.zoom_countdown_s = 0.0;
            race.elapsed_s = ZOOM_IN_OFFSET_S;
            info!("Zoom-in finished; race is on.");
        }
        return;
    }
    race.elapsed_s += dt;

    let Ok(state) = player_query.single() else {
        return;
    };

    let ground_reference = track.segment(race.location.segment).center;
    let distance = state.position.distance(ground_reference);
    let Some(victorious) = resolve_outcome(&mut race, distance, config.game.race.laps_to_win)
    else {
        return;
    };

    if take_highscore_submission(&mut race) {
        if let Some(best) = race.best_lap_time_s {
            let time_ms = (best * 1000.0).round() as u32;
            highscores.submit(&track.id, time_ms);
            info!(
                "Submitted {:.3}s on `{}`; rank {}.",
                best,
                track.id,
                highscores.rank_for(&track.id, time_ms)
            );
        }
    }

    if victorious {
        info!("Victory after {} laps.", race.lap);
    } else {
        info!("Defeat: left the track surface.");
    }
    finished_events.write(RaceFinishedEvent {
        victory: victorious,
    });
}

/// Transition to game-over when warranted. Returns `Some(victory)` only on
/// the tick the transition happens; the state is terminal afterwards.
pub fn resolve_outcome(
    race: &mut RaceState,
    distance_from_reference: f32,
    laps_to_win: u32,
) -> Option<bool> {
    if race.game_over {
        return None;
    }

    let defeated = distance_from_reference > DEFEAT_DISTANCE_M;
    let victorious = race.lap >= laps_to_win;
    if !defeated && !victorious {
        return None;
    }

    race.game_over = true;
    race.victory = victorious;
    Some(victorious)
}

/// Latched: the first caller after game-over gets to submit the highscore,
/// every later call (pause/quit re-entry) gets `false`.
pub fn take_highscore_submission(race: &mut RaceState) -> bool {
    if !race.game_over || race.highscore_submitted {
        return false;
    }
    race.highscore_submitted = true;
    true
}

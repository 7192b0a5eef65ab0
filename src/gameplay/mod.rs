pub mod feedback;
pub mod highscore;
pub mod pilot;
pub mod race;
pub mod replay;
pub mod track;
pub mod vehicle;

use bevy::prelude::*;

use crate::states::GameState;
use feedback::FeedbackGameplayPlugin;
use highscore::HighscorePlugin;
use race::{RaceGameplayPlugin, RaceState};
use vehicle::VehicleGameplayPlugin;

pub struct GameplayPlugin;

impl Plugin for GameplayPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugins(HighscorePlugin)
            .add_plugins(VehicleGameplayPlugin)
            .add_plugins(RaceGameplayPlugin)
            .add_plugins(FeedbackGameplayPlugin)
            // The simulation tick, strictly ordered: controls feed the
            // integrator, localization feeds the collision resolver and the
            // lap timer, and the replay store samples last.
            .add_systems(
                FixedUpdate,
                (
                    pilot::drive_autopilot,
                    vehicle::integrate_player_vehicle,
                    race::localize_track_progress,
                    vehicle::resolve_track_collision,
                    race::advance_race,
                    replay::finalize_completed_laps,
                    replay::record_replay,
                    replay::update_ghost,
                )
                    .chain()
                    .run_if(in_state(GameState::InRace))
                    .run_if(resource_exists::<RaceState>),
            );
    }
}

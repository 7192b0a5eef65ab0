use bevy::app::AppExit;
use bevy::prelude::*;

use crate::config::GameConfig;
use crate::gameplay::highscore::{HighscoreStore, JsonHighscoreStore};
use crate::gameplay::race::{RaceFinishedEvent, RaceState};
use crate::gameplay::track::TrackLayout;

#[derive(States, Debug, Clone, Copy, Eq, PartialEq, Hash, Default)]
pub enum GameState {
    #[default]
    Boot,
    Loading,
    InRace,
    Results,
}

pub struct GameStatePlugin;

impl Plugin for GameStatePlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<RunSummary>()
            .add_systems(OnEnter(GameState::Boot), enter_boot)
            .add_systems(Update, boot_to_loading.run_if(in_state(GameState::Boot)))
            .add_systems(OnEnter(GameState::Loading), enter_loading)
            .add_systems(
                Update,
                loading_to_in_race.run_if(in_state(GameState::Loading)),
            )
            .add_systems(OnEnter(GameState::InRace), enter_in_race)
            .add_systems(
                Update,
                (update_run_summary, finish_race_to_results)
                    .chain()
                    .run_if(in_state(GameState::InRace)),
            )
            .add_systems(OnEnter(GameState::Results), enter_results)
            .add_systems(Update, exit_after_results.run_if(in_state(GameState::Results)));
    }
}

/// Outcome of the current race session, filled while racing and reported on
/// the results screen.
#[derive(Resource, Debug, Clone, Default)]
pub struct RunSummary {
    pub laps: u32,
    pub best_lap_time_s: Option<f32>,
    pub last_lap_time_s: Option<f32>,
    pub victory: bool,
    pub rank: Option<usize>,
    pub finished: bool,
}

fn enter_boot() {
    info!("Entered state: Boot");
}

fn boot_to_loading(mut next_state: ResMut<NextState<GameState>>) {
    next_state.set(GameState::Loading);
}

fn enter_loading() {
    info!("Entered state: Loading");
}

fn loading_to_in_race(
    config: Option<Res<GameConfig>>,
    highscores: Option<Res<JsonHighscoreStore>>,
    mut next_state: ResMut<NextState<GameState>>,
) {
    // Startup systems populate both; wait until they exist.
    if config.is_some() && highscores.is_some() {
        next_state.set(GameState::InRace);
    }
}

fn enter_in_race(mut run_summary: ResMut<RunSummary>) {
    *run_summary = RunSummary::default();
    info!("Entered state: InRace");
}

fn update_run_summary(race: Option<Res<RaceState>>, mut run_summary: ResMut<RunSummary>) {
    let Some(race) = race else {
        return;
    };

    run_summary.laps = race.lap;
    run_summary.best_lap_time_s = race.best_lap_time_s;
    run_summary.last_lap_time_s = race.last_lap_time_s;
    run_summary.victory = race.victory;
}

fn finish_race_to_results(
    mut finished_events: MessageReader<RaceFinishedEvent>,
    highscores: Option<Res<JsonHighscoreStore>>,
    track: Option<Res<TrackLayout>>,
    mut run_summary: ResMut<RunSummary>,
    mut next_state: ResMut<NextState<GameState>>,
) {
    for event in finished_events.read() {
        run_summary.finished = true;
        run_summary.victory = event.victory;
        if let (Some(highscores), Some(track), Some(best)) =
            (&highscores, &track, run_summary.best_lap_time_s)
        {
            let time_ms = (best * 1000.0).round() as u32;
            run_summary.rank = Some(highscores.rank_for(&track.id, time_ms));
        }
        next_state.set(GameState::Results);
    }
}

fn enter_results(run_summary: Res<RunSummary>) {
    let title = if run_summary.victory {
        "VICTORY"
    } else {
        "DEFEAT"
    };
    let best = run_summary
        .best_lap_time_s
        .map(|t| format!("{t:.3}s"))
        .unwrap_or_else(|| "--".to_string());
    let last = run_summary
        .last_lap_time_s
        .map(|t| format!("{t:.3}s"))
        .unwrap_or_else(|| "--".to_string());
    let rank = run_summary
        .rank
        .map(|r| format!("#{r}"))
        .unwrap_or_else(|| "--".to_string());

    info!(
        "{title} | laps {} | best lap {best} | last lap {last} | rank {rank}",
        run_summary.laps
    );
    info!("Entered state: Results");
}

fn exit_after_results(mut exit: MessageWriter<AppExit>) {
    exit.write(AppExit::Success);
}

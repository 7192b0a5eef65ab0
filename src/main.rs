use std::time::Duration;

use bevy::app::ScheduleRunnerPlugin;
use bevy::log::LogPlugin;
use bevy::prelude::*;
use bevy::state::app::StatesPlugin;
use ghostlap::config::ConfigPlugin;
use ghostlap::gameplay::GameplayPlugin;
use ghostlap::states::{GameState, GameStatePlugin};

fn main() {
    // Headless shell: the simulation runs on the fixed-timestep schedule and
    // the renderer/audio/input layers attach through the resource contracts
    // in `gameplay`, so the app itself needs no window.
    App::new()
        .add_plugins(
            MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(Duration::from_secs_f64(
                1.0 / 240.0,
            ))),
        )
        .add_plugins(LogPlugin::default())
        .add_plugins(StatesPlugin)
        .add_plugins(ConfigPlugin)
        .add_plugins(GameplayPlugin)
        .init_state::<GameState>()
        .add_plugins(GameStatePlugin)
        .run();
}

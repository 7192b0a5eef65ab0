use bevy::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use crate::config::GameConfig;

/// Each level keeps its fastest lap times only.
const MAX_ENTRIES_PER_LEVEL: usize = 10;

/// Contract for lap-time leaderboards. The shipped implementation is a local
/// JSON file; a networked service would slot in behind the same trait.
pub trait HighscoreStore {
    fn submit(&mut self, level: &str, time_ms: u32);
    /// Fastest recorded lap for the level, in seconds.
    fn top_lap_time(&self, level: &str) -> Option<f32>;
    /// 1-based rank the given time would place at.
    fn rank_for(&self, level: &str, time_ms: u32) -> usize;
}

pub struct HighscorePlugin;

impl Plugin for HighscorePlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(
            Startup,
            setup_highscore_store.after(crate::config::load_game_config),
        );
    }
}

fn setup_highscore_store(mut commands: Commands, config: Res<GameConfig>) {
    let store = JsonHighscoreStore::load(PathBuf::from(&config.game.app.highscore_file));
    commands.insert_resource(store);
}

#[derive(Resource, Debug, Clone)]
pub struct JsonHighscoreStore {
    path: Option<PathBuf>,
    /// Sorted ascending lap times in milliseconds, per level id.
    table: HashMap<String, Vec<u32>>,
}

impl JsonHighscoreStore {
    /// Load the table from disk; a missing or unreadable file starts empty.
    pub fn load(path: PathBuf) -> Self {
        let table = match fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(table) => table,
                Err(error) => {
                    warn!(
                        "Highscore file `{}` is unreadable ({error}); starting fresh.",
                        path.display()
                    );
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        Self {
            path: Some(path),
            table,
        }
    }

    /// Table without a backing file; used by tests and previews.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            table: HashMap::new(),
        }
    }

    fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let serialized = match serde_json::to_string_pretty(&self.table) {
            Ok(serialized) => serialized,
            Err(error) => {
                warn!("Could not serialize highscores: {error}");
                return;
            }
        };
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Err(error) = fs::write(path, serialized) {
            warn!("Could not write `{}`: {error}", path.display());
        }
    }
}

impl HighscoreStore for JsonHighscoreStore {
    fn submit(&mut self, level: &str, time_ms: u32) {
        let times = self.table.entry(level.to_string()).or_default();
        let position = times.partition_point(|&existing| existing <= time_ms);
        times.insert(position, time_ms);
        times.truncate(MAX_ENTRIES_PER_LEVEL);
        self.persist();
    }

    fn top_lap_time(&self, level: &str) -> Option<f32> {
        self.table
            .get(level)
            .and_then(|times| times.first())
            .map(|&time_ms| time_ms as f32 / 1000.0)
    }

    fn rank_for(&self, level: &str, time_ms: u32) -> usize {
        let faster = self
            .table
            .get(level)
            .map(|times| times.partition_point(|&existing| existing < time_ms))
            .unwrap_or(0);
        faster + 1
    }
}

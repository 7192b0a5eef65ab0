use bevy::prelude::*;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_DIR: &str = "config";

pub struct ConfigPlugin;

impl Plugin for ConfigPlugin {
    fn build(&self, app: &mut App) {
        app.add_systems(Startup, load_game_config);
    }
}

pub(crate) fn load_game_config(mut commands: Commands) {
    let config = GameConfig::load_from_dir(Path::new(CONFIG_DIR)).unwrap_or_else(|error| {
        panic!("failed to load configuration from `{CONFIG_DIR}`: {error}");
    });

    info!(
        "Loaded config: {} vehicles, {} tracks, fixed timestep {} Hz.",
        config.vehicles_by_id.len(),
        config.tracks_by_id.len(),
        config.game.app.fixed_timestep_hz
    );

    commands.insert_resource(Time::<Fixed>::from_hz(config.game.app.fixed_timestep_hz as f64));
    commands.insert_resource(config);
}

#[derive(Resource, Debug, Clone)]
pub struct GameConfig {
    pub game: GameFile,
    pub vehicles: VehiclesFile,
    pub tracks: TracksFile,
    pub vehicles_by_id: HashMap<String, VehicleConfig>,
    pub tracks_by_id: HashMap<String, TrackConfig>,
}

impl GameConfig {
    pub fn load_from_dir(config_dir: &Path) -> Result<Self, ConfigError> {
        let game: GameFile = read_toml(&config_dir.join("game.toml"))?;
        let vehicles: VehiclesFile = read_toml(&config_dir.join("vehicles.toml"))?;
        let tracks: TracksFile = read_toml(&config_dir.join("tracks.toml"))?;

        let config = Self {
            vehicles_by_id: to_index("vehicles.toml::vehicles", &vehicles.vehicles)?,
            tracks_by_id: to_index("tracks.toml::tracks", &tracks.tracks)?,
            game,
            vehicles,
            tracks,
        };

        config.validate_references()?;
        Ok(config)
    }

    pub fn default_vehicle(&self) -> Option<&VehicleConfig> {
        self.vehicles_by_id.get(&self.game.app.default_vehicle)
    }

    pub fn default_track(&self) -> Option<&TrackConfig> {
        self.tracks_by_id.get(&self.game.app.default_track)
    }

    fn validate_references(&self) -> Result<(), ConfigError> {
        if self.game.app.fixed_timestep_hz <= 0.0 {
            return Err(ConfigError::Validation(
                "game.toml::app.fixed_timestep_hz must be > 0".to_string(),
            ));
        }

        if !self
            .vehicles_by_id
            .contains_key(&self.game.app.default_vehicle)
        {
            return Err(ConfigError::Validation(format!(
                "game.toml::app.default_vehicle references unknown vehicle id `{}`",
                self.game.app.default_vehicle
            )));
        }

        if !self.tracks_by_id.contains_key(&self.game.app.default_track) {
            return Err(ConfigError::Validation(format!(
                "game.toml::app.default_track references unknown track id `{}`",
                self.game.app.default_track
            )));
        }

        for (index, vehicle) in self.vehicles.vehicles.iter().enumerate() {
            if vehicle.max_speed <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "vehicles.toml::vehicles[{index}].max_speed must be > 0"
                )));
            }
            if vehicle.mass <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "vehicles.toml::vehicles[{index}].mass must be > 0"
                )));
            }
            if vehicle.max_engine_force <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "vehicles.toml::vehicles[{index}].max_engine_force must be > 0"
                )));
            }
            if vehicle.max_brake_force <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "vehicles.toml::vehicles[{index}].max_brake_force must be > 0"
                )));
            }
            if vehicle.max_brake_force >= vehicle.max_engine_force {
                return Err(ConfigError::Validation(format!(
                    "vehicles.toml::vehicles[{index}].max_brake_force must be below max_engine_force (reverse is weaker than forward)"
                )));
            }
        }

        for (index, track) in self.tracks.tracks.iter().enumerate() {
            if track.control_points.len() < 4 {
                return Err(ConfigError::Validation(format!(
                    "tracks.toml::tracks[{index}] needs at least 4 control points for a closed spline"
                )));
            }
            if track.segment_count < 8 {
                return Err(ConfigError::Validation(format!(
                    "tracks.toml::tracks[{index}].segment_count must be >= 8"
                )));
            }
            if track.road_width <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "tracks.toml::tracks[{index}].road_width must be > 0"
                )));
            }
            if track.checkpoints.is_empty() {
                return Err(ConfigError::Validation(format!(
                    "tracks.toml::tracks[{index}].checkpoints must name at least one segment"
                )));
            }
            let mut previous = 0usize;
            for (checkpoint_index, &segment) in track.checkpoints.iter().enumerate() {
                if segment == 0 || segment >= track.segment_count {
                    return Err(ConfigError::Validation(format!(
                        "tracks.toml::tracks[{index}].checkpoints[{checkpoint_index}] must lie in 1..segment_count (segment 0 is the start/finish line)"
                    )));
                }
                if checkpoint_index > 0 && segment <= previous {
                    return Err(ConfigError::Validation(format!(
                        "tracks.toml::tracks[{index}].checkpoints must be strictly ascending"
                    )));
                }
                previous = segment;
            }
        }

        Ok(())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: Box<toml::de::Error>,
    },
    Validation(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => {
                write!(f, "failed to read `{}`: {source}", path.display())
            }
            Self::Parse { path, source } => {
                write!(f, "failed to parse `{}`: {source}", path.display())
            }
            Self::Validation(message) => write!(f, "{message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Validation(_) => None,
        }
    }
}

fn read_toml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&raw).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source: Box::new(source),
    })
}

fn to_index<T>(label: &str, rows: &[T]) -> Result<HashMap<String, T>, ConfigError>
where
    T: HasId + Clone,
{
    let mut map = HashMap::new();

    for row in rows {
        let id = row.id();
        if id.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "{label} contains an empty id"
            )));
        }

        if map.insert(id.to_string(), row.clone()).is_some() {
            return Err(ConfigError::Validation(format!(
                "{label} contains duplicate id `{id}`"
            )));
        }
    }

    Ok(map)
}

trait HasId {
    fn id(&self) -> &str;
}

#[derive(Debug, Clone, Deserialize)]
pub struct GameFile {
    pub app: AppConfig,
    pub race: RaceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub fixed_timestep_hz: f32,
    pub default_vehicle: String,
    pub default_track: String,
    pub replay_dir: String,
    pub highscore_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RaceConfig {
    pub laps_to_win: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VehiclesFile {
    pub vehicles: Vec<VehicleConfig>,
}

/// Tuning selected on the (external) vehicle menu. Snapshotted into a
/// `VehicleTuning` resource when a race session starts; never read again
/// mid-race.
#[derive(Debug, Clone, Deserialize)]
pub struct VehicleConfig {
    pub id: String,
    pub max_speed: f32,
    pub mass: f32,
    pub max_engine_force: f32,
    pub max_brake_force: f32,
}

impl HasId for VehicleConfig {
    fn id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TracksFile {
    pub tracks: Vec<TrackConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackConfig {
    pub id: String,
    /// Control points of the closed centre-line B-spline, [x, y, z] each.
    pub control_points: Vec<[f32; 3]>,
    /// Number of discrete segments the spline is sampled into.
    pub segment_count: usize,
    pub road_width: f32,
    /// Segment indices at which lap progress is timed, strictly ascending,
    /// never segment 0 (the start/finish line).
    pub checkpoints: Vec<usize>,
}

impl HasId for TrackConfig {
    fn id(&self) -> &str {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_config() -> GameConfig {
        let vehicle = VehicleConfig {
            id: "roadster".to_string(),
            max_speed: 180.0,
            mass: 120.0,
            max_engine_force: 9000.0,
            max_brake_force: 5200.0,
        };
        let track = TrackConfig {
            id: "aurora_ring".to_string(),
            control_points: vec![
                [120.0, 0.0, 0.0],
                [0.0, 2.0, 120.0],
                [-120.0, 0.0, 0.0],
                [0.0, -2.0, -120.0],
            ],
            segment_count: 96,
            road_width: 14.0,
            checkpoints: vec![24, 48, 72],
        };

        GameConfig {
            game: GameFile {
                app: AppConfig {
                    fixed_timestep_hz: 60.0,
                    default_vehicle: "roadster".to_string(),
                    default_track: "aurora_ring".to_string(),
                    replay_dir: "replays".to_string(),
                    highscore_file: "highscores.json".to_string(),
                },
                race: RaceConfig { laps_to_win: 3 },
            },
            vehicles_by_id: HashMap::from([("roadster".to_string(), vehicle.clone())]),
            tracks_by_id: HashMap::from([("aurora_ring".to_string(), track.clone())]),
            vehicles: VehiclesFile {
                vehicles: vec![vehicle],
            },
            tracks: TracksFile {
                tracks: vec![track],
            },
        }
    }

    #[test]
    fn validation_accepts_minimal_config() {
        assert!(minimal_config().validate_references().is_ok());
    }

    #[test]
    fn validation_fails_for_missing_vehicle_reference() {
        let mut config = minimal_config();
        config.game.app.default_vehicle = "missing_car".to_string();

        let error = config
            .validate_references()
            .expect_err("validation should fail");
        let message = error.to_string();

        assert!(message.contains("default_vehicle"));
        assert!(message.contains("missing_car"));
    }

    #[test]
    fn validation_rejects_checkpoint_on_start_line() {
        let mut config = minimal_config();
        config.tracks.tracks[0].checkpoints = vec![0, 48];

        let error = config
            .validate_references()
            .expect_err("validation should fail");
        assert!(error.to_string().contains("start/finish"));
    }

    #[test]
    fn validation_rejects_unsorted_checkpoints() {
        let mut config = minimal_config();
        config.tracks.tracks[0].checkpoints = vec![48, 24];

        let error = config
            .validate_references()
            .expect_err("validation should fail");
        assert!(error.to_string().contains("ascending"));
    }

    #[test]
    fn validation_requires_forward_force_above_brake_force() {
        let mut config = minimal_config();
        config.vehicles.vehicles[0].max_brake_force = 9500.0;

        let error = config
            .validate_references()
            .expect_err("validation should fail");
        assert!(error.to_string().contains("max_brake_force"));
    }
}

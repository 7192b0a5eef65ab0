//! Ghost replay recording, playback, synthetic generation and persistence.
//!
//! File layout (all little-endian):
//!   0x00: f32  lap time in seconds
//!   0x04: i32  sample count
//!   ....: sample count × 16 f32, row-major 4×4 transforms
//!   ....: i32  checkpoint count
//!   ....: checkpoint count × f32, elapsed seconds per checkpoint

use bevy::prelude::*;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::gameplay::race::{CheckpointEvent, LapCompletedEvent, RaceState};
use crate::gameplay::track::{TrackLayout, TrackSurface};
use crate::gameplay::vehicle::{PlayerVehicle, VehicleState};
/// Fixed sampling interval of race time between ghost transforms.
pub const SAMPLE_INTERVAL_S: f32 = 0.2;
/// Damping applied to the synthetic generator's parameter walk.
const SYNTHETIC_SMOOTHING: f32 = 0.1;
/// Assumed lap time for a synthetic ghost when no highscore exists yet.
const SYNTHETIC_FALLBACK_LAP_S: f32 = 60.0;

const REPLAY_FILE_EXTENSION: &str = "ghost";
const TRANSFORM_FLOATS: usize = 16;

/// A complete recorded (or synthesized) lap: the ordered transform samples,
/// the lap time, and the checkpoint crossing times.
#[derive(Debug, Clone, PartialEq)]
pub struct Replay {
    pub lap_time_s: f32,
    pub samples: Vec<Mat4>,
    pub checkpoint_times_s: Vec<f32>,
}

/// The best replay for the current track. The race loop replaces the `Arc`
/// wholesale on improvement so an idle reader (menu preview) never observes
/// a half-written ghost.
#[derive(Resource, Debug, Clone)]
pub struct ActiveReplay {
    pub best: Arc<Replay>,
}

impl ActiveReplay {
    pub fn new(replay: Replay) -> Self {
        Self {
            best: Arc::new(replay),
        }
    }
}

/// Append-only recorder for the lap currently being driven.
#[derive(Resource, Debug, Clone, Default)]
pub struct ReplayRecorder {
    pub samples: Vec<Mat4>,
    pub checkpoint_times_s: Vec<f32>,
}

/// Playback cursor consumed by the render layer for the ghost car.
#[derive(Resource, Debug, Clone)]
pub struct GhostState {
    pub transform: Mat4,
}

impl Default for GhostState {
    fn default() -> Self {
        Self {
            transform: Mat4::IDENTITY,
        }
    }
}

impl Replay {
    pub fn file_path(replay_dir: &str, track_id: &str) -> PathBuf {
        Path::new(replay_dir).join(format!("{track_id}.{REPLAY_FILE_EXTENSION}"))
    }

    /// Playback by time-based interpolation.
    ///
    /// Past the final sample pair this returns the FIRST sample again. That
    /// mirrors the shipped game and the ghost's on-screen behavior depends
    /// on it, so it stays even though holding the last sample would look
    /// more obvious.
    pub fn sample_at(&self, t: f32) -> Mat4 {
        let Some(first) = self.samples.first() else {
            return Mat4::IDENTITY;
        };
        if t <= 0.0 {
            return *first;
        }

        let index = (t / SAMPLE_INTERVAL_S) as usize;
        if index + 2 > self.samples.len() {
            return *first;
        }

        let fraction = (t - index as f32 * SAMPLE_INTERVAL_S) / SAMPLE_INTERVAL_S;
        let fraction = fraction.clamp(0.0, 1.0);
        self.samples[index] * (1.0 - fraction) + self.samples[index + 1] * fraction
    }

    /// Build a stand-in ghost by walking the track's centre line, for tracks
    /// without a saved replay. The damped parameter walk keeps the synthetic
    /// motion from snapping between samples; checkpoint times are back-filled
    /// proportionally to track progress.
    pub fn synthetic(track: &TrackLayout, top_lap_time_s: Option<f32>) -> Self {
        let lap_time_s = top_lap_time_s
            .unwrap_or(SYNTHETIC_FALLBACK_LAP_S)
            .max(SAMPLE_INTERVAL_S * 2.0);
        let count = (lap_time_s / SAMPLE_INTERVAL_S).ceil() as usize + 1;

        let mut samples = Vec::with_capacity(count);
        let mut smoothed = 0.0_f32;
        for i in 0..count {
            let raw = i as f32 / (count - 1) as f32;
            smoothed += (raw - smoothed) * SYNTHETIC_SMOOTHING;
            samples.push(track.position_at_parameter(smoothed));
        }

        let segment_count = track.segment_count() as f32;
        let checkpoint_times_s = track
            .checkpoint_segments()
            .iter()
            .map(|&segment| (segment as f32 / segment_count) * lap_time_s)
            .chain(std::iter::once(lap_time_s))
            .collect();

        Self {
            lap_time_s,
            samples,
            checkpoint_times_s,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(
            8 + self.samples.len() * TRANSFORM_FLOATS * 4 + 4 + self.checkpoint_times_s.len() * 4,
        );
        bytes.extend_from_slice(&self.lap_time_s.to_le_bytes());
        bytes.extend_from_slice(&(self.samples.len() as i32).to_le_bytes());
        for sample in &self.samples {
            let columns = sample.to_cols_array();
            for row in 0..4 {
                for column in 0..4 {
                    bytes.extend_from_slice(&columns[column * 4 + row].to_le_bytes());
                }
            }
        }
        bytes.extend_from_slice(&(self.checkpoint_times_s.len() as i32).to_le_bytes());
        for time in &self.checkpoint_times_s {
            bytes.extend_from_slice(&time.to_le_bytes());
        }
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ReplayFileError> {
        let mut reader = ByteReader::new(bytes);

        let lap_time_s = reader.read_f32()?;
        if !lap_time_s.is_finite() || lap_time_s < 0.0 {
            return Err(ReplayFileError::Malformed("negative or non-finite lap time"));
        }

        let sample_count = reader.read_count()?;
        let mut samples = Vec::with_capacity(sample_count);
        for _ in 0..sample_count {
            let mut columns = [0.0_f32; TRANSFORM_FLOATS];
            for row in 0..4 {
                for column in 0..4 {
                    columns[column * 4 + row] = reader.read_f32()?;
                }
            }
            samples.push(Mat4::from_cols_array(&columns));
        }

        let checkpoint_count = reader.read_count()?;
        let mut checkpoint_times_s = Vec::with_capacity(checkpoint_count);
        for _ in 0..checkpoint_count {
            checkpoint_times_s.push(reader.read_f32()?);
        }

        Ok(Self {
            lap_time_s,
            samples,
            checkpoint_times_s,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ReplayFileError> {
        let bytes = fs::read(path).map_err(ReplayFileError::Io)?;
        Self::decode(&bytes)
    }

    pub fn save(&self, path: &Path) -> Result<(), ReplayFileError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(ReplayFileError::Io)?;
        }
        fs::write(path, self.encode()).map_err(ReplayFileError::Io)
    }
}

#[derive(Debug)]
pub enum ReplayFileError {
    Io(std::io::Error),
    Truncated,
    Malformed(&'static str),
}

impl Display for ReplayFileError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(source) => write!(f, "replay file i/o failed: {source}"),
            Self::Truncated => write!(f, "replay file ended before the declared data"),
            Self::Malformed(reason) => write!(f, "replay file is malformed: {reason}"),
        }
    }
}

impl Error for ReplayFileError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(source) => Some(source),
            _ => None,
        }
    }
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn read_word(&mut self) -> Result<[u8; 4], ReplayFileError> {
        let end = self.offset + 4;
        let slice = self
            .bytes
            .get(self.offset..end)
            .ok_or(ReplayFileError::Truncated)?;
        self.offset = end;
        Ok([slice[0], slice[1], slice[2], slice[3]])
    }

    fn read_f32(&mut self) -> Result<f32, ReplayFileError> {
        Ok(f32::from_le_bytes(self.read_word()?))
    }

    fn read_count(&mut self) -> Result<usize, ReplayFileError> {
        let count = i32::from_le_bytes(self.read_word()?);
        if count < 0 {
            return Err(ReplayFileError::Malformed("negative element count"));
        }
        // A count the file cannot possibly back is corrupt length data.
        if count as usize > self.bytes.len() {
            return Err(ReplayFileError::Malformed("element count exceeds file size"));
        }
        Ok(count as usize)
    }
}

/// While racing, append a transform sample whenever the lap clock crosses a
/// multiple of the sampling interval, and collect checkpoint times.
pub(super) fn record_replay(
    race: Res<RaceState>,
    mut recorder: ResMut<ReplayRecorder>,
    mut checkpoint_events: MessageReader<CheckpointEvent>,
    player_query: Query<&VehicleState, With<PlayerVehicle>>,
) {
    if race.control_blocked() {
        return;
    }
    let Ok(state) = player_query.single() else {
        return;
    };

    for event in checkpoint_events.read() {
        recorder.checkpoint_times_s.push(event.lap_time_s);
    }

    let lap_time = race.lap_time_s();
    while recorder.samples.len() as f32 * SAMPLE_INTERVAL_S <= lap_time {
        recorder.samples.push(state.transform());
    }
}

/// On lap completion, publish the lap as the new best ghost when it is
/// strictly faster, then restart recording for the next lap. Persistence is
/// best-effort: a failed write costs the saved file, never the race.
pub(super) fn finalize_completed_laps(
    config: Res<crate::config::GameConfig>,
    track: Res<TrackLayout>,
    mut lap_events: MessageReader<LapCompletedEvent>,
    mut recorder: ResMut<ReplayRecorder>,
    mut active: ResMut<ActiveReplay>,
) {
    for event in lap_events.read() {
        let samples = std::mem::take(&mut recorder.samples);
        let mut checkpoint_times_s = std::mem::take(&mut recorder.checkpoint_times_s);

        if event.lap_time_s >= active.best.lap_time_s {
            continue;
        }

        checkpoint_times_s.push(event.lap_time_s);
        let replay = Replay {
            lap_time_s: event.lap_time_s,
            samples,
            checkpoint_times_s,
        };

        let path = Replay::file_path(&config.game.app.replay_dir, &track.id);
        if let Err(error) = replay.save(&path) {
            warn!("Could not save ghost to `{}`: {error}", path.display());
        }
        active.best = Arc::new(replay);
        info!("New best ghost: {:.3}s.", event.lap_time_s);
    }
}

/// Drive the ghost cursor from the best replay for the render layer.
pub(super) fn update_ghost(
    race: Res<RaceState>,
    active: Res<ActiveReplay>,
    mut ghost: ResMut<GhostState>,
) {
    ghost.transform = active.best.sample_at(race.lap_time_s());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gameplay::track::tests::ring_track;

    fn translation(x: f32, y: f32, z: f32) -> Mat4 {
        Mat4::from_translation(Vec3::new(x, y, z))
    }

    fn sample_replay() -> Replay {
        Replay {
            lap_time_s: 42.125,
            samples: (0..8)
                .map(|i| translation(i as f32, 0.5 * i as f32, -3.0 * i as f32))
                .collect(),
            checkpoint_times_s: vec![10.0, 20.5, 31.75, 42.125],
        }
    }

    #[test]
    fn encode_decode_round_trip_is_bit_exact() {
        let replay = sample_replay();
        let decoded = Replay::decode(&replay.encode()).expect("decode");

        assert_eq!(decoded.lap_time_s.to_bits(), replay.lap_time_s.to_bits());
        assert_eq!(decoded.samples.len(), replay.samples.len());
        for (a, b) in decoded.samples.iter().zip(&replay.samples) {
            for (x, y) in a.to_cols_array().iter().zip(b.to_cols_array().iter()) {
                assert_eq!(x.to_bits(), y.to_bits());
            }
        }
        assert_eq!(decoded.checkpoint_times_s, replay.checkpoint_times_s);
    }

    #[test]
    fn save_and_load_round_trip_through_a_file() {
        let replay = sample_replay();
        let path = std::env::temp_dir().join("ghostlap_roundtrip_test.ghost");

        replay.save(&path).expect("save");
        let loaded = Replay::load(&path).expect("load");
        let _ = fs::remove_file(&path);

        assert_eq!(loaded, replay);
    }

    #[test]
    fn truncated_and_corrupt_files_are_rejected() {
        let encoded = sample_replay().encode();

        assert!(matches!(
            Replay::decode(&encoded[..encoded.len() - 3]),
            Err(ReplayFileError::Truncated)
        ));
        assert!(matches!(
            Replay::decode(&encoded[..6]),
            Err(ReplayFileError::Truncated)
        ));

        let mut negative_count = encoded.clone();
        negative_count[4..8].copy_from_slice(&(-1_i32).to_le_bytes());
        assert!(matches!(
            Replay::decode(&negative_count),
            Err(ReplayFileError::Malformed(_))
        ));

        let mut absurd_count = encoded;
        absurd_count[4..8].copy_from_slice(&i32::MAX.to_le_bytes());
        assert!(matches!(
            Replay::decode(&absurd_count),
            Err(ReplayFileError::Malformed(_))
        ));
    }

    #[test]
    fn playback_interpolates_the_exact_midpoint() {
        let replay = Replay {
            lap_time_s: 1.0,
            samples: vec![
                translation(0.0, 0.0, 0.0),
                translation(10.0, 2.0, -6.0),
                translation(20.0, 4.0, -12.0),
            ],
            checkpoint_times_s: vec![],
        };

        let t = SAMPLE_INTERVAL_S * 0.5;
        let blended = replay.sample_at(t);
        let expected = replay.samples[0] * 0.5 + replay.samples[1] * 0.5;
        for (a, b) in blended
            .to_cols_array()
            .iter()
            .zip(expected.to_cols_array().iter())
        {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn playback_at_or_before_zero_returns_the_first_sample() {
        let replay = sample_replay();
        assert_eq!(replay.sample_at(0.0), replay.samples[0]);
        assert_eq!(replay.sample_at(-5.0), replay.samples[0]);
    }

    #[test]
    fn playback_past_the_final_pair_loops_to_the_first_sample() {
        let replay = sample_replay();
        let past_end = replay.samples.len() as f32 * SAMPLE_INTERVAL_S + 1.0;

        // Deliberate shipped behavior: the ghost snaps back to the start
        // rather than holding the final sample.
        assert_eq!(replay.sample_at(past_end), replay.samples[0]);
        let inside_last_interval =
            (replay.samples.len() - 1) as f32 * SAMPLE_INTERVAL_S + 0.05;
        assert_eq!(replay.sample_at(inside_last_interval), replay.samples[0]);
    }

    #[test]
    fn empty_replay_plays_back_identity() {
        let replay = Replay {
            lap_time_s: 0.0,
            samples: vec![],
            checkpoint_times_s: vec![],
        };
        assert_eq!(replay.sample_at(3.0), Mat4::IDENTITY);
    }

    #[test]
    fn synthetic_replay_is_monotone_and_fully_checkpointed() {
        let track = ring_track(64);
        let replay = Replay::synthetic(&track, Some(48.0));

        assert_eq!(replay.lap_time_s, 48.0);
        assert_eq!(
            replay.samples.len(),
            (48.0_f32 / SAMPLE_INTERVAL_S).ceil() as usize + 1
        );
        // One back-filled time per checkpoint plus the lap-finish entry.
        assert_eq!(
            replay.checkpoint_times_s.len(),
            track.checkpoints.len() + 1
        );
        assert!(replay
            .checkpoint_times_s
            .windows(2)
            .all(|pair| pair[0] < pair[1]));
        assert_eq!(*replay.checkpoint_times_s.last().unwrap(), 48.0);

        // The damped parameter walk must never move backwards.
        let mut previous = track.segments[0].center;
        let mut travelled = 0.0;
        for sample in &replay.samples {
            let position = sample.w_axis.truncate();
            travelled += (position - previous).length();
            previous = position;
        }
        assert!(travelled > 0.0);
    }

    #[test]
    fn synthetic_replay_uses_fallback_when_no_highscore_exists() {
        let track = ring_track(64);
        let replay = Replay::synthetic(&track, None);
        assert_eq!(replay.lap_time_s, SYNTHETIC_FALLBACK_LAP_S);
    }
}

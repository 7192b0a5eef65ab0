use bevy::prelude::*;

use crate::gameplay::vehicle::{BrakeMarkEvent, CollisionFeedbackEvent};
use crate::states::GameState;

const CAMERA_SHAKE_DECAY_PER_SECOND: f32 = 1.8;
const CAMERA_SHAKE_MAX: f32 = 1.5;
const SKID_MARK_QUEUE_CAP: usize = 256;

pub struct FeedbackGameplayPlugin;

impl Plugin for FeedbackGameplayPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<CameraShakeState>()
            .init_resource::<SkidMarkQueue>()
            .add_systems(OnEnter(GameState::InRace), reset_feedback_state)
            .add_systems(
                Update,
                (collect_feedback_events, decay_camera_shake)
                    .chain()
                    .run_if(in_state(GameState::InRace)),
            );
    }
}

/// Screen-shake intensity for the camera layer, fed by rail impacts and
/// decayed every frame.
#[derive(Resource, Debug, Clone, Copy, Default)]
pub struct CameraShakeState {
    pub trauma: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct SkidMark {
    pub position: Vec3,
    pub strength: f32,
}

/// Bounded queue of pending skid marks. The render layer drains it; if
/// nobody does, old entries fall off the front.
#[derive(Resource, Debug, Default)]
pub struct SkidMarkQueue {
    pub pending: Vec<SkidMark>,
}

impl SkidMarkQueue {
    pub fn drain(&mut self) -> Vec<SkidMark> {
        std::mem::take(&mut self.pending)
    }
}

fn reset_feedback_state(
    mut shake: ResMut<CameraShakeState>,
    mut skids: ResMut<SkidMarkQueue>,
) {
    *shake = CameraShakeState::default();
    skids.pending.clear();
}

fn collect_feedback_events(
    mut collision_events: MessageReader<CollisionFeedbackEvent>,
    mut brake_events: MessageReader<BrakeMarkEvent>,
    mut shake: ResMut<CameraShakeState>,
    mut skids: ResMut<SkidMarkQueue>,
) {
    for event in collision_events.read() {
        shake.trauma = (shake.trauma + event.shake).min(CAMERA_SHAKE_MAX);
    }

    for event in brake_events.read() {
        skids.pending.push(SkidMark {
            position: event.position,
            strength: event.strength,
        });
    }
    if skids.pending.len() > SKID_MARK_QUEUE_CAP {
        let overflow = skids.pending.len() - SKID_MARK_QUEUE_CAP;
        skids.pending.drain(..overflow);
    }
}

fn decay_camera_shake(time: Res<Time>, mut shake: ResMut<CameraShakeState>) {
    shake.trauma = (shake.trauma - CAMERA_SHAKE_DECAY_PER_SECOND * time.delta_secs()).max(0.0);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skid_mark_queue_drains_and_stays_bounded() {
        let mut queue = SkidMarkQueue::default();
        for i in 0..(SKID_MARK_QUEUE_CAP + 40) {
            queue.pending.push(SkidMark {
                position: Vec3::splat(i as f32),
                strength: 1.0,
            });
        }
        let overflow = queue.pending.len().saturating_sub(SKID_MARK_QUEUE_CAP);
        queue.pending.drain(..overflow);
        assert_eq!(queue.pending.len(), SKID_MARK_QUEUE_CAP);
        // The oldest entries fell off the front.
        assert_eq!(queue.pending[0].position.x, 40.0);

        let drained = queue.drain();
        assert_eq!(drained.len(), SKID_MARK_QUEUE_CAP);
        assert!(queue.pending.is_empty());
    }

    #[test]
    fn camera_shake_saturates_at_the_cap() {
        let mut shake = CameraShakeState::default();
        for _ in 0..100 {
            shake.trauma = (shake.trauma + 0.4).min(CAMERA_SHAKE_MAX);
        }
        assert_eq!(shake.trauma, CAMERA_SHAKE_MAX);
    }
}

//! Stand-in for a display surface: state goes to the log.

use crate::reconcile::Outcome;
use log::{debug, trace};
use shared::GameObject;

pub trait Renderer {
    /// Called once per local simulation step.
    fn render(&mut self, objects: &[GameObject]);

    /// Called after every authoritative snapshot.
    fn reconciled(&mut self, _outcome: Outcome, _objects: &[GameObject]) {}
}

/// Logs the object list every `every` frames at trace level.
pub struct LogRenderer {
    every: u64,
    frames: u64,
}

impl LogRenderer {
    pub fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            frames: 0,
        }
    }
}

impl Default for LogRenderer {
    fn default() -> Self {
        Self::new(60)
    }
}

impl Renderer for LogRenderer {
    fn render(&mut self, objects: &[GameObject]) {
        self.frames += 1;
        if self.frames % self.every != 0 {
            return;
        }
        for object in objects {
            match object {
                GameObject::Player(player) => trace!(
                    "frame {}: player {} {} at ({:.1}, {:.1})",
                    self.frames,
                    player.id(),
                    player.key,
                    player.body.position.x,
                    player.body.position.y
                ),
                other => trace!("frame {}: object {}", self.frames, other.id()),
            }
        }
    }

    fn reconciled(&mut self, outcome: Outcome, objects: &[GameObject]) {
        debug!("Reconciled: {:?} ({} objects)", outcome, objects.len());
    }
}

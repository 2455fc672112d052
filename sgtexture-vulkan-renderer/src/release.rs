//! Deferred destruction of retired textures.
//!
//! A texture replaced on resize may still be referenced by command buffers
//! of frames that have not completed. It is parked here with a countdown of
//! `frames_in_flight` frame callbacks; by the time the countdown reaches zero
//! the host has fenced every frame that could have used it. Dropping the
//! parked value destroys its device objects.

use tracing::debug;

struct Retired<T> {
    frames_left: u32,
    generation: u64,
    texture: T,
}

pub struct ReleaseQueue<T> {
    retired: Vec<Retired<T>>,
}

impl<T> Default for ReleaseQueue<T> {
    fn default() -> Self {
        Self {
            retired: Vec::new(),
        }
    }
}

impl<T> ReleaseQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks `texture` until `frames` more frame callbacks have run.
    pub fn retire(&mut self, texture: T, generation: u64, frames: u32) {
        debug!(generation, frames, "texture retired");
        self.retired.push(Retired {
            frames_left: frames,
            generation,
            texture,
        });
    }

    /// Counts one frame callback down and destroys every texture whose
    /// countdown ran out. Returns how many were destroyed.
    pub fn advance(&mut self) -> usize {
        let before = self.retired.len();
        self.retired.retain_mut(|entry| {
            entry.frames_left = entry.frames_left.saturating_sub(1);
            if entry.frames_left == 0 {
                debug!(generation = entry.generation, "releasing retired texture");
                false
            } else {
                true
            }
        });
        before - self.retired.len()
    }

    /// Destroys everything immediately. Only valid once the device is idle.
    pub fn drain(&mut self) {
        self.retired.clear();
    }

    pub fn len(&self) -> usize {
        self.retired.len()
    }

    pub fn is_empty(&self) -> bool {
        self.retired.is_empty()
    }
}

//! Latest-frame fan-out to independent consumers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use crate::frame::{Frame, Rotation};

/// Single-slot frame distributor.
///
/// Holds at most the most recent frame: [`publish`](Self::publish) swaps the
/// slot atomically and never blocks on a reader, readers never consume.
/// Older frames that were never read are lost, deliberately: every consumer
/// (viewer, recorder, HTTP re-broadcast) samples at its own cadence and
/// always sees the freshest image rather than a backlog.
///
/// The view rotation is a second, independently synchronized value. It is
/// applied when a frame is read, so a rotation change affects all subsequent
/// reads but never the stored frame.
#[derive(Debug, Default)]
pub struct FrameDistributor {
    slot: RwLock<Option<Arc<Frame>>>,
    rotation: RwLock<Rotation>,
    frames_published: AtomicU64,
}

/// Snapshot of distributor counters for the status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct DistributorStats {
    pub frames_published: u64,
    pub has_frame: bool,
    pub rotation_degrees: u32,
}

impl FrameDistributor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the latest-frame slot. Always succeeds.
    pub fn publish(&self, frame: Frame) {
        *self.slot.write() = Some(Arc::new(frame));
        self.frames_published.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the stored frame without applying the view rotation.
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.slot.read().clone()
    }

    /// Returns the current frame with the view rotation applied, or `None`
    /// if nothing has been published since the last [`clear`](Self::clear).
    ///
    /// Idempotent: repeated reads with no intervening publish return an
    /// equivalent frame.
    pub fn read(&self) -> Option<Frame> {
        let frame = self.latest()?;
        let rotation = *self.rotation.read();
        Some(Frame {
            image: rotation.apply(&frame.image),
            seq: frame.seq,
        })
    }

    pub fn rotation(&self) -> Rotation {
        *self.rotation.read()
    }

    pub fn set_rotation(&self, rotation: Rotation) {
        *self.rotation.write() = rotation;
    }

    /// Advances the view rotation by 90° and returns the new value.
    pub fn rotate_90(&self) -> Rotation {
        let mut rotation = self.rotation.write();
        *rotation = rotation.step_90();
        *rotation
    }

    /// Empties the slot. Called when the inbound connection drops so
    /// consumers see "no signal" instead of a stale image.
    pub fn clear(&self) {
        *self.slot.write() = None;
    }

    pub fn stats(&self) -> DistributorStats {
        DistributorStats {
            frames_published: self.frames_published.load(Ordering::Relaxed),
            has_frame: self.slot.read().is_some(),
            rotation_degrees: self.rotation().degrees(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::test_image;

    fn frame(seq: u64, width: u32, height: u32) -> Frame {
        Frame {
            image: test_image(width, height),
            seq,
        }
    }

    #[test]
    fn publish_overwrites_unread_frame() {
        let d = FrameDistributor::new();
        d.publish(frame(1, 8, 8));
        d.publish(frame(2, 8, 8));

        // F1 was never observable once F2 landed.
        assert_eq!(d.read().unwrap().seq, 2);
        assert_eq!(d.stats().frames_published, 2);
    }

    #[test]
    fn read_is_idempotent() {
        let d = FrameDistributor::new();
        d.publish(frame(1, 8, 4));

        let a = d.read().unwrap();
        let b = d.read().unwrap();
        assert_eq!(a.seq, b.seq);
        assert_eq!(a.image, b.image);
    }

    #[test]
    fn rotation_applies_at_read_time() {
        let d = FrameDistributor::new();
        d.publish(frame(1, 8, 4));

        let before = d.read().unwrap();
        assert_eq!((before.width(), before.height()), (8, 4));

        d.set_rotation(Rotation::Cw90);
        let after = d.read().unwrap();
        assert_eq!((after.width(), after.height()), (4, 8));

        // The stored frame itself was never mutated.
        assert_eq!(d.latest().unwrap().width(), 8);
    }

    #[test]
    fn four_rotate_steps_return_to_identity() {
        let d = FrameDistributor::new();
        d.publish(frame(1, 6, 10));
        let original = d.read().unwrap();

        for _ in 0..4 {
            d.rotate_90();
        }
        assert_eq!(d.rotation(), Rotation::None);
        assert_eq!(d.read().unwrap().image, original.image);
    }

    #[test]
    fn clear_empties_slot_only() {
        let d = FrameDistributor::new();
        d.publish(frame(1, 8, 8));
        d.clear();

        assert!(d.read().is_none());
        let stats = d.stats();
        assert!(!stats.has_frame);
        assert_eq!(stats.frames_published, 1);
    }
}

//! Orientation follow state

use crate::signaling::Orientation;

/// Decides when an orientation label goes to the viewer
#[derive(Debug, Clone)]
pub struct OrientationTracker {
    following: bool,
    current: Orientation,
    last_sent: Option<Orientation>,
}

impl OrientationTracker {
    pub fn new(following: bool, current: Orientation) -> Self {
        Self {
            following,
            current,
            last_sent: None,
        }
    }

    pub fn is_following(&self) -> bool {
        self.following
    }

    pub fn current(&self) -> Orientation {
        self.current
    }

    /// Turning following on reports the current orientation right away
    pub fn set_following(&mut self, on: bool) -> Option<Orientation> {
        let was = self.following;
        self.following = on;
        if !on {
            self.last_sent = None;
            return None;
        }
        if was && self.last_sent.is_some() {
            return None;
        }
        self.last_sent = Some(self.current);
        Some(self.current)
    }

    /// A new reading; reported only when following and changed
    pub fn observe(&mut self, orientation: Orientation) -> Option<Orientation> {
        self.current = orientation;
        if !self.following || self.last_sent == Some(orientation) {
            return None;
        }
        self.last_sent = Some(orientation);
        Some(orientation)
    }

    /// Forget what was sent, e.g. after the viewer reconnected
    pub fn reset_sent(&mut self) {
        self.last_sent = None;
    }
}

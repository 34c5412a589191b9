//! Key event distribution from the OS key hook to the controller.
//!
//! The hook that actually captures special-key presses is an external
//! collaborator; whatever it is, it pushes scan codes into a [`KeyBus`].
//! A broadcast channel lets the supervised controller re-subscribe after
//! every restart without the hook knowing or caring.

use tokio::sync::broadcast;

const BUS_CAPACITY: usize = 32;

/// Publish-subscribe bus carrying raw key scan codes.
pub struct KeyBus {
    sender: broadcast::Sender<u32>,
}

impl KeyBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    /// Publishes one key press. A send with no live subscriber is not an
    /// error; the controller may be mid-restart.
    pub fn press(&self, code: u32) {
        let _ = self.sender.send(code);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<u32> {
        self.sender.subscribe()
    }
}

impl Clone for KeyBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl Default for KeyBus {
    fn default() -> Self {
        Self::new()
    }
}

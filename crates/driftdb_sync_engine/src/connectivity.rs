//! Online/offline state shared between the app and the sync manager.

use std::sync::Arc;
use tokio::sync::watch;

/// Shared online flag.
///
/// Clones observe and control the same flag.
#[derive(Debug, Clone)]
pub struct Connectivity {
    sender: Arc<watch::Sender<bool>>,
}

impl Connectivity {
    /// Creates a flag with the given initial state.
    pub fn new(online: bool) -> Self {
        let (sender, _) = watch::channel(online);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Creates a flag that starts online.
    pub fn online() -> Self {
        Self::new(true)
    }

    /// Creates a flag that starts offline.
    pub fn offline() -> Self {
        Self::new(false)
    }

    /// Returns the current state.
    pub fn is_online(&self) -> bool {
        *self.sender.borrow()
    }

    /// Sets the state. Subscribers are only woken on an actual change.
    pub fn set_online(&self, online: bool) {
        self.sender.send_if_modified(|current| {
            let changed = *current != online;
            *current = online;
            changed
        });
    }

    /// Subscribes to state changes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::online()
    }
}

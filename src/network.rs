//! Host network link signal.
//!
//! Stands in for the platform's link-layer online/offline notifications. The
//! embedding program flips it; the store worker and the health monitor watch it.

use tokio::sync::watch;
use tracing::info;

/// Link-layer state as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Up,
    Down,
}

impl LinkState {
    pub fn is_up(&self) -> bool {
        matches!(self, Self::Up)
    }
}

/// Cloneable handle to the shared link signal.
#[derive(Debug, Clone)]
pub struct NetworkLink {
    tx: watch::Sender<LinkState>,
}

impl NetworkLink {
    pub fn new(initial: LinkState) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Current link state.
    pub fn state(&self) -> LinkState {
        *self.tx.borrow()
    }

    /// Report a link transition. Watchers are only woken on an actual change.
    pub fn set(&self, state: LinkState) {
        let changed = self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
        if changed {
            info!(link = ?state, "Network link changed");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.tx.subscribe()
    }
}

impl Default for NetworkLink {
    fn default() -> Self {
        Self::new(LinkState::Up)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn watchers_see_transitions_only() {
        let link = NetworkLink::default();
        let mut rx = link.subscribe();

        link.set(LinkState::Up);
        assert!(!rx.has_changed().unwrap());

        link.set(LinkState::Down);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), LinkState::Down);
        assert!(!link.state().is_up());
    }
}

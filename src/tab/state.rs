//! Lifecycle of the process behind a tab.

/// Where a tab is in its spawn/run/exit cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TabState {
    /// Constructed, nothing spawned yet. The first map moves it on.
    #[default]
    Initial,
    Spawning,
    Running,
    /// The process exited with status 0.
    Exited,
    /// Spawn failed, or the process exited non-zero or by a signal.
    Failed,
}

impl TabState {
    /// Whether `self -> next` is an edge of the lifecycle.
    pub fn can_transition_to(self, next: TabState) -> bool {
        use TabState::*;
        matches!(
            (self, next),
            (Initial, Spawning)
                | (Spawning, Running)
                | (Spawning, Failed)
                | (Running, Exited)
                | (Running, Failed)
                | (Exited, Spawning)
                | (Failed, Spawning)
        )
    }

    /// States a respawn request is honored in.
    pub fn can_respawn(self) -> bool {
        matches!(self, TabState::Initial | TabState::Exited | TabState::Failed)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TabState::Exited | TabState::Failed)
    }
}

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            PeerConnectionState::New => "new",
            PeerConnectionState::Connecting => "connecting",
            PeerConnectionState::Connected => "connected",
            PeerConnectionState::Disconnected => "disconnected",
            PeerConnectionState::Failed => "failed",
            PeerConnectionState::Closed => "closed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PeerConnectionState::Failed | PeerConnectionState::Closed)
    }

    fn rank(self) -> u8 {
        match self {
            PeerConnectionState::New => 0,
            PeerConnectionState::Connecting => 1,
            PeerConnectionState::Connected => 2,
            PeerConnectionState::Disconnected => 3,
            PeerConnectionState::Failed | PeerConnectionState::Closed => 4,
        }
    }

    /// Forward moves only, except that a disconnected peer may recover.
    /// Failed and Closed accept nothing.
    pub fn can_transition_to(self, next: PeerConnectionState) -> bool {
        if self.is_terminal() || self == next {
            return false;
        }
        if next.is_terminal() {
            return true;
        }
        match (self, next) {
            (PeerConnectionState::Disconnected, PeerConnectionState::Connecting)
            | (PeerConnectionState::Disconnected, PeerConnectionState::Connected) => true,
            _ => next.rank() > self.rank(),
        }
    }
}

impl fmt::Display for PeerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataChannelState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl DataChannelState {
    pub fn as_str(self) -> &'static str {
        match self {
            DataChannelState::Connecting => "connecting",
            DataChannelState::Open => "open",
            DataChannelState::Closing => "closing",
            DataChannelState::Closed => "closed",
        }
    }
}

impl fmt::Display for DataChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::PeerConnectionState::*;

    #[test]
    fn happy_path_is_allowed() {
        assert!(New.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Disconnected));
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connected.can_transition_to(Closed));
    }

    #[test]
    fn terminal_states_are_final() {
        for next in [New, Connecting, Connected, Disconnected, Failed, Closed] {
            assert!(!Failed.can_transition_to(next));
            assert!(!Closed.can_transition_to(next));
        }
    }

    #[test]
    fn backwards_moves_are_rejected() {
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!Connecting.can_transition_to(New));
        assert!(!Connected.can_transition_to(Connected));
    }

    #[test]
    fn failure_reachable_from_any_live_state() {
        for from in [New, Connecting, Connected, Disconnected] {
            assert!(from.can_transition_to(Failed));
            assert!(from.can_transition_to(Closed));
        }
    }
}

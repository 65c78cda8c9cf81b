//! Playback state shared between the state machine and the pump

use std::fmt;

/// Playback state of the player
///
/// Only the state machine moves between these, with one exception: the pump
/// acknowledges a pause request by turning `Pause` into `Paused` before it
/// parks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    /// Start acknowledged, output not yet running
    Play,
    Playing,
    /// Pause requested, pump has not parked yet
    Pause,
    Paused,
}

impl PlaybackState {
    pub fn is_paused(&self) -> bool {
        matches!(self, PlaybackState::Pause | PlaybackState::Paused)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, PlaybackState::Stopped)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Stopped => "STOPPED",
            PlaybackState::Play => "PLAY",
            PlaybackState::Playing => "PLAYING",
            PlaybackState::Pause => "PAUSE",
            PlaybackState::Paused => "PAUSED",
        };
        f.write_str(name)
    }
}

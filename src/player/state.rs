use std::time::Instant;

use crate::protocol::EqualizerBand;

/// Local mirror of a player's remote state.
///
/// The node is authoritative for `time`/`position`; both are overwritten by
/// every `playerUpdate`, stamped with a local receipt instant so the current
/// position can be interpolated between updates. Volume and equalizer are
/// client-known values the node does not echo back.
#[derive(Debug, Clone)]
pub struct PlayerState {
    /// Node-side clock of the last sync, milliseconds since the epoch.
    pub time: Option<u64>,
    /// Track position at the last sync, in milliseconds.
    pub position: Option<u64>,
    pub volume: u32,
    pub equalizer: Vec<EqualizerBand>,
    pub(crate) received_at: Option<Instant>,
}

impl Default for PlayerState {
    fn default() -> Self {
        Self {
            time: None,
            position: None,
            volume: 100,
            equalizer: Vec::new(),
            received_at: None,
        }
    }
}

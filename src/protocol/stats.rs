use serde::{Deserialize, Serialize};

/// Load report periodically pushed by a node.
///
/// The `op` discriminator is consumed by the envelope tag and never stored
/// with the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStats {
    pub players: i32,
    pub playing_players: i32,
    pub uptime: u64,
    pub memory: Memory,
    pub cpu: Cpu,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_stats: Option<FrameStats>,
}

impl NodeStats {
    /// System load per core, the ranking key for node selection. A node
    /// that has not reported cores yet ranks as zero.
    pub fn normalized_load(&self) -> f64 {
        if self.cpu.cores <= 0 {
            return 0.0;
        }
        self.cpu.system_load / self.cpu.cores as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub free: u64,
    pub used: u64,
    pub allocated: u64,
    pub reservable: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cpu {
    pub cores: i32,
    pub system_load: f64,
    pub lavalink_load: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameStats {
    pub sent: i32,
    pub nulled: i32,
    pub deficit: i32,
}

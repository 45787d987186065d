// ── Runtime shaping settings ──
//
// Fully-resolved knobs for one compilation. Built by the config crate (or
// tests) and handed in; core never reads config files or probes the host.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::classify::InterfaceLayout;
use crate::shard::{PlannerParams, ShardStrategy, TopLevelStrategy};

/// Leaf qdisc used when nothing else is configured.
pub const DEFAULT_SQM: &str = "cake diffserv4";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShaperSettings {
    /// Interface A: shapes download (toward subscribers).
    pub download_interface: String,
    /// Interface B: shapes upload. Ignored on a stick.
    pub upload_interface: String,
    /// Both directions share interface A and its queue set.
    pub on_a_stick: bool,
    /// Usable CPU queues per direction (already halved on a stick).
    pub queues: u32,
    pub upstream_download_mbps: f64,
    pub upstream_upload_mbps: f64,
    /// Ceiling of each generated shard node.
    pub generated_download_mbps: f64,
    pub generated_upload_mbps: f64,
    /// Leaf qdisc kind attached under every circuit class.
    pub sqm: String,
    /// Lift every circuit to a huge ceiling: statistics flow, nothing is throttled.
    pub monitor_only: bool,
    pub top_level_strategy: TopLevelStrategy,
    pub shard_strategy: ShardStrategy,
    pub planner: PlannerParams,
}

impl Default for ShaperSettings {
    fn default() -> Self {
        Self {
            download_interface: "eth1".into(),
            upload_interface: "eth2".into(),
            on_a_stick: false,
            queues: 4,
            upstream_download_mbps: 1000.0,
            upstream_upload_mbps: 1000.0,
            generated_download_mbps: 1000.0,
            generated_upload_mbps: 1000.0,
            sqm: DEFAULT_SQM.into(),
            monitor_only: false,
            top_level_strategy: TopLevelStrategy::RoundRobin,
            shard_strategy: ShardStrategy::Rendezvous,
            planner: PlannerParams::default(),
        }
    }
}

impl ShaperSettings {
    pub fn layout(&self) -> InterfaceLayout {
        InterfaceLayout {
            download_interface: self.download_interface.clone(),
            upload_interface: if self.on_a_stick {
                self.download_interface.clone()
            } else {
                self.upload_interface.clone()
            },
            on_a_stick: self.on_a_stick,
            queues: self.queues,
        }
    }

    /// Digest of every setting that changes the shape of the queue program.
    ///
    /// Planner tunables are left out: they only influence which shard a
    /// circuit lands on, and that is persisted separately.
    pub fn fingerprint(&self) -> String {
        let shape = serde_json::json!({
            "download_interface": self.download_interface,
            "upload_interface": self.upload_interface,
            "on_a_stick": self.on_a_stick,
            "queues": self.queues,
            "upstream": [self.upstream_download_mbps, self.upstream_upload_mbps],
            "generated": [self.generated_download_mbps, self.generated_upload_mbps],
            "sqm": self.sqm,
            "monitor_only": self.monitor_only,
            "top_level_strategy": self.top_level_strategy,
            "shard_strategy": self.shard_strategy,
        });
        let digest = Sha256::digest(shape.to_string().as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }
}

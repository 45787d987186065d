//! Configuration for shapeplan.
//!
//! TOML file layered under `SHAPEPLAN_*` environment variables, validation
//! of every tunable, and translation to `shapeplan_core::ShaperSettings`.
//! The host-dependent queue count is supplied by the caller.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use shapeplan_core::config::DEFAULT_SQM;
use shapeplan_core::{PlannerParams, ShaperSettings, ShardStrategy, TopLevelStrategy};

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub interfaces: Interfaces,
    pub bandwidth: Bandwidth,
    pub queues: Queues,
    pub shaping: Shaping,
    pub planner: PlannerParams,
    pub paths: Paths,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Interfaces {
    /// Interface A, facing subscribers; shapes download.
    pub download: String,
    /// Interface B, facing upstream; shapes upload.
    pub upload: String,
    pub on_a_stick: bool,
}

impl Default for Interfaces {
    fn default() -> Self {
        Self {
            download: "eth1".into(),
            upload: "eth2".into(),
            on_a_stick: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Bandwidth {
    pub upstream_download_mbps: f64,
    pub upstream_upload_mbps: f64,
    /// Ceiling of each generated shard node.
    pub generated_download_mbps: f64,
    pub generated_upload_mbps: f64,
}

impl Default for Bandwidth {
    fn default() -> Self {
        Self {
            upstream_download_mbps: 1000.0,
            upstream_upload_mbps: 1000.0,
            generated_download_mbps: 1000.0,
            generated_upload_mbps: 1000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Queues {
    /// Use this many queues instead of probing the NIC and CPU. A stick
    /// splits them between the two directions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    /// Leaf qdisc under every circuit class.
    pub sqm: String,
    pub monitor_only: bool,
}

impl Default for Queues {
    fn default() -> Self {
        Self {
            count: None,
            sqm: DEFAULT_SQM.into(),
            monitor_only: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Shaping {
    pub top_level_strategy: TopLevelStrategy,
    pub shard_strategy: ShardStrategy,
    /// Sites dropped when importing an integration graph.
    pub exclude_sites: Vec<String>,
    /// Committed rate as a fraction of max, used when importing.
    pub committed_bandwidth_multiplier: f64,
}

impl Default for Shaping {
    fn default() -> Self {
        Self {
            top_level_strategy: TopLevelStrategy::default(),
            shard_strategy: ShardStrategy::default(),
            exclude_sites: Vec::new(),
            committed_bandwidth_multiplier: 0.98,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Paths {
    pub network: PathBuf,
    pub circuits: PathBuf,
    pub state_dir: PathBuf,
    /// Where the file bus writes applied batches and patches.
    pub output_dir: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        let state_dir = default_state_dir();
        Self {
            network: PathBuf::from("network.json"),
            circuits: PathBuf::from("circuits.csv"),
            output_dir: state_dir.join("applied"),
            state_dir,
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "shapeplan", "shapeplan")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback(".config").join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn default_state_dir() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback(".local/share"),
        |dirs| dirs.data_local_dir().to_path_buf(),
    )
}

fn dirs_fallback(base: &str) -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(base);
    p.push("shapeplan");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load from the canonical path + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
///
/// Environment keys nest on `__`: `SHAPEPLAN_INTERFACES__DOWNLOAD=eth4`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("SHAPEPLAN_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Validation ──────────────────────────────────────────────────────

/// Reject out-of-range tunables.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    let interfaces = &cfg.interfaces;
    if interfaces.download.trim().is_empty() {
        return Err(invalid("interfaces.download", "must not be empty"));
    }
    if interfaces.on_a_stick {
        if !interfaces.upload.is_empty() && interfaces.upload != interfaces.download {
            warn!(
                upload = %interfaces.upload,
                "on_a_stick is set; interfaces.upload is ignored"
            );
        }
    } else if interfaces.upload.trim().is_empty() {
        return Err(invalid("interfaces.upload", "must not be empty unless on_a_stick"));
    } else if interfaces.upload == interfaces.download {
        return Err(invalid(
            "interfaces.upload",
            "must differ from interfaces.download unless on_a_stick",
        ));
    }

    let bw = &cfg.bandwidth;
    for (field, value) in [
        ("bandwidth.upstream_download_mbps", bw.upstream_download_mbps),
        ("bandwidth.upstream_upload_mbps", bw.upstream_upload_mbps),
        ("bandwidth.generated_download_mbps", bw.generated_download_mbps),
        ("bandwidth.generated_upload_mbps", bw.generated_upload_mbps),
    ] {
        positive(field, value)?;
    }

    if cfg.queues.sqm.trim().is_empty() {
        return Err(invalid("queues.sqm", "must name a qdisc"));
    }
    let multiplier = cfg.shaping.committed_bandwidth_multiplier;
    if !(multiplier > 0.0 && multiplier <= 1.0) {
        return Err(invalid(
            "shaping.committed_bandwidth_multiplier",
            format!("must be in (0, 1], got {multiplier}"),
        ));
    }

    validate_planner(&cfg.planner)
}

fn validate_planner(p: &PlannerParams) -> Result<(), ConfigError> {
    if p.candidates == 0 {
        return Err(invalid("planner.candidates", "must be at least 1"));
    }
    if !(p.headroom > 0.0 && p.headroom <= 1.0) {
        return Err(invalid(
            "planner.headroom",
            format!("must be in (0, 1], got {}", p.headroom),
        ));
    }
    for (field, value) in [
        ("planner.hysteresis", p.hysteresis),
        ("planner.move_penalty", p.move_penalty),
        ("planner.global_balance_weight", p.global_balance_weight),
    ] {
        if !(value >= 0.0 && value.is_finite()) {
            return Err(invalid(field, format!("must be zero or positive, got {value}")));
        }
    }
    positive("planner.penalty_half_life_secs", p.penalty_half_life_secs)?;
    if p.cooldown_secs < 0 {
        return Err(invalid("planner.cooldown_secs", "must not be negative"));
    }
    if p.state_ttl_secs <= 0 {
        return Err(invalid("planner.state_ttl_secs", "must be positive"));
    }
    Ok(())
}

fn positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(invalid(field, format!("must be positive, got {value}")))
    }
}

// ── Translation ─────────────────────────────────────────────────────

/// Build core settings. `queues` is the usable per-direction count the
/// caller derived from the host (or from `queues.count`).
pub fn to_settings(cfg: &Config, queues: u32) -> ShaperSettings {
    ShaperSettings {
        download_interface: cfg.interfaces.download.clone(),
        upload_interface: cfg.interfaces.upload.clone(),
        on_a_stick: cfg.interfaces.on_a_stick,
        queues,
        upstream_download_mbps: cfg.bandwidth.upstream_download_mbps,
        upstream_upload_mbps: cfg.bandwidth.upstream_upload_mbps,
        generated_download_mbps: cfg.bandwidth.generated_download_mbps,
        generated_upload_mbps: cfg.bandwidth.generated_upload_mbps,
        sqm: cfg.queues.sqm.clone(),
        monitor_only: cfg.queues.monitor_only,
        top_level_strategy: cfg.shaping.top_level_strategy,
        shard_strategy: cfg.shaping.shard_strategy,
        planner: cfg.planner.clone(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        validate(&Config::default()).unwrap();
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[interfaces]
download = "ens1f0"
upload = "ens1f1"

[shaping]
shard_strategy = "bin_packing"

[planner]
candidates = 5
"#,
        )
        .unwrap();

        let cfg = load_config_from(&path).unwrap();
        assert_eq!(cfg.interfaces.download, "ens1f0");
        assert_eq!(cfg.shaping.shard_strategy, ShardStrategy::BinPacking);
        assert_eq!(cfg.planner.candidates, 5);
        // untouched keys keep their defaults
        assert_eq!(cfg.planner.move_budget, PlannerParams::default().move_budget);
        assert_eq!(cfg.queues.sqm, DEFAULT_SQM);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(cfg.interfaces, Interfaces::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut cfg = Config::default();
        cfg.queues.count = Some(8);
        cfg.shaping.exclude_sites = vec!["Lab".into()];
        save_config(&cfg, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        assert_eq!(loaded.queues.count, Some(8));
        assert_eq!(loaded.shaping.exclude_sites, ["Lab"]);
    }

    #[test]
    fn rejects_bad_planner_tunables() {
        let mut cfg = Config::default();
        cfg.planner.candidates = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Validation { field, .. }) if field == "planner.candidates"));

        let mut cfg = Config::default();
        cfg.planner.headroom = 1.5;
        assert!(validate(&cfg).is_err());

        let mut cfg = Config::default();
        cfg.planner.move_penalty = -0.1;
        assert!(validate(&cfg).is_err());
    }

    #[test]
    fn rejects_shared_interfaces_off_stick() {
        let mut cfg = Config::default();
        cfg.interfaces.upload = cfg.interfaces.download.clone();
        assert!(validate(&cfg).is_err());

        cfg.interfaces.on_a_stick = true;
        validate(&cfg).unwrap();
    }

    #[test]
    fn settings_carry_every_section() {
        let mut cfg = Config::default();
        cfg.interfaces.on_a_stick = true;
        cfg.queues.monitor_only = true;
        cfg.bandwidth.upstream_download_mbps = 5000.0;
        let settings = to_settings(&cfg, 3);
        assert_eq!(settings.queues, 3);
        assert!(settings.on_a_stick);
        assert!(settings.monitor_only);
        assert_eq!(settings.upstream_download_mbps, 5000.0);
        assert_eq!(settings.layout().upload_interface, "eth1");
    }
}

//! Command handlers.

pub mod compile;
pub mod config_cmd;
pub mod import;
pub mod reload;
pub mod shards;
pub mod validate;

use std::path::{Path, PathBuf};

use shapeplan_config::{Config, config_path, load_config_from, to_settings, validate as validate_config};
use shapeplan_core::{DocumentSet, ShaperSettings, StateDir};

use crate::cli::{Command, GlobalOpts};
use crate::env;
use crate::error::CliError;
use crate::output;

/// Route a parsed command to its handler.
pub fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    // config commands must work with a broken config file
    if let Command::Config(args) = cmd {
        return config_cmd::handle(&args, global);
    }

    let ctx = Context::load(global)?;
    match cmd {
        Command::Validate => validate::handle(&ctx),
        Command::Compile(args) => compile::handle(&args, &ctx),
        Command::Reload(args) => reload::handle(&args, &ctx),
        Command::Import(args) => import::handle(&args, &ctx),
        Command::Shards => shards::handle(&ctx),
        Command::Config(_) | Command::Completions(_) => Ok(()),
    }
}

/// Resolved configuration plus the global flags that override it.
pub struct Context<'a> {
    pub global: &'a GlobalOpts,
    pub cfg: Config,
}

impl<'a> Context<'a> {
    fn load(global: &'a GlobalOpts) -> Result<Self, CliError> {
        let path = resolved_config_path(global);
        let cfg = load_config_from(&path)?;
        validate_config(&cfg)?;
        Ok(Self { global, cfg })
    }

    pub fn network_path(&self) -> &Path {
        self.global.network.as_deref().unwrap_or(&self.cfg.paths.network)
    }

    pub fn circuits_path(&self) -> &Path {
        self.global
            .circuits
            .as_deref()
            .unwrap_or(&self.cfg.paths.circuits)
    }

    pub fn store(&self) -> StateDir {
        StateDir::new(
            self.global
                .state_dir
                .clone()
                .unwrap_or_else(|| self.cfg.paths.state_dir.clone()),
        )
    }

    /// Read both input documents verbatim.
    pub fn documents(&self) -> Result<DocumentSet, CliError> {
        Ok(DocumentSet {
            network: read_input(self.network_path())?,
            circuits: read_input(self.circuits_path())?,
        })
    }

    /// Settings with the queue count probed from the host.
    pub fn settings(&self) -> Result<ShaperSettings, CliError> {
        let queues = env::queue_count(&self.cfg, self.global.queues)?;
        Ok(to_settings(&self.cfg, queues))
    }

    /// Settings for loading only; the queue count plays no part in it.
    pub fn load_settings(&self) -> ShaperSettings {
        to_settings(&self.cfg, 0)
    }

    pub fn print(&self, text: &str) {
        output::print_output(text, self.global.quiet);
    }
}

pub fn resolved_config_path(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(config_path)
}

fn read_input(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::ReadInput {
        path: path.to_path_buf(),
        source,
    })
}

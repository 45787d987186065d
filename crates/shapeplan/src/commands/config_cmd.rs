//! `shapeplan config`

use shapeplan_config::{Config, load_config_from, save_config};

use super::resolved_config_path;
use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = resolved_config_path(global);
    match args.command {
        ConfigCommand::Show => {
            let cfg = load_config_from(&path)?;
            let text = toml::to_string_pretty(&cfg)?;
            output::print_output(text.trim_end(), global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            output::print_output(&path.display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            save_config(&Config::default(), &path)?;
            if !global.quiet {
                eprintln!("Wrote default configuration to {}", path.display());
            }
            Ok(())
        }
    }
}

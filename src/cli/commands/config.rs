//! Config Command
//!
//! Manage tutorgen configuration.
//!
//! Usage:
//!   tutorgen config show [-g] [-f json]
//!   tutorgen config path
//!   tutorgen config init [-g] [--force]

use crate::cli::ui::Output;
use crate::config::ConfigLoader;
use crate::types::Result;

/// Show configuration
pub fn show(global: bool, format: &str) -> Result<()> {
    if global {
        match ConfigLoader::global_config_path() {
            Some(path) if path.exists() => {
                println!("# Global Config: {}\n", path.display());
                println!("{}", std::fs::read_to_string(&path)?);
            }
            Some(_) => {
                println!("No global config found.");
                println!("Run 'tutorgen config init --global' to create one.");
            }
            None => println!("Cannot determine global config directory."),
        }
        return Ok(());
    }

    let config = ConfigLoader::load()?;
    ConfigLoader::show_config(&config, format == "json")
}

/// Show configuration paths
pub fn path() -> Result<()> {
    let config = ConfigLoader::load()?;
    ConfigLoader::show_path(&config);
    Ok(())
}

/// Write a default config file
pub fn init(global: bool, force: bool) -> Result<()> {
    let path = ConfigLoader::init(global, force)?;
    Output::new().success(&format!(
        "Initialized {} configuration",
        if global { "global" } else { "project" }
    ));
    println!("  Config: {}", path.display());
    Ok(())
}

//! Configuration file discovery.

use std::path::PathBuf;

use etcetera::{BaseStrategy, choose_base_strategy};

const CONFIG_FILE_NAME: &str = "cribo.toml";

/// Locate `cribo.toml`: the working directory wins over the user
/// configuration directory.
pub fn find_config_file() -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        let candidate = cwd.join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    if let Ok(strategy) = choose_base_strategy() {
        let candidate = strategy.config_dir().join("cribo").join(CONFIG_FILE_NAME);
        if candidate.is_file() {
            return Some(candidate);
        }
    }

    None
}

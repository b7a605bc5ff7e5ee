//! Load configuration from an XDG `config.yaml` and a project `.env`, then
//! apply to the process environment with priority: **existing env > .env >
//! XDG YAML**. YAML string values may use `${NAME}` / `${NAME:-default}`
//! placeholders, expanded recursively against the process environment at
//! load time.

mod dotenv;
mod yaml_config;

use std::path::Path;
use thiserror::Error;

pub use yaml_config::expand_env_string;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("read xdg config: {0}")]
    ConfigRead(std::io::Error),
    #[error("parse xdg config yaml: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
    #[error("read .env: {0}")]
    DotenvRead(std::io::Error),
}

/// Loads config from XDG `config.yaml` and optional project `.env`, then sets
/// environment variables only for keys that are **not** already set (so
/// existing env has highest priority).
///
/// Order of precedence when a key is missing in the process environment:
/// 1. Value from project `.env` (current directory or `override_dir` if given)
/// 2. Value from `$XDG_CONFIG_HOME/<app_name>/config.yaml`'s `env:` map
///
/// * `app_name`: e.g. `"cortex"` — used for XDG path `~/.config/<app_name>/config.yaml`.
/// * `override_dir`: if `Some`, look for `.env` in this directory instead of `std::env::current_dir()`.
pub fn load_and_apply(app_name: &str, override_dir: Option<&Path>) -> Result<(), LoadError> {
    let xdg_map = yaml_config::load_env_map(app_name)?;
    let dotenv_map = dotenv::load_env_map(override_dir).map_err(LoadError::DotenvRead)?;

    let mut keys: std::collections::HashSet<String> = xdg_map.keys().cloned().collect();
    keys.extend(dotenv_map.keys().cloned());

    for key in keys {
        if std::env::var(&key).is_ok() {
            continue;
        }
        let value = dotenv_map.get(&key).or_else(|| xdg_map.get(&key)).cloned();
        if let Some(v) = value {
            std::env::set_var(&key, v);
        }
    }

    Ok(())
}

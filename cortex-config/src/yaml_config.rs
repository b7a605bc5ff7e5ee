//! Load the `env:` map from `$XDG_CONFIG_HOME/<app>/config.yaml`, expanding
//! `${NAME}` / `${NAME:-default}` placeholders recursively against the
//! current process environment.

use std::collections::HashMap;
use std::path::PathBuf;

use std::sync::OnceLock;

use regex::Regex;

use crate::LoadError;

fn xdg_config_path(app_name: &str) -> Option<PathBuf> {
    let config_dir = dirs::config_dir()?;
    for name in ["config.yaml", "config.yml"] {
        let path = config_dir.join(app_name).join(name);
        if path.exists() {
            return Some(path);
        }
    }
    None
}

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}").unwrap())
}

/// Expand `${NAME}` / `${NAME:-default}` in a string against the process
/// environment. Unset variables with no default expand to the empty string.
pub fn expand_env_string(input: &str) -> String {
    placeholder_re()
        .replace_all(input, |caps: &regex::Captures| {
            let var_name = &caps[1];
            let default = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            std::env::var(var_name).unwrap_or_else(|_| default.to_string())
        })
        .into_owned()
}

fn expand_yaml(value: serde_yaml::Value) -> serde_yaml::Value {
    match value {
        serde_yaml::Value::String(s) => serde_yaml::Value::String(expand_env_string(&s)),
        serde_yaml::Value::Sequence(seq) => {
            serde_yaml::Value::Sequence(seq.into_iter().map(expand_yaml).collect())
        }
        serde_yaml::Value::Mapping(map) => serde_yaml::Value::Mapping(
            map.into_iter()
                .map(|(k, v)| (expand_yaml(k), expand_yaml(v)))
                .collect(),
        ),
        other => other,
    }
}

#[derive(serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    env: HashMap<String, String>,
}

/// Returns the `env:` map from the app's YAML config, with placeholders
/// expanded. Missing file or missing section returns an empty map.
pub fn load_env_map(app_name: &str) -> Result<HashMap<String, String>, LoadError> {
    let path = match xdg_config_path(app_name) {
        Some(p) => p,
        None => return Ok(HashMap::new()),
    };
    let content = std::fs::read_to_string(&path).map_err(LoadError::ConfigRead)?;
    let raw: serde_yaml::Value = serde_yaml::from_str(&content)?;
    let expanded = expand_yaml(raw);
    let config: ConfigFile = serde_yaml::from_value(expanded)?;
    Ok(config.env)
}

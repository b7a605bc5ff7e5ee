//! Minimal `.env` reader for backend URLs, API keys, and other endpoint
//! secrets cortex picks up before `load_and_apply` applies XDG defaults.

use std::collections::HashMap;
use std::path::Path;

fn dotenv_path(override_dir: Option<&Path>) -> Option<std::path::PathBuf> {
    let dir = override_dir
        .map(std::path::Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok())?;
    let path = dir.join(".env");
    if path.exists() && path.is_file() {
        Some(path)
    } else {
        None
    }
}

/// Strips one layer of matching double quotes and unescapes `\"`. Cortex's
/// `.env` only ever needs to carry URLs and bearer tokens, not shell-style
/// single-quoting or multiline values, so that's the only quoting supported.
fn strip_quotes(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value[1..value.len() - 1].replace("\\\"", "\"")
    } else {
        value.to_string()
    }
}

fn parse_dotenv(content: &str) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        out.insert(key.to_string(), strip_quotes(value.trim()));
    }
    out
}

/// Loads `.env` from `override_dir` or the current directory. A missing file
/// is not an error; it just contributes no keys.
pub fn load_env_map(override_dir: Option<&Path>) -> std::io::Result<HashMap<String, String>> {
    let path = match dotenv_path(override_dir) {
        Some(p) => p,
        None => return Ok(HashMap::new()),
    };
    let content = std::fs::read_to_string(&path)?;
    Ok(parse_dotenv(&content))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple() {
        let s = "CORTEX_DEEP_URL=http://deep:8000\nCORTEX_FAST_URL=http://fast:8001\n";
        let m = parse_dotenv(s);
        assert_eq!(m.get("CORTEX_DEEP_URL"), Some(&"http://deep:8000".to_string()));
        assert_eq!(m.get("CORTEX_FAST_URL"), Some(&"http://fast:8001".to_string()));
    }

    #[test]
    fn skip_comments_and_blank_lines() {
        let s = "\n# mem0 token\nMEM0_API_KEY=abc123\n  \n";
        let m = parse_dotenv(s);
        assert_eq!(m.get("MEM0_API_KEY"), Some(&"abc123".to_string()));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn quoted_value_unescapes_inner_quotes() {
        let s = r#"SYSTEM_PROMPT="say \"hi\" back""#;
        let m = parse_dotenv(s);
        assert_eq!(m.get("SYSTEM_PROMPT"), Some(&"say \"hi\" back".to_string()));
    }

    #[test]
    fn line_without_equals_is_skipped() {
        let s = "NOT_A_KV_LINE\nCORTEX_TIMEOUT_MS=5000\n";
        let m = parse_dotenv(s);
        assert_eq!(m.get("CORTEX_TIMEOUT_MS"), Some(&"5000".to_string()));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn empty_value_stays_empty() {
        let s = "OPTIONAL_FLAG=\nOTHER=val\n";
        let m = parse_dotenv(s);
        assert_eq!(m.get("OPTIONAL_FLAG"), Some(&"".to_string()));
        assert_eq!(m.get("OTHER"), Some(&"val".to_string()));
    }

    #[test]
    fn load_env_map_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let m = load_env_map(Some(dir.path())).unwrap();
        assert!(m.is_empty());
    }

    #[test]
    fn load_env_map_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join(".env");
        std::fs::write(&env_path, "CORTEX_DEEP_URL=http://deep:9000\n").unwrap();
        let m = load_env_map(Some(dir.path())).unwrap();
        assert_eq!(m.get("CORTEX_DEEP_URL"), Some(&"http://deep:9000".to_string()));
    }
}

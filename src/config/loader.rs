//! Load + merge config with defaults: missing file falls back to
//! `Default::default()`, parse errors propagate.

use std::path::Path;

use super::schema::Config;

pub fn load_from_str(raw: &str) -> Result<Config, String> {
    toml::from_str(raw).map_err(|e| format!("invalid config: {e}"))
}

pub fn load_from_path(path: &Path) -> Result<Config, String> {
    match std::fs::read_to_string(path) {
        Ok(raw) => load_from_str(&raw),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Config::default()),
        Err(e) => Err(format!("reading config at {path:?} failed: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_from_path(Path::new("/nonexistent/nekobot.toml")).unwrap();
        assert!(config.providers.is_empty());
        assert_eq!(config.agents.defaults.max_tokens, 4096);
    }

    #[test]
    fn partial_fragment_fills_defaults() {
        let raw = r#"
            [[providers]]
            name = "primary"
            kind = "openai"
            api_key = "sk-..."
            api_base = "https://api.openai.com/v1"
        "#;
        let config = load_from_str(raw).unwrap();
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].timeout_secs, 120);
        assert_eq!(config.cooldown.error_threshold, 3);
    }
}

use std::path::PathBuf;

use serde::Deserialize;

pub const DIR_VAR: &str = "TRACE_CAPTURE_DIR";
pub const EXT_VAR: &str = "TRACE_CAPTURE_EXT";

/// Where and how trace artifacts are written.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub output_dir: PathBuf,
    pub extension: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("traces"),
            extension: "json".to_string(),
        }
    }
}

impl CaptureConfig {
    /// Defaults, overridden by `TRACE_CAPTURE_DIR` and `TRACE_CAPTURE_EXT`.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(dir) = lookup(DIR_VAR).filter(|v| !v.trim().is_empty()) {
            config.output_dir = PathBuf::from(dir);
        }
        if let Some(ext) = lookup(EXT_VAR) {
            config.extension = ext;
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_overrides_defaults() {
        let config = CaptureConfig::from_lookup(|key| match key {
            DIR_VAR => Some("/tmp/profiles".to_string()),
            EXT_VAR => Some("cpuprofile".to_string()),
            _ => None,
        });
        assert_eq!(config.output_dir, PathBuf::from("/tmp/profiles"));
        assert_eq!(config.extension, "cpuprofile");
    }

    #[test]
    fn blank_dir_keeps_default() {
        let config = CaptureConfig::from_lookup(|key| (key == DIR_VAR).then(|| "  ".to_string()));
        assert_eq!(config, CaptureConfig::default());
    }

    #[test]
    fn deserializes_with_missing_fields() {
        let config: CaptureConfig = serde_json::from_str(r#"{"output_dir":"out"}"#).unwrap();
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.extension, "json");
    }
}

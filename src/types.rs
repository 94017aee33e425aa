use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const ENV_ROOT_DIR: &str = "EXPORT_ROOT_DIR";
pub const ENV_BOOLEAN_TRUE: &str = "EXPORT_BOOLEAN_TRUE";
pub const ENV_BOOLEAN_FALSE: &str = "EXPORT_BOOLEAN_FALSE";
pub const ENV_DEMO_FALLBACK: &str = "EXPORT_DEMO_FALLBACK";

const DEFAULT_ROOT_DIR: &str = "./var";
const DEFAULT_TRUE_LABEL: &str = "Yes";
const DEFAULT_FALSE_LABEL: &str = "No";

/// Runtime settings for the export engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Storage root; exports land in `<root>/export`, archives in `<root>/tmp`.
    pub root_dir: PathBuf,
    pub boolean_true_label: String,
    pub boolean_false_label: String,
    /// Synthesize a placeholder file when a download cannot be resolved.
    pub demo_fallback: bool,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from(DEFAULT_ROOT_DIR),
            boolean_true_label: DEFAULT_TRUE_LABEL.to_string(),
            boolean_false_label: DEFAULT_FALSE_LABEL.to_string(),
            demo_fallback: false,
        }
    }
}

impl ExportConfig {
    /// Reads `.env` (if any) and the process environment.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from an arbitrary key lookup. Missing or blank values
    /// keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Self {
            root_dir: non_blank(ENV_ROOT_DIR).map(PathBuf::from).unwrap_or(defaults.root_dir),
            boolean_true_label: non_blank(ENV_BOOLEAN_TRUE).unwrap_or(defaults.boolean_true_label),
            boolean_false_label: non_blank(ENV_BOOLEAN_FALSE).unwrap_or(defaults.boolean_false_label),
            demo_fallback: non_blank(ENV_DEMO_FALLBACK)
                .map(|v| parse_flag(&v))
                .unwrap_or(defaults.demo_fallback),
        }
    }

    pub fn with_root_dir(mut self, root_dir: impl Into<PathBuf>) -> Self {
        self.root_dir = root_dir.into();
        self
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_apply_when_unset() {
        let config = ExportConfig::from_lookup(|_| None);
        assert_eq!(config, ExportConfig::default());
        assert_eq!(config.boolean_true_label, "Yes");
        assert_eq!(config.boolean_false_label, "No");
        assert!(!config.demo_fallback);
    }

    #[test]
    fn lookup_overrides_defaults() {
        let vars: HashMap<&str, &str> = [
            (ENV_ROOT_DIR, "/srv/exports"),
            (ENV_BOOLEAN_TRUE, "是"),
            (ENV_BOOLEAN_FALSE, "否"),
            (ENV_DEMO_FALLBACK, "On"),
        ]
        .into_iter()
        .collect();

        let config = ExportConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.root_dir, PathBuf::from("/srv/exports"));
        assert_eq!(config.boolean_true_label, "是");
        assert_eq!(config.boolean_false_label, "否");
        assert!(config.demo_fallback);
    }

    #[test]
    fn blank_values_are_ignored() {
        let config = ExportConfig::from_lookup(|key| {
            (key == ENV_BOOLEAN_TRUE).then(|| "  ".to_string())
        });
        assert_eq!(config.boolean_true_label, "Yes");
    }
}

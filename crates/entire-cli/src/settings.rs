//! Workspace settings: `.entire/settings.json` with `ENTIRE_*` env
//! overrides. Settings are advisory; a missing or unreadable file means
//! defaults.

use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Checkpoint strategy; only `manual-commit` is handled here.
    pub strategy: String,
    /// Push the metadata branch alongside `git push` in the pre-push
    /// hook.
    pub push_metadata: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            strategy: "manual-commit".to_string(),
            push_metadata: true,
        }
    }
}

impl Settings {
    /// Load from `<worktree>/.entire/settings.json`, then apply env
    /// overrides (`ENTIRE_STRATEGY`, `ENTIRE_PUSH_METADATA`).
    pub fn load(worktree: &Path) -> Self {
        let mut settings: Settings = std::fs::read_to_string(worktree.join(".entire").join("settings.json"))
            .ok()
            .and_then(|data| serde_json::from_str(&data).ok())
            .unwrap_or_default();

        if let Ok(strategy) = std::env::var("ENTIRE_STRATEGY") {
            if !strategy.is_empty() {
                settings.strategy = strategy;
            }
        }
        if let Ok(push) = std::env::var("ENTIRE_PUSH_METADATA") {
            settings.push_metadata = !matches!(push.as_str(), "0" | "false" | "no");
        }
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let settings = Settings::load(tmp.path());
        assert_eq!(settings.strategy, "manual-commit");
        assert!(settings.push_metadata);
    }

    #[test]
    fn reads_settings_file() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join(".entire")).unwrap();
        std::fs::write(
            tmp.path().join(".entire/settings.json"),
            r#"{"push_metadata": false}"#,
        )
        .unwrap();
        let settings = Settings::load(tmp.path());
        assert!(!settings.push_metadata);
        assert_eq!(settings.strategy, "manual-commit");
    }
}

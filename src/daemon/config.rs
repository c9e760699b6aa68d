use std::{io::ErrorKind, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const CONFIG_FILE_NAME: &str = "config.json";
pub const API_KEY_VARIABLE: &str = "ANTHROPIC_API_KEY";

/// Tunables of the tracking engine. Read from `config.json` in the application directory; every
/// field falls back to its default when missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Idle seconds after which the user is considered away.
    pub afk_threshold_s: u64,
    pub screenshot_interval_s: u64,
    /// Side of the square captured around the pointer.
    pub screenshot_region_px: u32,
    pub screenshot_quality: u8,
    pub input_aggregate_interval_s: u64,
    pub retention_days: u32,
    pub tick_ms: u64,
    pub capture_timeout_s: u64,
    pub classifier_timeout_s: u64,
    /// Process whose presence is sampled on every AFK transition.
    pub watched_process: String,
    pub classifier_model: String,
    pub vision_endpoint: String,
    pub registry_url: Option<String>,
    pub registry_refresh_s: u64,
    /// Project names tracked in addition to the ones served by the registry.
    pub projects: Vec<String>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            afk_threshold_s: 180,
            screenshot_interval_s: 20,
            screenshot_region_px: 400,
            screenshot_quality: 60,
            input_aggregate_interval_s: 60,
            retention_days: 7,
            tick_ms: 1000,
            capture_timeout_s: 5,
            classifier_timeout_s: 15,
            watched_process: "claude".into(),
            classifier_model: "claude-haiku-4-5-20251001".into(),
            vision_endpoint: "https://api.anthropic.com".into(),
            registry_url: Some("http://127.0.0.1:9000/api/projects".into()),
            registry_refresh_s: 600,
            projects: vec![],
        }
    }
}

impl TrackerConfig {
    /// Loads `config.json` from `dir`. A missing file yields defaults, a malformed one is an
    /// error.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        let config = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str::<TrackerConfig>(&content)
                .with_context(|| format!("Malformed configuration in {path:?}"))?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No configuration at {path:?}, using defaults");
                TrackerConfig::default()
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to read {path:?}")),
        };
        Ok(config.normalized())
    }

    fn normalized(mut self) -> Self {
        self.screenshot_quality = self.screenshot_quality.min(100);
        self.tick_ms = self.tick_ms.max(1);
        self
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn screenshot_interval(&self) -> Duration {
        Duration::from_secs(self.screenshot_interval_s)
    }

    pub fn input_aggregate_interval(&self) -> Duration {
        Duration::from_secs(self.input_aggregate_interval_s)
    }

    pub fn registry_refresh(&self) -> Duration {
        Duration::from_secs(self.registry_refresh_s)
    }

    pub fn capture_timeout(&self) -> Duration {
        Duration::from_secs(self.capture_timeout_s)
    }

    pub fn classifier_timeout(&self) -> Duration {
        Duration::from_secs(self.classifier_timeout_s)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;
    use tempfile::tempdir;

    use super::{TrackerConfig, CONFIG_FILE_NAME};

    #[test]
    fn test_missing_file_gives_defaults() -> Result<()> {
        let dir = tempdir()?;
        let config = TrackerConfig::load(dir.path())?;
        assert_eq!(config, TrackerConfig::default());
        assert_eq!(config.afk_threshold_s, 180);
        assert_eq!(config.screenshot_interval_s, 20);
        assert_eq!(config.screenshot_region_px, 400);
        assert_eq!(config.input_aggregate_interval_s, 60);
        assert_eq!(config.retention_days, 7);
        Ok(())
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() -> Result<()> {
        let dir = tempdir()?;
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            r#"{"afk_threshold_s": 60, "screenshot_quality": 250, "projects": ["Alpha"], "unknown": 1}"#,
        )?;
        let config = TrackerConfig::load(dir.path())?;
        assert_eq!(config.afk_threshold_s, 60);
        assert_eq!(config.screenshot_quality, 100);
        assert_eq!(config.projects, vec!["Alpha".to_string()]);
        assert_eq!(config.screenshot_interval_s, 20);
        Ok(())
    }

    #[test]
    fn test_malformed_file_is_an_error() -> Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "{ not json")?;
        assert!(TrackerConfig::load(dir.path()).is_err());
        Ok(())
    }
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Per-project configuration, read from `canonkeeper.toml` at the project
/// root. Every section is optional; a missing file yields the defaults.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProjectConfig {
    #[serde(default)]
    pub project_name: Option<String>,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub style: StyleConfig,
    #[serde(default)]
    pub watch: WatchConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `null` disables extraction entirely; `cloud` posts to `base_url`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key. The key itself never lives
    /// in the config file.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "null"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct StyleConfig {
    /// Project-wide n-gram count threshold for repetition findings.
    #[serde(default = "default_project_threshold")]
    pub repetition_project_count: u32,
    /// Per-scene n-gram count threshold.
    #[serde(default = "default_scene_threshold")]
    pub repetition_scene_count: u32,
    /// Number of preceding scenes in the rolling tone baseline.
    #[serde(default = "default_tone_baseline")]
    pub tone_baseline_scenes: usize,
}

impl Default for StyleConfig {
    fn default() -> Self {
        Self {
            repetition_project_count: default_project_threshold(),
            repetition_scene_count: default_scene_threshold(),
            tone_baseline_scenes: default_tone_baseline(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WatchConfig {
    /// Quiet period after the last file-change event before ingest runs.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
        }
    }
}

fn default_provider() -> String {
    "null".to_string()
}
fn default_model() -> String {
    "default".to_string()
}
fn default_api_key_env() -> String {
    "CANONKEEPER_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_project_threshold() -> u32 {
    12
}
fn default_scene_threshold() -> u32 {
    3
}
fn default_tone_baseline() -> usize {
    10
}
fn default_debounce_ms() -> u64 {
    2000
}

/// Load `canonkeeper.toml` from the project root; defaults apply when the
/// file is absent.
pub fn load_project_config(root: &Path) -> Result<ProjectConfig> {
    let config_path = root.join("canonkeeper.toml");
    if !config_path.exists() {
        return Ok(ProjectConfig::default());
    }

    let content = std::fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
    let config: ProjectConfig =
        toml::from_str(&content).with_context(|| "Failed to parse canonkeeper.toml")?;

    match config.llm.provider.as_str() {
        "null" | "cloud" => {}
        other => anyhow::bail!("Unknown llm provider: '{}'. Must be null or cloud.", other),
    }
    if config.llm.provider == "cloud" && config.llm.base_url.is_none() {
        anyhow::bail!("llm.base_url must be set when provider is 'cloud'");
    }
    if config.style.tone_baseline_scenes == 0 {
        anyhow::bail!("style.tone_baseline_scenes must be > 0");
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = load_project_config(tmp.path()).unwrap();
        assert_eq!(config.llm.provider, "null");
        assert!(!config.llm.is_enabled());
        assert_eq!(config.style.repetition_project_count, 12);
        assert_eq!(config.watch.debounce_ms, 2000);
    }

    #[test]
    fn partial_file_keeps_section_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("canonkeeper.toml"),
            "[style]\nrepetition_project_count = 6\n",
        )
        .unwrap();
        let config = load_project_config(tmp.path()).unwrap();
        assert_eq!(config.style.repetition_project_count, 6);
        assert_eq!(config.style.repetition_scene_count, 3);
        assert_eq!(config.llm.provider, "null");
    }

    #[test]
    fn cloud_provider_requires_base_url() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("canonkeeper.toml"),
            "[llm]\nprovider = \"cloud\"\n",
        )
        .unwrap();
        assert!(load_project_config(tmp.path()).is_err());
    }
}

//! Configuration loading and management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::hooks::HooksConfig;
use crate::workflow::{EstimatorConfig, ProfileCatalog, WorkflowProfile};
use crate::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding checkpoints, sessions and task records
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Executor settings
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Validator settings
    #[serde(default)]
    pub validator: ValidatorConfig,

    /// Scope/complexity heuristic knobs
    #[serde(default)]
    pub estimator: EstimatorConfig,

    /// Lifecycle hooks
    #[serde(default)]
    pub hooks: HooksConfig,

    /// External tracker settings
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Replacement profile catalog (empty = built-in profiles)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profiles: Vec<WorkflowProfile>,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(".stageflow")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            executor: ExecutorConfig::default(),
            validator: ValidatorConfig::default(),
            estimator: EstimatorConfig::default(),
            hooks: HooksConfig::default(),
            tracker: TrackerConfig::default(),
            profiles: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from file or default locations
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(PathBuf::from).or_else(|| {
            // Try .stageflow/config.toml in current directory
            let local = PathBuf::from(".stageflow/config.toml");
            if local.exists() {
                return Some(local);
            }

            // Try ~/.stageflow/config.toml
            dirs::home_dir().map(|h| h.join(".stageflow/config.toml"))
        });

        let mut config = match config_path {
            Some(p) if p.exists() => {
                let content = std::fs::read_to_string(&p)?;
                Self::parse(&content)?
            }
            Some(p) if path.is_some() => {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            _ => Config::default(),
        };

        // A hooks.toml next to the state merges after inline hooks
        let hooks_file = config.state_dir().join("hooks.toml");
        if hooks_file.exists() {
            let extra = HooksConfig::load(&hooks_file)?;
            config.hooks.merge(extra);
        }

        Ok(config)
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;

        let mut names = std::collections::HashSet::new();
        for profile in &config.profiles {
            profile.validate()?;
            if !names.insert(profile.name.as_str()) {
                return Err(Error::Config(format!(
                    "Profile {} is defined twice",
                    profile.name
                )));
            }
        }

        Ok(config)
    }

    /// State directory with `~` and env vars expanded
    pub fn state_dir(&self) -> PathBuf {
        let raw = self.state_dir.to_string_lossy();
        match shellexpand::full(&raw) {
            Ok(expanded) => PathBuf::from(expanded.as_ref()),
            Err(_) => self.state_dir.clone(),
        }
    }

    /// Directory for workflow checkpoints
    pub fn checkpoint_dir(&self) -> PathBuf {
        self.state_dir().join("checkpoints")
    }

    /// Directory for session records
    pub fn session_dir(&self) -> PathBuf {
        self.state_dir().join("sessions")
    }

    /// Directory for local task records
    pub fn task_dir(&self) -> PathBuf {
        self.state_dir().join("tasks")
    }

    /// Profile catalog: configured profiles, or the built-in set
    pub fn catalog(&self) -> ProfileCatalog {
        if self.profiles.is_empty() {
            ProfileCatalog::builtin()
        } else {
            ProfileCatalog::new(self.profiles.clone())
        }
    }
}

/// Executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Loopbacks allowed per step before the run aborts
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Upper bound on a single stage handler call
    #[serde(default = "default_stage_timeout", with = "humantime_serde")]
    pub stage_timeout: Option<Duration>,
}

fn default_max_iterations() -> u32 {
    3
}

fn default_stage_timeout() -> Option<Duration> {
    Some(Duration::from_secs(30 * 60))
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            stage_timeout: default_stage_timeout(),
        }
    }
}

/// Validator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Minimum classifier confidence before recommending another profile
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,

    /// Estimated minutes saved per pipeline step avoided
    #[serde(default = "default_minutes_per_step")]
    pub minutes_per_step: u32,
}

fn default_confidence_threshold() -> f64 {
    0.7
}

fn default_minutes_per_step() -> u32 {
    15
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
            minutes_per_step: default_minutes_per_step(),
        }
    }
}

/// Which tracker backs hydration/dehydration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerKind {
    /// SCUD task graph on disk
    #[default]
    Scud,
    /// In-process tracker (dry runs)
    Memory,
}

/// External tracker configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Tracker backend
    #[serde(default)]
    pub kind: TrackerKind,

    /// SCUD group to sync into (defaults to the active group)
    #[serde(default)]
    pub group: Option<String>,

    /// Project root for the tracker (defaults to the current directory)
    #[serde(default)]
    pub project_root: Option<PathBuf>,
}

/// Initialize the state directory with a default config
pub fn init(config: &Config) -> Result<PathBuf> {
    let state_dir = config.state_dir();

    for dir in [
        state_dir.clone(),
        config.checkpoint_dir(),
        config.session_dir(),
        config.task_dir(),
    ] {
        if !dir.exists() {
            std::fs::create_dir_all(&dir)?;
        }
    }

    // Create default config if it doesn't exist
    let config_path = state_dir.join("config.toml");
    if !config_path.exists() {
        let config_str = toml::to_string_pretty(&Config::default())
            .map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(&config_path, config_str)?;
    }

    Ok(state_dir)
}

/// Serde adapter for optional durations written as humantime strings ("30s", "5m")
pub(crate) mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => {
                let s = humantime::format_duration(*d).to_string();
                serializer.serialize_some(&s)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        match opt {
            Some(s) => humantime::parse_duration(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

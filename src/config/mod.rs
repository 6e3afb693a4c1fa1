use crate::error::{Result, WardenError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Restart policy for a managed application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartMode {
    /// Relaunch after every exit, subject to backoff and the rapid-crash cap.
    Always,
    /// Never relaunch; any exit is terminal.
    Never,
}

impl std::fmt::Display for RestartMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartMode::Always => write!(f, "always"),
            RestartMode::Never => write!(f, "never"),
        }
    }
}

/// Typed environment variable value. Config files may use strings, numbers
/// or booleans (`PORT = 3000`); everything is rendered to a string at spawn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    String(String),
    Number(i64),
    Bool(bool),
}

impl EnvValue {
    pub fn render(&self) -> String {
        match self {
            EnvValue::String(s) => s.clone(),
            EnvValue::Number(n) => n.to_string(),
            EnvValue::Bool(b) => b.to_string(),
        }
    }
}

/// Backoff parameters for the restart policy engine. All of these are
/// configurable per application (none are hard-coded defaults baked into the
/// engine).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffSettings {
    /// Base delay before the first relaunch (in seconds)
    #[serde(default = "default_restart_delay")]
    pub base_delay_secs: u64,

    /// Upper bound on the exponential delay (in seconds)
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,

    /// A run shorter than this counts as a rapid crash; a run longer than
    /// this resets the backoff (in seconds)
    #[serde(default = "default_stability")]
    pub stability_secs: u64,

    /// Consecutive rapid crashes tolerated before the instance is failed
    #[serde(default = "default_max_rapid_crashes")]
    pub max_rapid_crashes: u32,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            base_delay_secs: default_restart_delay(),
            max_delay_secs: default_max_delay(),
            stability_secs: default_stability(),
            max_rapid_crashes: default_max_rapid_crashes(),
        }
    }
}

impl BackoffSettings {
    pub fn stability_threshold(&self) -> Duration {
        Duration::from_secs(self.stability_secs)
    }
}

/// Immutable description of a managed application. Created once from a
/// configuration file or the CLI; never mutated after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSpec {
    /// Application name (unique identifier)
    pub name: String,

    /// Command to execute (absolute path or resolved via PATH)
    pub command: String,

    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the child process
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Environment variables (key unique, order irrelevant)
    #[serde(default)]
    pub env: BTreeMap<String, EnvValue>,

    /// Number of instance slots to run
    #[serde(default = "default_instances")]
    pub instances: usize,

    /// Restart policy
    #[serde(default = "default_restart_mode")]
    pub restart: RestartMode,

    /// Backoff parameters for crash recovery
    #[serde(default)]
    pub backoff: BackoffSettings,

    /// Resident memory ceiling; breach forces a restart. Accepts raw bytes
    /// or human sizes like "512M" / "1G".
    #[serde(default, deserialize_with = "deserialize_memory_opt")]
    pub max_memory: Option<u64>,

    /// Standard-output log file (defaults to <log_dir>/<slot>-out.log)
    #[serde(default)]
    pub out_file: Option<PathBuf>,

    /// Standard-error log file (defaults to <log_dir>/<slot>-err.log)
    #[serde(default)]
    pub error_file: Option<PathBuf>,

    /// Combined log file receiving an interleaved copy of both streams
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Whether the combined stream is produced when log_file is set
    #[serde(default = "default_merge_logs")]
    pub merge_logs: bool,

    /// Whether log lines are prefixed with a timestamp
    #[serde(default)]
    pub time: bool,

    /// Signal sent on stop (default SIGTERM)
    #[serde(default = "default_stop_signal")]
    pub stop_signal: String,

    /// Grace period before escalating to SIGKILL (in seconds)
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,
}

// Default value functions for serde
fn default_instances() -> usize {
    1
}

fn default_restart_mode() -> RestartMode {
    RestartMode::Always
}

fn default_restart_delay() -> u64 {
    1
}

fn default_max_delay() -> u64 {
    60
}

fn default_stability() -> u64 {
    5
}

fn default_max_rapid_crashes() -> u32 {
    10
}

fn default_merge_logs() -> bool {
    true
}

fn default_stop_signal() -> String {
    "SIGTERM".to_string()
}

fn default_stop_timeout() -> u64 {
    10
}

/// Parse a memory size string: raw bytes ("1048576") or a K/M/G suffixed
/// value ("512M", "1G", optionally with a trailing B).
pub fn parse_memory_size(input: &str) -> Result<u64> {
    let s = input.trim();
    if s.is_empty() {
        return Err(WardenError::ConfigValidation(
            "empty memory size".to_string(),
        ));
    }

    let upper = s.to_ascii_uppercase();
    let stripped = upper.strip_suffix('B').unwrap_or(&upper);

    let (digits, multiplier) = match stripped.chars().last() {
        Some('K') => (&stripped[..stripped.len() - 1], 1024u64),
        Some('M') => (&stripped[..stripped.len() - 1], 1024 * 1024),
        Some('G') => (&stripped[..stripped.len() - 1], 1024 * 1024 * 1024),
        _ => (stripped, 1),
    };

    let value: u64 = digits.trim().parse().map_err(|_| {
        WardenError::ConfigValidation(format!("Invalid memory size: {}", input))
    })?;

    value.checked_mul(multiplier).ok_or_else(|| {
        WardenError::ConfigValidation(format!("Memory size overflows: {}", input))
    })
}

fn deserialize_memory_opt<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Bytes(u64),
        Human(String),
    }

    let raw: Option<Raw> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(Raw::Bytes(n)) => Ok(Some(n)),
        Some(Raw::Human(s)) => parse_memory_size(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

impl AppSpec {
    /// Load application specs from a file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<Vec<AppSpec>> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| WardenError::Config(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let specs = match extension {
            "toml" => Self::parse_toml(&contents)?,
            "json" => Self::parse_json(&contents)?,
            _ => {
                return Err(WardenError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        for spec in &specs {
            spec.validate()?;
        }

        Ok(specs)
    }

    fn parse_toml(contents: &str) -> Result<Vec<AppSpec>> {
        #[derive(Deserialize)]
        struct ConfigFile {
            #[serde(default)]
            apps: Vec<AppSpec>,
            #[serde(flatten)]
            single: Option<AppSpec>,
        }

        let config_file: ConfigFile = toml::from_str(contents)
            .map_err(|e| WardenError::InvalidConfig(format!("Failed to parse TOML: {}", e)))?;

        if let Some(single) = config_file.single {
            Ok(vec![single])
        } else if !config_file.apps.is_empty() {
            Ok(config_file.apps)
        } else {
            Err(WardenError::InvalidConfig(
                "No application configuration found in file".to_string(),
            ))
        }
    }

    fn parse_json(contents: &str) -> Result<Vec<AppSpec>> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum ConfigFile {
            Single(AppSpec),
            Multiple { apps: Vec<AppSpec> },
        }

        let config_file: ConfigFile = serde_json::from_str(contents)
            .map_err(|e| WardenError::InvalidConfig(format!("Failed to parse JSON: {}", e)))?;

        match config_file {
            ConfigFile::Single(spec) => Ok(vec![spec]),
            ConfigFile::Multiple { apps } => {
                if apps.is_empty() {
                    Err(WardenError::InvalidConfig(
                        "No application configuration found in file".to_string(),
                    ))
                } else {
                    Ok(apps)
                }
            }
        }
    }

    /// Validate the spec. Runs at load time so bad definitions never reach
    /// the supervisor.
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(WardenError::MissingConfigField("name".to_string()));
        }

        if self.command.is_empty() {
            return Err(WardenError::MissingConfigField("command".to_string()));
        }

        if self.instances == 0 {
            return Err(WardenError::ConfigValidation(
                "instances must be at least 1".to_string(),
            ));
        }

        if self.instances > 100 {
            return Err(WardenError::ConfigValidation(
                "instances cannot exceed 100".to_string(),
            ));
        }

        if self.backoff.max_rapid_crashes == 0 {
            return Err(WardenError::ConfigValidation(
                "max_rapid_crashes must be at least 1".to_string(),
            ));
        }

        for key in self.env.keys() {
            if key.is_empty() || key.contains('=') || key.contains('\0') {
                return Err(WardenError::ConfigValidation(format!(
                    "Invalid environment variable name: {:?}",
                    key
                )));
            }
        }

        let valid_signals = [
            "SIGTERM", "SIGINT", "SIGQUIT", "SIGKILL", "SIGHUP", "SIGUSR1", "SIGUSR2",
        ];
        if !valid_signals.contains(&self.stop_signal.as_str()) {
            return Err(WardenError::ConfigValidation(format!(
                "Invalid stop_signal: {}. Must be one of: {}",
                self.stop_signal,
                valid_signals.join(", ")
            )));
        }

        if let Some(ref cwd) = self.cwd {
            if !cwd.exists() {
                return Err(WardenError::ConfigValidation(format!(
                    "Working directory does not exist: {}",
                    cwd.display()
                )));
            }
            if !cwd.is_dir() {
                return Err(WardenError::ConfigValidation(format!(
                    "Working directory is not a directory: {}",
                    cwd.display()
                )));
            }
        }

        Ok(())
    }

    /// Instance slot names: the bare name for a single instance, otherwise
    /// name-0 .. name-N-1.
    pub fn slot_names(&self) -> Vec<String> {
        if self.instances == 1 {
            vec![self.name.clone()]
        } else {
            (0..self.instances)
                .map(|i| format!("{}-{}", self.name, i))
                .collect()
        }
    }

    /// Get stop grace period as Duration
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

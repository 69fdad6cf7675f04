//! Configuration source
//!
//! A single TOML document describes timing, runtime budgets, the input data
//! table and the action definitions. [`InputConfig::compile`] validates all of
//! it at once and produces the immutable runtime pieces; nothing here is
//! consulted again once the system is running.

use crate::action::{ActionRegistry, ActiveInputScheme, DefinitionConfig, SchemeBook};
use crate::executor::{ExecutorOptions, Scheduling};
use crate::input::{DeviceFamily, Input, InputCatalog, InputId, InputKind, Phase, StateOptions};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = "openinput";
const CONFIG_FILE: &str = "input.toml";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    pub active_time_threshold_ms: i64,
    pub tap_reactivation_time_ms: i64,
    pub analog_activation_threshold: f32,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            active_time_threshold_ms: 150,
            tap_reactivation_time_ms: 250,
            analog_activation_threshold: 0.05,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct RuntimeConfig {
    pub max_pointer_samples: usize,
    pub controller_read_timeout_ms: i64,
    pub max_user_concurrency: usize,
    /// Read users concurrently instead of one after another
    pub parallel_users: bool,
    /// Run each user's read on its own tokio task
    pub isolate_user_reads: bool,
    pub stats_interval_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_pointer_samples: 8,
            controller_read_timeout_ms: 20,
            max_user_concurrency: 4,
            parallel_users: false,
            isolate_user_reads: false,
            stats_interval_secs: 30,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InputKindTag {
    Digital,
    Analog,
    Pointer,
    Composite,
}

/// One row of the input data table
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
pub struct InputRecord {
    pub id: InputId,
    #[serde(default)]
    pub name: Option<String>,
    pub family: DeviceFamily,
    pub kind: InputKindTag,
    /// Member inputs of a composite
    #[serde(default)]
    pub members: Vec<InputId>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct InputConfig {
    pub timing: TimingConfig,
    pub runtime: RuntimeConfig,
    pub inputs: Vec<InputRecord>,
    pub definitions: Vec<DefinitionConfig>,
}

/// One problem found while validating a configuration
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ValidationIssue {
    #[error("{field} must not be negative (got {value})")]
    NegativeTiming { field: &'static str, value: i64 },

    #[error("{field} must be at least 1")]
    ZeroLimit { field: &'static str },

    #[error("analog activation threshold must be within [0, 1), got {0}")]
    ThresholdOutOfRange(f32),

    #[error("input {input} declared twice for {family}")]
    DuplicateInput { family: DeviceFamily, input: InputId },

    #[error("composite {input} ({family}) has no members")]
    EmptyComposite { family: DeviceFamily, input: InputId },

    #[error("composite {composite} ({family}) references unknown input {member}")]
    UnknownMember {
        family: DeviceFamily,
        composite: InputId,
        member: InputId,
    },

    #[error("composite {input} ({family}) contains itself")]
    SelfReferencingComposite { family: DeviceFamily, input: InputId },

    #[error("input {input} ({family}) lists members but is not a composite")]
    UnexpectedMembers { family: DeviceFamily, input: InputId },

    #[error("definition {0} declared twice")]
    DuplicateDefinition(String),

    #[error("scheme {0} declared twice")]
    DuplicateScheme(ActiveInputScheme),

    #[error("scheme {scheme} maps unknown action {action}")]
    UnknownAction {
        scheme: ActiveInputScheme,
        action: String,
    },

    #[error("scheme {scheme} maps unknown input {input} ({family})")]
    UnknownInput {
        scheme: ActiveInputScheme,
        family: DeviceFamily,
        input: InputId,
    },

    #[error("scheme {scheme} maps {input} with no trigger phases")]
    EmptyPhases {
        scheme: ActiveInputScheme,
        input: InputId,
    },

    #[error("scheme {scheme} binds {input} ({family}) in phase {phase} more than once")]
    DuplicateBinding {
        scheme: ActiveInputScheme,
        family: DeviceFamily,
        input: InputId,
        phase: Phase,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {}", render_issues(.0))]
    Validation(Vec<ValidationIssue>),

    #[error("Action {0} registered twice")]
    DuplicateAction(String),
}

fn render_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Runtime budgets derived from [`RuntimeConfig`]
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeOptions {
    pub controller_read_timeout: Duration,
    pub users: ExecutorOptions,
    pub stats_interval: Duration,
}

/// Validated, immutable output of [`InputConfig::compile`]
#[derive(Debug)]
pub struct CompiledConfig {
    pub catalog: InputCatalog,
    pub schemes: SchemeBook,
    pub state: StateOptions,
    pub runtime: RuntimeOptions,
}

impl InputConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| eyre!("Failed to parse input config: {}", e))
    }

    /// Loads the config file, falling back to defaults when it does not exist
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
        {
            warn!(
                "Config file {} does not exist, using default",
                path.display()
            );
            return Ok(Self::default_config());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let config = Self::from_toml_str(&content)?;
        info!(
            "Loaded {} inputs and {} definitions from {}",
            config.inputs.len(),
            config.definitions.len(),
            path.display()
        );
        Ok(config)
    }

    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| {
            warn!("Could not determine config directory, using current directory");
            PathBuf::from(".")
        });
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    /// Built-in configuration used when no file is present
    pub fn default_config() -> Self {
        Self::parse_or_empty(DEFAULT_CONFIG)
    }

    fn parse_or_empty(content: &str) -> Self {
        match Self::from_toml_str(content) {
            Ok(config) => config,
            Err(e) => {
                warn!("Built-in config is invalid, using an empty one: {}", e);
                Self::default()
            }
        }
    }

    /// Checks timing and runtime values; input and scheme issues are found by `compile`
    pub fn validate(&self) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        let timings = [
            ("active_time_threshold_ms", self.timing.active_time_threshold_ms),
            ("tap_reactivation_time_ms", self.timing.tap_reactivation_time_ms),
            ("controller_read_timeout_ms", self.runtime.controller_read_timeout_ms),
        ];
        for (field, value) in timings {
            if value < 0 {
                issues.push(ValidationIssue::NegativeTiming { field, value });
            }
        }
        let threshold = self.timing.analog_activation_threshold;
        if !(0.0..1.0).contains(&threshold) {
            issues.push(ValidationIssue::ThresholdOutOfRange(threshold));
        }
        if self.runtime.max_pointer_samples == 0 {
            issues.push(ValidationIssue::ZeroLimit {
                field: "max_pointer_samples",
            });
        }
        if self.runtime.max_user_concurrency == 0 {
            issues.push(ValidationIssue::ZeroLimit {
                field: "max_user_concurrency",
            });
        }
        issues
    }

    /// Validates everything and builds the runtime catalog, schemes and options
    pub fn compile(&self, registry: &ActionRegistry) -> Result<CompiledConfig, ConfigError> {
        let mut issues = self.validate();
        let catalog = self.build_catalog(&mut issues);
        let schemes = SchemeBook::build(&self.definitions, &catalog, registry, &mut issues);

        if !issues.is_empty() {
            warn!("Configuration rejected with {} issue(s)", issues.len());
            return Err(ConfigError::Validation(issues));
        }
        debug!(
            "Compiled {} inputs and {} schemes",
            catalog.len(),
            schemes.len()
        );

        Ok(CompiledConfig {
            catalog,
            schemes,
            state: self.state_options(),
            runtime: self.runtime_options(),
        })
    }

    fn build_catalog(&self, issues: &mut Vec<ValidationIssue>) -> InputCatalog {
        let declared: BTreeSet<(DeviceFamily, &InputId)> =
            self.inputs.iter().map(|r| (r.family, &r.id)).collect();
        let mut catalog = InputCatalog::new();

        for record in &self.inputs {
            let kind = match record.kind {
                InputKindTag::Digital => InputKind::Digital,
                InputKindTag::Analog => InputKind::Analog,
                InputKindTag::Pointer => InputKind::Pointer,
                InputKindTag::Composite => {
                    let members: BTreeSet<InputId> = record.members.iter().cloned().collect();
                    if members.is_empty() {
                        issues.push(ValidationIssue::EmptyComposite {
                            family: record.family,
                            input: record.id.clone(),
                        });
                    }
                    if members.contains(&record.id) {
                        issues.push(ValidationIssue::SelfReferencingComposite {
                            family: record.family,
                            input: record.id.clone(),
                        });
                    }
                    for member in &members {
                        if member != &record.id && !declared.contains(&(record.family, member)) {
                            issues.push(ValidationIssue::UnknownMember {
                                family: record.family,
                                composite: record.id.clone(),
                                member: member.clone(),
                            });
                        }
                    }
                    InputKind::Composite { members }
                }
            };
            if record.kind != InputKindTag::Composite && !record.members.is_empty() {
                issues.push(ValidationIssue::UnexpectedMembers {
                    family: record.family,
                    input: record.id.clone(),
                });
            }

            let mut input = Input::new(record.id.clone(), record.family, kind);
            if let Some(name) = &record.name {
                input = input.with_name(name.clone());
            }
            if !catalog.insert(input) {
                issues.push(ValidationIssue::DuplicateInput {
                    family: record.family,
                    input: record.id.clone(),
                });
            }
        }
        catalog
    }

    pub fn state_options(&self) -> StateOptions {
        StateOptions {
            active_time_threshold: millis(self.timing.active_time_threshold_ms),
            tap_reactivation_time: millis(self.timing.tap_reactivation_time_ms),
            analog_activation_threshold: self.timing.analog_activation_threshold,
            max_pointer_samples: self.runtime.max_pointer_samples,
        }
    }

    pub fn runtime_options(&self) -> RuntimeOptions {
        let users = if self.runtime.parallel_users {
            ExecutorOptions {
                max_concurrency: self.runtime.max_user_concurrency,
                scheduling: if self.runtime.isolate_user_reads {
                    Scheduling::Isolated
                } else {
                    Scheduling::Inline
                },
            }
        } else {
            ExecutorOptions::sequential()
        };
        RuntimeOptions {
            controller_read_timeout: millis(self.runtime.controller_read_timeout_ms),
            users,
            stats_interval: Duration::from_secs(self.runtime.stats_interval_secs),
        }
    }
}

// negative values never get here once validated
fn millis(value: i64) -> Duration {
    Duration::from_millis(value.max(0) as u64)
}

const DEFAULT_CONFIG: &str = r#"
[timing]
active_time_threshold_ms = 150
tap_reactivation_time_ms = 250
analog_activation_threshold = 0.05

[runtime]
max_pointer_samples = 8
controller_read_timeout_ms = 20
max_user_concurrency = 4
parallel_users = false
isolate_user_reads = false
stats_interval_secs = 30

[[inputs]]
id = "space"
name = "Space"
family = "keyboard"
kind = "digital"

[[inputs]]
id = "ctrl"
name = "Control"
family = "keyboard"
kind = "digital"

[[inputs]]
id = "s"
name = "S"
family = "keyboard"
kind = "digital"

[[inputs]]
id = "save"
name = "Ctrl+S"
family = "keyboard"
kind = "composite"
members = ["ctrl", "s"]

[[inputs]]
id = "cursor"
name = "Cursor"
family = "mouse"
kind = "pointer"

[[inputs]]
id = "south"
name = "South button"
family = "gamepad"
kind = "digital"

[[inputs]]
id = "left_stick"
name = "Left stick"
family = "gamepad"
kind = "analog"

[[definitions]]
name = "platformer"

[[definitions.schemes]]
name = "default"

[[definitions.schemes.maps]]
input = "space"
family = "keyboard"
action = "jump"

[[definitions.schemes.maps]]
input = "save"
family = "keyboard"
action = "quick_save"

[[definitions.schemes.maps]]
input = "south"
family = "gamepad"
action = "jump"

[[definitions.schemes.maps]]
input = "left_stick"
family = "gamepad"
action = "move"
phases = ["start", "active"]

[[definitions.schemes.maps]]
input = "cursor"
family = "mouse"
action = "aim"
"#;

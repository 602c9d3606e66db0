use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::cli::Cli;
use crate::error::{ConfigError, Result};

/// Address the harness asks the kernel for when mapping code.
/// Stable addresses make traces comparable across runs.
pub const DEFAULT_LOAD_ADDRESS: u64 = 0x1337_0000;

pub const DEFAULT_TIMEOUT_SECS: u32 = 10;

/// Harness configuration, loaded from ~/.trapline/config.toml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Seconds before the watchdog kills the process
    pub timeout_secs: u32,

    /// Preferred mapping address; `None` lets the kernel choose
    pub load_address: Option<u64>,

    /// What to do with a trailing half byte
    pub odd_length: OddLengthPolicy,

    /// Settings for --trace
    pub trace: TraceConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OddLengthPolicy {
    #[default]
    Reject,
    Truncate,
}

/// Tracer settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Run under the built-in tracer; implied by `step`
    pub enabled: bool,
    /// Single-step the payload between the two traps
    pub step: bool,
    /// Stop recording steps after this many instructions
    pub max_steps: usize,
    /// Bytes kept from each register's pointee and at each step's pc
    pub snippet_length: usize,
    /// Shortest NUL-terminated text reported as a register's string
    pub min_string_length: usize,
    /// Which step addresses are reported
    pub visibility: VisibilityFilter,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            step: false,
            max_steps: 1024,
            snippet_length: 16,
            min_string_length: 4,
            visibility: VisibilityFilter::default(),
        }
    }
}

/// Address/mask filters applied to single-step stops.
///
/// An address is hidden when `addr & hidden_mask == hidden_address`. With a
/// visible pair set, only addresses where `addr & visible_mask ==
/// visible_address` are shown; without one, only the code region is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct VisibilityFilter {
    pub hidden_address: Option<u64>,
    pub hidden_mask: Option<u64>,
    pub visible_address: Option<u64>,
    pub visible_mask: Option<u64>,
}

impl VisibilityFilter {
    pub fn is_visible(&self, addr: u64, in_region: bool) -> bool {
        if let (Some(hidden), Some(mask)) = (self.hidden_address, self.hidden_mask) {
            if addr & mask == hidden {
                return false;
            }
        }
        match (self.visible_address, self.visible_mask) {
            (Some(visible), Some(mask)) => addr & mask == visible,
            _ => in_region,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.hidden_address.is_some() != self.hidden_mask.is_some() {
            return Err(ConfigError::Invalid(
                "hidden_address and hidden_mask must be set together".into(),
            )
            .into());
        }
        if self.visible_address.is_some() != self.visible_mask.is_some() {
            return Err(ConfigError::Invalid(
                "visible_address and visible_mask must be set together".into(),
            )
            .into());
        }
        Ok(())
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            load_address: Some(DEFAULT_LOAD_ADDRESS),
            odd_length: OddLengthPolicy::Reject,
            trace: TraceConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Parse a config file. Unlike the default location, an explicit path
    /// that cannot be read is an error.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileRead {
            path: path.display().to_string(),
            source,
        })?;
        let config: HarnessConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply command-line overrides on top of file values.
    pub fn merge_cli_args(&mut self, cli: &Cli) {
        if let Some(timeout) = cli.timeout {
            self.timeout_secs = timeout;
        }
        if cli.no_fixed_address {
            self.load_address = None;
        } else if let Some(addr) = cli.load_address {
            self.load_address = Some(addr);
        }
        if cli.truncate_odd {
            self.odd_length = OddLengthPolicy::Truncate;
        }
        if cli.step {
            self.trace.step = true;
        }
        if cli.tracing() || self.trace.step {
            self.trace.enabled = true;
        }
        if let Some(max_steps) = cli.max_steps {
            self.trace.max_steps = max_steps;
        }
        let filter = &mut self.trace.visibility;
        if cli.hidden_address.is_some() {
            filter.hidden_address = cli.hidden_address;
        }
        if cli.hidden_mask.is_some() {
            filter.hidden_mask = cli.hidden_mask;
        }
        if cli.visible_address.is_some() {
            filter.visible_address = cli.visible_address;
        }
        if cli.visible_mask.is_some() {
            filter.visible_mask = cli.visible_mask;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeout_secs must be greater than zero".into()).into());
        }
        if self.trace.snippet_length == 0 {
            return Err(
                ConfigError::Invalid("trace.snippet_length must be greater than zero".into()).into(),
            );
        }
        self.trace.visibility.validate()
    }
}

/// Resolve the effective configuration: explicit --config, else the
/// default file if present, else built-in defaults; then CLI overrides.
pub fn load_config(cli: &Cli) -> Result<HarnessConfig> {
    let mut config = match &cli.config {
        Some(path) => HarnessConfig::from_file(path)?,
        None => load_default_config(),
    };
    config.merge_cli_args(cli);
    config.validate()?;
    if !config.trace.enabled && (cli.output.is_some() || cli.verbose > 0) {
        return Err(ConfigError::Invalid(
            "--output and --verbose only apply to traced runs (--trace, --step or [trace] enabled)"
                .into(),
        )
        .into());
    }
    Ok(config)
}

fn load_default_config() -> HarnessConfig {
    let path = config_path();
    if !path.exists() {
        return HarnessConfig::default();
    }
    match HarnessConfig::from_file(&path) {
        Ok(config) => config,
        Err(e) => {
            log::warn!("{}. Using defaults.", e);
            HarnessConfig::default()
        }
    }
}

/// Returns the path to ~/.trapline/config.toml
pub fn config_path() -> PathBuf {
    trapline_dir().join("config.toml")
}

/// Returns the path to ~/.trapline/
pub fn trapline_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".trapline")
}

//! Configuration management for costgate
//!
//! Configuration is assembled once and is immutable afterwards. It can come from:
//! - the fluent [`CostgateConfigBuilder`]
//! - TOML/YAML/JSON files
//! - Environment variable overrides (`COSTGATE__CACHE__PATH=...`)
//! - Reasonable defaults

use crate::error::{CoreError, CoreResult};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info};

const MINUTES_PER_DAY: u64 = 24 * 60;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct CostgateConfig {
    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub auth: AuthMode,

    #[serde(default)]
    pub warehouse: WarehouseSettings,

    #[serde(default)]
    pub pricing: PricingSettings,
}

/// Local result cache policy.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CacheSettings {
    /// Consult and populate the cache (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Directory holding cached result files (default: "./query_cache")
    #[serde(default = "default_cache_path")]
    pub path: PathBuf,

    /// Create the directory when it is missing (default: true)
    #[serde(default = "default_true")]
    pub create_if_missing: bool,

    /// How long a cached result stays eligible (default: daily)
    #[serde(default)]
    pub expiry: ExpiryPolicy,
}

/// How cached results age out.
///
/// Entries are always bucketed by the calendar day they were written on; the
/// policy decides how many day buckets a lookup is allowed to look back over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ExpiryPolicy {
    /// Results are only reused on the day they were produced.
    #[default]
    Daily,
    /// Seven day window.
    Weekly,
    /// Thirty day window.
    Monthly,
    /// Custom window in minutes.
    Custom(u64),
}

impl ExpiryPolicy {
    /// Window length in minutes.
    #[must_use]
    pub fn minutes(&self) -> u64 {
        match self {
            Self::Daily => MINUTES_PER_DAY,
            Self::Weekly => 7 * MINUTES_PER_DAY,
            Self::Monthly => 30 * MINUTES_PER_DAY,
            Self::Custom(minutes) => *minutes,
        }
    }

    /// Number of day buckets (today included) a lookup may consult.
    ///
    /// Never less than one: the current day is always eligible.
    #[must_use]
    pub fn window_days(&self) -> u32 {
        let days = self.minutes().div_ceil(MINUTES_PER_DAY).max(1);
        u32::try_from(days).unwrap_or(u32::MAX)
    }
}

impl fmt::Display for ExpiryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily => f.write_str("daily"),
            Self::Weekly => f.write_str("weekly"),
            Self::Monthly => f.write_str("monthly"),
            Self::Custom(minutes) => write!(f, "{minutes}m"),
        }
    }
}

impl FromStr for ExpiryPolicy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => other
                .strip_suffix('m')
                .unwrap_or(other)
                .parse::<u64>()
                .map(Self::Custom)
                .map_err(|_| {
                    CoreError::Config(format!(
                        "invalid cache expiry `{s}`: expected daily, weekly, monthly or a number of minutes"
                    ))
                }),
        }
    }
}

impl TryFrom<String> for ExpiryPolicy {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ExpiryPolicy> for String {
    fn from(value: ExpiryPolicy) -> Self {
        value.to_string()
    }
}

/// How the warehouse client obtains credentials.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AuthMode {
    /// Credentials from the environment (access token, ADC file or gcloud).
    #[default]
    Ambient,
    /// Explicit service account key file.
    ServiceAccount { path: PathBuf },
}

/// Remote warehouse settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WarehouseSettings {
    /// Billing project; falls back to the credentials' project when unset.
    #[serde(default)]
    pub project_id: Option<String>,

    /// Processing location (e.g. "EU"); service default when unset.
    #[serde(default)]
    pub location: Option<String>,

    /// Total dry-run attempts before estimation is declared failed (default: 3)
    #[serde(default = "default_estimate_attempts")]
    pub estimate_attempts: u32,

    /// Server-side wait per poll of a running job in milliseconds (default: 10000)
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
}

/// Pricing used to turn a byte estimate into money.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PricingSettings {
    /// On-demand price per TiB scanned, in USD (default: 6.25)
    #[serde(default = "default_usd_per_tib")]
    pub usd_per_tib: f64,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_cache_path() -> PathBuf {
    PathBuf::from("./query_cache")
}

fn default_estimate_attempts() -> u32 {
    3
}

fn default_poll_timeout_ms() -> u64 {
    10_000
}

fn default_usd_per_tib() -> f64 {
    6.25
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_cache_path(),
            create_if_missing: true,
            expiry: ExpiryPolicy::default(),
        }
    }
}

impl Default for WarehouseSettings {
    fn default() -> Self {
        Self {
            project_id: None,
            location: None,
            estimate_attempts: default_estimate_attempts(),
            poll_timeout_ms: default_poll_timeout_ms(),
        }
    }
}

impl Default for PricingSettings {
    fn default() -> Self {
        Self {
            usd_per_tib: default_usd_per_tib(),
        }
    }
}

impl CostgateConfig {
    /// Start a fluent builder seeded with defaults.
    #[must_use]
    pub fn builder() -> CostgateConfigBuilder {
        CostgateConfigBuilder::default()
    }

    /// Load configuration from multiple sources with precedence:
    /// 1. Environment variables (highest priority)
    /// 2. The explicit `path`, when given
    /// 3. ./costgate.{toml,yaml,json}
    /// 4. Hardcoded defaults (lowest priority)
    pub fn load(path: Option<&Path>) -> CoreResult<Self> {
        let mut builder = Self::set_defaults(Config::builder())?
            .add_source(File::with_name("./costgate").required(false));

        if let Some(path) = path {
            if !path.exists() {
                return Err(CoreError::validation(format!(
                    "configuration file {} does not exist",
                    path.display()
                )));
            }
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(File::from(path));
        }

        // Example: COSTGATE__CACHE__PATH=/var/cache/costgate
        builder = builder.add_source(
            Environment::with_prefix("COSTGATE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: CostgateConfig = builder.build()?.try_deserialize()?;
        config.normalize();
        config.validate()?;

        debug!(
            cache_enabled = config.cache.enabled,
            cache_path = %config.cache.path.display(),
            expiry = %config.cache.expiry,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Set default values for all configuration options
    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> CoreResult<config::ConfigBuilder<config::builder::DefaultState>> {
        Ok(builder
            .set_default("cache.enabled", true)?
            .set_default("cache.path", "./query_cache")?
            .set_default("cache.create_if_missing", true)?
            .set_default("cache.expiry", "daily")?
            .set_default("auth.mode", "ambient")?
            .set_default("warehouse.estimate_attempts", 3)?
            .set_default("warehouse.poll_timeout_ms", 10_000)?
            .set_default("pricing.usd_per_tib", 6.25)?)
    }

    /// A zero-length expiry window means nothing is ever reusable.
    fn normalize(&mut self) {
        if self.cache.enabled && self.cache.expiry.minutes() == 0 {
            info!("cache expiry is zero minutes, disabling the cache");
            self.cache.enabled = false;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> CoreResult<()> {
        if self.cache.enabled && self.cache.path.as_os_str().is_empty() {
            return Err(CoreError::validation(
                "cache.path must not be empty while the cache is enabled",
            ));
        }

        if let AuthMode::ServiceAccount { path } = &self.auth {
            if !path.exists() {
                return Err(CoreError::validation(format!(
                    "service account file {} does not exist",
                    path.display()
                )));
            }
        }

        if self.warehouse.estimate_attempts == 0 {
            return Err(CoreError::validation(
                "warehouse.estimate_attempts must be > 0",
            ));
        }

        if !self.pricing.usd_per_tib.is_finite() || self.pricing.usd_per_tib < 0.0 {
            return Err(CoreError::validation(
                "pricing.usd_per_tib must be a non-negative number",
            ));
        }

        Ok(())
    }
}

/// Fluent construction of a [`CostgateConfig`].
#[derive(Debug, Clone, Default)]
pub struct CostgateConfigBuilder {
    config: CostgateConfig,
}

impl CostgateConfigBuilder {
    #[must_use]
    pub fn enable_cache(mut self) -> Self {
        self.config.cache.enabled = true;
        self
    }

    #[must_use]
    pub fn disable_cache(mut self) -> Self {
        self.config.cache.enabled = false;
        self
    }

    /// Relative paths resolve against the working directory at run time.
    #[must_use]
    pub fn cache_path(mut self, path: impl Into<PathBuf>, create_if_missing: bool) -> Self {
        self.config.cache.path = path.into();
        self.config.cache.create_if_missing = create_if_missing;
        self
    }

    #[must_use]
    pub fn expire_daily(mut self) -> Self {
        self.config.cache.expiry = ExpiryPolicy::Daily;
        self
    }

    #[must_use]
    pub fn expire_weekly(mut self) -> Self {
        self.config.cache.expiry = ExpiryPolicy::Weekly;
        self
    }

    #[must_use]
    pub fn expire_monthly(mut self) -> Self {
        self.config.cache.expiry = ExpiryPolicy::Monthly;
        self
    }

    /// Custom window; anything below one minute turns the cache off.
    #[must_use]
    pub fn expire_every(mut self, minutes: u64) -> Self {
        self.config.cache.expiry = ExpiryPolicy::Custom(minutes);
        if minutes < 1 {
            return self.disable_cache();
        }
        self
    }

    #[must_use]
    pub fn authenticate_with_gcloud(mut self) -> Self {
        self.config.auth = AuthMode::Ambient;
        self
    }

    /// Fails immediately when the key file does not exist.
    pub fn authenticate_with_service_account(mut self, path: impl Into<PathBuf>) -> CoreResult<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(CoreError::validation(format!(
                "service account file {} does not exist",
                path.display()
            )));
        }
        self.config.auth = AuthMode::ServiceAccount { path };
        Ok(self)
    }

    #[must_use]
    pub fn project_id(mut self, project_id: impl Into<String>) -> Self {
        self.config.warehouse.project_id = Some(project_id.into());
        self
    }

    #[must_use]
    pub fn location(mut self, location: impl Into<String>) -> Self {
        self.config.warehouse.location = Some(location.into());
        self
    }

    #[must_use]
    pub fn usd_per_tib(mut self, usd_per_tib: f64) -> Self {
        self.config.pricing.usd_per_tib = usd_per_tib;
        self
    }

    #[must_use]
    pub fn estimate_attempts(mut self, attempts: u32) -> Self {
        self.config.warehouse.estimate_attempts = attempts;
        self
    }

    pub fn build(self) -> CoreResult<CostgateConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

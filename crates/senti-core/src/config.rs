use crate::errors::CoreError;
use crate::models::{BackendKind, Sentiment};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Upper bound on cache TTL: 100 years.
pub const MAX_TTL_HOURS: u32 = 24 * 365 * 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_budget")]
    pub budget: BudgetConfig,
    #[serde(default = "default_backends")]
    pub backends: BackendsConfig,
    #[serde(default = "default_cache")]
    pub cache: CacheConfig,
    #[serde(default)]
    pub lexicon: LexiconConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            budget: default_budget(),
            backends: default_backends(),
            cache: default_cache(),
            lexicon: LexiconConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default = "default_daily_limit")]
    pub daily_limit: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendsConfig {
    /// Ordered remote chain: first is primary, second is secondary.
    #[serde(default = "default_enabled")]
    pub enabled: Vec<BackendKind>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Retries after the first attempt, for transient faults only.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_comprehend")]
    pub comprehend: ComprehendConfig,
    #[serde(default = "default_command")]
    pub command: CommandConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComprehendConfig {
    #[serde(default = "default_aws_program")]
    pub program: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_language_code")]
    pub language_code: String,
    #[serde(default = "default_max_text_bytes")]
    pub max_text_bytes: usize,
    #[serde(default = "default_comprehend_batch")]
    pub max_batch_size: usize,
    #[serde(default)]
    pub pricing: Pricing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    #[serde(default)]
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_max_text_bytes")]
    pub max_text_bytes: usize,
    #[serde(default = "default_command_batch")]
    pub max_batch_size: usize,
    #[serde(default)]
    pub pricing: Pricing,
    /// Whether the program reports emotions itself.
    #[serde(default)]
    pub reports_emotions: bool,
    /// The backend's documented vocabulary: raw label -> canonical label.
    #[serde(default = "default_command_labels")]
    pub labels: BTreeMap<String, Sentiment>,
}

/// Per-backend pricing: cost = max(ceil(chars / unit_chars), min_units) * price_per_unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pricing {
    #[serde(default = "default_unit_chars")]
    pub unit_chars: u32,
    #[serde(default = "default_price_per_unit")]
    pub price_per_unit: f64,
    #[serde(default = "default_min_units")]
    pub min_units: u32,
    /// Price per unit of key phrase extraction, charged on top.
    #[serde(default = "default_price_per_unit")]
    pub key_phrase_price_per_unit: f64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            unit_chars: default_unit_chars(),
            price_per_unit: default_price_per_unit(),
            min_units: default_min_units(),
            key_phrase_price_per_unit: default_price_per_unit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: u32,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_persist")]
    pub persist: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LexiconConfig {
    #[serde(default)]
    pub extra_positive: Vec<String>,
    #[serde(default)]
    pub extra_negative: Vec<String>,
    /// Emotion label -> trigger terms. Empty means the built-in set.
    #[serde(default)]
    pub emotions: BTreeMap<String, Vec<String>>,
}

fn default_budget() -> BudgetConfig {
    BudgetConfig {
        daily_limit: default_daily_limit(),
    }
}

fn default_backends() -> BackendsConfig {
    BackendsConfig {
        enabled: default_enabled(),
        request_timeout_ms: default_request_timeout_ms(),
        max_retries: default_max_retries(),
        retry_backoff_ms: default_retry_backoff_ms(),
        batch_size: default_batch_size(),
        max_in_flight: default_max_in_flight(),
        comprehend: default_comprehend(),
        command: default_command(),
    }
}

fn default_comprehend() -> ComprehendConfig {
    ComprehendConfig {
        program: default_aws_program(),
        region: default_region(),
        language_code: default_language_code(),
        max_text_bytes: default_max_text_bytes(),
        max_batch_size: default_comprehend_batch(),
        pricing: Pricing::default(),
    }
}

fn default_command() -> CommandConfig {
    CommandConfig {
        program: String::new(),
        args: Vec::new(),
        max_text_bytes: default_max_text_bytes(),
        max_batch_size: default_command_batch(),
        pricing: Pricing::default(),
        reports_emotions: false,
        labels: default_command_labels(),
    }
}

fn default_cache() -> CacheConfig {
    CacheConfig {
        ttl_hours: default_ttl_hours(),
        max_entries: default_max_entries(),
        persist: default_persist(),
    }
}

fn default_daily_limit() -> f64 {
    5.0
}
fn default_enabled() -> Vec<BackendKind> {
    vec![BackendKind::Comprehend]
}
fn default_request_timeout_ms() -> u64 {
    5000
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_backoff_ms() -> u64 {
    250
}
fn default_batch_size() -> usize {
    25
}
fn default_max_in_flight() -> usize {
    4
}
fn default_aws_program() -> String {
    "aws".to_string()
}
fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_language_code() -> String {
    "en".to_string()
}
fn default_max_text_bytes() -> usize {
    5000
}
fn default_comprehend_batch() -> usize {
    25
}
fn default_command_batch() -> usize {
    32
}
fn default_unit_chars() -> u32 {
    100
}
fn default_price_per_unit() -> f64 {
    0.0001
}
fn default_min_units() -> u32 {
    3
}
fn default_ttl_hours() -> u32 {
    24
}
fn default_max_entries() -> usize {
    10_000
}
fn default_persist() -> bool {
    true
}

fn default_command_labels() -> BTreeMap<String, Sentiment> {
    [
        ("positive", Sentiment::Positive),
        ("pos", Sentiment::Positive),
        ("negative", Sentiment::Negative),
        ("neg", Sentiment::Negative),
        ("neutral", Sentiment::Neutral),
        ("neu", Sentiment::Neutral),
        ("mixed", Sentiment::Mixed),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

impl Config {
    /// Load config from the given path, or return defaults if file doesn't exist.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| CoreError::Io(format!("reading config: {e}")))?;
            toml::from_str(&contents).map_err(|e| CoreError::Config(e.to_string()))?
        } else {
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from file, then apply `SENTI_*` environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, CoreError> {
        let mut config = Config::load(path)?;
        config.apply_env_overrides(std::env::vars())?;
        Ok(config)
    }

    /// Write config to the given path.
    pub fn save(&self, path: &Path) -> Result<(), CoreError> {
        let contents =
            toml::to_string_pretty(self).map_err(|e| CoreError::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| CoreError::Io(format!("creating config dir: {e}")))?;
        }
        std::fs::write(path, contents)
            .map_err(|e| CoreError::Io(format!("writing config: {e}")))?;
        Ok(())
    }

    /// Apply environment-style overrides. Unknown keys are ignored.
    pub fn apply_env_overrides<I>(&mut self, vars: I) -> Result<(), CoreError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let value = value.trim();
            match key.as_str() {
                "SENTI_DAILY_BUDGET_LIMIT" => self.budget.daily_limit = parse_env(&key, value)?,
                "SENTI_ENABLED_BACKENDS" => {
                    let mut enabled = Vec::new();
                    for name in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                        let kind = BackendKind::parse(name).ok_or_else(|| {
                            CoreError::Config(format!("{key}: unknown backend {name:?}"))
                        })?;
                        enabled.push(kind);
                    }
                    self.backends.enabled = enabled;
                }
                "SENTI_CACHE_TTL_HOURS" => self.cache.ttl_hours = parse_env(&key, value)?,
                "SENTI_MAX_CACHE_ENTRIES" => self.cache.max_entries = parse_env(&key, value)?,
                "SENTI_BATCH_SIZE" => self.backends.batch_size = parse_env(&key, value)?,
                "SENTI_REQUEST_TIMEOUT_MS" => {
                    self.backends.request_timeout_ms = parse_env(&key, value)?
                }
                "SENTI_MAX_RETRIES" => self.backends.max_retries = parse_env(&key, value)?,
                _ => {}
            }
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if !(self.budget.daily_limit >= 0.0) {
            return Err(CoreError::Config(
                "budget.daily_limit must be a non-negative number".to_string(),
            ));
        }
        if self.backends.batch_size == 0 {
            return Err(CoreError::Config("backends.batch_size must be at least 1".to_string()));
        }
        if self.backends.max_in_flight == 0 {
            return Err(CoreError::Config(
                "backends.max_in_flight must be at least 1".to_string(),
            ));
        }
        if self.cache.max_entries == 0 {
            return Err(CoreError::Config("cache.max_entries must be at least 1".to_string()));
        }
        if self.cache.ttl_hours > MAX_TTL_HOURS {
            return Err(CoreError::Config(format!(
                "cache.ttl_hours must be at most {MAX_TTL_HOURS}"
            )));
        }
        for pricing in [&self.backends.comprehend.pricing, &self.backends.command.pricing] {
            if pricing.unit_chars == 0
                || !(pricing.price_per_unit >= 0.0)
                || !(pricing.key_phrase_price_per_unit >= 0.0)
            {
                return Err(CoreError::Config(
                    "pricing needs unit_chars >= 1 and non-negative prices".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Enabled remote backends in order, duplicates removed.
    pub fn enabled_backends(&self) -> Vec<BackendKind> {
        let mut seen = Vec::new();
        for kind in &self.backends.enabled {
            if !seen.contains(kind) {
                seen.push(*kind);
            }
        }
        seen
    }

    pub fn pricing_for(&self, kind: BackendKind) -> &Pricing {
        match kind {
            BackendKind::Comprehend => &self.backends.comprehend.pricing,
            BackendKind::Command => &self.backends.command.pricing,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, CoreError> {
    value
        .parse()
        .map_err(|_| CoreError::Config(format!("{key}: cannot parse {value:?}")))
}

/// Get the senti data directory (~/.senti/).
pub fn senti_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".senti")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.budget.daily_limit, 5.0);
        assert_eq!(config.enabled_backends(), vec![BackendKind::Comprehend]);
        assert_eq!(config.cache.ttl_hours, 24);
        assert_eq!(config.backends.max_retries, 2);
        assert_eq!(config.backends.comprehend.pricing.min_units, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_deserialize() {
        let toml_str = r#"
[budget]
daily_limit = 1.5

[backends]
enabled = ["command", "comprehend"]
batch_size = 10
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.budget.daily_limit, 1.5);
        assert_eq!(
            config.enabled_backends(),
            vec![BackendKind::Command, BackendKind::Comprehend]
        );
        assert_eq!(config.backends.batch_size, 10);
        assert_eq!(config.backends.request_timeout_ms, 5000); // default
        assert_eq!(config.cache.max_entries, 10_000); // default
    }

    #[test]
    fn test_command_labels_deserialize() {
        let toml_str = r#"
[backends.command]
program = "/usr/local/bin/classify"
labels = { LABEL_0 = "NEGATIVE", LABEL_1 = "NEUTRAL", LABEL_2 = "POSITIVE" }
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        let labels = &config.backends.command.labels;
        assert_eq!(labels.len(), 3);
        assert_eq!(labels["LABEL_2"], Sentiment::Positive);
    }

    #[test]
    fn test_duplicate_backends_ignored() {
        let mut config = Config::default();
        config.backends.enabled = vec![
            BackendKind::Comprehend,
            BackendKind::Comprehend,
            BackendKind::Command,
        ];
        assert_eq!(
            config.enabled_backends(),
            vec![BackendKind::Comprehend, BackendKind::Command]
        );
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env_overrides(vars(&[
                ("SENTI_DAILY_BUDGET_LIMIT", "0.25"),
                ("SENTI_ENABLED_BACKENDS", "command, comprehend"),
                ("SENTI_CACHE_TTL_HOURS", "6"),
                ("SENTI_MAX_CACHE_ENTRIES", "50"),
                ("SENTI_BATCH_SIZE", "5"),
                ("SENTI_REQUEST_TIMEOUT_MS", "1500"),
                ("SENTI_MAX_RETRIES", "0"),
                ("PATH", "/usr/bin"),
            ]))
            .unwrap();
        assert_eq!(config.budget.daily_limit, 0.25);
        assert_eq!(
            config.enabled_backends(),
            vec![BackendKind::Command, BackendKind::Comprehend]
        );
        assert_eq!(config.cache.ttl_hours, 6);
        assert_eq!(config.cache.max_entries, 50);
        assert_eq!(config.backends.batch_size, 5);
        assert_eq!(config.backends.request_timeout_ms, 1500);
        assert_eq!(config.backends.max_retries, 0);
    }

    #[test]
    fn test_env_empty_backend_list_means_local_only() {
        let mut config = Config::default();
        config
            .apply_env_overrides(vars(&[("SENTI_ENABLED_BACKENDS", "")]))
            .unwrap();
        assert!(config.enabled_backends().is_empty());
    }

    #[test]
    fn test_env_bad_values_rejected() {
        let mut config = Config::default();
        assert!(config
            .apply_env_overrides(vars(&[("SENTI_BATCH_SIZE", "lots")]))
            .is_err());
        let mut config = Config::default();
        assert!(config
            .apply_env_overrides(vars(&[("SENTI_ENABLED_BACKENDS", "comprehend,bard")]))
            .is_err());
        let mut config = Config::default();
        assert!(config
            .apply_env_overrides(vars(&[("SENTI_BATCH_SIZE", "0")]))
            .is_err());
    }

    #[test]
    fn test_ttl_hours_bounded() {
        let mut config = Config::default();
        let err = config
            .apply_env_overrides(vars(&[("SENTI_CACHE_TTL_HOURS", "4000000000")]))
            .unwrap_err();
        assert!(matches!(err, CoreError::Config(_)));

        let mut config = Config::default();
        let max = MAX_TTL_HOURS.to_string();
        assert!(config
            .apply_env_overrides(vars(&[("SENTI_CACHE_TTL_HOURS", max.as_str())]))
            .is_ok());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.budget.daily_limit = 2.0;
        config.lexicon.extra_negative = vec!["mandatory overtime".to_string()];
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.budget.daily_limit, 2.0);
        assert_eq!(loaded.lexicon.extra_negative, vec!["mandatory overtime"]);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.cache.ttl_hours, 24);
    }
}

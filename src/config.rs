// =============================================================================
// Runtime configuration -- hot-startable engine settings with atomic save
// =============================================================================
//
// Every tunable named in the external-interfaces section lives here. Fields
// carry `#[serde(default = "...")]` so that adding a new field never breaks
// loading an older config file on disk.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash, same as the original engine's runtime config.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::BotError;

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_leverage() -> u32 {
    5
}

fn default_cycle_interval_minutes() -> u64 {
    15
}

fn default_jitter_seconds() -> u64 {
    180
}

fn default_true() -> bool {
    true
}

fn default_buy_threshold() -> f64 {
    0.20
}

fn default_sell_threshold() -> f64 {
    -0.20
}

fn default_strong_signal() -> f64 {
    0.80
}

fn default_cooldown_minutes() -> u64 {
    15
}

fn default_loss_pct() -> f64 {
    0.005
}

fn default_profit_pct() -> f64 {
    0.01
}

fn default_tolerance_pct() -> f64 {
    0.001
}

fn default_safe_balance_fraction() -> f64 {
    0.95
}

fn default_min_contract() -> f64 {
    0.001
}

fn default_max_hot_bars_per_tf() -> u32 {
    2016
}

fn default_warm_path() -> String {
    "data/warm.sqlite".to_string()
}

fn default_cold_path() -> String {
    "data/cold.sqlite".to_string()
}

fn default_working_timeframe() -> String {
    "5m".to_string()
}

fn default_monitor_tick_seconds() -> u64 {
    60
}

fn default_exchange_timeout_seconds() -> u64 {
    30
}

fn default_advisor_timeout_seconds() -> u64 {
    60
}

fn default_validator_min_confidence() -> f64 {
    0.5
}

/// Credentials and connection details for the perpetual-futures exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_symbol")]
    pub symbol: String,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret: String::new(),
            password: String::new(),
            symbol: default_symbol(),
            leverage: default_leverage(),
        }
    }
}

impl std::fmt::Display for ExchangeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ExchangeConfig {{ symbol: {}, leverage: {}, api_key: <redacted>, secret: <redacted> }}",
            self.symbol, self.leverage
        )
    }
}

/// How often the scheduler fires the orchestrator's cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default = "default_cycle_interval_minutes")]
    pub cycle_interval_minutes: u64,
    #[serde(default = "default_jitter_seconds")]
    pub jitter_seconds: u64,
    #[serde(default = "default_true")]
    pub first_run_immediate: bool,
}

impl Default for CadenceConfig {
    fn default() -> Self {
        Self {
            cycle_interval_minutes: default_cycle_interval_minutes(),
            jitter_seconds: default_jitter_seconds(),
            first_run_immediate: default_true(),
        }
    }
}

/// Fusion-score thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_buy_threshold")]
    pub buy_threshold: f64,
    #[serde(default = "default_sell_threshold")]
    pub sell_threshold: f64,
    #[serde(default = "default_strong_signal")]
    pub strong_signal: f64,
    #[serde(default = "default_cooldown_minutes")]
    pub cooldown_minutes: u64,
    #[serde(default = "default_validator_min_confidence")]
    pub validator_min_confidence: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            buy_threshold: default_buy_threshold(),
            sell_threshold: default_sell_threshold(),
            strong_signal: default_strong_signal(),
            cooldown_minutes: default_cooldown_minutes(),
            validator_min_confidence: default_validator_min_confidence(),
        }
    }
}

/// The ratcheting stop-loss policy's three constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopPolicyConfig {
    #[serde(default = "default_loss_pct")]
    pub loss_pct: f64,
    #[serde(default = "default_profit_pct")]
    pub profit_pct: f64,
    #[serde(default = "default_tolerance_pct")]
    pub tolerance_pct: f64,
}

impl Default for StopPolicyConfig {
    fn default() -> Self {
        Self {
            loss_pct: default_loss_pct(),
            profit_pct: default_profit_pct(),
            tolerance_pct: default_tolerance_pct(),
        }
    }
}

/// Position-sizing safety constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    #[serde(default = "default_safe_balance_fraction")]
    pub safe_balance_fraction: f64,
    #[serde(default = "default_min_contract")]
    pub min_contract: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            safe_balance_fraction: default_safe_balance_fraction(),
            min_contract: default_min_contract(),
        }
    }
}

/// Tiered store sizing and backend paths.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_max_hot_bars_per_tf")]
    pub max_hot_bars_per_tf: u32,
    #[serde(default = "default_warm_path")]
    pub warm_path: String,
    #[serde(default = "default_cold_path")]
    pub cold_path: String,
    #[serde(default = "default_working_timeframe")]
    pub working_timeframe: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            max_hot_bars_per_tf: default_max_hot_bars_per_tf(),
            warm_path: default_warm_path(),
            cold_path: default_cold_path(),
            working_timeframe: default_working_timeframe(),
        }
    }
}

/// Top-level runtime configuration. Persisted as JSON via atomic tmp+rename.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub exchange: ExchangeConfig,
    #[serde(default)]
    pub cadence: CadenceConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub stop_policy: StopPolicyConfig,
    #[serde(default)]
    pub safety: SafetyConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default = "default_monitor_tick_seconds")]
    pub monitor_tick_seconds: u64,
    #[serde(default = "default_exchange_timeout_seconds")]
    pub exchange_timeout_seconds: u64,
    #[serde(default = "default_advisor_timeout_seconds")]
    pub advisor_timeout_seconds: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            exchange: ExchangeConfig::default(),
            cadence: CadenceConfig::default(),
            scoring: ScoringConfig::default(),
            stop_policy: StopPolicyConfig::default(),
            safety: SafetyConfig::default(),
            store: StoreConfig::default(),
            monitor_tick_seconds: default_monitor_tick_seconds(),
            exchange_timeout_seconds: default_exchange_timeout_seconds(),
            advisor_timeout_seconds: default_advisor_timeout_seconds(),
        }
    }
}

impl RuntimeConfig {
    /// Load from `path`. A missing or unparseable file is a fatal
    /// `ConfigError` -- the service refuses to start on a bad config.
    /// API credentials not present in the file fall back to the
    /// `EXCHANGE_API_KEY` / `EXCHANGE_SECRET` / `EXCHANGE_PASSWORD`
    /// environment variables.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BotError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            BotError::ConfigError(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::parse_with_env_fallback(path, &content)
    }

    /// Load from `path`, treating a missing file as a first run (falls back
    /// to defaults). A file that exists but fails to parse is still fatal --
    /// a corrupt config must never be silently discarded.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, BotError> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse_with_env_fallback(path, &content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no runtime config file found, starting from defaults");
                Ok(Self::default())
            }
            Err(e) => Err(BotError::ConfigError(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    fn parse_with_env_fallback(path: &Path, content: &str) -> Result<Self, BotError> {
        let mut config: Self = serde_json::from_str(content).map_err(|e| {
            BotError::ConfigError(format!("failed to parse {}: {e}", path.display()))
        })?;

        if config.exchange.api_key.is_empty() {
            if let Ok(v) = std::env::var("EXCHANGE_API_KEY") {
                config.exchange.api_key = v;
            }
        }
        if config.exchange.secret.is_empty() {
            if let Ok(v) = std::env::var("EXCHANGE_SECRET") {
                config.exchange.secret = v;
            }
        }
        if config.exchange.password.is_empty() {
            if let Ok(v) = std::env::var("EXCHANGE_PASSWORD") {
                config.exchange.password = v;
            }
        }

        info!(path = %path.display(), symbol = %config.exchange.symbol, "runtime config loaded");
        Ok(config)
    }

    /// Persist via an atomic write: write to a `.tmp` sibling, then rename.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content =
            serde_json::to_string_pretty(self).context("failed to serialise runtime config")?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.scoring.buy_threshold, 0.20);
        assert_eq!(cfg.scoring.sell_threshold, -0.20);
        assert_eq!(cfg.scoring.strong_signal, 0.80);
        assert_eq!(cfg.cadence.cycle_interval_minutes, 15);
        assert_eq!(cfg.stop_policy.loss_pct, 0.005);
        assert_eq!(cfg.safety.min_contract, 0.001);
    }

    #[test]
    fn deserialize_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.scoring.buy_threshold, 0.20);
        assert_eq!(cfg.store.working_timeframe, "5m");
    }

    #[test]
    fn deserialize_partial_json_fills_defaults() {
        let json = r#"{ "exchange": { "symbol": "ETHUSDT" } }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.exchange.symbol, "ETHUSDT");
        assert_eq!(cfg.exchange.leverage, 5);
        assert_eq!(cfg.scoring.cooldown_minutes, 15);
    }

    #[test]
    fn roundtrip_serialization() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.scoring.buy_threshold, cfg2.scoring.buy_threshold);
        assert_eq!(cfg.store.warm_path, cfg2.store.warm_path);
    }

    #[test]
    fn save_then_load_round_trips_atomically() {
        let dir = std::env::temp_dir().join(format!("aurora-cfg-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");

        let mut cfg = RuntimeConfig::default();
        cfg.exchange.symbol = "SOLUSDT".to_string();
        cfg.save(&path).unwrap();

        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = RuntimeConfig::load(&path).unwrap();
        assert_eq!(loaded.exchange.symbol, "SOLUSDT");

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn load_or_default_falls_back_on_missing_file() {
        let dir = std::env::temp_dir().join(format!("aurora-cfg-test-{}", uuid::Uuid::new_v4()));
        let path = dir.join("does-not-exist.json");

        let cfg = RuntimeConfig::load_or_default(&path).unwrap();
        assert_eq!(cfg.exchange.symbol, "BTCUSDT");
    }

    #[test]
    fn load_or_default_is_fatal_on_corrupt_existing_file() {
        let dir = std::env::temp_dir().join(format!("aurora-cfg-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, "{ not valid json").unwrap();

        let result = RuntimeConfig::load_or_default(&path);
        assert!(matches!(result, Err(BotError::ConfigError(_))));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn exchange_config_display_redacts_secrets() {
        let mut cfg = ExchangeConfig::default();
        cfg.api_key = "super-secret-key".to_string();
        cfg.secret = "super-secret-value".to_string();
        let s = cfg.to_string();
        assert!(!s.contains("super-secret"));
        assert!(s.contains("redacted"));
    }
}

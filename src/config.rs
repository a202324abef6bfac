//! Orchestrator configuration.

use crate::error::{Error, Result};
use serde::Deserialize;

/// Default fraction of the data lifetime after which a refresh is triggered.
pub const DEFAULT_REFRESH_AHEAD_FACTOR: f64 = 0.5;

/// Default suffix of guard keys.
pub const DEFAULT_GUARD_KEY_SUFFIX: &str = "refresh-ahead-timeout";

/// Default suffix of lock names.
pub const DEFAULT_LOCK_NAME_SUFFIX: &str = "refresh-ahead-generate";

/// Tuning knobs of a [`RefreshAhead`](crate::RefreshAhead).
///
/// Deserializes from any serde format with missing fields taking their
/// defaults, and can be overridden from the environment with
/// [`RefreshAheadConfig::from_env`].
///
/// ```
/// use refresh_ahead_cache::RefreshAheadConfig;
///
/// let config: RefreshAheadConfig =
///     serde_json::from_str(r#"{"refresh_ahead_factor": 0.25}"#).unwrap();
/// assert_eq!(config.refresh_ahead_factor, 0.25);
/// assert_eq!(config.guard_key_suffix, "refresh-ahead-timeout");
/// config.validate().unwrap();
/// ```
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct RefreshAheadConfig {
    /// Guard TTL as a fraction of the data duration. Must be finite and >= 0.
    pub refresh_ahead_factor: f64,

    /// Deferred job TTL as a fraction of the data duration.
    ///
    /// When set it must lie in `[0, 1 - refresh_ahead_factor)`. When unset,
    /// [`effective_generated_factor`](Self::effective_generated_factor)
    /// derives one.
    pub refresh_generated_factor: Option<f64>,

    /// Suffix used to derive guard keys. Must not be empty.
    pub guard_key_suffix: String,

    /// Suffix used to derive lock names.
    pub lock_name_suffix: String,
}

impl Default for RefreshAheadConfig {
    fn default() -> Self {
        RefreshAheadConfig {
            refresh_ahead_factor: DEFAULT_REFRESH_AHEAD_FACTOR,
            refresh_generated_factor: None,
            guard_key_suffix: DEFAULT_GUARD_KEY_SUFFIX.to_string(),
            lock_name_suffix: DEFAULT_LOCK_NAME_SUFFIX.to_string(),
        }
    }
}

impl RefreshAheadConfig {
    /// Defaults overridden by environment variables:
    ///
    /// - `REFRESH_AHEAD_FACTOR`
    /// - `REFRESH_GENERATED_FACTOR`
    /// - `REFRESH_AHEAD_GUARD_SUFFIX`
    /// - `REFRESH_AHEAD_LOCK_SUFFIX`
    ///
    /// # Errors
    /// Returns `Error::ConfigError` if a factor does not parse or the
    /// resulting configuration is invalid.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(raw) = env_var("REFRESH_AHEAD_FACTOR") {
            config.refresh_ahead_factor = parse_factor("REFRESH_AHEAD_FACTOR", &raw)?;
        }
        if let Some(raw) = env_var("REFRESH_GENERATED_FACTOR") {
            config.refresh_generated_factor = Some(parse_factor("REFRESH_GENERATED_FACTOR", &raw)?);
        }
        if let Some(suffix) = env_var("REFRESH_AHEAD_GUARD_SUFFIX") {
            config.guard_key_suffix = suffix;
        }
        if let Some(suffix) = env_var("REFRESH_AHEAD_LOCK_SUFFIX") {
            config.lock_name_suffix = suffix;
        }

        config.validate()?;
        debug!("✓ Refresh-ahead config loaded from environment: {:?}", config);
        Ok(config)
    }

    /// Check the factor ranges and suffixes.
    ///
    /// # Errors
    /// Returns `Error::ConfigError` describing the first violated constraint.
    pub fn validate(&self) -> Result<()> {
        let raf = self.refresh_ahead_factor;
        if !raf.is_finite() || raf < 0.0 {
            return Err(Error::ConfigError(format!(
                "refresh_ahead_factor must be a finite number >= 0, got {}",
                raf
            )));
        }

        if let Some(rgf) = self.refresh_generated_factor {
            if !rgf.is_finite() || rgf < 0.0 || rgf >= 1.0 - raf {
                return Err(Error::ConfigError(format!(
                    "refresh_generated_factor must be in [0, {}), got {}",
                    1.0 - raf,
                    rgf
                )));
            }
        }

        if self.guard_key_suffix.is_empty() {
            return Err(Error::ConfigError(
                "guard_key_suffix must not be empty".to_string(),
            ));
        }

        if self.lock_name_suffix == self.guard_key_suffix {
            return Err(Error::ConfigError(format!(
                "lock_name_suffix must differ from guard_key_suffix ({:?})",
                self.guard_key_suffix
            )));
        }

        Ok(())
    }

    /// Factor used for deferred job TTLs.
    ///
    /// The explicit `refresh_generated_factor` when set, otherwise half of the
    /// lifetime left after the refresh-ahead threshold, `(1 - raf) / 2`,
    /// clamped at zero.
    pub fn effective_generated_factor(&self) -> f64 {
        self.refresh_generated_factor
            .unwrap_or_else(|| ((1.0 - self.refresh_ahead_factor) / 2.0).max(0.0))
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_factor(name: &str, raw: &str) -> Result<f64> {
    raw.trim()
        .parse::<f64>()
        .map_err(|e| Error::ConfigError(format!("{} is not a number ({:?}): {}", name, raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RefreshAheadConfig::default();
        assert_eq!(config.refresh_ahead_factor, 0.5);
        assert_eq!(config.refresh_generated_factor, None);
        assert_eq!(config.guard_key_suffix, "refresh-ahead-timeout");
        assert_eq!(config.lock_name_suffix, "refresh-ahead-generate");
        config.validate().expect("Default config must be valid");
    }

    #[test]
    fn test_negative_factor_rejected() {
        let config = RefreshAheadConfig {
            refresh_ahead_factor: -0.1,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));

        let config = RefreshAheadConfig {
            refresh_ahead_factor: f64::NAN,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_generated_factor_range() {
        let ok = RefreshAheadConfig {
            refresh_generated_factor: Some(0.49),
            ..Default::default()
        };
        ok.validate().expect("0.49 < 1 - 0.5");

        let at_bound = RefreshAheadConfig {
            refresh_generated_factor: Some(0.5),
            ..Default::default()
        };
        assert!(matches!(at_bound.validate(), Err(Error::ConfigError(_))));

        let negative = RefreshAheadConfig {
            refresh_generated_factor: Some(-0.01),
            ..Default::default()
        };
        assert!(matches!(negative.validate(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_suffix_rules() {
        let empty = RefreshAheadConfig {
            guard_key_suffix: String::new(),
            ..Default::default()
        };
        assert!(matches!(empty.validate(), Err(Error::ConfigError(_))));

        let same = RefreshAheadConfig {
            lock_name_suffix: DEFAULT_GUARD_KEY_SUFFIX.to_string(),
            ..Default::default()
        };
        assert!(matches!(same.validate(), Err(Error::ConfigError(_))));
    }

    #[test]
    fn test_effective_generated_factor() {
        let derived = RefreshAheadConfig::default();
        assert_eq!(derived.effective_generated_factor(), 0.25);

        let explicit = RefreshAheadConfig {
            refresh_generated_factor: Some(0.1),
            ..Default::default()
        };
        assert_eq!(explicit.effective_generated_factor(), 0.1);

        let past_lifetime = RefreshAheadConfig {
            refresh_ahead_factor: 1.5,
            ..Default::default()
        };
        assert_eq!(past_lifetime.effective_generated_factor(), 0.0);
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let config: RefreshAheadConfig =
            serde_json::from_str(r#"{"lock_name_suffix": "gen-lock"}"#).unwrap();
        assert_eq!(config.lock_name_suffix, "gen-lock");
        assert_eq!(config.refresh_ahead_factor, DEFAULT_REFRESH_AHEAD_FACTOR);
    }

    #[test]
    fn test_parse_factor_rejects_garbage() {
        assert_eq!(parse_factor("X", " 0.75 ").unwrap(), 0.75);
        assert!(matches!(
            parse_factor("X", "half"),
            Err(Error::ConfigError(_))
        ));
    }
}

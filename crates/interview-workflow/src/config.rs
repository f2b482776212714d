//! Scheduler configuration.
//!
//! Built once at startup (defaults, then an optional TOML file, then
//! environment overrides) and handed to the engine and service constructors.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use slot_engine::{parse_timezone, DstPolicy, SelectionPolicy, Tz};

use crate::error::{Result, SchedulingError};

/// Engine-wide tunables.
/// Upper bound for `window_extension_days`.
pub const MAX_WINDOW_EXTENSION_DAYS: u32 = 366;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Full aggregate → select → book cycles allowed per request.
    pub max_scheduling_attempts: u32,
    /// Length of the search window applied to the request creation time.
    pub scheduling_window_days: u32,
    pub default_interview_duration_minutes: i64,
    /// IANA timezone used when a calendar does not report its own.
    pub default_timezone: String,
    /// Deadline for a single provider call.
    pub provider_timeout_ms: u64,
    /// Retries for one provider call after a transient failure.
    pub provider_retry_budget: u32,
    /// Booking-level provider errors tolerated per request before failing.
    /// These never consume scheduling attempts.
    pub max_provider_errors: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub candidates_per_interval: u32,
    pub candidate_step_minutes: u32,
    pub slot_alignment_minutes: u32,
    /// Days added to the latest bound after an attempt finds no common slot.
    pub window_extension_days: u32,
    pub lease_ttl_secs: u64,
    pub dst_policy: DstPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_scheduling_attempts: 3,
            scheduling_window_days: 14,
            default_interview_duration_minutes: 60,
            default_timezone: "UTC".into(),
            provider_timeout_ms: 10_000,
            provider_retry_budget: 3,
            max_provider_errors: 5,
            backoff_base_ms: 200,
            backoff_max_ms: 5_000,
            candidates_per_interval: 1,
            candidate_step_minutes: 15,
            slot_alignment_minutes: 0,
            window_extension_days: 1,
            lease_ttl_secs: 300,
            dst_policy: DstPolicy::WallClock,
        }
    }
}

impl SchedulerConfig {
    /// Load from a TOML file. Missing keys take their defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SchedulingError::Config(format!("Failed to read {}: {e}", path.display()))
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| {
            SchedulingError::Config(format!("Failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by environment variables.
    pub fn from_env() -> Result<Self> {
        Self::default().with_env_overrides()
    }

    /// Apply environment overrides (e.g. `MAX_SCHEDULING_ATTEMPTS=5`) on top
    /// of this config, then validate.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup. Used by `with_env_overrides` and
    /// by tests that should not touch the process environment.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_parsed(&lookup, "MAX_SCHEDULING_ATTEMPTS", &mut self.max_scheduling_attempts)?;
        override_parsed(&lookup, "SCHEDULING_WINDOW_DAYS", &mut self.scheduling_window_days)?;
        override_parsed(
            &lookup,
            "DEFAULT_INTERVIEW_DURATION_MINUTES",
            &mut self.default_interview_duration_minutes,
        )?;
        if let Some(tz) = lookup("DEFAULT_TIMEZONE") {
            self.default_timezone = tz;
        }
        override_parsed(&lookup, "PROVIDER_TIMEOUT_MS", &mut self.provider_timeout_ms)?;
        override_parsed(&lookup, "PROVIDER_RETRY_BUDGET", &mut self.provider_retry_budget)?;
        override_parsed(&lookup, "MAX_PROVIDER_ERRORS", &mut self.max_provider_errors)?;
        override_parsed(&lookup, "BACKOFF_BASE_MS", &mut self.backoff_base_ms)?;
        override_parsed(&lookup, "BACKOFF_MAX_MS", &mut self.backoff_max_ms)?;
        override_parsed(&lookup, "CANDIDATES_PER_INTERVAL", &mut self.candidates_per_interval)?;
        override_parsed(&lookup, "CANDIDATE_STEP_MINUTES", &mut self.candidate_step_minutes)?;
        override_parsed(&lookup, "SLOT_ALIGNMENT_MINUTES", &mut self.slot_alignment_minutes)?;
        override_parsed(&lookup, "WINDOW_EXTENSION_DAYS", &mut self.window_extension_days)?;
        override_parsed(&lookup, "LEASE_TTL_SECS", &mut self.lease_ttl_secs)?;
        if let Some(raw) = lookup("DST_POLICY") {
            self.dst_policy = match raw.trim().to_ascii_lowercase().as_str() {
                "skip" => DstPolicy::Skip,
                "shift_forward" => DstPolicy::ShiftForward,
                "wall_clock" => DstPolicy::WallClock,
                other => {
                    return Err(SchedulingError::Config(format!(
                        "DST_POLICY must be skip, shift_forward or wall_clock, got '{other}'"
                    )))
                }
            };
        }
        self.validate()?;
        Ok(self)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_scheduling_attempts < 1 {
            return Err(SchedulingError::Config(
                "max_scheduling_attempts must be at least 1".into(),
            ));
        }
        if self.scheduling_window_days < 1 {
            return Err(SchedulingError::Config(
                "scheduling_window_days must be at least 1".into(),
            ));
        }
        if self.default_interview_duration_minutes <= 0 {
            return Err(SchedulingError::Config(
                "default_interview_duration_minutes must be positive".into(),
            ));
        }
        if self.provider_timeout_ms == 0 {
            return Err(SchedulingError::Config(
                "provider_timeout_ms must be positive".into(),
            ));
        }
        if self.candidates_per_interval == 0 || self.candidate_step_minutes == 0 {
            return Err(SchedulingError::Config(
                "candidates_per_interval and candidate_step_minutes must be positive".into(),
            ));
        }
        if self.window_extension_days > MAX_WINDOW_EXTENSION_DAYS {
            return Err(SchedulingError::Config(format!(
                "window_extension_days must be at most {MAX_WINDOW_EXTENSION_DAYS}"
            )));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(SchedulingError::Config(
                "backoff_max_ms must not be below backoff_base_ms".into(),
            ));
        }
        parse_timezone(&self.default_timezone)
            .map_err(|e| SchedulingError::Config(e.to_string()))?;
        Ok(())
    }

    pub fn default_tz(&self) -> Tz {
        parse_timezone(&self.default_timezone).unwrap_or(Tz::UTC)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn selection_policy(&self) -> SelectionPolicy {
        SelectionPolicy {
            candidates_per_interval: self.candidates_per_interval,
            step_minutes: self.candidate_step_minutes,
            alignment_minutes: self.slot_alignment_minutes,
        }
    }
}

fn override_parsed<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|_| SchedulingError::Config(format!("{key} has invalid value '{raw}'")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_scheduling_attempts, 3);
        assert_eq!(config.scheduling_window_days, 14);
        assert_eq!(config.default_interview_duration_minutes, 60);
        assert_eq!(config.default_timezone, "UTC");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn overrides_are_applied() {
        let config = SchedulerConfig::default()
            .with_overrides(lookup(&[
                ("MAX_SCHEDULING_ATTEMPTS", "5"),
                ("DEFAULT_TIMEZONE", "Europe/Paris"),
                ("DST_POLICY", "shift_forward"),
            ]))
            .unwrap();
        assert_eq!(config.max_scheduling_attempts, 5);
        assert_eq!(config.default_tz(), chrono_tz_paris());
        assert_eq!(config.dst_policy, DstPolicy::ShiftForward);
    }

    fn chrono_tz_paris() -> Tz {
        "Europe/Paris".parse().unwrap()
    }

    #[test]
    fn unparseable_override_is_rejected() {
        let err = SchedulerConfig::default()
            .with_overrides(lookup(&[("SCHEDULING_WINDOW_DAYS", "two weeks")]))
            .unwrap_err();
        assert!(matches!(err, SchedulingError::Config(_)));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let err = SchedulerConfig::default()
            .with_overrides(lookup(&[("MAX_SCHEDULING_ATTEMPTS", "0")]))
            .unwrap_err();
        assert!(matches!(err, SchedulingError::Config(_)));
    }

    #[test]
    fn oversized_window_extension_is_rejected() {
        let config = SchedulerConfig {
            window_extension_days: u32::MAX,
            ..SchedulerConfig::default()
        };
        assert!(matches!(config.validate(), Err(SchedulingError::Config(_))));
    }

    #[test]
    fn unknown_timezone_is_rejected() {
        let config = SchedulerConfig {
            default_timezone: "Nowhere/Special".into(),
            ..SchedulerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn toml_fills_missing_keys_with_defaults() {
        let config: SchedulerConfig =
            toml::from_str("max_scheduling_attempts = 4\ndst_policy = \"skip\"\n").unwrap();
        assert_eq!(config.max_scheduling_attempts, 4);
        assert_eq!(config.dst_policy, DstPolicy::Skip);
        assert_eq!(config.scheduling_window_days, 14);
    }
}

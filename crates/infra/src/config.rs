//! Configuration loading and representation.

use std::str::FromStr;
use std::time::Duration;

use blanketchain_core::Money;

pub const TOTAL_TOLERANCE_VAR: &str = "BLANKETCHAIN_TOTAL_TOLERANCE_CENTS";
pub const LOCK_TIMEOUT_VAR: &str = "BLANKETCHAIN_LOCK_TIMEOUT_MS";
pub const DATABASE_URL_VAR: &str = "DATABASE_URL";
pub const USE_PERSISTENT_STORES_VAR: &str = "USE_PERSISTENT_STORES";

/// Engine and store settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How far a caller-supplied customer total may drift from `price * quantity`.
    pub total_tolerance: Money,
    /// Longest a transaction waits for locks before failing as a retryable conflict.
    pub lock_timeout: Duration,
    pub database_url: Option<String>,
    pub use_persistent_stores: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            total_tolerance: Money::from_cents(1),
            lock_timeout: Duration::from_millis(5_000),
            database_url: None,
            use_persistent_stores: false,
        }
    }
}

impl EngineConfig {
    /// Read settings from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read settings through `lookup`; malformed values fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let tolerance_cents = parse_or(&lookup, TOTAL_TOLERANCE_VAR, defaults.total_tolerance.cents());
        let total_tolerance = if tolerance_cents < 0 {
            tracing::warn!(value = tolerance_cents, "{TOTAL_TOLERANCE_VAR} is negative; using default");
            defaults.total_tolerance
        } else {
            Money::from_cents(tolerance_cents)
        };

        let lock_timeout_ms = parse_or(&lookup, LOCK_TIMEOUT_VAR, defaults.lock_timeout.as_millis() as u64);

        Self {
            total_tolerance,
            lock_timeout: Duration::from_millis(lock_timeout_ms),
            database_url: lookup(DATABASE_URL_VAR).filter(|url| !url.trim().is_empty()),
            use_persistent_stores: parse_or(&lookup, USE_PERSISTENT_STORES_VAR, defaults.use_persistent_stores),
        }
    }

    /// Postgres is used only when requested and a URL is available.
    pub fn persistent_url(&self) -> Option<&str> {
        if self.use_persistent_stores {
            self.database_url.as_deref()
        } else {
            None
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy + core::fmt::Debug,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, raw = %raw, ?default, "invalid configuration value; using default");
            default
        }),
    }
}

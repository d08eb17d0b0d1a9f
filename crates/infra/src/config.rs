//! Configuration loading and representation.

use std::time::Duration;

const DEFAULT_LOCK_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_TRANSFER_PREFIX: &str = "TRF";
const DEFAULT_TRANSFER_NO_WIDTH: usize = 5;

/// Runtime knobs for the stock core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockBookConfig {
    /// Longest a mutation waits for its stock-position locks before giving up with a
    /// concurrency conflict.
    pub lock_timeout: Duration,
    /// Prefix of committed transfer numbers (`TRF` → `TRF-00001`).
    pub transfer_no_prefix: String,
    /// Zero-padded width of the transfer sequence.
    pub transfer_no_width: usize,
}

impl Default for StockBookConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_millis(DEFAULT_LOCK_TIMEOUT_MS),
            transfer_no_prefix: DEFAULT_TRANSFER_PREFIX.to_string(),
            transfer_no_width: DEFAULT_TRANSFER_NO_WIDTH,
        }
    }
}

impl StockBookConfig {
    /// Read `STOCKBOOK_LOCK_TIMEOUT_MS`, `STOCKBOOK_TRANSFER_PREFIX` and
    /// `STOCKBOOK_TRANSFER_NO_WIDTH`, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env`, with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();

        let lock_timeout = match lookup("STOCKBOOK_LOCK_TIMEOUT_MS") {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => Duration::from_millis(ms),
                _ => {
                    tracing::warn!(value = %raw, "invalid STOCKBOOK_LOCK_TIMEOUT_MS; using default");
                    defaults.lock_timeout
                }
            },
            None => defaults.lock_timeout,
        };

        let transfer_no_prefix = match lookup("STOCKBOOK_TRANSFER_PREFIX") {
            Some(raw) if !raw.trim().is_empty() => raw.trim().to_string(),
            Some(_) => {
                tracing::warn!("empty STOCKBOOK_TRANSFER_PREFIX; using default");
                defaults.transfer_no_prefix
            }
            None => defaults.transfer_no_prefix,
        };

        let transfer_no_width = match lookup("STOCKBOOK_TRANSFER_NO_WIDTH") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(width) if (1..=12).contains(&width) => width,
                _ => {
                    tracing::warn!(value = %raw, "invalid STOCKBOOK_TRANSFER_NO_WIDTH; using default");
                    defaults.transfer_no_width
                }
            },
            None => defaults.transfer_no_width,
        };

        Self {
            lock_timeout,
            transfer_no_prefix,
            transfer_no_width,
        }
    }
}

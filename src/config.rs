//! Server configuration from `INNKEEP_*` environment variables.
//!
//! Every variable is optional. A value that fails to parse is logged and
//! replaced by its default rather than aborting startup.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;
use tracing::warn;

use crate::engine::Policy;

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    /// How long shutdown waits for open connections before exiting anyway.
    pub drain_timeout: Duration,
    pub policy: Policy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7433,
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            drain_timeout: Duration::from_secs(10),
            policy: Policy::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source; `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Config::default();
        let policy = Policy {
            day_open: parse_time(&lookup, "INNKEEP_DAY_OPEN", defaults.policy.day_open),
            day_close: parse_time(&lookup, "INNKEEP_DAY_CLOSE", defaults.policy.day_close),
            min_gap_minutes: parse_or(&lookup, "INNKEEP_MIN_GAP_MINUTES", defaults.policy.min_gap_minutes),
            tax_rate: parse_rate(&lookup, "INNKEEP_TAX_RATE", defaults.policy.tax_rate),
            service_fee_rate: parse_rate(&lookup, "INNKEEP_SERVICE_FEE_RATE", defaults.policy.service_fee_rate),
            currency_decimals: parse_or(&lookup, "INNKEEP_CURRENCY_DECIMALS", defaults.policy.currency_decimals),
        };
        let policy = if policy.day_open < policy.day_close {
            policy
        } else {
            warn!(
                open = %policy.day_open,
                close = %policy.day_close,
                "operating window is empty, using defaults"
            );
            Policy {
                day_open: defaults.policy.day_open,
                day_close: defaults.policy.day_close,
                ..policy
            }
        };

        Config {
            bind: lookup("INNKEEP_BIND").unwrap_or(defaults.bind),
            port: parse_or(&lookup, "INNKEEP_PORT", defaults.port),
            data_dir: lookup("INNKEEP_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            max_connections: parse_or(&lookup, "INNKEEP_MAX_CONNECTIONS", defaults.max_connections),
            compact_threshold: parse_or(&lookup, "INNKEEP_COMPACT_THRESHOLD", defaults.compact_threshold),
            metrics_port: lookup("INNKEEP_METRICS_PORT").and_then(|raw| match raw.parse() {
                Ok(port) => Some(port),
                Err(e) => {
                    warn!(var = "INNKEEP_METRICS_PORT", value = %raw, error = %e, "invalid value, metrics disabled");
                    None
                }
            }),
            drain_timeout: Duration::from_secs(parse_or(
                &lookup,
                "INNKEEP_DRAIN_TIMEOUT_SECS",
                defaults.drain_timeout.as_secs(),
            )),
            policy,
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, var: &str, default: T) -> T
where
    T: FromStr + Display,
    T::Err: Display,
{
    let Some(raw) = lookup(var) else { return default };
    match raw.trim().parse() {
        Ok(value) => value,
        Err(e) => {
            warn!(var, value = %raw, error = %e, fallback = %default, "invalid value, using default");
            default
        }
    }
}

fn parse_rate(lookup: &impl Fn(&str) -> Option<String>, var: &str, default: f64) -> f64 {
    let rate = parse_or(lookup, var, default);
    if rate.is_finite() && rate >= 0.0 {
        rate
    } else {
        warn!(var, rate, fallback = default, "rate must be a non-negative number, using default");
        default
    }
}

fn parse_time(lookup: &impl Fn(&str) -> Option<String>, var: &str, default: NaiveTime) -> NaiveTime {
    let Some(raw) = lookup(var) else { return default };
    match NaiveTime::parse_from_str(raw.trim(), "%H:%M") {
        Ok(time) => time,
        Err(e) => {
            warn!(var, value = %raw, error = %e, fallback = %default, "invalid HH:MM, using default");
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = config(&[]);
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.listen_addr(), "0.0.0.0:7433");
        assert_eq!(cfg.metrics_port, None);
    }

    #[test]
    fn reads_every_variable() {
        let cfg = config(&[
            ("INNKEEP_BIND", "127.0.0.1"),
            ("INNKEEP_PORT", "9000"),
            ("INNKEEP_DATA_DIR", "/var/lib/innkeep"),
            ("INNKEEP_MAX_CONNECTIONS", "16"),
            ("INNKEEP_COMPACT_THRESHOLD", "50"),
            ("INNKEEP_METRICS_PORT", "9100"),
            ("INNKEEP_DRAIN_TIMEOUT_SECS", "3"),
            ("INNKEEP_DAY_OPEN", "07:30"),
            ("INNKEEP_DAY_CLOSE", "23:00"),
            ("INNKEEP_MIN_GAP_MINUTES", "60"),
            ("INNKEEP_TAX_RATE", "0.18"),
            ("INNKEEP_SERVICE_FEE_RATE", "0"),
            ("INNKEEP_CURRENCY_DECIMALS", "2"),
        ]);
        assert_eq!(cfg.listen_addr(), "127.0.0.1:9000");
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/innkeep"));
        assert_eq!(cfg.max_connections, 16);
        assert_eq!(cfg.compact_threshold, 50);
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.drain_timeout, Duration::from_secs(3));
        assert_eq!(cfg.policy.day_open, NaiveTime::from_hms_opt(7, 30, 0).unwrap());
        assert_eq!(cfg.policy.day_close, NaiveTime::from_hms_opt(23, 0, 0).unwrap());
        assert_eq!(cfg.policy.min_gap_minutes, 60);
        assert_eq!(cfg.policy.tax_rate, 0.18);
        assert_eq!(cfg.policy.service_fee_rate, 0.0);
        assert_eq!(cfg.policy.currency_decimals, 2);
    }

    #[test]
    fn bad_values_fall_back() {
        let cfg = config(&[
            ("INNKEEP_PORT", "http"),
            ("INNKEEP_DRAIN_TIMEOUT_SECS", "soon"),
            ("INNKEEP_METRICS_PORT", "-1"),
            ("INNKEEP_DAY_OPEN", "8am"),
            ("INNKEEP_TAX_RATE", "-0.2"),
            ("INNKEEP_SERVICE_FEE_RATE", "NaN"),
        ]);
        assert_eq!(cfg.port, 7433);
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.drain_timeout, Duration::from_secs(10));
        assert_eq!(cfg.policy, Policy::default());
    }

    #[test]
    fn inverted_window_falls_back() {
        let cfg = config(&[("INNKEEP_DAY_OPEN", "20:00"), ("INNKEEP_DAY_CLOSE", "09:00"), ("INNKEEP_TAX_RATE", "0.1")]);
        assert_eq!(cfg.policy.day_open, Policy::default().day_open);
        assert_eq!(cfg.policy.day_close, Policy::default().day_close);
        assert_eq!(cfg.policy.tax_rate, 0.1);
    }
}

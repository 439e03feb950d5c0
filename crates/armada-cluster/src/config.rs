//! Daemon configuration.
//!
//! All settings come from `ARMADA_*` environment variables with sensible
//! defaults; invalid values are fatal configuration errors rather than silent
//! fallbacks. `from_env_with` takes an injectable source so tests never touch
//! the process environment.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

use armada_core::{Error, Result};

/// Default machine liveness TTL.
const DEFAULT_AGENT_TTL: Duration = Duration::from_secs(30);

/// Default engine round period.
const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(2);

/// Default per-request timeout for store operations.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(1000);

/// Runtime configuration for the daemon.
#[derive(Debug, Clone)]
pub struct Config {
    /// Machine liveness TTL; also bounds observation records.
    pub agent_ttl: Duration,

    /// Target period between engine reconcile rounds. Must be positive.
    pub engine_reconcile_interval: Duration,

    /// Prefix applied to every key in the shared store.
    pub key_prefix: String,

    /// Per-request timeout for registry and lease operations.
    pub request_timeout: Duration,

    /// Run as a pure agent without the engine loop.
    pub disable_engine: bool,

    /// Poll-only mode: reconcile on ticks alone, without store watches.
    pub disable_watches: bool,

    /// Publicly routable address advertised in the machine record.
    pub public_ip: String,

    /// Operator-supplied machine metadata.
    pub metadata: BTreeMap<String, String>,

    /// Declared machine capabilities.
    pub capabilities: BTreeSet<String>,

    /// Directory holding local persistent state (the machine ID file).
    pub state_dir: PathBuf,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads configuration from a custom environment source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fatal`] for unparsable values or a non-positive
    /// reconcile interval.
    pub fn from_env_with<F>(get_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let agent_ttl = parse_secs(&get_env, "ARMADA_AGENT_TTL_SECS", DEFAULT_AGENT_TTL)?;
        let engine_reconcile_interval = parse_secs(
            &get_env,
            "ARMADA_ENGINE_RECONCILE_INTERVAL_SECS",
            DEFAULT_RECONCILE_INTERVAL,
        )?;
        if engine_reconcile_interval.is_zero() {
            return Err(Error::fatal(
                "ARMADA_ENGINE_RECONCILE_INTERVAL_SECS must be positive",
            ));
        }

        let request_timeout = parse_millis(
            &get_env,
            "ARMADA_REQUEST_TIMEOUT_MS",
            DEFAULT_REQUEST_TIMEOUT,
        )?;

        Ok(Self {
            agent_ttl,
            engine_reconcile_interval,
            key_prefix: get_env("ARMADA_KEY_PREFIX").unwrap_or_else(|| "/armada/".to_string()),
            request_timeout,
            disable_engine: parse_bool(&get_env, "ARMADA_DISABLE_ENGINE"),
            disable_watches: parse_bool(&get_env, "ARMADA_DISABLE_WATCHES"),
            public_ip: get_env("ARMADA_PUBLIC_IP").unwrap_or_default(),
            metadata: parse_metadata(get_env("ARMADA_METADATA").as_deref())?,
            capabilities: parse_list(get_env("ARMADA_CAPABILITIES").as_deref()),
            state_dir: get_env("ARMADA_STATE_DIR")
                .map_or_else(|| PathBuf::from("/var/lib/armada"), PathBuf::from),
        })
    }
}

fn parse_secs<F>(get_env: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    match get_env(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| Error::fatal(format!("invalid {key}: '{raw}'"))),
    }
}

fn parse_millis<F>(get_env: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    match get_env(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|_| Error::fatal(format!("invalid {key}: '{raw}'"))),
    }
}

fn parse_bool<F>(get_env: &F, key: &str) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    get_env(key).is_some_and(|value| value.eq_ignore_ascii_case("true") || value == "1")
}

/// Parses `key=value,key=value` metadata.
fn parse_metadata(raw: Option<&str>) -> Result<BTreeMap<String, String>> {
    let Some(raw) = raw else {
        return Ok(BTreeMap::new());
    };

    let mut metadata = BTreeMap::new();
    for pair in raw.split(',').filter(|pair| !pair.trim().is_empty()) {
        let (key, value) = pair.split_once('=').ok_or_else(|| {
            Error::fatal(format!(
                "invalid ARMADA_METADATA entry '{pair}': expected key=value"
            ))
        })?;
        metadata.insert(key.trim().to_string(), value.trim().to_string());
    }
    Ok(metadata)
}

fn parse_list(raw: Option<&str>) -> BTreeSet<String> {
    raw.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(ToString::to_string)
            .collect()
    })
    .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_of<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| (*v).to_string())
        }
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_env_with(env_of(&[])).unwrap();
        assert_eq!(config.agent_ttl, Duration::from_secs(30));
        assert_eq!(config.engine_reconcile_interval, Duration::from_secs(2));
        assert_eq!(config.request_timeout, Duration::from_millis(1000));
        assert_eq!(config.key_prefix, "/armada/");
        assert!(!config.disable_engine);
        assert!(!config.disable_watches);
        assert!(config.metadata.is_empty());
    }

    #[test]
    fn values_parse_from_env() {
        let config = Config::from_env_with(env_of(&[
            ("ARMADA_AGENT_TTL_SECS", "10"),
            ("ARMADA_ENGINE_RECONCILE_INTERVAL_SECS", "5"),
            ("ARMADA_REQUEST_TIMEOUT_MS", "250"),
            ("ARMADA_DISABLE_ENGINE", "true"),
            ("ARMADA_DISABLE_WATCHES", "1"),
            ("ARMADA_PUBLIC_IP", "10.0.0.7"),
            ("ARMADA_METADATA", "region=eu, role=worker"),
            ("ARMADA_CAPABILITIES", "gpu,nvme"),
            ("ARMADA_STATE_DIR", "/tmp/armada"),
        ]))
        .unwrap();

        assert_eq!(config.agent_ttl, Duration::from_secs(10));
        assert_eq!(config.engine_reconcile_interval, Duration::from_secs(5));
        assert_eq!(config.request_timeout, Duration::from_millis(250));
        assert!(config.disable_engine);
        assert!(config.disable_watches);
        assert_eq!(config.public_ip, "10.0.0.7");
        assert_eq!(config.metadata.get("region").map(String::as_str), Some("eu"));
        assert_eq!(config.metadata.get("role").map(String::as_str), Some("worker"));
        assert!(config.capabilities.contains("gpu"));
        assert_eq!(config.state_dir, PathBuf::from("/tmp/armada"));
    }

    #[test]
    fn zero_reconcile_interval_is_rejected() {
        let err = Config::from_env_with(env_of(&[(
            "ARMADA_ENGINE_RECONCILE_INTERVAL_SECS",
            "0",
        )]))
        .expect_err("zero interval must be rejected");
        assert!(matches!(err, Error::Fatal { .. }));
    }

    #[test]
    fn garbage_values_are_fatal() {
        assert!(Config::from_env_with(env_of(&[("ARMADA_AGENT_TTL_SECS", "soon")])).is_err());
        assert!(
            Config::from_env_with(env_of(&[("ARMADA_METADATA", "region")])).is_err(),
            "metadata without '=' must be rejected"
        );
    }
}

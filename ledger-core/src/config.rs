use crate::{Error, Result};
use anyhow::Context;
use std::{borrow::Cow, env, time::Duration};

/// Settings of a [`Coordinator`](crate::Coordinator).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorConfig {
    /// Backend URL, prefixed by one of the driver names (`sqlite://`, `memory://`).
    pub url: Cow<'static, str>,
    /// Upper bound of concurrently open connections, at least 1.
    pub max_connections: usize,
    /// Deadline of a whole unit of work, none when `None`.
    pub timeout: Option<Duration>,
}

impl CoordinatorConfig {
    pub const DEFAULT_MAX_CONNECTIONS: usize = 8;

    pub fn new(url: impl Into<Cow<'static, str>>) -> Self {
        Self {
            url: url.into(),
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
            timeout: None,
        }
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections.max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Read the configuration from the environment.
    ///
    /// * `LEDGER_URL` (required)
    /// * `LEDGER_MAX_CONNECTIONS`
    /// * `LEDGER_TIMEOUT_MS`
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let url = lookup("LEDGER_URL")
            .ok_or_else(|| Error::msg("Environment variable `LEDGER_URL` is not set"))?;
        let mut config = Self::new(url);
        if let Some(value) = lookup("LEDGER_MAX_CONNECTIONS") {
            let value = value.trim().parse::<usize>().with_context(|| {
                format!("While parsing `LEDGER_MAX_CONNECTIONS` value `{value}`")
            })?;
            config = config.with_max_connections(value);
        }
        if let Some(value) = lookup("LEDGER_TIMEOUT_MS") {
            let value = value
                .trim()
                .parse::<u64>()
                .with_context(|| format!("While parsing `LEDGER_TIMEOUT_MS` value `{value}`"))?;
            config = config.with_timeout(Duration::from_millis(value));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn builder() {
        let config = CoordinatorConfig::new("memory://localhost/shop")
            .with_max_connections(0)
            .with_timeout(Duration::from_secs(2));
        assert_eq!(config.max_connections, 1);
        assert_eq!(config.timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn from_variables() {
        let config = CoordinatorConfig::from_lookup(lookup(&[
            ("LEDGER_URL", "sqlite://shop.sqlite"),
            ("LEDGER_MAX_CONNECTIONS", " 4 "),
            ("LEDGER_TIMEOUT_MS", "1500"),
        ]))
        .unwrap();
        assert_eq!(config.url, "sqlite://shop.sqlite");
        assert_eq!(config.max_connections, 4);
        assert_eq!(config.timeout, Some(Duration::from_millis(1500)));

        let config =
            CoordinatorConfig::from_lookup(lookup(&[("LEDGER_URL", "memory://:memory:")])).unwrap();
        assert_eq!(config.max_connections, CoordinatorConfig::DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.timeout, None);
    }

    #[test]
    fn invalid_variables() {
        assert!(CoordinatorConfig::from_lookup(lookup(&[])).is_err());
        let error = CoordinatorConfig::from_lookup(lookup(&[
            ("LEDGER_URL", "memory://:memory:"),
            ("LEDGER_TIMEOUT_MS", "soon"),
        ]))
        .unwrap_err();
        assert!(format!("{error:#}").contains("LEDGER_TIMEOUT_MS"));
    }
}

use anyhow::Context;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = lookup("DATABASE_URL")
            .filter(|value| !value.trim().is_empty())
            .context("DATABASE_URL must be set to a Postgres connection string")?;

        let max_connections = match lookup("DATABASE_MAX_CONNECTIONS") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|value| *value > 0)
                .with_context(|| {
                    format!("DATABASE_MAX_CONNECTIONS must be a positive integer, got {raw:?}")
                })?,
            None => DEFAULT_MAX_CONNECTIONS,
        };

        let log_format = match lookup("LOG_FORMAT").as_deref().map(str::trim) {
            None | Some("") | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => anyhow::bail!("LOG_FORMAT must be `text` or `json`, got {other:?}"),
        };

        Ok(Self {
            database_url,
            max_connections,
            log_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_only_url_is_set() {
        let config = config(&[("DATABASE_URL", "postgres://localhost/lms")]).unwrap();
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn database_url_is_required() {
        assert!(config(&[]).is_err());
        assert!(config(&[("DATABASE_URL", "  ")]).is_err());
    }

    #[test]
    fn pool_size_must_be_positive() {
        let url = ("DATABASE_URL", "postgres://localhost/lms");
        assert_eq!(
            config(&[url, ("DATABASE_MAX_CONNECTIONS", "12")]).unwrap().max_connections,
            12
        );
        assert!(config(&[url, ("DATABASE_MAX_CONNECTIONS", "0")]).is_err());
        assert!(config(&[url, ("DATABASE_MAX_CONNECTIONS", "many")]).is_err());
    }

    #[test]
    fn log_format_accepts_json() {
        let config = config(&[
            ("DATABASE_URL", "postgres://localhost/lms"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(super::Config::from_lookup(|key| match key {
            "DATABASE_URL" => Some("postgres://localhost/lms".to_string()),
            "LOG_FORMAT" => Some("xml".to_string()),
            _ => None,
        })
        .is_err());
    }
}

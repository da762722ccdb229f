use std::str::FromStr;

use crate::{
    chatbot_db::ChatbotDb,
    embedding::DEFAULT_DIMENSION,
    error::{Error, Result},
};

pub const DEFAULT_BIND: &str = "127.0.0.1:5000";
pub const DEFAULT_TOP_K: usize = 1;

/// Keys accepted by `qabot config set`, with the environment variable that
/// overrides each one.
pub const SETTINGS: &[(&str, &str)] = &[
    ("dimension", "QABOT_DIMENSION"),
    ("base_url", "QABOT_BASE_URL"),
    ("bind", "QABOT_BIND"),
    ("min_similarity", "QABOT_MIN_SIMILARITY"),
    ("top_k", "QABOT_TOP_K"),
];

/// Values supplied on the command line; they win over everything else.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub dimension: Option<usize>,
    pub base_url: Option<String>,
    pub bind: Option<String>,
}

/// Fully resolved runtime settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Dimension of the hashing embedder.
    pub dimension: usize,
    /// Prefix for deployment URLs. When unset the HTTP server derives it
    /// from the request's `Host` header.
    pub base_url: Option<String>,
    pub bind: String,
    /// Neighbors below this cosine similarity do not count as answers.
    pub min_similarity: Option<f32>,
    /// Neighbors retrieved per query.
    pub top_k: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
            base_url: None,
            bind: DEFAULT_BIND.to_string(),
            min_similarity: None,
            top_k: DEFAULT_TOP_K,
        }
    }
}

impl Config {
    /// Resolve each setting from, in order of priority:
    /// 1. The command line
    /// 2. The QABOT_* environment variable
    /// 3. The settings table in chatbots.redb
    /// 4. The built-in default
    pub fn resolve(overrides: &Overrides, settings: &ChatbotDb) -> Result<Self> {
        Self::resolve_with(overrides, settings, |name| std::env::var(name).ok())
    }

    pub fn resolve_with<F>(
        overrides: &Overrides,
        settings: &ChatbotDb,
        env: F,
    ) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| -> Result<Option<String>> {
            let var = env_var_for(key)?;
            match env(var) {
                Some(v) => Ok(Some(v)),
                None => settings.get_setting(key),
            }
        };
        let defaults = Config::default();

        let dimension = match overrides.dimension {
            Some(d) => d,
            None => parse_opt("dimension", lookup("dimension")?)?
                .unwrap_or(defaults.dimension),
        };
        if dimension == 0 {
            return Err(Error::Config(
                "dimension must be greater than zero".to_string(),
            ));
        }

        let base_url = match &overrides.base_url {
            Some(url) => Some(url.clone()),
            None => lookup("base_url")?,
        }
        .filter(|url| !url.trim().is_empty());

        let bind = match &overrides.bind {
            Some(bind) => bind.clone(),
            None => lookup("bind")?.unwrap_or(defaults.bind),
        };

        let min_similarity =
            parse_opt::<f32>("min_similarity", lookup("min_similarity")?)?;
        let top_k = parse_opt("top_k", lookup("top_k")?)?
            .unwrap_or(defaults.top_k)
            .max(1);

        Ok(Self {
            dimension,
            base_url,
            bind,
            min_similarity,
            top_k,
        })
    }
}

/// Check that `key` is a known setting and `value` parses for it.
pub fn validate_setting(key: &str, value: &str) -> Result<()> {
    env_var_for(key)?;
    let raw = Some(value.to_string());
    match key {
        "dimension" => {
            if parse_opt::<usize>(key, raw)? == Some(0) {
                return Err(Error::Config(
                    "dimension must be greater than zero".to_string(),
                ));
            }
        }
        "top_k" => {
            parse_opt::<usize>(key, raw)?;
        }
        "min_similarity" => {
            parse_opt::<f32>(key, raw)?;
        }
        _ => {}
    }
    Ok(())
}

fn env_var_for(key: &str) -> Result<&'static str> {
    SETTINGS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, var)| *var)
        .ok_or_else(|| Error::Config(format!("unknown setting '{key}'")))
}

fn parse_opt<T: FromStr>(key: &str, raw: Option<String>) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    raw.map(|s| {
        s.trim().parse::<T>().map_err(|e| {
            Error::Config(format!("invalid value for {key}: '{s}' ({e})"))
        })
    })
    .transpose()
}

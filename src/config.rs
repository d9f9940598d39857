//! Configuration management

use std::env;

use thiserror::Error;

/// Baseline display density used when nothing else is configured
pub const DEFAULT_DPI: u32 = 160;
pub const DEFAULT_OUTLINE_MAX_DEPTH: usize = 64;
pub const DEFAULT_OUTLINE_MAX_NODES: usize = 100_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

/// Core settings shared by every session of one `PdfCore`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreConfig {
    /// Render and pixel-size density
    pub dpi: u32,
    /// Outline nesting limit
    pub max_outline_depth: usize,
    /// Outline node limit
    pub max_outline_nodes: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        CoreConfig {
            dpi: DEFAULT_DPI,
            max_outline_depth: DEFAULT_OUTLINE_MAX_DEPTH,
            max_outline_nodes: DEFAULT_OUTLINE_MAX_NODES,
        }
    }
}

impl CoreConfig {
    /// Read `PDFCORE_DPI`, `PDFCORE_OUTLINE_MAX_DEPTH` and
    /// `PDFCORE_OUTLINE_MAX_NODES`; unset variables keep their defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = CoreConfig {
            dpi: parse(&lookup, "PDFCORE_DPI", defaults.dpi)?,
            max_outline_depth: parse(
                &lookup,
                "PDFCORE_OUTLINE_MAX_DEPTH",
                defaults.max_outline_depth,
            )?,
            max_outline_nodes: parse(
                &lookup,
                "PDFCORE_OUTLINE_MAX_NODES",
                defaults.max_outline_nodes,
            )?,
        };

        if config.dpi == 0 {
            return Err(ConfigError::InvalidValue {
                key: "PDFCORE_DPI",
                value: "0".to_string(),
            });
        }
        Ok(config)
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
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
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = CoreConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, CoreConfig::default());
        assert_eq!(config.dpi, 160);
        assert_eq!(config.max_outline_depth, 64);
    }

    #[test]
    fn test_values_are_parsed() {
        let config = CoreConfig::from_lookup(lookup(&[
            ("PDFCORE_DPI", " 300 "),
            ("PDFCORE_OUTLINE_MAX_NODES", "10"),
        ]))
        .unwrap();
        assert_eq!(config.dpi, 300);
        assert_eq!(config.max_outline_nodes, 10);
        assert_eq!(config.max_outline_depth, DEFAULT_OUTLINE_MAX_DEPTH);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = CoreConfig::from_lookup(lookup(&[("PDFCORE_DPI", "high")])).unwrap_err();
        assert_eq!(err.to_string(), "Invalid value for PDFCORE_DPI: \"high\"");
        assert!(CoreConfig::from_lookup(lookup(&[("PDFCORE_DPI", "0")])).is_err());
    }
}

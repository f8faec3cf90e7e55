//! # Runtime Configuration Module
//!
//! Dispatcher behavior that operators tune without recompiling.
//!
//! ## Environment Variables
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `BRRTA_STRICT_NOT_FOUND` | `false` | Unresolved actions fail with `invalid_action` instead of passing |
//! | `BRRTA_STRICT_INJECTORS` | `false` | Registries built with `RegistryBuilder::with_config` reject unknown injectors |
//! | `BRRTA_STACK_SIZE` | `0x4000` | Coroutine stack size, decimal or `0x` hex |
//!
//! ## YAML
//!
//! The same settings can be read from a file:
//!
//! ```yaml
//! strict_not_found: true
//! stack_size: 0x8000
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use brrtaction::runtime_config::RuntimeConfig;
//!
//! let config = RuntimeConfig::from_env();
//! println!("Stack size: {} bytes", config.stack_size);
//! ```
//!
//! Recommended stack sizes:
//! - Simple actions: `0x4000` (16 KB)
//! - Deferred work with deep call chains: `0x10000` (64 KB)

use anyhow::Context;
use serde::{Deserialize, Deserializer};
use std::env;
use std::path::Path;
use tracing::{info, warn};

pub const DEFAULT_STACK_SIZE: usize = 0x4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Report unresolved actions as `invalid_action` instead of passing
    pub strict_not_found: bool,
    /// Reject unknown injector names when building registries
    pub strict_injectors: bool,
    /// Stack size for coroutines in bytes (default: 16 KB / 0x4000)
    #[serde(deserialize_with = "deserialize_stack_size")]
    pub stack_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            strict_not_found: false,
            strict_injectors: false,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| match lookup(key) {
            Some(val) => parse_bool(&val).unwrap_or_else(|| {
                warn!(variable = key, value = %val, "Ignoring unparseable boolean");
                default
            }),
            None => default,
        };
        let stack_size = match lookup("BRRTA_STACK_SIZE") {
            Some(val) => parse_stack_size(&val).unwrap_or_else(|| {
                warn!(value = %val, "Ignoring unparseable BRRTA_STACK_SIZE");
                defaults.stack_size
            }),
            None => defaults.stack_size,
        };
        RuntimeConfig {
            strict_not_found: flag("BRRTA_STRICT_NOT_FOUND", defaults.strict_not_found),
            strict_injectors: flag("BRRTA_STRICT_INJECTORS", defaults.strict_injectors),
            stack_size,
        }
    }

    /// Load configuration from a YAML file; missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not valid YAML.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading runtime config {}", path.display()))?;
        serde_yaml::from_str(&content)
            .with_context(|| format!("parsing runtime config {}", path.display()))
    }

    /// Push the coroutine settings into the `may` runtime.
    pub fn apply(&self) {
        may::config().set_stack_size(self.stack_size);
        info!(
            stack_size = self.stack_size,
            strict_not_found = self.strict_not_found,
            strict_injectors = self.strict_injectors,
            "Runtime configuration applied"
        );
    }
}

fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_stack_size(val: &str) -> Option<usize> {
    let val = val.trim();
    match val.strip_prefix("0x").or_else(|| val.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16).ok(),
        None => val.parse().ok(),
    }
}

fn deserialize_stack_size<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(usize),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => parse_stack_size(&s)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid stack size '{s}'"))),
    }
}

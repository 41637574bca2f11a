//! Runtime configuration
//!
//! Loaded from TOML (`RuntimeConfig::load` / `parse`) or from `DYNBIND_*`
//! environment variables. Every field has a default so partial files work.

use crate::convert::Encoding;
use crate::error::{BindError, Result};
use crate::types::DataModel;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Pointer width in bytes (4 or 8)
    #[serde(default = "default_address_size")]
    pub address_size: usize,

    /// Width of the native `long` in bytes
    #[serde(default = "default_long_size")]
    pub long_size: usize,

    /// Page size override; the OS page size is used when absent
    #[serde(default)]
    pub page_size: Option<usize>,

    /// Allow hand-assembled call stubs
    #[serde(default = "default_true")]
    pub enable_stubs: bool,

    /// Allow the fixed-arity fast-path invokers
    #[serde(default = "default_true")]
    pub enable_fast_paths: bool,

    /// Text encoding used when no annotation selects one
    #[serde(default = "default_encoding")]
    pub default_encoding: String,

    /// Pages backing each closure magazine
    #[serde(default = "default_magazine_pages")]
    pub magazine_pages: usize,

    /// Capture the native last-error value after every call
    #[serde(default)]
    pub save_errors_by_default: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            address_size: default_address_size(),
            long_size: default_long_size(),
            page_size: None,
            enable_stubs: true,
            enable_fast_paths: true,
            default_encoding: default_encoding(),
            magazine_pages: default_magazine_pages(),
            save_errors_by_default: false,
        }
    }
}

fn default_true() -> bool { true }
fn default_address_size() -> usize { DataModel::host().address_size }
fn default_long_size() -> usize { DataModel::host().long_size }
fn default_encoding() -> String { "UTF-8".to_string() }
fn default_magazine_pages() -> usize { 1 }

impl RuntimeConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| BindError::InvalidConfig(format!("Failed to read config: {}", e)))?;

        Self::parse(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| BindError::InvalidConfig(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // DYNBIND_ADDRESS_SIZE: 4 or 8
        if let Some(size) = env_usize("DYNBIND_ADDRESS_SIZE") {
            config.address_size = size;
        }

        // DYNBIND_NO_STUBS / DYNBIND_NO_FAST_PATHS: disable a strategy family
        if env_flag("DYNBIND_NO_STUBS") {
            config.enable_stubs = false;
        }
        if env_flag("DYNBIND_NO_FAST_PATHS") {
            config.enable_fast_paths = false;
        }

        if let Ok(label) = std::env::var("DYNBIND_ENCODING") {
            config.default_encoding = label;
        }

        if let Some(pages) = env_usize("DYNBIND_MAGAZINE_PAGES") {
            config.magazine_pages = pages;
        }

        config
    }

    /// Reject values the runtime cannot honour
    pub fn validate(&self) -> Result<()> {
        if self.address_size != 4 && self.address_size != 8 {
            return Err(BindError::InvalidConfig(format!(
                "address_size must be 4 or 8, got {}",
                self.address_size
            )));
        }
        if self.long_size != 4 && self.long_size != 8 {
            return Err(BindError::InvalidConfig(format!(
                "long_size must be 4 or 8, got {}",
                self.long_size
            )));
        }
        if self.magazine_pages == 0 {
            return Err(BindError::InvalidConfig("magazine_pages must be non-zero".into()));
        }
        if let Some(size) = self.page_size {
            if !size.is_power_of_two() {
                return Err(BindError::InvalidConfig(format!(
                    "page_size must be a power of two, got {}",
                    size
                )));
            }
        }
        if Encoding::from_label(&self.default_encoding).is_none() {
            return Err(BindError::InvalidConfig(format!(
                "unknown encoding {}",
                self.default_encoding
            )));
        }
        Ok(())
    }

    /// Native data model described by this configuration
    pub fn data_model(&self) -> DataModel {
        DataModel {
            address_size: self.address_size,
            long_size: self.long_size,
        }
    }

    /// Default text encoding, falling back to UTF-8 for unknown labels
    pub fn encoding(&self) -> Encoding {
        Encoding::from_label(&self.default_encoding).unwrap_or(Encoding::Utf8)
    }
}

fn env_flag(name: &str) -> bool {
    match std::env::var(name) {
        Ok(val) => val == "1" || val.eq_ignore_ascii_case("true"),
        Err(_) => false,
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

//! Configuration module

use crate::archive::{Compressor, ExtractOptions, DEFAULT_LEVEL};
use crate::{Error, Result};
use dirs::config_dir;
use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Archive creation defaults
    #[serde(default)]
    pub create: CreateConfig,
    /// Extraction defaults
    #[serde(default)]
    pub extract: ExtractConfig,
}

/// Archive creation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CreateConfig {
    /// Compressor to use; inferred from the archive name when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression: Option<Compressor>,
    /// Gzip level (0-9)
    pub level: u32,
    /// Maximum archive size in bytes (0 = unlimited)
    #[serde(deserialize_with = "deserialize_size")]
    pub limit_archive: u64,
    /// Maximum file data read in bytes (0 = unlimited)
    #[serde(deserialize_with = "deserialize_size")]
    pub limit_data: u64,
}

impl Default for CreateConfig {
    fn default() -> Self {
        Self {
            compression: None,
            level: DEFAULT_LEVEL,
            limit_archive: 0,
            limit_data: 0,
        }
    }
}

/// Extraction configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Replace existing files without asking
    pub overwrite: bool,
    /// Ask before replacing existing files when `overwrite` is off
    pub interactive: bool,
    /// Restore file owners
    pub restore_owner: bool,
    /// Restore access and modification times
    pub restore_timestamps: bool,
    /// Stop at the first failing entry
    pub fail_fast: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            overwrite: false,
            interactive: true,
            restore_owner: false,
            restore_timestamps: true,
            fail_fast: false,
        }
    }
}

impl ExtractConfig {
    /// Extraction options carrying these defaults, without prompt or error log
    pub fn to_options(&self) -> ExtractOptions {
        ExtractOptions {
            overwrite: self.overwrite,
            interactive: self.interactive,
            restore_owner: self.restore_owner,
            restore_timestamps: self.restore_timestamps,
            fail_fast: self.fail_fast,
            ..Default::default()
        }
    }
}

/// Size given either as a byte count or as a string like "10MiB"
#[derive(Deserialize)]
#[serde(untagged)]
enum SizeValue {
    Bytes(u64),
    Text(String),
}

fn deserialize_size<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    match SizeValue::deserialize(deserializer)? {
        SizeValue::Bytes(bytes) => Ok(bytes),
        SizeValue::Text(text) => parse_size(&text)
            .map_err(|e| D::Error::custom(format!("Failed to parse size: {}", e))),
    }
}

/// Parse size string like "100MiB" to bytes
pub fn parse_size(size_str: &str) -> Result<u64> {
    let size_str = size_str.trim();

    if let Ok(bytes) = size_str.parse::<u64>() {
        return Ok(bytes);
    }

    let split_pos = size_str
        .chars()
        .position(|c| !c.is_ascii_digit() && c != '.')
        .unwrap_or(size_str.len());

    if split_pos == 0 {
        return Err(Error::Config(format!("Invalid size format: {}", size_str)));
    }

    let (number_part, unit_part) = size_str.split_at(split_pos);
    let number: f64 = number_part
        .parse()
        .map_err(|_| Error::Config(format!("Invalid number in size: {}", number_part)))?;

    let multiplier: u64 = match unit_part.trim().to_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" => 1_000,
        "m" | "mb" => 1_000_000,
        "g" | "gb" => 1_000_000_000,
        "t" | "tb" => 1_000_000_000_000,
        "ki" | "kib" => 1_024,
        "mi" | "mib" => 1_048_576,
        "gi" | "gib" => 1_073_741_824,
        "ti" | "tib" => 1_099_511_627_776,
        _ => return Err(Error::Config(format!("Unknown size unit: {}", unit_part))),
    };

    Ok((number * multiplier as f64) as u64)
}

impl Config {
    /// Get the configuration file path
    pub fn config_path() -> Result<PathBuf> {
        let config_dir = config_dir()
            .ok_or_else(|| Error::Config("Unable to determine config directory".to_string()))?;
        Ok(config_dir.join("sar").join("config.toml"))
    }

    /// Get default configuration content with examples
    pub fn default_config_content() -> String {
        r#"# sar configuration file

[create]
# Compressor: "gzip" or "none". When unset it is inferred from the archive
# name (.tar.gz / .tgz use gzip).
# compression = "gzip"
# Gzip level (0-9)
level = 6
# Maximum size of the written archive, 0 = unlimited. Accepts "512MiB" etc.
limit_archive = 0
# Maximum file data read while archiving, 0 = unlimited
limit_data = 0

[extract]
# Replace existing files without asking
overwrite = false
# Ask before replacing when overwrite is off and a terminal is attached
interactive = true
# Restore file owners (usually needs root)
restore_owner = false
# Restore access and modification times
restore_timestamps = true
# Stop at the first failing entry
fail_fast = false
"#
        .to_string()
    }

    /// Load configuration from the default location.
    ///
    /// A missing file yields the defaults; nothing is written.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, contents)?;
        Ok(())
    }
}

//! Configuration management for relay-emu.
//!
//! Configuration is loaded from multiple sources in priority order:
//! 1. Environment variables (`RELAY_EMU_DECODE_MODE`, `RELAY_EMU_MAX_STEPS`)
//! 2. Project-local config file (`./relay-emu.toml`)
//! 3. User config file (`~/.config/relay-emu/config.toml`)
//! 4. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! # relay-emu.toml
//!
//! # Fail a step when two instructions of one unit decode together
//! decode_mode = "strict"
//!
//! # Memory sizes in words
//! tensor_mem_depth = 65536
//! relay_mem_depth = 65536
//!
//! # Step limit for one harness run
//! max_steps = 1000000
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::ila::DecodeMode;

/// Global cached configuration.
static CONFIG: OnceLock<Config> = OnceLock::new();

/// Default depth of both memories, in words.
pub const DEFAULT_MEM_DEPTH: usize = 1 << 16;

/// Default step limit for a harness run.
pub const DEFAULT_MAX_STEPS: u64 = 1_000_000;

/// relay-emu configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Handling of two instructions decoding on one unit.
    pub decode_mode: Option<DecodeMode>,

    /// Words in the 8-bit tensor memory.
    pub tensor_mem_depth: Option<usize>,

    /// Words in the 32-bit vector memory.
    pub relay_mem_depth: Option<usize>,

    /// Step limit for one harness run.
    pub max_steps: Option<u64>,
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Priority (highest to lowest):
    /// 1. Environment variables
    /// 2. Project-local `relay-emu.toml`
    /// 3. User config `~/.config/relay-emu/config.toml`
    /// 4. Defaults
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(user_config) = Self::load_user_config() {
            config.merge(user_config);
        }

        if let Some(local_config) = Self::load_local_config() {
            config.merge(local_config);
        }

        config.apply_env_overrides();

        config
    }

    /// Get the cached global configuration.
    ///
    /// Loads configuration on first call and caches it.
    pub fn get() -> &'static Config {
        CONFIG.get_or_init(|| {
            let config = Self::load();
            log::debug!("Loaded configuration: {:?}", config);
            config
        })
    }

    /// Decode mode, strict unless configured.
    pub fn decode_mode(&self) -> DecodeMode {
        self.decode_mode.unwrap_or_default()
    }

    /// Tensor memory depth in words.
    pub fn tensor_mem_depth(&self) -> usize {
        self.tensor_mem_depth.unwrap_or(DEFAULT_MEM_DEPTH)
    }

    /// Vector memory depth in words.
    pub fn relay_mem_depth(&self) -> usize {
        self.relay_mem_depth.unwrap_or(DEFAULT_MEM_DEPTH)
    }

    /// Step limit for one harness run.
    pub fn max_steps(&self) -> u64 {
        self.max_steps.unwrap_or(DEFAULT_MAX_STEPS)
    }

    /// Load user configuration from ~/.config/relay-emu/config.toml
    fn load_user_config() -> Option<Self> {
        let config_path = Self::user_config_path()?;
        Self::load_from_file(&config_path)
    }

    /// Load project-local configuration from ./relay-emu.toml
    fn load_local_config() -> Option<Self> {
        let local_path = Path::new("relay-emu.toml");
        if let Some(config) = Self::load_from_file(local_path) {
            return Some(config);
        }

        if let Ok(manifest_dir) = std::env::var("CARGO_MANIFEST_DIR") {
            let project_path = Path::new(&manifest_dir).join("relay-emu.toml");
            if let Some(config) = Self::load_from_file(&project_path) {
                return Some(config);
            }
        }

        None
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    log::info!("Loaded config from {}", path.display());
                    Some(config)
                }
                Err(e) => {
                    log::warn!("Failed to parse {}: {}", path.display(), e);
                    None
                }
            },
            Err(e) => {
                log::warn!("Failed to read {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Merge another config into this one.
    /// Only overrides fields that are Some in the other config.
    fn merge(&mut self, other: Self) {
        if other.decode_mode.is_some() {
            self.decode_mode = other.decode_mode;
        }
        if other.tensor_mem_depth.is_some() {
            self.tensor_mem_depth = other.tensor_mem_depth;
        }
        if other.relay_mem_depth.is_some() {
            self.relay_mem_depth = other.relay_mem_depth;
        }
        if other.max_steps.is_some() {
            self.max_steps = other.max_steps;
        }
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(mode) = std::env::var("RELAY_EMU_DECODE_MODE") {
            match parse_decode_mode(&mode) {
                Some(parsed) => {
                    log::info!("Using RELAY_EMU_DECODE_MODE from environment: {}", mode);
                    self.decode_mode = Some(parsed);
                }
                None => log::warn!("Ignoring RELAY_EMU_DECODE_MODE={}: expected strict or last_wins", mode),
            }
        }
        if let Ok(steps) = std::env::var("RELAY_EMU_MAX_STEPS") {
            match steps.parse::<u64>() {
                Ok(parsed) => {
                    log::info!("Using RELAY_EMU_MAX_STEPS from environment: {}", parsed);
                    self.max_steps = Some(parsed);
                }
                Err(e) => log::warn!("Ignoring RELAY_EMU_MAX_STEPS={}: {}", steps, e),
            }
        }
    }

    /// Get the path to the user config file (for display/creation).
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("relay-emu").join("config.toml"))
    }

    /// Generate a sample config file content.
    pub fn sample_config() -> String {
        r#"# relay-emu configuration
# Place this file at ~/.config/relay-emu/config.toml or ./relay-emu.toml

# What to do when two instructions of one unit decode in the same step:
# "strict" fails the step, "last_wins" keeps the last one and logs a warning
decode_mode = "strict"

# Depth of the 8-bit tensor memory (words)
tensor_mem_depth = 65536

# Depth of the 32-bit vector memory (words)
relay_mem_depth = 65536

# Step limit for one harness run
# max_steps = 1000000
"#
        .to_string()
    }
}

fn parse_decode_mode(value: &str) -> Option<DecodeMode> {
    match value.trim().to_ascii_lowercase().as_str() {
        "strict" => Some(DecodeMode::Strict),
        "last_wins" | "last-wins" => Some(DecodeMode::LastWins),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.decode_mode(), DecodeMode::Strict);
        assert_eq!(config.tensor_mem_depth(), 65536);
        assert_eq!(config.relay_mem_depth(), 65536);
        assert_eq!(config.max_steps(), 1_000_000);
    }

    #[test]
    fn test_config_merge() {
        let mut base = Config {
            decode_mode: Some(DecodeMode::LastWins),
            tensor_mem_depth: Some(1024),
            relay_mem_depth: None,
            max_steps: Some(10),
        };

        let overlay = Config {
            decode_mode: None,
            tensor_mem_depth: Some(2048),
            relay_mem_depth: Some(4096),
            max_steps: None,
        };

        base.merge(overlay);

        // decode_mode unchanged (overlay was None)
        assert_eq!(base.decode_mode, Some(DecodeMode::LastWins));
        assert_eq!(base.tensor_mem_depth, Some(2048));
        assert_eq!(base.relay_mem_depth, Some(4096));
        assert_eq!(base.max_steps, Some(10));
    }

    #[test]
    fn test_sample_config_parses() {
        let sample = Config::sample_config();
        let config: Config = toml::from_str(&sample).expect("Sample config should parse");
        assert_eq!(config.decode_mode(), DecodeMode::Strict);
        assert_eq!(config.max_steps, None);
    }

    #[test]
    fn test_parse_decode_mode() {
        assert_eq!(parse_decode_mode("STRICT"), Some(DecodeMode::Strict));
        assert_eq!(parse_decode_mode("last-wins"), Some(DecodeMode::LastWins));
        assert_eq!(parse_decode_mode("first"), None);
    }
}

//! # Config - process-wide settings for Undertow
//!
//! Every tunable the stream layer and the sort engine consult lives here.
//! A [`Config`] is built exactly once at startup, usually with
//! [`Config::from_env`], and then handed to the rest of the library by value
//! or behind an `Arc`. Nothing re-reads the environment after that point.
//!
//! ## Environment variables
//!
//! ```text
//! UNDERTOW_MEMORY_MB         sort memory budget in MiB        (default: 64)
//! UNDERTOW_BLOCK_SIZE        physical block size in bytes     (default: 4096)
//! UNDERTOW_BLOCK_FACTOR      physical blocks per logical one  (default: 16)
//! UNDERTOW_CACHE_BLOCKS      cached blocks per stream         (default: 4)
//! UNDERTOW_CACHE_ASSOC       cache ways per set, 0 = full     (default: 0)
//! UNDERTOW_MAX_STREAMS       open stream ceiling              (default: OS limit)
//! UNDERTOW_RESERVED_STREAMS  handles kept back from merging   (default: 2)
//! UNDERTOW_BACKEND           "file" or "mmap"                 (default: file)
//! UNDERTOW_COMPRESSION       "none", "zstd" or "zstd:<level>" (default: none)
//! UNDERTOW_TEMP_DIR          scratch directory                (then TMPDIR, then /var/tmp)
//! UNDERTOW_SEED              random seed for generators       (default: 1)
//! UNDERTOW_LOG               default log filter               (default: info)
//! ```

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

/// Scratch directory used when neither `UNDERTOW_TEMP_DIR` nor `TMPDIR` is set.
pub const DEFAULT_TEMP_DIR: &str = "/var/tmp";

/// Errors produced while loading or validating configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// A variable was present but could not be parsed.
    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    /// Individually valid settings that do not fit together.
    #[error("inconsistent configuration: {0}")]
    Inconsistent(String),
}

/// Physical storage strategy for new streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Positional reads and writes on a regular file handle.
    File,
    /// The file is mapped into the address space.
    Mmap,
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(BackendKind::File),
            "mmap" => Ok(BackendKind::Mmap),
            other => Err(format!("unknown backend `{}`", other)),
        }
    }
}

/// Block-level compression applied on top of the chosen back end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Zstd { level: i32 },
}

/// zstd level used when `UNDERTOW_COMPRESSION=zstd` carries no explicit level.
pub const DEFAULT_ZSTD_LEVEL: i32 = 3;

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        match lower.split_once(':') {
            None if lower == "none" || lower == "off" => Ok(Compression::None),
            None if lower == "zstd" => Ok(Compression::Zstd {
                level: DEFAULT_ZSTD_LEVEL,
            }),
            Some(("zstd", level)) => level
                .parse::<i32>()
                .map(|level| Compression::Zstd { level })
                .map_err(|e| format!("bad zstd level: {}", e)),
            _ => Err(format!("unknown compression `{}`", s)),
        }
    }
}

/// Settings shared by every stream, cache and sort in one process.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Bytes the sort engine may use for in-memory runs and merge buffers.
    pub memory_limit: usize,
    /// Size of one OS-level block. The stream header occupies the first one.
    pub physical_block_size: usize,
    /// Logical block size = `physical_block_size * block_factor`.
    pub block_factor: usize,
    /// Blocks each stream may keep resident in its cache.
    pub cache_blocks: usize,
    /// Ways per cache set. `0` means fully associative.
    pub cache_associativity: usize,
    /// Hard ceiling on simultaneously open streams. `None` derives it from
    /// the process file-descriptor limit.
    pub max_open_streams: Option<usize>,
    /// Handles the sort engine leaves free for the input, the output and
    /// whatever the caller has open.
    pub reserved_streams: usize,
    pub backend: BackendKind,
    pub compression: Compression,
    /// Directory for runs and other scratch streams.
    pub temp_dir: PathBuf,
    pub seed: u64,
    /// Default `env_logger` filter for the driver binary.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            memory_limit: 64 * 1024 * 1024,
            physical_block_size: 4096,
            block_factor: 16,
            cache_blocks: 4,
            cache_associativity: 0,
            max_open_streams: None,
            reserved_streams: 2,
            backend: BackendKind::File,
            compression: Compression::None,
            temp_dir: std::env::temp_dir(),
            seed: 1,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through an arbitrary key lookup.
    ///
    /// Unset keys keep their [`Default`] value, except the scratch directory
    /// which falls back from `UNDERTOW_TEMP_DIR` to `TMPDIR` and finally to
    /// [`DEFAULT_TEMP_DIR`]. The result is validated before it is returned.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unparsable value and
    /// [`ConfigError::Inconsistent`] when [`Config::validate`] fails.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Config::default();

        if let Some(mb) = parse_var::<usize, _>(&lookup, "UNDERTOW_MEMORY_MB")? {
            cfg.memory_limit = mb.saturating_mul(1024 * 1024);
        }
        if let Some(v) = parse_var(&lookup, "UNDERTOW_BLOCK_SIZE")? {
            cfg.physical_block_size = v;
        }
        if let Some(v) = parse_var(&lookup, "UNDERTOW_BLOCK_FACTOR")? {
            cfg.block_factor = v;
        }
        if let Some(v) = parse_var(&lookup, "UNDERTOW_CACHE_BLOCKS")? {
            cfg.cache_blocks = v;
        }
        if let Some(v) = parse_var(&lookup, "UNDERTOW_CACHE_ASSOC")? {
            cfg.cache_associativity = v;
        }
        if let Some(v) = parse_var(&lookup, "UNDERTOW_MAX_STREAMS")? {
            cfg.max_open_streams = Some(v);
        }
        if let Some(v) = parse_var(&lookup, "UNDERTOW_RESERVED_STREAMS")? {
            cfg.reserved_streams = v;
        }
        if let Some(v) = parse_var(&lookup, "UNDERTOW_BACKEND")? {
            cfg.backend = v;
        }
        if let Some(v) = parse_var(&lookup, "UNDERTOW_COMPRESSION")? {
            cfg.compression = v;
        }
        if let Some(v) = parse_var(&lookup, "UNDERTOW_SEED")? {
            cfg.seed = v;
        }
        if let Some(v) = lookup("UNDERTOW_LOG") {
            cfg.log_level = v;
        }

        cfg.temp_dir = lookup("UNDERTOW_TEMP_DIR")
            .or_else(|| lookup("TMPDIR"))
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_TEMP_DIR));

        cfg.validate()?;
        Ok(cfg)
    }

    /// Size in bytes of one logical block, the unit the cache holds.
    ///
    /// Saturates on overflow; [`Config::validate`] rejects such a geometry.
    pub fn logical_block_size(&self) -> usize {
        self.physical_block_size.saturating_mul(self.block_factor)
    }

    /// Checks that the settings describe a usable geometry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.physical_block_size < 512 || !self.physical_block_size.is_power_of_two() {
            return Err(ConfigError::Inconsistent(format!(
                "physical block size {} must be a power of two >= 512",
                self.physical_block_size
            )));
        }
        if self.block_factor == 0 {
            return Err(ConfigError::Inconsistent("block factor must be >= 1".into()));
        }
        if self.cache_blocks == 0 {
            return Err(ConfigError::Inconsistent(
                "cache must hold at least one block".into(),
            ));
        }
        if self.cache_associativity != 0 && self.cache_blocks % self.cache_associativity != 0 {
            return Err(ConfigError::Inconsistent(format!(
                "cache of {} blocks cannot be split into {}-way sets",
                self.cache_blocks, self.cache_associativity
            )));
        }
        let Some(block) = self.physical_block_size.checked_mul(self.block_factor) else {
            return Err(ConfigError::Inconsistent(format!(
                "block of {} x {} bytes overflows",
                self.block_factor, self.physical_block_size
            )));
        };
        if self.memory_limit < block {
            return Err(ConfigError::Inconsistent(format!(
                "memory limit {} is smaller than one block ({})",
                self.memory_limit, block
            )));
        }
        if let Compression::Zstd { level } = self.compression {
            if !(-7..=22).contains(&level) {
                return Err(ConfigError::Inconsistent(format!(
                    "zstd level {} out of range",
                    level
                )));
            }
        }
        Ok(())
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                key: key.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

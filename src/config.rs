//! # Host Configuration Contract
//!
//! The engine does not parse its own configuration language; per §6 it is
//! wired up by a host scripting environment that hands each module an
//! options table. This module defines the accessor contract the host must
//! provide (`ModuleOptions`), the lifecycle hooks the host exposes to the
//! main loop (`HostEnv`), and the sync-buffer option-string grammar.
//!
//! It also keeps a small set of process-wide engine defaults using the
//! same env-var-then-file-then-default cascade as the rest of this crate's
//! lineage, scoped to tunables that aren't per-module (default log level,
//! PCR pacing constants).

use lazy_static::lazy_static;
use std::env;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::RwLock;

use crate::error::{EngineError, Result};

/// Read-only view of a module's option table, as supplied by the host.
///
/// Mirrors the Lua-stack accessors in the original embedder: `option_int`,
/// `option_str`, `option_bool` each return `None` when the option is absent
/// or of the wrong type, rather than erroring — callers decide whether a
/// missing option is a config error.
pub trait ModuleOptions {
    /// Reads an integer option.
    fn option_int(&self, name: &str) -> Option<i64>;
    /// Reads a string option.
    fn option_str(&self, name: &str) -> Option<&str>;
    /// Reads a boolean option.
    fn option_bool(&self, name: &str) -> Option<bool>;

    /// Reads a required integer option, producing a config error if absent.
    fn require_int(&self, name: &str) -> Result<i64> {
        self.option_int(name)
            .ok_or_else(|| EngineError::Config(format!("missing required option '{}'", name)))
    }

    /// Reads a required string option, producing a config error if absent.
    fn require_str(&self, name: &str) -> Result<&str> {
        self.option_str(name)
            .ok_or_else(|| EngineError::Config(format!("missing required option '{}'", name)))
    }
}

/// A simple owned option table, useful for tests and for hosts that parse
/// their own configuration into a flat key/value form before handing it to
/// a module.
#[derive(Debug, Clone, Default)]
pub struct OptionTable {
    ints: std::collections::HashMap<String, i64>,
    strs: std::collections::HashMap<String, String>,
    bools: std::collections::HashMap<String, bool>,
}

impl OptionTable {
    /// Creates an empty option table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an integer option.
    pub fn with_int(mut self, name: &str, value: i64) -> Self {
        self.ints.insert(name.to_string(), value);
        self
    }

    /// Sets a string option.
    pub fn with_str(mut self, name: &str, value: impl Into<String>) -> Self {
        self.strs.insert(name.to_string(), value.into());
        self
    }

    /// Sets a boolean option.
    pub fn with_bool(mut self, name: &str, value: bool) -> Self {
        self.bools.insert(name.to_string(), value);
        self
    }
}

impl ModuleOptions for OptionTable {
    fn option_int(&self, name: &str) -> Option<i64> {
        self.ints.get(name).copied()
    }

    fn option_str(&self, name: &str) -> Option<&str> {
        self.strs.get(name).map(|s| s.as_str())
    }

    fn option_bool(&self, name: &str) -> Option<bool> {
        self.bools.get(name).copied()
    }
}

/// Lifecycle hooks the host scripting environment provides to the main loop.
///
/// `on_sighup` is invoked after logs are reopened when `MAIN_LOOP_SIGHUP` is
/// set; `gc_tick` is invoked at most once a second as a hint to whatever
/// garbage collector or resource reaper the host runs.
pub trait HostEnv: Send {
    /// Invoked once per SIGHUP, after the engine reopens its own log state.
    fn on_sighup(&mut self);

    /// Invoked roughly once a second from the main loop.
    fn gc_tick(&mut self);
}

/// A `HostEnv` that does nothing; useful for embedding the engine without a
/// scripting layer, or in tests.
#[derive(Debug, Default)]
pub struct NullHost;

impl HostEnv for NullHost {
    fn on_sighup(&mut self) {}
    fn gc_tick(&mut self) {}
}

/// Parsed form of the sync-buffer option string `"<enough>,<low>,<max_mib>"`.
///
/// Any field may be omitted (empty between commas); unparseable fields keep
/// their default rather than rejecting the whole string. A value that
/// parses but is out of range (zero, or `low >= enough`) rejects the option.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncBufferOptions {
    /// Number of filled blocks considered "enough" to leave FILLING state.
    pub enough_blocks: usize,
    /// Number of filled blocks below which the buffer is considered low.
    pub low_blocks: usize,
    /// Maximum buffer size in mebibytes.
    pub max_mib: usize,
}

impl Default for SyncBufferOptions {
    fn default() -> Self {
        Self {
            enough_blocks: 10,
            low_blocks: 5,
            max_mib: 8,
        }
    }
}

impl SyncBufferOptions {
    /// Parses the `"<enough>,<low>,<max_mib>"` option string, falling back
    /// to defaults for empty or unparseable fields.
    pub fn parse(s: &str) -> Result<Self> {
        let defaults = Self::default();
        let mut fields = s.split(',');

        let enough_blocks = parse_field(fields.next(), defaults.enough_blocks);
        let low_blocks = parse_field(fields.next(), defaults.low_blocks);
        let max_mib = parse_field(fields.next(), defaults.max_mib);

        if enough_blocks == 0 || max_mib == 0 || low_blocks >= enough_blocks {
            return Err(EngineError::Config(format!(
                "invalid sync buffer option string: '{}'",
                s
            )));
        }

        Ok(Self {
            enough_blocks,
            low_blocks,
            max_mib,
        })
    }
}

fn parse_field(field: Option<&str>, default: usize) -> usize {
    match field {
        Some(s) if !s.trim().is_empty() => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

lazy_static! {
    static ref ENGINE_DEFAULTS: RwLock<EngineDefaults> = RwLock::new(EngineDefaults::new());
}

/// Process-wide engine tunables that aren't tied to a single module.
#[derive(Debug, Clone)]
pub struct EngineDefaults {
    /// Default sync-buffer options applied when a module omits the option.
    pub sync_buffer: SyncBufferOptions,
    /// PCR insertion interval, microseconds (informational; see SPEC_FULL).
    pub pcr_insert_interval_us: u64,
    /// PCR drift threshold, microseconds, beyond which a remux pipeline
    /// would consider the clock discontinuous (informational).
    pub pcr_drift_limit_us: u64,
}

impl EngineDefaults {
    fn new() -> Self {
        let mut defaults = Self {
            sync_buffer: SyncBufferOptions::default(),
            pcr_insert_interval_us: 20_000,
            pcr_drift_limit_us: 1_000_000,
        };

        if let Ok(opts) = env::var("RELAYTS_SYNC_BUFFER") {
            if let Ok(parsed) = SyncBufferOptions::parse(&opts) {
                defaults.sync_buffer = parsed;
            }
        }

        for path in ["./relayts.toml", "./config.toml"] {
            if let Ok(mut file) = File::open(path) {
                let mut content = String::new();
                if file.read_to_string(&mut content).is_ok() {
                    if let Some(line) = content
                        .lines()
                        .find(|line| line.trim_start().starts_with("sync_buffer"))
                    {
                        if let Some(value) = line.split('=').nth(1) {
                            let value = value.trim().trim_matches('"').trim_matches('\'');
                            if let Ok(parsed) = SyncBufferOptions::parse(value) {
                                defaults.sync_buffer = parsed;
                            }
                        }
                    }
                }
            }
        }

        defaults
    }

    /// Reloads defaults from the environment and config file, as happens on
    /// SIGHUP.
    pub fn reload() {
        let fresh = EngineDefaults::new();
        if let Ok(mut guard) = ENGINE_DEFAULTS.write() {
            *guard = fresh;
        }
    }
}

/// Returns a snapshot of the current process-wide engine defaults.
pub fn defaults() -> EngineDefaults {
    ENGINE_DEFAULTS.read().unwrap().clone()
}

/// Writes a commented template config file if none exists at `path`.
pub fn create_default_config_template<P: AsRef<Path>>(path: P) -> std::io::Result<()> {
    if !path.as_ref().exists() {
        let template = r#"# relayts engine configuration
# This is a template. Replace the values with your actual configuration.

# Sync buffer sizing: "<enough_blocks>,<low_blocks>,<max_mib>"
sync_buffer = "10,5,8"
"#;
        std::fs::write(path, template)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn option_table_round_trip() {
        let opts = OptionTable::new()
            .with_int("pid", 256)
            .with_str("name", "video")
            .with_bool("enabled", true);

        assert_eq!(opts.option_int("pid"), Some(256));
        assert_eq!(opts.option_str("name"), Some("video"));
        assert_eq!(opts.option_bool("enabled"), Some(true));
        assert_eq!(opts.option_int("missing"), None);
    }

    #[test]
    fn sync_buffer_options_default() {
        let parsed = SyncBufferOptions::parse("").unwrap();
        assert_eq!(parsed, SyncBufferOptions::default());
    }

    #[test]
    fn sync_buffer_options_partial() {
        let parsed = SyncBufferOptions::parse("20,,16").unwrap();
        assert_eq!(parsed.enough_blocks, 20);
        assert_eq!(parsed.low_blocks, 5);
        assert_eq!(parsed.max_mib, 16);
    }

    #[test]
    fn sync_buffer_options_rejects_bad_ordering() {
        assert!(SyncBufferOptions::parse("5,10,8").is_err());
    }

    #[test]
    fn sync_buffer_options_rejects_zero() {
        assert!(SyncBufferOptions::parse("0,0,8").is_err());
    }
}

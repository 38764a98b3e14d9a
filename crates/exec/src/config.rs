//! Configuration of the terminal runner.
//!
//! Configuration is merged from several sources, in priority order:
//! 1. Command-line flags
//! 2. The file given with `--config`, or the project-local `./stackasm.toml` if it exists
//! 3. Built-in defaults
//!
//! # Config File Format
//!
//! ```toml
//! # stackasm.toml
//!
//! # Suspend before every instruction.
//! debug = false
//!
//! # Zero-based line indices to stop at.
//! breakpoints = [4, 12]
//!
//! # Default log filter, overridden by RUST_LOG.
//! log = "warn,stackasm_vm=debug"
//!
//! # Debugger prompt.
//! prompt = "(stackasm) "
//! ```

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// The name of the project-local configuration file.
pub const LOCAL_CONFIG: &str = "stackasm.toml";

/// The log filter used when neither the configuration nor `RUST_LOG` provide one.
pub const DEFAULT_LOG: &str = "warn";

/// The debugger prompt used when the configuration does not provide one.
pub const DEFAULT_PROMPT: &str = "(stackasm) ";

/// Runner configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Start the program in debug mode.
    pub debug: bool,

    /// Lines flagged as breakpoints before the run starts.
    pub breakpoints: Vec<usize>,

    /// Default log filter.
    pub log: Option<String>,

    /// Debugger prompt.
    pub prompt: Option<String>,
}

impl Config {
    /// Loads the configuration file.
    ///
    /// An explicit `path` must exist. Without one, `./stackasm.toml` is read if present, and the
    /// defaults are used otherwise.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => {
                let local = Path::new(LOCAL_CONFIG);
                if local.is_file() {
                    Self::from_file(local)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Reads a configuration file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid configuration in {}", path.display()))
    }

    /// Applies command-line flags on top of the file configuration.
    pub fn apply_flags(&mut self, debug: bool, breakpoints: &[usize]) {
        self.debug |= debug;

        for &line in breakpoints {
            if !self.breakpoints.contains(&line) {
                self.breakpoints.push(line);
            }
        }
    }

    /// Returns the log filter to use when `RUST_LOG` is not set.
    pub fn log_filter(&self) -> &str {
        self.log.as_deref().unwrap_or(DEFAULT_LOG)
    }

    /// Returns the debugger prompt.
    pub fn prompt(&self) -> &str {
        self.prompt.as_deref().unwrap_or(DEFAULT_PROMPT)
    }
}

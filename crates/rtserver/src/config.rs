//! # Server Configuration
//!
//! Loaded once at startup, from code or from a TOML file.
//!
//! ```toml
//! num_queues = 3
//! num_threads = 8
//! use_air = false
//! wait_timeout_ms = 30000
//! ```

use crate::error::{RtResult, RtServerError};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Fewest queues a server runs with. Queue 0 serves single rays, queue 1 arrays.
pub const MIN_QUEUES: usize = 2;

/// Default number of priority levels.
pub const DEFAULT_QUEUES: usize = 3;

/// Default growth step of the session table.
pub const DEFAULT_SESSION_SLOT_BLOCK: usize = 5;

/// Raytrace server configuration.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Number of priority levels. Lower index is served first.
    pub num_queues: usize,
    /// Number of worker threads.
    pub num_threads: usize,
    /// Report hits on air regions and classify them by aircode.
    pub use_air: bool,
    /// Build a component table after each geometry load.
    pub classify_components: bool,
    /// How many session slots are added when the table is full.
    pub session_slot_block: usize,
    /// Deadline for synchronous shots. `None` waits forever.
    pub wait_timeout_ms: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            num_queues: DEFAULT_QUEUES,
            num_threads: available_threads(),
            use_air: false,
            classify_components: true,
            session_slot_block: DEFAULT_SESSION_SLOT_BLOCK,
            wait_timeout_ms: None,
        }
    }
}

fn available_threads() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

impl ServerConfig {
    /// Production config: every core busy, and no caller blocks for more
    /// than 30 seconds.
    #[must_use]
    pub fn production() -> Self {
        Self {
            wait_timeout_ms: Some(30_000),
            ..Self::default()
        }
    }

    /// Parses a config from TOML text. Missing keys take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`RtServerError::Config`] if the text does not parse.
    pub fn from_toml_str(text: &str) -> RtResult<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| RtServerError::Config(format!("failed to parse server config: {e}")))?;
        Ok(config.normalized())
    }

    /// Reads a config file.
    ///
    /// # Errors
    ///
    /// Returns [`RtServerError::Config`] if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> RtResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            RtServerError::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    /// Sets the number of priority levels.
    #[must_use]
    pub const fn with_queues(mut self, num_queues: usize) -> Self {
        self.num_queues = num_queues;
        self
    }

    /// Sets the number of worker threads.
    #[must_use]
    pub const fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads;
        self
    }

    /// Enables or disables air regions.
    #[must_use]
    pub const fn with_use_air(mut self, use_air: bool) -> Self {
        self.use_air = use_air;
        self
    }

    /// Sets the synchronous shot deadline.
    #[must_use]
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Synchronous shot deadline.
    #[must_use]
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }

    /// Clamps every field to a usable value.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.num_queues < MIN_QUEUES {
            tracing::warn!(requested = self.num_queues, "too few queues, using {MIN_QUEUES}");
            self.num_queues = MIN_QUEUES;
        }
        if self.num_threads == 0 {
            tracing::warn!("zero worker threads requested, using 1");
            self.num_threads = 1;
        }
        self.session_slot_block = self.session_slot_block.max(1);
        self
    }
}

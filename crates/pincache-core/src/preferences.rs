//! Persisted user preferences.
//!
//! Currently only the last-viewed map viewport, read at startup and
//! rewritten on every viewport change.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use crate::config::Config;
use crate::models::Viewport;

/// Viewport file name in the config directory
const VIEWPORT_FILE: &str = "viewport.json";

pub struct ViewportStore {
    path: PathBuf,
}

impl ViewportStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Store at the default location next to the config file.
    pub fn open_default() -> Result<Self> {
        Ok(Self::new(Config::config_dir()?.join(VIEWPORT_FILE)))
    }

    /// Load the saved viewport. Absent or incomplete records yield `None`.
    pub fn load(&self) -> Option<Viewport> {
        let contents = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(viewport) => Some(viewport),
            Err(e) => {
                debug!(error = %e, "Ignoring unreadable viewport record");
                None
            }
        }
    }

    pub fn save(&self, viewport: &Viewport) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string(viewport)?;
        std::fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write viewport: {}", self.path.display()))?;
        Ok(())
    }
}

//! Acquisition loop configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{AcquisitionError, AcquisitionResult};

/// Buffers requested from a source, independent of how many frames are read
pub const DEFAULT_BUFFER_COUNT: usize = 4;

/// Knobs shared by every acquisition loop entry point.
///
/// Serializes to JSON so a run can be described in a config file:
///
/// ```json
/// { "skip": 2, "timeout_secs": 5.0, "truncate": true }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionOptions {
    /// Frames to discard before the first kept frame
    pub skip: usize,
    /// Per-wait timeout in seconds; derived from the source speed when `None`
    pub timeout_secs: Option<f64>,
    /// On timeout, return the frames obtained so far instead of failing
    pub truncate: bool,
    /// Suppress the truncation warning
    pub quiet: bool,
    /// Buffers to request when starting the session
    pub buffer_count: usize,
}

impl Default for AcquisitionOptions {
    fn default() -> Self {
        Self {
            skip: 0,
            timeout_secs: None,
            truncate: false,
            quiet: false,
            buffer_count: DEFAULT_BUFFER_COUNT,
        }
    }
}

impl AcquisitionOptions {
    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = Some(timeout.as_secs_f64());
        self
    }

    pub fn with_truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    pub fn with_quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    pub fn with_buffer_count(mut self, buffer_count: usize) -> Self {
        self.buffer_count = buffer_count;
        self
    }

    /// Explicit timeout, if one was configured.
    ///
    /// Only meaningful after [`AcquisitionOptions::validate`] succeeded; an
    /// out-of-range value reads as `None`.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.and_then(|s| Duration::try_from_secs_f64(s).ok())
    }

    /// Reject settings that can never work before any hardware is touched.
    pub fn validate(&self) -> AcquisitionResult<()> {
        if let Some(secs) = self.timeout_secs {
            if !(secs.is_finite() && secs > 0.0) {
                return Err(AcquisitionError::InvalidArgument(format!(
                    "timeout must be positive and finite, got {secs} s"
                )));
            }
            if Duration::try_from_secs_f64(secs).is_err() {
                return Err(AcquisitionError::InvalidArgument(format!(
                    "timeout of {secs} s is out of range"
                )));
            }
        }
        if self.buffer_count == 0 {
            return Err(AcquisitionError::InvalidArgument(
                "buffer count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> AcquisitionResult<Self> {
        let json = std::fs::read_to_string(path)?;
        let options: Self = serde_json::from_str(&json)?;
        options.validate()?;
        Ok(options)
    }

    pub fn save_to_file(&self, path: &Path) -> AcquisitionResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

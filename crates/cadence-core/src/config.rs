//! Streaming engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default capacity of one streaming buffer: 64 KiB, about 1.5 s of 44.1 kHz stereo 16-bit audio.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Default period of the background refill pass.
pub const DEFAULT_REFILL_INTERVAL_MS: u64 = 100;

/// Default bound of the voice event channel.
pub const DEFAULT_EVENT_QUEUE_DEPTH: usize = 256;

/// Tuning for streamed sound assets and the background refill worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Capacity in bytes of one streaming PCM buffer.
    pub buffer_size: usize,
    /// Period of the background refill pass in milliseconds.
    pub refill_interval_ms: u64,
    /// Bound of the channel carrying voice notifications to the refill worker.
    pub event_queue_depth: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            refill_interval_ms: DEFAULT_REFILL_INTERVAL_MS,
            event_queue_depth: DEFAULT_EVENT_QUEUE_DEPTH,
        }
    }
}

impl StreamingConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the streaming buffer capacity.
    pub const fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    /// Set the refill period.
    pub const fn with_refill_interval(mut self, interval: Duration) -> Self {
        self.refill_interval_ms = interval.as_millis() as u64;
        self
    }

    pub const fn refill_interval(&self) -> Duration {
        Duration::from_millis(self.refill_interval_ms)
    }

    /// Check the values are usable.
    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 {
            return Err(Error::InvalidConfig("buffer_size must be non-zero".into()));
        }
        if self.refill_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "refill_interval_ms must be non-zero".into(),
            ));
        }
        if self.event_queue_depth == 0 {
            return Err(Error::InvalidConfig(
                "event_queue_depth must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

//! Runtime configuration.
//!
//! Configuration is installed per thread through
//! [`Runtime::configure`](crate::reactive::Runtime::configure). Every field
//! has a default, so a partial JSON document is enough:
//!
//! ```rust,ignore
//! let config = ReactiveConfig::from_json(r#"{ "listener_panics": "fail_fast" }"#)?;
//! Runtime::configure(config);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// What happens when a subscriber callback panics during notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PanicPolicy {
    /// Catch the panic, log it, and keep notifying the remaining subscribers.
    #[default]
    Isolate,

    /// Re-raise the panic immediately; remaining subscribers of that
    /// delivery are skipped. While the thread is already unwinding the
    /// panic is isolated instead.
    FailFast,
}

/// Per-thread settings for the reactive runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReactiveConfig {
    /// Policy for panicking subscriber callbacks.
    pub listener_panics: PanicPolicy,

    /// How many times in a row an effect may re-trigger itself before the
    /// runtime gives up on it for the current change.
    pub max_effect_reruns: usize,
}

impl Default for ReactiveConfig {
    fn default() -> Self {
        Self {
            listener_panics: PanicPolicy::Isolate,
            max_effect_reruns: 100,
        }
    }
}

impl ReactiveConfig {
    /// Parse a configuration from JSON, filling absent fields with defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_effect_reruns == 0 {
            return Err(ConfigError::ZeroEffectReruns);
        }
        Ok(())
    }
}

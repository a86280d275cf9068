//! Serializable configuration.
//!
//! ```toml
//! trace_attempts = true
//!
//! [retry]
//! mode = "count"
//! attempts = 5
//! ```

use crate::error::Result;
use isoscope_concurrency::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Facade configuration, loadable from TOML.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IsolationConfig {
    /// Log every attempt through `tracing`
    #[serde(default)]
    pub trace_attempts: bool,

    /// Default retry policy for [`crate::Isolation::isolated`]
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry section of [`IsolationConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RetryConfig {
    /// At most `attempts` attempts in total
    Count {
        /// Total attempts, the first included
        attempts: u32,
    },
    /// Keep trying for `millis` after each orchestration starts
    Within {
        /// Budget in milliseconds
        millis: u64,
    },
    /// Keep trying until success
    Unconditional,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig::Count { attempts: 3 }
    }
}

impl RetryConfig {
    /// The policy this section describes
    pub fn to_policy(&self) -> RetryPolicy {
        match self {
            RetryConfig::Count { attempts } => RetryPolicy::attempts(*attempts),
            RetryConfig::Within { millis } => RetryPolicy::within(Duration::from_millis(*millis)),
            RetryConfig::Unconditional => RetryPolicy::unconditional(),
        }
    }
}

impl IsolationConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Render as a TOML document.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string(self)?)
    }
}

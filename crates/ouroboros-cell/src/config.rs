//! Store configuration.
//!
//! The configuration is a plain value handed to the store at construction;
//! the store keeps its own copy and never exposes it mutably.
//!
//! # Example
//! ```rust,ignore
//! use ouroboros_cell::{ConsistencyLevel, StoreConfig};
//!
//! // From environment
//! let config = StoreConfig::from_env()?;
//!
//! // Or explicit configuration
//! let config = StoreConfig {
//!     address: "postgres://localhost/cells".to_string(),
//!     consistency: ConsistencyLevel::Strong,
//!     ..Default::default()
//! };
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{CellError, Result};

/// Default address: an ephemeral in-memory store
pub const DEFAULT_ADDRESS: &str = "memory://default";

/// Default per-operation deadline
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Read/write consistency requested from the backend.
///
/// Opaque to the store; each backend maps it to its own setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsistencyLevel {
    /// No durability or freshness guarantee
    None,
    /// Backend default
    #[default]
    Weak,
    /// Strongest level the backend offers
    Strong,
}

impl ConsistencyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsistencyLevel::None => "none",
            ConsistencyLevel::Weak => "weak",
            ConsistencyLevel::Strong => "strong",
        }
    }
}

impl FromStr for ConsistencyLevel {
    type Err = CellError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(ConsistencyLevel::None),
            "weak" => Ok(ConsistencyLevel::Weak),
            "strong" => Ok(ConsistencyLevel::Strong),
            other => Err(CellError::Configuration(format!(
                "Unknown consistency level: '{}'. Expected none, weak or strong",
                other
            ))),
        }
    }
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cell store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend address; the scheme selects the backend
    pub address: String,
    /// Consistency level passed to the backend
    pub consistency: ConsistencyLevel,
    /// Default deadline for each operation
    pub timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            consistency: ConsistencyLevel::default(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl StoreConfig {
    /// Create store configuration from environment variables.
    ///
    /// - `CELLSTORE_ADDRESS` (default `memory://default`)
    /// - `CELLSTORE_CONSISTENCY`: `none`, `weak` or `strong` (default `weak`)
    /// - `CELLSTORE_TIMEOUT_SECS` (default 30)
    pub fn from_env() -> Result<Self> {
        let address = std::env::var("CELLSTORE_ADDRESS")
            .unwrap_or_else(|_| DEFAULT_ADDRESS.to_string());

        let consistency = match std::env::var("CELLSTORE_CONSISTENCY") {
            Ok(level) => level.parse()?,
            Err(_) => ConsistencyLevel::default(),
        };

        let timeout = match std::env::var("CELLSTORE_TIMEOUT_SECS") {
            Ok(secs) => Duration::from_secs(secs.parse::<u64>().map_err(|e| {
                CellError::Configuration(format!(
                    "Invalid CELLSTORE_TIMEOUT_SECS '{}': {}",
                    secs, e
                ))
            })?),
            Err(_) => DEFAULT_TIMEOUT,
        };

        let config = Self {
            address,
            consistency,
            timeout,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.address.trim().is_empty() {
            return Err(CellError::Configuration(
                "Address cannot be empty".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(CellError::Configuration(
                "Timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_config_default() {
        let config = StoreConfig::default();
        assert_eq!(config.address, "memory://default");
        assert_eq!(config.consistency, ConsistencyLevel::Weak);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_consistency_from_str() {
        assert_eq!("none".parse::<ConsistencyLevel>().unwrap(), ConsistencyLevel::None);
        assert_eq!("Weak".parse::<ConsistencyLevel>().unwrap(), ConsistencyLevel::Weak);
        assert_eq!("STRONG".parse::<ConsistencyLevel>().unwrap(), ConsistencyLevel::Strong);
        assert!(matches!(
            "linearizable".parse::<ConsistencyLevel>(),
            Err(CellError::Configuration(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_address() {
        let config = StoreConfig {
            address: "  ".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(CellError::Configuration(_))));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = StoreConfig {
            timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(CellError::Configuration(_))));
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = StoreConfig {
            address: "postgres://localhost/cells".to_string(),
            consistency: ConsistencyLevel::Strong,
            timeout: Duration::from_secs(5),
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"strong\""));
        let back: StoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}

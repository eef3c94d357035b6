//! Engine configuration

use serde::{Deserialize, Serialize};
use voty_common::config::{parse_env_var, Configuration, LogConfig};
use voty_common::{Error, Result};

use crate::expression::ParseOptions;

/// Default bound on concurrently evaluated operands
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 5;

/// Configuration for the evaluation engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Operands of one combinator evaluated at the same time
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Accept `not` with extra operands, keeping the first
    #[serde(default)]
    pub lenient_not: bool,

    /// Logging settings
    #[serde(default)]
    pub logging: LogConfig,
}

fn default_concurrency_limit() -> usize {
    DEFAULT_CONCURRENCY_LIMIT
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
            lenient_not: false,
            logging: LogConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Expression parsing options implied by this configuration
    pub fn parse_options(&self) -> ParseOptions {
        ParseOptions {
            lenient_not: self.lenient_not,
        }
    }
}

impl Configuration for EngineConfig {
    fn validate(&self) -> Result<()> {
        if self.concurrency_limit == 0 {
            return Err(Error::configuration(
                "concurrency_limit must be at least 1",
            ));
        }
        self.logging.validate()
    }

    fn apply_env(&mut self, prefix: &str) -> Result<()> {
        if let Some(limit) = parse_env_var::<usize>(prefix, "CONCURRENCY_LIMIT")? {
            self.concurrency_limit = limit;
        }
        if let Some(lenient) = parse_env_var::<bool>(prefix, "LENIENT_NOT")? {
            self.lenient_not = lenient;
        }
        self.logging.apply_env(prefix)
    }
}

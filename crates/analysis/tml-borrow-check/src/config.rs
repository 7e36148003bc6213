//! Borrow checker configuration.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which backend checks loans
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    /// Single forward pass with non-lexical lifetimes
    #[default]
    Nll,
    /// Fact generation plus a Datalog fixed point
    Polonius,
}

/// Settings for one checking run.
///
/// ```toml
/// algorithm = "polonius"
/// two_phase_borrows = true
/// parallel = false
/// max_solver_iterations = 10000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BorrowCheckConfig {
    /// Backend selection
    pub algorithm: Algorithm,
    /// Reserve `mut ref` method receivers until the arguments are evaluated
    pub two_phase_borrows: bool,
    /// Check functions on worker threads
    pub parallel: bool,
    /// Give up solving after this many rounds
    pub max_solver_iterations: Option<usize>,
}

impl Default for BorrowCheckConfig {
    fn default() -> Self {
        Self {
            algorithm: Algorithm::Nll,
            two_phase_borrows: true,
            parallel: false,
            max_solver_iterations: None,
        }
    }
}

/// Errors that can occur when reading a configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The text is not valid TOML or has the wrong shape
    #[error("invalid borrow checker configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

impl BorrowCheckConfig {
    /// Parses a configuration from TOML text. Missing keys keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML or unknown values.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BorrowCheckConfig::default();
        assert_eq!(config.algorithm, Algorithm::Nll);
        assert!(config.two_phase_borrows);
        assert!(!config.parallel);
        assert_eq!(config.max_solver_iterations, None);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = BorrowCheckConfig::from_toml_str("algorithm = \"polonius\"\n").ok();
        assert_eq!(
            config,
            Some(BorrowCheckConfig {
                algorithm: Algorithm::Polonius,
                ..BorrowCheckConfig::default()
            })
        );
    }

    #[test]
    fn test_rejects_unknown_algorithm() {
        let err = BorrowCheckConfig::from_toml_str("algorithm = \"ast\"").err();
        assert!(matches!(err, Some(ConfigError::Parse(_))));
    }
}

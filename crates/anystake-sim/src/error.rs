// crates/anystake-sim/src/error.rs

use thiserror::Error;

use anystake_core::AnyStakeError;

/// Errors raised while loading, deploying or running a scenario.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A component call failed. The step is rolled back.
    #[error(transparent)]
    Core(#[from] AnyStakeError),

    #[error("Invalid config: {0}")]
    Config(String),

    /// A label that names nothing in the deployment.
    #[error("Unknown {kind}: {label}")]
    Unknown { kind: &'static str, label: String },

    /// Strict mode stopped at this step.
    #[error("Step {index} ({step}) failed: {source}")]
    StepFailed {
        index: usize,
        step: String,
        source: Box<SimError>,
    },

    /// Post-run accounting check failed.
    #[error("Invariant violated: {0}")]
    Invariant(String),
}

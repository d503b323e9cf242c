use thiserror::Error;

/// Errors raised while turning an [`ExperimentBuilder`](crate::ExperimentBuilder)
/// into a runnable [`Experiment`](crate::Experiment)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `use_control` was never called
    #[error("experiment `{experiment}` has no control operation; call `use_control` before running it")]
    MissingControl {
        /// Name of the misconfigured experiment
        experiment: String,
    },
}

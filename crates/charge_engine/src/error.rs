use charge_core::{ConfigError, DispatchError, ErrorKind};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("Invalid station configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Could not persist station state: {0:#}")]
    Persistence(anyhow::Error),
}

impl EngineError {
    /// Category of a rejected operation, `None` for infrastructure failures.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            EngineError::Dispatch(error) => Some(error.kind()),
            EngineError::Config(_) | EngineError::Persistence(_) => None,
        }
    }
}

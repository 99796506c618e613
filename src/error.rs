use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The single-holder precondition was violated (acquire while held,
    /// release while not held). Never retried internally.
    #[error("Concurrency error on lock {name:?}: {reason}")]
    Concurrency { name: String, reason: &'static str },

    #[error("Lease lost for lock {name:?}")]
    LeaseLost { name: String },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub(crate) fn concurrency(name: &str, reason: &'static str) -> Self {
        Self::Concurrency {
            name: name.to_string(),
            reason,
        }
    }

    pub(crate) fn lease_lost(name: &str) -> Self {
        Self::LeaseLost {
            name: name.to_string(),
        }
    }

    pub fn is_concurrency(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }

    pub fn is_lease_lost(&self) -> bool {
        matches!(self, Self::LeaseLost { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

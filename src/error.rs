use thiserror::Error;

/// Failures surfaced by the rate tiers.
///
/// `Transport` and `Format` come from the upstream feed and are absorbed by the
/// resolver. `Storage` is fatal and always reaches the caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error("upstream transport failure: {0}")]
    Transport(String),

    #[error("upstream format failure: {0}")]
    Format(String),

    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),
}

impl Error {
    /// True for failures the resolver degrades into "no additional data".
    pub fn is_upstream(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Format(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
